//! Read-only structural views of engine state, for tests and debugging.
//! These endpoints never move messages, renew visibility or touch dedup
//! state; asserting on them has no side effects.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::app::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/_fauxqs/queues", get(list_queues))
        .route("/_fauxqs/queues/{name}", get(queue_detail))
        .route("/_fauxqs/topics", get(list_topics))
        .route("/_fauxqs/topics/{name}", get(topic_detail))
        .route("/_fauxqs/buckets", get(list_buckets))
        .route("/_fauxqs/buckets/{name}", get(bucket_detail))
        .route("/_fauxqs/spy", get(spy_events))
}

fn not_found(kind: &str, name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("{kind} {name} does not exist")})),
    )
        .into_response()
}

fn region_of(app: &AppState, params: &HashMap<String, String>) -> String {
    params
        .get("region")
        .cloned()
        .unwrap_or_else(|| app.config.default_region.clone())
}

async fn list_queues(State(app): State<AppState>) -> Response {
    Json(app.sqs.queue_summaries().await).into_response()
}

async fn queue_detail(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let region = region_of(&app, &params);
    match app.sqs.queue_snapshot(&region, &name).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => not_found("queue", &name),
    }
}

async fn list_topics(State(app): State<AppState>) -> Response {
    Json(app.sns.topic_summaries().await).into_response()
}

async fn topic_detail(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let region = region_of(&app, &params);
    match app.sns.topic_snapshot(&region, &name).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => not_found("topic", &name),
    }
}

async fn list_buckets(State(app): State<AppState>) -> Response {
    Json(app.s3.bucket_summaries().await).into_response()
}

async fn bucket_detail(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let region = region_of(&app, &params);
    match app.s3.bucket_snapshot(&region, &name).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => not_found("bucket", &name),
    }
}

async fn spy_events(State(app): State<AppState>) -> Response {
    match &app.spy {
        Some(spy) => Json(spy.events()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "message spies are disabled"})),
        )
            .into_response(),
    }
}
