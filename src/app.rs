//! Top-level wiring: one router serving SQS, SNS, S3, the STS shim and the
//! inspection API off a single port, dispatched by content type and URL
//! shape.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::RequestContext;
use crate::config::Config;
use crate::inspect;
use crate::s3::state::S3State;
use crate::sns::state::SnsState;
use crate::spy::MessageSpy;
use crate::sqs::state::SqsState;
use crate::{s3, sns, sqs};

/// Cadence of the cooperative timer routine that advances visibility, delay,
/// retention and dedup deadlines.
pub const TIMER_INTERVAL: Duration = Duration::from_millis(20);

const MAX_BODY_BYTES: usize = 5 * 1024 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub sqs: Arc<SqsState>,
    pub sns: Arc<SnsState>,
    pub s3: Arc<S3State>,
    pub spy: Option<Arc<MessageSpy>>,
    pub config: Arc<Config>,
}

pub fn build_app(config: Config) -> (Router, AppState) {
    let config = Arc::new(config);
    let spy = config
        .message_spies
        .then(|| Arc::new(MessageSpy::new(config.spy_buffer_size)));

    let sqs = Arc::new(SqsState::new(
        config.account_id.clone(),
        config.host.clone(),
        config.port,
        spy.clone(),
    ));
    let sns = Arc::new(SnsState::new(
        config.account_id.clone(),
        sqs.clone(),
        spy.clone(),
    ));
    let s3 = Arc::new(S3State::new(config.account_id.clone(), spy.clone()));

    let state = AppState {
        sqs,
        sns,
        s3,
        spy,
        config: config.clone(),
    };

    let mut router = Router::new()
        .route("/health", get(health))
        .merge(inspect::router())
        .fallback(dispatch)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state.clone());
    if config.logger {
        router = router.layer(middleware::from_fn(log_requests));
    }
    (router, state)
}

/// Drives every queue's delayed/visibility/retention/dedup deadlines on a
/// fixed cadence; the write paths run the same sweep opportunistically.
pub fn spawn_timers(state: &AppState) -> JoinHandle<()> {
    let sqs = state.sqs.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TIMER_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sqs.process_timers().await;
        }
    })
}

async fn health() -> Response {
    axum::Json(serde_json::json!({"status": "ok"})).into_response()
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    tracing::info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Everything that is not `/health` or `/_fauxqs/*` lands here: SQS (JSON
/// protocol with an `X-Amz-Target` header), the query protocol (SNS plus the
/// STS shim), and S3 REST for the rest.
async fn dispatch(State(app): State<AppState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("failed to read body: {e}"))
                .into_response();
        }
    };
    let ctx = RequestContext::from_parts(&parts, &app.config.default_region);

    if let Some(target) = parts
        .headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(action) = target.strip_prefix("AmazonSQS.") {
            return sqs::server::handle(&app.sqs, &ctx, action, &bytes)
                .await
                .unwrap_or_else(IntoResponse::into_response);
        }
    }

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.starts_with("application/x-www-form-urlencoded") {
        let params = sns::server::Params::from_body(&bytes);
        if params.action() == Some("GetCallerIdentity") {
            return caller_identity(&app.config.account_id);
        }
        return sns::server::handle(&app.sns, &ctx, params)
            .await
            .unwrap_or_else(IntoResponse::into_response);
    }

    s3::server::handle(&app.s3, &ctx, &parts, bytes)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

/// STS shim: enough of GetCallerIdentity for SDK credential probing.
fn caller_identity(account_id: &str) -> Response {
    let xml = format!(
        r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>arn:aws:iam::{account_id}:root</Arn>
    <UserId>{account_id}</UserId>
    <Account>{account_id}</Account>
  </GetCallerIdentityResult>
  <ResponseMetadata>
    <RequestId>{}</RequestId>
  </ResponseMetadata>
</GetCallerIdentityResponse>"#,
        Uuid::new_v4(),
    );
    (StatusCode::OK, [("content-type", "text/xml")], xml).into_response()
}
