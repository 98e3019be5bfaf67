mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use fauxqs::config::{apply_init, InitSpec};
use fauxqs::spy::SpyEvent;

use common::*;

#[tokio::test]
async fn init_spec_precreates_resources_in_order() {
    let (router, state) = test_app();
    let spec: InitSpec = serde_json::from_str(
        r#"{
            "queues": [
                {"name": "dead-letters"},
                {"name": "jobs", "attributes": {"VisibilityTimeout": "5"}},
                {"name": "jobs-eu", "region": "eu-west-1"}
            ],
            "topics": [
                {"name": "events", "subscriptions": [
                    {"protocol": "sqs",
                     "endpoint": "arn:aws:sqs:us-east-1:000000000000:jobs",
                     "attributes": {"RawMessageDelivery": "true"}}
                ]}
            ],
            "buckets": [{"name": "artifacts"}]
        }"#,
    )
    .unwrap();
    apply_init(spec, &state).await.unwrap();

    let (status, value) = sqs_call(
        &router,
        "us-east-1",
        "GetQueueUrl",
        json!({"QueueName": "jobs"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{value}");

    let (status, _) = sqs_call(
        &router,
        "eu-west-1",
        "GetQueueUrl",
        json!({"QueueName": "jobs-eu"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The initialized subscription fans out immediately.
    let (status, xml) = sns_call(
        &router,
        "us-east-1",
        &[
            ("Action", "Publish"),
            ("TopicArn", "arn:aws:sns:us-east-1:000000000000:events"),
            ("Message", "boot"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{xml}");
    assert_eq!(inspect_ready_count(&router, "jobs", "us-east-1").await, 1);

    let request = Request::builder()
        .method("GET")
        .uri("/_fauxqs/buckets/artifacts")
        .header("host", "localhost:4566")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn init_rejects_bad_resources() {
    let (_router, state) = test_app();
    let spec: InitSpec =
        serde_json::from_str(r#"{"buckets": [{"name": "NOT-VALID"}]}"#).unwrap();
    let err = apply_init(spec, &state).await.unwrap_err();
    assert!(err.to_string().contains("NOT-VALID"), "{err}");
}

#[tokio::test]
async fn spy_records_publish_consume_and_dead_letter() {
    let (router, state) = test_app();
    let spy = state.spy.clone().expect("spies enabled in test app");

    let dlq_url = create_queue(&router, "us-east-1", "spy-dlq", json!(null)).await;
    let dlq_arn = queue_arn(&router, "us-east-1", &dlq_url).await;
    let url = create_queue(
        &router,
        "us-east-1",
        "spy-q",
        json!({
            "VisibilityTimeout": "1",
            "RedrivePolicy": format!(r#"{{"deadLetterTargetArn":"{dlq_arn}","maxReceiveCount":1}}"#),
        }),
    )
    .await;

    send_message(&router, "us-east-1", &url, "observed").await;
    spy.wait_for(
        |e| matches!(e, SpyEvent::QueuePublished { queue, .. } if queue == "spy-q"),
        Duration::from_millis(500),
    )
    .await
    .expect("publish event");

    receive_messages(&router, "us-east-1", &url, 0).await;
    spy.wait_for(
        |e| matches!(e, SpyEvent::QueueConsumed { queue, .. } if queue == "spy-q"),
        Duration::from_millis(500),
    )
    .await
    .expect("consume event");

    // Second receive after expiry pushes the count past 1 and dead-letters.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    receive_messages(&router, "us-east-1", &url, 0).await;
    let event = spy
        .wait_for(
            |e| matches!(e, SpyEvent::DeadLettered { .. }),
            Duration::from_millis(500),
        )
        .await
        .expect("dead-letter event");
    match event {
        SpyEvent::DeadLettered {
            source_queue,
            target_queue,
            ..
        } => {
            assert_eq!(source_queue, "spy-q");
            assert_eq!(target_queue, "spy-dlq");
        }
        other => panic!("unexpected event {other:?}"),
    }

    // The buffer is visible over HTTP as well.
    let request = Request::builder()
        .method("GET")
        .uri("/_fauxqs/spy")
        .header("host", "localhost:4566")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    let events: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(events.as_array().unwrap().iter().any(|e| e["type"] == "dead-lettered"));
}

#[tokio::test]
async fn unsigned_requests_use_default_region() {
    let (router, _state) = test_app();

    // No Authorization header at all: the queue lands in us-east-1.
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("host", "localhost:4566")
        .header("content-type", "application/x-amz-json-1.0")
        .header("x-amz-target", "AmazonSQS.CreateQueue")
        .body(Body::from(json!({"QueueName": "unsigned"}).to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(
        value["QueueUrl"].as_str().unwrap().contains("sqs.us-east-1."),
        "{value}"
    );

    let (status, _) = sqs_call(
        &router,
        "us-east-1",
        "GetQueueUrl",
        json!({"QueueName": "unsigned"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_actions_are_rejected_in_native_shapes() {
    let (router, _state) = test_app();

    let (status, value) = sqs_call(&router, "us-east-1", "NotAnAction", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        value["__type"].as_str(),
        Some("com.amazonaws.sqs#InvalidAction")
    );

    let (status, xml) = sns_call(&router, "us-east-1", &[("Action", "NotAnAction")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(xml.contains("<Code>InvalidAction</Code>"), "{xml}");
}
