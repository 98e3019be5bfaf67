#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use fauxqs::app::{build_app, AppState};
use fauxqs::config::Config;

pub const ACCOUNT: &str = "000000000000";

pub fn test_app() -> (Router, AppState) {
    build_app(Config {
        host: None,
        port: 4566,
        default_region: "us-east-1".into(),
        account_id: ACCOUNT.into(),
        logger: false,
        message_spies: true,
        spy_buffer_size: 256,
    })
}

/// SigV4-shaped Authorization header; only the region segment matters.
pub fn auth_header(region: &str, service: &str) -> String {
    format!(
        "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260101/{region}/{service}/aws4_request, \
         SignedHeaders=host;x-amz-date, Signature=0"
    )
}

pub async fn read_body(response: axum::response::Response) -> (StatusCode, Vec<u8>) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

pub async fn sqs_call(
    router: &Router,
    region: &str,
    action: &str,
    body: Value,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("host", "localhost:4566")
        .header("content-type", "application/x-amz-json-1.0")
        .header("x-amz-target", format!("AmazonSQS.{action}"))
        .header("authorization", auth_header(region, "sqs"))
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let (status, bytes) = read_body(response).await;
    let value = if bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&bytes).unwrap_or(json!({}))
    };
    (status, value)
}

pub async fn sns_call(
    router: &Router,
    region: &str,
    params: &[(&str, &str)],
) -> (StatusCode, String) {
    let body: String = form_urlencoded_encode(params);
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("host", "localhost:4566")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("authorization", auth_header(region, "sns"))
        .body(Body::from(body))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let (status, bytes) = read_body(response).await;
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn form_urlencoded_encode(params: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in params {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}

/// Extracts the unescaped text of the first `<tag>...</tag>` in an XML body.
pub fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(
        xml[start..end]
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}

pub async fn create_queue(router: &Router, region: &str, name: &str, attrs: Value) -> String {
    let mut body = json!({"QueueName": name});
    if !attrs.is_null() {
        body["Attributes"] = attrs;
    }
    let (status, value) = sqs_call(router, region, "CreateQueue", body).await;
    assert_eq!(status, StatusCode::OK, "CreateQueue failed: {value}");
    value["QueueUrl"].as_str().unwrap().to_string()
}

pub async fn queue_arn(router: &Router, region: &str, url: &str) -> String {
    let (_, value) = sqs_call(
        router,
        region,
        "GetQueueAttributes",
        json!({"QueueUrl": url, "AttributeNames": ["QueueArn"]}),
    )
    .await;
    value["Attributes"]["QueueArn"].as_str().unwrap().to_string()
}

pub async fn send_message(router: &Router, region: &str, url: &str, body: &str) -> Value {
    let (status, value) = sqs_call(
        router,
        region,
        "SendMessage",
        json!({"QueueUrl": url, "MessageBody": body}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "SendMessage failed: {value}");
    value
}

pub async fn receive_messages(router: &Router, region: &str, url: &str, wait: i64) -> Value {
    let (status, value) = sqs_call(
        router,
        region,
        "ReceiveMessage",
        json!({
            "QueueUrl": url,
            "MaxNumberOfMessages": 10,
            "WaitTimeSeconds": wait,
            "AttributeNames": ["All"],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "ReceiveMessage failed: {value}");
    value
}

/// Count of ready messages as reported by the inspection API, which never
/// consumes or re-times anything.
pub async fn inspect_ready_count(router: &Router, name: &str, region: &str) -> u64 {
    let request = Request::builder()
        .method("GET")
        .uri(format!("/_fauxqs/queues/{name}?region={region}"))
        .header("host", "localhost:4566")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let (status, bytes) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    value["ready"].as_array().unwrap().len() as u64
}
