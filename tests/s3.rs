mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use common::*;

const PART_SIZE: usize = 5 * 1024 * 1024;

struct S3Response {
    status: StatusCode,
    headers: axum::http::HeaderMap,
    body: Vec<u8>,
}

impl S3Response {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

async fn s3_request(
    router: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> S3Response {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost:4566")
        .header("authorization", auth_header("us-east-1", "s3"));
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let (_, body) = read_body(response).await;
    S3Response {
        status,
        headers,
        body,
    }
}

async fn put(router: &Router, uri: &str, headers: &[(&str, &str)], body: &[u8]) -> S3Response {
    s3_request(router, "PUT", uri, headers, body.to_vec()).await
}

async fn get(router: &Router, uri: &str, headers: &[(&str, &str)]) -> S3Response {
    s3_request(router, "GET", uri, headers, Vec::new()).await
}

async fn make_bucket(router: &Router, name: &str) {
    let resp = put(router, &format!("/{name}"), &[], b"").await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());
}

#[tokio::test]
async fn bucket_name_validation_and_idempotent_create() {
    let (router, _state) = test_app();
    make_bucket(&router, "valid-bucket").await;
    make_bucket(&router, "valid-bucket").await;

    for bad in ["ab", "Upper", "-dash", "192.168.1.1", "dots..dots"] {
        let resp = put(&router, &format!("/{bad}"), &[], b"").await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{bad}");
        assert!(resp.text().contains("InvalidBucketName"), "{bad}");
    }
}

#[tokio::test]
async fn put_get_head_roundtrip_with_metadata() {
    let (router, _state) = test_app();
    make_bucket(&router, "files").await;

    let resp = put(
        &router,
        "/files/docs/readme.txt",
        &[
            ("content-type", "text/plain"),
            ("x-amz-meta-Author", "someone"),
        ],
        b"contents here",
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    let etag = resp.header("etag").unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    let resp = get(&router, "/files/docs/readme.txt", &[]).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body, b"contents here");
    assert_eq!(resp.header("content-type"), Some("text/plain"));
    assert_eq!(resp.header("etag"), Some(etag.as_str()));
    assert_eq!(resp.header("x-amz-meta-author"), Some("someone"));

    let resp = s3_request(&router, "HEAD", "/files/docs/readme.txt", &[], Vec::new()).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.header("content-length"), Some("13"));
    assert!(resp.body.is_empty());

    // Overwrite replaces body and metadata wholesale.
    let resp = put(&router, "/files/docs/readme.txt", &[], b"v2").await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = get(&router, "/files/docs/readme.txt", &[]).await;
    assert_eq!(resp.body, b"v2");
    assert_eq!(resp.header("content-type"), Some("application/octet-stream"));
    assert_eq!(resp.header("x-amz-meta-author"), None);
}

#[tokio::test]
async fn missing_key_and_bucket_errors() {
    let (router, _state) = test_app();
    make_bucket(&router, "present").await;

    let resp = get(&router, "/present/ghost", &[]).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert!(resp.text().contains("<Code>NoSuchKey</Code>"));

    let resp = get(&router, "/absent/ghost", &[]).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert!(resp.text().contains("<Code>NoSuchBucket</Code>"));

    // Deleting a missing key still succeeds; a missing bucket does not.
    let resp = s3_request(&router, "DELETE", "/present/ghost", &[], Vec::new()).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
    let resp = s3_request(&router, "DELETE", "/absent/ghost", &[], Vec::new()).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn range_requests() {
    let (router, _state) = test_app();
    make_bucket(&router, "ranged").await;
    put(&router, "/ranged/hello", &[], b"Hello, World!").await;

    let resp = get(&router, "/ranged/hello", &[("range", "bytes=7-")]).await;
    assert_eq!(resp.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.header("content-range"), Some("bytes 7-12/13"));
    assert_eq!(resp.body, b"World!");

    let resp = get(&router, "/ranged/hello", &[("range", "bytes=0-4")]).await;
    assert_eq!(resp.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.header("content-range"), Some("bytes 0-4/13"));
    assert_eq!(resp.body, b"Hello");

    let resp = get(&router, "/ranged/hello", &[("range", "bytes=-6")]).await;
    assert_eq!(resp.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.body, b"World!");

    let resp = get(&router, "/ranged/hello", &[("range", "bytes=100-200")]).await;
    assert_eq!(resp.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(resp.header("content-range"), Some("bytes */13"));
}

#[tokio::test]
async fn conditional_requests() {
    let (router, _state) = test_app();
    make_bucket(&router, "cond").await;
    let resp = put(&router, "/cond/obj", &[], b"payload").await;
    let etag = resp.header("etag").unwrap().to_string();

    let resp = get(&router, "/cond/obj", &[("if-none-match", etag.as_str())]).await;
    assert_eq!(resp.status, StatusCode::NOT_MODIFIED);
    assert!(resp.body.is_empty());

    let resp = get(&router, "/cond/obj", &[("if-match", "\"mismatch\"")]).await;
    assert_eq!(resp.status, StatusCode::PRECONDITION_FAILED);

    // If-Match beats If-Unmodified-Since.
    let resp = get(
        &router,
        "/cond/obj",
        &[
            ("if-match", etag.as_str()),
            ("if-unmodified-since", "Sun, 06 Nov 1994 08:49:37 GMT"),
        ],
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = get(
        &router,
        "/cond/obj",
        &[("if-unmodified-since", "Sun, 06 Nov 1994 08:49:37 GMT")],
    )
    .await;
    assert_eq!(resp.status, StatusCode::PRECONDITION_FAILED);

    let resp = get(
        &router,
        "/cond/obj",
        &[("if-modified-since", "Sun, 06 Nov 1994 08:49:37 GMT")],
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn multipart_upload_lifecycle() {
    let (router, _state) = test_app();
    make_bucket(&router, "mp").await;

    let resp = s3_request(&router, "POST", "/mp/big?uploads", &[], Vec::new()).await;
    assert_eq!(resp.status, StatusCode::OK);
    let upload_id = xml_text(&resp.text(), "UploadId").unwrap();

    let part1 = vec![b'a'; PART_SIZE];
    let resp = put(
        &router,
        &format!("/mp/big?partNumber=1&uploadId={upload_id}"),
        &[],
        &part1,
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    let etag1 = resp.header("etag").unwrap().to_string();

    let resp = put(
        &router,
        &format!("/mp/big?partNumber=2&uploadId={upload_id}"),
        &[],
        b"World!",
    )
    .await;
    let etag2 = resp.header("etag").unwrap().to_string();

    let complete_xml = format!(
        "<CompleteMultipartUpload>\
         <Part><PartNumber>1</PartNumber><ETag>{etag1}</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>{etag2}</ETag></Part>\
         </CompleteMultipartUpload>"
    );
    let resp = s3_request(
        &router,
        "POST",
        &format!("/mp/big?uploadId={upload_id}"),
        &[],
        complete_xml.clone().into_bytes(),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text());
    let final_etag = xml_text(&resp.text(), "ETag").unwrap();
    assert!(final_etag.ends_with("-2\""), "{final_etag}");

    let resp = s3_request(&router, "HEAD", "/mp/big", &[], Vec::new()).await;
    assert_eq!(
        resp.header("content-length"),
        Some((PART_SIZE + 6).to_string().as_str())
    );
    assert_eq!(resp.header("etag"), Some(final_etag.as_str()));

    // Replay of the completed upload: the id no longer exists.
    let resp = s3_request(
        &router,
        "POST",
        &format!("/mp/big?uploadId={upload_id}"),
        &[],
        complete_xml.into_bytes(),
    )
    .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert!(resp.text().contains("NoSuchUpload"), "{}", resp.text());
}

#[tokio::test]
async fn multipart_part_size_boundary() {
    let (router, _state) = test_app();
    make_bucket(&router, "mpsz").await;

    let resp = s3_request(&router, "POST", "/mpsz/k?uploads", &[], Vec::new()).await;
    let upload_id = xml_text(&resp.text(), "UploadId").unwrap();

    let short = vec![b'a'; PART_SIZE - 1];
    let resp = put(
        &router,
        &format!("/mpsz/k?partNumber=1&uploadId={upload_id}"),
        &[],
        &short,
    )
    .await;
    let etag1 = resp.header("etag").unwrap().to_string();
    let resp = put(
        &router,
        &format!("/mpsz/k?partNumber=2&uploadId={upload_id}"),
        &[],
        b"end",
    )
    .await;
    let etag2 = resp.header("etag").unwrap().to_string();

    let complete = format!(
        "<CompleteMultipartUpload>\
         <Part><PartNumber>1</PartNumber><ETag>{etag1}</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>{etag2}</ETag></Part>\
         </CompleteMultipartUpload>"
    );
    let resp = s3_request(
        &router,
        "POST",
        &format!("/mpsz/k?uploadId={upload_id}"),
        &[],
        complete.into_bytes(),
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.text().contains("EntityTooSmall"), "{}", resp.text());

    // Abort, then further part uploads are refused.
    let resp = s3_request(
        &router,
        "DELETE",
        &format!("/mpsz/k?uploadId={upload_id}"),
        &[],
        Vec::new(),
    )
    .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
    let resp = put(
        &router,
        &format!("/mpsz/k?partNumber=3&uploadId={upload_id}"),
        &[],
        b"more",
    )
    .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn multipart_upload_invisible_until_complete() {
    let (router, _state) = test_app();
    make_bucket(&router, "hidden").await;
    let resp = s3_request(&router, "POST", "/hidden/obj?uploads", &[], Vec::new()).await;
    let upload_id = xml_text(&resp.text(), "UploadId").unwrap();
    put(
        &router,
        &format!("/hidden/obj?partNumber=1&uploadId={upload_id}"),
        &[],
        b"partial",
    )
    .await;

    let resp = get(&router, "/hidden/obj", &[]).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    let resp = get(&router, "/hidden?list-type=2", &[]).await;
    assert!(!resp.text().contains("<Key>obj</Key>"));

    // A bucket with an in-flight upload refuses deletion.
    let resp = s3_request(&router, "DELETE", "/hidden", &[], Vec::new()).await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn copy_object_directives() {
    let (router, _state) = test_app();
    make_bucket(&router, "copies").await;
    put(
        &router,
        "/copies/src",
        &[("content-type", "text/plain"), ("x-amz-meta-origin", "one")],
        b"copy me",
    )
    .await;

    let resp = put(
        &router,
        "/copies/dst",
        &[("x-amz-copy-source", "/copies/src")],
        b"",
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.text().contains("<CopyObjectResult>"), "{}", resp.text());

    let resp = get(&router, "/copies/dst", &[]).await;
    assert_eq!(resp.body, b"copy me");
    assert_eq!(resp.header("content-type"), Some("text/plain"));
    assert_eq!(resp.header("x-amz-meta-origin"), Some("one"));

    // REPLACE takes the request's metadata instead.
    let resp = put(
        &router,
        "/copies/dst2",
        &[
            ("x-amz-copy-source", "copies/src"),
            ("x-amz-metadata-directive", "REPLACE"),
            ("content-type", "application/json"),
        ],
        b"",
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = get(&router, "/copies/dst2", &[]).await;
    assert_eq!(resp.header("content-type"), Some("application/json"));
    assert_eq!(resp.header("x-amz-meta-origin"), None);

    // A copy source without a key is invalid.
    let resp = put(
        &router,
        "/copies/dst3",
        &[("x-amz-copy-source", "just-a-bucket")],
        b"",
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.text().contains("InvalidArgument"));

    // Missing source key.
    let resp = put(
        &router,
        "/copies/dst4",
        &[("x-amz-copy-source", "/copies/ghost")],
        b"",
    )
    .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_objects_v2_with_delimiter_and_pagination() {
    let (router, _state) = test_app();
    make_bucket(&router, "listing").await;
    for key in [
        "a.txt",
        "photos/2024/jan.png",
        "photos/2024/feb.png",
        "videos/intro.mp4",
        "z.txt",
    ] {
        put(&router, &format!("/listing/{key}"), &[], b"x").await;
    }

    let resp = get(&router, "/listing?list-type=2&delimiter=%2F", &[]).await;
    let xml = resp.text();
    assert!(xml.contains("<Key>a.txt</Key>"), "{xml}");
    assert!(xml.contains("<Key>z.txt</Key>"), "{xml}");
    assert!(xml.contains("<Prefix>photos/</Prefix>"), "{xml}");
    assert!(xml.contains("<Prefix>videos/</Prefix>"), "{xml}");
    assert!(xml.contains("<KeyCount>4</KeyCount>"), "{xml}");
    assert!(xml.contains("<IsTruncated>false</IsTruncated>"), "{xml}");

    // Page of 2: truncated with a token, even when the page ends on a
    // common prefix.
    let resp = get(&router, "/listing?list-type=2&delimiter=%2F&max-keys=2", &[]).await;
    let xml = resp.text();
    assert!(xml.contains("<IsTruncated>true</IsTruncated>"), "{xml}");
    let token = xml_text(&xml, "NextContinuationToken").expect("token must be set");

    let resp = get(
        &router,
        &format!("/listing?list-type=2&delimiter=%2F&max-keys=2&continuation-token={token}"),
        &[],
    )
    .await;
    let xml2 = resp.text();
    assert!(xml2.contains("<Prefix>videos/</Prefix>"), "{xml2}");
    assert!(xml2.contains("<Key>z.txt</Key>"), "{xml2}");
    assert!(!xml2.contains("<Prefix>photos/</Prefix>"), "{xml2}");
    assert!(xml2.contains("<IsTruncated>false</IsTruncated>"), "{xml2}");

    // start-after skips keys at or before its value.
    let resp = get(&router, "/listing?list-type=2&start-after=photos/2024/jan.png", &[]).await;
    let xml3 = resp.text();
    assert!(!xml3.contains("<Key>a.txt</Key>"), "{xml3}");
    assert!(xml3.contains("<Key>videos/intro.mp4</Key>"), "{xml3}");
}

#[tokio::test]
async fn list_objects_v1_markers() {
    let (router, _state) = test_app();
    make_bucket(&router, "v1").await;
    for key in ["a", "b", "c", "d"] {
        put(&router, &format!("/v1/{key}"), &[], b"x").await;
    }

    let resp = get(&router, "/v1?max-keys=2", &[]).await;
    let xml = resp.text();
    assert!(xml.contains("<Key>a</Key>") && xml.contains("<Key>b</Key>"), "{xml}");
    assert!(xml.contains("<IsTruncated>true</IsTruncated>"), "{xml}");
    assert_eq!(xml_text(&xml, "NextMarker").as_deref(), Some("b"));

    let resp = get(&router, "/v1?max-keys=2&marker=b", &[]).await;
    let xml = resp.text();
    assert!(xml.contains("<Key>c</Key>") && xml.contains("<Key>d</Key>"), "{xml}");
    assert!(xml.contains("<IsTruncated>false</IsTruncated>"), "{xml}");
}

#[tokio::test]
async fn delete_objects_quiet_and_verbose() {
    let (router, _state) = test_app();
    make_bucket(&router, "bulk").await;
    for key in ["one", "two", "three"] {
        put(&router, &format!("/bulk/{key}"), &[], b"x").await;
    }

    let body = "<Delete><Object><Key>one</Key></Object><Object><Key>two</Key></Object></Delete>";
    let resp = s3_request(&router, "POST", "/bulk?delete", &[], body.into()).await;
    assert_eq!(resp.status, StatusCode::OK);
    let xml = resp.text();
    assert!(xml.contains("<Key>one</Key>") && xml.contains("<Key>two</Key>"), "{xml}");

    let body = "<Delete><Quiet>true</Quiet><Object><Key>three</Key></Object></Delete>";
    let resp = s3_request(&router, "POST", "/bulk?delete", &[], body.into()).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(!resp.text().contains("<Key>three</Key>"), "{}", resp.text());

    let resp = s3_request(&router, "DELETE", "/bulk", &[], Vec::new()).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn list_buckets_fixed_owner() {
    let (router, _state) = test_app();
    make_bucket(&router, "bbb").await;
    make_bucket(&router, "aaa").await;

    let resp = get(&router, "/", &[]).await;
    let xml = resp.text();
    assert!(xml.contains("<DisplayName>local</DisplayName>"), "{xml}");
    assert!(xml.contains("<ID>000000000000</ID>"), "{xml}");
    let a = xml.find("<Name>aaa</Name>").unwrap();
    let b = xml.find("<Name>bbb</Name>").unwrap();
    assert!(a < b, "buckets must list alphabetically");
}

#[tokio::test]
async fn virtual_hosted_style_requests() {
    let (router, _state) = test_app();
    make_bucket(&router, "vhost").await;

    let request = Request::builder()
        .method("PUT")
        .uri("/some/key.txt")
        .header("host", "vhost.s3.localhost:4566")
        .body(Body::from("virtual"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder()
        .method("GET")
        .uri("/some/key.txt")
        .header("host", "vhost.s3.localhost:4566")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"virtual");

    // The same key is visible path-style.
    let resp = get(&router, "/vhost/some/key.txt", &[]).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body, b"virtual");
}

#[tokio::test]
async fn health_and_inspection_endpoints() {
    let (router, _state) = test_app();
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header("host", "localhost:4566")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, br#"{"status":"ok"}"#);

    make_bucket(&router, "observed").await;
    put(&router, "/observed/thing", &[], b"123").await;

    let request = Request::builder()
        .method("GET")
        .uri("/_fauxqs/buckets/observed")
        .header("host", "localhost:4566")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["objects"][0]["key"].as_str(), Some("thing"));
    assert_eq!(value["objects"][0]["size"].as_u64(), Some(3));

    let request = Request::builder()
        .method("GET")
        .uri("/_fauxqs/queues/nope")
        .header("host", "localhost:4566")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let (status, body) = read_body(response).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(String::from_utf8_lossy(&body).contains("error"));
}
