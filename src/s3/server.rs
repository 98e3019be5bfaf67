use std::collections::HashMap;

use axum::body::Bytes;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;

use crate::auth::{virtual_hosted_bucket, RequestContext};

use super::bucket::{format_http_date, Conditionals};
use super::error::S3Error;
use super::state::{ListParams, RangeSpec, S3State};
use super::types::*;

fn xml_response<T: serde::Serialize>(value: &T) -> Response {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    match quick_xml::se::to_string(value) {
        Ok(s) => xml.push_str(&s),
        Err(e) => return S3Error::InternalError(e.to_string()).into_response(),
    }
    (StatusCode::OK, [("content-type", "application/xml")], xml).into_response()
}

fn query_params(parts: &Parts) -> HashMap<String, String> {
    parts
        .uri
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// Splits the request into bucket and key, honoring virtual-hosted style
/// (`<bucket>.s3.<host>`) before path style (`/<bucket>/<key>`).
fn parse_target(parts: &Parts, ctx: &RequestContext) -> (Option<String>, Option<String>) {
    let path = parts.uri.path().trim_start_matches('/');
    let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().to_string();

    if let Some(bucket) = virtual_hosted_bucket(&ctx.authority) {
        let key = (!path.is_empty()).then(|| decode(path));
        return (Some(bucket), key);
    }
    if path.is_empty() {
        return (None, None);
    }
    match path.split_once('/') {
        Some((bucket, key)) if !key.is_empty() => (Some(decode(bucket)), Some(decode(key))),
        Some((bucket, _)) => (Some(decode(bucket)), None),
        None => (Some(decode(path)), None),
    }
}

fn extract_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    for (name, value) in headers.iter() {
        if let Some(meta_key) = name.as_str().strip_prefix("x-amz-meta-") {
            if let Ok(v) = value.to_str() {
                metadata.insert(meta_key.to_string(), v.to_string());
            }
        }
    }
    metadata
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(String::from)
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_conditionals(headers: &HeaderMap) -> Conditionals {
    Conditionals {
        if_match: header(headers, "if-match"),
        if_none_match: header(headers, "if-none-match"),
        if_modified_since: header(headers, "if-modified-since")
            .as_deref()
            .and_then(parse_http_date),
        if_unmodified_since: header(headers, "if-unmodified-since")
            .as_deref()
            .and_then(parse_http_date),
    }
}

/// `bytes=a-b` / `bytes=a-` / `bytes=-n`; anything else is ignored.
fn parse_range(header: &str) -> Option<RangeSpec> {
    let range = header.strip_prefix("bytes=")?;
    let (start, end) = range.split_once('-')?;
    match (start.is_empty(), end.is_empty()) {
        (true, false) => end.parse().ok().map(RangeSpec::Suffix),
        (false, true) => start.parse().ok().map(RangeSpec::From),
        (false, false) => match (start.parse().ok(), end.parse().ok()) {
            (Some(a), Some(b)) => Some(RangeSpec::FromTo(a, b)),
            _ => None,
        },
        (true, true) => None,
    }
}

/// `x-amz-copy-source: [/]<bucket>/<key>`; a source without a key is an error.
fn parse_copy_source(header: &str) -> Result<(String, String), S3Error> {
    let path = header.strip_prefix('/').unwrap_or(header);
    let decoded = percent_decode_str(path).decode_utf8_lossy().to_string();
    match decoded.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => Err(S3Error::InvalidArgument(format!(
            "Invalid copy source: {header}"
        ))),
    }
}

fn continuation_token_encode(entry: &str) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, entry)
}

fn continuation_token_decode(token: &str) -> Option<String> {
    base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, token)
        .ok()
        .and_then(|b| String::from_utf8(b).ok())
}

// --- dispatch ---

pub async fn handle(
    state: &S3State,
    ctx: &RequestContext,
    parts: &Parts,
    body: Bytes,
) -> Result<Response, S3Error> {
    let params = query_params(parts);
    let (bucket, key) = parse_target(parts, ctx);

    match (parts.method.as_str(), bucket, key) {
        ("GET", None, None) => {
            let result = state.list_buckets(&ctx.region).await;
            Ok(xml_response(&result))
        }
        ("PUT", Some(bucket), None) => {
            state.create_bucket(&ctx.region, &bucket).await?;
            Ok(StatusCode::OK.into_response())
        }
        ("DELETE", Some(bucket), None) => {
            state.delete_bucket(&ctx.region, &bucket).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        ("HEAD", Some(bucket), None) => {
            state.head_bucket(&ctx.region, &bucket).await?;
            Ok((
                StatusCode::OK,
                [("x-amz-bucket-region", ctx.region.as_str())],
                "",
            )
                .into_response())
        }
        ("GET", Some(bucket), None) => {
            if params.contains_key("uploads") {
                let result = state.list_multipart_uploads(&ctx.region, &bucket).await?;
                return Ok(xml_response(&result));
            }
            list_objects(state, ctx, &bucket, &params).await
        }
        ("POST", Some(bucket), None) => {
            if params.contains_key("delete") {
                let req: DeleteRequest = quick_xml::de::from_reader(body.as_ref())
                    .map_err(|e| S3Error::MalformedXML(format!("Invalid delete XML: {e}")))?;
                let quiet = req.quiet.unwrap_or(false);
                let keys: Vec<String> = req.objects.into_iter().map(|o| o.key).collect();
                let result = state.delete_objects(&ctx.region, &bucket, keys, quiet).await?;
                return Ok(xml_response(&result));
            }
            Err(S3Error::InvalidRequest("Unknown POST operation".into()))
        }
        ("PUT", Some(bucket), Some(key)) => {
            put_object(state, ctx, &bucket, key, &parts.headers, &params, body).await
        }
        ("GET", Some(bucket), Some(key)) => {
            if let Some(upload_id) = params.get("uploadId") {
                let result = state.list_parts(&ctx.region, &bucket, &key, upload_id).await?;
                return Ok(xml_response(&result));
            }
            get_object(state, ctx, &bucket, &key, &parts.headers).await
        }
        ("HEAD", Some(bucket), Some(key)) => {
            let conditionals = parse_conditionals(&parts.headers);
            let obj = state
                .head_object(&ctx.region, &bucket, &key, &conditionals)
                .await?;
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header("content-type", &obj.content_type)
                .header("content-length", obj.size().to_string())
                .header("etag", &obj.etag)
                .header("accept-ranges", "bytes")
                .header("last-modified", format_http_date(&obj.last_modified));
            for (k, v) in &obj.metadata {
                builder = builder.header(format!("x-amz-meta-{}", k.to_lowercase()), v);
            }
            Ok(builder.body(axum::body::Body::empty()).unwrap())
        }
        ("DELETE", Some(bucket), Some(key)) => {
            if let Some(upload_id) = params.get("uploadId") {
                state
                    .abort_multipart_upload(&ctx.region, &bucket, upload_id)
                    .await?;
                return Ok(StatusCode::NO_CONTENT.into_response());
            }
            state.delete_object(&ctx.region, &bucket, &key).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        ("POST", Some(bucket), Some(key)) => {
            if params.contains_key("uploads") {
                let content_type = header(&parts.headers, "content-type");
                let metadata = extract_metadata(&parts.headers);
                let result = state
                    .create_multipart_upload(&ctx.region, &bucket, key, content_type, metadata)
                    .await?;
                return Ok(xml_response(&result));
            }
            if let Some(upload_id) = params.get("uploadId") {
                let req: CompleteMultipartUploadRequest = quick_xml::de::from_reader(body.as_ref())
                    .map_err(|e| {
                        S3Error::MalformedXML(format!("Invalid complete upload XML: {e}"))
                    })?;
                let result = state
                    .complete_multipart_upload(&ctx.region, &bucket, &key, upload_id, req.parts)
                    .await?;
                return Ok(xml_response(&result));
            }
            Err(S3Error::InvalidRequest("Unknown POST operation".into()))
        }
        _ => Err(S3Error::InvalidRequest("Unsupported request".into())),
    }
}

async fn list_objects(
    state: &S3State,
    ctx: &RequestContext,
    bucket: &str,
    params: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let v2 = params.get("list-type").map(String::as_str) == Some("2");
    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let delimiter = params.get("delimiter").filter(|d| !d.is_empty()).cloned();
    let max_keys: usize = params
        .get("max-keys")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000)
        .min(1000);

    let (marker, start_after) = if v2 {
        let marker = params
            .get("continuation-token")
            .and_then(|t| continuation_token_decode(t));
        (marker, params.get("start-after").cloned())
    } else {
        (params.get("marker").cloned(), None)
    };

    let list = ListParams {
        prefix: prefix.clone(),
        delimiter: delimiter.clone(),
        max_keys,
        marker,
        start_after: start_after.clone(),
    };
    let outcome = state.list_objects(&ctx.region, bucket, &list).await?;

    if v2 {
        let key_count = (outcome.entries.len() + outcome.common_prefixes.len()) as i32;
        let result = ListBucketResultV2 {
            name: bucket.into(),
            prefix,
            key_count,
            max_keys: max_keys as i32,
            delimiter,
            is_truncated: outcome.is_truncated,
            contents: outcome.entries,
            common_prefixes: outcome.common_prefixes,
            continuation_token: params.get("continuation-token").cloned(),
            next_continuation_token: outcome
                .next_entry
                .as_deref()
                .map(continuation_token_encode),
            start_after,
        };
        Ok(xml_response(&result))
    } else {
        let result = ListBucketResultV1 {
            name: bucket.into(),
            prefix,
            marker: params.get("marker").cloned().unwrap_or_default(),
            next_marker: outcome.next_entry,
            max_keys: max_keys as i32,
            delimiter,
            is_truncated: outcome.is_truncated,
            contents: outcome.entries,
            common_prefixes: outcome.common_prefixes,
        };
        Ok(xml_response(&result))
    }
}

async fn put_object(
    state: &S3State,
    ctx: &RequestContext,
    bucket: &str,
    key: String,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response, S3Error> {
    if let Some(part_str) = params.get("partNumber") {
        let upload_id = params
            .get("uploadId")
            .ok_or_else(|| S3Error::InvalidArgument("Missing uploadId".into()))?;
        let part_number: i32 = part_str
            .parse()
            .map_err(|_| S3Error::InvalidArgument("Invalid partNumber".into()))?;
        let etag = state
            .upload_part(&ctx.region, bucket, &key, upload_id, part_number, body.to_vec())
            .await?;
        return Ok((StatusCode::OK, [("etag", etag.as_str())], "").into_response());
    }

    if let Some(copy_source) = header(headers, "x-amz-copy-source") {
        let (src_bucket, src_key) = parse_copy_source(&copy_source)?;
        let replace = header(headers, "x-amz-metadata-directive").as_deref() == Some("REPLACE");
        let content_type = header(headers, "content-type");
        let metadata = extract_metadata(headers);
        let result = state
            .copy_object(
                &ctx.region,
                bucket,
                key,
                &src_bucket,
                &src_key,
                replace,
                content_type,
                metadata,
            )
            .await?;
        return Ok(xml_response(&result));
    }

    let content_type = header(headers, "content-type");
    let metadata = extract_metadata(headers);
    let etag = state
        .put_object(&ctx.region, bucket, key, body.to_vec(), content_type, metadata)
        .await?;
    Ok((StatusCode::OK, [("etag", etag.as_str())], "").into_response())
}

async fn get_object(
    state: &S3State,
    ctx: &RequestContext,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, S3Error> {
    let conditionals = parse_conditionals(headers);
    let range = header(headers, "range").as_deref().and_then(parse_range);
    let (obj, resolved) = state
        .get_object(&ctx.region, bucket, key, range, &conditionals)
        .await?;

    let mut builder = Response::builder()
        .header("content-type", &obj.content_type)
        .header("etag", &obj.etag)
        .header("accept-ranges", "bytes")
        .header("last-modified", format_http_date(&obj.last_modified));
    for (k, v) in &obj.metadata {
        builder = builder.header(format!("x-amz-meta-{}", k.to_lowercase()), v);
    }

    if let Some((start, end, total)) = resolved {
        let slice = obj.data[start as usize..=end as usize].to_vec();
        builder = builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header("content-range", format!("bytes {start}-{end}/{total}"))
            .header("content-length", slice.len().to_string());
        Ok(builder.body(axum::body::Body::from(slice)).unwrap())
    } else {
        builder = builder
            .status(StatusCode::OK)
            .header("content-length", obj.data.len().to_string());
        Ok(builder.body(axum::body::Body::from(obj.data)).unwrap())
    }
}
