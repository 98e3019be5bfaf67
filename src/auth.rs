//! Region extraction from AWS request signatures.
//!
//! Signatures are never verified; the only thing the engine reads out of them
//! is the region segment of the credential scope, which decides which
//! per-region store a request is routed to.

use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::request::Parts;

/// Per-request routing context: the resolved region plus the authority the
/// client addressed, which is embedded into queue URLs when no host is
/// configured.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub region: String,
    pub authority: String,
}

impl RequestContext {
    pub fn from_parts(parts: &Parts, default_region: &str) -> Self {
        let authority = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_else(|| "localhost".into());

        let region = region_from_parts(parts).unwrap_or_else(|| default_region.to_string());

        RequestContext { region, authority }
    }
}

/// Pulls the region out of a SigV4 credential scope, either from the
/// `Authorization` header or from a presigned-style `X-Amz-Credential`
/// query parameter. Returns `None` when the request is unsigned or the
/// scope is malformed.
pub fn region_from_parts(parts: &Parts) -> Option<String> {
    if let Some(auth) = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(region) = credential_scope_region(auth) {
            return Some(region);
        }
    }

    let query = parts.uri.query()?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "X-Amz-Credential")
        .and_then(|(_, v)| scope_region(&v))
}

/// `AWS4-HMAC-SHA256 Credential=<key>/<date>/<region>/<service>/aws4_request, ...`
fn credential_scope_region(header: &str) -> Option<String> {
    let start = header.find("Credential=")? + "Credential=".len();
    let rest = &header[start..];
    let end = rest.find(',').unwrap_or(rest.len());
    scope_region(&rest[..end])
}

fn scope_region(credential: &str) -> Option<String> {
    let mut segments = credential.split('/');
    let _access_key = segments.next()?;
    let _date = segments.next()?;
    let region = segments.next()?;
    let service = segments.next()?;
    let terminator = segments.next()?;
    if region.is_empty() || service.is_empty() || terminator != "aws4_request" {
        return None;
    }
    Some(region.to_string())
}

/// Detects virtual-hosted-style S3 requests (`<bucket>.s3.<host>`) and
/// returns the bucket name baked into the authority.
pub fn virtual_hosted_bucket(authority: &str) -> Option<String> {
    let host = authority.split(':').next().unwrap_or(authority);
    let (bucket, rest) = host.split_once(".s3.").or_else(|| {
        host.strip_suffix(".s3").map(|b| (b, ""))
    })?;
    if bucket.is_empty() || rest.contains(".s3.") {
        return None;
    }
    Some(bucket.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(auth: Option<&str>, uri: &str) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(a) = auth {
            builder = builder.header(AUTHORIZATION, a);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn region_from_authorization_header() {
        let parts = parts_with(
            Some(
                "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260107/eu-west-1/sqs/aws4_request, \
                 SignedHeaders=host;x-amz-date, Signature=deadbeef",
            ),
            "/",
        );
        assert_eq!(region_from_parts(&parts).as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn region_from_presigned_query() {
        let parts = parts_with(
            None,
            "/bucket/key?X-Amz-Credential=AKIDEXAMPLE%2F20260107%2Fap-southeast-2%2Fs3%2Faws4_request",
        );
        assert_eq!(region_from_parts(&parts).as_deref(), Some("ap-southeast-2"));
    }

    #[test]
    fn malformed_scope_is_ignored() {
        let parts = parts_with(Some("AWS4-HMAC-SHA256 Credential=AKID/20260107"), "/");
        assert_eq!(region_from_parts(&parts), None);
        let parts = parts_with(
            Some("AWS4-HMAC-SHA256 Credential=AKID/20260107/us-east-1/sqs/not_a_request"),
            "/",
        );
        assert_eq!(region_from_parts(&parts), None);
    }

    #[test]
    fn virtual_hosted_host_parsing() {
        assert_eq!(
            virtual_hosted_bucket("my-bucket.s3.localhost:4566").as_deref(),
            Some("my-bucket")
        );
        assert_eq!(
            virtual_hosted_bucket("my.dotted.bucket.s3.example.com").as_deref(),
            Some("my.dotted.bucket")
        );
        assert_eq!(virtual_hosted_bucket("localhost:4566"), None);
        assert_eq!(virtual_hosted_bucket("s3.localhost"), None);
    }
}
