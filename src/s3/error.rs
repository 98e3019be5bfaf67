use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum S3Error {
    /// Payload is the resource path (`bucket` or `bucket/key` or upload id)
    /// reported in the error body.
    NoSuchBucket(String),
    NoSuchKey(String),
    BucketNotEmpty(String),
    InvalidBucketName(String),
    NoSuchUpload(String),
    InvalidPart(String),
    InvalidPartOrder(String),
    EntityTooSmall(String),
    InvalidArgument(String),
    InvalidRequest(String),
    MalformedXML(String),
    InternalError(String),
    /// Carries the object's total size for the `Content-Range: bytes */n`
    /// header a 416 must include.
    InvalidRange(u64),
    PreconditionFailed(String),
    NotModified,
}

impl S3Error {
    fn error_code(&self) -> &'static str {
        match self {
            S3Error::NoSuchBucket(_) => "NoSuchBucket",
            S3Error::NoSuchKey(_) => "NoSuchKey",
            S3Error::BucketNotEmpty(_) => "BucketNotEmpty",
            S3Error::InvalidBucketName(_) => "InvalidBucketName",
            S3Error::NoSuchUpload(_) => "NoSuchUpload",
            S3Error::InvalidPart(_) => "InvalidPart",
            S3Error::InvalidPartOrder(_) => "InvalidPartOrder",
            S3Error::EntityTooSmall(_) => "EntityTooSmall",
            S3Error::InvalidArgument(_) => "InvalidArgument",
            S3Error::InvalidRequest(_) => "InvalidRequest",
            S3Error::MalformedXML(_) => "MalformedXML",
            S3Error::InternalError(_) => "InternalError",
            S3Error::InvalidRange(_) => "InvalidRange",
            S3Error::PreconditionFailed(_) => "PreconditionFailed",
            S3Error::NotModified => "NotModified",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchBucket(_) | S3Error::NoSuchKey(_) | S3Error::NoSuchUpload(_) => {
                StatusCode::NOT_FOUND
            }
            S3Error::BucketNotEmpty(_) => StatusCode::CONFLICT,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            S3Error::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            S3Error::NotModified => StatusCode::NOT_MODIFIED,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn message(&self) -> String {
        match self {
            S3Error::NoSuchBucket(_) => "The specified bucket does not exist".into(),
            S3Error::NoSuchKey(_) => "The specified key does not exist.".into(),
            S3Error::NoSuchUpload(_) => {
                "The specified upload does not exist. The upload ID may be invalid, or the upload may have been aborted or completed.".into()
            }
            S3Error::BucketNotEmpty(m)
            | S3Error::InvalidBucketName(m)
            | S3Error::InvalidPart(m)
            | S3Error::InvalidPartOrder(m)
            | S3Error::EntityTooSmall(m)
            | S3Error::InvalidArgument(m)
            | S3Error::InvalidRequest(m)
            | S3Error::MalformedXML(m)
            | S3Error::InternalError(m)
            | S3Error::PreconditionFailed(m) => m.clone(),
            S3Error::InvalidRange(_) => "The requested range is not satisfiable".into(),
            S3Error::NotModified => "Not Modified".into(),
        }
    }

    /// The resource path reported in the error body, when one is known.
    fn resource(&self) -> &str {
        match self {
            S3Error::NoSuchBucket(m) | S3Error::NoSuchKey(m) | S3Error::NoSuchUpload(m) => m,
            _ => "",
        }
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        // 304 is body-less by definition.
        if matches!(self, S3Error::NotModified) {
            return StatusCode::NOT_MODIFIED.into_response();
        }

        let body = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>{}</Code>
  <Message>{}</Message>
  <Resource>{}</Resource>
  <RequestId>{}</RequestId>
</Error>"#,
            self.error_code(),
            xml_escape(&self.message()),
            xml_escape(self.resource()),
            Uuid::new_v4(),
        );

        let mut response = (
            self.status_code(),
            [("content-type", "application/xml")],
            body,
        )
            .into_response();
        if let S3Error::InvalidRange(total) = self {
            response.headers_mut().insert(
                "content-range",
                format!("bytes */{total}").parse().unwrap(),
            );
        }
        response
    }
}
