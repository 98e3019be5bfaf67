use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum SnsError {
    NotFound(String),
    InvalidParameter(String),
    InvalidAction(String),
    InternalError(String),
}

/// Wire form of a query-protocol failure, serialized with quick-xml like the
/// S3 response bodies.
#[derive(Serialize)]
#[serde(rename = "ErrorResponse")]
struct ErrorResponse<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Error")]
    error: ErrorDetail<'a>,
    #[serde(rename = "RequestId")]
    request_id: String,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    #[serde(rename = "Type")]
    fault: &'static str,
    #[serde(rename = "Code")]
    code: &'static str,
    #[serde(rename = "Message")]
    message: &'a str,
}

impl SnsError {
    pub fn code(&self) -> &'static str {
        match self {
            SnsError::NotFound(_) => "NotFound",
            SnsError::InvalidParameter(_) => "InvalidParameter",
            SnsError::InvalidAction(_) => "InvalidAction",
            SnsError::InternalError(_) => "InternalError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SnsError::NotFound(m)
            | SnsError::InvalidParameter(m)
            | SnsError::InvalidAction(m)
            | SnsError::InternalError(m) => m,
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            SnsError::NotFound(_) => StatusCode::NOT_FOUND,
            SnsError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for SnsError {
    fn into_response(self) -> Response {
        let document = ErrorResponse {
            xmlns: "http://sns.amazonaws.com/doc/2010-03-31/",
            error: ErrorDetail {
                fault: match self {
                    SnsError::InternalError(_) => "Receiver",
                    _ => "Sender",
                },
                code: self.code(),
                message: self.message(),
            },
            request_id: Uuid::new_v4().to_string(),
        };

        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        match quick_xml::se::to_string(&document) {
            Ok(rendered) => xml.push_str(&rendered),
            Err(_) => xml.push_str("<ErrorResponse/>"),
        }
        (self.http_status(), [("content-type", "text/xml")], xml).into_response()
    }
}
