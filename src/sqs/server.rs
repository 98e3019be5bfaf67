use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::auth::RequestContext;

use super::error::SqsError;
use super::state::SqsState;
use super::types::*;

macro_rules! dispatch {
    ($state:expr, $ctx:expr, $body:expr, $req_type:ty, $method:ident) => {{
        let req: $req_type = serde_json::from_slice($body)
            .map_err(|e| SqsError::InvalidParameterValue(e.to_string()))?;
        let resp = $state.$method($ctx, req).await?;
        Ok(Json(serde_json::to_value(resp).unwrap()).into_response())
    }};
}

macro_rules! dispatch_empty {
    ($state:expr, $ctx:expr, $body:expr, $req_type:ty, $method:ident) => {{
        let req: $req_type = serde_json::from_slice($body)
            .map_err(|e| SqsError::InvalidParameterValue(e.to_string()))?;
        $state.$method($ctx, req).await?;
        Ok(Json(serde_json::json!({})).into_response())
    }};
}

/// Handles one SQS JSON-protocol request; `action` is the part of
/// `X-Amz-Target` after `AmazonSQS.`.
pub async fn handle(
    state: &SqsState,
    ctx: &RequestContext,
    action: &str,
    body: &[u8],
) -> Result<Response, SqsError> {
    match action {
        "CreateQueue" => dispatch!(state, ctx, body, CreateQueueRequest, create_queue),
        "DeleteQueue" => dispatch_empty!(state, ctx, body, DeleteQueueRequest, delete_queue),
        "GetQueueUrl" => dispatch!(state, ctx, body, GetQueueUrlRequest, get_queue_url),
        "ListQueues" => dispatch!(state, ctx, body, ListQueuesRequest, list_queues),
        "GetQueueAttributes" => {
            dispatch!(state, ctx, body, GetQueueAttributesRequest, get_queue_attributes)
        }
        "SetQueueAttributes" => {
            dispatch_empty!(state, ctx, body, SetQueueAttributesRequest, set_queue_attributes)
        }
        "PurgeQueue" => dispatch_empty!(state, ctx, body, PurgeQueueRequest, purge_queue),
        "SendMessage" => dispatch!(state, ctx, body, SendMessageRequest, send_message),
        "SendMessageBatch" => {
            dispatch!(state, ctx, body, SendMessageBatchRequest, send_message_batch)
        }
        "ReceiveMessage" => dispatch!(state, ctx, body, ReceiveMessageRequest, receive_message),
        "DeleteMessage" => dispatch_empty!(state, ctx, body, DeleteMessageRequest, delete_message),
        "DeleteMessageBatch" => {
            dispatch!(state, ctx, body, DeleteMessageBatchRequest, delete_message_batch)
        }
        "ChangeMessageVisibility" => dispatch_empty!(
            state,
            ctx,
            body,
            ChangeMessageVisibilityRequest,
            change_message_visibility
        ),
        "ChangeMessageVisibilityBatch" => dispatch!(
            state,
            ctx,
            body,
            ChangeMessageVisibilityBatchRequest,
            change_message_visibility_batch
        ),
        "TagQueue" => dispatch_empty!(state, ctx, body, TagQueueRequest, tag_queue),
        "UntagQueue" => dispatch_empty!(state, ctx, body, UntagQueueRequest, untag_queue),
        "ListQueueTags" => dispatch!(state, ctx, body, ListQueueTagsRequest, list_queue_tags),
        "ListDeadLetterSourceQueues" => dispatch!(
            state,
            ctx,
            body,
            ListDeadLetterSourceQueuesRequest,
            list_dead_letter_source_queues
        ),
        _ => Err(SqsError::InvalidAction(format!("Unknown action: {action}"))),
    }
}
