use std::collections::HashMap;

/// Message attribute as it arrives on the query protocol
/// (`MessageAttributes.entry.N.Name` / `.Value.DataType` / `.Value.*Value`).
#[derive(Debug, Clone, PartialEq)]
pub struct SnsMessageAttribute {
    pub data_type: String,
    pub string_value: Option<String>,
    pub binary_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateTopicRequest {
    pub name: String,
    pub attributes: Option<HashMap<String, String>>,
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct CreateTopicResponse {
    pub topic_arn: String,
}

#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: Option<String>,
    pub attributes: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct SubscribeResponse {
    pub subscription_arn: String,
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub topic_arn: Option<String>,
    pub target_arn: Option<String>,
    pub message: String,
    pub subject: Option<String>,
    pub message_attributes: HashMap<String, SnsMessageAttribute>,
    pub message_deduplication_id: Option<String>,
    pub message_group_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublishResponse {
    pub message_id: String,
    pub sequence_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublishBatchEntry {
    pub id: String,
    pub message: String,
    pub subject: Option<String>,
    pub message_attributes: HashMap<String, SnsMessageAttribute>,
    pub message_deduplication_id: Option<String>,
    pub message_group_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PublishBatchResultEntry {
    pub id: String,
    pub message_id: String,
    pub sequence_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchResultErrorEntry {
    pub id: String,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

#[derive(Debug, Clone)]
pub struct PublishBatchResponse {
    pub successful: Vec<PublishBatchResultEntry>,
    pub failed: Vec<BatchResultErrorEntry>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    pub subscription_arn: String,
    pub owner: String,
    pub protocol: String,
    pub endpoint: String,
    pub topic_arn: String,
}

#[derive(Debug, Clone)]
pub struct TopicArnEntry {
    pub topic_arn: String,
}

#[derive(Debug, Clone)]
pub struct ListTopicsResponse {
    pub topics: Vec<TopicArnEntry>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListSubscriptionsResponse {
    pub subscriptions: Vec<SubscriptionEntry>,
    pub next_token: Option<String>,
}
