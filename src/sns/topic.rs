use std::collections::HashMap;
use std::time::Instant;

use uuid::Uuid;

use super::error::SnsError;
use super::filter::FilterPolicy;
use crate::sqs::queue::DEDUP_WINDOW;

/// Protocols Subscribe accepts. Only `sqs` gets real delivery; the rest are
/// recorded through the spy.
pub const PROTOCOLS: &[&str] = &[
    "http",
    "https",
    "email",
    "email-json",
    "sms",
    "sqs",
    "application",
    "lambda",
    "firehose",
];

#[derive(Debug, Clone)]
pub struct TopicAttributes {
    pub display_name: String,
    pub policy: String,
    pub delivery_policy: String,
    pub kms_master_key_id: Option<String>,
    pub tracing_config: String,
    pub signature_version: String,
    pub fifo_topic: bool,
    pub content_based_deduplication: bool,
}

impl Default for TopicAttributes {
    fn default() -> Self {
        TopicAttributes {
            display_name: String::new(),
            policy: String::new(),
            delivery_policy: String::new(),
            kms_master_key_id: None,
            tracing_config: "PassThrough".into(),
            signature_version: "1".into(),
            fifo_topic: false,
            content_based_deduplication: false,
        }
    }
}

impl TopicAttributes {
    pub fn set(&mut self, name: &str, value: String) -> Result<(), SnsError> {
        match name {
            "DisplayName" => self.display_name = value,
            "Policy" => self.policy = value,
            "DeliveryPolicy" => self.delivery_policy = value,
            "TracingConfig" => self.tracing_config = value,
            "SignatureVersion" => self.signature_version = value,
            "KmsMasterKeyId" => {
                self.kms_master_key_id = (!value.is_empty()).then_some(value);
            }
            "FifoTopic" => {}
            "ContentBasedDeduplication" => {
                self.content_based_deduplication = value == "true";
            }
            _ => {
                return Err(SnsError::InvalidParameter(format!(
                    "Invalid attribute name: {name}"
                )));
            }
        }
        Ok(())
    }

    pub fn to_map(&self, topic: &Topic) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("TopicArn".into(), topic.arn.clone());
        m.insert("DisplayName".into(), self.display_name.clone());
        m.insert("Owner".into(), topic.owner.clone());
        m.insert(
            "SubscriptionsConfirmed".into(),
            topic.subscriptions.len().to_string(),
        );
        m.insert("SubscriptionsPending".into(), "0".into());
        m.insert("SubscriptionsDeleted".into(), "0".into());
        if !self.policy.is_empty() {
            m.insert("Policy".into(), self.policy.clone());
        }
        if !self.delivery_policy.is_empty() {
            m.insert("DeliveryPolicy".into(), self.delivery_policy.clone());
            m.insert("EffectiveDeliveryPolicy".into(), self.delivery_policy.clone());
        }
        if let Some(ref key) = self.kms_master_key_id {
            m.insert("KmsMasterKeyId".into(), key.clone());
        }
        m.insert("TracingConfig".into(), self.tracing_config.clone());
        m.insert("SignatureVersion".into(), self.signature_version.clone());
        m.insert("FifoTopic".into(), self.fifo_topic.to_string());
        if self.fifo_topic {
            m.insert(
                "ContentBasedDeduplication".into(),
                self.content_based_deduplication.to_string(),
            );
        }
        m
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPolicyScope {
    MessageAttributes,
    MessageBody,
}

impl FilterPolicyScope {
    pub fn parse(s: &str) -> Result<Self, SnsError> {
        match s {
            "MessageAttributes" => Ok(FilterPolicyScope::MessageAttributes),
            "MessageBody" => Ok(FilterPolicyScope::MessageBody),
            _ => Err(SnsError::InvalidParameter(format!(
                "Invalid FilterPolicyScope: {s}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterPolicyScope::MessageAttributes => "MessageAttributes",
            FilterPolicyScope::MessageBody => "MessageBody",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionAttributes {
    pub raw_message_delivery: bool,
    pub filter_policy: Option<String>,
    pub filter_policy_scope: Option<FilterPolicyScope>,
    pub redrive_policy: Option<String>,
    pub delivery_policy: Option<String>,
    pub subscription_role_arn: Option<String>,
}

impl SubscriptionAttributes {
    pub fn to_map(&self, sub: &Subscription) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("SubscriptionArn".into(), sub.arn.clone());
        m.insert("TopicArn".into(), sub.topic_arn.clone());
        m.insert("Protocol".into(), sub.protocol.clone());
        m.insert("Endpoint".into(), sub.endpoint.clone());
        m.insert("Owner".into(), sub.owner.clone());
        m.insert("ConfirmationWasAuthenticated".into(), "true".into());
        m.insert("PendingConfirmation".into(), "false".into());
        m.insert(
            "RawMessageDelivery".into(),
            self.raw_message_delivery.to_string(),
        );
        if let Some(ref fp) = self.filter_policy {
            m.insert("FilterPolicy".into(), fp.clone());
            m.insert(
                "FilterPolicyScope".into(),
                self.filter_policy_scope
                    .unwrap_or(FilterPolicyScope::MessageAttributes)
                    .as_str()
                    .into(),
            );
        }
        if let Some(ref rp) = self.redrive_policy {
            m.insert("RedrivePolicy".into(), rp.clone());
        }
        if let Some(ref dp) = self.delivery_policy {
            m.insert("DeliveryPolicy".into(), dp.clone());
        }
        if let Some(ref role) = self.subscription_role_arn {
            m.insert("SubscriptionRoleArn".into(), role.clone());
        }
        m
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub arn: String,
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
    pub owner: String,
    pub attributes: SubscriptionAttributes,
    /// Parsed form of `attributes.filter_policy`, refreshed whenever the
    /// policy is set, so publishes never re-parse JSON.
    pub compiled_filter: Option<FilterPolicy>,
}

impl Subscription {
    pub fn new(topic_arn: String, protocol: String, endpoint: String, owner: String) -> Self {
        let arn = format!("{topic_arn}:{}", Uuid::new_v4());
        Subscription {
            arn,
            topic_arn,
            protocol,
            endpoint,
            owner,
            attributes: SubscriptionAttributes::default(),
            compiled_filter: None,
        }
    }

    pub fn set_attribute(&mut self, name: &str, value: String) -> Result<(), SnsError> {
        match name {
            "RawMessageDelivery" => {
                self.attributes.raw_message_delivery = value == "true";
            }
            "FilterPolicy" => {
                if value.is_empty() {
                    self.attributes.filter_policy = None;
                    self.compiled_filter = None;
                } else {
                    let compiled = FilterPolicy::parse(&value)
                        .map_err(|e| SnsError::InvalidParameter(e.to_string()))?;
                    self.attributes.filter_policy = Some(value);
                    self.compiled_filter = Some(compiled);
                }
            }
            "FilterPolicyScope" => {
                self.attributes.filter_policy_scope = Some(FilterPolicyScope::parse(&value)?);
            }
            "RedrivePolicy" => {
                self.attributes.redrive_policy = (!value.is_empty()).then_some(value);
            }
            "DeliveryPolicy" => {
                self.attributes.delivery_policy = (!value.is_empty()).then_some(value);
            }
            "SubscriptionRoleArn" => {
                self.attributes.subscription_role_arn = (!value.is_empty()).then_some(value);
            }
            _ => {
                return Err(SnsError::InvalidParameter(format!(
                    "Invalid attribute name: {name}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct TopicDedupEntry {
    message_id: String,
    sequence_number: Option<String>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct Topic {
    pub name: String,
    pub arn: String,
    pub owner: String,
    pub attributes: TopicAttributes,
    pub subscriptions: Vec<Subscription>,
    pub tags: HashMap<String, String>,
    dedup: HashMap<String, TopicDedupEntry>,
    sequence: u64,
}

impl Topic {
    pub fn new(name: String, arn: String, owner: String, is_fifo: bool) -> Self {
        Topic {
            name,
            arn,
            owner,
            attributes: TopicAttributes {
                fifo_topic: is_fifo,
                ..TopicAttributes::default()
            },
            subscriptions: Vec::new(),
            tags: HashMap::new(),
            dedup: HashMap::new(),
            sequence: 0,
        }
    }

    pub fn next_sequence(&mut self) -> String {
        self.sequence += 1;
        format!("{:020}", self.sequence)
    }

    /// Topic-level FIFO dedup, same window as queues: a repeat within five
    /// minutes returns the original identifiers and publishes nothing.
    pub fn dedup_lookup(&mut self, key: &str, now: Instant) -> Option<(String, Option<String>)> {
        self.dedup.retain(|_, e| e.expires_at > now);
        self.dedup
            .get(key)
            .map(|e| (e.message_id.clone(), e.sequence_number.clone()))
    }

    pub fn dedup_insert(
        &mut self,
        key: String,
        message_id: String,
        sequence_number: Option<String>,
        now: Instant,
    ) {
        self.dedup.insert(
            key,
            TopicDedupEntry {
                message_id,
                sequence_number,
                expires_at: now + DEDUP_WINDOW,
            },
        );
    }
}
