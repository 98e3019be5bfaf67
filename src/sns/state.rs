use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::auth::RequestContext;
use crate::spy::{MessageSpy, SpyEvent};
use crate::sqs::state::{InternalDelivery, SqsState};
use crate::sqs::types::MessageAttributeValue;

use super::error::SnsError;
use super::filter::AttributeSource;
use super::topic::{FilterPolicyScope, Subscription, Topic, PROTOCOLS};
use super::types::*;

struct SnsInner {
    /// region -> topic name -> topic
    regions: HashMap<String, HashMap<String, Topic>>,
}

pub struct SnsState {
    inner: Mutex<SnsInner>,
    account_id: String,
    sqs: Arc<SqsState>,
    spy: Option<Arc<MessageSpy>>,
}

/// One subscription's share of a publish, computed under the topic lock and
/// delivered after it is released.
struct PlannedDelivery {
    protocol: String,
    endpoint: String,
    body: String,
    attributes: HashMap<String, MessageAttributeValue>,
    group_id: Option<String>,
    deduplication_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSummary {
    pub name: String,
    pub region: String,
    pub arn: String,
    pub subscription_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSnapshot {
    pub arn: String,
    pub protocol: String,
    pub endpoint: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSnapshot {
    pub name: String,
    pub region: String,
    pub arn: String,
    pub attributes: HashMap<String, String>,
    pub tags: HashMap<String, String>,
    pub subscriptions: Vec<SubscriptionSnapshot>,
}

/// `arn:aws:sns:<region>:<account>:<name>` -> (region, name)
fn parse_topic_arn(arn: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() != 6 || parts[0] != "arn" || parts[2] != "sns" {
        return None;
    }
    Some((parts[3].to_string(), parts[5].to_string()))
}

/// `arn:aws:sqs:<region>:<account>:<name>` -> (region, name)
fn parse_sqs_arn(arn: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() != 6 || parts[0] != "arn" || parts[2] != "sqs" {
        return None;
    }
    Some((parts[3].to_string(), parts[5].to_string()))
}

fn validate_topic_name(name: &str, is_fifo: bool) -> Result<(), SnsError> {
    let base = name.strip_suffix(".fifo").unwrap_or(name);
    if name.is_empty() || name.len() > 256 {
        return Err(SnsError::InvalidParameter(
            "Topic name must be between 1 and 256 characters".into(),
        ));
    }
    if !base
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SnsError::InvalidParameter(
            "Topic name can only contain alphanumeric characters, hyphens, and underscores".into(),
        ));
    }
    if is_fifo && !name.ends_with(".fifo") {
        return Err(SnsError::InvalidParameter(
            "FIFO topic name must end with .fifo".into(),
        ));
    }
    Ok(())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

impl SnsState {
    pub fn new(account_id: String, sqs: Arc<SqsState>, spy: Option<Arc<MessageSpy>>) -> Self {
        SnsState {
            inner: Mutex::new(SnsInner {
                regions: HashMap::new(),
            }),
            account_id,
            sqs,
            spy,
        }
    }

    fn record(&self, event: SpyEvent) {
        if let Some(spy) = &self.spy {
            spy.record(event);
        }
    }

    fn topic_arn(&self, region: &str, name: &str) -> String {
        format!("arn:aws:sns:{region}:{}:{name}", self.account_id)
    }

    // --- topics ---

    pub async fn create_topic(
        &self,
        ctx: &RequestContext,
        req: CreateTopicRequest,
    ) -> Result<CreateTopicResponse, SnsError> {
        let is_fifo = req
            .attributes
            .as_ref()
            .and_then(|a| a.get("FifoTopic"))
            .map(|v| v == "true")
            .unwrap_or_else(|| req.name.ends_with(".fifo"));
        validate_topic_name(&req.name, is_fifo)?;

        let mut inner = self.inner.lock().await;
        let topics = inner.regions.entry(ctx.region.clone()).or_default();

        if let Some(existing) = topics.get(&req.name) {
            let current = existing.attributes.to_map(existing);
            if let Some(ref attrs) = req.attributes {
                for (key, value) in attrs {
                    if key == "FifoTopic" {
                        continue;
                    }
                    if current.get(key.as_str()).map(String::as_str) != Some(value.as_str()) {
                        return Err(SnsError::InvalidParameter(
                            "Topic already exists with different attributes".into(),
                        ));
                    }
                }
            }
            return Ok(CreateTopicResponse {
                topic_arn: existing.arn.clone(),
            });
        }

        let arn = self.topic_arn(&ctx.region, &req.name);
        let mut topic = Topic::new(req.name.clone(), arn.clone(), self.account_id.clone(), is_fifo);
        if let Some(attrs) = req.attributes {
            for (key, value) in attrs {
                topic.attributes.set(&key, value)?;
            }
        }
        for (key, value) in req.tags {
            topic.tags.insert(key, value);
        }
        topics.insert(req.name, topic);
        Ok(CreateTopicResponse { topic_arn: arn })
    }

    pub async fn delete_topic(&self, ctx: &RequestContext, arn: &str) -> Result<(), SnsError> {
        let (region, name) =
            parse_topic_arn(arn).unwrap_or_else(|| (ctx.region.clone(), arn.to_string()));
        let mut inner = self.inner.lock().await;
        inner.regions.get_mut(&region).and_then(|t| t.remove(&name));
        Ok(())
    }

    pub async fn list_topics(
        &self,
        ctx: &RequestContext,
        next_token: Option<String>,
    ) -> Result<ListTopicsResponse, SnsError> {
        let inner = self.inner.lock().await;
        let mut arns: Vec<String> = inner
            .regions
            .get(&ctx.region)
            .map(|topics| topics.values().map(|t| t.arn.clone()).collect())
            .unwrap_or_default();
        arns.sort();

        let start = next_token
            .map(|token| {
                arns.iter()
                    .position(|a| a.as_str() > token.as_str())
                    .unwrap_or(arns.len())
            })
            .unwrap_or(0);
        let max = 100;
        let page: Vec<TopicArnEntry> = arns[start..]
            .iter()
            .take(max)
            .map(|a| TopicArnEntry { topic_arn: a.clone() })
            .collect();
        let next_token = (start + max < arns.len())
            .then(|| page.last().map(|e| e.topic_arn.clone()))
            .flatten();

        Ok(ListTopicsResponse {
            topics: page,
            next_token,
        })
    }

    pub async fn get_topic_attributes(
        &self,
        ctx: &RequestContext,
        arn: &str,
    ) -> Result<HashMap<String, String>, SnsError> {
        let inner = self.inner.lock().await;
        let topic = resolve_topic(&inner, ctx, arn)?;
        Ok(topic.attributes.to_map(topic))
    }

    pub async fn set_topic_attributes(
        &self,
        ctx: &RequestContext,
        arn: &str,
        name: &str,
        value: Option<String>,
    ) -> Result<(), SnsError> {
        let mut inner = self.inner.lock().await;
        let topic = resolve_topic_mut(&mut inner, ctx, arn)?;
        topic.attributes.set(name, value.unwrap_or_default())
    }

    // --- subscriptions ---

    pub async fn subscribe(
        &self,
        ctx: &RequestContext,
        req: SubscribeRequest,
    ) -> Result<SubscribeResponse, SnsError> {
        if !PROTOCOLS.contains(&req.protocol.as_str()) {
            return Err(SnsError::InvalidParameter(format!(
                "Invalid parameter: Protocol {}",
                req.protocol
            )));
        }
        let endpoint = req
            .endpoint
            .filter(|e| !e.is_empty())
            .ok_or_else(|| SnsError::InvalidParameter("Endpoint is required".into()))?;

        let mut inner = self.inner.lock().await;
        let account_id = self.account_id.clone();
        let topic = resolve_topic_mut(&mut inner, ctx, &req.topic_arn)?;

        if let Some(existing) = topic
            .subscriptions
            .iter()
            .find(|s| s.protocol == req.protocol && s.endpoint == endpoint)
        {
            let current = existing.attributes.to_map(existing);
            if let Some(ref attrs) = req.attributes {
                for (key, value) in attrs {
                    if current.get(key.as_str()).map(String::as_str) != Some(value.as_str()) {
                        return Err(SnsError::InvalidParameter(
                            "Subscription already exists with different attributes".into(),
                        ));
                    }
                }
            }
            return Ok(SubscribeResponse {
                subscription_arn: existing.arn.clone(),
            });
        }

        let mut sub = Subscription::new(
            topic.arn.clone(),
            req.protocol,
            endpoint,
            account_id,
        );
        if let Some(attrs) = req.attributes {
            for (key, value) in attrs {
                sub.set_attribute(&key, value)?;
            }
        }
        let arn = sub.arn.clone();
        topic.subscriptions.push(sub);
        Ok(SubscribeResponse {
            subscription_arn: arn,
        })
    }

    pub async fn unsubscribe(&self, arn: &str) -> Result<(), SnsError> {
        let mut inner = self.inner.lock().await;
        for topics in inner.regions.values_mut() {
            for topic in topics.values_mut() {
                if let Some(pos) = topic.subscriptions.iter().position(|s| s.arn == arn) {
                    topic.subscriptions.remove(pos);
                    return Ok(());
                }
            }
        }
        Err(SnsError::NotFound("Subscription does not exist".into()))
    }

    /// Local engine: subscriptions are auto-confirmed, so the token is
    /// ignored. A topic with subscriptions answers with the first one; an
    /// empty topic reports the pending sentinel.
    pub async fn confirm_subscription(
        &self,
        ctx: &RequestContext,
        arn: &str,
    ) -> Result<String, SnsError> {
        let inner = self.inner.lock().await;
        let topic = resolve_topic(&inner, ctx, arn)?;
        Ok(topic
            .subscriptions
            .first()
            .map(|s| s.arn.clone())
            .unwrap_or_else(|| "PendingConfirmation".into()))
    }

    pub async fn list_subscriptions(
        &self,
        ctx: &RequestContext,
    ) -> Result<ListSubscriptionsResponse, SnsError> {
        let inner = self.inner.lock().await;
        let mut entries = Vec::new();
        if let Some(topics) = inner.regions.get(&ctx.region) {
            for topic in topics.values() {
                entries.extend(topic.subscriptions.iter().map(subscription_entry));
            }
        }
        entries.sort_by(|a: &SubscriptionEntry, b| a.subscription_arn.cmp(&b.subscription_arn));
        Ok(ListSubscriptionsResponse {
            subscriptions: entries,
            next_token: None,
        })
    }

    pub async fn list_subscriptions_by_topic(
        &self,
        ctx: &RequestContext,
        topic_arn: &str,
    ) -> Result<ListSubscriptionsResponse, SnsError> {
        let inner = self.inner.lock().await;
        let topic = resolve_topic(&inner, ctx, topic_arn)?;
        let mut entries: Vec<SubscriptionEntry> =
            topic.subscriptions.iter().map(subscription_entry).collect();
        entries.sort_by(|a, b| a.subscription_arn.cmp(&b.subscription_arn));
        Ok(ListSubscriptionsResponse {
            subscriptions: entries,
            next_token: None,
        })
    }

    pub async fn get_subscription_attributes(
        &self,
        arn: &str,
    ) -> Result<HashMap<String, String>, SnsError> {
        let inner = self.inner.lock().await;
        for topics in inner.regions.values() {
            for topic in topics.values() {
                if let Some(sub) = topic.subscriptions.iter().find(|s| s.arn == arn) {
                    return Ok(sub.attributes.to_map(sub));
                }
            }
        }
        Err(SnsError::NotFound("Subscription does not exist".into()))
    }

    pub async fn set_subscription_attributes(
        &self,
        arn: &str,
        name: &str,
        value: Option<String>,
    ) -> Result<(), SnsError> {
        let mut inner = self.inner.lock().await;
        for topics in inner.regions.values_mut() {
            for topic in topics.values_mut() {
                if let Some(sub) = topic.subscriptions.iter_mut().find(|s| s.arn == arn) {
                    return sub.set_attribute(name, value.unwrap_or_default());
                }
            }
        }
        Err(SnsError::NotFound("Subscription does not exist".into()))
    }

    // --- publish ---

    pub async fn publish(
        &self,
        ctx: &RequestContext,
        req: PublishRequest,
    ) -> Result<PublishResponse, SnsError> {
        let arn = req
            .topic_arn
            .clone()
            .or(req.target_arn.clone())
            .ok_or_else(|| SnsError::InvalidParameter("TopicArn is required".into()))?;

        let (response, region, topic_name, plans) = {
            let mut inner = self.inner.lock().await;
            let (region, name) =
                parse_topic_arn(&arn).unwrap_or_else(|| (ctx.region.clone(), arn.clone()));
            let topic = inner
                .regions
                .get_mut(&region)
                .and_then(|t| t.get_mut(&name))
                .ok_or_else(|| SnsError::NotFound("Topic does not exist".into()))?;
            let (response, plans) = plan_publish(topic, &req)?;
            (response, region, name, plans)
        };

        if let Some(response_plans) = plans {
            self.record(SpyEvent::SnsPublished {
                region: region.clone(),
                topic: topic_name.clone(),
                message_id: response.message_id.clone(),
            });
            self.deliver_all(&region, &topic_name, &response.message_id, response_plans)
                .await;
        }
        Ok(response)
    }

    pub async fn publish_batch(
        &self,
        ctx: &RequestContext,
        topic_arn: &str,
        entries: Vec<PublishBatchEntry>,
    ) -> Result<PublishBatchResponse, SnsError> {
        if entries.is_empty() {
            return Err(SnsError::InvalidParameter(
                "The batch request must contain at least one entry".into(),
            ));
        }
        if entries.len() > 10 {
            return Err(SnsError::InvalidParameter(
                "The batch request contains more entries than permissible".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for e in &entries {
            if !seen.insert(&e.id) {
                return Err(SnsError::InvalidParameter(
                    "Two or more batch entries in the request have the same Id".into(),
                ));
            }
        }

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        for entry in entries {
            let req = PublishRequest {
                topic_arn: Some(topic_arn.to_string()),
                target_arn: None,
                message: entry.message,
                subject: entry.subject,
                message_attributes: entry.message_attributes,
                message_deduplication_id: entry.message_deduplication_id,
                message_group_id: entry.message_group_id,
            };
            match self.publish(ctx, req).await {
                Ok(resp) => successful.push(PublishBatchResultEntry {
                    id: entry.id,
                    message_id: resp.message_id,
                    sequence_number: resp.sequence_number,
                }),
                Err(SnsError::NotFound(m)) => return Err(SnsError::NotFound(m)),
                Err(err) => failed.push(BatchResultErrorEntry {
                    id: entry.id,
                    code: err.code().to_string(),
                    message: err.message().to_string(),
                    sender_fault: true,
                }),
            }
        }
        Ok(PublishBatchResponse { successful, failed })
    }

    async fn deliver_all(
        &self,
        region: &str,
        topic_name: &str,
        message_id: &str,
        plans: Vec<PlannedDelivery>,
    ) {
        for plan in plans {
            if plan.protocol == "sqs" {
                let Some((queue_region, queue_name)) = parse_sqs_arn(&plan.endpoint) else {
                    warn!(endpoint = %plan.endpoint, "subscription endpoint is not a queue ARN, dropping");
                    continue;
                };
                // A standard queue rejects dedup ids; the suffix tells the kinds apart.
                let deduplication_id = queue_name
                    .ends_with(".fifo")
                    .then_some(plan.deduplication_id)
                    .flatten();
                let delivery = InternalDelivery {
                    body: plan.body,
                    attributes: plan.attributes,
                    group_id: plan.group_id,
                    deduplication_id,
                };
                match self.sqs.deliver(&queue_region, &queue_name, delivery).await {
                    Ok(()) => self.record(SpyEvent::SnsDelivered {
                        region: region.to_string(),
                        topic: topic_name.to_string(),
                        protocol: plan.protocol,
                        endpoint: plan.endpoint,
                        message_id: message_id.to_string(),
                    }),
                    Err(err) => {
                        warn!(
                            queue = %queue_name,
                            error = %err.message(),
                            "fan-out delivery failed, dropping"
                        );
                    }
                }
            } else {
                // No transport for other protocols; the spy is the record.
                self.record(SpyEvent::SnsDelivered {
                    region: region.to_string(),
                    topic: topic_name.to_string(),
                    protocol: plan.protocol,
                    endpoint: plan.endpoint,
                    message_id: message_id.to_string(),
                });
            }
        }
    }

    // --- tagging ---

    pub async fn tag_resource(
        &self,
        ctx: &RequestContext,
        arn: &str,
        tags: Vec<(String, String)>,
    ) -> Result<(), SnsError> {
        let mut inner = self.inner.lock().await;
        let topic = resolve_topic_mut(&mut inner, ctx, arn)?;
        for (key, value) in tags {
            topic.tags.insert(key, value);
        }
        Ok(())
    }

    pub async fn untag_resource(
        &self,
        ctx: &RequestContext,
        arn: &str,
        tag_keys: Vec<String>,
    ) -> Result<(), SnsError> {
        let mut inner = self.inner.lock().await;
        let topic = resolve_topic_mut(&mut inner, ctx, arn)?;
        for key in &tag_keys {
            topic.tags.remove(key);
        }
        Ok(())
    }

    pub async fn list_tags_for_resource(
        &self,
        ctx: &RequestContext,
        arn: &str,
    ) -> Result<Vec<(String, String)>, SnsError> {
        let inner = self.inner.lock().await;
        let topic = resolve_topic(&inner, ctx, arn)?;
        let mut tags: Vec<(String, String)> = topic
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        tags.sort();
        Ok(tags)
    }

    // --- inspection ---

    pub async fn topic_summaries(&self) -> Vec<TopicSummary> {
        let inner = self.inner.lock().await;
        let mut out = Vec::new();
        for (region, topics) in &inner.regions {
            for topic in topics.values() {
                out.push(TopicSummary {
                    name: topic.name.clone(),
                    region: region.clone(),
                    arn: topic.arn.clone(),
                    subscription_count: topic.subscriptions.len(),
                });
            }
        }
        out.sort_by(|a, b| (&a.region, &a.name).cmp(&(&b.region, &b.name)));
        out
    }

    pub async fn topic_snapshot(&self, region: &str, name: &str) -> Option<TopicSnapshot> {
        let inner = self.inner.lock().await;
        let topic = inner.regions.get(region)?.get(name)?;
        Some(TopicSnapshot {
            name: topic.name.clone(),
            region: region.to_string(),
            arn: topic.arn.clone(),
            attributes: topic.attributes.to_map(topic),
            tags: topic.tags.clone(),
            subscriptions: topic
                .subscriptions
                .iter()
                .map(|s| SubscriptionSnapshot {
                    arn: s.arn.clone(),
                    protocol: s.protocol.clone(),
                    endpoint: s.endpoint.clone(),
                    attributes: s.attributes.to_map(s),
                })
                .collect(),
        })
    }
}

fn subscription_entry(sub: &Subscription) -> SubscriptionEntry {
    SubscriptionEntry {
        subscription_arn: sub.arn.clone(),
        owner: sub.owner.clone(),
        protocol: sub.protocol.clone(),
        endpoint: sub.endpoint.clone(),
        topic_arn: sub.topic_arn.clone(),
    }
}

fn resolve_topic<'a>(
    inner: &'a SnsInner,
    ctx: &RequestContext,
    arn: &str,
) -> Result<&'a Topic, SnsError> {
    let (region, name) =
        parse_topic_arn(arn).unwrap_or_else(|| (ctx.region.clone(), arn.to_string()));
    inner
        .regions
        .get(&region)
        .and_then(|t| t.get(&name))
        .ok_or_else(|| SnsError::NotFound("Topic does not exist".into()))
}

fn resolve_topic_mut<'a>(
    inner: &'a mut SnsInner,
    ctx: &RequestContext,
    arn: &str,
) -> Result<&'a mut Topic, SnsError> {
    let (region, name) =
        parse_topic_arn(arn).unwrap_or_else(|| (ctx.region.clone(), arn.to_string()));
    inner
        .regions
        .get_mut(&region)
        .and_then(|t| t.get_mut(&name))
        .ok_or_else(|| SnsError::NotFound("Topic does not exist".into()))
}

/// Validates a publish against the topic, applies FIFO dedup and sequencing,
/// and computes the per-subscription delivery plan. Returns `None` plans on a
/// dedup no-op (nothing new exists, nothing is delivered).
fn plan_publish(
    topic: &mut Topic,
    req: &PublishRequest,
) -> Result<(PublishResponse, Option<Vec<PlannedDelivery>>), SnsError> {
    if req.message.is_empty() {
        return Err(SnsError::InvalidParameter("Message must not be empty".into()));
    }
    if req.message.len() > 262144 {
        return Err(SnsError::InvalidParameter(
            "Message must be shorter than 262144 bytes".into(),
        ));
    }

    let now = Instant::now();
    let dedup_key = if topic.attributes.fifo_topic {
        if req.message_group_id.is_none() {
            return Err(SnsError::InvalidParameter(
                "MessageGroupId is required for FIFO topics".into(),
            ));
        }
        let key = match req.message_deduplication_id.clone() {
            Some(id) => id,
            None if topic.attributes.content_based_deduplication => {
                sha256_hex(req.message.as_bytes())
            }
            None => {
                return Err(SnsError::InvalidParameter(
                    "The topic should either have ContentBasedDeduplication enabled or MessageDeduplicationId provided explicitly".into(),
                ));
            }
        };
        if let Some((message_id, sequence_number)) = topic.dedup_lookup(&key, now) {
            return Ok((
                PublishResponse {
                    message_id,
                    sequence_number,
                },
                None,
            ));
        }
        Some(key)
    } else {
        None
    };

    let message_id = Uuid::new_v4().to_string();
    let sequence_number = topic
        .attributes
        .fifo_topic
        .then(|| topic.next_sequence());
    if let Some(key) = dedup_key {
        topic.dedup_insert(key, message_id.clone(), sequence_number.clone(), now);
    }

    let attribute_source = AttributeSource::from_attributes(req.message_attributes.iter().map(
        |(name, attr)| {
            (
                name.as_str(),
                attr.data_type.as_str(),
                attr.string_value.as_deref(),
            )
        },
    ));
    let body_source = std::cell::OnceCell::new();

    let mut plans = Vec::new();
    for sub in &topic.subscriptions {
        if let Some(filter) = &sub.compiled_filter {
            let scope = sub
                .attributes
                .filter_policy_scope
                .unwrap_or(FilterPolicyScope::MessageAttributes);
            let matched = match scope {
                FilterPolicyScope::MessageAttributes => filter.matches(&attribute_source),
                FilterPolicyScope::MessageBody => filter
                    .matches(body_source.get_or_init(|| AttributeSource::from_body(&req.message))),
            };
            if !matched {
                continue;
            }
        }

        let raw = sub.attributes.raw_message_delivery;
        let body = if raw {
            req.message.clone()
        } else {
            envelope(topic, &message_id, req)
        };
        let attributes = if raw {
            req.message_attributes
                .iter()
                .map(|(name, attr)| {
                    (
                        name.clone(),
                        MessageAttributeValue {
                            data_type: attr.data_type.clone(),
                            string_value: attr.string_value.clone(),
                            binary_value: attr.binary_value.clone(),
                        },
                    )
                })
                .collect()
        } else {
            HashMap::new()
        };

        plans.push(PlannedDelivery {
            protocol: sub.protocol.clone(),
            endpoint: sub.endpoint.clone(),
            body,
            attributes,
            // Raw delivery preserves the publish's FIFO identity.
            group_id: raw.then(|| req.message_group_id.clone()).flatten(),
            deduplication_id: raw
                .then(|| req.message_deduplication_id.clone())
                .flatten(),
        });
    }

    Ok((
        PublishResponse {
            message_id,
            sequence_number,
        },
        Some(plans),
    ))
}

/// The JSON wrapper SNS puts around a message when raw delivery is off.
fn envelope(topic: &Topic, message_id: &str, req: &PublishRequest) -> String {
    let mut value = serde_json::json!({
        "Type": "Notification",
        "MessageId": message_id,
        "TopicArn": topic.arn,
        "Message": req.message,
        "Timestamp": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
    });
    if let Some(ref subject) = req.subject {
        value["Subject"] = serde_json::Value::String(subject.clone());
    }
    if !req.message_attributes.is_empty() {
        let mut attrs = serde_json::Map::new();
        for (name, attr) in &req.message_attributes {
            let val = attr
                .string_value
                .clone()
                .or_else(|| attr.binary_value.clone())
                .unwrap_or_default();
            attrs.insert(
                name.clone(),
                serde_json::json!({"Type": attr.data_type, "Value": val}),
            );
        }
        value["MessageAttributes"] = serde_json::Value::Object(attrs);
    }
    value.to_string()
}
