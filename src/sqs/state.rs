use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::auth::RequestContext;
use crate::spy::{MessageSpy, SpyEvent};

use super::error::SqsError;
use super::queue::{now_millis, DlqMove, Delivery, Queue, QueueAttributes, SendInput};
use super::types::*;

struct QueueEntry {
    queue: Queue,
    notify: Arc<Notify>,
}

struct SqsInner {
    /// region -> queue name -> entry
    regions: HashMap<String, HashMap<String, QueueEntry>>,
}

pub struct SqsState {
    inner: Mutex<SqsInner>,
    account_id: String,
    host: Option<String>,
    port: u16,
    spy: Option<Arc<MessageSpy>>,
}

/// Arguments for an engine-internal enqueue (SNS fan-out, DLQ moves).
pub struct InternalDelivery {
    pub body: String,
    pub attributes: HashMap<String, MessageAttributeValue>,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub name: String,
    pub region: String,
    pub url: String,
    pub arn: String,
    pub approximate_message_count: usize,
    pub approximate_inflight_count: usize,
    pub approximate_delayed_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnapshot {
    pub message_id: String,
    pub body: String,
    pub receive_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub name: String,
    pub region: String,
    pub url: String,
    pub arn: String,
    pub attributes: HashMap<String, String>,
    pub tags: HashMap<String, String>,
    pub ready: Vec<MessageSnapshot>,
    pub delayed: Vec<MessageSnapshot>,
    pub inflight: Vec<MessageSnapshot>,
}

fn snapshot_message(m: &super::queue::Message) -> MessageSnapshot {
    MessageSnapshot {
        message_id: m.message_id.clone(),
        body: m.body.clone(),
        receive_count: m.receive_count,
        group_id: m.group_id.clone(),
        sequence_number: m.sequence_number.clone(),
    }
}

fn resolve_queue_name(queue_url: &str) -> Result<String, SqsError> {
    queue_url
        .split('/')
        .next_back()
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| SqsError::QueueDoesNotExist("Invalid queue URL".into()))
}

/// `arn:aws:sqs:<region>:<account>:<name>` -> (region, name)
fn parse_queue_arn(arn: &str) -> Option<(String, String)> {
    let mut parts = arn.split(':');
    let (arn_tag, _aws, service) = (parts.next()?, parts.next()?, parts.next()?);
    if arn_tag != "arn" || service != "sqs" {
        return None;
    }
    let region = parts.next()?.to_string();
    let _account = parts.next()?;
    let name = parts.next()?.to_string();
    if region.is_empty() || name.is_empty() {
        return None;
    }
    Some((region, name))
}

fn validate_queue_name(name: &str, is_fifo: bool) -> Result<(), SqsError> {
    let base = name.strip_suffix(".fifo").unwrap_or(name);
    if name.is_empty() || name.len() > 80 {
        return Err(SqsError::InvalidParameterValue(
            "Queue name must be between 1 and 80 characters".into(),
        ));
    }
    if !base
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SqsError::InvalidParameterValue(
            "Queue name can only contain alphanumeric characters, hyphens, and underscores".into(),
        ));
    }
    if is_fifo && !name.ends_with(".fifo") {
        return Err(SqsError::InvalidParameterValue(
            "FIFO queue name must end with .fifo".into(),
        ));
    }
    if !is_fifo && name.ends_with(".fifo") {
        return Err(SqsError::InvalidParameterValue(
            "Non-FIFO queue name must not end with .fifo".into(),
        ));
    }
    Ok(())
}

fn validate_batch_ids(ids: &[String]) -> Result<(), SqsError> {
    if ids.is_empty() {
        return Err(SqsError::EmptyBatchRequest(
            "There should be at least one SendMessageBatchRequestEntry in the request.".into(),
        ));
    }
    if ids.len() > 10 {
        return Err(SqsError::TooManyEntriesInBatchRequest(
            "Maximum number of entries per request are 10.".into(),
        ));
    }
    let mut seen = std::collections::HashSet::new();
    for id in ids {
        let valid = !id.is_empty()
            && id.len() <= 80
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SqsError::InvalidBatchEntryId(format!(
                "A batch entry id can only contain alphanumeric characters, hyphens and underscores: {id}"
            )));
        }
        if !seen.insert(id) {
            return Err(SqsError::BatchEntryIdsNotDistinct(format!(
                "Id {id} repeated"
            )));
        }
    }
    Ok(())
}

impl SqsState {
    pub fn new(
        account_id: String,
        host: Option<String>,
        port: u16,
        spy: Option<Arc<MessageSpy>>,
    ) -> Self {
        SqsState {
            inner: Mutex::new(SqsInner {
                regions: HashMap::new(),
            }),
            account_id,
            host,
            port,
            spy,
        }
    }

    fn queue_url(&self, region: &str, name: &str, authority: &str) -> String {
        let (host, port) = match &self.host {
            Some(h) => (h.clone(), self.port),
            None => {
                let mut parts = authority.splitn(2, ':');
                let h = parts.next().unwrap_or("localhost").to_string();
                let p = parts
                    .next()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(self.port);
                (h, p)
            }
        };
        format!(
            "http://sqs.{region}.{host}:{port}/{account}/{name}",
            account = self.account_id
        )
    }

    fn queue_arn(&self, region: &str, name: &str) -> String {
        format!("arn:aws:sqs:{region}:{}:{name}", self.account_id)
    }

    fn record(&self, event: SpyEvent) {
        if let Some(spy) = &self.spy {
            spy.record(event);
        }
    }

    // --- queue management ---

    pub async fn create_queue(
        &self,
        ctx: &RequestContext,
        req: CreateQueueRequest,
    ) -> Result<CreateQueueResponse, SqsError> {
        let is_fifo = req
            .attributes
            .as_ref()
            .and_then(|a| a.get("FifoQueue"))
            .map(|v| v == "true")
            .unwrap_or_else(|| req.queue_name.ends_with(".fifo"));
        validate_queue_name(&req.queue_name, is_fifo)?;

        // Validate attributes before touching any state.
        let mut attributes = QueueAttributes {
            fifo_queue: is_fifo,
            ..QueueAttributes::default()
        };
        if let Some(ref attrs) = req.attributes {
            let mut attrs = attrs.clone();
            attrs.remove("FifoQueue");
            attributes.apply(&attrs)?;
        }

        let mut inner = self.inner.lock().await;
        let queues = inner.regions.entry(ctx.region.clone()).or_default();

        if let Some(entry) = queues.get(&req.queue_name) {
            let existing = entry.queue.attributes.to_map();
            if let Some(ref attrs) = req.attributes {
                for (key, value) in attrs {
                    if key == "FifoQueue" {
                        continue;
                    }
                    if existing.get(key.as_str()).map(String::as_str) != Some(value.as_str()) {
                        return Err(SqsError::QueueAlreadyExists(format!(
                            "A queue already exists with the same name and a different value for attribute {key}"
                        )));
                    }
                }
            }
            return Ok(CreateQueueResponse {
                queue_url: entry.queue.url.clone(),
            });
        }

        let url = self.queue_url(&ctx.region, &req.queue_name, &ctx.authority);
        let arn = self.queue_arn(&ctx.region, &req.queue_name);
        let mut queue = Queue::new(req.queue_name.clone(), arn, url.clone(), attributes);
        if let Some(tags) = req.tags {
            queue.tags = tags;
        }

        queues.insert(
            req.queue_name,
            QueueEntry {
                queue,
                notify: Arc::new(Notify::new()),
            },
        );
        Ok(CreateQueueResponse { queue_url: url })
    }

    pub async fn delete_queue(
        &self,
        ctx: &RequestContext,
        req: DeleteQueueRequest,
    ) -> Result<(), SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = inner
            .regions
            .get_mut(&ctx.region)
            .and_then(|queues| queues.remove(&name))
            .ok_or_else(|| {
                SqsError::QueueDoesNotExist("The specified queue does not exist.".into())
            })?;
        // Outstanding long polls resolve immediately with an empty result.
        entry.notify.notify_waiters();
        Ok(())
    }

    pub async fn get_queue_url(
        &self,
        ctx: &RequestContext,
        req: GetQueueUrlRequest,
    ) -> Result<GetQueueUrlResponse, SqsError> {
        let inner = self.inner.lock().await;
        inner
            .regions
            .get(&ctx.region)
            .and_then(|queues| queues.get(&req.queue_name))
            .map(|e| GetQueueUrlResponse {
                queue_url: e.queue.url.clone(),
            })
            .ok_or_else(|| {
                SqsError::QueueDoesNotExist("The specified queue does not exist.".into())
            })
    }

    pub async fn list_queues(
        &self,
        ctx: &RequestContext,
        req: ListQueuesRequest,
    ) -> Result<ListQueuesResponse, SqsError> {
        let inner = self.inner.lock().await;
        let max = req.max_results.unwrap_or(1000).clamp(1, 1000) as usize;
        let empty = HashMap::new();
        let queues = inner.regions.get(&ctx.region).unwrap_or(&empty);

        let mut names: Vec<&String> = queues.keys().collect();
        names.sort();
        if let Some(ref prefix) = req.queue_name_prefix {
            names.retain(|n| n.starts_with(prefix.as_str()));
        }

        let start = if let Some(ref token) = req.next_token {
            names
                .iter()
                .position(|n| n.as_str() > token.as_str())
                .unwrap_or(names.len())
        } else {
            0
        };

        let page: Vec<String> = names[start..]
            .iter()
            .take(max)
            .map(|n| queues[*n].queue.url.clone())
            .collect();
        let next_token = if start + max < names.len() {
            names.get(start + max - 1).map(|n| (*n).clone())
        } else {
            None
        };

        Ok(ListQueuesResponse {
            queue_urls: if page.is_empty() { None } else { Some(page) },
            next_token,
        })
    }

    pub async fn get_queue_attributes(
        &self,
        ctx: &RequestContext,
        req: GetQueueAttributesRequest,
    ) -> Result<GetQueueAttributesResponse, SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, &ctx.region, &name)?;
        entry.queue.sweep(Instant::now());
        Ok(GetQueueAttributesResponse {
            attributes: entry.queue.get_attributes(&req.attribute_names),
        })
    }

    pub async fn set_queue_attributes(
        &self,
        ctx: &RequestContext,
        req: SetQueueAttributesRequest,
    ) -> Result<(), SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, &ctx.region, &name)?;
        entry.queue.set_attributes(&req.attributes)
    }

    pub async fn purge_queue(
        &self,
        ctx: &RequestContext,
        req: PurgeQueueRequest,
    ) -> Result<(), SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, &ctx.region, &name)?;
        entry.queue.purge();
        Ok(())
    }

    // --- tagging ---

    pub async fn tag_queue(&self, ctx: &RequestContext, req: TagQueueRequest) -> Result<(), SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, &ctx.region, &name)?;
        for (k, v) in req.tags {
            entry.queue.tags.insert(k, v);
        }
        Ok(())
    }

    pub async fn untag_queue(
        &self,
        ctx: &RequestContext,
        req: UntagQueueRequest,
    ) -> Result<(), SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, &ctx.region, &name)?;
        for key in &req.tag_keys {
            entry.queue.tags.remove(key);
        }
        Ok(())
    }

    pub async fn list_queue_tags(
        &self,
        ctx: &RequestContext,
        req: ListQueueTagsRequest,
    ) -> Result<ListQueueTagsResponse, SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, &ctx.region, &name)?;
        Ok(ListQueueTagsResponse {
            tags: if entry.queue.tags.is_empty() {
                None
            } else {
                Some(entry.queue.tags.clone())
            },
        })
    }

    pub async fn list_dead_letter_source_queues(
        &self,
        ctx: &RequestContext,
        req: ListDeadLetterSourceQueuesRequest,
    ) -> Result<ListDeadLetterSourceQueuesResponse, SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let inner = self.inner.lock().await;
        let queues = inner.regions.get(&ctx.region).ok_or_else(|| {
            SqsError::QueueDoesNotExist("The specified queue does not exist.".into())
        })?;
        let target_arn = queues
            .get(&name)
            .map(|e| e.queue.arn.clone())
            .ok_or_else(|| {
                SqsError::QueueDoesNotExist("The specified queue does not exist.".into())
            })?;

        let mut source_urls: Vec<String> = queues
            .values()
            .filter(|e| {
                e.queue
                    .attributes
                    .redrive_policy
                    .as_ref()
                    .map(|rp| rp.dead_letter_target_arn == target_arn)
                    .unwrap_or(false)
            })
            .map(|e| e.queue.url.clone())
            .collect();
        source_urls.sort();

        let max = req.max_results.unwrap_or(1000).clamp(1, 1000) as usize;
        let start = if let Some(ref token) = req.next_token {
            source_urls
                .iter()
                .position(|u| u.as_str() > token.as_str())
                .unwrap_or(source_urls.len())
        } else {
            0
        };
        let page: Vec<String> = source_urls[start..].iter().take(max).cloned().collect();
        let next_token = if start + max < source_urls.len() {
            page.last().cloned()
        } else {
            None
        };

        Ok(ListDeadLetterSourceQueuesResponse {
            queue_urls: page,
            next_token,
        })
    }

    // --- send ---

    pub async fn send_message(
        &self,
        ctx: &RequestContext,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let input = send_input_from(
            req.message_body,
            req.delay_seconds,
            req.message_attributes,
            req.message_system_attributes,
            req.message_deduplication_id,
            req.message_group_id,
        );
        let outcome = self.send_internal(&ctx.region, &name, input).await?;
        Ok(SendMessageResponse {
            message_id: outcome.message_id,
            md5_of_message_body: outcome.md5_of_body,
            md5_of_message_attributes: outcome.md5_of_attributes,
            sequence_number: outcome.sequence_number,
        })
    }

    /// Enqueue used by the wire path, SNS fan-out and DLQ redrive alike.
    async fn send_internal(
        &self,
        region: &str,
        name: &str,
        input: SendInput,
    ) -> Result<super::queue::SendOutcome, SqsError> {
        let body_preview = self.spy.is_some().then(|| input.body.clone());
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, region, name)?;
        let outcome = entry.queue.send(input, Instant::now())?;
        if outcome.inserted {
            self.record(SpyEvent::QueuePublished {
                region: region.to_string(),
                queue: name.to_string(),
                message_id: outcome.message_id.clone(),
                body: body_preview.unwrap_or_default(),
            });
            if entry.queue.has_available() {
                entry.notify.notify_waiters();
            }
        }
        Ok(outcome)
    }

    /// Fan-out entry point for the topic store. Resolves (region, name) at
    /// publish time; the dedup window of a FIFO queue still applies.
    pub async fn deliver(
        &self,
        region: &str,
        queue_name: &str,
        delivery: InternalDelivery,
    ) -> Result<(), SqsError> {
        let input = SendInput {
            body: delivery.body,
            delay_seconds: None,
            attributes: delivery.attributes,
            deduplication_id: delivery.deduplication_id,
            group_id: delivery.group_id,
            trace_header: None,
            message_id: None,
            source_arn: None,
        };
        self.send_internal(region, queue_name, input).await.map(|_| ())
    }

    pub async fn send_message_batch(
        &self,
        ctx: &RequestContext,
        req: SendMessageBatchRequest,
    ) -> Result<SendMessageBatchResponse, SqsError> {
        let ids: Vec<String> = req.entries.iter().map(|e| e.id.clone()).collect();
        validate_batch_ids(&ids)?;

        let total: usize = req
            .entries
            .iter()
            .map(|e| {
                super::queue::wire_size(
                    &e.message_body,
                    e.message_attributes.as_ref().unwrap_or(&HashMap::new()),
                )
            })
            .sum();
        if total > 262144 {
            return Err(SqsError::BatchRequestTooLong(
                "Batch requests cannot be longer than 262144 bytes".into(),
            ));
        }

        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let region = ctx.region.clone();
        let entry = entry_mut(&mut inner, &region, &name)?;

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut woke = false;
        let now = Instant::now();

        for e in req.entries {
            let input = send_input_from(
                e.message_body,
                e.delay_seconds,
                e.message_attributes,
                e.message_system_attributes,
                e.message_deduplication_id,
                e.message_group_id,
            );
            match entry.queue.send(input, now) {
                Ok(outcome) => {
                    if outcome.inserted {
                        woke = true;
                        self.record(SpyEvent::QueuePublished {
                            region: region.clone(),
                            queue: name.clone(),
                            message_id: outcome.message_id.clone(),
                            body: String::new(),
                        });
                    }
                    successful.push(SendMessageBatchResultEntry {
                        id: e.id,
                        message_id: outcome.message_id,
                        md5_of_message_body: outcome.md5_of_body,
                        md5_of_message_attributes: outcome.md5_of_attributes,
                        sequence_number: outcome.sequence_number,
                    });
                }
                Err(err) => {
                    failed.push(BatchResultErrorEntry {
                        id: e.id,
                        code: err.code().to_string(),
                        message: err.message().to_string(),
                        sender_fault: true,
                    });
                }
            }
        }

        if woke && entry.queue.has_available() {
            entry.notify.notify_waiters();
        }
        Ok(SendMessageBatchResponse { successful, failed })
    }

    // --- receive ---

    pub async fn receive_message(
        &self,
        ctx: &RequestContext,
        req: ReceiveMessageRequest,
    ) -> Result<ReceiveMessageResponse, SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let max = match req.max_number_of_messages {
            None => 1usize,
            Some(m) if (1..=10).contains(&m) => m as usize,
            Some(m) => {
                return Err(SqsError::InvalidParameterValue(format!(
                    "Value {m} for parameter MaxNumberOfMessages is invalid. Reason: Must be between 1 and 10, if provided."
                )));
            }
        };
        if let Some(w) = req.wait_time_seconds {
            if !(0..=20).contains(&w) {
                return Err(SqsError::InvalidParameterValue(format!(
                    "Value {w} for parameter WaitTimeSeconds is invalid. Reason: Must be between 0 and 20, if provided."
                )));
            }
        }
        if let Some(v) = req.visibility_timeout {
            if !(0..=43200).contains(&v) {
                return Err(SqsError::InvalidParameterValue(format!(
                    "Value {v} for parameter VisibilityTimeout is invalid. Reason: Must be between 0 and 43200, if provided."
                )));
            }
        }

        // First attempt; also resolves the queue's wait default and waiter.
        let (wait, notify) = {
            let mut inner = self.inner.lock().await;
            let entry = entry_mut(&mut inner, &ctx.region, &name)?;
            let wait = req
                .wait_time_seconds
                .unwrap_or(entry.queue.attributes.receive_message_wait_time_seconds as i32);
            let notify = entry.notify.clone();
            if let Some(messages) = self.dequeue(&mut inner, ctx, &name, max, &req) {
                return Ok(ReceiveMessageResponse {
                    messages: Some(messages),
                });
            }
            (wait, notify)
        };

        if wait <= 0 {
            return Ok(ReceiveMessageResponse { messages: None });
        }

        // Long poll: register interest before the re-check so a send landing
        // in between cannot be missed, then wait for a wake-up or deadline.
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let mut inner = self.inner.lock().await;
            if inner
                .regions
                .get(&ctx.region)
                .map(|qs| qs.contains_key(&name))
                .unwrap_or(false)
            {
                if let Some(messages) = self.dequeue(&mut inner, ctx, &name, max, &req) {
                    return Ok(ReceiveMessageResponse {
                        messages: Some(messages),
                    });
                }
            } else {
                return Ok(ReceiveMessageResponse { messages: None });
            }
        }

        let _ = tokio::time::timeout(Duration::from_secs(wait as u64), notified).await;

        // Retry once after the wake-up; a deleted queue yields empty.
        let mut inner = self.inner.lock().await;
        let exists = inner
            .regions
            .get(&ctx.region)
            .map(|qs| qs.contains_key(&name))
            .unwrap_or(false);
        let messages = if exists {
            self.dequeue(&mut inner, ctx, &name, max, &req)
        } else {
            None
        };
        Ok(ReceiveMessageResponse { messages })
    }

    /// Sweeps, dequeues and applies DLQ moves for one queue. Returns `None`
    /// when nothing was delivered.
    fn dequeue(
        &self,
        inner: &mut SqsInner,
        ctx: &RequestContext,
        name: &str,
        max: usize,
        req: &ReceiveMessageRequest,
    ) -> Option<Vec<ReceivedMessage>> {
        let now = Instant::now();
        let queues = inner.regions.get_mut(&ctx.region)?;
        let entry = queues.get_mut(name)?;
        entry.queue.sweep(now);

        let visibility = Duration::from_secs(
            req.visibility_timeout
                .map(|v| v as u64)
                .unwrap_or(entry.queue.attributes.visibility_timeout as u64),
        );
        let (deliveries, moves) = entry.queue.receive(max, visibility, now);

        for d in &deliveries {
            self.record(SpyEvent::QueueConsumed {
                region: ctx.region.clone(),
                queue: name.to_string(),
                message_id: d.message.message_id.clone(),
                receive_count: d.message.receive_count,
            });
        }
        if !moves.is_empty() {
            self.apply_dlq_moves(queues, &ctx.region, name, moves, now);
        }

        if deliveries.is_empty() {
            None
        } else {
            Some(self.render_deliveries(deliveries, req))
        }
    }

    fn apply_dlq_moves(
        &self,
        queues: &mut HashMap<String, QueueEntry>,
        region: &str,
        source: &str,
        moves: Vec<DlqMove>,
        now: Instant,
    ) {
        for mv in moves {
            let Some((target_region, target_name)) = parse_queue_arn(&mv.target_arn) else {
                warn!(arn = %mv.target_arn, "malformed dead-letter target ARN, dropping message");
                continue;
            };
            if target_region != region {
                warn!(arn = %mv.target_arn, "dead-letter target in another region, dropping message");
                continue;
            }
            let Some(target) = queues.get_mut(&target_name) else {
                warn!(queue = %target_name, "dead-letter target queue missing, dropping message");
                continue;
            };

            let is_fifo = target.queue.attributes.fifo_queue;
            let message_id = mv.message.message_id.clone();
            let input = SendInput {
                body: mv.message.body,
                delay_seconds: None,
                attributes: mv.message.message_attributes,
                deduplication_id: if is_fifo { mv.message.dedup_id } else { None },
                group_id: mv.message.group_id,
                trace_header: mv.message.trace_header,
                message_id: Some(message_id.clone()),
                source_arn: mv.message.source_arn,
            };
            match target.queue.send(input, now) {
                Ok(outcome) if outcome.inserted => {
                    self.record(SpyEvent::DeadLettered {
                        region: region.to_string(),
                        source_queue: source.to_string(),
                        target_queue: target_name.clone(),
                        message_id: message_id.clone(),
                    });
                    self.record(SpyEvent::QueuePublished {
                        region: region.to_string(),
                        queue: target_name.clone(),
                        message_id,
                        body: String::new(),
                    });
                    if target.queue.has_available() {
                        target.notify.notify_waiters();
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(queue = %target_name, error = %err.message(), "dead-letter move failed, dropping message");
                }
            }
        }
    }

    fn render_deliveries(
        &self,
        deliveries: Vec<Delivery>,
        req: &ReceiveMessageRequest,
    ) -> Vec<ReceivedMessage> {
        let mut system_names: Vec<String> = req.attribute_names.clone().unwrap_or_default();
        if let Some(extra) = &req.message_system_attribute_names {
            system_names.extend(extra.iter().cloned());
        }

        deliveries
            .into_iter()
            .map(|d| {
                let msg = d.message;
                let attributes = filter_system_attributes(
                    self.system_attributes(&msg),
                    &system_names,
                );
                let message_attributes = filter_message_attributes(
                    &msg.message_attributes,
                    &req.message_attribute_names,
                );
                ReceivedMessage {
                    message_id: msg.message_id,
                    receipt_handle: d.receipt_handle,
                    body: msg.body,
                    md5_of_body: msg.md5_of_body,
                    md5_of_message_attributes: message_attributes
                        .as_ref()
                        .and_then(super::queue::compute_md5_of_attributes),
                    attributes,
                    message_attributes,
                }
            })
            .collect()
    }

    fn system_attributes(&self, msg: &super::queue::Message) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("SenderId".into(), self.account_id.clone());
        attrs.insert("SentTimestamp".into(), msg.sent_timestamp.to_string());
        attrs.insert(
            "ApproximateReceiveCount".into(),
            msg.receive_count.to_string(),
        );
        attrs.insert(
            "ApproximateFirstReceiveTimestamp".into(),
            msg.first_receive_timestamp.unwrap_or_else(now_millis).to_string(),
        );
        if let Some(ref did) = msg.dedup_id {
            attrs.insert("MessageDeduplicationId".into(), did.clone());
        }
        if let Some(ref gid) = msg.group_id {
            attrs.insert("MessageGroupId".into(), gid.clone());
        }
        if let Some(ref seq) = msg.sequence_number {
            attrs.insert("SequenceNumber".into(), seq.clone());
        }
        if let Some(ref arn) = msg.source_arn {
            attrs.insert("DeadLetterQueueSourceArn".into(), arn.clone());
        }
        if let Some(ref trace) = msg.trace_header {
            attrs.insert("AWSTraceHeader".into(), trace.clone());
        }
        attrs
    }

    // --- delete / visibility ---

    pub async fn delete_message(
        &self,
        ctx: &RequestContext,
        req: DeleteMessageRequest,
    ) -> Result<(), SqsError> {
        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, &ctx.region, &name)?;
        if entry.queue.delete_inflight(&req.receipt_handle) {
            entry.notify.notify_waiters();
        }
        Ok(())
    }

    pub async fn delete_message_batch(
        &self,
        ctx: &RequestContext,
        req: DeleteMessageBatchRequest,
    ) -> Result<DeleteMessageBatchResponse, SqsError> {
        let ids: Vec<String> = req.entries.iter().map(|e| e.id.clone()).collect();
        validate_batch_ids(&ids)?;

        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, &ctx.region, &name)?;

        let mut woke = false;
        let successful = req
            .entries
            .into_iter()
            .map(|e| {
                woke |= entry.queue.delete_inflight(&e.receipt_handle);
                DeleteMessageBatchResultEntry { id: e.id }
            })
            .collect();
        if woke {
            entry.notify.notify_waiters();
        }
        Ok(DeleteMessageBatchResponse {
            successful,
            failed: Vec::new(),
        })
    }

    pub async fn change_message_visibility(
        &self,
        ctx: &RequestContext,
        req: ChangeMessageVisibilityRequest,
    ) -> Result<(), SqsError> {
        if !(0..=43200).contains(&req.visibility_timeout) {
            return Err(SqsError::InvalidParameterValue(format!(
                "Value {} for parameter VisibilityTimeout is invalid. Reason: Must be between 0 and 43200.",
                req.visibility_timeout
            )));
        }
        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, &ctx.region, &name)?;
        let woke = entry.queue.change_visibility(
            &req.receipt_handle,
            req.visibility_timeout as u32,
            Instant::now(),
        )?;
        if woke {
            entry.notify.notify_waiters();
        }
        Ok(())
    }

    pub async fn change_message_visibility_batch(
        &self,
        ctx: &RequestContext,
        req: ChangeMessageVisibilityBatchRequest,
    ) -> Result<ChangeMessageVisibilityBatchResponse, SqsError> {
        let ids: Vec<String> = req.entries.iter().map(|e| e.id.clone()).collect();
        validate_batch_ids(&ids)?;

        let name = resolve_queue_name(&req.queue_url)?;
        let mut inner = self.inner.lock().await;
        let entry = entry_mut(&mut inner, &ctx.region, &name)?;

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut woke = false;
        let now = Instant::now();

        for e in req.entries {
            if !(0..=43200).contains(&e.visibility_timeout) {
                failed.push(BatchResultErrorEntry {
                    id: e.id,
                    code: "InvalidParameterValue".into(),
                    message: "VisibilityTimeout must be between 0 and 43200".into(),
                    sender_fault: true,
                });
                continue;
            }
            match entry
                .queue
                .change_visibility(&e.receipt_handle, e.visibility_timeout as u32, now)
            {
                Ok(w) => {
                    woke |= w;
                    successful.push(ChangeMessageVisibilityBatchResultEntry { id: e.id });
                }
                Err(err) => failed.push(BatchResultErrorEntry {
                    id: e.id,
                    code: err.code().to_string(),
                    message: err.message().to_string(),
                    sender_fault: true,
                }),
            }
        }
        if woke {
            entry.notify.notify_waiters();
        }
        Ok(ChangeMessageVisibilityBatchResponse { successful, failed })
    }

    // --- timers ---

    /// One tick of the timer routine: sweep every queue and wake waiters on
    /// queues that gained available messages. Queues are visited in (region,
    /// name) order.
    pub async fn process_timers(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let mut region_names: Vec<String> = inner.regions.keys().cloned().collect();
        region_names.sort();
        for region in region_names {
            let Some(queues) = inner.regions.get_mut(&region) else {
                continue;
            };
            let mut names: Vec<String> = queues.keys().cloned().collect();
            names.sort();
            for name in names {
                if let Some(entry) = queues.get_mut(&name) {
                    let had = entry.queue.has_available();
                    entry.queue.sweep(now);
                    if !had && entry.queue.has_available() {
                        entry.notify.notify_waiters();
                    }
                }
            }
        }
    }

    // --- inspection ---

    pub async fn queue_summaries(&self) -> Vec<QueueSummary> {
        let inner = self.inner.lock().await;
        let mut out = Vec::new();
        for (region, queues) in &inner.regions {
            for entry in queues.values() {
                out.push(QueueSummary {
                    name: entry.queue.name.clone(),
                    region: region.clone(),
                    url: entry.queue.url.clone(),
                    arn: entry.queue.arn.clone(),
                    approximate_message_count: entry.queue.ready.len(),
                    approximate_inflight_count: entry.queue.inflight.len(),
                    approximate_delayed_count: entry.queue.delayed.len(),
                });
            }
        }
        out.sort_by(|a, b| (&a.region, &a.name).cmp(&(&b.region, &b.name)));
        out
    }

    pub async fn queue_snapshot(&self, region: &str, name: &str) -> Option<QueueSnapshot> {
        let inner = self.inner.lock().await;
        let entry = inner.regions.get(region)?.get(name)?;
        let q = &entry.queue;
        Some(QueueSnapshot {
            name: q.name.clone(),
            region: region.to_string(),
            url: q.url.clone(),
            arn: q.arn.clone(),
            attributes: q.attributes.to_map(),
            tags: q.tags.clone(),
            ready: q.ready.iter().map(snapshot_message).collect(),
            delayed: q.delayed.iter().map(snapshot_message).collect(),
            inflight: q.inflight.values().map(|e| snapshot_message(&e.message)).collect(),
        })
    }
}

fn entry_mut<'a>(
    inner: &'a mut SqsInner,
    region: &str,
    name: &str,
) -> Result<&'a mut QueueEntry, SqsError> {
    inner
        .regions
        .get_mut(region)
        .and_then(|queues| queues.get_mut(name))
        .ok_or_else(|| SqsError::QueueDoesNotExist("The specified queue does not exist.".into()))
}

fn send_input_from(
    body: String,
    delay_seconds: Option<i32>,
    attributes: Option<HashMap<String, MessageAttributeValue>>,
    system_attributes: Option<HashMap<String, MessageAttributeValue>>,
    deduplication_id: Option<String>,
    group_id: Option<String>,
) -> SendInput {
    let trace_header = system_attributes
        .as_ref()
        .and_then(|m| m.get("AWSTraceHeader"))
        .and_then(|a| a.string_value.clone());
    SendInput {
        body,
        delay_seconds,
        attributes: attributes.unwrap_or_default(),
        deduplication_id,
        group_id,
        trace_header,
        message_id: None,
        source_arn: None,
    }
}

fn filter_system_attributes(
    attrs: HashMap<String, String>,
    names: &[String],
) -> Option<HashMap<String, String>> {
    if names.is_empty() {
        return None;
    }
    let all = names.iter().any(|n| n == "All");
    let filtered: HashMap<String, String> = attrs
        .into_iter()
        .filter(|(k, _)| all || names.iter().any(|n| n == k))
        .collect();
    if filtered.is_empty() {
        None
    } else {
        Some(filtered)
    }
}

fn filter_message_attributes(
    attrs: &HashMap<String, MessageAttributeValue>,
    names: &Option<Vec<String>>,
) -> Option<HashMap<String, MessageAttributeValue>> {
    let names = names.as_ref()?;
    if names.is_empty() {
        return None;
    }
    let all = names.iter().any(|n| n == "All" || n == ".*");
    let matches = |key: &str| {
        all || names.iter().any(|n| {
            n == key
                || n.strip_suffix(".*")
                    .is_some_and(|prefix| key.starts_with(prefix))
        })
    };
    let filtered: HashMap<String, MessageAttributeValue> = attrs
        .iter()
        .filter(|(k, _)| matches(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if filtered.is_empty() {
        None
    } else {
        Some(filtered)
    }
}
