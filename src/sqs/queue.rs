use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use md5::{Digest as Md5Digest, Md5};
use sha2::Sha256;
use uuid::Uuid;

use super::error::SqsError;
use super::types::MessageAttributeValue;

/// FIFO deduplication window mandated by SQS.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(300);

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// MD5 over the attribute blob the SDKs verify: for each attribute in
/// name order, `len(name) || name || len(type) || type || 0x01 ||
/// len(value) || value` (0x02 and raw bytes for binary values).
pub fn compute_md5_of_attributes(attrs: &HashMap<String, MessageAttributeValue>) -> Option<String> {
    if attrs.is_empty() {
        return None;
    }
    let mut keys: Vec<&String> = attrs.keys().collect();
    keys.sort();

    let mut buf: Vec<u8> = Vec::new();
    for key in keys {
        let attr = &attrs[key];
        let name_bytes = key.as_bytes();
        buf.extend_from_slice(&(name_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(name_bytes);

        let dt_bytes = attr.data_type.as_bytes();
        buf.extend_from_slice(&(dt_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(dt_bytes);

        if attr.data_type.starts_with("Binary") {
            buf.push(2);
            if let Some(ref bv) = attr.binary_value {
                let decoded =
                    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, bv)
                        .unwrap_or_default();
                buf.extend_from_slice(&(decoded.len() as u32).to_be_bytes());
                buf.extend_from_slice(&decoded);
            }
        } else {
            buf.push(1);
            if let Some(ref sv) = attr.string_value {
                let sv_bytes = sv.as_bytes();
                buf.extend_from_slice(&(sv_bytes.len() as u32).to_be_bytes());
                buf.extend_from_slice(sv_bytes);
            }
        }
    }

    Some(md5_hex(&buf))
}

/// Code points SQS accepts in a message body.
fn valid_message_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r')
        || ('\u{20}'..='\u{D7FF}').contains(&c)
        || ('\u{E000}'..='\u{FFFD}').contains(&c)
        || c >= '\u{10000}'
}

/// Wire size of a message: body bytes plus, per attribute, name bytes,
/// data-type bytes and value bytes.
pub fn wire_size(body: &str, attrs: &HashMap<String, MessageAttributeValue>) -> usize {
    let mut size = body.len();
    for (name, attr) in attrs {
        size += name.len() + attr.data_type.len();
        if let Some(ref sv) = attr.string_value {
            size += sv.len();
        }
        if let Some(ref bv) = attr.binary_value {
            size += base64::Engine::decode(&base64::engine::general_purpose::STANDARD, bv)
                .map(|d| d.len())
                .unwrap_or(bv.len());
        }
    }
    size
}

#[derive(Debug, Clone)]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

impl RedrivePolicy {
    pub fn from_json(s: &str) -> Result<Self, SqsError> {
        let v: serde_json::Value = serde_json::from_str(s).map_err(|e| {
            SqsError::InvalidAttributeValue(format!("Invalid RedrivePolicy JSON: {e}"))
        })?;
        let arn = v
            .get("deadLetterTargetArn")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SqsError::InvalidAttributeValue(
                    "RedrivePolicy must contain deadLetterTargetArn".into(),
                )
            })?
            .to_string();
        let max_count = v
            .get("maxReceiveCount")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| {
                SqsError::InvalidAttributeValue("RedrivePolicy must contain maxReceiveCount".into())
            })? as u32;
        if !(1..=1000).contains(&max_count) {
            return Err(SqsError::InvalidAttributeValue(
                "maxReceiveCount must be between 1 and 1000".into(),
            ));
        }
        Ok(RedrivePolicy {
            dead_letter_target_arn: arn,
            max_receive_count: max_count,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "deadLetterTargetArn": self.dead_letter_target_arn,
            "maxReceiveCount": self.max_receive_count,
        })
        .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct QueueAttributes {
    pub visibility_timeout: u32,
    pub message_retention_period: u32,
    pub delay_seconds: u32,
    pub maximum_message_size: u32,
    pub receive_message_wait_time_seconds: u32,
    pub redrive_policy: Option<RedrivePolicy>,
    pub fifo_queue: bool,
    pub content_based_deduplication: bool,
    pub kms_master_key_id: Option<String>,
    pub kms_data_key_reuse_period_seconds: u32,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        QueueAttributes {
            visibility_timeout: 30,
            message_retention_period: 345600,
            delay_seconds: 0,
            maximum_message_size: 262144,
            receive_message_wait_time_seconds: 0,
            redrive_policy: None,
            fifo_queue: false,
            content_based_deduplication: false,
            kms_master_key_id: None,
            kms_data_key_reuse_period_seconds: 300,
        }
    }
}

fn range_checked(name: &str, value: &str, lo: i64, hi: i64) -> Result<u32, SqsError> {
    let parsed: i64 = value
        .parse()
        .map_err(|_| SqsError::InvalidAttributeValue(format!("Invalid value for the parameter {name}")))?;
    if !(lo..=hi).contains(&parsed) {
        return Err(SqsError::InvalidAttributeValue(format!(
            "Invalid value for the parameter {name}"
        )));
    }
    Ok(parsed as u32)
}

impl QueueAttributes {
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("VisibilityTimeout".into(), self.visibility_timeout.to_string());
        m.insert(
            "MessageRetentionPeriod".into(),
            self.message_retention_period.to_string(),
        );
        m.insert("DelaySeconds".into(), self.delay_seconds.to_string());
        m.insert("MaximumMessageSize".into(), self.maximum_message_size.to_string());
        m.insert(
            "ReceiveMessageWaitTimeSeconds".into(),
            self.receive_message_wait_time_seconds.to_string(),
        );
        if let Some(ref rp) = self.redrive_policy {
            m.insert("RedrivePolicy".into(), rp.to_json());
        }
        m.insert("FifoQueue".into(), self.fifo_queue.to_string());
        if self.fifo_queue {
            m.insert(
                "ContentBasedDeduplication".into(),
                self.content_based_deduplication.to_string(),
            );
        }
        if let Some(ref key) = self.kms_master_key_id {
            m.insert("KmsMasterKeyId".into(), key.clone());
            m.insert(
                "KmsDataKeyReusePeriodSeconds".into(),
                self.kms_data_key_reuse_period_seconds.to_string(),
            );
        }
        m
    }

    pub fn apply(&mut self, attrs: &HashMap<String, String>) -> Result<(), SqsError> {
        for (key, value) in attrs {
            match key.as_str() {
                "VisibilityTimeout" => {
                    self.visibility_timeout = range_checked(key, value, 0, 43200)?;
                }
                "MessageRetentionPeriod" => {
                    self.message_retention_period = range_checked(key, value, 60, 1209600)?;
                }
                "DelaySeconds" => {
                    self.delay_seconds = range_checked(key, value, 0, 900)?;
                }
                "MaximumMessageSize" => {
                    self.maximum_message_size = range_checked(key, value, 1024, 1048576)?;
                }
                "ReceiveMessageWaitTimeSeconds" => {
                    self.receive_message_wait_time_seconds = range_checked(key, value, 0, 20)?;
                }
                "KmsDataKeyReusePeriodSeconds" => {
                    self.kms_data_key_reuse_period_seconds = range_checked(key, value, 60, 86400)?;
                }
                "RedrivePolicy" => {
                    self.redrive_policy = if value.is_empty() {
                        None
                    } else {
                        Some(RedrivePolicy::from_json(value)?)
                    };
                }
                "FifoQueue" => {
                    self.fifo_queue = value == "true";
                }
                "ContentBasedDeduplication" => {
                    self.content_based_deduplication = value == "true";
                }
                "KmsMasterKeyId" => {
                    self.kms_master_key_id = if value.is_empty() {
                        None
                    } else {
                        Some(value.clone())
                    };
                }
                _ => {
                    return Err(SqsError::InvalidAttributeName(format!(
                        "Unknown Attribute {key}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: String,
    pub body: String,
    pub md5_of_body: String,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
    pub md5_of_message_attributes: Option<String>,
    pub sent_timestamp: u64,
    pub delay_until: Option<Instant>,
    pub retain_until: Instant,
    pub receive_count: u32,
    pub first_receive_timestamp: Option<u64>,
    pub group_id: Option<String>,
    pub dedup_id: Option<String>,
    pub sequence_number: Option<String>,
    pub source_arn: Option<String>,
    pub trace_header: Option<String>,
}

/// A message handed to a consumer and not yet deleted or expired.
#[derive(Debug)]
pub struct InflightEntry {
    pub message: Message,
    pub deadline: Instant,
    pub received_at: Instant,
}

#[derive(Debug)]
struct DedupEntry {
    message_id: String,
    sequence_number: Option<String>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct FifoState {
    dedup: HashMap<String, DedupEntry>,
    locked_groups: HashSet<String>,
    sequence: u64,
}

impl FifoState {
    pub fn is_locked(&self, group: &str) -> bool {
        self.locked_groups.contains(group)
    }
}

/// What a queue asks the store to do after a receive pass: move the message
/// to the queue behind `target_arn` without returning it to the caller.
#[derive(Debug)]
pub struct DlqMove {
    pub target_arn: String,
    pub message: Message,
}

/// A message dequeued for a consumer, with its freshly minted receipt.
#[derive(Debug)]
pub struct Delivery {
    pub receipt_handle: String,
    pub message: Message,
}

pub struct SendInput {
    pub body: String,
    pub delay_seconds: Option<i32>,
    pub attributes: HashMap<String, MessageAttributeValue>,
    pub deduplication_id: Option<String>,
    pub group_id: Option<String>,
    pub trace_header: Option<String>,
    /// Preserved identity when the engine moves a message between queues.
    pub message_id: Option<String>,
    pub source_arn: Option<String>,
}

impl SendInput {
    pub fn body_only(body: impl Into<String>) -> Self {
        SendInput {
            body: body.into(),
            delay_seconds: None,
            attributes: HashMap::new(),
            deduplication_id: None,
            group_id: None,
            trace_header: None,
            message_id: None,
            source_arn: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message_id: String,
    pub md5_of_body: String,
    pub md5_of_attributes: Option<String>,
    pub sequence_number: Option<String>,
    /// False when FIFO dedup suppressed the send; nothing new exists and
    /// long-poll waiters must not be woken.
    pub inserted: bool,
}

pub struct Queue {
    pub name: String,
    pub arn: String,
    pub url: String,
    pub attributes: QueueAttributes,
    pub tags: HashMap<String, String>,
    pub ready: VecDeque<Message>,
    pub delayed: VecDeque<Message>,
    pub inflight: HashMap<String, InflightEntry>,
    pub fifo: Option<FifoState>,
    pub created_at: u64,
    pub last_modified: u64,
}

impl Queue {
    pub fn new(name: String, arn: String, url: String, attributes: QueueAttributes) -> Self {
        let now = now_secs();
        let fifo = attributes.fifo_queue.then(FifoState::default);
        Queue {
            name,
            arn,
            url,
            attributes,
            tags: HashMap::new(),
            ready: VecDeque::new(),
            delayed: VecDeque::new(),
            inflight: HashMap::new(),
            fifo,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn send(&mut self, input: SendInput, now: Instant) -> Result<SendOutcome, SqsError> {
        if input.body.is_empty() {
            return Err(SqsError::InvalidParameterValue(
                "The message body must not be empty".into(),
            ));
        }
        if let Some(bad) = input.body.chars().find(|c| !valid_message_char(*c)) {
            return Err(SqsError::InvalidMessageContents(format!(
                "Invalid character U+{:04X} in the message body",
                bad as u32
            )));
        }
        let size = wire_size(&input.body, &input.attributes);
        if size > self.attributes.maximum_message_size as usize {
            return Err(SqsError::InvalidParameterValue(format!(
                "One or more parameters are invalid. Reason: Message must be shorter than {} bytes.",
                self.attributes.maximum_message_size
            )));
        }
        if let Some(delay) = input.delay_seconds {
            if !(0..=900).contains(&delay) {
                return Err(SqsError::InvalidParameterValue(
                    "Invalid value for the parameter DelaySeconds".into(),
                ));
            }
            if self.attributes.fifo_queue {
                return Err(SqsError::InvalidParameterValue(
                    "DelaySeconds is not supported for messages in FIFO queues; set it on the queue instead".into(),
                ));
            }
        }

        let dedup_key = if self.attributes.fifo_queue {
            if input.group_id.is_none() {
                return Err(SqsError::MissingParameter(
                    "The request must contain the parameter MessageGroupId.".into(),
                ));
            }
            match input.deduplication_id.clone() {
                Some(id) => Some(id),
                None if self.attributes.content_based_deduplication => {
                    Some(sha256_hex(input.body.as_bytes()))
                }
                None => {
                    return Err(SqsError::InvalidParameterValue(
                        "The queue should either have ContentBasedDeduplication enabled or MessageDeduplicationId provided explicitly".into(),
                    ));
                }
            }
        } else {
            if input.deduplication_id.is_some() {
                return Err(SqsError::InvalidParameterValue(
                    "MessageDeduplicationId is supported only for FIFO queues".into(),
                ));
            }
            None
        };

        if let (Some(fifo), Some(key)) = (&mut self.fifo, &dedup_key) {
            fifo.dedup.retain(|_, e| e.expires_at > now);
            if let Some(hit) = fifo.dedup.get(key) {
                return Ok(SendOutcome {
                    message_id: hit.message_id.clone(),
                    md5_of_body: md5_hex(input.body.as_bytes()),
                    md5_of_attributes: compute_md5_of_attributes(&input.attributes),
                    sequence_number: hit.sequence_number.clone(),
                    inserted: false,
                });
            }
        }

        let delay = input
            .delay_seconds
            .map(|d| d as u64)
            .unwrap_or(self.attributes.delay_seconds as u64);
        let sequence_number = self.fifo.as_mut().map(|f| {
            f.sequence += 1;
            format!("{:020}", f.sequence)
        });

        let message_id = input
            .message_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let md5_of_body = md5_hex(input.body.as_bytes());
        let md5_of_attributes = compute_md5_of_attributes(&input.attributes);

        let msg = Message {
            message_id: message_id.clone(),
            body: input.body,
            md5_of_body: md5_of_body.clone(),
            message_attributes: input.attributes,
            md5_of_message_attributes: md5_of_attributes.clone(),
            sent_timestamp: now_millis(),
            delay_until: (delay > 0).then(|| now + Duration::from_secs(delay)),
            retain_until: now
                + Duration::from_secs(self.attributes.message_retention_period as u64),
            receive_count: 0,
            first_receive_timestamp: None,
            group_id: input.group_id,
            dedup_id: dedup_key.clone(),
            sequence_number: sequence_number.clone(),
            source_arn: input.source_arn,
            trace_header: input.trace_header,
        };

        if msg.delay_until.is_some() {
            self.delayed.push_back(msg);
        } else {
            self.ready.push_back(msg);
        }

        if let (Some(fifo), Some(key)) = (&mut self.fifo, dedup_key) {
            fifo.dedup.insert(
                key,
                DedupEntry {
                    message_id: message_id.clone(),
                    sequence_number: sequence_number.clone(),
                    expires_at: now + DEDUP_WINDOW,
                },
            );
        }

        Ok(SendOutcome {
            message_id,
            md5_of_body,
            md5_of_attributes,
            sequence_number,
            inserted: true,
        })
    }

    /// One pass of the timer routine over this queue: promote due delayed
    /// messages, re-release expired in-flight entries, drop messages past
    /// retention and prune the dedup window.
    pub fn sweep(&mut self, now: Instant) {
        if self.delayed.iter().any(|m| m.delay_until.is_some_and(|d| d <= now)) {
            let mut still_delayed = VecDeque::with_capacity(self.delayed.len());
            for mut msg in std::mem::take(&mut self.delayed) {
                if msg.delay_until.is_some_and(|d| d <= now) {
                    msg.delay_until = None;
                    self.ready.push_back(msg);
                } else {
                    still_delayed.push_back(msg);
                }
            }
            self.delayed = still_delayed;
        }

        let expired: Vec<String> = self
            .inflight
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in expired {
            if let Some(entry) = self.inflight.remove(&handle) {
                self.release(entry.message);
            }
        }

        self.ready.retain(|m| m.retain_until > now);
        self.delayed.retain(|m| m.retain_until > now);
        if let Some(fifo) = &mut self.fifo {
            fifo.dedup.retain(|_, e| e.expires_at > now);
        }
    }

    /// Returns an expired or re-released in-flight message to the queue. A
    /// FIFO message goes back to the front so its group's order holds.
    fn release(&mut self, message: Message) {
        if let Some(fifo) = &mut self.fifo {
            if let Some(gid) = &message.group_id {
                fifo.locked_groups.remove(gid);
            }
            self.ready.push_front(message);
        } else {
            self.ready.push_back(message);
        }
    }

    pub fn receive(
        &mut self,
        max: usize,
        visibility: Duration,
        now: Instant,
    ) -> (Vec<Delivery>, Vec<DlqMove>) {
        let mut deliveries = Vec::new();
        let mut moves = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.ready.len());
        let mut seen_groups: HashSet<String> = HashSet::new();

        for mut msg in std::mem::take(&mut self.ready) {
            let group_blocked = match (&self.fifo, &msg.group_id) {
                (Some(fifo), Some(gid)) => {
                    fifo.is_locked(gid) || seen_groups.contains(gid.as_str())
                }
                _ => false,
            };
            if deliveries.len() >= max || group_blocked {
                remaining.push_back(msg);
                continue;
            }

            msg.receive_count += 1;

            if let Some(rp) = &self.attributes.redrive_policy {
                if msg.receive_count > rp.max_receive_count {
                    msg.source_arn = Some(self.arn.clone());
                    moves.push(DlqMove {
                        target_arn: rp.dead_letter_target_arn.clone(),
                        message: msg,
                    });
                    continue;
                }
            }

            if msg.first_receive_timestamp.is_none() {
                msg.first_receive_timestamp = Some(now_millis());
            }
            if let (Some(fifo), Some(gid)) = (&mut self.fifo, &msg.group_id) {
                fifo.locked_groups.insert(gid.clone());
                seen_groups.insert(gid.clone());
            }

            let receipt_handle = Uuid::new_v4().to_string();
            deliveries.push(Delivery {
                receipt_handle: receipt_handle.clone(),
                message: msg.clone(),
            });
            self.inflight.insert(
                receipt_handle,
                InflightEntry {
                    message: msg,
                    deadline: now + visibility,
                    received_at: now,
                },
            );
        }

        self.ready = remaining;
        (deliveries, moves)
    }

    /// Removes an in-flight entry. Unknown or stale handles are a no-op.
    /// Returns true when the deletion unlocked a FIFO group that still has
    /// queued messages, i.e. the queue became receivable.
    pub fn delete_inflight(&mut self, receipt_handle: &str) -> bool {
        let Some(entry) = self.inflight.remove(receipt_handle) else {
            return false;
        };
        let Some(gid) = entry.message.group_id else {
            return false;
        };
        if let Some(fifo) = &mut self.fifo {
            fifo.locked_groups.remove(&gid);
            return self
                .ready
                .iter()
                .any(|m| m.group_id.as_deref() == Some(gid.as_str()));
        }
        false
    }

    /// Returns true when the change made a message immediately receivable.
    pub fn change_visibility(
        &mut self,
        receipt_handle: &str,
        timeout: u32,
        now: Instant,
    ) -> Result<bool, SqsError> {
        if !self.inflight.contains_key(receipt_handle) {
            return Err(SqsError::ReceiptHandleIsInvalid(
                "Message does not exist or is not available for visibility timeout change".into(),
            ));
        }
        if timeout == 0 {
            let entry = self.inflight.remove(receipt_handle).unwrap();
            self.release(entry.message);
            Ok(self.has_available())
        } else {
            let entry = self.inflight.get_mut(receipt_handle).unwrap();
            entry.deadline = now + Duration::from_secs(timeout as u64);
            Ok(false)
        }
    }

    /// Drops every message and all per-queue dedup state; configuration and
    /// tags survive.
    pub fn purge(&mut self) {
        self.ready.clear();
        self.delayed.clear();
        self.inflight.clear();
        if let Some(fifo) = &mut self.fifo {
            fifo.dedup.clear();
            fifo.locked_groups.clear();
        }
    }

    /// Whether a receive call right now would return at least one message.
    /// For FIFO queues, messages of locked groups do not count.
    pub fn has_available(&self) -> bool {
        match &self.fifo {
            Some(fifo) => self
                .ready
                .iter()
                .any(|m| m.group_id.as_deref().is_none_or(|g| !fifo.is_locked(g))),
            None => !self.ready.is_empty(),
        }
    }

    pub fn get_attributes(&self, names: &Option<Vec<String>>) -> HashMap<String, String> {
        let all = match names {
            None => true,
            Some(names) => names.is_empty() || names.iter().any(|n| n == "All"),
        };
        let include = |attr_name: &str| -> bool {
            all || names
                .as_ref()
                .map(|n| n.iter().any(|x| x == attr_name))
                .unwrap_or(false)
        };

        let mut result = HashMap::new();
        for (key, value) in self.attributes.to_map() {
            if include(&key) {
                result.insert(key, value);
            }
        }
        if include("QueueArn") {
            result.insert("QueueArn".into(), self.arn.clone());
        }
        if include("CreatedTimestamp") {
            result.insert("CreatedTimestamp".into(), self.created_at.to_string());
        }
        if include("LastModifiedTimestamp") {
            result.insert("LastModifiedTimestamp".into(), self.last_modified.to_string());
        }
        if include("ApproximateNumberOfMessages") {
            result.insert(
                "ApproximateNumberOfMessages".into(),
                self.ready.len().to_string(),
            );
        }
        if include("ApproximateNumberOfMessagesNotVisible") {
            result.insert(
                "ApproximateNumberOfMessagesNotVisible".into(),
                self.inflight.len().to_string(),
            );
        }
        if include("ApproximateNumberOfMessagesDelayed") {
            result.insert(
                "ApproximateNumberOfMessagesDelayed".into(),
                self.delayed.len().to_string(),
            );
        }
        result
    }

    pub fn set_attributes(&mut self, attrs: &HashMap<String, String>) -> Result<(), SqsError> {
        if attrs.contains_key("FifoQueue") {
            return Err(SqsError::InvalidAttributeName(
                "FifoQueue cannot be changed after creation".into(),
            ));
        }
        self.attributes.apply(attrs)?;
        self.last_modified = now_secs();
        Ok(())
    }
}
