//! Redis Streams-backed channel transport (durable, at-least-once delivery).
//!
//! One stream per category (`aurum:events:business-events`, ...), each with
//! its own consumer group and dead-letter stream. Messages persist in the
//! pending entries list until acknowledged; a consumer acks only after its
//! effects are persisted, so a crash between fetch and ack redelivers.
//!
//! ## Key layout
//!
//! - **Stream**: `aurum:events:<category>` (XADD on publish)
//! - **Consumer group**: one per deployment, named in [`RedisStreamsConfig`]
//! - **Dead-letter stream**: `aurum:events:<category>:dlq`
//!
//! Fetch reads stale pending entries first (XPENDING then XCLAIM, so another
//! consumer's abandoned deliveries are picked up), then new entries via
//! XREADGROUP. The delivery tag encodes `<category>/<stream entry id>`, which
//! is what XACK needs to settle the entry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{instrument, warn};

use aurum_audit::EventCategory;

use super::dead_letter::DeadLetterSink;
use super::message::{ChannelMessage, ChannelPublisher, TransportError};
use super::transport::{Acknowledger, Delivery};

const STREAM_PREFIX: &str = "aurum:events";

/// Pending entries idle longer than this are claimed for redelivery.
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60_000;

/// Consumer-group identity and redelivery tuning.
#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    /// Consumer group name, shared by every worker of one deployment.
    pub group: String,
    /// Consumer name, unique within the group.
    pub consumer: String,
    /// Minimum idle time (ms) before a pending entry is claimed.
    pub pending_timeout_ms: u64,
}

impl Default for RedisStreamsConfig {
    fn default() -> Self {
        Self {
            group: "audit-consumers".to_string(),
            consumer: format!("consumer-{}", uuid::Uuid::now_v7()),
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        }
    }
}

/// Channel transport on Redis Streams.
#[derive(Debug, Clone)]
pub struct RedisStreamsChannelTransport {
    client: Arc<redis::Client>,
    config: RedisStreamsConfig,
}

impl RedisStreamsChannelTransport {
    pub fn connect(
        redis_url: impl AsRef<str>,
        config: RedisStreamsConfig,
    ) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    /// Stream key for one category.
    pub fn stream_key(category: EventCategory) -> String {
        format!("{STREAM_PREFIX}:{}", category.as_str())
    }

    /// Dead-letter stream key for one category.
    pub fn dead_letter_key(category: EventCategory) -> String {
        format!("{STREAM_PREFIX}:{}:dlq", category.as_str())
    }

    /// Create the consumer group on every category stream (idempotent).
    pub fn ensure_groups(&self) -> Result<(), TransportError> {
        let mut conn = self.connection()?;

        for category in EventCategory::all() {
            // MKSTREAM creates the stream if missing; an existing group is
            // fine, so the BUSYGROUP error is ignored.
            let _: Result<String, _> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(Self::stream_key(category))
                .arg(&self.config.group)
                .arg("0")
                .arg("MKSTREAM")
                .query(&mut conn);
        }

        Ok(())
    }

    /// Fetch up to `count` deliveries from one category stream.
    ///
    /// Stale pending entries (idle past the configured timeout) come first
    /// with their bumped attempt counts; when there are none, blocks up to
    /// `block_ms` for new entries.
    #[instrument(skip(self), fields(category = %category, group = %self.config.group), err)]
    pub fn fetch(
        &self,
        category: EventCategory,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<Delivery>, TransportError> {
        let mut conn = self.connection()?;

        let pending = self.claim_pending(&mut conn, category, count)?;
        if !pending.is_empty() {
            return Ok(pending);
        }

        self.read_new(&mut conn, category, count, block_ms)
    }

    fn connection(&self) -> Result<redis::Connection, TransportError> {
        self.client
            .get_connection()
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    /// Claim entries another consumer fetched but never acked.
    fn claim_pending(
        &self,
        conn: &mut redis::Connection,
        category: EventCategory,
        count: usize,
    ) -> Result<Vec<Delivery>, TransportError> {
        let stream_key = Self::stream_key(category);

        // XPENDING summary: (entry id, consumer, idle ms, delivery count).
        let pending: Vec<(String, String, u64, u64)> = match redis::cmd("XPENDING")
            .arg(&stream_key)
            .arg(&self.config.group)
            .arg("-")
            .arg("+")
            .arg(count.to_string())
            .query(conn)
        {
            Ok(entries) => entries,
            Err(_) => return Ok(vec![]),
        };

        if pending.is_empty() {
            return Ok(vec![]);
        }

        // XCLAIM bumps the delivery counter, so the claimed attempt is one
        // past what XPENDING reported.
        let attempts: HashMap<String, u32> = pending
            .iter()
            .map(|(id, _, _, delivered)| (id.clone(), delivered.saturating_add(1) as u32))
            .collect();
        let ids: Vec<String> = pending.into_iter().map(|(id, _, _, _)| id).collect();

        let claimed: Vec<redis::Value> = match redis::cmd("XCLAIM")
            .arg(&stream_key)
            .arg(&self.config.group)
            .arg(&self.config.consumer)
            .arg(self.config.pending_timeout_ms.to_string())
            .arg(&ids[..])
            .query(conn)
        {
            Ok(entries) => entries,
            Err(_) => return Ok(vec![]),
        };

        Ok(self.parse_entries(category, claimed, &attempts))
    }

    /// Read entries never delivered to this group.
    fn read_new(
        &self,
        conn: &mut redis::Connection,
        category: EventCategory,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<Delivery>, TransportError> {
        let stream_key = Self::stream_key(category);

        let result: redis::RedisResult<HashMap<String, Vec<redis::Value>>> =
            redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.config.group)
                .arg(&self.config.consumer)
                .arg("COUNT")
                .arg(count.to_string())
                .arg("BLOCK")
                .arg(block_ms.to_string())
                .arg("STREAMS")
                .arg(&stream_key)
                .arg(">")
                .query(conn);

        let stream_data = match result {
            Ok(data) => data,
            // A nil reply (blocking timeout, nothing new) surfaces as a type
            // error in redis-rs; it is not a failure.
            Err(e) if e.kind() == redis::ErrorKind::TypeError => return Ok(vec![]),
            Err(e) => {
                return Err(TransportError::Command(format!("XREADGROUP failed: {e}")));
            }
        };

        let entries = stream_data.get(&stream_key).cloned().unwrap_or_default();
        Ok(self.parse_entries(category, entries, &HashMap::new()))
    }

    fn parse_entries(
        &self,
        category: EventCategory,
        entries: Vec<redis::Value>,
        attempts: &HashMap<String, u32>,
    ) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for entry in entries {
            match parse_stream_entry(category, entry) {
                Ok((entry_id, message)) => {
                    let attempt = attempts.get(&entry_id).copied().unwrap_or(1);
                    deliveries.push(Delivery {
                        delivery_tag: encode_tag(category, &entry_id),
                        attempt,
                        message,
                    });
                }
                Err(reason) => {
                    warn!(category = %category, reason, "skipping undecodable stream entry");
                }
            }
        }
        deliveries
    }
}

impl ChannelPublisher for RedisStreamsChannelTransport {
    #[instrument(
        skip(self, message),
        fields(
            category = %category,
            event_id = %message.envelope.event_id(),
            high_priority = message.high_priority
        ),
        err
    )]
    fn send(&self, category: EventCategory, message: ChannelMessage) -> Result<(), TransportError> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let mut conn = self.connection()?;

        let _: String = redis::cmd("XADD")
            .arg(Self::stream_key(category))
            .arg("*")
            .arg("event_id")
            .arg(message.envelope.event_id().to_string())
            .arg("aggregate_id")
            .arg(message.envelope.aggregate_id().as_str())
            .arg("event_type")
            .arg(message.envelope.event_type())
            .arg("high_priority")
            .arg(if message.high_priority { "1" } else { "0" })
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| TransportError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }
}

impl Acknowledger for RedisStreamsChannelTransport {
    fn ack(&self, delivery_tag: &str) -> Result<(), TransportError> {
        let Some((category, entry_id)) = decode_tag(delivery_tag) else {
            // Tags from another transport are not ours to settle.
            return Ok(());
        };

        let mut conn = self.connection()?;

        let _: u64 = redis::cmd("XACK")
            .arg(Self::stream_key(category))
            .arg(&self.config.group)
            .arg(entry_id)
            .query(&mut conn)
            .map_err(|e| TransportError::Command(format!("XACK failed: {e}")))?;

        Ok(())
    }
}

impl DeadLetterSink for RedisStreamsChannelTransport {
    /// Park a message on the category's dead-letter stream.
    ///
    /// Push is infallible by contract; broker failures here are logged and
    /// absorbed, the stored event remains the recovery point.
    fn push(&self, message: ChannelMessage, reason: &str, attempt: u32) {
        let category = message.category;
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(category = %category, error = %e, "dead-letter payload unserializable");
                return;
            }
        };

        let result: Result<(), TransportError> = (|| {
            let mut conn = self.connection()?;
            let _: String = redis::cmd("XADD")
                .arg(Self::dead_letter_key(category))
                .arg("*")
                .arg("event_id")
                .arg(message.envelope.event_id().to_string())
                .arg("reason")
                .arg(reason)
                .arg("attempt")
                .arg(attempt.to_string())
                .arg("failed_at")
                .arg(chrono::Utc::now().to_rfc3339())
                .arg("payload")
                .arg(&payload)
                .query(&mut conn)
                .map_err(|e| TransportError::Command(format!("DLQ XADD failed: {e}")))?;
            Ok(())
        })();

        match result {
            Ok(()) => warn!(
                category = %category,
                event_id = %message.envelope.event_id(),
                attempt,
                reason,
                "message dead-lettered to Redis"
            ),
            Err(e) => warn!(
                category = %category,
                event_id = %message.envelope.event_id(),
                error = %e,
                "failed to dead-letter message"
            ),
        }
    }
}

fn encode_tag(category: EventCategory, entry_id: &str) -> String {
    format!("{}/{entry_id}", category.as_str())
}

fn decode_tag(delivery_tag: &str) -> Option<(EventCategory, &str)> {
    let (name, entry_id) = delivery_tag.split_once('/')?;
    let category = EventCategory::all()
        .into_iter()
        .find(|c| c.as_str() == name)?;
    Some((category, entry_id))
}

/// Parse one `[entry id, [field, value, ...]]` stream entry.
fn parse_stream_entry(
    category: EventCategory,
    entry: redis::Value,
) -> Result<(String, ChannelMessage), String> {
    let redis::Value::Bulk(parts) = entry else {
        return Err("entry is not an array".to_string());
    };
    if parts.len() < 2 {
        return Err("entry has no field list".to_string());
    }

    let entry_id = match &parts[0] {
        redis::Value::Data(data) => String::from_utf8_lossy(data).to_string(),
        _ => return Err("entry id is not a string".to_string()),
    };

    let redis::Value::Bulk(fields) = &parts[1] else {
        return Err("field list is not an array".to_string());
    };

    let mut payload = None;
    for pair in fields.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = pair {
            if key.as_slice() == b"payload" {
                payload = Some(String::from_utf8_lossy(value).to_string());
            }
        }
    }

    let payload = payload.ok_or_else(|| "entry has no payload field".to_string())?;
    let message: ChannelMessage = serde_json::from_str(&payload)
        .map_err(|e| format!("payload does not decode: {e}"))?;

    if message.category != category {
        return Err(format!(
            "message for {} arrived on {}",
            message.category, category
        ));
    }

    Ok((entry_id, message))
}
