//! Message spy: an optional ring buffer of engine events that tests can
//! inspect or block on. Disabled unless `--message-spies` is set.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;

pub const DEFAULT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SpyEvent {
    QueuePublished {
        region: String,
        queue: String,
        message_id: String,
        body: String,
    },
    QueueConsumed {
        region: String,
        queue: String,
        message_id: String,
        receive_count: u32,
    },
    DeadLettered {
        region: String,
        source_queue: String,
        target_queue: String,
        message_id: String,
    },
    SnsPublished {
        region: String,
        topic: String,
        message_id: String,
    },
    SnsDelivered {
        region: String,
        topic: String,
        protocol: String,
        endpoint: String,
        message_id: String,
    },
    S3ObjectPut {
        region: String,
        bucket: String,
        key: String,
        etag: String,
    },
    S3ObjectDeleted {
        region: String,
        bucket: String,
        key: String,
    },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SpyError {
    #[error("spy buffer was cleared while waiting")]
    Cleared,
    #[error("timed out waiting for a matching event")]
    Timeout,
}

type Predicate = Box<dyn Fn(&SpyEvent) -> bool + Send>;

struct Waiter {
    predicate: Predicate,
    tx: oneshot::Sender<Result<SpyEvent, SpyError>>,
}

struct SpyInner {
    events: VecDeque<SpyEvent>,
    waiters: Vec<Waiter>,
}

/// Bounded event log. When the buffer is full the oldest event is evicted;
/// eviction never disturbs pending waiters, only `clear` does.
pub struct MessageSpy {
    inner: Mutex<SpyInner>,
    capacity: usize,
}

impl MessageSpy {
    pub fn new(capacity: usize) -> Self {
        MessageSpy {
            inner: Mutex::new(SpyInner {
                events: VecDeque::with_capacity(capacity),
                waiters: Vec::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, event: SpyEvent) {
        let mut inner = self.inner.lock().unwrap();
        if inner.events.len() >= self.capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(event.clone());

        let mut i = 0;
        while i < inner.waiters.len() {
            if (inner.waiters[i].predicate)(&event) {
                let waiter = inner.waiters.swap_remove(i);
                let _ = waiter.tx.send(Ok(event.clone()));
            } else {
                i += 1;
            }
        }
    }

    pub fn events(&self) -> Vec<SpyEvent> {
        self.inner.lock().unwrap().events.iter().cloned().collect()
    }

    /// Drops all buffered events and fails every pending waiter.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.events.clear();
        for waiter in inner.waiters.drain(..) {
            let _ = waiter.tx.send(Err(SpyError::Cleared));
        }
    }

    /// Resolves with the first event (buffered or future) matching the
    /// predicate, or fails after `timeout` / on `clear`.
    pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Result<SpyEvent, SpyError>
    where
        F: Fn(&SpyEvent) -> bool + Send + 'static,
    {
        let rx = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(hit) = inner.events.iter().find(|e| predicate(e)) {
                return Ok(hit.clone());
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push(Waiter {
                predicate: Box::new(predicate),
                tx,
            });
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SpyError::Cleared),
            Err(_) => Err(SpyError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_event(key: &str) -> SpyEvent {
        SpyEvent::S3ObjectPut {
            region: "us-east-1".into(),
            bucket: "b".into(),
            key: key.into(),
            etag: "\"0\"".into(),
        }
    }

    #[test]
    fn ring_evicts_oldest() {
        let spy = MessageSpy::new(2);
        spy.record(put_event("a"));
        spy.record(put_event("b"));
        spy.record(put_event("c"));
        let keys: Vec<_> = spy
            .events()
            .into_iter()
            .map(|e| match e {
                SpyEvent::S3ObjectPut { key, .. } => key,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, ["b", "c"]);
    }

    #[tokio::test]
    async fn wait_sees_buffered_event() {
        let spy = MessageSpy::new(8);
        spy.record(put_event("x"));
        let hit = spy
            .wait_for(
                |e| matches!(e, SpyEvent::S3ObjectPut { key, .. } if key == "x"),
                Duration::from_millis(10),
            )
            .await
            .unwrap();
        assert!(matches!(hit, SpyEvent::S3ObjectPut { .. }));
    }

    #[tokio::test]
    async fn wait_resolves_on_future_event() {
        let spy = std::sync::Arc::new(MessageSpy::new(8));
        let spy2 = spy.clone();
        let task = tokio::spawn(async move {
            spy2.wait_for(
                |e| matches!(e, SpyEvent::S3ObjectPut { key, .. } if key == "later"),
                Duration::from_secs(2),
            )
            .await
        });
        tokio::task::yield_now().await;
        spy.record(put_event("later"));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn clear_rejects_pending_waiters_but_eviction_does_not() {
        let spy = std::sync::Arc::new(MessageSpy::new(1));
        let spy2 = spy.clone();
        let task = tokio::spawn(async move {
            spy2.wait_for(
                |e| matches!(e, SpyEvent::S3ObjectPut { key, .. } if key == "never"),
                Duration::from_secs(2),
            )
            .await
        });
        tokio::task::yield_now().await;
        // Overflow the one-slot ring; the waiter must survive.
        spy.record(put_event("a"));
        spy.record(put_event("b"));
        spy.clear();
        assert_eq!(task.await.unwrap(), Err(SpyError::Cleared));
    }

    #[tokio::test]
    async fn wait_times_out() {
        let spy = MessageSpy::new(8);
        let err = spy
            .wait_for(|_| false, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, SpyError::Timeout);
    }
}
