//! In-process bus with NATS-style subject wildcards.
//!
//! Each subscriber gets a bounded queue; publishing waits for room, so a slow
//! subscriber applies backpressure instead of losing messages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use vzconn_core::{VzError, VzResult};

use super::{BusMessage, MessageBus, Subscription};

/// Default per-subscriber queue depth.
const DEFAULT_CAPACITY: usize = 1024;

struct LocalSub {
    pattern: String,
    tx: mpsc::Sender<BusMessage>,
}

struct Inner {
    subs: Mutex<HashMap<u64, LocalSub>>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
}

impl Inner {
    fn subs(&self) -> MutexGuard<'_, HashMap<u64, LocalSub>> {
        self.subs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process message bus. Cloning shares the same bus.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of live subscriptions whose pattern is exactly `pattern`.
    pub fn subscriber_count(&self, pattern: &str) -> usize {
        self.inner
            .subs()
            .values()
            .filter(|s| s.pattern == pattern)
            .count()
    }

    /// Shut the bus down. Every subscription ends and further calls fail.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let removed = std::mem::take(&mut *self.inner.subs());
        debug!(count = removed.len(), "local bus closed");
    }

    fn ensure_open(&self) -> VzResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(VzError::Bus("bus closed".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn subscribe(&self, pattern: &str) -> VzResult<Subscription> {
        self.ensure_open()?;
        if pattern.is_empty() {
            return Err(VzError::Bus("empty subscription pattern".into()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.subs().insert(
            id,
            LocalSub {
                pattern: pattern.to_string(),
                tx,
            },
        );
        debug!(id, pattern, "bus subscription added");

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(pattern, rx, move || {
            if let Some(inner) = inner.upgrade() {
                if inner.subs().remove(&id).is_some() {
                    debug!(id, "bus subscription removed");
                }
            }
        }))
    }

    async fn publish(&self, subject: &str, data: Vec<u8>) -> VzResult<()> {
        self.ensure_open()?;
        if subject.is_empty() || subject.contains(['*', '>']) {
            return Err(VzError::Bus(format!("invalid publish subject: {subject:?}")));
        }

        // Clone the senders out so no lock is held across the awaits below.
        let targets: Vec<mpsc::Sender<BusMessage>> = self
            .inner
            .subs()
            .values()
            .filter(|s| subject_matches(&s.pattern, subject))
            .map(|s| s.tx.clone())
            .collect();

        trace!(subject, subscribers = targets.len(), "bus publish");

        let msg = BusMessage {
            subject: subject.to_string(),
            data,
        };
        for tx in targets {
            // A receiver that went away between lookup and send just misses it.
            let _ = tx.send(msg.clone()).await;
        }
        Ok(())
    }
}

/// Whether `subject` matches `pattern`.
///
/// Tokens are separated by `.`; `*` matches exactly one token and a trailing
/// `>` matches one or more tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');
    loop {
        match (pat.next(), sub.next()) {
            (Some(">"), Some(_)) => return pat.next().is_none(),
            (Some("*"), Some(s)) if !s.is_empty() => {}
            (Some(p), Some(s)) if p == s && !s.is_empty() => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn wildcard_matching() {
        assert!(subject_matches("v2c.*", "v2c.randomtopic"));
        assert!(!subject_matches("v2c.*", "v2c.a.b"));
        assert!(!subject_matches("v2c.*", "v2c"));
        assert!(!subject_matches("v2c.*", "c2v.randomtopic"));
        assert!(subject_matches("v2c.>", "v2c.a.b"));
        assert!(!subject_matches("v2c.>", "v2c"));
        assert!(subject_matches("c2v.ack", "c2v.ack"));
        assert!(!subject_matches("c2v.ack", "c2v.acks"));
        assert!(!subject_matches("v2c.*", "v2c."));
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscribers_in_order() {
        let bus = LocalBus::new();
        let mut wide = bus.subscribe("v2c.*").await.unwrap();
        let mut narrow = bus.subscribe("v2c.logs").await.unwrap();

        bus.publish("v2c.logs", b"one".to_vec()).await.unwrap();
        bus.publish("v2c.metrics", b"two".to_vec()).await.unwrap();
        bus.publish("c2v.logs", b"ignored".to_vec()).await.unwrap();

        assert_eq!(wide.next().await.unwrap().data, b"one");
        let second = wide.next().await.unwrap();
        assert_eq!(second.subject, "v2c.metrics");
        assert_eq!(second.data, b"two");

        assert_eq!(narrow.next().await.unwrap().data, b"one");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), narrow.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn unsubscribe_and_drop_release() {
        let bus = LocalBus::new();
        let a = bus.subscribe("v2c.*").await.unwrap();
        let b = bus.subscribe("v2c.*").await.unwrap();
        assert_eq!(bus.subscriber_count("v2c.*"), 2);

        a.unsubscribe();
        assert_eq!(bus.subscriber_count("v2c.*"), 1);

        drop(b);
        assert_eq!(bus.subscriber_count("v2c.*"), 0);

        // Publishing with no subscribers is fine.
        bus.publish("v2c.x", vec![1]).await.unwrap();
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("v2c.*").await.unwrap();
        bus.close();
        assert!(sub.next().await.is_none());
        assert!(matches!(bus.publish("v2c.x", vec![]).await, Err(VzError::Bus(_))));
        assert!(bus.subscribe("v2c.*").await.is_err());
    }

    #[tokio::test]
    async fn rejects_wildcard_publish() {
        let bus = LocalBus::new();
        assert!(bus.publish("v2c.*", vec![]).await.is_err());
        assert!(bus.publish("", vec![]).await.is_err());
    }
}
