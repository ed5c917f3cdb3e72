//! Local publish/subscribe bus used by in-cluster services.
//!
//! The bridge is a client of the bus: it holds one wildcard subscription for
//! outbound traffic and publishes inbound traffic. `LocalBus` is an
//! in-process implementation for embedding and tests.

pub mod local;

pub use local::{subject_matches, LocalBus};

use async_trait::async_trait;
use tokio::sync::mpsc;
use vzconn_core::VzResult;

/// A message delivered on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub data: Vec<u8>,
}

/// Pub/sub bus client.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Subscribe to a subject pattern (`*` matches one token, `>` the rest).
    async fn subscribe(&self, pattern: &str) -> VzResult<Subscription>;

    /// Publish `data` on `subject`.
    async fn publish(&self, subject: &str, data: Vec<u8>) -> VzResult<()>;
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    pattern: String,
    rx: mpsc::Receiver<BusMessage>,
    on_unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a delivery channel. `on_unsubscribe` runs exactly once, on
    /// `unsubscribe` or drop, whichever comes first.
    pub fn new(
        pattern: impl Into<String>,
        rx: mpsc::Receiver<BusMessage>,
        on_unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            rx,
            on_unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next message in delivery order. `None` once the bus drops the
    /// subscription.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Release the subscription.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(f) = self.on_unsubscribe.take() {
            f();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .field("active", &self.on_unsubscribe.is_some())
            .finish()
    }
}
