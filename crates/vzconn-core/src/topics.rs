//! Reserved bridge topics and subject helpers.

/// Registration handshake, sent by the bridge as the first envelope.
pub const REGISTER: &str = "register";

/// Registration acknowledgment from the cloud. Consumed, never republished.
pub const REGISTER_ACK: &str = "registerAck";

/// Periodic cluster heartbeat.
pub const HEARTBEAT: &str = "heartbeat";

/// Default subject prefix for cluster-to-cloud traffic on the local bus.
pub const DEFAULT_OUTBOUND_PREFIX: &str = "v2c";

/// Default subject prefix for cloud-to-cluster traffic on the local bus.
pub const DEFAULT_INBOUND_PREFIX: &str = "c2v";

/// Whether `topic` is bridge control traffic rather than application traffic.
///
/// Anything tallying relayed application messages must skip these.
pub fn is_control(topic: &str) -> bool {
    matches!(topic, REGISTER | REGISTER_ACK | HEARTBEAT)
}

/// Build a bus subject `<prefix>.<topic>`.
pub fn subject(prefix: &str, topic: &str) -> String {
    format!("{prefix}.{topic}")
}

/// Wildcard matching every single-token topic under `prefix`.
pub fn wildcard(prefix: &str) -> String {
    format!("{prefix}.*")
}

/// Strip `<prefix>.` from a subject, returning the topic.
///
/// Returns `None` for subjects outside the prefix or with an empty topic.
pub fn topic_of<'a>(prefix: &str, subject: &'a str) -> Option<&'a str> {
    let rest = subject.strip_prefix(prefix)?.strip_prefix('.')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}
