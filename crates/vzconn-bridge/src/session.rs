//! Bridge session lifecycle.
//!
//! A session is one run of the bridge, bound to exactly one stream and one
//! session ID. Its state only ever moves forward:
//! `Idle → Connecting → Registering → Active → Draining → Closed`.

use std::time::{SystemTime, UNIX_EPOCH};

/// The state of a bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BridgeState {
    /// Constructed, `run_stream` not yet called.
    Idle,
    /// Resolving the vizier ID and opening the stream.
    Connecting,
    /// Stream open, registration being sent.
    Registering,
    /// Relays and heartbeat running.
    Active,
    /// Teardown requested, tasks winding down.
    Draining,
    /// Final. A new bridge is needed to reconnect.
    Closed,
}

impl BridgeState {
    pub fn is_terminal(self) -> bool {
        self == BridgeState::Closed
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BridgeState::Idle => "idle",
            BridgeState::Connecting => "connecting",
            BridgeState::Registering => "registering",
            BridgeState::Active => "active",
            BridgeState::Draining => "draining",
            BridgeState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Nanoseconds since the Unix epoch, 0 for times before it.
pub fn unix_nanos(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// A fresh session ID derived from the wall clock.
///
/// Nanosecond resolution keeps IDs distinct across reconnects of the same
/// cluster, which always construct a new bridge.
pub fn new_session_id() -> i64 {
    unix_nanos(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn states_are_ordered() {
        assert!(BridgeState::Idle < BridgeState::Connecting);
        assert!(BridgeState::Active < BridgeState::Draining);
        assert!(BridgeState::Draining < BridgeState::Closed);
        assert!(BridgeState::Closed.is_terminal());
        assert!(!BridgeState::Draining.is_terminal());
        assert_eq!(BridgeState::Active.to_string(), "active");
    }

    #[test]
    fn unix_nanos_of_known_time() {
        let t = UNIX_EPOCH + Duration::from_secs(2);
        assert_eq!(unix_nanos(t), 2_000_000_000);
        assert_eq!(unix_nanos(UNIX_EPOCH - Duration::from_secs(1)), 0);
    }

    #[test]
    fn session_ids_increase() {
        let a = new_session_id();
        std::thread::sleep(Duration::from_millis(1));
        let b = new_session_id();
        assert!(b > a);
    }
}
