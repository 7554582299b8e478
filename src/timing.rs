//! Timing constants, pulled out to a single place so production code and
//! tests share one source of truth instead of hardcoding the numbers at
//! each call site.

use std::time::Duration;

/// Randomized election timeout is sampled uniformly from this range.
pub const ELECTION_TIMEOUT_MIN: Duration = Duration::from_millis(500);
pub const ELECTION_TIMEOUT_MAX: Duration = Duration::from_millis(1000);

/// Minimum spacing between AppendEntries sends to a single peer.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on how long the event loop blocks waiting for one datagram.
pub const EVENT_LOOP_WAIT: Duration = Duration::from_millis(200);

/// Tunable copy of the constants above, threaded through `ReplicaConfig` so
/// tests can shrink every timing knob to millisecond scale without touching
/// the production defaults.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    pub event_loop_wait: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            election_timeout_min: ELECTION_TIMEOUT_MIN,
            election_timeout_max: ELECTION_TIMEOUT_MAX,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            event_loop_wait: EVENT_LOOP_WAIT,
        }
    }
}

impl Timing {
    /// Timing scaled down to make integration tests fast and deterministic,
    /// while preserving the required `heartbeat < election_timeout` ordering.
    #[cfg(any(test, feature = "test-support"))]
    pub fn scaled_for_tests() -> Self {
        Timing {
            election_timeout_min: Duration::from_millis(30),
            election_timeout_max: Duration::from_millis(60),
            heartbeat_interval: Duration::from_millis(8),
            event_loop_wait: Duration::from_millis(5),
        }
    }
}
