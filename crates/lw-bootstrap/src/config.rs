//! Tunables for the bootstrap sequence's two polling phases.

use std::time::Duration;

/// How long and how often the bootstrap sequence waits on the relay and
/// retries a racy task load before giving up.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// How often `WAITING_FOR_RELAY` polls for the relay's main FIFO.
    pub relay_poll_interval: Duration,
    /// How many polls `WAITING_FOR_RELAY` makes before failing.
    pub max_relay_wait_attempts: u32,
    /// Successive sleep durations `LOADING_TASK` waits between load
    /// attempts, riding out the window where a task bundle is still being
    /// staged.
    pub task_load_backoff: Vec<Duration>,
    /// How long `RESOLVING_STEP` waits for the relay connect handshake to
    /// complete before giving up.
    pub relay_connect_timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            relay_poll_interval: Duration::from_secs(1),
            max_relay_wait_attempts: 10,
            task_load_backoff: [1, 2, 4, 8, 16, 32].into_iter().map(Duration::from_secs).collect(),
            relay_connect_timeout: Duration::from_secs(30),
        }
    }
}
