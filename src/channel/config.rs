use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Bound on the outbound frame queue.
    pub queue_max_size: usize,
    pub connect_timeout: Duration,
    /// Receiver gives up on the link after this long without telemetry.
    pub idle_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// How long `close` waits for tasks before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_max_size: 100,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}
