//! Per-session timing and retry limits

use std::time::Duration;

/// Timing and retry limits applied to every browser session
#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// Delay between mesh status polls
    pub status_poll_interval: Duration,

    /// Maximum number of status polls before setup is abandoned
    pub status_poll_attempts: u32,

    /// How long the browser has to confirm its mesh socket opened
    pub tunnel_open_timeout: Duration,

    /// Keepalive ping interval on every WebSocket
    pub ping_interval: Duration,

    /// Read deadline extended by every pong
    pub read_deadline: Duration,

    /// Total SSH connection attempts, including the first
    pub max_ssh_attempts: u32,

    /// Delay before retrying a read that returned no data
    pub pump_idle_delay: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            status_poll_interval: Duration::from_secs(1),
            status_poll_attempts: 600,
            tunnel_open_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(5),
            read_deadline: Duration::from_secs(60),
            max_ssh_attempts: 5,
            pump_idle_delay: Duration::from_millis(50),
        }
    }
}
