use std::time::Duration;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws/notifications/";
pub const DEFAULT_UPDATE_CAPACITY: usize = 64;

/// What the stream client does after the transport drops.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    #[default]
    Never,
    Backoff {
        initial: Duration,
        max: Duration,
        /// `None` retries forever.
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    pub fn backoff(max_attempts: Option<u32>) -> Self {
        ReconnectPolicy::Backoff {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (zero-based), or `None` once
    /// the policy gives up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            ReconnectPolicy::Never => None,
            ReconnectPolicy::Backoff {
                initial,
                max,
                max_attempts,
            } => {
                if max_attempts.is_some_and(|limit| attempt >= limit) {
                    return None;
                }
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                Some(initial.saturating_mul(factor).min(*max))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Buffered dashboard updates per subscriber before the slowest lags.
    pub update_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            reconnect: ReconnectPolicy::Never,
            update_capacity: DEFAULT_UPDATE_CAPACITY,
        }
    }
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}
