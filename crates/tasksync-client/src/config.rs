//! Agent configuration.

use std::time::Duration;

/// Bounded exponential backoff for one sync attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Total tries per attempt, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay after the `retry`-th failure (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Configuration for a [`SyncAgent`](crate::SyncAgent).
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Document (list) this agent replicates.
    pub document_id: String,
    /// Period of the background sync loop.
    pub sync_interval: Duration,
    /// Start the background loop on activation.
    pub auto_sync: bool,
    pub retry: RetryPolicy,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Explicit replica id; a fresh ULID-based id when `None`.
    pub replica_id: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            document_id: String::new(),
            sync_interval: Duration::from_secs(5),
            auto_sync: true,
            retry: RetryPolicy::default(),
            event_capacity: 64,
            replica_id: None,
        }
    }
}

/// Builder for agent configuration.
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            config: AgentConfig {
                document_id: document_id.into(),
                ..Default::default()
            },
        }
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    pub fn auto_sync(mut self, enabled: bool) -> Self {
        self.config.auto_sync = enabled;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn replica_id(mut self, replica_id: impl Into<String>) -> Self {
        self.config.replica_id = Some(replica_id.into());
        self
    }

    pub fn build(self) -> AgentConfig {
        self.config
    }
}
