use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base · 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = 2u64
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay_ms.checked_mul(factor))
            .map_or(self.max_delay_ms, |ms| ms.min(self.max_delay_ms));
        Duration::from_millis(delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed(String),
    /// Retries exhausted; only a manual refresh reconnects.
    Failed(String),
}

/// `Connecting -> Open -> Closed(error) -> Connecting ...` with a cap on
/// consecutive failures.
#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    attempts: u32,
    state: ConnectionState,
}

impl Reconnector {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Reconnector {
            policy,
            attempts: 0,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn opened(&mut self) {
        self.attempts = 0;
        self.state = ConnectionState::Open;
    }

    /// Records a failure. Returns how long to wait before the next attempt,
    /// or `None` once the cap is reached and the state is terminal.
    pub fn failed(&mut self, error: impl Into<String>) -> Option<Duration> {
        let error = error.into();
        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            self.state = ConnectionState::Closed(error);
            Some(self.policy.delay_for(self.attempts))
        } else {
            self.state = ConnectionState::Failed(error);
            None
        }
    }

    /// Manual refresh after a terminal failure.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.state = ConnectionState::Connecting;
    }
}

impl Default for Reconnector {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_then_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|n| policy.delay_for(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(200), Duration::from_secs(30));
    }

    #[test]
    fn gives_up_after_five_consecutive_failures() {
        let mut reconnect = Reconnector::default();
        let mut delays = Vec::new();
        while let Some(delay) = reconnect.failed("connection refused") {
            delays.push(delay.as_millis() as u64);
            reconnect.connecting();
        }
        assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 30_000]);
        assert_eq!(
            reconnect.state(),
            &ConnectionState::Failed("connection refused".to_string())
        );
    }

    #[test]
    fn open_resets_attempts() {
        let mut reconnect = Reconnector::default();
        reconnect.failed("boom");
        reconnect.failed("boom");
        assert_eq!(reconnect.attempts(), 2);
        assert_eq!(reconnect.state(), &ConnectionState::Closed("boom".to_string()));

        reconnect.opened();
        assert_eq!(reconnect.attempts(), 0);
        assert_eq!(reconnect.failed("again"), Some(Duration::from_secs(2)));
    }

    #[test]
    fn reset_after_terminal_failure() {
        let mut reconnect = Reconnector::new(ReconnectPolicy { max_attempts: 0, ..Default::default() });
        assert_eq!(reconnect.failed("down"), None);
        reconnect.reset();
        assert_eq!(reconnect.state(), &ConnectionState::Connecting);
    }
}
