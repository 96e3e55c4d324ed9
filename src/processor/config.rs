use std::time::Duration;

/// Timing knobs of the storage processor.
///
/// Defaults are the production constants; tests shrink them to
/// millisecond scale. The heartbeat interval must stay well under the
/// lock TTL so one missed heartbeat does not forfeit the lock.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Lock acquisition reads before giving up.
    pub lock_attempts: u32,
    /// Delay between lock acquisition reads.
    pub lock_retry_delay: Duration,
    /// TTL on the singleton lock key, in whole seconds.
    pub lock_ttl_seconds: u64,
    /// Pause between writing the lock and verifying ownership.
    pub lock_verify_delay: Duration,
    /// Interval between heartbeat re-issues of the lock.
    pub heartbeat_interval: Duration,
    /// Longest hang on an empty queue before cycling anyway.
    pub signal_timeout: Duration,
    /// Back-off entered after a failed cycle.
    pub error_backoff: Duration,
    /// Poll interval while backing off or paused.
    pub backoff_poll: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            lock_attempts: 10,
            lock_retry_delay: Duration::from_secs(10),
            lock_ttl_seconds: 60,
            lock_verify_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            signal_timeout: Duration::from_secs(300),
            error_backoff: Duration::from_secs(300),
            backoff_poll: Duration::from_millis(500),
        }
    }
}

impl ProcessorConfig {
    pub fn with_lock_attempts(mut self, attempts: u32) -> Self {
        self.lock_attempts = attempts;
        self
    }

    pub fn with_lock_retry_delay(mut self, delay: Duration) -> Self {
        self.lock_retry_delay = delay;
        self
    }

    pub fn with_lock_ttl_seconds(mut self, seconds: u64) -> Self {
        self.lock_ttl_seconds = seconds;
        self
    }

    pub fn with_lock_verify_delay(mut self, delay: Duration) -> Self {
        self.lock_verify_delay = delay;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_signal_timeout(mut self, timeout: Duration) -> Self {
        self.signal_timeout = timeout;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_backoff_poll(mut self, poll: Duration) -> Self {
        self.backoff_poll = poll;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_constants() {
        let config = ProcessorConfig::default();
        assert_eq!(config.lock_attempts, 10);
        assert_eq!(config.lock_retry_delay, Duration::from_secs(10));
        assert_eq!(config.lock_ttl_seconds, 60);
        assert_eq!(config.lock_verify_delay, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.signal_timeout, Duration::from_secs(300));
        assert_eq!(config.error_backoff, Duration::from_secs(300));
        assert_eq!(config.backoff_poll, Duration::from_millis(500));
    }

    #[test]
    fn heartbeat_stays_under_ttl() {
        let config = ProcessorConfig::default();
        assert!(config.heartbeat_interval < Duration::from_secs(config.lock_ttl_seconds));
    }
}
