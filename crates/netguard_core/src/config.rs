//! Engine configuration.

use std::time::Duration;

use crate::error::NetguardError;

/// Configuration for the sync orchestrator and its collaborators.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry behavior for batches that lose a commit-time conflict.
    pub retry: RetryConfig,
    /// Number of committed events the change notifier keeps for replay.
    pub watch_history: usize,
    /// Priority stamped on compiled rules.
    pub default_rule_priority: i32,
    /// Reconcile conditions inline after each mutate sync. When false,
    /// objects are queued for the next reconciliation pass.
    pub reconcile_after_sync: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            watch_history: 10_000,
            default_rule_priority: 100,
            reconcile_after_sync: true,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the notifier history size.
    #[must_use]
    pub const fn with_watch_history(mut self, events: usize) -> Self {
        self.watch_history = events;
        self
    }

    /// Sets the priority of compiled rules.
    #[must_use]
    pub const fn with_default_rule_priority(mut self, priority: i32) -> Self {
        self.default_rule_priority = priority;
        self
    }

    /// Sets whether mutate syncs reconcile inline.
    #[must_use]
    pub const fn with_reconcile_after_sync(mut self, value: bool) -> Self {
        self.reconcile_after_sync = value;
        self
    }
}

/// Bounded re-runs of a batch that lost a commit-time conflict.
///
/// Only conflicts detected by the store at commit are retried; the next
/// attempt re-reads the winner's state and recompiles against it. A stale
/// resourceVersion supplied by the caller is never retried, because the
/// batch itself carries the stale version.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per batch, the first one included.
    pub max_attempts: u32,
    /// Pause before the second attempt.
    pub initial_delay: Duration,
    /// Cap on a single pause.
    pub max_delay: Duration,
    /// Growth factor between consecutive pauses.
    pub backoff_multiplier: f64,
    /// Draw each pause from the upper half of its range, so writers that
    /// collided once do not collide again in lockstep.
    pub add_jitter: bool,
    /// Total pause a single batch may accumulate. Once spent, the next
    /// conflict is surfaced even if attempts remain.
    pub max_elapsed: Option<Duration>,
}

impl RetryConfig {
    /// Allows `max_attempts` attempts per batch.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            add_jitter: true,
            max_elapsed: Some(Duration::from_secs(2)),
        }
    }

    /// Surfaces the first conflict.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
            max_elapsed: None,
        }
    }

    /// Sets the first pause.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the cap on a single pause.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Sets the per-batch pause budget.
    #[must_use]
    pub fn with_max_elapsed(mut self, budget: Option<Duration>) -> Self {
        self.max_elapsed = budget;
        self
    }

    /// Whether a batch that failed with `err` after `attempts` attempts and
    /// `slept` total pause gets another attempt.
    #[must_use]
    pub fn should_retry(&self, err: &NetguardError, attempts: u32, slept: Duration) -> bool {
        err.is_retryable()
            && attempts < self.max_attempts
            && self.max_elapsed.map_or(true, |budget| slept < budget)
    }

    /// Pause after the `attempts`-th failed attempt (1-based).
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let ceiling = (self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        if self.add_jitter {
            Duration::from_secs_f64(ceiling * (0.5 + 0.5 * rand::random::<f64>()))
        } else {
            Duration::from_secs_f64(ceiling)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netguard_store::{ResourceKey, ResourceVersion, StoreError};

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.watch_history, 10_000);
        assert_eq!(config.default_rule_priority, 100);
        assert!(config.reconcile_after_sync);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn builder_pattern() {
        let config = EngineConfig::new()
            .with_watch_history(16)
            .with_default_rule_priority(7)
            .with_reconcile_after_sync(false)
            .with_retry(RetryConfig::no_retry());

        assert_eq!(config.watch_history, 16);
        assert_eq!(config.default_rule_priority, 7);
        assert!(!config.reconcile_after_sync);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn backoff_grows_to_its_cap() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350))
            .with_jitter(false);

        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(350));
        assert_eq!(config.backoff(9), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_in_upper_half() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));
        for _ in 0..32 {
            let delay = config.backoff(1);
            assert!(delay >= Duration::from_millis(50), "{delay:?}");
            assert!(delay <= Duration::from_millis(100), "{delay:?}");
        }
    }

    #[test]
    fn only_commit_conflicts_are_retried() {
        let key = ResourceKey::new("Service", "ns", "web");
        let lost_race: NetguardError = StoreError::CommitConflict {
            key: key.clone(),
            snapshot: ResourceVersion::new(3),
        }
        .into();
        let stale: NetguardError = StoreError::VersionMismatch {
            key,
            expected: ResourceVersion::new(1),
            actual: ResourceVersion::new(2),
        }
        .into();

        let config = RetryConfig::new(3);
        assert!(config.should_retry(&lost_race, 1, Duration::ZERO));
        assert!(config.should_retry(&lost_race, 2, Duration::ZERO));
        assert!(!config.should_retry(&lost_race, 3, Duration::ZERO));
        assert!(!config.should_retry(&stale, 1, Duration::ZERO));
        assert!(!RetryConfig::no_retry().should_retry(&lost_race, 1, Duration::ZERO));
    }

    #[test]
    fn pause_budget_ends_retries() {
        let lost_race: NetguardError = StoreError::CommitConflict {
            key: ResourceKey::new("Service", "ns", "web"),
            snapshot: ResourceVersion::new(3),
        }
        .into();
        let config = RetryConfig::new(100).with_max_elapsed(Some(Duration::from_millis(20)));
        assert!(config.should_retry(&lost_race, 1, Duration::from_millis(19)));
        assert!(!config.should_retry(&lost_race, 1, Duration::from_millis(20)));
        assert!(config
            .with_max_elapsed(None)
            .should_retry(&lost_race, 1, Duration::from_secs(60)));
    }
}
