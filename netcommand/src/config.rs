//! Batch execution configuration.

use std::time::Duration;

/// Default number of devices driven at the same time.
///
/// Every in-flight device holds an SSH connection and a task, so the
/// default stays small enough for a laptop while still overlapping the
/// long waits of firmware transfers.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Timeouts applied to every network step of a session.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// TCP connect plus SSH handshake and authentication.
    pub connect: Duration,

    /// One command round-trip.
    pub command: Duration,

    /// Image upload or device-side image download.
    pub transfer: Duration,

    /// Device-side image installation.
    pub install: Duration,

    /// Delay between status polls during download/install.
    pub poll_interval: Duration,

    /// Time to let a device go down after a reboot command.
    pub reboot_grace: Duration,

    /// How long to keep trying to reconnect after a reboot.
    pub reconnect: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            command: Duration::from_secs(30),
            transfer: Duration::from_secs(600),
            install: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(1),
            reboot_grace: Duration::from_secs(60),
            reconnect: Duration::from_secs(900),
        }
    }
}

/// Scheduler-level retry policy for connection failures.
///
/// Only failures that happen before anything was sent to a device are
/// retried: `ConnectionFailed` and `Timeout` during connect/authenticate.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,

    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry up to `max_retries` times with exponential backoff.
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor)
    }
}

/// Configuration for one batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of devices in flight.
    pub concurrency: usize,

    /// Validate and preview without touching devices.
    pub dry_run: bool,

    /// Do not start new devices after the first failure.
    pub stop_on_error: bool,

    /// Connection retry policy.
    pub retry: RetryPolicy,

    /// Per-step timeouts.
    pub timeouts: Timeouts,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
            stop_on_error: false,
            retry: RetryPolicy::none(),
            timeouts: Timeouts::default(),
        }
    }
}

impl BatchConfig {
    /// Set the concurrency limit (clamped to at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable or disable stop-on-error.
    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}
