use std::time::Duration;

/// Retry policy applied to every workspace API request.
///
/// Reads (GET) are retried by default; POSTs only when the call site marks
/// the endpoint safe to repeat (warehouse start/stop, statement polling).
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub http: HttpPolicy,
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
    /// Upper bound on the whole operation, sleeps included.
    pub max_elapsed: Duration,
}

#[derive(Clone, Debug)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub jitter: Jitter,
}

#[derive(Clone, Debug)]
pub enum Jitter {
    None,
    Full,
    Decorrelated,
}

#[derive(Clone, Debug)]
pub struct HttpPolicy {
    pub retry_safe_reads: bool,
    pub retry_idempotent_writes: bool,
    pub retry_post_patch: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            http: HttpPolicy {
                retry_safe_reads: true,
                retry_idempotent_writes: true,
                retry_post_patch: false,
            },
            max_attempts: 6,
            backoff: BackoffConfig {
                base: Duration::from_millis(50),
                factor: 2.0,
                cap: Duration::from_millis(1500),
                jitter: Jitter::Decorrelated,
            },
            max_elapsed: Duration::from_secs(120),
        }
    }
}

/// Polling cadence for long-running platform operations such as a warehouse
/// coming up or a statement finishing.
#[derive(Clone, Debug)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(20 * 60),
        }
    }
}
