use crate::config::retry::{BackoffConfig, HttpPolicy, Jitter, RetryPolicy};
use rand::{Rng, rng};
use reqwest::{Method, Response, StatusCode};
use snafu::{IntoError, Location, Snafu};
use std::time::{Duration, Instant};

/// Describes one logical workspace API call for retry decisions.
#[derive(Clone, Debug)]
pub struct HttpContext {
    pub method: Method,
    /// API path, used for logging only.
    pub endpoint: String,
    /// The server treats repeats of this request as a no-op.
    pub idempotent: bool,
}

impl HttpContext {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        let idempotent = matches!(method, Method::GET | Method::PUT | Method::DELETE);
        Self {
            method,
            endpoint: endpoint.into(),
            idempotent,
        }
    }

    /// Marks a POST endpoint as safe to repeat (e.g. warehouse start, DBFS mkdirs).
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HttpError {
    #[snafu(display("transport error calling {endpoint}"))]
    Transport {
        endpoint: String,
        source: reqwest::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("deadline exceeded after {elapsed:?} (budget {configured:?})"))]
    DeadlineExceeded {
        configured: Duration,
        elapsed: Duration,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("max attempts ({attempts}) reached; last status {last_status}"))]
    MaxAttempts {
        attempts: u32,
        last_status: StatusCode,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("retry delay {retry_after:?} exceeds remaining budget {remaining:?}"))]
    RetryAfterExceeded {
        retry_after: Duration,
        remaining: Duration,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Sends the request built by `build_request`, retrying transient failures
/// according to `policy`. Non-retryable responses are returned as is so the
/// caller can decode the platform's error body.
pub async fn execute_with_retry<B>(
    build_request: B,
    ctx: &HttpContext,
    policy: &RetryPolicy,
) -> Result<Response, HttpError>
where
    B: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt: u32 = 0;
    let mut sleep_ms: f64 = policy.backoff.base.as_millis() as f64;
    let start = Instant::now();
    let retry_allowed = allow_retry(ctx, &policy.http);

    loop {
        attempt += 1;
        let elapsed = start.elapsed();
        if elapsed >= policy.max_elapsed {
            return DeadlineExceededSnafu {
                configured: policy.max_elapsed,
                elapsed,
            }
            .fail();
        }
        let remaining = policy.max_elapsed - elapsed;

        let delay = match build_request().send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() || !should_retry_status(status) || !retry_allowed {
                    return Ok(resp);
                }
                if attempt >= policy.max_attempts {
                    return MaxAttemptsSnafu {
                        attempts: attempt,
                        last_status: status,
                    }
                    .fail();
                }
                sleep_ms = next_delay_ms(sleep_ms, &policy.backoff);
                let delay =
                    parse_retry_after(&resp).unwrap_or(Duration::from_millis(sleep_ms as u64));
                tracing::debug!(
                    endpoint = %ctx.endpoint,
                    attempt,
                    status = %status,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after retryable status"
                );
                delay
            }
            Err(e) => {
                if !is_retryable_transport(&e) || !retry_allowed || attempt >= policy.max_attempts
                {
                    return Err(TransportSnafu {
                        endpoint: ctx.endpoint.clone(),
                    }
                    .into_error(e));
                }
                sleep_ms = next_delay_ms(sleep_ms, &policy.backoff);
                let delay = Duration::from_millis(sleep_ms as u64);
                tracing::debug!(
                    endpoint = %ctx.endpoint,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transport error"
                );
                delay
            }
        };

        if delay > remaining {
            return RetryAfterExceededSnafu {
                retry_after: delay,
                remaining,
            }
            .fail();
        }
        tokio::time::sleep(delay).await;
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn allow_retry(ctx: &HttpContext, http: &HttpPolicy) -> bool {
    match ctx.method {
        Method::GET | Method::HEAD | Method::OPTIONS => http.retry_safe_reads,
        Method::PUT | Method::DELETE => http.retry_idempotent_writes || ctx.idempotent,
        Method::POST | Method::PATCH => http.retry_post_patch || ctx.idempotent,
        _ => false,
    }
}

fn next_delay_ms(prev_ms: f64, backoff: &BackoffConfig) -> f64 {
    let base = backoff.base.as_millis() as f64;
    let cap = backoff.cap.as_millis() as f64;
    match backoff.jitter {
        Jitter::None => (prev_ms.max(base) * backoff.factor).min(cap),
        Jitter::Full => {
            let max = (prev_ms.max(base) * backoff.factor).min(cap);
            rng().random_range(0.0..=max)
        }
        Jitter::Decorrelated => {
            let upper = (prev_ms.max(base) * 3.0).min(cap).max(base);
            rng().random_range(base..=upper)
        }
    }
}

fn parse_retry_after(resp: &Response) -> Option<Duration> {
    let value = resp.headers().get(reqwest::header::RETRY_AFTER)?;
    let secs = value.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs))
}

fn is_retryable_transport(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter: Jitter) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(100),
            factor: 2.0,
            cap: Duration::from_millis(1000),
            jitter,
        }
    }

    #[test]
    fn should_double_without_jitter_until_cap() {
        let config = backoff(Jitter::None);

        assert_eq!(next_delay_ms(100.0, &config), 200.0);
        assert_eq!(next_delay_ms(800.0, &config), 1000.0);
    }

    #[test]
    fn should_keep_decorrelated_jitter_within_bounds() {
        let config = backoff(Jitter::Decorrelated);

        for _ in 0..100 {
            let next = next_delay_ms(500.0, &config);
            assert!((100.0..=1000.0).contains(&next));
        }
    }

    #[test]
    fn should_only_retry_posts_marked_idempotent() {
        let policy = RetryPolicy::default();

        assert!(!allow_retry(
            &HttpContext::new(Method::POST, "/api/2.1/jobs/create"),
            &policy.http
        ));
        assert!(allow_retry(
            &HttpContext::new(Method::POST, "/api/2.0/sql/warehouses/x/start").idempotent(),
            &policy.http
        ));
        assert!(allow_retry(
            &HttpContext::new(Method::GET, "/api/2.0/dbfs/list"),
            &policy.http
        ));
    }
}
