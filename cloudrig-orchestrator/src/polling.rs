use std::future::Future;
use std::time::Duration;

use cloudrig_common::CloudrigError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cadence and bound of one polling loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    /// Multiplier applied to the interval after every unsuccessful check (1.0 = fixed).
    pub backoff: f64,
    /// `None` polls until the condition holds or the token is cancelled.
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            backoff: 1.0,
            timeout: Some(timeout),
        }
    }

    pub fn with_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff = if factor.is_finite() && factor >= 1.0 { factor } else { 1.0 };
        self.max_interval = max_interval.max(self.interval);
        self
    }

    /// Any factor that is not finite and above 1 polls at a fixed rate.
    /// Overflow caps at `max_interval`.
    fn next_interval(&self, current: Duration) -> Duration {
        if !self.backoff.is_finite() || self.backoff <= 1.0 {
            return current.min(self.max_interval.max(self.interval));
        }
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

/// Run `check` until it yields `Some`, sleeping between attempts.
///
/// The first check runs immediately. Errors from `check` end the loop at once;
/// "not yet" is `Ok(None)`.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, CloudrigError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, CloudrigError>>,
{
    let started = Instant::now();
    let deadline = policy.timeout.map(|t| started + t);
    let mut interval = policy.interval;
    let mut attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(CloudrigError::Cancelled {
                operation: operation.to_string(),
            });
        }

        attempts += 1;
        if let Some(value) = check().await? {
            tracing::debug!("[poll] {} satisfied after {} check(s)", operation, attempts);
            return Ok(value);
        }

        let sleep_for = match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    tracing::warn!("[poll] {} gave up after {} check(s)", operation, attempts);
                    return Err(CloudrigError::Timeout {
                        operation: operation.to_string(),
                        elapsed: now - started,
                    });
                }
                interval.min(d - now)
            }
            None => interval,
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CloudrigError::Cancelled { operation: operation.to_string() });
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
        interval = policy.next_interval(interval);
    }
}

/// Bound a provider-side waiter by a timeout and a cancellation token.
pub async fn bounded_wait<T>(
    condition: &'static str,
    resource_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    wait: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, CloudrigError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CloudrigError::Cancelled {
            operation: format!("waiting for {} on {}", condition, resource_id),
        }),
        res = tokio::time::timeout(timeout, wait) => match res {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(source)) => Err(CloudrigError::WaitFailed {
                condition,
                resource_id: resource_id.to_string(),
                source,
            }),
            Err(_) => Err(CloudrigError::Timeout {
                operation: format!("waiting for {} on {}", condition, resource_id),
                elapsed: timeout,
            }),
        },
    }
}
