use analysis_core::FetchError;
use std::future::Future;
use std::time::Duration;

/// Retries classified-retryable failures on a fixed backoff schedule.
///
/// One retry per entry in `backoff`; auth, permission and no-data failures
/// are returned immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: vec![Duration::from_secs(1), Duration::from_secs(3)],
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff: Vec<Duration>) -> Self {
        Self { backoff }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self { backoff: vec![] }
    }

    pub fn max_retries(&self) -> usize {
        self.backoff.len()
    }

    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.backoff.len() => {
                    let delay = self.backoff[attempt];
                    attempt += 1;
                    tracing::warn!(
                        "{} failed: {} (retry {}/{} in {:?})",
                        label,
                        e,
                        attempt,
                        self.backoff.len(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt > 0 {
                        tracing::warn!("{} failed after {} retries: {}", label, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
