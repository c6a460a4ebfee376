//! Job-wide deadline.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Timer started at the beginning of a job. Work wrapped in [`guard`]
/// fails with `Error::JobTimeout` once the deadline passes.
///
/// [`guard`]: JobTimeout::guard
#[derive(Debug)]
pub struct JobTimeout {
    duration: Duration,
    expired: CancellationToken,
    timer: JoinHandle<()>,
}

impl JobTimeout {
    /// Start the timer on the current runtime. Fails when there is no
    /// runtime or the duration is zero.
    pub fn start(duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(Error::JobFatal("Job timeout must be positive".to_string()));
        }
        let runtime = Handle::try_current()
            .map_err(|e| Error::JobFatal(format!("No runtime to host the job timeout: {}", e)))?;

        let expired = CancellationToken::new();
        let token = expired.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            token.cancel();
        });

        Ok(Self {
            duration,
            expired,
            timer,
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_expired(&self) -> bool {
        self.expired.is_cancelled()
    }

    /// Run `work` unless the deadline passes first.
    pub async fn guard<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.expired.cancelled() => Err(Error::JobTimeout(self.duration)),
            result = work => result,
        }
    }
}

impl Drop for JobTimeout {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_outside_runtime_fails() {
        let err = JobTimeout::start(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::JobFatal(_)));
    }

    #[tokio::test]
    async fn test_zero_duration_fails() {
        assert!(JobTimeout::start(Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_guard_passes_result_through() {
        let timeout = JobTimeout::start(Duration::from_secs(5)).unwrap();
        let value = timeout.guard(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!timeout.is_expired());
    }

    #[tokio::test]
    async fn test_guard_expires() {
        let timeout = JobTimeout::start(Duration::from_millis(20)).unwrap();
        let result: Result<()> = timeout
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::JobTimeout(_))));
        assert!(timeout.is_expired());
    }
}
