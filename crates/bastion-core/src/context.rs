//! Per-request deadline and cancellation handle

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BastionError, Result};

/// Default deadline for operations started outside a request (CLI, background tasks).
pub const BACKGROUND_TIMEOUT: Duration = Duration::from_secs(300);

/// Carried by every public operation. Store queries run inside [`RequestContext::run`],
/// so an expired deadline or a cancelled token drops the in-flight future.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Instant,
    cancel: CancellationToken,
    request_id: Option<String>,
}

impl RequestContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
            request_id: None,
        }
    }

    pub fn background() -> Self {
        Self::with_timeout(BACKGROUND_TIMEOUT)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fails fast when the deadline already passed or the caller gave up.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.cancel.is_cancelled() || Instant::now() >= self.deadline {
            return Err(BastionError::deadline_exceeded(operation));
        }
        Ok(())
    }

    /// Drives `fut` until it completes, the deadline passes, or the context is cancelled.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(operation)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(BastionError::deadline_exceeded(format!("{} (cancelled)", operation)))
            }
            res = tokio::time::timeout_at(self.deadline, fut) => {
                res.map_err(|_| BastionError::deadline_exceeded(operation))?
            }
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_run_completes_within_deadline() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        let value = ctx.run("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(50));
        let err = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_cancelled_context_rejects() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        ctx.cancel();
        let err = ctx.run("cancelled", async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert!(err.is_retryable());
    }
}
