//! Cancellable call context threaded through every persistence call.

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Returned when the caller aborted before an operation could complete.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("operation cancelled by caller")]
pub struct Cancelled;

/// Request-scoped handle that lets a caller abort in-flight work.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
}

impl CallContext {
    /// A fresh context that is only cancelled through [`CallContext::cancel`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A context cancelled whenever `parent` is, and also independently.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails fast with [`Cancelled`] if the caller already gave up.
    pub fn check<E: From<Cancelled>>(&self) -> Result<(), E> {
        if self.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled first.
    ///
    /// On cancellation `fut` is dropped before it resolves, so anything it
    /// owns (an open transaction, a held lock) is released without being
    /// committed.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<Cancelled>,
    {
        self.check::<E>()?;

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled.into()),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn run_completes_when_not_cancelled() {
        let ctx = CallContext::new();
        let value: Result<u8, Cancelled> = ctx.run(async { Ok(7) }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn run_refuses_to_start_after_cancel() {
        let ctx = CallContext::new();
        ctx.cancel();

        let polled = std::sync::atomic::AtomicBool::new(false);
        let value = ctx
            .run(async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<u8, Cancelled>(1)
            })
            .await;
        assert_eq!(value, Err(Cancelled));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_aborts_pending_future() {
        let parent = CancellationToken::new();
        let ctx = CallContext::child_of(&parent);

        let canceller = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let value: Result<(), Cancelled> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert_eq!(value, Err(Cancelled));
    }
}
