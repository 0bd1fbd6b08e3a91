use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};

/// Per-call parameters passed explicitly to every store operation.
///
/// Carries the caller's cancellation signal and an optional trace id that is
/// attached to every log line the operation emits.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    pub cancel: CancellationToken,
    pub trace_id: Option<String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context bound to an existing cancellation token.
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail fast if the signal already fired.
    pub fn check(&self) -> StoreResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }

    /// Race `fut` against cancellation. The future is dropped, aborting any
    /// in-flight I/O it owns, as soon as the signal fires.
    pub async fn run<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
            res = fut => res,
        }
    }

    /// Trace id for log fields, empty when unset.
    pub fn trace_id(&self) -> &str {
        self.trace_id.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn run_completes_when_not_cancelled() {
        let cx = CallContext::new();
        let out = cx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn run_aborts_pending_future_on_cancel() {
        let cx = CallContext::new();
        let cancel = cx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let res: StoreResult<()> = cx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(StoreError::Cancelled)));
    }

    #[test]
    fn check_reports_fired_signal() {
        let cx = CallContext::new().with_trace_id("req-1");
        assert!(cx.check().is_ok());
        cx.cancel.cancel();
        assert!(matches!(cx.check(), Err(StoreError::Cancelled)));
        assert_eq!(cx.trace_id(), "req-1");
    }
}
