//! Run-scoped context shared by every migration component.
//!
//! The orchestrator owns the only [`MigrationContext`] of a run and passes it
//! by reference to the introspector, auditor, synthesizer and transfer engine.
//! Nothing else holds a connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{MigrateError, Result};

use super::traits::{SourceCatalog, TargetExecutor};

/// Both collaborators plus the run's deadline and cancellation state.
pub struct MigrationContext {
    pub source: Arc<dyn SourceCatalog>,
    pub target: Arc<dyn TargetExecutor>,

    /// Deadline applied to every external call, if any.
    pub statement_timeout: Option<Duration>,

    pub cancel: CancellationToken,
}

impl MigrationContext {
    pub fn new(source: Arc<dyn SourceCatalog>, target: Arc<dyn TargetExecutor>) -> Self {
        Self {
            source,
            target,
            statement_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run an external call under the per-call deadline.
    pub async fn guard<T, F>(&self, operation: impl Into<String>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.statement_timeout {
            None => fut.await,
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(MigrateError::Timeout {
                    operation: operation.into(),
                    seconds: limit.as_secs(),
                }),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Release both collaborators.
    pub async fn close(&self) {
        debug!("Closing source and target connections");
        self.source.close().await;
        self.target.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sqlite_source, MemoryTarget};

    async fn context() -> MigrationContext {
        let source = sqlite_source(&[]).await;
        MigrationContext::new(Arc::new(source), Arc::new(MemoryTarget::new()))
    }

    #[tokio::test]
    async fn test_guard_without_deadline_passes_through() {
        let ctx = context().await;
        let value = ctx.guard("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_guard_times_out() {
        let ctx = context()
            .await
            .with_statement_timeout(Some(Duration::from_millis(50)));
        let result: Result<()> = ctx
            .guard("slow call", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        match result {
            Err(MigrateError::Timeout { operation, .. }) => {
                assert_eq!(operation, "slow call");
            }
            other => panic!("expected timeout, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let ctx = context().await.with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
