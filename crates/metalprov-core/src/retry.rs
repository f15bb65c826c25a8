//! Retry/failover decision loop

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::context::{OrchestrationContext, RunMode};
use crate::decision::{DecisionProvider, FailureNotice, RetryDecision};
use crate::error::CoreError;

/// Result of a unit of work run under a [`RetryController`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The work succeeded
    Completed(T),
    /// The operator skipped the failing step
    Skipped,
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped)
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Skipped => None,
        }
    }
}

/// Wraps a fallible unit of work with the retry/skip/quit/cleanup policy
///
/// The unit signals a retriable failure with `CoreError::LoopFailure`; any other
/// error is returned untouched. The failure counter spans the whole `run` call, so
/// in batch mode a unit that keeps failing runs exactly `max_retries + 1` times.
#[derive(Clone)]
pub struct RetryController {
    ctx: Arc<OrchestrationContext>,
    decisions: Arc<dyn DecisionProvider>,
}

impl RetryController {
    pub fn new(ctx: Arc<OrchestrationContext>, decisions: Arc<dyn DecisionProvider>) -> Self {
        Self { ctx, decisions }
    }

    /// Run `work` until it succeeds or a decision ends the loop
    ///
    /// # Errors
    /// - `RetriesExhausted` once the batch ceiling is exceeded
    /// - `Quit`, `CleanupRequested`, `CleanupUnsupported` per the decision taken
    /// - any non-loop error produced by `work`
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cleanup: bool,
        mut work: F,
    ) -> Result<Outcome<T>, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut failures = 0u32;

        loop {
            let diagnostic = match work().await {
                Ok(value) => return Ok(Outcome::Completed(value)),
                Err(CoreError::LoopFailure(text)) => text,
                Err(e) => return Err(e),
            };

            failures += 1;
            error!(
                operation,
                diagnostic = diagnostic.as_deref().unwrap_or(""),
                attempt = failures,
                "operation failed"
            );

            if failures > self.ctx.max_retries && self.ctx.mode == RunMode::Batch {
                return Err(CoreError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: failures,
                });
            }

            let notice = FailureNotice {
                operation,
                diagnostic: diagnostic.as_deref(),
                attempt: failures,
                cleanup_allowed: cleanup,
            };
            let decision = self.decisions.decide(&notice).await?;

            match decision {
                RetryDecision::Retry => {
                    info!(operation, attempt = failures + 1, "retrying");
                }
                RetryDecision::Skip => {
                    warn!(operation, "skipping failed operation");
                    return Ok(Outcome::Skipped);
                }
                RetryDecision::Quit => return Err(CoreError::Quit(operation.to_string())),
                RetryDecision::Cleanup if cleanup => return Err(CoreError::CleanupRequested),
                RetryDecision::Cleanup => return Err(CoreError::CleanupUnsupported),
            }
        }
    }
}
