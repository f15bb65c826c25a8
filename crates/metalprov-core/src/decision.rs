//! Failure decision providers
//!
//! A [`DecisionProvider`] answers "what now?" after a retriable failure. Batch runs
//! use [`PolicyDecisions`]; interactive runs use [`InteractivePrompt`], which falls
//! back to the same policy when nobody can answer.

use std::fmt;

use async_trait::async_trait;
use dialoguer::Select;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CoreError;

/// Operator choice after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryDecision {
    Retry,
    Skip,
    Quit,
    Cleanup,
}

impl RetryDecision {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RetryDecision::Retry => "retry",
            RetryDecision::Skip => "skip",
            RetryDecision::Quit => "quit",
            RetryDecision::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a failure handed to a decision provider
#[derive(Debug, Clone)]
pub struct FailureNotice<'a> {
    /// Human readable operation description
    pub operation: &'a str,
    /// Extracted diagnostic, if any
    pub diagnostic: Option<&'a str>,
    /// Failed attempts so far, including this one
    pub attempt: u32,
    /// Whether `cleanup` may be chosen
    pub cleanup_allowed: bool,
}

#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Decide how to continue after `notice`
    ///
    /// # Errors
    /// `CoreError::Interrupted` if the operator aborted the prompt.
    async fn decide(&self, notice: &FailureNotice<'_>) -> Result<RetryDecision, CoreError>;
}

/// Always answers with the configured policy
#[derive(Debug, Clone, Copy)]
pub struct PolicyDecisions {
    default: RetryDecision,
}

impl PolicyDecisions {
    #[must_use]
    pub fn new(default: RetryDecision) -> Self {
        Self { default }
    }
}

#[async_trait]
impl DecisionProvider for PolicyDecisions {
    async fn decide(&self, notice: &FailureNotice<'_>) -> Result<RetryDecision, CoreError> {
        debug!(
            operation = notice.operation,
            decision = %self.default,
            "applying failure policy"
        );
        Ok(self.default)
    }
}

/// Terminal menu on stderr
#[derive(Debug, Clone, Copy)]
pub struct InteractivePrompt {
    default: RetryDecision,
}

impl InteractivePrompt {
    #[must_use]
    pub fn new(default: RetryDecision) -> Self {
        Self { default }
    }

    fn choices(cleanup_allowed: bool) -> Vec<RetryDecision> {
        let mut choices = vec![RetryDecision::Quit, RetryDecision::Retry, RetryDecision::Skip];
        if cleanup_allowed {
            choices.push(RetryDecision::Cleanup);
        }
        choices
    }
}

#[async_trait]
impl DecisionProvider for InteractivePrompt {
    async fn decide(&self, notice: &FailureNotice<'_>) -> Result<RetryDecision, CoreError> {
        let choices = Self::choices(notice.cleanup_allowed);
        let default_index = choices
            .iter()
            .position(|c| *c == self.default)
            .unwrap_or(0);
        let labels: Vec<&'static str> = choices.iter().map(|c| c.as_str()).collect();

        let answer = tokio::task::spawn_blocking(move || {
            Select::new()
                .with_prompt("Choose failover method")
                .items(&labels)
                .default(default_index)
                .interact_opt()
        })
        .await;

        match answer {
            Ok(Ok(Some(index))) => Ok(choices.get(index).copied().unwrap_or(self.default)),
            Ok(Ok(None)) => Err(CoreError::Interrupted),
            Ok(Err(dialoguer::Error::IO(e))) if e.kind() == std::io::ErrorKind::Interrupted => {
                Err(CoreError::Interrupted)
            }
            Ok(Err(e)) => {
                warn!(error = %e, default = %self.default, "prompt unavailable, using failure policy");
                eprintln!("{}", self.default);
                Ok(self.default)
            }
            Err(e) => {
                warn!(error = %e, default = %self.default, "prompt task failed, using failure policy");
                Ok(self.default)
            }
        }
    }
}
