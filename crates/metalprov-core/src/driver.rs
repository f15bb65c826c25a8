//! Provision driver actions
//!
//! A driver action is an executable at `{remotes}/pm/{driver}/{action}`. It receives
//! the action arguments followed by the host id and name when acting on an existing
//! host, exits 0 on success and frames its error text on stderr otherwise.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use metalprov_exec::{CommandLine, CommandRunner, RunOptions};
use tracing::{debug, error, instrument};

use crate::context::OrchestrationContext;
use crate::error::CoreError;
use crate::extract::extract_error_message;
use crate::record::HostRecord;
use crate::retry::{Outcome, RetryController};

const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverAction {
    Deploy,
    Poll,
    Cancel,
    Reset,
    Reboot,
}

impl DriverAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DriverAction::Deploy => "deploy",
            DriverAction::Poll => "poll",
            DriverAction::Cancel => "cancel",
            DriverAction::Reset => "reset",
            DriverAction::Reboot => "reboot",
        }
    }
}

impl fmt::Display for DriverAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject hosts without a provision driver
///
/// # Errors
/// `CoreError::InvalidHost` for an empty driver name.
pub fn check_driver(driver: &str) -> Result<&str, CoreError> {
    let driver = driver.trim();
    if driver.is_empty() {
        return Err(CoreError::InvalidHost);
    }
    Ok(driver)
}

/// Runs driver actions under the retry policy
#[derive(Clone)]
pub struct DriverActionInvoker {
    ctx: Arc<OrchestrationContext>,
    runner: Arc<dyn CommandRunner>,
    retry: RetryController,
    cleanup: bool,
}

impl DriverActionInvoker {
    pub fn new(
        ctx: Arc<OrchestrationContext>,
        runner: Arc<dyn CommandRunner>,
        retry: RetryController,
    ) -> Self {
        Self {
            ctx,
            runner,
            retry,
            cleanup: true,
        }
    }

    /// Whether failures may be answered with `cleanup`
    #[must_use]
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    #[must_use]
    pub fn action_path(&self, driver: &str, action: DriverAction) -> PathBuf {
        self.ctx
            .remotes_dir
            .join("pm")
            .join(driver)
            .join(action.as_str())
    }

    /// Run `action` of `driver` and return its stdout
    ///
    /// # Errors
    /// `InvalidHost` for an empty driver, `DriverNotExecutable` if the script is
    /// missing, plus any error of [`RetryController::run`].
    #[instrument(skip(self, args, host), fields(host_id = host.map(|h| h.id)))]
    pub async fn invoke(
        &self,
        driver: &str,
        action: DriverAction,
        args: &[String],
        host: Option<&HostRecord>,
    ) -> Result<Outcome<String>, CoreError> {
        let driver = check_driver(driver)?;
        let path = self.action_path(driver, action);

        let mut cmd = CommandLine::new(path.to_string_lossy()).args(args.iter().cloned());
        if let Some(host) = host {
            cmd = cmd.arg(host.id.to_string()).arg(host.name.clone());
        }

        if !is_executable(&path).await {
            error!(path = %path.display(), "command not found or not executable");
            return Err(CoreError::DriverNotExecutable(path.display().to_string()));
        }

        let operation = format!("Driver action '{}' failed", path.display());
        let runner = &self.runner;
        let cmd = &cmd;

        self.retry
            .run(&operation, self.cleanup, || async move {
                let result = runner.run(cmd, &RunOptions::new()).await;
                match result {
                    Ok(res) if res.success() => {
                        debug!(action = %action, "driver action succeeded");
                        Ok(res.stdout)
                    }
                    Ok(res) => Err(CoreError::LoopFailure(Some(
                        extract_error_message(&res.stderr)
                            .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
                    ))),
                    Err(e) if e.is_fatal() => Err(CoreError::Interrupted),
                    Err(_) => Err(CoreError::LoopFailure(Some(UNKNOWN_ERROR.to_string()))),
                }
            })
            .await
    }
}

async fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
