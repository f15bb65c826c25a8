//! Command runner trait

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::{CommandLine, CommandResult, RunOptions};

/// Something that can execute an external command to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` with `opts`, blocking until the process exits and all output is
    /// collected.
    ///
    /// A non-zero exit status is *not* an error; inspect [`CommandResult::success`].
    ///
    /// # Errors
    /// `ExecError::Interrupted` is fatal; every other variant means the outcome of the
    /// command is unknown.
    async fn run(&self, cmd: &CommandLine, opts: &RunOptions) -> Result<CommandResult, ExecError>;

    fn runner_type(&self) -> &'static str;
}
