//! Local command execution using `tokio::process`

use std::io;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, instrument, warn};

use crate::error::ExecError;
use crate::result::{CommandLine, CommandResult, RunOptions};
use crate::traits::CommandRunner;

/// Local command runner
///
/// Spawns the program directly (no shell), writes the configured stdin while
/// draining stdout and stderr on two concurrent readers, then waits for exit.
/// An operator interrupt kills the child and surfaces as `ExecError::Interrupted`.
#[derive(Debug, Clone)]
pub struct LocalRunner;

impl LocalRunner {
    /// Create a new local runner
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn execute(
        &self,
        cmd: &CommandLine,
        opts: &RunOptions,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .envs(opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(format!("{}: {e}", cmd.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecError::IoError("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::IoError("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::IoError("stderr not captured".to_string()))?;

        let input: &[u8] = opts.stdin.as_deref().unwrap_or_default();
        let writer = async move {
            let written = stdin.write_all(input).await;
            // dropping the handle closes the pipe
            drop(stdin);
            match written {
                Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        };

        let (written, out, err) = tokio::join!(writer, drain(stdout), drain(stderr));
        written.map_err(|e| ExecError::IoError(e.to_string()))?;
        let out = out.map_err(|e| ExecError::IoError(e.to_string()))?;
        let err = err.map_err(|e| ExecError::IoError(e.to_string()))?;

        let exit = child
            .wait()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        Ok(CommandResult {
            status: exit.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out).to_string(),
            stderr: String::from_utf8_lossy(&err).to_string(),
            duration: start.elapsed(),
        })
    }

    async fn execute_with_timeout(
        &self,
        cmd: &CommandLine,
        opts: &RunOptions,
    ) -> Result<CommandResult, ExecError> {
        let Some(timeout_duration) = opts.timeout else {
            return self.execute(cmd, opts).await;
        };

        match timeout(timeout_duration, self.execute(cmd, opts)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout {
                timeout: timeout_duration,
            }),
        }
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

fn log_outcome(cmd: &CommandLine, result: &Result<CommandResult, ExecError>) {
    match result {
        Ok(res) => {
            if !res.stdout.is_empty() {
                debug!(stdout = %res.stdout.trim(), "command stdout");
            }
            if !res.stderr.is_empty() {
                debug!(stderr = %res.stderr.trim(), "command stderr");
            }
            if res.success() {
                debug!(duration = ?res.duration, "command succeeded");
            } else {
                warn!(command = %cmd, status = res.status, "command failed");
            }
        }
        Err(ExecError::Interrupted) => error!(command = %cmd, "command interrupted"),
        Err(e) => error!(command = %cmd, error = %e, "command failed on unknown error"),
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    #[instrument(skip(self, opts), fields(command = %cmd), level = "debug")]
    async fn run(&self, cmd: &CommandLine, opts: &RunOptions) -> Result<CommandResult, ExecError> {
        debug!("command run");

        let result = tokio::select! {
            result = self.execute_with_timeout(cmd, opts) => result,
            _ = tokio::signal::ctrl_c() => Err(ExecError::Interrupted),
        };

        log_outcome(cmd, &result);
        result
    }

    fn runner_type(&self) -> &'static str {
        "local"
    }
}
