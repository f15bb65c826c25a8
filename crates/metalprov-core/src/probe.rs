//! SSH reachability checks through Ansible's `raw` module

use std::sync::Arc;

use metalprov_exec::{CommandLine, CommandRunner};
use tracing::{debug, info, instrument, warn};

use crate::ansible::{ANSIBLE_SSH_ARGS, AnsibleBundle};
use crate::context::OrchestrationContext;
use crate::error::CoreError;
use crate::retry::{Outcome, RetryController};

#[derive(Clone)]
pub struct ConnectivityProbe {
    ctx: Arc<OrchestrationContext>,
    runner: Arc<dyn CommandRunner>,
    retry: RetryController,
}

impl ConnectivityProbe {
    pub fn new(
        ctx: Arc<OrchestrationContext>,
        runner: Arc<dyn CommandRunner>,
        retry: RetryController,
    ) -> Self {
        Self { ctx, runner, retry }
    }

    /// Wait until every target in `bundle` answers over SSH
    ///
    /// Tries `ping_retries` times with `ping_timeout` between attempts, then hands
    /// further attempts to the retry policy.
    ///
    /// # Errors
    /// Any error of [`RetryController::run`]; cleanup is never offered here.
    #[instrument(skip(self, bundle), fields(targets = bundle.targets().len()))]
    pub async fn wait(&self, bundle: &AnsibleBundle) -> Result<Outcome<()>, CoreError> {
        for attempt in 1..=self.ctx.ping_retries {
            match self.ping(bundle).await {
                Ok(()) => return Ok(Outcome::Completed(())),
                Err(CoreError::LoopFailure(_)) => {
                    debug!(attempt, "SSH not reachable yet");
                }
                Err(e) => return Err(e),
            }

            if attempt < self.ctx.ping_retries {
                tokio::time::sleep(self.ctx.ping_timeout).await;
            }
        }

        warn!(attempts = self.ctx.ping_retries, "SSH still unreachable");
        self.retry
            .run("SSH connection is failing", false, || self.ping(bundle))
            .await
    }

    async fn ping(&self, bundle: &AnsibleBundle) -> Result<(), CoreError> {
        let inventory = bundle.inventory();
        let cmd = CommandLine::new("ansible")
            .arg(ANSIBLE_SSH_ARGS)
            .args(["-m", "raw", "all", "-i"])
            .arg(inventory.to_string_lossy())
            .args(["-a", "/bin/true"]);
        let opts = bundle.run_options().with_env("ANSIBLE_BECOME", "false");

        // A non-zero exit means at least one target did not answer
        let output = match self.runner.run(&cmd, &opts).await {
            Ok(res) if res.success() => res.stdout,
            Ok(res) => {
                debug!(status = res.status, "ansible raw check failed");
                return Err(CoreError::LoopFailure(None));
            }
            Err(e) if e.is_fatal() => return Err(CoreError::Interrupted),
            Err(_) => return Err(CoreError::LoopFailure(None)),
        };

        let answered = count_successes(&output);
        if answered == 0 {
            return Err(CoreError::LoopFailure(None));
        }

        info!(answered, "SSH reachable");
        Ok(())
    }
}

fn count_successes(output: &str) -> usize {
    output
        .lines()
        .filter(|line| line.to_lowercase().contains("success"))
        .count()
}
