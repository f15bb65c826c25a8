//! Configuration runs against provisioned hosts

use std::sync::Arc;

use metalprov_exec::{CommandLine, CommandRunner};
use tracing::{error, info, instrument};

use crate::ansible::{ANSIBLE_SSH_ARGS, AnsibleBundle, ConnectionParams, check_ansible_version};
use crate::context::OrchestrationContext;
use crate::device::Section;
use crate::error::CoreError;
use crate::extract::{format_report, parse_transcript};
use crate::probe::ConnectivityProbe;
use crate::record::{ConfigurationStatus, HostState};
use crate::retry::{Outcome, RetryController};
use crate::store::HostStore;

const PLAYBOOK: &str = "site.yml";

/// Hands a host over to `ansible-playbook` and tracks the result on its record
///
/// The record moves to `pending` before every playbook run and to exactly one of
/// `configured` or `error` once the run finishes.
#[derive(Clone)]
pub struct ConfigurationOrchestrator {
    ctx: Arc<OrchestrationContext>,
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn HostStore>,
    retry: RetryController,
    probe: ConnectivityProbe,
}

impl ConfigurationOrchestrator {
    pub fn new(
        ctx: Arc<OrchestrationContext>,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn HostStore>,
        retry: RetryController,
    ) -> Self {
        let probe = ConnectivityProbe::new(ctx.clone(), runner.clone(), retry.clone());
        Self {
            ctx,
            runner,
            store,
            retry,
            probe,
        }
    }

    /// Configure `targets` on behalf of host `host_id`
    ///
    /// # Errors
    /// `UnsupportedAnsible`, `Bundle`, store errors, or any error of
    /// [`RetryController::run`]. Cleanup is never offered.
    #[instrument(skip(self, targets, vars, conn), fields(targets = targets.len()))]
    pub async fn configure(
        &self,
        host_id: u32,
        targets: &[String],
        vars: &Section,
        conn: &ConnectionParams,
        probe_first: bool,
    ) -> Result<Outcome<()>, CoreError> {
        check_ansible_version(self.runner.as_ref(), &self.ctx.ansible).await?;

        let bundle = AnsibleBundle::generate(targets, vars, conn)?;
        let result = self.run_bundle(host_id, &bundle, probe_first).await;

        if self.ctx.ansible.keep_bundle {
            let path = bundle.keep();
            info!(path = %path.display(), "kept Ansible bundle");
        }

        result
    }

    async fn run_bundle(
        &self,
        host_id: u32,
        bundle: &AnsibleBundle,
        probe_first: bool,
    ) -> Result<Outcome<()>, CoreError> {
        if probe_first && self.probe.wait(bundle).await?.is_skipped() {
            info!("continuing without SSH confirmation");
        }

        self.store.set_state(host_id, HostState::Offline).await?;

        let playbook = self.ctx.playbook_dir.join(PLAYBOOK);
        let vars_arg = format!("@{}", bundle.vars_file().display());
        let cmd = CommandLine::new("ansible-playbook")
            .arg(ANSIBLE_SSH_ARGS)
            .arg("-i")
            .arg(bundle.inventory().to_string_lossy())
            .arg("-e")
            .arg(vars_arg)
            .arg(playbook.to_string_lossy());
        let opts = bundle.run_options();

        let store = &self.store;
        let runner = &self.runner;
        let cmd = &cmd;
        let opts = &opts;

        let outcome = self
            .retry
            .run("Configuration failed", false, || async move {
                store
                    .set_configuration_status(host_id, ConfigurationStatus::Pending)
                    .await?;

                let result = runner.run(cmd, opts).await;
                let failure = match result {
                    Ok(res) if res.success() => None,
                    Ok(res) => {
                        let report = format_report(&parse_transcript(&res.stdout));
                        Some(CoreError::LoopFailure((!report.is_empty()).then_some(report)))
                    }
                    Err(e) if e.is_fatal() => Some(CoreError::Interrupted),
                    Err(_) => Some(CoreError::LoopFailure(None)),
                };

                match failure {
                    None => {
                        store
                            .set_configuration_status(host_id, ConfigurationStatus::Configured)
                            .await
                    }
                    Some(e) => {
                        error!(host_id, "configuration run failed");
                        store
                            .set_configuration_status(host_id, ConfigurationStatus::Error)
                            .await?;
                        Err(e)
                    }
                }
            })
            .await?;

        if let Outcome::Completed(()) = outcome {
            self.store.set_state(host_id, HostState::Enabled).await?;
            info!(host_id, "host configured");
        }

        Ok(outcome)
    }
}
