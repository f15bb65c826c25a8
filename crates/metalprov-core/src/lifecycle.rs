//! Host lifecycle sequencing
//!
//! [`HostLifecycle`] composes driver actions, monitoring and configuration runs into
//! the create/provision, configure, delete, reset and monitor operations. Every risky
//! step is bracketed by offlining the host record and re-enabling it afterwards.

use std::sync::Arc;

use metalprov_exec::CommandRunner;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::ansible::ConnectionParams;
use crate::configure::ConfigurationOrchestrator;
use crate::context::OrchestrationContext;
use crate::decision::DecisionProvider;
use crate::device::DeviceSpec;
use crate::driver::{DriverAction, DriverActionInvoker, check_driver};
use crate::error::CoreError;
use crate::monitor::{PollReport, parse_poll_report, provision_name};
use crate::record::{HostRecord, HostState, HostTemplate};
use crate::retry::{Outcome, RetryController};
use crate::store::HostStore;

/// A host about to be deployed: generated name plus assembled template
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Deployment {
    pub name: String,
    pub template: HostTemplate,
}

impl Deployment {
    /// Assemble the deployment for `device` under a fresh `provision-<hex>` name
    ///
    /// # Errors
    /// `CoreError::InvalidHost` if the device names no driver.
    pub fn for_device(device: &DeviceSpec, ctx: &OrchestrationContext) -> Result<Self, CoreError> {
        Ok(Self {
            name: format!("provision-{}", Uuid::new_v4().simple()),
            template: HostTemplate::for_device(device, &ctx.host)?,
        })
    }

    /// Provision driver name
    #[must_use]
    pub fn driver(&self) -> &str {
        self.template.pm_mad.as_deref().unwrap_or_default()
    }
}

pub struct HostLifecycle {
    ctx: Arc<OrchestrationContext>,
    store: Arc<dyn HostStore>,
    driver: DriverActionInvoker,
    configurator: ConfigurationOrchestrator,
    retry: RetryController,
}

impl HostLifecycle {
    pub fn new(
        ctx: Arc<OrchestrationContext>,
        store: Arc<dyn HostStore>,
        runner: Arc<dyn CommandRunner>,
        decisions: Arc<dyn DecisionProvider>,
    ) -> Self {
        let retry = RetryController::new(ctx.clone(), decisions);
        let driver = DriverActionInvoker::new(ctx.clone(), runner.clone(), retry.clone());
        let configurator =
            ConfigurationOrchestrator::new(ctx.clone(), runner, store.clone(), retry.clone());

        Self {
            ctx,
            store,
            driver,
            configurator,
            retry,
        }
    }

    #[must_use]
    pub fn context(&self) -> &OrchestrationContext {
        &self.ctx
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn HostStore> {
        &self.store
    }

    /// Ask the driver to deploy a new physical host
    ///
    /// Returns the driver-assigned deploy id.
    ///
    /// # Errors
    /// `MissingDeployId` if the driver printed nothing, `Bundle` if the deployment
    /// file cannot be written, plus driver invocation errors.
    #[instrument(skip(self, deployment), fields(name = %deployment.name))]
    pub async fn deploy(&self, deployment: &Deployment) -> Result<Outcome<String>, CoreError> {
        let json = serde_json::to_string_pretty(deployment)
            .map_err(|e| CoreError::Bundle(e.to_string()))?;
        let file = NamedTempFile::new().map_err(|e| CoreError::Bundle(e.to_string()))?;
        std::fs::write(file.path(), &json).map_err(|e| CoreError::Bundle(e.to_string()))?;
        debug!(path = %file.path().display(), content = %json, "wrote deployment file");

        info!("deploying host");
        let args = [file.path().to_string_lossy().into_owned(), "-".to_string()];
        let outcome = self
            .driver
            .invoke(deployment.driver(), DriverAction::Deploy, &args, None)
            .await?;

        match outcome {
            Outcome::Completed(stdout) => {
                let deploy_id = stdout.trim();
                if deploy_id.is_empty() {
                    return Err(CoreError::MissingDeployId);
                }
                Ok(Outcome::Completed(deploy_id.to_string()))
            }
            Outcome::Skipped => Ok(Outcome::Skipped),
        }
    }

    /// Allocate the host record for a deployed host, offline
    ///
    /// # Errors
    /// Store errors.
    #[instrument(skip(self, deployment), fields(name = %deployment.name))]
    pub async fn create(
        &self,
        deployment: Deployment,
        deploy_id: &str,
    ) -> Result<HostRecord, CoreError> {
        info!("creating host record");

        let mut template = deployment.template;
        template.set_deploy_id(deploy_id);

        let mut record = self
            .store
            .allocate(&deployment.name, self.ctx.host.cluster_id, template)
            .await?;
        self.store.set_state(record.id, HostState::Offline).await?;
        record.state = HostState::Offline;

        Ok(record)
    }

    /// Deploy, register, name and configure one device
    ///
    /// A cleanup request once the record exists tears the host down again before the
    /// request is passed on.
    ///
    /// # Errors
    /// Any error of the individual steps, `CleanupRequested` after a cleanup.
    #[instrument(skip(self, device))]
    pub async fn provision(
        &self,
        device: &DeviceSpec,
        probe: bool,
    ) -> Result<Outcome<HostRecord>, CoreError> {
        let deployment = Deployment::for_device(device, &self.ctx)?;

        let Outcome::Completed(deploy_id) = self.deploy(&deployment).await? else {
            warn!("deployment skipped");
            return Ok(Outcome::Skipped);
        };

        let record = self.create(deployment, &deploy_id).await?;
        let id = record.id;

        match self.finish_provision(id, probe).await {
            Err(CoreError::CleanupRequested) => {
                warn!(host_id = id, "cleaning up host");
                self.delete_with(id, &self.driver.clone().with_cleanup(false))
                    .await?;
                Err(CoreError::CleanupRequested)
            }
            Err(e) => Err(e),
            Ok(()) => Ok(Outcome::Completed(self.store.info(id).await?)),
        }
    }

    async fn finish_provision(&self, id: u32, probe: bool) -> Result<(), CoreError> {
        let name = self.poll_name(id).await?;
        info!(host_id = id, name = %name, "renaming host");
        self.store.rename(id, &name).await?;

        self.configure(id, probe).await?;
        Ok(())
    }

    /// Run the stored configuration against the host
    ///
    /// # Errors
    /// `HostConfiguration` if the stored configuration cannot be decoded, plus any
    /// error of [`ConfigurationOrchestrator::configure`].
    #[instrument(skip(self))]
    pub async fn configure(&self, id: u32, probe: bool) -> Result<Outcome<()>, CoreError> {
        let host = self.store.info(id).await?;

        let vars = host.template.configuration()?;
        let conn = ConnectionParams::from_map(&host.template.connection_params());

        info!(host_id = id, name = %host.name, "configuring host");
        self.configurator
            .configure(id, std::slice::from_ref(&host.name), &vars, &conn, probe)
            .await
    }

    /// Release the physical host and remove its record
    ///
    /// # Errors
    /// `InvalidHost`, `RunningWorkloads` (before any driver call), plus driver and
    /// store errors.
    pub async fn delete(&self, id: u32) -> Result<(), CoreError> {
        self.delete_with(id, &self.driver).await
    }

    #[instrument(skip(self, driver))]
    async fn delete_with(&self, id: u32, driver: &DriverActionInvoker) -> Result<(), CoreError> {
        let host = self.store.info(id).await?;
        check_driver(host.pm_mad())?;

        if host.running_vms > 0 {
            return Err(CoreError::RunningWorkloads {
                count: host.running_vms,
            });
        }

        debug!(host_id = id, "offlining host");
        self.store.set_state(id, HostState::Offline).await?;

        info!(host_id = id, "deleting host");
        driver
            .invoke(
                host.pm_mad(),
                DriverAction::Cancel,
                &driver_args(&host),
                Some(&host),
            )
            .await?;

        debug!(host_id = id, "deleting host record");
        self.store.delete(id).await
    }

    /// Reboot (soft) or reset (hard) the physical host
    ///
    /// A hard reset may change the host's address; the record is renamed and the new
    /// name returned.
    ///
    /// # Errors
    /// `InvalidHost`, driver and store errors, `ProvisionNameUnavailable` after a
    /// hard reset.
    #[instrument(skip(self))]
    pub async fn reset(&self, id: u32, hard: bool) -> Result<Option<String>, CoreError> {
        let action = if hard {
            DriverAction::Reset
        } else {
            DriverAction::Reboot
        };

        let host = self.store.info(id).await?;
        check_driver(host.pm_mad())?;

        debug!(host_id = id, "offlining host");
        self.store.set_state(id, HostState::Offline).await?;

        info!(host_id = id, action = %action, "resetting host");
        self.driver
            .invoke(host.pm_mad(), action, &driver_args(&host), Some(&host))
            .await?;

        debug!(host_id = id, "enabling host");
        self.store.set_state(id, HostState::Enabled).await?;

        if !hard {
            return Ok(None);
        }

        let name = self.poll_name(id).await?;
        self.store.rename(id, &name).await?;
        Ok(Some(name))
    }

    /// Poll the driver for the host's monitoring report
    ///
    /// # Errors
    /// `InvalidHost`, plus any error of [`RetryController::run`].
    #[instrument(skip(self))]
    pub async fn monitor(&self, id: u32) -> Result<Outcome<PollReport>, CoreError> {
        let host = self.store.info(id).await?;
        check_driver(host.pm_mad())?;

        info!(host_id = id, "monitoring host");
        let driver = &self.driver;
        let host = &host;
        let args = driver_args(host);
        let args = &args;

        let outcome = self
            .retry
            .run("Monitoring metrics failed to parse", true, || async move {
                let output = driver
                    .invoke(host.pm_mad(), DriverAction::Poll, args, Some(host))
                    .await?
                    .into_option()
                    .ok_or(CoreError::LoopFailure(None))?;

                parse_poll_report(&output).map_err(|e| CoreError::LoopFailure(Some(e)))
            })
            .await?;

        if !outcome.is_skipped() {
            self.store.mark_monitored(id).await?;
        }
        Ok(outcome)
    }

    /// Externally reachable name reported by the driver
    ///
    /// # Errors
    /// `ProvisionNameUnavailable` if monitoring was skipped or reports no address.
    pub async fn poll_name(&self, id: u32) -> Result<String, CoreError> {
        match self.monitor(id).await? {
            Outcome::Completed(report) => provision_name(&report),
            Outcome::Skipped => Err(CoreError::ProvisionNameUnavailable),
        }
    }
}

fn driver_args(host: &HostRecord) -> Vec<String> {
    vec![
        host.template.deploy_id().unwrap_or_default().to_string(),
        host.name.clone(),
    ]
}
