//! Subcommand implementations

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use kameo::actor::{ActorRef, Spawn};
use metalprov_core::{
    ConfigureHost, CoreError, DecisionProvider, DeleteHost, DeviceFile, HostActor, HostActorArgs,
    HostLifecycle, HostRecord, InteractivePrompt, MonitorHost, OrchestrationContext,
    Outcome, PolicyDecisions, ResetHost, RunMode, ask_error,
};
use metalprov_exec::{CommandRunner, LocalRunner};
use tracing::{info, warn};

use crate::store::FileHostStore;

pub struct App {
    lifecycle: Arc<HostLifecycle>,
}

impl App {
    /// Wire the lifecycle coordinator for this invocation
    ///
    /// # Errors
    /// `CoreError::Store` if the host records cannot be loaded.
    pub async fn open(ctx: OrchestrationContext, state_file: &Path) -> Result<Self, CoreError> {
        let decisions: Arc<dyn DecisionProvider> = match ctx.mode {
            RunMode::Batch => Arc::new(PolicyDecisions::new(ctx.fail_policy)),
            RunMode::Interactive => Arc::new(InteractivePrompt::new(ctx.fail_policy)),
        };
        let store = Arc::new(FileHostStore::open(state_file).await?);
        let runner: Arc<dyn CommandRunner> = Arc::new(LocalRunner::new());
        info!(
            path = %store.path().display(),
            mode = ?ctx.mode,
            runner = runner.runner_type(),
            "host store ready"
        );

        let lifecycle = HostLifecycle::new(Arc::new(ctx), store, runner, decisions);

        Ok(Self {
            lifecycle: Arc::new(lifecycle),
        })
    }

    async fn host_actor(&self, id: u32) -> Result<ActorRef<HostActor>, CoreError> {
        // Surface unknown ids before the actor starts
        self.lifecycle.store().info(id).await?;

        Ok(HostActor::spawn(HostActorArgs {
            host_id: id,
            lifecycle: self.lifecycle.clone(),
        }))
    }

    pub async fn create(&self, file: &Path, probe: bool) -> Result<(), CoreError> {
        let content = tokio::fs::read_to_string(file)
            .await
            .map_err(|e| CoreError::DeviceConfig(format!("{}: {e}", file.display())))?;
        let devices = DeviceFile::from_yaml(&content)?.devices();
        if devices.is_empty() {
            return Err(CoreError::DeviceConfig("no devices defined".to_string()));
        }

        for device in &devices {
            match self.lifecycle.provision(device, probe).await? {
                Outcome::Completed(record) => println!("ID: {}", record.id),
                Outcome::Skipped => warn!("device skipped"),
            }
        }

        Ok(())
    }

    pub async fn configure(&self, id: u32, probe: bool) -> Result<(), CoreError> {
        let actor = self.host_actor(id).await?;
        let result = actor.ask(ConfigureHost { probe }).await.map_err(ask_error);
        stop(actor).await;

        if result?.skipped {
            warn!(host_id = id, "configuration skipped");
        }
        Ok(())
    }

    pub async fn delete(&self, id: u32) -> Result<(), CoreError> {
        let actor = self.host_actor(id).await?;
        let result = actor.ask(DeleteHost).await.map_err(ask_error);
        stop(actor).await;
        result
    }

    pub async fn reset(&self, id: u32, hard: bool) -> Result<(), CoreError> {
        let actor = self.host_actor(id).await?;
        let result = actor.ask(ResetHost { hard }).await.map_err(ask_error);
        stop(actor).await;

        if let Some(name) = result?.renamed {
            println!("NAME: {name}");
        }
        Ok(())
    }

    pub async fn monitor(&self, id: u32) -> Result<(), CoreError> {
        let actor = self.host_actor(id).await?;
        let result = actor.ask(MonitorHost).await.map_err(ask_error);
        stop(actor).await;

        match result?.report {
            Some(report) => {
                for (key, value) in report {
                    println!("{key}={value}");
                }
            }
            None => warn!(host_id = id, "monitoring skipped"),
        }
        Ok(())
    }

    pub async fn list(&self) -> Result<(), CoreError> {
        let hosts = self.lifecycle.store().list().await?;
        print!("{}", render_table(&hosts));
        Ok(())
    }
}

async fn stop(actor: ActorRef<HostActor>) {
    if let Err(e) = actor.stop_gracefully().await {
        warn!(error = ?e, "failed to stop host actor");
    }
}

fn render_table(hosts: &[HostRecord]) -> String {
    let mut out = format!(
        "{:>4} {:<15} {:<9} {:>3} {:>8} {:>8} {:<6}\n",
        "ID", "NAME", "CLUSTER", "RVM", "PROVIDER", "VM_MAD", "STAT"
    );

    for host in hosts {
        let cluster = if host.cluster_id < 0 {
            "-".to_string()
        } else {
            host.cluster_id.to_string()
        };
        let provider = host.template.pm_mad.as_deref().unwrap_or("-");

        let _ = writeln!(
            out,
            "{:>4} {:<15} {:<9} {:>3} {:>8} {:>8} {:<6}",
            host.id,
            truncate(&host.name, 15),
            truncate(&cluster, 9),
            host.running_vms,
            truncate(provider, 8),
            truncate(&host.template.vm_mad, 8),
            host.state,
        );
    }

    out
}

fn truncate(value: &str, width: usize) -> String {
    value.chars().take(width).collect()
}
