//! `HostActor`: per-host lifecycle operations
//!
//! Owns one host id; operations against that host are processed one at a time from
//! the actor's mailbox.

use std::sync::Arc;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::{ActorStopReason, SendError};
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::lifecycle::HostLifecycle;
use crate::message::{
    ConfigureHost, ConfigureResult, DeleteHost, GetRecord, MonitorHost, MonitorResult, ResetHost,
    ResetResult,
};
use crate::record::HostRecord;

/// Arguments for spawning a `HostActor`
pub struct HostActorArgs {
    pub host_id: u32,
    /// Shared lifecycle coordinator
    pub lifecycle: Arc<HostLifecycle>,
}

pub struct HostActor {
    host_id: u32,
    lifecycle: Arc<HostLifecycle>,
    /// Set once the host record is gone
    deleted: bool,
}

impl HostActor {
    fn ensure_present(&self) -> Result<(), CoreError> {
        if self.deleted {
            return Err(CoreError::HostNotFound(self.host_id));
        }
        Ok(())
    }
}

impl Actor for HostActor {
    type Args = HostActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        // Fail fast on unknown hosts
        args.lifecycle.store().info(args.host_id).await?;
        info!(host_id = args.host_id, id = %actor_ref.id(), "HostActor starting");

        Ok(Self {
            host_id: args.host_id,
            lifecycle: args.lifecycle,
            deleted: false,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(host_id = self.host_id, reason = ?reason, "HostActor stopping");
        Ok(())
    }
}

/// Recover the handler's error from a failed `ask`
pub fn ask_error<M>(err: SendError<M, CoreError>) -> CoreError {
    match err {
        SendError::HandlerError(e) => e,
        other => {
            warn!(error = %other, "host actor unavailable");
            CoreError::ActorError(other.to_string())
        }
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<ConfigureHost> for HostActor {
    type Reply = Result<ConfigureResult, CoreError>;

    async fn handle(
        &mut self,
        msg: ConfigureHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.ensure_present()?;
        let outcome = self.lifecycle.configure(self.host_id, msg.probe).await?;

        Ok(ConfigureResult {
            skipped: outcome.is_skipped(),
        })
    }
}

impl Message<DeleteHost> for HostActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        _msg: DeleteHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.ensure_present()?;
        self.lifecycle.delete(self.host_id).await?;
        self.deleted = true;
        Ok(())
    }
}

impl Message<ResetHost> for HostActor {
    type Reply = Result<ResetResult, CoreError>;

    async fn handle(
        &mut self,
        msg: ResetHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.ensure_present()?;
        let renamed = self.lifecycle.reset(self.host_id, msg.hard).await?;
        Ok(ResetResult { renamed })
    }
}

impl Message<MonitorHost> for HostActor {
    type Reply = Result<MonitorResult, CoreError>;

    async fn handle(
        &mut self,
        _msg: MonitorHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.ensure_present()?;
        let outcome = self.lifecycle.monitor(self.host_id).await?;
        Ok(MonitorResult {
            report: outcome.into_option(),
        })
    }
}

impl Message<GetRecord> for HostActor {
    type Reply = Result<HostRecord, CoreError>;

    async fn handle(
        &mut self,
        _msg: GetRecord,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.ensure_present()?;
        self.lifecycle.store().info(self.host_id).await
    }
}
