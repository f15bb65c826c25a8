//! metalprov-core: bare-metal provisioning orchestration
//!
//! Drives provision driver actions, SSH probing and Ansible configuration runs under
//! a single retry/skip/quit/cleanup policy, keeping host records consistent with the
//! physical hosts they describe.

pub mod actor;
pub mod ansible;
pub mod configure;
pub mod context;
pub mod decision;
pub mod device;
pub mod driver;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod message;
pub mod monitor;
pub mod probe;
pub mod record;
pub mod retry;
pub mod store;

pub use actor::{HostActor, HostActorArgs, ask_error};
pub use ansible::{AnsibleBundle, ConnectionParams};
pub use configure::ConfigurationOrchestrator;
pub use context::{AnsibleSettings, HostDefaults, OrchestrationContext, RunMode};
pub use decision::{
    DecisionProvider, FailureNotice, InteractivePrompt, PolicyDecisions, RetryDecision,
};
pub use device::{DeviceFile, DeviceSpec, Section};
pub use driver::{DriverAction, DriverActionInvoker};
pub use error::{CoreError, FATAL_EXIT_CODE};
pub use lifecycle::{Deployment, HostLifecycle};
pub use message::{
    ConfigureHost, ConfigureResult, DeleteHost, GetRecord, MonitorHost, MonitorResult, ResetHost,
    ResetResult,
};
pub use monitor::PollReport;
pub use probe::ConnectivityProbe;
pub use record::{ConfigurationStatus, HostRecord, HostState, HostTemplate};
pub use retry::{Outcome, RetryController};
pub use store::{HostSnapshot, HostStore, MemoryHostStore};
