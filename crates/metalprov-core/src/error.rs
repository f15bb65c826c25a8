//! Core error types for metalprov-core

use thiserror::Error;

/// Process exit status used for every fatal error
pub const FATAL_EXIT_CODE: i32 = 255;

/// Errors that can occur in provisioning operations
///
/// `LoopFailure` is the only variant a [`RetryController`](crate::retry::RetryController)
/// acts on. `CleanupRequested` travels up to whoever created the resources being
/// provisioned. Everything else is fatal.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// A retriable unit of work failed
    #[error("{}", .0.as_deref().unwrap_or("unknown failure"))]
    LoopFailure(Option<String>),

    /// Operator asked to tear down what was provisioned so far
    #[error("cleanup requested")]
    CleanupRequested,

    /// Operator chose cleanup where it is not offered
    #[error("cleanup unsupported for this operation")]
    CleanupUnsupported,

    /// Operator chose to quit
    #[error("quit requested after failure: {0}")]
    Quit(String),

    /// Batch mode retry ceiling exceeded
    #[error("{operation}: giving up after {attempts} failed attempts")]
    RetriesExhausted {
        /// Failing operation
        operation: String,
        /// Failed attempts so far
        attempts: u32,
    },

    /// Operator interrupt
    #[error("interrupted")]
    Interrupted,

    /// Host has no provision driver
    #[error("not a valid bare metal host")]
    InvalidHost,

    /// Driver action script missing or not executable
    #[error("driver action script not executable: {0}")]
    DriverNotExecutable(String),

    /// Deploy action printed no instance id
    #[error("driver returned no deploy id")]
    MissingDeployId,

    /// Host still runs workloads
    #[error("there are {count} running VMs on the host, terminate them and then delete the host")]
    RunningWorkloads {
        /// Running workload count
        count: u32,
    },

    /// Monitoring data carried no usable address
    #[error("failed to get provision name")]
    ProvisionNameUnavailable,

    /// Stored configuration/connection data could not be decoded
    #[error("failed to load host configuration: {0}")]
    HostConfiguration(String),

    /// Device description could not be read
    #[error("failed to read configuration: {0}")]
    DeviceConfig(String),

    /// Installed Ansible is outside the supported range
    #[error("unsupported Ansible version {found}, must be >= {min} and < {max}")]
    UnsupportedAnsible {
        /// Detected version
        found: String,
        /// Inclusive lower bound
        min: String,
        /// Exclusive upper bound
        max: String,
    },

    /// Configuration bundle could not be written
    #[error("failed to generate configuration bundle: {0}")]
    Bundle(String),

    /// Host not found in the record store
    #[error("host not found: {0}")]
    HostNotFound(u32),

    /// Record store failure
    #[error("host record store error: {0}")]
    Store(String),

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),
}

impl CoreError {
    /// Whether the error must terminate the program
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoreError::LoopFailure(_) | CoreError::CleanupRequested)
    }

    /// Exit status for the top-level handler
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        FATAL_EXIT_CODE
    }
}
