//! Message types for actor communication
//!
//! Message handlers are implemented in their respective actor modules.

use kameo_macros::Reply;

use crate::monitor::PollReport;

// ============================================================================
// HostActor Messages
// ============================================================================

/// Run the stored configuration against the host
#[derive(Debug)]
pub struct ConfigureHost {
    /// Wait for SSH before running the playbook
    pub probe: bool,
}

/// Configuration result
#[derive(Debug, Clone, Reply)]
pub struct ConfigureResult {
    /// Whether the operator skipped the failing run
    pub skipped: bool,
}

/// Release the physical host and remove its record
#[derive(Debug)]
pub struct DeleteHost;

/// Reboot or reset the physical host
#[derive(Debug)]
pub struct ResetHost {
    pub hard: bool,
}

#[derive(Debug, Clone, Reply)]
pub struct ResetResult {
    /// New host name after a hard reset
    pub renamed: Option<String>,
}

/// Poll the driver for monitoring data
#[derive(Debug)]
pub struct MonitorHost;

#[derive(Debug, Clone, Reply)]
pub struct MonitorResult {
    /// Parsed report, `None` when skipped
    pub report: Option<PollReport>,
}

/// Fetch the current host record
#[derive(Debug)]
pub struct GetRecord;
