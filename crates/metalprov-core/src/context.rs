//! Read-only settings shared by every provisioning component

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decision::RetryDecision;

/// How failures are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Prompt the operator on every failure
    #[default]
    Interactive,
    /// Never block on input; apply the configured policy
    Batch,
}

/// Supported Ansible release window and bundle handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnsibleSettings {
    /// Lowest supported version (inclusive)
    pub min_version: String,
    /// First unsupported version (exclusive)
    pub max_version: String,
    /// Leave generated bundles on disk after each attempt
    pub keep_bundle: bool,
}

impl Default for AnsibleSettings {
    fn default() -> Self {
        Self {
            min_version: "2.5".to_string(),
            max_version: "2.6".to_string(),
            keep_bundle: false,
        }
    }
}

/// Values stamped on newly created host records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostDefaults {
    /// Monitoring driver
    pub im_mad: String,
    /// Virtualization driver
    pub vm_mad: String,
    /// Target cluster (-1 for none)
    #[serde(alias = "cluster")]
    pub cluster_id: i32,
}

impl Default for HostDefaults {
    fn default() -> Self {
        Self {
            im_mad: "kvm".to_string(),
            vm_mad: "kvm".to_string(),
            cluster_id: -1,
        }
    }
}

/// Immutable orchestration settings, built once per invocation
#[derive(Debug, Clone)]
pub struct OrchestrationContext {
    /// Interactive or batch
    pub mode: RunMode,
    /// Failures tolerated in batch mode before giving up
    pub max_retries: u32,
    /// Decision applied without a prompt (and as the prompt default)
    pub fail_policy: RetryDecision,
    /// Sleep between SSH reachability attempts
    pub ping_timeout: Duration,
    /// SSH reachability attempts before escalating
    pub ping_retries: u32,
    /// Root of driver scripts; actions live at `pm/<driver>/<action>`
    pub remotes_dir: PathBuf,
    /// Directory holding `site.yml`
    pub playbook_dir: PathBuf,
    pub ansible: AnsibleSettings,
    pub host: HostDefaults,
}

impl Default for OrchestrationContext {
    fn default() -> Self {
        Self {
            mode: RunMode::Interactive,
            max_retries: 3,
            fail_policy: RetryDecision::Quit,
            ping_timeout: Duration::from_secs(20),
            ping_retries: 10,
            remotes_dir: PathBuf::from("/var/lib/one/remotes"),
            playbook_dir: PathBuf::from("/usr/share/one/oneprovision/ansible"),
            ansible: AnsibleSettings::default(),
            host: HostDefaults::default(),
        }
    }
}

impl OrchestrationContext {
    #[must_use]
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_fail_policy(mut self, policy: RetryDecision, max_retries: u32) -> Self {
        self.fail_policy = policy;
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_ping(mut self, timeout: Duration, retries: u32) -> Self {
        self.ping_timeout = timeout;
        self.ping_retries = retries;
        self
    }

    #[must_use]
    pub fn with_remotes_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.remotes_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_playbook_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.playbook_dir = dir.into();
        self
    }
}
