//! Configuration loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use metalprov_core::{AnsibleSettings, HostDefaults, OrchestrationContext, RetryDecision};
use serde::{Deserialize, Serialize};

/// Top-level configuration for metalprov
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub ansible: AnsibleSettings,
    #[serde(default)]
    pub host: HostDefaults,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of driver scripts
    #[serde(default = "default_remotes_dir")]
    pub remotes_dir: PathBuf,
    /// Directory holding `site.yml`
    #[serde(default = "default_playbook_dir")]
    pub playbook_dir: PathBuf,
    /// Host records
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            remotes_dir: default_remotes_dir(),
            playbook_dir: default_playbook_dir(),
            state_file: default_state_file(),
        }
    }
}

fn default_remotes_dir() -> PathBuf {
    PathBuf::from("/var/lib/one/remotes")
}

fn default_playbook_dir() -> PathBuf {
    PathBuf::from("/usr/share/one/oneprovision/ansible")
}

fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("metalprov/hosts.json"))
        .unwrap_or_else(|| PathBuf::from("metalprov-hosts.json"))
}

/// Failure handling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Failures tolerated in batch mode
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between SSH reachability attempts
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default = "default_ping_retries")]
    pub ping_retries: u32,
    #[serde(default = "default_fail_policy")]
    pub fail_policy: RetryDecision,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            ping_timeout: default_ping_timeout(),
            ping_retries: default_ping_retries(),
            fail_policy: default_fail_policy(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_ping_timeout() -> u64 {
    20
}

fn default_ping_retries() -> u32 {
    10
}

fn default_fail_policy() -> RetryDecision {
    RetryDecision::Quit
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("failed to parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Load from an explicit path, the default paths, or use defaults
    ///
    /// # Errors
    /// Returns error if a located file cannot be read or parsed
    pub fn load_default(explicit: Option<&Path>) -> eyre::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        // Check environment variable
        if let Ok(path) = std::env::var("METALPROV_CONFIG") {
            return Self::load(Path::new(&path));
        }

        // Try common paths
        let paths = [
            PathBuf::from("metalprov.toml"),
            PathBuf::from("/etc/metalprov/metalprov.toml"),
            dirs::config_dir()
                .map(|p| p.join("metalprov/metalprov.toml"))
                .unwrap_or_default(),
        ];

        for path in paths {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "loading config");
                return Self::load(&path);
            }
        }

        tracing::debug!("no config file found, using defaults");
        Ok(Config::default())
    }

    /// Orchestration settings from this file, before command line overrides
    #[must_use]
    pub fn context(&self) -> OrchestrationContext {
        OrchestrationContext {
            max_retries: self.run.max_retries,
            fail_policy: self.run.fail_policy,
            ping_timeout: Duration::from_secs(self.run.ping_timeout),
            ping_retries: self.run.ping_retries,
            remotes_dir: self.paths.remotes_dir.clone(),
            playbook_dir: self.paths.playbook_dir.clone(),
            ansible: self.ansible.clone(),
            host: self.host.clone(),
            ..OrchestrationContext::default()
        }
    }
}
