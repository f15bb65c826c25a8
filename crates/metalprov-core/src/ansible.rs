//! Ansible bundles and tool checks
//!
//! A bundle is the set of files one configuration attempt hands to Ansible:
//! `inventory`, `group_vars/all` and `ansible.cfg`, generated into a fresh
//! temporary directory that is removed when the bundle is dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use metalprov_exec::{CommandLine, CommandRunner, RunOptions};
use tempfile::TempDir;
use tracing::debug;

use crate::context::AnsibleSettings;
use crate::device::Section;
use crate::error::CoreError;

/// Keep ephemeral host keys out of the operator's `known_hosts`
pub const ANSIBLE_SSH_ARGS: &str = "--ssh-common-args=-o UserKnownHostsFile=/dev/null";

/// Inventory group every target is placed in
pub const INVENTORY_GROUP: &str = "nodes";

/// Remote access parameters written into `ansible.cfg`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub remote_user: String,
    pub remote_port: String,
    pub private_key: String,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            remote_user: "root".to_string(),
            remote_port: "22".to_string(),
            private_key: "/var/lib/one/.ssh/ddc/id_rsa".to_string(),
        }
    }
}

impl ConnectionParams {
    /// Build from lower-cased connection keys, falling back to defaults
    #[must_use]
    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str, fallback: String| {
            map.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or(fallback)
        };

        Self {
            remote_user: get("remote_user", defaults.remote_user),
            remote_port: get("remote_port", defaults.remote_port),
            private_key: get("private_key", defaults.private_key),
        }
    }
}

/// Files backing one configuration attempt
#[derive(Debug)]
pub struct AnsibleBundle {
    dir: TempDir,
    targets: Vec<String>,
}

impl AnsibleBundle {
    /// Generate a bundle in a new temporary directory
    ///
    /// # Errors
    /// `CoreError::Bundle` if the directory or any file cannot be written.
    pub fn generate(
        targets: &[String],
        vars: &Section,
        conn: &ConnectionParams,
    ) -> Result<Self, CoreError> {
        let dir = tempfile::Builder::new()
            .prefix("metalprov-ansible-")
            .tempdir()
            .map_err(|e| CoreError::Bundle(e.to_string()))?;

        debug!(path = %dir.path().display(), "generating Ansible configurations");

        let bundle = Self {
            dir,
            targets: targets.to_vec(),
        };

        write_file_log(&bundle.inventory(), &render_inventory(targets))?;

        std::fs::create_dir(bundle.path().join("group_vars"))
            .map_err(|e| CoreError::Bundle(e.to_string()))?;
        let vars_yaml = serde_yaml::to_string(vars).map_err(|e| CoreError::Bundle(e.to_string()))?;
        write_file_log(&bundle.vars_file(), &vars_yaml)?;

        write_file_log(&bundle.config_file(), &render_config(conn))?;

        Ok(bundle)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    #[must_use]
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    #[must_use]
    pub fn inventory(&self) -> PathBuf {
        self.path().join("inventory")
    }

    #[must_use]
    pub fn vars_file(&self) -> PathBuf {
        self.path().join("group_vars").join("all")
    }

    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.path().join("ansible.cfg")
    }

    /// Options every Ansible invocation against this bundle needs
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions::new().with_env("ANSIBLE_CONFIG", self.config_file().to_string_lossy())
    }

    /// Stop managing the directory and return its path
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

fn render_inventory(targets: &[String]) -> String {
    let mut content = format!("[{INVENTORY_GROUP}]\n");
    for target in targets {
        content.push_str(target);
        content.push('\n');
    }
    content
}

fn render_config(conn: &ConnectionParams) -> String {
    format!(
        "[defaults]
retry_files_enabled = False
deprecation_warnings = False
display_skipped_hosts = False
callback_whitelist =
stdout_callback = skippy
host_key_checking = False
remote_user = {}
remote_port = {}
private_key_file = {}

[privilege_escalation]
become = yes
become_user = root
",
        conn.remote_user, conn.remote_port, conn.private_key
    )
}

fn write_file_log(path: &Path, content: &str) -> Result<(), CoreError> {
    debug!(path = %path.display(), content, "creating file");
    std::fs::write(path, content)
        .map_err(|e| CoreError::Bundle(format!("{}: {e}", path.display())))
}

/// Numeric components of a dotted version, ignoring any suffix
fn version_key(version: &str) -> Option<Vec<u64>> {
    let parts: Vec<u64> = version
        .split('.')
        .map_while(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
        .collect();

    (!parts.is_empty()).then_some(parts)
}

fn compare_versions(a: &[u64], b: &[u64]) -> std::cmp::Ordering {
    let len = a.len().max(b.len());
    let pad = |v: &[u64]| {
        let mut v = v.to_vec();
        v.resize(len, 0);
        v
    };
    pad(a).cmp(&pad(b))
}

/// Version from `ansible --version` output
///
/// Handles both `ansible 2.5.1` and `ansible [core 2.15.3]` first lines.
pub fn parse_ansible_version(output: &str) -> Option<String> {
    let first = output.lines().next()?;
    first
        .split_whitespace()
        .skip(1)
        .map(|t| t.trim_matches(|c| c == '[' || c == ']'))
        .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
}

/// Whether `found` lies in `[min, max)`
#[must_use]
pub fn version_supported(found: &str, min: &str, max: &str) -> bool {
    match (version_key(found), version_key(min), version_key(max)) {
        (Some(found), Some(min), Some(max)) => {
            compare_versions(&found, &min).is_ge() && compare_versions(&found, &max).is_lt()
        }
        _ => false,
    }
}

/// Fail unless the installed Ansible is in the supported range
///
/// # Errors
/// `CoreError::UnsupportedAnsible` when the version is out of range or cannot be
/// determined; `CoreError::Interrupted` on operator interrupt.
pub async fn check_ansible_version(
    runner: &dyn CommandRunner,
    settings: &AnsibleSettings,
) -> Result<(), CoreError> {
    let unsupported = |found: String| CoreError::UnsupportedAnsible {
        found,
        min: settings.min_version.clone(),
        max: settings.max_version.clone(),
    };

    let result = runner
        .run(&CommandLine::new("ansible").arg("--version"), &RunOptions::new())
        .await;

    let output = match result {
        Ok(res) if res.success() => res.stdout,
        Ok(_) => return Err(unsupported("unknown".to_string())),
        Err(e) if e.is_fatal() => return Err(CoreError::Interrupted),
        Err(e) => return Err(unsupported(format!("unknown ({e})"))),
    };

    let found = parse_ansible_version(&output).ok_or_else(|| unsupported("unknown".to_string()))?;
    if !version_supported(&found, &settings.min_version, &settings.max_version) {
        return Err(unsupported(found));
    }

    debug!(version = %found, "Ansible version supported");
    Ok(())
}
