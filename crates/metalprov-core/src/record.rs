//! Host records as persisted by the cluster manager

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use kameo_macros::Reply;
use serde::{Deserialize, Serialize};

use crate::context::HostDefaults;
use crate::device::{DeviceSpec, Section, value_to_string};
use crate::error::CoreError;

/// Scheduling state of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Enabled,
    Offline,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostState::Enabled => write!(f, "on"),
            HostState::Offline => write!(f, "off"),
        }
    }
}

/// `PROVISION_CONFIGURATION_STATUS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationStatus {
    Pending,
    Configured,
    Error,
}

impl fmt::Display for ConfigurationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationStatus::Pending => write!(f, "pending"),
            ConfigurationStatus::Configured => write!(f, "configured"),
            ConfigurationStatus::Error => write!(f, "error"),
        }
    }
}

/// Provisioning-related template attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HostTemplate {
    pub im_mad: String,
    pub vm_mad: String,
    /// Provision driver
    pub pm_mad: Option<String>,
    /// Upper-cased driver parameters, including `DEPLOY_ID`
    #[serde(default)]
    pub provision: BTreeMap<String, String>,
    /// Upper-cased remote access parameters
    #[serde(default)]
    pub provision_connection: BTreeMap<String, String>,
    /// Base64 of the YAML configuration section
    pub provision_configuration_base64: Option<String>,
    pub provision_configuration_status: Option<ConfigurationStatus>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl HostTemplate {
    /// Assemble the template for a device about to be deployed
    ///
    /// # Errors
    /// `CoreError::InvalidHost` when the device names no driver;
    /// `CoreError::DeviceConfig` if the configuration section cannot be serialized.
    pub fn for_device(device: &DeviceSpec, defaults: &HostDefaults) -> Result<Self, CoreError> {
        let pm_mad = device.driver().ok_or(CoreError::InvalidHost)?;

        let provision = device
            .provision
            .iter()
            .filter(|(k, _)| k.as_str() != "driver")
            .map(|(k, v)| (k.to_uppercase(), value_to_string(v)))
            .collect();

        let provision_connection = device
            .connection
            .iter()
            .map(|(k, v)| (k.to_uppercase(), value_to_string(v)))
            .collect();

        let yaml = serde_yaml::to_string(&device.configuration)
            .map_err(|e| CoreError::DeviceConfig(e.to_string()))?;

        let mut context = BTreeMap::new();
        if let Some(key) = device.connection.get("public_key") {
            context.insert(
                "SSH_PUBLIC_KEY".to_string(),
                read_or_literal(&value_to_string(key)),
            );
        }

        Ok(Self {
            im_mad: defaults.im_mad.clone(),
            vm_mad: defaults.vm_mad.clone(),
            pm_mad: Some(pm_mad),
            provision,
            provision_connection,
            provision_configuration_base64: Some(STANDARD.encode(yaml)),
            provision_configuration_status: Some(ConfigurationStatus::Pending),
            context,
        })
    }

    /// Driver-assigned instance id
    #[must_use]
    pub fn deploy_id(&self) -> Option<&str> {
        self.provision.get("DEPLOY_ID").map(String::as_str)
    }

    pub fn set_deploy_id(&mut self, deploy_id: impl Into<String>) {
        self.provision.insert("DEPLOY_ID".to_string(), deploy_id.into());
    }

    /// Connection parameters with lower-cased keys
    #[must_use]
    pub fn connection_params(&self) -> BTreeMap<String, String> {
        self.provision_connection
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect()
    }

    /// Decode the stored configuration section; absent means empty
    ///
    /// # Errors
    /// `CoreError::HostConfiguration` on invalid base64 or YAML.
    pub fn configuration(&self) -> Result<Section, CoreError> {
        let Some(encoded) = &self.provision_configuration_base64 else {
            return Ok(Section::new());
        };

        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CoreError::HostConfiguration(e.to_string()))?;
        let section: Option<Section> = serde_yaml::from_slice(&raw)
            .map_err(|e| CoreError::HostConfiguration(e.to_string()))?;

        Ok(section.unwrap_or_default())
    }
}

/// A cluster manager host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Reply)]
pub struct HostRecord {
    pub id: u32,
    pub name: String,
    pub state: HostState,
    /// Workloads currently running on the host
    #[serde(default)]
    pub running_vms: u32,
    pub cluster_id: i32,
    /// Last successful monitoring poll
    #[serde(default)]
    pub last_mon_time: Option<DateTime<Utc>>,
    pub template: HostTemplate,
}

impl HostRecord {
    /// Provision driver, empty when unset
    #[must_use]
    pub fn pm_mad(&self) -> &str {
        self.template.pm_mad.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn configuration_status(&self) -> Option<ConfigurationStatus> {
        self.template.provision_configuration_status
    }
}

fn read_or_literal(value: &str) -> String {
    std::fs::read_to_string(value)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| value.to_string())
}
