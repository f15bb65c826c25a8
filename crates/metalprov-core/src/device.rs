//! Device descriptions and section merging

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::CoreError;

/// One configuration section: top-level key to arbitrary YAML value
pub type Section = BTreeMap<String, Value>;

/// Built-in connection defaults
pub fn connection_defaults() -> Section {
    let mut section = Section::new();
    section.insert("remote_user".to_string(), Value::from("root"));
    section.insert("remote_port".to_string(), Value::from(22));
    section.insert(
        "public_key".to_string(),
        Value::from("/var/lib/one/.ssh/ddc/id_rsa.pub"),
    );
    section.insert(
        "private_key".to_string(),
        Value::from("/var/lib/one/.ssh/ddc/id_rsa"),
    );
    section
}

/// Shallow merge: `defaults`, then `global`, then `device`; later keys win
pub fn merge_section(
    defaults: Section,
    global: Option<&Section>,
    device: Option<&Section>,
) -> Section {
    let mut merged = defaults;
    for layer in [global, device].into_iter().flatten() {
        merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Sections as written in the device file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceEntry {
    #[serde(default)]
    pub connection: Option<Section>,
    #[serde(default)]
    pub provision: Option<Section>,
    #[serde(default)]
    pub configuration: Option<Section>,
}

/// A YAML device file: global sections plus a `devices` list
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceFile {
    #[serde(default)]
    pub connection: Option<Section>,
    #[serde(default)]
    pub provision: Option<Section>,
    #[serde(default)]
    pub configuration: Option<Section>,
    pub devices: Vec<DeviceEntry>,
}

impl DeviceFile {
    /// Parse a device file
    ///
    /// # Errors
    /// `CoreError::DeviceConfig` on malformed YAML or a missing `devices` list.
    pub fn from_yaml(content: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(content).map_err(|e| CoreError::DeviceConfig(e.to_string()))
    }

    /// Fully merged sections for every device
    pub fn devices(&self) -> Vec<DeviceSpec> {
        self.devices
            .iter()
            .map(|device| DeviceSpec {
                connection: merge_section(
                    connection_defaults(),
                    self.connection.as_ref(),
                    device.connection.as_ref(),
                ),
                provision: merge_section(
                    Section::new(),
                    self.provision.as_ref(),
                    device.provision.as_ref(),
                ),
                configuration: merge_section(
                    Section::new(),
                    self.configuration.as_ref(),
                    device.configuration.as_ref(),
                ),
            })
            .collect()
    }
}

/// A single provisioning unit after merging
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceSpec {
    /// Remote access parameters
    pub connection: Section,
    /// Driver name (`driver`) and driver-specific parameters
    pub provision: Section,
    /// Data handed to the configuration run
    pub configuration: Section,
}

impl DeviceSpec {
    /// Provision driver name, if set
    #[must_use]
    pub fn driver(&self) -> Option<String> {
        self.provision
            .get("driver")
            .map(value_to_string)
            .filter(|d| !d.is_empty())
    }
}

/// Flatten a YAML scalar for a host template; composite values are re-serialized
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
