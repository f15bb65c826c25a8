//! Host record access
//!
//! The cluster manager owns host records; provisioning only reads and mutates them
//! through [`HostStore`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CoreError;
use crate::record::{ConfigurationStatus, HostRecord, HostState, HostTemplate};

#[async_trait]
pub trait HostStore: Send + Sync {
    /// Create a host record and return it
    async fn allocate(
        &self,
        name: &str,
        cluster_id: i32,
        template: HostTemplate,
    ) -> Result<HostRecord, CoreError>;

    /// Fetch the current record
    async fn info(&self, id: u32) -> Result<HostRecord, CoreError>;

    async fn list(&self) -> Result<Vec<HostRecord>, CoreError>;

    async fn set_state(&self, id: u32, state: HostState) -> Result<(), CoreError>;

    async fn set_configuration_status(
        &self,
        id: u32,
        status: ConfigurationStatus,
    ) -> Result<(), CoreError>;

    async fn rename(&self, id: u32, name: &str) -> Result<(), CoreError>;

    /// Stamp a successful monitoring poll
    async fn mark_monitored(&self, id: u32) -> Result<(), CoreError>;

    async fn delete(&self, id: u32) -> Result<(), CoreError>;
}

/// Serialized form of a [`MemoryHostStore`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    /// Next id to hand out; ids of deleted hosts are never reused
    pub next_id: u32,
    pub hosts: Vec<HostRecord>,
}

#[derive(Debug, Default)]
struct Hosts {
    next_id: u32,
    records: BTreeMap<u32, HostRecord>,
}

/// In-process record store
#[derive(Debug, Default)]
pub struct MemoryHostStore {
    hosts: Mutex<Hosts>,
}

impl MemoryHostStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = HostRecord>) -> Self {
        Self::from_snapshot(HostSnapshot {
            next_id: 0,
            hosts: records.into_iter().collect(),
        })
    }

    /// Restore a store saved with [`MemoryHostStore::snapshot`]
    #[must_use]
    pub fn from_snapshot(snapshot: HostSnapshot) -> Self {
        let records: BTreeMap<u32, HostRecord> =
            snapshot.hosts.into_iter().map(|r| (r.id, r)).collect();
        let after_last = records.keys().next_back().map_or(0, |last| last + 1);

        Self {
            hosts: Mutex::new(Hosts {
                next_id: snapshot.next_id.max(after_last),
                records,
            }),
        }
    }

    pub async fn snapshot(&self) -> HostSnapshot {
        let hosts = self.hosts.lock().await;
        HostSnapshot {
            next_id: hosts.next_id,
            hosts: hosts.records.values().cloned().collect(),
        }
    }

    /// Set the running workload count (maintained by the cluster manager)
    ///
    /// # Errors
    /// `CoreError::HostNotFound` for an unknown id.
    pub async fn set_running_vms(&self, id: u32, count: u32) -> Result<(), CoreError> {
        self.modify(id, |r| r.running_vms = count).await
    }

    async fn modify(&self, id: u32, f: impl FnOnce(&mut HostRecord)) -> Result<(), CoreError> {
        let mut hosts = self.hosts.lock().await;
        let record = hosts.records.get_mut(&id).ok_or(CoreError::HostNotFound(id))?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl HostStore for MemoryHostStore {
    async fn allocate(
        &self,
        name: &str,
        cluster_id: i32,
        template: HostTemplate,
    ) -> Result<HostRecord, CoreError> {
        let mut hosts = self.hosts.lock().await;
        let id = hosts.next_id;
        hosts.next_id += 1;

        let record = HostRecord {
            id,
            name: name.to_string(),
            state: HostState::Enabled,
            running_vms: 0,
            cluster_id,
            last_mon_time: None,
            template,
        };
        hosts.records.insert(id, record.clone());
        debug!(host_id = id, name, "allocated host record");

        Ok(record)
    }

    async fn info(&self, id: u32) -> Result<HostRecord, CoreError> {
        self.hosts
            .lock()
            .await
            .records
            .get(&id)
            .cloned()
            .ok_or(CoreError::HostNotFound(id))
    }

    async fn list(&self) -> Result<Vec<HostRecord>, CoreError> {
        Ok(self.hosts.lock().await.records.values().cloned().collect())
    }

    async fn set_state(&self, id: u32, state: HostState) -> Result<(), CoreError> {
        self.modify(id, |r| r.state = state).await
    }

    async fn set_configuration_status(
        &self,
        id: u32,
        status: ConfigurationStatus,
    ) -> Result<(), CoreError> {
        self.modify(id, |r| r.template.provision_configuration_status = Some(status))
            .await
    }

    async fn rename(&self, id: u32, name: &str) -> Result<(), CoreError> {
        self.modify(id, |r| r.name = name.to_string()).await
    }

    async fn mark_monitored(&self, id: u32) -> Result<(), CoreError> {
        self.modify(id, |r| r.last_mon_time = Some(Utc::now())).await
    }

    async fn delete(&self, id: u32) -> Result<(), CoreError> {
        self.hosts
            .lock()
            .await
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or(CoreError::HostNotFound(id))
    }
}
