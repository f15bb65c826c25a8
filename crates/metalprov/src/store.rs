//! Host records persisted to a JSON file between invocations

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use metalprov_core::{
    ConfigurationStatus, CoreError, HostRecord, HostSnapshot, HostState, HostStore,
    HostTemplate, MemoryHostStore,
};
use tracing::debug;

pub struct FileHostStore {
    path: PathBuf,
    inner: MemoryHostStore,
}

impl FileHostStore {
    /// Open the store at `path`; a missing file is an empty store
    ///
    /// # Errors
    /// `CoreError::Store` if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();

        let snapshot: HostSnapshot = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| CoreError::Store(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HostSnapshot::default(),
            Err(e) => return Err(CoreError::Store(format!("{}: {e}", path.display()))),
        };
        debug!(
            path = %path.display(),
            hosts = snapshot.hosts.len(),
            next_id = snapshot.next_id,
            "opened host store"
        );

        Ok(Self {
            path,
            inner: MemoryHostStore::from_snapshot(snapshot),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), CoreError> {
        let snapshot = self.inner.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CoreError::Store(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Store(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| CoreError::Store(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl HostStore for FileHostStore {
    async fn allocate(
        &self,
        name: &str,
        cluster_id: i32,
        template: HostTemplate,
    ) -> Result<HostRecord, CoreError> {
        let record = self.inner.allocate(name, cluster_id, template).await?;
        self.persist().await?;
        Ok(record)
    }

    async fn info(&self, id: u32) -> Result<HostRecord, CoreError> {
        self.inner.info(id).await
    }

    async fn list(&self) -> Result<Vec<HostRecord>, CoreError> {
        self.inner.list().await
    }

    async fn set_state(&self, id: u32, state: HostState) -> Result<(), CoreError> {
        self.inner.set_state(id, state).await?;
        self.persist().await
    }

    async fn set_configuration_status(
        &self,
        id: u32,
        status: ConfigurationStatus,
    ) -> Result<(), CoreError> {
        self.inner.set_configuration_status(id, status).await?;
        self.persist().await
    }

    async fn rename(&self, id: u32, name: &str) -> Result<(), CoreError> {
        self.inner.rename(id, name).await?;
        self.persist().await
    }

    async fn mark_monitored(&self, id: u32) -> Result<(), CoreError> {
        self.inner.mark_monitored(id).await?;
        self.persist().await
    }

    async fn delete(&self, id: u32) -> Result<(), CoreError> {
        self.inner.delete(id).await?;
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state/hosts.json");

        let store = FileHostStore::open(&path).await.unwrap();
        let host = store
            .allocate("provision-1", -1, HostTemplate::default())
            .await
            .unwrap();
        store.set_state(host.id, HostState::Offline).await.unwrap();
        store.rename(host.id, "10.0.0.5").await.unwrap();

        let reopened = FileHostStore::open(&path).await.unwrap();
        let hosts = reopened.list().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "10.0.0.5");
        assert_eq!(hosts[0].state, HostState::Offline);

        reopened.delete(host.id).await.unwrap();
        let reopened = FileHostStore::open(&path).await.unwrap();
        assert!(reopened.list().await.unwrap().is_empty());

        // The deleted id stays retired across restarts
        let next = reopened
            .allocate("provision-2", -1, HostTemplate::default())
            .await
            .unwrap();
        assert_eq!(next.id, host.id + 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hosts.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileHostStore::open(&path).await,
            Err(CoreError::Store(_))
        ));
    }
}
