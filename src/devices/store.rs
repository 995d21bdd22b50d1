//! Durable storage for device registry snapshots
//!
//! The whole registry is persisted as one JSON object keyed by identity.
//! Stores are pure persistence: policy (when to write, what to do on
//! failure) lives in the session manager.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use super::types::DeviceMap;
use crate::{Error, Result};

/// Storage interface for registry snapshots
#[async_trait]
pub trait RegistryStore: Send + Sync + std::fmt::Debug {
    /// Load the persisted snapshot
    ///
    /// A store that has never been written returns an empty map.
    async fn load(&self) -> Result<DeviceMap>;

    /// Replace the persisted snapshot
    ///
    /// Must be atomic: a reader sees the old snapshot or the new one,
    /// never a mix.
    async fn save(&self, snapshot: &DeviceMap) -> Result<()>;

    /// Short human-readable location, for logs
    fn describe(&self) -> String;
}

/// Load a snapshot, falling back to an empty map on any failure
///
/// Startup never fails because of a bad registry file.
pub async fn load_or_empty(store: &dyn RegistryStore) -> DeviceMap {
    match store.load().await {
        Ok(devices) => {
            tracing::info!(
                store = %store.describe(),
                count = devices.len(),
                "loaded device registry"
            );
            devices
        }
        Err(e) => {
            tracing::error!(
                store = %store.describe(),
                error = %e,
                "failed to load device registry, starting empty"
            );
            DeviceMap::new()
        }
    }
}

/// Registry snapshot stored as a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by the given file path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

#[async_trait]
impl RegistryStore for JsonFileStore {
    async fn load(&self) -> Result<DeviceMap> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DeviceMap::new()),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "read {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_str(&content)
            .map_err(|e| Error::Persistence(format!("parse {}: {e}", self.path.display())))
    }

    async fn save(&self, snapshot: &DeviceMap) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::Persistence(format!("create {}: {e}", parent.display()))
            })?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;

        // Write atomically via temp file
        let temp_path = self.temp_path();
        fs::write(&temp_path, json.as_bytes()).await.map_err(|e| {
            Error::Persistence(format!("write {}: {e}", temp_path.display()))
        })?;
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::Persistence(format!("rename {}: {e}", temp_path.display()))
        })?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Registry snapshot held in memory
///
/// Useful for tests and for running without durability.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<DeviceMap>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    /// Create an empty in-memory store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a snapshot
    #[must_use]
    pub fn with_snapshot(snapshot: DeviceMap) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// The most recently saved snapshot
    pub async fn current(&self) -> Option<DeviceMap> {
        self.snapshot.lock().await.clone()
    }

    /// Number of successful saves so far
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail, simulating a broken disk
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn load(&self) -> Result<DeviceMap> {
        Ok(self.snapshot.lock().await.clone().unwrap_or_default())
    }

    async fn save(&self, snapshot: &DeviceMap) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Persistence("memory store rejected write".to_string()));
        }
        *self.snapshot.lock().await = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::devices::{DeviceIdentity, DeviceRegistry, Registration};

    fn sample_snapshot() -> DeviceMap {
        let mut registry = DeviceRegistry::new();
        let a = DeviceIdentity::parse("agentA").unwrap();
        let b = DeviceIdentity::parse("agentB").unwrap();
        registry.upsert_on_register(
            &a,
            Registration {
                external_id: Some("m-1".to_string()),
                start_time: Some(1),
                remote_address: Some("10.0.0.1:1000".to_string()),
            },
            100,
        );
        registry.upsert_on_register(&b, Registration::default(), 200);
        registry.mark_offline(&b, 300, "remote_close:1000");
        registry.snapshot()
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("devices.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_but_load_or_empty_recovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load().await, Err(Error::Persistence(_))));
        assert!(load_or_empty(&store).await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_with_invalid_identity_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        let store = JsonFileStore::new(&path);
        store.save(&sample_snapshot()).await.unwrap();

        let mut raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let devices = raw.as_object_mut().unwrap();
        let record = devices.remove("agentA").unwrap();
        devices.insert("ab".to_string(), record);
        std::fs::write(&path, raw.to_string()).unwrap();

        assert!(matches!(store.load().await, Err(Error::Persistence(_))));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("devices.json"));
        let snapshot = sample_snapshot();

        store.save(&snapshot).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state/devices.json");
        let store = JsonFileStore::new(&path);

        store.save(&sample_snapshot()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn no_temp_file_after_save() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("devices.json"));
        store.save(&sample_snapshot()).await.unwrap();

        assert!(!dir.path().join("devices.json.tmp").exists());
    }

    #[tokio::test]
    async fn overwrites_existing_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("devices.json"));
        store.save(&sample_snapshot()).await.unwrap();
        store.save(&DeviceMap::new()).await.unwrap();

        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persisted_json_is_keyed_by_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        JsonFileStore::new(&path)
            .save(&sample_snapshot())
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["agentA"]["externalId"], "m-1");
        assert_eq!(raw["agentB"]["lastDisconnectReason"], "remote_close:1000");
    }

    #[tokio::test]
    async fn memory_store_counts_and_fails_on_demand() {
        let store = MemoryStore::new();
        store.save(&sample_snapshot()).await.unwrap();
        assert_eq!(store.save_count(), 1);

        store.set_fail_saves(true);
        assert!(store.save(&DeviceMap::new()).await.is_err());
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.current().await.unwrap().len(), 2);
    }
}
