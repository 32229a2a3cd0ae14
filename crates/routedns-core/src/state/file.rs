// # File State Store
//
// File-based implementation of StateStore.
//
// ## Purpose
//
// Keeps domain ownership and instance health across daemon restarts.
//
// ## Crash Safety
//
// - Atomic writes: the new state is written to `<path>.tmp` in the same
//   directory, flushed, then renamed over the target
// - Corruption tolerance: an unreadable or unparseable file is logged and
//   treated as empty state; the next cycle re-learns ownership
//
// ## File Format
//
// ```json
// {
//   "version": 1,
//   "domains": { "app.example.com": "core" },
//   "instances": {
//     "core": {
//       "healthy": true,
//       "last_success": "2025-01-09T12:00:00Z",
//       "target_ip": "10.0.0.2"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::traits::state_store::{OwnershipState, STATE_VERSION, StateStore};

/// File-based state store
///
/// # Example
///
/// ```rust,no_run
/// use routedns_core::state::FileStateStore;
/// use routedns_core::traits::{OwnershipState, StateStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/data/state.json");
///
///     let mut state = store.load().await;
///     state.domains.insert("app.example.com".into(), "core".into());
///     store.save(&state).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Create a store backed by `path`
    ///
    /// Nothing is read or written until [`load`](StateStore::load) or
    /// [`save`](StateStore::save) is called.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the state file
    ///
    /// `Ok(None)` means there is nothing to load (missing or empty file).
    async fn read_state(&self) -> Result<Option<OwnershipState>, Error> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("State file does not exist: {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::state_store(format!(
                    "Failed to read state file {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if content.trim().is_empty() {
            tracing::debug!("State file is empty: {}", self.path.display());
            return Ok(None);
        }

        let state: OwnershipState = serde_json::from_str(&content).map_err(|e| {
            Error::state_store(format!(
                "Failed to parse state file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        if state.version != STATE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. Attempting to use it anyway.",
                STATE_VERSION,
                state.version
            );
        }

        Ok(Some(state))
    }

    /// Path of the temporary file used for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> OwnershipState {
        match self.read_state().await {
            Ok(Some(state)) => {
                tracing::debug!(
                    "Loaded state: {} domain(s), {} instance(s)",
                    state.domains.len(),
                    state.instances.len()
                );
                state
            }
            Ok(None) => OwnershipState::default(),
            Err(e) => {
                tracing::warn!("{}. Starting with empty state.", e);
                OwnershipState::default()
            }
        }
    }

    async fn save(&self, state: &OwnershipState) -> Result<(), Error> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Atomic rename (temp -> actual)
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("State written to file: {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::InstanceHealth;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    fn sample_state() -> OwnershipState {
        let mut state = OwnershipState::default();
        state
            .domains
            .insert("app.example.com".to_string(), "core".to_string());
        state.instances.insert(
            "core".to_string(),
            InstanceHealth {
                healthy: true,
                last_success: Some(chrono::Utc::now()),
                last_error: None,
                target_ip: Some([10, 0, 0, 2].into()),
            },
        );
        state
    }

    #[tokio::test]
    async fn test_missing_file_loads_default() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested").join("state.json"));

        assert_eq!(store.load().await, OwnershipState::default());
    }

    #[tokio::test]
    async fn test_save_then_load_in_new_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("state.json");

        let state = sample_state();
        assert_ok!(FileStateStore::new(&path).save(&state).await);
        assert!(path.exists());

        let reloaded = FileStateStore::new(&path).load().await;
        assert_eq!(reloaded, state);
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"not valid json {{{").await.unwrap();

        let store = FileStateStore::new(&path);
        assert_eq!(store.load().await, OwnershipState::default());
    }

    #[tokio::test]
    async fn test_empty_and_wrong_shape_load_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStateStore::new(&path);

        fs::write(&path, b"   \n").await.unwrap();
        assert_eq!(store.load().await, OwnershipState::default());

        fs::write(&path, br#"{"domains": ["not", "a", "map"]}"#)
            .await
            .unwrap();
        assert_eq!(store.load().await, OwnershipState::default());
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, br#"{"domains": {"a.example.com": "edge"}}"#)
            .await
            .unwrap();

        let state = FileStateStore::new(&path).load().await;
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.owner_of("a.example.com"), Some("edge"));
        assert!(state.instances.is_empty());
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStateStore::new(&path);

        // Write multiple updates rapidly
        for i in 0..10 {
            let mut state = OwnershipState::default();
            state
                .domains
                .insert(format!("host{}.example.com", i), "core".to_string());
            assert_ok!(store.save(&state).await);
        }

        assert!(!store.temp_path().exists());
        let final_state = FileStateStore::new(&path).load().await;
        assert_eq!(final_state.domains.len(), 1);
        assert_eq!(final_state.owner_of("host9.example.com"), Some("core"));
    }

    #[tokio::test]
    async fn test_file_uses_documented_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        FileStateStore::new(&path).save(&sample_state()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["domains"]["app.example.com"], "core");
        assert_eq!(raw["instances"]["core"]["healthy"], true);
        assert_eq!(raw["instances"]["core"]["target_ip"], "10.0.0.2");
    }

    #[tokio::test]
    async fn test_save_into_unusable_directory_fails() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").await.unwrap();

        let store = FileStateStore::new(blocker.join("state.json"));
        let err = assert_err!(store.save(&sample_state()).await);
        assert!(matches!(err, Error::StateStore(_)));
    }
}
