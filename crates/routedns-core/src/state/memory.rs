// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Purpose
//
// Provides a state store that doesn't persist across restarts. Useful for
// tests and for one-shot runs where ownership does not need to survive.
//
// ## Crash Behavior
//
// - All ownership is lost on restart
// - After a restart no existing record is owned, so nothing is deleted until
//   ownership has been re-learned

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::state_store::{OwnershipState, StateStore};

/// In-memory state store implementation
///
/// Clones share the same underlying state, which lets a test keep a handle
/// while the watch loop owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<OwnershipState>>,
    saves: Arc<std::sync::atomic::AtomicUsize>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `state`
    pub fn with_state(state: OwnershipState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
            saves: Arc::default(),
        }
    }

    /// Snapshot of the stored state
    pub async fn snapshot(&self) -> OwnershipState {
        self.inner.read().await.clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> OwnershipState {
        self.inner.read().await.clone()
    }

    async fn save(&self, state: &OwnershipState) -> Result<(), Error> {
        *self.inner.write().await = state.clone();
        self.saves
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
