//! Process-wide selected-database handle (component P).
//!
//! The crate exposes one "currently selected" [`Store`] at a time, guarded by
//! a generation counter so that callers holding a stale handle (from before a
//! database switch) can detect the swap instead of silently operating on the
//! wrong pool.

use crate::error::{Result, StoreError};
use crate::store::Store;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

static GENERATION: AtomicU64 = AtomicU64::new(0);

struct Selected {
    store: Arc<Store>,
    generation: u64,
}

/// Holds the process-global selected database, if any.
pub struct Runtime {
    selected: RwLock<Option<Selected>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            selected: RwLock::new(None),
        }
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a new active store, bumping the generation counter.
    pub async fn select(&self, store: Store) -> u64 {
        let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, "selecting database");
        let mut guard = self.selected.write().await;
        *guard = Some(Selected {
            store: Arc::new(store),
            generation,
        });
        generation
    }

    /// Clear the selection without choosing a new one.
    pub async fn deselect(&self) {
        let mut guard = self.selected.write().await;
        *guard = None;
    }

    /// Current store handle, or `StoreError::NotSelected`.
    pub async fn current(&self) -> Result<Arc<Store>> {
        let guard = self.selected.read().await;
        guard
            .as_ref()
            .map(|s| s.store.clone())
            .ok_or(StoreError::NotSelected.into())
    }

    /// Current generation, or `None` if nothing is selected.
    pub async fn generation(&self) -> Option<u64> {
        self.selected.read().await.as_ref().map(|s| s.generation)
    }

    /// True iff `generation` is still the active one (i.e. no swap happened since).
    pub async fn is_current(&self, generation: u64) -> bool {
        self.generation().await == Some(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn select_bumps_generation_and_invalidates_old_handle() {
        let runtime = Runtime::new();
        assert!(runtime.current().await.is_err());

        let store_a = Store::open_in_memory().await.unwrap();
        let gen_a = runtime.select(store_a).await;
        assert!(runtime.is_current(gen_a).await);

        let store_b = Store::open_in_memory().await.unwrap();
        let gen_b = runtime.select(store_b).await;

        assert_ne!(gen_a, gen_b);
        assert!(!runtime.is_current(gen_a).await);
        assert!(runtime.is_current(gen_b).await);
    }

    #[tokio::test]
    #[serial]
    async fn deselect_clears_current() {
        let runtime = Runtime::new();
        let store = Store::open_in_memory().await.unwrap();
        runtime.select(store).await;
        runtime.deselect().await;
        assert!(runtime.current().await.is_err());
    }
}
