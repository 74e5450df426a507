//! Lazy model registry with per-key single-flight loading.
//!
//! The registry owns a mapping from `(backend, name)` to a load slot. The
//! first request for a key performs the load; concurrent requests for the
//! same key await that one load instead of duplicating it. A failed load is
//! cached as an explicit unavailable sentinel so later requests get a
//! uniform not-found answer without re-incurring load cost. `invalidate`
//! drops a slot, forcing the next access to reload. There is no eviction:
//! entries live until process exit or invalidation.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{info, warn};

use crate::backend::BackendKind;

/// Seam between the registry and whatever produces model handles.
#[async_trait::async_trait]
pub trait ModelLoader: Send + Sync + 'static {
    type Handle: Send + 'static;

    async fn load(&self, backend: BackendKind, name: &str) -> anyhow::Result<Self::Handle>;
}

/// A load slot: unset until the first access, then either a ready handle or
/// the cached-failure sentinel (`None`).
type Slot<H> = Arc<OnceCell<Option<Arc<Mutex<H>>>>>;

pub struct ModelRegistry<L: ModelLoader> {
    loader: L,
    slots: RwLock<HashMap<(BackendKind, String), Slot<L::Handle>>>,
}

impl<L: ModelLoader> ModelRegistry<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Get the handle for `(backend, name)`, loading it on first access.
    ///
    /// Returns `None` both for a load that just failed and for one that
    /// failed earlier and was cached; callers treat either as not found.
    pub async fn get_or_load(
        &self,
        backend: BackendKind,
        name: &str,
    ) -> Option<Arc<Mutex<L::Handle>>> {
        let slot = self.slot(backend, name).await;

        slot.get_or_init(|| async {
            match self.loader.load(backend, name).await {
                Ok(handle) => {
                    info!("Loaded {} model: {}", backend, name);
                    Some(Arc::new(Mutex::new(handle)))
                }
                Err(e) => {
                    warn!("Error loading {} model {}: {:#}", backend, name, e);
                    None
                }
            }
        })
        .await
        .clone()
    }

    /// Drop the slot for `(backend, name)`. The next access reloads.
    ///
    /// Returns whether a slot existed.
    pub async fn invalidate(&self, backend: BackendKind, name: &str) -> bool {
        let removed = self
            .slots
            .write()
            .await
            .remove(&(backend, name.to_string()))
            .is_some();
        if removed {
            info!("Invalidated {} model: {}", backend, name);
        }
        removed
    }

    /// Names of successfully loaded models for one backend, sorted.
    pub async fn loaded_names(&self, backend: BackendKind) -> Vec<String> {
        let slots = self.slots.read().await;
        let mut names: Vec<String> = slots
            .iter()
            .filter(|((kind, _), slot)| {
                *kind == backend && matches!(slot.get(), Some(Some(_)))
            })
            .map(|((_, name), _)| name.clone())
            .collect();
        names.sort();
        names
    }

    async fn slot(&self, backend: BackendKind, name: &str) -> Slot<L::Handle> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(&(backend, name.to_string())) {
                return Arc::clone(slot);
            }
        }
        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry((backend, name.to_string()))
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }
}
