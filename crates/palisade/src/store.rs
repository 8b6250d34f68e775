use std::path::Path;
use std::sync::Arc;

use arc_swap::{ArcSwapOption, Cache};
use parking_lot::{Mutex, MutexGuard};

use crate::identity::Identity;
use crate::snapshot::AllowListSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no allow-list has been loaded yet")]
pub struct StoreUnavailable;

pub type SnapshotArcSwap = ArcSwapOption<AllowListSnapshot>;
pub type SnapshotCache = Cache<Arc<SnapshotArcSwap>, Option<Arc<AllowListSnapshot>>>;

/// Process-wide allow-list state
///
/// Holds at most one current snapshot. Readers load it without locking.
/// Writers (reloads and admin mutations) are serialized among themselves
/// through a separate mutex that readers never touch.
///
/// Cloning returns another handle to the same state.
#[derive(Clone, Default)]
pub struct AccessStore {
    current: Arc<SnapshotArcSwap>,
    writer: Arc<Mutex<()>>,
}

impl AccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: AllowListSnapshot) -> Self {
        let store = Self::default();

        store.replace(snapshot);

        store
    }

    pub fn lookup(&self, identity: &Identity) -> Result<bool, StoreUnavailable> {
        match self.current.load().as_deref() {
            Some(snapshot) => Ok(snapshot.contains(identity)),
            None => Err(StoreUnavailable),
        }
    }

    pub fn current_snapshot(&self) -> Result<Arc<AllowListSnapshot>, StoreUnavailable> {
        self.current.load_full().ok_or(StoreUnavailable)
    }

    /// Atomically publish a new snapshot. Last writer wins.
    pub fn replace<S>(&self, snapshot: S)
    where
        S: Into<Arc<AllowListSnapshot>>,
    {
        self.current.store(Some(snapshot.into()));
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }

    /// Create a per-thread reader that avoids touching shared reference
    /// counts on every load
    pub fn cache(&self) -> SnapshotCache {
        Cache::new(Arc::clone(&self.current))
    }

    /// Read and parse the allow-list file, replacing the current snapshot
    /// on success unless it lists the same identities. On failure the
    /// current snapshot is left untouched.
    pub fn reload_from_path(&self, path: &Path) -> anyhow::Result<()> {
        let _writer = self.lock_writer();

        match AllowListSnapshot::read_from_path(path) {
            Ok(snapshot) => {
                let unchanged = self
                    .current
                    .load()
                    .as_deref()
                    .map_or(false, |current| current.same_identities(&snapshot));

                if unchanged {
                    ::log::debug!("Allow-list {} unchanged", path.display());
                } else {
                    ::log::info!(
                        "Allow-list reloaded from {} ({} identities)",
                        path.display(),
                        snapshot.len()
                    );

                    self.replace(snapshot);
                }

                Ok(())
            }
            Err(err) => {
                ::log::error!("Reloading allow-list failed, keeping previous one: {:#}", err);

                Err(err)
            }
        }
    }

    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }
}
