use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use palisade_common::write_file_atomically;

use crate::attempts::ConnectionAttemptLog;
use crate::gate::AccessGate;
use crate::identity::Identity;
use crate::snapshot::AllowListSnapshot;

/// Administrative operations on the allow-list
///
/// Every mutation derives a new snapshot from the current one, persists it
/// to the allow-list file and then publishes it, taking the same path as a
/// file reload. Mutations are refused until a list has been loaded, so an
/// unknown list is never overwritten.
pub struct AdminInterface {
    gate: AccessGate,
    path: PathBuf,
    attempts: Option<Arc<ConnectionAttemptLog>>,
}

impl AdminInterface {
    pub fn new(gate: AccessGate, path: PathBuf) -> Self {
        Self {
            gate,
            path,
            attempts: None,
        }
    }

    /// Clear recorded attempts of identities as they get added
    pub fn with_attempt_log(mut self, attempts: Arc<ConnectionAttemptLog>) -> Self {
        self.attempts = Some(attempts);

        self
    }

    /// Returns false if the identity was already listed
    pub fn add(&self, identity: &Identity) -> anyhow::Result<bool> {
        let added = self.modify(|current| {
            if current.contains(identity) {
                None
            } else {
                Some(current.with_added(identity.clone()))
            }
        })?;

        if let Some(attempts) = self.attempts.as_ref() {
            attempts.remove(identity);
        }

        if added {
            ::log::info!("Added {} to allow-list", identity);
        }

        Ok(added)
    }

    /// Returns false if the identity was not listed
    pub fn remove(&self, identity: &Identity) -> anyhow::Result<bool> {
        let removed = self.modify(|current| {
            if current.contains(identity) {
                Some(current.with_removed(identity))
            } else {
                None
            }
        })?;

        if removed {
            ::log::info!("Removed {} from allow-list", identity);
        }

        Ok(removed)
    }

    /// Listed identities in ascending order
    pub fn list(&self) -> anyhow::Result<Vec<Identity>> {
        Ok(self.gate.store().current_snapshot()?.sorted())
    }

    pub fn set_enforced(&self, enforced: bool) {
        self.gate.set_enforced(enforced);

        if enforced {
            ::log::info!("Allow-list enforcement enabled");
        } else {
            ::log::warn!("Allow-list enforcement disabled, all identities will be allowed");
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.gate.is_enforced()
    }

    /// Apply `f` to the allow-list. `None` means nothing changes.
    ///
    /// The file is read again first so that edits the watcher hasn't picked
    /// up yet are kept. If it can't be read or parsed, the current snapshot
    /// is used instead.
    fn modify<F>(&self, f: F) -> anyhow::Result<bool>
    where
        F: FnOnce(&AllowListSnapshot) -> Option<AllowListSnapshot>,
    {
        let store = self.gate.store();
        let _writer = store.lock_writer();

        let current = store.current_snapshot()?;

        let base = match AllowListSnapshot::read_from_path(&self.path) {
            Ok(on_disk) => Arc::new(on_disk),
            Err(err) => {
                ::log::warn!(
                    "Couldn't read allow-list before modifying it, using loaded one: {:#}",
                    err
                );

                current.clone()
            }
        };

        let updated = match f(&base) {
            Some(updated) => updated,
            None => {
                // Publish external edits found on the way
                if !base.same_identities(&current) {
                    store.replace(base);
                }

                return Ok(false);
            }
        };

        write_file_atomically(&self.path, updated.to_file_contents().as_bytes())
            .with_context(|| format!("Couldn't persist allow-list to {}", self.path.display()))?;

        store.replace(updated);

        Ok(true)
    }
}
