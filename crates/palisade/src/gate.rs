use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::identity::Identity;
use crate::snapshot::AllowListSnapshot;
use crate::store::{AccessStore, SnapshotCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// Identity is not present in the current allow-list
    NotListed,
    /// No allow-list has been loaded yet
    StoreUnavailable,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotListed => "not_listed",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    fn decide(enforced: bool, snapshot: Option<&AllowListSnapshot>, identity: &Identity) -> Self {
        if !enforced {
            return Self::Allow;
        }

        match snapshot {
            Some(snapshot) if snapshot.contains(identity) => Self::Allow,
            Some(_) => Self::Deny(DenyReason::NotListed),
            None => Self::Deny(DenyReason::StoreUnavailable),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny(reason) => write!(f, "deny {}", reason.as_str()),
        }
    }
}

/// Decides whether a connecting identity may proceed
///
/// Decisions depend only on the identity, the enforcement flag and the
/// current snapshot. No I/O happens on this path. When enforcement is turned
/// off, everyone is let in.
#[derive(Clone)]
pub struct AccessGate {
    store: AccessStore,
    enforced: Arc<AtomicBool>,
}

impl AccessGate {
    pub fn new(store: AccessStore, enforced: bool) -> Self {
        Self {
            store,
            enforced: Arc::new(AtomicBool::new(enforced)),
        }
    }

    pub fn check(&self, identity: &Identity) -> Decision {
        let snapshot = self.store.current_snapshot().ok();

        Decision::decide(self.is_enforced(), snapshot.as_deref(), identity)
    }

    /// Same as [`Self::check`], but reads the snapshot through a per-thread
    /// cache
    pub fn check_cached(&self, cache: &mut SnapshotCache, identity: &Identity) -> Decision {
        Decision::decide(self.is_enforced(), cache.load().as_deref(), identity)
    }

    pub fn is_enforced(&self) -> bool {
        self.enforced.load(Ordering::Acquire)
    }

    pub fn set_enforced(&self, enforced: bool) {
        self.enforced.store(enforced, Ordering::Release);
    }

    pub fn store(&self) -> &AccessStore {
        &self.store
    }
}
