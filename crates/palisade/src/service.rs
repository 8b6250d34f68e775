use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use palisade_common::write_file_atomically;

use crate::admin::AdminInterface;
use crate::attempts::{ConnectionAttempt, ConnectionAttemptLog};
use crate::config::Config;
use crate::gate::{AccessGate, Decision, DenyReason};
use crate::identity::Identity;
use crate::snapshot::AllowListSnapshot;
use crate::store::{AccessStore, SnapshotCache};
use crate::workers::flush::AttemptFlusher;
use crate::workers::reload::{load_tracked, ReloadTrigger, ReloadWatcher};

/// Gate check for incoming connections that also records identities turned
/// away for not being listed
#[derive(Clone)]
pub struct ConnectionChecker {
    gate: AccessGate,
    attempts: Arc<ConnectionAttemptLog>,
}

impl ConnectionChecker {
    pub fn new(gate: AccessGate, attempts: Arc<ConnectionAttemptLog>) -> Self {
        Self { gate, attempts }
    }

    pub fn check(&self, identity: &Identity, peer_addr: Option<SocketAddr>) -> Decision {
        self.check_named(identity, None, peer_addr)
    }

    /// Like [`Self::check`], recording `name` as the display name of a
    /// denied identity
    pub fn check_named(
        &self,
        identity: &Identity,
        name: Option<&str>,
        peer_addr: Option<SocketAddr>,
    ) -> Decision {
        let decision = self.gate.check(identity);

        self.record(decision, identity, name, peer_addr);

        decision
    }

    pub fn check_cached(
        &self,
        cache: &mut SnapshotCache,
        identity: &Identity,
        peer_addr: Option<SocketAddr>,
    ) -> Decision {
        let decision = self.gate.check_cached(cache, identity);

        self.record(decision, identity, None, peer_addr);

        decision
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn attempts(&self) -> &Arc<ConnectionAttemptLog> {
        &self.attempts
    }

    fn record(
        &self,
        decision: Decision,
        identity: &Identity,
        name: Option<&str>,
        peer_addr: Option<SocketAddr>,
    ) {
        match decision {
            Decision::Allow => {
                ::log::debug!("Allowed {}", identity);
            }
            Decision::Deny(DenyReason::NotListed) => {
                ::log::info!("Denied {}: not listed", identity);

                self.attempts
                    .record(ConnectionAttempt::new(identity.clone(), peer_addr).with_name(name));
            }
            Decision::Deny(DenyReason::StoreUnavailable) => {
                ::log::warn!("Denied {}: no allow-list loaded", identity);
            }
        }
    }
}

struct Workers {
    watcher: ReloadWatcher,
    flusher: AttemptFlusher,
}

/// Owns the allow-list state and its background workers
///
/// `start` performs the initial load and spawns the workers, `stop` shuts
/// them down and persists pending state. Until a list has been loaded
/// successfully, every enforced check is denied.
pub struct WhitelistService {
    config: Config,
    checker: ConnectionChecker,
    admin: Arc<AdminInterface>,
    workers: Option<Workers>,
}

impl WhitelistService {
    pub fn new(config: Config) -> Self {
        let gate = AccessGate::new(AccessStore::new(), config.access.enforce);
        let attempts = Arc::new(ConnectionAttemptLog::load(config.attempts.clone()));
        let admin = AdminInterface::new(gate.clone(), config.access.path.clone())
            .with_attempt_log(attempts.clone());

        Self {
            checker: ConnectionChecker::new(gate, attempts),
            admin: Arc::new(admin),
            workers: None,
            config,
        }
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.workers.is_some() {
            return Ok(());
        }

        let access_config = &self.config.access;

        if access_config.create_if_missing && !access_config.path.exists() {
            write_file_atomically(
                &access_config.path,
                AllowListSnapshot::empty().to_file_contents().as_bytes(),
            )
            .context("Couldn't create allow-list file")?;

            ::log::info!("Created empty allow-list at {}", access_config.path.display());
        }

        let mut last_seen = None;

        if load_tracked(self.store(), &access_config.path, &mut last_seen).is_err() {
            ::log::warn!("Starting without an allow-list, connections will be denied");
        }

        let watcher =
            ReloadWatcher::spawn(access_config.clone(), self.store().clone(), last_seen)?;

        let flusher = match AttemptFlusher::spawn(
            self.checker.attempts().clone(),
            self.config.attempts.flush_interval(),
        ) {
            Ok(flusher) => flusher,
            Err(err) => {
                let _ = watcher.stop();

                return Err(err);
            }
        };

        self.workers = Some(Workers { watcher, flusher });

        Ok(())
    }

    pub fn stop(&mut self) -> anyhow::Result<()> {
        let workers = match self.workers.take() {
            Some(workers) => workers,
            None => return Ok(()),
        };

        let watcher_result = workers.watcher.stop();
        let flusher_result = workers.flusher.stop();

        self.checker
            .attempts()
            .flush_if_dirty()
            .context("Couldn't save connection attempts")?;

        watcher_result?;
        flusher_result?;

        ::log::info!("Whitelist service stopped");

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.workers.is_some()
    }

    pub fn check_connection(
        &self,
        identity: &Identity,
        peer_addr: Option<SocketAddr>,
    ) -> Decision {
        self.checker.check(identity, peer_addr)
    }

    pub fn check_connection_named(
        &self,
        identity: &Identity,
        name: &str,
        peer_addr: Option<SocketAddr>,
    ) -> Decision {
        self.checker.check_named(identity, Some(name), peer_addr)
    }

    /// `None` unless started
    pub fn reload_trigger(&self) -> Option<ReloadTrigger> {
        self.workers.as_ref().map(|workers| workers.watcher.trigger())
    }

    /// Returns false unless started
    pub fn trigger_reload(&self) -> bool {
        self.reload_trigger()
            .map(|trigger| trigger.trigger())
            .unwrap_or(false)
    }

    pub fn checker(&self) -> &ConnectionChecker {
        &self.checker
    }

    pub fn gate(&self) -> &AccessGate {
        self.checker.gate()
    }

    pub fn store(&self) -> &AccessStore {
        self.checker.gate().store()
    }

    pub fn admin(&self) -> &Arc<AdminInterface> {
        &self.admin
    }

    pub fn attempts(&self) -> &Arc<ConnectionAttemptLog> {
        self.checker.attempts()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
