use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use palisade_common::{write_file_atomically, IndexMap};

use crate::config::AttemptsConfig;
use crate::identity::Identity;

/// A connection that was turned away because the identity is not listed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAttempt {
    pub identity: Identity,
    /// Human-readable name shown alongside the identity, such as the account
    /// name belonging to a UUID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_addr: Option<SocketAddr>,
    /// Seconds since the UNIX epoch
    pub timestamp: i64,
}

impl ConnectionAttempt {
    pub fn new(identity: Identity, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            identity,
            name: None,
            peer_addr,
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    pub fn with_name(mut self, name: Option<&str>) -> Self {
        self.name = name.map(|name| name.trim().to_owned()).filter(|name| !name.is_empty());

        self
    }
}

/// Bounded record of recently denied identities, at most one per identity
///
/// Changes are kept in memory and written out by [`Self::flush_if_dirty`],
/// so recording never touches the disk.
pub struct ConnectionAttemptLog {
    config: AttemptsConfig,
    attempts: Mutex<IndexMap<Identity, ConnectionAttempt>>,
    dirty: AtomicBool,
}

impl ConnectionAttemptLog {
    pub fn new(config: AttemptsConfig) -> Self {
        Self {
            config,
            attempts: Default::default(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load previously persisted attempts. A missing file yields an empty
    /// log, an unreadable one is logged and ignored.
    pub fn load(config: AttemptsConfig) -> Self {
        let log = Self::new(config);

        match log.read_persisted() {
            Ok(mut attempts) => {
                attempts.sort_by_key(|attempt| attempt.timestamp);

                let mut map = log.attempts.lock();

                for attempt in attempts {
                    map.shift_remove(&attempt.identity);
                    map.insert(attempt.identity.clone(), attempt);
                }

                Self::evict_oldest(&mut map, log.config.max_entries);
            }
            Err(err) => {
                ::log::error!("Loading connection attempts failed: {:#}", err);
            }
        }

        log
    }

    fn read_persisted(&self) -> anyhow::Result<Vec<ConnectionAttempt>> {
        let path = &self.config.path;

        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read connection attempts {}", path.display()))
            }
        };

        serde_json::from_str(&data)
            .with_context(|| format!("parse connection attempts {}", path.display()))
    }

    /// Record an attempt, replacing any earlier one by the same identity.
    /// A name recorded earlier is kept if the new attempt has none.
    pub fn record(&self, mut attempt: ConnectionAttempt) {
        if !self.config.enabled {
            return;
        }

        let mut attempts = self.attempts.lock();

        if let Some(previous) = attempts.shift_remove(&attempt.identity) {
            if attempt.name.is_none() {
                attempt.name = previous.name;
            }
        }

        attempts.insert(attempt.identity.clone(), attempt);

        Self::evict_oldest(&mut attempts, self.config.max_entries);

        self.dirty.store(true, Ordering::Release);
    }

    pub fn remove(&self, identity: &Identity) -> Option<ConnectionAttempt> {
        let removed = self.attempts.lock().shift_remove(identity);

        if removed.is_some() {
            self.dirty.store(true, Ordering::Release);
        }

        removed
    }

    pub fn get(&self, identity: &Identity) -> Option<ConnectionAttempt> {
        self.attempts.lock().get(identity).cloned()
    }

    pub fn clear(&self) {
        self.attempts.lock().clear();
        self.dirty.store(true, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.attempts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recorded attempts, newest first
    pub fn pending(&self) -> Vec<ConnectionAttempt> {
        let mut attempts: Vec<ConnectionAttempt> =
            self.attempts.lock().values().rev().cloned().collect();

        // Stable, so equal timestamps keep most recently recorded first
        attempts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        attempts
    }

    pub fn flush_if_dirty(&self) -> anyhow::Result<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            if let Err(err) = self.save() {
                self.dirty.store(true, Ordering::Release);

                return Err(err);
            }
        }

        Ok(())
    }

    fn save(&self) -> anyhow::Result<()> {
        let attempts: Vec<ConnectionAttempt> = self.attempts.lock().values().cloned().collect();

        let data =
            serde_json::to_vec_pretty(&attempts).context("serialize connection attempts")?;

        write_file_atomically(&self.config.path, &data)
    }

    fn evict_oldest(attempts: &mut IndexMap<Identity, ConnectionAttempt>, max_entries: usize) {
        while attempts.len() > max_entries {
            let oldest = attempts
                .iter()
                .enumerate()
                .min_by_key(|(_, (_, attempt))| attempt.timestamp)
                .map(|(index, _)| index);

            match oldest {
                Some(index) => {
                    attempts.shift_remove_index(index);
                }
                None => break,
            }
        }
    }
}
