use std::fs;
use std::io;
use std::path::Path;
use std::thread::{Builder, JoinHandle};
use std::time::SystemTime;

use anyhow::Context;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::config::AccessConfig;
use crate::store::AccessStore;

enum ReloadMessage {
    Reload,
    Stop,
}

/// Identifies a version of the allow-list file without reading it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileFingerprint {
    /// `None` if the file can't be accessed
    pub fn read(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;

        Some(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

/// Reload the store from `path`, remembering which version of the file was
/// seen in `last_seen`
///
/// A file that was read but failed to parse counts as seen, so it isn't
/// retried until it changes. If the file exists but couldn't be read,
/// `last_seen` is left alone and the next poll tries again.
pub fn load_tracked(
    store: &AccessStore,
    path: &Path,
    last_seen: &mut Option<FileFingerprint>,
) -> anyhow::Result<()> {
    let fingerprint = FileFingerprint::read(path);

    let result = store.reload_from_path(path);

    match &result {
        Err(err) if fingerprint.is_some() && err.downcast_ref::<io::Error>().is_some() => (),
        _ => *last_seen = fingerprint,
    }

    result
}

/// Requests an immediate reload from a running [`ReloadWatcher`]
#[derive(Clone)]
pub struct ReloadTrigger(Sender<ReloadMessage>);

impl ReloadTrigger {
    /// Returns false if the watcher has stopped
    pub fn trigger(&self) -> bool {
        self.0.send(ReloadMessage::Reload).is_ok()
    }
}

/// Background thread keeping the store in sync with the allow-list file
///
/// Polls the file fingerprint every poll interval and reloads when it
/// changes. Explicit triggers reload unconditionally. Failed reloads leave
/// the current snapshot in place.
pub struct ReloadWatcher {
    sender: Sender<ReloadMessage>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl ReloadWatcher {
    /// `last_seen` is the fingerprint of the file as it was loaded before
    /// spawning, so that an unchanged file isn't immediately read again
    pub fn spawn(
        config: AccessConfig,
        store: AccessStore,
        last_seen: Option<FileFingerprint>,
    ) -> anyhow::Result<Self> {
        let (sender, receiver) = unbounded();

        let handle = Builder::new()
            .name("reload-watcher".into())
            .spawn(move || run_reload_watcher(config, store, receiver, last_seen))
            .context("spawn reload watcher")?;

        Ok(Self { sender, handle })
    }

    pub fn trigger(&self) -> ReloadTrigger {
        ReloadTrigger(self.sender.clone())
    }

    pub fn stop(self) -> anyhow::Result<()> {
        let _ = self.sender.send(ReloadMessage::Stop);

        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("reload watcher panicked")),
        }
    }
}

fn run_reload_watcher(
    config: AccessConfig,
    store: AccessStore,
    receiver: Receiver<ReloadMessage>,
    mut last_seen: Option<FileFingerprint>,
) -> anyhow::Result<()> {
    let poll_interval = config.poll_interval();

    loop {
        let message = match poll_interval {
            Some(interval) => receiver.recv_timeout(interval),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        let forced = match message {
            Ok(ReloadMessage::Reload) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Ok(ReloadMessage::Stop) | Err(RecvTimeoutError::Disconnected) => break,
        };

        if forced || FileFingerprint::read(&config.path) != last_seen {
            if !forced {
                ::log::debug!("Allow-list file {} changed", config.path.display());
            }

            // Errors are logged by reload_from_path
            let _ = load_tracked(&store, &config.path, &mut last_seen);
        }
    }

    ::log::debug!("Reload watcher stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    use palisade_common::write_file_atomically;

    use crate::identity::Identity;

    use super::*;

    fn identity(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);

        while Instant::now() < deadline {
            if condition() {
                return true;
            }

            sleep(Duration::from_millis(10));
        }

        false
    }

    #[test]
    fn test_polling_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.txt");

        fs::write(&path, "alice\n").unwrap();

        let store = AccessStore::new();

        store.reload_from_path(&path).unwrap();

        let config = AccessConfig {
            path: path.clone(),
            poll_interval_ms: 10,
            ..Default::default()
        };
        let watcher =
            ReloadWatcher::spawn(config, store.clone(), FileFingerprint::read(&path)).unwrap();

        write_file_atomically(&path, b"alice\nbob\nbobby\n").unwrap();

        assert!(wait_until(|| store.lookup(&identity("bobby")) == Ok(true)));

        let good = store.current_snapshot().unwrap();

        write_file_atomically(&path, b"alice\nbob is not an identity\n").unwrap();

        // Give the watcher several poll cycles to (fail to) pick it up
        sleep(Duration::from_millis(200));

        assert!(Arc::ptr_eq(&good, &store.current_snapshot().unwrap()));

        watcher.stop().unwrap();
    }

    #[test]
    fn test_load_tracked_retries_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.txt");

        // Reading a directory fails with an I/O error while its metadata
        // stays readable
        fs::create_dir(&path).unwrap();

        let store = AccessStore::new();
        let mut last_seen = None;

        assert!(load_tracked(&store, &path, &mut last_seen).is_err());
        assert_eq!(last_seen, None);
        assert!(!store.is_loaded());

        fs::remove_dir(&path).unwrap();
        fs::write(&path, "alice\n").unwrap();

        load_tracked(&store, &path, &mut last_seen).unwrap();

        assert_eq!(last_seen, FileFingerprint::read(&path));
        assert_eq!(store.lookup(&identity("alice")), Ok(true));
    }

    #[test]
    fn test_load_tracked_remembers_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.txt");

        fs::write(&path, "alice\nnot valid\n").unwrap();

        let store = AccessStore::new();
        let mut last_seen = None;

        assert!(load_tracked(&store, &path, &mut last_seen).is_err());
        assert_eq!(last_seen, FileFingerprint::read(&path));
        assert!(!store.is_loaded());
    }

    #[test]
    fn test_load_tracked_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.txt");

        fs::write(&path, "alice\n").unwrap();

        let store = AccessStore::new();
        let mut last_seen = None;

        load_tracked(&store, &path, &mut last_seen).unwrap();

        assert!(last_seen.is_some());

        fs::remove_file(&path).unwrap();

        // Not retried on every poll while the file is gone
        assert!(load_tracked(&store, &path, &mut last_seen).is_err());
        assert_eq!(last_seen, None);
        assert_eq!(store.lookup(&identity("alice")), Ok(true));
    }

    #[test]
    fn test_trigger_without_polling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whitelist.txt");

        let store = AccessStore::new();

        let config = AccessConfig {
            path: path.clone(),
            poll_interval_ms: 0,
            ..Default::default()
        };
        let watcher = ReloadWatcher::spawn(config, store.clone(), None).unwrap();
        let trigger = watcher.trigger();

        fs::write(&path, "carol\n").unwrap();

        assert!(trigger.trigger());
        assert!(wait_until(|| store.lookup(&identity("carol")) == Ok(true)));

        watcher.stop().unwrap();

        assert!(!trigger.trigger());
    }
}
