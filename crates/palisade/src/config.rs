use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use palisade_common::cli::LogLevel;

/// palisade configuration
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub log_level: LogLevel,
    /// Allow-list configuration
    ///
    /// The file is read on start, when its modification time or size
    /// changes, and when the program receives `SIGUSR1`. Failed reloads
    /// result in an error-level log message and the previous list stays in
    /// effect.
    pub access: AccessConfig,
    pub attempts: AttemptsConfig,
    pub network: NetworkConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            access: AccessConfig::default(),
            attempts: AttemptsConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl palisade_common::cli::Config for Config {
    fn get_log_level(&self) -> Option<LogLevel> {
        Some(self.log_level)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessConfig {
    /// Path to allow-list file with one identity per line
    pub path: PathBuf,
    /// Deny identities not on the list. When false, everyone is allowed.
    pub enforce: bool,
    /// Create an empty allow-list file on start if none exists
    pub create_if_missing: bool,
    /// Check the file for changes this often (milliseconds). 0 disables
    /// polling; reloads can then only be triggered explicitly.
    pub poll_interval_ms: u64,
}

impl AccessConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        match self.poll_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            path: "./whitelist.txt".into(),
            enforce: true,
            create_if_missing: true,
            poll_interval_ms: 2_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttemptsConfig {
    /// Record identities that were denied because they are not listed
    pub enabled: bool,
    /// JSON file that recorded attempts are persisted to
    pub path: PathBuf,
    /// Keep at most this many attempts, dropping the oldest ones
    pub max_entries: usize,
    /// Write pending changes to disk this often (milliseconds)
    pub flush_interval_ms: u64,
}

impl AttemptsConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl Default for AttemptsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "./whitelist_pending.json".into(),
            max_entries: 50,
            flush_interval_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Serve decisions over TCP
    pub enabled: bool,
    /// Address to listen on
    pub address: SocketAddr,
    /// Number of threads handling query connections
    pub connection_workers: usize,
    /// Accepted connections waiting for a worker. Further connections are
    /// closed immediately.
    pub worker_channel_size: usize,
    /// Close connections sending lines longer than this (bytes)
    pub max_line_len: usize,
    /// Close connections idle for this long (milliseconds)
    pub connection_timeout_ms: u64,
}

impl NetworkConfig {
    pub fn connection_timeout(&self) -> Option<Duration> {
        match self.connection_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3100)),
            connection_workers: 4,
            worker_channel_size: 256,
            max_line_len: 256,
            connection_timeout_ms: 10_000,
        }
    }
}
