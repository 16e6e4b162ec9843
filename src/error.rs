use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::upload::CycleReport;

/// Failure to establish a session with the remote host.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("TCP connection to {addr} failed: {source}")]
    Tcp {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("SSH handshake with {addr} failed: {message}")]
    Handshake { addr: String, message: String },

    #[error("authentication failed for user '{username}': {message}")]
    Auth { username: String, message: String },

    #[error("SFTP subsystem unavailable: {0}")]
    Subsystem(String),

    #[error("connect task failed: {0}")]
    Task(String),
}

/// Failure to place one file on the remote host. Everything except
/// `LocalRead` is treated as evidence the session is broken.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("cannot read local file {path}: {source}")]
    LocalRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("remote write to {remote} failed: {message}")]
    Remote { remote: String, message: String },

    #[error("session is closed")]
    SessionClosed,

    #[error("transfer task failed: {0}")]
    Task(String),
}

impl TransferError {
    /// The local file could not be opened; nothing was sent and the session
    /// is still usable.
    pub fn is_local(&self) -> bool {
        matches!(self, TransferError::LocalRead { .. })
    }
}

/// Failure to move an uploaded file into the archive directory.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive target already exists: {0}")]
    Collision(PathBuf),

    #[error("cannot archive {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Watched directory is unusable. Only raised by the startup check; per-entry
/// problems during a scan are skipped instead.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("watched directory does not exist: {0}")]
    Missing(PathBuf),

    #[error("watched path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("watched directory {path} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing required setting '{0}'")]
    Missing(&'static str),

    #[error("invalid value for '{key}': {message}")]
    Invalid { key: &'static str, message: String },

    #[error(transparent)]
    WatchedDirectory(#[from] ScanError),
}

/// A cycle was cut short by a transfer failure. Carries the outcomes recorded
/// up to and including the failing file.
#[derive(Debug, Error)]
#[error("upload of '{file}' failed: {source}")]
pub struct CycleError {
    pub file: String,
    pub report: CycleReport,
    #[source]
    pub source: TransferError,
}
