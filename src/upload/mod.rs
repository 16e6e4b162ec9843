pub mod archive;
pub mod cycle;
pub mod ledger;
pub mod scanner;
pub mod service;

pub use archive::ArchiveMover;
pub use cycle::UploadCycle;
pub use ledger::UploadLedger;
pub use scanner::FolderScanner;
pub use service::{ServiceLoop, ServiceSummary};

use serde::Serialize;
use std::path::PathBuf;

/// Subdirectory of the watched folder that receives transferred files.
pub const ARCHIVE_DIR_NAME: &str = "uploaded";

/// A candidate found by one scan. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    /// Number of the cycle whose scan found this file
    pub cycle: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Uploaded and moved into the archive
    Archived,
    /// Uploaded and ledgered, but still in the watched folder
    ArchiveFailed(String),
    /// Upload failed; this aborted the cycle
    TransferFailed(String),
    /// Local file could not be read; retried next cycle
    Skipped(String),
    /// Never attempted because the cycle stopped earlier
    NotAttempted,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcomes: Vec<(String, FileOutcome)>,
    /// Stop signal arrived before every file was attempted
    pub interrupted: bool,
}

impl CycleReport {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            ..Default::default()
        }
    }

    pub fn uploaded(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Archived | FileOutcome::ArchiveFailed(_)))
    }

    pub fn archived(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Archived))
    }

    pub fn archive_failures(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::ArchiveFailed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped(_)))
    }

    pub fn not_attempted(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::NotAttempted))
    }

    pub fn outcome(&self, name: &str) -> Option<&FileOutcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| outcome)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Disconnected,
    Connected,
    Stopping,
}

#[derive(Debug, Clone)]
pub enum ServiceEvent {
    StateChanged(ServiceState),
    ConnectFailed { message: String },
    CycleCompleted {
        cycle: u64,
        uploaded: usize,
        archived: usize,
        archive_failures: usize,
        skipped: usize,
        /// Stop arrived mid-cycle; some files were left for the next run
        interrupted: bool,
    },
    CycleAborted { cycle: u64, file: String, message: String },
}
