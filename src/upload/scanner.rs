use super::{UploadLedger, WatchedFile};
use crate::error::ScanError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

pub struct FolderScanner {
    directory: PathBuf,
}

impl FolderScanner {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// List regular files directly inside the watched directory that are not
    /// in the ledger, sorted by name. Problems are logged and skipped; this
    /// never fails.
    pub async fn scan(&self, ledger: &UploadLedger, cycle: u64) -> Vec<WatchedFile> {
        let mut files = Vec::new();

        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {}: {}", self.directory.display(), e);
                return files;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopped listing {} early: {}", self.directory.display(), e);
                    break;
                }
            };

            let path = entry.path();
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!("Skipping file with non UTF-8 name: {:?}", raw);
                    continue;
                }
            };

            // Follows symlinks, like a plain "is this a file" check
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Skipping {}: {}", name, e);
                    continue;
                }
            };

            if !metadata.is_file() {
                continue;
            }

            if ledger.contains(&name) {
                debug!("Skipping already uploaded file: {}", name);
                continue;
            }

            files.push(WatchedFile {
                name,
                path,
                size: metadata.len(),
                cycle,
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }
}

/// Startup check: the watched directory must exist and be listable.
pub fn verify_watched_dir(directory: &Path) -> Result<(), ScanError> {
    let metadata = match std::fs::metadata(directory) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ScanError::Missing(directory.to_path_buf()));
        }
        Err(source) => {
            return Err(ScanError::Unreadable {
                path: directory.to_path_buf(),
                source,
            });
        }
    };

    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(directory.to_path_buf()));
    }

    std::fs::read_dir(directory).map_err(|source| ScanError::Unreadable {
        path: directory.to_path_buf(),
        source,
    })?;

    Ok(())
}
