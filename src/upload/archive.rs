use crate::error::ArchiveError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Moves uploaded files into the archive subdirectory of the watched folder.
pub struct ArchiveMover {
    archive_dir: PathBuf,
}

impl ArchiveMover {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Rename `local_path` into the archive under its own file name. Refuses to
    /// overwrite an existing archive entry. Returns the new location.
    pub async fn archive(&self, local_path: &Path) -> Result<PathBuf, ArchiveError> {
        let io_err = |source| ArchiveError::Io {
            path: local_path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.archive_dir).await.map_err(io_err)?;

        let file_name = local_path.file_name().ok_or_else(|| {
            io_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no file name",
            ))
        })?;
        let target = self.archive_dir.join(file_name);

        // symlink_metadata so a dangling link in the archive still counts
        if fs::symlink_metadata(&target).await.is_ok() {
            return Err(ArchiveError::Collision(target));
        }

        fs::rename(local_path, &target).await.map_err(io_err)?;
        debug!("Archived {} -> {}", local_path.display(), target.display());

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::ARCHIVE_DIR_NAME;

    #[tokio::test]
    async fn test_archive_creates_directory_and_moves_file() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("report.csv");
        std::fs::write(&source, b"1,2,3").unwrap();

        let mover = ArchiveMover::new(tmp.path().join(ARCHIVE_DIR_NAME));
        let target = mover.archive(&source).await.unwrap();

        assert_eq!(target, tmp.path().join(ARCHIVE_DIR_NAME).join("report.csv"));
        assert!(!source.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"1,2,3");
    }

    #[tokio::test]
    async fn test_archive_directory_creation_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mover = ArchiveMover::new(tmp.path().join(ARCHIVE_DIR_NAME));

        for name in ["a.txt", "b.txt"] {
            let source = tmp.path().join(name);
            std::fs::write(&source, name).unwrap();
            mover.archive(&source).await.unwrap();
        }

        assert!(mover.archive_dir().join("a.txt").exists());
        assert!(mover.archive_dir().join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_archive_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let archive_dir = tmp.path().join(ARCHIVE_DIR_NAME);
        std::fs::create_dir(&archive_dir).unwrap();
        std::fs::write(archive_dir.join("a.txt"), b"old").unwrap();

        let source = tmp.path().join("a.txt");
        std::fs::write(&source, b"new").unwrap();

        let err = ArchiveMover::new(&archive_dir).archive(&source).await.unwrap_err();

        assert!(matches!(err, ArchiveError::Collision(_)));
        assert!(source.exists());
        assert_eq!(std::fs::read(archive_dir.join("a.txt")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_archive_missing_source_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mover = ArchiveMover::new(tmp.path().join(ARCHIVE_DIR_NAME));

        let err = mover.archive(&tmp.path().join("ghost.txt")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }
}
