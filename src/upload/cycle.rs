use super::{ArchiveMover, CycleReport, FileOutcome, UploadLedger, WatchedFile};
use crate::error::CycleError;
use crate::transport::{remote_path, Session};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One scan-upload-archive pass. Holds no state between cycles; everything
/// that carries over lives in the ledger and on disk.
pub struct UploadCycle {
    remote_folder: String,
    archiver: ArchiveMover,
}

impl UploadCycle {
    pub fn new(remote_folder: impl Into<String>, archiver: ArchiveMover) -> Self {
        Self {
            remote_folder: remote_folder.into(),
            archiver,
        }
    }

    /// Upload `files` in order. The first remote transfer failure aborts the
    /// cycle and is returned with the partial report; later files are not
    /// attempted. A file that cannot be read locally is skipped for this cycle
    /// and an archive failure only marks that file as stranded.
    pub async fn run<S>(
        &self,
        cycle: u64,
        files: &[WatchedFile],
        session: &mut S,
        ledger: &mut UploadLedger,
        shutdown: &CancellationToken,
    ) -> Result<CycleReport, CycleError>
    where
        S: Session + ?Sized,
    {
        let mut report = CycleReport::new(cycle);

        for (index, file) in files.iter().enumerate() {
            if shutdown.is_cancelled() {
                info!("Stop requested, leaving {} file(s) for later", files.len() - index);
                report.interrupted = true;
                mark_not_attempted(&mut report, &files[index..]);
                break;
            }

            if ledger.contains(&file.name) {
                debug!("{} already uploaded this run", file.name);
                continue;
            }

            let remote = remote_path(&self.remote_folder, &file.name);
            debug!("Uploading {} ({} bytes) to {}", file.name, file.size, remote);

            if let Err(source) = session.put(&file.path, &remote).await {
                if source.is_local() {
                    warn!("Skipping {} this cycle: {}", file.name, source);
                    report
                        .outcomes
                        .push((file.name.clone(), FileOutcome::Skipped(source.to_string())));
                    continue;
                }

                warn!("Upload of {} failed: {}", file.name, source);
                report
                    .outcomes
                    .push((file.name.clone(), FileOutcome::TransferFailed(source.to_string())));
                mark_not_attempted(&mut report, &files[index + 1..]);
                return Err(CycleError {
                    file: file.name.clone(),
                    report,
                    source,
                });
            }

            ledger.record(&file.name);

            let outcome = match self.archiver.archive(&file.path).await {
                Ok(_) => {
                    info!("Uploaded and archived {}", file.name);
                    FileOutcome::Archived
                }
                Err(e) => {
                    warn!("Uploaded {} but could not archive it: {}", file.name, e);
                    FileOutcome::ArchiveFailed(e.to_string())
                }
            };
            report.outcomes.push((file.name.clone(), outcome));
        }

        Ok(report)
    }
}

fn mark_not_attempted(report: &mut CycleReport, rest: &[WatchedFile]) {
    report
        .outcomes
        .extend(rest.iter().map(|f| (f.name.clone(), FileOutcome::NotAttempted)));
}
