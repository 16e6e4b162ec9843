use super::{
    ArchiveMover, CycleReport, FileOutcome, FolderScanner, ServiceEvent, ServiceState,
    UploadCycle, UploadLedger,
};
use crate::transport::{Session, Transport};
use crate::utils::config::Config;
use crate::utils::log_buffer::{Level, LogBuffer};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Keep the last this-many incidents for diagnostics.
const LOG_BUFFER_ENTRIES: usize = 500;

/// What a finished run did, for the exit log.
#[derive(Debug, Clone, Default)]
pub struct ServiceSummary {
    pub cycles: u64,
    pub uploaded: usize,
    pub ledger: BTreeSet<String>,
    /// Uploaded but still in the watched folder because archiving failed
    pub stranded: BTreeSet<String>,
}

/// Owns the session and drives upload cycles until the shutdown token fires.
pub struct ServiceLoop<T: Transport> {
    config: Config,
    transport: T,
    session: Option<T::Session>,
    state: ServiceState,
    ledger: UploadLedger,
    scanner: FolderScanner,
    cycle: UploadCycle,
    shutdown: CancellationToken,
    event_tx: broadcast::Sender<ServiceEvent>,
    log_buffer: LogBuffer,
    cycles: u64,
    uploaded: usize,
    stranded: BTreeSet<String>,
}

impl<T: Transport> ServiceLoop<T> {
    pub fn new(config: Config, transport: T, shutdown: CancellationToken) -> Self {
        let (event_tx, _) = broadcast::channel(128);
        let scanner = FolderScanner::new(&config.local_folder);
        let cycle = UploadCycle::new(
            config.remote_folder.clone(),
            ArchiveMover::new(config.archive_dir()),
        );

        Self {
            config,
            transport,
            session: None,
            state: ServiceState::Disconnected,
            ledger: UploadLedger::new(),
            scanner,
            cycle,
            shutdown,
            event_tx,
            log_buffer: LogBuffer::new(LOG_BUFFER_ENTRIES),
            cycles: 0,
            uploaded: 0,
            stranded: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn ledger(&self) -> &UploadLedger {
        &self.ledger
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_tx.subscribe()
    }

    /// Shared handle to the incident buffer.
    pub fn log_buffer(&self) -> LogBuffer {
        self.log_buffer.clone()
    }

    pub fn summary(&self) -> ServiceSummary {
        ServiceSummary {
            cycles: self.cycles,
            uploaded: self.uploaded,
            ledger: self.ledger.all(),
            stranded: self.stranded.clone(),
        }
    }

    /// Run until the shutdown token is cancelled. Recoverable failures are
    /// logged and retried; this only returns on stop.
    pub async fn run(&mut self) -> ServiceSummary {
        let run_id = uuid::Uuid::new_v4();
        let span = info_span!("upload_service", run_id = %run_id);
        self.run_until_stopped().instrument(span).await;
        self.summary()
    }

    async fn run_until_stopped(&mut self) {
        info!(
            "Watching {} -> {}:{}",
            self.config.local_folder.display(),
            self.config.endpoint(),
            self.config.remote_folder
        );

        while !self.shutdown.is_cancelled() {
            let delay = self.tick().await;
            if !wait_or_stop(&self.shutdown, delay).await {
                break;
            }
        }

        self.stop().await;
    }

    /// One step of the state machine. Returns how long to wait before the
    /// next step.
    async fn tick(&mut self) -> Duration {
        if self.session.is_none() && !self.connect().await {
            return self.config.retry_delay;
        }

        if self.run_cycle().await {
            self.config.poll_interval
        } else {
            self.config.retry_delay
        }
    }

    async fn connect(&mut self) -> bool {
        let endpoint = self.config.endpoint();
        debug!("Connecting to {}", endpoint);

        let result = tokio::select! {
            result = self.transport.connect(&endpoint) => result,
            _ = self.shutdown.cancelled() => return false,
        };

        match result {
            Ok(session) => {
                info!("Connected to {}", endpoint);
                self.session = Some(session);
                self.set_state(ServiceState::Connected);
                true
            }
            Err(e) => {
                warn!(
                    "Connection to {} failed, retrying in {}: {}",
                    endpoint,
                    humantime::format_duration(self.config.retry_delay),
                    e
                );
                self.log_buffer
                    .add(Level::Warn, format!("connect failed: {}", e), None);
                self.emit(ServiceEvent::ConnectFailed {
                    message: e.to_string(),
                });
                false
            }
        }
    }

    /// Scan and upload. Returns `false` when a transfer failure broke the
    /// session.
    async fn run_cycle(&mut self) -> bool {
        self.cycles += 1;
        let cycle = self.cycles;

        let files = self.scanner.scan(&self.ledger, cycle).await;
        if files.is_empty() {
            debug!("Cycle {}: nothing new", cycle);
        } else {
            info!("Cycle {}: {} new file(s)", cycle, files.len());
        }

        let Some(session) = self.session.as_mut() else {
            return false;
        };

        let result = self
            .cycle
            .run(cycle, &files, session, &mut self.ledger, &self.shutdown)
            .await;

        match result {
            Ok(report) => {
                self.absorb(&report);
                if !report.is_empty() {
                    info!(
                        "Cycle {} done: {} uploaded, {} archived, {} left in place, {} skipped",
                        cycle,
                        report.uploaded(),
                        report.archived(),
                        report.archive_failures(),
                        report.skipped()
                    );
                }
                self.emit(ServiceEvent::CycleCompleted {
                    cycle,
                    uploaded: report.uploaded(),
                    archived: report.archived(),
                    archive_failures: report.archive_failures(),
                    skipped: report.skipped(),
                    interrupted: report.interrupted,
                });
                true
            }
            Err(err) => {
                self.absorb(&err.report);
                error!("Cycle {} aborted, reconnecting: {}", cycle, err);
                self.log_buffer
                    .add(Level::Error, err.to_string(), Some(err.file.as_str()));
                self.emit(ServiceEvent::CycleAborted {
                    cycle,
                    file: err.file.clone(),
                    message: err.source.to_string(),
                });
                self.drop_session().await;
                false
            }
        }
    }

    fn absorb(&mut self, report: &CycleReport) {
        self.uploaded += report.uploaded();
        for (name, outcome) in &report.outcomes {
            match outcome {
                FileOutcome::ArchiveFailed(reason) => {
                    self.log_buffer.add(
                        Level::Warn,
                        format!("uploaded but not archived: {}", reason),
                        Some(name.as_str()),
                    );
                    self.stranded.insert(name.clone());
                }
                FileOutcome::Skipped(reason) => {
                    self.log_buffer.add(
                        Level::Warn,
                        format!("skipped: {}", reason),
                        Some(name.as_str()),
                    );
                }
                _ => {}
            }
        }
    }

    async fn drop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        self.set_state(ServiceState::Disconnected);
    }

    async fn stop(&mut self) {
        info!("Stop requested");
        self.set_state(ServiceState::Stopping);
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        info!(
            "Upload service stopped after {} cycle(s), {} file(s) uploaded",
            self.cycles, self.uploaded
        );
    }

    fn set_state(&mut self, state: ServiceState) {
        if self.state != state {
            debug!("State {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(ServiceEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ServiceEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Returns `false` if the wait was cut short by a stop request.
async fn wait_or_stop(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
