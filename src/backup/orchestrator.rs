//! Runs one [`BackupJob`] through its stages.
//!
//! Stages are strictly sequential and each one is a barrier: enumeration finishes before
//! any compression starts, all compressions finish before the archive is assembled, and
//! the archive is complete before the upload starts.

use crate::backup::backup_config::BackupJob;
use crate::backup::enumerate::{FileEnumerator, FileRecord};
use crate::backup::function_path;
use crate::backup::progress::{CancellationToken, JobState, ProgressEvent, ProgressSink};
use crate::backup::report::{BackupReport, UploadOutcome};
use crate::backup::result_error::error::{CompressionError, EnumerationWarning, Error};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::schedule::ParallelCompressionScheduler;
use crate::backup::stage::{CompressionWorker, FileCompressor, StagedFile, StagingArea};
use crate::backup::tar::{ArchiveAssembler, ArchiveEntries, ArchiveMode};
use crate::backup::upload::UploadClient;
use chrono::Utc;
use function_name::named;
use itertools::Itertools;

use std::time::Instant;

pub struct BackupOrchestrator<C: FileCompressor = CompressionWorker> {
    job: BackupJob,
    compressor: C,
    upload_client: Option<UploadClient>,
    progress: ProgressSink,
    cancel: CancellationToken,
    state: JobState,
}

impl BackupOrchestrator<CompressionWorker> {
    pub fn new(job: BackupJob) -> Self {
        let cancel = CancellationToken::new();
        let compressor = CompressionWorker::builder()
            .compressor(job.compressor().single_threaded())
            .maybe_timeout(job.compression_timeout())
            .cancel(cancel.clone())
            .build();
        Self {
            job,
            compressor,
            upload_client: None,
            progress: ProgressSink::disabled(),
            cancel,
            state: JobState::Idle,
        }
    }
}

impl<C: FileCompressor> BackupOrchestrator<C> {
    pub fn with_progress<P: Into<ProgressSink>>(mut self, progress: P) -> Self {
        self.progress = progress.into();
        self
    }

    pub fn with_upload_client(mut self, upload_client: UploadClient) -> Self {
        self.upload_client = Some(upload_client);
        self
    }

    /// Replaces the per-file compressor. The replacement is responsible for honoring
    /// cancellation itself; stage boundaries are still checked.
    pub fn with_compressor<C2: FileCompressor>(self, compressor: C2) -> BackupOrchestrator<C2> {
        BackupOrchestrator {
            job: self.job,
            compressor,
            upload_client: self.upload_client,
            progress: self.progress,
            cancel: self.cancel,
            state: self.state,
        }
    }

    /// Token that stops the run at the next stage boundary or read.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Runs every stage once. Any error leaves the orchestrator in [`JobState::Failed`]
    /// with staging already removed.
    #[named]
    pub fn run(&mut self) -> Result<BackupReport> {
        if self.state != JobState::Idle {
            return Err(Error::invalid_job(format!(
                "backup already ran and ended {}",
                self.state
            )));
        }

        match self.execute() {
            Ok(report) => {
                tracing::info!("Backup done: {}", report.summary());
                Ok(report)
            }
            Err(e) => {
                let stage = self.state;
                self.transition(JobState::Failed);
                tracing::error!("Backup failed during {}: {}", stage, e);
                Err(e
                    .add_msg(format!("Backup failed during {stage}"))
                    .add_fn_name(function_path!()))
            }
        }
    }

    fn execute(&mut self) -> Result<BackupReport> {
        let started_at = Utc::now();
        let started = Instant::now();

        self.transition(JobState::Enumerating);
        let (records, warnings) = self.enumerate();
        self.checkpoint()?;
        let original_size: u64 = records.iter().map(FileRecord::size).sum();

        let assembler = ArchiveAssembler::new(self.job.compressor().clone())
            .with_limits(self.cancel.clone(), self.job.compression_timeout());
        let (archive_size, failures, file_count) = match self.job.mode() {
            ArchiveMode::PerFile => {
                let staging = StagingArea::create_in(self.job.staging_parent())?;
                self.transition(JobState::Compressing);
                let (staged, failures) = self.compress(&records, &staging)?;

                self.transition(JobState::Assembling);
                let assembled =
                    assembler.assemble(ArchiveEntries::Staged(&staged), self.job.destination());
                let archive_size = match (assembled, staging.close()) {
                    (Ok(size), Ok(())) => size,
                    (Ok(size), Err(e)) => {
                        tracing::warn!("Removing staging area failed: {}", e);
                        size
                    }
                    (Err(e), Ok(())) => return Err(e),
                    (Err(e), Err(close_error)) => {
                        return Err(e.chain(close_error.add_msg("Removing staging area failed")))
                    }
                };
                (archive_size, failures, staged.len())
            }
            ArchiveMode::WholeArchive => {
                self.transition(JobState::Assembling);
                let archive_size = assembler
                    .assemble(ArchiveEntries::Originals(&records), self.job.destination())?;
                let file_count = records.iter().filter(|r| !r.is_dir()).count();
                (archive_size, Vec::new(), file_count)
            }
        };
        let elapsed = started.elapsed();

        let upload = self.upload();
        self.transition(JobState::Done);

        Ok(BackupReport::builder()
            .archive_path(self.job.destination().clone())
            .started_at(started_at)
            .elapsed(elapsed)
            .original_size(original_size)
            .archive_size(archive_size)
            .file_count(file_count)
            .failures(failures)
            .warnings(warnings)
            .upload(upload)
            .build())
    }

    fn enumerate(&self) -> (Vec<FileRecord>, Vec<EnumerationWarning>) {
        for root in self.job.roots() {
            self.progress.emit(ProgressEvent::SourceAdded {
                root: root.path().to_path_buf(),
            });
        }

        let (records, warnings): (Vec<_>, Vec<_>) =
            FileEnumerator::new(self.job.roots().iter().cloned())
                .with_directories(self.job.mode() == ArchiveMode::WholeArchive)
                .into_iter()
                .take_while(|_| !self.cancel.is_cancelled())
                .partition_result();

        for warning in &warnings {
            self.progress.emit(ProgressEvent::Warning {
                message: warning.to_string(),
            });
        }
        let file_count = records.iter().filter(|r| !r.is_dir()).count();
        if file_count == 0 {
            tracing::warn!("No files found under {} source roots", self.job.roots().len());
            self.progress.emit(ProgressEvent::Warning {
                message: "no files found, the archive will be empty".to_owned(),
            });
        }
        tracing::info!(
            "Enumerated {} files, {} entries skipped",
            file_count,
            warnings.len()
        );
        (records, warnings)
    }

    fn compress(
        &self,
        records: &[FileRecord],
        staging: &StagingArea,
    ) -> Result<(Vec<StagedFile>, Vec<CompressionError>)> {
        let scheduler = ParallelCompressionScheduler::new(self.job.workers(), self.progress.clone())?;
        let outcome = scheduler.run(records, staging.root(), &self.compressor);
        self.checkpoint()?;
        Ok(outcome.into_parts())
    }

    fn upload(&mut self) -> UploadOutcome {
        let Some(client) = self.upload_client.take() else {
            tracing::debug!("No upload client configured, keeping the archive local");
            return UploadOutcome::Skipped;
        };
        self.transition(JobState::Uploading);

        let mut session = match client.authenticate() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Upload skipped, authentication failed: {}", e);
                return UploadOutcome::AuthFailed {
                    reason: e.to_string(),
                };
            }
        };

        match client.upload_with_refresh(&mut session, self.job.destination()) {
            Ok(result) => {
                self.progress.emit(ProgressEvent::UploadFinished {
                    remote_id: result.remote_id().clone(),
                    duration: *result.duration(),
                });
                result.into()
            }
            Err(e) if e.is_auth() => {
                tracing::warn!("Upload failed, re-authentication failed: {}", e);
                UploadOutcome::AuthFailed {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!("Upload failed, archive kept at {:?}: {}", self.job.destination(), e);
                UploadOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn transition(&mut self, to: JobState) {
        let from = std::mem::replace(&mut self.state, to);
        if to.is_terminal() {
            tracing::info!("Backup finished: {} -> {}", from, to);
        } else {
            tracing::debug!("Backup stage {} -> {}", from, to);
        }
        self.progress.emit(ProgressEvent::StageChanged { from, to });
    }
}

/// Convenience entry point: builds an orchestrator for `job` and runs it.
pub fn run_backup(
    job: BackupJob,
    upload_client: Option<UploadClient>,
    progress: ProgressSink,
) -> Result<BackupReport> {
    let mut orchestrator = BackupOrchestrator::new(job).with_progress(progress);
    if let Some(upload_client) = upload_client {
        orchestrator = orchestrator.with_upload_client(upload_client);
    }
    orchestrator.run()
}
