//! Progress events and cooperative cancellation shared between the pipeline and its
//! caller.

use derive_more::Display;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of one backup run.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Enumerating,
    Compressing,
    Assembling,
    Uploading,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    SourceAdded {
        root: PathBuf,
    },
    FileCompressed {
        path: PathBuf,
        original_size: u64,
        compressed_size: u64,
    },
    FileFailed {
        path: PathBuf,
        reason: String,
    },
    StageChanged {
        from: JobState,
        to: JobState,
    },
    Warning {
        message: String,
    },
    UploadFinished {
        remote_id: String,
        duration: Duration,
    },
}

/// Sending half of the progress channel.
///
/// A caller that never subscribes, or drops its receiver, must not break the backup,
/// so send failures are only traced.
#[derive(Clone, Debug, Default)]
pub struct ProgressSink {
    tx: Option<Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.send(event) {
                tracing::trace!("Progress receiver gone, dropping {:?}", e.0);
            }
        }
    }
}

impl From<Sender<ProgressEvent>> for ProgressSink {
    fn from(tx: Sender<ProgressEvent>) -> Self {
        Self::new(tx)
    }
}

/// Cooperative cancellation flag, cheap to clone into workers.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
