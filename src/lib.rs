//! # par-backup
//!
//! Parallel backup pipeline: walk a set of source directories, compress every file on a
//! bounded worker pool, pack the results into one tar archive and optionally upload it
//! to Google Drive.
//!
//! ## Features
//!
//! - **Parallel Compression**: gzip or xz per file on a fixed-size rayon pool
//! - **Whole-archive Mode**: one compressed tar stream instead of per-file members
//! - **Scoped Staging**: intermediate files live in a temp dir removed on every outcome
//! - **Upload**: Drive resumable upload with access or refresh token authentication
//! - **Progress**: stage changes and per-file results over an mpsc channel
//!
//! ## Quick Start
//!
//! ```no_run
//! use par_backup::backup::backup_config::BackupJob;
//! use par_backup::backup::orchestrator::run_backup;
//! use par_backup::backup::progress::ProgressSink;
//! use std::path::PathBuf;
//!
//! let job = BackupJob::builder()
//!     .sources(vec![PathBuf::from("/data/A"), PathBuf::from("/data/B")])
//!     .destination("/backups/backup_final.tar")
//!     .build()?;
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! std::thread::spawn(move || rx.iter().for_each(|event| println!("{event:?}")));
//!
//! let report = run_backup(job, None, ProgressSink::new(tx))?;
//! println!("{}", report.summary());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
