use crate::backup::enumerate::FileRecord;
use crate::backup::progress::{ProgressEvent, ProgressSink};
use crate::backup::result_error::error::CompressionError;
use crate::backup::result_error::result::Result;
use crate::backup::stage::{FileCompressor, StagedFile};
use getset::Getters;
use itertools::Itertools;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use std::num::NonZero;
use std::path::Path;

/// Number of compression workers when the job does not set one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZero::get)
        .unwrap_or(1)
}

/// Everything the workers produced, aggregated at the join point.
#[derive(Debug, Default, Getters)]
#[getset(get = "pub")]
pub struct ScheduleOutcome {
    staged: Vec<StagedFile>,
    failures: Vec<CompressionError>,
}

impl ScheduleOutcome {
    pub fn into_parts(self) -> (Vec<StagedFile>, Vec<CompressionError>) {
        (self.staged, self.failures)
    }
}

/// Fans file records out to a fixed-size worker pool and waits for all of them.
///
/// The pool size is the upper bound on compressions running at the same time.
pub struct ParallelCompressionScheduler {
    pool: ThreadPool,
    progress: ProgressSink,
}

impl ParallelCompressionScheduler {
    pub fn new(worker_count: Option<usize>, progress: ProgressSink) -> Result<Self> {
        let worker_count = worker_count.unwrap_or_else(default_worker_count).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(|index| format!("par-backup-compress-{index}"))
            .build()?;
        tracing::debug!("Compression pool ready with {} workers", worker_count);
        Ok(Self { pool, progress })
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Compresses every record and returns once all of them finished.
    ///
    /// A failing file never stops its siblings; it ends up in `failures`.
    pub fn run<C: FileCompressor>(
        &self,
        records: &[FileRecord],
        staging_root: &Path,
        compressor: &C,
    ) -> ScheduleOutcome {
        tracing::info!(
            "Compressing {} files on {} workers",
            records.len(),
            self.worker_count()
        );

        let results: Vec<_> = self.pool.install(|| {
            records
                .par_iter()
                .map(|record| {
                    let res = compressor.compress(record, staging_root);
                    self.report(&res);
                    res
                })
                .collect()
        });

        let (staged, failures): (Vec<_>, Vec<_>) = results.into_iter().partition_result();
        tracing::info!(
            "Compression finished: {} staged, {} failed",
            staged.len(),
            failures.len()
        );
        ScheduleOutcome { staged, failures }
    }

    fn report(&self, res: &std::result::Result<StagedFile, CompressionError>) {
        match res {
            Ok(staged) => self.progress.emit(ProgressEvent::FileCompressed {
                path: staged.source().clone(),
                original_size: staged.original_size(),
                compressed_size: staged.compressed_size(),
            }),
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::warn!("{e}");
                self.progress.emit(ProgressEvent::FileFailed {
                    path: e.path().clone(),
                    reason: e.cause().to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::enumerate::SourceRoot;
    use crate::backup::result_error::error::Error;
    use crate::backup::stage::CompressionWorker;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records how many compressions overlap and fails on one chosen file.
    #[derive(Default)]
    struct InstrumentedCompressor {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
        fail_on: Option<PathBuf>,
    }

    impl FileCompressor for InstrumentedCompressor {
        fn compress(
            &self,
            record: &FileRecord,
            staging_root: &Path,
        ) -> std::result::Result<StagedFile, CompressionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(15));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on.as_ref() == Some(record.relative_path()) {
                return Err(CompressionError::new(
                    record.path(),
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "unreadable"),
                ));
            }
            Ok(StagedFile::new(
                record.path(),
                staging_root.join(record.member_name()),
                record.member_name(),
                record.size(),
                record.size() / 2,
            ))
        }
    }

    fn records(count: usize) -> Vec<FileRecord> {
        let root = SourceRoot::new("/data/A");
        (0..count)
            .map(|i| {
                let relative = format!("file{i}.txt");
                FileRecord::new(root.clone(), format!("/data/A/{relative}"), 100, relative)
            })
            .collect()
    }

    #[test]
    fn test_worker_count_bounds_concurrency() {
        let scheduler = ParallelCompressionScheduler::new(Some(3), ProgressSink::disabled()).unwrap();
        assert_eq!(scheduler.worker_count(), 3);

        let compressor = InstrumentedCompressor::default();
        let outcome = scheduler.run(&records(24), Path::new("/staging"), &compressor);

        assert_eq!(outcome.staged().len(), 24);
        assert!(outcome.failures().is_empty());
        assert_eq!(compressor.calls.load(Ordering::SeqCst), 24);
        let max = compressor.max_in_flight.load(Ordering::SeqCst);
        assert!(max >= 1 && max <= 3, "max in flight was {max}");
    }

    #[test]
    fn test_single_worker_is_sequential() {
        let scheduler = ParallelCompressionScheduler::new(Some(1), ProgressSink::disabled()).unwrap();
        let compressor = InstrumentedCompressor::default();
        scheduler.run(&records(6), Path::new("/staging"), &compressor);

        assert_eq!(compressor.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_does_not_cancel_siblings() {
        let (tx, rx) = channel();
        let scheduler = ParallelCompressionScheduler::new(Some(4), tx.into()).unwrap();
        let compressor = InstrumentedCompressor {
            fail_on: Some(PathBuf::from("file3.txt")),
            ..Default::default()
        };

        let outcome = scheduler.run(&records(10), Path::new("/staging"), &compressor);
        drop(scheduler);

        assert_eq!(outcome.staged().len(), 9);
        assert_eq!(outcome.failures().len(), 1);
        assert_eq!(outcome.failures()[0].path(), &PathBuf::from("/data/A/file3.txt"));

        let events: Vec<_> = rx.try_iter().collect();
        let compressed = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::FileCompressed { .. }))
            .count();
        let failed = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::FileFailed { .. }))
            .count();
        assert_eq!((compressed, failed), (9, 1));
    }

    #[test]
    fn test_empty_input() {
        let scheduler = ParallelCompressionScheduler::new(None, ProgressSink::disabled()).unwrap();
        assert_eq!(scheduler.worker_count(), default_worker_count());

        let outcome = scheduler.run(&[], Path::new("/staging"), &InstrumentedCompressor::default());
        assert!(outcome.staged().is_empty());
        assert!(outcome.failures().is_empty());
    }

    #[test]
    fn test_real_worker_through_pool() {
        let src = TempDir::new().unwrap();
        let root_dir = src.path().join("B");
        std::fs::create_dir_all(&root_dir).unwrap();
        let root = SourceRoot::new(&root_dir);
        let records = (0..5)
            .map(|i| {
                let relative = format!("f{i}.txt");
                std::fs::write(root_dir.join(&relative), "abc".repeat(100 * (i + 1))).unwrap();
                FileRecord::new(root.clone(), root_dir.join(&relative), 300 * (i as u64 + 1), relative)
            })
            .collect_vec();
        let staging = TempDir::new().unwrap();

        let scheduler = ParallelCompressionScheduler::new(Some(2), ProgressSink::disabled()).unwrap();
        let (staged, failures) = scheduler
            .run(&records, staging.path(), &CompressionWorker::default())
            .into_parts();

        assert!(failures.is_empty());
        assert_eq!(staged.len(), 5);
        assert!(staged.iter().all(|s| s.path().is_file()));
        assert!(staged
            .iter()
            .all(|s| s.member_name().starts_with("B") && s.path().extension().unwrap() == "gz"));
    }

    #[test]
    fn test_cancelled_files_are_not_reported_as_failed() {
        let (tx, rx) = channel();
        let scheduler = ParallelCompressionScheduler::new(Some(2), tx.into()).unwrap();
        let staging = TempDir::new().unwrap();
        let worker = CompressionWorker::builder()
            .cancel({
                let token = crate::backup::progress::CancellationToken::new();
                token.cancel();
                token
            })
            .build();

        let outcome = scheduler.run(&records(3), staging.path(), &worker);
        drop(scheduler);

        assert_eq!(outcome.failures().len(), 3);
        assert!(outcome.failures().iter().all(|f| matches!(f.cause(), Error::Cancelled)));
        assert_eq!(rx.try_iter().count(), 0);
    }
}
