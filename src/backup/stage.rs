use crate::backup::compress::{CompressorBuilder, CompressorConfig};
use crate::backup::enumerate::FileRecord;
use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::progress::CancellationToken;
use crate::backup::result_error::error::{CompressionError, Error};
use crate::backup::result_error::result::Result;
use crate::backup::validate::parent_dir;
use bon::Builder;
use getset::{CopyGetters, Getters};
use tempfile::TempDir;

use std::fs::File;
use std::io::{BufWriter, IntoInnerError, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

static STAGING_PREFIX: &str = ".par-backup-staging-";
static PARTIAL_PREFIX: &str = ".partial-";

/// Scoped staging directory owned by one backup run.
///
/// The directory and everything under it is removed when this value is dropped.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    pub fn create_in<P: AsRef<Path>>(parent: P) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)?;
        tracing::debug!("Created staging area {:?}", dir.path());
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the staging directory, surfacing removal errors that a plain drop
    /// would ignore.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!("Removed staging area {:?}", path);
        Ok(())
    }
}

/// A compressed copy of one [`FileRecord`] inside the staging area.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct StagedFile {
    #[getset(get = "pub")]
    source: PathBuf,
    #[getset(get = "pub")]
    path: PathBuf,
    /// Path relative to the staging root: `<root-name>/<relative-path>[.<ext>]`
    #[getset(get = "pub")]
    member_name: PathBuf,
    #[getset(get_copy = "pub")]
    original_size: u64,
    #[getset(get_copy = "pub")]
    compressed_size: u64,
}

impl StagedFile {
    pub fn new<S: Into<PathBuf>, P: Into<PathBuf>, M: Into<PathBuf>>(
        source: S,
        path: P,
        member_name: M,
        original_size: u64,
        compressed_size: u64,
    ) -> Self {
        Self {
            source: source.into(),
            path: path.into(),
            member_name: member_name.into(),
            original_size,
            compressed_size,
        }
    }
}

/// Compresses a single file into the staging area.
///
/// Implementations are called from several worker threads at once, each call with a
/// different record.
pub trait FileCompressor: Sync {
    fn compress(
        &self,
        record: &FileRecord,
        staging_root: &Path,
    ) -> std::result::Result<StagedFile, CompressionError>;
}

/// The default [`FileCompressor`]: streams the source through the configured codec.
#[derive(Clone, Debug, Default, Builder, Getters)]
#[getset(get = "pub")]
pub struct CompressionWorker {
    #[builder(default)]
    compressor: CompressorConfig,
    timeout: Option<Duration>,
    #[builder(default)]
    cancel: CancellationToken,
}

impl FileCompressor for CompressionWorker {
    fn compress(
        &self,
        record: &FileRecord,
        staging_root: &Path,
    ) -> std::result::Result<StagedFile, CompressionError> {
        self.compress_to_staging(record, staging_root)
            .map_err(|e| CompressionError::new(record.path(), e))
    }
}

impl CompressionWorker {
    fn compress_to_staging(&self, record: &FileRecord, staging_root: &Path) -> Result<StagedFile> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let started = Instant::now();

        let member_name = staged_member_name(record, self.compressor.file_ext());
        let dst = staging_root.join(&member_name);
        let src = File::open(record.path())?;

        let dst_dir = parent_dir(&dst);
        std::fs::create_dir_all(dst_dir)?;
        // Dropping the temp file on any early return removes the partial output.
        let tmp = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(dst_dir)?;

        let mut writer = self.compressor.build_compressor(BufWriter::new(tmp))?;
        let mut reader = GuardedReader::new(src, record.path(), &self.cancel, self.timeout, started);
        let original_size = match std::io::copy(&mut reader, &mut writer) {
            Ok(n) => n,
            Err(e) => return Err(reader.into_tripped().unwrap_or_else(|| e.into())),
        };
        let tmp = writer
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;

        let compressed_size = tmp.as_file().metadata()?.len();
        tmp.persist(&dst)?;

        tracing::debug!(
            "Compressed {:?} -> {:?} ({} -> {} bytes)",
            record.path(),
            dst,
            original_size,
            compressed_size
        );
        Ok(StagedFile::new(
            record.path(),
            dst,
            member_name,
            original_size,
            compressed_size,
        ))
    }
}

/// Reader that stops once the run is cancelled or the per-file deadline has passed.
///
/// The check runs before every read. A tripped check surfaces as an io error to
/// whoever drives the copy; [`GuardedReader::into_tripped`] gives back the
/// [`Error::Cancelled`] or [`Error::Timeout`] behind it.
pub struct GuardedReader<'a, R> {
    inner: R,
    path: &'a Path,
    cancel: &'a CancellationToken,
    timeout: Option<Duration>,
    started: Instant,
    tripped: Option<Error>,
}

impl<'a, R: Read> GuardedReader<'a, R> {
    pub fn new(
        inner: R,
        path: &'a Path,
        cancel: &'a CancellationToken,
        timeout: Option<Duration>,
        started: Instant,
    ) -> Self {
        Self {
            inner,
            path,
            cancel,
            timeout,
            started,
            tripped: None,
        }
    }

    pub fn into_tripped(self) -> Option<Error> {
        self.tripped
    }

    fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.timeout {
            Some(timeout) if self.started.elapsed() >= timeout => Err(Error::timeout(self.path, timeout)),
            _ => Ok(()),
        }
    }
}

impl<R: Read> Read for GuardedReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Err(e) = self.check() {
            let io_error = std::io::Error::other(e.to_string());
            self.tripped = Some(e);
            return Err(io_error);
        }
        self.inner.read(buf)
    }
}

/// `<root-name>/<relative-path>` with the codec extension appended, if any.
pub fn staged_member_name(record: &FileRecord, ext: Option<&str>) -> PathBuf {
    let mut name = record.member_name().into_os_string();
    if let Some(ext) = ext {
        name.push(".");
        name.push(ext);
    }
    name.into()
}
