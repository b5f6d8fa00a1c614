use crate::backup::compress::{CompressorBuilder, CompressorConfig};
use crate::backup::enumerate::FileRecord;
use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::progress::CancellationToken;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::stage::{GuardedReader, StagedFile};
use crate::backup::validate::parent_dir;
use function_name::named;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use std::fs::File;
use std::io::{BufWriter, IntoInnerError, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Top-level directory holding every member of a `per-file` archive.
pub static STAGED_ARCHIVE_ROOT: &str = "backup_gzipped";
static ARCHIVE_TMP_PREFIX: &str = ".par-backup-archive-";

/// How the archive gets its compression.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveMode {
    /// Every file is compressed on its own, the tar stream is stored as is.
    #[default]
    PerFile,
    /// Original files go into the tar, the whole stream goes through the codec.
    WholeArchive,
}

/// What the assembler packs; the variant decides the archive layout.
#[derive(Clone, Copy, Debug)]
pub enum ArchiveEntries<'a> {
    Staged(&'a [StagedFile]),
    /// Enumerated files, plus directory records for the directories to keep
    Originals(&'a [FileRecord]),
}

impl ArchiveEntries<'_> {
    pub fn mode(&self) -> ArchiveMode {
        match self {
            ArchiveEntries::Staged(_) => ArchiveMode::PerFile,
            ArchiveEntries::Originals(_) => ArchiveMode::WholeArchive,
        }
    }

    /// `(source path, member name)` pairs sorted by member name.
    fn members(&self) -> Vec<(PathBuf, PathBuf)> {
        match self {
            ArchiveEntries::Staged(staged) => staged
                .iter()
                .map(|s| {
                    (
                        s.path().clone(),
                        Path::new(STAGED_ARCHIVE_ROOT).join(s.member_name()),
                    )
                })
                .sorted_by(|a, b| a.1.cmp(&b.1))
                .collect(),
            ArchiveEntries::Originals(records) => records
                .iter()
                .map(|r| (r.path().clone(), r.member_name()))
                .sorted_by(|a, b| a.1.cmp(&b.1))
                .collect(),
        }
    }
}

/// Packs entries into a single tar file at the destination path.
#[derive(Clone, Debug, Default)]
pub struct ArchiveAssembler {
    /// Stream codec for `whole-archive` mode
    compressor: CompressorConfig,
    cancel: CancellationToken,
    /// Limit for copying any single member
    timeout: Option<Duration>,
}

impl ArchiveAssembler {
    pub fn new(compressor: CompressorConfig) -> Self {
        Self {
            compressor,
            ..Default::default()
        }
    }

    pub fn with_limits(mut self, cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        self.cancel = cancel;
        self.timeout = timeout;
        self
    }

    /// Writes the archive and returns its size in bytes.
    ///
    /// The archive is built in a temporary file beside `archive_path` and only renamed
    /// into place once complete, so a failure never leaves a partial archive behind.
    #[named]
    pub fn assemble(&self, entries: ArchiveEntries, archive_path: &Path) -> Result<u64> {
        self.write_archive(entries, archive_path)
            .map_err(|e| Error::archive(archive_path, e))
            .add_fn_name(function_path!())
    }

    fn write_archive(&self, entries: ArchiveEntries, archive_path: &Path) -> Result<u64> {
        let stream_codec = match entries.mode() {
            ArchiveMode::PerFile => &CompressorConfig::None,
            ArchiveMode::WholeArchive => &self.compressor,
        };
        let members = entries.members();
        tracing::info!(
            "Packing {} members into {:?} ({:?})",
            members.len(),
            archive_path,
            entries.mode()
        );

        let tmp = tempfile::Builder::new()
            .prefix(ARCHIVE_TMP_PREFIX)
            .tempfile_in(parent_dir(archive_path))?;
        let mut writer = stream_codec
            .build_compressor(BufWriter::new(tmp))
            .map(BufWriter::new)
            .map(tar::Builder::new)?;
        writer.follow_symlinks(false);

        if entries.mode() == ArchiveMode::PerFile {
            append_empty_dir(&mut writer, STAGED_ARCHIVE_ROOT)?;
        }
        for (src, member_name) in &members {
            self.append_member(&mut writer, src, member_name)?;
        }

        let tmp: NamedTempFile = writer
            .into_inner()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?;
        tmp.as_file().sync_all()?;
        let archive_size = tmp.as_file().metadata()?.len();
        tmp.persist(archive_path)?;

        tracing::info!("Created archive {:?} ({} bytes)", archive_path, archive_size);
        Ok(archive_size)
    }

    fn append_member<W: Write>(
        &self,
        writer: &mut tar::Builder<W>,
        src: &Path,
        member_name: &Path,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tracing::trace!("Adding {:?} as {:?}", src, member_name);

        let metadata = std::fs::symlink_metadata(src)?;
        if metadata.is_dir() {
            writer.append_dir(member_name, src)?;
            return Ok(());
        }

        let mut header = tar::Header::new_gnu();
        header.set_metadata(&metadata);
        let mut reader = GuardedReader::new(
            File::open(src)?,
            src,
            &self.cancel,
            self.timeout,
            Instant::now(),
        );
        match writer.append_data(&mut header, member_name, &mut reader) {
            Ok(()) => Ok(()),
            Err(e) => Err(reader.into_tripped().unwrap_or_else(|| e.into())),
        }
    }
}

fn append_empty_dir<W: Write>(writer: &mut tar::Builder<W>, name: &str) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);
    header.set_mtime(0);
    writer.append_data(&mut header, name, std::io::empty())?;
    Ok(())
}
