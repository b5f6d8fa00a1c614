use crate::backup::compress::CompressorConfig;
use crate::backup::enumerate::SourceRoot;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::tar::ArchiveMode;
use crate::backup::upload::UploadConfig;
use crate::backup::validate::{validate_destination, validate_source_dirs, validate_writable_dir};
use bon::{bon, Builder};
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// On-disk configuration of a backup, usually loaded from YAML.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    #[validate(length(min = 1), custom(function = validate_source_dirs))]
    #[builder(into)]
    sources: Vec<PathBuf>,
    #[validate(custom(function = validate_destination))]
    #[builder(into)]
    destination: PathBuf,
    #[serde(default)]
    #[builder(default)]
    mode: ArchiveMode,
    #[serde(default)]
    #[builder(default)]
    compressor: CompressorConfig,
    #[validate(range(min = 1))]
    workers: Option<usize>,
    /// Where the scoped staging directory is created, the system temp dir if unset
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    staging_dir: Option<PathBuf>,
    #[serde(default, with = "humantime_serde")]
    compression_timeout: Option<Duration>,
    upload: Option<UploadConfig>,
}

impl BackupConfig {
    /// Runs the field validators together with the nested codec and upload sections.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        self.compressor.validate()?;
        if let Some(upload) = &self.upload {
            upload.check()?;
        }
        Ok(())
    }
}

/// A validated unit of work: resolved roots and paths that are known not to overlap.
///
/// Immutable once built; the orchestrator only reads it.
#[derive(Clone, Debug, Getters, CopyGetters)]
pub struct BackupJob {
    #[getset(get = "pub")]
    roots: Vec<SourceRoot>,
    #[getset(get = "pub")]
    destination: PathBuf,
    #[getset(get_copy = "pub")]
    mode: ArchiveMode,
    #[getset(get = "pub")]
    compressor: CompressorConfig,
    #[getset(get_copy = "pub")]
    workers: Option<usize>,
    #[getset(get = "pub")]
    staging_parent: PathBuf,
    #[getset(get_copy = "pub")]
    compression_timeout: Option<Duration>,
}

#[bon]
impl BackupJob {
    #[builder]
    pub fn new(
        #[builder(into)] sources: Vec<PathBuf>,
        #[builder(into)] destination: PathBuf,
        #[builder(default)] mode: ArchiveMode,
        #[builder(default)] compressor: CompressorConfig,
        workers: Option<usize>,
        #[builder(into)] staging_dir: Option<PathBuf>,
        compression_timeout: Option<Duration>,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::invalid_job("at least one source directory is required"));
        }
        if workers == Some(0) {
            return Err(Error::invalid_job("worker count must be at least 1"));
        }

        let resolved: Vec<PathBuf> = sources.iter().map(resolve).try_collect()?;
        if let Some(dup) = resolved.iter().duplicates().next() {
            return Err(Error::invalid_job(format!("source {dup:?} is listed twice")));
        }
        let roots = resolved.into_iter().map(SourceRoot::new).collect_vec();
        let mut names = HashSet::new();
        if let Some(clash) = roots.iter().find(|r| !names.insert(r.name().clone())) {
            return Err(Error::invalid_job(format!(
                "more than one source is named {:?}, archive members would collide",
                clash.name()
            )));
        }

        let destination = resolve_destination(&destination)?;
        let staging_parent = match staging_dir {
            Some(dir) => resolve(&dir)?,
            None => resolve(&std::env::temp_dir())?,
        };
        if !staging_parent.is_dir() {
            return Err(Error::invalid_job(format!(
                "staging location {staging_parent:?} is not a directory"
            )));
        }

        for root in &roots {
            if destination.starts_with(root.path()) {
                return Err(Error::invalid_job(format!(
                    "destination {destination:?} lies inside source {:?}",
                    root.path()
                )));
            }
            if staging_parent.starts_with(root.path()) {
                return Err(Error::invalid_job(format!(
                    "staging location {staging_parent:?} lies inside source {:?}",
                    root.path()
                )));
            }
        }

        Ok(Self {
            roots,
            destination,
            mode,
            compressor,
            workers,
            staging_parent,
            compression_timeout,
        })
    }
}

impl TryFrom<&BackupConfig> for BackupJob {
    type Error = Error;

    fn try_from(config: &BackupConfig) -> Result<Self> {
        BackupJob::builder()
            .sources(config.sources.clone())
            .destination(config.destination.clone())
            .mode(config.mode)
            .compressor(config.compressor.clone())
            .maybe_workers(config.workers)
            .maybe_staging_dir(config.staging_dir.clone())
            .maybe_compression_timeout(config.compression_timeout)
            .build()
    }
}

/// Absolute form of `path`, with symlinks resolved when it exists.
fn resolve<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.exists() {
        Ok(path.canonicalize()?)
    } else {
        Ok(std::path::absolute(path)?)
    }
}

fn resolve_destination(destination: &Path) -> Result<PathBuf> {
    if destination.is_dir() {
        return Err(Error::invalid_job(format!(
            "destination {destination:?} is a directory"
        )));
    }
    let file_name = destination.file_name().ok_or_else(|| {
        Error::invalid_job(format!("destination {destination:?} has no file name"))
    })?;
    let parent = crate::backup::validate::parent_dir(destination);
    if !parent.is_dir() {
        return Err(Error::invalid_job(format!(
            "destination directory {parent:?} does not exist"
        )));
    }
    Ok(parent.canonicalize()?.join(file_name))
}
