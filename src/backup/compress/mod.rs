pub mod bz2;
pub mod gzip;
pub mod xz;

use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bzip2::write::BzEncoder;
use derive_more::From;
use flate2::write::GzEncoder;
use function_name::named;
use io_enum::Write;
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::result;
use validator::{Validate, ValidationErrors};

#[derive(Write, From)]
pub enum Compressor<W: Write> {
    None(W),
    GzEncoder(GzEncoder<W>),
    XzEncoder(XzEncoder<W>),
    BzEncoder(BzEncoder<W>),
}

/// Codec applied to every staged file (`per-file` mode) or to the whole tar stream
/// (`whole-archive` mode).
#[derive(Clone, From, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "compressor_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum CompressorConfig {
    None,
    Gzip(gzip::GzipConfig),
    Xz(xz::XzConfig),
    Bzip2(bz2::Bzip2Config),
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self::Gzip(gzip::GzipConfig::default())
    }
}

impl CompressorConfig {
    /// The same codec with at most one encoder thread, for use inside a worker pool
    /// that already runs one compression per core.
    pub fn single_threaded(&self) -> Self {
        match self {
            CompressorConfig::Xz(xz) => CompressorConfig::Xz(xz.with_thread(1)),
            other => other.clone(),
        }
    }
}

impl Validate for CompressorConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            CompressorConfig::None => Ok(()),
            CompressorConfig::Gzip(gzip) => gzip.validate(),
            CompressorConfig::Xz(xz) => xz.validate(),
            CompressorConfig::Bzip2(bz) => bz.validate(),
        }
    }
}

pub trait CompressorBuilder<W: Write> {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>>;
}

impl<W: Write> Finish<W> for Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::GzEncoder(w) => w.finish(),
            Compressor::XzEncoder(w) => w.finish(),
            Compressor::BzEncoder(w) => w.finish(),
        }
    }
}

impl<W: Write> CompressorBuilder<W> for CompressorConfig {
    #[named]
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        match self {
            CompressorConfig::None => Ok(Compressor::None(writer)),
            CompressorConfig::Gzip(gzip) => gzip.build_compressor(writer),
            CompressorConfig::Xz(xz) => xz.build_compressor(writer),
            CompressorConfig::Bzip2(bz) => bz.build_compressor(writer),
        }
        .add_msg(format!("Building compressor from {self:?}"))
        .add_fn_name(function_path!())
    }
}

impl FileExtProvider for CompressorConfig {
    fn file_ext(&self) -> Option<&'static str> {
        match self {
            CompressorConfig::None => None,
            CompressorConfig::Gzip(_) => Some("gz"),
            CompressorConfig::Xz(_) => Some("xz"),
            CompressorConfig::Bzip2(_) => Some("bz2"),
        }
    }
}
