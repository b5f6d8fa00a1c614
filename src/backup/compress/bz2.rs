use crate::backup::compress::{Compressor, CompressorBuilder};
use crate::backup::result_error::result::Result;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::io::Write;
use validator::Validate;

static DEFAULT_COMPRESSION_LEVEL: u32 = 9;

/// Configuration for bzip2 compression
#[skip_serializing_none]
#[derive(Clone, Default, Validate, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Bzip2Config {
    /// Block size level (1-9), 9 when unset
    #[validate(range(min = 1, max = 9))]
    level: Option<u32>,
}

impl Bzip2Config {
    pub fn with_level(level: u32) -> Self {
        Self { level: Some(level) }
    }

    pub fn level(&self) -> u32 {
        self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl<W: Write> CompressorBuilder<W> for Bzip2Config {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        let level = self.level();
        tracing::trace!("Creating bzip2 compressor with level={}", level);
        Ok(BzEncoder::new(writer, Compression::new(level)).into())
    }
}
