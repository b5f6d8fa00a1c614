use crate::backup::result_error::error::{CompressionError, EnumerationWarning};
use crate::backup::upload::UploadResult;
use bon::Builder;
use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use serde::Serialize;
use serde_with::{serde_as, DisplayFromStr};

use std::path::PathBuf;
use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;

/// `archive_size / original_size`, zero when nothing was read.
pub fn compression_ratio(archive_size: u64, original_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    archive_size as f64 / original_size as f64
}

/// Original MiB per elapsed second, zero when no time elapsed.
pub fn throughput_mib_per_sec(original_size: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    original_size as f64 / MIB / secs
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// No upload client was configured.
    Skipped,
    Uploaded {
        remote_id: String,
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },
    AuthFailed {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl UploadOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, UploadOutcome::AuthFailed { .. } | UploadOutcome::Failed { .. })
    }
}

impl From<UploadResult> for UploadOutcome {
    fn from(result: UploadResult) -> Self {
        UploadOutcome::Uploaded {
            remote_id: result.remote_id().clone(),
            duration: *result.duration(),
        }
    }
}

/// How a finished run ended, as seen by whoever launched it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupOutcome {
    Succeeded,
    /// The archive exists locally but did not reach remote storage.
    UploadFailed,
}

#[serde_as]
#[derive(Debug, Serialize, Builder, Getters, CopyGetters)]
pub struct BackupReport {
    #[getset(get = "pub")]
    #[builder(into)]
    archive_path: PathBuf,
    #[getset(get_copy = "pub")]
    started_at: DateTime<Utc>,
    /// Enumeration through archive creation; upload time is in `upload`
    #[getset(get_copy = "pub")]
    #[serde(with = "humantime_serde")]
    elapsed: Duration,
    #[getset(get_copy = "pub")]
    original_size: u64,
    #[getset(get_copy = "pub")]
    archive_size: u64,
    #[getset(get_copy = "pub")]
    file_count: usize,
    #[getset(get = "pub")]
    #[builder(default)]
    #[serde_as(as = "Vec<DisplayFromStr>")]
    failures: Vec<CompressionError>,
    #[getset(get = "pub")]
    #[builder(default)]
    #[serde_as(as = "Vec<DisplayFromStr>")]
    warnings: Vec<EnumerationWarning>,
    #[getset(get = "pub")]
    upload: UploadOutcome,
}

impl BackupReport {
    pub fn compression_ratio(&self) -> f64 {
        compression_ratio(self.archive_size, self.original_size)
    }

    pub fn throughput_mib_per_sec(&self) -> f64 {
        throughput_mib_per_sec(self.original_size, self.elapsed)
    }

    pub fn outcome(&self) -> BackupOutcome {
        if self.upload.is_failure() {
            BackupOutcome::UploadFailed
        } else {
            BackupOutcome::Succeeded
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct WithMetrics<'a> {
            #[serde(flatten)]
            report: &'a BackupReport,
            compression_ratio: f64,
            throughput_mib_per_sec: f64,
            outcome: BackupOutcome,
        }

        serde_json::to_string_pretty(&WithMetrics {
            report: self,
            compression_ratio: self.compression_ratio(),
            throughput_mib_per_sec: self.throughput_mib_per_sec(),
            outcome: self.outcome(),
        })
    }

    /// One log line with the figures operators look at.
    pub fn summary(&self) -> String {
        format!(
            "{} files, {:.2} MiB -> {:.2} MiB (ratio {:.3}) in {:.2?}, {:.2} MiB/s, {} failed, {} skipped",
            self.file_count,
            self.original_size as f64 / MIB,
            self.archive_size as f64 / MIB,
            self.compression_ratio(),
            self.elapsed,
            self.throughput_mib_per_sec(),
            self.failures.len(),
            self.warnings.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(original_size: u64, archive_size: u64, upload: UploadOutcome) -> BackupReport {
        BackupReport::builder()
            .archive_path("/out/backup_final.tar")
            .started_at(Utc::now())
            .elapsed(Duration::from_secs(2))
            .original_size(original_size)
            .archive_size(archive_size)
            .file_count(3)
            .upload(upload)
            .build()
    }

    #[test]
    fn test_ratio_is_exact() {
        assert_eq!(compression_ratio(250, 1000), 0.25);
        assert_eq!(compression_ratio(1000, 1000), 1.0);
        assert_eq!(compression_ratio(10, 0), 0.0);
        assert_eq!(compression_ratio(0, 0), 0.0);
    }

    #[test]
    fn test_throughput() {
        let mib = 1024 * 1024;
        assert_eq!(throughput_mib_per_sec(10 * mib, Duration::from_secs(2)), 5.0);
        assert_eq!(throughput_mib_per_sec(10 * mib, Duration::ZERO), 0.0);
        assert_eq!(throughput_mib_per_sec(0, Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn test_outcome() {
        assert_eq!(report(10, 5, UploadOutcome::Skipped).outcome(), BackupOutcome::Succeeded);
        let uploaded = UploadOutcome::Uploaded {
            remote_id: "abc".into(),
            duration: Duration::from_millis(300),
        };
        assert_eq!(report(10, 5, uploaded).outcome(), BackupOutcome::Succeeded);
        let failed = UploadOutcome::AuthFailed {
            reason: "token revoked".into(),
        };
        assert_eq!(report(10, 5, failed).outcome(), BackupOutcome::UploadFailed);
    }

    #[test]
    fn test_json_contains_metrics_and_outcome() {
        let mut report = report(
            1000,
            250,
            UploadOutcome::Failed {
                reason: "quota".into(),
            },
        );
        report.warnings.push(EnumerationWarning::new("/data/link", "symbolic link"));
        report.failures.push(CompressionError::new(
            "/data/a.txt",
            std::io::Error::other("denied"),
        ));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["compression_ratio"], 0.25);
        assert_eq!(json["original_size"], 1000);
        assert_eq!(json["file_count"], 3);
        assert!(json.get("state").is_none());
        assert_eq!(json["outcome"], "upload_failed");
        assert_eq!(json["upload"]["status"], "failed");
        assert_eq!(json["elapsed"], "2s");
        assert_eq!(json["warnings"][0], "Skipped \"/data/link\": symbolic link");
        assert!(json["failures"][0].as_str().unwrap().contains("denied"));
    }

    #[test]
    fn test_summary_mentions_counts() {
        let summary = report(2048, 1024, UploadOutcome::Skipped).summary();
        assert!(summary.starts_with("3 files"));
        assert!(summary.contains("ratio 0.500"));
    }
}
