use crate::backup::result_error::{AddFunctionName, AddMsg};
use getset::Getters;
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use thiserror_ext::Construct;

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    LiblzmaStream(#[from] liblzma::stream::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error(transparent)]
    PersistTempFile(#[from] tempfile::PersistError),
    #[error("Invalid backup job: {0}")]
    InvalidJob(String),
    #[error("Compressing {path:?} did not finish within {timeout:?}")]
    Timeout { path: PathBuf, timeout: Duration },
    #[error("Creating archive {:?} failed:\n{}", path, indent::indent_all_with("  ", error.to_string()))]
    Archive { path: PathBuf, error: Box<Error> },
    #[error("Backup cancelled")]
    Cancelled,
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Session expired")]
    SessionExpired,
    #[error("Upload rejected with status {status}: {body}")]
    UploadRejected { status: u16, body: String },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(Error::into_iter)),
            e => Box::new(std::iter::once(e)),
        }
    }

    /// Keeps both errors, e.g. a failed stage and a failed cleanup after it.
    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Strips context wrappers and returns the error that actually happened.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::Archive { error, .. } => error.root_cause(),
            e => e,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Error::Cancelled)
    }

    pub fn is_archive(&self) -> bool {
        match self {
            Error::Archive { .. } => true,
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.is_archive(),
            Error::LotsOfError(errors) => errors.iter().any(Error::is_archive),
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.root_cause(), Error::Auth(_))
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self.root_cause(), Error::SessionExpired)
    }
}

/// A single file that could not be compressed into the staging area.
///
/// Recorded by the scheduler and surfaced in the report; it never aborts the batch.
#[derive(Error, Debug, Getters)]
#[error("Compressing {path:?} failed:\n{}", indent::indent_all_with("  ", cause.to_string()))]
#[getset(get = "pub")]
pub struct CompressionError {
    path: PathBuf,
    #[source]
    cause: Error,
}

impl CompressionError {
    pub fn new<P: Into<PathBuf>, E: Into<Error>>(path: P, cause: E) -> Self {
        Self {
            path: path.into(),
            cause: cause.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause.is_cancelled()
    }
}

/// Something the enumerator skipped, e.g. a symlink or an unreadable directory.
#[derive(Error, Debug, Clone, PartialEq, Eq, Getters)]
#[error("Skipped {path:?}: {reason}")]
#[getset(get = "pub")]
pub struct EnumerationWarning {
    path: PathBuf,
    reason: String,
}

impl EnumerationWarning {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);

        match error {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_add_msg() {
        let error = Error::from(std::io::Error::other("disk full"));
        let error = error.add_msg("Writing archive failed");

        match &error {
            Error::WithMsg { msg, .. } => assert_eq!(msg, "Writing archive failed"),
            _ => panic!("Expected WithMsg error"),
        }
        let display = error.to_string();
        assert!(display.contains("Writing archive failed"));
        assert!(display.contains("  disk full"));
    }

    #[test]
    fn test_error_add_fn_name() {
        let error = Error::from(std::io::Error::other("boom")).add_fn_name("assemble");

        match &error {
            Error::WithFnName { fn_name, .. } => assert_eq!(fn_name, "assemble"),
            _ => panic!("Expected WithFnName error"),
        }
        assert!(error.to_string().contains("assemble failed"));
    }

    #[test]
    fn test_root_cause_unwraps_context() {
        let error = Error::Cancelled
            .add_msg("Compressing stage")
            .add_fn_name("run");

        assert!(error.is_cancelled());
        assert!(matches!(error.root_cause(), Error::Cancelled));
        assert!(!error.is_auth());
    }

    #[test]
    fn test_constructors() {
        assert!(matches!(
            Error::upload_rejected(403u16, "quota exceeded"),
            Error::UploadRejected { status: 403, .. }
        ));
        assert!(Error::auth("bad token").is_auth());
        assert!(Error::archive("/out.tar", Error::Cancelled)
            .add_msg("Assembling stage")
            .is_archive());
        assert_eq!(
            Error::invalid_job("duplicate source").to_string(),
            "Invalid backup job: duplicate source"
        );
    }

    #[test]
    fn test_error_chain_flattens() {
        let first = Error::Cancelled.chain(Error::SessionExpired);
        let chained = first.chain(Error::from(std::io::Error::other("rmdir failed")));

        match &chained {
            Error::LotsOfError(errors) => assert_eq!(errors.len(), 3),
            _ => panic!("Expected LotsOfError"),
        }
        let display = chained.to_string();
        assert!(display.contains("Backup cancelled\n\nSession expired\n\nrmdir failed"));
        assert_eq!(chained.into_iter().count(), 3);
    }

    #[test]
    fn test_chained_archive_error_is_still_archive() {
        let error = Error::archive("/out.tar", Error::from(std::io::Error::other("disk full")))
            .chain(Error::from(std::io::Error::other("rmdir failed")).add_msg("Removing staging area"));
        assert!(error.is_archive());
        assert!(!Error::Cancelled.chain(Error::SessionExpired).is_archive());
    }

    #[test]
    fn test_root_cause_looks_inside_archive_error() {
        let error = Error::archive("/out.tar", Error::Cancelled).add_fn_name("assemble");
        assert!(error.is_archive());
        assert!(error.is_cancelled());
    }

    #[test]
    fn test_compression_error_display() {
        let error = CompressionError::new(
            "/data/a.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let display = error.to_string();
        assert!(display.contains("/data/a.txt"));
        assert!(display.contains("denied"));
        assert!(!error.is_cancelled());
        assert!(CompressionError::new("/x", Error::Cancelled).is_cancelled());
    }

    #[test]
    fn test_enumeration_warning_display() {
        let warning = EnumerationWarning::new("/data/link", "symbolic link");
        assert_eq!(warning.to_string(), "Skipped \"/data/link\": symbolic link");
    }
}
