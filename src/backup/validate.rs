//! Validation functions for configuration values.
//!
//! Provides custom validation functions for source directories, the destination
//! archive path and remote file names.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::{Path, PathBuf};

pub fn validate_valid_file_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    if name.as_ref().is_empty() || !is_sanitized(name.as_ref()) {
        return Err(ValidationError::new("InvalidFileName").with_message(
            format!(
                "Invalid file name, try sanitizing like {:?}",
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

pub fn validate_source_dirs(dirs: &[PathBuf]) -> Result<(), ValidationError> {
    dirs.iter().try_for_each(validate_dir_exist)
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist(dir)?;
    let md = std::fs::metadata(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot access metadata for {:?}: {}", dir, e).into())
    })?;
    if md.permissions().readonly() {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}", dir).into()))
    } else {
        Ok(())
    }
}

/// The destination must name a file (not a directory) inside a writable directory.
pub fn validate_destination<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    let path = path.as_ref();
    if path.is_dir() {
        return Err(ValidationError::new("InvalidDestination")
            .with_message(format!("{:?} is a directory", path).into()));
    }
    if path.file_name().is_none() {
        return Err(ValidationError::new("InvalidDestination")
            .with_message(format!("{:?} has no file name", path).into()));
    }

    validate_writable_dir(parent_dir(path))
}

/// Parent directory of `path`, treating a bare file name as relative to the cwd.
pub fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_valid_file_name() {
        assert!(validate_valid_file_name("backup_final.tar").is_ok());
        assert!(validate_valid_file_name("a/b.tar").is_err());
        assert!(validate_valid_file_name("").is_err());
    }

    #[test]
    fn test_validate_dir_exist() {
        let temp_dir = TempDir::new().unwrap();
        assert!(validate_dir_exist(temp_dir.path()).is_ok());

        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_dir_exist(&file).is_err());
        assert!(validate_dir_exist(temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_validate_source_dirs() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let dirs = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        assert!(validate_source_dirs(&dirs).is_ok());

        let dirs = vec![a.path().to_path_buf(), b.path().join("nope")];
        assert!(validate_source_dirs(&dirs).is_err());
    }

    #[test]
    fn test_validate_destination() {
        let temp_dir = TempDir::new().unwrap();
        assert!(validate_destination(temp_dir.path().join("out.tar")).is_ok());
        assert!(validate_destination(temp_dir.path()).is_err());
        assert!(validate_destination(temp_dir.path().join("missing/out.tar")).is_err());
    }

    #[test]
    fn test_parent_dir_of_bare_name() {
        assert_eq!(parent_dir(Path::new("out.tar")), Path::new("."));
        assert_eq!(parent_dir(Path::new("/tmp/out.tar")), Path::new("/tmp"));
    }
}
