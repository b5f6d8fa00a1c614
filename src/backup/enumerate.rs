use crate::backup::result_error::error::EnumerationWarning;
use dyn_iter::{DynIter, IntoDynIterator};
use getset::{CopyGetters, Getters};
use walkdir::{DirEntry, WalkDir};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name used when a root has no final component, e.g. `/`.
static FALLBACK_ROOT_NAME: &str = "root";

/// A source directory together with the name it gets inside the archive.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct SourceRoot {
    path: Arc<Path>,
    name: Arc<str>,
}

impl SourceRoot {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path: PathBuf = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| FALLBACK_ROOT_NAME.to_owned());
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// One regular file, or a directory when asked for, discovered under a [`SourceRoot`].
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct FileRecord {
    #[getset(get = "pub")]
    root: SourceRoot,
    #[getset(get = "pub")]
    path: PathBuf,
    #[getset(get_copy = "pub")]
    size: u64,
    #[getset(get = "pub")]
    relative_path: PathBuf,
    #[getset(get_copy = "pub")]
    is_dir: bool,
}

impl FileRecord {
    pub fn new<P: Into<PathBuf>, R: Into<PathBuf>>(
        root: SourceRoot,
        path: P,
        size: u64,
        relative_path: R,
    ) -> Self {
        Self {
            root,
            path: path.into(),
            size,
            relative_path: relative_path.into(),
            is_dir: false,
        }
    }

    pub fn directory<P: Into<PathBuf>, R: Into<PathBuf>>(
        root: SourceRoot,
        path: P,
        relative_path: R,
    ) -> Self {
        Self {
            is_dir: true,
            ..Self::new(root, path, 0, relative_path)
        }
    }

    /// `<root-name>/<relative-path>`, the location of this entry inside the archive.
    /// The root directory itself is just `<root-name>`.
    pub fn member_name(&self) -> PathBuf {
        let root_name = Path::new(self.root.name.as_ref());
        if self.relative_path.as_os_str().is_empty() {
            return root_name.to_path_buf();
        }
        root_name.join(&self.relative_path)
    }
}

pub type EnumerationItem = Result<FileRecord, EnumerationWarning>;

/// Lazily walks every source root in order.
///
/// Consumed by iteration; a new job needs a new enumerator.
#[derive(Debug)]
pub struct FileEnumerator {
    roots: Vec<SourceRoot>,
    include_directories: bool,
}

impl FileEnumerator {
    pub fn new<I: IntoIterator<Item = SourceRoot>>(roots: I) -> Self {
        Self {
            roots: roots.into_iter().collect(),
            include_directories: false,
        }
    }

    /// Also yield a record for every directory, roots included.
    pub fn with_directories(mut self, include_directories: bool) -> Self {
        self.include_directories = include_directories;
        self
    }
}

impl IntoIterator for FileEnumerator {
    type Item = EnumerationItem;
    type IntoIter = DynIter<'static, EnumerationItem>;

    fn into_iter(self) -> Self::IntoIter {
        let include_directories = self.include_directories;
        self.roots
            .into_iter()
            .flat_map(move |root| walk_root(root, include_directories))
            .into_dyn_iter()
    }
}

fn walk_root(root: SourceRoot, include_directories: bool) -> DynIter<'static, EnumerationItem> {
    if !root.path.is_dir() {
        tracing::warn!("Source root {:?} is not a readable directory", root.path);
        return std::iter::once(Err(EnumerationWarning::new(
            root.path.as_ref(),
            "source root is not a readable directory",
        )))
        .into_dyn_iter();
    }

    tracing::info!("Starting directory scan: {:?}", root.path);
    WalkDir::new(root.path.as_ref())
        .follow_links(false)
        .into_iter()
        .filter_map(move |res| match res {
            Ok(de) => process_dir_entry(de, &root, include_directories),
            Err(e) => {
                let path = e.path().unwrap_or(root.path.as_ref()).to_path_buf();
                tracing::warn!("Skipping unreadable entry {:?}: {}", path, e);
                Some(Err(EnumerationWarning::new(path, e.to_string())))
            }
        })
        .into_dyn_iter()
}

fn process_dir_entry(
    de: DirEntry,
    root: &SourceRoot,
    include_directories: bool,
) -> Option<EnumerationItem> {
    if de.depth() > 0 && de.path_is_symlink() {
        tracing::warn!("Skipping symbolic link {:?}", de.path());
        return Some(Err(EnumerationWarning::new(de.path(), "symbolic link")));
    }

    if include_directories && de.file_type().is_dir() {
        return Some(
            relative_to_root(&de, root)
                .map(|relative_path| FileRecord::directory(root.clone(), de.into_path(), relative_path)),
        );
    }

    if !de.file_type().is_file() {
        tracing::trace!("Skipping {:?} not a file", de.path());
        return None;
    }

    let size = match de.metadata() {
        Ok(md) => md.len(),
        Err(e) => {
            tracing::warn!("Skipping {:?}, metadata unavailable: {}", de.path(), e);
            return Some(Err(EnumerationWarning::new(de.path(), e.to_string())));
        }
    };

    let relative_path = match relative_to_root(&de, root) {
        Ok(relative_path) => relative_path,
        Err(warning) => return Some(Err(warning)),
    };

    tracing::trace!("Including file: {:?} ({} bytes)", de.path(), size);
    Some(Ok(FileRecord::new(
        root.clone(),
        de.into_path(),
        size,
        relative_path,
    )))
}

fn relative_to_root(de: &DirEntry, root: &SourceRoot) -> Result<PathBuf, EnumerationWarning> {
    de.path()
        .strip_prefix(root.path.as_ref())
        .map(Path::to_path_buf)
        .map_err(|e| EnumerationWarning::new(de.path(), e.to_string()))
}
