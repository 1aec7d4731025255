//! Classification of user supplied source/destination paths.
//!
//! A path that does not exist yet is kept as [`PathClass::Unknown`] and is only
//! re-checked when files are requested, since a save location is often created
//! by the game after the task was configured.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;

use function_name::named;
use walkdir::WalkDir;

use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum PathClass {
    #[default]
    Empty,
    File(PathBuf),
    Directory(PathBuf),
    Unknown(PathBuf),
}

impl PathClass {
    pub fn classify<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return PathClass::Empty;
        }

        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        if path.is_file() {
            PathClass::File(path)
        } else if path.is_dir() {
            PathClass::Directory(path)
        } else {
            PathClass::Unknown(path)
        }
    }

    /// Checks the original path again. `Unknown -> {File, Directory, Unknown}`, and a
    /// file or directory that disappeared falls back to `Unknown`.
    pub fn reclassify(&mut self) -> &Self {
        if let Some(path) = self.path().map(Path::to_path_buf) {
            *self = Self::classify(path);
        }
        self
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            PathClass::Empty => None,
            PathClass::File(p) | PathClass::Directory(p) | PathClass::Unknown(p) => Some(p),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PathClass::Empty)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, PathClass::File(_) | PathClass::Directory(_))
    }

    /// Directory that holds the classified files: the directory itself, or the
    /// parent of a single file.
    pub fn directory(&self) -> Option<&Path> {
        match self {
            PathClass::File(p) => p.parent(),
            PathClass::Directory(p) => Some(p),
            _ => None,
        }
    }

    /// Lists every file covered by this path, recursing into directories.
    ///
    /// An `Unknown` path is reclassified first and fails with
    /// [`Error::PathUnavailable`] when it still cannot be resolved.
    #[named]
    pub fn enumerate_files(&mut self) -> Result<Vec<PathBuf>> {
        if matches!(self, PathClass::Unknown(_)) {
            tracing::debug!("Reclassifying unknown path {:?}", self.path());
            self.reclassify();
        }

        match self {
            PathClass::File(p) => Ok(vec![p.clone()]),
            PathClass::Directory(p) => WalkDir::new(p.as_path())
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|res| match res {
                    Ok(de) if de.file_type().is_file() => Some(Ok(de.into_path())),
                    Ok(_) => None,
                    Err(e) => Some(Err(Error::from(e))),
                })
                .collect::<Result<Vec<_>>>()
                .add_fn_name(function_path!()),
            PathClass::Unknown(p) => Err(Error::PathUnavailable(p.clone())),
            PathClass::Empty => Err(Error::PathUnavailable(PathBuf::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_empty() {
        assert_eq!(PathClass::classify(""), PathClass::Empty);
        assert!(PathClass::classify("").enumerate_files().is_err());
    }

    #[test]
    fn test_classify_file_and_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("save.dat");
        std::fs::write(&file, "data").unwrap();

        assert_eq!(PathClass::classify(&file), PathClass::File(file.clone()));
        assert_eq!(
            PathClass::classify(temp_dir.path()),
            PathClass::Directory(temp_dir.path().to_path_buf())
        );
        assert_eq!(PathClass::classify(&file).directory(), Some(temp_dir.path()));
    }

    #[test]
    fn test_unknown_is_resolved_lazily() {
        let temp_dir = TempDir::new().unwrap();
        let later = temp_dir.path().join("created_later");
        let mut class = PathClass::classify(&later);
        assert_eq!(class, PathClass::Unknown(later.clone()));

        match class.enumerate_files() {
            Err(Error::PathUnavailable(p)) => assert_eq!(p, later),
            other => panic!("Expected PathUnavailable, got {other:?}"),
        }

        std::fs::create_dir_all(later.join("sub")).unwrap();
        std::fs::write(later.join("sub/slot1.sav"), "1").unwrap();
        let files = class.enumerate_files().unwrap();
        assert_eq!(class, PathClass::Directory(later.clone()));
        assert_eq!(files, vec![later.join("sub/slot1.sav")]);
    }

    #[test]
    fn test_enumerate_directory_recursive_files_only() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
        std::fs::write(temp_dir.path().join("root.sav"), "r").unwrap();
        std::fs::write(temp_dir.path().join("a/b/deep.sav"), "d").unwrap();

        let mut class = PathClass::classify(temp_dir.path());
        let files = class.enumerate_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.is_absolute() && f.is_file()));
    }

    #[test]
    fn test_reclassify_detects_removed_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("gone.sav");
        std::fs::write(&file, "x").unwrap();
        let mut class = PathClass::classify(&file);
        std::fs::remove_file(&file).unwrap();
        assert_eq!(class.reclassify(), &PathClass::Unknown(file));
    }
}
