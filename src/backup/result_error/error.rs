use crate::backup::result_error::{AddFunctionName, AddMsg};
use itertools::Itertools;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Regex(#[from] regex::Error),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    Notify(#[from] notify::Error),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error("Path is empty or does not exist: {0:?}")]
    PathUnavailable(PathBuf),
    #[error("File is locked for reading {path:?}: {reason}")]
    FileLocked { path: PathBuf, reason: String },
    #[error("Task {0:?} not found")]
    TaskNotFound(String),
    #[error("Source is not ready: {0}")]
    SourceNotReady(String),
    #[error("Trying to extract entry {entry:?} outside of destination directory {dest:?}")]
    PathTraversal { entry: String, dest: PathBuf },
    #[error("Config file {:?} is corrupt, moved aside to {:?}:\n{}", path, moved_to, indent::indent_all_with("  ", error.to_string()))]
    ConfigCorrupt {
        path: PathBuf,
        moved_to: Option<PathBuf>,
        error: Box<Error>,
    },
    #[error("Cannot save config {:?}, check directory permissions:\n{}", path, indent::indent_all_with("  ", error.to_string()))]
    ConfigSave { path: PathBuf, error: Box<Error> },
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

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(Error::into_iter).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(Error::into_iter)),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Whether this error, or any error it wraps, is a path traversal attempt.
    pub fn is_path_traversal(&self) -> bool {
        match self {
            Error::PathTraversal { .. } => true,
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => {
                error.is_path_traversal()
            }
            Error::LotsOfError(v) => v.iter().any(Error::is_path_traversal),
            _ => false,
        }
    }
}
