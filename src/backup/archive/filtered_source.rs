use crate::backup::archive::{ArchiveEntry, ArchiveEntryIterable};
use crate::backup::function_path;
use crate::backup::path_class::PathClass;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use dyn_iter::{DynIter, IntoDynIterator};
use function_name::named;
use itertools::Itertools;

use std::path::{Path, PathBuf};

/// A source path with an exclusion predicate applied to its files.
///
/// A single file source always yields exactly one entry named after the file;
/// the predicate only filters directory sources.
pub struct FilteredSource<'a, F: Fn(&Path) -> bool> {
    source: &'a mut PathClass,
    exclude: F,
}

impl<'a, F: Fn(&Path) -> bool> FilteredSource<'a, F> {
    pub fn new(source: &'a mut PathClass, exclude: F) -> Self {
        Self { source, exclude }
    }
}

impl<F: Fn(&Path) -> bool> ArchiveEntryIterable for FilteredSource<'_, F> {
    #[named]
    fn archive_entry_iterator<'a>(&'a mut self) -> Result<DynIter<'a, Result<ArchiveEntry>>> {
        let files = self.source.enumerate_files().add_fn_name(function_path!())?;

        match &*self.source {
            PathClass::File(file) => {
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| Error::PathUnavailable(file.clone()))?;
                tracing::trace!("Including file: {:?} -> {:?}", file, name);
                Ok(std::iter::once(Ok(ArchiveEntry::new(file.as_path(), name))).into_dyn_iter())
            }
            PathClass::Directory(root) => {
                let root = root.clone();
                tracing::debug!("Collecting {} files under {:?}", files.len(), root);
                let exclude = &self.exclude;
                let entries = files
                    .into_iter()
                    .filter(move |p| {
                        let excluded = exclude(p.as_path());
                        if excluded {
                            tracing::trace!("Skipping {:?}, excluded by filter", p);
                        }
                        !excluded
                    })
                    .map(move |p| process_file(p, &root).add_fn_name(function_path!()));
                Ok(entries.into_dyn_iter())
            }
            other => Err(Error::PathUnavailable(
                other.path().map(Path::to_path_buf).unwrap_or_default(),
            )),
        }
    }
}

fn process_file(p: PathBuf, root: &Path) -> Result<ArchiveEntry> {
    let stripped = p
        .strip_prefix(root)
        .map_err(Error::from)
        .add_msg(format!("Stripping {:?} from {:?} failed", root, p))?;
    let name = stripped
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .join("/");
    let entry = ArchiveEntry::new(p.as_path(), name);
    tracing::trace!("Including file: {:?} -> {:?}", entry.src, entry.dst);
    Ok(entry)
}
