use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use function_name::named;
use zip::ZipArchive;

use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

/// Extracts every entry of the zip at `archive_path` into `dest_dir`, overwriting
/// existing files.
///
/// All entry names are resolved and checked before anything is written: an entry
/// that would land outside `dest_dir` aborts the whole extraction with
/// [`Error::PathTraversal`]. Directories are checked again on disk while writing,
/// so a symbolic link inside `dest_dir` cannot redirect an entry outside of it.
/// Returns the number of files written.
#[named]
pub fn extract_archive<P1: AsRef<Path>, P2: AsRef<Path>>(
    archive_path: P1,
    dest_dir: P2,
) -> Result<usize> {
    let archive_path = archive_path.as_ref();
    let dest_dir = dest_dir.as_ref();
    tracing::info!("Extracting {:?} into {:?}", archive_path, dest_dir);

    let res = (|| -> Result<usize> {
        let mut archive = ZipArchive::new(BufReader::new(File::open(archive_path)?))?;
        std::fs::create_dir_all(dest_dir)?;
        let dest_root = dest_dir.canonicalize()?;

        let mut out_paths = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            out_paths.push(resolve_entry_path(&dest_root, entry.name())?);
        }

        let mut file_count = 0;
        for (i, out_path) in out_paths.into_iter().enumerate() {
            let mut entry = archive.by_index(i)?;
            if entry.is_dir() {
                std::fs::create_dir_all(&out_path)?;
                ensure_within(&dest_root, &out_path, entry.name())?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent)?;
                ensure_within(&dest_root, parent, entry.name())?;
            }
            if out_path.is_symlink() {
                ensure_within(&dest_root, &out_path, entry.name())?;
            }
            tracing::trace!("Extracting {:?} -> {:?}", entry.name(), out_path);
            let mut out_file = File::create(&out_path)
                .map_err(Error::from)
                .add_msg(format!("Creating {:?} failed", out_path))?;
            std::io::copy(&mut entry, &mut out_file)?;
            file_count += 1;
        }

        Ok(file_count)
    })();

    res.add_msg(format!("Extracting {:?} failed", archive_path))
        .add_fn_name(function_path!())
}

/// Fails with [`Error::PathTraversal`] when `path`, with symbolic links followed,
/// is not inside `dest_root`.
fn ensure_within(dest_root: &Path, path: &Path, entry_name: &str) -> Result<()> {
    match path.canonicalize() {
        Ok(real) if real.starts_with(dest_root) => Ok(()),
        _ => Err(Error::PathTraversal {
            entry: entry_name.to_string(),
            dest: dest_root.to_path_buf(),
        }),
    }
}

/// Resolves an archive entry name against `dest_root` without touching the
/// filesystem. Absolute names, drive prefixes and `..` segments climbing above
/// `dest_root` are rejected. Backslashes are treated as separators.
pub fn resolve_entry_path(dest_root: &Path, entry_name: &str) -> Result<PathBuf> {
    let traversal = || Error::PathTraversal {
        entry: entry_name.to_string(),
        dest: dest_root.to_path_buf(),
    };

    let normalized = entry_name.replace('\\', "/");
    let mut resolved = dest_root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(traversal());
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }

    if !resolved.starts_with(dest_root) {
        return Err(traversal());
    }
    Ok(resolved)
}
