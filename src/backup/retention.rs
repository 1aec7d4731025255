use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{AddFunctionName, AddMsg};

use function_name::named;
use itertools::Itertools;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Number of archives always kept in a destination, whatever its size
pub static MIN_KEPT_FILES: usize = 4;

/// Sum of the sizes of the files directly in `dir`. Subfolders are not counted.
/// `None` when the directory cannot be read.
pub fn measure_dir_size<P: AsRef<Path>>(dir: P) -> Option<u64> {
    let entries = std::fs::read_dir(dir.as_ref()).ok()?;
    Some(
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok())
            .filter(|md| md.is_file())
            .map(|md| md.len())
            .sum(),
    )
}

/// Combined [`measure_dir_size`] of `subdirs` under `dir`; missing subfolders count
/// as empty.
pub fn measure_subdirs_size<P: AsRef<Path>>(dir: P, subdirs: &[&str]) -> Option<u64> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return None;
    }
    Some(
        subdirs
            .iter()
            .map(|sub| measure_dir_size(dir.join(sub)).unwrap_or(0))
            .sum(),
    )
}

#[derive(Debug)]
struct RetainedFile {
    path: PathBuf,
    created: SystemTime,
}

/// Deletes the oldest files directly in `dir` until their total size is at most
/// `limit_bytes`, always keeping [`MIN_KEPT_FILES`] files.
///
/// Age is the creation time, or the modification time where the platform does
/// not record creation. A file that cannot be deleted is skipped and the next one
/// is tried; those failures are returned together as the non-fatal error.
pub fn enforce_size_limit<P: AsRef<Path>>(
    dir: P,
    limit_bytes: u64,
) -> Result<(Vec<PathBuf>, Option<Error>)> {
    enforce_size_limit_with(dir.as_ref(), limit_bytes, |path| std::fs::remove_file(path))
}

#[named]
fn enforce_size_limit_with<F: Fn(&Path) -> std::io::Result<()>>(
    dir: &Path,
    limit_bytes: u64,
    remove: F,
) -> Result<(Vec<PathBuf>, Option<Error>)> {
    let files = list_files_oldest_first(dir)
        .add_msg(format!("Listing {:?} for retention failed", dir))
        .add_fn_name(function_path!())?;

    let mut size = measure_dir_size(dir).unwrap_or_default();
    let mut remaining = files.len();
    let mut deleted = Vec::new();
    let mut errors = Vec::new();

    for file in files {
        if remaining <= MIN_KEPT_FILES || size <= limit_bytes {
            break;
        }

        match remove(&file.path) {
            Ok(()) => {
                tracing::info!("Removing out of retention file {:?}", file.path);
                remaining -= 1;
                size = measure_dir_size(dir).unwrap_or_default();
                deleted.push(file.path);
            }
            Err(e) => {
                tracing::warn!("Removing out of retention file {:?} failed: {e}", file.path);
                errors.push(
                    Error::from(e).add_msg(format!("Removing {:?} failed", file.path)),
                );
            }
        }
    }

    if size > limit_bytes {
        tracing::debug!(
            "{:?} still holds {} bytes over the {} bytes limit, keeping {} files",
            dir,
            size,
            limit_bytes,
            remaining
        );
    }

    Ok((
        deleted,
        convert_error_vec(errors).add_fn_name(function_path!()).err(),
    ))
}

fn list_files_oldest_first(dir: &Path) -> Result<Vec<RetainedFile>> {
    let files = std::fs::read_dir(dir)?
        .map(|entry| -> Result<Option<RetainedFile>> {
            let entry = entry?;
            let md = entry.metadata()?;
            if !md.is_file() {
                return Ok(None);
            }
            let created = md.created().or_else(|_| md.modified())?;
            Ok(Some(RetainedFile {
                path: entry.path(),
                created,
            }))
        })
        .filter_map_ok(|f| f)
        .collect::<Result<Vec<_>>>()?;

    Ok(files
        .into_iter()
        .sorted_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Creates `count` archives of `size` bytes, oldest first.
    fn create_archives(dir: &Path, count: usize, size: usize) -> Vec<PathBuf> {
        let base = SystemTime::now() - Duration::from_secs(3600);
        (0..count)
            .map(|i| {
                let path = dir.join(format!("2024.01.0{}-00.00.00.zip", i + 1));
                std::fs::write(&path, vec![0u8; size]).unwrap();
                let mtime = base + Duration::from_secs(60 * i as u64);
                filetime::set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
                std::thread::sleep(Duration::from_millis(20));
                path
            })
            .collect()
    }

    #[test]
    fn test_measure_dir_size_is_not_recursive() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.zip"), [0u8; 10]).unwrap();
        std::fs::create_dir(temp_dir.path().join("Manual")).unwrap();
        std::fs::write(temp_dir.path().join("Manual/b.zip"), [0u8; 5]).unwrap();

        assert_eq!(measure_dir_size(temp_dir.path()), Some(10));
        assert_eq!(
            measure_subdirs_size(temp_dir.path(), &["Manual", "Pre-Restore"]),
            Some(5)
        );
        assert_eq!(measure_dir_size(temp_dir.path().join("missing")), None);
    }

    #[test]
    fn test_deletes_oldest_until_under_limit() {
        let temp_dir = TempDir::new().unwrap();
        let archives = create_archives(temp_dir.path(), 6, 100);

        let (deleted, error) = enforce_size_limit(temp_dir.path(), 450).unwrap();
        assert!(error.is_none());
        assert_eq!(deleted, archives[..2].to_vec());
        assert_eq!(measure_dir_size(temp_dir.path()), Some(400));
    }

    #[test]
    fn test_floor_of_four_files_is_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let archives = create_archives(temp_dir.path(), 6, 100);

        let (deleted, error) = enforce_size_limit(temp_dir.path(), 10).unwrap();
        assert!(error.is_none());
        assert_eq!(deleted, archives[..2].to_vec());
        assert!(archives[2..].iter().all(|p| p.exists()));
    }

    #[test]
    fn test_under_limit_deletes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        create_archives(temp_dir.path(), 6, 100);

        let (deleted, error) = enforce_size_limit(temp_dir.path(), 600).unwrap();
        assert!(deleted.is_empty());
        assert!(error.is_none());
    }

    #[test]
    fn test_subfolders_are_not_touched() {
        let temp_dir = TempDir::new().unwrap();
        create_archives(temp_dir.path(), 5, 100);
        std::fs::create_dir(temp_dir.path().join("Manual")).unwrap();
        std::fs::write(temp_dir.path().join("Manual/keep.zip"), [0u8; 1000]).unwrap();

        let (deleted, _) = enforce_size_limit(temp_dir.path(), 100).unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(temp_dir.path().join("Manual/keep.zip").exists());
    }

    #[test]
    fn test_undeletable_file_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let archives = create_archives(temp_dir.path(), 6, 100);
        let stuck = archives[0].clone();

        let (deleted, error) = enforce_size_limit_with(temp_dir.path(), 450, |path| {
            if path == stuck {
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "in use"))
            } else {
                std::fs::remove_file(path)
            }
        })
        .unwrap();

        assert_eq!(deleted, archives[1..3].to_vec());
        assert!(stuck.exists());
        assert_eq!(measure_dir_size(temp_dir.path()), Some(400));
        let error = error.unwrap().to_string();
        assert!(error.contains("2024.01.01-00.00.00.zip"));
        assert!(error.contains("in use"));
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(enforce_size_limit(temp_dir.path().join("missing"), 0).is_err());
    }
}
