//! Detection of source changes since the last successful backup.
//!
//! A locked file always wins over a modified one: backing up a save that is
//! being written produces a useless archive, so the scan reports `Locked` even
//! when another file already proved the source changed. This also means an
//! unrelated locked file (an editor lock file, say) blocks the backup until it
//! is released or excluded by the task filter.

use crate::backup::function_path;
use crate::backup::path_class::PathClass;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use function_name::named;

use std::fs::File;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    Unchanged,
    Modified,
    Locked(String),
    Error(String),
}

/// Scans the files of `source` for which `exclude` returns false.
///
/// Every file is first opened with a shared lock; only when none is locked are
/// modification times compared against `last_backup`, stopping at the first newer
/// file. `None` for `last_backup` means never backed up.
#[named]
pub fn scan<F: Fn(&Path) -> bool>(
    source: &mut PathClass,
    exclude: F,
    last_backup: Option<DateTime<Utc>>,
) -> ScanOutcome {
    match scan_files(source, exclude, last_backup).add_fn_name(function_path!()) {
        Ok(outcome) => {
            tracing::debug!("Scan of {:?} finished: {:?}", source.path(), outcome);
            outcome
        }
        Err(e) => {
            tracing::warn!("Scan of {:?} failed: {e}", source.path());
            ScanOutcome::Error(e.to_string())
        }
    }
}

fn scan_files<F: Fn(&Path) -> bool>(
    source: &mut PathClass,
    exclude: F,
    last_backup: Option<DateTime<Utc>>,
) -> Result<ScanOutcome> {
    source.reclassify();
    let files = source
        .enumerate_files()?
        .into_iter()
        .filter(|f| !exclude(f.as_path()))
        .collect::<Vec<_>>();

    for file in &files {
        if let Err(e) = check_not_locked(file) {
            tracing::info!("{e}");
            return Ok(ScanOutcome::Locked(e.to_string()));
        }
    }

    for file in &files {
        if is_modified_since(file, last_backup)? {
            tracing::debug!("{:?} modified since {:?}", file, last_backup);
            return Ok(ScanOutcome::Modified);
        }
    }

    Ok(ScanOutcome::Unchanged)
}

/// Opens `path` for reading and takes a shared advisory lock on it. Fails when the
/// file cannot be opened or another handle holds an exclusive lock.
pub fn check_not_locked(path: &Path) -> Result<()> {
    let locked = |e: std::io::Error| Error::FileLocked {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let file = File::open(path).map_err(locked)?;
    FileExt::try_lock_shared(&file).map_err(locked)?;
    Ok(())
}

fn is_modified_since(path: &Path, last_backup: Option<DateTime<Utc>>) -> Result<bool> {
    let Some(last_backup) = last_backup else {
        return Ok(true);
    };
    let modified = DateTime::<Utc>::from(std::fs::metadata(path)?.modified()?);
    Ok(modified > last_backup)
}
