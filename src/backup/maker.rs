//! Backup and restore operations on a single task.

use crate::backup::archive::create_archive;
use crate::backup::backup_config::TaskConfig;
use crate::backup::archive::extract::extract_archive;
use crate::backup::compress::CompressionLevel;
use crate::backup::detect::{scan, ScanOutcome};
use crate::backup::file_filter::FileFilter;
use crate::backup::function_path;
use crate::backup::path_class::PathClass;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::task::BackupTask;

use chrono::{DateTime, Local, Utc};
use function_name::named;
use sanitize_filename::sanitize;
use validator::Validate;
use walkdir::WalkDir;

use std::path::{Path, PathBuf};

pub static ARCHIVE_EXTENSION: &str = "zip";
pub static MANUAL_DIR: &str = "Manual";
pub static PRE_RESTORE_DIR: &str = "Pre-Restore";
/// Folders under the destination excluded from the retention quota
pub static SPECIAL_BACKUP_DIRS: [&str; 2] = ["Manual", "Pre-Restore"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackupType {
    /// Scheduled backup, stored in the destination root
    Normal,
    Manual,
    /// Manual backup with a user supplied name appended
    ManualNamed(String),
    /// Snapshot of the current state taken right before a restore
    PreRestore,
}

impl BackupType {
    pub fn postfix(&self) -> String {
        match self {
            BackupType::Normal => String::new(),
            BackupType::Manual => "_manual".to_string(),
            BackupType::ManualNamed(name) => format!("_{}", sanitize(name)),
            BackupType::PreRestore => "_pre-restore".to_string(),
        }
    }

    pub fn subfolder(&self) -> Option<&'static str> {
        match self {
            BackupType::Normal => None,
            BackupType::Manual | BackupType::ManualNamed(_) => Some(MANUAL_DIR),
            BackupType::PreRestore => Some(PRE_RESTORE_DIR),
        }
    }
}

/// `<destination>[/<subfolder>]/<formatted local time><postfix>.zip`. A ` (n)` suffix
/// is added when a backup with the same name already exists.
pub fn archive_path<P: AsRef<Path>>(
    destination: P,
    file_name_pattern: &str,
    backup_type: &BackupType,
    now: DateTime<Utc>,
) -> PathBuf {
    let mut dir = destination.as_ref().to_path_buf();
    if let Some(subfolder) = backup_type.subfolder() {
        dir.push(subfolder);
    }

    let stem = format!(
        "{}{}",
        now.with_timezone(&Local).format(file_name_pattern),
        backup_type.postfix()
    );
    std::iter::once(dir.join(format!("{stem}.{ARCHIVE_EXTENSION}")))
        .chain((1..).map(|i| dir.join(format!("{stem} ({i}).{ARCHIVE_EXTENSION}"))))
        .find(|p| !p.exists())
        .unwrap_or_else(|| dir.join(format!("{stem}.{ARCHIVE_EXTENSION}")))
}

/// Files a task never backs up: those matched by its filter and anything inside its
/// destination. Shared by the change scan and the archiver so both see the same set.
#[derive(Debug)]
pub struct TaskExclusion {
    filter: FileFilter,
    destination_root: Option<PathBuf>,
}

impl TaskExclusion {
    pub fn for_task(config: &TaskConfig) -> Result<Self> {
        let filter = FileFilter::new(config.file_filter())?;
        let destination = config.destination_path();
        let destination_root = (!destination.as_os_str().is_empty())
            .then(|| std::path::absolute(destination).unwrap_or_else(|_| destination.clone()));
        Ok(Self {
            filter,
            destination_root,
        })
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.filter.is_excluded(path)
            || self
                .destination_root
                .as_ref()
                .is_some_and(|root| path.starts_with(root))
    }
}

/// Change scan of the task source, skipping exactly what [`make_backup`] would skip.
pub fn scan_task(task: &mut BackupTask) -> ScanOutcome {
    let last_backup = task.config().last_backup();
    match TaskExclusion::for_task(task.config()) {
        Ok(exclusion) => scan(
            &mut task.state.source,
            |p| exclusion.is_excluded(p),
            last_backup,
        ),
        Err(e) => {
            tracing::warn!("Task {:?} cannot be scanned: {e}", task.name());
            ScanOutcome::Error(e.to_string())
        }
    }
}

/// Archives the task source into its destination, excluding files matched by the
/// task filter and anything inside the destination itself.
#[named]
pub fn make_backup(
    task: &mut BackupTask,
    backup_type: BackupType,
    level: CompressionLevel,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let res = (|| -> Result<PathBuf> {
        task.config().validate()?;
        let destination = task.config().destination_path().clone();
        if destination.as_os_str().is_empty() {
            return Err(Error::PathUnavailable(destination));
        }

        let path = archive_path(
            &destination,
            task.config().file_name_pattern(),
            &backup_type,
            now,
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(Error::from)
                .add_msg(format!("Creating backup folder {:?} failed", parent))?;
        }
        task.state.destination.reclassify();

        let exclusion = TaskExclusion::for_task(task.config())?;
        create_archive(&mut task.state.source, &path, level, |p| {
            exclusion.is_excluded(p)
        })
    })();

    res.add_msg(format!("{:?} backup of task {:?} failed", backup_type, task.name()))
        .add_fn_name(function_path!())
}

/// Manual backup regardless of changes. The outcome is recorded as the task
/// error, the last backup time is left alone so the schedule is unaffected.
pub fn force_backup(
    task: &mut BackupTask,
    name: Option<&str>,
    level: CompressionLevel,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let backup_type = match name {
        Some(name) if !name.trim().is_empty() => BackupType::ManualNamed(name.trim().to_string()),
        _ => BackupType::Manual,
    };

    match make_backup(task, backup_type, level, now) {
        Ok(path) => {
            tracing::info!("Task {:?} manual backup created: {:?}", task.name(), path);
            task.clear_error();
            task.state.destination_dirty.set();
            Ok(path)
        }
        Err(e) => {
            task.record_error(e.to_string());
            Err(e)
        }
    }
}

/// Every archive under the destination, subfolders included, sorted by path.
#[named]
pub fn list_backups(task: &BackupTask) -> Result<Vec<PathBuf>> {
    let destination = task.config().destination_path();
    if !destination.is_dir() {
        return Ok(Vec::new());
    }

    WalkDir::new(destination)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => {
                let is_archive = entry.file_type().is_file()
                    && entry
                        .path()
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
                is_archive.then(|| Ok(entry.into_path()))
            }
            Err(e) => Some(Err(Error::from(e))),
        })
        .collect::<Result<Vec<_>>>()
        .map(|mut paths| {
            paths.sort();
            paths
        })
        .add_fn_name(function_path!())
}

/// Extracts `archive` over the task source after taking a pre-restore backup of the
/// current state. Returns the number of restored files.
///
/// Refused while the source or destination cannot be resolved, or while a source
/// file is locked.
#[named]
pub fn restore_backup<P: AsRef<Path>>(
    task: &mut BackupTask,
    archive: P,
    level: CompressionLevel,
    now: DateTime<Utc>,
) -> Result<usize> {
    let archive = archive.as_ref();
    let res = (|| -> Result<usize> {
        if !task.state.source.reclassify().is_resolved() {
            return Err(Error::PathUnavailable(
                task.config().source_path().to_path_buf(),
            ));
        }
        if !task.state.destination.reclassify().is_resolved() {
            return Err(Error::PathUnavailable(
                task.config().destination_path().to_path_buf(),
            ));
        }

        match scan_task(task) {
            ScanOutcome::Locked(msg) | ScanOutcome::Error(msg) => {
                return Err(Error::SourceNotReady(msg));
            }
            ScanOutcome::Modified | ScanOutcome::Unchanged => {}
        }

        let pre_restore = make_backup(task, BackupType::PreRestore, level, now)?;
        tracing::info!("Pre-restore backup created: {:?}", pre_restore);
        task.state.destination_dirty.set();

        let target = match &task.state.source {
            PathClass::File(_) | PathClass::Directory(_) => task
                .state
                .source
                .directory()
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::PathUnavailable(task.config().source_path().clone()))?,
            _ => return Err(Error::PathUnavailable(task.config().source_path().clone())),
        };
        extract_archive(archive, &target)
    })();

    match &res {
        Ok(count) => tracing::info!(
            "Restored {} files of {:?} into task {:?}",
            count,
            archive,
            task.name()
        ),
        Err(e) => tracing::warn!("Restore of {:?} failed: {e}", archive),
    }
    res.add_msg(format!("Restoring {:?} into task {:?} failed", archive, task.name()))
        .add_fn_name(function_path!())
}
