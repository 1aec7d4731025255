//! One scheduling cycle over every task of a [`Session`].
//!
//! Per task the cycle goes `Idle -> Scanning -> {BackingUp | Skipped | Failed}`
//! on the source side, then measures the destination and enforces retention when
//! the destination changed. Settings are saved once at the end of the cycle when
//! anything persisted changed.

use crate::backup::compress::CompressionLevel;
use crate::backup::detect::ScanOutcome;
use crate::backup::function_path;
use crate::backup::maker::{make_backup, scan_task, BackupType, SPECIAL_BACKUP_DIRS};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::retention::{enforce_size_limit, measure_dir_size, measure_subdirs_size};
use crate::backup::store::ConfigStore;
use crate::backup::task::{BackupTask, Session};

use chrono::{DateTime, Utc};
use function_name::named;

use std::path::PathBuf;

/// What happened to the source side of a task during one cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Source or destination not configured
    Skipped,
    /// No change signalled since the last cycle
    Idle,
    /// Changes signalled, but auto-backup is off or the interval has not elapsed
    Waiting,
    Unchanged,
    BackedUp(PathBuf),
    Locked(String),
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct CycleReport {
    pub outcomes: Vec<(String, TaskOutcome)>,
    /// Every auto-backup task is free of errors
    pub all_ok: bool,
    /// Settings were written at the end of the cycle
    pub saved: bool,
}

pub struct BackupScheduler {
    store: ConfigStore,
    saved_stamp: u64,
}

impl BackupScheduler {
    /// Starts tracking changes of `session` from its current state, which is assumed
    /// to match what `store` holds.
    pub fn new(store: ConfigStore, session: &Session) -> Self {
        Self {
            store,
            saved_stamp: session.change_stamp(),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn run_cycle(&mut self, session: &mut Session) -> Result<CycleReport> {
        self.run_cycle_at(session, Utc::now())
    }

    /// Runs a cycle as if the current time were `now`. Only a failure to save the
    /// settings is returned as an error; everything else is recorded on the tasks.
    #[named]
    pub fn run_cycle_at(
        &mut self,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> Result<CycleReport> {
        let level = session.compression_level();
        let outcomes = session
            .tasks_mut()
            .iter_mut()
            .map(|task| {
                let outcome = run_source(task, level, now);
                if !matches!(outcome, TaskOutcome::Skipped) {
                    run_destination(task);
                }
                task.state.checked = true;
                (task.name().to_string(), outcome)
            })
            .collect();

        let all_ok = global_status(session);

        let stamp = session.change_stamp();
        let saved = stamp != self.saved_stamp;
        if saved {
            self.store
                .save(&session.to_config())
                .add_fn_name(function_path!())?;
            self.saved_stamp = stamp;
        }

        Ok(CycleReport {
            outcomes,
            all_ok,
            saved,
        })
    }
}

/// Whether every task with auto-backup enabled is currently free of errors.
pub fn global_status(session: &Session) -> bool {
    session
        .tasks()
        .iter()
        .filter(|t| t.config().auto_backup())
        .all(|t| !t.has_error())
}

fn run_source(task: &mut BackupTask, level: CompressionLevel, now: DateTime<Utc>) -> TaskOutcome {
    if task.config().source_path().as_os_str().is_empty()
        || task.config().destination_path().as_os_str().is_empty()
    {
        return TaskOutcome::Skipped;
    }

    if !task.state.source_dirty.is_set() {
        return TaskOutcome::Idle;
    }
    if !task.config().auto_backup() || !task.config().is_due(now) {
        return TaskOutcome::Waiting;
    }

    task.state.source_dirty.take();
    match scan_task(task) {
        ScanOutcome::Unchanged => {
            task.clear_error();
            TaskOutcome::Unchanged
        }
        ScanOutcome::Locked(msg) => {
            task.state.source_dirty.set();
            task.record_error(msg.clone());
            TaskOutcome::Locked(msg)
        }
        ScanOutcome::Error(msg) => {
            task.state.source_dirty.set();
            task.record_error(msg.clone());
            TaskOutcome::Failed(msg)
        }
        ScanOutcome::Modified => match make_backup(task, BackupType::Normal, level, now) {
            Ok(path) => {
                tracing::info!("Task {:?} backup created: {:?}", task.name(), path);
                task.record_success(now);
                task.state.destination_dirty.set();
                TaskOutcome::BackedUp(path)
            }
            Err(e) => {
                tracing::warn!("{e}");
                task.state.source_dirty.set();
                task.record_error(e.to_string());
                TaskOutcome::Failed(e.to_string())
            }
        },
    }
}

fn run_destination(task: &mut BackupTask) {
    if !task.state.destination_dirty.take() {
        return;
    }

    let destination = task.config().destination_path().clone();
    task.state.destination.reclassify();
    task.state.destination_size = measure_dir_size(&destination);
    task.state.special_backups_size = measure_subdirs_size(&destination, &SPECIAL_BACKUP_DIRS);

    let limit = task.config().retention_limit_bytes();
    match task.state.destination_size {
        Some(size) if task.config().retention_enabled() && size > limit => {
            match enforce_size_limit(&destination, limit) {
                Ok((deleted, error)) => {
                    tracing::info!(
                        "Task {:?} retention removed {} files",
                        task.name(),
                        deleted.len()
                    );
                    if let Some(e) = error {
                        tracing::warn!("{e}");
                        task.record_error(e.to_string());
                    }
                }
                Err(e) => {
                    tracing::warn!("{e}");
                    task.record_error(e.to_string());
                }
            }
            task.state.destination_size = measure_dir_size(&destination);
        }
        _ => {}
    }
}
