//! In-memory task state: persisted [`TaskConfig`] joined with runtime-only state.
//!
//! Every mutation that must reach the settings file goes through [`BackupTask`] or
//! [`Session`] and advances a change counter. The scheduler compares
//! [`Session::change_stamp`] with the stamp of its last save to decide whether to
//! write the settings again.

use crate::backup::backup_config::{unique_task_name, AppConfig, TaskConfig, WindowPosition};
use crate::backup::compress::CompressionLevel;
use crate::backup::path_class::PathClass;

use chrono::{DateTime, Utc};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A flag raised from watcher threads and consumed by the scheduler.
///
/// The scheduler clears it with [`DirtyFlag::take`] before doing the work and sets
/// it again when the work fails, so a `set` racing with the clear is never lost.
#[derive(Clone, Debug, Default)]
pub struct DirtyFlag(Arc<AtomicBool>);

impl DirtyFlag {
    pub fn new(set: bool) -> Self {
        Self(Arc::new(AtomicBool::new(set)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// State of a task that is never written to the settings file.
#[derive(Clone, Debug)]
pub struct TaskRuntimeState {
    pub source: PathClass,
    pub destination: PathClass,
    /// Size of the files directly in the destination, `None` until measured
    pub destination_size: Option<u64>,
    /// Combined size of the manual and pre-restore folders
    pub special_backups_size: Option<u64>,
    /// At least one cycle examined the task since start
    pub checked: bool,
    pub source_dirty: DirtyFlag,
    pub destination_dirty: DirtyFlag,
    change_counter: u64,
}

impl TaskRuntimeState {
    fn for_config(config: &TaskConfig) -> Self {
        Self {
            source: PathClass::classify(config.source_path()),
            destination: PathClass::classify(config.destination_path()),
            destination_size: None,
            special_backups_size: None,
            checked: false,
            source_dirty: DirtyFlag::new(true),
            destination_dirty: DirtyFlag::new(true),
            change_counter: 0,
        }
    }

    pub fn change_counter(&self) -> u64 {
        self.change_counter
    }
}

#[derive(Clone, Debug)]
pub struct BackupTask {
    config: TaskConfig,
    pub state: TaskRuntimeState,
}

impl BackupTask {
    pub fn new(mut config: TaskConfig) -> Self {
        config.normalize_destination();
        let state = TaskRuntimeState::for_config(&config);
        Self { config, state }
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Applies a settings change. Paths are reclassified and both dirty flags raised
    /// so the next cycle looks at the task again.
    pub fn edit<R, F: FnOnce(&mut TaskConfig) -> R>(&mut self, f: F) -> R {
        let res = f(&mut self.config);
        self.config.normalize_destination();
        self.state.source = PathClass::classify(self.config.source_path());
        self.state.destination = PathClass::classify(self.config.destination_path());
        self.state.destination_size = None;
        self.state.special_backups_size = None;
        self.state.source_dirty.set();
        self.state.destination_dirty.set();
        self.bump();
        res
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.config.set_last_backup(Some(now));
        self.config.set_last_error(None);
        self.bump();
    }

    pub fn record_error<S: Into<String>>(&mut self, msg: S) {
        let msg = msg.into();
        if self.config.last_error().as_deref() != Some(msg.as_str()) {
            self.config.set_last_error(Some(msg));
            self.bump();
        }
    }

    pub fn clear_error(&mut self) {
        if self.config.last_error().is_some() {
            self.config.set_last_error(None);
            self.bump();
        }
    }

    pub fn has_error(&self) -> bool {
        self.config.last_error().is_some()
    }

    fn bump(&mut self) {
        self.state.change_counter += 1;
    }
}

/// All tasks plus global settings, as held by a running process.
#[derive(Clone, Debug)]
pub struct Session {
    tasks: Vec<BackupTask>,
    last_selected_task_index: usize,
    compression_level: CompressionLevel,
    pub tick_interval: Duration,
    pub window: WindowPosition,
    change_counter: u64,
}

impl From<AppConfig> for Session {
    fn from(config: AppConfig) -> Self {
        let compression_level = config.compression();
        let mut tasks: Vec<BackupTask> = Vec::with_capacity(config.tasks.len());
        for mut task in config.tasks {
            let name = unique_task_name(task.name(), tasks.iter().map(BackupTask::name));
            task.set_name(name);
            tasks.push(BackupTask::new(task));
        }
        if tasks.is_empty() {
            tasks.push(BackupTask::new(TaskConfig::default()));
        }
        let last_selected_task_index = if config.last_selected_task_index < tasks.len() {
            config.last_selected_task_index
        } else {
            0
        };

        Self {
            tasks,
            last_selected_task_index,
            compression_level,
            tick_interval: config.tick_interval,
            window: config.window,
            change_counter: 0,
        }
    }
}

impl From<&Session> for AppConfig {
    fn from(session: &Session) -> Self {
        Self {
            tasks: session.tasks.iter().map(|t| t.config.clone()).collect(),
            last_selected_task_index: session.last_selected_task_index,
            compression_level: session.compression_level.into(),
            tick_interval: session.tick_interval,
            window: session.window,
        }
    }
}

impl Session {
    pub fn tasks(&self) -> &[BackupTask] {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut [BackupTask] {
        &mut self.tasks
    }

    pub fn task_mut_by_name(&mut self, name: &str) -> Option<&mut BackupTask> {
        self.tasks.iter_mut().find(|t| t.name() == name)
    }

    pub fn compression_level(&self) -> CompressionLevel {
        self.compression_level
    }

    pub fn set_compression_level(&mut self, level: CompressionLevel) {
        if level != self.compression_level {
            self.compression_level = level;
            self.change_counter += 1;
        }
    }

    pub fn last_selected_task_index(&self) -> usize {
        self.last_selected_task_index
    }

    pub fn select_task(&mut self, index: usize) -> bool {
        if index >= self.tasks.len() {
            return false;
        }
        if index != self.last_selected_task_index {
            self.last_selected_task_index = index;
            self.change_counter += 1;
        }
        true
    }

    /// Appends a task, renaming it to `name (n)` if the name is already in use.
    pub fn add_task(&mut self, mut config: TaskConfig) -> &mut BackupTask {
        let name = unique_task_name(config.name(), self.tasks.iter().map(BackupTask::name));
        config.set_name(name);
        self.tasks.push(BackupTask::new(config));
        self.change_counter += 1;
        let index = self.tasks.len() - 1;
        &mut self.tasks[index]
    }

    /// Removes the task at `index`. The last remaining task is never removed.
    pub fn remove_task(&mut self, index: usize) -> Option<TaskConfig> {
        if self.tasks.len() <= 1 || index >= self.tasks.len() {
            return None;
        }

        let removed = self.tasks.remove(index);
        // keeps change_stamp monotonic after the task's own counter is gone
        self.change_counter += removed.state.change_counter + 1;
        if self.last_selected_task_index >= self.tasks.len() {
            self.last_selected_task_index = self.tasks.len() - 1;
        }
        Some(removed.config)
    }

    /// Monotonic stamp that advances on every persisted change.
    pub fn change_stamp(&self) -> u64 {
        self.change_counter + self.tasks.iter().map(|t| t.state.change_counter).sum::<u64>()
    }

    pub fn to_config(&self) -> AppConfig {
        AppConfig::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> TaskConfig {
        TaskConfig::builder().name(name).source_path("/saves/game").build()
    }

    fn session() -> Session {
        Session::from(AppConfig {
            tasks: vec![task("one"), task("two")],
            ..AppConfig::default()
        })
    }

    #[test]
    fn test_dirty_flag_take() {
        let flag = DirtyFlag::new(true);
        let other = flag.clone();
        assert!(flag.take());
        assert!(!flag.take());
        other.set();
        assert!(flag.is_set());
    }

    #[test]
    fn test_new_task_is_dirty_and_has_destination() {
        let task = BackupTask::new(task("one"));
        assert!(task.state.source_dirty.is_set());
        assert!(task.state.destination_dirty.is_set());
        assert!(!task.config().destination_path().as_os_str().is_empty());
        assert_eq!(task.state.destination_size, None);
    }

    #[test]
    fn test_edit_bumps_counter() {
        let mut task = BackupTask::new(task("one"));
        task.state.source_dirty.take();
        task.edit(|c| {
            c.set_interval_minutes(15);
        });
        assert_eq!(task.state.change_counter(), 1);
        assert!(task.state.source_dirty.is_set());
        assert_eq!(task.config().interval_minutes(), 15);
    }

    #[test]
    fn test_record_error_only_bumps_on_change() {
        let mut task = BackupTask::new(task("one"));
        task.record_error("locked");
        task.record_error("locked");
        assert_eq!(task.state.change_counter(), 1);
        task.clear_error();
        task.clear_error();
        assert_eq!(task.state.change_counter(), 2);
        task.record_success(Utc::now());
        assert_eq!(task.state.change_counter(), 3);
    }

    #[test]
    fn test_remove_keeps_last_task_and_stamp_monotonic() {
        let mut session = session();
        session.tasks_mut()[1].record_error("boom");
        session.select_task(1);
        let before = session.change_stamp();

        assert!(session.remove_task(1).is_some());
        assert!(session.change_stamp() > before);
        assert_eq!(session.last_selected_task_index(), 0);
        assert!(session.remove_task(0).is_none());
        assert_eq!(session.tasks().len(), 1);
    }

    #[test]
    fn test_config_round_trip() {
        let mut session = session();
        session.add_task(task("three"));
        session.set_compression_level(CompressionLevel::try_from(9).unwrap());
        let config = session.to_config();
        assert_eq!(config.tasks.len(), 3);
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.tasks[2].name(), "three");
        assert!(session.task_mut_by_name("two").is_some());
        assert!(session.task_mut_by_name("four").is_none());
    }

    #[test]
    fn test_task_names_stay_unique() {
        let mut session = Session::from(AppConfig {
            tasks: vec![task("Same"), task("Same")],
            ..AppConfig::default()
        });
        session.add_task(task("Same"));
        session.add_task(task("Other"));

        let names: Vec<_> = session.tasks().iter().map(BackupTask::name).collect();
        assert_eq!(names, ["Same", "Same (1)", "Same (2)", "Other"]);
        session.task_mut_by_name("Same (2)").unwrap().record_error("boom");
        assert!(!session.tasks()[0].has_error());
    }
}
