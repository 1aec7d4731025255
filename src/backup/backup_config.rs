use crate::backup::compress::CompressionLevel;
use crate::backup::validate::{
    validate_file_name_pattern, validate_path_not_empty, validate_regex,
};

use bon::Builder;
use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters, Setters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::Validate;

use std::collections::HashSet;
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};
use std::time::Duration;

pub static DEFAULT_TASK_NAME: &str = "Backup task";
pub static DEFAULT_FILE_FILTER: &str = r".*\.log|.*\.bak";
pub static DEFAULT_FILE_NAME_PATTERN: &str = "%Y.%m.%d-%H.%M.%S";
pub static DEFAULT_INTERVAL_MINUTES: u32 = 5;
pub static DEFAULT_RETENTION_LIMIT_MB: u64 = 1000;
pub static DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);
/// Folder created next to the source when no destination is configured
pub static DEFAULT_DESTINATION_DIR: &str = "SaveBackup";

/// Persisted configuration of a single backup task.
///
/// Missing fields fall back to their defaults and unknown fields are ignored, so
/// settings written by older or newer versions still load.
#[skip_serializing_none]
#[derive(
    Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, Builder, Getters, CopyGetters, Setters,
)]
#[serde(default)]
pub struct TaskConfig {
    #[validate(length(min = 1))]
    #[builder(into, default = DEFAULT_TASK_NAME.to_string())]
    #[getset(get = "pub", set = "pub")]
    name: String,

    #[validate(custom(function = validate_path_not_empty))]
    #[builder(into, default)]
    #[getset(get = "pub", set = "pub")]
    source_path: PathBuf,

    /// Always ends with a path separator once repaired
    #[builder(into, default)]
    #[getset(get = "pub", set = "pub")]
    destination_path: PathBuf,

    /// Case-insensitive regular expression of files to exclude
    #[validate(custom(function = validate_regex))]
    #[builder(into, default = DEFAULT_FILE_FILTER.to_string())]
    #[getset(get = "pub", set = "pub")]
    file_filter: String,

    /// strftime pattern, formatted with the local time of the backup
    #[validate(custom(function = validate_file_name_pattern))]
    #[builder(into, default = DEFAULT_FILE_NAME_PATTERN.to_string())]
    #[getset(get = "pub", set = "pub")]
    file_name_pattern: String,

    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_INTERVAL_MINUTES)]
    #[getset(get_copy = "pub", set = "pub")]
    interval_minutes: u32,

    #[builder(default)]
    #[getset(get_copy = "pub", set = "pub")]
    auto_backup: bool,

    #[builder(default)]
    #[getset(get_copy = "pub", set = "pub")]
    retention_enabled: bool,

    #[builder(default = DEFAULT_RETENTION_LIMIT_MB)]
    #[getset(get_copy = "pub", set = "pub")]
    retention_limit_mb: u64,

    #[getset(get_copy = "pub", set = "pub")]
    last_backup: Option<DateTime<Utc>>,

    #[getset(get = "pub", set = "pub")]
    last_error: Option<String>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TaskConfig {
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Whether the interval since the last backup has elapsed at `now`. A task that
    /// was never backed up is always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_backup {
            None => true,
            Some(last) => now >= last + self.interval(),
        }
    }

    pub fn retention_limit_bytes(&self) -> u64 {
        self.retention_limit_mb.saturating_mul(1024 * 1024)
    }

    /// Fills an empty destination from the source and makes sure it ends with a
    /// separator.
    pub fn normalize_destination(&mut self) {
        if self.destination_path.as_os_str().is_empty() {
            if let Some(destination) = default_destination(&self.source_path) {
                self.destination_path = destination;
            }
        }
        self.destination_path = with_trailing_separator(&self.destination_path);
    }

    /// Resets an invalid task to defaults, clamps a last backup time in the future
    /// to `now` and normalizes the destination.
    pub fn repair(&mut self, now: DateTime<Utc>) {
        if let Err(e) = self.validate() {
            if *self != Self::default() {
                tracing::warn!("Resetting invalid task {:?} to defaults: {e}", self.name);
            }
            *self = Self::default();
        }

        if let Some(last) = self.last_backup {
            if last > now {
                tracing::warn!(
                    "Task {:?} last backup {} is in the future, clamping to {}",
                    self.name,
                    last,
                    now
                );
                self.last_backup = Some(now);
            }
        }

        self.normalize_destination();
    }
}

/// `name` if no entry of `taken` equals it, otherwise the first free `name (n)`.
pub fn unique_task_name<'a, I: IntoIterator<Item = &'a str>>(name: &str, taken: I) -> String {
    let taken = taken.into_iter().collect::<HashSet<_>>();
    std::iter::once(name.to_string())
        .chain((1..).map(|i| format!("{name} ({i})")))
        .find(|candidate| !taken.contains(candidate.as_str()))
        .unwrap_or_else(|| name.to_string())
}

/// `<parent of source>/SaveBackup/`, or `None` when the source has no parent.
pub fn default_destination<P: AsRef<Path>>(source: P) -> Option<PathBuf> {
    let source = source.as_ref();
    if source.as_os_str().is_empty() {
        return None;
    }

    let source = std::path::absolute(source).unwrap_or_else(|_| source.to_path_buf());
    source
        .parent()
        .map(|parent| with_trailing_separator(&parent.join(DEFAULT_DESTINATION_DIR)))
}

pub fn with_trailing_separator<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    let s = path.as_os_str().to_string_lossy();
    if s.is_empty() || s.ends_with(MAIN_SEPARATOR_STR) || s.ends_with('/') {
        return path.to_path_buf();
    }

    let mut os = path.as_os_str().to_os_string();
    os.push(MAIN_SEPARATOR_STR);
    PathBuf::from(os)
}

/// Window geometry of a graphical host. Stored and loaded untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowPosition {
    pub position_known: bool,
    pub top: i32,
    pub left: i32,
    pub height: i32,
    pub width: i32,
    pub maximised: bool,
}

/// Everything stored in the settings file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tasks: Vec<TaskConfig>,
    pub last_selected_task_index: usize,
    pub compression_level: i64,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    pub window: WindowPosition,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tasks: vec![TaskConfig::default()],
            last_selected_task_index: 0,
            compression_level: CompressionLevel::default().into(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            window: WindowPosition::default(),
        }
    }
}

impl AppConfig {
    /// Repairs every task and brings global values back into range.
    pub fn repair(&mut self, now: DateTime<Utc>) {
        self.tasks.iter_mut().for_each(|task| task.repair(now));

        let mut seen = HashSet::new();
        for task in &mut self.tasks {
            let name = unique_task_name(&task.name, seen.iter().map(String::as_str));
            if name != task.name {
                tracing::warn!("Duplicate task name {:?}, renamed to {:?}", task.name, name);
                task.name = name;
            }
            seen.insert(task.name.clone());
        }

        if self.tasks.is_empty() {
            tracing::warn!("No task configured, adding a default task");
            self.tasks.push(TaskConfig::default());
        }

        if CompressionLevel::try_from(self.compression_level).is_err() {
            tracing::warn!(
                "Compression level {} out of range, using {}",
                self.compression_level,
                CompressionLevel::default()
            );
            self.compression_level = CompressionLevel::default().into();
        }

        if self.last_selected_task_index >= self.tasks.len() {
            self.last_selected_task_index = 0;
        }

        if self.tick_interval.is_zero() {
            self.tick_interval = DEFAULT_TICK_INTERVAL;
        }
    }

    pub fn compression(&self) -> CompressionLevel {
        CompressionLevel::try_from(self.compression_level).unwrap_or_default()
    }
}
