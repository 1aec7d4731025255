//! Filesystem watchers raising the dirty flags of a task.

use crate::backup::function_path;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::task::{BackupTask, DirtyFlag};

use function_name::named;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Source and destination watchers of one task. Dropping it stops both.
pub struct TaskWatcher {
    source: Option<RecommendedWatcher>,
    destination: Option<RecommendedWatcher>,
}

impl TaskWatcher {
    /// Watches the task paths. The destination flag is raised right away since
    /// anything may have changed while nothing was watching.
    ///
    /// The source is only watched while auto-backup is enabled. Failures are
    /// logged and leave the affected side unwatched.
    pub fn new(task: &BackupTask) -> Self {
        task.state.destination_dirty.set();

        let source = if task.config().auto_backup() {
            watch_source(task)
                .inspect_err(|e| tracing::warn!("{e}"))
                .ok()
                .flatten()
        } else {
            None
        };
        let destination = watch_destination(task)
            .inspect_err(|e| tracing::warn!("{e}"))
            .ok()
            .flatten();

        Self {
            source,
            destination,
        }
    }

    pub fn is_watching_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_watching_destination(&self) -> bool {
        self.destination.is_some()
    }
}

/// Whether `event` should raise a dirty flag. With `file_name` set only events
/// touching that file count, which is how a single-file source is watched through
/// its parent directory.
pub fn is_relevant(event: &Event, file_name: Option<&OsString>) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    );
    kind_matches
        && match file_name {
            None => true,
            Some(name) => event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(name.as_os_str())),
        }
}

#[named]
fn watch_source(task: &BackupTask) -> Result<Option<RecommendedWatcher>> {
    let source = task.state.source.path().map(Path::to_path_buf);
    let Some(source) = source else {
        return Ok(None);
    };

    let (dir, file_name): (PathBuf, Option<OsString>) = if source.is_file() {
        match source.parent() {
            Some(parent) => (parent.to_path_buf(), source.file_name().map(OsString::from)),
            None => return Ok(None),
        }
    } else if source.is_dir() {
        (source.clone(), None)
    } else {
        tracing::debug!("Source {:?} does not exist yet, not watching", source);
        return Ok(None);
    };

    let flag = task.state.source_dirty.clone();
    let mode = if file_name.is_some() {
        RecursiveMode::NonRecursive
    } else {
        RecursiveMode::Recursive
    };
    spawn_watcher(&dir, mode, flag, move |event| is_relevant(event, file_name.as_ref()))
        .add_msg(format!("Watching source {:?} failed", source))
        .add_fn_name(function_path!())
        .map(Some)
}

#[named]
fn watch_destination(task: &BackupTask) -> Result<Option<RecommendedWatcher>> {
    let destination = task.config().destination_path();
    if !destination.is_dir() {
        tracing::debug!("Destination {:?} does not exist yet, not watching", destination);
        return Ok(None);
    }

    let flag = task.state.destination_dirty.clone();
    spawn_watcher(destination, RecursiveMode::NonRecursive, flag, |_| true)
        .add_msg(format!("Watching destination {:?} failed", destination))
        .add_fn_name(function_path!())
        .map(Some)
}

fn spawn_watcher<F>(
    dir: &Path,
    mode: RecursiveMode,
    flag: DirtyFlag,
    relevant: F,
) -> Result<RecommendedWatcher>
where
    F: Fn(&Event) -> bool + Send + 'static,
{
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if relevant(&event) {
                    tracing::trace!("Change detected: {:?}", event.paths);
                    flag.set();
                }
            }
            Err(e) => tracing::warn!("Watch error: {e}"),
        },
        Config::default(),
    )?;
    watcher.watch(dir, mode)?;
    tracing::debug!("Watching {:?} ({:?})", dir, mode);
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_config::TaskConfig;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use tempfile::TempDir;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_is_relevant_kinds() {
        let modify = event(EventKind::Modify(ModifyKind::Any), "/saves/a.sav");
        let access = event(EventKind::Access(AccessKind::Any), "/saves/a.sav");
        assert!(is_relevant(&modify, None));
        assert!(!is_relevant(&access, None));
    }

    #[test]
    fn test_is_relevant_single_file() {
        let name = OsString::from("slot.sav");
        let this = event(EventKind::Create(CreateKind::File), "/saves/slot.sav");
        let other = event(EventKind::Create(CreateKind::File), "/saves/other.sav");
        assert!(is_relevant(&this, Some(&name)));
        assert!(!is_relevant(&other, Some(&name)));
    }

    #[test]
    fn test_watcher_creation() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("saves");
        let destination = temp_dir.path().join("backups");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&destination).unwrap();

        let config = TaskConfig::builder()
            .name("Watched")
            .source_path(&source)
            .destination_path(&destination)
            .build();
        let mut task = BackupTask::new(config);
        task.state.destination_dirty.take();

        let watcher = TaskWatcher::new(&task);
        assert!(task.state.destination_dirty.is_set());
        assert!(!watcher.is_watching_source());
        assert!(watcher.is_watching_destination());

        task.edit(|c| {
            c.set_auto_backup(true);
        });
        let watcher = TaskWatcher::new(&task);
        assert!(watcher.is_watching_source());
    }

    #[test]
    fn test_missing_paths_are_not_watched() {
        let temp_dir = TempDir::new().unwrap();
        let config = TaskConfig::builder()
            .name("Missing")
            .source_path(temp_dir.path().join("nope"))
            .destination_path(temp_dir.path().join("nope_either"))
            .auto_backup(true)
            .build();
        let watcher = TaskWatcher::new(&BackupTask::new(config));
        assert!(!watcher.is_watching_source());
        assert!(!watcher.is_watching_destination());
    }
}
