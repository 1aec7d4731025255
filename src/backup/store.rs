//! Crash-safe persistence of [`AppConfig`].
//!
//! A save writes `Settings.tmp`, flushes it, removes `Settings.yml` and renames the
//! temp file into place. Loading therefore only ever sees one of:
//!
//! - primary and temp: the save was interrupted before the primary was removed, the
//!   primary is complete and the temp is discarded
//! - temp only: the save was interrupted before the rename, the temp is complete and
//!   gets promoted
//! - primary only: the normal case

use crate::backup::backup_config::AppConfig;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use chrono::Utc;
use function_name::named;

use std::fs::File;
use std::io::{BufWriter, IntoInnerError, Write};
use std::path::{Path, PathBuf};

pub static SETTINGS_FILE_NAME: &str = "Settings.yml";
pub static SETTINGS_TMP_FILE_NAME: &str = "Settings.tmp";

#[derive(Clone, Debug)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Store located next to the running executable.
    pub fn beside_executable() -> Result<Self> {
        let exe = std::env::current_exe()?;
        let dir = exe
            .parent()
            .ok_or_else(|| Error::PathUnavailable(exe.clone()))?;
        Ok(Self::new(dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn primary_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE_NAME)
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_TMP_FILE_NAME)
    }

    /// Loads and repairs the settings.
    ///
    /// Never fails: any problem yields usable settings together with a non-fatal
    /// error describing what was recovered from.
    #[named]
    pub fn load(&self) -> (AppConfig, Option<Error>) {
        let primary = self.primary_path();
        let tmp = self.tmp_path();

        let mut errors = Vec::new();
        if let Err(e) = self.recover_interrupted_save(&primary, &tmp) {
            errors.push(e);
        }

        let mut config = if primary.exists() {
            match read_config(&primary) {
                Ok(config) => {
                    tracing::info!("Loaded settings from {:?}", primary);
                    config
                }
                Err(e) => {
                    let moved_to = move_aside(&primary);
                    tracing::warn!("Settings {:?} are corrupt, using defaults", primary);
                    errors.push(Error::ConfigCorrupt {
                        path: primary.clone(),
                        moved_to,
                        error: Box::new(e),
                    });
                    AppConfig::default()
                }
            }
        } else {
            tracing::info!("No settings at {:?}, using defaults", primary);
            AppConfig::default()
        };

        config.repair(Utc::now());

        let error = if errors.is_empty() {
            None
        } else {
            Some(Error::from(errors).add_fn_name(function_path!()))
        };
        (config, error)
    }

    fn recover_interrupted_save(&self, primary: &Path, tmp: &Path) -> Result<()> {
        match (primary.exists(), tmp.exists()) {
            (true, true) => {
                tracing::warn!("Discarding leftover {:?} from an interrupted save", tmp);
                std::fs::remove_file(tmp)
                    .map_err(Error::from)
                    .add_msg(format!("Deleting leftover {:?} failed", tmp))
            }
            (false, true) => {
                tracing::warn!("Promoting {:?} left by an interrupted save", tmp);
                std::fs::rename(tmp, primary)
                    .map_err(Error::from)
                    .add_msg(format!("Promoting {:?} failed", tmp))
            }
            _ => Ok(()),
        }
    }

    /// Writes the settings. Failures are [`Error::ConfigSave`] and should stop the
    /// process, since continuing would silently lose state.
    #[named]
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        let primary = self.primary_path();
        let tmp = self.tmp_path();

        let res = (|| -> Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_yml::to_writer(&mut writer, config)?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(IntoInnerError::into_error)?
                .sync_all()?;

            match std::fs::remove_file(&primary) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
            std::fs::rename(&tmp, &primary)?;
            Ok(())
        })();

        match res {
            Ok(()) => {
                tracing::debug!("Saved settings to {:?}", primary);
                Ok(())
            }
            Err(e) => Err(Error::ConfigSave {
                path: primary,
                error: Box::new(e),
            }
            .add_fn_name(function_path!())),
        }
    }
}

fn read_config(path: &Path) -> Result<AppConfig> {
    let file = File::open(path)?;
    serde_yml::from_reader(file)
        .map_err(Error::from)
        .add_msg(format!("Parse YAML config failed: {:?}", path))
}

/// Renames a corrupt settings file to the first free `<name>.error[.N]`.
fn move_aside(path: &Path) -> Option<PathBuf> {
    let base = format!("{}.error", path.display());
    let target = std::iter::once(PathBuf::from(&base))
        .chain((1..).map(|i| PathBuf::from(format!("{base}.{i}"))))
        .find(|p| !p.exists())?;

    match std::fs::rename(path, &target) {
        Ok(()) => Some(target),
        Err(e) => {
            tracing::warn!("Moving corrupt settings {:?} aside failed: {e}", path);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_config::TaskConfig;
    use chrono::Duration;
    use tempfile::TempDir;

    fn config_with(name: &str) -> AppConfig {
        AppConfig {
            tasks: vec![TaskConfig::builder()
                .name(name)
                .source_path("/saves/game")
                .build()],
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_load_defaults_when_nothing_exists() {
        let temp_dir = TempDir::new().unwrap();
        let (config, error) = ConfigStore::new(temp_dir.path()).load();
        assert!(error.is_none());
        assert_eq!(config.tasks.len(), 1);
        assert_eq!(config.compression_level, 1);
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::new(temp_dir.path());
        store.save(&config_with("Celeste")).unwrap();
        assert!(store.primary_path().exists());
        assert!(!store.tmp_path().exists());

        let (config, error) = store.load();
        assert!(error.is_none());
        assert_eq!(config.tasks[0].name(), "Celeste");
    }

    #[test]
    fn test_leftover_tmp_is_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::new(temp_dir.path());
        store.save(&config_with("primary")).unwrap();
        std::fs::write(store.tmp_path(), "tasks: [{name: half-writ").unwrap();

        let (config, error) = store.load();
        assert!(error.is_none());
        assert_eq!(config.tasks[0].name(), "primary");
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn test_lone_tmp_is_promoted() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::new(temp_dir.path());
        store.save(&config_with("promoted")).unwrap();
        std::fs::rename(store.primary_path(), store.tmp_path()).unwrap();

        let (config, error) = store.load();
        assert!(error.is_none());
        assert_eq!(config.tasks[0].name(), "promoted");
        assert!(store.primary_path().exists());
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn test_corrupt_primary_is_moved_aside() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::new(temp_dir.path());
        std::fs::write(store.primary_path(), "tasks: [[[").unwrap();
        std::fs::write(temp_dir.path().join("Settings.yml.error"), "older").unwrap();

        let (config, error) = store.load();
        assert_eq!(config, {
            let mut c = AppConfig::default();
            c.repair(Utc::now());
            c
        });
        assert!(error.is_some());
        assert!(!store.primary_path().exists());
        assert!(temp_dir.path().join("Settings.yml.error.1").exists());
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("Settings.yml.error")).unwrap(),
            "older"
        );
    }

    #[test]
    fn test_load_clamps_future_timestamp() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::new(temp_dir.path());
        let mut config = config_with("future");
        config.tasks[0].set_last_backup(Some(Utc::now() + Duration::days(365)));
        store.save(&config).unwrap();

        let (config, _) = store.load();
        assert!(config.tasks[0].last_backup().unwrap() <= Utc::now());
    }

    #[test]
    fn test_save_failure_is_config_save() {
        let temp_dir = TempDir::new().unwrap();
        let store = ConfigStore::new(temp_dir.path().join("missing").join("dir"));
        match store.save(&AppConfig::default()) {
            Err(Error::WithFnName { error, .. }) => {
                assert!(matches!(*error, Error::ConfigSave { .. }))
            }
            other => panic!("Expected ConfigSave, got {other:?}"),
        }
    }
}
