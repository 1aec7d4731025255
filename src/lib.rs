//! # save-backup
//!
//! Automatic backups of game save folders.
//!
//! ## Features
//!
//! - **Change detection**: a save is only archived when a file changed since the
//!   last backup and no file is locked by the running game
//! - **Zip archives**: filtered by a per-task regular expression, extracted with
//!   protection against entries escaping the target directory
//! - **Retention**: oldest archives are removed once the destination exceeds a size
//!   limit, always keeping the newest four
//! - **Crash-safe settings**: tasks and their status survive an abrupt exit
//! - **Manual and pre-restore backups**: kept in separate folders outside the quota
//!
//! ## Quick Start
//!
//! ```no_run
//! use save_backup::backup::scheduler::BackupScheduler;
//! use save_backup::backup::store::ConfigStore;
//! use save_backup::backup::task::Session;
//!
//! let store = ConfigStore::new("/path/to/settings");
//! let (config, warning) = store.load();
//! if let Some(warning) = warning {
//!     eprintln!("{warning}");
//! }
//!
//! let mut session = Session::from(config);
//! let mut scheduler = BackupScheduler::new(store, &session);
//! let report = scheduler.run_cycle(&mut session)?;
//! println!("all tasks ok: {}", report.all_ok);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
