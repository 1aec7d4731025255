use clap::Parser;
use save_backup::backup::detect::ScanOutcome;
use save_backup::backup::maker::{make_backup, scan_task, BackupType};
use save_backup::backup::result_error::error::Error;
use save_backup::backup::result_error::result::Result;
use save_backup::backup::scheduler::{BackupScheduler, TaskOutcome};
use save_backup::backup::store::ConfigStore;
use save_backup::backup::task::Session;
use save_backup::backup::watch::TaskWatcher;

use chrono::Utc;
use itertools::Itertools;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::exit;
use std::time::Instant;

/// Backs up game saves when they change and removes old backups
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding Settings.yml, defaults to the directory of the executable
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Back up the named task once and exit
    #[arg(short, long, value_name = "NAME")]
    backup: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let store = match args.config_dir {
        Some(dir) => ConfigStore::new(dir),
        None => match ConfigStore::beside_executable() {
            Ok(store) => store,
            Err(e) => {
                error!("Cannot locate settings directory: {e}");
                exit(1);
            }
        },
    };

    let code = match args.backup {
        Some(name) => match backup_once(store, &name) {
            Ok(()) => {
                println!("SUCCEED: Task '{name}' backup created");
                0
            }
            Err(e) => {
                println!("FAILED: {e}");
                1
            }
        },
        None => run_daemon(store),
    };

    exit(code);
}

fn load_session(store: &ConfigStore) -> Session {
    let (config, warning) = store.load();
    if let Some(warning) = warning {
        warn!("Recovered from settings problem: {warning}");
    }
    Session::from(config)
}

/// Scans and archives a single task without touching the settings file.
fn backup_once(store: ConfigStore, name: &str) -> Result<()> {
    let mut session = load_session(&store);
    let level = session.compression_level();
    let task = session
        .task_mut_by_name(name)
        .ok_or_else(|| Error::TaskNotFound(name.to_string()))?;

    match scan_task(task) {
        ScanOutcome::Locked(msg) | ScanOutcome::Error(msg) => Err(Error::SourceNotReady(msg)),
        ScanOutcome::Modified | ScanOutcome::Unchanged => {
            make_backup(task, BackupType::Normal, level, Utc::now()).map(|path| {
                info!("Created {:?}", path);
            })
        }
    }
}

fn run_daemon(store: ConfigStore) -> i32 {
    let mut session = load_session(&store);
    let _watchers = session.tasks().iter().map(TaskWatcher::new).collect_vec();
    let mut scheduler = BackupScheduler::new(store, &session);
    info!(
        "Watching {} tasks, checking every {:?}",
        session.tasks().len(),
        session.tick_interval
    );

    loop {
        let started = Instant::now();
        match scheduler.run_cycle(&mut session) {
            Ok(report) => {
                for (name, outcome) in &report.outcomes {
                    match outcome {
                        TaskOutcome::Locked(msg) => info!("Task {name:?} locked: {msg}"),
                        TaskOutcome::Failed(msg) => warn!("Task {name:?} failed: {msg}"),
                        other => tracing::debug!("Task {name:?}: {other:?}"),
                    }
                }
                if !report.all_ok {
                    warn!("Some auto-backup tasks have errors");
                }
            }
            Err(e) => {
                error!("{e}");
                return 1;
            }
        }

        std::thread::sleep(session.tick_interval.saturating_sub(started.elapsed()));
    }
}
