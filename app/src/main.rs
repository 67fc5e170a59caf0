use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dbrowse_core::profiles::{default_config_dir, FileProfilesStore};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "DBROWSE_LOG";
const LOG_FILE: &str = "dbrowse.log";

fn init_logging(config_dir: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    fs::create_dir_all(config_dir)?;
    let path = config_dir.join(LOG_FILE);
    let file = File::options().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()?;
    Ok(path)
}

fn run_app(
    store: FileProfilesStore,
    run_tui: impl FnOnce(FileProfilesStore) -> Result<(), dbrowse_tui::TuiError>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        profiles = %store.path().display(),
        connections = store.connections().len(),
        "starting dbrowse"
    );
    run_tui(store)?;
    tracing::info!("dbrowse exited");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = default_config_dir()?;
    let log_path = init_logging(&config_dir)?;
    let store = FileProfilesStore::load_default().inspect_err(|error| {
        tracing::warn!(%error, log = %log_path.display(), "failed to load profiles");
    })?;
    run_app(store, dbrowse_tui::run)
}
