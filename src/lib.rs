pub mod commands;
pub mod db;
pub mod engine;
mod host;
pub mod interception;
pub mod interstitial;
pub mod settings;
pub mod utils;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use db::Database;
use engine::Engine;
use interception::{AllowList, InterceptionController, RecentOpens, TrackedAppCache};
use interstitial::InterstitialArbiter;
use settings::SettingsStore;

/// Everything the engine shares between the event loop, arbitration and the
/// configuration commands. Built once by `Engine::start`.
pub struct AppState {
    pub db: Database,
    pub settings: SettingsStore,
    pub allow_list: AllowList,
    pub cache: TrackedAppCache,
    pub recent_opens: RecentOpens,
    pub controller: InterceptionController,
    pub arbiter: InterstitialArbiter,
}

fn debug_enabled() -> bool {
    std::env::var("FRICTION_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// `FRICTION_DATA_DIR` if set, else the platform data directory.
pub fn resolve_data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("FRICTION_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }

    dirs::data_dir()
        .map(|dir| dir.join("friction"))
        .ok_or_else(|| anyhow!("could not determine a data directory; set FRICTION_DATA_DIR"))
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    let level = if debug_enabled() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    log::info!("Friction starting up...");

    if let Err(err) = start() {
        log::error!("Friction stopped with an error: {err:?}");
        std::process::exit(1);
    }
}

fn start() -> Result<()> {
    let data_dir = resolve_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let database = Database::new(data_dir.join("friction.sqlite3"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let (engine, requests) = Engine::start(database, settings).await?;
        host::run_host(engine, requests).await
    })
}
