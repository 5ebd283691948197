pub mod db;
pub mod settings;
pub mod sync;
pub mod tracking;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};

use db::Database;
use settings::SettingsStore;
use sync::{HttpTransport, SyncCoordinator, Transport};
use tracking::{BatterySource, EventBus, PositionProvider, TrackingController};

pub const DATA_DIR_ENV: &str = "WAYTRACE_DATA_DIR";
pub const DEFAULT_DATA_DIR: &str = "waytrace-data";
pub const DATABASE_FILE: &str = "waytrace.sqlite3";
pub const SETTINGS_FILE: &str = "settings.json";

/// Explicit path first, then `WAYTRACE_DATA_DIR`, then `./waytrace-data`.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| {
            std::env::var_os(DATA_DIR_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Shared handles the host keeps for the lifetime of the process.
pub struct AppState {
    pub data_dir: PathBuf,
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    sync_in_flight: Arc<AtomicBool>,
}

impl AppState {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let db = Database::new(data_dir.join(DATABASE_FILE))?;
        let settings = Arc::new(SettingsStore::new(data_dir.join(SETTINGS_FILE))?);

        // Anything left unsynced by a previous run is still queued.
        let pending = db.count_unsynced_samples().await?;
        if pending > 0 {
            log::info!("{} samples from earlier sessions are waiting to sync", pending);
        }

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            db,
            settings,
            sync_in_flight: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn tracking_controller<P: PositionProvider>(
        &self,
        provider: Arc<P>,
        battery: Arc<dyn BatterySource>,
    ) -> TrackingController<P> {
        TrackingController::new(self.db.clone(), self.settings.clone(), provider, battery)
    }

    /// Build a coordinator over HTTP from the current sync settings.
    pub fn sync_coordinator(&self, events: EventBus) -> Result<SyncCoordinator<HttpTransport>> {
        let transport = HttpTransport::new(&self.settings.sync_settings())
            .context("failed to build HTTP transport")?;
        Ok(self.sync_coordinator_with(transport, events))
    }

    /// Every coordinator handed out here shares one in-flight flag.
    pub fn sync_coordinator_with<T: Transport>(
        &self,
        transport: T,
        events: EventBus,
    ) -> SyncCoordinator<T> {
        SyncCoordinator::new(self.db.clone(), self.settings.clone(), transport, events)
            .with_in_flight(self.sync_in_flight.clone())
    }
}
