use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::sync::trusted_network::normalize_network_id;
use crate::tracking::Profile;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_ATTEMPT_BATCH_LIMIT: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub locations_url: Option<String>,
    pub attempts_url: Option<String>,
    pub timeout_secs: u64,
    /// Skip TLS certificate validation. Off unless the user opts in.
    pub accept_invalid_certs: bool,
    pub attempt_batch_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            locations_url: None,
            attempts_url: None,
            timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
            accept_invalid_certs: false,
            attempt_batch_limit: DEFAULT_ATTEMPT_BATCH_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserSettings {
    pub device_id: String,
    pub profile: Profile,
    pub trusted_networks: Vec<String>,
    pub sync: SyncSettings,
    pub auto_start: bool,
    pub was_tracking: bool,
}

impl UserSettings {
    pub fn is_trusted(&self, network: &str) -> bool {
        match normalize_network_id(network) {
            Some(id) => self
                .trusted_networks
                .iter()
                .any(|trusted| trusted.eq_ignore_ascii_case(&id)),
            None => false,
        }
    }
}

/// `settings.json` -> `settings.json.bad`.
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bad");
    path.with_file_name(name)
}

fn generate_device_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("device-{}", &id[..8])
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(err) => {
                    let backup = backup_path(&path);
                    fs::copy(&path, &backup).with_context(|| {
                        format!("Failed to back up settings to {}", backup.display())
                    })?;
                    log_warn!(
                        "settings file {} is unreadable ({err}); kept a copy at {} and using defaults",
                        path.display(),
                        backup.display()
                    );
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        let needs_id = data.device_id.trim().is_empty();
        if needs_id {
            data.device_id = generate_device_id();
            log_info!("generated device id {}", data.device_id);
        }

        let store = Self {
            path,
            data: RwLock::new(data),
        };
        if needs_id {
            store.persist(&store.read())?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Apply `f` and persist the result while still holding the lock.
    fn update<R>(&self, f: impl FnOnce(&mut UserSettings) -> R) -> Result<R> {
        let mut guard = self.write();
        let result = f(&mut guard);
        self.persist(&guard)?;
        Ok(result)
    }

    pub fn snapshot(&self) -> UserSettings {
        self.read().clone()
    }

    pub fn device_id(&self) -> String {
        self.read().device_id.clone()
    }

    pub fn profile(&self) -> Profile {
        self.read().profile
    }

    pub fn sync_settings(&self) -> SyncSettings {
        self.read().sync.clone()
    }

    pub fn trusted_networks(&self) -> Vec<String> {
        self.read().trusted_networks.clone()
    }

    pub fn is_trusted(&self, network: &str) -> bool {
        self.read().is_trusted(network)
    }

    pub fn was_tracking(&self) -> bool {
        self.read().was_tracking
    }

    pub fn auto_start(&self) -> bool {
        self.read().auto_start
    }

    pub fn set_profile(&self, profile: Profile) -> Result<()> {
        self.update(|data| data.profile = profile)
    }

    pub fn set_device_id(&self, device_id: &str) -> Result<()> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            bail!("device id cannot be empty");
        }
        self.update(|data| data.device_id = device_id.to_string())
    }

    pub fn set_was_tracking(&self, was_tracking: bool) -> Result<()> {
        if self.was_tracking() == was_tracking {
            return Ok(());
        }
        self.update(|data| data.was_tracking = was_tracking)
    }

    pub fn set_auto_start(&self, auto_start: bool) -> Result<()> {
        self.update(|data| data.auto_start = auto_start)
    }

    pub fn set_endpoints(&self, locations_url: Option<String>, attempts_url: Option<String>) -> Result<()> {
        self.update(|data| {
            data.sync.locations_url = locations_url.filter(|url| !url.trim().is_empty());
            data.sync.attempts_url = attempts_url.filter(|url| !url.trim().is_empty());
        })
    }

    pub fn set_accept_invalid_certs(&self, accept: bool) -> Result<()> {
        self.update(|data| data.sync.accept_invalid_certs = accept)
    }

    /// Returns `false` when the network was already trusted.
    pub fn add_trusted_network(&self, network: &str) -> Result<bool> {
        let Some(id) = normalize_network_id(network) else {
            bail!("'{network}' is not a usable network name");
        };
        if self.is_trusted(&id) {
            return Ok(false);
        }
        self.update(|data| data.trusted_networks.push(id))?;
        Ok(true)
    }

    /// Returns `false` when no entry matched.
    pub fn remove_trusted_network(&self, network: &str) -> Result<bool> {
        let Some(id) = normalize_network_id(network) else {
            return Ok(false);
        };
        if !self.is_trusted(&id) {
            return Ok(false);
        }
        self.update(|data| {
            data.trusted_networks
                .retain(|trusted| !trusted.eq_ignore_ascii_case(&id))
        })?;
        Ok(true)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: UserSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings at {}", self.path.display()))?;
        *self.write() = data;
        Ok(())
    }
}
