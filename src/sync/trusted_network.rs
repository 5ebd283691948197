//! Opportunistic sync when the device joins a trusted network.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::settings::SettingsStore;

use super::coordinator::{SyncCoordinator, SyncOutcome};
use super::transport::Transport;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// Placeholder some platforms report when the SSID is hidden from the app.
const UNKNOWN_SSID: &str = "<unknown ssid>";

pub const NOTIFICATION_TITLE: &str = "Automatic sync";

/// Trim, drop surrounding quotes, and reject empty or placeholder names.
pub fn normalize_network_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim();
    if unquoted.is_empty() || unquoted.eq_ignore_ascii_case(UNKNOWN_SSID) {
        None
    } else {
        Some(unquoted.to_string())
    }
}

/// Reads the identifier of the currently connected network.
pub trait NetworkIdentity: Send + Sync {
    fn current_network(&self) -> Option<String>;
}

/// A network name supplied by the host, e.g. from a connectivity callback.
#[derive(Debug, Clone, Default)]
pub struct ReportedNetwork(pub Option<String>);

impl NetworkIdentity for ReportedNetwork {
    fn current_network(&self) -> Option<String> {
        self.0.clone()
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        log_info!("{title}: {body}");
    }
}

pub fn sync_summary(samples_sent: usize, attempts_sent: usize, network: &str) -> String {
    format!("{samples_sent} locations and {attempts_sent} attempts sent via \"{network}\"")
}

pub struct TrustedNetworkTrigger<T: Transport> {
    coordinator: Arc<SyncCoordinator<T>>,
    settings: Arc<SettingsStore>,
    notifier: Arc<dyn Notifier>,
}

impl<T: Transport> TrustedNetworkTrigger<T> {
    pub fn new(
        coordinator: Arc<SyncCoordinator<T>>,
        settings: Arc<SettingsStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            coordinator,
            settings,
            notifier,
        }
    }

    /// Handle a connectivity change. Returns the spawned sync task when the
    /// current network is trusted, `None` otherwise.
    pub fn on_connectivity_changed(
        &self,
        identity: &dyn NetworkIdentity,
    ) -> Option<JoinHandle<()>> {
        let Some(network) = identity.current_network().as_deref().and_then(normalize_network_id)
        else {
            log_debug!("connectivity changed: no usable network name");
            return None;
        };
        if !self.settings.is_trusted(&network) {
            log_debug!("connectivity changed: '{network}' is not trusted");
            return None;
        }

        log_info!("joined trusted network '{network}'; starting sync");
        let coordinator = self.coordinator.clone();
        let notifier = self.notifier.clone();
        Some(tokio::spawn(async move {
            match coordinator.sync().await {
                Ok(SyncOutcome::Completed(report)) if report.any_confirmed() => {
                    notifier.notify(
                        NOTIFICATION_TITLE,
                        &sync_summary(report.samples.sent(), report.attempts.sent(), &network),
                    );
                }
                Ok(outcome) => log_debug!("trusted-network sync: {outcome:?}"),
                Err(err) => log_error!("trusted-network sync failed: {err:?}"),
            }
        }))
    }
}
