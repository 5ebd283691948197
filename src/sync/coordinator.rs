//! Flushes stored samples and attempts to the remote collector.
//!
//! Local rows are removed only after the server confirmed the collection
//! they were sent in, and only the rows that were actually sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::db::Database;
use crate::settings::SettingsStore;
use crate::tracking::{EventBus, TrackingEvent};

use super::transport::{AttemptPayload, LocationPayload, Transport, TransportError};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CollectionOutcome {
    /// Nothing stored, nothing transmitted.
    Empty,
    Sent { count: usize },
    Failed { count: usize, error: String },
}

impl CollectionOutcome {
    fn from_result(count: usize, result: Result<(), TransportError>) -> Self {
        match result {
            Ok(()) => CollectionOutcome::Sent { count },
            Err(err) => CollectionOutcome::Failed {
                count,
                error: err.to_string(),
            },
        }
    }

    pub fn sent(&self) -> usize {
        match self {
            CollectionOutcome::Sent { count } => *count,
            _ => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CollectionOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub samples: CollectionOutcome,
    pub attempts: CollectionOutcome,
}

impl SyncReport {
    pub fn any_confirmed(&self) -> bool {
        matches!(self.samples, CollectionOutcome::Sent { .. })
            || matches!(self.attempts, CollectionOutcome::Sent { .. })
    }

    pub fn any_failed(&self) -> bool {
        self.samples.is_failed() || self.attempts.is_failed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    AlreadySyncing,
    NothingToSync,
    Completed(SyncReport),
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncCoordinator<T: Transport> {
    db: Database,
    settings: Arc<SettingsStore>,
    transport: T,
    events: EventBus,
    in_flight: Arc<AtomicBool>,
}

impl<T: Transport> SyncCoordinator<T> {
    pub fn new(db: Database, settings: Arc<SettingsStore>, transport: T, events: EventBus) -> Self {
        Self {
            db,
            settings,
            transport,
            events,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share the in-flight flag with other coordinators over the same store,
    /// so at most one of them syncs at a time.
    pub fn with_in_flight(mut self, in_flight: Arc<AtomicBool>) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard(self.in_flight.as_ref()))
    }

    /// Run one flush. A call made while another is running returns
    /// [`SyncOutcome::AlreadySyncing`] without touching anything.
    ///
    /// Transport failures are reported in the outcome; `Err` is reserved for
    /// local persistence failures.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.try_begin() else {
            log_info!("sync already in progress; skipping");
            return Ok(SyncOutcome::AlreadySyncing);
        };

        let device_id = self.settings.device_id();
        let limit = self.settings.sync_settings().attempt_batch_limit;

        let samples = self
            .db
            .get_unsynced_samples()
            .await
            .context("failed to read unsynced samples")?;
        let mut attempts = self
            .db
            .get_recent_attempts(limit)
            .await
            .context("failed to read attempts")?;

        if samples.is_empty() && attempts.is_empty() {
            log_info!("sync: nothing to send");
            return Ok(SyncOutcome::NothingToSync);
        }

        // Oldest first on the wire.
        attempts.reverse();

        let samples_outcome = if samples.is_empty() {
            CollectionOutcome::Empty
        } else {
            let ids: Vec<i64> = samples.iter().filter_map(|s| s.id).collect();
            let payload = samples
                .iter()
                .map(|s| LocationPayload::from_sample(s, &device_id))
                .collect();
            let outcome =
                CollectionOutcome::from_result(samples.len(), self.transport.send_locations(payload).await);
            if outcome.sent() > 0 {
                self.db
                    .mark_samples_synced(&ids)
                    .await
                    .context("failed to flag sent samples")?;
                let purged = self
                    .db
                    .purge_synced_samples()
                    .await
                    .context("failed to purge sent samples")?;
                log_info!("sync: {} samples confirmed, {} purged", outcome.sent(), purged);
            }
            outcome
        };

        let attempts_outcome = if attempts.is_empty() {
            CollectionOutcome::Empty
        } else {
            let ids: Vec<i64> = attempts.iter().filter_map(|a| a.id).collect();
            let payload = attempts
                .iter()
                .map(|a| AttemptPayload::from_attempt(a, &device_id))
                .collect();
            let outcome = CollectionOutcome::from_result(
                attempts.len(),
                self.transport.send_attempts(payload).await,
            );
            if outcome.sent() > 0 {
                self.db
                    .delete_attempts(&ids)
                    .await
                    .context("failed to delete sent attempts")?;
                log_info!("sync: {} attempts confirmed", outcome.sent());
            }
            outcome
        };

        for (name, outcome) in [("samples", &samples_outcome), ("attempts", &attempts_outcome)] {
            if let CollectionOutcome::Failed { count, error } = outcome {
                log_warn!("sync: {} {} kept locally: {}", count, name, error);
            }
        }

        let report = SyncReport {
            samples: samples_outcome,
            attempts: attempts_outcome,
        };
        if report.any_confirmed() {
            self.events.emit(TrackingEvent::SyncFinished {
                samples_sent: report.samples.sent(),
                attempts_sent: report.attempts.sent(),
            });
        } else {
            log_error!("sync: no collection was confirmed");
        }

        Ok(SyncOutcome::Completed(report))
    }
}
