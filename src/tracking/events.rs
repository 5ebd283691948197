//! Fire-and-forget notifications for status views.
//!
//! Emitting never blocks and never fails: with no subscribers, or with a
//! subscriber that fell behind, events are simply dropped.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::AttemptStatus;

use super::profile::Profile;
use super::provider::SatelliteStatus;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TrackingEvent {
    SessionStarted { profile: Profile },
    SessionStopped,
    ProfileChanged { profile: Profile },
    SampleAccepted { timestamp_ms: i64, accepted_count: u64 },
    AttemptRecorded { status: AttemptStatus },
    FeedRestarted { restart_count: u32, silence_ms: i64 },
    SatellitesChanged { status: SatelliteStatus },
    SyncFinished { samples_sent: usize, attempts_sent: usize },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TrackingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: TrackingEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
