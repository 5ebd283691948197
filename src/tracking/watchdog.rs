//! Stall detection for the provider feed.
//!
//! The check is level-triggered: each tick looks only at the shared
//! [`TrackingState`], so it can run on any schedule without its own memory.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::db::{Attempt, AttemptStatus, Database};
use crate::utils::time::now_ms;

use super::events::{EventBus, TrackingEvent};
use super::feed::Feed;
use super::provider::PositionProvider;
use super::state::{SharedTrackingState, TrackingState};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const WATCHDOG_PERIOD: Duration = Duration::from_secs(5 * 60);
/// Silence after which a weak-signal feed is considered stalled.
pub const STALL_THRESHOLD_MS: i64 = 10 * 60 * 1000;
/// Below this many satellites in use the silence is blamed on the feed.
pub const MIN_SATELLITES_IN_USE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// No sample yet this session; the provider may still be warming up.
    AwaitingFirstFix,
    Healthy { silence_ms: i64 },
    /// Long silence but enough satellites in use; left alone.
    QuietWithSignal { silence_ms: i64, satellites: u32 },
    Stalled { silence_ms: i64, satellites: u32 },
}

pub fn assess(state: &TrackingState, now_ms: i64) -> WatchdogVerdict {
    let Some(silence_ms) = state.silence_ms(now_ms) else {
        return WatchdogVerdict::AwaitingFirstFix;
    };
    if silence_ms <= STALL_THRESHOLD_MS {
        return WatchdogVerdict::Healthy { silence_ms };
    }
    let satellites = state.satellites_used;
    if satellites < MIN_SATELLITES_IN_USE {
        WatchdogVerdict::Stalled {
            silence_ms,
            satellites,
        }
    } else {
        WatchdogVerdict::QuietWithSignal {
            silence_ms,
            satellites,
        }
    }
}

pub struct Watchdog<P: PositionProvider> {
    feed: Arc<Feed<P>>,
    db: Database,
    state: SharedTrackingState,
    events: EventBus,
}

impl<P: PositionProvider> Watchdog<P> {
    pub fn new(feed: Arc<Feed<P>>, db: Database, state: SharedTrackingState, events: EventBus) -> Self {
        Self {
            feed,
            db,
            state,
            events,
        }
    }

    /// Run one check at `now_ms`, restarting the feed if it is stalled.
    pub async fn tick(&self, now_ms: i64) -> Result<WatchdogVerdict> {
        let verdict = assess(&self.state.snapshot(), now_ms);

        let WatchdogVerdict::Stalled {
            silence_ms,
            satellites,
        } = verdict
        else {
            log_debug!("watchdog: {:?}", verdict);
            return Ok(verdict);
        };

        log_warn!(
            "watchdog: no sample for {}s with {} satellites in use; restarting feed",
            silence_ms / 1000,
            satellites
        );

        let restart_error = self.feed.restart().await.err();
        let restart_count = self.state.update(|s| s.record_restart());

        let mut reason = format!(
            "no sample for {}s with {} satellites in use; feed restarted ({}x)",
            silence_ms / 1000,
            satellites,
            restart_count
        );
        if let Some(err) = &restart_error {
            log_error!("watchdog: resubscribe failed: {err}");
            reason.push_str(&format!("; resubscribe failed: {err}"));
        } else {
            log_info!("watchdog: feed restarted ({}x)", restart_count);
        }

        self.events.emit(TrackingEvent::FeedRestarted {
            restart_count,
            silence_ms,
        });

        let attempt = Attempt {
            id: None,
            timestamp_ms: now_ms,
            satellites,
            accuracy: self.state.snapshot().last_accuracy,
            status: AttemptStatus::Timeout,
            reason,
        };
        self.db
            .insert_attempt(&attempt)
            .await
            .context("failed to log watchdog restart")?;
        self.events.emit(TrackingEvent::AttemptRecorded {
            status: AttemptStatus::Timeout,
        });

        Ok(verdict)
    }
}

pub async fn watchdog_loop<P: PositionProvider>(
    watchdog: Watchdog<P>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    // First check one full period after start, not immediately.
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = watchdog.tick(now_ms()).await {
                    log_error!("watchdog tick failed: {err:?}");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("watchdog shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::pipeline::PipelineInput;
    use crate::tracking::profile::Profile;
    use crate::tracking::provider::SatelliteStatus;
    use crate::tracking::testing::FakeProvider;
    use tempfile::TempDir;
    use tokio::sync::{mpsc, watch};

    const MINUTE: i64 = 60 * 1000;

    fn state_with(last_accepted: Option<i64>, satellites: u32) -> TrackingState {
        let mut state = TrackingState::default();
        state.last_accepted_ms = last_accepted;
        state.record_satellites(SatelliteStatus {
            visible: satellites + 3,
            used_in_fix: satellites,
        });
        state
    }

    #[test]
    fn cold_start_is_never_stalled() {
        for now in [0, 11 * MINUTE, 24 * 60 * MINUTE] {
            assert_eq!(
                assess(&state_with(None, 0), now),
                WatchdogVerdict::AwaitingFirstFix
            );
        }
    }

    #[test]
    fn stall_needs_silence_and_weak_signal() {
        assert_eq!(
            assess(&state_with(Some(0), 2), 10 * MINUTE),
            WatchdogVerdict::Healthy {
                silence_ms: 10 * MINUTE
            }
        );
        assert_eq!(
            assess(&state_with(Some(0), 2), 11 * MINUTE),
            WatchdogVerdict::Stalled {
                silence_ms: 11 * MINUTE,
                satellites: 2
            }
        );
        assert_eq!(
            assess(&state_with(Some(0), 4), 11 * MINUTE),
            WatchdogVerdict::QuietWithSignal {
                silence_ms: 11 * MINUTE,
                satellites: 4
            }
        );
    }

    struct Rig {
        _dir: TempDir,
        provider: Arc<FakeProvider>,
        state: SharedTrackingState,
        db: Database,
        watchdog: Watchdog<FakeProvider>,
        _inputs: mpsc::Receiver<PipelineInput>,
    }

    async fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("watchdog.sqlite3")).unwrap();
        let provider = Arc::new(FakeProvider::default());
        let state = SharedTrackingState::new();
        let events = EventBus::new();
        let (tx, rx) = mpsc::channel(8);
        let (_params_tx, params_rx) = watch::channel(Profile::Economy.resolve());
        let feed = Arc::new(Feed::new(
            provider.clone(),
            state.clone(),
            events.clone(),
            tx,
            params_rx,
        ));
        feed.start().await.unwrap();
        let watchdog = Watchdog::new(feed, db.clone(), state.clone(), events);
        Rig {
            _dir: dir,
            provider,
            state,
            db,
            watchdog,
            _inputs: rx,
        }
    }

    #[tokio::test]
    async fn stalled_feed_is_restarted_and_logged() {
        let rig = rig().await;
        rig.state.update(|s| {
            s.begin_session(Profile::Economy, 0);
            s.record_accepted(0);
            s.record_satellites(SatelliteStatus {
                visible: 5,
                used_in_fix: 2,
            });
        });

        let verdict = rig.watchdog.tick(11 * MINUTE).await.unwrap();
        assert!(matches!(verdict, WatchdogVerdict::Stalled { .. }));
        assert_eq!(rig.state.restart_count(), 1);
        assert_eq!(rig.provider.subscription_count(), 2);
        assert_eq!(rig.provider.unsubscription_count(), 1);

        let attempts = rig.db.get_recent_attempts(10).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, AttemptStatus::Timeout);
        assert_eq!(attempts[0].satellites, 2);
        assert!(attempts[0].reason.contains("660s"));
    }

    #[tokio::test]
    async fn no_restart_before_first_sample() {
        let rig = rig().await;
        rig.state.update(|s| s.begin_session(Profile::Economy, 0));

        let verdict = rig.watchdog.tick(60 * MINUTE).await.unwrap();
        assert_eq!(verdict, WatchdogVerdict::AwaitingFirstFix);
        assert_eq!(rig.state.restart_count(), 0);
        assert_eq!(rig.provider.subscription_count(), 1);
        assert_eq!(rig.db.count_attempts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_resubscribe_is_still_counted() {
        let rig = rig().await;
        rig.state.update(|s| s.record_accepted(0));
        rig.provider
            .fail_subscribe
            .store(true, std::sync::atomic::Ordering::SeqCst);

        rig.watchdog.tick(20 * MINUTE).await.unwrap();
        assert_eq!(rig.state.restart_count(), 1);
        let attempts = rig.db.get_recent_attempts(1).await.unwrap();
        assert!(attempts[0].reason.contains("resubscribe failed"));
    }
}
