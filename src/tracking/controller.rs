//! Session lifecycle: owns the provider subscription and the three periodic
//! activities (acceptance worker, watchdog, heartbeat).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::settings::SettingsStore;
use crate::utils::time::now_ms;

use super::events::{EventBus, TrackingEvent};
use super::feed::Feed;
use super::heartbeat::{heartbeat_loop, Heartbeat};
use super::pipeline::{acceptance_loop, AcceptancePipeline, FIX_QUEUE_CAPACITY};
use super::profile::{Profile, SamplingParams};
use super::provider::{BatterySource, PositionProvider};
use super::state::{SharedTrackingState, TrackingState, TrackingStatus};
use super::watchdog::{watchdog_loop, Watchdog, WATCHDOG_PERIOD};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

struct ActiveSession<P: PositionProvider> {
    feed: Arc<Feed<P>>,
    params_tx: watch::Sender<SamplingParams>,
    cancel_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct TrackingController<P: PositionProvider> {
    db: Database,
    settings: Arc<SettingsStore>,
    provider: Arc<P>,
    battery: Arc<dyn BatterySource>,
    state: SharedTrackingState,
    events: EventBus,
    watchdog_period: Duration,
    session: Mutex<Option<ActiveSession<P>>>,
}

impl<P: PositionProvider> TrackingController<P> {
    pub fn new(
        db: Database,
        settings: Arc<SettingsStore>,
        provider: Arc<P>,
        battery: Arc<dyn BatterySource>,
    ) -> Self {
        Self {
            db,
            settings,
            provider,
            battery,
            state: SharedTrackingState::new(),
            events: EventBus::new(),
            watchdog_period: WATCHDOG_PERIOD,
            session: Mutex::new(None),
        }
    }

    pub fn with_watchdog_period(mut self, period: Duration) -> Self {
        self.watchdog_period = period;
        self
    }

    pub fn state(&self) -> &SharedTrackingState {
        &self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub async fn start_session(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            bail!("a tracking session is already running");
        }

        let profile = self.settings.profile();
        let params = profile.resolve();
        let (inputs_tx, inputs_rx) = mpsc::channel(FIX_QUEUE_CAPACITY);
        let (params_tx, params_rx) = watch::channel(params);

        let feed = Arc::new(Feed::new(
            self.provider.clone(),
            self.state.clone(),
            self.events.clone(),
            inputs_tx.clone(),
            params_rx.clone(),
        ));

        self.state.update(|s| s.begin_session(profile, now_ms()));
        if let Err(err) = feed.start().await {
            self.state.update(TrackingState::reset);
            return Err(anyhow!(err).context("failed to subscribe to position provider"));
        }

        let cancel_token = CancellationToken::new();
        let pipeline = AcceptancePipeline::new(
            self.db.clone(),
            self.state.clone(),
            self.events.clone(),
            self.battery.clone(),
        );
        let watchdog = Watchdog::new(
            feed.clone(),
            self.db.clone(),
            self.state.clone(),
            self.events.clone(),
        );
        let heartbeat = Heartbeat::new(self.provider.clone(), self.state.clone(), inputs_tx);

        let handles = vec![
            tokio::spawn(acceptance_loop(pipeline, inputs_rx, cancel_token.clone())),
            tokio::spawn(watchdog_loop(
                watchdog,
                self.watchdog_period,
                cancel_token.clone(),
            )),
            tokio::spawn(heartbeat_loop(heartbeat, params_rx, cancel_token.clone())),
        ];

        *session = Some(ActiveSession {
            feed,
            params_tx,
            cancel_token,
            handles,
        });

        if let Err(err) = self.settings.set_was_tracking(true) {
            log_warn!("failed to persist tracking flag: {err:?}");
        }
        log_info!(
            "tracking session started with profile {} ({})",
            profile,
            profile.description()
        );
        self.events.emit(TrackingEvent::SessionStarted { profile });
        Ok(())
    }

    /// Returns `false` when no session was running.
    pub async fn stop_session(&self) -> Result<bool> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(false);
        };

        session.cancel_token.cancel();
        for handle in session.handles {
            if let Err(err) = handle.await {
                log_warn!("tracking task join failed: {err}");
            }
        }
        // Tasks are joined first so a watchdog restart cannot resubscribe
        // after this point.
        session.feed.stop().await;

        let accepted = self.state.accepted_count();
        self.state.update(TrackingState::reset);
        self.settings
            .set_was_tracking(false)
            .context("failed to persist tracking flag")?;
        log_info!("tracking session stopped after {} samples", accepted);
        self.events.emit(TrackingEvent::SessionStopped);
        Ok(true)
    }

    /// Persist a new profile; a running session re-subscribes with it.
    pub async fn switch_profile(&self, profile: Profile) -> Result<()> {
        self.settings.set_profile(profile)?;

        let session = self.session.lock().await;
        if let Some(session) = session.as_ref() {
            session.params_tx.send_replace(profile.resolve());
            self.state.update(|s| s.profile = profile);
            session
                .feed
                .restart()
                .await
                .map_err(|err| anyhow!(err).context("failed to re-subscribe with new profile"))?;
            log_info!("switched running session to profile {}", profile);
        }

        self.events.emit(TrackingEvent::ProfileChanged { profile });
        Ok(())
    }

    /// Start a session if the previous process was tracking or the user
    /// asked for tracking at startup.
    pub async fn resume_if_needed(&self) -> Result<bool> {
        if !(self.settings.was_tracking() || self.settings.auto_start()) {
            return Ok(false);
        }
        if self.is_running() {
            return Ok(false);
        }
        self.start_session().await?;
        Ok(true)
    }

    pub async fn status(&self) -> Result<TrackingStatus> {
        let pending = self.db.count_unsynced_samples().await?;
        Ok(TrackingStatus::from_state(
            &self.state.snapshot(),
            now_ms(),
            pending,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::provider::{NoBattery, ProviderEvent};
    use crate::tracking::testing::{fix, FakeProvider};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Rig {
        _dir: TempDir,
        provider: Arc<FakeProvider>,
        settings: Arc<SettingsStore>,
        db: Database,
        controller: TrackingController<FakeProvider>,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("controller.sqlite3")).unwrap();
        let settings = Arc::new(SettingsStore::new(dir.path().join("settings.json")).unwrap());
        let provider = Arc::new(FakeProvider::default());
        let controller = TrackingController::new(
            db.clone(),
            settings.clone(),
            provider.clone(),
            Arc::new(NoBattery),
        );
        Rig {
            _dir: dir,
            provider,
            settings,
            db,
            controller,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn session_accepts_delivered_fixes() {
        let rig = rig();
        rig.controller.start_session().await.unwrap();
        assert!(rig.controller.is_running());
        assert!(rig.settings.was_tracking());
        assert_eq!(rig.provider.subscription_count(), 1);
        assert_eq!(
            rig.provider.last_params(),
            Some(Profile::Economy.resolve())
        );

        assert!(rig.provider.emit(ProviderEvent::Fix(fix(8.0, now_ms()))).await);
        let state = rig.controller.state().clone();
        wait_until(|| state.accepted_count() == 1).await;

        let status = rig.controller.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.pending_samples, 1);
        assert_eq!(rig.db.count_attempts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn starting_twice_is_an_error() {
        let rig = rig();
        rig.controller.start_session().await.unwrap();
        assert!(rig.controller.start_session().await.is_err());
        assert_eq!(rig.provider.subscription_count(), 1);
    }

    #[tokio::test]
    async fn stop_resets_state_and_is_idempotent() {
        let rig = rig();
        let mut events = rig.controller.events().subscribe();
        rig.controller.start_session().await.unwrap();
        rig.provider.emit(ProviderEvent::Fix(fix(8.0, now_ms()))).await;
        let state = rig.controller.state().clone();
        wait_until(|| state.accepted_count() == 1).await;

        assert!(rig.controller.stop_session().await.unwrap());
        assert!(!rig.controller.stop_session().await.unwrap());
        assert_eq!(state.snapshot(), TrackingState::default());
        assert_eq!(rig.provider.unsubscription_count(), 1);
        assert!(!rig.settings.was_tracking());
        // Stored data outlives the session.
        assert_eq!(rig.db.count_samples().await.unwrap(), 1);

        assert_eq!(
            events.recv().await.unwrap(),
            TrackingEvent::SessionStarted {
                profile: Profile::Economy
            }
        );
    }

    #[tokio::test]
    async fn failed_subscribe_rolls_back() {
        let rig = rig();
        rig.provider.fail_subscribe.store(true, Ordering::SeqCst);
        assert!(rig.controller.start_session().await.is_err());
        assert!(!rig.controller.is_running());
        assert!(!rig.settings.was_tracking());

        rig.provider.fail_subscribe.store(false, Ordering::SeqCst);
        rig.controller.start_session().await.unwrap();
        assert!(rig.controller.is_running());
    }

    #[tokio::test]
    async fn switching_profile_resubscribes_running_session() {
        let rig = rig();
        rig.controller.switch_profile(Profile::Balanced).await.unwrap();
        assert_eq!(rig.settings.profile(), Profile::Balanced);
        assert_eq!(rig.provider.subscription_count(), 0);

        rig.controller.start_session().await.unwrap();
        rig.controller.switch_profile(Profile::Precision).await.unwrap();
        assert_eq!(rig.provider.subscription_count(), 2);
        assert_eq!(
            rig.provider.last_params(),
            Some(Profile::Precision.resolve())
        );
        assert_eq!(rig.controller.state().snapshot().profile, Profile::Precision);
    }

    #[tokio::test]
    async fn resume_follows_persisted_flag() {
        let rig = rig();
        assert!(!rig.controller.resume_if_needed().await.unwrap());

        rig.settings.set_was_tracking(true).unwrap();
        assert!(rig.controller.resume_if_needed().await.unwrap());
        assert!(rig.controller.is_running());
    }
}
