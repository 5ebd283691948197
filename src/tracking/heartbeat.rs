//! Periodic forcer that replays the provider's cached fix when the
//! subscription has gone quiet.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::pipeline::{FixOrigin, PipelineInput};
use super::profile::SamplingParams;
use super::provider::{Fix, PositionProvider};
use super::state::SharedTrackingState;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// A cached fix must be at least this much newer than the last accepted
/// sample to be injected.
pub const HEARTBEAT_MIN_ADVANCE_MS: i64 = 60 * 1000;

pub fn should_inject(fix: &Fix, last_accepted_ms: Option<i64>) -> bool {
    match last_accepted_ms {
        None => true,
        Some(last) => fix.time_ms.saturating_sub(last) >= HEARTBEAT_MIN_ADVANCE_MS,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    NoCachedFix,
    TooRecent,
    Injected,
    /// The acceptance queue was full; the fix is dropped and the next tick
    /// will try again.
    QueueFull,
    QueueClosed,
}

pub struct Heartbeat<P: PositionProvider> {
    provider: Arc<P>,
    state: SharedTrackingState,
    inputs: mpsc::Sender<PipelineInput>,
}

impl<P: PositionProvider> Heartbeat<P> {
    pub fn new(
        provider: Arc<P>,
        state: SharedTrackingState,
        inputs: mpsc::Sender<PipelineInput>,
    ) -> Self {
        Self {
            provider,
            state,
            inputs,
        }
    }

    pub async fn tick(&self) -> HeartbeatOutcome {
        let Some(fix) = self.provider.last_known_fix().await else {
            log_debug!("heartbeat: provider has no cached fix");
            return HeartbeatOutcome::NoCachedFix;
        };

        if !should_inject(&fix, self.state.last_accepted_ms()) {
            return HeartbeatOutcome::TooRecent;
        }

        let time_ms = fix.time_ms;
        match self.inputs.try_send(PipelineInput::Fix {
            fix,
            origin: FixOrigin::Heartbeat,
        }) {
            Ok(()) => {
                log_info!("heartbeat: injected cached fix captured at {}", time_ms);
                HeartbeatOutcome::Injected
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                log_warn!("heartbeat: acceptance queue full, skipping");
                HeartbeatOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => HeartbeatOutcome::QueueClosed,
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Tick until cancelled, re-arming whenever the sampling parameters change.
pub async fn heartbeat_loop<P: PositionProvider>(
    heartbeat: Heartbeat<P>,
    mut params: watch::Receiver<SamplingParams>,
    cancel_token: CancellationToken,
) {
    let mut period = params.borrow_and_update().heartbeat_period();
    let mut interval = ticker(period);
    log_info!("heartbeat armed every {:?}", period);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("heartbeat shutting down");
                break;
            }
            changed = params.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = params.borrow_and_update().heartbeat_period();
                if next != period {
                    period = next;
                    interval = ticker(period);
                    log_info!("heartbeat re-armed every {:?}", period);
                }
            }
            _ = interval.tick() => {
                if heartbeat.tick().await == HeartbeatOutcome::QueueClosed {
                    log_info!("acceptance queue closed; heartbeat exiting");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::profile::Profile;
    use crate::tracking::testing::{fix, FakeProvider};

    const MINUTE: i64 = 60 * 1000;

    #[test]
    fn injection_threshold() {
        assert!(should_inject(&fix(10.0, 0), None));
        assert!(!should_inject(&fix(10.0, MINUTE - 1), Some(0)));
        assert!(should_inject(&fix(10.0, MINUTE), Some(0)));
        assert!(!should_inject(&fix(10.0, 0), Some(MINUTE)));
    }

    fn setup(capacity: usize) -> (Arc<FakeProvider>, SharedTrackingState, Heartbeat<FakeProvider>, mpsc::Receiver<PipelineInput>) {
        let provider = Arc::new(FakeProvider::default());
        let state = SharedTrackingState::new();
        let (tx, rx) = mpsc::channel(capacity);
        let heartbeat = Heartbeat::new(provider.clone(), state.clone(), tx);
        (provider, state, heartbeat, rx)
    }

    #[tokio::test]
    async fn injects_stale_cached_fix() {
        let (provider, state, heartbeat, mut rx) = setup(4);
        assert_eq!(heartbeat.tick().await, HeartbeatOutcome::NoCachedFix);

        state.update(|s| s.record_accepted(0));
        provider.set_last_known(Some(fix(20.0, 30_000)));
        assert_eq!(heartbeat.tick().await, HeartbeatOutcome::TooRecent);

        provider.set_last_known(Some(fix(20.0, 2 * MINUTE)));
        assert_eq!(heartbeat.tick().await, HeartbeatOutcome::Injected);
        match rx.recv().await {
            Some(PipelineInput::Fix { fix, origin }) => {
                assert_eq!(origin, FixOrigin::Heartbeat);
                assert_eq!(fix.time_ms, 2 * MINUTE);
            }
            other => panic!("unexpected input: {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (provider, _state, heartbeat, rx) = setup(1);
        provider.set_last_known(Some(fix(20.0, MINUTE)));
        assert_eq!(heartbeat.tick().await, HeartbeatOutcome::Injected);
        assert_eq!(heartbeat.tick().await, HeartbeatOutcome::QueueFull);
        drop(rx);
        assert_eq!(heartbeat.tick().await, HeartbeatOutcome::QueueClosed);
    }

    #[tokio::test]
    async fn loop_stops_on_cancel() {
        let (provider, _state, heartbeat, _rx) = setup(4);
        provider.set_last_known(Some(fix(20.0, MINUTE)));
        let (params_tx, params_rx) = watch::channel(Profile::Precision.resolve());
        let token = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_loop(heartbeat, params_rx, token.clone()));

        params_tx.send(Profile::MaxEconomy.resolve()).unwrap();
        token.cancel();
        time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("heartbeat loop did not stop")
            .unwrap();
    }
}
