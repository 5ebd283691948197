//! The live provider subscription and the task that forwards its events
//! into the acceptance queue.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::{EventBus, TrackingEvent};
use super::pipeline::{FixOrigin, PipelineInput};
use super::profile::SamplingParams;
use super::provider::{PositionProvider, ProviderError, ProviderEvent};
use super::state::SharedTrackingState;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

struct Forwarder {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

pub struct Feed<P: PositionProvider> {
    provider: Arc<P>,
    state: SharedTrackingState,
    events: EventBus,
    inputs: mpsc::Sender<PipelineInput>,
    params: watch::Receiver<SamplingParams>,
    forwarder: Mutex<Option<Forwarder>>,
}

impl<P: PositionProvider> Feed<P> {
    pub fn new(
        provider: Arc<P>,
        state: SharedTrackingState,
        events: EventBus,
        inputs: mpsc::Sender<PipelineInput>,
        params: watch::Receiver<SamplingParams>,
    ) -> Self {
        Self {
            provider,
            state,
            events,
            inputs,
            params,
            forwarder: Mutex::new(None),
        }
    }

    pub fn current_params(&self) -> SamplingParams {
        *self.params.borrow()
    }

    pub async fn is_subscribed(&self) -> bool {
        self.forwarder
            .lock()
            .await
            .as_ref()
            .map(|forwarder| !forwarder.handle.is_finished())
            .unwrap_or(false)
    }

    /// Subscribe with the current parameters and start forwarding.
    pub async fn start(&self) -> Result<(), ProviderError> {
        let mut guard = self.forwarder.lock().await;
        self.start_locked(&mut guard).await
    }

    /// Stop forwarding and release the provider subscription.
    pub async fn stop(&self) {
        let mut guard = self.forwarder.lock().await;
        self.stop_locked(&mut guard).await;
    }

    /// Tear down and re-establish the subscription. Concurrent restarts
    /// run one after the other, never interleaved.
    pub async fn restart(&self) -> Result<(), ProviderError> {
        let mut guard = self.forwarder.lock().await;
        self.stop_locked(&mut guard).await;
        self.start_locked(&mut guard).await
    }

    async fn start_locked(&self, slot: &mut Option<Forwarder>) -> Result<(), ProviderError> {
        if slot.is_some() {
            return Ok(());
        }

        let params = self.current_params();
        let events_rx = self.provider.subscribe(params).await?;
        log_info!(
            "subscribed to provider (interval {:?}, min distance {} m)",
            params.interval,
            params.min_distance_m
        );

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(forward_loop(
            events_rx,
            self.inputs.clone(),
            self.state.clone(),
            self.events.clone(),
            cancel_token.clone(),
        ));
        *slot = Some(Forwarder {
            handle,
            cancel_token,
        });
        Ok(())
    }

    async fn stop_locked(&self, slot: &mut Option<Forwarder>) {
        if let Some(forwarder) = slot.take() {
            forwarder.cancel_token.cancel();
            if let Err(err) = forwarder.handle.await {
                log_warn!("feed forwarder join failed: {err}");
            }
        }
        self.provider.unsubscribe().await;
    }
}

async fn forward_loop(
    mut events_rx: mpsc::Receiver<ProviderEvent>,
    inputs: mpsc::Sender<PipelineInput>,
    state: SharedTrackingState,
    events: EventBus,
    cancel_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel_token.cancelled() => break,
            event = events_rx.recv() => event,
        };

        let input = match event {
            Some(ProviderEvent::Fix(fix)) => PipelineInput::Fix {
                fix,
                origin: FixOrigin::Subscription,
            },
            Some(ProviderEvent::Fault(error)) => PipelineInput::Fault(error),
            Some(ProviderEvent::Satellites(status)) => {
                let changed = state.update(|s| {
                    let changed = s.satellites_used != status.used_in_fix
                        || s.satellites_visible != status.visible;
                    s.record_satellites(status);
                    changed
                });
                if changed {
                    log_debug!(
                        "satellites: {} used / {} visible",
                        status.used_in_fix,
                        status.visible
                    );
                    events.emit(TrackingEvent::SatellitesChanged { status });
                }
                continue;
            }
            None => {
                log_warn!("provider stream ended; waiting for watchdog");
                break;
            }
        };

        tokio::select! {
            _ = cancel_token.cancelled() => break,
            sent = inputs.send(input) => {
                if sent.is_err() {
                    log_info!("acceptance queue closed; forwarder exiting");
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
    use crate::tracking::testing::fix;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Provider whose first unsubscribe is slow, so overlapping restarts
    /// would interleave without serialisation.
    #[derive(Default)]
    struct SlowUnsubscribe {
        sender: StdMutex<Option<mpsc::Sender<ProviderEvent>>>,
        unsubscribes: AtomicU32,
    }

    impl PositionProvider for SlowUnsubscribe {
        async fn subscribe(
            &self,
            _params: SamplingParams,
        ) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
            let (tx, rx) = mpsc::channel(8);
            *self.sender.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn unsubscribe(&self) {
            if self.unsubscribes.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.sender.lock().unwrap().take();
        }

        async fn last_known_fix(&self) -> Option<crate::tracking::provider::Fix> {
            None
        }
    }

    #[tokio::test]
    async fn overlapping_restarts_leave_a_live_subscription() {
        let provider = Arc::new(SlowUnsubscribe::default());
        let (inputs_tx, mut inputs_rx) = mpsc::channel(8);
        let (_params_tx, params_rx) = watch::channel(Profile::Economy.resolve());
        let feed = Feed::new(
            provider.clone(),
            SharedTrackingState::new(),
            EventBus::new(),
            inputs_tx,
            params_rx,
        );
        feed.start().await.unwrap();

        let (a, b) = tokio::join!(feed.restart(), feed.restart());
        assert!(a.is_ok() && b.is_ok());
        assert!(feed.is_subscribed().await);

        let sender = provider.sender.lock().unwrap().clone().unwrap();
        sender.send(ProviderEvent::Fix(fix(8.0, 1_000))).await.unwrap();
        let forwarded = tokio::time::timeout(Duration::from_secs(1), inputs_rx.recv())
            .await
            .unwrap();
        assert!(matches!(forwarded, Some(PipelineInput::Fix { .. })));
    }
}
