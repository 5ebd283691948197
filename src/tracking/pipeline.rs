//! The acceptance worker: the single consumer of delivered and
//! heartbeat-forced fixes.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::utils::time::now_ms;

use super::events::{EventBus, TrackingEvent};
use super::policy::{evaluate, provider_fault_attempt, Evaluation, PolicyInput};
use super::provider::{BatterySource, Fix, ProviderError};
use super::state::SharedTrackingState;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Queue depth between the provider callback and the acceptance worker.
pub const FIX_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOrigin {
    Subscription,
    Heartbeat,
}

impl FixOrigin {
    fn as_str(&self) -> &'static str {
        match self {
            FixOrigin::Subscription => "subscription",
            FixOrigin::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineInput {
    Fix { fix: Fix, origin: FixOrigin },
    Fault(ProviderError),
}

#[derive(Clone)]
pub struct AcceptancePipeline {
    db: Database,
    state: SharedTrackingState,
    events: EventBus,
    battery: Arc<dyn BatterySource>,
}

impl AcceptancePipeline {
    pub fn new(
        db: Database,
        state: SharedTrackingState,
        events: EventBus,
        battery: Arc<dyn BatterySource>,
    ) -> Self {
        Self {
            db,
            state,
            events,
            battery,
        }
    }

    /// Classify one fix and persist the outcome.
    ///
    /// The last-accepted marker only advances after the sample insert
    /// succeeded; a failed insert is returned to the caller.
    pub async fn process_fix(&self, fix: &Fix, origin: FixOrigin, now_ms: i64) -> Result<Evaluation> {
        let battery = self.battery.battery_percent();
        let input = self.state.update(|state| {
            if let Some(accuracy) = fix.usable_accuracy() {
                state.last_accuracy = Some(accuracy);
            }
            PolicyInput {
                last_accepted_ms: state.last_accepted_ms,
                satellites_used: state.satellites_used,
                battery,
                now_ms,
            }
        });

        let evaluation = evaluate(fix, &input);

        let sample_result = match &evaluation.sample {
            Some(sample) => Some(self.db.insert_sample(sample).await),
            None => None,
        };

        if let Some(Ok(id)) = &sample_result {
            let accepted_count = self.state.update(|state| {
                state.record_accepted(fix.time_ms);
                state.accepted_count
            });
            log_info!(
                "sample {} accepted via {} ({}, total {})",
                id,
                origin.as_str(),
                evaluation.attempt.reason,
                accepted_count
            );
            self.events.emit(TrackingEvent::SampleAccepted {
                timestamp_ms: fix.time_ms,
                accepted_count,
            });
        } else if evaluation.sample.is_none() {
            log_debug!(
                "fix via {} not stored: {} ({})",
                origin.as_str(),
                evaluation.decision.as_str(),
                evaluation.attempt.reason
            );
        }

        let attempt_result = self.db.insert_attempt(&evaluation.attempt).await;
        if attempt_result.is_ok() {
            self.events.emit(TrackingEvent::AttemptRecorded {
                status: evaluation.decision,
            });
        }

        if let Some(Err(err)) = sample_result {
            return Err(err.context("failed to store accepted sample"));
        }
        attempt_result.context("failed to log attempt")?;

        Ok(evaluation)
    }

    /// Log a provider fault as a `no_signal` attempt. Never fatal.
    pub async fn record_fault(&self, error: &ProviderError, now_ms: i64) -> Result<()> {
        let attempt = provider_fault_attempt(error, self.state.satellites_used(), now_ms);
        log_warn!("provider fault: {}", error);
        self.db
            .insert_attempt(&attempt)
            .await
            .context("failed to log provider fault")?;
        self.events.emit(TrackingEvent::AttemptRecorded {
            status: attempt.status,
        });
        Ok(())
    }

    async fn handle(&self, input: PipelineInput) {
        let now = now_ms();
        let result = match input {
            PipelineInput::Fix { fix, origin } => self.process_fix(&fix, origin, now).await.map(|_| ()),
            PipelineInput::Fault(error) => self.record_fault(&error, now).await,
        };
        if let Err(err) = result {
            log_error!("acceptance worker: {err:?}");
        }
    }
}

pub async fn acceptance_loop(
    pipeline: AcceptancePipeline,
    mut inputs: mpsc::Receiver<PipelineInput>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                // Stop producers, then store whatever was already queued.
                inputs.close();
                let mut drained = 0usize;
                while let Some(input) = inputs.recv().await {
                    pipeline.handle(input).await;
                    drained += 1;
                }
                log_info!("acceptance worker shutting down; {} queued inputs drained", drained);
                break;
            }
            next = inputs.recv() => match next {
                Some(input) => pipeline.handle(input).await,
                None => {
                    log_info!("acceptance queue closed");
                    break;
                }
            }
        }
    }
}
