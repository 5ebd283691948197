//! In-crate fakes for tracking tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use super::profile::SamplingParams;
use super::provider::{Fix, PositionProvider, ProviderError, ProviderEvent};

#[derive(Default)]
pub struct FakeProvider {
    sender: Mutex<Option<mpsc::Sender<ProviderEvent>>>,
    last_known: Mutex<Option<Fix>>,
    last_params: Mutex<Option<SamplingParams>>,
    pub subscriptions: AtomicU32,
    pub unsubscriptions: AtomicU32,
    pub fail_subscribe: AtomicBool,
}

impl FakeProvider {
    pub async fn emit(&self, event: ProviderEvent) -> bool {
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn set_last_known(&self, fix: Option<Fix>) {
        *self.last_known.lock().unwrap() = fix;
    }

    pub fn last_params(&self) -> Option<SamplingParams> {
        *self.last_params.lock().unwrap()
    }

    pub fn subscription_count(&self) -> u32 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn unsubscription_count(&self) -> u32 {
        self.unsubscriptions.load(Ordering::SeqCst)
    }
}

impl PositionProvider for FakeProvider {
    async fn subscribe(
        &self,
        params: SamplingParams,
    ) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ProviderError::SubscriptionFailed("fake refusal".into()));
        }
        let (tx, rx) = mpsc::channel(32);
        *self.sender.lock().unwrap() = Some(tx);
        *self.last_params.lock().unwrap() = Some(params);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        self.sender.lock().unwrap().take();
        self.unsubscriptions.fetch_add(1, Ordering::SeqCst);
    }

    async fn last_known_fix(&self) -> Option<Fix> {
        self.last_known.lock().unwrap().clone()
    }
}

pub fn fix(accuracy: f32, time_ms: i64) -> Fix {
    Fix {
        latitude: 52.52,
        longitude: 13.40,
        altitude: Some(34.0),
        accuracy: Some(accuracy),
        speed: Some(0.0),
        bearing: None,
        time_ms,
    }
}
