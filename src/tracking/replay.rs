//! A [`PositionProvider`] that replays a recorded track.
//!
//! The input is newline-delimited JSON. Each line is either a fix
//! (`{"latitude":..,"longitude":..,"accuracy":..,"timeMs":..}`) or a
//! satellite report (`{"satellites":{"visible":9,"usedInFix":3}}`). Blank
//! lines and lines starting with `#` are skipped.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::utils::time::now_ms;

use super::profile::SamplingParams;
use super::provider::{Fix, PositionProvider, ProviderError, ProviderEvent, SatelliteStatus};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordedFix {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    altitude: Option<f64>,
    #[serde(default)]
    accuracy: Option<f32>,
    #[serde(default)]
    speed: Option<f32>,
    #[serde(default)]
    bearing: Option<f32>,
    #[serde(default)]
    time_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ReplayRecord {
    Satellites { satellites: SatelliteStatus },
    Fix(RecordedFix),
}

fn parse_records(contents: &str) -> Result<Vec<ReplayRecord>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("invalid replay record on line {}", index + 1))
        })
        .collect()
}

struct Shared {
    records: Vec<ReplayRecord>,
    cursor: AtomicUsize,
    restamp: bool,
    last_known: Mutex<Option<Fix>>,
}

impl Shared {
    fn last_known(&self) -> MutexGuard<'_, Option<Fix>> {
        match self.last_known.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn to_fix(&self, recorded: &RecordedFix) -> Fix {
        let time_ms = match recorded.time_ms {
            Some(time_ms) if !self.restamp => time_ms,
            _ => now_ms(),
        };
        Fix {
            latitude: recorded.latitude,
            longitude: recorded.longitude,
            altitude: recorded.altitude,
            accuracy: recorded.accuracy,
            speed: recorded.speed,
            bearing: recorded.bearing,
            time_ms,
        }
    }
}

pub struct ReplayProvider {
    shared: Arc<Shared>,
    pace: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayProvider {
    pub fn from_path(path: &Path, pace: Duration) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        let provider = Self::parse(&contents, pace)?;
        log_info!(
            "loaded {} replay records from {}",
            provider.len(),
            path.display()
        );
        Ok(provider)
    }

    pub fn parse(contents: &str, pace: Duration) -> Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                records: parse_records(contents)?,
                cursor: AtomicUsize::new(0),
                restamp: false,
                last_known: Mutex::new(None),
            }),
            pace,
            task: Mutex::new(None),
        })
    }

    /// Deliver every fix stamped with the current wall clock instead of its
    /// recorded time.
    pub fn restamped(mut self) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.restamp = true;
        }
        self
    }

    pub fn len(&self) -> usize {
        self.shared.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.records.is_empty()
    }

    /// True once every record has been delivered.
    pub fn finished(&self) -> bool {
        self.shared.cursor.load(Ordering::SeqCst) >= self.shared.records.len()
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Deliver records from the shared cursor so a resubscribe resumes where the
/// previous subscription stopped.
async fn replay_loop(shared: Arc<Shared>, pace: Duration, tx: mpsc::Sender<ProviderEvent>) {
    loop {
        let index = shared.cursor.load(Ordering::SeqCst);
        let Some(record) = shared.records.get(index) else {
            log_info!("replay finished after {} records", shared.records.len());
            break;
        };

        let event = match record {
            ReplayRecord::Satellites { satellites } => ProviderEvent::Satellites(*satellites),
            ReplayRecord::Fix(recorded) => {
                let fix = shared.to_fix(recorded);
                *shared.last_known() = Some(fix.clone());
                ProviderEvent::Fix(fix)
            }
        };

        if tx.send(event).await.is_err() {
            break;
        }
        shared.cursor.fetch_add(1, Ordering::SeqCst);

        if !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }
    }
}

impl PositionProvider for ReplayProvider {
    async fn subscribe(
        &self,
        params: SamplingParams,
    ) -> Result<mpsc::Receiver<ProviderEvent>, ProviderError> {
        if self.is_empty() {
            return Err(ProviderError::Unavailable("replay file has no records".into()));
        }
        log_debug!("replay subscribe (interval {:?})", params.interval);

        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(replay_loop(self.shared.clone(), self.pace, tx));
        if let Some(previous) = self.task().replace(handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        if let Some(handle) = self.task().take() {
            handle.abort();
        }
    }

    async fn last_known_fix(&self) -> Option<Fix> {
        self.shared.last_known().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::profile::Profile;

    const TRACK: &str = r#"
# morning walk
{"satellites":{"visible":9,"usedInFix":6}}
{"latitude":52.52,"longitude":13.40,"accuracy":12.5,"timeMs":1000}

{"latitude":52.53,"longitude":13.41,"timeMs":61000}
"#;

    #[test]
    fn parses_mixed_records() {
        let provider = ReplayProvider::parse(TRACK, Duration::ZERO).unwrap();
        assert_eq!(provider.len(), 3);
        assert!(!provider.finished());

        let err = ReplayProvider::parse("{\"latitude\": }", Duration::ZERO)
            .err()
            .unwrap();
        assert!(err.to_string().contains("line 1"));
    }

    #[tokio::test]
    async fn delivers_in_order_and_caches_last_fix() {
        let provider = ReplayProvider::parse(TRACK, Duration::ZERO).unwrap();
        assert_eq!(provider.last_known_fix().await, None);

        let mut rx = provider.subscribe(Profile::Precision.resolve()).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(ProviderEvent::Satellites(SatelliteStatus {
                visible: 9,
                used_in_fix: 6
            }))
        );
        match rx.recv().await {
            Some(ProviderEvent::Fix(fix)) => {
                assert_eq!(fix.time_ms, 1000);
                assert_eq!(fix.accuracy, Some(12.5));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await {
            Some(ProviderEvent::Fix(fix)) => assert_eq!(fix.accuracy, None),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(rx.recv().await, None);
        assert!(provider.finished());
        assert_eq!(provider.last_known_fix().await.map(|f| f.time_ms), Some(61000));
    }

    #[tokio::test]
    async fn restamped_fixes_use_wall_clock() {
        let provider = ReplayProvider::parse(TRACK, Duration::ZERO)
            .unwrap()
            .restamped();
        let before = now_ms();
        let mut rx = provider.subscribe(Profile::Economy.resolve()).await.unwrap();
        rx.recv().await;
        match rx.recv().await {
            Some(ProviderEvent::Fix(fix)) => assert!(fix.time_ms >= before),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_replay_cannot_subscribe() {
        let provider = ReplayProvider::parse("# nothing\n", Duration::ZERO).unwrap();
        assert!(provider.subscribe(Profile::Economy.resolve()).await.is_err());
    }
}
