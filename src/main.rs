use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::time::{sleep, Instant};

use waytrace_lib::db::AttemptStatus;
use waytrace_lib::sync::{LogNotifier, ReportedNetwork, SyncOutcome, TrustedNetworkTrigger};
use waytrace_lib::tracking::{EventBus, NoBattery, Profile, ReplayProvider};
use waytrace_lib::utils::logging::init_logging;
use waytrace_lib::utils::time::{format_elapsed, format_ms, now_ms};
use waytrace_lib::{resolve_data_dir, AppState};

#[derive(Parser, Debug)]
#[command(name = "waytrace")]
#[command(about = "Adaptive GPS sampling with stall recovery and durable upload", long_about = None)]
struct Args {
    /// Data directory (defaults to $WAYTRACE_DATA_DIR or ./waytrace-data)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a tracking session fed from a recorded track
    Track {
        /// Newline-delimited JSON fixes to replay
        #[arg(long)]
        replay: PathBuf,

        /// Delay between replayed records, in milliseconds
        #[arg(long, default_value = "1000")]
        pace_ms: u64,

        /// Keep recorded capture times instead of stamping fixes with the wall clock
        #[arg(long)]
        keep_times: bool,

        /// Stop after this many seconds (0 = until the replay ends or Ctrl-C)
        #[arg(long, default_value = "0")]
        duration: u64,
    },
    /// Upload stored samples and attempts now
    Sync,
    /// Show stored data and configuration
    Status,
    /// List recent attempts, newest first
    Attempts {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Delete stored data
    Clear {
        /// Only samples
        #[arg(long, conflicts_with = "attempts")]
        samples: bool,
        /// Only attempts
        #[arg(long)]
        attempts: bool,
    },
    /// Report a connectivity change; syncs when the network is trusted
    NetworkChanged {
        /// Name of the network now connected (omit when disconnected)
        ssid: Option<String>,
    },
    /// Read or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    /// precision, balanced, economy or max_economy
    Profile { name: String },
    DeviceId { id: String },
    Trust { ssid: String },
    Untrust { ssid: String },
    Endpoint {
        #[arg(long)]
        locations: Option<String>,
        #[arg(long)]
        attempts: Option<String>,
        /// Accept invalid TLS certificates
        #[arg(long, conflicts_with = "secure")]
        insecure: bool,
        /// Validate TLS certificates again
        #[arg(long)]
        secure: bool,
    },
    AutoStart {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let state = AppState::open(&resolve_data_dir(args.data_dir)).await?;

    match args.command {
        Command::Track {
            replay,
            pace_ms,
            keep_times,
            duration,
        } => track(&state, replay, pace_ms, keep_times, duration).await,
        Command::Sync => sync(&state).await,
        Command::Status => status(&state).await,
        Command::Attempts { limit } => attempts(&state, limit).await,
        Command::Clear { samples, attempts } => {
            if !attempts {
                let removed = state.db.clear_samples().await?;
                println!("Removed {removed} samples");
            }
            if !samples {
                let removed = state.db.clear_attempts().await?;
                println!("Removed {removed} attempts");
            }
            Ok(())
        }
        Command::NetworkChanged { ssid } => {
            let events = EventBus::new();
            let coordinator = Arc::new(state.sync_coordinator(events)?);
            let trigger =
                TrustedNetworkTrigger::new(coordinator, state.settings.clone(), Arc::new(LogNotifier));
            match trigger.on_connectivity_changed(&ReportedNetwork(ssid)) {
                Some(handle) => handle.await?,
                None => println!("Network is not trusted; nothing to do"),
            }
            Ok(())
        }
        Command::Config { action } => config(&state, action),
    }
}

async fn track(
    state: &AppState,
    replay: PathBuf,
    pace_ms: u64,
    keep_times: bool,
    duration: u64,
) -> Result<()> {
    let mut provider = ReplayProvider::from_path(&replay, Duration::from_millis(pace_ms))?;
    if !keep_times {
        provider = provider.restamped();
    }
    let provider = Arc::new(provider);
    let controller = state.tracking_controller(provider.clone(), Arc::new(NoBattery));
    controller.start_session().await?;

    let deadline = (duration > 0).then(|| Instant::now() + Duration::from_secs(duration));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sleep(Duration::from_millis(500)) => {
                if provider.finished() || deadline.is_some_and(|d| Instant::now() >= d) {
                    // Let the acceptance worker drain the last fixes.
                    sleep(Duration::from_millis(500)).await;
                    break;
                }
            }
        }
    }

    let status = controller.status().await?;
    controller.stop_session().await?;
    println!(
        "Accepted {} samples ({} pending upload), {} feed restarts",
        status.accepted_count, status.pending_samples, status.restart_count
    );
    Ok(())
}

async fn sync(state: &AppState) -> Result<()> {
    let coordinator = state.sync_coordinator(EventBus::new())?;
    match coordinator.sync().await? {
        SyncOutcome::AlreadySyncing => println!("A sync is already running"),
        SyncOutcome::NothingToSync => println!("Nothing to sync"),
        SyncOutcome::Completed(report) => {
            println!("Samples:  {:?}", report.samples);
            println!("Attempts: {:?}", report.attempts);
            if report.any_failed() {
                bail!("some data could not be uploaded and was kept locally");
            }
        }
    }
    Ok(())
}

async fn status(state: &AppState) -> Result<()> {
    let settings = state.settings.snapshot();
    let samples = state.db.get_all_samples().await?;
    let pending = state.db.count_unsynced_samples().await?;
    let stats = state.db.get_attempt_stats().await?;

    println!("Device:    {}", settings.device_id);
    println!("Profile:   {} ({})", settings.profile, settings.profile.description());
    println!("Data dir:  {}", state.data_dir.display());
    println!("Samples:   {} stored, {} pending upload", samples.len(), pending);
    if let Some(last) = samples.last() {
        println!(
            "Last:      {} ({} ago)",
            format_ms(last.timestamp_ms),
            format_elapsed(now_ms() - last.timestamp_ms)
        );
    }
    println!(
        "Attempts:  {} total, {:.0}% success",
        stats.total(),
        stats.success_rate() * 100.0
    );
    for status in AttemptStatus::ALL {
        println!("  {:<14} {}", status.as_str(), stats.get(status));
    }
    Ok(())
}

async fn attempts(state: &AppState, limit: usize) -> Result<()> {
    for attempt in state.db.get_recent_attempts(limit).await? {
        let accuracy = attempt
            .accuracy
            .map(|a| format!("{a:.1} m"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<13} sats {:>2}  acc {:>8}  {}",
            format_ms(attempt.timestamp_ms),
            attempt.status.as_str(),
            attempt.satellites,
            accuracy,
            attempt.reason
        );
    }
    Ok(())
}

fn config(state: &AppState, action: ConfigAction) -> Result<()> {
    let settings = &state.settings;
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&settings.snapshot())?);
        }
        ConfigAction::Profile { name } => {
            let profile = Profile::from_name(&name);
            if profile.as_str() != name.trim().to_ascii_lowercase() {
                println!("Unknown profile '{name}', using {profile}");
            }
            settings.set_profile(profile)?;
            println!("Profile set to {profile}");
        }
        ConfigAction::DeviceId { id } => {
            settings.set_device_id(&id)?;
            println!("Device id set to {}", settings.device_id());
        }
        ConfigAction::Trust { ssid } => {
            if settings.add_trusted_network(&ssid)? {
                println!("Trusted networks: {:?}", settings.trusted_networks());
            } else {
                println!("'{ssid}' is already trusted");
            }
        }
        ConfigAction::Untrust { ssid } => {
            if !settings.remove_trusted_network(&ssid)? {
                println!("'{ssid}' was not trusted");
            }
        }
        ConfigAction::Endpoint {
            locations,
            attempts,
            insecure,
            secure,
        } => {
            let current = settings.sync_settings();
            settings.set_endpoints(
                locations.or(current.locations_url),
                attempts.or(current.attempts_url),
            )?;
            if insecure || secure {
                settings.set_accept_invalid_certs(insecure)?;
            }
            println!("{}", serde_json::to_string_pretty(&settings.sync_settings())?);
        }
        ConfigAction::AutoStart { enabled } => settings.set_auto_start(enabled)?,
    }
    Ok(())
}
