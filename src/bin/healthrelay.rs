// src/bin/healthrelay.rs
//! Drives the relay engine against the in-process simulated sensor and
//! health store, posting to a real endpoint (or to memory with --dry-run).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};

use healthrelay::source::adapter::stage_code;
use healthrelay::source::{HealthRecord, HealthStore, SensorClient, SimHealthStore, SimSensor};
use healthrelay::{Coordinator, HttpTransport, MemoryTransport, RelayConfig, RelayTransport};

#[derive(Parser)]
#[command(
    name = "healthrelay",
    version,
    about = "Relay biometric readings to an ingestion endpoint"
)]
struct Cli {
    /// Base URL of the ingestion endpoint (overrides HEALTHRELAY_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Device identifier attached to measurements
    #[arg(long)]
    device_id: Option<String>,

    /// Seconds before a relay POST is abandoned
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Log posts instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Run without a sensor; heart rate and steps are simulated per tick
    #[arg(long)]
    no_sensor: bool,

    /// Attach a simulated health store seeded with today's data
    #[arg(long)]
    store: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start all metric trackers until Ctrl-C or --duration elapses
    Run {
        /// Seconds to run before stopping
        #[arg(long)]
        duration: Option<u64>,

        /// Seconds between simulated sensor samples
        #[arg(long, default_value_t = 1)]
        feed_interval: u64,
    },
    /// Take a single heart rate measurement
    Measure {
        /// Seconds to wait for a sample
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Show which metrics this device supports
    Support,
}

fn seeded_store() -> Arc<SimHealthStore> {
    let store = SimHealthStore::new();
    let now = Utc::now();
    store.insert(HealthRecord::ActiveCalories {
        start: now - ChronoDuration::minutes(50),
        end: now - ChronoDuration::minutes(20),
        kilocalories: 145.0,
    });
    store.insert(HealthRecord::SleepSession {
        start: now - ChronoDuration::hours(9),
        end: now - ChronoDuration::hours(1),
    });
    store.insert(HealthRecord::SleepStage {
        start: now - ChronoDuration::hours(2),
        end: now - ChronoDuration::hours(1),
        stage: stage_code::LIGHT,
    });
    Arc::new(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = RelayConfig::from_env().context("invalid environment configuration")?;
    if let Some(url) = cli.base_url {
        config = config.with_base_url(url)?;
    }
    if let Some(device_id) = cli.device_id {
        config = config.with_device_id(device_id);
    }
    if let Some(secs) = cli.request_timeout {
        config = config.with_request_timeout(Duration::from_secs(secs.max(1)));
    }

    let transport: Arc<dyn RelayTransport> = if cli.dry_run {
        MemoryTransport::new()
    } else {
        Arc::new(HttpTransport::new(config.request_timeout)?)
    };

    let sensor = (!cli.no_sensor).then(SimSensor::new);
    let store = cli.store.then(seeded_store);

    let coordinator = Coordinator::new(
        config,
        sensor.clone().map(|s| s as Arc<dyn SensorClient>),
        store.map(|s| s as Arc<dyn HealthStore>),
        transport,
    );
    log::info!("Device id: {}", coordinator.config().device_id);

    match cli.command {
        Command::Support => {
            for (kind, supported) in coordinator.check_support().await {
                let label = if supported { "yes" } else { "no" };
                println!("{:<12} {}", kind.to_string(), label);
            }
        }
        Command::Measure { timeout } => {
            let feed = sensor.as_ref().map(|s| s.spawn_feed(Duration::from_secs(1)));
            let result = coordinator.measure_once(Duration::from_secs(timeout)).await;
            if let Some(feed) = feed {
                feed.abort();
            }
            match result {
                Some(measurement) => println!("{}", serde_json::to_string_pretty(&measurement)?),
                None => println!("No heart rate sample received"),
            }
            // Give the relay task a moment to finish.
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Command::Run {
            duration,
            feed_interval,
        } => {
            coordinator.on_heart_rate(|bpm, accuracy| {
                log::info!("Heart rate: {:.1} BPM ({})", bpm, accuracy)
            });
            coordinator.on_steps(|steps| log::info!("Steps: {}", steps));
            coordinator.on_calories(|kcal| log::info!("Calories: {:.1} kcal", kcal));
            coordinator.on_sleep(|stage| log::info!("Sleep: {}", stage));

            for (kind, e) in coordinator.start_all().await {
                log::warn!("{} started without a live source: {}", kind, e);
            }
            let feed = sensor
                .as_ref()
                .map(|s| s.spawn_feed(Duration::from_secs(feed_interval.max(1))));

            match duration {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => {
                    tokio::signal::ctrl_c().await?;
                }
            }

            if let Some(feed) = feed {
                feed.abort();
            }
            coordinator.stop_all().await;
            log::info!("All monitoring stopped");
        }
    }

    Ok(())
}
