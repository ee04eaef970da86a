//! coordinator/mod.rs
//!
//! The [`Coordinator`] is the surface the UI layer talks to: it owns the four
//! metric trackers, starts and stops them together, answers the capability
//! query, runs one-shot heart rate measurements and routes observer
//! registrations to the right tracker.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::{self, Instant};

use crate::config::RelayConfig;
use crate::metric::{HeartRateAccuracy, MetricKind, MonitoringState, Reading};
use crate::relay::{Relay, RelayTransport};
use crate::source::{HealthStore, SensorClient, SensorEvent, SourceAdapter, SourceError};
use crate::tracker::MetricTracker;

/// Result of a one-shot heart rate measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub heart_rate: f64,
    pub accuracy: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
}

pub struct Coordinator {
    config: RelayConfig,
    sensor: Option<Arc<dyn SensorClient>>,
    relay: Relay,
    heart_rate: MetricTracker,
    steps: MetricTracker,
    calories: MetricTracker,
    sleep: MetricTracker,
    /// Held for the whole of a one-shot measurement.
    measuring: tokio::sync::Mutex<()>,
}

impl Coordinator {
    /// Build a coordinator. Missing sensor or store sources fall back to
    /// simulated data for the metrics that depend on them.
    pub fn new(
        config: RelayConfig,
        sensor: Option<Arc<dyn SensorClient>>,
        store: Option<Arc<dyn HealthStore>>,
        transport: Arc<dyn RelayTransport>,
    ) -> Self {
        let relay = Relay::new(config.base_url.clone(), transport);
        let tracker = |kind: MetricKind| {
            MetricTracker::new(
                SourceAdapter::new(kind, sensor.clone(), store.clone()),
                relay.clone(),
            )
        };

        Self {
            heart_rate: tracker(MetricKind::HeartRate),
            steps: tracker(MetricKind::Steps),
            calories: tracker(MetricKind::Calories),
            sleep: tracker(MetricKind::SleepStage),
            config,
            sensor,
            relay,
            measuring: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn tracker(&self, kind: MetricKind) -> &MetricTracker {
        match kind {
            MetricKind::HeartRate => &self.heart_rate,
            MetricKind::Steps => &self.steps,
            MetricKind::Calories => &self.calories,
            MetricKind::SleepStage => &self.sleep,
        }
    }

    pub fn trackers(&self) -> [&MetricTracker; 4] {
        [&self.heart_rate, &self.steps, &self.calories, &self.sleep]
    }

    pub fn states(&self) -> BTreeMap<MetricKind, MonitoringState> {
        self.trackers()
            .iter()
            .map(|t| (t.kind(), t.state()))
            .collect()
    }

    /// Which metrics can be monitored. Calories and sleep always report
    /// supported since they can be simulated.
    pub async fn check_support(&self) -> BTreeMap<MetricKind, bool> {
        let capabilities = match &self.sensor {
            Some(sensor) => sensor.capabilities().await.unwrap_or_else(|e| {
                log::warn!("Failed to query sensor capabilities: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        let support: BTreeMap<MetricKind, bool> = MetricKind::ALL
            .iter()
            .map(|&kind| {
                let supported = if kind.is_push() {
                    capabilities.contains(&kind)
                } else {
                    true
                };
                (kind, supported)
            })
            .collect();
        log::debug!("Health metrics support: {:?}", support);
        support
    }

    /// Start all four trackers concurrently. Returns the failures, which
    /// never prevent the other trackers from starting.
    pub async fn start_all(&self) -> Vec<(MetricKind, SourceError)> {
        log::info!("Starting all monitoring, relaying to {}", self.relay.base_url());
        let results = join_all(
            self.trackers()
                .map(|tracker| async move { (tracker.kind(), tracker.start().await) }),
        )
        .await;
        results
            .into_iter()
            .filter_map(|(kind, result)| result.err().map(|e| (kind, e)))
            .collect()
    }

    pub async fn stop_all(&self) {
        join_all(self.trackers().map(|t| t.stop())).await;
    }

    /// Take a single heart rate measurement with the configured timeout.
    pub async fn measure(&self) -> Option<Measurement> {
        self.measure_once(self.config.measure_timeout).await
    }

    /// Take a single heart rate measurement.
    ///
    /// Registers a temporary subscription; the first sample is relayed to
    /// the heart rate endpoint and returned. Resolves to `None` when no
    /// sample arrives within `timeout`. The temporary subscription is always
    /// removed. Concurrent calls run one after another, and time spent
    /// waiting for an earlier measurement counts against `timeout`.
    pub async fn measure_once(&self, timeout: Duration) -> Option<Measurement> {
        let deadline = Instant::now() + timeout;
        let Ok(_guard) = time::timeout_at(deadline, self.measuring.lock()).await else {
            log::info!("Heart rate measurement still in progress after {:?}", timeout);
            return None;
        };

        let Some(sensor) = &self.sensor else {
            log::warn!("No sensor client available for heart rate measurement");
            return None;
        };

        let (tx, rx) = oneshot::channel::<(f64, Option<HeartRateAccuracy>)>();
        let tx = Mutex::new(Some(tx));
        let subscription = sensor
            .register(
                MetricKind::HeartRate,
                Box::new(move |event| {
                    if let SensorEvent::Sample {
                        kind: MetricKind::HeartRate,
                        value,
                        accuracy,
                    } = event
                    {
                        // Only the first sample counts.
                        if let Some(tx) = tx.lock().ok().and_then(|mut slot| slot.take()) {
                            let _ = tx.send((value, accuracy));
                        }
                    }
                }),
            )
            .await;

        let id = match subscription {
            Ok(id) => id,
            Err(e) => {
                log::error!("Error taking heart rate measurement: {}", e);
                return None;
            }
        };

        let sample = time::timeout_at(deadline, rx).await;
        if let Ok(Ok((bpm, _))) = &sample {
            self.relay.send(MetricKind::HeartRate, Reading::Float(*bpm));
        }

        if let Err(e) = sensor.unregister(MetricKind::HeartRate, id).await {
            log::error!("Error unregistering measurement callback: {}", e);
        }

        match sample {
            Ok(Ok((bpm, accuracy))) => {
                let measurement = Measurement {
                    heart_rate: bpm,
                    accuracy: accuracy.unwrap_or(HeartRateAccuracy::Unknown).label().to_string(),
                    timestamp: Utc::now(),
                    device_id: self.config.device_id.clone(),
                };
                log::info!("Heart rate measured: {:.1} BPM", bpm);
                Some(measurement)
            }
            Ok(Err(_)) => None,
            Err(_) => {
                log::info!("No heart rate sample within {:?}", timeout);
                None
            }
        }
    }

    /// Single-slot heart rate observer receiving `(bpm, accuracy label)`.
    pub fn on_heart_rate<F>(&self, callback: F)
    where
        F: Fn(f64, &str) + Send + Sync + 'static,
    {
        self.heart_rate.observe(move |obs| {
            if let Some(bpm) = obs.reading.as_f64() {
                callback(bpm, obs.accuracy_label());
            }
        });
    }

    pub fn on_steps<F>(&self, callback: F)
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.steps.observe(move |obs| {
            if let Some(steps) = obs.reading.as_i64() {
                callback(steps);
            }
        });
    }

    pub fn on_calories<F>(&self, callback: F)
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.calories.observe(move |obs| {
            if let Some(kcal) = obs.reading.as_f64() {
                callback(kcal);
            }
        });
    }

    pub fn on_sleep<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.sleep.observe(move |obs| {
            if let Some(stage) = obs.reading.as_str() {
                callback(stage);
            }
        });
    }
}
