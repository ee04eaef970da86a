//! In-process sensor and health-store simulator
//!
//! Provides a simulated sensor that delivers samples to registered callbacks
//! and a simulated health store holding an in-memory record list. Both can be
//! told to fail, which is how the fallback paths are exercised without real
//! platform services.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::transport::{
    Availability, HealthRecord, HealthStore, RecordType, SampleCallback, SensorClient,
    SensorEvent, SubscriptionId, TimeRange,
};
use super::SourceError;
use crate::metric::{HeartRateAccuracy, MetricKind};

type SharedCallback = Arc<dyn Fn(SensorEvent) + Send + Sync>;

/// A simulated push sensor.
pub struct SimSensor {
    capabilities: Vec<MetricKind>,
    subscriptions: Mutex<HashMap<SubscriptionId, (MetricKind, SharedCallback)>>,
    fail_register: AtomicBool,
    fail_unregister: AtomicBool,
    registrations: AtomicUsize,
    /// Applied to each `unregister()` before it takes effect.
    unregister_latency: Mutex<Duration>,
}

impl SimSensor {
    /// A sensor streaming heart rate and steps.
    pub fn new() -> Arc<Self> {
        Self::with_capabilities(vec![MetricKind::HeartRate, MetricKind::Steps])
    }

    pub fn with_capabilities(capabilities: Vec<MetricKind>) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            subscriptions: Mutex::new(HashMap::new()),
            fail_register: AtomicBool::new(false),
            fail_unregister: AtomicBool::new(false),
            registrations: AtomicUsize::new(0),
            unregister_latency: Mutex::new(Duration::ZERO),
        })
    }

    /// Make every following `register()` call fail.
    pub fn set_registration_failing(&self, failing: bool) {
        self.fail_register.store(failing, Ordering::SeqCst);
    }

    /// Make every following `unregister()` call fail.
    pub fn set_unregistration_failing(&self, failing: bool) {
        self.fail_unregister.store(failing, Ordering::SeqCst);
    }

    /// Delay every following `unregister()` call. Uses tokio virtual time.
    pub fn set_unregister_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.unregister_latency.lock() {
            *slot = latency;
        }
    }

    /// Total successful registrations over the sensor's lifetime.
    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Currently registered callbacks for `kind`.
    pub fn subscriber_count(&self, kind: MetricKind) -> usize {
        self.subscriptions
            .lock()
            .map(|subs| subs.values().filter(|(k, _)| *k == kind).count())
            .unwrap_or(0)
    }

    /// Deliver a sample to every callback registered for `kind`.
    /// Returns the number of callbacks invoked.
    pub fn emit(&self, kind: MetricKind, value: f64, accuracy: Option<HeartRateAccuracy>) -> usize {
        self.dispatch(
            kind,
            SensorEvent::Sample {
                kind,
                value,
                accuracy,
            },
        )
    }

    pub fn emit_availability(&self, kind: MetricKind, availability: Availability) -> usize {
        self.dispatch(kind, SensorEvent::Availability { kind, availability })
    }

    fn dispatch(&self, kind: MetricKind, event: SensorEvent) -> usize {
        // Callbacks run outside the lock so they may unregister themselves.
        let callbacks: Vec<SharedCallback> = match self.subscriptions.lock() {
            Ok(subs) => subs
                .values()
                .filter(|(k, _)| *k == kind)
                .map(|(_, cb)| Arc::clone(cb))
                .collect(),
            Err(_) => return 0,
        };
        for callback in &callbacks {
            callback(event.clone());
        }
        callbacks.len()
    }

    /// Spawn a task that feeds plausible heart rate and cumulative step
    /// samples every `period`.
    pub fn spawn_feed(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let sensor = Arc::clone(self);
        tokio::spawn(async move {
            let mut bpm: f64 = 72.0;
            let mut steps: f64 = 0.0;
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let accuracy = {
                    let mut rng = rand::thread_rng();
                    bpm = (bpm + rng.gen_range(-3.0..3.0)).clamp(50.0, 160.0);
                    steps += rng.gen_range(0.0..12.0);
                    if rng.gen_bool(0.8) {
                        HeartRateAccuracy::AccuracyHigh
                    } else {
                        HeartRateAccuracy::AccuracyMedium
                    }
                };
                sensor.emit(MetricKind::HeartRate, bpm, Some(accuracy));
                sensor.emit(MetricKind::Steps, steps, None);
            }
        })
    }
}

#[async_trait]
impl SensorClient for SimSensor {
    async fn capabilities(&self) -> Result<Vec<MetricKind>, SourceError> {
        Ok(self.capabilities.clone())
    }

    async fn register(
        &self,
        kind: MetricKind,
        callback: SampleCallback,
    ) -> Result<SubscriptionId, SourceError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(SourceError::Subscription(format!(
                "simulated registration failure for {}",
                kind
            )));
        }
        if !self.capabilities.contains(&kind) {
            return Err(SourceError::Unavailable(format!("{} is not supported", kind)));
        }
        let id = Uuid::new_v4();
        let mut subs = self
            .subscriptions
            .lock()
            .map_err(|_| SourceError::Subscription("subscription table poisoned".into()))?;
        subs.insert(id, (kind, Arc::from(callback)));
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn unregister(&self, kind: MetricKind, id: SubscriptionId) -> Result<(), SourceError> {
        let latency = self.unregister_latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(SourceError::Subscription(format!(
                "simulated unregistration failure for {}",
                kind
            )));
        }
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.remove(&id);
        }
        Ok(())
    }
}

/// A simulated health store backed by an in-memory record list.
#[derive(Default)]
pub struct SimHealthStore {
    records: Mutex<Vec<HealthRecord>>,
    failing: AtomicBool,
    queries: AtomicUsize,
}

impl SimHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: HealthRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    /// Make every following query fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of queries received, failed ones included.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthStore for SimHealthStore {
    async fn read_records(
        &self,
        record_type: RecordType,
        range: TimeRange,
    ) -> Result<Vec<HealthRecord>, SourceError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::Query("simulated store failure".into()));
        }
        let records = self
            .records
            .lock()
            .map_err(|_| SourceError::Query("record list poisoned".into()))?;
        Ok(records
            .iter()
            .filter(|r| r.record_type() == record_type && range.overlaps(r.start(), r.end()))
            .cloned()
            .collect())
    }
}
