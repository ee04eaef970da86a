//! tracker/mod.rs
//!
//! A [`MetricTracker`] owns one metric's latest value, its sensor
//! subscription and its periodic send loop.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped --start()--> Running   (subscribe if push, spawn loop)
//! Running --stop()---> Stopped   (unsubscribe, clear value, abort + join loop)
//! ```
//!
//! Start and stop are serialized through an async lifecycle lock, so two
//! concurrent `start()` calls never produce two subscriptions or two loops.
//! The state flag and latest value sit together behind one mutex; the push
//! callback only stores a value while the tracker is running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::metric::{MetricKind, MonitoringState, Observation, Reading};
use crate::relay::Relay;
use crate::source::{SourceAdapter, SourceError, SubscriptionId};

/// Callback invoked with every new observation of a metric.
pub type Observer = Arc<dyn Fn(&Observation) + Send + Sync>;

#[derive(Default)]
struct Snapshot {
    state: MonitoringState,
    latest: Option<Observation>,
}

/// State shared between the tracker, its loop task and the push callback.
struct Shared {
    kind: MetricKind,
    snapshot: Mutex<Snapshot>,
    observer: Mutex<Option<Observer>>,
    subscribers: Mutex<HashMap<Uuid, Observer>>,
}

impl Shared {
    fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            snapshot: Mutex::new(Snapshot::default()),
            observer: Mutex::new(None),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> MonitoringState {
        self.snapshot
            .lock()
            .map(|snap| snap.state)
            .unwrap_or(MonitoringState::Stopped)
    }

    fn latest(&self) -> Option<Observation> {
        self.snapshot.lock().ok().and_then(|snap| snap.latest.clone())
    }

    fn begin(&self, initial: Option<Reading>) {
        if let Ok(mut snap) = self.snapshot.lock() {
            snap.state = MonitoringState::Running;
            if snap.latest.is_none() {
                snap.latest = initial.map(Observation::new);
            }
        }
    }

    fn halt(&self) {
        if let Ok(mut snap) = self.snapshot.lock() {
            snap.state = MonitoringState::Stopped;
            snap.latest = None;
        }
    }

    /// Store `observation` and notify observers. Ignored once stopped, so a
    /// sample racing with `stop()` cannot resurrect a cleared value.
    fn publish(&self, observation: Observation) -> bool {
        match self.snapshot.lock() {
            Ok(mut snap) if snap.state == MonitoringState::Running => {
                snap.latest = Some(observation.clone());
            }
            _ => return false,
        }
        self.notify(&observation);
        true
    }

    fn notify(&self, observation: &Observation) {
        let mut observers: Vec<Observer> = Vec::new();
        if let Ok(slot) = self.observer.lock() {
            observers.extend(slot.iter().cloned());
        }
        if let Ok(subs) = self.subscribers.lock() {
            observers.extend(subs.values().cloned());
        }
        for observer in observers {
            observer(observation);
        }
        log::trace!("{} observers notified", self.kind);
    }
}

#[derive(Default)]
struct Lifecycle {
    subscription: Option<SubscriptionId>,
    loop_handle: Option<JoinHandle<()>>,
}

/// Tracks one metric: latest value, source subscription and send loop.
pub struct MetricTracker {
    kind: MetricKind,
    shared: Arc<Shared>,
    adapter: Arc<SourceAdapter>,
    relay: Relay,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl MetricTracker {
    pub fn new(adapter: SourceAdapter, relay: Relay) -> Self {
        let kind = adapter.kind();
        Self {
            kind,
            shared: Arc::new(Shared::new(kind)),
            adapter: Arc::new(adapter),
            relay,
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn state(&self) -> MonitoringState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == MonitoringState::Running
    }

    pub fn latest_value(&self) -> Option<Reading> {
        self.shared.latest().map(|obs| obs.reading)
    }

    pub fn latest_observation(&self) -> Option<Observation> {
        self.shared.latest()
    }

    /// Set the single observer slot, replacing any previous observer.
    pub fn observe<F>(&self, callback: F)
    where
        F: Fn(&Observation) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.shared.observer.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Add an observer alongside the single slot. Returns its handle.
    pub fn subscribe<F>(&self, callback: F) -> Uuid
    where
        F: Fn(&Observation) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        if let Ok(mut subs) = self.shared.subscribers.lock() {
            subs.insert(id, Arc::new(callback));
        }
        id
    }

    pub fn unsubscribe(&self, id: Uuid) {
        if let Ok(mut subs) = self.shared.subscribers.lock() {
            subs.remove(&id);
        }
    }

    /// Start monitoring.
    ///
    /// A failed sensor subscription is logged and returned, but the tracker
    /// still ends up `Running` with its loop active.
    pub async fn start(&self) -> Result<(), SourceError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.loop_handle.is_some() {
            log::debug!("{} monitoring already running", self.kind);
            return Ok(());
        }

        log::info!("Starting {} monitoring", self.kind);
        self.shared.begin(self.kind.initial_reading());

        let mut result = Ok(());
        if self.adapter.subscribes() {
            let shared = Arc::clone(&self.shared);
            let subscription = self
                .adapter
                .subscribe(Box::new(move |observation| {
                    shared.publish(observation);
                }))
                .await;
            match subscription {
                Ok(id) => lifecycle.subscription = Some(id),
                Err(e) => {
                    log::error!("Error registering for {} data: {}", self.kind, e);
                    result = Err(e);
                }
            }
        }

        lifecycle.loop_handle = Some(tokio::spawn(run_send_loop(
            self.kind,
            Arc::clone(&self.shared),
            Arc::clone(&self.adapter),
            self.relay.clone(),
        )));
        result
    }

    /// Stop monitoring. Returns once the send loop has exited; relay sends
    /// already in flight are left to finish.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;

        if let Some(id) = lifecycle.subscription.take() {
            if let Err(e) = self.adapter.unsubscribe(id).await {
                log::error!("Error unregistering {} callback: {}", self.kind, e);
            }
        }

        self.shared.halt();

        if let Some(handle) = lifecycle.loop_handle.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    log::error!("{} send loop panicked", self.kind);
                }
            }
            log::info!("Stopped {} monitoring", self.kind);
        }
    }
}

impl Drop for MetricTracker {
    fn drop(&mut self) {
        if let Some(handle) = self.lifecycle.get_mut().loop_handle.take() {
            handle.abort();
        }
    }
}

/// Sleep one interval, refresh pull values, relay whatever is present.
async fn run_send_loop(
    kind: MetricKind,
    shared: Arc<Shared>,
    adapter: Arc<SourceAdapter>,
    relay: Relay,
) {
    let period = kind.interval();
    loop {
        tokio::time::sleep(period).await;
        if shared.state() != MonitoringState::Running {
            break;
        }

        if !adapter.subscribes() {
            let previous = shared.latest().map(|obs| obs.reading);
            let observation = adapter.refresh(previous.as_ref()).await;
            shared.publish(observation);
        }

        // Dispatched, not awaited: a slow endpoint never delays the next wake.
        if let Some(observation) = shared.latest() {
            relay.send(kind, observation.reading);
        }
    }
}
