//! Per-metric source adapter
//!
//! A [`SourceAdapter`] produces the current value of one metric. Heart rate
//! and steps come from a sensor subscription, calories and sleep stage from
//! range queries against a health store. Whenever the real source is missing
//! or a store query fails, the adapter substitutes simulated data for that
//! tick only; the next tick tries the real source again.

use std::sync::Arc;

use chrono::{DateTime, Days, Local, TimeZone, Utc};
use rand::Rng;

use super::transport::{
    HealthRecord, HealthStore, RecordType, SensorClient, SensorEvent, SubscriptionId, TimeRange,
};
use super::SourceError;
use crate::metric::{HeartRateAccuracy, MetricKind, Observation, Reading, SleepStage};

/// Platform sleep stage codes.
pub mod stage_code {
    pub const UNKNOWN: i32 = 0;
    pub const AWAKE: i32 = 1;
    pub const SLEEPING: i32 = 2;
    pub const OUT_OF_BED: i32 = 3;
    pub const LIGHT: i32 = 4;
    pub const DEEP: i32 = 5;
    pub const REM: i32 = 6;
    pub const AWAKE_IN_BED: i32 = 7;
}

/// Map a platform sleep stage code to the relayed stage.
pub fn map_stage_code(code: i32) -> SleepStage {
    match code {
        stage_code::DEEP => SleepStage::DeepSleep,
        stage_code::LIGHT => SleepStage::LightSleep,
        stage_code::REM => SleepStage::Rem,
        stage_code::AWAKE => SleepStage::Awake,
        stage_code::SLEEPING => SleepStage::LightSleep,
        stage_code::OUT_OF_BED => SleepStage::Awake,
        _ => SleepStage::Unknown,
    }
}

/// Local midnight `days_back` days before `now`, in UTC.
///
/// When midnight falls in a DST gap the day starts at the first local hour
/// that exists.
pub fn day_start<Tz: TimeZone>(now: &DateTime<Tz>, days_back: u64) -> DateTime<Utc> {
    let date = now.date_naive() - Days::new(days_back);
    (0..=2)
        .filter_map(|hour| date.and_hms_opt(hour, 0, 0))
        .find_map(|local| local.and_local_timezone(now.timezone()).earliest())
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc))
}

/// `[midnight today, now)`
pub fn calories_window<Tz: TimeZone>(now: &DateTime<Tz>) -> TimeRange {
    TimeRange::new(day_start(now, 0), now.with_timezone(&Utc))
}

/// `[midnight yesterday, now)`
pub fn sleep_window<Tz: TimeZone>(now: &DateTime<Tz>) -> TimeRange {
    TimeRange::new(day_start(now, 1), now.with_timezone(&Utc))
}

/// Sum of active kilocalories recorded inside `range`.
pub async fn fetch_calories(store: &dyn HealthStore, range: TimeRange) -> Result<f64, SourceError> {
    let records = store.read_records(RecordType::ActiveCalories, range).await?;
    Ok(records
        .iter()
        .filter_map(|record| match record {
            HealthRecord::ActiveCalories { kilocalories, .. } => Some(*kilocalories),
            _ => None,
        })
        .sum())
}

/// Stage of the most recent sleep session overlapping `range`.
pub async fn fetch_sleep_stage(
    store: &dyn HealthStore,
    range: TimeRange,
) -> Result<SleepStage, SourceError> {
    let sessions = store.read_records(RecordType::SleepSession, range).await?;
    let latest_session = sessions
        .iter()
        .filter(|record| matches!(record, HealthRecord::SleepSession { .. }))
        .max_by_key(|record| record.end());

    let Some(session) = latest_session else {
        return Ok(SleepStage::Awake);
    };

    let session_range = TimeRange::new(session.start(), session.end());
    let stages = store.read_records(RecordType::SleepStage, session_range).await?;
    let latest_stage = stages
        .iter()
        .filter_map(|record| match record {
            HealthRecord::SleepStage { end, stage, .. } => Some((*end, *stage)),
            _ => None,
        })
        .max_by_key(|(end, _)| *end);

    Ok(match latest_stage {
        Some((_, code)) => map_stage_code(code),
        None => SleepStage::Sleeping,
    })
}

pub fn simulate_heart_rate<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(55.0..110.0)
}

pub fn simulate_steps<R: Rng + ?Sized>(previous: i64, rng: &mut R) -> i64 {
    previous + rng.gen_range(0..25)
}

/// Previous total plus a uniform increment in `[1.0, 5.0)`.
pub fn simulate_calories<R: Rng + ?Sized>(previous: f64, rng: &mut R) -> f64 {
    previous + rng.gen_range(1.0..5.0)
}

pub fn simulate_sleep_stage<R: Rng + ?Sized>(rng: &mut R) -> SleepStage {
    SleepStage::SIMULATED[rng.gen_range(0..SleepStage::SIMULATED.len())]
}

/// Convert a pushed sensor sample into the tracked observation.
pub fn observation_from_sample(
    kind: MetricKind,
    value: f64,
    accuracy: Option<HeartRateAccuracy>,
) -> Observation {
    match kind {
        MetricKind::HeartRate => Observation {
            reading: Reading::Float(value),
            accuracy: Some(accuracy.unwrap_or(HeartRateAccuracy::Unknown)),
        },
        // Cumulative totals are truncated, not rounded.
        MetricKind::Steps => Observation::new(Reading::Int(value.trunc() as i64)),
        MetricKind::Calories => Observation::new(Reading::Float(value)),
        MetricKind::SleepStage => Observation::new(Reading::Text(value.to_string())),
    }
}

/// Produces values for one metric kind.
pub struct SourceAdapter {
    kind: MetricKind,
    sensor: Option<Arc<dyn SensorClient>>,
    store: Option<Arc<dyn HealthStore>>,
}

impl SourceAdapter {
    pub fn new(
        kind: MetricKind,
        sensor: Option<Arc<dyn SensorClient>>,
        store: Option<Arc<dyn HealthStore>>,
    ) -> Self {
        Self {
            kind,
            sensor,
            store,
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// True if values for this metric arrive through a sensor subscription.
    /// Otherwise the tracker refreshes the value on every tick.
    pub fn subscribes(&self) -> bool {
        self.kind.is_push() && self.sensor.is_some()
    }

    /// Subscribe to the sensor stream for this metric.
    ///
    /// `on_observation` runs on the sensor's delivery path for every sample.
    /// Availability changes are only logged.
    pub async fn subscribe(
        &self,
        on_observation: Box<dyn Fn(Observation) + Send + Sync>,
    ) -> Result<SubscriptionId, SourceError> {
        let sensor = self.sensor.as_ref().ok_or_else(|| {
            SourceError::Unavailable(format!("no sensor client for {}", self.kind))
        })?;

        let kind = self.kind;
        sensor
            .register(
                kind,
                Box::new(move |event| match event {
                    SensorEvent::Sample {
                        kind: sample_kind,
                        value,
                        accuracy,
                    } if sample_kind == kind => {
                        let observation = observation_from_sample(kind, value, accuracy);
                        log::debug!("{} received: {}", kind, observation.reading);
                        on_observation(observation);
                    }
                    SensorEvent::Availability {
                        kind: event_kind,
                        availability,
                    } => {
                        log::debug!("Availability changed for {}: {:?}", event_kind, availability);
                    }
                    SensorEvent::Sample { .. } => {}
                }),
            )
            .await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), SourceError> {
        match &self.sensor {
            Some(sensor) => sensor.unregister(self.kind, id).await,
            None => Ok(()),
        }
    }

    /// Compute this tick's value. Never fails: store errors are logged and
    /// replaced with simulated data.
    pub async fn refresh(&self, previous: Option<&Reading>) -> Observation {
        match self.kind {
            MetricKind::HeartRate => {
                let bpm = simulate_heart_rate(&mut rand::thread_rng());
                log::debug!("Heart rate updated (simulated): {:.1}", bpm);
                Observation::with_accuracy(Reading::Float(bpm), HeartRateAccuracy::Unknown)
            }
            MetricKind::Steps => {
                let prev = previous.and_then(Reading::as_i64).unwrap_or(0);
                let steps = simulate_steps(prev, &mut rand::thread_rng());
                log::debug!("Steps updated (simulated): {}", steps);
                Observation::new(Reading::Int(steps))
            }
            MetricKind::Calories => {
                let result = match &self.store {
                    Some(store) => {
                        fetch_calories(store.as_ref(), calories_window(&Local::now())).await
                    }
                    None => Err(SourceError::Unavailable("no health store configured".into())),
                };
                let total = match result {
                    Ok(total) => {
                        log::debug!("Calories fetched from health store: {:.1} kcal", total);
                        total
                    }
                    Err(e) => {
                        log_fallback(self.kind, &e);
                        let prev = previous.and_then(Reading::as_f64).unwrap_or(0.0);
                        simulate_calories(prev, &mut rand::thread_rng())
                    }
                };
                Observation::new(Reading::Float(total))
            }
            MetricKind::SleepStage => {
                let result = match &self.store {
                    Some(store) => {
                        fetch_sleep_stage(store.as_ref(), sleep_window(&Local::now())).await
                    }
                    None => Err(SourceError::Unavailable("no health store configured".into())),
                };
                let stage = match result {
                    Ok(stage) => {
                        log::debug!("Sleep stage fetched from health store: {}", stage);
                        stage
                    }
                    Err(e) => {
                        log_fallback(self.kind, &e);
                        simulate_sleep_stage(&mut rand::thread_rng())
                    }
                };
                Observation::new(stage.into())
            }
        }
    }
}

fn log_fallback(kind: MetricKind, error: &SourceError) {
    match error {
        SourceError::Unavailable(_) => log::debug!("Simulating {}: {}", kind, error),
        _ => log::warn!("Error fetching {} data, simulating: {}", kind, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::simulated::SimHealthStore;
    use chrono::{Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, Timelike};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(map_stage_code(stage_code::DEEP), SleepStage::DeepSleep);
        assert_eq!(map_stage_code(stage_code::LIGHT), SleepStage::LightSleep);
        assert_eq!(map_stage_code(stage_code::REM), SleepStage::Rem);
        assert_eq!(map_stage_code(stage_code::AWAKE), SleepStage::Awake);
        assert_eq!(map_stage_code(stage_code::SLEEPING), SleepStage::LightSleep);
        assert_eq!(map_stage_code(stage_code::OUT_OF_BED), SleepStage::Awake);
        assert_eq!(map_stage_code(stage_code::UNKNOWN), SleepStage::Unknown);
        assert_eq!(map_stage_code(stage_code::AWAKE_IN_BED), SleepStage::Unknown);
        assert_eq!(map_stage_code(42), SleepStage::Unknown);
    }

    #[test]
    fn test_windows_start_at_local_midnight() {
        let now = at(14, 30);
        let window = calories_window(&now);
        assert_eq!(window.start, at(0, 0));
        assert_eq!(window.end, now);

        let window = sleep_window(&now);
        assert_eq!(window.start, at(0, 0) - Duration::days(1));

        // 02:00 at UTC+3 is 23:00 the previous day in UTC; midnight is local.
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let local_now = offset.with_ymd_and_hms(2026, 3, 10, 2, 0, 0).unwrap();
        let window = calories_window(&local_now);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 3, 9, 21, 0, 0).unwrap());
    }

    /// UTC, except that local midnight is skipped straight to 01:00.
    #[derive(Clone, Copy, Debug)]
    struct MidnightGap;

    impl TimeZone for MidnightGap {
        type Offset = FixedOffset;

        fn from_offset(_: &FixedOffset) -> Self {
            MidnightGap
        }

        fn offset_from_local_date(&self, _: &NaiveDate) -> LocalResult<FixedOffset> {
            LocalResult::Single(FixedOffset::east_opt(0).unwrap())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            if local.hour() == 0 {
                LocalResult::None
            } else {
                LocalResult::Single(FixedOffset::east_opt(0).unwrap())
            }
        }

        fn offset_from_utc_date(&self, _: &NaiveDate) -> FixedOffset {
            FixedOffset::east_opt(0).unwrap()
        }

        fn offset_from_utc_datetime(&self, _: &NaiveDateTime) -> FixedOffset {
            FixedOffset::east_opt(0).unwrap()
        }
    }

    #[test]
    fn test_window_skips_missing_midnight() {
        let now = MidnightGap.from_utc_datetime(&at(14, 30).naive_utc());
        let window = calories_window(&now);
        assert_eq!(window.start, at(1, 0));
        assert_eq!(window.end, at(14, 30));
    }

    #[test]
    fn test_calories_fallback_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for previous in [0.0, 12.5, 900.0] {
            for _ in 0..200 {
                let next = simulate_calories(previous, &mut rng);
                assert!(next >= previous + 1.0 && next < previous + 5.0, "{}", next);
            }
        }
    }

    #[test]
    fn test_sleep_fallback_only_picks_core_stages() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let stage = simulate_sleep_stage(&mut rng);
            assert!(SleepStage::SIMULATED.contains(&stage));
        }
    }

    #[test]
    fn test_steps_sample_is_truncated() {
        let obs = observation_from_sample(MetricKind::Steps, 1234.9, None);
        assert_eq!(obs.reading, Reading::Int(1234));
        assert_eq!(obs.accuracy, None);

        let obs = observation_from_sample(MetricKind::HeartRate, 71.0, None);
        assert_eq!(obs.accuracy_label(), "UNKNOWN");
    }

    #[tokio::test]
    async fn test_calories_sum_replaces_total() {
        let store = SimHealthStore::new();
        store.insert(HealthRecord::ActiveCalories {
            start: at(8, 0),
            end: at(9, 0),
            kilocalories: 120.5,
        });
        store.insert(HealthRecord::ActiveCalories {
            start: at(12, 0),
            end: at(12, 30),
            kilocalories: 80.0,
        });
        // Yesterday's record is outside today's window.
        store.insert(HealthRecord::ActiveCalories {
            start: at(8, 0) - Duration::days(1),
            end: at(9, 0) - Duration::days(1),
            kilocalories: 999.0,
        });

        let total = fetch_calories(&store, calories_window(&at(14, 0))).await.unwrap();
        assert!((total - 200.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sleep_uses_latest_stage_of_latest_session() {
        let store = SimHealthStore::new();
        let yesterday_night = at(0, 0) - Duration::hours(2);
        store.insert(HealthRecord::SleepSession {
            start: yesterday_night - Duration::hours(20),
            end: yesterday_night - Duration::hours(18),
        });
        store.insert(HealthRecord::SleepSession {
            start: yesterday_night,
            end: at(6, 0),
        });
        store.insert(HealthRecord::SleepStage {
            start: at(4, 0),
            end: at(5, 0),
            stage: stage_code::DEEP,
        });
        store.insert(HealthRecord::SleepStage {
            start: at(5, 0),
            end: at(6, 0),
            stage: stage_code::REM,
        });

        let stage = fetch_sleep_stage(&store, sleep_window(&at(9, 0))).await.unwrap();
        assert_eq!(stage, SleepStage::Rem);
    }

    #[tokio::test]
    async fn test_session_without_stages_is_sleeping() {
        let store = SimHealthStore::new();
        store.insert(HealthRecord::SleepSession {
            start: at(1, 0),
            end: at(6, 0),
        });
        // Stage outside the session is ignored.
        store.insert(HealthRecord::SleepStage {
            start: at(7, 0),
            end: at(8, 0),
            stage: stage_code::DEEP,
        });

        let stage = fetch_sleep_stage(&store, sleep_window(&at(9, 0))).await.unwrap();
        assert_eq!(stage, SleepStage::Sleeping);
    }

    #[tokio::test]
    async fn test_no_session_is_awake() {
        let store = SimHealthStore::new();
        let stage = fetch_sleep_stage(&store, sleep_window(&at(9, 0))).await.unwrap();
        assert_eq!(stage, SleepStage::Awake);
    }

    #[tokio::test]
    async fn test_failing_store_falls_back_for_one_tick() {
        let store = Arc::new(SimHealthStore::new());
        store.set_failing(true);
        let adapter = SourceAdapter::new(MetricKind::Calories, None, Some(store.clone()));

        let obs = adapter.refresh(Some(&Reading::Float(10.0))).await;
        let value = obs.reading.as_f64().unwrap();
        assert!((11.0..15.0).contains(&value));

        // Not sticky: the next refresh reads the store again.
        store.set_failing(false);
        let obs = adapter.refresh(Some(&Reading::Float(value))).await;
        assert_eq!(obs.reading, Reading::Float(0.0));
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_store_simulates_sleep() {
        let adapter = SourceAdapter::new(MetricKind::SleepStage, None, None);
        let obs = adapter.refresh(None).await;
        let label = obs.reading.as_str().unwrap().to_string();
        assert!(SleepStage::SIMULATED.iter().any(|s| s.label() == label));
    }

    #[test]
    fn test_push_kinds_subscribe_only_with_sensor() {
        let adapter = SourceAdapter::new(MetricKind::HeartRate, None, None);
        assert!(!adapter.subscribes());
        let adapter = SourceAdapter::new(MetricKind::Calories, None, None);
        assert!(!adapter.subscribes());
    }
}
