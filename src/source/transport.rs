//! Sensor and health-store trait definitions
//!
//! Defines the abstract platform interfaces that both the simulated sources
//! and real platform bindings conform to. A sensor pushes samples to
//! registered callbacks; a health store answers range queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SourceError;
use crate::metric::{HeartRateAccuracy, MetricKind};

pub type SubscriptionId = Uuid;

/// Callback invoked by a sensor for every event on a registered stream.
pub type SampleCallback = Box<dyn Fn(SensorEvent) + Send + Sync>;

/// Sensor-side availability of a data stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Available,
    Acquiring,
    Unavailable,
}

/// Something delivered by a push stream.
#[derive(Clone, Debug, PartialEq)]
pub enum SensorEvent {
    Sample {
        kind: MetricKind,
        value: f64,
        accuracy: Option<HeartRateAccuracy>,
    },
    Availability {
        kind: MetricKind,
        availability: Availability,
    },
}

/// Push-based sensor client.
#[async_trait]
pub trait SensorClient: Send + Sync {
    /// Metric kinds this device can stream.
    async fn capabilities(&self) -> Result<Vec<MetricKind>, SourceError>;

    /// Register a callback for a metric stream.
    async fn register(
        &self,
        kind: MetricKind,
        callback: SampleCallback,
    ) -> Result<SubscriptionId, SourceError>;

    /// Remove a previously registered callback.
    async fn unregister(&self, kind: MetricKind, id: SubscriptionId) -> Result<(), SourceError>;
}

/// Record types a health store can be queried for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    ActiveCalories,
    SleepSession,
    SleepStage,
}

/// Half-open interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// True if a record spanning `[start, end)` overlaps this range.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }
}

/// A timestamped record returned by a health store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum HealthRecord {
    ActiveCalories {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kilocalories: f64,
    },
    SleepSession {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    SleepStage {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        /// Platform stage code, see [`super::adapter::stage_code`].
        stage: i32,
    },
}

impl HealthRecord {
    pub fn record_type(&self) -> RecordType {
        match self {
            HealthRecord::ActiveCalories { .. } => RecordType::ActiveCalories,
            HealthRecord::SleepSession { .. } => RecordType::SleepSession,
            HealthRecord::SleepStage { .. } => RecordType::SleepStage,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        match self {
            HealthRecord::ActiveCalories { start, .. }
            | HealthRecord::SleepSession { start, .. }
            | HealthRecord::SleepStage { start, .. } => *start,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        match self {
            HealthRecord::ActiveCalories { end, .. }
            | HealthRecord::SleepSession { end, .. }
            | HealthRecord::SleepStage { end, .. } => *end,
        }
    }
}

/// Range-queryable health data store.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn read_records(
        &self,
        record_type: RecordType,
        range: TimeRange,
    ) -> Result<Vec<HealthRecord>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_time_range_overlaps() {
        let now = Utc::now();
        let range = TimeRange::new(now - Duration::hours(8), now);
        assert!(range.overlaps(now - Duration::hours(7), now - Duration::hours(1)));
        // Sessions that began before the window still count.
        assert!(range.overlaps(now - Duration::hours(9), now - Duration::hours(1)));
        assert!(!range.overlaps(now - Duration::hours(10), now - Duration::hours(9)));
        // Half-open: a record starting exactly at `end` is outside.
        assert!(!range.overlaps(now, now + Duration::minutes(1)));
    }

    #[test]
    fn test_record_accessors() {
        let now = Utc::now();
        let record = HealthRecord::SleepStage {
            start: now - Duration::minutes(30),
            end: now,
            stage: 5,
        };
        assert_eq!(record.record_type(), RecordType::SleepStage);
        assert_eq!(record.end(), now);
        assert_eq!(record.start(), now - Duration::minutes(30));
    }
}
