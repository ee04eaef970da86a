//! metric/mod.rs
//!
//! The closed set of tracked metrics and the values they carry.
//!
//! Every [`MetricKind`] maps to exactly one static [`MetricProfile`]: the send
//! interval, the relay endpoint suffix, the payload type and whether values are
//! pushed by a sensor stream or pulled from a health store. Adding a kind means
//! adding a profile, and every `match` on the kind stays exhaustive.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One of the four biometric signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    HeartRate,
    Steps,
    Calories,
    SleepStage,
}

/// How values for a metric reach its tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquisition {
    /// Samples arrive through a subscribed sensor stream.
    Push,
    /// The current value is queried over a time range on every tick.
    Pull,
}

/// The JSON type of the relayed `value` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadKind {
    Float,
    Int,
    Text,
}

/// Static acquisition and relay configuration for one metric.
#[derive(Clone, Copy, Debug)]
pub struct MetricProfile {
    pub interval: Duration,
    pub endpoint: &'static str,
    pub payload: PayloadKind,
    pub acquisition: Acquisition,
}

const HEART_RATE: MetricProfile = MetricProfile {
    interval: Duration::from_secs(5),
    endpoint: "/bpm",
    payload: PayloadKind::Float,
    acquisition: Acquisition::Push,
};

const STEPS: MetricProfile = MetricProfile {
    interval: Duration::from_secs(10),
    endpoint: "/steps",
    payload: PayloadKind::Int,
    acquisition: Acquisition::Push,
};

const CALORIES: MetricProfile = MetricProfile {
    interval: Duration::from_secs(180),
    endpoint: "/calories",
    payload: PayloadKind::Float,
    acquisition: Acquisition::Pull,
};

const SLEEP_STAGE: MetricProfile = MetricProfile {
    interval: Duration::from_secs(180),
    endpoint: "/sleep",
    payload: PayloadKind::Text,
    acquisition: Acquisition::Pull,
};

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::HeartRate,
        MetricKind::Steps,
        MetricKind::Calories,
        MetricKind::SleepStage,
    ];

    pub fn profile(self) -> &'static MetricProfile {
        match self {
            MetricKind::HeartRate => &HEART_RATE,
            MetricKind::Steps => &STEPS,
            MetricKind::Calories => &CALORIES,
            MetricKind::SleepStage => &SLEEP_STAGE,
        }
    }

    pub fn interval(self) -> Duration {
        self.profile().interval
    }

    pub fn endpoint(self) -> &'static str {
        self.profile().endpoint
    }

    pub fn is_push(self) -> bool {
        self.profile().acquisition == Acquisition::Push
    }

    /// Value a tracker holds right after `start()` when nothing was observed yet.
    pub fn initial_reading(self) -> Option<Reading> {
        match self {
            MetricKind::Steps => Some(Reading::Int(0)),
            MetricKind::Calories => Some(Reading::Float(0.0)),
            MetricKind::HeartRate | MetricKind::SleepStage => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MetricKind::HeartRate => "heart rate",
            MetricKind::Steps => "steps",
            MetricKind::Calories => "calories",
            MetricKind::SleepStage => "sleep",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single metric value.
///
/// Serialized untagged, so `Reading::Int(42)` becomes `42` on the wire.
/// `Int` is listed first so integral JSON numbers deserialize back as `Int`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Reading {
    pub fn payload_kind(&self) -> PayloadKind {
        match self {
            Reading::Int(_) => PayloadKind::Int,
            Reading::Float(_) => PayloadKind::Float,
            Reading::Text(_) => PayloadKind::Text,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Float(v) => Some(*v),
            Reading::Int(v) => Some(*v as f64),
            Reading::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Reading::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reading::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Int(v) => write!(f, "{}", v),
            Reading::Float(v) => write!(f, "{:.1}", v),
            Reading::Text(s) => f.write_str(s),
        }
    }
}

/// Sensor-reported confidence of a heart rate sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeartRateAccuracy {
    NoContact,
    Unreliable,
    AccuracyLow,
    AccuracyMedium,
    AccuracyHigh,
    Unknown,
}

impl HeartRateAccuracy {
    pub fn label(self) -> &'static str {
        match self {
            HeartRateAccuracy::NoContact => "NO_CONTACT",
            HeartRateAccuracy::Unreliable => "UNRELIABLE",
            HeartRateAccuracy::AccuracyLow => "ACCURACY_LOW",
            HeartRateAccuracy::AccuracyMedium => "ACCURACY_MEDIUM",
            HeartRateAccuracy::AccuracyHigh => "ACCURACY_HIGH",
            HeartRateAccuracy::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for HeartRateAccuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reported sleep state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SleepStage {
    DeepSleep,
    LightSleep,
    Rem,
    Awake,
    /// A sleep session exists but carries no stage breakdown.
    Sleeping,
    Unknown,
}

impl SleepStage {
    /// Stages the simulator picks from.
    pub const SIMULATED: [SleepStage; 4] = [
        SleepStage::DeepSleep,
        SleepStage::LightSleep,
        SleepStage::Rem,
        SleepStage::Awake,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SleepStage::DeepSleep => "DEEP_SLEEP",
            SleepStage::LightSleep => "LIGHT_SLEEP",
            SleepStage::Rem => "REM",
            SleepStage::Awake => "AWAKE",
            SleepStage::Sleeping => "SLEEPING",
            SleepStage::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SleepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<SleepStage> for Reading {
    fn from(stage: SleepStage) -> Self {
        Reading::Text(stage.label().to_string())
    }
}

/// The latest value of a metric as seen by observers.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub reading: Reading,
    /// Only heart rate samples carry an accuracy.
    pub accuracy: Option<HeartRateAccuracy>,
}

impl Observation {
    pub fn new(reading: Reading) -> Self {
        Self {
            reading,
            accuracy: None,
        }
    }

    pub fn with_accuracy(reading: Reading, accuracy: HeartRateAccuracy) -> Self {
        Self {
            reading,
            accuracy: Some(accuracy),
        }
    }

    /// Accuracy label, `UNKNOWN` when the source did not report one.
    pub fn accuracy_label(&self) -> &'static str {
        self.accuracy.unwrap_or(HeartRateAccuracy::Unknown).label()
    }
}

/// Lifecycle state of one tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MonitoringState {
    #[default]
    Stopped,
    Running,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_match_relay_contract() {
        assert_eq!(MetricKind::HeartRate.interval(), Duration::from_secs(5));
        assert_eq!(MetricKind::Steps.interval(), Duration::from_secs(10));
        assert_eq!(MetricKind::Calories.interval(), Duration::from_secs(180));
        assert_eq!(MetricKind::SleepStage.interval(), Duration::from_secs(180));

        let endpoints: Vec<_> = MetricKind::ALL.iter().map(|k| k.endpoint()).collect();
        assert_eq!(endpoints, vec!["/bpm", "/steps", "/calories", "/sleep"]);

        assert!(MetricKind::HeartRate.is_push());
        assert!(MetricKind::Steps.is_push());
        assert!(!MetricKind::Calories.is_push());
        assert!(!MetricKind::SleepStage.is_push());
    }

    #[test]
    fn test_reading_serializes_untagged() {
        let body = serde_json::json!({ "value": Reading::Float(72.5) });
        assert_eq!(body.to_string(), r#"{"value":72.5}"#);

        let body = serde_json::json!({ "value": Reading::Int(1200) });
        assert_eq!(body.to_string(), r#"{"value":1200}"#);

        let body = serde_json::json!({ "value": Reading::from(SleepStage::Rem) });
        assert_eq!(body.to_string(), r#"{"value":"REM"}"#);
    }

    #[test]
    fn test_integral_json_reads_back_as_int() {
        let reading: Reading = serde_json::from_str("42").unwrap();
        assert_eq!(reading, Reading::Int(42));
        let reading: Reading = serde_json::from_str("42.5").unwrap();
        assert_eq!(reading, Reading::Float(42.5));
    }

    #[test]
    fn test_missing_accuracy_is_unknown() {
        let obs = Observation::new(Reading::Float(61.0));
        assert_eq!(obs.accuracy_label(), "UNKNOWN");

        let obs = Observation::with_accuracy(Reading::Float(61.0), HeartRateAccuracy::AccuracyHigh);
        assert_eq!(obs.accuracy_label(), "ACCURACY_HIGH");
    }

    #[test]
    fn test_initial_readings() {
        assert_eq!(MetricKind::Steps.initial_reading(), Some(Reading::Int(0)));
        assert_eq!(MetricKind::Calories.initial_reading(), Some(Reading::Float(0.0)));
        assert_eq!(MetricKind::HeartRate.initial_reading(), None);
        assert_eq!(MetricKind::SleepStage.initial_reading(), None);
    }
}
