//! Value sources for the tracked metrics
//!
//! Provides the sensor and health-store traits, the per-metric
//! [`SourceAdapter`] that hides push/pull/simulated acquisition, and an
//! in-process simulator for both boundaries.

pub mod adapter;
pub mod simulated;
pub mod transport;

pub use adapter::{map_stage_code, SourceAdapter};
pub use simulated::{SimHealthStore, SimSensor};
pub use transport::{
    Availability, HealthRecord, HealthStore, RecordType, SampleCallback, SensorClient,
    SensorEvent, SubscriptionId, TimeRange,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Subscription error: {0}")]
    Subscription(String),
}
