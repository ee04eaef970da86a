// healthrelay - Biometric acquisition and relay engine

pub mod config;
pub mod coordinator;
pub mod metric;
pub mod relay;
pub mod source;
pub mod tracker;

pub use config::RelayConfig;
pub use coordinator::{Coordinator, Measurement};
pub use metric::{MetricKind, MonitoringState, Observation, Reading};
pub use relay::{HttpTransport, MemoryTransport, Relay, RelayTransport};
pub use tracker::MetricTracker;
