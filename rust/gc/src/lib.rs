pub mod config;
pub mod manager;
mod metrics;
pub mod service_safepoint;
pub mod test_upstream;
pub mod upstream;

pub use config::{GcManagerConfig, GcManagerConfigError, RetryConfig};
pub use manager::{
    CheckStaleCheckpointError, GcManager, TryUpdateGcSafepointError, DEFAULT_UPDATE_INTERVAL,
    FAILED_FEED_DATA_RETENTION,
};
pub use service_safepoint::{EnsureStartTsSafetyError, SetServiceGcSafepointError};
pub use upstream::{SafepointService, TimeOracle, Upstream, UpstreamError};
