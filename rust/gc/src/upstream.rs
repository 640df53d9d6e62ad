use async_trait::async_trait;
use cdc_config::registry::Injectable;
use cdc_error::{CdcError, ErrorCodes};
use cdc_types::Timestamp;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),
    #[error("Upstream request timed out")]
    Timeout,
    #[error("Upstream rejected request: {0}")]
    Rejected(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl CdcError for UpstreamError {
    fn code(&self) -> ErrorCodes {
        match self {
            UpstreamError::Unavailable(_) => ErrorCodes::Unavailable,
            UpstreamError::Timeout => ErrorCodes::DeadlineExceeded,
            UpstreamError::Rejected(_) => ErrorCodes::FailedPrecondition,
        }
    }
}

/// Cluster-wide registry of per-service GC retention requirements.
#[async_trait]
pub trait SafepointService: Debug + Send + Sync {
    /// Registers or refreshes `service_id`'s requirement that versions at or
    /// after `safepoint` be retained for `ttl`, and returns the minimum over
    /// all live registrations. The result can exceed `safepoint` when the
    /// upstream has already collected past it, in which case the
    /// registration is refused.
    ///
    /// A zero `ttl` removes the registration.
    async fn update_service_gc_safepoint(
        &self,
        service_id: &str,
        ttl: Duration,
        safepoint: Timestamp,
    ) -> Result<Timestamp, UpstreamError>;
}

/// Source of the upstream cluster's current time.
#[async_trait]
pub trait TimeOracle: Debug + Send + Sync {
    async fn current_time(&self) -> Result<Timestamp, UpstreamError>;
}

/// Handles to the upstream cluster a `GcManager` talks to. Registered in
/// the config registry by whoever owns the upstream connection.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub safepoint_service: Arc<dyn SafepointService>,
    pub time_oracle: Arc<dyn TimeOracle>,
}

impl Upstream {
    pub fn new(
        safepoint_service: Arc<dyn SafepointService>,
        time_oracle: Arc<dyn TimeOracle>,
    ) -> Self {
        Self {
            safepoint_service,
            time_oracle,
        }
    }
}

impl Injectable for Upstream {}
