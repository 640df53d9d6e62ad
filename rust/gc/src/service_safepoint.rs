use crate::upstream::{SafepointService, UpstreamError};
use backon::{ExponentialBuilder, Retryable};
use cdc_error::{CdcError, ErrorCodes};
use cdc_types::{ChangeFeedId, Timestamp};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SetServiceGcSafepointError {
    #[error("Service safepoint update cancelled")]
    Cancelled,
    #[error("Failed to update service safepoint: {0}")]
    Upstream(#[from] UpstreamError),
}

impl CdcError for SetServiceGcSafepointError {
    fn code(&self) -> ErrorCodes {
        match self {
            SetServiceGcSafepointError::Cancelled => ErrorCodes::Cancelled,
            SetServiceGcSafepointError::Upstream(err) => err.code(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EnsureStartTsSafetyError {
    #[error("Failed to protect start ts: {0}")]
    SetServiceSafepoint(#[from] SetServiceGcSafepointError),
    #[error("Start ts {start_ts} is before the gc safepoint {safepoint}")]
    StartTsBeforeGc {
        start_ts: Timestamp,
        safepoint: Timestamp,
    },
}

impl CdcError for EnsureStartTsSafetyError {
    fn code(&self) -> ErrorCodes {
        match self {
            EnsureStartTsSafetyError::SetServiceSafepoint(err) => err.code(),
            EnsureStartTsSafetyError::StartTsBeforeGc { .. } => ErrorCodes::FailedPrecondition,
        }
    }
}

/// Service id of the short-lived registration that protects a changefeed's
/// start ts while it is being created or resumed.
pub fn creating_service_id(service_id: &str, changefeed_id: &ChangeFeedId) -> String {
    format!(
        "{service_id}-creating-{}_{}",
        changefeed_id.namespace, changefeed_id.id
    )
}

/// Pushes one service safepoint to the upstream, retrying retryable errors
/// with `backoff`. Cancelling `cancel` abandons the in-flight attempt and any
/// pending backoff sleep.
pub async fn set_service_gc_safepoint(
    service: &dyn SafepointService,
    cancel: &CancellationToken,
    backoff: ExponentialBuilder,
    service_id: &str,
    ttl: Duration,
    safepoint: Timestamp,
) -> Result<Timestamp, SetServiceGcSafepointError> {
    let update = (move || async move {
        service
            .update_service_gc_safepoint(service_id, ttl, safepoint)
            .await
    })
    .retry(backoff)
    .when(UpstreamError::is_retryable)
    .notify(|err: &UpstreamError, delay: Duration| {
        tracing::warn!(
            service_id,
            safepoint = %safepoint,
            error = %err,
            retry_in = ?delay,
            "Updating service gc safepoint failed, retrying"
        );
    });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SetServiceGcSafepointError::Cancelled),
        result = update => result.map_err(SetServiceGcSafepointError::from),
    }
}

/// Removes a service safepoint. A zero ttl is the upstream's deletion
/// convention; the maximum timestamp keeps the request from ever holding GC
/// back should the upstream briefly retain it.
pub async fn remove_service_gc_safepoint(
    service: &dyn SafepointService,
    cancel: &CancellationToken,
    backoff: ExponentialBuilder,
    service_id: &str,
) -> Result<(), SetServiceGcSafepointError> {
    set_service_gc_safepoint(
        service,
        cancel,
        backoff,
        service_id,
        Duration::ZERO,
        Timestamp::MAX,
    )
    .await
    .map(|_| ())
}
