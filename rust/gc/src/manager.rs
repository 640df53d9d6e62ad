//! Keeps the upstream cluster from garbage-collecting versions that live
//! changefeeds still need, without letting a dead changefeed pin GC forever.
//!
//! The manager registers one service safepoint on behalf of every changefeed
//! on this capture cluster. The owner loop calls
//! [`GcManager::try_update_gc_safepoint`] on every tick with the minimum
//! checkpoint across changefeeds; the manager rate limits the upstream
//! pushes and caches the effective cluster-wide safepoint returned by the
//! upstream. That cached value gates changefeed resumes
//! ([`GcManager::check_stale_checkpoint_ts`]). Failed changefeeds whose
//! checkpoint falls behind the fixed retention window stop contributing to
//! the minimum ([`GcManager::ignore_failed_changefeed`]).

use crate::config::GcManagerConfig;
use crate::metrics::GcManagerMetrics;
use crate::service_safepoint::{
    creating_service_id, remove_service_gc_safepoint, set_service_gc_safepoint,
    EnsureStartTsSafetyError, SetServiceGcSafepointError,
};
use crate::upstream::{Upstream, UpstreamError};
use async_trait::async_trait;
use backon::ExponentialBuilder;
use cdc_config::{registry::Registry, Configurable};
use cdc_error::{CdcError, ErrorCodes};
use cdc_types::{ChangeFeedId, Timestamp};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// How long the data of a failed changefeed is retained before its
/// checkpoint stops holding back the gc safepoint.
pub const FAILED_FEED_DATA_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum spacing between two non-forced safepoint pushes.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TryUpdateGcSafepointError {
    #[error("Safepoint update cancelled")]
    Cancelled,
    #[error("Service safepoint could not be updated within the gc ttl: {0}")]
    UpdateServiceSafepointFailed(#[source] UpstreamError),
}

impl CdcError for TryUpdateGcSafepointError {
    fn code(&self) -> ErrorCodes {
        match self {
            TryUpdateGcSafepointError::Cancelled => ErrorCodes::Cancelled,
            TryUpdateGcSafepointError::UpdateServiceSafepointFailed(_) => ErrorCodes::Unavailable,
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckStaleCheckpointError {
    #[error("Stale checkpoint check cancelled")]
    Cancelled,
    #[error(
        "Snapshot of changefeed {changefeed_id} lost by gc: checkpoint {checkpoint_ts} is not after gc safepoint {safepoint}"
    )]
    SnapshotLostByGc {
        changefeed_id: ChangeFeedId,
        checkpoint_ts: Timestamp,
        safepoint: Timestamp,
    },
}

impl CdcError for CheckStaleCheckpointError {
    fn code(&self) -> ErrorCodes {
        match self {
            CheckStaleCheckpointError::Cancelled => ErrorCodes::Cancelled,
            CheckStaleCheckpointError::SnapshotLostByGc { .. } => ErrorCodes::FailedPrecondition,
        }
    }
}

#[derive(Debug)]
struct SafepointState {
    last_update_attempt: Option<Instant>,
    last_success: Instant,
    last_safepoint: Timestamp,
}

pub struct GcManager {
    service_id: String,
    gc_ttl: Duration,
    update_interval: Duration,
    backoff: ExponentialBuilder,
    upstream: Upstream,
    state: Mutex<SafepointState>,
    metrics: GcManagerMetrics,
}

impl std::fmt::Debug for GcManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcManager")
            .field("service_id", &self.service_id)
            .field("gc_ttl", &self.gc_ttl)
            .field("update_interval", &self.update_interval)
            .finish()
    }
}

impl GcManager {
    pub fn new(service_id: impl Into<String>, gc_ttl: Duration, upstream: Upstream) -> Self {
        Self {
            service_id: service_id.into(),
            gc_ttl,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            backoff: ExponentialBuilder::default(),
            upstream,
            state: Mutex::new(SafepointState {
                last_update_attempt: None,
                last_success: Instant::now(),
                last_safepoint: Timestamp::ZERO,
            }),
            metrics: GcManagerMetrics::new(),
        }
    }

    /// Overrides the push rate limit. Production callers keep the default.
    pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    async fn lock_state(
        &self,
        cancel: &CancellationToken,
    ) -> Option<MutexGuard<'_, SafepointState>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            state = self.state.lock() => Some(state),
        }
    }

    /// Last safepoint confirmed by the upstream, `Timestamp::ZERO` before
    /// the first successful push.
    pub async fn last_safepoint(&self) -> Timestamp {
        self.state.lock().await.last_safepoint
    }

    /// Registers `checkpoint_ts` as this service's safepoint unless a push
    /// happened less than the update interval ago and `force_update` is
    /// unset.
    ///
    /// Push failures are tolerated until the last successful push is older
    /// than the gc ttl: past that point the upstream may already have
    /// dropped our registration and data we need could be collected, so the
    /// failure is returned and must be treated as fatal by the caller.
    #[instrument(skip(self, cancel))]
    pub async fn try_update_gc_safepoint(
        &self,
        cancel: &CancellationToken,
        checkpoint_ts: Timestamp,
        force_update: bool,
    ) -> Result<(), TryUpdateGcSafepointError> {
        let mut state = self
            .lock_state(cancel)
            .await
            .ok_or(TryUpdateGcSafepointError::Cancelled)?;

        if !force_update
            && state
                .last_update_attempt
                .is_some_and(|attempt| attempt.elapsed() < self.update_interval)
        {
            self.metrics.push_skipped.add(1, &[]);
            return Ok(());
        }
        state.last_update_attempt = Some(Instant::now());
        self.metrics.push_attempts.add(1, &[]);

        let started_at = Instant::now();
        let result = set_service_gc_safepoint(
            self.upstream.safepoint_service.as_ref(),
            cancel,
            self.backoff,
            &self.service_id,
            self.gc_ttl,
            checkpoint_ts,
        )
        .await;
        self.metrics
            .push_duration_ms
            .record(
                u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                &[],
            );

        let actual = match result {
            Ok(actual) => actual,
            Err(SetServiceGcSafepointError::Cancelled) => {
                return Err(TryUpdateGcSafepointError::Cancelled);
            }
            Err(SetServiceGcSafepointError::Upstream(err)) => {
                self.metrics.push_failures.add(1, &[]);
                tracing::warn!(
                    safepoint = %checkpoint_ts,
                    error = %err,
                    "Updating gc safepoint failed"
                );
                if state.last_success.elapsed() >= self.gc_ttl {
                    self.metrics.fatal_push_failures.add(1, &[]);
                    tracing::error!(
                        safepoint = %checkpoint_ts,
                        last_safepoint = %state.last_safepoint,
                        gc_ttl = ?self.gc_ttl,
                        "Gc safepoint has not been updated within the gc ttl"
                    );
                    return Err(TryUpdateGcSafepointError::UpdateServiceSafepointFailed(err));
                }
                return Ok(());
            }
        };

        if actual == checkpoint_ts {
            tracing::info!(gc_safepoint = %checkpoint_ts, "Updated gc safepoint");
        }
        if actual > checkpoint_ts {
            tracing::warn!(
                actual = %actual,
                checkpoint_ts = %checkpoint_ts,
                "Upstream gc safepoint is larger than the requested checkpoint"
            );
        }
        state.last_safepoint = actual;
        state.last_success = Instant::now();
        self.metrics.effective_safepoint.record(actual.as_u64(), &[]);
        Ok(())
    }

    /// Fails when the data a changefeed needs to continue from
    /// `checkpoint_ts` may already have been collected upstream.
    #[instrument(skip(self, cancel))]
    pub async fn check_stale_checkpoint_ts(
        &self,
        cancel: &CancellationToken,
        changefeed_id: &ChangeFeedId,
        checkpoint_ts: Timestamp,
    ) -> Result<(), CheckStaleCheckpointError> {
        let state = self
            .lock_state(cancel)
            .await
            .ok_or(CheckStaleCheckpointError::Cancelled)?;
        // Data at checkpoint_ts is needed, everything strictly before is not.
        let upper_bound = checkpoint_ts.wrapping_prev();
        if upper_bound < state.last_safepoint {
            return Err(CheckStaleCheckpointError::SnapshotLostByGc {
                changefeed_id: changefeed_id.clone(),
                checkpoint_ts,
                safepoint: state.last_safepoint,
            });
        }
        Ok(())
    }

    /// Whether a failed or paused changefeed has fallen so far behind that
    /// it should no longer hold back the gc safepoint.
    ///
    /// Answers `false` whenever the upstream time cannot be read.
    #[instrument(skip(self, cancel))]
    pub async fn ignore_failed_changefeed(
        &self,
        cancel: &CancellationToken,
        checkpoint_ts: Timestamp,
    ) -> bool {
        let now = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(service_id = %self.service_id, "Reading upstream time cancelled");
                return false;
            }
            now = self.upstream.time_oracle.current_time() => now,
        };
        let now = match now {
            Ok(now) => now,
            Err(err) => {
                tracing::warn!(
                    service_id = %self.service_id,
                    error = %err,
                    "Failed to read upstream time"
                );
                return false;
            }
        };
        now.physical_since(checkpoint_ts.wrapping_prev()) > FAILED_FEED_DATA_RETENTION
    }

    /// Protects `start_ts` with a dedicated registration while a changefeed
    /// is being created or resumed, before its checkpoint is folded into the
    /// regular service safepoint.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_changefeed_start_ts_safety(
        &self,
        cancel: &CancellationToken,
        changefeed_id: &ChangeFeedId,
        ttl: Duration,
        start_ts: Timestamp,
    ) -> Result<(), EnsureStartTsSafetyError> {
        let min_service_safepoint = set_service_gc_safepoint(
            self.upstream.safepoint_service.as_ref(),
            cancel,
            self.backoff,
            &creating_service_id(&self.service_id, changefeed_id),
            ttl,
            start_ts,
        )
        .await?;
        // A start ts equal to the safepoint would pass registration but then
        // be rejected by check_stale_checkpoint_ts.
        if start_ts > Timestamp::ZERO && start_ts <= min_service_safepoint {
            return Err(EnsureStartTsSafetyError::StartTsBeforeGc {
                start_ts,
                safepoint: min_service_safepoint,
            });
        }
        Ok(())
    }

    #[instrument(skip(self, cancel))]
    pub async fn undo_ensure_changefeed_start_ts_safety(
        &self,
        cancel: &CancellationToken,
        changefeed_id: &ChangeFeedId,
    ) -> Result<(), SetServiceGcSafepointError> {
        remove_service_gc_safepoint(
            self.upstream.safepoint_service.as_ref(),
            cancel,
            self.backoff,
            &creating_service_id(&self.service_id, changefeed_id),
        )
        .await
    }
}

#[async_trait]
impl Configurable<GcManagerConfig> for GcManager {
    async fn try_from_config(
        config: &GcManagerConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn CdcError>> {
        config.validate().map_err(|e| e.boxed())?;
        let upstream = registry.get::<Upstream>().map_err(|e| e.boxed())?;
        Ok(
            GcManager::new(config.service_id.clone(), config.gc_ttl, upstream)
                .with_backoff((&config.retry).into()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_upstream::{InMemorySafepointService, TestTimeOracle};
    use proptest::prelude::*;
    use std::sync::Arc;
    use tracing_test::traced_test;

    const TTL: Duration = Duration::from_secs(10);

    struct Harness {
        manager: GcManager,
        service: InMemorySafepointService,
        oracle: TestTimeOracle,
    }

    fn harness() -> Harness {
        let service = InMemorySafepointService::new();
        let oracle = TestTimeOracle::new(Timestamp::compose(1_700_000_000_000, 0));
        let upstream = Upstream::new(Arc::new(service.clone()), Arc::new(oracle.clone()));
        let manager = GcManager::new("ticdc-test", TTL, upstream)
            .with_update_interval(Duration::from_millis(100))
            .with_backoff(ExponentialBuilder::default().with_max_times(0));
        Harness {
            manager,
            service,
            oracle,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_within_interval_is_skipped() {
        let h = harness();
        let cancel = CancellationToken::new();
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(20), false)
            .await
            .unwrap();
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(30), false)
            .await
            .unwrap();
        assert_eq!(h.service.calls(), 1);
        assert_eq!(h.manager.last_safepoint().await, Timestamp(20));

        tokio::time::advance(Duration::from_millis(100)).await;
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(30), false)
            .await
            .unwrap();
        assert_eq!(h.service.calls(), 2);
        assert_eq!(h.manager.last_safepoint().await, Timestamp(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_update_always_pushes() {
        let h = harness();
        let cancel = CancellationToken::new();
        for ts in [10, 20, 30] {
            h.manager
                .try_update_gc_safepoint(&cancel, Timestamp(ts), true)
                .await
                .unwrap();
            assert_eq!(h.manager.last_safepoint().await, Timestamp(ts));
        }
        assert_eq!(h.service.calls(), 3);
        let requests = h.service.requests();
        assert_eq!(requests[2].service_id, "ticdc-test");
        assert_eq!(requests[2].ttl, TTL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_effective_below_requested_is_cached() {
        let h = harness();
        h.service
            .register("br-backup", Duration::from_secs(600), Timestamp(15));
        h.manager
            .try_update_gc_safepoint(&CancellationToken::new(), Timestamp(40), true)
            .await
            .unwrap();
        assert_eq!(h.manager.last_safepoint().await, Timestamp(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_tolerated_until_gc_ttl() {
        let h = harness();
        let cancel = CancellationToken::new();
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(10), true)
            .await
            .unwrap();

        h.service
            .fail_always(UpstreamError::Unavailable("pd unreachable".to_string()));
        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(20), true)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(1)).await;
        let err = h
            .manager
            .try_update_gc_safepoint(&cancel, Timestamp(20), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TryUpdateGcSafepointError::UpdateServiceSafepointFailed(_)
        ));
        assert_eq!(err.code(), ErrorCodes::Unavailable);
        assert_eq!(h.manager.last_safepoint().await, Timestamp(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_window() {
        let h = harness();
        let cancel = CancellationToken::new();
        h.service.fail_next(1, UpstreamError::Timeout);
        tokio::time::advance(TTL / 2).await;
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(10), true)
            .await
            .unwrap();
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(11), true)
            .await
            .unwrap();

        h.service.fail_always(UpstreamError::Timeout);
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert!(h
            .manager
            .try_update_gc_safepoint(&cancel, Timestamp(12), true)
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_outage_past_ttl() {
        let h = harness();
        let cancel = CancellationToken::new();
        h.service.fail_always(UpstreamError::Timeout);
        tokio::time::advance(TTL).await;
        assert!(matches!(
            h.manager
                .try_update_gc_safepoint(&cancel, Timestamp(10), true)
                .await,
            Err(TryUpdateGcSafepointError::UpdateServiceSafepointFailed(
                UpstreamError::Timeout
            ))
        ));

        h.service.clear_failures();
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(20), true)
            .await
            .unwrap();
        assert_eq!(h.manager.last_safepoint().await, Timestamp(20));

        h.service.fail_always(UpstreamError::Timeout);
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(30), true)
            .await
            .unwrap();
        assert_eq!(h.manager.last_safepoint().await, Timestamp(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_state_lock() {
        let h = harness();
        h.service.set_latency(Some(Duration::from_secs(5)));
        let manager = Arc::new(h.manager);

        let pusher = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .try_update_gc_safepoint(&CancellationToken::new(), Timestamp(10), true)
                    .await
            })
        };
        tokio::task::yield_now().await;
        // The slow push has reached the upstream and holds the lock.
        assert_eq!(h.service.calls(), 1);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let err = manager
            .try_update_gc_safepoint(&cancel, Timestamp(20), true)
            .await
            .unwrap_err();
        assert!(matches!(err, TryUpdateGcSafepointError::Cancelled));
        let err = manager
            .check_stale_checkpoint_ts(
                &cancel,
                &ChangeFeedId::with_default_namespace("queued"),
                Timestamp(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CheckStaleCheckpointError::Cancelled));
        assert_eq!(h.service.calls(), 1);

        pusher.await.unwrap().unwrap();
        assert_eq!(manager.last_safepoint().await, Timestamp(10));
        assert_eq!(h.service.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_effective_above_requested_only_warns() {
        let h = harness();
        h.service.override_effective(Some(Timestamp(99)));
        h.manager
            .try_update_gc_safepoint(&CancellationToken::new(), Timestamp(50), true)
            .await
            .unwrap();
        assert_eq!(h.manager.last_safepoint().await, Timestamp(99));
        assert!(logs_contain(
            "Upstream gc safepoint is larger than the requested checkpoint"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_push_leaves_success_state() {
        let h = harness();
        let cancel = CancellationToken::new();
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(10), true)
            .await
            .unwrap();

        h.service.set_latency(Some(Duration::from_secs(60)));
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let err = h
            .manager
            .try_update_gc_safepoint(&cancel, Timestamp(20), true)
            .await
            .unwrap_err();
        assert!(matches!(err, TryUpdateGcSafepointError::Cancelled));
        assert_eq!(h.manager.last_safepoint().await, Timestamp(10));

        // last_success still dates from the first push, so this failure is
        // past the ttl even though the cancelled attempt was more recent.
        h.service.set_latency(None);
        h.service.fail_always(UpstreamError::Timeout);
        tokio::time::advance(TTL - Duration::from_millis(500)).await;
        assert!(h
            .manager
            .try_update_gc_safepoint(&CancellationToken::new(), Timestamp(20), true)
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_stale_checkpoint_ts() {
        let h = harness();
        let cancel = CancellationToken::new();
        let changefeed_id = ChangeFeedId::with_default_namespace("orders");
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(100), true)
            .await
            .unwrap();

        let err = h
            .manager
            .check_stale_checkpoint_ts(&cancel, &changefeed_id, Timestamp(100))
            .await
            .unwrap_err();
        match err {
            CheckStaleCheckpointError::SnapshotLostByGc {
                checkpoint_ts,
                safepoint,
                ..
            } => {
                assert_eq!(checkpoint_ts, Timestamp(100));
                assert_eq!(safepoint, Timestamp(100));
            }
            other => panic!("unexpected error: {other}"),
        }
        h.manager
            .check_stale_checkpoint_ts(&cancel, &changefeed_id, Timestamp(101))
            .await
            .unwrap();
        h.manager
            .check_stale_checkpoint_ts(&cancel, &changefeed_id, Timestamp(102))
            .await
            .unwrap();
        // A zero checkpoint has no data behind it to lose.
        h.manager
            .check_stale_checkpoint_ts(&cancel, &changefeed_id, Timestamp::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_check_stale_before_any_push_accepts_zero() {
        let h = harness();
        h.manager
            .check_stale_checkpoint_ts(
                &CancellationToken::new(),
                &ChangeFeedId::with_default_namespace("fresh"),
                Timestamp::ZERO,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ignore_failed_changefeed() {
        let h = harness();
        let cancel = CancellationToken::new();
        let now = Timestamp::compose(1_700_000_000_000, 0);
        h.oracle.set_time(now);
        let hours_ago =
            |hours: u64| Timestamp::compose(now.physical_millis() - hours * 3_600_000, 0);

        // The checkpoint is one past the boundary the retention is measured from.
        let stale = Timestamp(hours_ago(25).as_u64() + 1);
        let recent = Timestamp(hours_ago(23).as_u64() + 1);
        assert!(h.manager.ignore_failed_changefeed(&cancel, stale).await);
        assert!(!h.manager.ignore_failed_changefeed(&cancel, recent).await);
        assert!(
            !h.manager
                .ignore_failed_changefeed(&cancel, Timestamp(hours_ago(24).as_u64() + 1))
                .await
        );
    }

    #[tokio::test]
    async fn test_zero_checkpoint_is_never_ignored() {
        let h = harness();
        let cancel = CancellationToken::new();
        h.manager
            .try_update_gc_safepoint(&cancel, Timestamp(100), true)
            .await
            .unwrap();
        h.oracle.advance(Duration::from_secs(48 * 60 * 60));
        assert!(
            !h.manager
                .ignore_failed_changefeed(&cancel, Timestamp::ZERO)
                .await
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_ignore_failed_changefeed_oracle_failure() {
        let h = harness();
        h.oracle
            .fail_with(Some(UpstreamError::Unavailable("pd down".to_string())));
        assert!(
            !h.manager
                .ignore_failed_changefeed(&CancellationToken::new(), Timestamp(1))
                .await
        );
        assert!(logs_contain("Failed to read upstream time"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignore_failed_changefeed_cancelled() {
        let h = harness();
        h.oracle.set_latency(Some(Duration::from_secs(10)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(
            !h.manager
                .ignore_failed_changefeed(&cancel, Timestamp(1))
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_start_ts_safety() {
        let h = harness();
        let cancel = CancellationToken::new();
        let changefeed_id = ChangeFeedId::new("default", "orders");
        h.service
            .register("br-backup", Duration::from_secs(600), Timestamp(100));

        let err = h
            .manager
            .ensure_changefeed_start_ts_safety(
                &cancel,
                &changefeed_id,
                Duration::from_secs(60),
                Timestamp(100),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnsureStartTsSafetyError::StartTsBeforeGc {
                start_ts: Timestamp(100),
                safepoint: Timestamp(100),
            }
        ));

        h.manager
            .ensure_changefeed_start_ts_safety(
                &cancel,
                &changefeed_id,
                Duration::from_secs(60),
                Timestamp(101),
            )
            .await
            .unwrap();
        let creating_id = "ticdc-test-creating-default_orders";
        assert_eq!(h.service.registration(creating_id), Some(Timestamp(101)));

        h.manager
            .undo_ensure_changefeed_start_ts_safety(&cancel, &changefeed_id)
            .await
            .unwrap();
        assert_eq!(h.service.registration(creating_id), None);
    }

    #[tokio::test]
    async fn test_try_from_config_uses_registered_upstream() {
        let service = InMemorySafepointService::new();
        let registry = Registry::new();
        registry.register(Upstream::new(
            Arc::new(service.clone()),
            Arc::new(TestTimeOracle::default()),
        ));
        let config = GcManagerConfig {
            service_id: "ticdc-from-config".to_string(),
            ..Default::default()
        };
        let manager = GcManager::try_from_config(&config, &registry)
            .await
            .unwrap();
        manager
            .try_update_gc_safepoint(&CancellationToken::new(), Timestamp(5), false)
            .await
            .unwrap();
        assert_eq!(service.requests()[0].service_id, "ticdc-from-config");
        assert_eq!(service.requests()[0].ttl, Duration::from_secs(86400));
    }

    #[tokio::test]
    async fn test_try_from_config_without_upstream() {
        let err = GcManager::try_from_config(&GcManagerConfig::default(), &Registry::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCodes::Internal);
    }

    proptest! {
        #[test]
        fn test_stale_iff_upper_bound_below_safepoint(
            safepoint in 1u64..1_000_000,
            checkpoint in 0u64..1_000_000,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let stale = runtime.block_on(async {
                let h = harness();
                let cancel = CancellationToken::new();
                h.manager
                    .try_update_gc_safepoint(&cancel, Timestamp(safepoint), true)
                    .await
                    .unwrap();
                h.manager
                    .check_stale_checkpoint_ts(
                        &cancel,
                        &ChangeFeedId::with_default_namespace("prop"),
                        Timestamp(checkpoint),
                    )
                    .await
                    .is_err()
            });
            prop_assert_eq!(stale, checkpoint.wrapping_sub(1) < safepoint);
        }
    }
}
