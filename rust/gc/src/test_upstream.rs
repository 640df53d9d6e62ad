//! In-memory stand-ins for the upstream cluster, used by tests and by the
//! simulator in `gc_safepoint_tool`.

use crate::upstream::{SafepointService, TimeOracle, UpstreamError};
use async_trait::async_trait;
use cdc_types::Timestamp;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub service_id: String,
    pub ttl: Duration,
    pub safepoint: Timestamp,
}

#[derive(Debug)]
struct Registration {
    safepoint: Timestamp,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct SafepointServiceState {
    registrations: HashMap<String, Registration>,
    requests: Vec<PushRequest>,
    fail_next: usize,
    fail_always: bool,
    failure: Option<UpstreamError>,
    latency: Option<Duration>,
    effective_override: Option<Timestamp>,
    gc_safepoint: Option<Timestamp>,
}

impl SafepointServiceState {
    fn prune_expired(&mut self, now: Instant) {
        self.registrations.retain(|_, r| r.expires_at > now);
    }

    fn min_registered(&self) -> Option<Timestamp> {
        self.registrations.values().map(|r| r.safepoint).min()
    }

    fn effective(&self) -> Option<Timestamp> {
        match (self.min_registered(), self.gc_safepoint) {
            (Some(registered), Some(gc)) => Some(registered.min(gc)),
            (registered, gc) => registered.or(gc),
        }
    }

    fn take_failure(&mut self) -> Option<UpstreamError> {
        let failure = self
            .failure
            .clone()
            .unwrap_or_else(|| UpstreamError::Unavailable("injected failure".to_string()));
        if self.fail_always {
            return Some(failure);
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Some(failure);
        }
        None
    }
}

/// Multi-tenant safepoint registry with TTL expiry driven by tokio's clock,
/// so tests running on paused time see registrations lapse on `advance`.
#[derive(Debug, Clone, Default)]
pub struct InMemorySafepointService {
    state: Arc<Mutex<SafepointServiceState>>,
}

impl InMemorySafepointService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a requirement for another tenant without counting it as a
    /// request.
    pub fn register(&self, service_id: &str, ttl: Duration, safepoint: Timestamp) {
        self.state.lock().registrations.insert(
            service_id.to_string(),
            Registration {
                safepoint,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn registration(&self, service_id: &str) -> Option<Timestamp> {
        let mut state = self.state.lock();
        state.prune_expired(Instant::now());
        state.registrations.get(service_id).map(|r| r.safepoint)
    }

    /// Number of update requests received, including failed ones.
    pub fn calls(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn requests(&self) -> Vec<PushRequest> {
        self.state.lock().requests.clone()
    }

    pub fn fail_next(&self, n: usize, failure: UpstreamError) {
        let mut state = self.state.lock();
        state.fail_next = n;
        state.failure = Some(failure);
    }

    pub fn fail_always(&self, failure: UpstreamError) {
        let mut state = self.state.lock();
        state.fail_always = true;
        state.failure = Some(failure);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_always = false;
        state.fail_next = 0;
        state.failure = None;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Advances the cluster's own GC progress towards `candidate`, held back
    /// by live registrations, the way the storage layer's GC worker does.
    /// Updates below the resulting point are not registered and are answered
    /// with it.
    pub fn run_gc(&self, candidate: Timestamp) -> Timestamp {
        let mut state = self.state.lock();
        state.prune_expired(Instant::now());
        let bound = state
            .min_registered()
            .map_or(candidate, |registered| registered.min(candidate));
        let next = state.gc_safepoint.map_or(bound, |current| current.max(bound));
        state.gc_safepoint = Some(next);
        next
    }

    /// Forces the effective safepoint returned by successful updates,
    /// including values that break the `effective <= requested` contract.
    pub fn override_effective(&self, effective: Option<Timestamp>) {
        self.state.lock().effective_override = effective;
    }
}

#[async_trait]
impl SafepointService for InMemorySafepointService {
    async fn update_service_gc_safepoint(
        &self,
        service_id: &str,
        ttl: Duration,
        safepoint: Timestamp,
    ) -> Result<Timestamp, UpstreamError> {
        let latency = {
            let mut state = self.state.lock();
            state.requests.push(PushRequest {
                service_id: service_id.to_string(),
                ttl,
                safepoint,
            });
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        if let Some(failure) = state.take_failure() {
            return Err(failure);
        }
        let now = Instant::now();
        state.prune_expired(now);
        if let Some(gc_safepoint) = state.gc_safepoint {
            if !ttl.is_zero() && safepoint < gc_safepoint {
                return Ok(gc_safepoint);
            }
        }
        if ttl.is_zero() {
            state.registrations.remove(service_id);
        } else {
            state.registrations.insert(
                service_id.to_string(),
                Registration {
                    safepoint,
                    expires_at: now + ttl,
                },
            );
        }
        if let Some(effective) = state.effective_override {
            return Ok(effective);
        }
        Ok(state.effective().unwrap_or(safepoint))
    }
}

#[derive(Debug, Default)]
struct TimeOracleState {
    now: Timestamp,
    failure: Option<UpstreamError>,
    latency: Option<Duration>,
}

/// Time oracle whose reading is set explicitly by the test.
#[derive(Debug, Clone, Default)]
pub struct TestTimeOracle {
    state: Arc<Mutex<TimeOracleState>>,
}

impl TestTimeOracle {
    pub fn new(now: Timestamp) -> Self {
        let oracle = Self::default();
        oracle.set_time(now);
        oracle
    }

    pub fn now(&self) -> Timestamp {
        self.state.lock().now
    }

    pub fn set_time(&self, now: Timestamp) {
        self.state.lock().now = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        let physical = state.now.physical_millis() + by.as_millis() as u64;
        state.now = Timestamp::compose(physical, state.now.logical());
    }

    pub fn fail_with(&self, failure: Option<UpstreamError>) {
        self.state.lock().failure = failure;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }
}

#[async_trait]
impl TimeOracle for TestTimeOracle {
    async fn current_time(&self) -> Result<Timestamp, UpstreamError> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let state = self.state.lock();
        match &state.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(state.now),
        }
    }
}
