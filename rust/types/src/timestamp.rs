use cdc_error::{CdcError, ErrorCodes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Number of low-order bits holding the logical counter.
pub const LOGICAL_BITS: u32 = 18;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// A hybrid logical timestamp as issued by the upstream cluster's time
/// oracle: wall-clock milliseconds in the high 46 bits and a logical
/// counter in the low 18 bits.
///
/// A timestamp used as a checkpoint is an exclusive lower data boundary:
/// versions at or after it are needed, versions strictly before it are not.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    pub fn compose(physical_millis: u64, logical: u64) -> Self {
        Timestamp((physical_millis << LOGICAL_BITS) | (logical & LOGICAL_MASK))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn physical_millis(&self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    pub fn logical(&self) -> u64 {
        self.0 & LOGICAL_MASK
    }

    /// Wall-clock instant of the physical component. `None` only for
    /// values beyond chrono's representable range.
    pub fn physical_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.physical_millis() as i64)
    }

    /// The last timestamp whose data a checkpoint at `self` does not need.
    /// Wraps at zero: a zero checkpoint has no such timestamp and maps to
    /// `Timestamp::MAX`, which is never behind a safepoint nor in the past.
    pub fn wrapping_prev(&self) -> Timestamp {
        Timestamp(self.0.wrapping_sub(1))
    }

    /// Wall-clock distance from `earlier` to `self`, zero when `earlier` is
    /// not actually earlier.
    pub fn physical_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(
            self.physical_millis()
                .saturating_sub(earlier.physical_millis()),
        )
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp::compose(millis, 0)
    }
}

impl From<u64> for Timestamp {
    fn from(ts: u64) -> Self {
        Timestamp(ts)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
#[error("Invalid timestamp [{input}]: {source}")]
pub struct ParseTimestampError {
    input: String,
    source: std::num::ParseIntError,
}

impl CdcError for ParseTimestampError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

impl std::str::FromStr for Timestamp {
    type Err = ParseTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Timestamp)
            .map_err(|source| ParseTimestampError {
                input: s.to_string(),
                source,
            })
    }
}
