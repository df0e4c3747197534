//! Timestamp utilities
//!
//! Entity timestamps are persisted as nanoseconds since the Unix epoch so the
//! storage layer can compare them inside a single conditional write without
//! losing sub-millisecond ordering.

use chrono::{DateTime, TimeZone, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Timestamp as epoch milliseconds (broker lease bookkeeping)
pub fn to_epoch_millis(timestamp: &DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

/// Timestamp as epoch nanoseconds (entity storage representation)
///
/// # Errors
/// Returns `InvalidInput` outside the representable range (years 1677-2262).
pub fn to_epoch_nanos(timestamp: &DateTime<Utc>) -> Result<i64> {
    timestamp
        .timestamp_nanos_opt()
        .ok_or_else(|| Error::InvalidInput(format!("timestamp {} out of storable range", timestamp)))
}

/// Timestamp from epoch nanoseconds
pub fn from_epoch_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}
