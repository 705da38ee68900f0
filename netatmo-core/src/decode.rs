//! Pure transforms from API response bodies into domain objects.
//!
//! Nothing in here performs I/O, logs, or recovers from errors: a body that
//! does not have the expected shape surfaces as a typed failure carrying the
//! raw payload.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

pub mod measurements;
pub mod station;

pub use measurements::{decode_measurements, decode_measurements_with_types};
pub use station::decode_station_data;

/// Deserialize a wire DTO out of a generic JSON tree.
fn from_tree<T: DeserializeOwned>(body: &serde_json::Value, what: &str) -> Result<T> {
    T::deserialize(body).map_err(|e| Error::malformed(format!("invalid {what}: {e}"), body))
}

fn epoch_to_utc(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
}
