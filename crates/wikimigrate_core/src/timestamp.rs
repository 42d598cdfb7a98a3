use chrono::NaiveDateTime;

use crate::error::InvalidTimestampError;

pub const COMPACT_TIMESTAMP_LEN: usize = 14;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Convert a MediaWiki `yyyymmddhhmmss` timestamp into `YYYY-MM-DDTHH:MM:SS`.
///
/// The conversion is positional only; the value is passed through as naive UTC.
pub fn to_iso8601(compact: &str) -> Result<String, InvalidTimestampError> {
    if compact.len() != COMPACT_TIMESTAMP_LEN || !compact.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidTimestampError(compact.to_string()));
    }
    Ok(format!(
        "{}-{}-{}T{}:{}:{}",
        &compact[0..4],
        &compact[4..6],
        &compact[6..8],
        &compact[8..10],
        &compact[10..12],
        &compact[12..14]
    ))
}

/// Seconds since the epoch for an ISO timestamp produced by [`to_iso8601`], read as UTC.
pub fn iso8601_to_unix(iso: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(iso, ISO_FORMAT)
        .ok()
        .map(|value| value.and_utc().timestamp())
}
