//! Conversions between SQLite column values and domain types.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use nesta_core::NestaError;

/// Format used for every timestamp column. Fixed width, so text order is time order.
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn storage_err(e: sqlx::Error) -> NestaError {
    NestaError::Storage(e.to_string())
}

/// Like [`storage_err`], but reports a unique-constraint violation as a
/// validation failure naming `what`.
pub fn insert_err(e: sqlx::Error, what: &str) -> NestaError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            NestaError::Validation(format!("{what} already exists"))
        }
        _ => storage_err(e),
    }
}

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn format_datetime_opt(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(format_datetime)
}

/// Parse a SQLite datetime text string into a `DateTime<Utc>`.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, NestaError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(NestaError::Storage(format!("failed to parse datetime: {s}")))
}

pub fn parse_datetime_opt(s: Option<&str>) -> Result<Option<DateTime<Utc>>, NestaError> {
    match s {
        Some(s) => Ok(Some(parse_datetime(s)?)),
        None => Ok(None),
    }
}

/// Parse a stored enum column. A value the domain does not know is a storage
/// fault, not a caller error.
pub fn parse_column<T>(s: &str) -> Result<T, NestaError>
where
    T: FromStr<Err = NestaError>,
{
    s.parse()
        .map_err(|e: NestaError| NestaError::Storage(e.to_string()))
}
