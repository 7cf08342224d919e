//! Schedule time helpers
//!
//! Broadcast times have minute granularity. Operator input is local wall
//! clock time in a reference zone; everything stored is UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::debug;

/// Display format for local times (`DD.MM.YYYY HH:MM`)
pub const LOCAL_FORMAT: &str = "%d.%m.%Y %H:%M";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Unrecognized date/time: '{0}'")]
    Unrecognized(String),

    #[error("Local time {0} does not exist in {1}")]
    NonexistentLocalTime(String, String),
}

/// One parse attempt in the ordered format list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    DateTime(&'static str),
    Date(&'static str),
    Rfc3339,
}

/// Accepted input formats, tried in order
const FORMATS: &[Format] = &[
    Format::DateTime("%d.%m.%Y %H:%M"),
    Format::Date("%d.%m.%Y"),
    Format::DateTime("%Y-%m-%d %H:%M"),
    Format::Date("%Y-%m-%d"),
    Format::Rfc3339,
    Format::DateTime("%H:%M %d.%m.%Y"),
];

/// Drop seconds and sub-second precision
pub fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}

/// Parse operator input into a UTC instant
///
/// The first format that parses wins. Date-only input means local midnight.
/// RFC 3339 input carries its own offset; every other format is read as wall
/// clock time in `tz`.
pub fn parse_schedule(input: &str, tz: Tz) -> Result<DateTime<Utc>, ScheduleError> {
    let input = input.trim();
    debug!(%input, %tz, "parse_schedule: called");

    for format in FORMATS {
        let naive = match *format {
            Format::DateTime(f) => NaiveDateTime::parse_from_str(input, f).ok(),
            Format::Date(f) => NaiveDate::parse_from_str(input, f)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN)),
            Format::Rfc3339 => {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
                    debug!("parse_schedule: matched rfc3339");
                    return Ok(parsed.with_timezone(&Utc));
                }
                None
            }
        };

        if let Some(naive) = naive {
            debug!(%naive, "parse_schedule: matched local format");
            return tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| ScheduleError::NonexistentLocalTime(naive.to_string(), tz.to_string()));
        }
    }

    debug!("parse_schedule: no format matched");
    Err(ScheduleError::Unrecognized(input.to_string()))
}

/// Render an instant as `DD.MM.YYYY HH:MM` in `tz`
pub fn format_local(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format(LOCAL_FORMAT).to_string()
}
