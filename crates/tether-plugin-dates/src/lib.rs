//! Date arithmetic plugin.
//!
//! Timestamps cross the wire as RFC 3339 `timestamp` values. Layouts use the
//! `time` crate's format description syntax, for example
//! `[year]-[month]-[day]`.

use tether_plugins::server::{self, MethodTable, ServeError};
use time::format_description::{self, BorrowedFormatItem};
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime};

/// Name the plugin registers under and derives its handshake from.
pub const PLUGIN_NAME: &str = "dates";

const SECONDS_PER_DAY: i64 = 86_400;

/// Years an RFC 3339 timestamp can carry.
const WIRE_YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

fn layout(raw: &str) -> Result<Vec<BorrowedFormatItem<'_>>, String> {
    format_description::parse_borrowed::<2>(raw)
        .map_err(|err| format!("invalid layout '{raw}': {err}"))
}

fn within_wire_range(at: OffsetDateTime) -> Result<OffsetDateTime, String> {
    if WIRE_YEARS.contains(&at.year()) {
        Ok(at)
    } else {
        Err(format!("{at} lies outside years 0000 to 9999"))
    }
}

/// Shifts `at` by a whole number of days, which may be negative.
///
/// # Errors
///
/// Fails when the result leaves the representable date range or falls
/// outside years 0000 to 9999.
pub fn add_days(at: OffsetDateTime, days: i64) -> Result<OffsetDateTime, String> {
    days.checked_mul(SECONDS_PER_DAY)
        .map(Duration::seconds)
        .and_then(|offset| at.checked_add(offset))
        .ok_or_else(|| format!("adding {days} days to {at} is out of range"))
        .and_then(within_wire_range)
}

/// Renders `at` with a format description.
///
/// # Errors
///
/// Fails for an invalid layout or one naming components `at` cannot supply.
pub fn format(at: OffsetDateTime, layout_text: String) -> Result<String, String> {
    let items = layout(&layout_text)?;
    at.format(&items).map_err(|err| err.to_string())
}

/// Parses `text` with a format description.
///
/// Layouts without an offset are read as UTC, and date-only layouts as UTC
/// midnight.
///
/// # Errors
///
/// Fails for an invalid layout, text that does not match it, or a year
/// outside 0000 to 9999.
pub fn parse(text: String, layout_text: String) -> Result<OffsetDateTime, String> {
    let items = layout(&layout_text)?;
    OffsetDateTime::parse(&text, &items)
        .or_else(|_| PrimitiveDateTime::parse(&text, &items).map(PrimitiveDateTime::assume_utc))
        .or_else(|_| Date::parse(&text, &items).map(|date| date.midnight().assume_utc()))
        .map_err(|err| format!("'{text}' does not match '{layout_text}': {err}"))
        .and_then(within_wire_range)
}

/// Whole days from `start` to `end`; negative when `end` is earlier.
#[must_use]
pub fn between(start: OffsetDateTime, end: OffsetDateTime) -> i64 {
    (end - start).whole_days()
}

/// Builds the method table served by the binary.
#[must_use]
pub fn method_table() -> MethodTable {
    MethodTable::new(PLUGIN_NAME, env!("CARGO_PKG_VERSION"))
        .fallible("AddDays", "Adds days to a given date.", add_days)
        .fallible("Format", "Formats a date with a layout.", format)
        .fallible("Parse", "Parses a date string with a layout.", parse)
        .infallible(
            "Between",
            "Counts the whole days between two dates.",
            between,
        )
}

/// Serves the dates plugin until the host terminates the process.
///
/// # Errors
///
/// Returns [`ServeError`] when run outside a host or when the listener
/// cannot start.
pub fn run() -> Result<(), ServeError> {
    server::run_plugin(method_table())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use time::macros::datetime;

    use super::*;

    #[rstest]
    #[case::forward(datetime!(2024-01-30 12:00 UTC), 3, datetime!(2024-02-02 12:00 UTC))]
    #[case::backward(datetime!(2024-03-01 00:00 UTC), -1, datetime!(2024-02-29 00:00 UTC))]
    fn add_days_shifts_whole_days(
        #[case] at: OffsetDateTime,
        #[case] days: i64,
        #[case] expected: OffsetDateTime,
    ) {
        assert_eq!(add_days(at, days).expect("in range"), expected);
    }

    #[test]
    fn add_days_rejects_overflow() {
        let err = add_days(datetime!(2024-01-01 00:00 UTC), i64::MAX).expect_err("overflow");
        assert!(err.contains("out of range"), "{err}");
    }

    #[test]
    fn add_days_stays_within_rfc3339_years() {
        let err = add_days(datetime!(2024-01-01 00:00 UTC), -800_000).expect_err("year -0167");
        assert!(err.contains("outside years 0000 to 9999"), "{err}");
    }

    #[test]
    fn format_and_parse_agree() {
        let at = datetime!(2024-05-17 00:00 UTC);
        let text = format(at, String::from("[year]-[month]-[day]")).expect("format");
        assert_eq!(text, "2024-05-17");
        let parsed = parse(text, String::from("[year]-[month]-[day]")).expect("parse");
        assert_eq!(parsed, at);
    }

    #[test]
    fn parse_reports_mismatch() {
        let err = parse(String::from("yesterday"), String::from("[year]-[month]-[day]"))
            .expect_err("mismatch");
        assert!(err.contains("does not match"), "{err}");
        assert!(format(datetime!(2024-01-01 00:00 UTC), String::from("[bogus")).is_err());
    }

    #[test]
    fn between_counts_whole_days() {
        let start = datetime!(2024-01-01 00:00 UTC);
        let end = datetime!(2024-01-10 23:59 UTC);
        assert_eq!(between(start, end), 9);
        assert_eq!(between(end, start), -9);
    }
}
