//! Sort timestamp resolution for chats.
//!
//! Backends disagree on where a chat's date lives. In priority order:
//! `last_mes` (epoch milliseconds or a date string), then `file_date` /
//! `date`, then a date embedded in the file name. Anything unresolvable
//! sorts as the epoch.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::models::{ChatRecord, LastMes};

struct DatePatterns {
    /// `2024-01-01@10h00m00s`
    compact: Regex,
    /// `2024-1-1 @10h 00m 00s`
    spaced: Regex,
    /// `2024-01-01`
    date_only: Regex,
    /// `3:12pm` → needs a space before the meridiem for strict parsers
    meridiem: Regex,
}

static PATTERNS: OnceLock<DatePatterns> = OnceLock::new();

fn patterns() -> &'static DatePatterns {
    PATTERNS.get_or_init(|| DatePatterns {
        compact: Regex::new(r"(\d{4})-(\d{1,2})-(\d{1,2})@(\d{1,2})h(\d{1,2})m(\d{1,2})s")
            .expect("valid compact date regex"),
        spaced: Regex::new(
            r"(\d{4})-(\d{1,2})-(\d{1,2})\s*@\s*(\d{1,2})h\s*(\d{1,2})m\s*(\d{1,2})s",
        )
        .expect("valid spaced date regex"),
        date_only: Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("valid date regex"),
        meridiem: Regex::new(r"(?i)(\d)\s*(am|pm)\b").expect("valid meridiem regex"),
    })
}

const DATETIME_FORMATS: &[&str] = &[
    "%B %d, %Y %I:%M %p",
    "%B %d, %Y %I:%M:%S %p",
    "%b %d, %Y %I:%M %p",
    "%Y-%m-%d %I:%M %p",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y"];

fn naive_millis(naive: NaiveDateTime) -> i64 {
    Utc.from_utc_datetime(&naive).timestamp_millis()
}

/// Whether the name carries a `YYYY-MM-DD` date anywhere.
pub fn has_date(name: &str) -> bool {
    patterns().date_only.is_match(name)
}

/// Parse a human-written date the way a browser's `Date` constructor
/// would accept it. Naive times are taken as UTC.
pub fn parse_loose_date(input: &str) -> Option<i64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(number) = trimmed.parse::<f64>() {
        return (number.is_finite() && number > 0.0).then_some(number as i64);
    }

    let normalized = patterns().meridiem.replace_all(trimmed, "$1 $2");

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.timestamp_millis());
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(naive_millis(naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&normalized, format) {
            return date.and_hms_opt(0, 0, 0).map(naive_millis);
        }
    }

    dateparser::parse_with_timezone(&normalized, &Utc)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

fn captures_millis(re: &Regex, name: &str, with_time: bool) -> Option<i64> {
    let caps = re.captures(name)?;
    let field = |i: usize| -> Option<u32> { caps.get(i)?.as_str().parse().ok() };
    let year: i32 = caps.get(1)?.as_str().parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?;
    let naive = if with_time {
        date.and_hms_opt(field(4)?, field(5)?, field(6)?)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(naive_millis(naive))
}

/// Timestamp embedded in a chat file name, if any.
pub fn timestamp_from_file_name(name: &str) -> Option<i64> {
    let p = patterns();
    captures_millis(&p.compact, name, true)
        .or_else(|| captures_millis(&p.spaced, name, true))
        .or_else(|| captures_millis(&p.date_only, name, false))
}

fn last_mes_millis(last_mes: &LastMes) -> Option<i64> {
    match last_mes {
        LastMes::Epoch(ms) if ms.is_finite() && *ms > 0.0 => Some(*ms as i64),
        LastMes::Epoch(_) => None,
        LastMes::Text(text) => parse_loose_date(text),
    }
}

/// The timestamp a chat sorts by under "recent", in epoch milliseconds.
pub fn resolve_timestamp(record: &ChatRecord) -> i64 {
    record
        .last_mes
        .as_ref()
        .and_then(last_mes_millis)
        .or_else(|| record.file_date.as_deref().and_then(parse_loose_date))
        .or_else(|| record.date.as_deref().and_then(parse_loose_date))
        .or_else(|| timestamp_from_file_name(&record.file_name))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s)
            .single()
            .expect("valid date")
            .timestamp_millis()
    }

    #[test]
    fn test_file_name_patterns() {
        assert_eq!(
            timestamp_from_file_name("Seraphina - 2024-01-01@10h30m15s.jsonl"),
            Some(millis(2024, 1, 1, 10, 30, 15))
        );
        assert_eq!(
            timestamp_from_file_name("Seraphina - 2024-3-7 @09h 05m 01s 123ms.jsonl"),
            Some(millis(2024, 3, 7, 9, 5, 1))
        );
        assert_eq!(
            timestamp_from_file_name("2024-02-01.jsonl"),
            Some(millis(2024, 2, 1, 0, 0, 0))
        );
        assert_eq!(timestamp_from_file_name("no date here.jsonl"), None);
        // Month 13 is rejected rather than wrapped
        assert_eq!(timestamp_from_file_name("2024-13-01.jsonl"), None);
    }

    #[test]
    fn test_parse_loose_date_meridiem_spacing() {
        assert_eq!(
            parse_loose_date("January 15, 2024 3:12pm"),
            Some(millis(2024, 1, 15, 15, 12, 0))
        );
        assert_eq!(
            parse_loose_date("January 15, 2024 3:12 AM"),
            Some(millis(2024, 1, 15, 3, 12, 0))
        );
    }

    #[test]
    fn test_parse_loose_date_other_forms() {
        assert_eq!(parse_loose_date("1704103200000"), Some(1_704_103_200_000));
        assert_eq!(
            parse_loose_date("2024-01-01T10:00:00Z"),
            Some(millis(2024, 1, 1, 10, 0, 0))
        );
        assert_eq!(parse_loose_date("2024-03-01"), Some(millis(2024, 3, 1, 0, 0, 0)));
        assert_eq!(parse_loose_date(""), None);
        assert_eq!(parse_loose_date("not a date at all"), None);
    }

    #[test]
    fn test_resolution_order() {
        let mut record = ChatRecord {
            file_name: "2020-01-01@00h00m00s.jsonl".to_string(),
            date: Some("2021-01-01".to_string()),
            file_date: Some("2022-01-01".to_string()),
            last_mes: Some(LastMes::Epoch(millis(2023, 1, 1, 0, 0, 0) as f64)),
            ..Default::default()
        };
        assert_eq!(resolve_timestamp(&record), millis(2023, 1, 1, 0, 0, 0));

        record.last_mes = Some(LastMes::Text("garbage".to_string()));
        assert_eq!(resolve_timestamp(&record), millis(2022, 1, 1, 0, 0, 0));

        record.file_date = None;
        assert_eq!(resolve_timestamp(&record), millis(2021, 1, 1, 0, 0, 0));

        record.date = None;
        assert_eq!(resolve_timestamp(&record), millis(2020, 1, 1, 0, 0, 0));

        record.file_name = "untitled.jsonl".to_string();
        assert_eq!(resolve_timestamp(&record), 0);
    }

    #[test]
    fn test_has_date() {
        assert!(has_date("Chat 2024-05-06"));
        assert!(!has_date("chat_error"));
    }
}
