//! Parses the handful of time-range syntaxes the analysis request accepts
//! into a timezone-aware `(start, end)` pair.
//!
//! Mirrors the "accept a human string, fall back to a default unit/offset"
//! parsing style used for the metrics-collector duration strings in
//! [`crate::config`], but returns a typed error instead of defaulting
//! silently — the parser must never guess.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

use crate::error::AnalysisError;
use crate::models::TimeWindow;

/// Parses `text` into a `TimeWindow` using `default_offset` when the input
/// carries no explicit UTC offset.
pub fn parse(text: &str, default_offset: FixedOffset) -> Result<TimeWindow, AnalysisError> {
    let trimmed = text.trim();
    let (left_raw, right_raw) = split_on_first_tilde(trimmed).ok_or_else(|| AnalysisError::TimeParse {
        input: text.to_string(),
        reason: "expected a '~' separating start and end".to_string(),
    })?;

    let left = left_raw.trim();
    let right = right_raw.trim();
    if left.is_empty() || right.is_empty() {
        return Err(AnalysisError::TimeParse {
            input: text.to_string(),
            reason: "start or end half is empty".to_string(),
        });
    }

    let (left_date, left_time) = split_date_time(left).ok_or_else(|| AnalysisError::TimeParse {
        input: text.to_string(),
        reason: format!("could not split date/time in '{left}'"),
    })?;

    // The right half may omit its date, inheriting the left half's date.
    let (right_date, right_time) = match split_date_time(right) {
        Some((d, t)) => (d, t),
        None => (left_date.clone(), right.to_string()),
    };

    let start_date = parse_date(&left_date, text)?;
    let end_date = parse_date(&right_date, text)?;

    let start_time = parse_time(&left_time, text, false)?;
    let end_time = parse_time(&right_time, text, true)?;

    let start_naive = NaiveDateTime::new(start_date, start_time);
    let end_naive = NaiveDateTime::new(end_date, end_time);

    let start = resolve_offset(start_naive, default_offset, text)?;
    let end = resolve_offset(end_naive, default_offset, text)?;

    if start > end {
        return Err(AnalysisError::TimeParse {
            input: text.to_string(),
            reason: "start is after end".to_string(),
        });
    }

    Ok(TimeWindow::new(start, end))
}

/// Parses a bare `YYYY-MM-DD` (no `~`) as the whole day `00:00` to
/// `23:59:59`. Exposed separately since `parse` requires a `~`; callers that
/// accept either shape should try `parse` first, then this, per the tie-
/// break rule (full datetime beats abbreviated beats date-only).
pub fn parse_whole_day(text: &str, default_offset: FixedOffset) -> Result<TimeWindow, AnalysisError> {
    let trimmed = text.trim();
    let date = parse_date(trimmed, text)?;
    let start_naive = NaiveDateTime::new(date, NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    let end_naive = NaiveDateTime::new(date, NaiveTime::from_hms_opt(23, 59, 59).unwrap());
    let start = resolve_offset(start_naive, default_offset, text)?;
    let end = resolve_offset(end_naive, default_offset, text)?;
    Ok(TimeWindow::new(start, end))
}

/// Entry point used by the request validator: tries the richer `~`
/// syntax first (more specific), falls back to whole-day.
pub fn parse_any(text: &str, default_offset: FixedOffset) -> Result<TimeWindow, AnalysisError> {
    if text.contains('~') {
        parse(text, default_offset)
    } else {
        parse_whole_day(text, default_offset)
    }
}

fn split_on_first_tilde(s: &str) -> Option<(&str, &str)> {
    let idx = s.find('~')?;
    Some((&s[..idx], &s[idx + 1..]))
}

/// Splits `"2025-09-04_21:15"` or `"2025-09-04-21:15"` into
/// `("2025-09-04", "21:15")`. Returns `None` if there is no date prefix
/// (used to detect the abbreviated right-hand side).
fn split_date_time(s: &str) -> Option<(String, String)> {
    // A date prefix is exactly 10 chars of digits/hyphens: YYYY-MM-DD.
    if s.len() < 11 {
        return None;
    }
    let (maybe_date, rest) = s.split_at(10);
    if !is_date_shape(maybe_date) {
        return None;
    }
    let sep = rest.chars().next()?;
    if sep != '_' && sep != '-' {
        return None;
    }
    Some((maybe_date.to_string(), rest[1..].to_string()))
}

fn is_date_shape(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes[0..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}

fn parse_date(s: &str, original: &str) -> Result<NaiveDate, AnalysisError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| AnalysisError::TimeParse {
        input: original.to_string(),
        reason: format!("invalid date '{s}': {e}"),
    })
}

/// Parses a bare clock string (`HH:MM` or `HH:MM:SS`). `is_end` controls the
/// "23:59 means 23:59:59" inclusivity rule.
fn parse_time(s: &str, original: &str, is_end: bool) -> Result<NaiveTime, AnalysisError> {
    let parts: Vec<&str> = s.split(':').collect();
    let (hh, mm, ss) = match parts.as_slice() {
        [h, m] => (*h, *m, None),
        [h, m, sec] => (*h, *m, Some(*sec)),
        _ => {
            return Err(AnalysisError::TimeParse {
                input: original.to_string(),
                reason: format!("invalid clock time '{s}'"),
            })
        },
    };

    let hh: u32 = hh.parse().map_err(|_| AnalysisError::TimeParse {
        input: original.to_string(),
        reason: format!("invalid hour in '{s}'"),
    })?;
    let mm: u32 = mm.parse().map_err(|_| AnalysisError::TimeParse {
        input: original.to_string(),
        reason: format!("invalid minute in '{s}'"),
    })?;
    let ss: u32 = match ss {
        Some(sec) => sec.parse().map_err(|_| AnalysisError::TimeParse {
            input: original.to_string(),
            reason: format!("invalid seconds in '{s}'"),
        })?,
        None if is_end && hh == 23 && mm == 59 => 59,
        None => 0,
    };

    NaiveTime::from_hms_opt(hh, mm, ss).ok_or_else(|| AnalysisError::TimeParse {
        input: original.to_string(),
        reason: format!("clock time out of range '{s}'"),
    })
}

fn resolve_offset(
    naive: NaiveDateTime,
    default_offset: FixedOffset,
    original: &str,
) -> Result<DateTime<FixedOffset>, AnalysisError> {
    default_offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| AnalysisError::TimeParse {
            input: original.to_string(),
            reason: "ambiguous or invalid local time for the configured offset".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    #[test]
    fn abbreviated_end_time_inherits_date() {
        let w = parse("2025-09-04_21:15~21:30", jst()).unwrap();
        assert_eq!(w.start.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-09-04 21:15:00");
        assert_eq!(w.end.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-09-04 21:30:00");
    }

    #[test]
    fn full_endpoints() {
        let w = parse("2025-09-04_21:15~2025-09-05_21:30", jst()).unwrap();
        assert_eq!(w.start.format("%Y-%m-%d").to_string(), "2025-09-04");
        assert_eq!(w.end.format("%Y-%m-%d").to_string(), "2025-09-05");
    }

    #[test]
    fn whole_day_2359_is_inclusive() {
        let w = parse("2025-01-19_00:00~23:59", jst()).unwrap();
        assert_eq!(w.start.format("%H:%M:%S").to_string(), "00:00:00");
        assert_eq!(w.end.format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn bare_date_is_whole_day() {
        let w = parse_any("2025-01-19", jst()).unwrap();
        assert_eq!(w.start.format("%H:%M:%S").to_string(), "00:00:00");
        assert_eq!(w.end.format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn hyphen_separator_and_whitespace_tolerated() {
        let w = parse(" 2025-09-04-21:15 ~ 21:30 ", jst()).unwrap();
        assert_eq!(w.start.format("%H:%M").to_string(), "21:15");
    }

    #[test]
    fn seconds_component_accepted() {
        let w = parse("2025-09-04_21:15:05~21:30:10", jst()).unwrap();
        assert_eq!(w.start.format("%H:%M:%S").to_string(), "21:15:05");
        assert_eq!(w.end.format("%H:%M:%S").to_string(), "21:30:10");
    }

    #[test]
    fn start_after_end_fails() {
        let err = parse("2025-09-05_21:15~2025-09-04_21:30", jst()).unwrap_err();
        assert!(matches!(err, AnalysisError::TimeParse { .. }));
    }

    #[test]
    fn garbage_fails_without_defaulting() {
        assert!(parse("not a time range", jst()).is_err());
    }

    #[test]
    fn idempotent_through_canonical_form() {
        let w = parse("2025-09-04_21:15~2025-09-04_21:30", jst()).unwrap();
        let canonical = format!(
            "{}~{}",
            w.start.format("%Y-%m-%d_%H:%M:%S"),
            w.end.format("%Y-%m-%d_%H:%M:%S")
        );
        let reparsed = parse(&canonical, jst()).unwrap();
        assert_eq!(w.start, reparsed.start);
        assert_eq!(w.end, reparsed.end);
    }
}
