use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use tracing::{debug, error};

use crate::config::Config;

pub const TIMEZONE_ENV_VAR: &str = "TAGCAL_TIMEZONE";

pub const DEFAULT_START_TIME: &str = "09:00";
pub const DEFAULT_END_TIME: &str = "10:00";

pub const INVALID_DATE_LABEL: &str = "Invalid date";

/// Order: the `timezone` config key, `TAGCAL_TIMEZONE`, `TZ`, then UTC.
#[tracing::instrument(skip(cfg))]
pub fn resolve_calendar_timezone(cfg: &Config) -> Tz {
    if let Some(raw) = cfg.get("timezone")
        && let Some(tz) = parse_timezone(&raw, "config")
    {
        return tz;
    }

    for var in [TIMEZONE_ENV_VAR, "TZ"] {
        if let Ok(raw) = std::env::var(var)
            && let Some(tz) = parse_timezone(&raw, var)
        {
            return tz;
        }
    }

    debug!("no calendar timezone configured; using UTC");
    chrono_tz::UTC
}

pub fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim().trim_start_matches(':');
    if trimmed.is_empty() {
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => Some(tz),
        Err(err) => {
            error!(source, timezone = %trimmed, error = %err, "invalid timezone id");
            None
        }
    }
}

pub fn parse_event_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }

    parse_form_date(trimmed).and_then(|date| date.and_hms_opt(0, 0, 0))
}

pub fn parse_form_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn parse_form_time(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .ok()
}

pub fn date_part(raw: &str) -> &str {
    match raw.split_once('T') {
        Some((date, _)) => date,
        None => raw,
    }
}

/// Offset-bearing instants are read on the wall clock of `tz`; naive
/// strings are taken as they are.
pub fn parse_event_local(raw: &str, tz: Tz) -> Option<NaiveDateTime> {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(dt) => Some(dt.with_timezone(&tz).naive_local()),
        Err(_) => parse_event_datetime(raw),
    }
}

pub fn local_date(raw: &str, tz: Tz) -> String {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(dt) => dt.with_timezone(&tz).format("%Y-%m-%d").to_string(),
        Err(_) => date_part(raw).to_string(),
    }
}

pub fn time_of(raw: &str, tz: Tz) -> Option<String> {
    parse_event_local(raw, tz).map(|dt| format_clock(dt.time()))
}

pub fn format_clock(time: NaiveTime) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}

pub fn format_naive_iso(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Rounds up to the next half-hour boundary; exact boundaries are kept.
pub fn next_half_hour(now: NaiveDateTime) -> NaiveDateTime {
    let truncated = now
        .date()
        .and_hms_opt(now.hour(), now.minute(), 0)
        .unwrap_or(now);
    let minute = truncated.minute();
    let bump = if minute == 0 || minute == 30 {
        if now.second() == 0 && now.nanosecond() == 0 {
            0
        } else {
            30
        }
    } else {
        30 - i64::from(minute % 30)
    };
    truncated + Duration::minutes(bump)
}

pub fn local_to_utc_iso(local: NaiveDateTime, tz: Tz) -> String {
    let resolved = match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(first, _) => first.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = local + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&local))
        }
    };
    resolved.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN))
}

pub fn format_display_date(date: NaiveDate) -> String {
    date.format("%a, %b %-d, %Y").to_string()
}

pub fn format_display_datetime(dt: NaiveDateTime) -> String {
    dt.format("%a, %b %-d, %Y, %-I:%M %p").to_string()
}

/// Failures are logged and become the "Invalid date" label.
pub fn safe_format(date: &str, time: Option<&str>) -> String {
    if date.trim().is_empty() {
        return String::new();
    }

    let Some(day) = parse_form_date(date).or_else(|| parse_event_datetime(date).map(|dt| dt.date()))
    else {
        error!(date, "date formatting error");
        return INVALID_DATE_LABEL.to_string();
    };

    match time.filter(|t| !t.trim().is_empty()) {
        None => format_display_date(day),
        Some(raw) => match parse_form_time(raw) {
            Some(clock) => format_display_datetime(day.and_time(clock)),
            None => {
                error!(date, time = raw, "time formatting error");
                INVALID_DATE_LABEL.to_string()
            }
        },
    }
}
