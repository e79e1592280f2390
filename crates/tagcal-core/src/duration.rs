use chrono::NaiveDateTime;

use crate::datetime::parse_event_datetime;
use crate::event::EventDuration;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// All-day events get whole days, and only when the span covers more
/// than one day. Timed events get an hours/minutes/seconds breakdown when
/// the elapsed time is positive. Anything else has no duration.
pub fn derive_duration(start: &str, end: Option<&str>, all_day: bool) -> Option<EventDuration> {
    let start = parse_event_datetime(start)?;
    let end = parse_event_datetime(end?)?;
    derive_duration_between(start, end, all_day)
}

pub fn derive_duration_between(
    start: NaiveDateTime,
    end: NaiveDateTime,
    all_day: bool,
) -> Option<EventDuration> {
    let elapsed = end.signed_duration_since(start);

    if all_day {
        let secs = elapsed.num_seconds();
        if secs <= 0 {
            return None;
        }
        let days = (secs + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;
        return (days > 1).then(|| EventDuration::days(days as u64));
    }

    let secs = elapsed.num_seconds();
    if secs <= 0 {
        return None;
    }
    let secs = secs as u64;
    let duration = EventDuration::hms(secs / 3600, (secs % 3600) / 60, secs % 60);
    (!duration.is_empty()).then_some(duration)
}
