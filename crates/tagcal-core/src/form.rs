use std::collections::BTreeMap;

use anyhow::{Context, anyhow, bail};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::datetime::{
    self, DEFAULT_END_TIME, DEFAULT_START_TIME, date_part, end_of_day, format_clock,
    format_naive_iso, local_date, local_to_utc_iso, next_half_hour, parse_form_date, parse_form_time,
};
use crate::duration::derive_duration_between;
use crate::event::{EventRecord, Frequency, RecurrenceRule, RuleWeekday};
use crate::palette;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub start: String,
    pub end: Option<String>,
    pub all_day: bool,
    pub initial_start_time: Option<String>,
    pub initial_end_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceForm {
    pub freq: Frequency,
    pub interval: u32,
    pub byweekday: Vec<RuleWeekday>,
    /// `YYYY-MM-DD`; the series runs through the end of that day.
    pub until: Option<String>,
}

impl Default for RecurrenceForm {
    fn default() -> Self {
        Self {
            freq: Frequency::Weekly,
            interval: 1,
            byweekday: vec![],
            until: None,
        }
    }
}

impl RecurrenceForm {
    pub fn from_rule(rule: &RecurrenceRule, tz: Tz) -> Self {
        Self {
            freq: rule.freq,
            interval: rule.interval.max(1),
            byweekday: rule.byweekday.clone().unwrap_or_default(),
            until: rule
                .until
                .as_deref()
                .map(|raw| local_date(raw, tz))
                .filter(|date| !date.is_empty()),
        }
    }

    pub fn toggle_weekday(&mut self, day: RuleWeekday) {
        if let Some(idx) = self.byweekday.iter().position(|d| *d == day) {
            self.byweekday.remove(idx);
        } else {
            self.byweekday.push(day);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventForm {
    pub title: String,
    pub start: String,
    pub end: String,
    pub start_time: String,
    pub end_time: String,
    pub all_day: bool,
    pub tags: Vec<String>,
    pub color: String,
    pub recurring: bool,
    pub recurrence: RecurrenceForm,
}

impl EventForm {
    pub fn blank(now: NaiveDateTime, selected_tags: &[String], color: String) -> Self {
        let start = next_half_hour(now);
        let end = start + Duration::hours(1);
        Self {
            title: String::new(),
            start: start.date().format("%Y-%m-%d").to_string(),
            end: end.date().format("%Y-%m-%d").to_string(),
            start_time: format_clock(start.time()),
            end_time: format_clock(end.time()),
            all_day: false,
            tags: selected_tags.to_vec(),
            color,
            recurring: false,
            recurrence: RecurrenceForm::default(),
        }
    }

    pub fn from_selection(selection: &Selection, selected_tags: &[String], color: String) -> Self {
        let start_time = selection
            .initial_start_time
            .clone()
            .unwrap_or_else(|| initial_time(Some(selection.start.as_str()), selection.all_day, DEFAULT_START_TIME));
        let end_time = selection.initial_end_time.clone().unwrap_or_else(|| {
            initial_time(selection.end.as_deref(), selection.all_day, DEFAULT_END_TIME)
        });

        Self {
            title: String::new(),
            start: date_part(&selection.start).to_string(),
            end: selection
                .end
                .as_deref()
                .map(|raw| date_part(raw).to_string())
                .unwrap_or_default(),
            start_time,
            end_time,
            all_day: selection.all_day,
            tags: selected_tags.to_vec(),
            color,
            recurring: false,
            recurrence: RecurrenceForm::default(),
        }
    }

    /// Stored instants are read on the wall clock of `tz`.
    pub fn from_event(event: &EventRecord, tz: Tz) -> Self {
        Self {
            title: event.title.clone(),
            start: local_date(&event.start, tz),
            end: event
                .end
                .as_deref()
                .map(|raw| local_date(raw, tz))
                .unwrap_or_default(),
            start_time: initial_time(Some(event.start.as_str()), event.all_day, DEFAULT_START_TIME, tz),
            end_time: initial_time(event.end.as_deref(), event.all_day, DEFAULT_END_TIME, tz),
            all_day: event.all_day,
            tags: event.tags.clone(),
            color: event.color.clone(),
            recurring: event.rrule.is_some(),
            recurrence: event
                .rrule
                .as_ref()
                .map(|rule| RecurrenceForm::from_rule(rule, tz))
                .unwrap_or_default(),
        }
    }

    pub fn toggle_tag(&mut self, tag: &str, chip_color: &str) {
        if let Some(idx) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(idx);
        } else {
            self.tags.push(tag.to_string());
            self.color = chip_color.to_string();
        }
    }

    /// Header text: `start – end`, or just `start` when both dates match.
    pub fn display_range(&self) -> String {
        if self.start.is_empty() {
            return String::new();
        }

        let start = self.format_bound(&self.start, &self.start_time);
        if self.end.is_empty() || self.start == self.end {
            return start;
        }
        let end = self.format_bound(&self.end, &self.end_time);
        format!("{start} \u{2013} {end}")
    }

    fn format_bound(&self, date: &str, time: &str) -> String {
        if self.all_day {
            datetime::safe_format(date, None)
        } else {
            datetime::safe_format(date, Some(time))
        }
    }

    #[tracing::instrument(skip(self, tz), fields(title = %self.title))]
    pub fn submit(&self, id: &str, tz: Tz) -> anyhow::Result<EventRecord> {
        let start_day = parse_form_date(&self.start)
            .ok_or_else(|| anyhow!("invalid start date: {:?}", self.start))?;
        let end_day = if self.end.trim().is_empty() {
            None
        } else {
            Some(parse_form_date(&self.end).ok_or_else(|| anyhow!("invalid end date: {:?}", self.end))?)
        };

        let (start, end, start_at, end_at) = if self.all_day {
            let start_at = start_day.and_time(chrono::NaiveTime::MIN);
            let end_at = end_day.map(|day| day.and_time(chrono::NaiveTime::MIN));
            (
                start_day.format("%Y-%m-%d").to_string(),
                end_day.map(|day| day.format("%Y-%m-%d").to_string()),
                start_at,
                end_at,
            )
        } else {
            let start_clock = parse_form_time(&self.start_time)
                .ok_or_else(|| anyhow!("invalid start time: {:?}", self.start_time))?;
            let end_clock = parse_form_time(&self.end_time)
                .ok_or_else(|| anyhow!("invalid end time: {:?}", self.end_time))?;
            let start_at = start_day.and_time(start_clock);
            let end_at = end_day.unwrap_or(start_day).and_time(end_clock);
            if end_at < start_at {
                warn!(start = %start_at, end = %end_at, "event ends before it starts");
            }
            (
                format_naive_iso(start_at),
                Some(format_naive_iso(end_at)),
                start_at,
                Some(end_at),
            )
        };

        let rrule = if self.recurring {
            Some(self.build_rule(start_day, start_at, tz)?)
        } else {
            None
        };

        let duration = end_at.and_then(|end_at| derive_duration_between(start_at, end_at, self.all_day));

        let swatch = palette::palette().swatch(&self.color);
        if swatch.name != self.color {
            debug!(color = %self.color, fallback = %swatch.name, "unknown color name; using fallback swatch");
        }

        Ok(EventRecord {
            id: id.to_string(),
            title: self.title.trim().to_string(),
            start,
            end,
            all_day: self.all_day,
            tags: self.tags.clone(),
            color: self.color.clone(),
            background_color: Some(swatch.background.clone()),
            text_color: Some(swatch.text_hex().to_string()),
            rrule,
            duration,
            extra: BTreeMap::new(),
        })
    }

    fn build_rule(
        &self,
        start_day: NaiveDate,
        start_at: NaiveDateTime,
        tz: Tz,
    ) -> anyhow::Result<RecurrenceRule> {
        let recurrence = &self.recurrence;
        if recurrence.interval == 0 {
            bail!("recurrence interval must be at least 1");
        }

        let dtstart = if self.all_day {
            start_day.format("%Y-%m-%d").to_string()
        } else {
            local_to_utc_iso(start_at, tz)
        };

        let until = match recurrence.until.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(raw) => {
                let day = parse_form_date(date_part(raw))
                    .with_context(|| format!("invalid recurrence end date: {raw:?}"))?;
                Some(local_to_utc_iso(end_of_day(day), tz))
            }
            None => None,
        };

        let byweekday = (recurrence.freq == Frequency::Weekly && !recurrence.byweekday.is_empty())
            .then(|| recurrence.byweekday.clone());

        Ok(RecurrenceRule {
            freq: recurrence.freq,
            interval: recurrence.interval,
            byweekday,
            dtstart,
            until,
            tzid: tz.name().to_string(),
            extra: BTreeMap::new(),
        })
    }
}

fn initial_time(raw: Option<&str>, all_day: bool, fallback: &str, tz: Tz) -> String {
    if all_day {
        return fallback.to_string();
    }
    raw.filter(|value| value.contains('T'))
        .and_then(|value| datetime::time_of(value, tz))
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(start: &str, end: &str, start_time: &str, end_time: &str) -> EventForm {
        EventForm {
            title: "Planning".to_string(),
            start: start.to_string(),
            end: end.to_string(),
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
            all_day: false,
            tags: vec![],
            color: "mint".to_string(),
            recurring: false,
            recurrence: RecurrenceForm::default(),
        }
    }

    #[test]
    fn timed_event_gets_hour_and_minute_duration() {
        let event = form("2024-01-01", "2024-01-01", "09:00", "10:30")
            .submit("e1", chrono_tz::UTC)
            .expect("submit");
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["duration"], serde_json::json!({ "hours": 1, "minutes": 30 }));
        assert!(value.get("rrule").is_none());
        assert_eq!(event.start, "2024-01-01T09:00:00");
        assert_eq!(event.end.as_deref(), Some("2024-01-01T10:30:00"));
        assert_eq!(event.background_color.as_deref(), Some(palette::palette().swatch("mint").background.as_str()));
        assert_eq!(event.text_color.as_deref(), Some("#000000"));
    }

    #[test]
    fn weekly_rule_carries_selected_weekdays() {
        let mut f = form("2024-01-01", "2024-01-01", "09:00", "10:00");
        f.recurring = true;
        f.recurrence = RecurrenceForm {
            freq: Frequency::Weekly,
            interval: 2,
            byweekday: vec![RuleWeekday::Monday, RuleWeekday::Wednesday],
            until: Some("2024-03-01".to_string()),
        };
        let tz: Tz = "Europe/Berlin".parse().expect("tz");
        let event = f.submit("e1", tz).expect("submit");

        let rule = serde_json::to_value(event.rrule.as_ref().expect("rrule")).expect("serialize");
        assert_eq!(
            rule,
            serde_json::json!({
                "freq": "WEEKLY",
                "interval": 2,
                "byweekday": ["MO", "WE"],
                "dtstart": "2024-01-01T08:00:00.000Z",
                "until": "2024-03-01T22:59:59.999Z",
                "tzid": "Europe/Berlin",
            })
        );
    }

    #[test]
    fn weekdays_only_apply_to_weekly_rules() {
        let mut f = form("2024-01-01", "2024-01-01", "09:00", "10:00");
        f.recurring = true;
        f.recurrence.freq = Frequency::Monthly;
        f.recurrence.byweekday = vec![RuleWeekday::Friday];
        let event = f.submit("e1", chrono_tz::UTC).expect("submit");
        let rule = serde_json::to_value(event.rrule.as_ref().expect("rrule")).expect("serialize");
        assert!(rule.get("byweekday").is_none());
        assert_eq!(rule["until"], serde_json::Value::Null);
    }

    #[test]
    fn all_day_rule_starts_on_the_date() {
        let mut f = form("2024-01-01", "2024-01-04", "", "");
        f.all_day = true;
        f.recurring = true;
        f.recurrence.freq = Frequency::Yearly;
        let event = f.submit("e1", chrono_tz::UTC).expect("submit");
        assert_eq!(event.start, "2024-01-01");
        assert_eq!(event.end.as_deref(), Some("2024-01-04"));
        assert_eq!(event.rrule.as_ref().map(|r| r.dtstart.as_str()), Some("2024-01-01"));
        assert_eq!(event.duration, Some(crate::event::EventDuration::days(3)));
    }

    #[test]
    fn submit_rejects_bad_input() {
        assert!(form("", "", "09:00", "10:00").submit("e1", chrono_tz::UTC).is_err());
        assert!(form("2024-01-01", "", "9am", "10:00").submit("e1", chrono_tz::UTC).is_err());

        let mut f = form("2024-01-01", "2024-01-01", "09:00", "10:00");
        f.recurring = true;
        f.recurrence.interval = 0;
        assert!(f.submit("e1", chrono_tz::UTC).is_err());
    }

    #[test]
    fn edit_form_reads_dates_times_and_rule() {
        let event: EventRecord = serde_json::from_value(serde_json::json!({
            "id": "7",
            "title": "Review",
            "start": "2024-02-05T14:15:00",
            "end": "2024-02-05T15:00:00",
            "allDay": false,
            "tags": ["work"],
            "color": "red",
            "rrule": {
                "freq": "WEEKLY",
                "interval": 1,
                "byweekday": ["MO"],
                "dtstart": "2024-02-05T14:15:00.000Z",
                "until": "2024-04-01T23:59:59.999Z",
                "tzid": "UTC"
            }
        }))
        .expect("event");

        let f = EventForm::from_event(&event, chrono_tz::UTC);
        assert_eq!(f.start, "2024-02-05");
        assert_eq!(f.start_time, "14:15");
        assert_eq!(f.end_time, "15:00");
        assert!(f.recurring);
        assert_eq!(f.recurrence.byweekday, vec![RuleWeekday::Monday]);
        assert_eq!(f.recurrence.until.as_deref(), Some("2024-04-01"));
    }

    #[test]
    fn editing_utc_instants_keeps_local_time() {
        let tz: Tz = "America/New_York".parse().expect("tz");
        let event: EventRecord = serde_json::from_value(serde_json::json!({
            "id": "9",
            "title": "Call",
            "start": "2024-01-01T14:00:00.000Z",
            "end": "2024-01-01T15:30:00.000Z",
            "allDay": false,
            "rrule": {
                "freq": "DAILY",
                "interval": 1,
                "dtstart": "2024-01-01T14:00:00.000Z",
                "until": "2024-03-02T04:59:59.999Z",
                "tzid": "America/New_York"
            }
        }))
        .expect("event");

        let f = EventForm::from_event(&event, tz);
        assert_eq!((f.start.as_str(), f.start_time.as_str()), ("2024-01-01", "09:00"));
        assert_eq!(f.end_time, "10:30");
        assert_eq!(f.recurrence.until.as_deref(), Some("2024-03-01"));

        let resaved = f.submit("9", tz).expect("submit");
        assert_eq!(resaved.start, "2024-01-01T09:00:00");
        let rule = resaved.rrule.expect("rule");
        assert_eq!(rule.dtstart, "2024-01-01T14:00:00.000Z");
        assert_eq!(rule.until.as_deref(), Some("2024-03-02T04:59:59.999Z"));
    }

    #[test]
    fn edit_form_defaults_times_for_all_day_events() {
        let event: EventRecord = serde_json::from_value(serde_json::json!({
            "id": "8",
            "title": "Holiday",
            "start": "2024-12-25",
            "allDay": true,
        }))
        .expect("event");
        let f = EventForm::from_event(&event, chrono_tz::UTC);
        assert_eq!((f.start_time.as_str(), f.end_time.as_str()), ("09:00", "10:00"));
        assert_eq!(f.end, "");
        assert!(!f.recurring);
    }

    #[test]
    fn blank_form_starts_on_next_half_hour() {
        let now = NaiveDateTime::parse_from_str("2024-05-10 23:40:00", "%Y-%m-%d %H:%M:%S").expect("now");
        let f = EventForm::blank(now, &["work".to_string()], "red".to_string());
        assert_eq!((f.start.as_str(), f.start_time.as_str()), ("2024-05-11", "00:00"));
        assert_eq!((f.end.as_str(), f.end_time.as_str()), ("2024-05-11", "01:00"));
        assert_eq!(f.tags, vec!["work".to_string()]);
    }

    #[test]
    fn selection_prefers_initial_times() {
        let selection = Selection {
            start: "2024-01-02T13:00:00".to_string(),
            end: Some("2024-01-02T14:00:00".to_string()),
            all_day: false,
            initial_start_time: Some("13:30".to_string()),
            initial_end_time: None,
        };
        let f = EventForm::from_selection(&selection, &[], "gray".to_string());
        assert_eq!(f.start_time, "13:30");
        assert_eq!(f.end_time, "14:00");
        assert_eq!(f.end, "2024-01-02");
    }

    #[test]
    fn display_range_collapses_same_day() {
        let f = form("2024-01-01", "2024-01-01", "09:00", "10:30");
        assert_eq!(f.display_range(), "Mon, Jan 1, 2024, 9:00 AM");

        let mut multi = form("2024-01-01", "2024-01-03", "09:00", "10:30");
        multi.all_day = true;
        assert_eq!(multi.display_range(), "Mon, Jan 1, 2024 \u{2013} Wed, Jan 3, 2024");
    }

    #[test]
    fn adding_a_tag_adopts_its_color() {
        let mut f = form("2024-01-01", "2024-01-01", "09:00", "10:00");
        f.toggle_tag("work", "red");
        assert_eq!(f.color, "red");
        f.toggle_tag("work", "blue");
        assert!(f.tags.is_empty());
        assert_eq!(f.color, "red");
    }
}
