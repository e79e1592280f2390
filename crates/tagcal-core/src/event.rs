use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn all() -> [Self; 4] {
        [Self::Daily, Self::Weekly, Self::Monthly, Self::Yearly]
    }

    pub fn as_key(self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
            Self::Yearly => "Yearly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

impl FromStr for Frequency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        Self::all()
            .into_iter()
            .find(|freq| freq.as_key().eq_ignore_ascii_case(key))
            .ok_or_else(|| anyhow!("unknown recurrence frequency: {key}"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleWeekday {
    #[serde(rename = "MO")]
    Monday,
    #[serde(rename = "TU")]
    Tuesday,
    #[serde(rename = "WE")]
    Wednesday,
    #[serde(rename = "TH")]
    Thursday,
    #[serde(rename = "FR")]
    Friday,
    #[serde(rename = "SA")]
    Saturday,
    #[serde(rename = "SU")]
    Sunday,
}

impl RuleWeekday {
    pub fn all() -> [Self; 7] {
        [
            Self::Monday,
            Self::Tuesday,
            Self::Wednesday,
            Self::Thursday,
            Self::Friday,
            Self::Saturday,
            Self::Sunday,
        ]
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Monday => "MO",
            Self::Tuesday => "TU",
            Self::Wednesday => "WE",
            Self::Thursday => "TH",
            Self::Friday => "FR",
            Self::Saturday => "SA",
            Self::Sunday => "SU",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
            Self::Saturday => "Saturday",
            Self::Sunday => "Sunday",
        }
    }
}

impl fmt::Display for RuleWeekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for RuleWeekday {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Self::all()
            .into_iter()
            .find(|day| {
                day.code().eq_ignore_ascii_case(&key)
                    || day.label().to_ascii_lowercase() == key
                    || day.label()[..3].to_ascii_lowercase() == key
            })
            .ok_or_else(|| anyhow!("unknown weekday: {s}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurrenceRule {
    pub freq: Frequency,

    pub interval: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byweekday: Option<Vec<RuleWeekday>>,

    pub dtstart: String,

    #[serde(default)]
    pub until: Option<String>,

    pub tzid: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventDuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
}

impl EventDuration {
    pub fn days(days: u64) -> Self {
        Self {
            days: non_zero(days),
            ..Self::default()
        }
    }

    pub fn hms(hours: u64, minutes: u64, seconds: u64) -> Self {
        Self {
            days: None,
            hours: non_zero(hours),
            minutes: non_zero(minutes),
            seconds: non_zero(seconds),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_none() && self.hours.is_none() && self.minutes.is_none() && self.seconds.is_none()
    }
}

impl fmt::Display for EventDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            (self.days, "d"),
            (self.hours, "h"),
            (self.minutes, "m"),
            (self.seconds, "s"),
        ]
        .into_iter()
        .filter_map(|(value, unit)| value.map(|v| format!("{v}{unit}")))
        .collect::<Vec<_>>();

        if parts.is_empty() {
            f.write_str("0s")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

fn non_zero(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,

    pub start: String,

    #[serde(default)]
    pub end: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub all_day: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,

    #[serde(default = "default_color", deserialize_with = "null_as_default_color")]
    pub color: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrule: Option<RecurrenceRule>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_duration"
    )]
    pub duration: Option<EventDuration>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Stored durations are recomputed on load, so a malformed one is
/// dropped instead of failing the whole list.
fn lenient_duration<'de, D>(deserializer: D) -> Result<Option<EventDuration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|raw| serde_json::from_value(raw).ok()))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default_color<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_color))
}

fn default_color() -> String {
    crate::palette::DEFAULT_COLOR.to_string()
}

impl EventRecord {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
