use anyhow::anyhow;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Utc, Weekday};
use chrono_tz::Tz;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::datetime::parse_event_local;
use crate::event::EventRecord;
use crate::form::{EventForm, Selection};
use crate::storage::{DocumentProvider, EventRepository, KeyValueStore};
use crate::tags::{self, Document, StyledEvent, TagColors, TagFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Month,
    Week,
    Day,
}

impl ViewMode {
    pub fn all() -> [Self; 3] {
        [Self::Month, Self::Week, Self::Day]
    }

    pub fn as_key(self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::Week => "week",
            Self::Day => "day",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        let key = match key.as_str() {
            "daygridmonth" => "month",
            "timegridweek" => "week",
            "timegridday" => "day",
            other => other,
        };
        Self::all().into_iter().find(|mode| mode.as_key() == key)
    }
}

#[derive(Debug, Clone)]
pub struct CalendarOptions {
    pub view: ViewMode,
    pub focus: NaiveDate,
    pub week_start: Weekday,
    pub timezone: Tz,
}

impl Default for CalendarOptions {
    fn default() -> Self {
        Self {
            view: ViewMode::Month,
            focus: Utc::now().date_naive(),
            week_start: Weekday::Mon,
            timezone: chrono_tz::UTC,
        }
    }
}

pub struct CalendarState<S, D> {
    repo: EventRepository<S>,
    documents: D,
    events: Vec<EventRecord>,
    root_docs: Vec<Document>,
    tag_colors: TagColors,
    filter: TagFilter,
    view: ViewMode,
    focus: NaiveDate,
    week_start: Weekday,
    timezone: Tz,
}

impl<S: KeyValueStore, D: DocumentProvider> CalendarState<S, D> {
    #[tracing::instrument(skip_all)]
    pub fn open(repo: EventRepository<S>, documents: D, options: CalendarOptions) -> Self {
        let events = repo.load();
        let mut state = Self {
            repo,
            documents,
            events,
            root_docs: vec![],
            tag_colors: TagColors::new(),
            filter: TagFilter::default(),
            view: options.view,
            focus: options.focus,
            week_start: options.week_start,
            timezone: options.timezone,
        };

        if let Err(err) = state.fetch_documents() {
            error!(error = %format!("{err:#}"), "error loading root documents");
            state.root_docs.clear();
        }

        info!(
            events = state.events.len(),
            root_docs = state.root_docs.len(),
            view = state.view.as_key(),
            "calendar opened"
        );
        state
    }

    fn fetch_documents(&mut self) -> anyhow::Result<()> {
        let docs = self.documents.all_documents()?;
        let colors = self.documents.tag_colors()?;
        self.tag_colors = colors;
        self.root_docs = tags::root_documents(docs);
        Ok(())
    }

    /// Reacts to tag or color changes made elsewhere. On failure the
    /// previous metadata stays in place.
    #[tracing::instrument(skip(self))]
    pub fn handle_tags_updated(&mut self) {
        match self.fetch_documents() {
            Ok(()) => debug!(root_docs = self.root_docs.len(), "tag metadata refreshed"),
            Err(err) => error!(error = %format!("{err:#}"), "error updating tags"),
        }
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn event(&self, id: &str) -> Option<&EventRecord> {
        self.events.iter().find(|event| event.id == id)
    }

    pub fn root_documents(&self) -> &[Document] {
        &self.root_docs
    }

    pub fn tag_colors(&self) -> &TagColors {
        &self.tag_colors
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn tag_universe(&self) -> Vec<String> {
        tags::tag_universe(&self.root_docs)
    }

    pub fn tag_chip_color(&self, tag: &str) -> String {
        tags::tag_chip_color(tag, &self.root_docs, &self.tag_colors)
    }

    pub fn initial_color(&self, tags: &[String]) -> String {
        tags::resolve_color(tags, &self.root_docs, &self.tag_colors)
    }

    pub fn filter(&self) -> &TagFilter {
        &self.filter
    }

    pub fn toggle_tag(&mut self, tag: &str) -> bool {
        let selected = self.filter.toggle(tag);
        debug!(tag, selected, "toggled tag filter");
        selected
    }

    pub fn styled_events(&self) -> Vec<StyledEvent<'_>> {
        tags::style_events(&self.events, &self.filter)
    }

    pub fn new_event_form(&self, now: NaiveDateTime) -> EventForm {
        let selected = self.filter.tags();
        EventForm::blank(now, selected, self.initial_color(selected))
    }

    pub fn select_range(&self, selection: &Selection) -> EventForm {
        let selected = self.filter.tags();
        EventForm::from_selection(selection, selected, self.initial_color(selected))
    }

    pub fn edit_event_form(&self, id: &str) -> Option<EventForm> {
        self.event(id)
            .map(|event| EventForm::from_event(event, self.timezone))
    }

    #[tracing::instrument(skip(self, form))]
    pub fn save_event(&mut self, form: &EventForm, editing_id: Option<&str>) -> anyhow::Result<EventRecord> {
        let record = match editing_id {
            Some(id) => {
                let idx = self
                    .events
                    .iter()
                    .position(|event| event.id == id)
                    .ok_or_else(|| anyhow!("event not found: {id}"))?;
                let record = form.submit(id, self.timezone)?;
                self.events[idx] = record.clone();
                record
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let record = form.submit(&id, self.timezone)?;
                self.events.push(record.clone());
                record
            }
        };

        self.repo.save(&self.events);
        info!(id = %record.id, count = self.events.len(), "event saved");
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_event(&mut self, id: &str) -> bool {
        let before = self.events.len();
        self.events.retain(|event| event.id != id);
        let removed = self.events.len() != before;
        if removed {
            self.repo.save(&self.events);
            info!(id, "event deleted");
        }
        removed
    }

    pub fn replace_events(&mut self, events: Vec<EventRecord>) -> anyhow::Result<()> {
        self.events = crate::storage::migrate_events(events);
        self.repo.try_save(&self.events)
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    pub fn focus(&self) -> NaiveDate {
        self.focus
    }

    pub fn set_view(&mut self, view: ViewMode) {
        self.view = view;
    }

    pub fn go_to(&mut self, date: NaiveDate) {
        self.focus = date;
    }

    pub fn today(&mut self) {
        self.focus = Utc::now().with_timezone(&self.timezone).date_naive();
    }

    pub fn prev(&mut self) {
        self.focus = shift_focus(self.focus, self.view, -1);
    }

    pub fn next(&mut self) {
        self.focus = shift_focus(self.focus, self.view, 1);
    }

    pub fn visible_range(&self) -> (NaiveDate, NaiveDate) {
        date_window(self.view, self.focus, self.week_start)
    }

    pub fn title(&self) -> String {
        view_title(self.view, self.focus, self.week_start)
    }

    pub fn events_in_view(&self) -> Vec<StyledEvent<'_>> {
        let (from, to) = self.visible_range();
        self.styled_events()
            .into_iter()
            .filter(|styled| {
                event_span(styled.event, self.timezone)
                    .is_some_and(|(start, end)| start <= to && end.is_none_or(|end| end >= from))
            })
            .collect()
    }
}

/// First and last day an event touches in `tz`; `None` end means open-ended.
pub fn event_span(event: &EventRecord, tz: Tz) -> Option<(NaiveDate, Option<NaiveDate>)> {
    if let Some(rule) = &event.rrule {
        let start = parse_event_local(&rule.dtstart, tz)
            .or_else(|| parse_event_local(&event.start, tz))?
            .date();
        let until = rule
            .until
            .as_deref()
            .and_then(|raw| parse_event_local(raw, tz))
            .map(|dt| dt.date());
        return Some((start, until));
    }

    let start = parse_event_local(&event.start, tz)?.date();
    let end = match event.end.as_deref().and_then(|raw| parse_event_local(raw, tz)) {
        // all-day ends are exclusive
        Some(end) if event.all_day && end.date() > start => end.date() - Duration::days(1),
        Some(end) if end.date() >= start => end.date(),
        _ => start,
    };
    Some((start, Some(end)))
}

pub fn shift_focus(current: NaiveDate, view: ViewMode, step: i32) -> NaiveDate {
    match view {
        ViewMode::Month => shift_months(current, step),
        ViewMode::Week => add_days(current, i64::from(step) * 7),
        ViewMode::Day => add_days(current, i64::from(step)),
    }
}

pub fn date_window(view: ViewMode, focus: NaiveDate, week_start: Weekday) -> (NaiveDate, NaiveDate) {
    match view {
        ViewMode::Month => (
            first_day_of_month(focus.year(), focus.month()),
            last_day_of_month(focus.year(), focus.month()),
        ),
        ViewMode::Week => {
            let start = start_of_week(focus, week_start);
            (start, add_days(start, 6))
        }
        ViewMode::Day => (focus, focus),
    }
}

pub fn view_title(view: ViewMode, focus: NaiveDate, week_start: Weekday) -> String {
    match view {
        ViewMode::Month => focus.format("%B %Y").to_string(),
        ViewMode::Week => {
            let start = start_of_week(focus, week_start);
            let end = add_days(start, 6);
            format!("{} \u{2013} {}", start.format("%b %-d"), end.format("%b %-d, %Y"))
        }
        ViewMode::Day => focus.format("%A, %B %-d, %Y").to_string(),
    }
}

fn shift_months(date: NaiveDate, months: i32) -> NaiveDate {
    let total = date.year() * 12 + date.month0() as i32 + months;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = date.day().min(last_day_of_month(year, month).day());
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(date)
}

fn first_day_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month >= 12 {
        (year.saturating_add(1), 1)
    } else {
        (year, month + 1)
    };
    add_days(first_day_of_month(next_year, next_month), -1)
}

fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days)).unwrap_or(date)
}

fn start_of_week(day: NaiveDate, week_start: Weekday) -> NaiveDate {
    let day_idx = i64::from(day.weekday().num_days_from_monday());
    let start_idx = i64::from(week_start.num_days_from_monday());
    add_days(day, -((7 + day_idx - start_idx) % 7))
}
