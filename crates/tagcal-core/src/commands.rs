use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, anyhow, bail};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::calendar::{CalendarState, ViewMode};
use crate::cli::{Command, EventArgs, ListArgs, TagsArgs};
use crate::datetime::parse_form_date;
use crate::event::EventRecord;
use crate::form::{EventForm, Selection};
use crate::palette;
use crate::render::Renderer;
use crate::storage::{DocumentProvider, FileStore, JsonDocumentProvider, KeyValueStore};

pub type AppState = CalendarState<FileStore, JsonDocumentProvider<FileStore>>;

#[instrument(skip(state, renderer, command))]
pub fn dispatch(state: &mut AppState, renderer: &mut Renderer, command: Command) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::List(args) => cmd_list(state, renderer, &args),
        Command::Add(args) => cmd_add(state, &args),
        Command::Edit { id, args } => cmd_edit(state, &id, &args),
        Command::Delete { id } => cmd_delete(state, &id),
        Command::Show { id } => cmd_show(state, renderer, &id),
        Command::Tags(args) => cmd_tags(state, renderer, &args),
        Command::Palette => renderer.print_palette(palette::palette()),
        Command::Migrate => cmd_migrate(state),
        Command::Export => cmd_export(state),
        Command::Import { path } => cmd_import(state, path.as_deref()),
    }
}

/// Finds an event by exact id or by a unique id prefix.
pub fn resolve_event_id<S, D>(state: &CalendarState<S, D>, token: &str) -> anyhow::Result<String>
where
    S: KeyValueStore,
    D: DocumentProvider,
{
    if state.event(token).is_some() {
        return Ok(token.to_string());
    }

    let mut matches = state.events().iter().filter(|event| event.id.starts_with(token));
    match (matches.next(), matches.next()) {
        (Some(event), None) => Ok(event.id.clone()),
        (Some(_), Some(_)) => Err(anyhow!("ambiguous event id: {token}")),
        (None, _) => Err(anyhow!("event not found: {token}")),
    }
}

#[instrument(skip(state, renderer, args))]
fn cmd_list(state: &mut AppState, renderer: &mut Renderer, args: &ListArgs) -> anyhow::Result<()> {
    info!("command list");

    if let Some(raw) = args.view.as_deref() {
        let view = ViewMode::from_key(raw).ok_or_else(|| anyhow!("unknown view: {raw}"))?;
        state.set_view(view);
    }
    match args.date.as_deref() {
        Some(raw) => state.go_to(parse_form_date(raw).ok_or_else(|| anyhow!("invalid date: {raw}"))?),
        None => state.today(),
    }
    for _ in 0..args.shift.unsigned_abs() {
        if args.shift < 0 {
            state.prev();
        } else {
            state.next();
        }
    }

    for tag in &args.tags {
        if !state.tag_universe().contains(tag) {
            warn!(tag = %tag, "tag is not carried by any root document");
        }
        state.toggle_tag(tag);
    }

    if args.all {
        renderer.print_event_table("All events", &state.styled_events())
    } else {
        renderer.print_event_table(&state.title(), &state.events_in_view())
    }
}

#[instrument(skip(state, args))]
fn cmd_add(state: &mut AppState, args: &EventArgs) -> anyhow::Result<()> {
    info!("command add");

    let mut form = match args.start.as_deref() {
        Some(start) => state.select_range(&Selection {
            start: start.to_string(),
            end: args.end.clone().or_else(|| Some(start.to_string())),
            all_day: args.all_day,
            initial_start_time: args.start_time.clone(),
            initial_end_time: args.end_time.clone(),
        }),
        None => {
            let now = Utc::now().with_timezone(&state.timezone()).naive_local();
            state.new_event_form(now)
        }
    };
    apply_event_args(state, &mut form, args)?;

    if form.title.trim().is_empty() {
        bail!("add requires --title");
    }

    let record = state.save_event(&form, None)?;
    println!("Created event {}.", record.id);
    Ok(())
}

#[instrument(skip(state, args))]
fn cmd_edit(state: &mut AppState, token: &str, args: &EventArgs) -> anyhow::Result<()> {
    info!("command edit");

    let id = resolve_event_id(state, token)?;
    let mut form = state
        .edit_event_form(&id)
        .ok_or_else(|| anyhow!("event not found: {id}"))?;
    apply_event_args(state, &mut form, args)?;

    let record = state.save_event(&form, Some(&id))?;
    println!("Modified event {}.", record.id);
    Ok(())
}

fn apply_event_args(state: &AppState, form: &mut EventForm, args: &EventArgs) -> anyhow::Result<()> {
    if let Some(title) = &args.title {
        form.title = title.clone();
    }
    if let Some(start) = &args.start {
        form.start = crate::datetime::date_part(start).to_string();
    }
    if let Some(end) = &args.end {
        form.end = crate::datetime::date_part(end).to_string();
    }
    if let Some(time) = &args.start_time {
        form.start_time = time.clone();
    }
    if let Some(time) = &args.end_time {
        form.end_time = time.clone();
    }
    if args.all_day {
        form.all_day = true;
    } else if args.timed {
        form.all_day = false;
    }

    for tag in &args.tags {
        form.toggle_tag(tag, &state.tag_chip_color(tag));
    }

    if let Some(color) = &args.color {
        if !palette::palette().contains(color) {
            bail!("unknown color: {color} (see `tagcal palette`)");
        }
        form.color = color.clone();
    }

    if args.no_repeat {
        form.recurring = false;
    }
    if let Some(freq) = args.repeat {
        form.recurring = true;
        form.recurrence.freq = freq;
    }
    if let Some(interval) = args.interval {
        form.recurrence.interval = interval.max(1);
    }
    for day in &args.weekdays {
        form.recurrence.toggle_weekday(*day);
    }
    if let Some(until) = &args.until {
        form.recurrence.until = if until.trim().is_empty() {
            None
        } else {
            Some(until.clone())
        };
    }

    Ok(())
}

#[instrument(skip(state))]
fn cmd_delete(state: &mut AppState, token: &str) -> anyhow::Result<()> {
    info!("command delete");

    let id = resolve_event_id(state, token)?;
    if state.delete_event(&id) {
        println!("Deleted event {id}.");
    }
    Ok(())
}

#[instrument(skip(state, renderer))]
fn cmd_show(state: &AppState, renderer: &mut Renderer, token: &str) -> anyhow::Result<()> {
    let id = resolve_event_id(state, token)?;
    let event = state.event(&id).ok_or_else(|| anyhow!("event not found: {id}"))?;
    renderer.print_event_info(event)
}

#[instrument(skip(state, renderer, args))]
fn cmd_tags(state: &mut AppState, renderer: &mut Renderer, args: &TagsArgs) -> anyhow::Result<()> {
    if let Some(kv) = &args.set_color {
        if !palette::palette().contains(&kv.value) {
            bail!("unknown color: {} (see `tagcal palette`)", kv.value);
        }
        let mut colors = state.tag_colors().clone();
        state
            .documents()
            .set_tag_color(&mut colors, &kv.key, &kv.value)
            .context("failed to update tag colors")?;
        state.handle_tags_updated();
        info!(tag = %kv.key, color = %kv.value, "tag color updated");
    }

    let rows = state
        .tag_universe()
        .into_iter()
        .map(|tag| {
            let color = state.tag_chip_color(&tag);
            let used = state.events().iter().any(|event| event.has_tag(&tag));
            (tag, color, used)
        })
        .collect::<Vec<_>>();
    renderer.print_tags(&rows)
}

#[instrument(skip(state))]
fn cmd_migrate(state: &AppState) -> anyhow::Result<()> {
    let with_duration = state
        .events()
        .iter()
        .filter(|event| event.duration.is_some())
        .count();
    println!(
        "Normalized {} events ({} with a derived duration).",
        state.events().len(),
        with_duration
    );
    Ok(())
}

#[instrument(skip(state))]
fn cmd_export(state: &AppState) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(state.events())?;
    println!("{json}");
    Ok(())
}

#[instrument(skip(state))]
fn cmd_import(state: &mut AppState, path: Option<&Path>) -> anyhow::Result<()> {
    let raw = match path {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let events: Vec<EventRecord> = serde_json::from_str(&raw).context("failed parsing event list")?;
    let count = events.len();
    state
        .replace_events(events)
        .context("failed to persist imported events")?;

    println!("Imported {count} events.");
    Ok(())
}
