use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::duration::derive_duration;
use crate::event::EventRecord;
use crate::tags::{Document, TagColors};

pub const EVENTS_KEY: &str = "calendar_events";
pub const TAG_COLORS_KEY: &str = "settings.tagColors";
pub const DOCUMENTS_FILE: &str = "documents.json";

pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        (**self).set(key, value)
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    pub data_dir: PathBuf,
}

impl FileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        info!(data_dir = %data_dir.display(), "opened file store");
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn slot_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.slot_path(key);
        if !path.exists() {
            debug!(file = %path.display(), "slot is empty");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value), fields(bytes = value.len()))]
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.slot_path(key);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: RefCell<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(key: &str, value: &str) -> Self {
        let store = Self::new();
        store
            .slots
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.slots.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.slots
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub fn migrate_event(mut event: EventRecord) -> EventRecord {
    event.duration = None;
    if let Some(rule) = event.rrule.as_mut() {
        rule.extra.remove("duration");
    }
    event.duration = derive_duration(&event.start, event.end.as_deref(), event.all_day);
    event
}

pub fn migrate_events(events: Vec<EventRecord>) -> Vec<EventRecord> {
    events.into_iter().map(migrate_event).collect()
}

#[derive(Debug, Clone)]
pub struct EventRepository<S> {
    store: S,
}

impl<S: KeyValueStore> EventRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads, migrates and writes back the list. Failures are logged and
    /// yield an empty list.
    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> Vec<EventRecord> {
        match self.try_load() {
            Ok(events) => events,
            Err(err) => {
                error!(error = %format!("{err:#}"), "error loading events");
                vec![]
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn try_load(&self) -> anyhow::Result<Vec<EventRecord>> {
        let Some(raw) = self.store.get(EVENTS_KEY)? else {
            debug!("no stored events");
            return Ok(vec![]);
        };

        let values: Vec<serde_json::Value> =
            serde_json::from_str(&raw).with_context(|| format!("failed parsing {EVENTS_KEY}"))?;
        let total = values.len();
        let events = values
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value::<EventRecord>(value) {
                Ok(event) => Some(event),
                Err(err) => {
                    error!(index, error = %err, "skipping unreadable event");
                    None
                }
            })
            .collect::<Vec<_>>();

        let cleaned = migrate_events(events);
        if cleaned.len() == total {
            self.try_save(&cleaned)?;
        } else {
            warn!(
                skipped = total - cleaned.len(),
                "stored list left untouched until the next save"
            );
        }

        debug!(count = cleaned.len(), "loaded events");
        Ok(cleaned)
    }

    /// Overwrites the stored list. Failures are logged and swallowed.
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    pub fn save(&self, events: &[EventRecord]) {
        if let Err(err) = self.try_save(events) {
            error!(error = %format!("{err:#}"), "error saving events");
        }
    }

    pub fn try_save(&self, events: &[EventRecord]) -> anyhow::Result<()> {
        let serialized = serde_json::to_string(events)?;
        self.store
            .set(EVENTS_KEY, &serialized)
            .with_context(|| format!("failed writing {EVENTS_KEY}"))
    }
}

pub trait DocumentProvider {
    fn all_documents(&self) -> anyhow::Result<Vec<Document>>;
    fn tag_colors(&self) -> anyhow::Result<TagColors>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredTagColors {
    Record { value: TagColors },
    Plain(TagColors),
}

pub fn parse_tag_colors(raw: &str) -> anyhow::Result<TagColors> {
    let stored: StoredTagColors =
        serde_json::from_str(raw).with_context(|| format!("failed parsing {TAG_COLORS_KEY}"))?;
    Ok(match stored {
        StoredTagColors::Record { value } => value,
        StoredTagColors::Plain(map) => map,
    })
}

#[derive(Debug, Clone)]
pub struct JsonDocumentProvider<S> {
    pub documents_path: PathBuf,
    store: S,
}

impl<S: KeyValueStore> JsonDocumentProvider<S> {
    pub fn new(documents_path: PathBuf, store: S) -> Self {
        Self {
            documents_path,
            store,
        }
    }

    #[tracing::instrument(skip(self, colors))]
    pub fn set_tag_color(&self, colors: &mut TagColors, tag: &str, color: &str) -> anyhow::Result<()> {
        colors.insert(tag.to_string(), color.to_string());
        let serialized = serde_json::to_string(colors)?;
        self.store.set(TAG_COLORS_KEY, &serialized)
    }
}

impl<S: KeyValueStore> DocumentProvider for JsonDocumentProvider<S> {
    #[tracing::instrument(skip(self))]
    fn all_documents(&self) -> anyhow::Result<Vec<Document>> {
        if !self.documents_path.exists() {
            debug!(file = %self.documents_path.display(), "no documents file");
            return Ok(vec![]);
        }
        let raw = fs::read_to_string(&self.documents_path)
            .with_context(|| format!("failed reading {}", self.documents_path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", self.documents_path.display()))
    }

    #[tracing::instrument(skip(self))]
    fn tag_colors(&self) -> anyhow::Result<TagColors> {
        match self.store.get(TAG_COLORS_KEY)? {
            Some(raw) => parse_tag_colors(&raw),
            None => Ok(TagColors::new()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticDocuments {
    pub documents: Vec<Document>,
    pub tag_colors: TagColors,
}

impl DocumentProvider for StaticDocuments {
    fn all_documents(&self) -> anyhow::Result<Vec<Document>> {
        Ok(self.documents.clone())
    }

    fn tag_colors(&self) -> anyhow::Result<TagColors> {
        Ok(self.tag_colors.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventDuration;

    #[test]
    fn load_drops_stale_duration_on_single_day_event() {
        let store = MemoryStore::with_slot(
            EVENTS_KEY,
            r#"[{"id":"1","title":"Offsite","start":"2024-01-01","end":"2024-01-02","allDay":true,"tags":[],"color":"gray","duration":{"days":7}}]"#,
        );
        let repo = EventRepository::new(&store);
        let events = repo.load();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration, None);

        let written = store.get(EVENTS_KEY).expect("get").expect("slot written back");
        assert!(!written.contains("duration"));
    }

    #[test]
    fn load_derives_multi_day_duration() {
        let store = MemoryStore::with_slot(
            EVENTS_KEY,
            r#"[{"id":"1","title":"Trip","start":"2024-01-01","end":"2024-01-04","allDay":true,"tags":[],"color":"gray"}]"#,
        );
        let events = EventRepository::new(&store).load();
        assert_eq!(events[0].duration, Some(EventDuration::days(3)));
    }

    #[test]
    fn load_strips_legacy_rrule_duration() {
        let store = MemoryStore::with_slot(
            EVENTS_KEY,
            r#"[{"id":"1","title":"Gym","start":"2024-01-01T07:00:00","end":"2024-01-01T08:00:00","allDay":false,"tags":[],"color":"gray","rrule":{"freq":"DAILY","interval":1,"dtstart":"2024-01-01T07:00:00.000Z","until":null,"tzid":"UTC","duration":"01:00"}}]"#,
        );
        let events = EventRepository::new(&store).load();
        let rule = events[0].rrule.as_ref().expect("rrule kept");
        assert!(rule.extra.is_empty());
        assert_eq!(events[0].duration, Some(EventDuration::hms(1, 0, 0)));
    }

    #[test]
    fn load_is_idempotent() {
        let store = MemoryStore::with_slot(
            EVENTS_KEY,
            r#"[{"id":"1","title":"Trip","start":"2024-01-01","end":"2024-01-05","allDay":true,"tags":["x"],"color":"mint","duration":{"hours":2}}]"#,
        );
        let repo = EventRepository::new(&store);
        let first = repo.load();
        let first_raw = store.get(EVENTS_KEY).expect("get");
        let second = repo.load();
        assert_eq!(first, second);
        assert_eq!(first_raw, store.get(EVENTS_KEY).expect("get"));
    }

    #[test]
    fn one_bad_record_does_not_empty_the_list() {
        let store = MemoryStore::with_slot(
            EVENTS_KEY,
            r#"[{"id":"1","title":"Trip","start":"2024-01-01","allDay":true,"tags":[],"color":"gray"},
               {"id":"2","title":null,"start":"2024-01-02","allDay":null,"tags":null,"color":null},
               {"id":"3","title":"Broken","start":5}]"#,
        );
        let repo = EventRepository::new(&store);
        let events = repo.load();
        assert_eq!(
            events.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );
        assert_eq!(events[1].title, "");

        let raw = store.get(EVENTS_KEY).expect("get").expect("slot");
        assert!(raw.contains("Broken"));
    }

    #[test]
    fn corrupt_slot_falls_back_to_empty() {
        let store = MemoryStore::with_slot(EVENTS_KEY, "{not json");
        let repo = EventRepository::new(&store);
        assert!(repo.load().is_empty());
        assert!(repo.try_load().is_err());
    }

    #[test]
    fn tag_colors_accept_plain_and_record_shapes() {
        let plain = parse_tag_colors(r#"{"work":"red"}"#).expect("plain");
        let record = parse_tag_colors(r#"{"value":{"work":"red"}}"#).expect("record");
        assert_eq!(plain, record);
        assert_eq!(plain.get("work").map(String::as_str), Some("red"));
    }

    #[test]
    fn file_store_round_trips_slots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::open(dir.path()).expect("open store");
        assert_eq!(store.get(EVENTS_KEY).expect("get"), None);
        store.set(EVENTS_KEY, "[]").expect("set");
        assert_eq!(store.get(EVENTS_KEY).expect("get").as_deref(), Some("[]"));
        assert!(dir.path().join("calendar_events.json").exists());
    }
}
