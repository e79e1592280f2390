use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::EventRecord;
use crate::palette::{self, DEFAULT_COLOR, MUTED_BACKGROUND, MUTED_TEXT};

/// An entry from the external document tree. Only root documents carry
/// tag and color metadata for the calendar.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_doc: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl Document {
    pub fn is_root(&self) -> bool {
        self.parent_doc
            .as_deref()
            .map(str::trim)
            .is_none_or(str::is_empty)
    }
}

pub type TagColors = BTreeMap<String, String>;

pub fn root_documents(docs: Vec<Document>) -> Vec<Document> {
    docs.into_iter().filter(Document::is_root).collect()
}

pub fn tag_universe(docs: &[Document]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in docs.iter().flat_map(|doc| doc.tags.iter()) {
        if !out.iter().any(|seen| seen == tag) {
            out.push(tag.clone());
        }
    }
    out
}

/// Color for a single tag: the first document carrying `tag` decides via
/// its own first tag.
pub fn tag_chip_color(tag: &str, docs: &[Document], tag_colors: &TagColors) -> String {
    docs.iter()
        .find(|doc| doc.tags.iter().any(|t| t == tag))
        .and_then(|doc| doc.tags.first())
        .and_then(|owner_tag| tag_colors.get(owner_tag))
        .cloned()
        .unwrap_or_else(|| DEFAULT_COLOR.to_string())
}

pub fn resolve_color(tags: &[String], docs: &[Document], tag_colors: &TagColors) -> String {
    match tags.first() {
        Some(first) => tag_chip_color(first, docs, tag_colors),
        None => DEFAULT_COLOR.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    selected: Vec<String>,
}

impl TagFilter {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut filter = Self::default();
        for tag in tags {
            let tag = tag.into();
            if !filter.contains(&tag) {
                filter.selected.push(tag);
            }
        }
        filter
    }

    pub fn toggle(&mut self, tag: &str) -> bool {
        if let Some(idx) = self.selected.iter().position(|t| t == tag) {
            self.selected.remove(idx);
            false
        } else {
            self.selected.push(tag.to_string());
            true
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.selected.iter().any(|t| t == tag)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn tags(&self) -> &[String] {
        &self.selected
    }

    pub fn matches(&self, event: &EventRecord) -> bool {
        self.is_empty() || event.tags.iter().any(|tag| self.contains(tag))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyledEvent<'a> {
    pub event: &'a EventRecord,
    pub background_color: String,
    pub text_color: String,
    pub muted: bool,
}

/// Applies the filter as styling. Every input event appears in the output.
pub fn style_events<'a>(events: &'a [EventRecord], filter: &TagFilter) -> Vec<StyledEvent<'a>> {
    events.iter().map(|event| style_event(event, filter)).collect()
}

pub fn style_event<'a>(event: &'a EventRecord, filter: &TagFilter) -> StyledEvent<'a> {
    if !filter.matches(event) {
        return StyledEvent {
            event,
            background_color: MUTED_BACKGROUND.to_string(),
            text_color: MUTED_TEXT.to_string(),
            muted: true,
        };
    }

    let swatch = palette::palette().swatch(&event.color);
    StyledEvent {
        event,
        background_color: event
            .background_color
            .clone()
            .unwrap_or_else(|| swatch.background.clone()),
        text_color: event
            .text_color
            .clone()
            .unwrap_or_else(|| swatch.text_hex().to_string()),
        muted: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, parent: Option<&str>, tags: &[&str]) -> Document {
        Document {
            id: id.to_string(),
            title: id.to_string(),
            parent_doc: parent.map(str::to_string),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn event(id: &str, tags: &[&str]) -> EventRecord {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "title": id,
            "start": "2024-01-01",
            "allDay": true,
            "tags": tags,
            "color": "mint",
        }))
        .expect("event")
    }

    #[test]
    fn universe_comes_from_root_documents_only() {
        let docs = root_documents(vec![
            doc("a", None, &["work", "urgent"]),
            doc("b", Some("a"), &["hidden"]),
            doc("c", Some(""), &["home", "work"]),
        ]);
        assert_eq!(tag_universe(&docs), vec!["work", "urgent", "home"]);
    }

    #[test]
    fn color_resolution_goes_through_owning_document() {
        let docs = vec![doc("a", None, &["project", "design"]), doc("b", None, &["home"])];
        let colors = TagColors::from([
            ("project".to_string(), "red".to_string()),
            ("design".to_string(), "mint".to_string()),
        ]);

        assert_eq!(resolve_color(&["design".to_string()], &docs, &colors), "red");
        assert_eq!(resolve_color(&["home".to_string()], &docs, &colors), DEFAULT_COLOR);
        assert_eq!(resolve_color(&["missing".to_string()], &docs, &colors), DEFAULT_COLOR);
        assert_eq!(resolve_color(&[], &docs, &colors), DEFAULT_COLOR);
    }

    #[test]
    fn toggling_is_reversible() {
        let mut filter = TagFilter::default();
        assert!(filter.toggle("work"));
        assert!(filter.toggle("home"));
        assert!(!filter.toggle("work"));
        assert_eq!(filter.tags(), ["home".to_string()]);
    }

    #[test]
    fn unmatched_filter_mutes_without_dropping() {
        let events = vec![event("1", &["work"]), event("2", &[])];

        let open = style_events(&events, &TagFilter::default());
        assert!(open.iter().all(|styled| !styled.muted));

        let filter = TagFilter::new(["nothing-has-this"]);
        let styled = style_events(&events, &filter);
        assert_eq!(styled.len(), events.len());
        assert!(styled.iter().all(|s| s.muted && s.background_color == MUTED_BACKGROUND));
    }

    #[test]
    fn matched_events_keep_palette_colors() {
        let events = vec![event("1", &["work"]), event("2", &["home"])];
        let styled = style_events(&events, &TagFilter::new(["work"]));
        assert!(!styled[0].muted);
        assert_eq!(styled[0].background_color, palette::palette().swatch("mint").background);
        assert!(styled[1].muted);
    }
}
