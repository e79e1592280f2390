use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::resolve_calendar_timezone;
use crate::event::EventRecord;
use crate::form::EventForm;
use crate::palette::Palette;
use crate::tags::StyledEvent;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    timezone: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color,
            timezone: resolve_calendar_timezone(cfg),
        })
    }

    #[tracing::instrument(skip(self, events))]
    pub fn print_event_table(&mut self, title: &str, events: &[StyledEvent<'_>]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let rows = self.event_rows(events);
        writeln!(out, "{title}")?;
        if rows.is_empty() {
            writeln!(out, "No events.")?;
            return Ok(());
        }
        write_table(&mut out, event_headers(), rows)
    }

    fn event_rows(&self, events: &[StyledEvent<'_>]) -> Vec<Vec<String>> {
        events
            .iter()
            .map(|styled| {
                let event = styled.event;
                let cells = vec![
                    short_id(&event.id).to_string(),
                    EventForm::from_event(event, self.timezone).display_range(),
                    event.title.clone(),
                    event.tags.iter().map(|tag| format!("#{tag}")).collect::<Vec<_>>().join(" "),
                    event.color.clone(),
                    event
                        .rrule
                        .as_ref()
                        .map(|rule| format!("{}/{}", rule.freq.label(), rule.interval))
                        .unwrap_or_default(),
                ];
                if styled.muted {
                    cells.iter().map(|cell| self.paint(cell, "2")).collect()
                } else {
                    cells
                        .into_iter()
                        .enumerate()
                        .map(|(idx, cell)| if idx == 0 { self.paint(&cell, "33") } else { cell })
                        .collect()
                }
            })
            .collect()
    }

    #[tracing::instrument(skip(self, event))]
    pub fn print_event_info(&mut self, event: &EventRecord) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let form = EventForm::from_event(event, self.timezone);

        writeln!(out, "id        {}", event.id)?;
        writeln!(out, "title     {}", event.title)?;
        writeln!(out, "when      {}", form.display_range())?;
        writeln!(out, "all day   {}", if event.all_day { "yes" } else { "no" })?;
        writeln!(out, "start     {}", event.start)?;
        writeln!(out, "end       {}", event.end.as_deref().unwrap_or("-"))?;
        writeln!(out, "tags      {}", event.tags.join(", "))?;
        writeln!(
            out,
            "color     {} ({} on {})",
            event.color,
            event.text_color.as_deref().unwrap_or("-"),
            event.background_color.as_deref().unwrap_or("-")
        )?;
        if let Some(duration) = &event.duration {
            writeln!(out, "duration  {duration}")?;
        }
        if let Some(rule) = &event.rrule {
            writeln!(out, "repeat    {} every {}", rule.freq.label(), rule.interval)?;
            if let Some(days) = &rule.byweekday {
                let codes = days.iter().map(|d| d.code()).collect::<Vec<_>>().join(",");
                writeln!(out, "on        {codes}")?;
            }
            writeln!(out, "dtstart   {}", rule.dtstart)?;
            writeln!(out, "until     {}", rule.until.as_deref().unwrap_or("-"))?;
            writeln!(out, "tzid      {}", rule.tzid)?;
        }

        Ok(())
    }

    pub fn print_tags(&mut self, tags: &[(String, String, bool)]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if tags.is_empty() {
            writeln!(out, "No tags.")?;
            return Ok(());
        }
        let rows = tags
            .iter()
            .map(|(tag, color, used)| {
                vec![
                    tag.clone(),
                    color.clone(),
                    if *used { "yes".to_string() } else { String::new() },
                ]
            })
            .collect();
        write_table(
            &mut out,
            vec!["Tag".to_string(), "Color".to_string(), "In use".to_string()],
            rows,
        )
    }

    pub fn print_palette(&mut self, palette: &Palette) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        for category in palette.categories() {
            writeln!(out, "{category}")?;
            for swatch in palette.in_category(category) {
                let chip = self.paint_rgb(&format!(" {} ", swatch.name), &swatch.background, swatch.text_hex());
                writeln!(out, "  {chip} {} / {}", swatch.background, swatch.text_hex())?;
            }
        }
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.color && io::stdout().is_terminal()
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.enabled() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    fn paint_rgb(&self, text: &str, background: &str, foreground: &str) -> String {
        match (parse_hex(background), parse_hex(foreground)) {
            (Some((br, bg, bb)), Some((fr, fg, fb))) if self.enabled() => {
                format!("\x1b[48;2;{br};{bg};{bb}m\x1b[38;2;{fr};{fg};{fb}m{text}\x1b[0m")
            }
            _ => text.to_string(),
        }
    }
}

fn event_headers() -> Vec<String> {
    ["ID", "When", "Title", "Tags", "Color", "Repeat"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map(|(idx, _)| &id[..idx]).unwrap_or(id)
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(digits.get(range)?, 16).ok();
    Some((channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

fn write_table<W: Write>(mut writer: W, headers: Vec<String>, rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(widths.iter().copied()) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(widths.iter().copied()) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_pads_by_visible_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["ID".to_string(), "Title".to_string()],
            vec![vec!["\x1b[33mabc\x1b[0m".to_string(), "Café".to_string()]],
        )
        .expect("write table");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID  Title ");
        assert_eq!(lines[1], "--- ----- ");
        assert_eq!(strip_ansi(lines[2]), "abc Café  ");
    }

    #[test]
    fn hex_colors_parse() {
        assert_eq!(parse_hex("#98D8C8"), Some((0x98, 0xD8, 0xC8)));
        assert_eq!(parse_hex("98D8C8"), None);
        assert_eq!(parse_hex("#12"), None);
    }

    #[test]
    fn ids_are_shortened() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("42"), "42");
    }
}
