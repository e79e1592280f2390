use std::sync::OnceLock;

use serde::Deserialize;

const PALETTE_TOML: &str = include_str!("palette.toml");

pub const DEFAULT_COLOR: &str = "gray";

pub const MUTED_BACKGROUND: &str = "#E2E8F0";
pub const MUTED_TEXT: &str = "#718096";

const DARK_TEXT: &str = "#000000";
const LIGHT_TEXT: &str = "#FFFFFF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextIntensity {
    Light,
    Dark,
}

impl TextIntensity {
    pub fn hex(self) -> &'static str {
        match self {
            Self::Light => LIGHT_TEXT,
            Self::Dark => DARK_TEXT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Swatch {
    pub name: String,
    pub category: String,
    pub background: String,
    pub text: TextIntensity,
}

impl Swatch {
    pub fn text_hex(&self) -> &'static str {
        self.text.hex()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Palette {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub colors: Vec<Swatch>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            version: 0,
            colors: vec![Swatch {
                name: DEFAULT_COLOR.to_string(),
                category: "Neutrals".to_string(),
                background: "#A0AEC0".to_string(),
                text: TextIntensity::Dark,
            }],
        }
    }
}

impl Palette {
    pub fn get(&self, name: &str) -> Option<&Swatch> {
        self.colors.iter().find(|swatch| swatch.name == name)
    }

    pub fn swatch(&self, name: &str) -> &Swatch {
        self.get(name)
            .or_else(|| self.get(DEFAULT_COLOR))
            .or_else(|| self.colors.first())
            .unwrap_or_else(|| fallback_swatch())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn categories(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for swatch in &self.colors {
            if !out.contains(&swatch.category.as_str()) {
                out.push(&swatch.category);
            }
        }
        out
    }

    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Swatch> + 'a {
        self.colors.iter().filter(move |swatch| swatch.category == category)
    }
}

fn fallback_swatch() -> &'static Swatch {
    static FALLBACK: OnceLock<Swatch> = OnceLock::new();
    FALLBACK.get_or_init(|| {
        let mut fallback = Palette::default();
        fallback.colors.remove(0)
    })
}

pub fn palette() -> &'static Palette {
    static PALETTE: OnceLock<Palette> = OnceLock::new();
    PALETTE.get_or_init(load_palette)
}

fn load_palette() -> Palette {
    match toml::from_str::<Palette>(PALETTE_TOML) {
        Ok(palette) if !palette.colors.is_empty() => {
            tracing::debug!(
                version = palette.version,
                color_count = palette.colors.len(),
                "loaded color palette"
            );
            palette
        }
        Ok(_) => {
            tracing::warn!("color palette was empty; using fallback palette");
            Palette::default()
        }
        Err(error) => {
            tracing::error!(%error, "failed to parse color palette; using fallback palette");
            Palette::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_palette_has_every_category() {
        let palette = palette();
        assert_eq!(
            palette.categories(),
            vec![
                "Dark Colors",
                "Reds & Pinks",
                "Purples",
                "Oranges & Yellows",
                "Greens",
                "Blues",
                "Neutrals"
            ]
        );
        assert_eq!(palette.in_category("Greens").count(), 3);
    }

    #[test]
    fn unknown_names_fall_back_to_gray() {
        let swatch = palette().swatch("no-such-color");
        assert_eq!(swatch.name, DEFAULT_COLOR);
    }

    #[test]
    fn empty_palette_still_yields_a_swatch() {
        let empty = Palette {
            version: 1,
            colors: vec![],
        };
        let swatch = empty.swatch("mint");
        assert_eq!(swatch.name, DEFAULT_COLOR);
        assert!(!empty.contains("mint"));
    }

    #[test]
    fn text_intensity_maps_to_hex() {
        assert_eq!(palette().swatch("black").text_hex(), "#FFFFFF");
        assert_eq!(palette().swatch("mint").text_hex(), "#000000");
        assert!(palette().swatch("mint").background.starts_with('#'));
    }
}
