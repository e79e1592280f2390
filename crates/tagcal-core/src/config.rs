use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{debug, info, trace, warn};

use crate::calendar::ViewMode;

pub const RC_ENV_VAR: &str = "TAGCALRC";

#[derive(Debug, Clone)]
pub struct Config {
    map: HashMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert("data.location".to_string(), "~/.tagcal".to_string());
        map.insert("default.view".to_string(), "month".to_string());
        map.insert("week.start".to_string(), "monday".to_string());
        map.insert("color".to_string(), "on".to_string());
        Self {
            map,
            loaded_files: vec![],
        }
    }
}

impl Config {
    #[tracing::instrument(skip(rc_override))]
    pub fn load(rc_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        match resolve_rc_path(rc_override)? {
            Some(path) => {
                info!(rc = %path.display(), "loading tagcalrc");
                cfg.load_file(&path)?;
            }
            None => warn!("no tagcalrc found; using defaults"),
        }

        Ok(cfg)
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.map.insert(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn default_view(&self) -> ViewMode {
        self.get("default.view")
            .and_then(|raw| ViewMode::from_key(raw.trim()))
            .unwrap_or(ViewMode::Month)
    }

    pub fn week_start(&self) -> chrono::Weekday {
        match self.get("week.start") {
            Some(raw) if raw.trim().eq_ignore_ascii_case("sunday") => chrono::Weekday::Sun,
            _ => chrono::Weekday::Mon,
        }
    }

    #[tracing::instrument(skip(self))]
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.loaded_files.push(path.clone());

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        for (line_num, raw_line) in text.lines().enumerate() {
            let line = match raw_line.split_once('#') {
                Some((before, _)) => before.trim(),
                None => raw_line.trim(),
            };
            if line.is_empty() {
                continue;
            }

            if let Some(include_rest) = line.strip_prefix("include ") {
                let include_path = resolve_include_path(&base_dir, include_rest.trim())?;
                debug!(
                    file = %path.display(),
                    include = %include_path.display(),
                    line = line_num + 1,
                    "processing include"
                );
                if include_path.exists() {
                    self.load_file(&include_path)?;
                } else {
                    warn!(include = %include_path.display(), "include file does not exist; skipping");
                }
                continue;
            }

            let (k, v) = line.split_once('=').ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            let key = k.trim().to_string();
            let value = v.trim().to_string();
            trace!(key = %key, value = %value, "loaded config key");
            self.map.insert(key, value);
        }

        Ok(())
    }
}

#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = if let Some(path) = override_dir {
        path.to_path_buf()
    } else if let Some(cfg_value) = cfg.get("data.location") {
        expand_tilde(Path::new(&cfg_value))
    } else {
        default_data_dir()?
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

fn resolve_rc_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(rc_env) = std::env::var(RC_ENV_VAR) {
        if rc_env == "/dev/null" {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(rc_env)));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let candidate = home.join(".tagcalrc");
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(".tagcal"))
}

fn resolve_include_path(base_dir: &Path, include: &str) -> anyhow::Result<PathBuf> {
    if include.trim().is_empty() {
        return Err(anyhow!("include path cannot be empty"));
    }

    let expanded = expand_tilde(Path::new(include));
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base_dir.join(expanded))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_keys_comments_and_includes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let extra = dir.path().join("extra.rc");
        fs::write(&extra, "timezone = Europe/Berlin\n").expect("write include");

        let main = dir.path().join("main.rc");
        let mut file = fs::File::create(&main).expect("create rc");
        writeln!(file, "# calendar settings").expect("write");
        writeln!(file, "default.view = week   # start in week view").expect("write");
        writeln!(file, "include extra.rc").expect("write");
        writeln!(file, "include missing.rc").expect("write");
        drop(file);

        let cfg = Config::load(Some(&main)).expect("load config");
        assert_eq!(cfg.default_view(), ViewMode::Week);
        assert_eq!(cfg.get("timezone").as_deref(), Some("Europe/Berlin"));
        assert_eq!(cfg.loaded_files.len(), 2);
    }

    #[test]
    fn rejects_lines_without_equals() {
        let dir = tempfile::tempdir().expect("tempdir");
        let main = dir.path().join("bad.rc");
        fs::write(&main, "just words\n").expect("write rc");
        assert!(Config::load(Some(&main)).is_err());
    }

    #[test]
    fn overrides_strip_rc_prefix() {
        let mut cfg = Config::default();
        cfg.apply_overrides([
            ("rc.color".to_string(), "off".to_string()),
            ("week.start".to_string(), "Sunday".to_string()),
        ]);
        assert_eq!(cfg.get("color").as_deref(), Some("off"));
        assert_eq!(cfg.week_start(), chrono::Weekday::Sun);
    }
}
