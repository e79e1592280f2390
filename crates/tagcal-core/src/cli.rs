use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::event::{Frequency, RuleWeekday};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tagcal",
    version,
    about = "Tag-aware event calendar backed by local JSON storage",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rc-file", global = true)]
    pub rc_file: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List events in the visible window
    List(ListArgs),
    /// Create an event
    Add(EventArgs),
    /// Change an existing event
    Edit {
        id: String,
        #[command(flatten)]
        args: EventArgs,
    },
    /// Remove an event
    Delete { id: String },
    /// Show one event in detail
    Show { id: String },
    /// List tags from root documents, or set a tag color
    Tags(TagsArgs),
    /// List the named colors
    Palette,
    /// Normalize stored events and report the result
    Migrate,
    /// Print the stored event list as JSON
    Export,
    /// Replace the stored event list with a JSON array
    Import {
        /// Reads stdin when omitted
        path: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// month, week or day
    #[arg(long)]
    pub view: Option<String>,

    /// Focus date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub date: Option<String>,

    /// Move the window back (negative) or forward by whole views
    #[arg(long, allow_hyphen_values = true, default_value_t = 0)]
    pub shift: i32,

    /// Emphasize events carrying this tag; repeatable
    #[arg(long = "tag", action = ArgAction::Append)]
    pub tags: Vec<String>,

    /// Ignore the window and list every event
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EventArgs {
    #[arg(long)]
    pub title: Option<String>,

    /// YYYY-MM-DD
    #[arg(long)]
    pub start: Option<String>,

    /// YYYY-MM-DD
    #[arg(long)]
    pub end: Option<String>,

    /// HH:MM
    #[arg(long = "start-time")]
    pub start_time: Option<String>,

    /// HH:MM
    #[arg(long = "end-time")]
    pub end_time: Option<String>,

    #[arg(long = "all-day", conflicts_with = "timed")]
    pub all_day: bool,

    #[arg(long)]
    pub timed: bool,

    /// Toggle a tag on the event; repeatable
    #[arg(long = "tag", action = ArgAction::Append)]
    pub tags: Vec<String>,

    /// Named palette color
    #[arg(long)]
    pub color: Option<String>,

    /// Repeat DAILY, WEEKLY, MONTHLY or YEARLY
    #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Frequency>()))]
    pub repeat: Option<Frequency>,

    #[arg(long = "no-repeat", conflicts_with = "repeat")]
    pub no_repeat: bool,

    #[arg(long)]
    pub interval: Option<u32>,

    /// Weekdays for weekly repeats, e.g. MO,WE
    #[arg(
        long = "on",
        value_delimiter = ',',
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<RuleWeekday>())
    )]
    pub weekdays: Vec<RuleWeekday>,

    /// Last day of the series (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TagsArgs {
    /// Set TAG=COLOR in the tag color settings
    #[arg(
        long = "set-color",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>())
    )]
    pub set_color: Option<KeyVal>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of argv.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&argv(&["tagcal", "rc.color=off", "list", "rc.timezone:UTC"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, argv(&["tagcal", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.timezone".to_string(), "UTC".to_string()),
            ]
        );
    }

    #[test]
    fn parses_recurring_add() {
        let cli = GlobalCli::try_parse_from(argv(&[
            "tagcal", "add", "--title", "Gym", "--start", "2024-01-01", "--repeat", "weekly",
            "--interval", "2", "--on", "MO,WE", "--until", "2024-03-01", "--tag", "health",
        ]))
        .expect("parse");

        let Some(Command::Add(args)) = cli.command else {
            panic!("expected add command");
        };
        assert_eq!(args.repeat, Some(Frequency::Weekly));
        assert_eq!(args.weekdays, vec![RuleWeekday::Monday, RuleWeekday::Wednesday]);
        assert_eq!(args.tags, vec!["health".to_string()]);
    }

    #[test]
    fn all_day_conflicts_with_timed() {
        assert!(GlobalCli::try_parse_from(argv(&["tagcal", "add", "--all-day", "--timed"])).is_err());
    }
}
