pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod duration;
pub mod event;
pub mod form;
pub mod palette;
pub mod render;
pub mod storage;
pub mod tags;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{debug, info};

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let pre = cli::preprocess_args(&raw_args)?;
    let cli = cli::GlobalCli::parse_from(pre.cleaned_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(verbose = cli.verbose, quiet = cli.quiet, "starting tagcal");
    debug!(?pre.rc_overrides, "preprocessed rc overrides");

    let mut cfg = config::Config::load(cli.rc_file.as_deref())?;
    cfg.apply_overrides(
        pre.rc_overrides
            .into_iter()
            .chain(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value))),
    );

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;

    let store = storage::FileStore::open(&data_dir)
        .with_context(|| format!("failed to open event store at {}", data_dir.display()))?;

    let timezone = datetime::resolve_calendar_timezone(&cfg);
    let options = calendar::CalendarOptions {
        view: cfg.default_view(),
        focus: Utc::now().with_timezone(&timezone).date_naive(),
        week_start: cfg.week_start(),
        timezone,
    };

    let repo = storage::EventRepository::new(store.clone());
    let documents =
        storage::JsonDocumentProvider::new(data_dir.join(storage::DOCUMENTS_FILE), store);
    let mut state = calendar::CalendarState::open(repo, documents, options);

    let mut renderer = render::Renderer::new(&cfg)?;
    let command = cli
        .command
        .unwrap_or_else(|| cli::Command::List(cli::ListArgs::default()));

    commands::dispatch(&mut state, &mut renderer, command)?;

    info!("done");
    Ok(())
}
