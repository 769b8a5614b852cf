pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod error;
pub mod notify;
pub mod query;
pub mod render;
pub mod schedule;
pub mod storage;
pub mod store;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use error::{
  StoreError,
  StoreResult
};
pub use storage::{
  FileStorage,
  MemoryStorage,
  Storage
};
pub use store::{
  StoreOptions,
  TaskStore
};
pub use task::{
  Priority,
  Repeat,
  Status,
  Task,
  TaskDraft,
  TaskPatch
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args);
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting taskboard"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.boardrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let storage =
    storage::FileStorage::open(
      &data_dir
    )?;
  let tz = datetime::resolve_timezone(
    cfg.get("timezone").as_deref()
  );
  let notifier = notify::notifier_for(
    &cfg, &data_dir
  );

  let mut store = store::TaskStore::open(
    storage,
    store::StoreOptions {
      timezone: tz
    },
    Utc::now()
  )
  .with_context(|| {
    format!(
      "failed to open task store at {}",
      data_dir.display()
    )
  })?
  .with_notifier(notifier);

  let renderer =
    render::Renderer::new(&cfg, tz)?;

  commands::dispatch(
    &mut store,
    &cfg,
    &renderer,
    cli.command
  )?;

  info!("done");
  Ok(())
}
