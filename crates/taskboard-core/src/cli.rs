use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

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
    name = "taskboard",
    version,
    about = "Taskboard: a to-do list with projects, tags and repeating tasks",
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

    #[arg(long = "boardrc", global = true)]
    pub boardrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Fields shared by `add` and `modify`. On `modify`, an empty value clears
/// the field.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TaskFields {
    #[arg(long, short = 'd')]
    pub description: Option<String>,

    /// Due date: `today`, `tomorrow`, `friday`, `+3d`, `2026-10-31T18:00`.
    #[arg(long)]
    pub due: Option<String>,

    #[arg(long, short = 'p')]
    pub priority: Option<String>,

    #[arg(long = "project", short = 'P')]
    pub project: Option<String>,

    /// Comma-separated, e.g. `work,urgent`.
    #[arg(long, short = 't')]
    pub tags: Option<String>,

    #[arg(long, short = 'a')]
    pub assignee: Option<String>,

    /// `daily`, `weekly`, `monthly` or `none`.
    #[arg(long, short = 'r')]
    pub repeat: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a task.
    Add {
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
        #[command(flatten)]
        fields: TaskFields,
    },
    /// Create a task from a title alone.
    Quick {
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
    },
    /// List tasks matching `key:value` filter terms.
    List {
        terms: Vec<String>,
        #[arg(long)]
        view: Option<String>,
        /// Only tasks due on this calendar date (`today`, `friday`, `2026-10-23`).
        #[arg(long)]
        day: Option<String>,
    },
    /// Show every field of one task.
    Info { id: u64 },
    /// Overwrite fields of a task.
    Modify {
        id: u64,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: TaskFields,
    },
    /// Toggle a task between active and completed.
    Done { id: u64 },
    /// Toggle a task between active and paused.
    Pause { id: u64 },
    Delete { id: u64 },
    /// Remove every completed task.
    Clear,
    Comment {
        id: u64,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Add time to a task's timer: `90`, `45m`, `1h30m`.
    Track { id: u64, duration: String },
    /// Print the notes, or replace them when text is given.
    Notes { text: Vec<String> },
    Stats,
    /// Write all tasks as JSON.
    Export {
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Import tasks from a JSON file, or `-` for stdin.
    Import { source: PathBuf },
    /// Fire repeat triggers that are due now.
    Tick,
    /// Keep firing repeat triggers as they come due.
    Watch,
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

/// Pulls positional `rc.key=value` and `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> PreprocessedArgs {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    }
}
