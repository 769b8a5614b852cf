use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::thread;
use std::time::Duration as StdDuration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::cli::{Command, TaskFields};
use crate::config::Config;
use crate::datetime::{local_date, parse_date_expr};
use crate::query::{FilterCriteria, StatusFilter, View, apply_view, filter, summarize, tasks_on_day};
use crate::render::{Renderer, format_timer};
use crate::storage::FileStorage;
use crate::store::{TaskStore, export_file_name};
use crate::task::{Priority, Repeat, TaskDraft, TaskPatch};

type Store = TaskStore<FileStorage>;

#[instrument(skip(store, cfg, renderer, command))]
pub fn dispatch(
    store: &mut Store,
    cfg: &Config,
    renderer: &Renderer,
    command: Option<Command>,
) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(?command, "dispatching command");

    match command {
        None => cmd_default(store, cfg, renderer, now),
        Some(Command::Add { title, fields }) => cmd_add(store, &title.join(" "), fields, now),
        Some(Command::Quick { title }) => {
            let task = store.quick_add(&title.join(" "), now)?;
            println!("Created task {}.", task.id);
            Ok(())
        }
        Some(Command::List { terms, view, day }) => {
            cmd_list(store, renderer, &terms, view.as_deref(), day.as_deref(), now)
        }
        Some(Command::Info { id }) => {
            let task = store.get(id).ok_or_else(|| anyhow!("task not found: {id}"))?;
            renderer.print_task_info(task, store.scheduler().state(id))
        }
        Some(Command::Modify { id, title, fields }) => cmd_modify(store, id, title, fields, now),
        Some(Command::Done { id }) => cmd_done(store, id, now),
        Some(Command::Pause { id }) => {
            let task = store.toggle_pause(id)?;
            println!("Task {} is {}.", task.id, task.status);
            Ok(())
        }
        Some(Command::Delete { id }) => {
            if store.delete(id)? {
                println!("Deleted task {id}.");
            } else {
                println!("No task {id}; nothing deleted.");
            }
            Ok(())
        }
        Some(Command::Clear) => {
            let removed = store.clear_completed()?;
            println!("Removed {removed} completed task(s).");
            Ok(())
        }
        Some(Command::Comment { id, text }) => {
            let task = store.add_comment(id, &text.join(" "), now)?;
            println!("Task {} has {} comment(s).", task.id, task.comments.len());
            Ok(())
        }
        Some(Command::Track { id, duration }) => {
            let seconds = parse_duration(&duration)?;
            let task = store.track_time(id, seconds)?;
            println!("Task {} timer: {}.", task.id, format_timer(task.timer));
            Ok(())
        }
        Some(Command::Notes { text }) => cmd_notes(store, &text),
        Some(Command::Stats) => {
            let summary = summarize(store.tasks(), now, store.timezone());
            renderer.print_summary(&summary)
        }
        Some(Command::Export { output }) => cmd_export(store, output.as_deref(), now),
        Some(Command::Import { source }) => cmd_import(store, &source, now),
        Some(Command::Tick) => cmd_tick(store, now),
        Some(Command::Watch) => cmd_watch(store, cfg),
    }
}

/// Bare invocation lists tasks through `default.view`, which names either a
/// status (`active`, `all`) or a preset view (`today`, `urgent`).
fn cmd_default(store: &Store, cfg: &Config, renderer: &Renderer, now: DateTime<Utc>) -> anyhow::Result<()> {
    let setting = cfg.get("default.view").unwrap_or_else(|| "active".to_string());
    if setting.parse::<View>().is_ok() {
        return cmd_list(store, renderer, &[], Some(setting.as_str()), None, now);
    }

    let status = setting
        .parse::<StatusFilter>()
        .with_context(|| format!("invalid default.view setting: {setting}"))?;
    let criteria = FilterCriteria::with_status(status);
    renderer.print_task_table(&filter(store.tasks(), &criteria), now)
}

#[instrument(skip(store, fields, now))]
fn cmd_add(store: &mut Store, title: &str, fields: TaskFields, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command add");
    let tz = store.timezone();

    let draft = TaskDraft {
        title: title.to_string(),
        description: fields.description,
        date_time: fields
            .due
            .as_deref()
            .map(|raw| parse_date_expr(raw, now, tz))
            .transpose()?,
        priority: fields.priority.as_deref().map(str::parse::<Priority>).transpose()?,
        project: fields.project,
        tags: fields.tags.unwrap_or_default(),
        assignee: fields.assignee,
        repeat: match fields.repeat.as_deref() {
            Some(raw) => Repeat::parse_optional(raw)?,
            None => None,
        },
    };

    let task = store.create(draft, now)?;
    println!("Created task {}.", task.id);
    if let (Some(repeat), Some(next)) = (task.repeat, task.next_due_at) {
        println!(
            "Repeats {repeat}; next occurrence due {}.",
            next.with_timezone(&tz).format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn cmd_list(
    store: &Store,
    renderer: &Renderer,
    terms: &[String],
    view: Option<&str>,
    day: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let tz = store.timezone();
    let criteria = FilterCriteria::parse(terms, now, tz)?;
    let mut tasks = filter(store.tasks(), &criteria);
    if let Some(view) = view {
        tasks = apply_view(&tasks, view.parse::<View>()?, now, tz);
    }
    if let Some(day) = day {
        let date = local_date(parse_date_expr(day, now, tz)?, tz);
        tasks = tasks_on_day(tasks, date, tz);
    }
    debug!(count = tasks.len(), "listing tasks");
    renderer.print_task_table(&tasks, now)
}

#[instrument(skip(store, title, fields, now))]
fn cmd_modify(
    store: &mut Store,
    id: u64,
    title: Option<String>,
    fields: TaskFields,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command modify");
    let tz = store.timezone();

    let date_time = match fields.due.as_deref().map(str::trim) {
        None => None,
        Some("" | "none") => Some(None),
        Some(raw) => Some(Some(parse_date_expr(raw, now, tz)?)),
    };

    let patch = TaskPatch {
        title,
        description: fields.description.map(Some),
        date_time,
        priority: fields.priority.as_deref().map(str::parse::<Priority>).transpose()?,
        project: fields.project,
        tags: fields.tags,
        assignee: fields.assignee.map(Some),
        repeat: fields.repeat.as_deref().map(Repeat::parse_optional).transpose()?,
    };
    if patch.is_empty() {
        return Err(anyhow!("nothing to modify; pass at least one field"));
    }

    let task = store.update(id, patch, now)?;
    println!("Modified task {}.", task.id);
    Ok(())
}

fn cmd_done(store: &mut Store, id: u64, now: DateTime<Utc>) -> anyhow::Result<()> {
    let before = store.len();
    let task = store.toggle_completion(id, now)?;
    if task.is_completed() {
        println!("Completed task {}.", task.id);
    } else {
        println!("Reopened task {}.", task.id);
    }

    if store.len() > before
        && let Some(spawned) = store.tasks().first()
    {
        println!("Created next occurrence {}.", spawned.id);
    }
    Ok(())
}

fn cmd_notes(store: &mut Store, text: &[String]) -> anyhow::Result<()> {
    if text.is_empty() {
        let notes = store.notes()?;
        if notes.is_empty() {
            println!("No notes.");
        } else {
            println!("{notes}");
        }
        return Ok(());
    }

    store.set_notes(&text.join(" "))?;
    println!("Notes saved.");
    Ok(())
}

#[instrument(skip(store, output, now))]
fn cmd_export(store: &Store, output: Option<&Path>, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command export");
    let payload = store.export_json()?;

    let Some(output) = output else {
        println!("{payload}");
        return Ok(());
    };

    let path = if output.is_dir() {
        output.join(export_file_name(now, store.timezone()))
    } else {
        output.to_path_buf()
    };
    fs::write(&path, payload).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Exported {} task(s) to {}.", store.len(), path.display());
    Ok(())
}

#[instrument(skip(store, now))]
fn cmd_import(store: &mut Store, source: &Path, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command import");
    let text = if source == Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).context("failed reading stdin")?;
        buf
    } else {
        fs::read_to_string(source).with_context(|| format!("failed to read {}", source.display()))?
    };

    let imported = store.import_json(&text, now)?;
    println!("Imported {} task(s).", imported.len());
    Ok(())
}

fn cmd_tick(store: &mut Store, now: DateTime<Utc>) -> anyhow::Result<()> {
    let spawned = store.tick(now)?;
    for task in &spawned {
        println!("Created task {} ({}).", task.id, task.title);
    }
    if spawned.is_empty() {
        println!("No repeat triggers due.");
    }
    Ok(())
}

/// Runs until interrupted, polling the repeat schedule.
#[instrument(skip(store, cfg))]
fn cmd_watch(store: &mut Store, cfg: &Config) -> anyhow::Result<()> {
    let poll = cfg.poll_seconds()?;
    info!(poll_seconds = poll, "watching repeat triggers");

    loop {
        let now = Utc::now();
        match store.tick(now) {
            Ok(spawned) => {
                for task in &spawned {
                    println!("Created task {} ({}).", task.id, task.title);
                }
            }
            Err(err) if err.is_persistence() => {
                warn!(error = %err, "tick could not persist; retrying next poll");
            }
            Err(err) => return Err(err.into()),
        }

        let pause = sleep_seconds(poll, store.next_wake(), Utc::now());
        debug!(pause, next = ?store.next_wake(), "sleeping");
        thread::sleep(StdDuration::from_secs(pause));
    }
}

/// The poll interval, shortened to wake for the next trigger, never below
/// one second.
fn sleep_seconds(poll: u64, next_wake: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
    let until_wake = next_wake
        .map(|wake| u64::try_from((wake - now).num_seconds()).unwrap_or(0))
        .unwrap_or(poll);
    until_wake.min(poll).max(1)
}

/// Accepts bare seconds or an `XhYmZs` form with any part omitted.
fn parse_duration(raw: &str) -> anyhow::Result<u64> {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Ok(seconds);
    }

    let re = Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$")?;
    let caps = re
        .captures(raw)
        .filter(|_| !raw.is_empty())
        .ok_or_else(|| anyhow!("invalid duration '{raw}'; expected e.g. 90, 45m, 1h30m"))?;

    let part = |idx: usize, scale: u64| -> anyhow::Result<u64> {
        caps.get(idx)
            .map(|m| m.as_str().parse::<u64>().map(|n| n.saturating_mul(scale)))
            .transpose()
            .map(|n| n.unwrap_or(0))
            .map_err(|err| anyhow!("invalid duration '{raw}': {err}"))
    };

    Ok(part(1, 3600)?.saturating_add(part(2, 60)?).saturating_add(part(3, 1)?))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{parse_duration, sleep_seconds};

    #[test]
    fn watch_sleeps_until_next_trigger_within_poll() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).single().expect("ts");
        assert_eq!(sleep_seconds(60, None, now), 60);
        assert_eq!(sleep_seconds(60, Some(now + Duration::seconds(15)), now), 15);
        assert_eq!(sleep_seconds(60, Some(now + Duration::hours(2)), now), 60);
        assert_eq!(sleep_seconds(60, Some(now - Duration::seconds(5)), now), 1);
    }

    #[test]
    fn durations_parse_in_several_forms() {
        assert_eq!(parse_duration("90").expect("seconds"), 90);
        assert_eq!(parse_duration("45m").expect("minutes"), 2_700);
        assert_eq!(parse_duration("1h30m").expect("mixed"), 5_400);
        assert_eq!(parse_duration("2h5s").expect("gap"), 7_205);
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
    }
}
