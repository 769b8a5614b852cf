use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::query::Summary;
use crate::schedule::TriggerState;
use crate::task::{Priority, Status, Task};

const WEEKDAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config, tz: Tz) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color, tz })
    }

    #[tracing::instrument(skip(self, tasks, now), fields(count = tasks.len()))]
    pub fn print_task_table(&self, tasks: &[&Task], now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = ["ID", "Status", "Pri", "Due", "Project", "Title", "Tags", "Repeat"]
            .map(str::to_string)
            .to_vec();

        let rows = tasks
            .iter()
            .map(|task| {
                let due = self.format_due(task, now);
                let title = if task.is_completed() {
                    self.paint(&task.title, "2")
                } else {
                    task.title.clone()
                };
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    self.paint_status(task.status),
                    self.paint_priority(task.priority),
                    due,
                    task.project.clone(),
                    title,
                    task.tags.iter().map(|tag| format!("#{tag}")).collect::<Vec<_>>().join(" "),
                    task.repeat.map(|r| r.to_string()).unwrap_or_default(),
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        writeln!(out)?;
        writeln!(out, "{} task(s)", tasks.len())?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task, trigger))]
    pub fn print_task_info(&self, task: &Task, trigger: Option<TriggerState>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(out, "status      {}", task.status)?;
        writeln!(out, "priority    {}", task.priority)?;
        writeln!(out, "project     {}", task.project)?;
        if let Some(description) = &task.description {
            writeln!(out, "description {description}")?;
        }
        if !task.tags.is_empty() {
            writeln!(out, "tags        {}", task.tags.join(", "))?;
        }
        if let Some(assignee) = &task.assignee {
            writeln!(out, "assignee    {assignee}")?;
        }
        if let Some(due) = task.date_time {
            writeln!(out, "due         {}", self.format_local(due))?;
        }
        if let Some(repeat) = task.repeat {
            let handed_off = if task.repeat_spawned { " (next occurrence created)" } else { "" };
            writeln!(out, "repeat      {repeat}{handed_off}")?;
        }
        if let Some(next) = task.next_due_at {
            let state = trigger.map(|s| format!(" ({s:?})").to_lowercase()).unwrap_or_default();
            writeln!(out, "next due    {}{state}", self.format_local(next))?;
        }
        writeln!(out, "created     {}", self.format_local(task.created_at))?;
        if let Some(done) = task.completed_at {
            writeln!(out, "completed   {}", self.format_local(done))?;
        }
        writeln!(out, "timer       {}", format_timer(task.timer))?;

        if !task.comments.is_empty() {
            writeln!(out)?;
            writeln!(out, "comments")?;
            for comment in &task.comments {
                writeln!(out, "  {}  {}", self.format_local(comment.created_at), comment.text)?;
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, summary))]
    pub fn print_summary(&self, summary: &Summary) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let counts = summary.counts;

        let headers = vec!["Metric".to_string(), "Value".to_string()];
        let rows = [
            ("total", counts.total.to_string()),
            ("active", counts.active.to_string()),
            ("paused", counts.paused.to_string()),
            ("completed", counts.completed.to_string()),
            ("overdue", self.paint_nonzero(summary.overdue, "31")),
            ("due in 24h", self.paint_nonzero(summary.due_soon, "33")),
            ("created today", summary.created_today.to_string()),
            ("completed today", summary.completed_today.to_string()),
            ("completion rate", format!("{}%", summary.completion_rate)),
        ]
        .into_iter()
        .map(|(label, value)| vec![label.to_string(), value])
        .collect();
        write_table(&mut out, headers, rows)?;

        writeln!(out)?;
        writeln!(out, "this week")?;
        let peak = summary.week.iter().copied().max().unwrap_or(0).max(1);
        for (label, count) in WEEKDAY_LABELS.iter().zip(summary.week) {
            let bar = "#".repeat(count * 20 / peak);
            writeln!(out, "  {label} {count:>3} {bar}")?;
        }

        if !summary.assignees.is_empty() {
            writeln!(out)?;
            writeln!(out, "assignees")?;
            for (name, count) in &summary.assignees {
                writeln!(out, "  {name}: {count}")?;
            }
        }

        if !summary.tags.is_empty() {
            writeln!(out)?;
            writeln!(out, "tags  {}", summary.tags.iter().map(|t| format!("#{t}")).collect::<Vec<_>>().join(" "))?;
        }

        if !summary.urgent.is_empty() {
            writeln!(out)?;
            writeln!(out, "urgent")?;
            for (id, title) in &summary.urgent {
                writeln!(out, "  {}  {title}", self.paint(&id.to_string(), "31"))?;
            }
        }

        if !summary.achievements.is_empty() {
            writeln!(out)?;
            writeln!(out, "achievements")?;
            for achievement in &summary.achievements {
                writeln!(
                    out,
                    "  {}  {}",
                    self.paint(achievement.title(), "32"),
                    achievement.description()
                )?;
            }
        }

        Ok(())
    }

    fn format_due(&self, task: &Task, now: DateTime<Utc>) -> String {
        let Some(due) = task.date_time else {
            return String::new();
        };
        let text = self.format_local(due);
        if task.is_overdue(now) {
            self.paint(&text, "31")
        } else {
            text
        }
    }

    fn format_local(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.tz).format("%Y-%m-%d %H:%M").to_string()
    }

    fn paint_status(&self, status: Status) -> String {
        match status {
            Status::Active => status.to_string(),
            Status::Paused => self.paint(&status.to_string(), "36"),
            Status::Completed => self.paint(&status.to_string(), "32"),
        }
    }

    fn paint_priority(&self, priority: Priority) -> String {
        match priority {
            Priority::High => self.paint("H", "31"),
            Priority::Medium => "M".to_string(),
            Priority::Low => self.paint("L", "2"),
        }
    }

    fn paint_nonzero(&self, value: usize, code: &str) -> String {
        if value == 0 {
            value.to_string()
        } else {
            self.paint(&value.to_string(), code)
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Tracked seconds as `HH:MM:SS`. Hours grow past two digits.
pub fn format_timer(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

fn write_table<W: Write>(mut writer: W, headers: Vec<String>, rows: Vec<Vec<String>>) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|h| UnicodeWidthStr::width(h.as_str())).collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(visible_width(cell));
        }
    }

    let header_line = headers
        .iter()
        .zip(&widths)
        .map(|(header, width)| pad(header, *width))
        .collect::<Vec<_>>();
    writeln!(writer, "{}", header_line.join(" ").trim_end())?;

    let rule = widths.iter().map(|width| "-".repeat(*width)).collect::<Vec<_>>();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| pad(cell, *width))
            .collect::<Vec<_>>();
        writeln!(writer, "{}", line.join(" ").trim_end())?;
    }

    Ok(())
}

fn pad(cell: &str, width: usize) -> String {
    let padding = width.saturating_sub(visible_width(cell));
    format!("{cell}{}", " ".repeat(padding))
}

fn visible_width(cell: &str) -> usize {
    UnicodeWidthStr::width(strip_ansi(cell).as_str())
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
    use super::{format_timer, strip_ansi, write_table};

    #[test]
    fn timer_formats_hours_minutes_seconds() {
        assert_eq!(format_timer(0), "00:00:00");
        assert_eq!(format_timer(3_725), "01:02:05");
        assert_eq!(format_timer(360_000), "100:00:00");
    }

    #[test]
    fn ansi_codes_are_invisible() {
        assert_eq!(strip_ansi("\x1b[31mlate\x1b[0m"), "late");
    }

    #[test]
    fn table_pads_by_display_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["ID".to_string(), "Title".to_string()],
            vec![
                vec!["1".to_string(), "\x1b[2m日本\x1b[0m".to_string()],
                vec!["22".to_string(), "milk".to_string()],
            ],
        )
        .expect("write table");

        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID Title");
        assert_eq!(lines[1], "-- -----");
        assert_eq!(strip_ansi(lines[2]), "1  日本");
        assert_eq!(lines[3], "22 milk");
    }
}
