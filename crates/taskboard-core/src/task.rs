use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, SubsecRound, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::datetime::{iso_serde, parse_stored_timestamp};

pub const DEFAULT_PROJECT: &str = "personal";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Paused,
    Completed,
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" | "pending" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" | "done" => Ok(Self::Completed),
            other => Err(anyhow!("unknown status: {other}")),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "l" => Ok(Self::Low),
            "medium" | "m" => Ok(Self::Medium),
            "high" | "h" => Ok(Self::High),
            other => Err(anyhow!("unknown priority: {other}")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(text)
    }
}

/// Recurrence rule. An absent rule is `Option::None`, never a variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    Daily,
    Weekly,
    Monthly,
}

impl Repeat {
    /// Parses a rule where `""` and `"none"` mean no recurrence.
    pub fn parse_optional(raw: &str) -> anyhow::Result<Option<Self>> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "null" => Ok(None),
            "daily" => Ok(Some(Self::Daily)),
            "weekly" => Ok(Some(Self::Weekly)),
            "monthly" => Ok(Some(Self::Monthly)),
            other => Err(anyhow!("unknown repeat rule: {other}")),
        }
    }
}

impl fmt::Display for Repeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(with = "iso_serde")]
    pub created_at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, with = "iso_serde::option")]
    pub date_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub priority: Priority,

    pub project: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub assignee: Option<String>,

    pub status: Status,

    #[serde(default)]
    pub repeat: Option<Repeat>,

    #[serde(with = "iso_serde")]
    pub created_at: DateTime<Utc>,

    #[serde(
        default,
        with = "iso_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub timer: u64,

    #[serde(default)]
    pub comments: Vec<Comment>,

    #[serde(
        default,
        with = "iso_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub next_due_at: Option<DateTime<Utc>>,

    /// Set once this task's cycle has been handed to a spawned occurrence.
    /// Such a task is never armed again.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub repeat_spawned: bool,
}

impl Task {
    pub fn new_active(id: u64, title: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title,
            description: None,
            date_time: None,
            priority: Priority::Medium,
            project: DEFAULT_PROJECT.to_string(),
            tags: vec![],
            assignee: None,
            status: Status::Active,
            repeat: None,
            created_at: now,
            completed_at: None,
            timer: 0,
            comments: vec![],
            next_due_at: None,
            repeat_spawned: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn is_paused(&self) -> bool {
        self.status == Status::Paused
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed() && self.date_time.map(|due| due < now).unwrap_or(false)
    }

    /// A clone for the next cycle of a recurring task. Identity, history and
    /// tracked time start fresh.
    pub fn next_occurrence(&self, id: u64, due: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: self.title.clone(),
            description: self.description.clone(),
            date_time: Some(due),
            priority: self.priority,
            project: self.project.clone(),
            tags: self.tags.clone(),
            assignee: self.assignee.clone(),
            status: Status::Active,
            repeat: self.repeat,
            created_at: now,
            completed_at: None,
            timer: 0,
            comments: vec![],
            next_due_at: None,
            repeat_spawned: false,
        }
    }
}

/// Splits a comma-separated tag list, trimming entries and dropping empty
/// ones. Duplicates are kept.
pub fn normalize_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub(crate) fn normalize_text(raw: Option<String>) -> Option<String> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn validate_title(raw: &str) -> Result<String, String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err("title must not be empty".to_string());
    }
    Ok(title.to_string())
}

/// Unvalidated input for a new task.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub date_time: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub project: Option<String>,
    pub tags: String,
    pub assignee: Option<String>,
    pub repeat: Option<Repeat>,
}

impl TaskDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Field-level overwrite for an existing task. `Some(None)` clears a field.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub date_time: Option<Option<DateTime<Utc>>>,
    pub priority: Option<Priority>,
    pub project: Option<String>,
    pub tags: Option<String>,
    pub assignee: Option<Option<String>>,
    pub repeat: Option<Option<Repeat>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.date_time.is_none()
            && self.priority.is_none()
            && self.project.is_none()
            && self.tags.is_none()
            && self.assignee.is_none()
            && self.repeat.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagsField {
    List(Vec<String>),
    Csv(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommentField {
    Text(String),
    Full {
        #[serde(default, rename = "createdAt")]
        created_at: Option<String>,
        text: String,
    },
}

/// A task as found in storage or an import payload, before validation.
///
/// Accepts both the status-enum shape and the older boolean `completed`
/// shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date_time: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Option<TagsField>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub repeat: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub timer: Option<u64>,
    #[serde(default)]
    pub comments: Option<Vec<CommentField>>,
    #[serde(default)]
    pub next_due_at: Option<String>,
    #[serde(default)]
    pub repeat_spawned: Option<bool>,
}

impl TaskRecord {
    /// Validates the record. Ids are kept as given; missing ids become `0`
    /// and are assigned by the store.
    pub fn into_task(self, tz: Tz, now: DateTime<Utc>) -> Result<Task, String> {
        let title = validate_title(self.title.as_deref().unwrap_or_default())?;

        let status = match (self.status.as_deref(), self.completed) {
            (Some(raw), _) => raw.parse::<Status>().map_err(|e| e.to_string())?,
            (None, Some(true)) => Status::Completed,
            (None, Some(false)) | (None, None) => Status::Active,
        };

        let priority = match self.priority.as_deref().map(str::trim) {
            None | Some("") => Priority::Medium,
            Some(raw) => raw.parse::<Priority>().map_err(|e| e.to_string())?,
        };

        let repeat = match self.repeat.as_deref() {
            None => None,
            Some(raw) => Repeat::parse_optional(raw).map_err(|e| e.to_string())?,
        };

        let tags = match self.tags {
            None => vec![],
            Some(TagsField::Csv(raw)) => normalize_tags(&raw),
            Some(TagsField::List(list)) => normalize_tags(&list.join(",")),
        };

        let created_at = parse_optional_timestamp(self.created_at.as_deref(), tz, "createdAt")?
            .unwrap_or(now);

        let comments = self
            .comments
            .unwrap_or_default()
            .into_iter()
            .map(|field| match field {
                CommentField::Text(text) => Ok(Comment {
                    created_at,
                    text,
                }),
                CommentField::Full {
                    created_at: stamp,
                    text,
                } => Ok(Comment {
                    created_at: parse_optional_timestamp(stamp.as_deref(), tz, "comment")?
                        .unwrap_or(created_at),
                    text,
                }),
            })
            .collect::<Result<Vec<_>, String>>()?;

        let completed_at = if status == Status::Completed {
            parse_optional_timestamp(self.completed_at.as_deref(), tz, "completedAt")?
        } else {
            None
        };

        let repeat_spawned = repeat.is_some() && self.repeat_spawned.unwrap_or(false);
        let next_due_at = if repeat.is_some() && !repeat_spawned {
            parse_optional_timestamp(self.next_due_at.as_deref(), tz, "nextDueAt")?
        } else {
            None
        };

        Ok(Task {
            id: self.id.unwrap_or(0),
            title,
            description: normalize_text(self.description),
            date_time: parse_optional_timestamp(self.date_time.as_deref(), tz, "dateTime")?,
            priority,
            project: normalize_text(self.project).unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
            tags,
            assignee: normalize_text(self.assignee),
            status,
            repeat,
            created_at,
            completed_at,
            timer: self.timer.unwrap_or(0),
            comments,
            next_due_at,
            repeat_spawned,
        })
    }
}

fn parse_optional_timestamp(
    raw: Option<&str>,
    tz: Tz,
    field: &str,
) -> Result<Option<DateTime<Utc>>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_stored_timestamp(value, tz)
            .map(|ts| Some(ts.trunc_subsecs(3)))
            .map_err(|e| format!("invalid {field}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{Priority, Repeat, Status, TaskRecord, normalize_tags};

    fn record(json: &str) -> TaskRecord {
        serde_json::from_str(json).expect("record json")
    }

    #[test]
    fn tags_are_trimmed_and_empties_dropped() {
        assert_eq!(
            normalize_tags(" work, ,urgent ,,home"),
            vec!["work", "urgent", "home"]
        );
        assert!(normalize_tags("  ").is_empty());
    }

    #[test]
    fn boolean_completed_records_migrate_to_status() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("now");
        let done = record(r#"{"id": 7, "title": "Old", "completed": true}"#)
            .into_task(chrono_tz::UTC, now)
            .expect("valid legacy record");
        assert_eq!(done.status, Status::Completed);
        assert_eq!(done.project, "personal");
        assert_eq!(done.priority, Priority::Medium);
        assert_eq!(done.created_at, now);

        let open = record(r#"{"id": 8, "title": "Older", "completed": false, "tags": "a, b"}"#)
            .into_task(chrono_tz::UTC, now)
            .expect("valid legacy record");
        assert_eq!(open.status, Status::Active);
        assert_eq!(open.tags, vec!["a", "b"]);
    }

    #[test]
    fn blank_title_is_rejected() {
        let now = Utc::now();
        let err = record(r#"{"id": 1, "title": "   "}"#)
            .into_task(chrono_tz::UTC, now)
            .expect_err("blank title must fail");
        assert!(err.contains("title"));
    }

    #[test]
    fn repeat_none_and_empty_mean_absent() {
        assert_eq!(Repeat::parse_optional("none").expect("none"), None);
        assert_eq!(Repeat::parse_optional("").expect("empty"), None);
        assert_eq!(
            Repeat::parse_optional("Monthly").expect("monthly"),
            Some(Repeat::Monthly)
        );
        assert!(Repeat::parse_optional("yearly").is_err());
    }

    #[test]
    fn handed_off_records_drop_their_next_due() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).single().expect("now");
        let task = record(
            r#"{"id": 3, "title": "gym", "repeat": "daily", "repeatSpawned": true,
                "nextDueAt": "2026-10-20T09:00:00.000Z"}"#,
        )
        .into_task(chrono_tz::UTC, now)
        .expect("valid record");
        assert!(task.repeat_spawned);
        assert_eq!(task.next_due_at, None);

        let plain = record(r#"{"id": 4, "title": "gym", "repeatSpawned": true}"#)
            .into_task(chrono_tz::UTC, now)
            .expect("valid record");
        assert!(!plain.repeat_spawned);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = record(r#"{"title": "x", "status": "archived"}"#)
            .into_task(chrono_tz::UTC, Utc::now())
            .expect_err("unknown status");
        assert!(err.contains("archived"));
    }
}
