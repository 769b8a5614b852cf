use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Duration,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use tracing::trace;

use crate::datetime::{
  local_date,
  parse_date_expr,
  week_start
};
use crate::task::{
  Priority,
  Status,
  Task
};

pub const URGENT_LIMIT: usize = 5;
pub const TAG_CLOUD_LIMIT: usize = 8;

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub enum StatusFilter {
  #[default]
  All,
  Active,
  Paused,
  Completed
}

impl StatusFilter {
  fn accepts(
    self,
    status: Status
  ) -> bool {
    match self {
      | Self::All => true,
      | Self::Active => {
        status == Status::Active
      }
      | Self::Paused => {
        status == Status::Paused
      }
      | Self::Completed => {
        status == Status::Completed
      }
    }
  }
}

impl FromStr for StatusFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(Self::All),
      | "active" => Ok(Self::Active),
      | "paused" => Ok(Self::Paused),
      | "completed" | "done" => {
        Ok(Self::Completed)
      }
      | other => {
        Err(anyhow!(
          "unknown status filter: \
           {other}"
        ))
      }
    }
  }
}

/// Preset views carried over from the
/// sidebar's quick filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
  /// Due on today's calendar date.
  Today,
  /// High priority and not completed.
  Urgent
}

impl FromStr for View {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "today" => Ok(Self::Today),
      | "urgent" => Ok(Self::Urgent),
      | other => {
        Err(anyhow!(
          "unknown view: {other}"
        ))
      }
    }
  }
}

/// Inclusive bounds on a task's due
/// date. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
  pub start: Option<DateTime<Utc>>,
  pub end:   Option<DateTime<Utc>>
}

impl DateRange {
  #[must_use]
  pub fn contains(
    &self,
    at: DateTime<Utc>
  ) -> bool {
    self
      .start
      .map(|start| at >= start)
      .unwrap_or(true)
      && self
        .end
        .map(|end| at <= end)
        .unwrap_or(true)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
  pub status:     StatusFilter,
  /// Exact project; `None` or `"all"`
  /// keeps every project.
  pub project:    Option<String>,
  pub assignee:   Option<String>,
  pub tag:        Option<String>,
  pub date_range: Option<DateRange>
}

impl FilterCriteria {
  #[must_use]
  pub fn with_status(
    status: StatusFilter
  ) -> Self {
    Self {
      status,
      ..Self::default()
    }
  }

  /// Parses `key:value` terms such as
  /// `status:paused`, `project:work`,
  /// `assignee:ann`, `tag:home`,
  /// `due.after:today` and
  /// `due.before:+7d`.
  #[tracing::instrument(skip(
    terms, now, tz
  ))]
  pub fn parse(
    terms: &[String],
    now: DateTime<Utc>,
    tz: Tz
  ) -> anyhow::Result<Self> {
    let mut criteria = Self::default();

    for term in terms {
      let (key, value) = term
        .split_once(':')
        .ok_or_else(|| {
          anyhow!(
            "unrecognized filter term \
             '{term}'; expected \
             key:value"
          )
        })?;
      let value = value.trim();
      trace!(key, value, "filter term");

      match key
        .trim()
        .to_ascii_lowercase()
        .as_str()
      {
        | "status" => {
          criteria.status =
            value.parse()?;
        }
        | "project" | "pro" => {
          criteria.project =
            Some(value.to_string());
        }
        | "assignee" | "who" => {
          criteria.assignee =
            Some(value.to_string());
        }
        | "tag" | "tags" => {
          criteria.tag =
            Some(value.to_string());
        }
        | "due.after" => {
          let range = criteria
            .date_range
            .get_or_insert_default();
          range.start = Some(
            parse_date_expr(
              value, now, tz
            )?
          );
        }
        | "due.before" => {
          let range = criteria
            .date_range
            .get_or_insert_default();
          range.end = Some(
            parse_date_expr(
              value, now, tz
            )?
          );
        }
        | other => {
          return Err(anyhow!(
            "unknown filter key: \
             {other}"
          ));
        }
      }
    }

    Ok(criteria)
  }
}

/// Applies the criteria in order
/// status, project, assignee, tag, date
/// range. Input order is preserved.
#[must_use]
pub fn filter<'a>(
  tasks: &'a [Task],
  criteria: &FilterCriteria
) -> Vec<&'a Task> {
  let mut out: Vec<&Task> = tasks
    .iter()
    .filter(|t| {
      criteria.status.accepts(t.status)
    })
    .collect();

  if let Some(project) =
    criteria.project.as_deref()
    && project != "all"
    && !project.is_empty()
  {
    out.retain(|t| t.project == project);
  }

  if let Some(needle) =
    lowered(criteria.assignee.as_deref())
  {
    out.retain(|t| {
      t.assignee
        .as_deref()
        .map(|a| {
          a.to_lowercase()
            .contains(&needle)
        })
        .unwrap_or(false)
    });
  }

  if let Some(needle) =
    lowered(criteria.tag.as_deref())
  {
    out.retain(|t| {
      t.tags.iter().any(|tag| {
        tag
          .to_lowercase()
          .contains(&needle)
      })
    });
  }

  if let Some(range) =
    criteria.date_range
  {
    out.retain(|t| {
      t.date_time
        .map(|at| range.contains(at))
        .unwrap_or(false)
    });
  }

  out
}

fn lowered(
  raw: Option<&str>
) -> Option<String> {
  raw
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_lowercase)
}

#[must_use]
pub fn apply_view<'a>(
  tasks: &[&'a Task],
  view: View,
  now: DateTime<Utc>,
  tz: Tz
) -> Vec<&'a Task> {
  let today = local_date(now, tz);
  tasks
    .iter()
    .copied()
    .filter(|t| match view {
      | View::Today => {
        t.date_time
          .map(|at| {
            local_date(at, tz) == today
          })
          .unwrap_or(false)
      }
      | View::Urgent => {
        t.priority == Priority::High
          && !t.is_completed()
      }
    })
    .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
  pub total:     usize,
  pub active:    usize,
  pub paused:    usize,
  pub completed: usize
}

#[must_use]
pub fn status_counts(
  tasks: &[Task]
) -> StatusCounts {
  tasks.iter().fold(
    StatusCounts {
      total: tasks.len(),
      ..StatusCounts::default()
    },
    |mut acc, t| {
      match t.status {
        | Status::Active => {
          acc.active += 1
        }
        | Status::Paused => {
          acc.paused += 1
        }
        | Status::Completed => {
          acc.completed += 1
        }
      }
      acc
    }
  )
}

/// Not completed and due before `now`.
#[must_use]
pub fn overdue(
  tasks: &[Task],
  now: DateTime<Utc>
) -> Vec<&Task> {
  tasks
    .iter()
    .filter(|t| t.is_overdue(now))
    .collect()
}

/// Not completed and due in
/// `[now, now + window]`.
#[must_use]
pub fn due_within(
  tasks: &[Task],
  now: DateTime<Utc>,
  window: Duration
) -> Vec<&Task> {
  let horizon = now + window;
  tasks
    .iter()
    .filter(|t| !t.is_completed())
    .filter(|t| {
      t.date_time
        .map(|at| {
          at >= now && at <= horizon
        })
        .unwrap_or(false)
    })
    .collect()
}

#[must_use]
pub fn created_today(
  tasks: &[Task],
  now: DateTime<Utc>,
  tz: Tz
) -> Vec<&Task> {
  let today = local_date(now, tz);
  tasks
    .iter()
    .filter(|t| {
      local_date(t.created_at, tz)
        == today
    })
    .collect()
}

/// Completed tasks finished today.
/// Records without a completion stamp
/// fall back to their creation date.
#[must_use]
pub fn completed_today(
  tasks: &[Task],
  now: DateTime<Utc>,
  tz: Tz
) -> Vec<&Task> {
  let today = local_date(now, tz);
  tasks
    .iter()
    .filter(|t| t.is_completed())
    .filter(|t| {
      let stamp = t
        .completed_at
        .unwrap_or(t.created_at);
      local_date(stamp, tz) == today
    })
    .collect()
}

/// Tasks created on each day of the
/// week containing `now`, Monday first.
#[must_use]
pub fn weekly_histogram(
  tasks: &[Task],
  now: DateTime<Utc>,
  tz: Tz
) -> [usize; 7] {
  let monday =
    week_start(local_date(now, tz));
  let mut buckets = [0usize; 7];
  for task in tasks {
    let day =
      local_date(task.created_at, tz);
    let offset =
      (day - monday).num_days();
    if (0..7).contains(&offset) {
      buckets[offset as usize] += 1;
    }
  }
  buckets
}

/// Completed share of all tasks as a
/// rounded percentage.
#[must_use]
pub fn completion_rate(
  tasks: &[Task]
) -> u32 {
  let counts = status_counts(tasks);
  if counts.total == 0 {
    return 0;
  }
  let rate = (counts.completed as f64
    / counts.total as f64)
    * 100.0;
  rate.round() as u32
}

/// Task count per assignee, in order of
/// first appearance.
#[must_use]
pub fn assignee_counts(
  tasks: &[Task]
) -> Vec<(String, usize)> {
  let mut counts: Vec<(String, usize)> =
    Vec::new();
  for name in tasks
    .iter()
    .filter_map(|t| t.assignee.as_deref())
  {
    match counts
      .iter_mut()
      .find(|(n, _)| n == name)
    {
      | Some((_, count)) => *count += 1,
      | None => {
        counts.push((name.to_string(), 1))
      }
    }
  }
  counts
}

/// Distinct tags in order of first
/// appearance, at most `limit`.
#[must_use]
pub fn distinct_tags(
  tasks: &[Task],
  limit: usize
) -> Vec<String> {
  let mut tags: Vec<String> = Vec::new();
  for tag in
    tasks.iter().flat_map(|t| &t.tags)
  {
    if tags.len() >= limit {
      break;
    }
    if !tags.contains(tag) {
      tags.push(tag.clone());
    }
  }
  tags
}

/// Active high-priority tasks that are
/// undated or due within a day.
#[must_use]
pub fn urgent_tasks(
  tasks: &[Task],
  now: DateTime<Utc>,
  limit: usize
) -> Vec<&Task> {
  let horizon = now + Duration::days(1);
  tasks
    .iter()
    .filter(|t| {
      t.is_active()
        && t.priority == Priority::High
        && t
          .date_time
          .map(|at| at < horizon)
          .unwrap_or(true)
    })
    .take(limit)
    .collect()
}

/// Tasks due on a calendar date.
#[must_use]
pub fn tasks_on_day<'a>(
  tasks: impl IntoIterator<
    Item = &'a Task
  >,
  date: NaiveDate,
  tz: Tz
) -> Vec<&'a Task> {
  tasks
    .into_iter()
    .filter(|t| {
      t.date_time
        .map(|at| {
          local_date(at, tz) == date
        })
        .unwrap_or(false)
    })
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Achievement {
  TenCreated,
  FiveCompleted,
  TwentyCompleted,
  ProductiveDay
}

impl Achievement {
  #[must_use]
  pub fn title(self) -> &'static str {
    match self {
      | Self::TenCreated => "10 tasks",
      | Self::FiveCompleted => "Achiever",
      | Self::TwentyCompleted => "Master",
      | Self::ProductiveDay => {
        "Productive day"
      }
    }
  }

  #[must_use]
  pub fn description(
    self
  ) -> &'static str {
    match self {
      | Self::TenCreated => {
        "Created 10 tasks"
      }
      | Self::FiveCompleted => {
        "Completed 5 tasks"
      }
      | Self::TwentyCompleted => {
        "Completed 20 tasks"
      }
      | Self::ProductiveDay => {
        "Completed 3 tasks in one day"
      }
    }
  }
}

#[must_use]
pub fn achievements(
  tasks: &[Task],
  now: DateTime<Utc>,
  tz: Tz
) -> Vec<Achievement> {
  let counts = status_counts(tasks);
  let mut earned = Vec::new();
  if counts.total >= 10 {
    earned.push(Achievement::TenCreated);
  }
  if counts.completed >= 5 {
    earned
      .push(Achievement::FiveCompleted);
  }
  if counts.completed >= 20 {
    earned.push(
      Achievement::TwentyCompleted
    );
  }
  if completed_today(tasks, now, tz).len()
    >= 3
  {
    earned
      .push(Achievement::ProductiveDay);
  }
  earned
}

/// Every dashboard number in one pass
/// for the `stats` view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
  pub counts:          StatusCounts,
  pub overdue:         usize,
  pub due_soon:        usize,
  pub created_today:   usize,
  pub completed_today: usize,
  pub completion_rate: u32,
  pub week:            [usize; 7],
  pub assignees:       Vec<(String, usize)>,
  pub tags:            Vec<String>,
  /// Id and title of the first few
  /// urgent tasks.
  pub urgent:          Vec<(u64, String)>,
  pub achievements:    Vec<Achievement>
}

#[must_use]
pub fn summarize(
  tasks: &[Task],
  now: DateTime<Utc>,
  tz: Tz
) -> Summary {
  Summary {
    counts:          status_counts(tasks),
    overdue:         overdue(tasks, now)
      .len(),
    due_soon:        due_within(
      tasks,
      now,
      Duration::hours(24)
    )
    .len(),
    created_today:   created_today(
      tasks, now, tz
    )
    .len(),
    completed_today: completed_today(
      tasks, now, tz
    )
    .len(),
    completion_rate: completion_rate(
      tasks
    ),
    week:            weekly_histogram(
      tasks, now, tz
    ),
    assignees:       assignee_counts(
      tasks
    ),
    tags:            distinct_tags(
      tasks,
      TAG_CLOUD_LIMIT
    ),
    urgent:          urgent_tasks(
      tasks,
      now,
      URGENT_LIMIT
    )
    .into_iter()
    .map(|t| (t.id, t.title.clone()))
    .collect(),
    achievements:    achievements(
      tasks, now, tz
    )
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    DateTime,
    Duration,
    TimeZone,
    Utc
  };

  use super::{
    DateRange,
    FilterCriteria,
    StatusFilter,
    View,
    apply_view,
    assignee_counts,
    completion_rate,
    due_within,
    filter,
    overdue,
    status_counts,
    summarize,
    tasks_on_day,
    urgent_tasks,
    weekly_histogram
  };
  use crate::task::{
    Priority,
    Status,
    Task
  };

  fn at(
    y: i32,
    m: u32,
    d: u32,
    h: u32
  ) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(y, m, d, h, 0, 0)
      .single()
      .expect("valid timestamp")
  }

  fn task(
    id: u64,
    title: &str
  ) -> Task {
    Task::new_active(
      id,
      title.to_string(),
      at(2026, 10, 19, 8)
    )
  }

  fn ids(tasks: &[&Task]) -> Vec<u64> {
    tasks.iter().map(|t| t.id).collect()
  }

  #[test]
  fn tag_substring_keeps_matching_tasks_in_order()
  {
    let mut first = task(1, "a");
    first.tags = vec!["work".into()];
    let mut second = task(2, "b");
    second.tags = vec!["home".into()];
    let mut third = task(3, "c");
    third.tags = vec![
      "work".into(),
      "urgent".into(),
    ];
    let tasks = vec![first, second, third];

    let criteria = FilterCriteria {
      tag: Some("WORK".into()),
      ..FilterCriteria::default()
    };
    assert_eq!(
      ids(&filter(&tasks, &criteria)),
      vec![1, 3]
    );
  }

  #[test]
  fn status_filter_returns_exact_subset()
  {
    let mut tasks = vec![
      task(1, "a"),
      task(2, "b"),
      task(3, "c"),
      task(4, "d"),
    ];
    tasks[0].status = Status::Completed;
    tasks[1].status = Status::Paused;
    tasks[3].status = Status::Completed;

    let completed = filter(
      &tasks,
      &FilterCriteria::with_status(
        StatusFilter::Completed
      )
    );
    assert_eq!(ids(&completed), vec![1, 4]);

    let paused = filter(
      &tasks,
      &FilterCriteria::with_status(
        StatusFilter::Paused
      )
    );
    assert_eq!(ids(&paused), vec![2]);

    let all = filter(
      &tasks,
      &FilterCriteria::default()
    );
    assert_eq!(all.len(), 4);
  }

  #[test]
  fn project_all_and_assignee_substring()
  {
    let mut tasks = vec![
      task(1, "a"),
      task(2, "b"),
      task(3, "c"),
    ];
    tasks[0].project = "work".into();
    tasks[0].assignee = Some("Anna".into());
    tasks[1].project = "work".into();
    tasks[2].assignee = Some("Hannah".into());

    let all_projects = FilterCriteria {
      project: Some("all".into()),
      assignee: Some("ANN".into()),
      ..FilterCriteria::default()
    };
    assert_eq!(
      ids(&filter(&tasks, &all_projects)),
      vec![1, 3]
    );

    let work_only = FilterCriteria {
      project: Some("work".into()),
      assignee: Some("  ".into()),
      ..FilterCriteria::default()
    };
    assert_eq!(
      ids(&filter(&tasks, &work_only)),
      vec![1, 2]
    );
  }

  #[test]
  fn date_range_is_inclusive_and_skips_undated()
  {
    let mut tasks = vec![
      task(1, "a"),
      task(2, "b"),
      task(3, "c"),
    ];
    tasks[0].date_time =
      Some(at(2026, 10, 20, 0));
    tasks[1].date_time =
      Some(at(2026, 10, 25, 0));

    let criteria = FilterCriteria {
      date_range: Some(DateRange {
        start: Some(at(2026, 10, 20, 0)),
        end:   Some(at(2026, 10, 22, 0))
      }),
      ..FilterCriteria::default()
    };
    assert_eq!(
      ids(&filter(&tasks, &criteria)),
      vec![1]
    );
  }

  #[test]
  fn parses_cli_terms() {
    let now = at(2026, 10, 19, 12);
    let criteria = FilterCriteria::parse(
      &[
        "status:paused".to_string(),
        "project:work".to_string(),
        "tag:home".to_string(),
        "due.before:2026-10-31"
          .to_string(),
      ],
      now,
      chrono_tz::UTC
    )
    .expect("parse terms");
    assert_eq!(
      criteria.status,
      StatusFilter::Paused
    );
    assert_eq!(
      criteria.project.as_deref(),
      Some("work")
    );
    assert_eq!(
      criteria
        .date_range
        .and_then(|r| r.end),
      Some(at(2026, 10, 31, 0))
    );

    assert!(
      FilterCriteria::parse(
        &["milk".to_string()],
        now,
        chrono_tz::UTC
      )
      .is_err()
    );
  }

  #[test]
  fn overdue_and_due_soon_skip_completed()
  {
    let now = at(2026, 10, 19, 12);
    let mut tasks = vec![
      task(1, "late"),
      task(2, "late but done"),
      task(3, "soon"),
      task(4, "later"),
    ];
    tasks[0].date_time =
      Some(at(2026, 10, 18, 12));
    tasks[1].date_time =
      Some(at(2026, 10, 18, 12));
    tasks[1].status = Status::Completed;
    tasks[2].date_time =
      Some(at(2026, 10, 20, 6));
    tasks[3].date_time =
      Some(at(2026, 10, 22, 6));

    assert_eq!(
      ids(&overdue(&tasks, now)),
      vec![1]
    );
    assert_eq!(
      ids(&due_within(
        &tasks,
        now,
        Duration::hours(24)
      )),
      vec![3]
    );
  }

  #[test]
  fn histogram_buckets_by_monday_week() {
    // 2026-10-19 is a Monday.
    let now = at(2026, 10, 21, 12);
    let mut tasks = vec![
      task(1, "mon"),
      task(2, "mon"),
      task(3, "wed"),
      task(4, "sun"),
      task(5, "last week"),
    ];
    tasks[0].created_at =
      at(2026, 10, 19, 1);
    tasks[1].created_at =
      at(2026, 10, 19, 23);
    tasks[2].created_at =
      at(2026, 10, 21, 9);
    tasks[3].created_at =
      at(2026, 10, 25, 9);
    tasks[4].created_at =
      at(2026, 10, 18, 9);

    assert_eq!(
      weekly_histogram(
        &tasks,
        now,
        chrono_tz::UTC
      ),
      [2, 0, 1, 0, 0, 0, 1]
    );
  }

  #[test]
  fn day_view_uses_local_calendar_date()
  {
    let tz: chrono_tz::Tz =
      "America/New_York"
        .parse()
        .expect("tz");
    let mut tasks =
      vec![task(1, "late"), task(2, "b")];
    // 02:00 UTC on the 20th is still the
    // 19th in New York.
    tasks[0].date_time =
      Some(at(2026, 10, 20, 2));
    tasks[1].date_time =
      Some(at(2026, 10, 20, 12));

    let day = chrono::NaiveDate::from_ymd_opt(
      2026, 10, 19
    )
    .expect("date");
    assert_eq!(
      ids(&tasks_on_day(&tasks, day, tz)),
      vec![1]
    );
  }

  #[test]
  fn sidebar_aggregates() {
    let now = at(2026, 10, 19, 12);
    let mut tasks = vec![
      task(1, "a"),
      task(2, "b"),
      task(3, "c"),
      task(4, "d"),
    ];
    tasks[0].assignee = Some("bob".into());
    tasks[1].assignee = Some("amy".into());
    tasks[2].assignee = Some("bob".into());
    tasks[0].priority = Priority::High;
    tasks[1].priority = Priority::High;
    tasks[1].date_time =
      Some(at(2026, 10, 30, 0));
    tasks[3].status = Status::Completed;

    assert_eq!(
      assignee_counts(&tasks),
      vec![
        ("bob".to_string(), 2),
        ("amy".to_string(), 1),
      ]
    );
    assert_eq!(completion_rate(&tasks), 25);
    assert_eq!(
      ids(&urgent_tasks(&tasks, now, 5)),
      vec![1]
    );
    assert_eq!(
      summarize(
        &tasks,
        now,
        chrono_tz::UTC
      )
      .urgent,
      vec![(1, "a".to_string())]
    );
    let counts = status_counts(&tasks);
    assert_eq!(counts.active, 3);
    assert_eq!(counts.completed, 1);

    let all: Vec<&Task> =
      tasks.iter().collect();
    assert_eq!(
      ids(&apply_view(
        &all,
        View::Urgent,
        now,
        chrono_tz::UTC
      )),
      vec![1, 2]
    );
  }
}
