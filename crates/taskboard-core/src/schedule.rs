use std::collections::BTreeMap;

use chrono::{DateTime, Days, Months, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, trace};

use crate::datetime::to_utc_from_local;
use crate::task::{Repeat, Task};

/// Moves `from` forward by one recurrence step, keeping the local
/// time-of-day in `tz`. Monthly steps clamp to the last day of the target
/// month.
pub fn advance(from: DateTime<Utc>, repeat: Repeat, tz: Tz) -> Option<DateTime<Utc>> {
    let local = from.with_timezone(&tz).naive_local();
    let next_local = step_naive(local, repeat)?;

    match to_utc_from_local(next_local, tz, "repeat-advance") {
        Ok(next) => Some(next),
        Err(err) => {
            // Local time skipped by a DST jump; step in UTC instead.
            debug!(error = %err, "falling back to utc arithmetic");
            let utc_next = step_naive(from.naive_utc(), repeat)?;
            Some(DateTime::<Utc>::from_naive_utc_and_offset(utc_next, Utc))
        }
    }
}

fn step_naive(from: NaiveDateTime, repeat: Repeat) -> Option<NaiveDateTime> {
    match repeat {
        Repeat::Daily => from.checked_add_days(Days::new(1)),
        Repeat::Weekly => from.checked_add_days(Days::new(7)),
        Repeat::Monthly => from.checked_add_months(Months::new(1)),
    }
}

/// The first trigger instant for a recurring task: one step after its due
/// date, or after `now` when it has none.
pub fn first_due(task: &Task, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let repeat = task.repeat?;
    advance(task.date_time.unwrap_or(now), repeat, tz)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Scheduled,
    Fired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub due_at: DateTime<Utc>,
    pub state: TriggerState,
}

/// Deferred repeat triggers keyed by task id.
///
/// Triggers only move forward: `Scheduled` to `Fired` or `Cancelled`. Re-arming
/// a task replaces its trigger with a fresh `Scheduled` one.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    triggers: BTreeMap<u64, Trigger>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, task_id: u64, due_at: DateTime<Utc>) {
        trace!(task_id, due_at = %due_at, "arming repeat trigger");
        self.triggers.insert(
            task_id,
            Trigger {
                due_at,
                state: TriggerState::Scheduled,
            },
        );
    }

    /// Returns whether a scheduled trigger was cancelled. Cancelling an
    /// unknown or finished trigger does nothing.
    pub fn cancel(&mut self, task_id: u64) -> bool {
        match self.triggers.get_mut(&task_id) {
            Some(trigger) if trigger.state == TriggerState::Scheduled => {
                trigger.state = TriggerState::Cancelled;
                debug!(task_id, "cancelled repeat trigger");
                true
            }
            _ => false,
        }
    }

    /// Moves a scheduled trigger to `Fired` and returns its due instant.
    /// `None` when the trigger was never armed, already fired or cancelled.
    pub fn fire(&mut self, task_id: u64) -> Option<DateTime<Utc>> {
        let trigger = self.triggers.get_mut(&task_id)?;
        if trigger.state != TriggerState::Scheduled {
            trace!(task_id, state = ?trigger.state, "ignoring fire on inactive trigger");
            return None;
        }
        trigger.state = TriggerState::Fired;
        Some(trigger.due_at)
    }

    /// Scheduled triggers due at or before `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<u64> {
        let mut due: Vec<(DateTime<Utc>, u64)> = self
            .triggers
            .iter()
            .filter(|(_, t)| t.state == TriggerState::Scheduled && t.due_at <= now)
            .map(|(id, t)| (t.due_at, *id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.triggers
            .values()
            .filter(|t| t.state == TriggerState::Scheduled)
            .map(|t| t.due_at)
            .min()
    }

    pub fn trigger(&self, task_id: u64) -> Option<&Trigger> {
        self.triggers.get(&task_id)
    }

    pub fn state(&self, task_id: u64) -> Option<TriggerState> {
        self.triggers.get(&task_id).map(|t| t.state)
    }

    pub fn is_scheduled(&self, task_id: u64) -> bool {
        self.state(task_id) == Some(TriggerState::Scheduled)
    }

    pub fn scheduled_count(&self) -> usize {
        self.triggers
            .values()
            .filter(|t| t.state == TriggerState::Scheduled)
            .count()
    }
}
