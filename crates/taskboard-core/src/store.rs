use std::collections::HashSet;

use chrono::{DateTime, SubsecRound, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::datetime::local_date;
use crate::error::{StoreError, StoreResult};
use crate::notify::Notifier;
use crate::schedule::{Scheduler, advance, first_due};
use crate::storage::{NOTES_KEY, Storage, TASKS_KEY};
use crate::task::{
    Comment, DEFAULT_PROJECT, Repeat, Status, Task, TaskDraft, TaskPatch, TaskRecord, normalize_tags,
    normalize_text, validate_title,
};

// Upper bound on catch-up steps when a trigger was missed for a long time.
const MAX_CATCH_UP_STEPS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub timezone: Tz,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
        }
    }
}

/// Owner of the task collection.
///
/// Every mutating call writes the whole collection to storage once. A failed
/// write is reported as [`StoreError::Persistence`] while the in-memory change
/// stays applied.
pub struct TaskStore<S: Storage> {
    tasks: Vec<Task>,
    scheduler: Scheduler,
    storage: S,
    tz: Tz,
    notifier: Option<Box<dyn Notifier>>,
    last_id: u64,
}

impl<S: Storage> TaskStore<S> {
    /// Loads the collection and re-arms the repeat schedule. Nothing is
    /// written.
    #[instrument(skip(storage, options, now))]
    pub fn open(storage: S, options: StoreOptions, now: DateTime<Utc>) -> StoreResult<Self> {
        let now = stamp(now);
        let tz = options.timezone;
        let raw = storage.load(TASKS_KEY)?;
        let tasks = decode_collection(raw.as_deref(), tz, now);

        let mut store = Self {
            tasks: Vec::with_capacity(tasks.len()),
            scheduler: Scheduler::new(),
            storage,
            tz,
            notifier: None,
            last_id: tasks.iter().map(|t| t.id).max().unwrap_or(0),
        };

        let mut seen = HashSet::new();
        for mut task in tasks {
            if task.id == 0 || !seen.insert(task.id) {
                let fresh = store.allocate_id(now);
                warn!(old = task.id, new = fresh, "reassigned duplicate task id");
                task.id = fresh;
                seen.insert(fresh);
            }
            rearm_loaded(&mut store.scheduler, &mut task, now, tz);
            store.tasks.push(task);
        }

        info!(
            count = store.tasks.len(),
            scheduled = store.scheduler.scheduled_count(),
            "opened task store"
        );
        Ok(store)
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Read-only snapshot, most recent first.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    #[instrument(skip(self, draft, now), fields(title = %draft.title))]
    pub fn create(&mut self, draft: TaskDraft, now: DateTime<Utc>) -> StoreResult<Task> {
        let title = validate_title(&draft.title).map_err(StoreError::Validation)?;
        let now = stamp(now);
        let id = self.allocate_id(now);

        let mut task = Task::new_active(id, title, now);
        task.description = normalize_text(draft.description);
        task.date_time = draft.date_time.map(stamp);
        task.priority = draft.priority.unwrap_or_default();
        task.project = normalize_text(draft.project).unwrap_or_else(|| DEFAULT_PROJECT.to_string());
        task.tags = normalize_tags(&draft.tags);
        task.assignee = normalize_text(draft.assignee);
        task.repeat = draft.repeat;
        arm_task(&mut self.scheduler, &mut task, now, self.tz);

        self.tasks.insert(0, task.clone());
        info!(id, repeat = ?task.repeat, "task created");
        self.persist()?;
        Ok(task)
    }

    /// Creates a task from a title alone, with every other field defaulted.
    pub fn quick_add(&mut self, title: &str, now: DateTime<Utc>) -> StoreResult<Task> {
        self.create(TaskDraft::titled(title), now)
    }

    #[instrument(skip(self, patch, now))]
    pub fn update(&mut self, id: u64, patch: TaskPatch, now: DateTime<Utc>) -> StoreResult<Task> {
        let idx = self.index_of(id)?;
        let title = patch
            .title
            .as_deref()
            .map(validate_title)
            .transpose()
            .map_err(StoreError::Validation)?;

        let now = stamp(now);
        let reschedule = patch.repeat.is_some() || patch.date_time.is_some();
        let task = &mut self.tasks[idx];

        if let Some(title) = title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = normalize_text(description);
        }
        if let Some(date_time) = patch.date_time {
            task.date_time = date_time.map(stamp);
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(project) = patch.project {
            task.project = normalize_text(Some(project)).unwrap_or_else(|| DEFAULT_PROJECT.to_string());
        }
        if let Some(tags) = patch.tags {
            task.tags = normalize_tags(&tags);
        }
        if let Some(assignee) = patch.assignee {
            task.assignee = normalize_text(assignee);
        }
        if let Some(repeat) = patch.repeat {
            if repeat.is_none() {
                task.repeat_spawned = false;
            }
            task.repeat = repeat;
        }

        if reschedule {
            if task.is_completed() {
                task.next_due_at = None;
                self.scheduler.cancel(id);
            } else {
                arm_task(&mut self.scheduler, task, now, self.tz);
            }
        }

        let updated = task.clone();
        debug!(id, reschedule, "task updated");
        self.persist()?;
        Ok(updated)
    }

    /// Flips active and completed. A paused task is refused with
    /// [`StoreError::InvalidState`]. Completing a task whose repeat trigger is
    /// still armed spawns the next occurrence right away.
    #[instrument(skip(self, now))]
    pub fn toggle_completion(&mut self, id: u64, now: DateTime<Utc>) -> StoreResult<Task> {
        let now = stamp(now);
        let idx = self.index_of(id)?;
        let task = &mut self.tasks[idx];

        match task.status {
            Status::Paused => {
                return Err(StoreError::InvalidState {
                    id,
                    reason: "paused tasks must be resumed before completing".to_string(),
                });
            }
            Status::Active => {
                task.status = Status::Completed;
                task.completed_at = Some(now);
                info!(id, "task completed");
                if self.scheduler.is_scheduled(id) {
                    self.spawn_occurrence(id, now);
                }
            }
            Status::Completed => {
                task.status = Status::Active;
                task.completed_at = None;
                info!(id, "task reopened");
            }
        }

        let toggled = self.get(id).cloned().ok_or(StoreError::NotFound(id))?;
        self.persist()?;
        Ok(toggled)
    }

    /// Flips active and paused. Completed tasks are left as they are and
    /// nothing is written.
    #[instrument(skip(self))]
    pub fn toggle_pause(&mut self, id: u64) -> StoreResult<Task> {
        let idx = self.index_of(id)?;
        let task = &mut self.tasks[idx];

        let next = match task.status {
            Status::Completed => {
                debug!(id, "ignoring pause toggle on completed task");
                return Ok(task.clone());
            }
            Status::Active => Status::Paused,
            Status::Paused => Status::Active,
        };
        task.status = next;

        let toggled = task.clone();
        info!(id, status = %toggled.status, "pause toggled");
        self.persist()?;
        Ok(toggled)
    }

    /// Removes a task if present and cancels its repeat trigger. Returns
    /// whether anything was removed.
    #[instrument(skip(self))]
    pub fn delete(&mut self, id: u64) -> StoreResult<bool> {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        let removed = self.tasks.len() != before;
        self.scheduler.cancel(id);

        debug!(id, removed, "delete");
        self.persist()?;
        Ok(removed)
    }

    #[instrument(skip(self))]
    pub fn clear_completed(&mut self) -> StoreResult<usize> {
        let before = self.tasks.len();
        let scheduler = &mut self.scheduler;
        self.tasks.retain(|t| {
            if t.is_completed() {
                scheduler.cancel(t.id);
                false
            } else {
                true
            }
        });
        let removed = before - self.tasks.len();

        info!(removed, "cleared completed tasks");
        self.persist()?;
        Ok(removed)
    }

    /// Validates every record first; the first invalid one aborts the batch
    /// and nothing changes. Ids are kept unless already taken.
    #[instrument(skip(self, records, now), fields(count = records.len()))]
    pub fn import_batch(&mut self, records: Vec<TaskRecord>, now: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        let now = stamp(now);
        let mut imported = Vec::with_capacity(records.len());
        for (idx, record) in records.into_iter().enumerate() {
            let task = record
                .into_task(self.tz, now)
                .map_err(|reason| StoreError::import(Some(idx), reason))?;
            imported.push(task);
        }

        let mut taken: HashSet<u64> = self.tasks.iter().map(|t| t.id).collect();
        for task in &mut imported {
            if task.id == 0 || taken.contains(&task.id) {
                let fresh = self.allocate_id(now);
                debug!(old = task.id, new = fresh, "imported id reassigned");
                task.id = fresh;
            } else {
                self.last_id = self.last_id.max(task.id);
            }
            taken.insert(task.id);
            rearm_loaded(&mut self.scheduler, task, now, self.tz);
        }

        self.tasks.splice(0..0, imported.iter().cloned());
        info!(count = imported.len(), "imported tasks");
        self.persist()?;
        Ok(imported)
    }

    /// Parses an export blob (a JSON array of tasks, or one task object) and
    /// imports it.
    pub fn import_json(&mut self, text: &str, now: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        let records = parse_import_payload(text)?;
        self.import_batch(records, now)
    }

    /// The whole collection as pretty-printed JSON.
    pub fn export_json(&self) -> StoreResult<String> {
        serde_json::to_string_pretty(&self.tasks).map_err(|err| StoreError::persistence("export", err))
    }

    /// Clones a task into a fresh active occurrence and arms the clone's own
    /// trigger. Unknown ids are ignored.
    #[instrument(skip(self, now))]
    pub fn spawn_repeat_occurrence(&mut self, original_id: u64, now: DateTime<Utc>) -> StoreResult<Option<Task>> {
        let Some(spawned) = self.spawn_occurrence(original_id, stamp(now)) else {
            return Ok(None);
        };
        self.persist()?;
        Ok(Some(spawned))
    }

    /// Fires every repeat trigger due at `now`. Paused tasks keep their
    /// trigger until resumed.
    #[instrument(skip(self, now))]
    pub fn tick(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Task>> {
        let now = stamp(now);
        let mut spawned = Vec::new();
        for id in self.scheduler.due(now) {
            match self.get(id).map(|t| t.status) {
                None | Some(Status::Completed) => {
                    self.scheduler.cancel(id);
                }
                Some(Status::Paused) => {
                    debug!(id, "repeat due on paused task; waiting");
                }
                Some(Status::Active) => {
                    if let Some(task) = self.spawn_occurrence(id, now) {
                        spawned.push(task);
                    }
                }
            }
        }

        if !spawned.is_empty() {
            self.persist()?;
        }
        Ok(spawned)
    }

    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_wake()
    }

    #[instrument(skip(self, text, now))]
    pub fn add_comment(&mut self, id: u64, text: &str, now: DateTime<Utc>) -> StoreResult<Task> {
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::Validation("comment must not be empty".to_string()));
        }
        let idx = self.index_of(id)?;
        let task = &mut self.tasks[idx];
        task.comments.push(Comment {
            created_at: stamp(now),
            text: text.to_string(),
        });

        let updated = task.clone();
        self.persist()?;
        Ok(updated)
    }

    /// Adds tracked seconds to a task's timer.
    #[instrument(skip(self))]
    pub fn track_time(&mut self, id: u64, seconds: u64) -> StoreResult<Task> {
        let idx = self.index_of(id)?;
        let task = &mut self.tasks[idx];
        task.timer = task.timer.saturating_add(seconds);

        let updated = task.clone();
        self.persist()?;
        Ok(updated)
    }

    /// Free-form notes text, empty when never saved.
    pub fn notes(&self) -> StoreResult<String> {
        Ok(self.storage.load(NOTES_KEY)?.unwrap_or_default())
    }

    pub fn set_notes(&mut self, text: &str) -> StoreResult<()> {
        self.storage.save(NOTES_KEY, text)
    }

    fn index_of(&self, id: u64) -> StoreResult<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    /// Millisecond timestamp, bumped past the last id handed out.
    fn allocate_id(&mut self, now: DateTime<Utc>) -> u64 {
        let candidate = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let id = candidate.max(self.last_id.saturating_add(1));
        self.last_id = id;
        id
    }

    fn spawn_occurrence(&mut self, original_id: u64, now: DateTime<Utc>) -> Option<Task> {
        let Some(idx) = self.tasks.iter().position(|t| t.id == original_id) else {
            self.scheduler.cancel(original_id);
            debug!(original_id, "spawn for missing task ignored");
            return None;
        };

        let fired = self.scheduler.fire(original_id);
        let original = &mut self.tasks[idx];
        original.next_due_at = None;
        original.repeat_spawned = true;
        let due = fired
            .or_else(|| first_due(original, now, self.tz))
            .or(original.date_time)
            .unwrap_or(now);

        let id = self.allocate_id(now);
        let original = &self.tasks[idx];
        let mut occurrence = original.next_occurrence(id, due, now);
        if let Some(repeat) = occurrence.repeat {
            let next = catch_up(due, repeat, now, self.tz);
            if let Some(next) = next {
                occurrence.next_due_at = Some(next);
                self.scheduler.arm(id, next);
            }
        }

        let message = format!("Recurring task \"{}\" created", occurrence.title);
        self.tasks.insert(0, occurrence.clone());
        info!(original_id, id, due = %due, "spawned repeat occurrence");
        if let Some(notifier) = &self.notifier {
            notifier.notify(&message);
        }
        Some(occurrence)
    }

    fn persist(&mut self) -> StoreResult<()> {
        let payload =
            serde_json::to_string(&self.tasks).map_err(|err| StoreError::persistence(TASKS_KEY, err))?;
        if let Err(err) = self.storage.save(TASKS_KEY, &payload) {
            warn!(error = %err, "persisting tasks failed; in-memory state kept");
            return Err(err);
        }
        debug!(count = self.tasks.len(), "persisted tasks");
        Ok(())
    }
}

/// Arms a trigger from the task's due date, or cancels it when the task no
/// longer recurs or has already spawned its successor.
fn arm_task(scheduler: &mut Scheduler, task: &mut Task, now: DateTime<Utc>, tz: Tz) {
    let due = if task.repeat_spawned {
        None
    } else {
        first_due(task, now, tz)
    };
    match due {
        Some(due) => {
            task.next_due_at = Some(due);
            scheduler.arm(task.id, due);
        }
        None => {
            task.next_due_at = None;
            scheduler.cancel(task.id);
        }
    }
}

/// Re-arms a loaded or imported task from its persisted `next_due_at`,
/// computing one for recurring tasks that never had it.
fn rearm_loaded(scheduler: &mut Scheduler, task: &mut Task, now: DateTime<Utc>, tz: Tz) {
    if task.repeat.is_none() || task.is_completed() || task.repeat_spawned {
        task.next_due_at = None;
        return;
    }
    match task.next_due_at {
        Some(due) => scheduler.arm(task.id, due),
        None => arm_task(scheduler, task, now, tz),
    }
}

/// Cuts an instant to the millisecond precision timestamps are stored with.
fn stamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

/// First step after `due` that lies in the future, so a long-missed trigger
/// produces one overdue occurrence instead of a backlog.
fn catch_up(due: DateTime<Utc>, repeat: Repeat, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let mut next = advance(due, repeat, tz)?;
    for _ in 0..MAX_CATCH_UP_STEPS {
        if next > now {
            break;
        }
        next = advance(next, repeat, tz)?;
    }
    Some(next)
}

fn decode_collection(raw: Option<&str>, tz: Tz, now: DateTime<Utc>) -> Vec<Task> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let items = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            warn!(kind = %value_kind(&other), "stored tasks are not a list; starting empty");
            return Vec::new();
        }
        Err(err) => {
            warn!(error = %err, "stored tasks are malformed; starting empty");
            return Vec::new();
        }
    };

    let mut tasks = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let decoded = serde_json::from_value::<TaskRecord>(item)
            .map_err(|err| err.to_string())
            .and_then(|record| record.into_task(tz, now));
        match decoded {
            Ok(task) => tasks.push(task),
            Err(reason) => warn!(index = idx, reason = %reason, "skipping invalid stored task"),
        }
    }
    tasks
}

fn parse_import_payload(text: &str) -> StoreResult<Vec<TaskRecord>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(StoreError::import(None, "empty input"));
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|err| StoreError::import(None, err))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        other => {
            return Err(StoreError::import(
                None,
                format!("expected a list of tasks, found {}", value_kind(&other)),
            ));
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            serde_json::from_value::<TaskRecord>(item).map_err(|err| StoreError::import(Some(idx), err))
        })
        .collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Download name for an export taken at `now`.
pub fn export_file_name(now: DateTime<Utc>, tz: Tz) -> String {
    format!("tasks_{}.json", local_date(now, tz).format("%Y-%m-%d"))
}
