use chrono::{DateTime, Duration, TimeZone, Utc};
use taskboard_core::query::{FilterCriteria, StatusFilter, filter};
use taskboard_core::storage::TASKS_KEY;
use taskboard_core::{
    FileStorage, MemoryStorage, Priority, Repeat, Status, StoreError, StoreOptions, TaskDraft, TaskPatch,
    TaskStore,
};
use tempfile::tempdir;

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn memory_store(now: DateTime<Utc>) -> TaskStore<MemoryStorage> {
    TaskStore::open(MemoryStorage::new(), StoreOptions::default(), now).expect("open store")
}

#[test]
fn created_task_is_prepended_and_persisted_once() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);

    let first = store.quick_add("first", now).expect("create first");
    let second = store
        .create(
            TaskDraft {
                title: "  Buy milk  ".to_string(),
                tags: "home, errand,,".to_string(),
                priority: Some(Priority::High),
                ..TaskDraft::default()
            },
            now,
        )
        .expect("create second");

    assert_eq!(second.title, "Buy milk");
    assert_eq!(second.tags, vec!["home", "errand"]);
    assert_eq!(second.project, "personal");
    assert_eq!(second.status, Status::Active);
    assert_ne!(first.id, second.id);
    assert_eq!(store.tasks()[0].id, second.id);
    assert_eq!(store.storage().write_count(), 2);

    let raw = store.storage().get(TASKS_KEY).expect("tasks saved");
    assert!(raw.contains("\"createdAt\""));
    assert!(raw.contains("\"status\":\"active\""));
}

#[test]
fn blank_title_is_rejected_without_writing() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);

    let err = store.quick_add("   ", now).expect_err("blank title must fail");
    assert!(matches!(err, StoreError::Validation(_)));
    assert!(store.is_empty());
    assert_eq!(store.storage().write_count(), 0);
}

#[test]
fn completion_toggle_and_status_filters() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);
    let a = store.quick_add("a", now).expect("a").id;
    let b = store.quick_add("b", now).expect("b").id;
    let c = store.quick_add("c", now).expect("c").id;

    let done = store.toggle_completion(b, now).expect("complete b");
    assert_eq!(done.status, Status::Completed);
    assert_eq!(done.completed_at, Some(now));

    let completed = filter(store.tasks(), &FilterCriteria::with_status(StatusFilter::Completed));
    assert_eq!(completed.iter().map(|t| t.id).collect::<Vec<_>>(), vec![b]);

    let active = filter(store.tasks(), &FilterCriteria::with_status(StatusFilter::Active));
    assert_eq!(active.iter().map(|t| t.id).collect::<Vec<_>>(), vec![c, a]);

    let reopened = store.toggle_completion(b, now).expect("reopen b");
    assert_eq!(reopened.status, Status::Active);
    assert_eq!(reopened.completed_at, None);
}

#[test]
fn paused_tasks_cannot_be_completed() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);
    let id = store.quick_add("wait", now).expect("create").id;

    assert_eq!(store.toggle_pause(id).expect("pause").status, Status::Paused);
    let err = store.toggle_completion(id, now).expect_err("paused cannot complete");
    assert!(matches!(err, StoreError::InvalidState { .. }));
    assert_eq!(store.get(id).map(|t| t.status), Some(Status::Paused));

    assert_eq!(store.toggle_pause(id).expect("resume").status, Status::Active);
}

#[test]
fn pause_toggle_on_completed_task_changes_nothing() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);
    let id = store.quick_add("done", now).expect("create").id;
    store.toggle_completion(id, now).expect("complete");
    let writes = store.storage().write_count();

    let task = store.toggle_pause(id).expect("toggle pause");
    assert_eq!(task.status, Status::Completed);
    assert_eq!(store.storage().write_count(), writes);
}

#[test]
fn unknown_ids_are_not_found() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);

    assert!(matches!(store.toggle_completion(42, now), Err(StoreError::NotFound(42))));
    assert!(matches!(
        store.update(42, TaskPatch::default(), now),
        Err(StoreError::NotFound(42))
    ));
}

#[test]
fn delete_is_idempotent_and_clear_removes_completed() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);
    let keep = store.quick_add("keep", now).expect("keep").id;
    let done_one = store.quick_add("done one", now).expect("d1").id;
    let done_two = store.quick_add("done two", now).expect("d2").id;
    let gone = store.quick_add("gone", now).expect("gone").id;

    assert!(store.delete(gone).expect("delete"));
    assert!(!store.delete(gone).expect("delete again"));
    assert_eq!(store.len(), 3);

    store.toggle_completion(done_one, now).expect("complete");
    store.toggle_completion(done_two, now).expect("complete");
    assert_eq!(store.clear_completed().expect("clear"), 2);
    assert_eq!(store.tasks().iter().map(|t| t.id).collect::<Vec<_>>(), vec![keep]);
    assert_eq!(store.clear_completed().expect("clear again"), 0);
}

#[test]
fn update_overwrites_and_clears_fields() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);
    let id = store
        .create(
            TaskDraft {
                title: "report".to_string(),
                assignee: Some("ann".to_string()),
                date_time: Some(at(2026, 10, 20, 9)),
                ..TaskDraft::default()
            },
            now,
        )
        .expect("create")
        .id;

    let updated = store
        .update(
            id,
            TaskPatch {
                title: Some("quarterly report".to_string()),
                project: Some("work".to_string()),
                assignee: Some(None),
                date_time: Some(None),
                ..TaskPatch::default()
            },
            now,
        )
        .expect("update");

    assert_eq!(updated.title, "quarterly report");
    assert_eq!(updated.project, "work");
    assert_eq!(updated.assignee, None);
    assert_eq!(updated.date_time, None);

    let err = store
        .update(
            id,
            TaskPatch {
                title: Some(" ".to_string()),
                ..TaskPatch::default()
            },
            now,
        )
        .expect_err("blank title");
    assert!(matches!(err, StoreError::Validation(_)));
    assert_eq!(store.get(id).map(|t| t.title.as_str()), Some("quarterly report"));
}

#[test]
fn failed_write_keeps_in_memory_change() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);
    let id = store.quick_add("fragile", now).expect("create").id;

    store.storage_mut().set_fail_writes(true);
    let err = store.toggle_completion(id, now).expect_err("write must fail");
    assert!(err.is_persistence());
    assert_eq!(store.get(id).map(|t| t.status), Some(Status::Completed));
}

#[test]
fn import_is_all_or_nothing() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);
    store.quick_add("existing", now).expect("create");
    let writes = store.storage().write_count();

    let err = store
        .import_json(r#"[{"title":"fine"},{"title":"  "}]"#, now)
        .expect_err("second record is invalid");
    assert!(matches!(err, StoreError::Import { index: Some(1), .. }));
    assert_eq!(store.len(), 1);
    assert_eq!(store.storage().write_count(), writes);

    assert!(store.import_json("42", now).is_err());
    assert!(store.import_json("", now).is_err());
}

#[test]
fn import_accepts_legacy_shapes_and_reassigns_taken_ids() {
    let now = at(2026, 10, 19, 9);
    let mut store = memory_store(now);
    let existing = store.quick_add("existing", now).expect("create").id;

    let payload = format!(
        r#"[
            {{"id": {existing}, "title": "clash", "completed": true, "tags": "a, b"}},
            {{"id": 7, "title": "listed tags", "tags": ["x", " y "], "priority": "high",
              "dateTime": "2026-10-21T18:30", "comments": ["first"]}}
        ]"#
    );
    let imported = store.import_json(&payload, now).expect("import");

    assert_eq!(imported.len(), 2);
    assert_ne!(imported[0].id, existing);
    assert_eq!(imported[0].status, Status::Completed);
    assert_eq!(imported[0].tags, vec!["a", "b"]);
    assert_eq!(imported[1].id, 7);
    assert_eq!(imported[1].tags, vec!["x", "y"]);
    assert_eq!(imported[1].priority, Priority::High);
    assert_eq!(imported[1].date_time, Some(Utc.with_ymd_and_hms(2026, 10, 21, 18, 30, 0).single().expect("ts")));
    assert_eq!(imported[1].comments.len(), 1);

    assert_eq!(
        store.tasks().iter().map(|t| t.title.as_str()).collect::<Vec<_>>(),
        vec!["clash", "listed tags", "existing"]
    );
}

#[test]
fn export_then_import_restores_the_collection() {
    let now = at(2026, 10, 19, 9);
    let mut source = memory_store(now);
    source
        .create(
            TaskDraft {
                title: "call plumber".to_string(),
                description: Some("kitchen sink".to_string()),
                date_time: Some(at(2026, 10, 22, 15)),
                project: Some("home".to_string()),
                tags: "house,urgent".to_string(),
                assignee: Some("sam".to_string()),
                ..TaskDraft::default()
            },
            now,
        )
        .expect("create");
    let done = source.quick_add("already done", now).expect("create").id;
    source.toggle_completion(done, now).expect("complete");
    source.add_comment(done, "went well", now).expect("comment");
    source.track_time(done, 125).expect("track");

    let blob = source.export_json().expect("export");
    let mut target = memory_store(now);
    target.import_json(&blob, now).expect("import");

    assert_eq!(target.tasks(), source.tasks());
}

#[test]
fn file_store_survives_reopen_and_tolerates_corruption() {
    let temp = tempdir().expect("tempdir");
    let now = at(2026, 10, 19, 9);

    {
        let storage = FileStorage::open(temp.path()).expect("open storage");
        let mut store = TaskStore::open(storage, StoreOptions::default(), now).expect("open store");
        store.quick_add("persisted", now).expect("create");
        store.set_notes("remember the milk").expect("notes");
    }

    let storage = FileStorage::open(temp.path()).expect("reopen storage");
    let store = TaskStore::open(storage.clone(), StoreOptions::default(), now).expect("reopen store");
    assert_eq!(store.len(), 1);
    assert_eq!(store.tasks()[0].title, "persisted");
    assert_eq!(store.notes().expect("notes"), "remember the milk");

    std::fs::write(storage.path_for(TASKS_KEY), "{ not json").expect("corrupt");
    let store = TaskStore::open(storage, StoreOptions::default(), now).expect("open corrupt");
    assert!(store.is_empty());
}

#[test]
fn invalid_stored_records_are_skipped() {
    let now = at(2026, 10, 19, 9);
    let storage = MemoryStorage::new().with_value(
        TASKS_KEY,
        r#"[{"id":1,"title":"ok","status":"paused"},{"id":2,"title":""},{"id":3,"title":"legacy","completed":false}]"#,
    );
    let store = TaskStore::open(storage, StoreOptions::default(), now).expect("open");

    assert_eq!(store.tasks().iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(store.get(1).map(|t| t.status), Some(Status::Paused));
    assert_eq!(store.get(3).map(|t| t.status), Some(Status::Active));
    assert_eq!(store.storage().write_count(), 0);
}

#[test]
fn load_after_create_returns_the_task_unchanged() {
    let now = at(2026, 10, 19, 9) + Duration::nanoseconds(123_456_789);
    let mut store = memory_store(now);
    let id = store
        .create(
            TaskDraft {
                title: "file taxes".to_string(),
                date_time: Some(at(2026, 10, 20, 17) + Duration::nanoseconds(987_654_321)),
                repeat: Some(Repeat::Weekly),
                tags: "admin".to_string(),
                ..TaskDraft::default()
            },
            now,
        )
        .expect("create")
        .id;
    let created = store.add_comment(id, "receipts in drawer", now).expect("comment");
    assert_eq!(created.created_at.timestamp_subsec_nanos(), 123_000_000);

    let raw = store.storage().get(TASKS_KEY).expect("tasks saved").to_string();
    let reopened = TaskStore::open(
        MemoryStorage::new().with_value(TASKS_KEY, &raw),
        StoreOptions::default(),
        now + Duration::minutes(5),
    )
    .expect("reopen");
    assert_eq!(reopened.get(id), Some(&created));

    let done = store.toggle_completion(id, now).expect("complete");
    let raw = store.storage().get(TASKS_KEY).expect("tasks saved").to_string();
    let reopened = TaskStore::open(
        MemoryStorage::new().with_value(TASKS_KEY, &raw),
        StoreOptions::default(),
        now,
    )
    .expect("reopen");
    assert_eq!(reopened.get(id), Some(&done));
}
