//! End-to-end scenarios against files on disk.
//!
//! Each test drives a MetadataManager over a FrontmatterSource in a temporary vault and
//! checks what ends up in the files and in the consumers' signals.

mod common;

use common::*;
use metabind_core::{
    config::ManagerConfig,
    source::frontmatter::parse_frontmatter,
    subscription::{MetadataSignal, Subscription},
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tempfile::TempDir;
use test_log::test;
use uuid::Uuid;

fn read(temp_dir: &TempDir, name: &str) -> String {
    std::fs::read_to_string(temp_dir.path().join(name)).unwrap()
}

#[test(tokio::test)]
async fn test_status_field_round_trip_to_disk() {
    let temp_dir = TempDir::new().unwrap();
    create_test_vault(&temp_dir);
    let (manager, _source) = vault_manager(temp_dir.path(), ManagerConfig::default());

    let status = frontmatter_target("task.md", "status");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let signal = MetadataSignal::default();
    let log = seen.clone();
    signal.register_listener(move |value| {
        log.lock().push(value.clone());
        Ok(())
    });
    let field = manager
        .subscribe(Uuid::new_v4(), signal.clone(), status.clone(), None)
        .unwrap();
    assert_eq!(signal.get(), Some(json!("todo")));

    field.update(json!("done")).unwrap();
    // The writer's own listeners are not echoed and nothing touched the disk yet.
    assert!(seen.lock().is_empty());
    assert!(read(&temp_dir, "task.md").contains("status: todo"));

    let report = manager.cycle().await;
    assert_eq!(report.flushed, 1);
    assert!(!manager.cache_status("frontmatter", "task.md").unwrap().dirty);
    let text = read(&temp_dir, "task.md");
    assert!(text.contains("status: done"));
    assert!(text.contains("priority: 2"));
    assert!(text.ends_with("# Write the report\n\nDue Friday.\n"));
}

#[test(tokio::test)]
async fn test_external_edit_race_keeps_local_write() {
    let temp_dir = TempDir::new().unwrap();
    create_test_vault(&temp_dir);
    let (manager, _source) = vault_manager(temp_dir.path(), ManagerConfig::default());
    let status = frontmatter_target("task.md", "status");
    let signal = MetadataSignal::default();
    manager
        .subscribe(Uuid::new_v4(), signal.clone(), status.clone(), None)
        .unwrap();

    manager.update_metadata(&status, json!("done")).unwrap();
    // The host reports the file as it was before the flush.
    let applied = manager
        .on_external_update("frontmatter", "task.md", json!({"status": "todo", "priority": 2}))
        .unwrap();
    assert!(!applied);
    assert_eq!(signal.get(), Some(json!("done")));

    for _ in 0..5 {
        manager.cycle().await;
    }
    assert_eq!(signal.get(), Some(json!("done")));
    assert!(read(&temp_dir, "task.md").contains("status: done"));

    // Once the lock has drained, real external edits go through again.
    manager
        .on_external_update("frontmatter", "task.md", json!({"status": "blocked"}))
        .unwrap();
    assert_eq!(signal.get(), Some(json!("blocked")));
}

#[test(tokio::test)]
async fn test_computed_progress_over_list() {
    let temp_dir = TempDir::new().unwrap();
    create_test_vault(&temp_dir);
    let (manager, _source) = vault_manager(temp_dir.path(), ManagerConfig::default());

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let progress = frontmatter_target("projects/alpha.md", "progress");
    manager
        .subscribe_computed(
            Uuid::new_v4(),
            MetadataSignal::default(),
            Some(progress.clone()),
            vec![
                frontmatter_target("projects/alpha.md", "tasks[0].done"),
                frontmatter_target("projects/alpha.md", "tasks[1].done"),
            ],
            move |values| {
                counter.fetch_add(1, Ordering::SeqCst);
                let done = values
                    .iter()
                    .filter(|v| matches!(v, Some(Value::Bool(true))))
                    .count();
                Ok(Some(json!(format!("{done}/{}", values.len()))))
            },
            None,
        )
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(manager.get_metadata(&progress).unwrap(), Some(json!("0/2")));

    manager
        .update_metadata(&frontmatter_target("projects/alpha.md", "tasks[1].done"), json!(true))
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(manager.get_metadata(&progress).unwrap(), Some(json!("1/2")));

    // Renaming a task does not change either dependency.
    manager
        .update_metadata(
            &frontmatter_target("projects/alpha.md", "tasks[0].name"),
            json!("outline"),
        )
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    manager.cycle().await;
    let text = read(&temp_dir, "projects/alpha.md");
    let data = parse_frontmatter(&text).unwrap();
    assert_eq!(data["progress"], json!("1/2"));
    assert_eq!(data["tasks"][0], json!({"name": "outline", "done": false}));
    assert!(text.ends_with("# Project\n"));
}

#[test(tokio::test)]
async fn test_list_subscriber_sees_child_writes() {
    let temp_dir = TempDir::new().unwrap();
    create_test_vault(&temp_dir);
    let (manager, _source) = vault_manager(temp_dir.path(), ManagerConfig::default());

    let list = MetadataSignal::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    list.register_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    manager
        .subscribe(
            Uuid::new_v4(),
            list.clone(),
            frontmatter_target("projects/alpha.md", "tasks").listening_to_children(),
            None,
        )
        .unwrap();

    manager
        .update_metadata(&frontmatter_target("projects/alpha.md", "tasks[0].done"), json!(true))
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(list.get().unwrap()[0]["done"], json!(true));
}

#[test(tokio::test)]
async fn test_deleted_file_tears_down_consumers() {
    let temp_dir = TempDir::new().unwrap();
    create_test_vault(&temp_dir);
    let (manager, _source) = vault_manager(temp_dir.path(), ManagerConfig::default());

    let unmounted = Arc::new(AtomicUsize::new(0));
    let direct_counter = unmounted.clone();
    let field = manager
        .subscribe(
            Uuid::new_v4(),
            MetadataSignal::default(),
            frontmatter_target("task.md", "status"),
            Some(Box::new(move || {
                direct_counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();
    let effect_counter = unmounted.clone();
    let effect = manager
        .subscribe_effect(
            Uuid::new_v4(),
            vec![
                frontmatter_target("task.md", "priority"),
                frontmatter_target("projects/alpha.md", "tasks"),
            ],
            |_| Ok(()),
            Some(Box::new(move || {
                effect_counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

    std::fs::remove_file(temp_dir.path().join("task.md")).unwrap();
    assert!(manager.on_external_delete("frontmatter", "task.md").unwrap());

    assert!(field.is_deleted());
    assert!(effect.is_deleted());
    assert_eq!(unmounted.load(Ordering::SeqCst), 2);
    assert_eq!(
        manager
            .cache_status("frontmatter", "projects/alpha.md")
            .unwrap()
            .subscriptions,
        0
    );
}

#[test(tokio::test)]
async fn test_idle_file_is_evicted_and_rehydrated() {
    let temp_dir = TempDir::new().unwrap();
    create_test_vault(&temp_dir);
    let (manager, _source) = vault_manager(
        temp_dir.path(),
        ManagerConfig {
            idle_cycle_threshold: 2,
            ..Default::default()
        },
    );
    let priority = frontmatter_target("task.md", "priority");
    let sub = manager
        .subscribe(Uuid::new_v4(), MetadataSignal::default(), priority.clone(), None)
        .unwrap();
    manager.unsubscribe(sub.as_ref());

    let mut evicted = 0;
    for _ in 0..3 {
        evicted += manager.cycle().await.evicted;
    }
    assert_eq!(evicted, 1);
    assert!(!manager.is_cached("frontmatter", "task.md"));

    std::fs::write(
        temp_dir.path().join("task.md"),
        "---\nstatus: todo\npriority: 9\n---\n",
    )
    .unwrap();
    let signal = MetadataSignal::default();
    manager
        .subscribe(Uuid::new_v4(), signal.clone(), priority, None)
        .unwrap();
    assert_eq!(signal.get(), Some(json!(9)));
}
