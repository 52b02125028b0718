//! File watcher forwarding real filesystem edits into the manager.
#![cfg(feature = "service")]

mod common;

use common::*;
use metabind_core::{
    config::ManagerConfig,
    subscription::{MetadataSignal, Subscription},
    watch::{forward_external_changes, FrontmatterWatcher},
};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use test_log::test;
use uuid::Uuid;

async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn test_external_edits_reach_subscribers() {
    let temp_dir = TempDir::new().unwrap();
    create_test_vault(&temp_dir);
    let (manager, source) = vault_manager(temp_dir.path(), ManagerConfig::default());

    let signal = MetadataSignal::default();
    let field = manager
        .subscribe(
            Uuid::new_v4(),
            signal.clone(),
            frontmatter_target("task.md", "status"),
            None,
        )
        .unwrap();

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let watcher = FrontmatterWatcher::new(temp_dir.path(), Duration::from_millis(100), tx).unwrap();
    let forwarder = tokio::spawn(forward_external_changes(manager.clone(), source, rx));

    std::fs::write(
        temp_dir.path().join("task.md"),
        "---\nstatus: blocked\n---\n# Write the report\n",
    )
    .unwrap();
    assert!(wait_for(|| signal.get() == Some(json!("blocked"))).await);

    std::fs::remove_file(temp_dir.path().join("task.md")).unwrap();
    assert!(wait_for(|| field.is_deleted()).await);

    watcher.unwatch().unwrap();
    forwarder.abort();
}
