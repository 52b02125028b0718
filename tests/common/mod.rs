//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use metabind_core::{
    bind_target::BindTargetDeclaration,
    config::ManagerConfig,
    manager::MetadataManager,
    prop_path::PropPath,
    source::{frontmatter::FRONTMATTER_STORAGE_TYPE, FrontmatterSource, GlobalSource, MemorySource, MetadataSource},
};
use std::{path::Path, sync::Arc};
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Create a small vault with two task notes.
#[allow(dead_code)]
pub fn create_test_vault(temp_dir: &TempDir) {
    let task = r#"---
status: todo
priority: 2
---

# Write the report

Due Friday.
"#;
    std::fs::write(temp_dir.path().join("task.md"), task).unwrap();

    std::fs::create_dir(temp_dir.path().join("projects")).unwrap();
    let project = r#"---
tasks:
  - name: draft
    done: false
  - name: review
    done: false
---
# Project
"#;
    std::fs::write(temp_dir.path().join("projects/alpha.md"), project).unwrap();
}

/// A manager wired to a frontmatter source rooted at `root`, plus the in-memory sources.
#[allow(dead_code)]
pub fn vault_manager(root: &Path, config: ManagerConfig) -> (MetadataManager, Arc<FrontmatterSource>) {
    init_logging();
    let frontmatter = Arc::new(FrontmatterSource::new(root));
    let manager = MetadataManager::with_sources(
        config,
        [
            frontmatter.clone() as Arc<dyn MetadataSource>,
            Arc::new(MemorySource::default()) as Arc<dyn MetadataSource>,
            Arc::new(GlobalSource::default()) as Arc<dyn MetadataSource>,
        ],
    )
    .unwrap();
    (manager, frontmatter)
}

#[allow(dead_code)]
pub fn frontmatter_target(storage_path: &str, prop: &str) -> BindTargetDeclaration {
    BindTargetDeclaration::new(
        FRONTMATTER_STORAGE_TYPE,
        Some(storage_path),
        prop.parse::<PropPath>().unwrap(),
    )
}
