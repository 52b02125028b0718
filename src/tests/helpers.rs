//! Shared test utilities for manager and subscription tests

use crate::{
    bind_target::BindTargetDeclaration,
    config::ManagerConfig,
    error::MetaBindError,
    manager::MetadataManager,
    prop_path::PropPath,
    source::{GlobalSource, MemorySource, MetadataSource},
    subscription::MetadataSignal,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

pub const RECORDING_STORAGE_TYPE: &str = "recording";

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// In-memory source that records every write-back and can be told to fail them.
#[derive(Default)]
pub struct RecordingSource {
    pub store: Mutex<BTreeMap<String, Value>>,
    pub syncs: Mutex<Vec<(String, Value)>>,
    pub reads: AtomicUsize,
    pub fail_sync: AtomicBool,
}

impl RecordingSource {
    pub fn put(&self, storage_path: &str, data: Value) {
        self.store.lock().insert(storage_path.to_string(), data);
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.lock().len()
    }

    pub fn last_sync(&self) -> Option<(String, Value)> {
        self.syncs.lock().last().cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_sync.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataSource for RecordingSource {
    fn storage_type(&self) -> &str {
        RECORDING_STORAGE_TYPE
    }

    fn read_external(&self, cache_key: &str) -> Result<Value, MetaBindError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .store
            .lock()
            .get(cache_key)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    async fn sync_external(&self, cache_key: &str, data: &Value) -> Result<(), MetaBindError> {
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(MetaBindError::Sync(format!("refusing to write {cache_key}")));
        }
        self.syncs.lock().push((cache_key.to_string(), data.clone()));
        self.put(cache_key, data.clone());
        Ok(())
    }
}

/// Everything a manager test usually needs.
pub struct Fixture {
    pub manager: MetadataManager,
    pub recording: Arc<RecordingSource>,
    pub memory: Arc<MemorySource>,
    pub global: Arc<GlobalSource>,
}

pub fn fixture() -> Fixture {
    fixture_with(ManagerConfig::default())
}

pub fn fixture_with(config: ManagerConfig) -> Fixture {
    init_logging();
    let recording = Arc::new(RecordingSource::default());
    let memory = Arc::new(MemorySource::default());
    let global = Arc::new(GlobalSource::default());
    let manager = MetadataManager::with_sources(
        config,
        [
            recording.clone() as Arc<dyn MetadataSource>,
            memory.clone() as Arc<dyn MetadataSource>,
            global.clone() as Arc<dyn MetadataSource>,
        ],
    )
    .expect("valid test config");
    Fixture {
        manager,
        recording,
        memory,
        global,
    }
}

/// Parse a compact prop path, panicking on bad test input.
pub fn prop(path: &str) -> PropPath {
    path.parse().expect("valid prop path")
}

pub fn recording_target(storage_path: &str, path: &str) -> BindTargetDeclaration {
    BindTargetDeclaration::new(RECORDING_STORAGE_TYPE, Some(storage_path), prop(path))
}

/// A signal plus a log of every value its listeners saw.
pub fn recorded_signal() -> (MetadataSignal, Arc<Mutex<Vec<Option<Value>>>>) {
    let signal = MetadataSignal::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    signal.register_listener(move |value| {
        log.lock().push(value.clone());
        Ok(())
    });
    (signal, seen)
}
