//! # metabind-core
//!
//! A reactive metadata synchronization engine: a pub/sub cache that keeps many UI-bound
//! fields consistent with externally owned, semi-structured documents.
//!
//! ## Overview
//!
//! Consumers bind to a *bind target* (storage type, storage path and property path) and
//! receive value changes through a [`signal::Signal`]. The [`manager::MetadataManager`]
//! owns one cache item per storage location, coalesces local writes into periodic
//! write-backs, shields fresh local writes from stale external snapshots, and evicts
//! locations nobody listens to anymore.
//!
//! ### Key Features
//!
//! - **Pluggable storage**: Anything implementing [`source::MetadataSource`] (per-file
//!   frontmatter, in-memory buckets, a single global store)
//! - **Path-addressed values**: [`prop_path::PropPath`] reads and writes nested JSON trees
//! - **Derived values**: Computed subscriptions fold several bind targets into one, and can
//!   persist the result
//! - **Side effects**: Effect subscriptions react to any dependency change
//! - **Cascading deletion**: Losing a storage location tears down every subscription that
//!   depends on it, including computed and effect subscriptions
//! - **Host-driven timing**: The manager never spawns work; call
//!   [`manager::MetadataManager::cycle`] yourself or use [`driver::CycleDriver`]
//!
//! ## Quick Start
//!
//! ```rust
//! use metabind_core::{
//!     bind_target::BindTargetDeclaration,
//!     config::ManagerConfig,
//!     manager::MetadataManager,
//!     prop_path::PropPath,
//!     source::{MemorySource, MetadataSource},
//!     subscription::MetadataSignal,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # fn main() -> Result<(), metabind_core::MetaBindError> {
//! let manager = MetadataManager::new(ManagerConfig::default())?;
//! manager.register_source(Arc::new(MemorySource::new("memory")) as Arc<dyn MetadataSource>)?;
//!
//! let status = BindTargetDeclaration::new("memory", Some("tasks"), PropPath::root().key("status"));
//! let signal = MetadataSignal::default();
//! signal.register_listener(|value| {
//!     println!("status is now {value:?}");
//!     Ok(())
//! });
//! manager.subscribe(Uuid::new_v4(), signal.clone(), status.clone(), None)?;
//!
//! manager.update_metadata(&status, json!("done"))?;
//! assert_eq!(signal.get(), Some(json!("done")));
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! All state lives behind [`parking_lot`] locks inside the manager. No lock is held while
//! user code runs (listeners, compute and effect functions, `on_delete` callbacks) or
//! while a source performs I/O, so any of them may call back into the manager. Listeners
//! and effects run synchronously on the thread that caused the change.
//!
//! ## Features
//!
//! - **default**: Manager, subscriptions and the bundled sources
//! - **service**: File watching for frontmatter sources (`notify`)
//!
//! ## Module Guide
//!
//! Start with [`manager::MetadataManager`], then look at [`subscription`] for the three
//! kinds of consumers and [`source`] for plugging in storage.

pub mod bind_target;
pub mod cache;
pub mod config;
#[cfg(not(target_arch = "wasm32"))]
pub mod driver;
pub mod error;
pub mod manager;
pub mod prop_path;
pub mod signal;
pub mod source;
pub mod subscription;
#[cfg(test)]
mod tests;
#[cfg(all(feature = "service", not(target_arch = "wasm32")))]
pub mod watch;

pub use error::*;
