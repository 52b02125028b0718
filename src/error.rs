use std::io;

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;
use thiserror::Error;
use uuid::Uuid;

#[cfg(feature = "service")]
use notify::{Error as NotifyError, ErrorKind as NotifyErrorKind};

/// Failure while walking a [crate::prop_path::PropPath] through a metadata tree.
///
/// `step` is the index of the offending step within the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum PropPathError {
    #[error("cannot descend into scalar at step {step} ('{access}')")]
    ScalarDescent { step: usize, access: String },
    #[error("step {step} ('{access}') does not match the container found there")]
    ContainerMismatch { step: usize, access: String },
    #[error("index {index} at step {step} is out of range")]
    IndexOutOfRange { step: usize, index: usize },
    #[error("invalid prop path syntax '{0}'")]
    Syntax(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum MetaBindError {
    #[error("Unknown storage type: {0}")]
    UnknownStorageType(String),
    #[error("Storage type '{0}' requires a storage path")]
    MissingStoragePath(String),
    #[error("A metadata source is already registered for storage type '{0}'")]
    DuplicateSource(String),
    #[error("Subscription {0} is already registered on this cache item")]
    DuplicateSubscription(Uuid),
    #[error("PropPath error: {0}")]
    PropPath(#[from] PropPathError),
    #[error("External sync failed: {0}")]
    Sync(String),
    #[error("Compute error: {0}")]
    Compute(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Custom error: {0}")]
    Custom(String),
}

impl From<JsonError> for MetaBindError {
    fn from(src: JsonError) -> MetaBindError {
        MetaBindError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<YamlError> for MetaBindError {
    fn from(src: YamlError) -> MetaBindError {
        MetaBindError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<toml::de::Error> for MetaBindError {
    fn from(src: toml::de::Error) -> MetaBindError {
        MetaBindError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<RegexError> for MetaBindError {
    fn from(x: RegexError) -> Self {
        MetaBindError::Serialization(format!("Regex parse failed: {x}"))
    }
}

impl From<io::Error> for MetaBindError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => MetaBindError::NotFound(format!("{x}")),
            _ => MetaBindError::Io(format!("IOError: {}: {x}", x.kind())),
        }
    }
}

#[cfg(feature = "service")]
impl From<NotifyError> for MetaBindError {
    fn from(notify_error: NotifyError) -> Self {
        match notify_error.kind {
            NotifyErrorKind::Generic(msg) => MetaBindError::Io(format!(
                "notify-debouncer: {}, paths: {:?}",
                msg, notify_error.paths
            )),
            NotifyErrorKind::Io(io_error) => MetaBindError::Io(format!(
                "notify-debouncer: io error {}, paths: {:?}",
                io_error.kind(),
                notify_error.paths
            )),
            NotifyErrorKind::PathNotFound => MetaBindError::NotFound(format!(
                "notify-debouncer: path(s) not found: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::WatchNotFound => MetaBindError::NotFound(format!(
                "notify-debouncer: watch not found, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::InvalidConfig(_) => {
                MetaBindError::Config("notify-debouncer invalid config".to_string())
            }
            NotifyErrorKind::MaxFilesWatch => {
                MetaBindError::Io("notify-debouncer max file watch limit reached".to_string())
            }
        }
    }
}
