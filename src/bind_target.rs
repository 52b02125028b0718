use crate::prop_path::PropPath;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The address of one node in one cache item.
///
/// Produced by the (external) field declaration parser. `storage_path: None` means "the
/// consumer's own context"; hosts fill it in with [`BindTargetDeclaration::with_context_path`]
/// before subscribing. Sources with a single global bucket ignore the path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindTargetDeclaration {
    pub storage_type: String,
    pub storage_path: Option<String>,
    pub storage_prop: PropPath,
    #[serde(default)]
    pub listen_to_children: bool,
}

impl BindTargetDeclaration {
    pub fn new(storage_type: &str, storage_path: Option<&str>, storage_prop: PropPath) -> Self {
        BindTargetDeclaration {
            storage_type: storage_type.to_string(),
            storage_path: storage_path.map(str::to_string),
            storage_prop,
            listen_to_children: false,
        }
    }

    pub fn listening_to_children(mut self) -> Self {
        self.listen_to_children = true;
        self
    }

    /// Resolve a context-relative declaration against the consumer's own storage path.
    /// Declarations that already name a path are returned unchanged.
    pub fn with_context_path(mut self, context_path: &str) -> Self {
        if self.storage_path.is_none() {
            self.storage_path = Some(context_path.to_string());
        }
        self
    }
}

impl Display for BindTargetDeclaration {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}#{}/{}{}",
            self.storage_type,
            self.storage_path.as_deref().unwrap_or(""),
            self.storage_prop,
            if self.listen_to_children { "/*" } else { "" }
        )
    }
}
