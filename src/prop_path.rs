//! Addressing of nodes inside a metadata tree.
//!
//! A [`PropPath`] is an ordered list of [`PropAccess`] steps. Reads are tolerant (a
//! missing step resolves to `None`), writes create intermediate containers on demand, and
//! deletes never renumber unrelated array positions.
//!
//! ```rust
//! use metabind_core::prop_path::PropPath;
//! use serde_json::{json, Value};
//!
//! let path: PropPath = "a.b[2]".parse().unwrap();
//! let mut tree = Value::Null;
//! path.set(&mut tree, json!("v")).unwrap();
//! assert_eq!(tree, json!({"a": {"b": [null, null, "v"]}}));
//! assert_eq!(path.get(&tree), Some(&json!("v")));
//! ```

use crate::error::PropPathError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

/// How far past the current end of a sequence a write may reach. Slots in between are
/// filled with `null`.
pub const MAX_INDEX_GROWTH: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropAccess {
    Object(String),
    Array(usize),
}

impl Display for PropAccess {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PropAccess::Object(key) => write!(f, "{key}"),
            PropAccess::Array(index) => write!(f, "[{index}]"),
        }
    }
}

impl From<&str> for PropAccess {
    fn from(key: &str) -> Self {
        PropAccess::Object(key.to_string())
    }
}

impl From<usize> for PropAccess {
    fn from(index: usize) -> Self {
        PropAccess::Array(index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropPath(Vec<PropAccess>);

impl From<Vec<PropAccess>> for PropPath {
    fn from(steps: Vec<PropAccess>) -> Self {
        PropPath(steps)
    }
}

impl PropPath {
    /// The empty path, addressing the root of the tree.
    pub fn root() -> Self {
        PropPath(Vec::new())
    }

    pub fn key(mut self, key: &str) -> Self {
        self.0.push(PropAccess::Object(key.to_string()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PropAccess::Array(index));
        self
    }

    pub fn steps(&self) -> &[PropAccess] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if `self` equals `other` or addresses one of its ancestors.
    pub fn is_prefix_of(&self, other: &PropPath) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Whether a write at `written` can change what a subscriber at `self` observes.
    ///
    /// A write at the node itself or at an ancestor replaces the addressed value. Writes
    /// below the node only count when the subscriber listens to children.
    pub fn affected_by(&self, written: &PropPath, listen_to_children: bool) -> bool {
        written.is_prefix_of(self) || (listen_to_children && self.is_prefix_of(written))
    }

    pub fn get<'a>(&self, tree: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(tree, |node, access| match (access, node) {
                (PropAccess::Object(key), Value::Object(map)) => map.get(key),
                (PropAccess::Array(index), Value::Array(items)) => items.get(*index),
                _ => None,
            })
    }

    /// Write `value` at this path, creating maps and growing sequences as needed.
    ///
    /// `null` and absent slots are replaced by whatever container the next step needs.
    /// An index more than [MAX_INDEX_GROWTH] past the end of its sequence is rejected
    /// with [PropPathError::IndexOutOfRange]. On error the tree is left untouched.
    pub fn set(&self, tree: &mut Value, value: Value) -> Result<(), PropPathError> {
        self.check_descent(tree)?;

        let mut node = tree;
        for (step, access) in self.0.iter().enumerate() {
            node = match access {
                PropAccess::Object(key) => {
                    if node.is_null() {
                        *node = Value::Object(Map::new());
                    }
                    match node {
                        Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                        other => return Err(descent_error(step, access, other)),
                    }
                }
                PropAccess::Array(index) => {
                    if node.is_null() {
                        *node = Value::Array(Vec::new());
                    }
                    match node {
                        Value::Array(items) => {
                            let needed = index
                                .checked_add(1)
                                .ok_or(PropPathError::IndexOutOfRange { step, index: *index })?;
                            if items.len() < needed {
                                items.resize(needed, Value::Null);
                            }
                            &mut items[*index]
                        }
                        other => return Err(descent_error(step, access, other)),
                    }
                }
            };
        }
        *node = value;
        Ok(())
    }

    /// Remove the addressed node, returning it.
    ///
    /// The last element of a sequence is popped; any other element is replaced by `null`
    /// so sibling indices stay stable. The empty path takes the whole tree.
    pub fn delete(&self, tree: &mut Value) -> Option<Value> {
        let Some((last, parents)) = self.0.split_last() else {
            return Some(std::mem::take(tree));
        };
        let parent = parents
            .iter()
            .try_fold(tree, |node, access| match (access, node) {
                (PropAccess::Object(key), Value::Object(map)) => map.get_mut(key),
                (PropAccess::Array(index), Value::Array(items)) => items.get_mut(*index),
                _ => None,
            })?;
        match (last, parent) {
            (PropAccess::Object(key), Value::Object(map)) => map.remove(key),
            (PropAccess::Array(index), Value::Array(items)) => {
                if items.len().checked_sub(1) == Some(*index) {
                    items.pop()
                } else {
                    items.get_mut(*index).map(std::mem::take)
                }
            }
            _ => None,
        }
    }

    /// Walk the existing part of the tree and report the first step `set` would reject.
    fn check_descent(&self, tree: &Value) -> Result<(), PropPathError> {
        let mut node = Some(tree);
        for (step, access) in self.0.iter().enumerate() {
            node = match (access, node) {
                // Everything below here is created fresh.
                (_, None | Some(Value::Null)) => {
                    check_growth(step, access, 0)?;
                    None
                }
                (PropAccess::Object(key), Some(Value::Object(map))) => map.get(key),
                (PropAccess::Array(index), Some(Value::Array(items))) => {
                    check_growth(step, access, items.len())?;
                    items.get(*index)
                }
                (_, Some(other)) => return Err(descent_error(step, access, other)),
            };
        }
        Ok(())
    }
}

fn check_growth(step: usize, access: &PropAccess, len: usize) -> Result<(), PropPathError> {
    match access {
        PropAccess::Array(index) if *index > len.saturating_add(MAX_INDEX_GROWTH) => {
            Err(PropPathError::IndexOutOfRange {
                step,
                index: *index,
            })
        }
        _ => Ok(()),
    }
}

fn descent_error(step: usize, access: &PropAccess, found: &Value) -> PropPathError {
    let access = access.to_string();
    match found {
        Value::Object(_) | Value::Array(_) => PropPathError::ContainerMismatch { step, access },
        _ => PropPathError::ScalarDescent { step, access },
    }
}

impl Display for PropPath {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        for (idx, access) in self.0.iter().enumerate() {
            match access {
                PropAccess::Object(key) if idx > 0 => write!(f, ".{key}")?,
                _ => write!(f, "{access}")?,
            }
        }
        Ok(())
    }
}

/// Parses the compact `a.b[2].c` form. The empty string is the root path.
impl FromStr for PropPath {
    type Err = PropPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut steps = Vec::new();
        if s.is_empty() {
            return Ok(PropPath(steps));
        }
        let syntax = || PropPathError::Syntax(s.to_string());
        for segment in s.split('.') {
            let (name, mut rest) = match segment.find('[') {
                Some(idx) => (&segment[..idx], &segment[idx..]),
                None => (segment, ""),
            };
            if name.is_empty() && rest.is_empty() {
                return Err(syntax());
            }
            if !name.is_empty() {
                steps.push(PropAccess::Object(name.to_string()));
            }
            while !rest.is_empty() {
                let (index, tail) = rest
                    .strip_prefix('[')
                    .and_then(|r| r.split_once(']'))
                    .ok_or_else(syntax)?;
                steps.push(PropAccess::Array(index.parse().map_err(|_| syntax())?));
                rest = tail;
            }
        }
        Ok(PropPath(steps))
    }
}
