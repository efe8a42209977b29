//! Prefix anchors on pattern and overlay map keys.

use serde_json::{Map, Value};
use thiserror::Error;

/// A prefix decoration on a map key that alters how its subtree is matched
/// or applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Anchor {
    /// `(key)`: if the value does not match, the enclosing object is skipped
    /// rather than failed.
    Condition,

    /// `^(key)`: at least one element of the enclosing array must satisfy the
    /// subtree.
    Existence,

    /// `=(key)`: exact equality; the operand is never treated as a wildcard.
    Equality,

    /// `!(key)`: the value must not match the subtree.
    Negation,

    /// `+(key)`: overlay only; insert the subtree when the key is absent,
    /// never overwrite.
    Add,

    /// A key without a recognized prefix.
    None,
}

/// Reported when the same field carries anchors whose combination has no
/// defined meaning.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("field {field:?} at {path} carries conflicting anchors")]
pub struct AnchorConflict {
    pub field: String,
    pub path: String,
}

// === impl Anchor ===

impl Anchor {
    /// Classifies `key`, returning the anchor and the raw field name.
    pub fn parse(key: &str) -> (Anchor, &str) {
        if let Some(raw) = key.strip_prefix('(').and_then(|k| k.strip_suffix(')')) {
            return (Anchor::Condition, raw);
        }

        if let Some(rest) = key.strip_suffix(')') {
            for (prefix, anchor) in [
                ("^(", Anchor::Existence),
                ("=(", Anchor::Equality),
                ("!(", Anchor::Negation),
                ("+(", Anchor::Add),
            ] {
                if let Some(raw) = rest.strip_prefix(prefix) {
                    return (anchor, raw);
                }
            }
        }

        (Anchor::None, key)
    }

    /// Anchors that select which elements or objects a subtree applies to,
    /// rather than contributing content.
    pub fn is_selector(self) -> bool {
        matches!(self, Anchor::Condition | Anchor::Existence)
    }
}

/// Strips any anchor prefix from `key`, returning the raw field name.
pub fn strip(key: &str) -> &str {
    Anchor::parse(key).1
}

/// Prepares an overlay subtree for insertion into a resource: selector
/// anchors carry conditions rather than content and are dropped, other
/// anchored keys are reduced to their raw names, and nodes left without any
/// content disappear entirely. Returns `None` when nothing remains.
pub fn clean(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                return Some(Value::Object(Map::new()));
            }

            let mut cleaned = Map::new();
            for (key, value) in map {
                let (anchor, raw) = Anchor::parse(key);
                if anchor.is_selector() {
                    continue;
                }
                if let Some(value) = clean(value) {
                    cleaned.insert(raw.to_string(), value);
                }
            }

            if cleaned.is_empty() {
                return None;
            }
            Some(Value::Object(cleaned))
        }

        Value::Array(elements) => {
            if elements.is_empty() {
                return Some(Value::Array(vec![]));
            }

            let cleaned = elements.iter().filter_map(clean).collect::<Vec<_>>();
            if cleaned.is_empty() {
                return None;
            }
            Some(Value::Array(cleaned))
        }

        value => Some(value.clone()),
    }
}

/// Indicates whether any selector anchor appears at any depth of `value`.
pub fn has_nested_anchors(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.keys().any(|k| Anchor::parse(k).0.is_selector())
            || map.values().any(has_nested_anchors),
        Value::Array(elements) => elements.iter().any(has_nested_anchors),
        _ => false,
    }
}

/// Walks a pattern or overlay tree and rejects anchor combinations with no
/// defined meaning: the equality and negation anchors on the same field of
/// the same map.
pub fn check_conflicts(tree: &Value) -> Result<(), AnchorConflict> {
    check_conflicts_at(tree, "/")
}

fn check_conflicts_at(value: &Value, path: &str) -> Result<(), AnchorConflict> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let (anchor, raw) = Anchor::parse(key);
                if anchor == Anchor::Equality && map.contains_key(&format!("!({raw})"))
                    || anchor == Anchor::Negation && map.contains_key(&format!("=({raw})"))
                {
                    return Err(AnchorConflict {
                        field: raw.to_string(),
                        path: path.to_string(),
                    });
                }

                let child_path = if path == "/" {
                    format!("/{raw}")
                } else {
                    format!("{path}/{raw}")
                };
                check_conflicts_at(child, &child_path)?;
            }
            Ok(())
        }
        Value::Array(elements) => {
            for (i, element) in elements.iter().enumerate() {
                let child_path = if path == "/" {
                    format!("/{i}")
                } else {
                    format!("{path}/{i}")
                };
                check_conflicts_at(element, &child_path)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
