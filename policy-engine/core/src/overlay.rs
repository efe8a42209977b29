//! Overlay mutation: diffing a resource against an overlay tree to produce
//! the JSON-Patch operations that make the overlay's leaves the resource's.

use crate::anchor::{self, Anchor};
use crate::patch::escape;
use crate::validation::{self, type_name};
use json_patch::{AddOperation, PatchOperation, ReplaceOperation};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OverlayError {
    #[error("empty array in the overlay at {path}")]
    EmptyArray { path: String },
}

// === impl OverlayError ===

impl OverlayError {
    pub fn kind(&self) -> &'static str {
        "MalformedPattern"
    }
}

/// Diffs `resource` against `overlay` and synthesizes patch operations.
///
/// A condition anchor miss silences the object that carries it: that
/// subtree emits nothing while sibling branches of the overlay still
/// apply. `None` is returned only when a condition anchored directly on
/// the overlay's root map misses, taking the whole overlay out of play.
///
/// Emission order is the depth-first, left-to-right traversal of the
/// overlay, with map keys in policy-document order.
pub fn process_overlay(
    resource: &Value,
    overlay: &Value,
) -> Result<Option<Vec<PatchOperation>>, OverlayError> {
    apply(resource, overlay, "")
}

fn apply(
    resource: &Value,
    overlay: &Value,
    path: &str,
) -> Result<Option<Vec<PatchOperation>>, OverlayError> {
    match (overlay, resource) {
        (Value::Object(overlay), Value::Object(resource)) => apply_to_map(resource, overlay, path),

        (Value::Array(overlay), Value::Array(resource)) => {
            apply_to_array(resource, overlay, path)
        }

        (overlay, resource) if type_name(overlay) == type_name(resource) => {
            // Scalars of the same shape: replace, unless the resource
            // already holds the overlay's value.
            if overlay == resource {
                Ok(Some(vec![]))
            } else {
                Ok(Some(vec![replace(path, overlay.clone())]))
            }
        }

        (overlay, _) => {
            // The shapes disagree: the overlay subtree replaces the
            // resource subtree wholesale.
            let mut ops = Vec::new();
            if let Some(value) = anchor::clean(overlay) {
                ops.push(replace(path, value));
            }
            Ok(Some(ops))
        }
    }
}

fn apply_to_map(
    resource: &Map<String, Value>,
    overlay: &Map<String, Value>,
    path: &str,
) -> Result<Option<Vec<PatchOperation>>, OverlayError> {
    // Condition anchors gate the entire map: a miss makes the whole subtree
    // inapplicable.
    for (key, subtree) in overlay {
        let (anchor, raw) = Anchor::parse(key);
        if anchor.is_selector() {
            let value = resource.get(raw).unwrap_or(&Value::Null);
            if !validation::matches(value, subtree) {
                return Ok(None);
            }
        }
    }

    let mut ops = Vec::new();
    for (key, subtree) in overlay {
        let (anchor, raw) = Anchor::parse(key);
        let pointer = format!("{path}/{}", escape(raw));

        match anchor {
            Anchor::Condition | Anchor::Existence => {}

            Anchor::Add => {
                if !resource.contains_key(raw) {
                    if let Some(value) = anchor::clean(subtree) {
                        ops.push(add(&pointer, value));
                    }
                }
            }

            _ => match resource.get(raw) {
                Some(value) => {
                    // A condition miss below this key silences that subtree
                    // only; sibling keys still emit their operations.
                    if let Some(nested) = apply(value, subtree, &pointer)? {
                        ops.extend(nested);
                    }
                }
                None => {
                    if let Some(value) = anchor::clean(subtree) {
                        ops.push(add(&pointer, value));
                    }
                }
            },
        }
    }

    Ok(Some(ops))
}

fn apply_to_array(
    resource: &[Value],
    overlay: &[Value],
    path: &str,
) -> Result<Option<Vec<PatchOperation>>, OverlayError> {
    if overlay.is_empty() {
        return Err(OverlayError::EmptyArray {
            path: if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            },
        });
    }

    let mut ops = Vec::new();

    if resource.is_empty() {
        for (i, element) in overlay.iter().enumerate() {
            if let Some(value) = anchor::clean(element) {
                ops.push(add(&format!("{path}/{i}"), value));
            }
        }
        return Ok(Some(ops));
    }

    if overlay[0].is_object() {
        return apply_to_array_of_maps(resource, overlay, path);
    }

    // Arrays of scalars: append elements the resource does not already hold.
    let mut next = resource.len();
    for element in overlay {
        if resource.contains(element) {
            continue;
        }
        ops.push(add(&format!("{path}/{next}"), element.clone()));
        next += 1;
    }

    Ok(Some(ops))
}

fn apply_to_array_of_maps(
    resource: &[Value],
    overlay: &[Value],
    path: &str,
) -> Result<Option<Vec<PatchOperation>>, OverlayError> {
    let mut ops = Vec::new();
    let mut next = resource.len();

    for element in overlay {
        let selectors = element
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(key, subtree)| {
                        let (anchor, raw) = Anchor::parse(key);
                        anchor.is_selector().then_some((raw, subtree))
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if !selectors.is_empty() {
            // Anchors choose which resource elements this overlay element
            // mutates; choosing none emits nothing.
            for (i, candidate) in resource.iter().enumerate() {
                let selected = selectors.iter().all(|(raw, subtree)| {
                    validation::matches(candidate.get(*raw).unwrap_or(&Value::Null), subtree)
                });
                if !selected {
                    continue;
                }
                if let Some(nested) = apply(candidate, element, &format!("{path}/{i}"))? {
                    ops.extend(nested);
                }
            }
        } else if anchor::has_nested_anchors(element) {
            // Deeper anchors decide applicability element by element.
            for (i, candidate) in resource.iter().enumerate() {
                if let Some(nested) = apply(candidate, element, &format!("{path}/{i}"))? {
                    ops.extend(nested);
                }
            }
        } else {
            // Append, unless an equal element already exists: re-admitting
            // a mutated resource must emit nothing.
            if resource.contains(element) {
                continue;
            }
            if let Some(value) = anchor::clean(element) {
                ops.push(add(&format!("{path}/{next}"), value));
                next += 1;
            }
        }
    }

    Ok(Some(ops))
}

fn add(path: &str, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: path.to_string(),
        value,
    })
}

fn replace(path: &str, value: Value) -> PatchOperation {
    PatchOperation::Replace(ReplaceOperation {
        path: path.to_string(),
        value,
    })
}
