//! Recursive validation of a resource tree against a pattern tree.

use crate::anchor::Anchor;
use crate::pattern;
use crate::reference::{self, ResolveError};
use serde_json::{Map, Value};
use thiserror::Error;

/// The outcome of a validation pass that found no mismatch: either every
/// assertion held, or a condition anchor took the pattern out of play.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Check {
    Matched,
    Skipped,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("value {value} does not match pattern {pattern} at {path}")]
    ValueMismatch {
        path: String,
        pattern: Value,
        value: Value,
    },

    #[error("field is not present at {path}")]
    FieldAbsent { path: String },

    #[error("pattern is an {expected} but the resource holds a {found} at {path}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("empty array pattern at {path}")]
    EmptyArrayPattern { path: String },

    #[error("no array element satisfies the existence anchor at {path}")]
    NoMatchingElement { path: String },

    #[error("forbidden value is present at {path}")]
    ForbiddenValue { path: String },

    #[error("{source} at {path}")]
    Reference { path: String, source: ResolveError },
}

/// The trees a validation pass resolves against: the origin pattern (for
/// reference lookups) and the root of the resource under admission.
#[derive(Copy, Clone)]
struct Scope<'a> {
    origin: &'a Value,
    root: &'a Value,
}

// === impl ValidationError ===

impl ValidationError {
    /// The error-taxonomy label used in rule failure messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TypeMismatch { .. } => "TypeMismatch",
            Self::EmptyArrayPattern { .. } | Self::Reference { .. } => "MalformedPattern",
            _ => "ValidationFailure",
        }
    }

    /// Mismatches depend on the resource under validation; everything else
    /// reflects a defect in the pattern itself and propagates out of
    /// condition checks.
    fn is_mismatch(&self) -> bool {
        !matches!(
            self,
            Self::EmptyArrayPattern { .. } | Self::Reference { .. }
        )
    }
}

/// Validates `resource` against `pattern`. The pattern tree doubles as the
/// first tree `$(...)` references resolve against; the resource is the
/// fallback.
pub fn validate_resource_with_pattern(
    resource: &Value,
    pattern: &Value,
) -> Result<Check, ValidationError> {
    let scope = Scope {
        origin: pattern,
        root: resource,
    };
    validate_element(resource, pattern, scope, "/")
}

/// Boolean form of validation for overlay condition checks: any error,
/// including a malformed condition subtree, is a miss.
pub(crate) fn matches(resource: &Value, pattern: &Value) -> bool {
    validate_resource_with_pattern(resource, pattern).is_ok()
}

fn validate_element(
    resource: &Value,
    pattern: &Value,
    scope: Scope<'_>,
    path: &str,
) -> Result<Check, ValidationError> {
    match pattern {
        Value::Object(pattern_map) => match resource {
            Value::Object(resource_map) => validate_map(resource_map, pattern_map, scope, path),
            resource => Err(ValidationError::TypeMismatch {
                path: path.to_string(),
                expected: "object",
                found: type_name(resource),
            }),
        },

        Value::Array(pattern_array) => match resource {
            Value::Array(resource_array) => {
                validate_array(resource_array, pattern_array, scope, path)
            }
            resource => Err(ValidationError::TypeMismatch {
                path: path.to_string(),
                expected: "array",
                found: type_name(resource),
            }),
        },

        pattern => {
            let actualized;
            let mut pattern = pattern;
            if let Value::String(s) = pattern {
                if reference::contains_reference(s) {
                    actualized = reference::actualize(scope.origin, scope.root, s, path)
                        .map_err(|source| ValidationError::Reference {
                            path: path.to_string(),
                            source,
                        })?;
                    pattern = &actualized;
                }
            }

            if pattern::validate_value_with_pattern(resource, pattern) {
                Ok(Check::Matched)
            } else {
                Err(ValidationError::ValueMismatch {
                    path: path.to_string(),
                    pattern: pattern.clone(),
                    value: resource.clone(),
                })
            }
        }
    }
}

fn validate_map(
    resource: &Map<String, Value>,
    pattern: &Map<String, Value>,
    scope: Scope<'_>,
    path: &str,
) -> Result<Check, ValidationError> {
    // Condition anchors gate the entire object: a miss takes every assertion
    // in this map out of play without failing the rule.
    for (key, subpattern) in pattern {
        let (anchor, raw) = Anchor::parse(key);
        if anchor != Anchor::Condition {
            continue;
        }
        let value = resource.get(raw).unwrap_or(&Value::Null);
        if !satisfies(value, subpattern, scope, &child(path, raw))? {
            return Ok(Check::Skipped);
        }
    }

    let mut skipped = false;
    for (key, subpattern) in pattern {
        let (anchor, raw) = Anchor::parse(key);
        let value = resource.get(raw);
        let value_or_null = value.unwrap_or(&Value::Null);
        let path = child(path, raw);

        match anchor {
            Anchor::Condition => {}

            Anchor::Negation => {
                if satisfies(value_or_null, subpattern, scope, &path)? {
                    return Err(ValidationError::ForbiddenValue { path });
                }
            }

            Anchor::Equality if !subpattern.is_object() && !subpattern.is_array() => {
                if !pattern::equal_values(value_or_null, subpattern) {
                    return Err(ValidationError::ValueMismatch {
                        path,
                        pattern: subpattern.clone(),
                        value: value_or_null.clone(),
                    });
                }
            }

            _ => {
                // The '*' atom asserts that the field exists and has a value.
                if subpattern == "*" {
                    if value.map(|v| !v.is_null()).unwrap_or(false) {
                        continue;
                    }
                    return Err(ValidationError::FieldAbsent { path });
                }

                if validate_element(value_or_null, subpattern, scope, &path)? == Check::Skipped {
                    skipped = true;
                }
            }
        }
    }

    if skipped {
        Ok(Check::Skipped)
    } else {
        Ok(Check::Matched)
    }
}

fn validate_array(
    resource: &[Value],
    pattern: &[Value],
    scope: Scope<'_>,
    path: &str,
) -> Result<Check, ValidationError> {
    let first = pattern.first().ok_or(ValidationError::EmptyArrayPattern {
        path: path.to_string(),
    })?;

    if let Value::Object(pattern_map) = first {
        // Maps inside arrays can carry anchors that select which resource
        // elements the pattern applies to.
        return validate_array_of_maps(resource, pattern_map, scope, path);
    }

    let mut skipped = false;
    for (i, subpattern) in pattern.iter().enumerate() {
        let value = resource.get(i).unwrap_or(&Value::Null);
        let path = child(path, &i.to_string());
        if validate_element(value, subpattern, scope, &path)? == Check::Skipped {
            skipped = true;
        }
    }

    if skipped {
        Ok(Check::Skipped)
    } else {
        Ok(Check::Matched)
    }
}

fn validate_array_of_maps(
    resource: &[Value],
    pattern: &Map<String, Value>,
    scope: Scope<'_>,
    path: &str,
) -> Result<Check, ValidationError> {
    let mut selectors = Vec::new();
    let mut has_existence = false;
    for (key, subpattern) in pattern {
        let (anchor, raw) = Anchor::parse(key);
        match anchor {
            Anchor::Condition | Anchor::Negation => selectors.push((anchor, raw, subpattern)),
            Anchor::Existence => {
                has_existence = true;
                selectors.push((anchor, raw, subpattern));
            }
            _ => {}
        }
    }

    // Surviving elements are validated with anchors reduced to their raw
    // field names. Negation anchors only select; asserting them as content
    // would contradict the selection that admitted the element.
    let mut content = Map::new();
    for (key, subpattern) in pattern {
        let (anchor, raw) = Anchor::parse(key);
        if anchor == Anchor::Negation {
            continue;
        }
        content.insert(raw.to_string(), subpattern.clone());
    }
    let content = Value::Object(content);

    let mut survivors = 0;
    let mut skipped = false;
    for (i, element) in resource.iter().enumerate() {
        let element_path = child(path, &i.to_string());

        let mut selected = true;
        for (anchor, raw, subpattern) in &selectors {
            let value = element.get(*raw).unwrap_or(&Value::Null);
            let sat = satisfies(value, subpattern, scope, &child(&element_path, raw))?;
            let keep = match anchor {
                Anchor::Negation => !sat,
                _ => sat,
            };
            if !keep {
                selected = false;
                break;
            }
        }
        if !selected {
            continue;
        }

        survivors += 1;
        if validate_element(element, &content, scope, &element_path)? == Check::Skipped {
            skipped = true;
        }
    }

    if survivors == 0 {
        if has_existence {
            return Err(ValidationError::NoMatchingElement {
                path: path.to_string(),
            });
        }
        if !selectors.is_empty() {
            return Ok(Check::Skipped);
        }
    }

    if skipped {
        Ok(Check::Skipped)
    } else {
        Ok(Check::Matched)
    }
}

/// Boolean form of validation for anchor checks: mismatches are `false`,
/// while defects in the pattern itself still propagate.
fn satisfies(
    resource: &Value,
    pattern: &Value,
    scope: Scope<'_>,
    path: &str,
) -> Result<bool, ValidationError> {
    match validate_element(resource, pattern, scope, path) {
        Ok(_) => Ok(true),
        Err(e) if e.is_mismatch() => Ok(false),
        Err(e) => Err(e),
    }
}

pub(crate) fn child(path: &str, segment: &str) -> String {
    if path == "/" {
        format!("/{segment}")
    } else {
        format!("{path}/{segment}")
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matches_nested_maps() {
        let resource = json!({"metadata": {"labels": {"app": "nginx"}}});
        let pattern = json!({"metadata": {"labels": {"app": "ngin*"}}});
        assert_eq!(
            validate_resource_with_pattern(&resource, &pattern),
            Ok(Check::Matched)
        );
    }

    #[test]
    fn mismatch_reports_the_path() {
        let resource = json!({"spec": {"replicas": 2}});
        let pattern = json!({"spec": {"replicas": ">2"}});
        let err = validate_resource_with_pattern(&resource, &pattern).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ValueMismatch {
                path: "/spec/replicas".to_string(),
                pattern: json!(">2"),
                value: json!(2),
            }
        );
        assert!(err.to_string().contains("/spec/replicas"));
    }

    #[test]
    fn star_asserts_presence() {
        let pattern = json!({"spec": {"serviceAccountName": "*"}});
        assert_eq!(
            validate_resource_with_pattern(&json!({"spec": {"serviceAccountName": "sa"}}), &pattern),
            Ok(Check::Matched)
        );
        assert_eq!(
            validate_resource_with_pattern(&json!({"spec": {}}), &pattern),
            Err(ValidationError::FieldAbsent {
                path: "/spec/serviceAccountName".to_string()
            })
        );
    }

    #[test]
    fn condition_anchor_skips_the_object() {
        let pattern = json!({"spec": {"(replicas)": 3, "strategy": "RollingUpdate"}});

        // The condition holds, so the sibling assertion applies.
        let resource = json!({"spec": {"replicas": 3, "strategy": "Recreate"}});
        assert!(validate_resource_with_pattern(&resource, &pattern).is_err());

        // The condition misses: the object is skipped, not failed.
        let resource = json!({"spec": {"replicas": 2, "strategy": "Recreate"}});
        assert_eq!(
            validate_resource_with_pattern(&resource, &pattern),
            Ok(Check::Skipped)
        );

        // A condition over a missing sibling also skips.
        let resource = json!({"spec": {"strategy": "Recreate"}});
        assert_eq!(
            validate_resource_with_pattern(&resource, &pattern),
            Ok(Check::Skipped)
        );
    }

    #[test]
    fn negation_anchor_rejects_matches() {
        let pattern = json!({"spec": {"!(hostNetwork)": true}});
        assert_eq!(
            validate_resource_with_pattern(&json!({"spec": {"hostNetwork": false}}), &pattern),
            Ok(Check::Matched)
        );
        assert_eq!(
            validate_resource_with_pattern(&json!({"spec": {}}), &pattern),
            Ok(Check::Matched)
        );
        assert_eq!(
            validate_resource_with_pattern(&json!({"spec": {"hostNetwork": true}}), &pattern),
            Err(ValidationError::ForbiddenValue {
                path: "/spec/hostNetwork".to_string()
            })
        );
    }

    #[test]
    fn equality_anchor_is_literal() {
        let pattern = json!({"metadata": {"=(name)": "a*c"}});
        assert_eq!(
            validate_resource_with_pattern(&json!({"metadata": {"name": "a*c"}}), &pattern),
            Ok(Check::Matched)
        );
        assert!(
            validate_resource_with_pattern(&json!({"metadata": {"name": "abc"}}), &pattern)
                .is_err()
        );
    }

    #[test]
    fn existence_anchor_selects_array_elements() {
        let pattern = json!({"spec": {"containers": [{"^(name)": "*", "image": "!*:latest"}]}});

        let resource = json!({"spec": {"containers": [{"name": "c", "image": "nginx:1.19"}]}});
        assert_eq!(
            validate_resource_with_pattern(&resource, &pattern),
            Ok(Check::Matched)
        );

        let resource = json!({"spec": {"containers": [{"name": "c", "image": "nginx:latest"}]}});
        let err = validate_resource_with_pattern(&resource, &pattern).unwrap_err();
        assert!(err.to_string().contains("/spec/containers/0/image"));

        let resource = json!({"spec": {"containers": [{"image": "nginx:1.19"}]}});
        assert_eq!(
            validate_resource_with_pattern(&resource, &pattern),
            Err(ValidationError::NoMatchingElement {
                path: "/spec/containers".to_string()
            })
        );
    }

    #[test]
    fn condition_anchor_selects_array_elements() {
        let pattern = json!({"spec": {"containers": [{"(name)": "sidecar", "image": "envoy:*"}]}});

        // Only the selected element is held to the pattern.
        let resource = json!({"spec": {"containers": [
            {"name": "app", "image": "nginx:1.19"},
            {"name": "sidecar", "image": "envoy:1.27"}
        ]}});
        assert_eq!(
            validate_resource_with_pattern(&resource, &pattern),
            Ok(Check::Matched)
        );

        // No element selected: skipped, not failed.
        let resource = json!({"spec": {"containers": [{"name": "app", "image": "nginx:1.19"}]}});
        assert_eq!(
            validate_resource_with_pattern(&resource, &pattern),
            Ok(Check::Skipped)
        );
    }

    #[test]
    fn reference_compares_sibling_fields() {
        let pattern = json!({"spec": {"replicas": ">$(/spec/minReplicas)"}});

        let resource = json!({"spec": {"replicas": 5, "minReplicas": 3}});
        assert_eq!(
            validate_resource_with_pattern(&resource, &pattern),
            Ok(Check::Matched)
        );

        let resource = json!({"spec": {"replicas": 2, "minReplicas": 3}});
        assert!(validate_resource_with_pattern(&resource, &pattern).is_err());
    }

    #[test]
    fn reference_prefers_the_pattern_tree() {
        let pattern = json!({"spec": {"floor": 4, "replicas": ">=$(/spec/floor)"}});
        let resource = json!({"spec": {"floor": 4, "replicas": 5}});
        assert_eq!(
            validate_resource_with_pattern(&resource, &pattern),
            Ok(Check::Matched)
        );
    }

    #[test]
    fn unresolved_reference_is_malformed() {
        let pattern = json!({"spec": {"replicas": ">$(/spec/minReplicas)"}});
        let err = validate_resource_with_pattern(&json!({"spec": {"replicas": 5}}), &pattern)
            .unwrap_err();
        assert_eq!(err.kind(), "MalformedPattern");
    }

    #[test]
    fn structure_mismatch_is_typed() {
        let pattern = json!({"spec": {"containers": [{"name": "*"}]}});
        let resource = json!({"spec": {"containers": "none"}});
        assert_eq!(
            validate_resource_with_pattern(&resource, &pattern),
            Err(ValidationError::TypeMismatch {
                path: "/spec/containers".to_string(),
                expected: "array",
                found: "string",
            })
        );
    }
}
