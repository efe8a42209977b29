//! `$(...)` references: pattern leaves that resolve to values assigned
//! elsewhere, in the pattern tree itself or in the resource under admission.

use crate::anchor;
use crate::pattern::Operator;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("reference names no path")]
    EmptyReference,

    #[error("nothing at {path} in the pattern or the resource")]
    NotFound { path: String },

    #[error("referenced value at {path} cannot carry an operator")]
    NotScalar { path: String },
}

/// Indicates whether a string pattern is, or wraps, a reference. An operator
/// may prefix the reference itself (`">$(/spec/minReplicas)"`).
pub fn contains_reference(pattern: &str) -> bool {
    let (_, rest) = Operator::parse(pattern);
    rest.len() > 3 && rest.starts_with("$(") && rest.ends_with(')')
}

/// Replaces a reference pattern with the value assigned at the referenced
/// path: by the origin pattern when it carries that path, and by the
/// resource otherwise. A non-equality operator (outside or inside the
/// parentheses) is preserved: the resolved scalar is re-wrapped as
/// `<operator><value>` so the value-pattern evaluator sees an ordinary atom.
///
/// `path` is the location of the leaf under validation; relative references
/// are resolved against it (`..` steps toward the root).
pub fn actualize(
    origin: &Value,
    resource: &Value,
    pattern: &str,
    path: &str,
) -> Result<Value, ResolveError> {
    let (outer, rest) = Operator::parse(pattern);
    let inner = &rest[2..rest.len() - 1];
    let (inner_op, reference) = Operator::parse(inner);

    let operator = if outer != Operator::Equal {
        outer
    } else {
        inner_op
    };

    if reference.is_empty() {
        return Err(ResolveError::EmptyReference);
    }

    let absolute = absolute_path(reference, path);
    let resolved = lookup(origin, &absolute)
        .or_else(|| lookup(resource, &absolute))
        .ok_or(ResolveError::NotFound {
            path: render(&absolute),
        })?;

    if operator == Operator::Equal {
        return Ok(resolved.clone());
    }

    let scalar = match resolved {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => {
            return Err(ResolveError::NotScalar {
                path: render(&absolute),
            })
        }
    };

    Ok(Value::String(format!("{}{}", operator.as_str(), scalar)))
}

/// Forms the absolute segment list for a reference: absolute references are
/// taken verbatim; relative ones are joined to the current leaf's path, with
/// `..` popping a segment.
fn absolute_path(reference: &str, current: &str) -> Vec<String> {
    let mut segments = Vec::new();

    let joined = if reference.starts_with('/') {
        reference.to_string()
    } else {
        format!("{current}/{reference}")
    };

    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment.to_string()),
        }
    }

    segments
}

/// Walks a tree along `segments`. Map keys are matched by their raw
/// (anchor-stripped) names; array segments must be decimal indices.
fn lookup<'p>(tree: &'p Value, segments: &[String]) -> Option<&'p Value> {
    let mut current = tree;
    for segment in segments {
        current = match current {
            Value::Object(map) => map
                .iter()
                .find(|(key, _)| anchor::strip(key) == segment)
                .map(|(_, value)| value)?,
            Value::Array(elements) => elements.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn render(segments: &[String]) -> String {
    let mut path = String::new();
    for segment in segments {
        path.push('/');
        path.push_str(segment);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_references() {
        assert!(contains_reference("$(/spec/minReplicas)"));
        assert!(contains_reference(">$(/spec/minReplicas)"));
        assert!(contains_reference("$(<=/spec/minReplicas)"));
        assert!(!contains_reference("nginx:*"));
        assert!(!contains_reference("$()"));
        assert!(!contains_reference("$10"));
    }

    #[test]
    fn the_pattern_wins_over_the_resource() {
        let origin = json!({"spec": {"minReplicas": 3, "replicas": "$(/spec/minReplicas)"}});
        let resource = json!({"spec": {"minReplicas": 7, "replicas": 7}});
        assert_eq!(
            actualize(&origin, &resource, "$(/spec/minReplicas)", "/spec/replicas"),
            Ok(json!(3))
        );
    }

    #[test]
    fn falls_back_to_the_resource() {
        let origin = json!({"spec": {"replicas": ">$(/spec/minReplicas)"}});
        let resource = json!({"spec": {"replicas": 5, "minReplicas": 3}});
        assert_eq!(
            actualize(&origin, &resource, ">$(/spec/minReplicas)", "/spec/replicas"),
            Ok(json!(">3"))
        );
    }

    #[test]
    fn resolves_relative_reference() {
        let origin = json!({"spec": {"minReplicas": 3, "replicas": ">$(../minReplicas)"}});
        assert_eq!(
            actualize(&origin, &json!({}), "$(../minReplicas)", "/spec/replicas"),
            Ok(json!(3))
        );
    }

    #[test]
    fn preserves_operator() {
        let origin = json!({"spec": {"minReplicas": 3}});
        assert_eq!(
            actualize(&origin, &json!({}), ">$(/spec/minReplicas)", "/spec/replicas"),
            Ok(json!(">3"))
        );
    }

    #[test]
    fn resolves_through_anchored_keys() {
        let origin = json!({"spec": {"(minReplicas)": 3}});
        assert_eq!(
            actualize(&origin, &json!({}), ">$(/spec/minReplicas)", "/spec/replicas"),
            Ok(json!(">3"))
        );
    }

    #[test]
    fn resolves_array_indices() {
        let origin = json!({"spec": {"tiers": [{"weight": 10}]}});
        assert_eq!(
            actualize(&origin, &json!({}), "$(/spec/tiers/0/weight)", "/spec/limit"),
            Ok(json!(10))
        );
    }

    #[test]
    fn unresolved_reference_is_an_error() {
        let origin = json!({"spec": {}});
        assert_eq!(
            actualize(&origin, &json!({}), "$(/spec/minReplicas)", "/spec/replicas"),
            Err(ResolveError::NotFound {
                path: "/spec/minReplicas".to_string()
            })
        );
    }

    #[test]
    fn operator_on_subtree_is_an_error() {
        let origin = json!({"spec": {"limits": {"cpu": 1}}});
        assert_eq!(
            actualize(&origin, &json!({}), ">$(/spec/limits)", "/spec/replicas"),
            Err(ResolveError::NotScalar {
                path: "/spec/limits".to_string()
            })
        );
    }
}
