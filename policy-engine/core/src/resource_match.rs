//! Deciding whether a rule's match/exclude descriptions select a resource.

use crate::pattern::wildcard;
use crate::KindRegistry;
use kyverno_policy_engine_k8s_api as k8s;
use serde_json::Value;

/// The applicability of a rule to a resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The match description selects the resource.
    Match,

    /// The match description selects the resource, but the exclude
    /// description takes it back out.
    Exclude,

    /// The match description does not select the resource.
    NotApplicable,
}

/// Checks a resource against a rule's match and exclude descriptions.
pub fn matches(resource: &Value, rule: &k8s::Rule) -> MatchOutcome {
    matches_scoped(resource, rule, None)
}

pub(crate) fn matches_scoped(
    resource: &Value,
    rule: &k8s::Rule,
    registry: Option<&KindRegistry>,
) -> MatchOutcome {
    let kind = kind(resource);
    let name = name(resource);
    let namespace = namespace(resource);
    let labels = labels(resource);

    // Label selectors only apply to namespace-scoped kinds; an unregistered
    // kind is assumed namespaced.
    let selectors_apply = registry.map(|r| r.is_namespaced(kind)).unwrap_or(true);

    let desc = &rule.match_resources.resources;
    if !desc.kinds.iter().any(|k| k == kind) {
        return MatchOutcome::NotApplicable;
    }
    if let Some(glob) = &desc.name {
        if !wildcard(glob, name) {
            return MatchOutcome::NotApplicable;
        }
    }
    if let Some(glob) = &desc.namespace {
        if !wildcard(glob, namespace) {
            return MatchOutcome::NotApplicable;
        }
    }
    if selectors_apply {
        if let Some(selector) = &desc.selector {
            if !selector.matches(&labels) {
                return MatchOutcome::NotApplicable;
            }
        }
    }

    if let Some(exclude) = &rule.exclude_resources {
        if excluded(
            &exclude.resources,
            kind,
            name,
            namespace,
            &labels,
            selectors_apply,
        ) {
            return MatchOutcome::Exclude;
        }
    }

    MatchOutcome::Match
}

/// An exclude description takes effect only when it specifies at least one
/// criterion and every specified criterion matches.
fn excluded(
    desc: &k8s::ResourceDescription,
    kind: &str,
    name: &str,
    namespace: &str,
    labels: &k8s::labels::Labels,
    selectors_apply: bool,
) -> bool {
    let specified = !desc.kinds.is_empty()
        || desc.name.is_some()
        || desc.namespace.is_some()
        || desc.selector.is_some();
    if !specified {
        return false;
    }

    if !desc.kinds.is_empty() && !desc.kinds.iter().any(|k| k == kind) {
        return false;
    }
    if let Some(glob) = &desc.name {
        if !wildcard(glob, name) {
            return false;
        }
    }
    if let Some(glob) = &desc.namespace {
        if !wildcard(glob, namespace) {
            return false;
        }
    }
    if let Some(selector) = &desc.selector {
        if !selectors_apply || !selector.matches(labels) {
            return false;
        }
    }

    true
}

pub(crate) fn kind(resource: &Value) -> &str {
    resource.get("kind").and_then(Value::as_str).unwrap_or("")
}

pub(crate) fn name(resource: &Value) -> &str {
    resource
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or("")
}

pub(crate) fn namespace(resource: &Value) -> &str {
    resource
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn labels(resource: &Value) -> k8s::labels::Labels {
    resource
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
