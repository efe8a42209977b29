//! Kyverno policy engine core.
//!
//! The engine is a pure function from `(policy, resource)` to an admission
//! decision. For each rule of a policy it:
//!
//! - gates applicability on the rule's match/exclude resource descriptions;
//! - for mutation rules, diffs the resource against the rule's overlay to
//!   synthesize JSON-Patch operations, applies them (together with any
//!   explicit patches) to a copy of the resource, and advances that copy so
//!   later rules observe it;
//! - for validation rules, recursively checks the (possibly mutated)
//!   resource against the rule's pattern;
//! - for generation rules, re-checks the body's shape and defers to the
//!   external generator hook.
//!
//! ```ignore
//! [ Rule ] -> match/exclude -> overlay -> patches -> pattern
//!                  |              |          |          |
//!              Skipped        Applied    Applied    Applied/Failed
//! ```
//!
//! Patterns and overlays share one vocabulary: JSON trees whose map keys may
//! carry anchors (`(k)`, `^(k)`, `=(k)`, `!(k)`, `+(k)`), whose string
//! leaves may carry comparison operators and wildcards, and whose `$(...)`
//! leaves resolve against the pattern itself. Rule failures never escape a
//! rule: they become Failed rule responses, and the engine response
//! aggregates.
//!
//! The engine holds no state across invocations and performs no I/O; it is
//! safe to call concurrently from any number of request handlers.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod anchor;
mod generation;
pub mod overlay;
pub mod patch;
pub mod pattern;
pub mod reference;
pub mod resource_match;
mod response;
pub mod validation;

pub use self::generation::{EnsureGenerated, GenerateError};
pub use self::patch::{apply_patches, PatchError};
pub use self::resource_match::{matches, MatchOutcome};
pub use self::response::{EngineResponse, RuleResponse, RuleStatus, RuleType};
pub use kyverno_policy_engine_k8s_api as api;

use ahash::AHashMap;
use kyverno_policy_engine_k8s_api as k8s;
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Maps resource kinds to their API group/version and scope. The engine
/// consults it to decide whether label selectors apply: cluster-scoped
/// kinds are not selected by labels.
#[derive(Clone, Debug, Default)]
pub struct KindRegistry(AHashMap<String, KindRef>);

#[derive(Clone, Debug)]
pub struct KindRef {
    pub group: String,
    pub version: String,
    pub namespaced: bool,
}

/// Per-request context threaded through evaluation. Everything the engine
/// knows about the cluster arrives here; there is no global state.
#[derive(Default)]
pub struct EvalContext<'a> {
    pub kinds: KindRegistry,

    /// Bounds synchronous external lookups made on behalf of generation
    /// rules.
    pub deadline: Option<Instant>,

    pub generate: Option<&'a dyn EnsureGenerated>,
}

/// The one error `evaluate` itself can return: the resource is not a JSON
/// object. Everything else is reported per rule.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error("resource is not a JSON object")]
pub struct InvalidResource;

// === impl KindRegistry ===

impl KindRegistry {
    pub fn register(&mut self, kind: impl Into<String>, reference: KindRef) {
        self.0.insert(kind.into(), reference);
    }

    pub fn get(&self, kind: &str) -> Option<&KindRef> {
        self.0.get(kind)
    }

    pub(crate) fn is_namespaced(&self, kind: &str) -> bool {
        self.0.get(kind).map(|r| r.namespaced).unwrap_or(true)
    }
}

/// Checks a policy at admission: the static shape of every rule, plus the
/// anchor vocabulary of every overlay and pattern tree.
pub fn validate_policy(policy: &k8s::ClusterPolicy) -> Result<(), k8s::MalformedPolicy> {
    policy.spec.validate()?;

    for rule in &policy.spec.rules {
        if let Some(overlay) = rule.mutation.as_ref().and_then(|m| m.overlay.as_ref()) {
            anchor::check_conflicts(overlay).map_err(|c| conflict(rule, c))?;
        }
        if let Some(validation) = &rule.validation {
            anchor::check_conflicts(&validation.pattern).map_err(|c| conflict(rule, c))?;
        }
    }

    Ok(())
}

fn conflict(rule: &k8s::Rule, conflict: anchor::AnchorConflict) -> k8s::MalformedPolicy {
    k8s::MalformedPolicy::ConflictingAnchors {
        rule: rule.name.clone(),
        field: conflict.field,
        path: conflict.path,
    }
}

/// Applies every rule of `policy` to `resource`, in order.
///
/// Rules are independent: a failed rule marks the response unsuccessful but
/// does not stop later rules. Patches from successful mutation rules are
/// visible to every later rule and are aggregated into the response.
pub fn evaluate(
    policy: &k8s::ClusterPolicy,
    resource: &Value,
    ctx: &EvalContext<'_>,
) -> Result<EngineResponse, InvalidResource> {
    if !resource.is_object() {
        return Err(InvalidResource);
    }

    let start = Instant::now();
    let policy_name = policy.metadata.name.clone().unwrap_or_default();

    let mut current = resource.clone();
    let mut rules = Vec::new();

    for rule in &policy.spec.rules {
        let rule_type = if rule.mutation.is_some() {
            RuleType::Mutation
        } else if rule.validation.is_some() {
            RuleType::Validation
        } else if rule.generation.is_some() {
            RuleType::Generation
        } else {
            // Bodyless rules are rejected at policy admission.
            continue;
        };

        match resource_match::matches_scoped(&current, rule, Some(&ctx.kinds)) {
            MatchOutcome::Match => {}
            outcome => {
                debug!(rule = %rule.name, ?outcome, "rule does not select the resource");
                rules.push(RuleResponse::skipped(
                    &rule.name,
                    rule_type,
                    "resource not selected",
                ));
                continue;
            }
        }

        let response = if let Some(mutation) = &rule.mutation {
            mutate_rule(&policy_name, rule, mutation, &mut current)
        } else if let Some(validation) = &rule.validation {
            validate_rule(&policy_name, rule, validation, &current)
        } else if let Some(generation) = &rule.generation {
            generate_rule(&policy_name, rule, generation, ctx)
        } else {
            continue;
        };
        rules.push(response);
    }

    Ok(EngineResponse::new(
        policy_name,
        rules,
        current,
        start.elapsed(),
    ))
}

/// Runs a mutation rule: overlay first, then explicit patches, each applied
/// to a fresh copy. `current` only advances when the whole rule succeeds, so
/// a failed rule contributes nothing to the aggregate.
fn mutate_rule(
    policy: &str,
    rule: &k8s::Rule,
    mutation: &k8s::Mutation,
    current: &mut Value,
) -> RuleResponse {
    let mut patches = Vec::new();
    let mut patched = current.clone();

    if let Some(overlay_tree) = &mutation.overlay {
        match overlay::process_overlay(&patched, overlay_tree) {
            // An overlay that emits nothing did not apply to this resource:
            // every condition-gated subtree missed, or the content already
            // holds.
            Ok(Some(ops)) if ops.is_empty() => {
                return RuleResponse::skipped(
                    &rule.name,
                    RuleType::Mutation,
                    "overlay produced no changes",
                )
            }
            Ok(Some(ops)) => match patch::apply_patches(&patched, &ops) {
                Ok(next) => {
                    patched = next;
                    patches.extend(ops);
                }
                Err(e) => {
                    return RuleResponse::failed(
                        &rule.name,
                        RuleType::Mutation,
                        message(policy, &rule.name, e.kind(), &e),
                    )
                }
            },
            Ok(None) => {
                return RuleResponse::skipped(
                    &rule.name,
                    RuleType::Mutation,
                    "overlay conditions not satisfied",
                )
            }
            Err(e) => {
                return RuleResponse::failed(
                    &rule.name,
                    RuleType::Mutation,
                    message(policy, &rule.name, e.kind(), &e),
                )
            }
        }
    }

    if !mutation.patches.is_empty() {
        match patch::process_patches(&mutation.patches, &patched) {
            Ok((ops, next)) => {
                patched = next;
                patches.extend(ops);
            }
            Err(e) => {
                return RuleResponse::failed(
                    &rule.name,
                    RuleType::Mutation,
                    message(policy, &rule.name, e.kind(), &e),
                )
            }
        }
    }

    *current = patched;
    RuleResponse::applied(&rule.name, RuleType::Mutation, "resource mutated", patches)
}

fn validate_rule(
    policy: &str,
    rule: &k8s::Rule,
    validation: &k8s::Validation,
    current: &Value,
) -> RuleResponse {
    match validation::validate_resource_with_pattern(current, &validation.pattern) {
        Ok(validation::Check::Matched) => RuleResponse::applied(
            &rule.name,
            RuleType::Validation,
            "pattern validated",
            vec![],
        ),
        Ok(validation::Check::Skipped) => RuleResponse::skipped(
            &rule.name,
            RuleType::Validation,
            "pattern conditions not satisfied",
        ),
        Err(e) => {
            let text = match &validation.message {
                Some(custom) => format!(
                    "{policy}/{rule}: {kind}: {custom}; {e}",
                    rule = rule.name,
                    kind = e.kind(),
                ),
                None => message(policy, &rule.name, e.kind(), &e),
            };
            RuleResponse::failed(&rule.name, RuleType::Validation, text)
        }
    }
}

fn generate_rule(
    policy: &str,
    rule: &k8s::Rule,
    generation: &k8s::Generation,
    ctx: &EvalContext<'_>,
) -> RuleResponse {
    match generation::process_generation(&rule.name, generation, ctx.generate, ctx.deadline) {
        Ok(()) => RuleResponse::applied(
            &rule.name,
            RuleType::Generation,
            "generation request recorded",
            vec![],
        ),
        Err(e) => RuleResponse::failed(
            &rule.name,
            RuleType::Generation,
            message(policy, &rule.name, e.kind(), &e),
        ),
    }
}

fn message(policy: &str, rule: &str, kind: &str, error: &dyn std::fmt::Display) -> String {
    format!("{policy}/{rule}: {kind}: {error}")
}
