use crate::labels;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A cluster-scoped admission policy: an ordered list of rules, each of which
/// mutates, validates, or generates resources.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(group = "kyverno.io", version = "v1alpha1", kind = "ClusterPolicy")]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicySpec {
    pub rules: Vec<Rule>,
}

/// A single policy rule. Exactly one of `mutate`, `validate`, or `generate`
/// must be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,

    #[serde(rename = "match")]
    pub match_resources: MatchResources,

    #[serde(rename = "exclude", skip_serializing_if = "Option::is_none")]
    pub exclude_resources: Option<MatchResources>,

    #[serde(rename = "mutate", skip_serializing_if = "Option::is_none")]
    pub mutation: Option<Mutation>,

    #[serde(rename = "validate", skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,

    #[serde(rename = "generate", skip_serializing_if = "Option::is_none")]
    pub generation: Option<Generation>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchResources {
    pub resources: ResourceDescription,
}

/// Selects the resources a rule applies to. `kinds` is mandatory; `name` and
/// `namespace` accept `*`/`?` wildcards.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescription {
    pub kinds: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<labels::Selector>,
}

/// A mutation body: an overlay, a list of explicit JSON patches, or both.
/// When both are present the overlay applies first.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<Patch>,
}

/// An explicit RFC-6902 operation carried in a mutation body.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// A validation body: a pattern the admitted resource must satisfy.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub pattern: Value,
}

/// A generation body: a resource to create alongside the admitted one,
/// either from inline data or cloned from an existing object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub kind: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone: Option<CloneFrom>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloneFrom {
    pub namespace: String,
    pub name: String,
}

/// Static shape errors, reported when a policy document is admitted. A policy
/// that passes these checks never produces a shape error at evaluation time.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MalformedPolicy {
    #[error("rule {rule:?} has no body; one of mutate, validate, or generate is required")]
    EmptyRule { rule: String },

    #[error("rule {rule:?} has multiple bodies; only one of mutate, validate, or generate may be set")]
    MultipleBodies { rule: String },

    #[error("rule {rule:?} does not name any resource kinds")]
    MissingKinds { rule: String },

    #[error("rule {rule:?} carries a selector with no requirements")]
    EmptySelector { rule: String },

    #[error("rule {rule:?}: patch {index} is missing a path")]
    PatchMissingPath { rule: String, index: usize },

    #[error("rule {rule:?}: patch {index} ({op:?}) requires a value")]
    PatchMissingValue {
        rule: String,
        index: usize,
        op: PatchOp,
    },

    #[error("rule {rule:?} has a mutate body with neither an overlay nor patches")]
    EmptyMutation { rule: String },

    #[error("rule {rule:?} generate must set exactly one of data or clone")]
    GenerationSource { rule: String },

    #[error("rule {rule:?}: field {field:?} at {path} carries conflicting anchors")]
    ConflictingAnchors {
        rule: String,
        field: String,
        path: String,
    },
}

// === impl ClusterPolicySpec ===

impl ClusterPolicySpec {
    /// Checks the static shape of every rule. Anchor-level checks on overlay
    /// and pattern trees are performed by the engine's policy loader on top
    /// of this.
    pub fn validate(&self) -> Result<(), MalformedPolicy> {
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }
}

// === impl Rule ===

impl Rule {
    pub fn validate(&self) -> Result<(), MalformedPolicy> {
        let bodies = [
            self.mutation.is_some(),
            self.validation.is_some(),
            self.generation.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        match bodies {
            0 => {
                return Err(MalformedPolicy::EmptyRule {
                    rule: self.name.clone(),
                })
            }
            1 => {}
            _ => {
                return Err(MalformedPolicy::MultipleBodies {
                    rule: self.name.clone(),
                })
            }
        }

        self.match_resources.resources.validate(&self.name)?;
        if let Some(exclude) = &self.exclude_resources {
            // An exclude description may leave kinds empty; its other fields
            // are held to the same standard as the match block.
            if let Some(selector) = &exclude.resources.selector {
                if !selector.has_requirements() {
                    return Err(MalformedPolicy::EmptySelector {
                        rule: self.name.clone(),
                    });
                }
            }
        }

        if let Some(mutation) = &self.mutation {
            mutation.validate(&self.name)?;
        }
        if let Some(generation) = &self.generation {
            generation.validate(&self.name)?;
        }

        Ok(())
    }
}

// === impl ResourceDescription ===

impl ResourceDescription {
    fn validate(&self, rule: &str) -> Result<(), MalformedPolicy> {
        if self.kinds.is_empty() {
            return Err(MalformedPolicy::MissingKinds {
                rule: rule.to_string(),
            });
        }

        if let Some(selector) = &self.selector {
            if !selector.has_requirements() {
                return Err(MalformedPolicy::EmptySelector {
                    rule: rule.to_string(),
                });
            }
        }

        Ok(())
    }
}

// === impl Mutation ===

impl Mutation {
    fn validate(&self, rule: &str) -> Result<(), MalformedPolicy> {
        if self.overlay.is_none() && self.patches.is_empty() {
            return Err(MalformedPolicy::EmptyMutation {
                rule: rule.to_string(),
            });
        }

        for (index, patch) in self.patches.iter().enumerate() {
            patch.validate(rule, index)?;
        }

        Ok(())
    }
}

// === impl Patch ===

impl Patch {
    fn validate(&self, rule: &str, index: usize) -> Result<(), MalformedPolicy> {
        if self.path.is_empty() {
            return Err(MalformedPolicy::PatchMissingPath {
                rule: rule.to_string(),
                index,
            });
        }

        if matches!(self.op, PatchOp::Add | PatchOp::Replace) && self.value.is_none() {
            return Err(MalformedPolicy::PatchMissingValue {
                rule: rule.to_string(),
                index,
                op: self.op,
            });
        }

        Ok(())
    }
}

// === impl Generation ===

impl Generation {
    fn validate(&self, rule: &str) -> Result<(), MalformedPolicy> {
        if self.data.is_some() == self.clone.is_some() {
            return Err(MalformedPolicy::GenerationSource {
                rule: rule.to_string(),
            });
        }
        Ok(())
    }
}
