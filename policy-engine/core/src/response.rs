//! Aggregation of per-rule outcomes into the response returned to the
//! admission transport.

use base64::Engine;
use json_patch::PatchOperation;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RuleStatus {
    Applied,
    Skipped,
    Failed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RuleType {
    Mutation,
    Validation,
    Generation,
}

/// The terminal outcome of a single rule.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleResponse {
    pub name: String,

    #[serde(rename = "type")]
    pub rule_type: RuleType,

    pub status: RuleStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchOperation>,
}

/// The outcome of evaluating one policy against one resource.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResponse {
    pub policy: String,
    pub success: bool,
    pub rules: Vec<RuleResponse>,

    /// The concatenation of every successful mutation rule's patches, in
    /// rule order. Serialized as base64 JSON-patch bytes.
    #[serde(serialize_with = "patch_as_base64")]
    pub aggregated_patch: Vec<PatchOperation>,

    pub patched_resource: Value,

    #[serde(rename = "durationMs", serialize_with = "duration_as_millis")]
    pub duration: Duration,
}

// === impl RuleResponse ===

impl RuleResponse {
    pub fn applied(
        name: &str,
        rule_type: RuleType,
        message: impl Into<String>,
        patches: Vec<PatchOperation>,
    ) -> Self {
        Self {
            name: name.to_string(),
            rule_type,
            status: RuleStatus::Applied,
            message: Some(message.into()),
            patches,
        }
    }

    pub fn skipped(name: &str, rule_type: RuleType, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            rule_type,
            status: RuleStatus::Skipped,
            message: Some(message.into()),
            patches: vec![],
        }
    }

    pub fn failed(name: &str, rule_type: RuleType, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            rule_type,
            status: RuleStatus::Failed,
            message: Some(message.into()),
            patches: vec![],
        }
    }

    pub fn success(&self) -> bool {
        self.status != RuleStatus::Failed
    }
}

// === impl EngineResponse ===

impl EngineResponse {
    pub(crate) fn new(
        policy: String,
        rules: Vec<RuleResponse>,
        patched_resource: Value,
        duration: Duration,
    ) -> Self {
        let success = rules
            .iter()
            .filter(|r| r.status != RuleStatus::Skipped)
            .all(RuleResponse::success);

        let aggregated_patch = rules
            .iter()
            .filter(|r| r.rule_type == RuleType::Mutation && r.status == RuleStatus::Applied)
            .flat_map(|r| r.patches.iter().cloned())
            .collect();

        Self {
            policy,
            success,
            rules,
            aggregated_patch,
            patched_resource,
            duration,
        }
    }

    /// Rules that applied, as opposed to being skipped or failing.
    pub fn rules_applied(&self) -> usize {
        self.rules
            .iter()
            .filter(|r| r.status == RuleStatus::Applied)
            .count()
    }

    /// The aggregated patch as RFC-6902 JSON bytes.
    pub fn aggregated_patch_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.aggregated_patch).unwrap_or_default()
    }
}

fn patch_as_base64<S: Serializer>(ops: &[PatchOperation], serializer: S) -> Result<S::Ok, S::Error> {
    let bytes = serde_json::to_vec(ops).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn duration_as_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
