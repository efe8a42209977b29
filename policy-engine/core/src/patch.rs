//! RFC-6902 patch application, restricted to `add`/`replace`/`remove`.

use json_patch::{AddOperation, PatchOperation, RemoveOperation, ReplaceOperation};
use kyverno_policy_engine_k8s_api as k8s;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch application failed: {0}")]
    Apply(#[from] json_patch::PatchError),
}

// === impl PatchError ===

impl PatchError {
    pub fn kind(&self) -> &'static str {
        "PatchApplyFailure"
    }
}

/// Applies `patches` to a deep copy of `resource`; the original is preserved
/// for error reporting.
pub fn apply_patches(resource: &Value, patches: &[PatchOperation]) -> Result<Value, PatchError> {
    let mut patched = resource.clone();
    json_patch::patch(&mut patched, patches)?;
    Ok(patched)
}

/// Applies a rule's explicit patch list one operation at a time, returning
/// the operations that took effect together with the patched resource.
///
/// A `remove` whose path is already gone is dropped rather than failed, so
/// that re-admitting an already-mutated resource stays a no-op. Any other
/// failure aborts the rule.
pub(crate) fn process_patches(
    patches: &[k8s::Patch],
    resource: &Value,
) -> Result<(Vec<PatchOperation>, Value), PatchError> {
    let mut patched = resource.clone();
    let mut applied = Vec::new();

    for patch in patches {
        let op = convert(patch);
        let mut attempt = patched.clone();
        match json_patch::patch(&mut attempt, std::slice::from_ref(&op)) {
            Ok(()) => {
                patched = attempt;
                applied.push(op);
            }
            Err(error) if patch.op == k8s::PatchOp::Remove => {
                tracing::debug!(%error, path = %patch.path, "skipping remove of a missing path");
            }
            Err(error) => return Err(error.into()),
        }
    }

    Ok((applied, patched))
}

fn convert(patch: &k8s::Patch) -> PatchOperation {
    let path = patch.path.clone();
    match patch.op {
        k8s::PatchOp::Add => PatchOperation::Add(AddOperation {
            path,
            value: patch.value.clone().unwrap_or(Value::Null),
        }),
        k8s::PatchOp::Replace => PatchOperation::Replace(ReplaceOperation {
            path,
            value: patch.value.clone().unwrap_or(Value::Null),
        }),
        k8s::PatchOp::Remove => PatchOperation::Remove(RemoveOperation { path }),
    }
}

/// Escapes a field name for use as a JSON-Pointer token.
pub(crate) fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}
