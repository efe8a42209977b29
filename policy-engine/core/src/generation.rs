//! Generation bodies: shape checks and dispatch to the external generator.

use kyverno_policy_engine_k8s_api as k8s;
use std::time::Instant;
use thiserror::Error;

/// The seam to the external collaborator that materializes generated
/// resources. Implementations are synchronous; the engine bounds them with
/// the caller-supplied deadline.
pub trait EnsureGenerated {
    fn ensure_generated(&self, spec: &k8s::Generation) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("{0}")]
    Malformed(#[from] k8s::MalformedPolicy),

    #[error("external lookup deadline exceeded")]
    Timeout,

    #[error("external lookup failed: {0}")]
    Lookup(String),
}

// === impl GenerateError ===

impl GenerateError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "MalformedPolicy",
            Self::Timeout => "ExternalLookupTimeout",
            Self::Lookup(_) => "ExternalLookupError",
        }
    }
}

/// Re-checks a generation body's shape and hands it to the generator hook.
/// Without a hook the request is shape-checked and recorded only; the
/// background collaborator reconciles it.
pub(crate) fn process_generation(
    rule: &str,
    generation: &k8s::Generation,
    hook: Option<&dyn EnsureGenerated>,
    deadline: Option<Instant>,
) -> Result<(), GenerateError> {
    if generation.data.is_some() == generation.clone.is_some() {
        return Err(k8s::MalformedPolicy::GenerationSource {
            rule: rule.to_string(),
        }
        .into());
    }

    let hook = match hook {
        Some(hook) => hook,
        None => return Ok(()),
    };

    if let Some(deadline) = deadline {
        if Instant::now() >= deadline {
            return Err(GenerateError::Timeout);
        }
    }

    hook.ensure_generated(generation)
        .map_err(|e| GenerateError::Lookup(e.to_string()))
}
