#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod policy;

pub use self::labels::Labels;
pub use self::policy::{
    ClusterPolicy, ClusterPolicySpec, CloneFrom, Generation, MalformedPolicy, MatchResources,
    Mutation, Patch, PatchOp, ResourceDescription, Rule, Validation,
};
pub use kube::core::{ObjectMeta, Resource};
