//! Data model, JSON-Patch engine and strategic-merge planner shared by vaultkube's
//! higher-level crates.
//!
//! This crate has no opinion about transport, authentication or retries -- see
//! `vaultkube-client` for that. It only knows how to describe a resource
//! ([`resource::Resource`]), diff and apply RFC 6902 patches ([`json_patch`]), and plan
//! a Kubernetes strategic-merge-patch body ([`strategic_merge`]).
#![warn(missing_docs)]

pub mod error;
pub mod json_patch;
pub mod merge_patch;
pub mod resource;
pub mod strategic_merge;

pub use error::{ModelError, PatchTestFailed, PointerError, StrategicMergeError};
pub use json_patch::{ApplyError, JsonPatch, PatchOp};
pub use resource::{CodecRegistry, DynamicObject, ListMergeStrategy, ListMeta, ObjectMeta, PatchKind, Resource, ResourceDescriptor, ResourceExt};

pub use merge_patch::{apply as merge_patch_apply, diff as merge_patch_diff};
