//! Async Kubernetes API client: a credential vault that never leaves a caller stuck on a
//! single expired token, a pooled rustls/hyper transport, and a typed CRUD facade that
//! picks the right patch encoding for you.
//!
//! This crate is a thin re-export of [`vaultkube_core`] (the resource model, JSON-Patch
//! and strategic-merge engines) and [`vaultkube_client`] (the vault, connection pool,
//! REST client, watch reader, facade, and login orchestrator). Bring your own typed
//! resource kinds -- implement [`Resource`] for them, or fall back to [`DynamicObject`]
//! for kinds you don't have a static model for.
#![warn(missing_docs)]

pub use vaultkube_core::{
    merge_patch, strategic_merge, ApplyError, CodecRegistry, DynamicObject, JsonPatch, ListMergeStrategy, ListMeta, ModelError, ObjectMeta, PatchKind, PatchOp, PatchTestFailed, PointerError, Resource,
    ResourceDescriptor, ResourceExt, StrategicMergeError,
};

pub use vaultkube_client::{
    batch, config, connection, error, facade, login, rest_client, run_batch, selectors, vault, watch, BatchOutcome, ClientAuth, ConnectionContext, ConnectionInfo, DryRun, Error, ErrorEnvelope,
    Facade, FieldOp, FieldPath, FieldSelector, LabelExpression, LabelSelector, LoginError, Material, Outcome, ProcessingConfig, PropagationPolicy, QueryParams, Result, RestClient, RetryConfig,
    SelectorValue, Vault, VaultCredential, VaultKey, WatchEvent,
};
