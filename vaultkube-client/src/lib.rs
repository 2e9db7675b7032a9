//! Transport, authentication, and the typed CRUD surface for talking to a Kubernetes API
//! server: credential vault, TLS/connection pool, REST client, watch reader, and the
//! facade that ties them together.
//!
//! This crate has no opinion about the resource model beyond [`vaultkube_core::Resource`]
//! -- typed kinds come from a generated crate or a hand-written impl, same as `kube-rs`'s
//! separation between `kube-client` and `k8s-openapi`.
#![warn(missing_docs)]

pub mod batch;
pub mod config;
pub mod connection;
pub mod error;
pub mod facade;
pub mod login;
pub mod rest_client;
pub mod selectors;
pub mod vault;
pub mod watch;

pub use batch::{run_batch, BatchOutcome};
pub use config::{ClientAuth, ConnectionInfo, Material};
pub use connection::ConnectionContext;
pub use error::{Error, ErrorEnvelope, LoginError, Result};
pub use facade::{Facade, FieldPath, Outcome};
pub use rest_client::{ProcessingConfig, RestClient, RetryConfig};
pub use selectors::{DryRun, FieldOp, FieldSelector, LabelExpression, LabelSelector, PropagationPolicy, QueryParams, SelectorValue};
pub use vault::{Vault, VaultCredential, VaultKey};
pub use watch::WatchEvent;
