//! Credential discovery: kubeconfig parsing and in-cluster service-account lookup.
//!
//! Both feed into [`ConnectionInfo`], the materialized credential bundle that
//! [`crate::connection::ConnectionContext`] consumes. Parsing the kubeconfig file format
//! itself is `spec.md`'s one explicit "external collaborator" among the four hard
//! pieces -- it still needs a concrete implementation somewhere in the workspace, it
//! just isn't one of the components the core spec is measured against.
pub mod incluster;
pub mod kubeconfig;

use crate::error::LoginError;

/// One half of a path-or-data pair (CA bundle, client cert, client key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Material {
    /// A filesystem path to the PEM material.
    Path(String),
    /// The PEM material itself, already decoded from base64.
    Data(Vec<u8>),
}

/// How the client authenticates itself to the API server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientAuth {
    /// Authorization header scheme, e.g. `"Bearer"`. Paired with `token`, or used alone.
    pub scheme: Option<String>,
    /// Bearer (or scheme-qualified) token.
    pub token: Option<String>,
    /// HTTP basic auth username. Client-cert (mTLS) auth is a separate TLS-layer
    /// mechanism and composes with this; a bearer/scheme token occupies the same
    /// `Authorization` header, so it takes priority over basic auth when both are set.
    pub username: Option<String>,
    /// HTTP basic auth password.
    pub password: Option<String>,
    /// Client certificate, for mutual TLS.
    pub client_certificate: Option<Material>,
    /// Client private key, for mutual TLS.
    pub client_key: Option<Material>,
}

/// The materialized credential bundle a provider hands the vault.
///
/// Exactly one of each `Material`'s path/data forms may be set; see
/// [`ConnectionInfo::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// The API server's base URL.
    pub server: String,
    /// CA bundle used to verify the server's certificate, unless `insecure_skip_tls_verify`.
    pub certificate_authority: Option<Material>,
    /// Skip TLS peer and hostname verification entirely. Never use against an untrusted network.
    pub insecure_skip_tls_verify: bool,
    /// Client authentication.
    pub auth: ClientAuth,
    /// Namespace assumed when a call omits one, for namespaced resources.
    pub default_namespace: Option<String>,
}

impl ConnectionInfo {
    /// Validate the path/data exclusivity invariant from `spec.md` §3: each material
    /// (CA, client cert, client key) comes from exactly one form. Since this type
    /// already only has one `Material` slot per material, the remaining check is that
    /// cert and key travel together.
    pub fn validate(&self) -> Result<(), LoginError> {
        match (&self.auth.client_certificate, &self.auth.client_key) {
            (Some(_), None) => Err(LoginError::ConflictingMaterial("clientKey (certificate given without key)")),
            (None, Some(_)) => Err(LoginError::ConflictingMaterial("clientCertificate (key given without certificate)")),
            _ => Ok(()),
        }
    }
}
