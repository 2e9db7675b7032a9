//! The error taxonomy shared by every component in this crate.
use vaultkube_core::{ModelError, PatchTestFailed, PointerError, StrategicMergeError};

/// Structured detail carried by API-server error responses (a `Status` resource).
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ErrorEnvelope {
    /// Machine-readable reason, e.g. `"AlreadyExists"`.
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Structured details, when the server provides them.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    /// The HTTP status code that produced this envelope.
    #[serde(skip)]
    pub http_status: u16,
}

/// Failure discovering or validating credentials.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// Both the path-form and data-form of the same TLS material were set.
    #[error("{0} may be given as a path or as inline data, not both")]
    ConflictingMaterial(&'static str),
    /// Neither in-cluster, `KUBECONFIG`, nor `~/.kube/config` produced a usable config.
    #[error("no credentials found: in-cluster environment absent and no kubeconfig located")]
    NoCredentialsFound,
    /// The selected kubeconfig context, cluster, or user entry could not be found.
    #[error("kubeconfig is missing the {0} named {1:?}")]
    MissingEntry(&'static str, String),
    /// The kubeconfig YAML itself did not parse.
    #[error("failed to parse kubeconfig: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
    /// Reading a file referenced by the kubeconfig or the in-cluster layout failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The provider's source function failed outright.
    #[error("credential provider {0:?} failed: {1}")]
    ProviderFailed(String, String),
}

/// The full error surface of `vaultkube-client`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Credential discovery or validation failed.
    #[error(transparent)]
    Login(#[from] LoginError),
    /// The server rejected the request's credentials (401).
    #[error("unauthorized: {0:?}")]
    Unauthorized(ErrorEnvelope),
    /// The server denied the request on authorization grounds (403).
    #[error("forbidden: {0:?}")]
    Forbidden(ErrorEnvelope),
    /// The requested resource does not exist (404).
    #[error("not found: {0:?}")]
    NotFound(ErrorEnvelope),
    /// A resourceVersion mismatch, `AlreadyExists`, or JSON-Patch `test` failure (409).
    #[error("conflict: {0:?}")]
    Conflict(ErrorEnvelope),
    /// The request itself was malformed (400) or failed validation (422).
    #[error("bad request: {0:?}")]
    BadRequest(ErrorEnvelope),
    /// The server failed or is temporarily unavailable (5xx).
    #[error("server error ({status}): {envelope:?}")]
    ServerError {
        /// The HTTP status the server returned.
        status: u16,
        /// The decoded error envelope, if the body was a `Status` resource.
        envelope: ErrorEnvelope,
    },
    /// A call was made after the owning [`crate::connection::ConnectionContext`] closed.
    #[error("connection context is closed")]
    ContextClosed,
    /// A JSON pointer was malformed or resolved to something the operation couldn't act on.
    #[error(transparent)]
    Pointer(#[from] PointerError),
    /// An RFC 6902 `test` guard failed.
    #[error(transparent)]
    PatchTestFailed(#[from] PatchTestFailed),
    /// The resource model's codec failed to encode or decode a value.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The strategic-merge planner was asked to scope to an invalid path.
    #[error(transparent)]
    StrategicMerge(#[from] StrategicMergeError),
    /// Building or sending the HTTP request failed below the API-semantics layer.
    #[error("http error: {0}")]
    Http(#[from] http::Error),
    /// Low-level transport failure (connect, TLS handshake, read/write).
    #[error("transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    /// The response body was not valid UTF-8.
    #[error("response was not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// The response body did not parse as JSON.
    #[error("failed to parse response body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// A watch stream line exceeded the configured maximum length.
    #[error("watch stream line exceeded the maximum buffered length")]
    WatchLineTooLong,
    /// An I/O error while reading a streaming response body.
    #[error("i/o error reading response: {0}")]
    Io(#[from] std::io::Error),
    /// TLS configuration could not be built from the connection's credential material.
    #[error("tls configuration error: {0}")]
    Tls(String),
    /// A [`crate::facade::FieldPath`] was built from a malformed dotted path.
    #[error("invalid field path {path:?} for kind {kind}")]
    InvalidFieldPath {
        /// The resource kind the path was validated against.
        kind: String,
        /// The dotted path as given by the caller.
        path: String,
    },
}

impl Error {
    /// Classify an HTTP status code and decoded body into the matching [`Error`]
    /// variant, per the error-classification table: `400 → BadRequest`, `401 →
    /// Unauthorized`, `403 → Forbidden`, `404 → NotFound`, `409 → Conflict`, `422 →
    /// Invalid` (folded into `BadRequest`), `5xx → ServerError`.
    pub fn from_status(status: u16, mut envelope: ErrorEnvelope) -> Self {
        envelope.http_status = status;
        match status {
            400 | 422 => Error::BadRequest(envelope),
            401 => Error::Unauthorized(envelope),
            403 => Error::Forbidden(envelope),
            404 => Error::NotFound(envelope),
            409 => Error::Conflict(envelope),
            500..=599 => Error::ServerError { status, envelope },
            _ => Error::ServerError { status, envelope },
        }
    }

    /// The HTTP status this error corresponds to, when it originated from a server
    /// response (as opposed to a transport or local validation failure).
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Unauthorized(_) => Some(401),
            Error::Forbidden(_) => Some(403),
            Error::NotFound(_) => Some(404),
            Error::Conflict(_) => Some(409),
            Error::BadRequest(_) => Some(400),
            Error::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Consume this error into the [`ErrorEnvelope`] it carries, when it originated
    /// from a server response. Used by `return_api_exceptions` to fold a whitelisted
    /// status into an `Ok` value instead of propagating the `Err`.
    pub fn into_envelope(self) -> Option<ErrorEnvelope> {
        match self {
            Error::Unauthorized(e) | Error::Forbidden(e) | Error::NotFound(e) | Error::Conflict(e) | Error::BadRequest(e) => Some(e),
            Error::ServerError { envelope, .. } => Some(envelope),
            _ => None,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
