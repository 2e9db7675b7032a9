//! Error types shared by the resource contract, the JSON-Patch engine and the
//! strategic-merge planner.
use thiserror::Error;

/// Errors raised while resolving or applying an RFC 6901 JSON pointer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PointerError {
    /// The pointer string itself was malformed (empty, or missing the leading `/`).
    #[error("invalid JSON pointer: {0}")]
    Malformed(String),
    /// Traversal reached a node that the requested operation cannot act on
    /// (e.g. indexing into a scalar, or removing the document root).
    #[error("{0}")]
    InvalidTarget(String),
    /// An array segment was not `-` and did not parse as an in-bounds index.
    #[error("invalid array index: {0}")]
    InvalidIndex(String),
}

/// Raised when an RFC 6902 `test` operation does not hold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("patch test operation failed at {pointer}: expected {expected}, found {found}")]
pub struct PatchTestFailed {
    /// The pointer of the failing `test` operation.
    pub pointer: String,
    /// The value the operation expected to find.
    pub expected: serde_json::Value,
    /// The value that was actually present.
    pub found: serde_json::Value,
}

/// Errors from the resource model contract: codec failures and descriptor lookups.
#[derive(Error, Debug)]
pub enum ModelError {
    /// No descriptor is registered for the given `(apiVersion, kind)` pair.
    #[error("no descriptor registered for {api_version}/{kind}")]
    UnknownKind {
        /// The `apiVersion` that was looked up.
        api_version: String,
        /// The `kind` that was looked up.
        kind: String,
    },
    /// The codec failed to decode a JSON tree into the target type.
    #[error("failed to decode {kind}: {source}")]
    Decode {
        /// The `kind` being decoded.
        kind: String,
        /// The underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
    /// The codec failed to encode a value into a JSON tree.
    #[error("failed to encode {kind}: {source}")]
    Encode {
        /// The `kind` being encoded.
        kind: String,
        /// The underlying serialization error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors produced while planning a strategic-merge patch.
#[derive(Error, Debug)]
pub enum StrategicMergeError {
    /// A caller-supplied field path did not resolve to a valid JSON pointer segment.
    #[error("invalid path scope: {0}")]
    InvalidPath(String),
    /// Pointer resolution failed while scoping the patch.
    #[error(transparent)]
    Pointer(#[from] PointerError),
}
