//! The resource model contract (component A).
//!
//! vaultkube never generates or ships typed resource models itself -- that's left to an
//! external code generator. What it needs from a typed resource is small: identity
//! (group/version/kind/plural/namespacedness), a REST path template, the patch kinds the
//! kind accepts, and a lossless JSON codec. [`Resource`] captures exactly that.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;

/// One of the four patch strategies the Kubernetes API understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PatchKind {
    /// RFC 6902 JSON Patch, `application/json-patch+json`.
    Json,
    /// RFC 7386 JSON Merge Patch, `application/merge-patch+json`.
    Merge,
    /// Kubernetes strategic-merge-patch, `application/strategic-merge-patch+json`.
    Strategic,
    /// Server-side apply, `application/apply-patch+yaml`.
    Apply,
}

impl PatchKind {
    /// The `Content-Type` header value used when sending a patch of this kind.
    pub fn content_type(self) -> &'static str {
        match self {
            PatchKind::Json => "application/json-patch+json",
            PatchKind::Merge => "application/merge-patch+json",
            PatchKind::Strategic => "application/strategic-merge-patch+json",
            PatchKind::Apply => "application/apply-patch+yaml",
        }
    }
}

/// How a list-typed field should be merged by the strategic-merge planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListMergeStrategy {
    /// Items are matched across old/new by the given merge-key field name
    /// (`x-kubernetes-patch-merge-key`) and merged individually.
    MergeByKey(String),
    /// The field is replaced wholesale whenever any element differs.
    Replace,
}

/// Static metadata describing one Kubernetes kind.
///
/// This is the runtime stand-in for what an OpenAPI-driven generator would normally bake
/// into the typed model at compile time. A generated crate constructs one of these per
/// kind and hands it to [`Resource::descriptor`].
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    /// API group, empty string for the legacy core group.
    pub group: String,
    /// API version, e.g. `"v1"`.
    pub version: String,
    /// Kind name, e.g. `"ConfigMap"`.
    pub kind: String,
    /// Plural resource name used in REST paths, e.g. `"configmaps"`.
    pub plural: String,
    /// Whether instances of this kind live inside a namespace.
    pub namespaced: bool,
    /// Path template containing a `{namespace}` placeholder when [`namespaced`](Self::namespaced)
    /// is set, e.g. `"/api/v1/namespaces/{namespace}/configmaps"` or
    /// `"/apis/apps/v1/deployments"`.
    pub api_path_template: String,
    /// Patch kinds the API server accepts for this resource.
    pub supported_patch_kinds: Vec<PatchKind>,
    /// Per-field merge strategy, keyed by the JSON pointer of the array field
    /// (e.g. `"/spec/containers"`). Fields absent from this map default to
    /// [`ListMergeStrategy::Replace`] when they disagree structurally.
    pub list_merge_strategies: BTreeMap<String, ListMergeStrategy>,
}

impl ResourceDescriptor {
    /// `group/version`, or just `version` for the legacy core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Substitute `{namespace}` in [`api_path_template`](Self::api_path_template).
    ///
    /// Returns an error if the descriptor is namespaced but no namespace was supplied.
    pub fn collection_path(&self, namespace: Option<&str>) -> Result<String, ModelError> {
        if self.namespaced {
            let ns = namespace.ok_or_else(|| ModelError::UnknownKind {
                api_version: self.api_version(),
                kind: self.kind.clone(),
            })?;
            Ok(self.api_path_template.replace("{namespace}", ns))
        } else {
            Ok(self.api_path_template.clone())
        }
    }

    /// Looks up the merge strategy for an exact array-field pointer.
    pub fn merge_strategy_for(&self, pointer: &str) -> ListMergeStrategy {
        self.list_merge_strategies
            .get(pointer)
            .cloned()
            .unwrap_or(ListMergeStrategy::Replace)
    }
}

/// Object-level metadata common to every persisted Kubernetes resource.
///
/// Unknown fields round-trip through `extra` so that diffing against a server response
/// from a newer API version stays meaningful.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name, required once the object exists on the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Namespace, present only for namespaced resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Opaque optimistic-concurrency cursor assigned by the API server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Server-assigned unique identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Finalizers blocking deletion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    /// Any metadata fields this crate does not model explicitly.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Metadata carried by list responses (`.metadata`, not `.items[].metadata`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    /// Opaque cursor shared by every item in the list at the time it was served.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Pagination cursor for the next page, when the list was truncated.
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
    /// Remaining item count estimate, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_item_count: Option<i64>,
}

/// A typed Kubernetes resource.
///
/// Implementations are expected to come from a generated crate; vaultkube only consumes
/// the trait. `T` must serialize/deserialize losslessly -- unknown fields should flow
/// through a `#[serde(flatten)] extra: Map<String, Value>` field so that
/// `decode(encode(x)) == x` and `encode(decode(j)) == j` modulo field order.
pub trait Resource: Serialize + for<'de> Deserialize<'de> + Clone + fmt::Debug {
    /// The list type this kind is returned as from collection `GET`s.
    type List: Serialize + for<'de> Deserialize<'de> + Clone + fmt::Debug;

    /// Static identity and wire-format metadata for this kind.
    fn descriptor() -> &'static ResourceDescriptor;
    /// Shared metadata accessor.
    fn meta(&self) -> &ObjectMeta;
    /// Mutable metadata accessor.
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Encode to a generic JSON tree for diffing, patch construction, or transport.
    fn encode(&self) -> Result<Value, ModelError> {
        serde_json::to_value(self).map_err(|source| ModelError::Encode {
            kind: Self::descriptor().kind.clone(),
            source,
        })
    }

    /// Decode from a generic JSON tree, e.g. a server response body.
    fn decode(tree: Value) -> Result<Self, ModelError> {
        serde_json::from_value(tree).map_err(|source| ModelError::Decode {
            kind: Self::descriptor().kind.clone(),
            source,
        })
    }
}

/// Convenience accessors layered on top of [`Resource::meta`].
pub trait ResourceExt: Resource {
    /// The resource name, panicking if unset.
    ///
    /// Safe to call on anything that came back from the API server, where name is
    /// always populated; not safe on locally-built objects using `generateName`.
    fn name(&self) -> String {
        self.meta().name.clone().expect("metadata.name is unset")
    }
    /// The namespace, if any.
    fn namespace(&self) -> Option<String> {
        self.meta().namespace.clone()
    }
    /// The resource version, if the object has been persisted.
    fn resource_version(&self) -> Option<String> {
        self.meta().resource_version.clone()
    }
}

impl<T: Resource> ResourceExt for T {}

/// A JSON-backed record for any `(apiVersion, kind)` the caller doesn't have a
/// statically typed model for.
///
/// All fields round-trip through `data`, so diffing a [`DynamicObject`] against a
/// server response remains exact even for kinds vaultkube has never seen before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    /// `apiVersion` of the underlying resource.
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// `kind` of the underlying resource.
    pub kind: String,
    /// Object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Every other top-level field (`spec`, `status`, `data`, ...), verbatim.
    #[serde(flatten)]
    pub data: BTreeMap<String, Value>,
}

impl DynamicObject {
    /// Build a `DynamicObject` from a raw JSON tree, used by the unknown-kind fallback
    /// path of the codec registry.
    pub fn from_json(tree: Value) -> Result<Self, ModelError> {
        let kind = tree
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        serde_json::from_value(tree).map_err(|source| ModelError::Decode { kind, source })
    }

    /// Serialize back to a JSON tree.
    pub fn to_json(&self) -> Result<Value, ModelError> {
        serde_json::to_value(self).map_err(|source| ModelError::Encode {
            kind: self.kind.clone(),
            source,
        })
    }
}

/// A decode function erased over its concrete `Resource` type, used by
/// [`CodecRegistry`] to dispatch on `(apiVersion, kind)` read from the wire.
type DecodeFn = Box<dyn Fn(Value) -> Result<DynamicObject, ModelError> + Send + Sync>;

/// Maps `(apiVersion, kind)` to a decoder, falling back to [`DynamicObject`] for
/// anything unregistered.
///
/// This is what lets a watch stream or a `kubectl get --all`-style listing decode
/// resources it has never been told about at compile time, while still preserving every
/// field for round-tripping.
#[derive(Default)]
pub struct CodecRegistry {
    decoders: BTreeMap<(String, String), DecodeFn>,
}

impl CodecRegistry {
    /// Create an empty registry; every kind decodes via the generic fallback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed kind. Decoding still produces a [`DynamicObject`] here (the
    /// registry's job is dynamic dispatch, not static typing) but goes through the
    /// type's own `Deserialize` impl first to validate the shape.
    pub fn register<T: Resource>(&mut self) {
        let descriptor = T::descriptor();
        let key = (descriptor.api_version(), descriptor.kind.clone());
        self.decoders.insert(
            key,
            Box::new(|tree| {
                let typed: T = serde_json::from_value(tree.clone()).map_err(|source| ModelError::Decode {
                    kind: T::descriptor().kind.clone(),
                    source,
                })?;
                let reencoded = typed.encode()?;
                DynamicObject::from_json(reencoded)
            }),
        );
    }

    /// Decode a JSON tree, using the registered decoder when one exists for
    /// `(apiVersion, kind)`, falling back to the generic [`DynamicObject`] carrier
    /// otherwise.
    pub fn decode(&self, api_version: &str, kind: &str, tree: Value) -> Result<DynamicObject, ModelError> {
        let key = (api_version.to_string(), kind.to_string());
        match self.decoders.get(&key) {
            Some(decode) => decode(tree),
            None => DynamicObject::from_json(tree),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ConfigMap {
        #[serde(rename = "apiVersion")]
        api_version: String,
        kind: String,
        metadata: ObjectMeta,
        #[serde(default)]
        data: BTreeMap<String, String>,
    }

    static CONFIGMAP_DESCRIPTOR: ResourceDescriptor = ResourceDescriptor {
        group: String::new(),
        version: String::new(),
        kind: String::new(),
        plural: String::new(),
        namespaced: true,
        api_path_template: String::new(),
        supported_patch_kinds: Vec::new(),
        list_merge_strategies: BTreeMap::new(),
    };

    impl Resource for ConfigMap {
        type List = Value;

        fn descriptor() -> &'static ResourceDescriptor {
            // a real generator would build a `const`/`static` per kind; this test only
            // exercises the codec, not path templating.
            &CONFIGMAP_DESCRIPTOR
        }

        fn meta(&self) -> &ObjectMeta {
            &self.metadata
        }

        fn meta_mut(&mut self) -> &mut ObjectMeta {
            &mut self.metadata
        }
    }

    #[test]
    fn descriptor_substitutes_namespace() {
        let d = ResourceDescriptor {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
            plural: "deployments".into(),
            namespaced: true,
            api_path_template: "/apis/apps/v1/namespaces/{namespace}/deployments".into(),
            supported_patch_kinds: vec![PatchKind::Strategic],
            list_merge_strategies: BTreeMap::new(),
        };
        assert_eq!(d.api_version(), "apps/v1");
        assert_eq!(
            d.collection_path(Some("prod")).unwrap(),
            "/apis/apps/v1/namespaces/prod/deployments"
        );
        assert!(d.collection_path(None).is_err());
    }

    #[test]
    fn codec_round_trips_through_encode_decode() {
        let cm = ConfigMap {
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
            metadata: ObjectMeta {
                name: Some("demo".into()),
                resource_version: Some("42".into()),
                ..Default::default()
            },
            data: BTreeMap::from([("k".into(), "v".into())]),
        };
        let tree = cm.encode().unwrap();
        let back = ConfigMap::decode(tree).unwrap();
        assert_eq!(back.metadata.name, cm.metadata.name);
        assert_eq!(back.data, cm.data);
    }

    #[test]
    fn dynamic_object_preserves_unknown_fields() {
        let raw = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w1"},
            "spec": {"color": "red"},
            "status": {"ready": true},
        });
        let obj = DynamicObject::from_json(raw.clone()).unwrap();
        let back = obj.to_json().unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn registry_falls_back_to_dynamic_object_for_unknown_kinds() {
        let registry = CodecRegistry::new();
        let raw = json!({"apiVersion": "example.com/v1", "kind": "Widget", "metadata": {}});
        let obj = registry.decode("example.com/v1", "Widget", raw).unwrap();
        assert_eq!(obj.kind, "Widget");
    }
}
