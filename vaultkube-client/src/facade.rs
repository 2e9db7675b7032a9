//! The CRUD facade (component H): get/list/create/delete/update/watch, with the patch
//! encoding a call uses chosen the same way the original picked between a full PUT, a
//! strategic-merge PATCH, a guarded JSON-Patch PATCH, and a merge-patch PATCH fallback.
use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use http::Method;
use serde_json::Value;
use vaultkube_core::{json_patch, merge_patch, strategic_merge, JsonPatch, PatchKind, PatchOp, Resource, ResourceDescriptor};

use crate::error::{Error, ErrorEnvelope};
use crate::rest_client::RestClient;
use crate::selectors::QueryParams;
use crate::watch::{self, WatchEvent};

/// The result of a facade call that may have observed a caller-whitelisted HTTP status
/// (`query.return_api_exceptions`) instead of succeeding outright.
///
/// Mirrors the original's `return_api_exceptions` pattern: rather than raising on a
/// whitelisted status, the call returns the decoded error envelope as a normal value.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The call succeeded.
    Value(T),
    /// The call failed with a whitelisted status; the envelope describes what the
    /// server said.
    ApiException(ErrorEnvelope),
}

impl<T> Outcome<T> {
    /// Collapse back into the ordinary `Result` shape a caller not using
    /// `return_api_exceptions` expects: `ApiException` becomes the `Err` it would have
    /// been had the status not been whitelisted.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::ApiException(envelope) => Err(Error::from_status(envelope.http_status, envelope)),
        }
    }
}

/// Fold `err` into `Outcome::ApiException` when its status is in `whitelist`,
/// otherwise pass it through unchanged.
fn fold_whitelisted<T>(err: Error, whitelist: &[u16]) -> Result<Outcome<T>, Error> {
    match err.http_status() {
        Some(status) if whitelist.contains(&status) => {
            Ok(Outcome::ApiException(err.into_envelope().expect("http_status implies an envelope")))
        }
        _ => Err(err),
    }
}

fn item_path<T: Resource>(namespace: Option<&str>, name: &str) -> Result<String, Error> {
    Ok(format!("{}/{}", T::descriptor().collection_path(namespace)?, name))
}

fn top_level_pointer(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }
    let rest = &path[1..];
    match rest.find('/') {
        Some(idx) => format!("/{}", &rest[..idx]),
        None => format!("/{rest}"),
    }
}

fn op_path_within(op: &PatchOp, scope: &str) -> bool {
    let touches = |p: &str| p == scope || p.starts_with(&format!("{scope}/"));
    match op {
        PatchOp::Add { path, .. } | PatchOp::Remove { path } | PatchOp::Replace { path, .. } | PatchOp::Test { path, .. } => touches(path),
        PatchOp::Move { from, path } | PatchOp::Copy { from, path } => touches(from) || touches(path),
    }
}

/// Build `test` guards asserting the pre-patch value at every top-level field a JSON
/// patch touches, so a concurrent modification the diff didn't see fails the patch
/// instead of silently clobbering it.
fn guard_ops(old: &Value, ops: &[PatchOp]) -> JsonPatch {
    let mut paths = BTreeSet::new();
    for op in ops {
        match op {
            PatchOp::Add { path, .. } | PatchOp::Remove { path } | PatchOp::Replace { path, .. } | PatchOp::Test { path, .. } => {
                paths.insert(top_level_pointer(path));
            }
            PatchOp::Move { from, path } | PatchOp::Copy { from, path } => {
                paths.insert(top_level_pointer(from));
                paths.insert(top_level_pointer(path));
            }
        }
    }
    paths
        .into_iter()
        .filter_map(|p| old.pointer(&p).map(|v| PatchOp::Test { path: p, value: v.clone() }))
        .collect()
}

/// A validated pointer into a resource's structure, used to scope an [`Facade::update`]
/// call to only the fields named instead of diffing the whole object.
///
/// Built against a kind's [`ResourceDescriptor`] so a typo like `"sepc.replicas"` is
/// rejected at construction instead of silently producing a patch that touches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(String);

impl FieldPath {
    /// Parse a dotted path (`"spec.replicas"`) into a JSON pointer.
    pub fn of(descriptor: &ResourceDescriptor, dotted: &str) -> Result<Self, Error> {
        let malformed = dotted.is_empty() || dotted.starts_with('.') || dotted.ends_with('.') || dotted.contains("..");
        if malformed {
            return Err(Error::InvalidFieldPath { kind: descriptor.kind.clone(), path: dotted.to_string() });
        }
        let pointer = dotted
            .split('.')
            .map(|segment| segment.replace('~', "~0").replace('/', "~1"))
            .collect::<Vec<_>>()
            .join("/");
        Ok(Self(format!("/{pointer}")))
    }

    fn as_pointer(&self) -> &str {
        &self.0
    }
}

/// A typed CRUD surface over one [`RestClient`].
#[derive(Clone)]
pub struct Facade {
    rest: Arc<RestClient>,
}

impl Facade {
    /// Build a facade over an already-configured REST client.
    pub fn new(rest: Arc<RestClient>) -> Self {
        Self { rest }
    }

    /// Fetch a single object by name. A status listed in `query.return_api_exceptions`
    /// (e.g. `404`) comes back as `Outcome::ApiException` instead of an `Err`.
    pub async fn get<T: Resource>(&self, namespace: Option<&str>, name: &str, query: &QueryParams) -> Result<Outcome<T>, Error> {
        let path = item_path::<T>(namespace, name)?;
        match self.rest.send(Method::GET, &path, query, None, None).await {
            Ok(value) => Ok(Outcome::Value(T::decode(value)?)),
            Err(err) => fold_whitelisted(err, &query.return_api_exceptions),
        }
    }

    /// List objects in a collection. See [`Facade::get`] for `return_api_exceptions`.
    pub async fn list<T: Resource>(&self, namespace: Option<&str>, query: &QueryParams) -> Result<Outcome<T::List>, Error> {
        let path = T::descriptor().collection_path(namespace)?;
        match self.rest.send(Method::GET, &path, query, None, None).await {
            Ok(value) => Ok(Outcome::Value(serde_json::from_value(value)?)),
            Err(err) => fold_whitelisted(err, &query.return_api_exceptions),
        }
    }

    /// Create a new object. See [`Facade::get`] for `return_api_exceptions`.
    pub async fn create<T: Resource>(&self, namespace: Option<&str>, obj: &T, query: &QueryParams) -> Result<Outcome<T>, Error> {
        let path = T::descriptor().collection_path(namespace)?;
        let body = serde_json::to_vec(&obj.encode()?)?;
        match self
            .rest
            .send(Method::POST, &path, query, Some("application/json"), Some(Bytes::from(body)))
            .await
        {
            Ok(value) => Ok(Outcome::Value(T::decode(value)?)),
            Err(err) => fold_whitelisted(err, &query.return_api_exceptions),
        }
    }

    /// Delete an object by name. See [`Facade::get`] for `return_api_exceptions`; a
    /// whitelisted `404` is the common case for a delete the caller treats as idempotent.
    pub async fn delete<T: Resource>(&self, namespace: Option<&str>, name: &str, query: &QueryParams) -> Result<Outcome<()>, Error> {
        let path = item_path::<T>(namespace, name)?;
        match self.rest.send(Method::DELETE, &path, query, None, None).await {
            Ok(_) => Ok(Outcome::Value(())),
            Err(err) => fold_whitelisted(err, &query.return_api_exceptions),
        }
    }

    /// Update `old` to `new`'s state. `query.force` forces a full-object `PUT`;
    /// otherwise the smallest patch the kind's descriptor supports is used: a
    /// strategic-merge patch, a JSON-Patch guarded with `test` ops against the values
    /// the diff touched, or an RFC 7386 merge-patch as the last resort. See
    /// [`Facade::get`] for `return_api_exceptions`.
    pub async fn update<T: Resource>(&self, namespace: Option<&str>, old: &T, new: &T, query: &QueryParams) -> Result<Outcome<T>, Error> {
        let name = new.meta().name.clone().ok_or_else(|| Error::Model(vaultkube_core::ModelError::UnknownKind {
            api_version: T::descriptor().api_version(),
            kind: T::descriptor().kind.clone(),
        }))?;
        let path = item_path::<T>(namespace, &name)?;

        let sent = if query.force {
            let body = serde_json::to_vec(&new.encode()?)?;
            self.rest
                .send(Method::PUT, &path, query, Some("application/json"), Some(Bytes::from(body)))
                .await
        } else {
            let old_json = old.encode()?;
            let new_json = new.encode()?;
            let descriptor = T::descriptor();

            let (content_type, body) = if descriptor.supported_patch_kinds.contains(&PatchKind::Strategic) {
                let doc = strategic_merge::plan(descriptor, &old_json, &new_json, &[])?;
                (PatchKind::Strategic.content_type(), serde_json::to_vec(&doc)?)
            } else if descriptor.supported_patch_kinds.contains(&PatchKind::Json) {
                let ops = json_patch::diff(&old_json, &new_json);
                let mut guarded = guard_ops(&old_json, &ops);
                guarded.extend(ops);
                (PatchKind::Json.content_type(), serde_json::to_vec(&guarded)?)
            } else {
                let doc = merge_patch::diff(&old_json, &new_json);
                (PatchKind::Merge.content_type(), serde_json::to_vec(&doc)?)
            };

            self.rest.send(Method::PATCH, &path, query, Some(content_type), Some(Bytes::from(body))).await
        };

        match sent {
            Ok(value) => Ok(Outcome::Value(T::decode(value)?)),
            Err(err) => fold_whitelisted(err, &query.return_api_exceptions),
        }
    }

    /// Like [`Facade::update`], but restricted to `paths`: even if `old` and `new` differ
    /// elsewhere too, only the named fields are sent. Always goes out as a guarded
    /// JSON-Patch, since scoping needs per-operation precision a strategic-merge or
    /// merge-patch body can't express.
    pub async fn update_scoped<T: Resource>(&self, namespace: Option<&str>, old: &T, new: &T, paths: &[FieldPath], query: &QueryParams) -> Result<T, Error> {
        let name = new.meta().name.clone().ok_or_else(|| {
            Error::Model(vaultkube_core::ModelError::UnknownKind {
                api_version: T::descriptor().api_version(),
                kind: T::descriptor().kind.clone(),
            })
        })?;
        let path = item_path::<T>(namespace, &name)?;

        let old_json = old.encode()?;
        let new_json = new.encode()?;
        let all_ops = json_patch::diff(&old_json, &new_json);

        let scoped_ops: JsonPatch = all_ops.into_iter().filter(|op| paths.iter().any(|p| op_path_within(op, p.as_pointer()))).collect();

        let mut guarded = guard_ops(&old_json, &scoped_ops);
        guarded.extend(scoped_ops);
        let body = serde_json::to_vec(&guarded)?;

        let value = self.rest.send(Method::PATCH, &path, query, Some(PatchKind::Json.content_type()), Some(Bytes::from(body))).await?;
        Ok(T::decode(value)?)
    }

    /// Try to create `desired`; if it already exists, re-fetch the live object, apply
    /// `mutate` to it, and retry as an `update` -- retrying the re-fetch/mutate/update
    /// cycle again if that also loses a race. Mirrors the original's create-then-recover
    /// shape rather than requiring callers to hand-roll the retry loop.
    ///
    /// `query.return_api_exceptions` governs only the final outcome: the internal
    /// create/get/update calls this method makes along the way always see the real
    /// `409 Conflict` `Err`, since that's what drives the recovery loop.
    pub async fn create_or_update<T, F>(&self, namespace: Option<&str>, desired: T, mutate: F, query: &QueryParams) -> Result<Outcome<T>, Error>
    where
        T: Resource,
        F: Fn(&mut T),
    {
        let unwhitelisted = QueryParams { return_api_exceptions: Vec::new(), ..query.clone() };

        match self.create(namespace, &desired, &unwhitelisted).await.and_then(Outcome::into_result) {
            Ok(created) => return Ok(Outcome::Value(created)),
            Err(Error::Conflict(_)) => {}
            Err(other) => return fold_whitelisted(other, &query.return_api_exceptions),
        }

        let name = desired.meta().name.clone().ok_or_else(|| {
            Error::Model(vaultkube_core::ModelError::UnknownKind {
                api_version: T::descriptor().api_version(),
                kind: T::descriptor().kind.clone(),
            })
        })?;

        loop {
            let existing = self.get::<T>(namespace, &name, &QueryParams::default()).await.and_then(Outcome::into_result)?;
            let mut updated = existing.clone();
            mutate(&mut updated);
            match self.update(namespace, &existing, &updated, &unwhitelisted).await.and_then(Outcome::into_result) {
                Ok(result) => return Ok(Outcome::Value(result)),
                Err(Error::Conflict(_)) => continue,
                Err(other) => return fold_whitelisted(other, &query.return_api_exceptions),
            }
        }
    }

    /// Watch a collection. See [`crate::watch::watch`] for reconnect/resumption behavior.
    pub fn watch<T>(&self, namespace: Option<&str>, query: QueryParams) -> Result<impl Stream<Item = Result<WatchEvent<T>, Error>>, Error>
    where
        T: Resource + Send + 'static,
    {
        let path = T::descriptor().collection_path(namespace)?;
        Ok(watch::watch(self.rest.clone(), path, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_level_pointer_of_nested_path() {
        assert_eq!(top_level_pointer("/spec/replicas"), "/spec");
        assert_eq!(top_level_pointer("/spec"), "/spec");
        assert_eq!(top_level_pointer("/"), "/");
    }

    #[test]
    fn guard_ops_asserts_old_value_at_touched_top_level_fields() {
        let old = json!({"spec": {"replicas": 1}, "status": {"ready": true}});
        let ops = json_patch::diff(&old, &json!({"spec": {"replicas": 2}, "status": {"ready": true}}));
        let guards = guard_ops(&old, &ops);
        assert_eq!(guards.len(), 1);
        match &guards[0] {
            PatchOp::Test { path, value } => {
                assert_eq!(path, "/spec");
                assert_eq!(value, &json!({"replicas": 1}));
            }
            _ => panic!("expected a Test op"),
        }
    }

    #[test]
    fn guard_ops_skips_paths_absent_from_old() {
        let old = json!({});
        let ops = vec![PatchOp::Add {
            path: "/spec".to_string(),
            value: json!({"replicas": 1}),
        }];
        assert!(guard_ops(&old, &ops).is_empty());
    }

    fn test_descriptor() -> ResourceDescriptor {
        ResourceDescriptor {
            group: String::new(),
            version: "v1".to_string(),
            kind: "Widget".to_string(),
            plural: "widgets".to_string(),
            namespaced: true,
            api_path_template: "/api/v1/namespaces/{namespace}/widgets".to_string(),
            supported_patch_kinds: vec![PatchKind::Json],
            list_merge_strategies: Default::default(),
        }
    }

    #[test]
    fn field_path_parses_dotted_segments_into_a_json_pointer() {
        let descriptor = test_descriptor();
        let path = FieldPath::of(&descriptor, "spec.replicas").unwrap();
        assert_eq!(path.as_pointer(), "/spec/replicas");
    }

    #[test]
    fn field_path_rejects_malformed_dotted_paths() {
        let descriptor = test_descriptor();
        assert!(FieldPath::of(&descriptor, "").is_err());
        assert!(FieldPath::of(&descriptor, ".spec").is_err());
        assert!(FieldPath::of(&descriptor, "spec.").is_err());
        assert!(FieldPath::of(&descriptor, "spec..replicas").is_err());
    }

    #[test]
    fn op_path_within_matches_exact_and_nested_paths_but_not_siblings() {
        let add = PatchOp::Add { path: "/data/database".to_string(), value: json!("x") };
        assert!(op_path_within(&add, "/data/database"));
        assert!(op_path_within(&add, "/data"));
        assert!(!op_path_within(&add, "/data/cache"));
    }

    #[test]
    fn fold_whitelisted_turns_a_listed_status_into_an_api_exception() {
        let err = Error::from_status(404, ErrorEnvelope { reason: Some("NotFound".to_string()), ..Default::default() });
        let outcome = fold_whitelisted::<()>(err, &[404, 409]).unwrap();
        match outcome {
            Outcome::ApiException(envelope) => {
                assert_eq!(envelope.http_status, 404);
                assert_eq!(envelope.reason.as_deref(), Some("NotFound"));
            }
            Outcome::Value(_) => panic!("expected an ApiException"),
        }
    }

    #[test]
    fn fold_whitelisted_passes_through_a_status_not_on_the_list() {
        let err = Error::from_status(404, ErrorEnvelope::default());
        let result = fold_whitelisted::<()>(err, &[409]);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn outcome_into_result_round_trips_an_api_exception_back_to_its_err() {
        let envelope = ErrorEnvelope { reason: Some("Conflict".to_string()), http_status: 409, ..Default::default() };
        let outcome: Outcome<()> = Outcome::ApiException(envelope);
        assert!(matches!(outcome.into_result(), Err(Error::Conflict(_))));
    }
}
