//! Update strategies: strategic-merge diffing, JSON-Patch with conflict guards, a forced
//! full replacement (PUT), and retrying after a 409 Conflict.
//!
//! Translated from `original_source/examples/06_patching.py`.
#[path = "support.rs"]
mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use support::{ConfigMap, Secret};
use vaultkube::{login, vault::Vault, Error, Facade, FieldPath, ObjectMeta, Outcome, QueryParams, Resource, RestClient};

const NAMESPACE: &str = "default";
const NAME: &str = "patch-example";

async fn setup_configmap(facade: &Facade) -> Result<ConfigMap, Box<dyn std::error::Error>> {
    facade.delete::<ConfigMap>(Some(NAMESPACE), NAME, &QueryParams::default()).await.ok();
    let cm = ConfigMap {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        metadata: ObjectMeta {
            name: Some(NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: BTreeMap::from([("app".to_string(), "patch-demo".to_string()), ("version".to_string(), "v1".to_string())]),
            annotations: BTreeMap::from([("description".to_string(), "Original annotation".to_string())]),
            ..Default::default()
        },
        data: BTreeMap::from([
            ("config.json".to_string(), r#"{"setting1": "value1", "setting2": "value2"}"#.to_string()),
            ("app.properties".to_string(), "key1=value1\nkey2=value2".to_string()),
        ]),
    };
    Ok(facade.create(Some(NAMESPACE), &cm, &QueryParams::default()).await?.into_result()?)
}

/// `ConfigMap` supports strategic-merge, so a diff-based `update()` call picks it
/// automatically: only the changed label, the changed data key, and the new ones travel in
/// the patch body, not the whole object.
async fn strategic_merge_patch(facade: &Facade) -> Result<ConfigMap, Box<dyn std::error::Error>> {
    let original = facade.get::<ConfigMap>(Some(NAMESPACE), NAME, &QueryParams::default()).await?.into_result()?;
    let mut modified = original.clone();
    modified.metadata.labels.insert("environment".to_string(), "staging".to_string());
    modified.metadata.labels.insert("version".to_string(), "v2".to_string());
    modified.data.insert("new-key".to_string(), "new-value".to_string());
    modified.data.insert("config.json".to_string(), r#"{"setting1": "updated"}"#.to_string());

    let updated = facade.update(Some(NAMESPACE), &original, &modified, &QueryParams::default()).await?.into_result()?;
    println!("strategic merge patch: labels={:?}", updated.metadata.labels.keys().collect::<Vec<_>>());
    Ok(updated)
}

/// Change several fields but only patch the ones named in `paths`: other differences
/// between `original` and `modified` are computed too, then dropped before the request
/// goes out, so an unrelated change made in the meantime can't be accidentally published.
async fn selective_field_update(facade: &Facade) -> Result<ConfigMap, Box<dyn std::error::Error>> {
    let original = facade.get::<ConfigMap>(Some(NAMESPACE), NAME, &QueryParams::default()).await?.into_result()?;
    let mut modified = original.clone();
    modified.metadata.labels.insert("selective".to_string(), "update".to_string());
    modified.metadata.annotations.insert("new-annotation".to_string(), "value".to_string());
    modified.data.insert("selective-key".to_string(), "selective-value".to_string());

    let labels_only = [FieldPath::of(ConfigMap::descriptor(), "metadata.labels")?];
    let updated = facade.update_scoped(Some(NAMESPACE), &original, &modified, &labels_only, &QueryParams::default()).await?;
    println!("selective update: only labels changed, data keys={:?}", updated.data.keys().collect::<Vec<_>>());
    Ok(updated)
}

/// Scope an update to one key inside a map field rather than the whole field.
async fn update_nested_fields(facade: &Facade) -> Result<ConfigMap, Box<dyn std::error::Error>> {
    facade.delete::<ConfigMap>(Some(NAMESPACE), "nested-example", &QueryParams::default()).await.ok();
    let cm = ConfigMap {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        metadata: ObjectMeta { name: Some("nested-example".to_string()), namespace: Some(NAMESPACE.to_string()), ..Default::default() },
        data: BTreeMap::from([("database".to_string(), "host=localhost".to_string()), ("cache".to_string(), "redis://localhost".to_string())]),
    };
    let original = facade.create(Some(NAMESPACE), &cm, &QueryParams::default()).await?.into_result()?;

    let mut modified = original.clone();
    modified.data.insert("database".to_string(), "host=production.db".to_string());
    modified.data.insert("new-config".to_string(), "value".to_string()); // not in the scoped path, won't be patched

    let database_key_only = [FieldPath::of(ConfigMap::descriptor(), "data.database")?];
    let updated = facade.update_scoped(Some(NAMESPACE), &original, &modified, &database_key_only, &QueryParams::default()).await?;
    println!("nested field update: data={:?}", updated.data);

    facade.delete::<ConfigMap>(Some(NAMESPACE), "nested-example", &QueryParams::default()).await?;
    Ok(updated)
}

/// `Secret` only advertises JSON-Patch and merge-patch support, so the same diff-based
/// `update()` call falls through to a guarded JSON-Patch (RFC 6902) instead: the facade
/// prepends a `test` op per touched top-level field so a concurrent writer causes this
/// patch to fail with a guard mismatch rather than silently clobbering it.
async fn json_patch_with_conflict_guards(facade: &Facade) -> Result<Secret, Box<dyn std::error::Error>> {
    facade.delete::<Secret>(Some(NAMESPACE), "patch-secret-example", &QueryParams::default()).await.ok();
    let secret = Secret {
        api_version: "v1".to_string(),
        kind: "Secret".to_string(),
        metadata: ObjectMeta {
            name: Some("patch-secret-example".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        string_data: BTreeMap::from([("config.json".to_string(), r#"{"setting1": "value1"}"#.to_string())]),
    };
    let original = facade.create(Some(NAMESPACE), &secret, &QueryParams::default()).await?.into_result()?;

    let mut modified = original.clone();
    modified.string_data.insert("config.json".to_string(), r#"{"concurrent": "update"}"#.to_string());
    let updated = facade.update(Some(NAMESPACE), &original, &modified, &QueryParams::default()).await?.into_result()?;
    println!("JSON patch with guards: updated config.json");
    Ok(updated)
}

/// `query.force` always wins the dispatch, regardless of what the resource supports: the
/// facade sends a full PUT with the caller's `resource_version`, bypassing patch semantics
/// entirely.
async fn force_full_replacement(facade: &Facade) -> Result<ConfigMap, Box<dyn std::error::Error>> {
    let original = facade.get::<ConfigMap>(Some(NAMESPACE), NAME, &QueryParams::default()).await?.into_result()?;
    let replacement = ConfigMap {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        metadata: ObjectMeta {
            name: Some(NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            resource_version: original.metadata.resource_version.clone(),
            labels: BTreeMap::from([("app".to_string(), "replaced".to_string())]),
            ..Default::default()
        },
        data: BTreeMap::from([("completely".to_string(), "new".to_string()), ("config".to_string(), "data".to_string())]),
    };
    let query = QueryParams { force: true, ..Default::default() };
    let updated = facade.update(Some(NAMESPACE), &original, &replacement, &query).await?.into_result()?;
    println!("full replacement (PUT): data={:?}", updated.data.keys().collect::<Vec<_>>());
    Ok(updated)
}

/// A stale `resource_version` makes the server reject the write with 409 Conflict; the
/// standard recovery is to re-fetch, reapply the intended change on top of the live object,
/// and retry the patch against that fresh baseline.
async fn handle_update_conflict(facade: &Facade) -> Result<(), Box<dyn std::error::Error>> {
    let original = facade.get::<ConfigMap>(Some(NAMESPACE), NAME, &QueryParams::default()).await?.into_result()?;
    let mut stale = original.clone();
    stale.metadata.resource_version = Some("1".to_string());
    let query = QueryParams { force: true, ..Default::default() };

    match facade.update(Some(NAMESPACE), &original, &stale, &query).await.and_then(Outcome::into_result) {
        Err(Error::Conflict(_)) => {
            let fresh = facade.get::<ConfigMap>(Some(NAMESPACE), NAME, &QueryParams::default()).await?.into_result()?;
            let mut retried = fresh.clone();
            retried.data.insert("retried".to_string(), "success".to_string());
            facade.update(Some(NAMESPACE), &fresh, &retried, &QueryParams::default()).await?.into_result()?;
            println!("conflict handling: caught 409, retried successfully");
        }
        Err(other) => return Err(other.into()),
        Ok(_) => println!("conflict handling: server did not enforce the stale resourceVersion"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut vault = Vault::new();
    login::register_default(&mut vault, "default", None, None)?;
    let rest = RestClient::new(Arc::new(vault), "default");
    let facade = Facade::new(Arc::new(rest));

    let result: Result<(), Box<dyn std::error::Error>> = async {
        setup_configmap(&facade).await?;
        strategic_merge_patch(&facade).await?;
        selective_field_update(&facade).await?;
        update_nested_fields(&facade).await?;
        json_patch_with_conflict_guards(&facade).await?;
        force_full_replacement(&facade).await?;
        handle_update_conflict(&facade).await?;
        Ok(())
    }
    .await;

    facade.delete::<ConfigMap>(Some(NAMESPACE), NAME, &QueryParams::default()).await.ok();
    facade.delete::<Secret>(Some(NAMESPACE), "patch-secret-example", &QueryParams::default()).await.ok();
    println!("cleanup complete");

    result
}
