//! Basic CRUD walkthrough: create, get, list, update, create_or_update, delete.
//!
//! Translated from `original_source/examples/01_quickstart.py`.
#[path = "support.rs"]
mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use support::ConfigMap;
use vaultkube::{login, vault::Vault, Facade, ObjectMeta, QueryParams, RestClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut vault = Vault::new();
    login::register_default(&mut vault, "default", None, None)?;
    let rest = RestClient::new(Arc::new(vault), "default");
    let facade = Facade::new(Arc::new(rest));

    let namespace = "default";
    let name = "vaultkube-example";

    let configmap = ConfigMap {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: BTreeMap::from([("app".to_string(), "vaultkube-example".to_string())]),
            ..Default::default()
        },
        data: BTreeMap::from([("database.host".to_string(), "localhost".to_string())]),
    };
    let created = facade.create(Some(namespace), &configmap, &QueryParams::default()).await?.into_result()?;
    println!("created: {}", created.metadata.name.unwrap_or_default());

    let mut fetched = facade.get::<ConfigMap>(Some(namespace), name, &QueryParams::default()).await?.into_result()?;
    println!("fetched data: {:?}", fetched.data);

    let list = facade.list::<ConfigMap>(Some(namespace), &QueryParams::default()).await?.into_result()?;
    println!("list: {list:?}");

    let original = fetched.clone();
    fetched.data.insert("database.host".to_string(), "production.example.com".to_string());
    let updated = facade.update(Some(namespace), &original, &fetched, &QueryParams::default()).await?.into_result()?;
    println!("updated: {}", updated.metadata.name.unwrap_or_default());

    let upsert_name = "vaultkube-upsert-example";
    let upsert_cm = ConfigMap {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        metadata: ObjectMeta {
            name: Some(upsert_name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: BTreeMap::from([("key".to_string(), "value".to_string())]),
    };
    facade
        .create_or_update(Some(namespace), upsert_cm, |cm| {
            cm.data.insert("key".to_string(), "updated-value".to_string());
        }, &QueryParams::default())
        .await?
        .into_result()?;
    println!("upsert complete");

    facade.delete::<ConfigMap>(Some(namespace), name, &QueryParams::default()).await?.into_result()?;
    facade.delete::<ConfigMap>(Some(namespace), upsert_name, &QueryParams::default()).await?.into_result()?;
    println!("cleanup complete");

    Ok(())
}
