//! Bulk operations: parallel creation, a label-selected batch update, and bulk deletion,
//! none of which abort early on a single failure.
//!
//! Translated from `original_source/examples/09_batch_operations.py`.
#[path = "support.rs"]
mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use support::ConfigMap;
use vaultkube::{login, run_batch, vault::Vault, Facade, LabelSelector, ObjectMeta, Outcome, QueryParams, RestClient};

const NAMESPACE: &str = "default";
const BATCH_COUNT: usize = 10;

fn batch_configmap(index: usize) -> ConfigMap {
    ConfigMap {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        metadata: ObjectMeta {
            name: Some(format!("batch-cm-{index}")),
            namespace: Some(NAMESPACE.to_string()),
            labels: BTreeMap::from([("batch-example".to_string(), "true".to_string())]),
            ..Default::default()
        },
        data: BTreeMap::from([("index".to_string(), index.to_string())]),
    }
}

async fn parallel_create(facade: &Facade, count: usize) -> usize {
    let start = tokio::time::Instant::now();
    let calls = (0..count)
        .map(|i| {
            let facade = facade.clone();
            let cm = batch_configmap(i);
            async move { facade.create(Some(NAMESPACE), &cm, &QueryParams::default()).await.and_then(Outcome::into_result) }
        })
        .collect();
    let outcome = run_batch(calls).await;
    let elapsed = start.elapsed();

    let succeeded = outcome.succeeded();
    println!(
        "created {succeeded}/{count} in {:.2}s ({:.1} ops/sec)",
        elapsed.as_secs_f64(),
        count as f64 / elapsed.as_secs_f64().max(0.001)
    );
    succeeded
}

async fn fetch_batch_configmaps(facade: &Facade) -> Result<Vec<ConfigMap>, Box<dyn std::error::Error>> {
    let query = QueryParams { label_selector: Some(LabelSelector::matching("batch-example", "true").into()), ..Default::default() };
    let list = facade.list::<ConfigMap>(Some(NAMESPACE), &query).await?.into_result()?;
    let items = list.get("items").cloned().unwrap_or_default();
    Ok(serde_json::from_value(items)?)
}

async fn batch_update_by_label(facade: &Facade) -> Result<usize, Box<dyn std::error::Error>> {
    let configmaps = fetch_batch_configmaps(facade).await?;
    println!("found {} ConfigMaps to update", configmaps.len());
    if configmaps.is_empty() {
        return Ok(0);
    }

    let start = tokio::time::Instant::now();
    let calls = configmaps
        .into_iter()
        .map(|original| {
            let facade = facade.clone();
            async move {
                let mut modified = original.clone();
                modified.data.insert("updated".to_string(), "true".to_string());
                facade.update(Some(NAMESPACE), &original, &modified, &QueryParams::default()).await.and_then(Outcome::into_result)
            }
        })
        .collect();
    let outcome = run_batch(calls).await;
    let elapsed = start.elapsed();

    let succeeded = outcome.succeeded();
    println!("updated {succeeded} in {:.2}s", elapsed.as_secs_f64());
    Ok(succeeded)
}

async fn batch_delete(facade: &Facade) -> Result<usize, Box<dyn std::error::Error>> {
    let configmaps = fetch_batch_configmaps(facade).await?;
    println!("found {} ConfigMaps to delete", configmaps.len());
    if configmaps.is_empty() {
        return Ok(0);
    }

    let start = tokio::time::Instant::now();
    let calls = configmaps
        .into_iter()
        .map(|cm| {
            let facade = facade.clone();
            let name = cm.metadata.name.clone().unwrap_or_default();
            async move { facade.delete::<ConfigMap>(Some(NAMESPACE), &name, &QueryParams::default()).await.and_then(Outcome::into_result) }
        })
        .collect();
    let outcome = run_batch(calls).await;
    let elapsed = start.elapsed();

    let deleted = outcome.succeeded();
    println!("deleted {deleted} in {:.2}s", elapsed.as_secs_f64());
    Ok(deleted)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut vault = Vault::new();
    login::register_default(&mut vault, "default", None, None)?;
    let rest = RestClient::new(Arc::new(vault), "default");
    let facade = Facade::new(Arc::new(rest));

    parallel_create(&facade, BATCH_COUNT).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    batch_update_by_label(&facade).await?;
    batch_delete(&facade).await?;

    println!("Done");
    Ok(())
}
