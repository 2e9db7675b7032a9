//! Connecting to several clusters at once: each kubeconfig context gets its own `Vault`
//! and `RestClient`, so a stale connection in one cluster's pool never touches another's.
//!
//! Translated from `original_source/examples/07_multi_cluster.py`.
#[path = "support.rs"]
mod support;

use std::collections::BTreeMap;
use std::sync::Arc;

use support::ConfigMap;
use vaultkube::{login, vault::Vault, Facade, ObjectMeta, Outcome, QueryParams, RestClient};

const NAMESPACE: &str = "default";

struct ClusterHandle {
    name: String,
    facade: Facade,
}

async fn connect_to_clusters() -> Result<Vec<ClusterHandle>, Box<dyn std::error::Error>> {
    let mut handles = Vec::new();

    let mut primary_vault = Vault::new();
    login::register_default(&mut primary_vault, "primary", None, None)?;
    let primary_rest = RestClient::new(Arc::new(primary_vault), "primary");
    handles.push(ClusterHandle { name: "primary".to_string(), facade: Facade::new(Arc::new(primary_rest)) });
    println!("connected to primary");

    // Change the context name to match a context in your own kubeconfig.
    let mut secondary_vault = Vault::new();
    match login::login_named(&mut secondary_vault, "secondary", None, "minikube") {
        Ok(_) => {
            let secondary_rest = RestClient::new(Arc::new(secondary_vault), "secondary");
            handles.push(ClusterHandle { name: "secondary".to_string(), facade: Facade::new(Arc::new(secondary_rest)) });
            println!("connected to secondary");
        }
        Err(e) => println!("secondary cluster not available: {e}"),
    }

    Ok(handles)
}

async fn operations_on_specific_cluster(handle: &ClusterHandle) -> Result<(), Box<dyn std::error::Error>> {
    let cm = ConfigMap {
        api_version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        metadata: ObjectMeta {
            name: Some("multi-cluster-test".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: BTreeMap::from([("example".to_string(), "multi-cluster".to_string())]),
            ..Default::default()
        },
        data: BTreeMap::from([("cluster".to_string(), handle.name.clone())]),
    };
    let created = handle.facade.create(Some(NAMESPACE), &cm, &QueryParams::default()).await?.into_result()?;
    println!("created on {}: {:?}", handle.name, created.metadata.name);

    let fetched = handle
        .facade
        .get::<ConfigMap>(Some(NAMESPACE), "multi-cluster-test", &QueryParams::default())
        .await?
        .into_result()?;
    println!("fetched from {}: data={:?}", handle.name, fetched.data);

    handle
        .facade
        .delete::<ConfigMap>(Some(NAMESPACE), "multi-cluster-test", &QueryParams::default())
        .await?
        .into_result()?;
    println!("deleted from {}", handle.name);
    Ok(())
}

/// Query every connected cluster concurrently rather than one after another.
async fn parallel_cluster_query(handles: &[ClusterHandle]) {
    let futures = handles.iter().map(|h| async move {
        let result = h.facade.list::<ConfigMap>(Some(NAMESPACE), &QueryParams::default()).await.and_then(Outcome::into_result);
        (h.name.clone(), result)
    });
    let results = futures::future::join_all(futures).await;

    println!("configmap counts by cluster:");
    for (name, result) in results {
        match result {
            Ok(list) => {
                let count = list.get("items").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
                println!("  {name}: {count}");
            }
            Err(e) => println!("  {name}: query failed ({e})"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let handles = connect_to_clusters().await?;

    if let Some(primary) = handles.first() {
        operations_on_specific_cluster(primary).await?;
    }

    parallel_cluster_query(&handles).await;

    println!("Done");
    Ok(())
}
