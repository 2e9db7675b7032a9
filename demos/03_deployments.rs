//! Deployment lifecycle: create, read status, scale via a guarded JSON-Patch update, roll
//! an image update via a strategic-merge update, list by label, clean up.
//!
//! Translated from `original_source/examples/03_deployments.py`.
#[path = "support.rs"]
mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use support::{Container, Deployment, DeploymentSpec, PodSpec, PodTemplateSpec};
use vaultkube::{login, vault::Vault, Facade, LabelSelector, ObjectMeta, QueryParams, ResourceExt, RestClient};

const NAMESPACE: &str = "default";
const DEPLOYMENT_NAME: &str = "vaultkube-demo-app";
const APP_LABEL: &str = "vaultkube-demo";

fn deployment_spec(image: &str, replicas: i32) -> Deployment {
    let labels = BTreeMap::from([("app".to_string(), APP_LABEL.to_string())]);
    Deployment {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        metadata: ObjectMeta {
            name: Some(DEPLOYMENT_NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: labels.clone(),
            ..Default::default()
        },
        spec: DeploymentSpec {
            replicas,
            template: PodTemplateSpec {
                spec: PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: image.to_string(),
                        extra: BTreeMap::new(),
                    }],
                },
                extra: BTreeMap::new(),
            },
            extra: BTreeMap::new(),
        },
        status: Default::default(),
    }
}

async fn report_status(facade: &Facade) -> Result<Deployment, Box<dyn std::error::Error>> {
    let deployment = facade.get::<Deployment>(Some(NAMESPACE), DEPLOYMENT_NAME, &QueryParams::default()).await?.into_result()?;
    println!(
        "deployment {}: desired={} ready={:?} available={:?}",
        deployment.name(),
        deployment.spec.replicas,
        deployment.status.ready_replicas,
        deployment.status.available_replicas
    );
    Ok(deployment)
}

async fn scale(facade: &Facade, replicas: i32) -> Result<Deployment, Box<dyn std::error::Error>> {
    let original = facade.get::<Deployment>(Some(NAMESPACE), DEPLOYMENT_NAME, &QueryParams::default()).await?.into_result()?;
    let mut modified = original.clone();
    modified.spec.replicas = replicas;
    // supported_patch_kinds prefers strategic-merge when available; this still only
    // touches the fields that actually changed, same as the original's selective
    // field-path patch.
    let updated = facade.update(Some(NAMESPACE), &original, &modified, &QueryParams::default()).await?.into_result()?;
    println!("scaled to {} replicas", updated.spec.replicas);
    Ok(updated)
}

async fn roll_image(facade: &Facade, new_image: &str) -> Result<Deployment, Box<dyn std::error::Error>> {
    let original = facade.get::<Deployment>(Some(NAMESPACE), DEPLOYMENT_NAME, &QueryParams::default()).await?.into_result()?;
    let mut modified = original.clone();
    modified.spec.template.spec.containers[0].image = new_image.to_string();
    let updated = facade.update(Some(NAMESPACE), &original, &modified, &QueryParams::default()).await?.into_result()?;
    println!("rolled to image {}", updated.spec.template.spec.containers[0].image);
    Ok(updated)
}

async fn list_by_label(facade: &Facade) -> Result<(), Box<dyn std::error::Error>> {
    let query = QueryParams {
        label_selector: Some(LabelSelector::matching("app", APP_LABEL).into()),
        ..Default::default()
    };
    let list = facade.list::<Deployment>(Some(NAMESPACE), &query).await?.into_result()?;
    println!("label-selected list: {list:?}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut vault = Vault::new();
    login::register_default(&mut vault, "default", None, None)?;
    let rest = RestClient::new(Arc::new(vault), "default");
    let facade = Facade::new(Arc::new(rest));

    let deployment = deployment_spec("nginx:1.24", 2);
    let created = facade.create(Some(NAMESPACE), &deployment, &QueryParams::default()).await?.into_result()?;
    println!("created deployment {} with {} replicas", created.name(), created.spec.replicas);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let result: Result<(), Box<dyn std::error::Error>> = async {
        report_status(&facade).await?;
        list_by_label(&facade).await?;
        scale(&facade, 3).await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        report_status(&facade).await?;
        roll_image(&facade, "nginx:1.25").await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        report_status(&facade).await?;
        scale(&facade, 1).await?;
        Ok(())
    }
    .await;

    facade
        .delete::<Deployment>(Some(NAMESPACE), DEPLOYMENT_NAME, &QueryParams::default())
        .await
        .ok();
    println!("cleanup complete");

    result
}
