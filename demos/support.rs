//! Minimal typed resource models shared by the demos, standing in for the generated
//! models a real deployment of this crate would have (per `vaultkube_core::Resource`'s
//! doc comment: this crate never generates or ships its own).
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vaultkube::{ListMergeStrategy, ObjectMeta, PatchKind, Resource, ResourceDescriptor};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMap {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

static CONFIGMAP_DESCRIPTOR: std::sync::OnceLock<ResourceDescriptor> = std::sync::OnceLock::new();

pub fn configmap_descriptor() -> &'static ResourceDescriptor {
    CONFIGMAP_DESCRIPTOR.get_or_init(|| ResourceDescriptor {
        group: String::new(),
        version: "v1".to_string(),
        kind: "ConfigMap".to_string(),
        plural: "configmaps".to_string(),
        namespaced: true,
        api_path_template: "/api/v1/namespaces/{namespace}/configmaps".to_string(),
        supported_patch_kinds: vec![PatchKind::Strategic, PatchKind::Merge, PatchKind::Json],
        list_merge_strategies: BTreeMap::new(),
    })
}

impl Resource for ConfigMap {
    type List = Value;
    fn descriptor() -> &'static ResourceDescriptor {
        configmap_descriptor()
    }
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub replicas: i32,
    pub template: PodTemplateSpec,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodTemplateSpec {
    pub spec: PodSpec,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSpec {
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentStatus {
    #[serde(default, rename = "readyReplicas")]
    pub ready_replicas: Option<i32>,
    #[serde(default, rename = "availableReplicas")]
    pub available_replicas: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: DeploymentStatus,
}

static DEPLOYMENT_DESCRIPTOR: std::sync::OnceLock<ResourceDescriptor> = std::sync::OnceLock::new();

pub fn deployment_descriptor() -> &'static ResourceDescriptor {
    DEPLOYMENT_DESCRIPTOR.get_or_init(|| {
        let mut list_merge_strategies = BTreeMap::new();
        list_merge_strategies.insert("/spec/template/spec/containers".to_string(), ListMergeStrategy::MergeByKey("name".to_string()));
        ResourceDescriptor {
            group: "apps".to_string(),
            version: "v1".to_string(),
            kind: "Deployment".to_string(),
            plural: "deployments".to_string(),
            namespaced: true,
            api_path_template: "/apis/apps/v1/namespaces/{namespace}/deployments".to_string(),
            supported_patch_kinds: vec![PatchKind::Strategic, PatchKind::Merge, PatchKind::Json],
            list_merge_strategies,
        }
    })
}

impl Resource for Deployment {
    type List = Value;
    fn descriptor() -> &'static ResourceDescriptor {
        deployment_descriptor()
    }
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// A kind with no strategic-merge support, to exercise the JSON-Patch-with-guards branch
/// of `Facade::update` rather than the strategic-merge branch `ConfigMap` takes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default, rename = "stringData")]
    pub string_data: BTreeMap<String, String>,
}

static SECRET_DESCRIPTOR: std::sync::OnceLock<ResourceDescriptor> = std::sync::OnceLock::new();

pub fn secret_descriptor() -> &'static ResourceDescriptor {
    SECRET_DESCRIPTOR.get_or_init(|| ResourceDescriptor {
        group: String::new(),
        version: "v1".to_string(),
        kind: "Secret".to_string(),
        plural: "secrets".to_string(),
        namespaced: true,
        api_path_template: "/api/v1/namespaces/{namespace}/secrets".to_string(),
        supported_patch_kinds: vec![PatchKind::Json, PatchKind::Merge],
        list_merge_strategies: BTreeMap::new(),
    })
}

impl Resource for Secret {
    type List = Value;
    fn descriptor() -> &'static ResourceDescriptor {
        secret_descriptor()
    }
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
