//! Authentication patterns: default discovery, an explicit kubeconfig context, a custom
//! kubeconfig path, and registering several clusters at once.
//!
//! Translated from `original_source/examples/02_authentication.py`.
#[path = "support.rs"]
mod support;

use std::path::PathBuf;
use std::sync::Arc;

use support::ConfigMap;
use vaultkube::{login, vault::Vault, ConnectionContext, Facade, QueryParams, RestClient};

/// Default login: in-cluster, then `$KUBECONFIG`, then `~/.kube/config`.
async fn default_login() -> Result<Facade, Box<dyn std::error::Error>> {
    let mut vault = Vault::new();
    login::register_default(&mut vault, "default", None, None)?;
    let rest = RestClient::new(Arc::new(vault), "default");
    Ok(Facade::new(Arc::new(rest)))
}

/// Login against a specific context rather than `current-context`.
async fn login_with_context(context: &str) -> Result<Facade, Box<dyn std::error::Error>> {
    let mut vault = Vault::new();
    login::register_default(&mut vault, "default", None, Some(context.to_string()))?;
    let rest = RestClient::new(Arc::new(vault), "default");
    Ok(Facade::new(Arc::new(rest)))
}

/// Login against a kubeconfig at a custom path.
async fn login_with_custom_path(path: PathBuf) -> Result<Facade, Box<dyn std::error::Error>> {
    let mut vault = Vault::new();
    login::register_default(&mut vault, "default", Some(path), None)?;
    let rest = RestClient::new(Arc::new(vault), "default");
    Ok(Facade::new(Arc::new(rest)))
}

/// Register several clusters, each under its own provider id and context key, so calls
/// against one don't share a connection pool with calls against another.
async fn login_multiple_clusters() -> Result<Vec<(String, Arc<RestClient>)>, Box<dyn std::error::Error>> {
    let mut clients = Vec::new();

    let mut vault: Vault<ConnectionContext> = Vault::new();
    match login::register_default(&mut vault, "default", None, None) {
        Ok(_) => {
            let rest = Arc::new(RestClient::new(Arc::new(vault), "default"));
            clients.push(("default".to_string(), rest));
        }
        Err(e) => eprintln!("default cluster login skipped: {e}"),
    }

    for context in ["staging", "production"] {
        let mut side_vault = Vault::new();
        if login::login_named(&mut side_vault, context, None, context).is_ok() {
            let rest = Arc::new(RestClient::new(Arc::new(side_vault), context));
            clients.push((context.to_string(), rest));
        }
    }
    Ok(clients)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let facade = default_login().await?;
    let configmaps = facade.list::<ConfigMap>(Some("default"), &QueryParams::default()).await;
    println!("default login connectivity check: {}", configmaps.is_ok());

    match login_with_context("my-production-cluster").await {
        Ok(_) => println!("logged in to my-production-cluster"),
        Err(e) => println!("context login failed: {e}"),
    }

    let custom_path = home::home_dir().map(|h| h.join(".kube").join("puzl-gitlab-config"));
    if let Some(path) = custom_path {
        match login_with_custom_path(path).await {
            Ok(_) => println!("logged in via custom kubeconfig path"),
            Err(e) => println!("custom path login failed: {e}"),
        }
    }

    let clusters = login_multiple_clusters().await?;
    println!("connected to {} additional cluster(s)", clusters.len());

    Ok(())
}
