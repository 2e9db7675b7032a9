//! The login orchestrator (component I): picks a credential source by the standard
//! priority order and registers it onto a [`Vault`], grounded on the teacher's
//! `Config::infer` and the original's `ClusterAuth.from_env`.
//!
//! Priority order, per `SPEC_FULL.md` §6: in-cluster service account, then `KUBECONFIG`,
//! then `~/.kube/config`. Each is re-resolved every time the vault's provider source runs
//! (not just once at startup), so a rotated service-account token or an edited kubeconfig
//! file is picked up on the next login rather than requiring a process restart.
use std::path::PathBuf;

use crate::config::incluster;
use crate::config::kubeconfig::Kubeconfig;
use crate::config::ConnectionInfo;
use crate::connection::ConnectionContext;
use crate::error::LoginError;
use crate::vault::Vault;

fn default_kubeconfig_path() -> Result<PathBuf, LoginError> {
    if let Ok(path) = std::env::var("KUBECONFIG") {
        return Ok(PathBuf::from(path));
    }
    home::home_dir()
        .map(|home| home.join(".kube").join("config"))
        .ok_or(LoginError::NoCredentialsFound)
}

/// Resolve a [`ConnectionInfo`] by trying, in order: the in-cluster service account,
/// then a kubeconfig file at `path` (defaulting to `$KUBECONFIG` or `~/.kube/config`),
/// narrowed to `context` when given.
pub fn discover(path: Option<&PathBuf>, context: Option<&str>) -> Result<ConnectionInfo, LoginError> {
    if incluster::is_in_cluster() {
        if let Ok(info) = incluster::load() {
            return Ok(info);
        }
    }
    let path = match path {
        Some(p) => p.clone(),
        None => default_kubeconfig_path()?,
    };
    Kubeconfig::load(&path)?.resolve(context)
}

/// Register the standard-priority credential source under `provider_id`, returning the
/// default namespace recorded by whichever source resolves (read once, synchronously, so
/// the caller has it immediately rather than waiting for the vault's first login).
pub fn register_default(vault: &mut Vault<ConnectionContext>, provider_id: impl Into<String>, kubeconfig_path: Option<PathBuf>, context: Option<String>) -> Result<Option<String>, LoginError> {
    let probe = discover(kubeconfig_path.as_ref(), context.as_deref())?;
    let default_namespace = probe.default_namespace.clone();
    vault.register(provider_id, move || {
        let kubeconfig_path = kubeconfig_path.clone();
        let context = context.clone();
        async move { discover(kubeconfig_path.as_ref(), context.as_deref()) }
    });
    Ok(default_namespace)
}

/// Register a specific kubeconfig context (not necessarily `current-context`) under its
/// own provider id, so one process can hold several live clusters at once -- each
/// `(provider_id, context_key)` pair the caller later passes to [`crate::rest_client::RestClient`]
/// gets its own pooled connection. In-cluster discovery is intentionally skipped here:
/// a named login always means "this specific kubeconfig context".
pub fn login_named(vault: &mut Vault<ConnectionContext>, provider_id: impl Into<String>, kubeconfig_path: Option<PathBuf>, context_name: impl Into<String>) -> Result<Option<String>, LoginError> {
    let context_name = context_name.into();
    let probe = match &kubeconfig_path {
        Some(p) => Kubeconfig::load(p)?.resolve(Some(&context_name))?,
        None => Kubeconfig::load(&default_kubeconfig_path()?)?.resolve(Some(&context_name))?,
    };
    let default_namespace = probe.default_namespace.clone();
    vault.register(provider_id, move || {
        let kubeconfig_path = kubeconfig_path.clone();
        let context_name = context_name.clone();
        async move {
            let path = match kubeconfig_path {
                Some(p) => p,
                None => default_kubeconfig_path()?,
            };
            Kubeconfig::load(&path)?.resolve(Some(&context_name))
        }
    });
    Ok(default_namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
current-context: dev
clusters:
  - name: c
    cluster: {server: "https://example.com:6443", insecure-skip-tls-verify: true}
contexts:
  - name: dev
    context: {cluster: c, user: u, namespace: staging}
users:
  - name: u
    user: {token: abc}
"#;

    #[test]
    fn discover_falls_through_to_kubeconfig_file_outside_cluster() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let info = discover(Some(&file.path().to_path_buf()), None).unwrap();
        assert_eq!(info.server, "https://example.com:6443");
        assert_eq!(info.default_namespace.as_deref(), Some("staging"));
    }

    #[test]
    fn discover_honors_explicit_context_override() {
        let yaml = r#"
clusters:
  - name: a
    cluster: {server: "https://a.example.com", insecure-skip-tls-verify: true}
  - name: b
    cluster: {server: "https://b.example.com", insecure-skip-tls-verify: true}
contexts:
  - name: ctx-a
    context: {cluster: a, user: u}
  - name: ctx-b
    context: {cluster: b, user: u}
users:
  - name: u
    user: {token: abc}
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        let info = discover(Some(&file.path().to_path_buf()), Some("ctx-b")).unwrap();
        assert_eq!(info.server, "https://b.example.com");
    }

    #[test]
    fn missing_kubeconfig_and_no_in_cluster_env_is_a_login_error() {
        let missing = PathBuf::from("/nonexistent/path/kubeconfig");
        assert!(discover(Some(&missing), None).is_err());
    }

    #[test]
    fn login_named_registers_a_distinct_provider_per_context() {
        let yaml = r#"
clusters:
  - name: a
    cluster: {server: "https://a.example.com", insecure-skip-tls-verify: true}
  - name: b
    cluster: {server: "https://b.example.com", insecure-skip-tls-verify: true}
contexts:
  - name: ctx-a
    context: {cluster: a, user: u}
  - name: ctx-b
    context: {cluster: b, user: u}
users:
  - name: u
    user: {token: abc}
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let mut vault: Vault<ConnectionContext> = Vault::new();
        login_named(&mut vault, "cluster-a", Some(file.path().to_path_buf()), "ctx-a").unwrap();
        login_named(&mut vault, "cluster-b", Some(file.path().to_path_buf()), "ctx-b").unwrap();
    }
}
