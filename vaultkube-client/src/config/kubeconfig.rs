//! Kubeconfig YAML parsing, per the schema documented in `SPEC_FULL.md` §6.
use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine;
use serde::Deserialize;

use crate::config::{ClientAuth, ConnectionInfo, Material};
use crate::error::LoginError;

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "current-context")]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
    /// Top-level keys this parser doesn't model (`preferences`, extensions, ...),
    /// kept around rather than silently dropped.
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: RawCluster,
}

#[derive(Debug, Deserialize, Default)]
struct RawCluster {
    server: String,
    #[serde(rename = "certificate-authority")]
    certificate_authority: Option<String>,
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: Option<String>,
    #[serde(rename = "insecure-skip-tls-verify", default)]
    insecure_skip_tls_verify: bool,
    /// Provider-specific extensions (e.g. `exec`), carried but not interpreted.
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: RawContext,
}

#[derive(Debug, Deserialize)]
struct RawContext {
    cluster: String,
    user: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    user: RawUser,
}

#[derive(Debug, Deserialize, Default)]
struct RawUser {
    token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    #[serde(rename = "client-certificate")]
    client_certificate: Option<String>,
    #[serde(rename = "client-certificate-data")]
    client_certificate_data: Option<String>,
    #[serde(rename = "client-key")]
    client_key: Option<String>,
    #[serde(rename = "client-key-data")]
    client_key_data: Option<String>,
    /// `exec`, `auth-provider`, and any other plugin-auth config this parser
    /// doesn't interpret directly.
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

/// A parsed kubeconfig document, with lookups keyed by name.
pub struct Kubeconfig {
    current_context: Option<String>,
    clusters: BTreeMap<String, RawCluster>,
    contexts: BTreeMap<String, RawContext>,
    users: BTreeMap<String, RawUser>,
}

fn decode_material(data: &Option<String>, path: &Option<String>) -> Result<Option<Material>, LoginError> {
    match (path, data) {
        (Some(_), Some(_)) => Err(LoginError::ConflictingMaterial("certificate/key material")),
        (Some(p), None) => Ok(Some(Material::Path(p.clone()))),
        (None, Some(d)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(d)
                .map_err(|e| LoginError::Io {
                    path: "<inline base64>".into(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                })?;
            Ok(Some(Material::Data(bytes)))
        }
        (None, None) => Ok(None),
    }
}

impl Kubeconfig {
    /// Parse a kubeconfig YAML document from its text content.
    pub fn parse(yaml: &str) -> Result<Self, LoginError> {
        let raw: RawConfig = serde_yaml::from_str(yaml)?;
        Ok(Self {
            current_context: raw.current_context,
            clusters: raw.clusters.into_iter().map(|c| (c.name, c.cluster)).collect(),
            contexts: raw.contexts.into_iter().map(|c| (c.name, c.context)).collect(),
            users: raw.users.into_iter().map(|u| (u.name, u.user)).collect(),
        })
    }

    /// Read and parse a kubeconfig file from disk.
    pub fn load(path: &Path) -> Result<Self, LoginError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoginError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Resolve `context_name` (or `current-context` when `None`) into a
    /// [`ConnectionInfo`].
    pub fn resolve(&self, context_name: Option<&str>) -> Result<ConnectionInfo, LoginError> {
        let context_name = context_name
            .map(str::to_string)
            .or_else(|| self.current_context.clone())
            .ok_or_else(|| LoginError::MissingEntry("current-context", String::new()))?;
        let context = self
            .contexts
            .get(&context_name)
            .ok_or_else(|| LoginError::MissingEntry("context", context_name.clone()))?;
        let cluster = self
            .clusters
            .get(&context.cluster)
            .ok_or_else(|| LoginError::MissingEntry("cluster", context.cluster.clone()))?;
        let user = self
            .users
            .get(&context.user)
            .ok_or_else(|| LoginError::MissingEntry("user", context.user.clone()))?;

        let certificate_authority = decode_material(&cluster.certificate_authority_data, &cluster.certificate_authority)?;
        let client_certificate = decode_material(&user.client_certificate_data, &user.client_certificate)?;
        let client_key = decode_material(&user.client_key_data, &user.client_key)?;

        let info = ConnectionInfo {
            server: cluster.server.clone(),
            certificate_authority,
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            auth: ClientAuth {
                scheme: None,
                token: user.token.clone(),
                username: user.username.clone(),
                password: user.password.clone(),
                client_certificate,
                client_key,
            },
            default_namespace: context.namespace.clone(),
        };
        info.validate()?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: https://dev.example.com:6443
      certificate-authority-data: aGVsbG8=
contexts:
  - name: dev
    context:
      cluster: dev-cluster
      user: dev-user
      namespace: staging
users:
  - name: dev-user
    user:
      token: abc123
"#;

    #[test]
    fn resolves_current_context_by_default() {
        let kc = Kubeconfig::parse(SAMPLE).unwrap();
        let info = kc.resolve(None).unwrap();
        assert_eq!(info.server, "https://dev.example.com:6443");
        assert_eq!(info.default_namespace.as_deref(), Some("staging"));
        assert_eq!(info.auth.token.as_deref(), Some("abc123"));
        assert_eq!(info.certificate_authority, Some(Material::Data(b"hello".to_vec())));
    }

    #[test]
    fn missing_context_is_a_login_error() {
        let kc = Kubeconfig::parse(SAMPLE).unwrap();
        assert!(matches!(kc.resolve(Some("nope")), Err(LoginError::MissingEntry("context", _))));
    }

    #[test]
    fn conflicting_ca_material_rejected() {
        let yaml = r#"
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: https://dev.example.com
      certificate-authority: /tmp/ca.crt
      certificate-authority-data: aGVsbG8=
contexts:
  - name: dev
    context: {cluster: dev-cluster, user: dev-user}
users:
  - name: dev-user
    user: {token: abc}
"#;
        let kc = Kubeconfig::parse(yaml).unwrap();
        assert!(matches!(kc.resolve(None), Err(LoginError::ConflictingMaterial(_))));
    }
}
