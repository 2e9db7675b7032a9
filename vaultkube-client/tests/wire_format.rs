//! Wire-format integration tests: kubeconfig parsing, query-string rendering, and error
//! envelope decoding against realistic payloads, exercised only through the crate's
//! public surface.
use vaultkube_client::config::kubeconfig::Kubeconfig;
use vaultkube_client::config::{ClientAuth, Material};
use vaultkube_client::selectors::{LabelSelector, QueryParams};
use vaultkube_client::ErrorEnvelope;

const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: https://dev.example.com:6443
      certificate-authority-data: ZmFrZS1jYQ==
contexts:
  - name: dev
    context:
      cluster: dev-cluster
      user: dev-user
      namespace: team-a
users:
  - name: dev-user
    user:
      token: s3cr3t-token
"#;

#[test]
fn kubeconfig_resolves_current_context_into_connection_info() {
    let config = Kubeconfig::parse(KUBECONFIG).unwrap();
    let info = config.resolve(None).unwrap();

    assert_eq!(info.server, "https://dev.example.com:6443");
    assert_eq!(info.default_namespace.as_deref(), Some("team-a"));
    assert!(!info.insecure_skip_tls_verify);
    match info.certificate_authority {
        Some(Material::Data(bytes)) => assert_eq!(bytes, b"fake-ca"),
        other => panic!("expected decoded CA data, got {other:?}"),
    }
    assert_eq!(info.auth, ClientAuth { scheme: Some("Bearer".to_string()), token: Some("s3cr3t-token".to_string()), ..Default::default() });
}

#[test]
fn kubeconfig_resolves_an_explicit_context_override() {
    let config = Kubeconfig::parse(KUBECONFIG).unwrap();
    assert!(config.resolve(Some("does-not-exist")).is_err());
    let info = config.resolve(Some("dev")).unwrap();
    assert_eq!(info.server, "https://dev.example.com:6443");
}

#[test]
fn query_params_renders_label_and_pagination_together() {
    let query = QueryParams {
        label_selector: Some(LabelSelector::matching("app", "vaultkube").into()),
        limit: Some(50),
        continue_token: Some("abc123".to_string()),
        ..Default::default()
    };
    let pairs = query.to_http_params();
    assert!(pairs.contains(&("labelSelector", "app=vaultkube".to_string())));
    assert!(pairs.contains(&("limit", "50".to_string())));
    assert!(pairs.contains(&("continue", "abc123".to_string())));
}

#[test]
fn error_envelope_decodes_a_realistic_status_body() {
    let body = serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": "configmaps \"missing\" not found",
        "reason": "NotFound",
        "details": {"name": "missing", "kind": "configmaps"},
        "code": 404
    });
    let envelope: ErrorEnvelope = serde_json::from_value(body).unwrap();
    assert_eq!(envelope.reason.as_deref(), Some("NotFound"));
    assert_eq!(envelope.message.as_deref(), Some("configmaps \"missing\" not found"));
    assert!(envelope.details.is_some());
}
