//! In-cluster service-account credential discovery (`spec.md` §6's "In-cluster
//! contract"), grounded on the teacher's `incluster_config.rs`.
use std::path::Path;

use crate::config::{ClientAuth, ConnectionInfo, Material};
use crate::error::LoginError;

const SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";
const SERVICE_PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const TOKEN_FILE: &str = "token";
const CERT_FILE: &str = "ca.crt";
const NAMESPACE_FILE: &str = "namespace";

fn read_file(path: &Path) -> Result<String, LoginError> {
    std::fs::read_to_string(path).map_err(|source| LoginError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Whether the in-cluster environment variables are present at all. Doesn't guarantee
/// the service-account files exist; a caller should still handle [`load`] failing.
pub fn is_in_cluster() -> bool {
    std::env::var_os(SERVICE_HOST_ENV).is_some() && std::env::var_os(SERVICE_PORT_ENV).is_some()
}

fn server_url() -> Result<String, LoginError> {
    let host = std::env::var(SERVICE_HOST_ENV).map_err(|_| LoginError::NoCredentialsFound)?;
    let port = std::env::var(SERVICE_PORT_ENV).map_err(|_| LoginError::NoCredentialsFound)?;
    let host = if host.contains(':') { format!("[{host}]") } else { host };
    Ok(format!("https://{host}:{port}"))
}

/// Load [`ConnectionInfo`] from the well-known in-cluster service-account mount.
pub fn load() -> Result<ConnectionInfo, LoginError> {
    let server = server_url()?;
    let dir = Path::new(SERVICE_ACCOUNT_DIR);
    let token = read_file(&dir.join(TOKEN_FILE))?.trim().to_string();
    let ca_path = dir.join(CERT_FILE);
    // presence is checked by reading it now; ConnectionContext will read it again when
    // materializing TLS config, but failing fast here gives a clearer LoginError.
    read_file(&ca_path)?;

    Ok(ConnectionInfo {
        server,
        certificate_authority: Some(Material::Path(ca_path.display().to_string())),
        insecure_skip_tls_verify: false,
        auth: ClientAuth {
            token: Some(token),
            ..Default::default()
        },
        default_namespace: read_file(&dir.join(NAMESPACE_FILE)).ok().map(|s| s.trim().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // KUBERNETES_SERVICE_HOST/_PORT are process-global; serialize these tests.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn server_url_wraps_ipv6_hosts() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(SERVICE_HOST_ENV, "::1");
        std::env::set_var(SERVICE_PORT_ENV, "6443");
        assert_eq!(server_url().unwrap(), "https://[::1]:6443");
        std::env::remove_var(SERVICE_HOST_ENV);
        std::env::remove_var(SERVICE_PORT_ENV);
    }

    #[test]
    fn server_url_plain_host() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(SERVICE_HOST_ENV, "10.0.0.1");
        std::env::set_var(SERVICE_PORT_ENV, "443");
        assert_eq!(server_url().unwrap(), "https://10.0.0.1:443");
        std::env::remove_var(SERVICE_HOST_ENV);
        std::env::remove_var(SERVICE_PORT_ENV);
    }

    #[test]
    fn not_in_cluster_when_env_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(SERVICE_HOST_ENV);
        std::env::remove_var(SERVICE_PORT_ENV);
        assert!(!is_in_cluster());
    }
}
