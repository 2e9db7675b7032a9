//! The connection context (component E): a live, TLS-terminated handle to one API
//! server, owning a small pool of worker threads each with its own single-threaded
//! Tokio runtime and a handful of HTTP sessions, dispatched round-robin.
//!
//! Grounded on the teacher's `client/tls.rs` for the shape of TLS material handling,
//! generalized from its feature-gated native-tls/rustls-tls/openssl-tls split to the
//! single rustls backend this crate standardizes on.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use http::header::AUTHORIZATION;
use http::uri::PathAndQuery;
use http::{HeaderValue, Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::{ClientAuth, ConnectionInfo, Material};
use crate::error::Error;

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::CryptoProvider;
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    /// Accepts any server certificate. Only installed when a connection explicitly
    /// opts into `insecure_skip_tls_verify`.
    #[derive(Debug)]
    pub struct NoVerifier(pub CryptoProvider);

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}

fn read_material(material: &Material) -> Result<Vec<u8>, Error> {
    match material {
        Material::Path(path) => std::fs::read(path).map_err(|e| Error::Tls(format!("reading {path}: {e}"))),
        Material::Data(bytes) => Ok(bytes.clone()),
    }
}

fn load_certs(material: &Material) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, Error> {
    let bytes = read_material(material)?;
    rustls_pemfile::certs(&mut bytes.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("parsing certificate PEM: {e}")))
}

fn load_private_key(material: &Material) -> Result<rustls::pki_types::PrivateKeyDer<'static>, Error> {
    let bytes = read_material(material)?;
    rustls_pemfile::private_key(&mut bytes.as_slice())
        .map_err(|e| Error::Tls(format!("parsing private key PEM: {e}")))?
        .ok_or_else(|| Error::Tls("no private key found in PEM material".to_string()))
}

fn build_tls_config(info: &ConnectionInfo) -> Result<rustls::ClientConfig, Error> {
    let provider = rustls::crypto::ring::default_provider();
    let mut roots = rustls::RootCertStore::empty();
    if let Some(ca) = &info.certificate_authority {
        for cert in load_certs(ca)? {
            roots.add(cert).map_err(|e| Error::Tls(e.to_string()))?;
        }
    } else if !info.insecure_skip_tls_verify {
        return Err(Error::Tls(
            "no certificate authority configured and insecure_skip_tls_verify is false".to_string(),
        ));
    }

    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(provider.clone()))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_root_certificates(roots);

    let mut config = if let (Some(cert), Some(key)) = (&info.auth.client_certificate, &info.auth.client_key) {
        let certs = load_certs(cert)?;
        let key = load_private_key(key)?;
        builder.with_client_auth_cert(certs, key).map_err(|e| Error::Tls(e.to_string()))?
    } else {
        builder.with_no_client_auth()
    };

    if info.insecure_skip_tls_verify {
        config.dangerous().set_certificate_verifier(Arc::new(danger::NoVerifier(provider)));
    }
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

fn auth_header_value(auth: &ClientAuth) -> Option<String> {
    if let Some(token) = &auth.token {
        let scheme = auth.scheme.as_deref().unwrap_or("Bearer");
        return Some(format!("{scheme} {token}"));
    }
    if let Some(scheme) = &auth.scheme {
        return Some(scheme.clone());
    }
    if let (Some(user), Some(pass)) = (&auth.username, &auth.password) {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
        return Some(format!("Basic {encoded}"));
    }
    None
}

type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

struct Worker {
    handle: tokio::runtime::Handle,
    sessions: Vec<HttpsClient>,
    next_session: AtomicUsize,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

fn spawn_worker(worker_id: usize, sessions_per_worker: usize, https: HttpsConnector<HttpConnector>) -> Worker {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let thread_https = https.clone();
    let thread = std::thread::Builder::new()
        .name(format!("vaultkube-conn-{worker_id}"))
        .spawn(move || {
            let https = thread_https;
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build per-worker tokio runtime");
            let handle = rt.handle().clone();
            let sessions: Vec<HttpsClient> = (0..sessions_per_worker)
                .map(|_| Client::builder(TokioExecutor::new()).build(https.clone()))
                .collect();
            let _ = ready_tx.send(handle);
            // The sessions live on this thread's stack for the runtime's lifetime; only
            // the runtime `Handle`s and cloned clients escape to the caller.
            rt.block_on(async move {
                let _ = shutdown_rx.await;
                drop(sessions);
            });
        })
        .expect("spawn connection worker thread");

    let handle = ready_rx.recv().expect("worker runtime failed to start");
    // Sessions are rebuilt here (cheaply -- HttpsConnector clones are Arc-backed) so the
    // caller's `Worker` holds its own handles without racing the thread's local copy.
    let sessions = (0..sessions_per_worker)
        .map(|_| Client::builder(TokioExecutor::new()).build(https.clone()))
        .collect();

    Worker {
        handle,
        sessions,
        next_session: AtomicUsize::new(0),
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    }
}

/// A live connection to one API server: TLS material resolved, authentication header
/// precomputed, and a small worker-thread pool ready to dispatch requests.
pub struct ConnectionContext {
    server: Uri,
    default_namespace: Option<String>,
    auth_header: Option<String>,
    workers: Vec<Worker>,
    next_worker: AtomicUsize,
    closed: AtomicBool,
}

impl ConnectionContext {
    /// Build a connection context from resolved credentials, with `workers` OS threads
    /// each hosting `sessions_per_worker` independent HTTP sessions.
    pub fn build(info: &ConnectionInfo, workers: usize, sessions_per_worker: usize) -> Result<Self, Error> {
        let tls_config = build_tls_config(info)?;
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let server: Uri = info.server.parse().map_err(|e: http::uri::InvalidUri| Error::Tls(e.to_string()))?;
        let worker_count = workers.max(1);
        let sessions_per_worker = sessions_per_worker.max(1);
        let workers = (0..worker_count).map(|i| spawn_worker(i, sessions_per_worker, https.clone())).collect();

        Ok(Self {
            server,
            default_namespace: info.default_namespace.clone(),
            auth_header: auth_header_value(&info.auth),
            workers,
            next_worker: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// The namespace a call should fall back to when it doesn't name one.
    pub fn default_namespace(&self) -> Option<&str> {
        self.default_namespace.as_deref()
    }

    fn absolute_uri(&self, path_and_query: PathAndQuery) -> Result<Uri, Error> {
        let parts = self.server.clone().into_parts();
        Uri::builder()
            .scheme(parts.scheme.ok_or_else(|| Error::Tls("server URL is missing a scheme".to_string()))?)
            .authority(parts.authority.ok_or_else(|| Error::Tls("server URL is missing a host".to_string()))?)
            .path_and_query(path_and_query)
            .build()
            .map_err(Error::Http)
    }

    fn pick_session(&self, worker: &Worker) -> HttpsClient {
        let idx = worker.next_session.fetch_add(1, Ordering::Relaxed) % worker.sessions.len();
        worker.sessions[idx].clone()
    }

    /// Send a request whose URI carries only a path and query (no scheme/authority --
    /// those come from this connection's server); attaches the `Authorization` header
    /// and dispatches it onto one of the worker pool's sessions, round-robin.
    pub async fn call(&self, mut req: Request<Full<Bytes>>) -> Result<Response<Incoming>, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ContextClosed);
        }
        let path_and_query = req
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        *req.uri_mut() = self.absolute_uri(path_and_query)?;
        if let Some(auth) = &self.auth_header {
            req.headers_mut().insert(
                AUTHORIZATION,
                HeaderValue::from_str(auth).map_err(http::Error::from)?,
            );
        }

        let worker_idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let worker = &self.workers[worker_idx];
        let client = self.pick_session(worker);
        worker
            .handle
            .spawn(async move { client.request(req).await })
            .await
            .map_err(|_| Error::ContextClosed)?
            .map_err(Error::Transport)
    }

    /// Shut down every worker thread, making further `call`s fail with
    /// [`Error::ContextClosed`]. Idempotent.
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        for worker in &mut self.workers {
            if let Some(tx) = worker.shutdown.take() {
                let _ = tx.send(());
            }
            if let Some(handle) = worker.thread.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ConnectionContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_header() {
        let auth = ClientAuth {
            token: Some("abc".into()),
            ..Default::default()
        };
        assert_eq!(auth_header_value(&auth).as_deref(), Some("Bearer abc"));
    }

    #[test]
    fn custom_scheme_header() {
        let auth = ClientAuth {
            scheme: Some("Negotiate".into()),
            token: Some("xyz".into()),
            ..Default::default()
        };
        assert_eq!(auth_header_value(&auth).as_deref(), Some("Negotiate xyz"));
    }

    #[test]
    fn scheme_only_header_with_no_token() {
        let auth = ClientAuth {
            scheme: Some("Negotiate".into()),
            ..Default::default()
        };
        assert_eq!(auth_header_value(&auth).as_deref(), Some("Negotiate"));
    }

    #[test]
    fn basic_auth_header() {
        let auth = ClientAuth {
            username: Some("alice".into()),
            password: Some("wonderland".into()),
            ..Default::default()
        };
        let expected = format!("Basic {}", base64::engine::general_purpose::STANDARD.encode("alice:wonderland"));
        assert_eq!(auth_header_value(&auth).as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn no_credentials_no_header() {
        assert_eq!(auth_header_value(&ClientAuth::default()), None);
    }

    #[test]
    fn tls_config_requires_ca_or_insecure() {
        let info = ConnectionInfo {
            server: "https://example.com".into(),
            certificate_authority: None,
            insecure_skip_tls_verify: false,
            auth: ClientAuth::default(),
            default_namespace: None,
        };
        assert!(build_tls_config(&info).is_err());
    }

    #[test]
    fn tls_config_accepts_insecure_flag() {
        let info = ConnectionInfo {
            server: "https://example.com".into(),
            certificate_authority: None,
            insecure_skip_tls_verify: true,
            auth: ClientAuth::default(),
            default_namespace: None,
        };
        assert!(build_tls_config(&info).is_ok());
    }
}
