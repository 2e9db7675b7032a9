//! The REST client (component F): URL templating, query-parameter application, the
//! authentication retry loop, and transient-failure backoff.
//!
//! The authentication loop is grounded on the original's `auth.py` `authenticated`
//! decorator, generalized from a single-credential retry into driving
//! [`crate::vault::Vault::extended`]. The transient-failure backoff is grounded on the
//! teacher's `client/retry.rs`, reworked from a `tower::retry::Policy` onto `backon`
//! since this crate's connection layer is a direct `hyper_util` client rather than a
//! `tower::Service` stack.
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use futures::StreamExt;
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::ConnectionContext;
use crate::error::{Error, ErrorEnvelope, LoginError};
use crate::selectors::QueryParams;
use crate::vault::{Vault, VaultKey};

/// Exponential backoff applied to transient failures (429/503/504, transport errors) on
/// an already-authenticated request. Mirrors the teacher's `RetryPolicy` defaults.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound the exponential delay is capped at.
    pub max_delay: Duration,
    /// Maximum number of retry attempts after the first try.
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

/// Tuning knobs for a [`RestClient`].
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Transient-failure backoff policy.
    pub retry: RetryConfig,
    /// How many distinct credentials to try (across re-logins) before giving up.
    pub max_auth_attempts: usize,
    /// Worker threads in the connection pool built per credential.
    pub workers: usize,
    /// HTTP sessions per worker thread.
    pub sessions_per_worker: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_auth_attempts: 4,
            workers: 2,
            sessions_per_worker: 2,
        }
    }
}

fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Transport(_) => true,
        Error::ServerError { status, .. } => matches!(status, 429 | 503 | 504),
        _ => false,
    }
}

fn build_request(method: &Method, uri: &str, content_type: Option<&str>, body: &Option<Bytes>) -> Result<Request<Full<Bytes>>, Error> {
    let mut builder = Request::builder().method(method.clone()).uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header(http::header::CONTENT_TYPE, ct);
    }
    builder.body(Full::new(body.clone().unwrap_or_default())).map_err(Error::Http)
}

async fn check_response(resp: Response<Incoming>) -> Result<Response<Incoming>, Error> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?
        .to_bytes();
    let envelope: ErrorEnvelope = serde_json::from_slice(&bytes).unwrap_or_default();
    Err(Error::from_status(status, envelope))
}

/// Appends `query`'s parameters to `path` as a percent-encoded query string.
pub fn full_path(path: &str, query: &QueryParams) -> String {
    let params = query.to_http_params();
    if params.is_empty() {
        return path.to_string();
    }
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in params {
        serializer.append_pair(k, &v);
    }
    format!("{path}?{}", serializer.finish())
}

/// A REST client bound to one credential vault and context key, driving
/// authentication/re-authentication and transient-failure retries around each call.
pub struct RestClient {
    vault: Arc<Vault<ConnectionContext>>,
    context_key: String,
    processing: ProcessingConfig,
}

impl RestClient {
    /// Build a client over `vault`, using `context_key` to namespace the pooled
    /// [`ConnectionContext`]s it builds per credential.
    pub fn new(vault: Arc<Vault<ConnectionContext>>, context_key: impl Into<String>) -> Self {
        Self {
            vault,
            context_key: context_key.into(),
            processing: ProcessingConfig::default(),
        }
    }

    /// Override the retry/pool-sizing configuration.
    pub fn with_processing_config(mut self, processing: ProcessingConfig) -> Self {
        self.processing = processing;
        self
    }

    async fn call_with_backoff(
        &self,
        ctx: &ConnectionContext,
        method: &Method,
        uri: &str,
        content_type: Option<&str>,
        body: &Option<Bytes>,
    ) -> Result<Response<Incoming>, Error> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.processing.retry.min_delay)
            .with_max_delay(self.processing.retry.max_delay)
            .with_max_times(self.processing.retry.max_retries);

        (|| async {
            let req = build_request(method, uri, content_type, body)?;
            let resp = ctx.call(req).await?;
            check_response(resp).await
        })
        .retry(backoff)
        .when(is_retryable)
        .notify(|err: &Error, dur| warn!(error = %err, delay = ?dur, "retrying after transient failure"))
        .await
    }

    /// Run the authentication loop around one HTTP call: tries credentials from the
    /// vault in order, invalidating on 401, remembering (not invalidating) on 403, and
    /// retrying transient failures on whichever credential succeeded in logging in.
    /// Returns the credential's key alongside the raw response so streaming callers
    /// (watch) can consume the body themselves.
    async fn dispatch(
        &self,
        method: Method,
        uri: String,
        content_type: Option<&'static str>,
        body: Option<Bytes>,
        retry_transient: bool,
    ) -> Result<(VaultKey, Response<Incoming>), Error> {
        let workers = self.processing.workers;
        let sessions = self.processing.sessions_per_worker;
        let stream = self.vault.extended(&self.context_key, move |info| async move {
            ConnectionContext::build(&info, workers, sessions).map_err(|e| LoginError::ProviderFailed("connection".to_string(), e.to_string()))
        });
        tokio::pin!(stream);

        let mut last_err: Option<Error> = None;
        for _ in 0..self.processing.max_auth_attempts {
            let Some(next) = stream.next().await else { break };
            let credential = match next {
                Ok(c) => c,
                Err(e) => {
                    last_err = Some(Error::Login(e));
                    continue;
                }
            };

            let attempt = if retry_transient {
                self.call_with_backoff(&credential.ctx, &method, &uri, content_type, &body).await
            } else {
                let req = build_request(&method, &uri, content_type, &body)?;
                match credential.ctx.call(req).await {
                    Ok(resp) => check_response(resp).await,
                    Err(e) => Err(e),
                }
            };

            match attempt {
                Ok(resp) => {
                    self.vault.take_remembered_forbidden(&credential.key);
                    debug!(uri = %uri, "request succeeded");
                    return Ok((credential.key, resp));
                }
                Err(Error::Unauthorized(envelope)) => {
                    self.vault.invalidate(&credential.key);
                    last_err = Some(Error::Unauthorized(envelope));
                }
                Err(Error::Forbidden(envelope)) => {
                    self.vault.remember_forbidden(&credential.key, envelope.clone());
                    last_err = Some(Error::Forbidden(envelope));
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or(Error::ContextClosed))
    }

    /// Send a request and decode its body as JSON.
    pub async fn send(&self, method: Method, path: &str, query: &QueryParams, content_type: Option<&'static str>, body: Option<Bytes>) -> Result<Value, Error> {
        let uri = full_path(path, query);
        let (_, resp) = self.dispatch(method, uri, content_type, body, true).await?;
        let bytes = resp.into_body().collect().await.map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?.to_bytes();
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Open a streaming (watch) response: authenticates like [`RestClient::send`] but
    /// hands back the live response body instead of buffering and decoding it, along
    /// with the vault key in use so the caller can invalidate it on a later
    /// mid-stream authentication failure.
    pub async fn open_watch(&self, path: &str, query: &QueryParams) -> Result<(VaultKey, Response<Incoming>), Error> {
        let uri = full_path(path, query);
        self.dispatch(Method::GET, uri, None, None, false).await
    }

    /// Invalidate a credential this client is using, e.g. after a watch stream
    /// mid-flight authentication failure that [`RestClient::dispatch`] never saw.
    pub fn invalidate(&self, key: &VaultKey) {
        self.vault.invalidate(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors::LabelSelector;

    #[test]
    fn full_path_without_query_is_unchanged() {
        assert_eq!(full_path("/api/v1/pods", &QueryParams::default()), "/api/v1/pods");
    }

    #[test]
    fn full_path_appends_encoded_query() {
        let query = QueryParams {
            label_selector: Some(LabelSelector::matching("app", "nginx").into()),
            limit: Some(10),
            ..Default::default()
        };
        let path = full_path("/api/v1/namespaces/default/pods", &query);
        assert!(path.starts_with("/api/v1/namespaces/default/pods?"));
        assert!(path.contains("labelSelector=app%3Dnginx"));
        assert!(path.contains("limit=10"));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(&Error::ServerError {
            status: 503,
            envelope: ErrorEnvelope::default()
        }));
        assert!(is_retryable(&Error::ServerError {
            status: 429,
            envelope: ErrorEnvelope::default()
        }));
        assert!(!is_retryable(&Error::NotFound(ErrorEnvelope::default())));
        assert!(!is_retryable(&Error::ServerError {
            status: 500,
            envelope: ErrorEnvelope::default()
        }));
    }
}
