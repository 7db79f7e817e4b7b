//! The configured request-executing function.
//!
//! # Design
//! A `Fetcher` is a frozen `FetcherConfig`, a transport, and a
//! pending-request registry. `call` runs the pipeline in a fixed order:
//!
//! 1. resolve the URL (base URL, config query params)
//! 2. merge headers (default < config < auth < call) and serialize the body
//! 3. run `before_request` once
//! 4. dedupe, or go straight to the network
//! 5. retry around a per-attempt timeout
//! 6. run `after_response` on the final response
//!
//! Any failure runs `on_error` before it is returned. Non-2xx responses are
//! not failures at this layer; the client classifies them.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::config::{FetcherConfig, RetryPolicy};
use crate::dedupe::{fingerprint, PendingRequestRegistry};
use crate::error::FetchError;
use crate::http::{
    remove_header, set_header, HttpBody, HttpMethod, HttpRequest, HttpResponse, Multipart,
    RequestBody, APPLICATION_JSON, AUTHORIZATION, CONTENT_TYPE,
};
use crate::signal::AbortSignal;
use crate::transport::Transport;

/// Per-call options. Query parameters are config-only.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub signal: Option<AbortSignal>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get() -> Self {
        Self::new()
    }

    pub fn post(body: serde_json::Value) -> Self {
        Self::new().method(HttpMethod::Post).json(body)
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, key, value);
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn multipart(mut self, form: Multipart) -> Self {
        self.body = Some(RequestBody::Multipart(form));
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Cheap to clone; clones share the configuration and the pending-request
/// registry.
#[derive(Clone)]
pub struct Fetcher {
    config: Arc<FetcherConfig>,
    transport: Arc<dyn Transport>,
    pending: PendingRequestRegistry,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Fetcher {
    pub(crate) fn new(config: Arc<FetcherConfig>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            pending: PendingRequestRegistry::new(),
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingRequestRegistry {
        &self.pending
    }

    /// Run one request through the pipeline.
    pub async fn call(&self, path: &str, options: RequestOptions) -> Result<HttpResponse, FetchError> {
        match self.execute(path, options).await {
            Ok(response) => Ok(response),
            Err(err) => {
                if let Some(hook) = &self.config.on_error {
                    hook(err.clone()).await;
                }
                Err(err)
            }
        }
    }

    async fn execute(&self, path: &str, options: RequestOptions) -> Result<HttpResponse, FetchError> {
        let request = self.prepare(path, options)?;
        let request = match &self.config.before_request {
            Some(hook) => hook(request).await?,
            None => request,
        };

        if self.config.debug {
            debug!(
                method = %request.method,
                url = %request.url,
                headers = ?request.headers,
                body = ?request.body,
                "sending request"
            );
        }

        let response = if self.config.dedupe {
            let key = fingerprint(&request);
            let transport = Arc::clone(&self.transport);
            let retry = self.config.retry.clone();
            let timeout = self.config.timeout;
            let shared = self.pending.join_or_start(key, move || {
                async move {
                    send_with_retry(transport.as_ref(), retry.as_ref(), timeout, request)
                        .await?
                        .buffer()
                        .await
                }
                .boxed()
            });
            shared.await?.into_response()
        } else {
            send_with_retry(
                self.transport.as_ref(),
                self.config.retry.as_ref(),
                self.config.timeout,
                request,
            )
            .await?
        };

        if self.config.debug {
            debug!(status = response.status(), ok = response.ok(), "received response");
        }

        match &self.config.after_response {
            Some(hook) => hook(response).await,
            None => Ok(response),
        }
    }

    fn prepare(&self, path: &str, options: RequestOptions) -> Result<HttpRequest, FetchError> {
        let config = &self.config;
        let url = resolve_url(config.base_url.as_deref(), path, &config.query_params);

        let mut headers = vec![(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string())];
        for (key, value) in &config.headers {
            set_header(&mut headers, key.as_str(), value.as_str());
        }
        if let Some(auth) = &config.auth {
            set_header(&mut headers, AUTHORIZATION, auth.header_value());
        }
        for (key, value) in options.headers {
            set_header(&mut headers, key, value);
        }

        let body = match options.body {
            None => None,
            Some(RequestBody::Json(value)) => Some(HttpBody::Text(
                serde_json::to_string(&value).map_err(|e| FetchError::InvalidRequest(e.to_string()))?,
            )),
            Some(RequestBody::Multipart(form)) => {
                remove_header(&mut headers, CONTENT_TYPE);
                Some(HttpBody::Multipart(form))
            }
        };

        Ok(HttpRequest {
            method: options.method,
            url,
            headers,
            body,
            credentials: config.credentials,
            mode: config.mode,
            cache: config.cache,
            signal: options.signal.unwrap_or_default(),
        })
    }
}

/// Prefix `base` unless `path` is already absolute, then append `query`.
/// Parameters already present in `path` are kept.
pub(crate) fn resolve_url(base: Option<&str>, path: &str, query: &[(String, String)]) -> String {
    let mut url = match base {
        Some(base) if !is_absolute(path) => {
            if path.is_empty() {
                base.to_string()
            } else {
                format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
            }
        }
        _ => path.to_string(),
    };

    if !query.is_empty() {
        let encoded = query
            .iter()
            .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        match url.find('?') {
            None => url.push('?'),
            Some(_) if url.ends_with('?') || url.ends_with('&') => {}
            Some(_) => url.push('&'),
        }
        url.push_str(&encoded);
    }
    url
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Attempt the request, retrying per `policy`. Returns the last response or
/// the last error once attempts run out.
async fn send_with_retry(
    transport: &dyn Transport,
    policy: Option<&RetryPolicy>,
    timeout: Option<Duration>,
    request: HttpRequest,
) -> Result<HttpResponse, FetchError> {
    let Some(policy) = policy else {
        return send_once(transport, timeout, request).await;
    };

    let mut retries = 0;
    loop {
        let outcome = send_once(transport, timeout, request.clone()).await;
        let retryable = match &outcome {
            Ok(response) => policy.retries_status(response.status()),
            // A caller abort is final; a timeout abort is not.
            Err(_) => !request.signal.is_aborted(),
        };
        if !retryable || retries >= policy.max_attempts {
            return outcome;
        }

        retries += 1;
        match &outcome {
            Ok(response) => warn!(
                url = %request.url,
                status = response.status(),
                attempt = retries,
                max_attempts = policy.max_attempts,
                "retrying request after status"
            ),
            Err(err) => warn!(
                url = %request.url,
                error = %err,
                attempt = retries,
                max_attempts = policy.max_attempts,
                "retrying request after failure"
            ),
        }
        drop(outcome);

        tokio::select! {
            () = tokio::time::sleep(policy.delay) => {}
            () = request.signal.aborted() => return Err(FetchError::Aborted),
        }
    }
}

/// One attempt. The transport sees a child of the caller's signal, aborted
/// when either the caller aborts or `timeout` elapses.
async fn send_once(
    transport: &dyn Transport,
    timeout: Option<Duration>,
    mut request: HttpRequest,
) -> Result<HttpResponse, FetchError> {
    if request.signal.is_aborted() {
        return Err(FetchError::Aborted);
    }

    let attempt = request.signal.child();
    request.signal = attempt.clone();
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        outcome = transport.fetch(request) => outcome,
        () = attempt.aborted() => Err(FetchError::Aborted),
        () = deadline => {
            attempt.abort();
            Err(FetchError::Aborted)
        }
    }
}
