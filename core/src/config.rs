//! Fetcher configuration.
//!
//! # Design
//! `FetcherConfig` is a plain value. The builder owns one and replaces fields
//! as its methods are called; `build()` freezes it behind an `Arc`, so a built
//! `Fetcher` never observes later builder calls.
//!
//! `FetcherSettings` is the serializable subset (everything except hooks),
//! for loading a fetcher's setup from a JSON document.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::http::{CacheMode, CorsMode, CredentialsMode, HttpRequest, HttpResponse};

/// Runs once per call, before any network I/O. Returns the request to send.
pub type BeforeRequestHook =
    Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, Result<HttpRequest, FetchError>> + Send + Sync>;

/// Runs on the final response after retries. Its return value is the result.
pub type AfterResponseHook =
    Arc<dyn Fn(HttpResponse) -> BoxFuture<'static, Result<HttpResponse, FetchError>> + Send + Sync>;

/// Observes every failure before it is returned.
pub type OnErrorHook = Arc<dyn Fn(FetchError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Credentials attached as the `Authorization` header.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Auth {
    Bearer { token: String },
    Basic { username: String, password: String },
}

impl Auth {
    pub fn header_value(&self) -> String {
        match self {
            Auth::Bearer { token } => format!("Bearer {token}"),
            Auth::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Bearer { .. } => f.write_str("Bearer(..)"),
            Auth::Basic { username, .. } => write!(f, "Basic({username}:..)"),
        }
    }
}

/// Fixed-delay retry.
///
/// `max_attempts` counts retries, so a request is sent at most
/// `max_attempts + 1` times. Responses are retried only when their status is
/// listed in `retry_on_status`; with no list, only transport failures retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub retry_on_status: Option<BTreeSet<u16>>,
}

impl RetryPolicy {
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            retry_on_status: None,
        }
    }

    pub fn retry_on_status(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on_status = Some(statuses.into_iter().collect());
        self
    }

    pub fn retries_status(&self, status: u16) -> bool {
        self.retry_on_status
            .as_ref()
            .is_some_and(|statuses| statuses.contains(&status))
    }
}

/// Everything a `Fetcher` needs to run a call.
#[derive(Clone, Default)]
pub struct FetcherConfig {
    pub headers: Vec<(String, String)>,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub auth: Option<Auth>,
    pub before_request: Option<BeforeRequestHook>,
    pub after_response: Option<AfterResponseHook>,
    pub on_error: Option<OnErrorHook>,
    pub query_params: Vec<(String, String)>,
    pub credentials: CredentialsMode,
    pub mode: CorsMode,
    pub cache: CacheMode,
    pub debug: bool,
    pub dedupe: bool,
}

impl fmt::Debug for FetcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherConfig")
            .field("headers", &self.headers)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("auth", &self.auth)
            .field("before_request", &self.before_request.is_some())
            .field("after_response", &self.after_response.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("query_params", &self.query_params)
            .field("credentials", &self.credentials)
            .field("mode", &self.mode)
            .field("cache", &self.cache)
            .field("debug", &self.debug)
            .field("dedupe", &self.dedupe)
            .finish()
    }
}

impl FetcherConfig {
    /// Set a query parameter, replacing an earlier value for the same key.
    pub(crate) fn set_query_param(&mut self, key: String, value: String) {
        match self.query_params.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.query_params.push((key, value)),
        }
    }
}

fn default_delay_ms() -> u64 {
    RetryPolicy::DEFAULT_DELAY.as_millis() as u64
}

/// Retry section of `FetcherSettings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub retry_on_status: Option<Vec<u16>>,
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        let policy = RetryPolicy::new(settings.max_attempts, Duration::from_millis(settings.delay_ms));
        match settings.retry_on_status {
            Some(statuses) => policy.retry_on_status(statuses),
            None => policy,
        }
    }
}

/// Serializable fetcher setup.
///
/// ```json
/// {
///   "baseURL": "https://api.example.com",
///   "headers": { "Accept-Language": "en" },
///   "timeoutMs": 5000,
///   "retries": { "maxAttempts": 2, "delayMs": 250, "retryOnStatus": [502, 503] },
///   "auth": { "type": "bearer", "token": "secret" },
///   "queryParams": { "v": 2 },
///   "credentials": "include",
///   "dedupe": true
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetcherSettings {
    #[serde(rename = "baseURL", alias = "baseUrl")]
    pub base_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<RetrySettings>,
    pub auth: Option<Auth>,
    /// Scalars only; strings are used verbatim, other values in JSON form.
    pub query_params: BTreeMap<String, serde_json::Value>,
    pub credentials: CredentialsMode,
    pub mode: CorsMode,
    pub cache: CacheMode,
    pub debug: bool,
    pub dedupe: bool,
}

impl FetcherSettings {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

pub(crate) fn query_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
