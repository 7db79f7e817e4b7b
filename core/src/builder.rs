//! Chainable construction of a `Fetcher`.
//!
//! Every method takes the builder by value and returns a new one, so a shared
//! base builder can be cloned and specialized without the branches affecting
//! each other:
//!
//! ```no_run
//! use std::time::Duration;
//! use fetch_core::FetcherBuilder;
//!
//! let base = FetcherBuilder::new()
//!     .base_url("https://api.example.com")
//!     .timeout(Duration::from_secs(5));
//! let admin = base.clone().bearer("admin-token");
//! let public = base.header("X-Client", "web");
//! # let _ = (admin, public);
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::config::{
    query_value_to_string, AfterResponseHook, Auth, BeforeRequestHook, FetcherConfig,
    FetcherSettings, OnErrorHook, RetryPolicy,
};
use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::http::{set_header, CacheMode, CorsMode, CredentialsMode, HttpRequest, HttpResponse};
use crate::transport::Transport;

#[derive(Clone, Debug, Default)]
pub struct FetcherBuilder {
    config: FetcherConfig,
}

impl FetcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a builder from a settings document. Hooks still come from the
    /// builder methods.
    pub fn from_settings(settings: FetcherSettings) -> Self {
        let mut builder = Self::new();
        if let Some(url) = settings.base_url {
            builder = builder.base_url(url);
        }
        for (key, value) in settings.headers {
            builder = builder.header(key, value);
        }
        if let Some(ms) = settings.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = settings.retries {
            builder = builder.retry_policy(retries.into());
        }
        if let Some(auth) = settings.auth {
            builder = builder.auth(auth);
        }
        builder = builder.query_params(
            settings
                .query_params
                .iter()
                .map(|(key, value)| (key.clone(), query_value_to_string(value))),
        );
        builder = builder
            .credentials(settings.credentials)
            .mode(settings.mode)
            .cache(settings.cache);
        if settings.debug {
            builder = builder.debug();
        }
        if settings.dedupe {
            builder = builder.dedupe();
        }
        builder
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    fn with(mut self, update: impl FnOnce(&mut FetcherConfig)) -> Self {
        update(&mut self.config);
        self
    }

    pub fn base_url(self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.with(|c| c.base_url = Some(url))
    }

    /// Add a default header. A later call with the same name (any casing) wins.
    pub fn header(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.with(|c| set_header(&mut c.headers, key, value))
    }

    /// Per-attempt timeout. Unset means no limit.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.with(|c| c.timeout = Some(timeout))
    }

    /// Retry up to `max_attempts` times with a fixed `delay`. Responses are
    /// retried only when their status is in `retry_on_status`.
    pub fn retries<I>(self, max_attempts: u32, delay: Duration, retry_on_status: Option<I>) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        let policy = RetryPolicy::new(max_attempts, delay);
        let policy = match retry_on_status {
            Some(statuses) => policy.retry_on_status(statuses),
            None => policy,
        };
        self.retry_policy(policy)
    }

    pub fn retry_policy(self, policy: RetryPolicy) -> Self {
        self.with(|c| c.retry = Some(policy))
    }

    pub fn auth(self, auth: Auth) -> Self {
        self.with(|c| c.auth = Some(auth))
    }

    pub fn bearer(self, token: impl Into<String>) -> Self {
        self.auth(Auth::Bearer {
            token: token.into(),
        })
    }

    pub fn basic(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth(Auth::Basic {
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn before_request<F, Fut>(self, hook: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpRequest, FetchError>> + Send + 'static,
    {
        let hook: BeforeRequestHook = Arc::new(move |request| hook(request).boxed());
        self.with(|c| c.before_request = Some(hook))
    }

    pub fn after_response<F, Fut>(self, hook: F) -> Self
    where
        F: Fn(HttpResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, FetchError>> + Send + 'static,
    {
        let hook: AfterResponseHook = Arc::new(move |response| hook(response).boxed());
        self.with(|c| c.after_response = Some(hook))
    }

    pub fn on_error<F, Fut>(self, hook: F) -> Self
    where
        F: Fn(FetchError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: OnErrorHook = Arc::new(move |err| hook(err).boxed());
        self.with(|c| c.on_error = Some(hook))
    }

    /// Merge query parameters appended to every URL; last assignment per key wins.
    pub fn query_params<I, K, V>(self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let params: Vec<(String, String)> = params
            .into_iter()
            .map(|(key, value)| (key.into(), value.to_string()))
            .collect();
        self.with(|c| {
            for (key, value) in params {
                c.set_query_param(key, value);
            }
        })
    }

    pub fn credentials(self, credentials: CredentialsMode) -> Self {
        self.with(|c| c.credentials = credentials)
    }

    pub fn mode(self, mode: CorsMode) -> Self {
        self.with(|c| c.mode = mode)
    }

    pub fn cache(self, cache: CacheMode) -> Self {
        self.with(|c| c.cache = cache)
    }

    /// Log every request and response through `tracing`.
    pub fn debug(self) -> Self {
        self.with(|c| c.debug = true)
    }

    /// Share one in-flight call among concurrent identical requests.
    pub fn dedupe(self) -> Self {
        self.with(|c| c.dedupe = true)
    }

    /// Freeze the configuration. The fetcher gets its own pending-request
    /// registry, shared by its clones and by nothing else.
    pub fn build(self, transport: impl Transport + 'static) -> Fetcher {
        Fetcher::new(Arc::new(self.config), Arc::new(transport))
    }
}
