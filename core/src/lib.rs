//! Configurable fetch pipeline with typed, error-normalized API operations.
//!
//! # Overview
//! A [`FetcherBuilder`] composes cross-cutting request concerns (base URL,
//! headers, auth, query params, timeout, retry, deduplication, lifecycle
//! hooks, debug logging) into a [`Fetcher`]. An [`ApiClient`] wraps a fetcher
//! and exposes four response shapes:
//!
//! - [`ApiClient::fetch_one`] / [`ApiClient::fetch_one_validated`]: one JSON document
//! - [`ApiClient::fetch_stream`]: the raw body stream
//! - [`ApiClient::fetch_text_many`]: decoded text chunks
//! - [`ApiClient::fetch_many`]: schema-validated JSON chunks
//!
//! # Design
//! - The network is behind the [`Transport`] trait (host-does-IO). Tests
//!   script it; [`ReqwestTransport`] is the default implementation.
//! - Every client operation reports failure as an [`ApiError`] with a stable
//!   `error_id`; transport, hook and abort failures are normalized in one place.
//! - A fetcher's configuration is frozen at `build()`. Builders are values.
//!
//! ```no_run
//! # async fn demo() {
//! use std::time::Duration;
//! use fetch_core::{ApiClient, FetcherBuilder, ReqwestTransport, RequestOptions};
//!
//! let fetcher = FetcherBuilder::new()
//!     .base_url("https://api.example.com")
//!     .bearer("token")
//!     .timeout(Duration::from_secs(5))
//!     .retries(2, Duration::from_millis(250), Some([502, 503]))
//!     .dedupe()
//!     .build(ReqwestTransport::new());
//! let client = ApiClient::new(fetcher);
//!
//! let user: serde_json::Value = client
//!     .fetch_one("/users/1", RequestOptions::get())
//!     .await
//!     .unwrap();
//! # let _ = user;
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod fetcher;
pub mod http;
pub mod schema;
pub mod signal;
pub mod stream;
pub mod transport;

pub use builder::FetcherBuilder;
pub use client::{ApiClient, ApiResponse, LazyClient};
pub use config::{Auth, FetcherConfig, FetcherSettings, RetryPolicy, RetrySettings};
pub use dedupe::PendingRequestRegistry;
pub use error::{ApiError, FetchError};
pub use fetcher::{Fetcher, RequestOptions};
pub use http::{
    BufferedResponse, ByteStream, CacheMode, CorsMode, CredentialsMode, HttpBody, HttpMethod,
    HttpRequest, HttpResponse, Multipart, RequestBody,
};
pub use schema::{Schema, Typed};
pub use signal::AbortSignal;
pub use stream::TextStream;
pub use transport::Transport;
#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
