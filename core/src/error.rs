//! Error types for the fetch pipeline.
//!
//! # Design
//! Failures live in two layers. `FetchError` is what the fetcher, its hooks,
//! and the transport fail with; it stays close to the cause. `ApiError` is the
//! normalized value every `ApiClient` operation hands back, keyed by a stable
//! `error_id` string so callers never need to know which layer failed.
//!
//! `From<FetchError> for ApiError` is the single place where the mapping
//! happens.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error body did not have the expected `{ errorId, debugMessage }` shape.
pub const UNEXPECTED_ERROR: &str = "unexpected_error";

/// Network-level or programmer failure that is not an abort.
pub const FETCH_FAILED: &str = "fetch_failed";

/// The request was cancelled by the caller or by the timeout.
pub const REQUEST_ABORTED: &str = "request_aborted";

/// A successful response failed the caller-supplied schema.
pub const SCHEMA_VALIDATION_FAILED: &str = "schema_validation_failed";

/// Status reported for aborted requests (nginx's "client closed request").
pub const ABORTED_STATUS: u16 = 499;

/// Normalized error returned by every `ApiClient` operation.
///
/// Serializes with the same camelCase field names servers use for error
/// bodies, so an `ApiError` can be parsed straight out of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{error_id} ({status})")]
pub struct ApiError {
    pub error_id: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_message: Option<String>,
}

impl ApiError {
    pub fn new(error_id: impl Into<String>, status: u16) -> Self {
        Self {
            error_id: error_id.into(),
            status,
            debug_message: None,
        }
    }

    pub fn with_debug_message(mut self, message: impl Into<String>) -> Self {
        self.debug_message = Some(message.into());
        self
    }

    pub fn unexpected(status: u16) -> Self {
        Self::new(UNEXPECTED_ERROR, status)
    }

    pub fn aborted() -> Self {
        Self::new(REQUEST_ABORTED, ABORTED_STATUS)
    }

    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self::new(FETCH_FAILED, 500).with_debug_message(message)
    }

    pub fn schema_validation_failed(reason: impl Into<String>) -> Self {
        Self::new(SCHEMA_VALIDATION_FAILED, 500)
            .with_debug_message(format!("schema validation failed: {}", reason.into()))
    }

    pub fn is_aborted(&self) -> bool {
        self.error_id == REQUEST_ABORTED
    }
}

/// Errors raised inside the fetcher, its hooks, or the transport.
///
/// `Clone` because a deduplicated request settles once and the same outcome
/// is handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Cancelled by the caller's signal or by the configured timeout.
    #[error("request aborted")]
    Aborted,

    /// The transport could not complete the round-trip.
    #[error("network error: {0}")]
    Network(String),

    /// The response body stream failed mid-read.
    #[error("failed to read response body: {0}")]
    Body(String),

    /// The response body was read but is not valid JSON (or not the expected type).
    #[error("failed to decode response body: {0}")]
    Decode(String),

    /// A user-supplied hook failed.
    #[error("hook failed: {0}")]
    Hook(String),

    /// The request could not be assembled.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An already-normalized error, passed through untouched.
    #[error(transparent)]
    Api(ApiError),
}

impl From<ApiError> for FetchError {
    fn from(err: ApiError) -> Self {
        FetchError::Api(err)
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Api(api) => api,
            FetchError::Aborted => ApiError::aborted(),
            other => ApiError::fetch_failed(other.to_string()),
        }
    }
}
