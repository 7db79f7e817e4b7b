//! In-flight request sharing.
//!
//! # Design
//! Each built `Fetcher` owns one `PendingRequestRegistry`. The first call for
//! a fingerprint spawns the network work as a tokio task and registers a
//! shared handle to it; concurrent calls with the same fingerprint await that
//! handle instead of going to the network. The task removes its own entry when
//! it settles, whatever the outcome and whether or not anyone is still
//! waiting, so the next call after settlement always starts fresh.
//!
//! The shared outcome is a `BufferedResponse` so every waiter can replay the
//! body independently.
//!
//! Fingerprints cover method, URL and body only. Two concurrent requests that
//! differ only in headers (say, different `Authorization`) collapse into one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::FetchError;
use crate::http::{BufferedResponse, HttpBody, HttpRequest};

pub(crate) type SharedResponse = Shared<BoxFuture<'static, Result<BufferedResponse, FetchError>>>;

#[derive(Clone, Default)]
pub struct PendingRequestRegistry {
    pending: Arc<Mutex<HashMap<String, SharedResponse>>>,
}

impl PendingRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fingerprints with a call in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.lock().contains_key(fingerprint)
    }

    /// Join the in-flight call for `fingerprint`, or spawn one with `start`.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn join_or_start<F>(&self, fingerprint: String, start: F) -> SharedResponse
    where
        F: FnOnce() -> BoxFuture<'static, Result<BufferedResponse, FetchError>>,
    {
        let mut pending = self.lock();
        if let Some(in_flight) = pending.get(&fingerprint) {
            debug!(%fingerprint, "joining in-flight request");
            return in_flight.clone();
        }

        let registry = self.clone();
        let key = fingerprint.clone();
        let work = start();
        // Runs to completion even if every waiter drops its handle.
        let task = tokio::spawn(async move {
            let outcome = work.await;
            registry.lock().remove(&key);
            outcome
        });

        let registry = self.clone();
        let key = fingerprint.clone();
        let shared = task
            .map(move |joined| match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    registry.lock().remove(&key);
                    Err(FetchError::Network(format!("shared request task failed: {err}")))
                }
            })
            .boxed()
            .shared();

        pending.insert(fingerprint, shared.clone());
        shared
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SharedResponse>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `METHOD_URL`, plus `_<sha256 of body>` when the request has a body.
pub fn fingerprint(request: &HttpRequest) -> String {
    let mut key = format!("{}_{}", request.method, request.url);
    if let Some(body) = &request.body {
        key.push('_');
        key.push_str(&body_digest(body));
    }
    key
}

fn body_digest(body: &HttpBody) -> String {
    let mut hasher = Sha256::new();
    match body {
        HttpBody::Text(text) => hasher.update(text.as_bytes()),
        HttpBody::Multipart(form) => {
            for (name, value) in &form.fields {
                hasher.update(name.as_bytes());
                hasher.update([0]);
                hasher.update(value.as_bytes());
                hasher.update([0]);
            }
        }
    }
    hex::encode(hasher.finalize())
}
