//! The host fetch primitive.
//!
//! The fetcher never opens sockets itself. It hands a resolved `HttpRequest`
//! to a `Transport` and gets an `HttpResponse` (or a `FetchError`) back.
//! Tests plug in scripted transports; production code uses
//! [`ReqwestTransport`] behind the default `reqwest` feature.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::http::{HttpRequest, HttpResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one round-trip.
    ///
    /// Non-2xx statuses are responses, not errors. Implementations should
    /// stop work and return `FetchError::Aborted` once `request.signal` fires.
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, FetchError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        (**self).fetch(request).await
    }
}

#[cfg(feature = "reqwest")]
mod reqwest_impl {
    use futures_util::StreamExt;

    use super::*;
    use crate::http::HttpBody;

    /// Transport backed by a `reqwest::Client`.
    ///
    /// Credentials, CORS and cache modes are browser concepts; this transport
    /// carries them on the request but does not act on them.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
            let signal = request.signal.clone();
            let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
                .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

            let mut builder = self.client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder = match request.body {
                Some(HttpBody::Text(text)) => builder.body(text),
                Some(HttpBody::Multipart(form)) => {
                    let mut multipart = reqwest::multipart::Form::new();
                    for (name, value) in form.fields {
                        multipart = multipart.text(name, value);
                    }
                    builder.multipart(multipart)
                }
                None => builder,
            };

            let response = tokio::select! {
                sent = builder.send() => sent.map_err(|e| FetchError::Network(e.to_string()))?,
                () = signal.aborted() => return Err(FetchError::Aborted),
            };

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_string(), value.to_string()))
                })
                .collect();
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| FetchError::Body(e.to_string())))
                .boxed();

            Ok(HttpResponse::new(status).with_headers(headers).with_body(body))
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_impl::ReqwestTransport;
