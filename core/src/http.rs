//! HTTP transport types exchanged between the fetcher and the host transport.
//!
//! # Design
//! Requests are plain data: the fetcher resolves the URL, merges headers and
//! serializes the body, then hands a finished `HttpRequest` to a `Transport`.
//! Responses carry their body as a lazy stream of byte chunks so the client
//! can either buffer it (JSON) or pass it through (streaming).
//!
//! Headers are ordered `(name, value)` pairs. Lookups and overrides compare
//! names ASCII case-insensitively.

use std::fmt;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::signal::AbortSignal;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const AUTHORIZATION: &str = "Authorization";
pub const APPLICATION_JSON: &str = "application/json";

/// A response body: byte chunks pulled one at a time.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether credentials (cookies, client certs) accompany the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsMode {
    Include,
    Omit,
    #[default]
    SameOrigin,
}

/// Cross-origin policy for the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorsMode {
    #[default]
    Cors,
    NoCors,
    SameOrigin,
    Navigate,
}

/// How the request interacts with the host's HTTP cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

/// A multipart form payload. Sent as-is; the transport picks the boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipart {
    pub fields: Vec<(String, String)>,
}

impl Multipart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// Request payload as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized to a JSON string before sending.
    Json(serde_json::Value),
    /// Passed through untouched.
    Multipart(Multipart),
}

/// Request payload as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpBody {
    Text(String),
    Multipart(Multipart),
}

/// A fully resolved request described as plain data.
///
/// Built by the fetcher, optionally rewritten by a `before_request` hook,
/// then executed by a `Transport`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<HttpBody>,
    pub credentials: CredentialsMode,
    pub mode: CorsMode,
    pub cache: CacheMode,
    /// Aborted when the caller cancels or the attempt times out.
    pub signal: AbortSignal,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            credentials: CredentialsMode::default(),
            mode: CorsMode::default(),
            cache: CacheMode::default(),
            signal: AbortSignal::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        set_header(&mut self.headers, name, value);
    }

    pub fn remove_header(&mut self, name: &str) {
        remove_header(&mut self.headers, name);
    }
}

/// A response whose body has not been read yet.
pub struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Option<ByteStream>,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl HttpResponse {
    /// A response with no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    /// A response whose body is already in memory, delivered in the given chunks.
    pub fn from_chunks<I, B>(status: u16, chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks: Vec<Result<Bytes, FetchError>> =
            chunks.into_iter().map(|chunk| Ok(chunk.into())).collect();
        Self::new(status).with_body(stream::iter(chunks).boxed())
    }

    /// A single-chunk JSON response with a `Content-Type` header.
    pub fn json_body(status: u16, value: &serde_json::Value) -> Self {
        Self::from_chunks(status, [value.to_string()]).with_header(CONTENT_TYPE, APPLICATION_JSON)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        set_header(&mut self.headers, name, value);
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: ByteStream) -> Self {
        self.body = Some(body);
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// True for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn into_body(self) -> Option<ByteStream> {
        self.body
    }

    /// Read the whole body. An absent body reads as empty.
    pub async fn bytes(self) -> Result<Bytes, FetchError> {
        let Some(mut body) = self.body else {
            return Ok(Bytes::new());
        };
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    pub async fn text(self) -> Result<String, FetchError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| FetchError::Decode(e.to_string()))
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, FetchError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Drain the body into memory, keeping chunk boundaries, so the response
    /// can be replayed for several readers.
    pub async fn buffer(self) -> Result<BufferedResponse, FetchError> {
        let chunks = match self.body {
            Some(mut body) => {
                let mut chunks = Vec::new();
                while let Some(chunk) = body.next().await {
                    chunks.push(chunk?);
                }
                Some(chunks)
            }
            None => None,
        };
        Ok(BufferedResponse {
            status: self.status,
            headers: self.headers,
            chunks,
        })
    }
}

/// A fully read response that can be turned back into an `HttpResponse`
/// any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub chunks: Option<Vec<Bytes>>,
}

impl BufferedResponse {
    pub fn into_response(self) -> HttpResponse {
        let response = HttpResponse::new(self.status).with_headers(self.headers);
        match self.chunks {
            Some(chunks) => {
                let items: Vec<Result<Bytes, FetchError>> = chunks.into_iter().map(Ok).collect();
                response.with_body(stream::iter(items).boxed())
            }
            None => response,
        }
    }
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .rev()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Replace any existing value for `name` (case-insensitive), keeping its position.
pub(crate) fn set_header(
    headers: &mut Vec<(String, String)>,
    name: impl Into<String>,
    value: impl Into<String>,
) {
    let name = name.into();
    let value = value.into();
    let mut replaced = false;
    headers.retain_mut(|(key, current)| {
        if !key.eq_ignore_ascii_case(&name) {
            return true;
        }
        if replaced {
            return false;
        }
        replaced = true;
        key.clone_from(&name);
        current.clone_from(&value);
        true
    });
    if !replaced {
        headers.push((name, value));
    }
}

pub(crate) fn remove_header(headers: &mut Vec<(String, String)>, name: &str) {
    headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
}
