//! Typed operations over a `Fetcher`.
//!
//! # Design
//! `ApiClient` adds JSON decoding, schema validation, streaming and error
//! normalization on top of the fetcher. Every operation reports failure as an
//! `ApiError`:
//!
//! - `fetch_one`, `fetch_one_validated` and `fetch_stream` return
//!   `ApiResponse<T>`.
//! - `fetch_text_many`, `fetch_lines` and `fetch_many` return streams whose
//!   items are `Result`s; a failure is the last item.
//!
//! A non-2xx response is turned into an `ApiError` from its JSON body
//! (`errorId`, `debugMessage`), falling back to `unexpected_error` with the
//! response status.

use futures_util::stream::{self, BoxStream, StreamExt};
use futures_util::FutureExt;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ApiError, FetchError};
use crate::fetcher::{Fetcher, RequestOptions};
use crate::http::{ByteStream, HttpResponse};
use crate::schema::{Schema, Typed};
use crate::stream::{split_lines, text_chunks, TextStream};

/// Success value or normalized error.
pub type ApiResponse<T> = Result<T, ApiError>;

#[derive(Debug, Clone)]
pub struct ApiClient {
    fetcher: Fetcher,
}

impl ApiClient {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Fetch one JSON document and deserialize it into `T`.
    ///
    /// A body that is not JSON is `fetch_failed`; JSON of the wrong shape is
    /// `schema_validation_failed`.
    pub async fn fetch_one<T: DeserializeOwned>(&self, path: &str, options: RequestOptions) -> ApiResponse<T> {
        self.fetch_one_validated(path, options, &Typed::<T>::new()).await
    }

    /// Fetch one JSON document and run it through `schema`.
    pub async fn fetch_one_validated<S: Schema>(
        &self,
        path: &str,
        options: RequestOptions,
        schema: &S,
    ) -> ApiResponse<S::Output> {
        let response = self.fetch_ok(path, options).await?;
        let value: serde_json::Value = response.json().await?;
        schema.validate(value).map_err(ApiError::schema_validation_failed)
    }

    /// Fetch and hand back the raw body stream.
    pub async fn fetch_stream(&self, path: &str, options: RequestOptions) -> ApiResponse<ByteStream> {
        let response = self.fetch_ok(path, options).await?;
        response
            .into_body()
            .ok_or_else(|| ApiError::fetch_failed("response body is absent"))
    }

    /// Decoded text chunks, in arrival order. The request is sent on first poll.
    pub fn fetch_text_many(&self, path: impl Into<String>, options: RequestOptions) -> TextStream {
        let client = self.clone();
        let path = path.into();
        text_chunks(async move { client.fetch_stream(&path, options).await }.boxed())
    }

    /// Newline-delimited text, reassembled across chunk boundaries.
    pub fn fetch_lines(&self, path: impl Into<String>, options: RequestOptions) -> TextStream {
        split_lines(self.fetch_text_many(path, options))
    }

    /// Each text chunk parsed as JSON and validated by `schema`. The first
    /// chunk that fails either step ends the stream with its error.
    pub fn fetch_many<S>(
        &self,
        path: impl Into<String>,
        options: RequestOptions,
        schema: S,
    ) -> BoxStream<'static, ApiResponse<S::Output>>
    where
        S: Schema + Send + 'static,
        S::Output: Send + 'static,
    {
        validate_each(self.fetch_text_many(path, options), schema)
    }

    async fn fetch_ok(&self, path: &str, options: RequestOptions) -> ApiResponse<HttpResponse> {
        let response = self.fetcher.call(path, options).await?;
        if response.ok() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }
}

fn validate_each<S>(texts: TextStream, schema: S) -> BoxStream<'static, ApiResponse<S::Output>>
where
    S: Schema + Send + 'static,
    S::Output: Send + 'static,
{
    stream::unfold(Some((texts, schema)), |state| async move {
        let Some((mut texts, schema)) = state else {
            return None;
        };
        let item = match texts.next().await {
            Some(Ok(text)) => parse_chunk(&text, &schema),
            Some(Err(err)) => Err(err),
            None => return None,
        };
        let next = item.is_ok().then_some((texts, schema));
        Some((item, next))
    })
    .boxed()
}

fn parse_chunk<S: Schema>(text: &str, schema: &S) -> ApiResponse<S::Output> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FetchError::Decode(e.to_string()))?;
    schema.validate(value).map_err(ApiError::schema_validation_failed)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_id: String,
    #[serde(default)]
    debug_message: Option<String>,
}

/// Build an `ApiError` from a non-2xx response body.
pub(crate) async fn error_from_response(response: HttpResponse) -> ApiError {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => ApiError {
            error_id: body.error_id,
            status,
            debug_message: body.debug_message,
        },
        Err(_) => ApiError::unexpected(status),
    }
}

/// An `ApiClient` built on first use.
///
/// Owned by whoever creates it, so each consumer (or test) gets its own
/// client and nothing leaks between them.
pub struct LazyClient {
    client: OnceCell<ApiClient>,
    factory: Box<dyn Fn() -> ApiClient + Send + Sync>,
}

impl LazyClient {
    pub fn new(factory: impl Fn() -> ApiClient + Send + Sync + 'static) -> Self {
        Self {
            client: OnceCell::new(),
            factory: Box::new(factory),
        }
    }

    pub fn get(&self) -> &ApiClient {
        self.client.get_or_init(|| (self.factory)())
    }

    pub fn is_initialized(&self) -> bool {
        self.client.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::builder::FetcherBuilder;
    use crate::http::HttpRequest;
    use crate::transport::Transport;

    /// Answers every request with the same canned status and body chunks.
    struct Canned {
        status: u16,
        chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl Transport for Canned {
        async fn fetch(&self, _request: HttpRequest) -> Result<HttpResponse, FetchError> {
            Ok(HttpResponse::from_chunks(self.status, self.chunks.clone()))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn fetch(&self, _request: HttpRequest) -> Result<HttpResponse, FetchError> {
            Err(FetchError::Network("connection refused".to_string()))
        }
    }

    fn client(status: u16, chunks: Vec<&'static str>) -> ApiClient {
        ApiClient::new(FetcherBuilder::new().build(Canned { status, chunks }))
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    #[tokio::test]
    async fn fetch_one_parses_success_body() {
        let user: User = client(200, vec![r#"{"id":1,"name":"x"}"#])
            .fetch_one("/users/1", RequestOptions::get())
            .await
            .unwrap();
        assert_eq!(
            user,
            User {
                id: 1,
                name: "x".to_string()
            }
        );
    }

    #[tokio::test]
    async fn success_payload_with_error_id_is_still_success() {
        let value: serde_json::Value = client(200, vec![r#"{"errorId":"looks_like_an_error"}"#])
            .fetch_one("/x", RequestOptions::get())
            .await
            .unwrap();
        assert_eq!(value["errorId"], "looks_like_an_error");
    }

    #[tokio::test]
    async fn error_body_is_extracted() {
        let err = client(404, vec![r#"{"errorId":"not_found","debugMessage":"x"}"#])
            .fetch_one::<serde_json::Value>("/users/9", RequestOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::new("not_found", 404).with_debug_message("x"));
    }

    #[tokio::test]
    async fn error_body_without_error_id_is_unexpected() {
        let err = client(502, vec![r#"{"message":"bad gateway"}"#])
            .fetch_one::<serde_json::Value>("/x", RequestOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::unexpected(502));
    }

    #[tokio::test]
    async fn unparseable_error_body_is_unexpected() {
        let err = client(500, vec!["<html>oops</html>"])
            .fetch_one::<serde_json::Value>("/x", RequestOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::unexpected(500));
    }

    #[tokio::test]
    async fn invalid_success_json_is_fetch_failed() {
        let err = client(200, vec!["not json"])
            .fetch_one::<serde_json::Value>("/x", RequestOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err.error_id, "fetch_failed");
        assert_eq!(err.status, 500);
    }

    #[tokio::test]
    async fn schema_mismatch_is_reported() {
        let err = client(200, vec![r#"{"id":1,"fullName":"x"}"#])
            .fetch_one::<User>("/users/1", RequestOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err.error_id, "schema_validation_failed");
        assert_eq!(err.status, 500);
        assert!(err.debug_message.unwrap().contains("missing field `name`"));
    }

    #[tokio::test]
    async fn custom_schema_runs_on_success_body() {
        let even = |value: serde_json::Value| match value["n"].as_u64() {
            Some(n) if n % 2 == 0 => Ok(n),
            _ => Err("n must be even".to_string()),
        };
        let err = client(200, vec![r#"{"n":3}"#])
            .fetch_one_validated("/n", RequestOptions::get(), &even)
            .await
            .unwrap_err();
        assert!(err.debug_message.unwrap().contains("n must be even"));
    }

    #[tokio::test]
    async fn transport_failure_is_fetch_failed() {
        let client = ApiClient::new(FetcherBuilder::new().build(Unreachable));
        let err = client
            .fetch_one::<serde_json::Value>("/x", RequestOptions::get())
            .await
            .unwrap_err();
        assert_eq!(err.error_id, "fetch_failed");
        assert!(err.debug_message.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn fetch_stream_returns_body() {
        let body = client(200, vec!["ab", "cd"])
            .fetch_stream("/blob", RequestOptions::get())
            .await
            .unwrap();
        let chunks: Vec<_> = body.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(chunks, vec!["ab", "cd"]);
    }

    #[tokio::test]
    async fn fetch_stream_without_body_fails() {
        struct Empty;
        #[async_trait]
        impl Transport for Empty {
            async fn fetch(&self, _request: HttpRequest) -> Result<HttpResponse, FetchError> {
                Ok(HttpResponse::new(204))
            }
        }
        let client = ApiClient::new(FetcherBuilder::new().build(Empty));
        let err = client
            .fetch_stream("/blob", RequestOptions::get())
            .await
            .err()
            .unwrap();
        assert_eq!(err.error_id, "fetch_failed");
    }

    #[tokio::test]
    async fn fetch_text_many_fails_on_error_status() {
        let items: Vec<_> = client(503, vec![r#"{"errorId":"busy"}"#])
            .fetch_text_many("/events", RequestOptions::get())
            .collect()
            .await;
        assert_eq!(items, vec![Err(ApiError::new("busy", 503))]);
    }

    #[tokio::test]
    async fn fetch_many_stops_at_first_invalid_chunk() {
        let items: Vec<_> = client(
            200,
            vec![r#"{"id":1,"name":"a"}"#, r#"{"id":2}"#, r#"{"id":3,"name":"c"}"#],
        )
        .fetch_many("/users", RequestOptions::get(), Typed::<User>::new())
        .collect()
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0],
            Ok(User {
                id: 1,
                name: "a".to_string()
            })
        );
        assert_eq!(
            items[1].as_ref().unwrap_err().error_id,
            "schema_validation_failed"
        );
    }

    #[tokio::test]
    async fn fetch_many_stops_at_malformed_json() {
        let items: Vec<_> = client(200, vec![r#"{"id":1,"name":"a"}"#, "{oops", r#"{"id":3,"name":"c"}"#])
            .fetch_many("/users", RequestOptions::get(), Typed::<User>::new())
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap_err().error_id, "fetch_failed");
    }

    #[tokio::test]
    async fn fetch_lines_splits_ndjson() {
        let lines: Vec<_> = client(200, vec!["{\"id\":1}\n{\"id\"", ":2}\n"])
            .fetch_lines("/feed", RequestOptions::get())
            .collect()
            .await;
        assert_eq!(
            lines,
            vec![Ok(r#"{"id":1}"#.to_string()), Ok(r#"{"id":2}"#.to_string())]
        );
    }

    #[tokio::test]
    async fn lazy_client_builds_once_on_first_use() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let lazy = LazyClient::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            client(200, vec![r#"{"ok":true}"#])
        });

        assert!(!lazy.is_initialized());
        let first: serde_json::Value = lazy.get().fetch_one("/a", RequestOptions::get()).await.unwrap();
        let second: serde_json::Value = lazy.get().fetch_one("/b", RequestOptions::get()).await.unwrap();

        assert_eq!(first, json!({"ok": true}));
        assert_eq!(second, json!({"ok": true}));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(lazy.is_initialized());
    }
}
