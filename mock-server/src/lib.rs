//! Fixture HTTP server for exercising the fetch pipeline over real sockets.
//!
//! Routes:
//! - `GET /users/{id}`: user `1` exists, others are a JSON 404 error body
//! - `GET /profiles/{id}`: a user-like document with `fullName` instead of `name`
//! - `GET /status/{code}`: that status with an `errorId` body; `?plain=true` sends text
//! - `GET /flaky/{key}?failures=N`: `503` for the first N hits of `key`, then `200`
//! - `GET /slow?ms=N`: sleeps N ms before answering
//! - `GET /stream?chunks=a,b,c&delay_ms=N`: chunked body, one write per chunk
//! - `GET /events?count=N`: newline-delimited JSON
//! - `POST /tickets?delay_ms=N`: a fresh UUID per call, echoing the JSON body
//! - `ANY /echo`: the request as the server saw it

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub received: Value,
}

/// What `/echo` saw.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Hit counters for `/flaky/{key}`.
pub type Counters = Arc<RwLock<HashMap<String, u32>>>;

pub fn app() -> Router {
    let counters: Counters = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/users/{id}", get(get_user))
        .route("/profiles/{id}", get(get_profile))
        .route("/status/{code}", get(status))
        .route("/flaky/{key}", get(flaky))
        .route("/slow", get(slow))
        .route("/stream", get(chunked))
        .route("/events", get(events))
        .route("/tickets", post(create_ticket))
        .route("/echo", any(echo))
        .with_state(counters)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn error_body(status: StatusCode, error_id: &str, debug_message: String) -> Response {
    (
        status,
        Json(json!({ "errorId": error_id, "debugMessage": debug_message })),
    )
        .into_response()
}

async fn get_user(Path(id): Path<u64>) -> Response {
    if id == 1 {
        return Json(User {
            id,
            name: "Ada".to_string(),
        })
        .into_response();
    }
    error_body(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("user {id} does not exist"),
    )
}

async fn get_profile(Path(id): Path<u64>) -> Json<Value> {
    Json(json!({ "id": id, "fullName": "Ada Lovelace" }))
}

#[derive(Deserialize)]
struct StatusQuery {
    #[serde(default)]
    plain: bool,
}

async fn status(Path(code): Path<u16>, Query(query): Query<StatusQuery>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if query.plain {
        return (status, "plain text failure").into_response();
    }
    error_body(status, &format!("status_{code}"), format!("requested status {code}"))
}

#[derive(Deserialize)]
struct FlakyQuery {
    failures: u32,
}

async fn flaky(
    State(counters): State<Counters>,
    Path(key): Path<String>,
    Query(query): Query<FlakyQuery>,
) -> Response {
    let hits = {
        let mut counters = counters.write().await;
        let hits = counters.entry(key).or_insert(0);
        *hits += 1;
        *hits
    };
    if hits <= query.failures {
        return error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            format!("hit {hits} of {} failing", query.failures),
        );
    }
    Json(json!({ "hits": hits })).into_response()
}

#[derive(Deserialize)]
struct SlowQuery {
    ms: u64,
}

async fn slow(Query(query): Query<SlowQuery>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(query.ms)).await;
    Json(json!({ "sleptMs": query.ms }))
}

#[derive(Deserialize)]
struct ChunkQuery {
    chunks: String,
    #[serde(default)]
    delay_ms: u64,
}

async fn chunked(Query(query): Query<ChunkQuery>) -> Response {
    let chunks: VecDeque<String> = query.chunks.split(',').map(str::to_string).collect();
    paced_body(chunks, Duration::from_millis(query.delay_ms), "text/plain")
}

#[derive(Deserialize)]
struct EventsQuery {
    count: u32,
}

async fn events(Query(query): Query<EventsQuery>) -> Response {
    let lines: VecDeque<String> = (1..=query.count)
        .map(|n| format!("{}\n", json!({ "id": n, "name": format!("event-{n}") })))
        .collect();
    paced_body(lines, Duration::from_millis(5), "application/x-ndjson")
}

/// Stream `chunks` as separate body frames, pausing `delay` before each one after the first.
fn paced_body(chunks: VecDeque<String>, delay: Duration, content_type: &'static str) -> Response {
    let stream = futures_util::stream::unfold((chunks, true), move |(mut chunks, first)| async move {
        let Some(chunk) = chunks.pop_front() else {
            return None;
        };
        if !first && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Some((Ok::<_, Infallible>(Bytes::from(chunk)), (chunks, false)))
    });
    ([("content-type", content_type)], Body::from_stream(stream)).into_response()
}

#[derive(Deserialize)]
struct TicketQuery {
    #[serde(default)]
    delay_ms: u64,
}

async fn create_ticket(Query(query): Query<TicketQuery>, Json(received): Json<Value>) -> Response {
    if query.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(query.delay_ms)).await;
    }
    let ticket = Ticket {
        id: Uuid::new_v4(),
        received,
    };
    (StatusCode::CREATED, Json(ticket)).into_response()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Json<Echo> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    Json(Echo {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body,
    })
}
