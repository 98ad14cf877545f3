use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{AppendHeaders, IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};

/// Fixed payload served by `/json`.
pub const JSON_FIXTURE: &str = r#"{"name":"curlkit","items":[1,2,3],"nested":{"ok":true}}"#;
/// Fixed payload served by `/xml`.
pub const XML_FIXTURE: &str =
    r#"<?xml version="1.0"?><catalog><book id="1">Rust</book><book id="2">HTTP</book></catalog>"#;
pub const TEXT_FIXTURE: &str = "plain text body";

/// Failures served by `/flaky/{key}` before it starts answering 200.
pub const FLAKY_FAILURES: u32 = 2;

/// What `/echo` saw of the request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Echo {
    pub method: String,
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub type Hits = Arc<Mutex<HashMap<String, u32>>>;

pub fn app() -> Router {
    let hits: Hits = Arc::new(Mutex::new(HashMap::new()));
    Router::new()
        .route("/json", get(json_fixture))
        .route("/xml", get(xml_fixture))
        .route("/text", get(text_fixture))
        .route("/status/{code}", any(status))
        .route("/echo", any(echo))
        .route("/headers/repeat", get(repeat_headers))
        .route("/flaky/{key}", any(flaky))
        .with_state(hits)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn json_fixture() -> Response {
    ([(header::CONTENT_TYPE, "application/json")], JSON_FIXTURE).into_response()
}

async fn xml_fixture() -> Response {
    ([(header::CONTENT_TYPE, "text/xml; charset=utf-8")], XML_FIXTURE).into_response()
}

async fn text_fixture() -> Response {
    ([(header::CONTENT_TYPE, "text/plain")], TEXT_FIXTURE).into_response()
}

async fn status(Path(code): Path<u16>) -> Result<Response, StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    tracing::debug!(code, "serving fixed status");
    Ok((status, Json(serde_json::json!({ "status": code }))).into_response())
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> Json<Echo> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Json(Echo {
        method: method.to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body,
    })
}

async fn repeat_headers() -> Response {
    (
        AppendHeaders([
            (header::SET_COOKIE, "a=1"),
            (header::SET_COOKIE, "b=2"),
            (header::CONTENT_TYPE, "text/plain"),
        ]),
        "cookies",
    )
        .into_response()
}

async fn flaky(State(hits): State<Hits>, Path(key): Path<String>) -> Response {
    let mut hits = hits.lock().await;
    let count = hits.entry(key.clone()).or_insert(0);
    *count += 1;
    tracing::debug!(key = %key, hit = *count, "flaky endpoint");
    if *count <= FLAKY_FAILURES {
        return (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response();
    }
    Json(serde_json::json!({ "key": key, "hits": *count })).into_response()
}
