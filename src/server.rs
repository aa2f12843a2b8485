//! HTTP/1.1 + WebSocket front end for the evaluator.
//!
//! One task per accepted connection, one request per connection
//! (`Connection: close`). Request heads are parsed with `httparse`; bodies
//! are read by `Content-Length`. Progress WebSockets are detected by peeking
//! at the request head and handed to [`crate::progress::handle_ws`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::analytics::Analytics;
use crate::config::Settings;
use crate::error::{EvalError, Result};
use crate::orchestrator::QueryOrchestrator;
use crate::progress::{handle_ws, ProgressHub};
use crate::store::open_store;
use crate::types::{QuerySubmission, QueryUpdate};

const SERVICE_NAME: &str = "LLM SEO Evaluator";
const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_LIST_LIMIT: usize = 100;
const DEFAULT_TREND_DAYS: u32 = 30;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    /// Providers the server can reach.
    #[serde(default)]
    pub providers: Vec<String>,
}

/// Everything a connection handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    orchestrator: QueryOrchestrator,
    analytics: Analytics,
    allowed_origin: Arc<str>,
}

impl AppState {
    pub fn new(
        orchestrator: QueryOrchestrator,
        analytics: Analytics,
        allowed_origin: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            analytics,
            allowed_origin: Arc::from(allowed_origin.into()),
        }
    }

    /// Open the configured store and register backends from `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let store = open_store(&settings.storage)?;
        let orchestrator = QueryOrchestrator::new(settings, Arc::clone(&store), ProgressHub::new());
        let analytics = Analytics::new(store, settings.evaluation.clone());
        Ok(Self::new(
            orchestrator,
            analytics,
            settings.server.allowed_origin.clone(),
        ))
    }

    pub fn orchestrator(&self) -> &QueryOrchestrator {
        &self.orchestrator
    }
}

/// Simple percent-decoding for URL query parameters.
pub fn url_decode(s: &str) -> String {
    let mut bytes = Vec::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '+' => bytes.push(b' '),
            '%' => {
                let hex: String = chars.by_ref().take(2).collect();
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    bytes.push(byte);
                }
            }
            _ => {
                let mut tmp = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Parse query string into key-value pairs.
pub fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

/// Bind to `settings.server` and serve until the listener fails.
pub async fn serve(settings: &Settings) -> Result<()> {
    let state = AppState::from_settings(settings)?;
    let listener = TcpListener::bind(settings.bind_addr()).await?;
    info!(
        addr = %settings.bind_addr(),
        providers = ?state.orchestrator.available_providers(),
        mock = settings.providers.use_mock,
        "server listening"
    );
    serve_listener(listener, state).await
}

/// Accept loop over an already-bound listener.
pub async fn serve_listener(listener: TcpListener, state: AppState) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                debug!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, state: AppState) -> Result<()> {
    // Peek at the head to detect WebSocket upgrade requests.
    let mut peek_buf = [0u8; 2048];
    let peek_n = stream.peek(&mut peek_buf).await.unwrap_or(0);
    let peek_str = String::from_utf8_lossy(&peek_buf[..peek_n]).into_owned();

    if peek_str.to_ascii_lowercase().contains("upgrade: websocket") {
        let query_id = peek_str
            .lines()
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(ws_query_id)
            .map(str::to_string);
        if let Some(query_id) = query_id {
            return upgrade_progress(stream, state, query_id).await;
        }
    }

    let response = match read_request(&mut stream).await {
        Ok(Some(request)) => {
            debug!(method = %request.method, path = %request.path, "request");
            // Store calls block, so routing runs off the async workers.
            let routed = state.clone();
            tokio::task::spawn_blocking(move || route(&routed, &request))
                .await
                .unwrap_or_else(|e| HttpResponse::from_error(&EvalError::Io(e.into())))
        }
        Ok(None) => return Ok(()),
        Err(e) => HttpResponse::from_error(&e),
    };
    stream
        .write_all(&response.render(&state.allowed_origin))
        .await?;
    Ok(())
}

fn ws_query_id(path: &str) -> Option<&str> {
    path.strip_prefix("/ws/queries/")?
        .strip_suffix("/status")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

async fn upgrade_progress(mut stream: TcpStream, state: AppState, query_id: String) -> Result<()> {
    let fallback = match state.orchestrator.progress(&query_id) {
        Ok(update) => Some(update),
        Err(e @ EvalError::NotFound(_)) => {
            let response = HttpResponse::from_error(&e);
            stream
                .write_all(&response.render(&state.allowed_origin))
                .await?;
            return Ok(());
        }
        Err(e) => {
            warn!(query_id = %query_id, error = %e, "no progress snapshot for websocket");
            None
        }
    };
    match tokio_tungstenite::accept_async(stream).await {
        Ok(ws_stream) => {
            debug!(query_id = %query_id, "progress websocket open");
            handle_ws(ws_stream, state.orchestrator.hub().clone(), query_id, fallback).await;
            Ok(())
        }
        Err(e) => {
            warn!(query_id = %query_id, error = %e, "websocket handshake failed");
            Err(e.into())
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Request {
    method: String,
    path: String,
    query: String,
    body: Vec<u8>,
}

/// Read one request. `Ok(None)` when the peer closed before sending a head.
async fn read_request<S>(stream: &mut S) -> Result<Option<Request>>
where
    S: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = req.method.unwrap_or("GET").to_string();
                let target = req.path.unwrap_or("/").to_string();
                let content_length = req
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if content_length > MAX_BODY_BYTES {
                    return Err(EvalError::validation("request body too large"));
                }

                let mut body = buf[head_len..].to_vec();
                while body.len() < content_length {
                    let n = stream.read(&mut chunk).await?;
                    if n == 0 {
                        break;
                    }
                    body.extend_from_slice(&chunk[..n]);
                }
                body.truncate(content_length);

                let (path, query) = match target.split_once('?') {
                    Some((p, q)) => (p.to_string(), q.to_string()),
                    None => (target, String::new()),
                };
                return Ok(Some(Request {
                    method,
                    path,
                    query,
                    body,
                }));
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_BYTES {
                    return Err(EvalError::validation("request head too large"));
                }
            }
            Err(e) => return Err(EvalError::validation(format!("malformed request: {e}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct HttpResponse {
    status: u16,
    body: String,
}

impl HttpResponse {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(e) => Self::from_error(&EvalError::Json(e)),
        }
    }

    fn detail(status: u16, detail: impl Into<String>) -> Self {
        Self::json(status, &serde_json::json!({ "detail": detail.into() }))
    }

    fn from_error(e: &EvalError) -> Self {
        let status = e.http_status();
        if status >= 500 {
            error!(error = %e, "request failed");
        }
        Self::detail(status, e.to_string())
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            body: String::new(),
        }
    }

    fn render(&self, allowed_origin: &str) -> Vec<u8> {
        let content_type = if self.body.is_empty() {
            ""
        } else {
            "Content-Type: application/json\r\n"
        };
        format!(
            "HTTP/1.1 {} {}\r\n{}Content-Length: {}\r\nAccess-Control-Allow-Origin: {}\r\nAccess-Control-Allow-Methods: GET, POST, PUT, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason(self.status),
            content_type,
            self.body.len(),
            allowed_origin,
            self.body,
        )
        .into_bytes()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "Internal Server Error",
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

fn route(state: &AppState, req: &Request) -> HttpResponse {
    if req.method == "OPTIONS" {
        return HttpResponse::no_content();
    }
    let segments: Vec<&str> = req.path.split('/').filter(|s| !s.is_empty()).collect();
    let params = parse_query(&req.query);
    let method = req.method.as_str();
    let orc = &state.orchestrator;

    let result: Result<HttpResponse> = match segments.as_slice() {
        [] => only_get(method, || {
            Ok(HttpResponse::json(
                200,
                &serde_json::json!({
                    "message": "LLM SEO Evaluation API",
                    "version": env!("CARGO_PKG_VERSION"),
                    "websocket": "/ws/queries/{id}/status",
                }),
            ))
        }),
        ["health"] => only_get(method, || {
            let health = HealthStatus {
                status: "healthy".into(),
                service: SERVICE_NAME.into(),
                providers: orc
                    .available_providers()
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            };
            Ok(HttpResponse::json(200, &health))
        }),
        ["api", "v1", "queries"] => match method {
            "POST" => parse_body::<QuerySubmission>(&req.body)
                .and_then(|s| orc.submit(&s))
                .map(|r| HttpResponse::json(201, &r)),
            "GET" => {
                let skip = usize_param(&params, "skip", 0);
                let limit = usize_param(&params, "limit", DEFAULT_LIST_LIMIT);
                match (skip, limit) {
                    (Ok(skip), Ok(limit)) => orc
                        .list_queries(skip, limit)
                        .map(|qs| HttpResponse::json(200, &qs)),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            }
            _ => Ok(method_not_allowed()),
        },
        ["api", "v1", "queries", id] => match method {
            "GET" => orc.get_query(id).map(|q| HttpResponse::json(200, &q)),
            "PUT" => parse_body::<QueryUpdate>(&req.body)
                .and_then(|u| orc.update_query(id, &u))
                .map(|q| HttpResponse::json(200, &q)),
            _ => Ok(method_not_allowed()),
        },
        ["api", "v1", "queries", id, "status"] => only_get(method, || {
            orc.query_status(id).map(|s| HttpResponse::json(200, &s))
        }),
        ["api", "v1", "queries", id, "responses"] => only_get(method, || {
            orc.query_results(id).map(|r| HttpResponse::json(200, &r))
        }),
        ["api", "v1", "queries", id, "retry"] => {
            if method == "POST" {
                orc.retry_query(id).map(|q| {
                    HttpResponse::json(
                        200,
                        &serde_json::json!({ "message": "Query retry started", "query_id": q.id }),
                    )
                })
            } else {
                Ok(method_not_allowed())
            }
        }
        ["api", "v1", "analytics", "trends"] => only_get(method, || {
            let days = params
                .get("days")
                .map(|d| {
                    d.parse::<u32>()
                        .map_err(|_| EvalError::validation(format!("invalid days '{d}'")))
                })
                .transpose()?
                .unwrap_or(DEFAULT_TREND_DAYS);
            state
                .analytics
                .trends(days)
                .map(|t| HttpResponse::json(200, &t))
        }),
        ["api", "v1", "analytics", "queries", id, "metrics"] => only_get(method, || {
            state
                .analytics
                .query_metrics(id)
                .map(|m| HttpResponse::json(200, &m))
        }),
        ["api", "v1", "analytics", "queries", id, "similarity"] => only_get(method, || {
            state
                .analytics
                .similarity_analysis(id)
                .map(|m| HttpResponse::json(200, &m))
        }),
        ["api", "v1", "analytics", "queries", id, "keywords"] => only_get(method, || {
            state
                .analytics
                .keyword_analysis(id)
                .map(|m| HttpResponse::json(200, &m))
        }),
        ["api", "v1", "analytics", "providers", "comparison"] => only_get(method, || {
            state
                .analytics
                .provider_comparison()
                .map(|m| HttpResponse::json(200, &m))
        }),
        _ => Ok(HttpResponse::detail(404, "Not Found")),
    };

    result.unwrap_or_else(|e| HttpResponse::from_error(&e))
}

fn only_get<F>(method: &str, handler: F) -> Result<HttpResponse>
where
    F: FnOnce() -> Result<HttpResponse>,
{
    if method == "GET" {
        handler()
    } else {
        Ok(method_not_allowed())
    }
}

fn method_not_allowed() -> HttpResponse {
    HttpResponse::detail(405, "Method Not Allowed")
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.is_empty() {
        return Err(EvalError::validation("request body is required"));
    }
    Ok(serde_json::from_slice(body)?)
}

fn usize_param(
    params: &std::collections::HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize> {
    match params.get(key) {
        Some(v) => v
            .parse()
            .map_err(|_| EvalError::validation(format!("invalid {key} '{v}'"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendMap;
    use crate::config::EvaluationSettings;
    use crate::store::{MemoryStore, QueryStore};
    use crate::types::{Query, QueryStatus};

    fn state() -> AppState {
        let store: Arc<dyn QueryStore> = Arc::new(MemoryStore::new());
        let orc = QueryOrchestrator::with_backends(
            Arc::clone(&store),
            ProgressHub::new(),
            BackendMap::new(),
            EvaluationSettings::default(),
        );
        AppState::new(orc, Analytics::new(store, EvaluationSettings::default()), "*")
    }

    fn request(method: &str, target: &str, body: &str) -> Request {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Request {
            method: method.into(),
            path: path.into(),
            query: query.into(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn seed(state: &AppState) -> Query {
        state
            .orchestrator()
            .create_query(&QuerySubmission {
                prompt: "Best schema markup tools?".into(),
                category: "technical".into(),
                tags: vec!["schema".into()],
                providers: vec!["openai".into()],
            })
            .expect("create")
    }

    fn detail(resp: &HttpResponse) -> String {
        let v: serde_json::Value = serde_json::from_str(&resp.body).expect("json body");
        v["detail"].as_str().unwrap_or_default().to_string()
    }

    // -- url_decode / parse_query --

    #[test]
    fn test_url_decode_basic() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("a%26b"), "a&b");
        assert_eq!(url_decode(""), "");
    }

    #[test]
    fn test_url_decode_multibyte() {
        assert_eq!(url_decode("caf%C3%A9"), "café");
    }

    #[test]
    fn test_parse_query_basic() {
        let params = parse_query("skip=10&limit=5&q=a%2Bb");
        assert_eq!(params.get("skip").map(|s| s.as_str()), Some("10"));
        assert_eq!(params.get("limit").map(|s| s.as_str()), Some("5"));
        assert_eq!(params.get("q").map(|s| s.as_str()), Some("a+b"));
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn test_ws_query_id() {
        assert_eq!(ws_query_id("/ws/queries/abc/status"), Some("abc"));
        assert_eq!(ws_query_id("/ws/queries//status"), None);
        assert_eq!(ws_query_id("/ws/queries/a/b/status"), None);
        assert_eq!(ws_query_id("/ws/other"), None);
    }

    // -- routing --

    #[test]
    fn test_health_and_banner() {
        let s = state();
        let resp = route(&s, &request("GET", "/health", ""));
        assert_eq!(resp.status, 200);
        let health: HealthStatus = serde_json::from_str(&resp.body).expect("health");
        assert_eq!(health.status, "healthy");

        let resp = route(&s, &request("GET", "/", ""));
        assert!(resp.body.contains("LLM SEO Evaluation API"));
    }

    #[test]
    fn test_options_preflight_is_204() {
        let resp = route(&state(), &request("OPTIONS", "/api/v1/queries/", ""));
        assert_eq!(resp.status, 204);
        let raw = String::from_utf8(resp.render("http://localhost:3000")).expect("utf8");
        assert!(raw.contains("Access-Control-Allow-Origin: http://localhost:3000"));
        assert!(raw.contains("Content-Length: 0"));
    }

    #[test]
    fn test_unknown_query_is_404_with_detail() {
        let s = state();
        let resp = route(&s, &request("GET", "/api/v1/queries/nope", ""));
        assert_eq!(resp.status, 404);
        assert!(detail(&resp).contains("not found"));
    }

    #[test]
    fn test_unknown_route_and_wrong_method() {
        let s = state();
        assert_eq!(route(&s, &request("GET", "/nowhere", "")).status, 404);
        assert_eq!(route(&s, &request("DELETE", "/api/v1/queries/x", "")).status, 405);
        assert_eq!(route(&s, &request("POST", "/health", "")).status, 405);
    }

    #[test]
    fn test_bad_submission_is_400() {
        let s = state();
        let resp = route(&s, &request("POST", "/api/v1/queries/", "{not json"));
        assert_eq!(resp.status, 400);
        let resp = route(&s, &request("POST", "/api/v1/queries/", ""));
        assert_eq!(resp.status, 400);
        let body = r#"{"prompt":"","category":"x","providers":["openai"]}"#;
        assert_eq!(route(&s, &request("POST", "/api/v1/queries/", body)).status, 400);
    }

    #[test]
    fn test_list_queries_with_paging() {
        let s = state();
        seed(&s);
        seed(&s);
        let resp = route(&s, &request("GET", "/api/v1/queries?skip=1&limit=5", ""));
        assert_eq!(resp.status, 200);
        let qs: Vec<Query> = serde_json::from_str(&resp.body).expect("list");
        assert_eq!(qs.len(), 1);
        assert_eq!(route(&s, &request("GET", "/api/v1/queries?limit=x", "")).status, 400);
    }

    #[test]
    fn test_put_updates_query() {
        let s = state();
        let q = seed(&s);
        let body = r#"{"category":"Content","tags":["a","b"]}"#;
        let resp = route(&s, &request("PUT", &format!("/api/v1/queries/{}", q.id), body));
        assert_eq!(resp.status, 200);
        let updated: Query = serde_json::from_str(&resp.body).expect("query");
        assert_eq!(updated.category, "content");
        assert_eq!(updated.tags, vec!["a", "b"]);
    }

    #[test]
    fn test_status_and_analytics_routes() {
        let s = state();
        let q = seed(&s);
        let resp = route(&s, &request("GET", &format!("/api/v1/queries/{}/status", q.id), ""));
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("Query is waiting to be processed"));

        for kind in ["metrics", "similarity", "keywords"] {
            let path = format!("/api/v1/analytics/queries/{}/{kind}", q.id);
            assert_eq!(route(&s, &request("GET", &path, "")).status, 200, "{kind}");
        }
        let resp = route(&s, &request("GET", "/api/v1/analytics/trends?days=7", ""));
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("\"days\":7"));
        let resp = route(&s, &request("GET", "/api/v1/analytics/providers/comparison", ""));
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn test_submit_is_201_and_retry_acknowledged() {
        let s = state();
        let body = r#"{"prompt":"How to audit hreflang?","category":"technical","providers":["openai"]}"#;
        let resp = route(&s, &request("POST", "/api/v1/queries/", body));
        assert_eq!(resp.status, 201);
        let v: serde_json::Value = serde_json::from_str(&resp.body).expect("json");
        let id = v["query_id"].as_str().expect("id").to_string();

        // No backends: processing ends in error quickly.
        for _ in 0..100 {
            if s.orchestrator().get_query(&id).expect("get").status == QueryStatus::Error {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let resp = route(&s, &request("POST", &format!("/api/v1/queries/{id}/retry"), ""));
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("Query retry started"));
    }

    #[tokio::test]
    async fn test_read_request_with_body() {
        let raw = b"POST /api/v1/queries/?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 7\r\n\r\n{\"a\":1}";
        let mut reader = &raw[..];
        let req = read_request(&mut reader).await.expect("read").expect("request");
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/v1/queries/");
        assert_eq!(req.query, "x=1");
        assert_eq!(req.body, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_read_request_rejects_garbage() {
        let raw = b"\x01\x02 nonsense\r\n\r\n";
        let mut reader = &raw[..];
        assert!(read_request(&mut reader).await.is_err());

        let mut empty: &[u8] = b"";
        assert!(read_request(&mut empty).await.expect("read").is_none());
    }
}
