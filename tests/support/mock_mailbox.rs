use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use percent_encoding::percent_decode_str;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const TEST_TOKEN: &str = "test-access-token";

#[derive(Clone)]
pub struct MockMessage {
    pub id: String,
    pub thread_id: String,
    pub internal_date_ms: i64,
    pub headers: Vec<(String, String)>,
    pub body_text: Option<String>,
}

impl MockMessage {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            thread_id: format!("thread-{id}"),
            id,
            internal_date_ms: 1_700_000_000_000,
            headers: Vec::new(),
            body_text: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, text: &str) -> Self {
        self.body_text = Some(text.to_string());
        self
    }

    fn to_json(&self) -> Value {
        let headers: Vec<Value> = self
            .headers
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        let parts: Vec<Value> = self
            .body_text
            .iter()
            .map(|text| {
                json!({
                    "mimeType": "text/plain",
                    "body": { "size": text.len(), "data": URL_SAFE_NO_PAD.encode(text) },
                })
            })
            .collect();
        json!({
            "id": self.id,
            "threadId": self.thread_id,
            "snippet": format!("snippet of {}", self.id),
            "internalDate": self.internal_date_ms.to_string(),
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": headers,
                "parts": parts,
            },
        })
    }
}

/// Shared mailbox state backing the mock server, including scripted failures.
#[derive(Clone, Default)]
pub struct MockMailbox {
    messages: Arc<RwLock<Vec<MockMessage>>>,
    failures: Arc<RwLock<HashMap<String, usize>>>,
    get_calls: Arc<RwLock<HashMap<String, usize>>>,
    list_queries: Arc<RwLock<Vec<String>>>,
    latency_ms: Arc<AtomicUsize>,
}

impl MockMailbox {
    pub fn new(messages: Vec<MockMessage>) -> Self {
        Self {
            messages: Arc::new(RwLock::new(messages)),
            ..Self::default()
        }
    }

    /// Mailbox with `count` messages `m0..m{count}` carrying a From header.
    pub fn with_generated(count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|i| {
                    MockMessage::new(format!("m{i}"))
                        .header("From", &format!("\"Sender {i}\" <Sender{i}@Example.com>"))
                        .header("Subject", &format!("message {i}"))
                })
                .collect(),
        )
    }

    /// Fails the next `times` fetches of `id` with HTTP 503.
    pub fn fail_next(&self, id: &str, times: usize) {
        self.failures
            .write()
            .expect("mock mailbox poisoned")
            .insert(id.to_string(), times);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn get_calls(&self, id: &str) -> usize {
        self.get_calls
            .read()
            .expect("mock mailbox poisoned")
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn list_queries(&self) -> Vec<String> {
        self.list_queries
            .read()
            .expect("mock mailbox poisoned")
            .clone()
    }

    fn take_failure(&self, id: &str) -> bool {
        let mut failures = self.failures.write().expect("mock mailbox poisoned");
        match failures.get_mut(id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn list(&self, query: &str, max_results: usize, offset: usize) -> Value {
        self.list_queries
            .write()
            .expect("mock mailbox poisoned")
            .push(query.to_string());

        let messages = self.messages.read().expect("mock mailbox poisoned");
        let end = offset.saturating_add(max_results).min(messages.len());
        let page: Vec<Value> = messages
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|m| json!({ "id": m.id, "threadId": m.thread_id }))
            .collect();
        let next = if end < messages.len() {
            end.to_string()
        } else {
            String::new()
        };
        json!({
            "messages": page,
            "nextPageToken": next,
            "resultSizeEstimate": messages.len(),
        })
    }

    fn get(&self, id: &str) -> Option<Value> {
        *self
            .get_calls
            .write()
            .expect("mock mailbox poisoned")
            .entry(id.to_string())
            .or_insert(0) += 1;
        self.messages
            .read()
            .expect("mock mailbox poisoned")
            .iter()
            .find(|m| m.id == id)
            .map(MockMessage::to_json)
    }
}

pub struct MockMailboxServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockMailboxServer {
    pub async fn start(mailbox: MockMailbox) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock mailbox listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let mailbox = mailbox.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(mailbox.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock mailbox server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    mailbox: MockMailbox,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(status(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"));
    }

    let authorized = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == format!("Bearer {TEST_TOKEN}"))
        .unwrap_or(false);
    if !authorized {
        return Ok(status(StatusCode::UNAUTHORIZED, "missing or invalid token"));
    }

    let latency = mailbox.latency_ms.load(Ordering::SeqCst);
    if latency > 0 {
        tokio::time::sleep(Duration::from_millis(latency as u64)).await;
    }

    let params = query_params(req.uri().query().unwrap_or_default());
    let segments: Vec<&str> = req
        .uri()
        .path()
        .trim_matches('/')
        .split('/')
        .collect();

    match segments.as_slice() {
        ["gmail", "v1", "users", _user, "messages"] => {
            let query = params.get("q").cloned().unwrap_or_default();
            let max_results = params
                .get("maxResults")
                .and_then(|v| v.parse().ok())
                .unwrap_or(100);
            let offset = params
                .get("pageToken")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            Ok(json_response(mailbox.list(&query, max_results, offset)))
        }
        ["gmail", "v1", "users", _user, "messages", id] => {
            let id = id.to_string();
            if mailbox.take_failure(&id) {
                // count the attempt even though it fails
                mailbox.get(&id);
                return Ok(status(StatusCode::SERVICE_UNAVAILABLE, "backend unavailable"));
            }
            match mailbox.get(&id) {
                Some(message) => Ok(json_response(message)),
                None => Ok(status(StatusCode::NOT_FOUND, "message not found")),
            }
        }
        _ => Ok(status(StatusCode::NOT_FOUND, "unknown route")),
    }
}

fn query_params(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.to_string(), form_decode(value)))
        })
        .collect()
}

/// Form-encoded values carry spaces as `+`; a literal plus arrives as `%2B`.
fn form_decode(value: &str) -> String {
    percent_decode_str(&value.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

fn json_response(value: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn status(code: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_decode_form_encoding() {
        let params = query_params("q=-is%3Achat+caf%C3%A9+%2B1&maxResults=4&pageToken=");
        assert_eq!(params["q"], "-is:chat café +1");
        assert_eq!(params["maxResults"], "4");
        assert_eq!(params["pageToken"], "");
    }

    #[test]
    fn malformed_escapes_are_kept_verbatim() {
        assert_eq!(form_decode("%aé"), "%aé");
        assert_eq!(form_decode("100%"), "100%");
        assert_eq!(form_decode("%zz"), "%zz");
    }
}
