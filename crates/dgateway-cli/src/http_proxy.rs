//! HTTP capture proxy
//!
//! Implements the reverse proxy in front of the configured target. Every
//! request is forwarded unchanged (minus hop-by-hop headers) and the upstream
//! response is returned to the client byte for byte. When recording is on, a
//! copy of the exchange is decoded for storage off the request path and
//! handed to the persistence queue.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use bytes::Bytes;
use dgateway_core::{Capture, CaptureQueue, CaptureSlot, RecordingState};
use reqwest::{redirect, Client, Url};
use tracing::{debug, error};

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "upgrade",
    "keep-alive",
    "te",
    "trailer",
    "proxy-connection",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// State shared across proxy handlers
#[derive(Clone)]
pub struct ProxyState {
    /// Upstream base URL
    pub target: Url,
    /// HTTP client for the upstream; never follows redirects
    pub client: Client,
    pub recording: RecordingState,
    pub queue: CaptureQueue,
    /// Largest request body buffered before forwarding
    pub max_body_bytes: usize,
}

/// Client used for forwarding. Redirects are passed back to the caller and
/// bodies are never decompressed.
pub fn build_proxy_client() -> reqwest::Result<Client> {
    Client::builder().redirect(redirect::Policy::none()).build()
}

/// Catch-all router forwarding every path and method
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/", any(proxy_handler))
        .route("/*path", any(proxy_handler))
        .with_state(state)
}

/// Main proxy handler - forwards the request and records the exchange
async fn proxy_handler(
    State(state): State<ProxyState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    req: Request<Body>,
) -> Response {
    let (parts, body) = req.into_parts();
    let upstream_url = upstream_url(&state.target, &parts.uri);

    debug!("Proxying {} {} -> {}", parts.method, parts.uri, upstream_url);

    // Recording is sampled once per exchange; a toggle mid-flight is not seen
    let mut capture = state
        .recording
        .is_recording()
        .then(|| Capture::begin(&parts.method, &parts.uri, &parts.headers));

    let body_bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read request body: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error reading request body",
            )
                .into_response();
        }
    };
    if let Some(capture) = capture.as_mut() {
        capture.set_request_body(&body_bytes);
    }

    // The merged chain replaces any inbound X-Forwarded-For lines
    let forwarded = peer.and_then(|ConnectInfo(addr)| forwarded_for(&parts.headers, addr));

    let mut upstream_req = state.client.request(parts.method.clone(), &upstream_url);
    for (name, value) in parts.headers.iter() {
        if is_hop_by_hop(name) || *name == header::CONTENT_LENGTH {
            continue;
        }
        if forwarded.is_some() && *name == X_FORWARDED_FOR {
            continue;
        }
        upstream_req = upstream_req.header(name.clone(), value.clone());
    }
    if let Some(value) = forwarded {
        upstream_req = upstream_req.header(X_FORWARDED_FOR, value);
    }
    if !body_bytes.is_empty() {
        upstream_req = upstream_req.body(body_bytes);
    }

    let upstream_response = match upstream_req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            error!("Upstream request to {} failed: {}", upstream_url, e);
            return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
        }
    };

    let status = upstream_response.status();
    let resp_headers = upstream_response.headers().clone();

    let resp_body = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read upstream response body: {}", e);
            return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
        }
    };

    if let Some(capture) = capture {
        // Reserve before decoding; a full queue drops the exchange here
        if let Ok(slot) = state.queue.try_reserve() {
            record_exchange(slot, capture, status, resp_headers.clone(), resp_body.clone());
        }
    }

    let mut response = Response::builder().status(status);
    for (name, value) in resp_headers.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        response = response.header(name.clone(), value.clone());
    }

    response
        .body(Body::from(resp_body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Decode into a reserved slot off the request path; the client response
/// never waits
fn record_exchange(
    slot: CaptureSlot,
    capture: Capture,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
) {
    tokio::task::spawn_blocking(move || {
        slot.fill(capture.finish(status, &headers, &body));
        debug!("Queued exchange for storage");
    });
}

/// Join the target base with the inbound path and query
fn upstream_url(target: &Url, uri: &axum::http::Uri) -> String {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{}{}", target.as_str().trim_end_matches('/'), path_and_query)
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Existing `X-Forwarded-For` chain with the peer address appended
fn forwarded_for(headers: &HeaderMap, peer: SocketAddr) -> Option<HeaderValue> {
    let prior: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let chain = if prior.is_empty() {
        peer.ip().to_string()
    } else {
        format!("{}, {}", prior.join(", "), peer.ip())
    };
    HeaderValue::from_str(&chain).ok()
}
