//! Admin API
//!
//! Second listener exposing the stored exchanges: paged listing, detail and
//! body views, replay, the recording toggle and HAR export. Failures are
//! logged in full and answered with a short generic message.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dgateway_core::{
    build_har, defaults::FALLBACK_MEDIA_TYPE, AppError, BodyFacet, CaptureQueue, ExchangeStore,
    ListQuery, PipelineStats, RecordingState, RecordingStatus,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::replay::{ReplayEngine, ReplayRequest};

pub const HAR_FILENAME: &str = "dgateway-export.har";

/// State shared across admin handlers
#[derive(Clone)]
pub struct AdminState {
    pub store: ExchangeStore,
    pub recording: RecordingState,
    pub queue: CaptureQueue,
    pub replay: ReplayEngine,
}

/// Error answered to an admin caller
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }

    fn bad_request(message: &'static str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Request not found")
    }

    fn internal(context: &str, detail: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, detail);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::InvalidQuery(detail) => {
                info!("Rejected admin query: {}", detail);
                ApiError::bad_request("Invalid query parameters")
            }
            other => ApiError::internal("Storage operation failed", other),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct StatusBody {
    status: RecordingStatus,
    queue: PipelineStats,
}

#[derive(Debug, Serialize)]
struct ToggleBody {
    message: &'static str,
    status: RecordingStatus,
}

pub fn router(state: AdminState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/requests", get(list_requests))
        .route("/api/requests/:id", get(request_detail))
        .route("/api/requests/body/:facet/:id", get(request_body))
        .route("/api/replay", post(replay_request))
        .route("/api/start-recording", post(start_recording))
        .route("/api/stop-recording", post(stop_recording))
        .route("/api/recording-status", get(recording_status))
        .route("/api/export/har", get(export_har))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_handler(State(state): State<AdminState>) -> Json<StatusBody> {
    Json(StatusBody {
        status: state.recording.status(),
        queue: state.queue.stats(),
    })
}

async fn list_requests(
    State(state): State<AdminState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let param = |name: &str| params.get(name).map(String::as_str);
    let query = ListQuery::from_params(
        param("page"),
        param("page_size"),
        param("url"),
        param("start_date"),
        param("end_date"),
    )?;

    let page = state.store.list(query).await?;
    Ok(Json(page).into_response())
}

async fn request_detail(
    State(state): State<AdminState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_id(&raw_id)?;
    let metadata = state
        .store
        .get_metadata(id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(metadata).into_response())
}

async fn request_body(
    State(state): State<AdminState>,
    Path((facet, raw_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let facet: BodyFacet = facet
        .parse()
        .map_err(|_| ApiError::new(StatusCode::NOT_FOUND, "Not found"))?;
    let id = parse_id(&raw_id)?;

    let stored = state
        .store
        .get_body(id, facet)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let content_type = stored
        .content_type
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| FALLBACK_MEDIA_TYPE.to_string());

    Ok(([(header::CONTENT_TYPE, content_type)], stored.body).into_response())
}

async fn replay_request(State(state): State<AdminState>, body: Bytes) -> ApiResult<Response> {
    let request: ReplayRequest = serde_json::from_slice(&body).map_err(|e| {
        info!("Rejected replay payload: {}", e);
        ApiError::bad_request("Invalid request body")
    })?;

    match state.replay.replay(request).await {
        Ok(result) => Ok(Json(result).into_response()),
        Err(e) if e.is_bad_input() => {
            info!("Rejected replay: {}", e);
            Err(ApiError::bad_request("Invalid URL in replay data"))
        }
        Err(e) => Err(ApiError::internal("Replay failed", e)),
    }
}

async fn start_recording(State(state): State<AdminState>) -> Json<ToggleBody> {
    state.recording.start();
    info!("Recording started");
    Json(ToggleBody {
        message: "Recording started",
        status: state.recording.status(),
    })
}

async fn stop_recording(State(state): State<AdminState>) -> Json<ToggleBody> {
    state.recording.stop();
    info!("Recording stopped");
    Json(ToggleBody {
        message: "Recording stopped",
        status: state.recording.status(),
    })
}

async fn recording_status(State(state): State<AdminState>) -> Json<StatusBody> {
    Json(StatusBody {
        status: state.recording.status(),
        queue: state.queue.stats(),
    })
}

async fn export_har(State(state): State<AdminState>) -> ApiResult<Response> {
    let exchanges = state.store.export_all().await?;
    let har = build_har(&exchanges);
    let body = serde_json::to_vec_pretty(&har)
        .map_err(|e| ApiError::internal("Failed to encode HAR", e))?;

    info!("Exported {} exchange(s) as HAR", exchanges.len());
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{HAR_FILENAME}\""),
            ),
        ],
        body,
    )
        .into_response())
}

fn parse_id(raw: &str) -> ApiResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::bad_request("Invalid request ID"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use dgateway_core::{capture_channel, ExchangeRecord, HeaderMultimap};
    use reqwest::Url;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _dir: TempDir,
        state: AdminState,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let (store, _) = ExchangeStore::open(dir.path().join("admin.db")).unwrap();
        let (queue, _consumer) = capture_channel(4);
        let state = AdminState {
            store,
            recording: RecordingState::new(true),
            queue,
            replay: ReplayEngine::new(
                Url::parse("http://127.0.0.1:9").unwrap(),
                Duration::from_secs(1),
            ),
        };
        Harness { _dir: dir, state }
    }

    async fn seed(store: &ExchangeStore, url: &str, body: &[u8]) -> i64 {
        let mut response_headers = HeaderMultimap::new();
        response_headers.append("Content-Type", "application/json");
        store
            .insert(ExchangeRecord {
                timestamp: Utc::now(),
                method: "GET".to_string(),
                url: url.to_string(),
                request_headers: HeaderMultimap::new(),
                request_body: Vec::new(),
                status_code: 200,
                response_headers,
                response_body: body.to_vec(),
            })
            .await
            .unwrap()
    }

    async fn call(state: &AdminState, method: &str, uri: &str, body: Body) -> Response {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap();
        router(state.clone()).oneshot(req).await.unwrap()
    }

    async fn body_of(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn json_of(resp: Response) -> serde_json::Value {
        serde_json::from_slice(&body_of(resp).await).unwrap()
    }

    #[tokio::test]
    async fn test_list_requests() {
        let h = harness();
        seed(&h.state.store, "/a", b"{}").await;
        seed(&h.state.store, "/b", b"{}").await;

        let resp = call(&h.state, "GET", "/api/requests?page_size=1&page=2", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_of(resp).await;
        assert_eq!(json["total_count"], 2);
        assert_eq!(json["total_pages"], 2);
        assert_eq!(json["page"], 2);
        assert_eq!(json["requests"].as_array().unwrap().len(), 1);
        assert_eq!(json["requests"][0]["url"], "/a");
        assert_eq!(json["requests"][0]["status_code"], 200);
    }

    #[tokio::test]
    async fn test_list_rejects_bad_date() {
        let h = harness();
        let resp = call(&h.state, "GET", "/api/requests?start_date=yesterday", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_detail_views() {
        let h = harness();
        let id = seed(&h.state.store, "/detail", b"{\"a\":1}").await;

        let resp = call(&h.state, "GET", &format!("/api/requests/{id}"), Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_of(resp).await;
        assert_eq!(json["url"], "/detail");
        assert_eq!(json["response_body_size"], 7);
        assert_eq!(json["is_response_body_text"], true);
        assert!(json["response_headers"].is_string());
        assert!(json.get("response_body").is_none());

        let resp = call(&h.state, "GET", "/api/requests/abc", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_of(resp).await, b"Invalid request ID");

        let resp = call(&h.state, "GET", "/api/requests/999", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_body_views() {
        let h = harness();
        let id = seed(&h.state.store, "/body", b"{\"a\":1}").await;

        let resp = call(
            &h.state,
            "GET",
            &format!("/api/requests/body/response/{id}"),
            Body::empty(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(body_of(resp).await, b"{\"a\":1}");

        let resp = call(
            &h.state,
            "GET",
            &format!("/api/requests/body/request/{id}"),
            Body::empty(),
        )
        .await;
        assert_eq!(resp.headers()[header::CONTENT_TYPE], FALLBACK_MEDIA_TYPE);
        assert!(body_of(resp).await.is_empty());

        let resp = call(&h.state, "GET", "/api/requests/body/both/1", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_recording_toggle() {
        let h = harness();

        let resp = call(&h.state, "POST", "/api/stop-recording", Body::empty()).await;
        assert_eq!(json_of(resp).await["status"], "stopped");
        assert!(!h.state.recording.is_recording());

        let resp = call(&h.state, "GET", "/api/recording-status", Body::empty()).await;
        let json = json_of(resp).await;
        assert_eq!(json["status"], "stopped");
        assert_eq!(json["queue"]["capacity"], 4);

        let resp = call(&h.state, "POST", "/api/start-recording", Body::empty()).await;
        assert_eq!(json_of(resp).await["message"], "Recording started");
        assert!(h.state.recording.is_recording());

        let resp = call(&h.state, "GET", "/api/start-recording", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_replay_input_errors() {
        let h = harness();

        let resp = call(&h.state, "POST", "/api/replay", Body::from("{not json")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = call(
            &h.state,
            "POST",
            "/api/replay",
            Body::from(r#"{"method":"GET","url":"/x","surprise":true}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = call(
            &h.state,
            "POST",
            "/api/replay",
            Body::from(r#"{"method":"GET","url":"http://[::1"}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_replay_network_failure_is_generic_500() {
        let h = harness();
        let resp = call(
            &h.state,
            "POST",
            "/api/replay",
            Body::from(r#"{"method":"GET","url":"/unreachable"}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(resp).await, b"Internal server error");
    }

    #[tokio::test]
    async fn test_export_har() {
        let h = harness();
        seed(&h.state.store, "http://x/y", b"{\"a\":1}").await;

        let resp = call(&h.state, "GET", "/api/export/har", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"dgateway-export.har\""
        );
        let json = json_of(resp).await;
        let entries = json["log"]["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["request"]["url"], "http://x/y");
        assert_eq!(entries[0]["response"]["status"], 200);
        assert_eq!(entries[0]["response"]["content"]["text"], "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let resp = call(&h.state, "GET", "/health", Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_of(resp).await["status"], "recording");
    }
}
