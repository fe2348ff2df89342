//! REST API handlers

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use ipcam_core::device::status;
use ipcam_core::{AttrMap, DeviceId, OutputKind, RegistryError, DEFAULT_OUTPUT_INSTANCE};
use ipcam_poller::{handle_config_change, OverlapPolicy, PollError};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn not_found() -> axum::response::Response {
    (StatusCode::NOT_FOUND, Json(ApiError::new("Device not found"))).into_response()
}

/// List all cameras (secrets redacted)
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.discover_all())
}

/// Get a specific camera by ID
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.discovery(&DeviceId::new(id)) {
        Some(device) => Json(device).into_response(),
        None => not_found(),
    }
}

/// Content type of an image payload, from its magic bytes
fn image_content_type(payload: &[u8]) -> &'static str {
    if payload.starts_with(&[0xff, 0xd8, 0xff]) {
        "image/jpeg"
    } else if payload.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else {
        "application/octet-stream"
    }
}

/// Last published image of a camera, as raw bytes
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = DeviceId::new(id);
    if state.registry.discovery(&id).is_none() {
        return not_found();
    }
    match state
        .registry
        .output_raw(&id, OutputKind::Image, DEFAULT_OUTPUT_INSTANCE)
    {
        Some(image) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, image_content_type(&image))],
            image.to_vec(),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("No image published yet")),
        )
            .into_response(),
    }
}

/// Latency of the last successful poll
pub async fn get_latency(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = DeviceId::new(id);
    if state.registry.discovery(&id).is_none() {
        return not_found();
    }
    let latency = state
        .registry
        .output_value(&id, OutputKind::Latency, DEFAULT_OUTPUT_INSTANCE);
    Json(serde_json::json!({
        "device_id": id,
        "latency_msec": latency,
    }))
    .into_response()
}

/// Attribute values from a JSON body. Numbers and booleans become their text form.
fn attr_values(body: BTreeMap<String, Value>) -> Result<AttrMap, String> {
    body.into_iter()
        .map(|(name, value)| match value {
            Value::String(text) => Ok((name, text)),
            Value::Number(number) => Ok((name, number.to_string())),
            Value::Bool(flag) => Ok((name, flag.to_string())),
            other => Err(format!(
                "Attribute '{}' must be a string, number or boolean, got {}",
                name, other
            )),
        })
        .collect()
}

/// Apply a configuration change to a camera
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<BTreeMap<String, Value>>,
) -> impl IntoResponse {
    let id = DeviceId::new(id);
    let attrs = match attr_values(body) {
        Ok(attrs) => attrs,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ApiError::new(e))).into_response(),
    };
    match handle_config_change(&*state.registry, &id, attrs) {
        Ok(accepted) => Json(accepted).into_response(),
        Err(RegistryError::UnknownDevice(_)) => not_found(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(ApiError::new(e.to_string()))).into_response(),
    }
}

/// Poll a camera now, outside its schedule
pub async fn poll_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = DeviceId::new(id);
    if state.registry.discovery(&id).is_none() {
        return not_found();
    }

    // Held until the poll completes so the scheduler skips this camera meanwhile
    let _guard = match state.config.poller.scheduler.overlap {
        OverlapPolicy::Allow => None,
        OverlapPolicy::Skip => match state.poller.in_flight().try_begin(&id) {
            Some(guard) => Some(guard),
            None => {
                return (
                    StatusCode::CONFLICT,
                    Json(ApiError::new("Poll already in progress")),
                )
                    .into_response()
            }
        },
    };

    info!(device = %id, "Manual poll requested");

    let latency = || state.registry.status_value(&id, status::LATENCY_MSEC);
    match state.poller.poll_camera(&id).await {
        Ok(image) => Json(serde_json::json!({
            "status": "ready",
            "size": image.len(),
            "latency_msec": latency(),
        }))
        .into_response(),
        Err(e @ PollError::Save { .. }) => Json(serde_json::json!({
            "status": "ready",
            "size": e.image().map_or(0, <[u8]>::len),
            "latency_msec": latency(),
            "save_error": e.to_string(),
        }))
        .into_response(),
        Err(e @ PollError::Fetch { .. }) => (
            StatusCode::BAD_GATEWAY,
            Json(ApiError::new(e.to_string())),
        )
            .into_response(),
    }
}

/// Get current configuration with camera credentials masked
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.redacted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraConfig, Config};
    use crate::server::router;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use ipcam_core::{CameraRegistry, RunState};
    use ipcam_core::device::attr;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const JPEG: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00api-test\xff\xd9";

    /// Serves `/cam.jpg` and `/slow.jpg` (one second delay)
    async fn camera_server() -> String {
        let app = Router::new()
            .route("/cam.jpg", get(|| async { JPEG }))
            .route(
                "/slow.jpg",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    JPEG
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn state(url: &str, dir: &TempDir) -> Arc<AppState> {
        let mut config = Config::default();
        config.poller.image_folder = dir.path().display().to_string();
        config.poller.fetch_timeout_secs = 5;
        config.cameras.insert(
            "Kelowna".to_string(),
            CameraConfig {
                url: url.to_string(),
                login: Some("viewer".to_string()),
                password: Some("s3cret".to_string()),
                poll_interval: 30,
                description: "Kelowna bridge".to_string(),
                filename: Some("kelowna-snapshot.jpg".to_string()),
            },
        );
        AppState::new(config).unwrap()
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, json: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    #[test]
    fn test_image_content_type() {
        assert_eq!(image_content_type(JPEG), "image/jpeg");
        assert_eq!(image_content_type(b"\x89PNG\r\n\x1a\n...."), "image/png");
        assert_eq!(image_content_type(b"GIF89a"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_list_devices_hides_credentials() {
        let dir = TempDir::new().unwrap();
        let state = state("http://host/kelowna.jpg", &dir);

        let (status, body) = send(&state, get_req("/api/devices")).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("Kelowna"));
        assert!(!text.contains("s3cret"));
        assert!(!text.contains("viewer"));

        let (status, body) = send(&state, get_req("/api/config")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!String::from_utf8(body).unwrap().contains("s3cret"));
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let dir = TempDir::new().unwrap();
        let state = state("http://host/kelowna.jpg", &dir);

        let (status, _) = send(&state, get_req("/api/devices/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&state, post_json("/api/devices/nope/config", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&state, post_json("/api/devices/nope/poll", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_config_change() {
        let dir = TempDir::new().unwrap();
        let state = state("http://host/kelowna.jpg", &dir);
        let id = DeviceId::from("Kelowna");

        let (status, body) = send(
            &state,
            post_json("/api/devices/Kelowna/config", serde_json::json!({ "poll_interval": "654" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let accepted: AttrMap = serde_json::from_slice(&body).unwrap();
        assert_eq!(accepted.get(attr::POLL_INTERVAL).map(String::as_str), Some("654"));
        assert_eq!(state.registry.get_device_config_int(&id, attr::POLL_INTERVAL, 600), 654);

        let (status, _) = send(
            &state,
            post_json("/api/devices/Kelowna/config", serde_json::json!({ "poll_interval": "later" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.registry.get_device_config_int(&id, attr::POLL_INTERVAL, 600), 654);
    }

    #[tokio::test]
    async fn test_config_change_accepts_numbers() {
        let dir = TempDir::new().unwrap();
        let state = state("http://host/kelowna.jpg", &dir);
        let id = DeviceId::from("Kelowna");

        let (status, body) = send(
            &state,
            post_json("/api/devices/Kelowna/config", serde_json::json!({ "poll_interval": 33 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let accepted: AttrMap = serde_json::from_slice(&body).unwrap();
        assert_eq!(accepted.get(attr::POLL_INTERVAL).map(String::as_str), Some("33"));
        assert_eq!(state.registry.get_device_config_int(&id, attr::POLL_INTERVAL, 600), 33);

        let (status, body) = send(
            &state,
            post_json("/api/devices/Kelowna/config", serde_json::json!({ "poll_interval": [60] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8(body).unwrap().contains("poll_interval"));
        assert_eq!(state.registry.get_device_config_int(&id, attr::POLL_INTERVAL, 600), 33);
    }

    #[tokio::test]
    async fn test_manual_poll_conflicts_while_in_flight() {
        let url = format!("{}/slow.jpg", camera_server().await);
        let dir = TempDir::new().unwrap();
        let state = state(&url, &dir);
        let id = DeviceId::from("Kelowna");

        let first = {
            let state = state.clone();
            tokio::spawn(async move {
                send(&state, post_json("/api/devices/Kelowna/poll", serde_json::json!({}))).await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(state.poller.in_flight().contains(&id));

        let (status, _) = send(&state, post_json("/api/devices/Kelowna/poll", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(state.poller.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_poll_then_fetch_image() {
        let url = format!("{}/cam.jpg", camera_server().await);
        let dir = TempDir::new().unwrap();
        let state = state(&url, &dir);

        let (status, _) = send(&state, get_req("/api/devices/Kelowna/image")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&state, post_json("/api/devices/Kelowna/poll", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["size"], JPEG.len());

        let response = router(state.clone())
            .oneshot(get_req("/api/devices/Kelowna/image"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], JPEG);

        let (status, body) = send(&state, get_req("/api/devices/Kelowna/latency")).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["latency_msec"].is_string());

        assert_eq!(std::fs::read(dir.path().join("kelowna-snapshot.jpg")).unwrap(), JPEG);
    }

    #[tokio::test]
    async fn test_poll_failure_reports_bad_gateway() {
        let dir = TempDir::new().unwrap();
        let state = state("http://127.0.0.1:1/badurl.jpg", &dir);

        let (status, body) = send(&state, post_json("/api/devices/Kelowna/poll", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(String::from_utf8(body).unwrap().contains("Unable to get image from camera Kelowna"));
        assert_eq!(
            state.registry.run_state(&DeviceId::from("Kelowna")).unwrap().0,
            RunState::Error
        );
    }
}
