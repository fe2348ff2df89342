//! Local camera server for tests

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;

pub const TEST_IMAGE: &[u8] = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00test-image\xff\xd9";
pub const TEST_LOGIN: &str = "admin";
pub const TEST_PASSWORD: &str = "secret";
/// `admin:secret`
const TEST_AUTHORIZATION: &str = "Basic YWRtaW46c2VjcmV0";

async fn open_image() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], TEST_IMAGE)
}

async fn private_image(headers: HeaderMap) -> impl IntoResponse {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == TEST_AUTHORIZATION);
    if authorized {
        ([(header::CONTENT_TYPE, "image/jpeg")], TEST_IMAGE).into_response()
    } else {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

async fn slow_image() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(2)).await;
    ([(header::CONTENT_TYPE, "image/jpeg")], TEST_IMAGE)
}

/// Serve `/open.jpg`, `/private.jpg` (basic auth) and `/slow.jpg` on an ephemeral port
pub async fn camera_server() -> SocketAddr {
    let app = Router::new()
        .route("/open.jpg", get(open_image))
        .route("/private.jpg", get(private_image))
        .route("/slow.jpg", get(slow_image));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// URL on a local port nothing listens on
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/x.jpg", port)
}
