use axum::{
    Router,
    body::Body,
    extract::{OriginalUri, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, info};

use crate::registry::RegistryHandle;

/// Routes `GET|HEAD /stream/{*path}`
pub fn stream_router(registry: RegistryHandle) -> Router {
    Router::new()
        .route("/stream/{*path}", get(stream_handler))
        .with_state(registry)
}

async fn stream_handler(
    State(registry): State<RegistryHandle>,
    method: Method,
    OriginalUri(uri): OriginalUri,
) -> Response {
    let path = uri.path();

    let Some(hub) = registry.open_stream(path).await else {
        debug!("No bridge serving {}", path);
        return StatusCode::NOT_FOUND.into_response();
    };

    let headers = [
        (header::CONTENT_TYPE, hub.mime_type().to_string()),
        (header::CACHE_CONTROL, "no-cache".to_string()),
        (
            header::HeaderName::from_static("transfermode.dlna.org"),
            "Streaming".to_string(),
        ),
    ];

    // Certains renderers sondent l'URL avant de la lire
    if method == Method::HEAD {
        return (StatusCode::OK, headers).into_response();
    }

    match hub.attach() {
        Ok(reader) => {
            info!("📡 Client connected to {}", path);
            (StatusCode::OK, headers, Body::from_stream(reader.into_stream())).into_response()
        }
        Err(e) => {
            debug!("Stream {} unavailable: {}", path, e);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
