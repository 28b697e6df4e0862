//! API JSON de supervision
//!
//! - `GET /api/renderers` : renderers acceptés
//! - `GET /api/bridges` : bridges et URLs de flux
//! - `GET|POST /api/renderers/{udn}/volume` : volume (0-100)
//! - `POST /api/bridges/stop` : ferme un bridge

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::warn;

use crate::bridge::{BridgeId, BridgeSnapshot};
use crate::errors::RegistryError;
use crate::model::{DeviceDescriptor, DeviceId, SinkId};
use crate::registry::RegistryHandle;

const VOLUME_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub volume: u8,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeResponse {
    pub volume: u8,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopBridgeRequest {
    pub sink: String,
    pub device: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn registry_error(e: RegistryError) -> ApiError {
    let status = match &e {
        RegistryError::UnknownDevice(_) | RegistryError::UnknownBridge(_) => StatusCode::NOT_FOUND,
        RegistryError::Control(_) => StatusCode::BAD_GATEWAY,
        RegistryError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    };
    api_error(status, e)
}

fn timed_out(what: &str, udn: &str) -> ApiError {
    warn!("{} for renderer {} exceeded {:?}", what, udn, VOLUME_COMMAND_TIMEOUT);
    api_error(
        StatusCode::GATEWAY_TIMEOUT,
        format!("{} timed out after {}s", what, VOLUME_COMMAND_TIMEOUT.as_secs()),
    )
}

/// Le préfixe `uuid:` est facultatif dans l'URL
fn device_id(udn: &str) -> DeviceId {
    if udn.starts_with("uuid:") {
        DeviceId::new(udn)
    } else {
        DeviceId::new(format!("uuid:{}", udn))
    }
}

pub fn api_router(registry: RegistryHandle) -> Router {
    Router::new()
        .route("/api/renderers", get(list_renderers))
        .route("/api/bridges", get(list_bridges))
        .route("/api/bridges/stop", post(stop_bridge))
        .route(
            "/api/renderers/{udn}/volume",
            get(get_volume).post(set_volume),
        )
        .with_state(registry)
}

async fn list_renderers(State(registry): State<RegistryHandle>) -> Json<Vec<DeviceDescriptor>> {
    Json(registry.list_renderers().await)
}

async fn list_bridges(State(registry): State<RegistryHandle>) -> Json<Vec<BridgeSnapshot>> {
    Json(registry.list_bridges().await)
}

async fn stop_bridge(
    State(registry): State<RegistryHandle>,
    Json(req): Json<StopBridgeRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let id = BridgeId::new(SinkId::new(req.sink), device_id(&req.device));
    let message = format!("Bridge {} stopped", id);
    registry.stop_bridge(id).await.map_err(registry_error)?;
    Ok(Json(SuccessResponse { message }))
}

async fn get_volume(
    State(registry): State<RegistryHandle>,
    Path(udn): Path<String>,
) -> Result<Json<VolumeResponse>, ApiError> {
    let volume = time::timeout(VOLUME_COMMAND_TIMEOUT, registry.get_volume(device_id(&udn)))
        .await
        .map_err(|_| timed_out("Get volume command", &udn))?
        .map_err(registry_error)?;
    Ok(Json(VolumeResponse { volume }))
}

async fn set_volume(
    State(registry): State<RegistryHandle>,
    Path(udn): Path<String>,
    Json(req): Json<VolumeRequest>,
) -> Result<Json<VolumeResponse>, ApiError> {
    if req.volume > 100 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("volume {} is out of range 0-100", req.volume),
        ));
    }

    time::timeout(
        VOLUME_COMMAND_TIMEOUT,
        registry.set_volume(device_id(&udn), req.volume),
    )
    .await
    .map_err(|_| timed_out("Set volume command", &udn))?
    .map_err(registry_error)?;
    Ok(Json(VolumeResponse { volume: req.volume }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_prefix_is_optional() {
        assert_eq!(device_id("tv-1").as_str(), "uuid:tv-1");
        assert_eq!(device_id("uuid:tv-1").as_str(), "uuid:tv-1");
    }

    #[test]
    fn test_registry_errors_map_to_status() {
        assert_eq!(
            registry_error(RegistryError::UnknownDevice("x".into())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            registry_error(RegistryError::Control(
                crate::errors::DeviceControlError::status("GetVolume", 500, "boom")
            ))
            .0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(registry_error(RegistryError::Closed).0, StatusCode::SERVICE_UNAVAILABLE);
    }
}
