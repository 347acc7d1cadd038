//! Service metadata and the global debug switch.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;

use super::{json_error, AppState, ApiResult};

pub async fn get_version(State(_state): State<AppState>) -> ApiResult {
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": env!("CARGO_PKG_NAME"),
    })))
}

pub async fn get_debug(State(state): State<AppState>) -> ApiResult {
    let status = state.observer.debug_status();
    Ok(Json(json!({
        "status": "success",
        "debugging": if status.on { "ON" } else { "OFF" },
        "debug": status,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DebugRequest {
    pub service: String,
    #[serde(default = "default_duration_mins")]
    pub duration_mins: u64,
}

fn default_duration_mins() -> u64 {
    10
}

/// Start, restart, or stop verbose logging, attributed to the caller.
pub async fn post_debug(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<DebugRequest>,
) -> ApiResult {
    let status = match body.service.as_str() {
        "start" | "restart" => state
            .observer
            .start_debug(&peer.to_string(), Duration::from_secs(body.duration_mins * 60)),
        "stop" => state.observer.stop_debug(),
        other => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                format!("unknown debug action '{}'", other),
            ))
        }
    };
    Ok(Json(json!({
        "status": "success",
        "debugging": if status.on { "ON" } else { "OFF" },
        "debug": status,
        "service": body.service,
    })))
}
