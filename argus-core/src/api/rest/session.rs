//! Session endpoints: creation, cluster binding, teardown.

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;

use crate::client::HostAddr;
use crate::observer::RegisterRequest;

use super::{handle_error, ok, AppState, ApiResult};

pub async fn create_session(State(state): State<AppState>) -> ApiResult {
    let session_id = state.observer.new_session();
    Ok(Json(json!({"status": "success", "session_id": session_id})))
}

pub async fn get_session_clusters(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> ApiResult {
    let clusters = state
        .observer
        .clusters_for_session(&sid)
        .map_err(handle_error)?;
    let entries: Vec<_> = clusters
        .iter()
        .map(|cluster| {
            json!({
                "cluster_id": cluster.id(),
                "cluster_name": cluster.alias(),
                "seed_address": cluster.seed_address(),
                "status": cluster.status(),
                "update_interval": cluster.update_interval(),
                "permanent": cluster.is_permanent(),
            })
        })
        .collect();
    Ok(Json(json!({"status": "success", "clusters": entries})))
}

pub async fn terminate_session(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> ApiResult {
    state.observer.remove_session(&sid);
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub seeds: Vec<String>,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// Register a cluster (or reuse an equivalent one) and bind it to the
/// session.
pub async fn connect_cluster(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Json(body): Json<ConnectRequest>,
) -> ApiResult {
    let mut seeds = Vec::with_capacity(body.seeds.len());
    for raw in &body.seeds {
        let addr: HostAddr = raw.parse().map_err(handle_error)?;
        seeds.push(addr);
    }

    let request = RegisterRequest {
        seeds,
        alias: (!body.alias.is_empty()).then(|| body.alias.clone()),
        user: (!body.user.is_empty()).then(|| body.user.clone()),
        password: (!body.password.is_empty()).then(|| body.password.clone()),
        permanent: false,
    };
    let cluster = state.observer.register(request).await.map_err(handle_error)?;
    state.observer.append_cluster_for_session(&sid, &cluster.id());

    Ok(Json(json!({
        "status": "success",
        "cluster_id": cluster.id(),
        "cluster_name": cluster.alias(),
    })))
}

pub async fn logout_cluster(
    State(state): State<AppState>,
    Path((sid, cluster_id)): Path<(String, String)>,
) -> ApiResult {
    state.observer.remove_cluster_from_session(&sid, &cluster_id);
    Ok(ok())
}

pub async fn get_multicluster_view(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> ApiResult {
    let view = state
        .observer
        .multi_cluster_view(&sid)
        .map_err(handle_error)?;
    Ok(Json(json!({"status": "success", "data": view})))
}
