//! Namespace, set, storage, and secondary-index endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::client::IndexType;
use crate::error::ArgusError;

use super::{handle_error, json_error, ok, resolve_cluster, split_list, AppState, ApiResult};

pub async fn get_namespaces(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "namespaces": cluster.namespace_list(),
    })))
}

pub async fn get_namespace_info(
    State(state): State<AppState>,
    Path((cluster_id, namespaces)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "namespaces": cluster.namespace_info(&split_list(&namespaces)),
    })))
}

pub async fn get_namespace_nodes(
    State(state): State<AppState>,
    Path((cluster_id, namespace, nodes)): Path<(String, String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "nodes": cluster.namespace_info_per_node(&namespace, &split_list(&nodes)),
    })))
}

pub async fn get_namespace_node_allstats(
    State(state): State<AppState>,
    Path((cluster_id, namespace, node)): Path<(String, String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let node = cluster.find_node_by_address(&node).ok_or_else(|| {
        handle_error(ArgusError::NotFound {
            resource: format!("node {}", node),
        })
    })?;
    let ns = node.namespace(&namespace).ok_or_else(|| {
        json_error(
            StatusCode::NOT_FOUND,
            format!("namespace {} not found on node", namespace),
        )
    })?;
    Ok(Json(json!({
        "status": "success",
        "node_status": node.status().as_str(),
        "stats": ns.stats,
    })))
}

pub async fn get_sets(
    State(state): State<AppState>,
    Path((cluster_id, namespace)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "sets": cluster.namespace_sets_info(&namespace),
    })))
}

pub async fn get_storage(
    State(state): State<AppState>,
    Path((cluster_id, namespace)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "storage": cluster.namespace_device_info(&namespace),
    })))
}

pub async fn get_sindexes(
    State(state): State<AppState>,
    Path((cluster_id, namespace)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let indexes = cluster.namespace_index_info(&namespace);
    Ok(Json(json!({
        "status": "success",
        "indexes": indexes.values().collect::<Vec<_>>(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct AddIndexRequest {
    pub set_name: String,
    pub index_name: String,
    pub bin_name: String,
    #[serde(rename = "type")]
    pub index_type: String,
}

pub async fn add_sindex(
    State(state): State<AppState>,
    Path((cluster_id, namespace)): Path<(String, String)>,
    Json(body): Json<AddIndexRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let index_type: IndexType = body.index_type.parse().map_err(handle_error)?;
    cluster
        .create_index(
            &namespace,
            &body.set_name,
            &body.index_name,
            &body.bin_name,
            index_type,
        )
        .await
        .map_err(handle_error)?;
    Ok(ok())
}

pub async fn drop_sindex(
    State(state): State<AppState>,
    Path((cluster_id, namespace, index)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let set_name = params.get("set").cloned().unwrap_or_default();
    cluster
        .drop_index(&namespace, &set_name, &index)
        .await
        .map_err(handle_error)?;
    Ok(ok())
}
