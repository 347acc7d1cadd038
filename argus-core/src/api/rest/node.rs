//! Node-level endpoints.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;

use crate::stats::Stats;

use super::{handle_error, ok, resolve_cluster, split_list, AppState, ApiResult};

#[derive(Debug, Deserialize)]
pub struct AddNodeRequest {
    pub address: String,
    pub port: u16,
}

pub async fn add_node(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Json(body): Json<AddNodeRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster
        .add_node(&body.address, body.port)
        .map_err(handle_error)?;
    Ok(ok())
}

pub async fn remove_node(
    State(state): State<AppState>,
    Path((cluster_id, node)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster.remove_node_by_address(&node).map_err(handle_error)?;
    Ok(ok())
}

/// Details for a comma-separated list of node addresses; unknown nodes are
/// reported off rather than failing the whole request.
pub async fn get_nodes(
    State(state): State<AppState>,
    Path((cluster_id, nodes)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let mut details = Stats::new();
    for address in split_list(&nodes) {
        match cluster.find_node_by_address(&address) {
            Some(node) => details.insert(address, node.details()),
            None => details.insert(address, crate::stats! {"node_status" => "off"}),
        }
    }
    Ok(Json(json!({"status": "success", "nodes": details})))
}

pub async fn get_node_allstats(
    State(state): State<AppState>,
    Path((cluster_id, node)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let node = cluster
        .find_node_by_address(&node)
        .ok_or_else(|| handle_error(crate::error::ArgusError::NotFound {
            resource: format!("node {}", node),
        }))?;
    Ok(Json(json!({
        "status": "success",
        "node_status": node.status().as_str(),
        "stats": node.all_stats(),
    })))
}

pub async fn get_node_allconfig(
    State(state): State<AppState>,
    Path((cluster_id, node)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let node = cluster
        .find_node_by_address(&node)
        .ok_or_else(|| handle_error(crate::error::ArgusError::NotFound {
            resource: format!("node {}", node),
        }))?;
    Ok(Json(json!({
        "status": "success",
        "config": node.all_config(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    #[serde(default = "default_context")]
    pub context: String,
    pub params: HashMap<String, String>,
}

fn default_context() -> String {
    "service".to_owned()
}

/// Apply config parameters to a comma-separated list of nodes. Per-node
/// outcomes are reported individually.
pub async fn set_node_config(
    State(state): State<AppState>,
    Path((cluster_id, nodes)): Path<(String, String)>,
    Json(body): Json<SetConfigRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let params: Vec<(String, String)> = body.params.into_iter().collect();

    let mut results = Stats::new();
    for address in split_list(&nodes) {
        let Some(node) = cluster.find_node_by_address(&address) else {
            results.insert(address, crate::stats! {"node_status" => "off"});
            continue;
        };
        match node.set_config(&body.context, &params).await {
            Ok(outcome) => results.insert(address, outcome),
            Err(err) => results.insert(address, crate::stats! {"error" => err.to_string()}),
        }
    }
    Ok(Json(json!({"status": "success", "result": results})))
}
