//! Cluster-level read and control endpoints.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;

use super::{handle_error, ok, resolve_cluster, split_list, AppState, ApiResult};

pub async fn get_cluster(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({"status": "success", "cluster": cluster.overview()})))
}

pub async fn get_basic(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "cluster_status": cluster.status(),
        "cluster_name": cluster.alias(),
        "seed_address": cluster.seed_address(),
        "nodes": cluster.node_list(),
        "namespaces": cluster.namespace_list(),
        "nodes_compatibility": cluster.node_compatibility(),
        "update_interval": cluster.update_interval(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateIntervalRequest {
    pub update_interval: u64,
}

pub async fn set_update_interval(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Json(body): Json<UpdateIntervalRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster.set_update_interval(body.update_interval);
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct AliasRequest {
    #[serde(default)]
    pub alias: String,
}

pub async fn set_alias(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Json(body): Json<AliasRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster.set_alias(&body.alias);
    Ok(ok())
}

pub async fn get_throughput(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "throughput": cluster.latest_throughput(),
    })))
}

fn since_param(params: &HashMap<String, String>) -> Option<i64> {
    params.get("since").and_then(|raw| raw.parse().ok())
}

pub async fn get_throughput_history(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "throughput": cluster.throughput_since(since_param(&params)),
    })))
}

pub async fn get_latency(
    State(state): State<AppState>,
    Path((cluster_id, nodes)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "latency": cluster.latency(&split_list(&nodes)),
    })))
}

pub async fn get_latency_history(
    State(state): State<AppState>,
    Path((cluster_id, nodes)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "latency": cluster.latency_since(&split_list(&nodes), since_param(&params)),
    })))
}

pub async fn get_alerts(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let last_id = params
        .get("last_id")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);
    Ok(Json(json!({
        "status": "success",
        "alerts": cluster.alerts_from(last_id),
    })))
}

#[derive(Debug, Deserialize)]
pub struct FireCommandRequest {
    pub command: String,
}

/// Run one info command against every node; partial failures are surfaced
/// next to the per-node results.
pub async fn fire_command(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Json(body): Json<FireCommandRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let (results, error) = cluster.request_info_all(&body.command).await;
    Ok(Json(json!({
        "status": "success",
        "result": results,
        "error": error,
    })))
}

pub async fn get_jobs(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({"status": "success", "jobs": cluster.jobs()})))
}

pub async fn get_node_jobs(
    State(state): State<AppState>,
    Path((cluster_id, node)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let jobs: Vec<_> = cluster
        .jobs()
        .into_iter()
        .filter(|job| {
            job.get("node")
                .and_then(|v| match v {
                    crate::stats::Value::Map(tag) => Some(tag.try_string("address", "")),
                    _ => None,
                })
                .is_some_and(|addr| addr == node)
        })
        .collect();
    Ok(Json(json!({"status": "success", "jobs": jobs})))
}

pub async fn get_udfs(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let udfs = cluster.udf_list().await.map_err(handle_error)?;
    Ok(Json(json!({"status": "success", "udfs": udfs})))
}

#[derive(Debug, Deserialize)]
pub struct AddUdfRequest {
    pub name: String,
    pub body: String,
}

pub async fn add_udf(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Json(body): Json<AddUdfRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster
        .create_udf(&body.name, &body.body)
        .await
        .map_err(handle_error)?;
    Ok(ok())
}

pub async fn drop_udf(
    State(state): State<AppState>,
    Path((cluster_id, name)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster.drop_udf(&name).await.map_err(handle_error)?;
    Ok(ok())
}
