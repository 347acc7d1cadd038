//! Backup and restore endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;

use crate::backup::{BackupParams, RestoreParams};

use super::{handle_error, json_error, resolve_cluster, AppState, ApiResult};

#[derive(Debug, Deserialize)]
pub struct InitiateBackupRequest {
    pub namespace: String,
    pub destination_address: String,
    pub destination_path: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub sets: String,
    #[serde(default)]
    pub metadata_only: bool,
    #[serde(default)]
    pub terminate_on_change: bool,
    #[serde(default = "default_scan_priority")]
    pub scan_priority: i32,
}

fn default_scan_priority() -> i32 {
    2
}

pub async fn initiate_backup(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Json(body): Json<InitiateBackupRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let backup = cluster
        .start_backup(BackupParams {
            namespace: body.namespace,
            destination_address: body.destination_address,
            destination_path: body.destination_path,
            username: body.username,
            password: body.password,
            sets: body.sets,
            metadata_only: body.metadata_only,
            terminate_on_change: body.terminate_on_change,
            scan_priority: body.scan_priority,
        })
        .await
        .map_err(handle_error)?;
    Ok(Json(json!({"status": "success", "backup": backup.record()})))
}

pub async fn get_backup_progress(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    match cluster.current_backup() {
        Some(backup) => Ok(Json(json!({"status": "success", "backup": backup.record()}))),
        None => Err(json_error(StatusCode::NOT_FOUND, "no backup has been started")),
    }
}

pub async fn get_successful_backups(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let records = state
        .observer
        .transfer_store()
        .successful_backups(&cluster.id())
        .await
        .map_err(handle_error)?;
    Ok(Json(json!({"status": "success", "backups": records})))
}

#[derive(Debug, Deserialize)]
pub struct InitiateRestoreRequest {
    pub namespace: String,
    pub destination_address: String,
    pub destination_path: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub missing_records_only: bool,
    #[serde(default)]
    pub ignore_generation_num: bool,
}

fn default_threads() -> usize {
    4
}

pub async fn initiate_restore(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Json(body): Json<InitiateRestoreRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let restore = cluster
        .start_restore(RestoreParams {
            namespace: body.namespace,
            destination_address: body.destination_address,
            destination_path: body.destination_path,
            username: body.username,
            password: body.password,
            threads: body.threads,
            missing_records_only: body.missing_records_only,
            ignore_generation_num: body.ignore_generation_num,
        })
        .await
        .map_err(handle_error)?;
    Ok(Json(json!({"status": "success", "restore": restore.record()})))
}

pub async fn get_restore_progress(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    match cluster.current_restore() {
        Some(restore) => Ok(Json(json!({"status": "success", "restore": restore.record()}))),
        None => Err(json_error(StatusCode::NOT_FOUND, "no restore has been started")),
    }
}
