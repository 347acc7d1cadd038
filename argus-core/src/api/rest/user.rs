//! User and role administration endpoints.

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;

use crate::client::Privilege;

use super::{handle_error, ok, resolve_cluster, AppState, ApiResult};

pub async fn get_users(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({"status": "success", "users": cluster.users()})))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Json(body): Json<CreateUserRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster
        .create_user(&body.user, &body.password, &body.roles)
        .await
        .map_err(handle_error)?;
    Ok(ok())
}

pub async fn drop_user(
    State(state): State<AppState>,
    Path((cluster_id, user)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster.drop_user(&user).await.map_err(handle_error)?;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct UpdateRolesRequest {
    #[serde(default)]
    pub grant: Vec<String>,
    #[serde(default)]
    pub revoke: Vec<String>,
}

pub async fn update_user_roles(
    State(state): State<AppState>,
    Path((cluster_id, user)): Path<(String, String)>,
    Json(body): Json<UpdateRolesRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    if !body.grant.is_empty() {
        cluster
            .grant_roles(&user, &body.grant)
            .await
            .map_err(handle_error)?;
    }
    if !body.revoke.is_empty() {
        cluster
            .revoke_roles(&user, &body.revoke)
            .await
            .map_err(handle_error)?;
    }
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct UserPasswordRequest {
    pub password: String,
}

pub async fn change_user_password(
    State(state): State<AppState>,
    Path((cluster_id, user)): Path<(String, String)>,
    Json(body): Json<UserPasswordRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster
        .change_user_password(&user, &body.password)
        .await
        .map_err(handle_error)?;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub user: String,
    pub old_password: String,
    pub new_password: String,
}

/// Change the monitoring user's own password.
pub async fn change_password(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Json(body): Json<ChangePasswordRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster
        .update_password(&body.user, &body.old_password, &body.new_password)
        .await
        .map_err(handle_error)?;
    Ok(ok())
}

pub async fn get_current_user(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "user": cluster.user(),
        "privileges": cluster.current_user_privileges(),
    })))
}

pub async fn get_roles(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    Ok(Json(json!({
        "status": "success",
        "roles": cluster.roles(),
        "role_names": cluster.role_names(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub role: String,
    #[serde(default)]
    pub privileges: Vec<Privilege>,
}

pub async fn create_role(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Json(body): Json<CreateRoleRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster
        .create_role(&body.role, &body.privileges)
        .await
        .map_err(handle_error)?;
    Ok(ok())
}

pub async fn drop_role(
    State(state): State<AppState>,
    Path((cluster_id, role)): Path<(String, String)>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    cluster.drop_role(&role).await.map_err(handle_error)?;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct UpdatePrivilegesRequest {
    #[serde(default)]
    pub grant: Vec<Privilege>,
    #[serde(default)]
    pub revoke: Vec<Privilege>,
}

pub async fn update_role_privileges(
    State(state): State<AppState>,
    Path((cluster_id, role)): Path<(String, String)>,
    Json(body): Json<UpdatePrivilegesRequest>,
) -> ApiResult {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    if !body.grant.is_empty() {
        cluster
            .add_privileges(&role, &body.grant)
            .await
            .map_err(handle_error)?;
    }
    if !body.revoke.is_empty() {
        cluster
            .remove_privileges(&role, &body.revoke)
            .await
            .map_err(handle_error)?;
    }
    Ok(ok())
}
