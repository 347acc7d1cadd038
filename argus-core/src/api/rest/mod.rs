//! REST endpoint implementations.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::{json, Value};

use crate::cluster::Cluster;
use crate::error::ArgusError;
use crate::observer::Observer;

pub mod backup;
pub mod cluster;
pub mod debug;
pub mod namespace;
pub mod node;
pub mod session;
pub mod user;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub observer: Arc<Observer>,
}

/// Standard handler result: a JSON body or a status + JSON error.
pub type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

pub(crate) fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({"status": "failure", "error": message.into()})),
    )
}

/// Map core errors onto HTTP statuses.
pub(crate) fn handle_error(err: ArgusError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        ArgusError::Validation { .. } | ArgusError::UnsupportedVersion { .. } => {
            StatusCode::BAD_REQUEST
        }
        ArgusError::NotFound { .. } => StatusCode::NOT_FOUND,
        ArgusError::NotSupported { .. } => StatusCode::NOT_IMPLEMENTED,
        ArgusError::Connection { .. } | ArgusError::Timeout { .. } | ArgusError::Partial { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, err.to_string())
}

/// Resolve a cluster id or produce the standard 404.
pub(crate) fn resolve_cluster(
    state: &AppState,
    id: &str,
) -> Result<Arc<Cluster>, (StatusCode, Json<Value>)> {
    state
        .observer
        .find_by_id(id)
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "Cluster not found"))
}

/// Success envelope used by mutating endpoints.
pub(crate) fn ok() -> Json<Value> {
    Json(json!({"status": "success"}))
}

/// Split a `,`-separated path segment into owned values.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Assemble the `/api/v1` router.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/version", get(debug::get_version))
        .route("/debug", get(debug::get_debug).post(debug::post_debug))
        .route("/sessions", post(session::create_session))
        .route(
            "/sessions/:sid",
            get(session::get_session_clusters).delete(session::terminate_session),
        )
        .route("/sessions/:sid/clusters", post(session::connect_cluster))
        .route(
            "/sessions/:sid/clusters/:cluster",
            delete(session::logout_cluster),
        )
        .route(
            "/sessions/:sid/multicluster-view",
            get(session::get_multicluster_view),
        )
        .route("/clusters/:cluster", get(cluster::get_cluster))
        .route("/clusters/:cluster/basic", get(cluster::get_basic))
        .route(
            "/clusters/:cluster/update-interval",
            post(cluster::set_update_interval),
        )
        .route("/clusters/:cluster/alias", post(cluster::set_alias))
        .route("/clusters/:cluster/throughput", get(cluster::get_throughput))
        .route(
            "/clusters/:cluster/throughput_history",
            get(cluster::get_throughput_history),
        )
        .route(
            "/clusters/:cluster/latency/:nodes",
            get(cluster::get_latency),
        )
        .route(
            "/clusters/:cluster/latency_history/:nodes",
            get(cluster::get_latency_history),
        )
        .route("/clusters/:cluster/alerts", get(cluster::get_alerts))
        .route("/clusters/:cluster/fire_cmd", post(cluster::fire_command))
        .route("/clusters/:cluster/jobs", get(cluster::get_jobs))
        .route(
            "/clusters/:cluster/jobs/nodes/:node",
            get(cluster::get_node_jobs),
        )
        .route(
            "/clusters/:cluster/nodes",
            post(node::add_node),
        )
        .route("/clusters/:cluster/nodes/:nodes", get(node::get_nodes))
        .route(
            "/clusters/:cluster/nodes/:nodes/remove",
            post(node::remove_node),
        )
        .route(
            "/clusters/:cluster/nodes/:nodes/allstats",
            get(node::get_node_allstats),
        )
        .route(
            "/clusters/:cluster/nodes/:nodes/allconfig",
            get(node::get_node_allconfig),
        )
        .route(
            "/clusters/:cluster/nodes/:nodes/setconfig",
            post(node::set_node_config),
        )
        .route("/clusters/:cluster/namespaces", get(namespace::get_namespaces))
        .route(
            "/clusters/:cluster/namespaces/:namespace",
            get(namespace::get_namespace_info),
        )
        .route(
            "/clusters/:cluster/namespaces/:namespace/nodes/:nodes",
            get(namespace::get_namespace_nodes),
        )
        .route(
            "/clusters/:cluster/namespaces/:namespace/nodes/:nodes/allstats",
            get(namespace::get_namespace_node_allstats),
        )
        .route(
            "/clusters/:cluster/namespaces/:namespace/sets",
            get(namespace::get_sets),
        )
        .route(
            "/clusters/:cluster/namespaces/:namespace/storage",
            get(namespace::get_storage),
        )
        .route(
            "/clusters/:cluster/namespaces/:namespace/sindexes",
            get(namespace::get_sindexes).post(namespace::add_sindex),
        )
        .route(
            "/clusters/:cluster/namespaces/:namespace/sindexes/:index/drop",
            post(namespace::drop_sindex),
        )
        .route(
            "/clusters/:cluster/udfs",
            get(cluster::get_udfs).post(cluster::add_udf),
        )
        .route("/clusters/:cluster/udfs/:name/drop", post(cluster::drop_udf))
        .route(
            "/clusters/:cluster/users",
            get(user::get_users).post(user::create_user),
        )
        .route("/clusters/:cluster/users/:user/remove", post(user::drop_user))
        .route("/clusters/:cluster/users/:user/roles", post(user::update_user_roles))
        .route(
            "/clusters/:cluster/users/:user/password",
            post(user::change_user_password),
        )
        .route(
            "/clusters/:cluster/change_password",
            post(user::change_password),
        )
        .route("/clusters/:cluster/current_user", get(user::get_current_user))
        .route(
            "/clusters/:cluster/roles",
            get(user::get_roles).post(user::create_role),
        )
        .route("/clusters/:cluster/roles/:role/drop", post(user::drop_role))
        .route(
            "/clusters/:cluster/roles/:role/privileges",
            post(user::update_role_privileges),
        )
        .route(
            "/clusters/:cluster/backups",
            get(backup::get_successful_backups).post(backup::initiate_backup),
        )
        .route(
            "/clusters/:cluster/backups/progress",
            get(backup::get_backup_progress),
        )
        .route("/clusters/:cluster/restores", post(backup::initiate_restore))
        .route(
            "/clusters/:cluster/restores/progress",
            get(backup::get_restore_progress),
        )
        .with_state(state)
}
