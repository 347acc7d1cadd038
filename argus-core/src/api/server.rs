//! HTTP server assembly: router, middleware, static files, TLS.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_http::validate_request::ValidateRequestHeaderLayer;
use tracing::info;

use crate::error::{ArgusError, ArgusResult};
use crate::observer::Observer;

use super::rest::{create_api_router, AppState};

/// The session-authenticated HTTP front end.
pub struct ApiServer {
    observer: Arc<Observer>,
}

impl ApiServer {
    pub fn new(observer: Arc<Observer>) -> ApiServer {
        ApiServer { observer }
    }

    /// Build the full application router.
    pub fn router(&self) -> Router {
        let config = self.observer.config().clone();
        let state = AppState {
            observer: Arc::clone(&self.observer),
        };

        let mut app = Router::new()
            .nest("/api/v1", create_api_router(state))
            .route("/health", get(health));

        if !config.service.static_path.is_empty() {
            app = app.fallback_service(ServeDir::new(&config.service.static_path));
        }

        if config.basic_auth.is_enabled() {
            app = app.layer(ValidateRequestHeaderLayer::basic(
                &config.basic_auth.user,
                &config.basic_auth.password,
            ));
        }

        app.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new()),
        )
    }

    /// Bind and serve until the process exits. Bind failures are fatal.
    pub async fn serve(self) -> ArgusResult<()> {
        let config = self.observer.config().clone();
        let addr: SocketAddr =
            config
                .service
                .bind
                .parse()
                .map_err(|_| ArgusError::Config {
                    message: format!("invalid bind address '{}'", config.service.bind),
                })?;

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        if !config.service.cert_file.is_empty() {
            info!(%addr, "serving HTTPS");
            let tls = RustlsConfig::from_pem_file(&config.service.cert_file, &config.service.key_file)
                .await
                .map_err(|err| ArgusError::Config {
                    message: format!("failed to load TLS key pair: {}", err),
                })?;
            axum_server::bind_rustls(addr, tls)
                .serve(app)
                .await
                .map_err(|err| ArgusError::io("serve https", err))
        } else {
            info!(%addr, "serving HTTP");
            axum_server::bind(addr)
                .serve(app)
                .await
                .map_err(|err| ArgusError::io("serve http", err))
        }
    }
}

async fn health() -> &'static str {
    "OK\n"
}
