//! Argus service entry point: configuration, tracing, observer, HTTP server.

mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use argus_core::api::ApiServer;
use argus_core::config::Config;
use argus_core::driver::InfoDriverFactory;
use argus_core::observer::Observer;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, reload_handle) = tracing_subscriber::reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(config = %cli.config.display(), error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(bind) = cli.bind {
        config.service.bind = bind;
    }
    if let Err(err) = config.validate() {
        error!(error = %err, "invalid configuration");
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting argus");

    let observer = Observer::new(config, Arc::new(InfoDriverFactory));
    observer.register_config_clusters().await;
    let scheduler = observer.start();

    // The global debug switch swaps the log filter at runtime.
    let mut debug_rx = observer.debug_changes();
    tokio::spawn(async move {
        while debug_rx.changed().await.is_ok() {
            let directive = if *debug_rx.borrow() { "debug" } else { "info" };
            if let Err(err) = reload_handle.reload(EnvFilter::new(directive)) {
                error!(error = %err, "failed to swap log filter");
            }
        }
    });

    let server = ApiServer::new(Arc::clone(&observer));
    tokio::select! {
        result = server.serve() => {
            if let Err(err) = result {
                error!(error = %err, "http server failed");
                observer.shutdown();
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    observer.shutdown();
    let _ = scheduler.await;
}
