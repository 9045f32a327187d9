use autoflow_catalog::Catalog;
use autoflow_server::{api, config::ServerConfig, executor::DryRunExecutor};
use autoflow_workflow::{Runner, WorkflowService};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load(path),
        None => Catalog::builtin(),
    }
    .expect("failed to load integration catalog");
    tracing::info!(
        version = catalog.version(),
        definitions = catalog.len(),
        "Integration catalog ready"
    );

    let runner = Runner::new(Arc::new(DryRunExecutor))
        .with_default_timeout(config.runner.default_step_timeout());
    let service = Arc::new(
        WorkflowService::new(Arc::new(catalog), runner)
            .with_max_retained_runs(config.runner.max_retained_runs),
    );

    let app = api::router(service)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
