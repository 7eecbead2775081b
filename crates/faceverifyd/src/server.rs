use crate::config::Config;
use crate::engine::spawn_engine;
use crate::middleware;
use crate::routes;
use crate::state::{AppState, ServiceConfig};
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use faceverify_core::OnnxEmbedder;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Build the HTTP router over an already-running engine.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/generate-embedding", post(routes::generate_embedding))
        .route("/compare-faces", post(routes::compare_faces))
        .route("/health", get(routes::health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::request_id))
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// Load models, warm up, and serve until SIGINT or SIGTERM.
///
/// Any model or warm-up failure aborts startup; the listener is only bound
/// once the engine is ready.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let options = config.embedder_options();
    let queue_depth = config.queue_depth;

    tracing::info!(
        model = %options.model,
        detector = %options.detector,
        model_dir = %options.model_dir.display(),
        "loading face models"
    );

    let engine = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let embedder = OnnxEmbedder::load(&options).context("failed to load face models")?;
        let engine = spawn_engine(Box::new(embedder), queue_depth).context("failed to start inference engine")?;
        Ok(engine)
    })
    .await
    .context("model loading task panicked")??;

    let service = ServiceConfig::from(&config);
    tracing::info!(
        metric = %service.distance_metric,
        threshold = service.threshold,
        timeout_secs = service.request_timeout.as_secs(),
        max_upload_bytes = service.max_upload_bytes,
        "verification settings"
    );

    let app = build_router(Arc::new(AppState::new(service, engine)));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "faceverifyd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("faceverifyd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
