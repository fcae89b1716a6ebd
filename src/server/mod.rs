use crate::config::Config;
use crate::session::{self, start_sweep_task, RegistrySettings, SessionRegistry};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, Method},
    routing::get,
    Json, Router,
};
use previewly_av::{workspace::remove_stale_dirs, FfmpegHls, ToolRegistry};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod error;
pub mod routes_preview;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub registry: SessionRegistry,
    pub config: Arc<Config>,
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let hls_dir = ctx.config.server.hls_dir.clone();
    let static_dir = ctx.config.server.static_dir.clone();

    let mut app = Router::new()
        .route("/health", get(health_check))
        .merge(routes_preview::preview_routes())
        .nest_service("/hls", ServeDir::new(hls_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            app = app.fallback_service(ServeDir::new(&dir).append_index_html_on_directories(true));
        }
    }

    app
}

async fn health_check(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "active_sessions": ctx.registry.active_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Create the HLS root and clear directories left by a previous run.
pub fn prepare_hls_dir(path: &Path) -> Result<usize> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create HLS directory: {:?}", path))?;
    let removed = remove_stale_dirs(path)
        .with_context(|| format!("Failed to clean HLS directory: {:?}", path))?;
    if removed > 0 {
        tracing::info!("Removed {} stale preview directories from {:?}", removed, path);
    }
    Ok(removed)
}

/// Build the registry used by the server from configuration.
pub fn build_registry(config: &Config) -> Result<SessionRegistry> {
    let tools = ToolRegistry::discover(&config.tools);
    let transcoder = FfmpegHls::from_registry(
        &tools,
        config.transcoder.clone(),
        config.buffer.segment_duration_secs,
    )
    .context("ffmpeg is required to serve previews")?;

    Ok(SessionRegistry::new(
        RegistrySettings::from_config(config),
        Arc::new(transcoder),
        session::sizing_policy(config),
    ))
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    prepare_hls_dir(&config.server.hls_dir)?;
    let registry = build_registry(&config)?;

    let shutdown = CancellationToken::new();
    let sweeper = start_sweep_task(
        registry.clone(),
        Duration::from_secs(config.session.sweep_interval_secs),
        shutdown.clone(),
    );

    let reloader = registry
        .sizing_policy()
        .is_adaptive()
        .then(|| start_reload_task(registry.clone(), shutdown.clone()));

    let ctx = AppContext {
        registry: registry.clone(),
        config: Arc::new(config),
    };
    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Sessions are torn down as soon as the signal arrives so that open
    // streams and pending starts finish before the server drains.
    let signal_registry = registry.clone();
    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
            signal_registry.shutdown_all().await;
        })
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    if let Some(reloader) = reloader {
        let _ = reloader.await;
    }
    registry.shutdown_all().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Reload the predictor model on SIGHUP until `shutdown` is cancelled.
fn start_reload_task(
    registry: SessionRegistry,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
                Ok(sig) => sig,
                Err(e) => {
                    tracing::error!("Failed to install SIGHUP handler: {}", e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = hangup.recv() => match registry.refresh_predictor() {
                        Ok(_) => tracing::info!("Predictor reloaded on SIGHUP"),
                        Err(e) => tracing::warn!("Predictor reload failed, keeping previous model: {}", e),
                    },
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = registry;
            shutdown.cancelled().await;
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("Shutdown signal received");
}
