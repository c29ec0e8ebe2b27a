//! anystream-server: HTTP streaming sessions, playback state, and media
//! import.
//!
//! Ties the core, db and av crates into a running server:
//!
//! - Axum HTTP API with HLS delivery, WebSockets, and SSE
//! - [`StreamService`](streaming::StreamService) owning transcode sessions
//! - [`MediaImporter`](importer::MediaImporter) turning directories into
//!   catalog entries
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod importer;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod streaming;

use std::net::SocketAddr;
use std::sync::Arc;

use anystream_av::{FfmpegTranscoder, FfprobeProber, Prober, ToolRegistry, Transcoder};
use anystream_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Start the server and run until a shutdown signal arrives.
pub async fn start(config: Config) -> anystream_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db_path = &config.server.db_path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anystream_core::Error::Io { source: e })?;
            tracing::info!("Created database directory {}", parent.display());
        }
    }
    let db_str = db_path.to_string_lossy();
    let db = anystream_db::pool::init_pool(&db_str)?;
    if existed {
        tracing::info!("Database opened (existing) at {db_str}");
    } else {
        tracing::info!("Database created (new) at {db_str}");
    }

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let prober: Arc<dyn Prober> = Arc::new(FfprobeProber::from_registry(&tools)?);
    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::from_registry(&tools)?);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| anystream_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let static_dir = config.server.static_dir.clone();
    let cleanup_interval =
        std::time::Duration::from_secs(config.streaming.cleanup_interval_secs.max(1));

    let cancel = CancellationToken::new();
    let ctx = AppContext::new(db, config, tools, prober, transcoder, cancel.clone());
    let cleanup_handle = ctx.streams.start_cleanup_task(cleanup_interval);

    let app = router::build_router(ctx.clone(), static_dir);

    tracing::info!("Starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anystream_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    cancel.cancel();
    ctx.streams.shutdown().await;
    let _ = cleanup_handle.await;

    served.map_err(|e| anystream_core::Error::Io { source: e })?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
