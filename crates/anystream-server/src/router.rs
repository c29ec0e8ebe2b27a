//! Axum router construction.
//!
//! HLS and stop routes are authorized by the session token in the URL;
//! everything else except `/health` goes through the auth middleware.

use std::path::PathBuf;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::auth::auth_middleware;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Token-authorized streaming routes.
    let token_routes = Router::new()
        .route(
            "/stream/{media_ref_id}/hls/playlist.m3u8",
            get(routes::stream::hls_playlist),
        )
        .route(
            "/stream/{media_ref_id}/hls/{segment_file}",
            get(routes::stream::hls_segment),
        )
        .route("/stream/stop/{token}", get(routes::stream::stop_session));

    let protected_routes = Router::new()
        .route("/stream", get(routes::stream::list_sessions))
        .route(
            "/stream/{media_ref_id}/state",
            get(routes::state::get_state).put(routes::state::put_state),
        )
        .route("/ws/stream", get(routes::ws::sessions_ws))
        .route(
            "/ws/stream/{media_ref_id}/state",
            get(routes::ws::state_ws),
        )
        .route("/api/import", post(routes::import::run_import))
        .route(
            "/api/media-refs/{id}/refresh",
            post(routes::import::refresh_media_ref),
        )
        .route(
            "/api/media-refs/{id}/previews",
            post(routes::media::generate_previews),
        )
        .route("/api/media/{id}", get(routes::media::get_media))
        .route("/api/events", get(routes::events::events_handler))
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(token_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            let index_path = dir.join("index.html");
            app = app.fallback_service(
                tower_http::services::ServeDir::new(&dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(tower_http::services::ServeFile::new(index_path)),
            );
        }
    }

    app
}
