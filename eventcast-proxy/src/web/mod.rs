//! HTTP server: lineup, HLS proxy and management API.

pub mod api;
pub mod state;
pub mod stream;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::WebState;

/// Build the application router.
pub fn router(web_state: Arc<WebState>) -> Router {
    Router::new()
        // Lineup
        .route("/channels.m3u", get(stream::channels_m3u))
        .route("/linear-channels.m3u", get(stream::linear_channels_m3u))
        .route("/xmltv.xml", get(stream::xmltv_xml))
        .route("/linear-xmltv.xml", get(stream::linear_xmltv_xml))
        // HLS proxy
        .route("/channels/:file", get(stream::channel_playlist))
        .route("/channels/:id/:part", get(stream::channel_part))
        .route("/chunklist/:id/:file", get(stream::chunklist))
        // Schedule maintenance
        .route("/rebuild-epg", post(api::rebuild_epg))
        .route("/reset-channels", post(api::reset_channels))
        // Management API
        .route("/api/channel-policy", get(api::get_channel_policy))
        .route("/api/channel-policy", post(api::update_channel_policy))
        .route("/api/providers", get(api::get_providers))
        .route("/api/providers/:name/toggle", post(api::toggle_provider))
        .route("/api/sessions", get(api::get_sessions))
        .route("/api/entries", get(api::get_entries))
        .with_state(web_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Start the web server; returns once a shutdown signal was received.
pub async fn start_web_server(
    listen_addr: SocketAddr,
    web_state: Arc<WebState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(web_state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    log::info!("Web server listening on http://{}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
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
                log::error!("Failed to listen for SIGTERM: {}", e);
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
    log::info!("Shutdown signal received");
}
