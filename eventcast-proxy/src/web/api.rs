//! Management API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;

use super::state::WebState;

// ============================================================================
// Schedule maintenance
// ============================================================================

/// Purge every entry and channel slot, rediscover and reschedule.
pub async fn rebuild_epg(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    match web_state.refresh.rebuild_epg().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "discovered": summary.discovered,
                "failed": summary.failed,
                "purged": summary.purged,
            })),
        ),
        Err(e) => {
            error!("Failed to rebuild EPG: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Clear the channel schedule.
pub async fn reset_channels(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    match web_state.scheduler.reset_channels().await {
        Ok(cleared) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "cleared": cleared
            })),
        ),
        Err(e) => {
            error!("Failed to reset channels: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": e.to_string()
                })),
            )
        }
    }
}

// ============================================================================
// Channel policy endpoints
// ============================================================================

/// Get the channel numbering policy.
pub async fn get_channel_policy(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    match web_state.policy().await {
        Ok(policy) => Json(json!({
            "success": true,
            "policy": policy
        })),
        Err(e) => Json(json!({
            "success": false,
            "error": e.to_string()
        })),
    }
}

/// Channel policy update request; omitted fields keep their value.
#[derive(Debug, Deserialize)]
pub struct UpdatePolicyRequest {
    pub start_channel: Option<u32>,
    pub num_of_channels: Option<u32>,
    pub use_linear: Option<bool>,
}

/// Update the channel numbering policy.
///
/// A scheduling pass runs afterwards so that switching linear channels off
/// migrates the schedule right away.
pub async fn update_channel_policy(
    State(web_state): State<Arc<WebState>>,
    Json(payload): Json<UpdatePolicyRequest>,
) -> impl IntoResponse {
    let result = {
        let db = web_state.database.lock().await;
        db.get_channel_policy(web_state.default_policy).and_then(|mut policy| {
            if let Some(start) = payload.start_channel {
                policy.start_channel = start;
            }
            if let Some(count) = payload.num_of_channels {
                policy.num_of_channels = count;
            }
            if let Some(linear) = payload.use_linear {
                policy.use_linear = linear;
            }
            db.update_channel_policy(&policy).map(|_| policy)
        })
    };

    match result {
        Ok(policy) => {
            info!(
                "Channel policy updated: start={}, count={}, linear={}",
                policy.start_channel, policy.num_of_channels, policy.use_linear
            );
            let scheduler = web_state.scheduler.clone();
            tokio::spawn(async move {
                scheduler.schedule_entries().await;
            });
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "policy": policy
                })),
            )
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": e.to_string()
            })),
        ),
    }
}

// ============================================================================
// Provider endpoints
// ============================================================================

/// Get all providers with their enable state.
pub async fn get_providers(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let db = web_state.database.lock().await;

    match db.get_providers() {
        Ok(providers) => {
            let providers: Vec<_> = providers
                .into_iter()
                .map(|p| {
                    let registered = web_state.providers.get(&p.name).is_ok();
                    json!({
                        "name": p.name,
                        "enabled": p.enabled,
                        "registered": registered,
                        "updated_at": p.updated_at,
                    })
                })
                .collect();
            Json(json!({
                "success": true,
                "providers": providers
            }))
        }
        Err(e) => Json(json!({
            "success": false,
            "error": e.to_string()
        })),
    }
}

/// Enable/disable a provider.
///
/// Disabling removes the provider's entries; enabling triggers a refresh.
pub async fn toggle_provider(
    State(web_state): State<Arc<WebState>>,
    Path(name): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    if let Err(e) = web_state.providers.get(&name) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": e.to_string()
            })),
        );
    }

    let enabled = payload.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true);

    let result = {
        let db = web_state.database.lock().await;
        db.set_provider_enabled(&name, enabled)
    };
    if let Err(e) = result {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": e.to_string()
            })),
        );
    }

    if enabled {
        info!("Provider {} enabled", name);
        web_state.refresh.trigger_refresh().await;
    } else {
        info!("Provider {} disabled", name);
        if let Err(e) = web_state.scheduler.remove_entries_provider(&name).await {
            error!("Failed to remove entries of {}: {}", name, e);
        }
    }

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": if enabled { "Provider enabled" } else { "Provider disabled" }
        })),
    )
}

// ============================================================================
// Session and entry endpoints
// ============================================================================

/// Get active channel sessions.
pub async fn get_sessions(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let sessions = web_state.engine.registry().snapshot(Instant::now()).await;

    Json(json!({
        "success": true,
        "sessions": sessions
    }))
}

/// Get scheduled entries.
pub async fn get_entries(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let db = web_state.database.lock().await;

    match db.get_scheduled_entries() {
        Ok(entries) => Json(json!({
            "success": true,
            "entries": entries
        })),
        Err(e) => Json(json!({
            "success": false,
            "error": e.to_string()
        })),
    }
}
