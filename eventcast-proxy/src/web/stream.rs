//! Lineup and HLS route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use log::{error, warn};

use super::state::WebState;
use crate::lineup::{event_m3u, generate_xmltv, linear_m3u};
use eventcast_protocol::StreamError;

const TUNER_ERROR: HeaderName = HeaderName::from_static("x-tuner-error");

const MPEGURL: &str = "application/vnd.apple.mpegurl";
const M3U: &str = "application/x-mpegurl";
const XML: &str = "application/xml";
const OCTET_STREAM: &str = "application/octet-stream";
const MP2T: &str = "video/MP2T";

/// 404 carrying the failure domain.
fn stream_error(channel_id: &str, err: StreamError) -> Response {
    match &err {
        StreamError::NotFound(_) => warn!("Channel {}: {}", channel_id, err),
        _ => error!("Channel {}: {}", channel_id, err),
    }

    (
        StatusCode::NOT_FOUND,
        [(TUNER_ERROR, HeaderValue::from_static(err.domain()))],
        err.to_string(),
    )
        .into_response()
}

fn internal_error(context: &str, err: impl std::fmt::Display) -> Response {
    error!("{}: {}", context, err);
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

fn playlist(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, MPEGURL),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

fn linear_disabled() -> Response {
    (StatusCode::NOT_FOUND, "Linear channels are disabled").into_response()
}

/// `GET /channels.m3u`
pub async fn channels_m3u(State(state): State<Arc<WebState>>, headers: HeaderMap) -> Response {
    match state.policy().await {
        Ok(policy) => ([(header::CONTENT_TYPE, M3U)], event_m3u(&state.base_url(&headers), &policy)).into_response(),
        Err(e) => internal_error("Failed to load channel policy", e),
    }
}

/// `GET /linear-channels.m3u`
pub async fn linear_channels_m3u(State(state): State<Arc<WebState>>, headers: HeaderMap) -> Response {
    let policy = match state.policy().await {
        Ok(policy) => policy,
        Err(e) => return internal_error("Failed to load channel policy", e),
    };
    if !policy.use_linear {
        return linear_disabled();
    }

    match state.enabled_providers().await {
        Ok(enabled) => ([(header::CONTENT_TYPE, M3U)], linear_m3u(&state.base_url(&headers), &enabled)).into_response(),
        Err(e) => internal_error("Failed to load providers", e),
    }
}

async fn xmltv(state: &WebState, linear: bool) -> Response {
    let policy = match state.policy().await {
        Ok(policy) => policy,
        Err(e) => return internal_error("Failed to load channel policy", e),
    };
    if linear && !policy.use_linear {
        return linear_disabled();
    }

    let enabled = match state.enabled_providers().await {
        Ok(enabled) => enabled,
        Err(e) => return internal_error("Failed to load providers", e),
    };
    let entries = {
        let db = state.database.lock().await;
        match db.get_scheduled_entries() {
            Ok(entries) => entries,
            Err(e) => return internal_error("Failed to load entries", e),
        }
    };

    match generate_xmltv(&entries, &policy, linear, &enabled) {
        Ok(body) => ([(header::CONTENT_TYPE, XML)], body).into_response(),
        Err(e) => internal_error("Failed to render XMLTV", e),
    }
}

/// `GET /xmltv.xml`
pub async fn xmltv_xml(State(state): State<Arc<WebState>>) -> Response {
    xmltv(&state, false).await
}

/// `GET /linear-xmltv.xml`
pub async fn linear_xmltv_xml(State(state): State<Arc<WebState>>) -> Response {
    xmltv(&state, true).await
}

/// `GET /channels/{id}.m3u8`
pub async fn channel_playlist(
    State(state): State<Arc<WebState>>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(channel_id) = file.strip_suffix(".m3u8") else {
        return stream_error(&file, StreamError::NotFound(format!("unknown resource {}", file)));
    };

    match state.engine.channel_playlist(channel_id, &state.base_url(&headers)).await {
        Ok(body) => playlist(body),
        Err(e) => stream_error(channel_id, e),
    }
}

/// `GET /chunklist/{id}/{chunklistId}.m3u8`
pub async fn chunklist(
    State(state): State<Arc<WebState>>,
    Path((channel_id, file)): Path<(String, String)>,
) -> Response {
    let Some(chunklist_id) = file.strip_suffix(".m3u8") else {
        return stream_error(&channel_id, StreamError::NotFound(format!("unknown chunklist {}", file)));
    };

    match state.engine.chunklist(&channel_id, chunklist_id).await {
        Ok(body) => playlist(body),
        Err(e) => stream_error(&channel_id, e),
    }
}

/// `GET /channels/{id}/{part}.key` and `GET /channels/{id}/{part}.ts`
pub async fn channel_part(
    State(state): State<Arc<WebState>>,
    Path((channel_id, file)): Path<(String, String)>,
) -> Response {
    if let Some(part_id) = file.strip_suffix(".key") {
        return match state.engine.key(&channel_id, part_id).await {
            Ok(bytes) => ([(header::CONTENT_TYPE, OCTET_STREAM)], bytes).into_response(),
            Err(e) => stream_error(&channel_id, e),
        };
    }
    if let Some(part_id) = file.strip_suffix(".ts") {
        return match state.engine.segment(&channel_id, part_id).await {
            Ok(bytes) => ([(header::CONTENT_TYPE, MP2T)], bytes).into_response(),
            Err(e) => stream_error(&channel_id, e),
        };
    }

    stream_error(&channel_id, StreamError::NotFound(format!("unknown resource {}", file)))
}
