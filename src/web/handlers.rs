use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::admission::admit;
use crate::error::{AppError, Result};
use crate::session::{SessionStatus, SourceKind};
use crate::state::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_captures: usize,
    pub relay_sessions: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_captures: state.captures.active_count(),
        relay_sessions: state.relay.registry().len(),
    })
}

/// Telemetry event posted by the detection pipeline
#[derive(Debug, Deserialize)]
pub struct RecordEventRequest {
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Capture time; the server clock is used when absent
    pub timestamp_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RecordEventResponse {
    pub success: bool,
    pub delivered: usize,
}

/// Persist a telemetry event and push it to live subscribers
pub async fn record_event(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(req): Json<RecordEventRequest>,
) -> Result<Json<RecordEventResponse>> {
    admit(&state, &session_id, &query, &headers).await?;

    if req.event_type.trim().is_empty() {
        return Err(AppError::BadRequest("event_type must not be empty".to_string()));
    }

    let report = state
        .events
        .store_and_broadcast(
            state.event_log.as_ref(),
            &session_id,
            &req.event_type,
            req.data,
            req.timestamp_ms,
        )
        .await?;

    Ok(Json(RecordEventResponse {
        success: true,
        delivered: report.delivered,
    }))
}

#[derive(Debug, Serialize)]
pub struct RelayPresence {
    pub producer_connected: bool,
    pub consumers: usize,
    pub frame_count: u64,
}

/// Who is live on a session right now
#[derive(Debug, Serialize)]
pub struct LiveStatus {
    pub session_id: String,
    pub source_kind: SourceKind,
    pub status: SessionStatus,
    pub capture_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayPresence>,
    pub event_subscribers: usize,
}

pub async fn live_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<LiveStatus>> {
    let admitted = admit(&state, &session_id, &query, &headers).await?;

    let relay = state
        .relay
        .registry()
        .snapshot(&session_id)
        .map(|snap| RelayPresence {
            producer_connected: snap.producer_connected,
            consumers: snap.consumers,
            frame_count: snap.frame_count,
        });

    Ok(Json(LiveStatus {
        capture_active: state.captures.is_active(&session_id),
        event_subscribers: state.events.subscriber_count(&session_id),
        source_kind: admitted.session.source_kind,
        status: admitted.session.status,
        relay,
        session_id,
    }))
}
