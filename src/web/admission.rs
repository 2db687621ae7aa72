//! Token and ownership gate shared by every live endpoint
//!
//! WebSocket rejections happen before any application message: the
//! connection is upgraded only to deliver a close frame.

use axum::{
    extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{debug, error};

use crate::auth::extract_token;
use crate::error::{AppError, Result};
use crate::session::SessionDescriptor;
use crate::state::AppState;
use crate::stream::close_code;

/// A verified principal and the session it owns
#[derive(Debug, Clone)]
pub struct Admitted {
    pub principal: String,
    pub session: SessionDescriptor,
}

/// Verify the caller's token, then resolve `session_id` within its scope
///
/// The token is checked before the session store is consulted.
pub async fn admit(
    state: &AppState,
    session_id: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<Admitted> {
    let token = extract_token(query, headers)
        .ok_or_else(|| AppError::AuthFailure("Authentication required".to_string()))?;

    let principal = state
        .verifier
        .verify(&token)
        .await
        .ok_or_else(|| AppError::AuthFailure("Invalid token".to_string()))?;

    let session = state
        .directory
        .lookup(session_id, &principal)
        .await?
        .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

    Ok(Admitted { principal, session })
}

/// Close code and reason for a rejected upgrade
pub fn close_for(err: &AppError) -> (u16, String) {
    match err {
        AppError::AuthFailure(reason) => (close_code::AUTH_FAILED, reason.clone()),
        AppError::SessionNotFound(_) => (close_code::SESSION_NOT_FOUND, "Session not found".to_string()),
        _ => (close_code::INTERNAL, "Internal error".to_string()),
    }
}

/// Accept the upgrade only to close it with the mapped code
pub fn reject(ws: WebSocketUpgrade, session_id: &str, err: AppError) -> Response {
    let (code, reason) = close_for(&err);
    match &err {
        AppError::AuthFailure(_) | AppError::SessionNotFound(_) => {
            debug!("Rejected connection to session {}: {}", session_id, err)
        }
        _ => error!("Admission for session {} failed: {}", session_id, err),
    }
    ws.on_upgrade(move |socket| close_silently(socket, code, reason))
}

async fn close_silently(mut socket: WebSocket, code: u16, reason: String) {
    let frame = CloseFrame {
        code,
        reason: Cow::Owned(reason),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
