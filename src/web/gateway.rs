//! Live video endpoint: `/ws/video/:session_id`
//!
//! Admits the connection, then hands it to the frame pacer (device and
//! network sources) or to the relay (phone sources) according to the
//! session's declared source kind.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::HeaderMap,
    response::Response,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::admission::{admit, reject, Admitted};
use super::socket::SocketPump;
use crate::session::{SessionDescriptor, SourceKind};
use crate::state::AppState;
use crate::stream::{close_code, Connection, Inbound, MessageSink, ServerMessage};
use crate::video::{CaptureSettings, FramePacer};
use tokio::sync::mpsc;

pub async fn video_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    match admit(&state, &session_id, &query, &headers).await {
        Ok(admitted) => ws.on_upgrade(move |socket| async move {
            let queue = state.config.get().relay.outbound_queue;
            let mut pump = SocketPump::attach(socket, queue);
            serve(&state, admitted, pump.conn.clone(), &mut pump.inbound).await;
            pump.finish().await;
        }),
        Err(e) => reject(ws, &session_id, e),
    }
}

/// Dispatch an admitted connection by source kind
pub async fn serve(
    state: &AppState,
    admitted: Admitted,
    conn: Arc<Connection>,
    inbound: &mut mpsc::Receiver<Inbound>,
) {
    let session = admitted.session;
    info!(
        "Video connection {} for session {} ({}) by {}",
        conn.id(),
        session.id,
        session.source_kind,
        admitted.principal
    );

    match session.source_kind {
        SourceKind::UsbDevice | SourceKind::NetworkStream => {
            capture(state, &session, conn, inbound).await;
        }
        SourceKind::MobileRelay => {
            let outcome = state.relay.run(&session.id, conn, inbound).await;
            info!("Relay connection for session {} ended: {:?}", session.id, outcome);
        }
        SourceKind::Unsupported => {
            warn!("Session {} has no live source", session.id);
            let _ = conn.send_message(&ServerMessage::error("Unsupported source type"));
            conn.close(close_code::NORMAL, "");
        }
    }
}

async fn capture(
    state: &AppState,
    session: &SessionDescriptor,
    conn: Arc<Connection>,
    inbound: &mut mpsc::Receiver<Inbound>,
) {
    let config = state.config.get();
    let settings = CaptureSettings::from_config(
        &config.video,
        session.resolution_or(&config.video.default_resolution),
        session.framerate_or(config.video.default_framerate),
    );

    let pacer = FramePacer::new(
        session.id.clone(),
        state.captures.clone(),
        state.status.clone(),
        conn.clone(),
        config.video.max_consecutive_read_failures,
    );
    pacer.run(&session.source_locator, settings, inbound).await;
    conn.close(close_code::NORMAL, "");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtVerifier;
    use crate::config::{AppConfig, ConfigStore};
    use crate::session::{MemoryStore, SessionStatus};
    use crate::stream::Outbound;
    use crate::video::capture::testing::MockBackend;
    use std::time::Duration;

    fn state_with(kind: SourceKind, locator: &str) -> (Arc<AppState>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.insert(SessionDescriptor {
            id: "S1".into(),
            owner: Some("alice".into()),
            source_kind: kind,
            source_locator: locator.into(),
            resolution: Some("720p".into()),
            framerate: Some(50),
            status: SessionStatus::Pending,
        });
        let state = AppState::new(
            ConfigStore::from_config(AppConfig::default()),
            Arc::new(MockBackend::new(vec![])),
            Arc::new(JwtVerifier::new("k")),
            store.clone(),
            store.clone(),
        );
        (state, store)
    }

    async fn admitted(store: &MemoryStore) -> Admitted {
        use crate::session::SessionDirectory;
        Admitted {
            principal: "alice".into(),
            session: store.lookup("S1", "alice").await.unwrap().unwrap(),
        }
    }

    async fn next_json(rx: &mut mpsc::Receiver<Outbound>) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(msg.as_text().unwrap()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_device_session_streams_frames() {
        let (state, store) = state_with(SourceKind::UsbDevice, "device:0");
        let (conn, mut rx) = Connection::detached(64);
        let (tx, mut inbound) = mpsc::channel(8);
        let admitted = admitted(&store).await;

        let task = {
            let state = state.clone();
            tokio::spawn(async move { serve(&state, admitted, conn, &mut inbound).await })
        };

        let connected = next_json(&mut rx).await;
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["resolution"], "720p");
        assert_eq!(connected["framerate"], 50);
        assert_eq!(next_json(&mut rx).await["type"], "frame");

        tx.send(Inbound::decode(r#"{"type":"stop"}"#)).await.unwrap();
        task.await.unwrap();
        assert_eq!(store.status("S1"), Some(SessionStatus::Completed));
        assert!(!state.captures.is_active("S1"));
    }

    #[tokio::test]
    async fn test_relay_session_dispatched_to_relay() {
        let (state, store) = state_with(SourceKind::MobileRelay, "");
        let (conn, mut rx) = Connection::detached(64);
        let (tx, mut inbound) = mpsc::channel(8);
        let admitted = admitted(&store).await;

        let task = {
            let state = state.clone();
            tokio::spawn(async move { serve(&state, admitted, conn, &mut inbound).await })
        };

        tx.send(Inbound::decode(r#"{"type":"register_consumer"}"#)).await.unwrap();
        let ack = next_json(&mut rx).await;
        assert_eq!(ack["type"], "registered");
        assert!(state.relay.registry().lookup("S1").is_some());

        drop(tx);
        task.await.unwrap();
        assert!(state.relay.registry().lookup("S1").is_none());
    }

    #[tokio::test]
    async fn test_unsupported_source_gets_error() {
        let (state, store) = state_with(SourceKind::Unsupported, "");
        let (conn, mut rx) = Connection::detached(8);
        let (_tx, mut inbound) = mpsc::channel(8);

        serve(&state, admitted(&store).await, conn, &mut inbound).await;
        assert_eq!(next_json(&mut rx).await["type"], "error");
        assert!(matches!(rx.recv().await, Some(Outbound::Close { .. })));
    }
}
