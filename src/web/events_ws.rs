//! Telemetry event stream: `/ws/events/:session_id`

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::HeaderMap,
    response::Response,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::admission::{admit, reject};
use super::socket::SocketPump;
use crate::events::EventHub;
use crate::state::AppState;
use crate::stream::{ClientMessage, Connection, Inbound, MessageSink, ServerMessage};
use crate::utils::now_rfc3339;

pub async fn events_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    match admit(&state, &session_id, &query, &headers).await {
        Ok(_) => ws.on_upgrade(move |socket| async move {
            let queue = state.config.get().relay.outbound_queue;
            let mut pump = SocketPump::attach(socket, queue);
            subscribe(&state.events, &session_id, pump.conn.clone(), &mut pump.inbound).await;
            pump.finish().await;
        }),
        Err(e) => reject(ws, &session_id, e),
    }
}

/// Keep `conn` subscribed to `session_id` until it stops or goes away
///
/// Subscription filters are acknowledged but every event is delivered.
pub async fn subscribe(
    events: &EventHub,
    session_id: &str,
    conn: Arc<Connection>,
    inbound: &mut mpsc::Receiver<Inbound>,
) {
    events.subscribe(session_id, conn.clone());
    info!("Event subscriber {} joined session {}", conn.id(), session_id);

    let _ = conn.send_message(&ServerMessage::Connected {
        session_id: session_id.to_string(),
        source: None,
        resolution: None,
        framerate: None,
        timestamp: now_rfc3339(),
    });

    while let Some(next) = inbound.recv().await {
        match next.message() {
            Some(ClientMessage::Ping) => {
                let _ = conn.send_message(&ServerMessage::Pong);
            }
            Some(ClientMessage::Subscribe { event_types }) => {
                debug!("Subscriber {} asked for {:?}", conn.id(), event_types);
                let _ = conn.send_message(&ServerMessage::Subscribed {
                    event_types: event_types.clone(),
                });
            }
            Some(ClientMessage::Stop) => break,
            _ => {}
        }
        if conn.is_closed() {
            break;
        }
    }

    events.unsubscribe(session_id, &conn.id());
    info!("Event subscriber {} left session {}", conn.id(), session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Outbound;
    use std::time::Duration;

    async fn next_json(rx: &mut mpsc::Receiver<Outbound>) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(msg.as_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_subscriber_lifecycle() {
        let hub = Arc::new(EventHub::new());
        let (conn, mut rx) = Connection::detached(16);
        let (tx, mut inbound) = mpsc::channel(8);

        let task = {
            let hub = hub.clone();
            tokio::spawn(async move { subscribe(&hub, "S1", conn, &mut inbound).await })
        };

        let connected = next_json(&mut rx).await;
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["session_id"], "S1");
        assert!(connected.get("source").is_none());
        assert_eq!(hub.subscriber_count("S1"), 1);

        tx.send(Inbound::decode(r#"{"type":"ping"}"#)).await.unwrap();
        assert_eq!(next_json(&mut rx).await["type"], "pong");

        tx.send(Inbound::decode(r#"{"type":"subscribe","event_types":["shot","foul"]}"#))
            .await
            .unwrap();
        let ack = next_json(&mut rx).await;
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(ack["event_types"], serde_json::json!(["shot", "foul"]));

        hub.broadcast_pocket("S1", "8", "corner");
        assert_eq!(next_json(&mut rx).await["type"], "pocket");

        drop(tx);
        task.await.unwrap();
        assert_eq!(hub.subscriber_count("S1"), 0);
        assert_eq!(hub.session_count(), 0);
    }
}
