//! Relay connection lifecycle
//!
//! A connection first declares its role within the grace window, then
//! either feeds frames (producer) or receives them (consumer) until it
//! stops or disconnects.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::registry::RelayRegistry;
use super::session::RelaySession;
use crate::error::AppError;
use crate::session::{SessionStatus, StatusReporter};
use crate::stream::{close_code, ClientMessage, Connection, Inbound, MessageSink, Role, ServerMessage};
use crate::utils::LogThrottler;

/// How a relay connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Left the session after acting in `role`
    Finished(Role),
    /// A producer was already attached
    Conflict,
    /// No role declared within the grace window
    RoleTimeout,
    /// Declared a role this server does not know
    UnknownRole,
    /// Stopped or went away before declaring a role
    Abandoned,
}

enum RoleWait {
    Declared(Role),
    Unknown(String),
    TimedOut,
    Gone,
}

/// Shared collaborators for relay connections
#[derive(Clone)]
pub struct RelayContext {
    registry: Arc<RelayRegistry>,
    status: StatusReporter,
    role_timeout: Duration,
    throttler: Arc<LogThrottler>,
}

impl RelayContext {
    pub fn new(registry: Arc<RelayRegistry>, status: StatusReporter, role_timeout: Duration) -> Self {
        Self {
            registry,
            status,
            role_timeout,
            throttler: Arc::new(LogThrottler::with_secs(5)),
        }
    }

    pub fn registry(&self) -> &Arc<RelayRegistry> {
        &self.registry
    }

    /// Drive one relay connection to completion
    pub async fn run(
        &self,
        session_id: &str,
        conn: Arc<Connection>,
        inbound: &mut mpsc::Receiver<Inbound>,
    ) -> RelayOutcome {
        match self.await_role(&conn, inbound).await {
            RoleWait::Declared(Role::Producer) => self.run_producer(session_id, conn, inbound).await,
            RoleWait::Declared(Role::Consumer) => self.run_consumer(session_id, conn, inbound).await,
            RoleWait::Unknown(role) => {
                debug!(session = %session_id, role = %role, "Unknown relay role");
                let _ = conn.send_message(&ServerMessage::error(format!("Unknown role: {}", role)));
                conn.close(close_code::POLICY_VIOLATION, "Unknown role");
                RelayOutcome::UnknownRole
            }
            RoleWait::TimedOut => {
                info!(session = %session_id, conn = %conn.id(), "Relay role not declared in time");
                let _ = conn.send_message(&ServerMessage::error(AppError::RoleTimeout.to_string()));
                conn.close(close_code::POLICY_VIOLATION, "Role registration timeout");
                RelayOutcome::RoleTimeout
            }
            RoleWait::Gone => {
                conn.close(close_code::NORMAL, "");
                RelayOutcome::Abandoned
            }
        }
    }

    async fn await_role(&self, conn: &Connection, inbound: &mut mpsc::Receiver<Inbound>) -> RoleWait {
        // Fixed from connect; pings do not extend it
        let deadline = Instant::now() + self.role_timeout;
        loop {
            let next = match tokio::time::timeout_at(deadline, inbound.recv()).await {
                Err(_) => return RoleWait::TimedOut,
                Ok(None) => return RoleWait::Gone,
                Ok(Some(next)) => next,
            };
            match next {
                Inbound::Message { message, .. } => match message {
                    ClientMessage::RegisterProducer => return RoleWait::Declared(Role::Producer),
                    ClientMessage::RegisterConsumer => return RoleWait::Declared(Role::Consumer),
                    ClientMessage::Stop => return RoleWait::Gone,
                    ClientMessage::Ping => {
                        let _ = conn.send_message(&ServerMessage::Pong);
                    }
                    other => trace!("Ignoring {:?} before role registration", other),
                },
                Inbound::Unrecognized { kind: Some(kind) } if kind.starts_with("register_") => {
                    return RoleWait::Unknown(kind["register_".len()..].to_string());
                }
                Inbound::Unrecognized { kind } => {
                    trace!("Ignoring unknown message {:?} before role registration", kind);
                }
            }
        }
    }

    async fn run_producer(
        &self,
        session_id: &str,
        conn: Arc<Connection>,
        inbound: &mut mpsc::Receiver<Inbound>,
    ) -> RelayOutcome {
        let sink: Arc<dyn MessageSink> = conn.clone();
        let session = match self.registry.register_producer(session_id, sink) {
            Ok(session) => session,
            Err(e) => {
                warn!(session = %session_id, conn = %conn.id(), "Rejected producer: {}", e);
                let _ = conn.send_message(&ServerMessage::error(e.to_string()));
                conn.close(close_code::POLICY_VIOLATION, e.to_string());
                return RelayOutcome::Conflict;
            }
        };

        self.status.set_status(session_id, SessionStatus::Recording).await;

        let stopped = loop {
            let Some(next) = inbound.recv().await else {
                break false;
            };
            let Inbound::Message { message, raw } = next else {
                continue;
            };
            match message {
                ClientMessage::Frame => {
                    if let Some(report) = session.relay_frame(&conn.id(), raw) {
                        if report.skipped > 0 {
                            crate::warn_throttled!(
                                self.throttler,
                                session_id,
                                "Relay session {}: {} consumers not keeping up, frame dropped for them",
                                session_id,
                                report.skipped
                            );
                        }
                    }
                }
                ClientMessage::Stop => break true,
                ClientMessage::Ping => {
                    let _ = conn.send_message(&ServerMessage::Pong);
                }
                other => trace!("Ignoring {:?} from producer", other),
            }
        };

        if session.detach_producer(&conn.id()) {
            self.status.set_status(session_id, SessionStatus::Completed).await;
        }
        self.release(&session, &conn, stopped);
        RelayOutcome::Finished(Role::Producer)
    }

    async fn run_consumer(
        &self,
        session_id: &str,
        conn: Arc<Connection>,
        inbound: &mut mpsc::Receiver<Inbound>,
    ) -> RelayOutcome {
        let sink: Arc<dyn MessageSink> = conn.clone();
        let (session, _) = self.registry.register_consumer(session_id, sink);

        let stopped = loop {
            match inbound.recv().await {
                None => break false,
                Some(next) => match next.message() {
                    Some(ClientMessage::Stop) => break true,
                    Some(ClientMessage::Ping) => {
                        let _ = conn.send_message(&ServerMessage::Pong);
                    }
                    _ => {}
                },
            }
        };

        session.detach_consumer(&conn.id());
        self.release(&session, &conn, stopped);
        RelayOutcome::Finished(Role::Consumer)
    }

    fn release(&self, session: &Arc<RelaySession>, conn: &Connection, stopped: bool) {
        if self.registry.collect_if_idle(session) {
            self.throttler.clear(session.session_id());
        }
        if stopped {
            conn.close(close_code::NORMAL, "");
        }
    }
}
