use std::sync::Arc;
use tracing::{info, warn};

use super::{SessionDirectory, SessionStatus};
use crate::events::EventHub;

/// Writes status transitions to the directory and announces them
///
/// Store failures are logged and never surface to the live connection.
#[derive(Clone)]
pub struct StatusReporter {
    directory: Arc<dyn SessionDirectory>,
    events: Arc<EventHub>,
}

impl StatusReporter {
    pub fn new(directory: Arc<dyn SessionDirectory>, events: Arc<EventHub>) -> Self {
        Self { directory, events }
    }

    pub async fn set_status(&self, session_id: &str, status: SessionStatus) {
        self.report(session_id, status, None).await;
    }

    pub async fn report(&self, session_id: &str, status: SessionStatus, message: Option<String>) {
        if let Err(e) = self.directory.set_status(session_id, status).await {
            warn!("Failed to store status {} for session {}: {}", status, session_id, e);
        } else {
            info!("Session {} status: {}", session_id, status);
        }
        self.events.broadcast_status(session_id, status, message);
    }
}
