use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::ConfigStore;
use crate::events::EventHub;
use crate::relay::{RelayContext, RelayRegistry};
use crate::session::{EventLog, SessionDirectory, StatusReporter};
use crate::video::{BlockingPool, CaptureBackend, CaptureRegistry};

/// Application-wide state shared across handlers
///
/// Registries are created once at startup and torn down at shutdown; every
/// connection reaches them through this struct.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Access token verification
    pub verifier: Arc<dyn TokenVerifier>,
    /// Session metadata lookup (ownership scoped)
    pub directory: Arc<dyn SessionDirectory>,
    /// Telemetry persistence
    pub event_log: Arc<dyn EventLog>,
    /// Per-session event subscribers
    pub events: Arc<EventHub>,
    /// Status writes + status events
    pub status: StatusReporter,
    /// Open capture adapters
    pub captures: Arc<CaptureRegistry>,
    /// Producer/consumer relay sessions
    pub relay: RelayContext,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        backend: Arc<dyn CaptureBackend>,
        verifier: Arc<dyn TokenVerifier>,
        directory: Arc<dyn SessionDirectory>,
        event_log: Arc<dyn EventLog>,
    ) -> Arc<Self> {
        let current = config.get();
        let events = Arc::new(EventHub::new());
        let status = StatusReporter::new(directory.clone(), events.clone());
        let captures = Arc::new(CaptureRegistry::new(
            backend,
            BlockingPool::new(current.video.worker_threads),
        ));
        let relay = RelayContext::new(
            Arc::new(RelayRegistry::new()),
            status.clone(),
            current.relay.role_timeout(),
        );

        Arc::new(Self {
            config,
            verifier,
            directory,
            event_log,
            events,
            status,
            captures,
            relay,
        })
    }

    /// Release every capture adapter
    pub async fn shutdown(&self) {
        self.captures.stop_all().await;
    }
}
