//! Frame pacer for single-viewer capture sessions
//!
//! `connecting → streaming → stopped`. Each tick polls control messages
//! without blocking, reads one frame on the worker pool, sends it, then
//! sleeps for whatever is left of the frame interval. Read failures are
//! counted and skipped; only an explicit stop, a closed connection or the
//! optional consecutive-failure ceiling end the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, trace, warn};

use super::capture::CaptureSettings;
use super::locator::SourceLocator;
use super::registry::CaptureRegistry;
use crate::session::{SessionStatus, StatusReporter};
use crate::stream::{ClientMessage, Connection, Inbound, SendError, ServerMessage};
use crate::utils::{now_rfc3339, LogThrottler};

/// Failures logged individually before switching to every Nth
const LOG_FIRST_FAILURES: u64 = 5;
const LOG_EVERY_NTH_FAILURE: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    Connecting,
    Streaming,
    Stopped,
}

/// Why a pacer left `streaming` (or never got there)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StopRequested,
    Disconnected,
    InvalidSource,
    OpenFailed,
    TooManyFailures,
}

impl StopReason {
    /// Terminal session status for this outcome
    pub fn final_status(&self) -> SessionStatus {
        match self {
            StopReason::StopRequested | StopReason::Disconnected => SessionStatus::Completed,
            StopReason::InvalidSource | StopReason::OpenFailed | StopReason::TooManyFailures => {
                SessionStatus::Error
            }
        }
    }
}

/// Time between frames for a target rate; 0 fps is treated as 1
pub fn frame_interval(framerate: u32) -> Duration {
    Duration::from_secs_f64(1.0 / framerate.max(1) as f64)
}

/// Sleep needed to hold the rate; never negative
pub fn pacing_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

fn should_log_failure(total: u64) -> bool {
    total <= LOG_FIRST_FAILURES || total % LOG_EVERY_NTH_FAILURE == 0
}

pub struct FramePacer {
    session_id: String,
    registry: Arc<CaptureRegistry>,
    status: StatusReporter,
    conn: Arc<Connection>,
    max_consecutive_failures: Option<u32>,
    state: PacerState,
    throttler: LogThrottler,
}

impl FramePacer {
    pub fn new(
        session_id: impl Into<String>,
        registry: Arc<CaptureRegistry>,
        status: StatusReporter,
        conn: Arc<Connection>,
        max_consecutive_failures: Option<u32>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            registry,
            status,
            conn,
            max_consecutive_failures,
            state: PacerState::Connecting,
            throttler: LogThrottler::with_secs(5),
        }
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    /// Open the source, stream until stopped, then release and report
    pub async fn run(
        mut self,
        locator: &str,
        settings: CaptureSettings,
        control: &mut mpsc::Receiver<Inbound>,
    ) -> StopReason {
        let reason = self.stream(locator, &settings, control).await;
        self.state = PacerState::Stopped;

        self.registry.stop(&self.session_id).await;
        self.status
            .report(&self.session_id, reason.final_status(), None)
            .await;
        info!("Capture session {} stopped: {:?}", self.session_id, reason);
        reason
    }

    async fn stream(
        &mut self,
        locator: &str,
        settings: &CaptureSettings,
        control: &mut mpsc::Receiver<Inbound>,
    ) -> StopReason {
        let locator: SourceLocator = match locator.parse() {
            Ok(locator) => locator,
            Err(_) => {
                warn!("Session {} has invalid source {:?}", self.session_id, locator);
                self.send_error(format!("Unrecognized source locator: {}", locator));
                return StopReason::InvalidSource;
            }
        };

        let handle = match self
            .registry
            .start(&self.session_id, &locator, settings)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Session {}: {}", self.session_id, e);
                self.send_error(format!("Failed to open {}", locator.describe()));
                return StopReason::OpenFailed;
            }
        };

        self.status
            .set_status(&self.session_id, SessionStatus::Recording)
            .await;

        let connected = ServerMessage::Connected {
            session_id: self.session_id.clone(),
            source: Some(locator.to_string()),
            resolution: Some(settings.label.clone()),
            framerate: Some(settings.framerate),
            timestamp: now_rfc3339(),
        };
        if self.conn.send_message(&connected) == Err(SendError::Closed) {
            return StopReason::Disconnected;
        }

        self.state = PacerState::Streaming;
        let interval = frame_interval(settings.framerate);
        let mut consecutive: u32 = 0;
        let mut total_failures: u64 = 0;
        let mut frames_sent: u64 = 0;

        let reason = loop {
            let tick = Instant::now();

            if let Some(reason) = self.poll_control(control) {
                break reason;
            }

            match self.registry.read_frame(&handle).await {
                Ok(frame) => {
                    consecutive = 0;
                    let message = ServerMessage::Frame {
                        data: frame.to_base64(),
                        timestamp_ms: frame.timestamp_ms(),
                    };
                    match self.conn.send_frame(&message) {
                        Ok(()) => frames_sent += 1,
                        Err(SendError::Closed) => break StopReason::Disconnected,
                        Err(SendError::Full) => {
                            crate::warn_throttled!(
                                self.throttler,
                                "viewer-full",
                                "Viewer of session {} is not keeping up, frame dropped",
                                self.session_id
                            );
                        }
                    }
                }
                Err(e) => {
                    consecutive = consecutive.saturating_add(1);
                    total_failures += 1;
                    if should_log_failure(total_failures) {
                        warn!(
                            "Frame read failed for session {} ({} total): {}",
                            self.session_id, total_failures, e
                        );
                    }
                    if let Some(max) = self.max_consecutive_failures {
                        if consecutive >= max {
                            self.send_error(format!(
                                "Capture failed after {} consecutive read errors",
                                consecutive
                            ));
                            break StopReason::TooManyFailures;
                        }
                    }
                }
            }

            tokio::time::sleep(pacing_delay(interval, tick.elapsed())).await;
        };

        debug!(
            "Session {}: {} frames sent, {} read failures",
            self.session_id, frames_sent, total_failures
        );
        reason
    }

    /// Drain pending control messages without waiting
    fn poll_control(&self, control: &mut mpsc::Receiver<Inbound>) -> Option<StopReason> {
        if self.conn.is_closed() {
            return Some(StopReason::Disconnected);
        }
        loop {
            match control.try_recv() {
                Ok(Inbound::Message { message, .. }) => match message {
                    ClientMessage::Stop => return Some(StopReason::StopRequested),
                    ClientMessage::Ping => {
                        let _ = self.conn.send_message(&ServerMessage::Pong);
                    }
                    other => trace!("Ignoring {:?} on capture session {}", other, self.session_id),
                },
                Ok(Inbound::Unrecognized { kind }) => {
                    trace!("Ignoring unknown message {:?}", kind);
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(StopReason::Disconnected),
            }
        }
    }

    fn send_error(&self, message: String) {
        let _ = self.conn.send_message(&ServerMessage::error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoConfig;
    use crate::events::EventHub;
    use crate::session::{MemoryStore, SessionDescriptor, SourceKind};
    use crate::stream::Outbound;
    use crate::video::capture::testing::{MockBackend, Step};
    use crate::video::pool::BlockingPool;
    use base64::Engine;

    struct Fixture {
        store: Arc<MemoryStore>,
        backend: Arc<MockBackend>,
        registry: Arc<CaptureRegistry>,
        status: StatusReporter,
    }

    fn fixture(backend: MockBackend) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.insert(SessionDescriptor {
            id: "S".into(),
            owner: Some("p".into()),
            source_kind: SourceKind::UsbDevice,
            source_locator: "device:0".into(),
            resolution: Some("1080p".into()),
            framerate: Some(30),
            status: SessionStatus::Pending,
        });
        let backend = Arc::new(backend);
        let registry = Arc::new(CaptureRegistry::new(backend.clone(), BlockingPool::new(2)));
        let status = StatusReporter::new(store.clone(), Arc::new(EventHub::new()));
        Fixture {
            store,
            backend,
            registry,
            status,
        }
    }

    fn settings(fps: u32) -> CaptureSettings {
        CaptureSettings::from_config(&VideoConfig::default(), "1080p", fps)
    }

    async fn next_json(rx: &mut mpsc::Receiver<Outbound>) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("queue closed");
        serde_json::from_str(msg.as_text().expect("text message")).unwrap()
    }

    #[test]
    fn test_pacing_delay_never_negative() {
        let interval = frame_interval(30);
        assert!(interval > Duration::from_millis(33) && interval < Duration::from_millis(34));
        assert_eq!(
            pacing_delay(interval, Duration::from_millis(10)),
            interval - Duration::from_millis(10)
        );
        assert_eq!(pacing_delay(interval, Duration::from_millis(50)), Duration::ZERO);
        assert_eq!(frame_interval(0), Duration::from_secs(1));
    }

    #[test]
    fn test_failure_log_schedule() {
        let logged: Vec<u64> = (1..=90).filter(|n| should_log_failure(*n)).collect();
        assert_eq!(logged, vec![1, 2, 3, 4, 5, 30, 60, 90]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transient_failures_then_jpeg_frame() {
        let fx = fixture(MockBackend::new(vec![Step::Fail, Step::Fail, Step::Fail, Step::Frame]));
        let (conn, mut rx) = Connection::detached(64);
        let (control_tx, mut control_rx) = mpsc::channel(8);

        let pacer = FramePacer::new("S", fx.registry.clone(), fx.status.clone(), conn, None);
        let task = tokio::spawn(async move { pacer.run("device:0", settings(200), &mut control_rx).await });

        let connected = next_json(&mut rx).await;
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["session_id"], "S");
        assert_eq!(fx.store.status("S"), Some(SessionStatus::Recording));

        // Three failed reads are absorbed; the first success is a JPEG
        let frame = next_json(&mut rx).await;
        assert_eq!(frame["type"], "frame");
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(frame["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(frame["timestamp_ms"].as_i64().unwrap() > 0);

        control_tx
            .send(Inbound::decode(r#"{"type":"stop"}"#))
            .await
            .unwrap();
        let reason = task.await.unwrap();

        assert_eq!(reason, StopReason::StopRequested);
        assert_eq!(fx.store.status("S"), Some(SessionStatus::Completed));
        assert_eq!(fx.backend.closes(), 1);
        assert!(!fx.registry.is_active("S"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disconnect_releases_capture() {
        let fx = fixture(MockBackend::new(vec![]));
        let (conn, mut rx) = Connection::detached(1024);
        let (control_tx, mut control_rx) = mpsc::channel(8);

        let pacer = FramePacer::new("S", fx.registry.clone(), fx.status.clone(), conn, None);
        let task = tokio::spawn(async move { pacer.run("device:0", settings(100), &mut control_rx).await });

        assert_eq!(next_json(&mut rx).await["type"], "connected");
        drop(control_tx);

        assert_eq!(task.await.unwrap(), StopReason::Disconnected);
        assert_eq!(fx.backend.closes(), 1);
        assert_eq!(fx.store.status("S"), Some(SessionStatus::Completed));
    }

    #[tokio::test]
    async fn test_open_failure_reports_error() {
        let fx = fixture(MockBackend::failing());
        let (conn, mut rx) = Connection::detached(8);
        let (_control_tx, mut control_rx) = mpsc::channel(8);

        let pacer = FramePacer::new("S", fx.registry.clone(), fx.status.clone(), conn, None);
        let reason = pacer.run("device:0", settings(30), &mut control_rx).await;

        assert_eq!(reason, StopReason::OpenFailed);
        let error = next_json(&mut rx).await;
        assert_eq!(error["type"], "error");
        assert_eq!(error["message"], "Failed to open camera device 0");
        assert_eq!(fx.store.status("S"), Some(SessionStatus::Error));
    }

    #[tokio::test]
    async fn test_invalid_locator_rejected() {
        let fx = fixture(MockBackend::new(vec![]));
        let (conn, mut rx) = Connection::detached(8);
        let (_control_tx, mut control_rx) = mpsc::channel(8);

        let pacer = FramePacer::new("S", fx.registry.clone(), fx.status.clone(), conn, None);
        let reason = pacer.run("/dev/video0", settings(30), &mut control_rx).await;

        assert_eq!(reason, StopReason::InvalidSource);
        assert_eq!(next_json(&mut rx).await["type"], "error");
        assert_eq!(fx.backend.opens(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_ceiling_ends_session() {
        let fx = fixture(MockBackend::new(vec![Step::Fail; 10]));
        let (conn, mut rx) = Connection::detached(64);
        let (_control_tx, mut control_rx) = mpsc::channel(8);

        let pacer = FramePacer::new("S", fx.registry.clone(), fx.status.clone(), conn, Some(3));
        let reason = pacer.run("device:0", settings(200), &mut control_rx).await;

        assert_eq!(reason, StopReason::TooManyFailures);
        assert_eq!(next_json(&mut rx).await["type"], "connected");
        let error = next_json(&mut rx).await;
        assert_eq!(error["type"], "error");
        assert_eq!(fx.store.status("S"), Some(SessionStatus::Error));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ping_answered_while_streaming() {
        let fx = fixture(MockBackend::new(vec![Step::Fail; 1000]));
        let (conn, mut rx) = Connection::detached(64);
        let (control_tx, mut control_rx) = mpsc::channel(8);

        let pacer = FramePacer::new("S", fx.registry.clone(), fx.status.clone(), conn, None);
        let task = tokio::spawn(async move { pacer.run("device:0", settings(100), &mut control_rx).await });

        assert_eq!(next_json(&mut rx).await["type"], "connected");
        control_tx
            .send(Inbound::decode(r#"{"type":"ping"}"#))
            .await
            .unwrap();
        assert_eq!(next_json(&mut rx).await["type"], "pong");

        control_tx
            .send(Inbound::decode(r#"{"type":"stop"}"#))
            .await
            .unwrap();
        assert_eq!(task.await.unwrap(), StopReason::StopRequested);
    }
}
