//! Session → capture adapter registry
//!
//! At most one adapter exists per session id. The map lock is held only
//! to look up or swap entries; opening, reading and closing happen on the
//! [`BlockingPool`]. Concurrent `start`s for the same id share one
//! in-flight open through a `OnceCell`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::capture::{open_with_diagnostic, CaptureAdapter, CaptureBackend, CaptureSettings};
use super::frame::Frame;
use super::locator::SourceLocator;
use super::pool::BlockingPool;
use crate::error::{AppError, Result};

/// An open adapter owned by the registry
pub struct CaptureHandle {
    session_id: String,
    locator: SourceLocator,
    settings: CaptureSettings,
    adapter: Mutex<Option<Box<dyn CaptureAdapter>>>,
}

impl CaptureHandle {
    fn new(
        session_id: String,
        locator: SourceLocator,
        settings: CaptureSettings,
        adapter: Box<dyn CaptureAdapter>,
    ) -> Self {
        Self {
            session_id,
            locator,
            settings,
            adapter: Mutex::new(Some(adapter)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn locator(&self) -> &SourceLocator {
        &self.locator
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.adapter.lock().is_some()
    }

    // Blocking; reads for one session are serialized by the adapter lock
    fn read_blocking(&self) -> Result<Frame> {
        let mut adapter = self.adapter.lock();
        let adapter = adapter
            .as_mut()
            .ok_or_else(|| AppError::TransientRead("capture stopped".to_string()))?;
        adapter.read_frame().map(Frame::now)
    }

    // Blocking
    fn close_blocking(&self) {
        if let Some(mut adapter) = self.adapter.lock().take() {
            adapter.close();
            info!("Released capture for session {} ({})", self.session_id, self.locator);
        }
    }
}

type Slot = Arc<OnceCell<Arc<CaptureHandle>>>;

pub struct CaptureRegistry {
    backend: Arc<dyn CaptureBackend>,
    pool: BlockingPool,
    sessions: Mutex<HashMap<String, Slot>>,
}

impl CaptureRegistry {
    pub fn new(backend: Arc<dyn CaptureBackend>, pool: BlockingPool) -> Self {
        Self {
            backend,
            pool,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or reuse) the adapter for `session_id`
    ///
    /// Idempotent: a session that already has an adapter gets it back
    /// without reopening, and concurrent calls open it exactly once.
    pub async fn start(
        &self,
        session_id: &str,
        locator: &SourceLocator,
        settings: &CaptureSettings,
    ) -> Result<Arc<CaptureHandle>> {
        let slot = {
            let mut sessions = self.sessions.lock();
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let opened = slot
            .get_or_try_init(|| async {
                let backend = self.backend.clone();
                let job_locator = locator.clone();
                let job_settings = settings.clone();
                let adapter = self
                    .pool
                    .submit(move || open_with_diagnostic(backend.as_ref(), &job_locator, &job_settings))
                    .await??;
                debug!("Capture opened for session {}", session_id);
                Ok::<_, AppError>(Arc::new(CaptureHandle::new(
                    session_id.to_string(),
                    locator.clone(),
                    settings.clone(),
                    adapter,
                )))
            })
            .await;

        match opened {
            Ok(handle) => {
                let handle = handle.clone();
                if !self.is_current(session_id, &slot) {
                    // Stopped while the open was in flight
                    self.release(handle).await;
                    return Err(AppError::DeviceOpen {
                        locator: locator.to_string(),
                        reason: "capture stopped while opening".to_string(),
                    });
                }
                Ok(handle)
            }
            Err(e) => {
                let mut sessions = self.sessions.lock();
                if sessions
                    .get(session_id)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && current.get().is_none())
                {
                    sessions.remove(session_id);
                }
                Err(e)
            }
        }
    }

    /// Release the adapter for `session_id`; unknown ids are a no-op
    pub async fn stop(&self, session_id: &str) {
        let slot = self.sessions.lock().remove(session_id);
        if let Some(handle) = slot.and_then(|slot| slot.get().cloned()) {
            self.release(handle).await;
        }
    }

    /// Release every adapter (shutdown)
    pub async fn stop_all(&self) {
        let slots: Vec<Slot> = self.sessions.lock().drain().map(|(_, slot)| slot).collect();
        for handle in slots.into_iter().filter_map(|slot| slot.get().cloned()) {
            self.release(handle).await;
        }
    }

    /// Read one frame on the worker pool
    pub async fn read_frame(&self, handle: &Arc<CaptureHandle>) -> Result<Frame> {
        let handle = handle.clone();
        self.pool.submit(move || handle.read_blocking()).await?
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|slot| slot.get().is_some())
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    fn is_current(&self, session_id: &str, slot: &Slot) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    async fn release(&self, handle: Arc<CaptureHandle>) {
        let session_id = handle.session_id().to_string();
        if let Err(e) = self.pool.submit(move || handle.close_blocking()).await {
            debug!("Close job for session {} failed: {}", session_id, e);
        }
    }
}
