//! Registry entry types
//!
//! Per-device state the registry tracks: status flags, display metadata,
//! and the attached viewer/notice connections.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;

use crate::error::Result;

/// Write half of a connection the relay can push frames into
///
/// The real implementation is a split websocket sink; tests substitute a
/// recorder.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: &str) -> Result<()>;
    async fn send_binary(&mut self, data: Bytes) -> Result<()>;
}

/// Subsystems a provider reports status for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// Remote-automation driver
    Wda,
    /// Companion agent
    Cfa,
    /// Video pipeline
    Video,
}

/// Per-subsystem health flags for a bound device
///
/// Tri-state: `None` means the provider has not reported yet. Flags are
/// informational only and never gate whether a command may be sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub wda: Option<bool>,
    pub cfa: Option<bool>,
    pub video: Option<bool>,
}

impl DeviceStatus {
    pub fn set(&mut self, subsystem: Subsystem, up: bool) {
        match subsystem {
            Subsystem::Wda => self.wda = Some(up),
            Subsystem::Cfa => self.cfa = Some(up),
            Subsystem::Video => self.video = Some(up),
        }
    }
}

/// Display and click dimensions declared by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: i32,
    pub height: i32,
    pub click_width: i32,
    pub click_height: i32,
}

/// Viewer-display metadata for a device
///
/// Unlike [`DeviceStatus`] this survives provider rebinding; it describes
/// the device, not the binding.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Last reported orientation string
    pub orientation: String,
    /// Raw capability JSON as reported by the provider
    pub capabilities_json: String,
    /// Dimensions from the provider's existence callback
    pub geometry: Option<Geometry>,
}

/// Out-of-band signal for an active relay pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayControl {
    /// Force the pipeline to terminate; a termination notice goes to the
    /// provider's control channel before the sentinel takes effect
    Kick,
}

type DoneHook = Box<dyn FnOnce() + Send>;

/// A viewer's video connection as tracked by the registry
///
/// The teardown hook runs exactly once, either when a newer connection
/// evicts this one or when the session is detached.
#[derive(Clone)]
pub struct ViewerConn {
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
    /// Clock offset for this session, signed milliseconds
    pub offset_ms: i64,
    /// Reservation id the viewer presented
    pub rid: String,
    done: Arc<SyncMutex<Option<DoneHook>>>,
}

impl ViewerConn {
    pub fn new(
        sink: Box<dyn FrameSink>,
        offset_ms: i64,
        rid: impl Into<String>,
        done: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            offset_ms,
            rid: rid.into(),
            done: Arc::new(SyncMutex::new(Some(Box::new(done)))),
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.sink.lock().await.send_text(text).await
    }

    pub async fn send_binary(&self, data: Bytes) -> Result<()> {
        self.sink.lock().await.send_binary(data).await
    }

    /// Run the teardown hook if it has not run yet
    pub(crate) fn run_done(&self) -> bool {
        let hook = self.done.lock().take();
        match hook {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }
}

/// A viewer's notice connection (orientation changes and the like)
#[derive(Clone)]
pub struct NoticeConn {
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
}

impl NoticeConn {
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.sink.lock().await.send_text(text).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct NullSink;

    #[async_trait]
    impl FrameSink for NullSink {
        async fn send_text(&mut self, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn send_binary(&mut self, _data: Bytes) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_status_tristate() {
        let mut status = DeviceStatus::default();
        assert_eq!(status.wda, None);

        status.set(Subsystem::Wda, true);
        status.set(Subsystem::Video, false);
        assert_eq!(status.wda, Some(true));
        assert_eq!(status.cfa, None);
        assert_eq!(status.video, Some(false));
    }

    #[tokio::test]
    async fn test_done_hook_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = Arc::clone(&count);
        let conn = ViewerConn::new(Box::new(NullSink), 0, "r1", move || {
            hook_count.fetch_add(1, Ordering::SeqCst);
        });

        let clone = conn.clone();
        assert!(conn.run_done());
        assert!(!clone.run_done());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
