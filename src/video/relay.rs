//! Frame relay pipeline
//!
//! One pipeline per active video session, fed by the provider's image
//! socket and drained into the viewer's socket. Two tasks plus the
//! caller's own:
//!
//! ```text
//! provider ws --> ingest ---(bounded queue)---> egress --> viewer ws
//!                   ^                             ^
//!            kick queue                      ping task
//! ```
//!
//! The queue is bounded and the egress side always drains to the newest
//! frame before sending, so a slow viewer sees fresh frames at its own
//! rate instead of an ever-growing backlog.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::clock::{now_ms, stamp_frame};
use super::pace::PaceState;
use crate::control::channel::ControlSocket;
use crate::control::Action;
use crate::net::censor_udid;
use crate::registry::{DeviceRegistry, RelayControl, ViewerConn};

/// Message flowing through the relay queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMsg {
    /// A video frame from the provider
    Frame(Bytes),
    /// Terminate the pipeline
    Kick,
    /// Forward a keepalive ping to the viewer
    Ping,
}

/// Tuning knobs for a relay pipeline
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Frame queue depth; a full queue makes ingest wait for a drain
    pub queue_capacity: usize,
    /// Egress sleep when the queue is empty
    pub poll_sleep: Duration,
    /// Viewer keepalive interval
    pub ping_interval: Duration,
    /// Width of the decimal timestamp suffix on each frame
    pub timestamp_width: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 20,
            poll_sleep: Duration::from_millis(20),
            ping_interval: Duration::from_secs(1),
            timestamp_width: 100,
        }
    }
}

/// A provider-to-viewer video relay session
pub struct VideoRelay {
    udid: String,
    rid: String,
    config: RelayConfig,
    registry: Arc<DeviceRegistry>,
}

impl VideoRelay {
    pub fn new(
        udid: impl Into<String>,
        rid: impl Into<String>,
        registry: Arc<DeviceRegistry>,
        config: RelayConfig,
    ) -> Self {
        Self {
            udid: udid.into(),
            rid: rid.into(),
            config,
            registry,
        }
    }

    /// Run the pipeline until the provider disconnects, the viewer
    /// disconnects, or a kick arrives
    ///
    /// On return the session's registry entries (viewer, kick queue,
    /// pacing state) are gone; the viewer's teardown hook has run if the
    /// viewer was still ours.
    pub async fn run<S: ControlSocket>(
        self,
        provider_socket: S,
        control_rx: mpsc::UnboundedReceiver<RelayControl>,
        viewer: ViewerConn,
        pace: Arc<PaceState>,
    ) {
        let (sink, stream) = provider_socket.split();
        let (frame_tx, frame_rx) = mpsc::channel(self.config.queue_capacity);

        let ingest = tokio::spawn(ingest_loop(
            stream,
            sink,
            frame_tx.clone(),
            control_rx,
            Arc::clone(&self.registry),
            self.udid.clone(),
        ));
        let pinger = tokio::spawn(ping_loop(frame_tx, self.config.ping_interval));

        egress_loop(frame_rx, &viewer, &pace, &self.config).await;

        // The kick notice (if any) is already out by the time egress
        // returns, so cancelling here loses nothing.
        ingest.abort();
        pinger.abort();

        self.registry.detach_viewer(&self.udid, &self.rid).await;
        self.registry.remove_control_queue(&self.udid).await;
        self.registry.remove_pace(&self.udid).await;

        tracing::info!(udid = %censor_udid(&self.udid), rid = %self.rid, "Video relay finished");
    }
}

/// Read provider frames into the queue; watch the kick queue
///
/// A full queue makes the frame push wait for egress to drain, so the
/// newest frame is never the one shed. Egress drains every poll cycle,
/// which bounds the wait.
async fn ingest_loop<S: ControlSocket>(
    mut stream: SplitStream<S>,
    mut sink: SplitSink<S, Message>,
    frame_tx: mpsc::Sender<RelayMsg>,
    mut control_rx: mpsc::UnboundedReceiver<RelayControl>,
    registry: Arc<DeviceRegistry>,
    udid: String,
) {
    loop {
        tokio::select! {
            control = control_rx.recv() => {
                if let Some(RelayControl::Kick) = control {
                    // Termination notice to the provider's control
                    // channel so it can stop capturing promptly.
                    match registry.channel_for_device(&udid).await {
                        Some(channel) => channel.send(Action::Kick { udid: udid.clone() }),
                        None => {
                            tracing::debug!(udid = %censor_udid(&udid),
                                "No control channel for kick notice");
                        }
                    }
                    let _ = frame_tx.send(RelayMsg::Kick).await;
                }
                break;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Binary(frame))) => {
                        if frame_tx.send(RelayMsg::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = frame_tx.send(RelayMsg::Kick).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(udid = %censor_udid(&udid), error = %e,
                            "Provider video socket error");
                        let _ = frame_tx.send(RelayMsg::Kick).await;
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Queue a viewer keepalive on a fixed interval
async fn ping_loop(frame_tx: mpsc::Sender<RelayMsg>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if frame_tx.send(RelayMsg::Ping).await.is_err() {
            break;
        }
    }
}

/// Drain the queue to the newest frame and push it to the viewer
///
/// Each delivered frame carries two messages: a text frame with the
/// offset-adjusted send time, then the binary frame with the timestamp
/// suffix appended. Between frames the loop honours the pacing delay.
pub(crate) async fn egress_loop(
    mut rx: mpsc::Receiver<RelayMsg>,
    viewer: &ViewerConn,
    pace: &PaceState,
    config: &RelayConfig,
) {
    loop {
        let mut latest = None;
        let mut pings = 0u32;
        loop {
            match rx.try_recv() {
                Ok(RelayMsg::Frame(frame)) => latest = Some(frame),
                Ok(RelayMsg::Ping) => pings += 1,
                Ok(RelayMsg::Kick) => return,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return,
            }
        }

        if pings > 0 && viewer.send_text("ping").await.is_err() {
            return;
        }

        let frame = match latest {
            Some(frame) => frame,
            None => {
                tokio::time::sleep(config.poll_sleep).await;
                continue;
            }
        };

        let queued_at = now_ms() + viewer.offset_ms;
        if viewer.send_text(&queued_at.to_string()).await.is_err() {
            return;
        }

        let before = now_ms();
        let stamped = stamp_frame(&frame, before + viewer.offset_ms, config.timestamp_width);
        if viewer.send_binary(stamped).await.is_err() {
            return;
        }

        let spent = Duration::from_millis((now_ms() - before).max(0) as u64);
        let delay = pace.delay();
        if delay > spent {
            tokio::time::sleep(delay - spent).await;
        }
    }
}
