//! Per-provider control channel
//!
//! Owns the provider's persistent command socket. One sender task drains a
//! command queue and writes wire JSON; one receiver task decodes every
//! inbound message and matches responses to pending requests by
//! correlation id; a keepalive task pings the provider every few seconds.
//!
//! Once the channel is dead every operation degrades to a cheap logged
//! no-op. Callers can never deadlock against a torn-down provider.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::control::command::{self, Action, Response};
use crate::control::pending::PendingRequests;
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;

/// Socket bound required by the channel tasks
pub trait ControlSocket:
    Stream<Item = std::result::Result<Message, WsError>>
    + Sink<Message, Error = WsError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> ControlSocket for T where
    T: Stream<Item = std::result::Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Send
        + Unpin
        + 'static
{
}

/// Channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Socket accepted, tasks not yet running
    Connecting,
    /// Commands flow
    Active,
    /// Torn down; all operations are no-ops
    Dead,
}

const STATE_CONNECTING: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_DEAD: u8 = 2;

enum Outbound {
    Command {
        action: Action,
        responder: Option<oneshot::Sender<Response>>,
    },
    Shutdown,
}

/// Control channel to one provider
pub struct ControlChannel {
    provider_id: i64,
    user: String,
    tx: mpsc::UnboundedSender<Outbound>,
    pending: Arc<PendingRequests>,
    state: AtomicU8,
    registry: Arc<DeviceRegistry>,
}

impl ControlChannel {
    /// Spawn the sender, receiver and keepalive tasks over an established
    /// provider socket
    pub fn spawn<S: ControlSocket>(
        provider_id: i64,
        user: impl Into<String>,
        socket: S,
        registry: Arc<DeviceRegistry>,
        ping_interval: Duration,
    ) -> Arc<Self> {
        let user = user.into();
        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let channel = Arc::new(Self {
            provider_id,
            user: user.clone(),
            tx,
            pending: Arc::new(PendingRequests::new()),
            state: AtomicU8::new(STATE_CONNECTING),
            registry,
        });

        tracing::info!(
            provider = provider_id,
            user = %user,
            "Provider control channel established"
        );

        tokio::spawn(sender_loop(rx, sink, Arc::clone(&channel)));
        tokio::spawn(receiver_loop(stream, Arc::clone(&channel)));
        tokio::spawn(keepalive_loop(Arc::clone(&channel), ping_interval));

        channel.state.store(STATE_ACTIVE, Ordering::SeqCst);
        channel
    }

    /// Provider id this channel serves
    pub fn provider_id(&self) -> i64 {
        self.provider_id
    }

    /// Provider username
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CONNECTING => ChannelState::Connecting,
            STATE_ACTIVE => ChannelState::Active,
            _ => ChannelState::Dead,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_DEAD
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Issue an action and wait for the correlated response
    ///
    /// Actions the provider never answers resolve with an empty response
    /// as soon as they are on the wire.
    pub async fn request(&self, action: Action) -> Result<Response> {
        if self.is_dead() {
            tracing::debug!(
                provider = self.provider_id,
                ?action,
                "Dropping command, channel is dead"
            );
            return Err(Error::ChannelUnavailable(self.provider_id));
        }

        let (responder, rx) = oneshot::channel();
        self.tx
            .send(Outbound::Command {
                action,
                responder: Some(responder),
            })
            .map_err(|_| Error::ChannelUnavailable(self.provider_id))?;

        rx.await.map_err(|_| Error::ChannelDead)
    }

    /// Enqueue a fire-and-forget action
    ///
    /// Dead channel degrades to a logged no-op; callers that care about
    /// delivery should use [`request`](Self::request) on an action that
    /// answers.
    pub fn send(&self, action: Action) {
        if self.is_dead() {
            tracing::debug!(
                provider = self.provider_id,
                ?action,
                "Dropping command, channel is dead"
            );
            return;
        }
        if self
            .tx
            .send(Outbound::Command {
                action,
                responder: None,
            })
            .is_err()
        {
            tracing::debug!(provider = self.provider_id, "Sender task gone");
        }
    }

    /// Tear the channel down, exactly once
    ///
    /// Fails every pending request, unbinds the provider from the registry
    /// and wakes the sender task so it can close the socket.
    pub async fn teardown(&self) {
        if self.state.swap(STATE_DEAD, Ordering::SeqCst) == STATE_DEAD {
            return;
        }

        let failed = self.pending.fail_all();
        let _ = self.tx.send(Outbound::Shutdown);
        self.registry.drop_provider(self.provider_id, self).await;

        tracing::info!(
            provider = self.provider_id,
            user = %self.user,
            failed_requests = failed,
            "Provider control channel lost"
        );
    }
}

async fn sender_loop<S: ControlSocket>(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut sink: SplitSink<S, Message>,
    channel: Arc<ControlChannel>,
) {
    while let Some(outbound) = rx.recv().await {
        let (action, responder) = match outbound {
            Outbound::Shutdown => break,
            Outbound::Command { action, responder } => (action, responder),
        };

        // Actions the provider never answers go out with id 0; their
        // responder (if any) is acked once the write succeeds.
        let (id, ack) = match responder {
            Some(responder) if action.needs_response() => {
                (channel.pending.register(responder), None)
            }
            Some(responder) => (0, Some(responder)),
            None => (0, None),
        };

        let text = match command::encode(&action, id) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, ?action, "Failed to encode command");
                if id != 0 {
                    channel.pending.discard(id);
                }
                continue;
            }
        };

        tracing::debug!(provider = channel.provider_id, id, "Sending command");

        if let Err(e) = sink.send(Message::text(text)).await {
            let e = Error::SendFailure(e.to_string());
            tracing::warn!(
                provider = channel.provider_id,
                error = %e,
                "Failed to send command to provider"
            );
            channel.teardown().await;
            break;
        }

        if let Some(ack) = ack {
            let _ = ack.send(Response::empty());
        }
    }

    let _ = sink.close().await;
}

async fn receiver_loop<S: ControlSocket>(mut stream: SplitStream<S>, channel: Arc<ControlChannel>) {
    while let Some(inbound) = stream.next().await {
        match inbound {
            Ok(Message::Text(text)) => handle_inbound(&channel, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(
                    provider = channel.provider_id,
                    error = %e,
                    "Provider socket read error"
                );
                break;
            }
        }
    }
    channel.teardown().await;
}

async fn handle_inbound(channel: &ControlChannel, raw: &str) {
    let response = match Response::decode(raw) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                provider = channel.provider_id,
                error = %e,
                "Could not decode message from provider"
            );
            return;
        }
    };

    if response.id == 0 {
        handle_unsolicited(channel, response).await;
        return;
    }

    let id = response.id;
    if let Err(e) = channel.pending.resolve(id, response) {
        // Duplicate or stale response; never fatal to the receiver.
        tracing::warn!(provider = channel.provider_id, error = %e, "Dropping response");
    }
}

/// Provider-initiated traffic (correlation id zero)
async fn handle_unsolicited(channel: &ControlChannel, message: Response) {
    match message.str_field("type") {
        Some("bandwidth") => {
            let udid = message.str_field("udid").unwrap_or_default().to_string();
            let bps = message.int_field("bps").unwrap_or(0);
            let avg_frame = message.int_field("avgFrame").unwrap_or(0);
            channel.registry.update_pace(&udid, bps, avg_frame).await;
        }
        other => {
            tracing::debug!(
                provider = channel.provider_id,
                kind = ?other,
                "Unsolicited provider message"
            );
        }
    }
}

async fn keepalive_loop(channel: Arc<ControlChannel>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if channel.is_dead() {
            break;
        }
        // The reply must land within one interval; a provider whose
        // socket stays open but never answers must not stall the cadence.
        match tokio::time::timeout(interval, channel.request(Action::Ping)).await {
            Ok(Ok(response)) if response.is_pong() => {}
            Ok(Ok(_)) => {
                tracing::warn!(provider = channel.provider_id, "Keepalive got non-pong reply");
                channel.teardown().await;
                break;
            }
            Ok(Err(_)) => {
                channel.teardown().await;
                break;
            }
            Err(_) => {
                tracing::warn!(provider = channel.provider_id, "Keepalive ping went unanswered");
                channel.teardown().await;
                break;
            }
        }
    }
}
