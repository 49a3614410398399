//! Relay server listener
//!
//! Handles the TCP accept loop, routes each websocket upgrade by its
//! request path, and spawns the per-connection handlers.
//!
//! Endpoints:
//!
//! - `/provider/ws?id=&user=` — provider control channel
//! - `/provider/imgStream?udid=` — provider video frames
//! - `/device/imgStream?udid=&rid=` — viewer video
//! - `/device/notices?udid=` — viewer notices (orientation and the like)

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;

use crate::control::{Action, ControlChannel};
use crate::error::Result;
use crate::net::{censor_udid, WsStream};
use crate::registry::{DeviceRegistry, FrameSink, NoticeConn, ViewerConn};
use crate::server::config::ServerConfig;
use crate::server::query::query_param;
use crate::video::{clock_offset, now_ms, sync_greeting, SyncReply, VideoRelay};

/// Where an upgrade request is headed
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    ProviderControl { provider_id: i64, user: String },
    ProviderVideo { udid: String },
    ViewerVideo { udid: String, rid: String },
    Notices { udid: String },
}

fn parse_route(uri: &Uri) -> Option<Route> {
    let query = uri.query().unwrap_or("");
    match uri.path() {
        "/provider/ws" => Some(Route::ProviderControl {
            provider_id: query_param(query, "id")?.parse().ok()?,
            user: query_param(query, "user").unwrap_or_else(|| "provider".to_string()),
        }),
        "/provider/imgStream" => Some(Route::ProviderVideo {
            udid: query_param(query, "udid")?,
        }),
        "/device/imgStream" => Some(Route::ViewerVideo {
            udid: query_param(query, "udid")?,
            rid: query_param(query, "rid")?,
        }),
        "/device/notices" => Some(Route::Notices {
            udid: query_param(query, "udid")?,
        }),
        _ => None,
    }
}

/// Device relay server
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<DeviceRegistry>,
}

impl RelayServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(DeviceRegistry::new()),
        }
    }

    /// Get a reference to the device registry
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Relay server listening");
        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Relay server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let mut uri: Option<Uri> = None;
            let capture = |req: &Request, resp: HandshakeResponse| {
                uri = Some(req.uri().clone());
                Ok::<_, ErrorResponse>(resp)
            };

            let ws = match tokio_tungstenite::accept_hdr_async(socket, capture).await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::debug!(peer = %peer_addr, error = %e, "Websocket upgrade failed");
                    return;
                }
            };

            let route = uri.as_ref().and_then(parse_route);
            let route = match route {
                Some(route) => route,
                None => {
                    tracing::warn!(peer = %peer_addr, uri = ?uri, "No route for upgrade request");
                    return;
                }
            };

            tracing::debug!(peer = %peer_addr, route = ?route, "Websocket connected");
            dispatch(config, registry, ws, route).await;
        });
    }
}

async fn dispatch(config: ServerConfig, registry: Arc<DeviceRegistry>, ws: WsStream, route: Route) {
    match route {
        Route::ProviderControl { provider_id, user } => {
            let channel =
                ControlChannel::spawn(provider_id, user, ws, Arc::clone(&registry), config.ping_interval);
            registry.set_channel(provider_id, channel).await;
        }
        Route::ProviderVideo { udid } => {
            provider_video(config, registry, ws, udid).await;
        }
        Route::ViewerVideo { udid, rid } => {
            viewer_video(registry, ws, udid, rid).await;
        }
        Route::Notices { udid } => {
            notices(registry, ws, udid).await;
        }
    }
}

/// Viewer video socket: clock sync handshake, then frames until it drops
async fn viewer_video(registry: Arc<DeviceRegistry>, ws: WsStream, udid: String, rid: String) {
    let channel = match registry.channel_for_device(&udid).await {
        Some(channel) => channel,
        None => {
            tracing::warn!(udid = %censor_udid(&udid), "Viewer for device with no provider");
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();
    if sink.send_text(&sync_greeting(now_ms())).await.is_err() {
        return;
    }

    let reply = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<SyncReply>(text.as_str()) {
                    Ok(reply) => break reply,
                    Err(e) => {
                        tracing::warn!(udid = %censor_udid(&udid), error = %e,
                            "Bad clock sync reply");
                        return;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => {}
            Some(Err(_)) => return,
        }
    };
    let offset_ms = clock_offset(reply, now_ms());

    tracing::info!(
        udid = %censor_udid(&udid),
        rid = %rid,
        offset_ms,
        "Viewer video session starting"
    );

    let done = {
        let channel = Arc::clone(&channel);
        let udid = udid.clone();
        move || {
            channel.send(Action::StopStream { udid });
        }
    };
    let viewer = ViewerConn::new(Box::new(sink), offset_ms, rid.clone(), done);
    registry.attach_viewer(&udid, viewer).await;

    channel.send(Action::StartStream { udid: udid.clone() });

    // Hold the read side open; viewers send nothing after the sync reply.
    loop {
        match stream.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }

    registry.detach_viewer(&udid, &rid).await;
    tracing::info!(udid = %censor_udid(&udid), rid = %rid, "Viewer disconnected");
}

/// Provider video socket: feed the relay pipeline toward the viewer
async fn provider_video(
    config: ServerConfig,
    registry: Arc<DeviceRegistry>,
    ws: WsStream,
    udid: String,
) {
    let viewer = match registry.viewer(&udid).await {
        Some(viewer) => viewer,
        None => {
            tracing::warn!(udid = %censor_udid(&udid), "Provider video with no viewer attached");
            return;
        }
    };

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    registry.add_control_queue(&udid, control_tx).await;
    let pace = registry.register_pace(&udid, config.unmetered_bps).await;

    let rid = viewer.rid.clone();
    let relay = VideoRelay::new(
        udid.clone(),
        rid,
        Arc::clone(&registry),
        config.relay_config(),
    );
    relay.run(ws, control_rx, viewer, pace).await;
}

/// Notice socket: held open for server-pushed notices, nothing read
async fn notices(registry: Arc<DeviceRegistry>, ws: WsStream, udid: String) {
    let (sink, mut stream) = ws.split();
    registry
        .attach_notice(&udid, NoticeConn::new(Box::new(sink)))
        .await;

    loop {
        match stream.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }

    registry.detach_notice(&udid).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_route_provider_control() {
        assert_eq!(
            parse_route(&uri("/provider/ws?id=7&user=alice")),
            Some(Route::ProviderControl {
                provider_id: 7,
                user: "alice".into()
            })
        );
        // User is optional, id is not.
        assert_eq!(
            parse_route(&uri("/provider/ws?id=7")),
            Some(Route::ProviderControl {
                provider_id: 7,
                user: "provider".into()
            })
        );
        assert_eq!(parse_route(&uri("/provider/ws")), None);
        assert_eq!(parse_route(&uri("/provider/ws?id=abc")), None);
    }

    #[test]
    fn test_route_video_paths() {
        assert_eq!(
            parse_route(&uri("/provider/imgStream?udid=d1")),
            Some(Route::ProviderVideo { udid: "d1".into() })
        );
        assert_eq!(
            parse_route(&uri("/device/imgStream?udid=d1&rid=r9")),
            Some(Route::ViewerVideo {
                udid: "d1".into(),
                rid: "r9".into()
            })
        );
        // Both parameters are required for a viewer.
        assert_eq!(parse_route(&uri("/device/imgStream?udid=d1")), None);
        assert_eq!(
            parse_route(&uri("/device/notices?udid=d1")),
            Some(Route::Notices { udid: "d1".into() })
        );
    }

    #[test]
    fn test_route_unknown_path() {
        assert_eq!(parse_route(&uri("/metrics")), None);
        assert_eq!(parse_route(&uri("/")), None);
    }

    #[test]
    fn test_server_exposes_registry() {
        let server = RelayServer::new(ServerConfig::default());
        assert!(Arc::strong_count(server.registry()) >= 1);
    }
}
