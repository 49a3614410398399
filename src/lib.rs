//! Device relay server
//!
//! Brokers remote control and live video between physical mobile devices
//! attached to "provider" agents and "viewer" browser sessions, over
//! websockets.
//!
//! - [`control`] — per-provider control channel multiplexing correlated
//!   request/response commands over one socket
//! - [`video`] — frame relay with drop-to-latest backpressure, clock
//!   synchronization and bandwidth-adaptive pacing
//! - [`registry`] — concurrent source of truth for device bindings,
//!   status and attached sockets
//! - [`server`] — the websocket listener and status-callback boundary
//!
//! ```no_run
//! use devrelay::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> devrelay::Result<()> {
//!     let server = RelayServer::new(ServerConfig::default());
//!     server.run().await
//! }
//! ```

pub mod control;
pub mod error;
pub(crate) mod net;
pub mod registry;
pub mod server;
pub mod video;

pub use control::{Action, ControlChannel, Response};
pub use error::{Error, Result};
pub use registry::DeviceRegistry;
pub use server::{RelayServer, ServerConfig, StatusEvent};
pub use video::{RelayConfig, VideoRelay};
