//! Server boundary
//!
//! The websocket listener that accepts provider and viewer connections,
//! the configuration surface, and the status-callback boundary through
//! which providers report device lifecycle.

pub mod config;
pub mod listener;
pub mod query;
pub mod status;

pub use config::{ServerConfig, UNMETERED_BPS};
pub use listener::RelayServer;
pub use status::{apply_status, kick_viewer, StatusEvent};
