//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::video::RelayConfig;

/// Bandwidth value providers send when their link is unmetered
pub const UNMETERED_BPS: i64 = 10_000_000;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Control channel keepalive interval
    pub ping_interval: Duration,

    /// Relay frame queue depth per video session
    pub frame_queue_capacity: usize,

    /// Relay egress sleep when no frame is queued
    pub egress_poll_sleep: Duration,

    /// Viewer keepalive interval on the video socket
    pub viewer_ping_interval: Duration,

    /// Bandwidth report value that disables pacing
    pub unmetered_bps: i64,

    /// Width of the decimal timestamp suffix on relayed frames
    pub timestamp_width: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            ping_interval: Duration::from_secs(5),
            frame_queue_capacity: 20,
            egress_poll_sleep: Duration::from_millis(20),
            viewer_ping_interval: Duration::from_secs(1),
            unmetered_bps: UNMETERED_BPS,
            timestamp_width: 100,
            tcp_nodelay: true, // Important for low latency
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the control channel keepalive interval
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the relay frame queue depth
    pub fn frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.frame_queue_capacity = capacity.max(1);
        self
    }

    /// Set the relay egress poll sleep
    pub fn egress_poll_sleep(mut self, sleep: Duration) -> Self {
        self.egress_poll_sleep = sleep;
        self
    }

    /// Set the viewer keepalive interval
    pub fn viewer_ping_interval(mut self, interval: Duration) -> Self {
        self.viewer_ping_interval = interval;
        self
    }

    /// The per-session relay tuning derived from this config
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            queue_capacity: self.frame_queue_capacity,
            poll_sleep: self.egress_poll_sleep,
            ping_interval: self.viewer_ping_interval,
            timestamp_width: self.timestamp_width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.frame_queue_capacity, 20);
        assert_eq!(config.unmetered_bps, UNMETERED_BPS);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 9000);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .ping_interval(Duration::from_secs(10))
            .frame_queue_capacity(5)
            .egress_poll_sleep(Duration::from_millis(10))
            .viewer_ping_interval(Duration::from_secs(2));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.frame_queue_capacity, 5);
        assert_eq!(config.egress_poll_sleep, Duration::from_millis(10));
        assert_eq!(config.viewer_ping_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_frame_queue_capacity_floor() {
        let config = ServerConfig::default().frame_queue_capacity(0);
        assert_eq!(config.frame_queue_capacity, 1);
    }

    #[test]
    fn test_relay_config_mapping() {
        let config = ServerConfig::default().frame_queue_capacity(7);
        let relay = config.relay_config();

        assert_eq!(relay.queue_capacity, 7);
        assert_eq!(relay.poll_sleep, config.egress_poll_sleep);
        assert_eq!(relay.ping_interval, config.viewer_ping_interval);
        assert_eq!(relay.timestamp_width, config.timestamp_width);
    }
}
