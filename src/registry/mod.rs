//! Device registry
//!
//! Concurrent store mapping device identifiers to provider bindings,
//! status flags and attached sockets/queues. Safely mutated from many
//! concurrent connections; the single source of truth for who serves
//! what.

pub mod entry;
pub mod store;

pub use entry::{
    DeviceInfo, DeviceStatus, FrameSink, Geometry, NoticeConn, RelayControl, Subsystem, ViewerConn,
};
pub use store::DeviceRegistry;
