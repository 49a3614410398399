//! Provider control channel
//!
//! Turns synchronous-looking remote procedure calls into correlated
//! request/response traffic over one multiplexed provider socket.
//!
//! # Architecture
//!
//! ```text
//!   request(Action) ──┐
//!   send(Action) ─────┤ unbounded queue
//!                     ▼
//!              [sender task] ──encode {id,type,udid,…}──► provider socket
//!                     ▲
//!        PendingRequests (id → oneshot)
//!                     │
//!              [receiver task] ◄──{id, result…}─────────  provider socket
//!              [keepalive task] ping every 5s, pong expected
//! ```

pub mod channel;
pub mod command;
pub mod pending;

pub use channel::{ChannelState, ControlChannel};
pub use command::{Action, Response};
pub use pending::PendingRequests;
