//! Live video path
//!
//! Everything between a provider's image socket and a viewer's browser:
//! clock synchronization, frame timestamping, bandwidth pacing, and the
//! relay pipeline that ties them together.

pub mod clock;
pub mod pace;
pub mod relay;

pub use clock::{clock_offset, now_ms, stamp_frame, sync_greeting, SyncReply};
pub use pace::PaceState;
pub use relay::{RelayConfig, RelayMsg, VideoRelay};
