//! Clock synchronization and frame timestamping
//!
//! A one-shot handshake run when a viewer's video socket opens: the
//! server sends its clock, the viewer echoes it along with its own, and
//! the half-round-trip estimate yields a per-session offset. The offset
//! is added to every timestamp the relay embeds afterwards, so the
//! viewer can compute latency without continuous re-synchronization.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;

/// Current epoch time in milliseconds
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Greeting sent to the viewer the moment its video socket opens
pub fn sync_greeting(now: i64) -> String {
    format!("sync,{}", now)
}

/// The viewer's reply to the sync greeting
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SyncReply {
    /// Server clock echoed back from the greeting
    #[serde(rename = "sentTime")]
    pub sent_time: i64,
    /// Viewer clock at receipt of the greeting
    #[serde(rename = "clientTime")]
    pub client_time: i64,
}

/// Viewer clock offset relative to the server, signed milliseconds
///
/// Models the greeting as taking half the round trip to arrive: the
/// viewer's clock at receipt should read `sentTime + roundTrip/2`, and
/// the deviation from that is the skew.
pub fn clock_offset(reply: SyncReply, now: i64) -> i64 {
    let round_trip = now - reply.sent_time;
    let one_way = round_trip / 2;
    let predicted_client_time = reply.sent_time + one_way;
    reply.client_time - predicted_client_time
}

/// Append the fixed-width decimal timestamp suffix to a frame payload
///
/// The suffix is right-justified so the viewer can slice it off at a
/// known offset from the end.
pub fn stamp_frame(frame: &Bytes, timestamp_ms: i64, width: usize) -> Bytes {
    let mut stamped = BytesMut::with_capacity(frame.len() + width);
    stamped.put_slice(frame);
    stamped.put_slice(format!("{:>1$}", timestamp_ms, width).as_bytes());
    stamped.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_symmetric_path_no_skew() {
        let reply = SyncReply {
            sent_time: 1000,
            client_time: 1050,
        };
        // roundTrip=100, oneWay=50, predicted=1050 -> offset 0
        assert_eq!(clock_offset(reply, 1100), 0);
    }

    #[test]
    fn test_offset_skewed_client() {
        let reply = SyncReply {
            sent_time: 1000,
            client_time: 1250,
        };
        // Client clock runs 200ms ahead of the path estimate.
        assert_eq!(clock_offset(reply, 1100), 200);

        let reply = SyncReply {
            sent_time: 1000,
            client_time: 950,
        };
        assert_eq!(clock_offset(reply, 1100), -100);
    }

    #[test]
    fn test_sync_greeting_format() {
        assert_eq!(sync_greeting(1692000000123), "sync,1692000000123");
    }

    #[test]
    fn test_sync_reply_parses() {
        let reply: SyncReply =
            serde_json::from_str(r#"{"sentTime":1000,"clientTime":1050}"#).unwrap();
        assert_eq!(reply.sent_time, 1000);
        assert_eq!(reply.client_time, 1050);
    }

    #[test]
    fn test_stamp_frame() {
        let frame = Bytes::from_static(b"\x00\x01\x02");
        let stamped = stamp_frame(&frame, 1692000000123, 100);

        assert_eq!(stamped.len(), 3 + 100);
        assert_eq!(&stamped[..3], b"\x00\x01\x02");

        let suffix = std::str::from_utf8(&stamped[3..]).unwrap();
        assert_eq!(suffix.len(), 100);
        assert_eq!(suffix.trim_start().parse::<i64>().unwrap(), 1692000000123);
    }
}
