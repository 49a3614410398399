//! Provider command wire format
//!
//! Every remote action the server can ask a provider to perform is one
//! variant of [`Action`]. A single serializer renders the provider-bound
//! JSON object `{id, type, udid, <action fields>}`; the correlation id is
//! injected at send time and is `0` for fire-and-forget actions.
//!
//! Responses come back as `{id, <result fields>}`. An id of `0` marks
//! provider-initiated traffic (bandwidth reports and the like) rather than
//! a reply to anything pending.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A remote action directed at a provider
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Liveness probe; the provider answers `{"text":"pong"}`
    #[serde(rename = "ping")]
    Ping,
    /// Tap at device coordinates
    #[serde(rename = "click")]
    Click { udid: String, x: i32, y: i32 },
    #[serde(rename = "doubleclick")]
    DoubleClick { udid: String, x: i32, y: i32 },
    #[serde(rename = "mouseDown")]
    MouseDown { udid: String, x: i32, y: i32 },
    #[serde(rename = "mouseUp")]
    MouseUp { udid: String, x: i32, y: i32 },
    /// Force touch; the provider does not reply
    #[serde(rename = "hardPress")]
    HardPress { udid: String, x: i32, y: i32 },
    #[serde(rename = "longPress")]
    LongPress {
        udid: String,
        x: i32,
        y: i32,
        time: f64,
    },
    #[serde(rename = "home")]
    Home { udid: String },
    #[serde(rename = "taskSwitcher")]
    TaskSwitcher { udid: String },
    #[serde(rename = "shake")]
    Shake { udid: String },
    /// Open control center
    #[serde(rename = "cc")]
    ControlCenter { udid: String },
    #[serde(rename = "assistiveTouch")]
    AssistiveTouch { udid: String },
    #[serde(rename = "swipe")]
    Swipe {
        udid: String,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        delay: f64,
    },
    /// Key entry; `curid`/`prevkeys` let the provider reconcile typed text
    #[serde(rename = "keys")]
    Keys {
        udid: String,
        keys: String,
        curid: i32,
        prevkeys: String,
    },
    #[serde(rename = "text")]
    Text { udid: String, text: String },
    /// Fetch the UI source tree
    #[serde(rename = "source")]
    Source { udid: String },
    #[serde(rename = "launch")]
    Launch { udid: String, bid: String },
    #[serde(rename = "kill")]
    Kill { udid: String, bid: String },
    #[serde(rename = "allowApp")]
    AllowApp { udid: String, bid: String },
    #[serde(rename = "restrictApp")]
    RestrictApp { udid: String, bid: String },
    #[serde(rename = "listRestrictedApps")]
    ListRestrictedApps { udid: String },
    #[serde(rename = "wifiIp")]
    WifiIp { udid: String },
    /// Ask the provider process to shut down
    #[serde(rename = "shutdown")]
    Shutdown,
    #[serde(rename = "refresh")]
    Refresh { udid: String },
    #[serde(rename = "restart")]
    Restart { udid: String },
    #[serde(rename = "launchsafariurl")]
    OpenBrowserUrl { udid: String, url: String },
    #[serde(rename = "cleanbrowser")]
    CleanBrowser { udid: String, bid: String },
    /// Begin real-time video negotiation with the given SDP offer
    #[serde(rename = "initWebrtc")]
    InitWebrtc { udid: String, offer: String },
    /// Termination notice for an externally kicked video session; the
    /// provider does not reply
    #[serde(rename = "kick")]
    Kick { udid: String },
    /// Start pushing video frames; the provider does not reply, it opens
    /// its video socket instead
    #[serde(rename = "startStream")]
    StartStream { udid: String },
    #[serde(rename = "stopStream")]
    StopStream { udid: String },
}

impl Action {
    /// Whether the provider is expected to answer this action
    ///
    /// The sender only allocates a correlation id for actions that
    /// answer; the rest go out with id 0 and resolve on write.
    pub fn needs_response(&self) -> bool {
        !matches!(
            self,
            Action::HardPress { .. }
                | Action::StartStream { .. }
                | Action::StopStream { .. }
                | Action::Kick { .. }
        )
    }
}

#[derive(Serialize)]
struct Wire<'a> {
    id: u16,
    #[serde(flatten)]
    action: &'a Action,
}

/// Serialize an action to provider-bound wire JSON
pub fn encode(action: &Action, id: u16) -> Result<String> {
    Ok(serde_json::to_string(&Wire { id, action })?)
}

/// Response envelope from a provider
///
/// `body` holds every field except the correlation id, untyped; callers
/// pick out what they need.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: u16,
    #[serde(flatten)]
    pub body: Value,
}

impl Response {
    /// Decode a raw inbound payload
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Empty ack for actions that resolve on write
    pub(crate) fn empty() -> Self {
        Self {
            id: 0,
            body: Value::Object(serde_json::Map::new()),
        }
    }

    /// Whether this is the keepalive pong payload
    pub fn is_pong(&self) -> bool {
        self.body.get("text").and_then(Value::as_str) == Some("pong")
    }

    /// Fetch a string field from the body
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }

    /// Fetch an integer field from the body, tolerating string encoding
    pub fn int_field(&self, key: &str) -> Option<i64> {
        match self.body.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}
