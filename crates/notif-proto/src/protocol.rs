use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest payload a peer may announce in a frame header.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Well-known interface identity the daemon mirrors.
pub const BUS_NAME: &str = "org.freedesktop.Notifications";
pub const OBJECT_PATH: &str = "/org/freedesktop/Notifications";

/// Server-assigned notification id.  Starts at 0 and increases for the
/// lifetime of the process.
pub type NotificationId = u32;

/// Hint keys the daemon understands.
pub const HINT_IMAGE_PATH: &str = "image_path";
pub const HINT_IMAGE_PATH_DASHED: &str = "image-path";
pub const HINT_ICON_DATA: &str = "icon_data";
pub const HINT_URGENCY: &str = "urgency";

/// Action key whose label is invoked on a primary click.
pub const DEFAULT_ACTION_KEY: &str = "default";

// ── close reasons ─────────────────────────────────────────────────────────────

/// Why a notification went away.  Encoded on the wire as the numeric value
/// used by the reference notification protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum CloseReason {
    Expired = 1,
    Dismissed = 2,
    ClosedByCall = 3,
    Undefined = 4,
}

impl From<CloseReason> for u32 {
    fn from(reason: CloseReason) -> Self {
        reason as u32
    }
}

impl TryFrom<u32> for CloseReason {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CloseReason::Expired),
            2 => Ok(CloseReason::Dismissed),
            3 => Ok(CloseReason::ClosedByCall),
            4 => Ok(CloseReason::Undefined),
            other => Err(format!("unknown close reason {}", other)),
        }
    }
}

// ── notify request ────────────────────────────────────────────────────────────

/// Legacy raw-pixel icon carried in the `icon_data` hint.
///
/// Fields are signed because that is how the reference protocol declares
/// them; the decoder rejects anything out of range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawIcon {
    pub width: i32,
    pub height: i32,
    pub rowstride: i32,
    pub has_alpha: bool,
    pub bits_per_sample: i32,
    pub channels: i32,
    pub data: Vec<u8>,
}

/// A single value in the hints bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HintValue {
    Icon(RawIcon),
    Bool(bool),
    Int(i64),
    Str(String),
}

impl HintValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HintValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_icon(&self) -> Option<&RawIcon> {
        match self {
            HintValue::Icon(icon) => Some(icon),
            _ => None,
        }
    }
}

/// A "show a notification" request, field for field as the reference
/// protocol's `Notify` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationRequest {
    pub app_name: String,
    /// Accepted but not honoured: a new notification is always created.
    pub replaces_id: NotificationId,
    /// Icon file path or theme icon name.  Empty means none.
    pub app_icon: String,
    pub summary: String,
    pub body: String,
    /// Flat `[key, label, key, label, ...]` list.
    pub actions: Vec<String>,
    pub hints: HashMap<String, HintValue>,
    /// Milliseconds; `<= 0` selects the server default.
    pub expire_timeout: i32,
}

impl NotificationRequest {
    /// Pairs up the flat action list.  A trailing key without a label is
    /// dropped.
    pub fn action_pairs(&self) -> Vec<(String, String)> {
        self.actions
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }

    /// Label paired with the `"default"` action key, if any.
    pub fn default_action(&self) -> Option<String> {
        self.action_pairs()
            .into_iter()
            .find(|(key, _)| key == DEFAULT_ACTION_KEY)
            .map(|(_, label)| label)
    }

    pub fn hint(&self, key: &str) -> Option<&HintValue> {
        self.hints.get(key)
    }
}

/// Static identity reported by `GetServerInformation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInformation {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub spec_version: String,
}

// ── renderer-facing types ─────────────────────────────────────────────────────

/// Area of a popup the pointer clicked.  Icon and summary are actionable;
/// the rest just dismiss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickTarget {
    Icon,
    Summary,
    Body,
    Background,
}

impl ClickTarget {
    pub fn is_actionable(self) -> bool {
        matches!(self, ClickTarget::Icon | ClickTarget::Summary)
    }
}

/// Icon as shipped to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IconPayload {
    Placeholder,
    Themed {
        name: String,
    },
    Pixels {
        width: u32,
        height: u32,
        rowstride: usize,
        has_alpha: bool,
        data: Vec<u8>,
    },
}

/// Everything a renderer needs to draw one popup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopupContent {
    pub app_name: String,
    pub summary: String,
    /// Normalised body markup (`<br/>` line breaks, `<a>` and `<img>` only).
    pub body: String,
    pub icon: IconPayload,
    pub default_action: Option<String>,
    pub actions: Vec<(String, String)>,
}

/// Drawing primitives forwarded to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderOp {
    Show {
        id: NotificationId,
        content: PopupContent,
        x: i32,
        y: i32,
        opacity: f32,
    },
    Move {
        id: NotificationId,
        x: i32,
        y: i32,
    },
    SetOpacity {
        id: NotificationId,
        opacity: f32,
    },
    SetExpanded {
        id: NotificationId,
        expanded: bool,
    },
    Close {
        id: NotificationId,
    },
    MuteIndicator {
        visible: bool,
        remaining_secs: u64,
    },
}

// ── messages ──────────────────────────────────────────────────────────────────

/// Messages sent from clients to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Notify(NotificationRequest),
    GetCapabilities,
    CloseNotification { id: NotificationId },
    GetServerInformation,
    Mute { seconds: u64 },
    Unmute,
    // Pointer events reported by the renderer.
    PointerEnter { id: NotificationId },
    PointerLeave { id: NotificationId },
    Click { id: NotificationId, target: ClickTarget },
    MuteClick { id: NotificationId },
    ToggleExpanded { id: NotificationId },
    ScreenGeometry { width: u32, height: u32 },
}

/// Direct answer to a single `Command`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply")]
pub enum Reply {
    Notify { id: NotificationId },
    Capabilities { capabilities: Vec<String> },
    ServerInformation(ServerInformation),
    Ok,
    Error { message: String },
}

/// Messages fanned out from the daemon to every client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        bus_name: String,
        object_path: String,
    },
    ActionInvoked {
        id: NotificationId,
        action_key: String,
    },
    NotificationClosed {
        id: NotificationId,
        reason: CloseReason,
    },
    Render {
        op: RenderOp,
    },
    /// Full redraw after a client missed broadcasts: drop everything drawn
    /// so far and apply `ops` in order.
    Snapshot {
        ops: Vec<RenderOp>,
    },
    Log {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Reply(Reply),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Payload length announced by the header at the start of `data`.
    pub fn declared_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(header) as usize)
    }

    /// Total size of the first frame in `data`, once all of it has arrived.
    pub fn complete_frame_len(data: &[u8]) -> Option<usize> {
        let len = Self::declared_len(data)?;
        (data.len() >= 4 + len).then_some(4 + len)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
