//! Newline-delimited JSON envelopes exchanged between the hub and the
//! browser-side shim.

use crate::messages::{Response, SenderTab};
use crate::{CreateTab, HostTab};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ProtocolVersionVisitor;

        impl<'de> Visitor<'de> for ProtocolVersionVisitor {
            type Value = ProtocolVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a protocol version as string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let version = u16::try_from(value)
                    .map_err(|_| E::custom(format!("protocol version out of range: {value}")))?;
                Ok(ProtocolVersion(version))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(E::custom(format!(
                        "protocol version cannot be negative: {value}"
                    )));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let cleaned = value.trim().trim_start_matches('v');
                let version = cleaned.parse::<u16>().map_err(|err| {
                    E::custom(format!("invalid protocol version '{value}': {err}"))
                })?;
                Ok(ProtocolVersion(version))
            }
        }

        deserializer.deserialize_any(ProtocolVersionVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeEnvelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub sender_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub msg: BridgeMsg,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BridgeMsg {
    Hello(HelloPayload),
    Request(RequestPayload),
    Response(ResponsePayload),
    TabUpdated(TabUpdatedPayload),
    TabRemoved(TabRemovedPayload),
    HostCall(HostCallPayload),
    HostResult(HostResultPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloPayload {
    pub client_id: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A page-level request. `message` is kept raw so shapes the hub does not
/// understand yet survive decoding and are ignored by the router instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestPayload {
    #[serde(default)]
    pub sender: Option<SenderTab>,
    pub message: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponsePayload {
    pub body: Response,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabUpdatedPayload {
    pub tab_id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tab: HostTab,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TabRemovedPayload {
    pub tab_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostCallPayload {
    pub call: HostCall,
}

/// Host API invocations the hub asks the shim to perform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostCall {
    Windows,
    TabsInWindow { window_id: i64 },
    CurrentWindowTabs,
    CreateTab(CreateTab),
    ActivateTab { tab_id: i64 },
    RemoveTab { tab_id: i64 },
    DuplicateTab { tab_id: i64 },
    MoveTab { tab_id: i64, index: i64 },
    BookmarkTree,
}

impl HostCall {
    pub fn op(&self) -> &'static str {
        match self {
            HostCall::Windows => "windows",
            HostCall::TabsInWindow { .. } => "tabs_in_window",
            HostCall::CurrentWindowTabs => "current_window_tabs",
            HostCall::CreateTab(_) => "create_tab",
            HostCall::ActivateTab { .. } => "activate_tab",
            HostCall::RemoveTab { .. } => "remove_tab",
            HostCall::DuplicateTab { .. } => "duplicate_tab",
            HostCall::MoveTab { .. } => "move_tab",
            HostCall::BookmarkTree => "bookmark_tree",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostResultPayload {
    #[serde(default)]
    pub ok: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl HostResultPayload {
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.ok.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

/// Best-effort `request_id` of a frame that failed to decode. The frame may be
/// truncated, so when it is not valid JSON the id is scanned for directly.
pub fn recover_request_id(bytes: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    struct Header {
        #[serde(default)]
        request_id: Option<String>,
    }

    if let Ok(header) = serde_json::from_slice::<Header>(bytes) {
        return header.request_id;
    }
    const KEY: &[u8] = b"\"request_id\"";
    let start = bytes.windows(KEY.len()).position(|window| window == KEY)? + KEY.len();
    let rest = skip_whitespace(&bytes[start..]).strip_prefix(b":")?;
    let mut de = serde_json::Deserializer::from_slice(skip_whitespace(rest));
    String::deserialize(&mut de).ok()
}

fn skip_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}
