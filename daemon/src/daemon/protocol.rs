// Envelope protocol - shared message types for daemon <-> device communication
// Binary Protocol Buffers frames over the /ws session, plus the JSON trigger body

use crate::error::Result;
use prost::Message;
use serde::{Deserialize, Serialize};

/// WebSocket upgrade endpoint
pub const WS_PATH: &str = "/ws";

/// Trigger endpoint for images
pub const TRIGGER_SHOW_PATH: &str = "/api/v1/trigger/show";

/// Trigger endpoint for markdown documents
pub const TRIGGER_MD_PATH: &str = "/api/v1/trigger/md";

/// Relative URL under which a registered asset is served
pub fn asset_url(asset_id: &str) -> String {
    format!("/assets/{}", asset_id)
}

// ============================================================================
// Wire messages
// ============================================================================

/// Advisory keep-alive; sent once on connect, never answered
#[derive(Clone, PartialEq, Message)]
pub struct KeepAlive {
    /// Unix seconds at the sender
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
}

/// Kind of document the device should open
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum FileType {
    Image = 0,
    Markdown = 1,
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::Image => write!(f, "IMAGE"),
            FileType::Markdown => write!(f, "MARKDOWN"),
        }
    }
}

/// Ask the device to open an asset
#[derive(Clone, PartialEq, Message)]
pub struct OpenViewRequest {
    #[prost(string, tag = "1")]
    pub asset_id: String,
    /// Path relative to the daemon origin, e.g. `/assets/<id>`
    #[prost(string, tag = "2")]
    pub url: String,
    #[prost(enumeration = "FileType", tag = "3")]
    pub file_type: i32,
    #[prost(string, tag = "4")]
    pub title: String,
}

/// What the device did to an annotation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ActionType {
    Create = 0,
    Update = 1,
    Delete = 2,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "CREATE"),
            ActionType::Update => write!(f, "UPDATE"),
            ActionType::Delete => write!(f, "DELETE"),
        }
    }
}

/// Annotation payload as entered on the device
#[derive(Clone, PartialEq, Message)]
pub struct AnnotationData {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub target_text: String,
    #[prost(string, tag = "3")]
    pub context_hash: String,
    #[prost(string, tag = "4")]
    pub body: String,
    #[prost(int64, tag = "5")]
    pub timestamp: i64,
}

/// Annotation reply from the device
///
/// Tag 2 is the field devices have always filled with the asset id they were
/// shown. Tag 4 names a source document directly, for callers that know it.
#[derive(Clone, PartialEq, Message)]
pub struct AnnotationAction {
    #[prost(enumeration = "ActionType", tag = "1")]
    pub action: i32,
    #[prost(string, tag = "2")]
    pub asset_id: String,
    #[prost(message, optional, tag = "3")]
    pub data: Option<AnnotationData>,
    #[prost(string, tag = "4")]
    pub file_path: String,
}

/// One wire message. `payload` is `None` when the sender used a variant this
/// build does not know, or sent an empty frame.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(oneof = "Payload", tags = "1, 2, 3")]
    pub payload: Option<Payload>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Payload {
    #[prost(message, tag = "1")]
    Ping(KeepAlive),
    #[prost(message, tag = "2")]
    OpenView(OpenViewRequest),
    #[prost(message, tag = "3")]
    Annotation(AnnotationAction),
}

impl Envelope {
    pub fn keep_alive(timestamp: i64) -> Self {
        Self {
            payload: Some(Payload::Ping(KeepAlive { timestamp })),
        }
    }

    pub fn open_view(asset_id: &str, file_type: FileType, title: &str) -> Self {
        Self {
            payload: Some(Payload::OpenView(OpenViewRequest {
                asset_id: asset_id.to_string(),
                url: asset_url(asset_id),
                file_type: file_type as i32,
                title: title.to_string(),
            })),
        }
    }

    pub fn annotation(action: AnnotationAction) -> Self {
        Self {
            payload: Some(Payload::Annotation(action)),
        }
    }

    /// Short variant name for logs
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            Some(Payload::Ping(_)) => "keep_alive",
            Some(Payload::OpenView(_)) => "open_view",
            Some(Payload::Annotation(_)) => "annotation",
            None => "empty",
        }
    }
}

// ============================================================================
// Framing helpers
// ============================================================================

/// Encode an envelope into one binary frame
pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    envelope.encode_to_vec()
}

/// Decode one binary frame. Malformed bytes yield `Error::Decode`.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    Ok(Envelope::decode(bytes)?)
}

// ============================================================================
// Trigger API (CLI -> daemon, JSON over loopback HTTP)
// ============================================================================

/// Body of `POST /api/v1/trigger/{show,md}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowRequest {
    pub file_path: String,
    /// Display title; the daemon falls back to the file name when empty
    #[serde(default)]
    pub title: String,
}
