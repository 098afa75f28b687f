//! Chat data model shared by the server, the HTTP client and the
//! reconciliation engine, plus the JSON bodies exchanged between them.
//!
//! Wire keys are camelCase (`userName`, `isAI`, `roomId`, ...). The transient
//! client-side fields of [`Message`] (`status`, `is_new`) never go on the wire.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Author name used for every assistant-generated message.
pub const AI_USER_NAME: &str = "AI Assistant";

/// Prefix of client-generated temporary message identifiers.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a server-side identifier (bare UUID v4).
pub fn new_server_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a temporary identifier for an optimistically inserted message.
///
/// Server identifiers are bare UUIDs, so the prefix keeps the two disjoint.
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}

/// Random 6-character room code (uppercase letters and digits).
pub fn generate_room_code() -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// True when `id` was produced by [`new_temp_id`].
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A chat room, joined through its human-chosen code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub code: String,
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Client-side delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Optimistically inserted, waiting for the server.
    Sending,
    /// Confirmed by the server during this visit.
    Sent,
    /// The send request failed; the entry carries a failure annotation.
    Failed,
}

/// Denormalized snapshot of the message being replied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTo {
    pub id: String,
    pub content: String,
    pub user_name: String,
    #[serde(rename = "isAI")]
    pub is_ai: bool,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub user_name: String,
    #[serde(rename = "isAI")]
    pub is_ai: bool,
    #[serde(default)]
    pub room_id: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTo>,
    /// Client-only delivery state. `None` means confirmed and not newly added.
    #[serde(skip)]
    pub status: Option<DeliveryStatus>,
    /// Client-only "just arrived" marker driving the entrance cue.
    #[serde(skip)]
    pub is_new: bool,
}

impl Message {
    /// Snapshot of this message suitable for use as a reply target.
    pub fn as_reply_target(&self) -> ReplyTo {
        ReplyTo {
            id: self.id.clone(),
            content: self.content.clone(),
            user_name: self.user_name.clone(),
            is_ai: self.is_ai,
        }
    }

    /// Whether this entry still waits for (or has given up on) server confirmation.
    pub fn is_unconfirmed(&self) -> bool {
        matches!(
            self.status,
            Some(DeliveryStatus::Sending) | Some(DeliveryStatus::Failed)
        )
    }
}

// ---------------------------------------------------------------------------
// Wire bodies
// ---------------------------------------------------------------------------

/// Body of `POST /api/messages/send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

/// Response of `POST /api/messages/send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub user_message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_message: Option<Message>,
}

/// Body of `POST /api/room/check` and `POST /api/room/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomCodeRequest {
    #[serde(default)]
    pub code: String,
}

/// Response of `POST /api/room/check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRoomResponse {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
