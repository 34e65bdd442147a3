//! Wire protocol for the real-time channels.
//!
//! All frames are JSON with a `type` tag.  Commands flow client -> server,
//! events flow server -> client.  File payloads are base64 inside the JSON
//! frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eduswap_shared::{MessageId, StudentId, SwapId};
use eduswap_store::{AiMessage, Swap};

// ---------------------------------------------------------------------------
// Swap chat
// ---------------------------------------------------------------------------

/// Client -> server calls on the swap chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChatCommand {
    /// Bind this connection to a swap's group.  The claimed student must be
    /// one of the swap's two participants.
    JoinGroup {
        swap_id: SwapId,
        student_id: StudentId,
    },
    LeaveGroup {
        swap_id: SwapId,
    },
    SendMessage {
        swap_id: SwapId,
        /// Client-generated message id, so the sender can reconcile its own
        /// optimistic bubble.
        id: MessageId,
        content: String,
        reply_to_message_id: Option<MessageId>,
    },
    SendFile {
        swap_id: SwapId,
        file_name: String,
        /// Base64-encoded file bytes.
        data: String,
    },
    DeleteMessage {
        swap_id: SwapId,
        message_id: MessageId,
    },
    EditMessage {
        swap_id: SwapId,
        message_id: MessageId,
        new_content: String,
    },
    MarkRead {
        swap_id: SwapId,
    },
    ProposeCompletion {
        swap_id: SwapId,
    },
    AcceptCompletion {
        swap_id: SwapId,
    },
    RejectCompletion {
        swap_id: SwapId,
    },
}

/// Server -> client pushes on the swap chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChatEvent {
    ReceiveMessage {
        id: MessageId,
        sender_id: StudentId,
        sender_name: String,
        content: String,
        timestamp: DateTime<Utc>,
        reply_to_message_id: Option<MessageId>,
    },
    UserJoined {
        username: String,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    EditMessage {
        message_id: MessageId,
        new_content: String,
    },
    /// Sent to the other members of the group when a message lands or
    /// read-state changes, so unread badges refresh.
    NewUnread {
        swap_id: SwapId,
    },
    /// Any lifecycle transition on the swap.
    SwapUpdated {
        swap: Swap,
    },
    Error {
        message: String,
    },
}

// ---------------------------------------------------------------------------
// AI tutor chat
// ---------------------------------------------------------------------------

/// Client -> server calls on the AI chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AiCommand {
    JoinChat {
        student_id: StudentId,
    },
    SendMessage {
        id: MessageId,
        content: String,
    },
    SendFile {
        file_name: String,
        /// Base64-encoded file bytes.
        data: String,
    },
    EditMessage {
        message_id: MessageId,
        new_content: String,
    },
}

/// Server -> client pushes on the AI chat channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AiEvent {
    ReceiveMessage {
        message: AiMessage,
    },
    /// The bot started generating; `temp_id` names the placeholder bubble.
    AiTypingStarted {
        temp_id: MessageId,
    },
    AiTypingChunk {
        temp_id: MessageId,
        text: String,
    },
    /// Generation ended.  `message_id` is the persisted reply, or `None` when
    /// generation produced nothing — the client drops the placeholder then.
    AiTypingFinished {
        temp_id: MessageId,
        message_id: Option<MessageId>,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    EditMessage {
        message_id: MessageId,
        new_content: String,
    },
    Error {
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Client -> server calls on the presence channel.  Connect/disconnect are
/// implicit in the socket lifecycle; the only explicit call is a last-seen
/// refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PresenceCommand {
    Ping,
}
