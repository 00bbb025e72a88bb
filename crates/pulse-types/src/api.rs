use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ConversationKind, Enrichment, ExpiryPolicy, FocusSchedule, MessageKind, MessageStatus, Role,
    Visibility,
};

// -- JWT Claims --

/// JWT claims shared across pulse-api (REST middleware) and pulse-gateway
/// (WebSocket authentication). Canonical definition lives here in pulse-types
/// to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub participant_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub participant_id: Uuid,
    pub name: String,
    pub token: String,
}

// -- Participants --

/// Public view of a participant. Presence fields are `None` when the
/// subject's privacy settings withhold them from the requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub id: Uuid,
    pub name: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub is_online: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
}

/// Absent fields are left unchanged.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePrivacyRequest {
    pub show_online_status: Option<Visibility>,
    pub show_last_seen: Option<Visibility>,
    pub read_receipts: Option<bool>,
    pub hidden_from: Option<Vec<Uuid>>,
}

/// Absent fields are left unchanged.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateFocusRequest {
    pub is_active: Option<bool>,
    pub allowed_contacts: Option<Vec<Uuid>>,
    pub auto_reply: Option<String>,
    pub schedule: Option<FocusSchedule>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParticipantsQuery {
    pub q: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDirectRequest {
    pub participant_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<Uuid>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMembersRequest {
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateExpiryRequest {
    pub enabled: bool,
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub delete_after_seen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberInfo {
    pub participant_id: Uuid,
    pub name: String,
    pub avatar: Option<String>,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPayload {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub members: Vec<MemberInfo>,
    pub last_message: Option<MessagePayload>,
    pub pinned_message_ids: Vec<Uuid>,
    pub expiry: ExpiryPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub media_kind: Option<MessageKind>,
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` timestamp of the
    /// oldest message from the previous page to fetch older messages.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkSeenRequest {
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageRequest {
    #[serde(default)]
    pub for_everyone: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchMessagesQuery {
    pub q: String,
    pub conversation_id: Option<Uuid>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderInfo {
    pub id: Uuid,
    pub name: String,
    pub avatar: Option<String>,
}

/// Quoted excerpt of the message a reply points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyContext {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptEntry {
    pub participant_id: Uuid,
    pub at: DateTime<Utc>,
}

/// Fully hydrated message as it travels to clients, identical over the
/// gateway (`message:new` / `message:updated`) and the REST path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: SenderInfo,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub reply_to: Option<ReplyContext>,
    pub status: MessageStatus,
    pub delivered_to: Vec<ReceiptEntry>,
    pub seen_by: Vec<ReceiptEntry>,
    pub enrichment: Enrichment,
    pub is_pinned: bool,
    pub pinned_by: Option<Uuid>,
    pub is_deleted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// -- Polls --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoteRequest {
    pub option_index: usize,
}

// -- Media --

#[derive(Debug, Serialize)]
pub struct MediaResponse {
    pub url: String,
    pub kind: MessageKind,
}
