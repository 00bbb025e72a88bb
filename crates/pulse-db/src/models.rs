//! Database row types — these map directly to SQLite rows.
//! Distinct from pulse-types API models to keep the DB layer independent.

pub struct ParticipantRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub is_online: bool,
    pub last_seen: String,
    pub show_online_status: String,
    pub show_last_seen: String,
    pub read_receipts: bool,
    pub focus_active: bool,
    pub focus_auto_reply: String,
    pub focus_start: Option<String>,
    pub focus_end: Option<String>,
    /// Comma-joined lowercase day names, e.g. "mon,tue,wed"
    pub focus_days: Option<String>,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub direct_key: Option<String>,
    pub last_message_id: Option<String>,
    pub expiry_enabled: bool,
    pub expiry_duration_ms: Option<i64>,
    pub delete_after_seen: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Membership row joined with the participant's display fields.
pub struct MemberRow {
    pub conversation_id: String,
    pub participant_id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub role: String,
    pub joined_at: String,
}

/// Message row joined with the sender's display fields.
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub kind: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub media_kind: Option<String>,
    pub reply_to: Option<String>,
    pub status: String,
    pub is_pinned: bool,
    pub pinned_by: Option<String>,
    pub is_deleted: bool,
    pub expires_at: Option<String>,
    /// JSON array of reply suggestions, parsed by the caller
    pub smart_replies: Option<String>,
    pub intent: Option<String>,
    pub is_important: Option<bool>,
    pub created_at: String,
}

/// Column values for a message insert; timestamps are the caller's.
pub struct NewMessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub media_kind: Option<String>,
    pub reply_to: Option<String>,
    pub status: String,
    pub expires_at: Option<String>,
    pub created_at: String,
}

/// Abbreviated message row used to build reply-quote context.
pub struct ReplyRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: Option<String>,
    pub is_deleted: bool,
}

pub struct ReceiptRow {
    pub message_id: String,
    pub participant_id: String,
    pub delivered_at: Option<String>,
    pub seen_at: Option<String>,
}

pub struct PollRow {
    pub id: String,
    pub conversation_id: String,
    pub created_by: String,
    pub question: String,
    pub expires_at: Option<String>,
    pub created_at: String,
}

pub struct PollOptionRow {
    pub poll_id: String,
    pub option_index: i64,
    pub label: String,
}

pub struct PollVoteRow {
    pub poll_id: String,
    pub voter_id: String,
    pub option_index: i64,
}
