use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is allowed to observe a presence field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Everyone,
    Contacts,
    Nobody,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Everyone => "everyone",
            Visibility::Contacts => "contacts",
            Visibility::Nobody => "nobody",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "everyone" => Some(Visibility::Everyone),
            "contacts" => Some(Visibility::Contacts),
            "nobody" => Some(Visibility::Nobody),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacySettings {
    pub show_online_status: Visibility,
    pub show_last_seen: Visibility,
    pub read_receipts: bool,
    /// Participants this user is invisible to regardless of the settings above.
    pub hidden_from: Vec<Uuid>,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        PrivacySettings {
            show_online_status: Visibility::Everyone,
            show_last_seen: Visibility::Everyone,
            read_receipts: true,
            hidden_from: Vec::new(),
        }
    }
}

/// Recurring window during which focus mode switches itself on.
/// Times are "HH:MM" in the participant's local clock, days are
/// lowercase three-letter names ("mon" .. "sun").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusSchedule {
    pub start: String,
    pub end: String,
    pub days: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusMode {
    pub is_active: bool,
    /// Senders whose messages bypass the interceptor.
    pub allowed_contacts: Vec<Uuid>,
    pub auto_reply: String,
    pub schedule: Option<FocusSchedule>,
}

impl Default for FocusMode {
    fn default() -> Self {
        FocusMode {
            is_active: false,
            allowed_contacts: Vec::new(),
            auto_reply: "I'm currently focusing. I'll get back to you later.".to_string(),
            schedule: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub privacy: PrivacySettings,
    pub focus: FocusMode,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ConversationKind::Direct),
            "group" => Some(ConversationKind::Group),
            _ => None,
        }
    }
}

/// Ordered so that `Admin > Moderator > Member`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "member" => Some(Role::Member),
            "moderator" => Some(Role::Moderator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub participant_id: Uuid,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

/// Per-conversation disappearing-message policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryPolicy {
    pub enabled: bool,
    /// Lifetime stamped onto new messages while `enabled` is set.
    pub duration_ms: Option<i64>,
    /// Expire a message shortly after every recipient has seen it.
    pub delete_after_seen: bool,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        ExpiryPolicy {
            enabled: false,
            duration_ms: None,
            delete_after_seen: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub last_message_id: Option<Uuid>,
    pub expiry: ExpiryPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Furthest point in the delivery lifecycle reached by any recipient.
/// Ordered so that `Seen > Delivered > Sent`; status never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Seen => "seen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "seen" => Some(MessageStatus::Seen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Voice,
    Document,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Voice => "voice",
            MessageKind::Document => "document",
            MessageKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "video" => Some(MessageKind::Video),
            "voice" => Some(MessageKind::Voice),
            "document" => Some(MessageKind::Document),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

/// Coarse label the enrichment collaborator assigns to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentTag {
    Meeting,
    Reminder,
    Task,
    Question,
    Casual,
}

impl IntentTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentTag::Meeting => "meeting",
            IntentTag::Reminder => "reminder",
            IntentTag::Task => "task",
            IntentTag::Question => "question",
            IntentTag::Casual => "casual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "meeting" => Some(IntentTag::Meeting),
            "reminder" => Some(IntentTag::Reminder),
            "task" => Some(IntentTag::Task),
            "question" => Some(IntentTag::Question),
            "casual" => Some(IntentTag::Casual),
            _ => None,
        }
    }
}

/// Optional annotations produced out-of-band after a message is stored.
/// `None` fields mean the collaborator had nothing to say, not "false".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub smart_replies: Option<Vec<String>>,
    pub intent: Option<IntentTag>,
    pub is_important: Option<bool>,
}

impl Enrichment {
    pub fn is_empty(&self) -> bool {
        self.smart_replies.is_none() && self.intent.is_none() && self.is_important.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub reply_to: Option<Uuid>,
    pub status: MessageStatus,
    pub is_pinned: bool,
    pub pinned_by: Option<Uuid>,
    pub is_deleted: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub enrichment: Enrichment,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub label: String,
    pub votes: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub created_by: Uuid,
    pub question: String,
    pub options: Vec<PollOption>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    /// True once the poll no longer accepts votes.
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
