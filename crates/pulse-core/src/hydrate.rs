//! Row-to-payload assembly shared by both transports. Rows come out of the
//! store as strings; everything here parses leniently, logging corrupt
//! fields instead of failing a whole page.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use pulse_db::Database;
use pulse_db::models::{ConversationRow, MessageRow, ParticipantRow, ReceiptRow, ReplyRow};
use pulse_types::ChatError;
use pulse_types::api::{
    ConversationPayload, MemberInfo, MessagePayload, ParticipantProfile, ReceiptEntry,
    ReplyContext, SenderInfo,
};
use pulse_types::models::{
    ConversationKind, Enrichment, ExpiryPolicy, FocusMode, FocusSchedule, IntentTag, MessageKind,
    MessageStatus, Participant, PrivacySettings, Role, Visibility,
};

use crate::with_store;

pub fn parse_uuid(raw: &str, context: &str) -> Option<Uuid> {
    match raw.parse::<Uuid>() {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Corrupt {} id '{}': {}", context, raw, e);
            None
        }
    }
}

pub fn parse_ts(raw: &str, context: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite defaults store timestamps as "YYYY-MM-DD HH:MM:SS"
            // without timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt {} timestamp '{}': {}", context, raw, e);
            DateTime::default()
        })
}

pub fn parse_ts_opt(raw: Option<&str>, context: &str) -> Option<DateTime<Utc>> {
    raw.map(|s| parse_ts(s, context))
}

// -- Messages --

/// Hydrate message rows into wire payloads, batch-fetching receipts and
/// reply context to keep it at a fixed number of queries per page.
pub async fn message_payloads(
    db: &Arc<Database>,
    rows: Vec<MessageRow>,
) -> Result<Vec<MessagePayload>, ChatError> {
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let reply_ids: Vec<String> = rows.iter().filter_map(|r| r.reply_to.clone()).collect();

    let (receipts, replies) = {
        let ids = message_ids.clone();
        with_store(db, move |db| {
            let receipts = db.receipts_for_messages(&ids)?;
            let replies = db.get_replies(&reply_ids)?;
            Ok((receipts, replies))
        })
        .await?
    };

    let mut receipts_by_message: HashMap<String, Vec<ReceiptRow>> = HashMap::new();
    for receipt in receipts {
        receipts_by_message
            .entry(receipt.message_id.clone())
            .or_default()
            .push(receipt);
    }
    let replies_by_id: HashMap<String, ReplyRow> =
        replies.into_iter().map(|r| (r.id.clone(), r)).collect();

    let payloads = rows
        .into_iter()
        .map(|row| {
            let receipts = receipts_by_message.remove(&row.id).unwrap_or_default();
            let reply = row
                .reply_to
                .as_deref()
                .and_then(|id| replies_by_id.get(id));
            message_payload_from_parts(row, &receipts, reply)
        })
        .collect();

    Ok(payloads)
}

/// Single-message convenience over [`message_payloads`].
pub async fn message_payload(
    db: &Arc<Database>,
    message_id: Uuid,
) -> Result<Option<MessagePayload>, ChatError> {
    let id = message_id.to_string();
    let row = with_store(db, move |db| db.get_message(&id)).await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut payloads = message_payloads(db, vec![row]).await?;
    Ok(payloads.pop())
}

fn message_payload_from_parts(
    row: MessageRow,
    receipts: &[ReceiptRow],
    reply: Option<&ReplyRow>,
) -> MessagePayload {
    let delivered_to = receipts
        .iter()
        .filter_map(|r| {
            let at = r.delivered_at.as_deref()?;
            Some(ReceiptEntry {
                participant_id: parse_uuid(&r.participant_id, "receipt")?,
                at: parse_ts(at, "receipt delivered_at"),
            })
        })
        .collect();
    let seen_by = receipts
        .iter()
        .filter_map(|r| {
            let at = r.seen_at.as_deref()?;
            Some(ReceiptEntry {
                participant_id: parse_uuid(&r.participant_id, "receipt")?,
                at: parse_ts(at, "receipt seen_at"),
            })
        })
        .collect();

    let reply_to = reply.map(|r| ReplyContext {
        id: parse_uuid(&r.id, "reply").unwrap_or_default(),
        sender_id: parse_uuid(&r.sender_id, "reply sender").unwrap_or_default(),
        text: r.body.clone(),
    });

    let smart_replies = row.smart_replies.as_deref().and_then(|raw| {
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(replies) => Some(replies),
            Err(e) => {
                warn!("Corrupt smart_replies on message '{}': {}", row.id, e);
                None
            }
        }
    });

    MessagePayload {
        id: parse_uuid(&row.id, "message").unwrap_or_default(),
        conversation_id: parse_uuid(&row.conversation_id, "conversation").unwrap_or_default(),
        sender: SenderInfo {
            id: parse_uuid(&row.sender_id, "sender").unwrap_or_default(),
            name: row.sender_name,
            avatar: row.sender_avatar,
        },
        kind: MessageKind::parse(&row.kind).unwrap_or(MessageKind::Text),
        text: row.body,
        media_url: row.media_url,
        reply_to,
        status: MessageStatus::parse(&row.status).unwrap_or(MessageStatus::Sent),
        delivered_to,
        seen_by,
        enrichment: Enrichment {
            smart_replies,
            intent: row.intent.as_deref().and_then(IntentTag::parse),
            is_important: row.is_important,
        },
        is_pinned: row.is_pinned,
        pinned_by: row.pinned_by.as_deref().and_then(|id| parse_uuid(id, "pinned_by")),
        is_deleted: row.is_deleted,
        expires_at: parse_ts_opt(row.expires_at.as_deref(), "message expires_at"),
        created_at: parse_ts(&row.created_at, "message created_at"),
    }
}

// -- Conversations --

pub fn expiry_policy(row: &ConversationRow) -> ExpiryPolicy {
    ExpiryPolicy {
        enabled: row.expiry_enabled,
        duration_ms: row.expiry_duration_ms,
        delete_after_seen: row.delete_after_seen,
    }
}

/// Hydrate conversation rows with members, pinned ids, and the last message,
/// batch-fetched across the whole page.
pub async fn conversation_payloads(
    db: &Arc<Database>,
    rows: Vec<ConversationRow>,
) -> Result<Vec<ConversationPayload>, ChatError> {
    if rows.is_empty() {
        return Ok(vec![]);
    }

    let conversation_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let last_ids: Vec<String> = rows.iter().filter_map(|r| r.last_message_id.clone()).collect();

    let (members, pinned, last_rows) = {
        let ids = conversation_ids.clone();
        with_store(db, move |db| {
            let members = db.members_of_many(&ids)?;
            let pinned = db.pinned_ids_for_many(&ids)?;
            let last_rows = db.get_messages_by_ids(&last_ids)?;
            Ok((members, pinned, last_rows))
        })
        .await?
    };

    let mut members_by_conv: HashMap<String, Vec<MemberInfo>> = HashMap::new();
    for member in members {
        members_by_conv
            .entry(member.conversation_id.clone())
            .or_default()
            .push(MemberInfo {
                participant_id: parse_uuid(&member.participant_id, "member").unwrap_or_default(),
                name: member.name,
                avatar: member.avatar,
                role: Role::parse(&member.role).unwrap_or(Role::Member),
                joined_at: parse_ts(&member.joined_at, "member joined_at"),
            });
    }

    let mut pinned_by_conv: HashMap<String, Vec<Uuid>> = HashMap::new();
    for (conversation_id, message_id) in pinned {
        if let Some(id) = parse_uuid(&message_id, "pinned message") {
            pinned_by_conv.entry(conversation_id).or_default().push(id);
        }
    }

    let last_payloads = message_payloads(db, last_rows).await?;
    let mut last_by_conv: HashMap<Uuid, MessagePayload> = last_payloads
        .into_iter()
        .map(|p| (p.conversation_id, p))
        .collect();

    let payloads = rows
        .into_iter()
        .map(|row| {
            let id = parse_uuid(&row.id, "conversation").unwrap_or_default();
            ConversationPayload {
                id,
                kind: ConversationKind::parse(&row.kind).unwrap_or(ConversationKind::Direct),
                name: row.name.clone(),
                description: row.description.clone(),
                avatar: row.avatar.clone(),
                members: members_by_conv.remove(&row.id).unwrap_or_default(),
                last_message: last_by_conv.remove(&id),
                pinned_message_ids: pinned_by_conv.remove(&row.id).unwrap_or_default(),
                expiry: expiry_policy(&row),
                created_at: parse_ts(&row.created_at, "conversation created_at"),
                updated_at: parse_ts(&row.updated_at, "conversation updated_at"),
            }
        })
        .collect();

    Ok(payloads)
}

// -- Participants --

/// Full domain model including privacy and focus settings. Loads the
/// allow-list and hidden-list alongside the main row.
pub async fn load_participant(
    db: &Arc<Database>,
    participant_id: Uuid,
) -> Result<Option<Participant>, ChatError> {
    let id = participant_id.to_string();
    let loaded = with_store(db, move |db| {
        let Some(row) = db.get_participant(&id)? else {
            return Ok(None);
        };
        let allowed = db.get_focus_allowed(&id)?;
        let hidden = db.get_presence_hidden(&id)?;
        Ok(Some((row, allowed, hidden)))
    })
    .await?;

    Ok(loaded.map(|(row, allowed, hidden)| participant_from_parts(row, &allowed, &hidden)))
}

pub fn participant_from_parts(
    row: ParticipantRow,
    allowed: &[String],
    hidden: &[String],
) -> Participant {
    let schedule = match (&row.focus_start, &row.focus_end) {
        (Some(start), Some(end)) => Some(FocusSchedule {
            start: start.clone(),
            end: end.clone(),
            days: row
                .focus_days
                .as_deref()
                .map(|days| days.split(',').map(|d| d.trim().to_string()).collect())
                .unwrap_or_default(),
        }),
        _ => None,
    };

    Participant {
        id: parse_uuid(&row.id, "participant").unwrap_or_default(),
        name: row.name,
        email: row.email,
        avatar: row.avatar,
        bio: row.bio,
        is_online: row.is_online,
        last_seen: parse_ts(&row.last_seen, "participant last_seen"),
        privacy: PrivacySettings {
            show_online_status: Visibility::parse(&row.show_online_status)
                .unwrap_or(Visibility::Everyone),
            show_last_seen: Visibility::parse(&row.show_last_seen).unwrap_or(Visibility::Everyone),
            read_receipts: row.read_receipts,
            hidden_from: hidden.iter().filter_map(|h| parse_uuid(h, "hidden_from")).collect(),
        },
        focus: FocusMode {
            is_active: row.focus_active,
            allowed_contacts: allowed
                .iter()
                .filter_map(|a| parse_uuid(a, "focus_allowed"))
                .collect(),
            auto_reply: row.focus_auto_reply,
            schedule,
        },
        created_at: parse_ts(&row.created_at, "participant created_at"),
    }
}

/// Public profile of `subject` as `observer` is allowed to see it: presence
/// fields are withheld per the subject's visibility settings.
pub async fn participant_profile(
    db: &Arc<Database>,
    subject: ParticipantRow,
    observer: Uuid,
) -> Result<ParticipantProfile, ChatError> {
    let subject_id = parse_uuid(&subject.id, "participant").unwrap_or_default();

    let show_online = visibility_allows(
        db,
        subject_id,
        Visibility::parse(&subject.show_online_status).unwrap_or(Visibility::Everyone),
        observer,
    )
    .await?;
    let show_last_seen = visibility_allows(
        db,
        subject_id,
        Visibility::parse(&subject.show_last_seen).unwrap_or(Visibility::Everyone),
        observer,
    )
    .await?;

    Ok(ParticipantProfile {
        id: subject_id,
        name: subject.name,
        avatar: subject.avatar,
        bio: subject.bio,
        is_online: show_online.then_some(subject.is_online),
        last_seen: if show_last_seen {
            Some(parse_ts(&subject.last_seen, "participant last_seen"))
        } else {
            None
        },
    })
}

/// Whether `observer` clears the subject's visibility level for a presence
/// field. The subject always sees themself; the hidden-from list overrides
/// every level.
pub async fn visibility_allows(
    db: &Arc<Database>,
    subject: Uuid,
    level: Visibility,
    observer: Uuid,
) -> Result<bool, ChatError> {
    if observer == subject {
        return Ok(true);
    }

    let subject_key = subject.to_string();
    let observer_key = observer.to_string();
    let (hidden, is_contact) = with_store(db, move |db| {
        let hidden = db
            .get_presence_hidden(&subject_key)?
            .contains(&observer_key);
        let is_contact = match level {
            Visibility::Contacts => db.contacts_of(&subject_key)?.contains(&observer_key),
            _ => false,
        };
        Ok((hidden, is_contact))
    })
    .await?;

    if hidden {
        return Ok(false);
    }
    Ok(match level {
        Visibility::Everyone => true,
        Visibility::Contacts => is_contact,
        Visibility::Nobody => false,
    })
}
