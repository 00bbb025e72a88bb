use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use pulse_db::Database;
use pulse_types::ChatError;
use pulse_types::events::GatewayEvent;
use pulse_types::models::MessageStatus;

use crate::hydrate::parse_uuid;
use crate::presence::PresenceRegistry;
use crate::with_store;

/// How long a fully-seen message lingers before delete-after-seen reaps it,
/// leaving receipt UIs a moment to settle.
const DELETE_AFTER_SEEN_GRACE_MS: i64 = 5_000;

/// One newly-recorded seen transition.
#[derive(Debug, Clone)]
pub struct SeenUpdate {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub seen_at: DateTime<Utc>,
}

/// Applies receipt transitions and notifies senders. All transitions are
/// idempotent and only ever move a message forward through
/// sent -> delivered -> seen.
#[derive(Clone)]
pub struct ReceiptTracker {
    db: Arc<Database>,
    registry: PresenceRegistry,
}

impl ReceiptTracker {
    pub fn new(db: Arc<Database>, registry: PresenceRegistry) -> Self {
        Self { db, registry }
    }

    /// Record delivery for the given recipients, called at fan-out time for
    /// everyone with a live connection. Returns true when any receipt was
    /// newly recorded (and the message may have advanced to `delivered`).
    pub async fn record_delivery(
        &self,
        message_id: Uuid,
        recipients: Vec<Uuid>,
    ) -> Result<bool, ChatError> {
        if recipients.is_empty() {
            return Ok(false);
        }

        let id = message_id.to_string();
        let at = Utc::now().to_rfc3339();
        with_store(&self.db, move |db| {
            let mut any = false;
            for recipient in &recipients {
                if db.mark_delivered(&id, &recipient.to_string(), &at)? {
                    any = true;
                }
            }
            Ok(any)
        })
        .await
    }

    /// Mark messages in a conversation seen by `recipient`. Each newly-seen
    /// message notifies the sender's live connections; when the conversation
    /// deletes after seen, a message now seen by every other member gets a
    /// short-fuse expiry for the sweeper.
    pub async fn mark_seen(
        &self,
        conversation_id: Uuid,
        recipient: Uuid,
        message_ids: Vec<Uuid>,
    ) -> Result<Vec<SeenUpdate>, ChatError> {
        let conv_key = conversation_id.to_string();
        let recipient_key = recipient.to_string();

        let (exists, role, delete_after_seen, notify_sender) = {
            let conv_key = conv_key.clone();
            let recipient_key = recipient_key.clone();
            with_store(&self.db, move |db| {
                let conv = db.get_conversation(&conv_key)?;
                let exists = conv.is_some();
                let delete_after_seen = conv
                    .map(|c| c.expiry_enabled && c.delete_after_seen)
                    .unwrap_or(false);
                let role = if exists {
                    db.member_role(&conv_key, &recipient_key)?
                } else {
                    None
                };
                // A recipient who turned read receipts off still advances
                // state; only the sender notification is withheld.
                let notify_sender = db
                    .get_participant(&recipient_key)?
                    .map(|p| p.read_receipts)
                    .unwrap_or(true);
                Ok((exists, role, delete_after_seen, notify_sender))
            })
            .await?
        };
        if !exists {
            return Err(ChatError::NotFound("conversation"));
        }
        if role.is_none() {
            return Err(ChatError::AccessDenied);
        }

        let now = Utc::now();
        let stamp = now.to_rfc3339();
        let grace = (now + Duration::milliseconds(DELETE_AFTER_SEEN_GRACE_MS)).to_rfc3339();
        let ids: Vec<String> = message_ids.iter().map(|id| id.to_string()).collect();

        let newly_seen = {
            let conv_key = conv_key.clone();
            let recipient_key = recipient_key.clone();
            with_store(&self.db, move |db| {
                let mut newly_seen = Vec::new();
                for id in &ids {
                    let Some(message) = db.get_message(id)? else {
                        continue;
                    };
                    if message.conversation_id != conv_key || message.sender_id == recipient_key {
                        continue;
                    }
                    if !db.mark_seen(id, &recipient_key, &stamp)? {
                        continue;
                    }
                    if delete_after_seen
                        && db.count_unseen_recipients(&conv_key, id, &message.sender_id)? == 0
                    {
                        db.set_expires_at(id, &grace)?;
                    }
                    newly_seen.push((id.clone(), message.sender_id));
                }
                Ok(newly_seen)
            })
            .await?
        };

        let mut updates = Vec::with_capacity(newly_seen.len());
        for (message_id, sender_id) in newly_seen {
            let Some(message_id) = parse_uuid(&message_id, "message") else {
                continue;
            };
            let Some(sender_id) = parse_uuid(&sender_id, "sender") else {
                continue;
            };
            if notify_sender {
                self.registry
                    .send_to_participant(
                        sender_id,
                        GatewayEvent::MessageSeenUpdate {
                            conversation_id,
                            message_id,
                            seen_by: recipient,
                            seen_at: now,
                            status: MessageStatus::Seen,
                        },
                    )
                    .await;
            }
            updates.push(SeenUpdate {
                message_id,
                sender_id,
                seen_at: now,
            });
        }

        if !updates.is_empty() {
            debug!(
                "{} marked {} message(s) seen in conversation {}",
                recipient,
                updates.len(),
                conversation_id
            );
        }
        Ok(updates)
    }
}
