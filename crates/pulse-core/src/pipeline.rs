//! The submit path: validate, persist, fan out, and the two side channels
//! hanging off it (focus-mode auto-replies and background enrichment).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use pulse_db::Database;
use pulse_db::models::NewMessageRow;
use pulse_types::ChatError;
use pulse_types::api::MessagePayload;
use pulse_types::events::GatewayEvent;
use pulse_types::models::{MessageKind, MessageStatus};

use crate::enrichment::Enricher;
use crate::focus;
use crate::hydrate;
use crate::presence::PresenceRegistry;
use crate::receipts::ReceiptTracker;
use crate::router::RoomRouter;
use crate::with_store;

/// Longest accepted message body, in characters.
const MAX_TEXT_LEN: usize = 4_000;
/// Bodies this short skip the enrichment service.
const ENRICHMENT_MIN_LEN: usize = 10;
/// How many times a busy store is retried before the submit fails.
const PERSIST_ATTEMPTS: u32 = 3;

/// A submission as it arrives from a transport, before validation.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub reply_to: Option<Uuid>,
    /// Connection the draft arrived on; excluded from fan-out and the
    /// target for auto-replies. None for REST submissions.
    pub origin_conn: Option<Uuid>,
}

#[derive(Clone)]
pub struct MessagePipeline {
    db: Arc<Database>,
    registry: PresenceRegistry,
    router: RoomRouter,
    receipts: ReceiptTracker,
    enricher: Arc<dyn Enricher>,
}

impl MessagePipeline {
    pub fn new(
        db: Arc<Database>,
        registry: PresenceRegistry,
        router: RoomRouter,
        receipts: ReceiptTracker,
        enricher: Arc<dyn Enricher>,
    ) -> Self {
        Self {
            db,
            registry,
            router,
            receipts,
            enricher,
        }
    }

    /// Validate and persist a draft, then fan it out to the conversation's
    /// members. Returns once the message is stored; delivery marking happens
    /// before fan-out so the pushed payload already carries it, enrichment
    /// runs in the background afterwards.
    pub async fn submit(&self, draft: MessageDraft) -> Result<MessagePayload, ChatError> {
        let conv_key = draft.conversation_id.to_string();
        let sender_key = draft.sender_id.to_string();

        let (conv, role) = {
            let conv_key = conv_key.clone();
            let sender_key = sender_key.clone();
            with_store(&self.db, move |db| {
                let conv = db.get_conversation(&conv_key)?;
                let role = if conv.is_some() {
                    db.member_role(&conv_key, &sender_key)?
                } else {
                    None
                };
                Ok((conv, role))
            })
            .await?
        };
        let Some(conv) = conv else {
            return Err(ChatError::NotFound("conversation"));
        };
        if role.is_none() {
            return Err(ChatError::AccessDenied);
        }

        let text = draft
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        if text.is_none() && draft.media_url.is_none() {
            return Err(ChatError::validation("message requires text or media"));
        }
        if let Some(t) = &text {
            if t.chars().count() > MAX_TEXT_LEN {
                return Err(ChatError::validation("message text is too long"));
            }
        }
        if let Some(reply_to) = draft.reply_to {
            let id = reply_to.to_string();
            let target = with_store(&self.db, move |db| db.get_message(&id)).await?;
            match target {
                Some(m) if m.conversation_id == conv_key => {}
                _ => {
                    return Err(ChatError::validation(
                        "reply target is not in this conversation",
                    ));
                }
            }
        }

        let message_id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = conv
            .expiry_enabled
            .then_some(conv.expiry_duration_ms)
            .flatten()
            .filter(|d| *d > 0)
            .map(|d| (now + Duration::milliseconds(d)).to_rfc3339());
        let row = Arc::new(NewMessageRow {
            id: message_id.to_string(),
            conversation_id: conv_key,
            sender_id: sender_key,
            kind: draft.kind.as_str().to_string(),
            body: text.clone(),
            media_url: draft.media_url.clone(),
            media_kind: draft
                .media_url
                .as_ref()
                .map(|_| draft.kind.as_str().to_string()),
            reply_to: draft.reply_to.map(|id| id.to_string()),
            status: MessageStatus::Sent.as_str().to_string(),
            expires_at,
            created_at: now.to_rfc3339(),
        });

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let row = Arc::clone(&row);
            match with_store(&self.db, move |db| db.insert_message(&row)).await {
                Ok(()) => break,
                Err(err) if err.is_transient() && attempt < PERSIST_ATTEMPTS => {
                    warn!(
                        "Store busy persisting message {} (attempt {}): {}",
                        message_id, attempt, err
                    );
                    tokio::time::sleep(StdDuration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(err) => return Err(err),
            }
        }

        // Everything past the persist is best-effort: a recipient we fail to
        // reach never fails the submission.
        let members = match self.router.members_of(draft.conversation_id).await {
            Ok(members) => members,
            Err(err) => {
                warn!(
                    "Fan-out member lookup failed for conversation {}: {}",
                    draft.conversation_id, err
                );
                Vec::new()
            }
        };

        let online = self.registry.online_participants().await;
        let delivered_now: Vec<Uuid> = members
            .iter()
            .copied()
            .filter(|m| *m != draft.sender_id && online.contains(m))
            .collect();
        if !delivered_now.is_empty() {
            if let Err(err) = self.receipts.record_delivery(message_id, delivered_now).await {
                warn!("Delivery marking failed for message {}: {}", message_id, err);
            }
        }

        let payload = hydrate::message_payload(&self.db, message_id)
            .await?
            .ok_or_else(|| {
                ChatError::Internal(format!("message {message_id} vanished before hydration"))
            })?;

        self.registry
            .send_to_participants(
                &members,
                draft.origin_conn,
                GatewayEvent::MessageNew {
                    message: payload.clone(),
                },
            )
            .await;

        self.intercept_focus(&draft, &members, now).await;

        if let Some(text) = text {
            if text.chars().count() > ENRICHMENT_MIN_LEN {
                self.spawn_enrichment(message_id, draft.conversation_id, text);
            }
        }

        Ok(payload)
    }

    /// Check every recipient's focus settings and push any auto-reply back
    /// to the sender. Replies go to the submitting connection when there is
    /// one, otherwise to all of the sender's devices.
    async fn intercept_focus(
        &self,
        draft: &MessageDraft,
        members: &[Uuid],
        now: chrono::DateTime<Utc>,
    ) {
        for recipient in members.iter().copied().filter(|m| *m != draft.sender_id) {
            let participant = match hydrate::load_participant(&self.db, recipient).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(err) => {
                    warn!("Focus check failed for recipient {}: {}", recipient, err);
                    continue;
                }
            };
            let Some(text) = focus::should_auto_reply(&participant, draft.sender_id, now) else {
                continue;
            };
            let event = GatewayEvent::MessageAutoReply {
                conversation_id: draft.conversation_id,
                from: recipient,
                text,
            };
            match draft.origin_conn {
                Some(conn) => self.registry.send_to_connection(conn, event).await,
                None => {
                    self.registry
                        .send_to_participant(draft.sender_id, event)
                        .await
                }
            }
        }
    }

    fn spawn_enrichment(&self, message_id: Uuid, conversation_id: Uuid, text: String) {
        let db = Arc::clone(&self.db);
        let router = self.router.clone();
        let enricher = Arc::clone(&self.enricher);
        tokio::spawn(async move {
            let enrichment = match enricher.analyze(&text).await {
                Ok(e) => e,
                Err(err) => {
                    debug!("Enrichment unavailable for message {}: {:#}", message_id, err);
                    return;
                }
            };
            if enrichment.is_empty() {
                return;
            }

            let smart_replies_json = enrichment
                .smart_replies
                .as_ref()
                .and_then(|replies| serde_json::to_string(replies).ok());
            let intent = enrichment.intent.map(|i| i.as_str());
            let is_important = enrichment.is_important;
            let id = message_id.to_string();
            let merged = with_store(&db, move |db| {
                db.merge_enrichment(&id, smart_replies_json.as_deref(), intent, is_important)
            })
            .await;

            match merged {
                // The merge declines tombstoned or reaped messages.
                Ok(false) => {}
                Ok(true) => match hydrate::message_payload(&db, message_id).await {
                    Ok(Some(message)) => {
                        if let Err(err) = router
                            .fan_out(
                                conversation_id,
                                GatewayEvent::MessageUpdated { message },
                                None,
                            )
                            .await
                        {
                            debug!(
                                "Enrichment update push failed for message {}: {}",
                                message_id, err
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        debug!("Enrichment re-read failed for message {}: {}", message_id, err)
                    }
                },
                Err(err) => warn!("Enrichment merge failed for message {}: {}", message_id, err),
            }
        });
    }

    /// Replace a message with its tombstone for every viewer. Sender-only.
    pub async fn delete_for_everyone(
        &self,
        requester: Uuid,
        message_id: Uuid,
    ) -> Result<MessagePayload, ChatError> {
        let id = message_id.to_string();
        let row = with_store(&self.db, move |db| db.get_message(&id)).await?;
        let Some(row) = row else {
            return Err(ChatError::NotFound("message"));
        };
        if row.sender_id != requester.to_string() {
            return Err(ChatError::Forbidden(
                "only the sender can delete a message for everyone",
            ));
        }

        let id = message_id.to_string();
        with_store(&self.db, move |db| db.tombstone_message(&id)).await?;

        let payload = hydrate::message_payload(&self.db, message_id)
            .await?
            .ok_or(ChatError::NotFound("message"))?;
        self.push_update(&row.conversation_id, payload.clone()).await;
        Ok(payload)
    }

    /// Hide a message from the requester's own reads. Member-only; other
    /// viewers are unaffected, so nothing is pushed.
    pub async fn delete_for_self(&self, requester: Uuid, message_id: Uuid) -> Result<(), ChatError> {
        let id = message_id.to_string();
        let row = with_store(&self.db, move |db| db.get_message(&id)).await?;
        let Some(row) = row else {
            return Err(ChatError::NotFound("message"));
        };
        let Some(conversation_id) = hydrate::parse_uuid(&row.conversation_id, "conversation")
        else {
            return Err(ChatError::Internal(format!(
                "message {message_id} has a corrupt conversation id"
            )));
        };
        self.router.require_member(conversation_id, requester).await?;

        let id = message_id.to_string();
        let requester_key = requester.to_string();
        with_store(&self.db, move |db| db.hide_message_for(&id, &requester_key)).await?;
        Ok(())
    }

    /// Flip a message's pinned flag. Any member of the conversation may pin
    /// or unpin; the new state is pushed to live connections.
    pub async fn toggle_pin(
        &self,
        requester: Uuid,
        message_id: Uuid,
    ) -> Result<MessagePayload, ChatError> {
        let id = message_id.to_string();
        let row = with_store(&self.db, move |db| db.get_message(&id)).await?;
        let Some(row) = row else {
            return Err(ChatError::NotFound("message"));
        };
        let Some(conversation_id) = hydrate::parse_uuid(&row.conversation_id, "conversation")
        else {
            return Err(ChatError::Internal(format!(
                "message {message_id} has a corrupt conversation id"
            )));
        };
        self.router.require_member(conversation_id, requester).await?;

        let pinned = !row.is_pinned;
        let id = message_id.to_string();
        let requester_key = requester.to_string();
        with_store(&self.db, move |db| {
            db.set_pinned(&id, pinned, pinned.then_some(requester_key.as_str()))
        })
        .await?;

        let payload = hydrate::message_payload(&self.db, message_id)
            .await?
            .ok_or(ChatError::NotFound("message"))?;
        self.push_update(&row.conversation_id, payload.clone()).await;
        Ok(payload)
    }

    async fn push_update(&self, conversation_key: &str, message: MessagePayload) {
        let Some(conversation_id) = hydrate::parse_uuid(conversation_key, "conversation") else {
            return;
        };
        if let Err(err) = self
            .router
            .fan_out(
                conversation_id,
                GatewayEvent::MessageUpdated { message },
                None,
            )
            .await
        {
            debug!(
                "Update push failed for conversation {}: {}",
                conversation_id, err
            );
        }
    }
}
