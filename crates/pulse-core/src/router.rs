use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use pulse_db::Database;
use pulse_types::ChatError;
use pulse_types::events::GatewayEvent;

use crate::hydrate::parse_uuid;
use crate::presence::PresenceRegistry;
use crate::with_store;

/// Resolves conversation membership to live connections and carries
/// room-scoped events to them. Message fan-out is membership-based; the
/// joined map only scopes typing indicators to connections that opened the
/// room.
#[derive(Clone)]
pub struct RoomRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    db: Arc<Database>,
    registry: PresenceRegistry,
    /// conversation -> connections currently joined to it
    joined: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl RoomRouter {
    pub fn new(db: Arc<Database>, registry: PresenceRegistry) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                db,
                registry,
                joined: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Member participant ids. `NotFound` when the conversation is absent.
    pub async fn members_of(&self, conversation_id: Uuid) -> Result<Vec<Uuid>, ChatError> {
        let key = conversation_id.to_string();
        let rows = with_store(&self.inner.db, move |db| {
            if db.get_conversation(&key)?.is_none() {
                return Ok(None);
            }
            Ok(Some(db.members_of(&key)?))
        })
        .await?;

        let rows = rows.ok_or(ChatError::NotFound("conversation"))?;
        Ok(rows
            .iter()
            .filter_map(|m| parse_uuid(&m.participant_id, "member"))
            .collect())
    }

    /// Union of every member's live connections, the reach of a fan-out at
    /// this moment.
    pub async fn live_connections_for(
        &self,
        conversation_id: Uuid,
    ) -> Result<HashSet<Uuid>, ChatError> {
        let members = self.members_of(conversation_id).await?;
        let mut conns = HashSet::new();
        for member in members {
            conns.extend(self.inner.registry.connections_for(member).await);
        }
        Ok(conns)
    }

    /// `NotFound` for a missing conversation, `AccessDenied` for a
    /// non-member.
    pub async fn require_member(
        &self,
        conversation_id: Uuid,
        participant_id: Uuid,
    ) -> Result<(), ChatError> {
        let conv = conversation_id.to_string();
        let participant = participant_id.to_string();
        let (exists, role) = with_store(&self.inner.db, move |db| {
            let exists = db.get_conversation(&conv)?.is_some();
            let role = if exists {
                db.member_role(&conv, &participant)?
            } else {
                None
            };
            Ok((exists, role))
        })
        .await?;

        if !exists {
            return Err(ChatError::NotFound("conversation"));
        }
        if role.is_none() {
            return Err(ChatError::AccessDenied);
        }
        Ok(())
    }

    /// Subscribe a connection to a conversation's room-scoped events.
    pub async fn join(
        &self,
        conn_id: Uuid,
        participant_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), ChatError> {
        self.require_member(conversation_id, participant_id).await?;

        self.inner
            .joined
            .write()
            .await
            .entry(conversation_id)
            .or_default()
            .insert(conn_id);
        debug!("connection {} joined conversation {}", conn_id, conversation_id);
        Ok(())
    }

    /// Idempotent; leaving a room never joined is a no-op.
    pub async fn leave(&self, conn_id: Uuid, conversation_id: Uuid) {
        let mut joined = self.inner.joined.write().await;
        if let Some(conns) = joined.get_mut(&conversation_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                joined.remove(&conversation_id);
            }
        }
    }

    /// Drop every subscription a closing connection holds.
    pub async fn leave_all(&self, conn_id: Uuid) {
        let mut joined = self.inner.joined.write().await;
        joined.retain(|_, conns| {
            conns.remove(&conn_id);
            !conns.is_empty()
        });
    }

    /// Deliver an event to every live connection of every member, except
    /// the origin connection.
    pub async fn fan_out(
        &self,
        conversation_id: Uuid,
        event: GatewayEvent,
        exclude_conn: Option<Uuid>,
    ) -> Result<(), ChatError> {
        let members = self.members_of(conversation_id).await?;
        self.inner
            .registry
            .send_to_participants(&members, exclude_conn, event)
            .await;
        Ok(())
    }

    /// Deliver an event to connections joined to the room only. Used for
    /// typing indicators, which are meaningless outside an open room.
    pub async fn send_to_joined(
        &self,
        conversation_id: Uuid,
        event: GatewayEvent,
        exclude_conn: Option<Uuid>,
    ) {
        let joined = self.inner.joined.read().await;
        let Some(conns) = joined.get(&conversation_id) else {
            return;
        };
        for conn_id in conns {
            if Some(*conn_id) == exclude_conn {
                continue;
            }
            self.inner
                .registry
                .send_to_connection(*conn_id, event.clone())
                .await;
        }
    }

    /// Connections currently joined to a conversation.
    pub async fn joined_connections(&self, conversation_id: Uuid) -> Vec<Uuid> {
        self.inner
            .joined
            .read()
            .await
            .get(&conversation_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }
}
