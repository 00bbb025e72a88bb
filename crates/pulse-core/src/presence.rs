use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use pulse_db::Database;
use pulse_types::ChatError;
use pulse_types::events::GatewayEvent;
use pulse_types::models::Visibility;

use crate::hydrate::parse_uuid;
use crate::with_store;

/// Which observers a presence event is meant for. Connection loops check
/// this per observer at delivery time; the registry itself never filters.
#[derive(Debug, Clone)]
pub enum Audience {
    Everyone { except: HashSet<Uuid> },
    Only(HashSet<Uuid>),
}

impl Audience {
    pub fn allows(&self, observer: Uuid) -> bool {
        match self {
            Audience::Everyone { except } => !except.contains(&observer),
            Audience::Only(allowed) => allowed.contains(&observer),
        }
    }
}

/// A presence event paired with its intended observers.
#[derive(Debug, Clone)]
pub struct PresenceFrame {
    pub event: GatewayEvent,
    pub audience: Audience,
}

struct ConnectionEntry {
    participant_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Tracks every live connection and the participants behind them, and
/// carries presence frames to all connection loops. Created once at process
/// start and handed around by cloning.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Broadcast channel for presence frames — every connection loop receives
    /// every frame and applies the audience check itself
    presence_tx: broadcast::Sender<PresenceFrame>,

    /// conn_id -> (participant, targeted sender)
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,

    /// participant -> live connection ids (multi-device)
    by_participant: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        let (presence_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RegistryInner {
                presence_tx,
                connections: RwLock::new(HashMap::new()),
                by_participant: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a connection. Returns (conn_id, targeted receiver, and
    /// whether this is the participant's first live connection).
    pub async fn connect(
        &self,
        participant_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>, bool) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner
            .connections
            .write()
            .await
            .insert(conn_id, ConnectionEntry { participant_id, tx });

        let mut by_participant = self.inner.by_participant.write().await;
        let conns = by_participant.entry(participant_id).or_default();
        let first = conns.is_empty();
        conns.insert(conn_id);

        (conn_id, rx, first)
    }

    /// Unregister a connection. Returns true when this was the participant's
    /// last live connection.
    pub async fn disconnect(&self, participant_id: Uuid, conn_id: Uuid) -> bool {
        self.inner.connections.write().await.remove(&conn_id);

        let mut by_participant = self.inner.by_participant.write().await;
        match by_participant.get_mut(&participant_id) {
            Some(conns) => {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    by_participant.remove(&participant_id);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Subscribe to presence frames. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceFrame> {
        self.inner.presence_tx.subscribe()
    }

    /// Broadcast a presence frame to all connection loops. Best effort —
    /// never blocks, a closed channel is ignored.
    pub fn broadcast(&self, frame: PresenceFrame) {
        let _ = self.inner.presence_tx.send(frame);
    }

    /// Live connection ids for one participant; empty when offline.
    pub async fn connections_for(&self, participant_id: Uuid) -> HashSet<Uuid> {
        self.inner
            .by_participant
            .read()
            .await
            .get(&participant_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_online(&self, participant_id: Uuid) -> bool {
        self.inner
            .by_participant
            .read()
            .await
            .contains_key(&participant_id)
    }

    pub async fn online_participants(&self) -> Vec<Uuid> {
        self.inner
            .by_participant
            .read()
            .await
            .keys()
            .copied()
            .collect()
    }

    /// Send a targeted event to one connection.
    pub async fn send_to_connection(&self, conn_id: Uuid, event: GatewayEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(entry) = connections.get(&conn_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Send a targeted event to all of a participant's connections.
    pub async fn send_to_participant(&self, participant_id: Uuid, event: GatewayEvent) {
        let by_participant = self.inner.by_participant.read().await;
        let Some(conns) = by_participant.get(&participant_id) else {
            return;
        };
        let connections = self.inner.connections.read().await;
        for conn_id in conns {
            if let Some(entry) = connections.get(conn_id) {
                let _ = entry.tx.send(event.clone());
            }
        }
    }

    /// Send an event to every connection of every target participant, minus
    /// one excluded connection. Per-recipient failures are ignored; a lagging
    /// client must never stall the others.
    pub async fn send_to_participants(
        &self,
        targets: &[Uuid],
        exclude_conn: Option<Uuid>,
        event: GatewayEvent,
    ) {
        let by_participant = self.inner.by_participant.read().await;
        let connections = self.inner.connections.read().await;

        for target in targets {
            let Some(conns) = by_participant.get(target) else {
                continue;
            };
            for conn_id in conns {
                if Some(*conn_id) == exclude_conn {
                    continue;
                }
                if let Some(entry) = connections.get(conn_id) {
                    let _ = entry.tx.send(event.clone());
                }
            }
        }
    }

    /// Drop every registered connection. Called on shutdown so connection
    /// loops see their channels close.
    pub async fn drain(&self) {
        self.inner.connections.write().await.clear();
        self.inner.by_participant.write().await.clear();
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Stamp the store and broadcast `user:online` when a participant's first
/// connection comes up.
pub async fn announce_online(
    db: &Arc<Database>,
    registry: &PresenceRegistry,
    participant_id: Uuid,
) -> Result<(), ChatError> {
    let now = Utc::now();
    let id = participant_id.to_string();
    let stamp = now.to_rfc3339();
    with_store(db, move |db| db.set_online(&id, true, &stamp)).await?;

    let audience = presence_audience(db, participant_id).await?;
    debug!("participant {} online", participant_id);
    registry.broadcast(PresenceFrame {
        event: GatewayEvent::UserOnline { participant_id },
        audience,
    });
    Ok(())
}

/// Stamp last-seen and broadcast `user:offline` when a participant's last
/// connection goes away.
pub async fn announce_offline(
    db: &Arc<Database>,
    registry: &PresenceRegistry,
    participant_id: Uuid,
) -> Result<(), ChatError> {
    let now = Utc::now();
    let id = participant_id.to_string();
    let stamp = now.to_rfc3339();
    with_store(db, move |db| db.set_online(&id, false, &stamp)).await?;

    let audience = presence_audience(db, participant_id).await?;
    debug!("participant {} offline", participant_id);
    registry.broadcast(PresenceFrame {
        event: GatewayEvent::UserOffline {
            participant_id,
            last_seen: now,
        },
        audience,
    });
    Ok(())
}

/// Resolve who may observe the subject's presence events: their visibility
/// level minus the hidden-from list. The subject's own devices always
/// qualify.
pub async fn presence_audience(
    db: &Arc<Database>,
    subject: Uuid,
) -> Result<Audience, ChatError> {
    let id = subject.to_string();
    let (visibility, hidden, contacts) = with_store(db, move |db| {
        let visibility = db
            .get_participant(&id)?
            .map(|row| row.show_online_status)
            .unwrap_or_else(|| "everyone".to_string());
        let hidden = db.get_presence_hidden(&id)?;
        let contacts = if visibility == "contacts" {
            db.contacts_of(&id)?
        } else {
            Vec::new()
        };
        Ok((visibility, hidden, contacts))
    })
    .await?;

    let hidden: HashSet<Uuid> = hidden
        .iter()
        .filter_map(|raw| parse_uuid(raw, "presence_hidden"))
        .collect();

    let audience = match Visibility::parse(&visibility).unwrap_or(Visibility::Everyone) {
        Visibility::Everyone => Audience::Everyone { except: hidden },
        Visibility::Contacts => {
            let mut allowed: HashSet<Uuid> = contacts
                .iter()
                .filter_map(|raw| parse_uuid(raw, "contacts"))
                .filter(|c| !hidden.contains(c))
                .collect();
            allowed.insert(subject);
            Audience::Only(allowed)
        }
        Visibility::Nobody => Audience::Only(HashSet::from([subject])),
    };

    Ok(audience)
}

/// The currently-online participants this observer is allowed to see,
/// used to seed a fresh connection's roster.
pub async fn visible_online_roster(
    db: &Arc<Database>,
    registry: &PresenceRegistry,
    observer: Uuid,
) -> Result<Vec<Uuid>, ChatError> {
    let mut visible = Vec::new();
    for subject in registry.online_participants().await {
        if subject == observer {
            continue;
        }
        let audience = presence_audience(db, subject).await?;
        if audience.allows(observer) {
            visible.push(subject);
        }
    }
    Ok(visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_everyone_excludes_hidden() {
        let hidden = Uuid::new_v4();
        let other = Uuid::new_v4();
        let audience = Audience::Everyone {
            except: HashSet::from([hidden]),
        };
        assert!(audience.allows(other));
        assert!(!audience.allows(hidden));
    }

    #[test]
    fn audience_only_admits_listed_observers() {
        let contact = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let audience = Audience::Only(HashSet::from([contact]));
        assert!(audience.allows(contact));
        assert!(!audience.allows(stranger));
    }

    #[tokio::test]
    async fn first_and_last_connection_flags_follow_device_count() {
        let registry = PresenceRegistry::new();
        let participant = Uuid::new_v4();

        let (conn_a, _rx_a, first) = registry.connect(participant).await;
        assert!(first);
        let (conn_b, _rx_b, first) = registry.connect(participant).await;
        assert!(!first);

        assert!(registry.is_online(participant).await);
        assert_eq!(
            registry.connections_for(participant).await,
            HashSet::from([conn_a, conn_b])
        );
        assert!(!registry.disconnect(participant, conn_a).await);
        assert!(registry.disconnect(participant, conn_b).await);
        assert!(!registry.is_online(participant).await);
        assert!(registry.connections_for(participant).await.is_empty());
    }

    #[tokio::test]
    async fn targeted_send_reaches_all_devices() {
        let registry = PresenceRegistry::new();
        let participant = Uuid::new_v4();

        let (_, mut rx_a, _) = registry.connect(participant).await;
        let (_, mut rx_b, _) = registry.connect(participant).await;

        registry
            .send_to_participant(participant, GatewayEvent::UserOnline {
                participant_id: participant,
            })
            .await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn fan_out_skips_the_excluded_connection() {
        let registry = PresenceRegistry::new();
        let participant = Uuid::new_v4();

        let (conn_a, mut rx_a, _) = registry.connect(participant).await;
        let (_, mut rx_b, _) = registry.connect(participant).await;

        registry
            .send_to_participants(
                &[participant],
                Some(conn_a),
                GatewayEvent::UserOnline {
                    participant_id: participant,
                },
            )
            .await;

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }
}
