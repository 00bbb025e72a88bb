use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use uuid::Uuid;

use pulse_core::enrichment::Enricher;
use pulse_core::pipeline::{MessageDraft, MessagePipeline};
use pulse_core::presence::{self, PresenceRegistry};
use pulse_core::receipts::ReceiptTracker;
use pulse_core::router::RoomRouter;
use pulse_core::sweeper;
use pulse_db::{Database, TOMBSTONE_TEXT};
use pulse_types::ChatError;
use pulse_types::events::GatewayEvent;
use pulse_types::models::{Enrichment, IntentTag, MessageKind, MessageStatus};

/// Enricher that always has something to say.
struct CannedEnricher;

#[async_trait]
impl Enricher for CannedEnricher {
    async fn analyze(&self, _text: &str) -> anyhow::Result<Enrichment> {
        Ok(Enrichment {
            smart_replies: Some(vec!["On it".to_string()]),
            intent: Some(IntentTag::Task),
            is_important: Some(true),
        })
    }
}

/// Enricher that never has anything to say.
struct SilentEnricher;

#[async_trait]
impl Enricher for SilentEnricher {
    async fn analyze(&self, _text: &str) -> anyhow::Result<Enrichment> {
        Ok(Enrichment::default())
    }
}

struct Harness {
    db: Arc<Database>,
    registry: PresenceRegistry,
    router: RoomRouter,
    receipts: ReceiptTracker,
    pipeline: MessagePipeline,
}

fn harness() -> Harness {
    harness_with(Arc::new(SilentEnricher))
}

fn harness_with(enricher: Arc<dyn Enricher>) -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let registry = PresenceRegistry::new();
    let router = RoomRouter::new(Arc::clone(&db), registry.clone());
    let receipts = ReceiptTracker::new(Arc::clone(&db), registry.clone());
    let pipeline = MessagePipeline::new(
        Arc::clone(&db),
        registry.clone(),
        router.clone(),
        receipts.clone(),
        enricher,
    );
    Harness {
        db,
        registry,
        router,
        receipts,
        pipeline,
    }
}

fn seed_participant(db: &Database, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    db.create_participant(
        &id.to_string(),
        name,
        &format!("{name}@example.test"),
        "hash",
        "I'm heads down right now.",
        &Utc::now().to_rfc3339(),
    )
    .unwrap();
    id
}

fn seed_direct(db: &Database, a: Uuid, b: Uuid) -> Uuid {
    let (id, _) = db
        .get_or_create_direct(
            &Uuid::new_v4().to_string(),
            &a.to_string(),
            &b.to_string(),
            &Utc::now().to_rfc3339(),
        )
        .unwrap();
    id.parse().unwrap()
}

fn draft(conversation_id: Uuid, sender_id: Uuid, text: &str) -> MessageDraft {
    MessageDraft {
        conversation_id,
        sender_id,
        kind: MessageKind::Text,
        text: Some(text.to_string()),
        media_url: None,
        reply_to: None,
        origin_conn: None,
    }
}

async fn expect_event(rx: &mut UnboundedReceiver<GatewayEvent>) -> GatewayEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn submit_rejects_outsiders_and_unknown_conversations() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let eve = seed_participant(&h.db, "eve");
    let conv = seed_direct(&h.db, alice, bob);

    let err = h.pipeline.submit(draft(conv, eve, "hi")).await.unwrap_err();
    assert!(matches!(err, ChatError::AccessDenied));

    let err = h
        .pipeline
        .submit(draft(Uuid::new_v4(), alice, "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn submit_validates_content() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);

    let mut empty = draft(conv, alice, "   ");
    empty.media_url = None;
    let err = h.pipeline.submit(empty).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let err = h
        .pipeline
        .submit(draft(conv, alice, &"x".repeat(4001)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    // Replying across conversations is rejected.
    let carol = seed_participant(&h.db, "carol");
    let other = seed_direct(&h.db, alice, carol);
    let elsewhere = h.pipeline.submit(draft(other, alice, "over here")).await.unwrap();
    let mut crossed = draft(conv, alice, "re: that");
    crossed.reply_to = Some(elsewhere.id);
    let err = h.pipeline.submit(crossed).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn submit_reaches_online_members_with_delivery_marked() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);

    let (_bob_conn, mut bob_rx, _) = h.registry.connect(bob).await;

    let payload = h.pipeline.submit(draft(conv, alice, "lunch?")).await.unwrap();
    assert_eq!(payload.status, MessageStatus::Delivered);
    assert_eq!(payload.delivered_to.len(), 1);
    assert_eq!(payload.delivered_to[0].participant_id, bob);
    assert!(payload.seen_by.is_empty());

    match expect_event(&mut bob_rx).await {
        GatewayEvent::MessageNew { message } => {
            assert_eq!(message.id, payload.id);
            assert_eq!(message.text.as_deref(), Some("lunch?"));
            assert_eq!(message.sender.id, alice);
        }
        other => panic!("expected message:new, got {other:?}"),
    }
}

#[tokio::test]
async fn offline_recipients_are_not_marked_delivered() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);

    let payload = h.pipeline.submit(draft(conv, alice, "ping")).await.unwrap();
    assert_eq!(payload.status, MessageStatus::Sent);
    assert!(payload.delivered_to.is_empty());
}

#[tokio::test]
async fn focus_auto_reply_reaches_the_sender_only_and_is_never_stored() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);
    h.db
        .update_focus(&bob.to_string(), Some(true), Some("Focusing, back later."), None)
        .unwrap();

    let (alice_conn, mut alice_rx, _) = h.registry.connect(alice).await;
    let (_bob_conn, mut bob_rx, _) = h.registry.connect(bob).await;

    let mut d = draft(conv, alice, "are we meeting at 3?");
    d.origin_conn = Some(alice_conn);
    h.pipeline.submit(d).await.unwrap();

    // The origin connection skips the fan-out echo, so the auto-reply is
    // the first thing the sender hears back.
    match expect_event(&mut alice_rx).await {
        GatewayEvent::MessageAutoReply { from, text, .. } => {
            assert_eq!(from, bob);
            assert_eq!(text, "Focusing, back later.");
        }
        other => panic!("expected message:auto-reply, got {other:?}"),
    }

    match expect_event(&mut bob_rx).await {
        GatewayEvent::MessageNew { .. } => {}
        other => panic!("expected message:new, got {other:?}"),
    }
    assert!(bob_rx.try_recv().is_err());

    let stored = h
        .db
        .get_messages(&conv.to_string(), &bob.to_string(), 50, None)
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn allow_listed_senders_bypass_focus_mode() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);
    h.db
        .update_focus(&bob.to_string(), Some(true), None, None)
        .unwrap();
    h.db
        .set_focus_allowed(&bob.to_string(), &[alice.to_string()])
        .unwrap();

    let (alice_conn, mut alice_rx, _) = h.registry.connect(alice).await;

    let mut d = draft(conv, alice, "quick one");
    d.origin_conn = Some(alice_conn);
    h.pipeline.submit(d).await.unwrap();

    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn seen_marks_notify_the_sender_and_schedule_delete_after_seen() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);
    h.db
        .update_expiry(&conv.to_string(), true, None, true, &Utc::now().to_rfc3339())
        .unwrap();

    let payload = h.pipeline.submit(draft(conv, alice, "psst")).await.unwrap();

    let (_alice_conn, mut alice_rx, _) = h.registry.connect(alice).await;
    let updates = h
        .receipts
        .mark_seen(conv, bob, vec![payload.id])
        .await
        .unwrap();
    assert_eq!(updates.len(), 1);

    match expect_event(&mut alice_rx).await {
        GatewayEvent::MessageSeenUpdate {
            message_id,
            seen_by,
            status,
            ..
        } => {
            assert_eq!(message_id, payload.id);
            assert_eq!(seen_by, bob);
            assert_eq!(status, MessageStatus::Seen);
        }
        other => panic!("expected message:seen-update, got {other:?}"),
    }

    // Every non-sender member has seen it, so it now carries a short fuse.
    let row = h.db.get_message(&payload.id.to_string()).unwrap().unwrap();
    assert_eq!(row.status, "seen");
    assert!(row.expires_at.is_some());

    // Marking again is a no-op.
    let again = h
        .receipts
        .mark_seen(conv, bob, vec![payload.id])
        .await
        .unwrap();
    assert!(again.is_empty());
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn seen_marks_skip_self_sent_messages_and_require_membership() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let eve = seed_participant(&h.db, "eve");
    let conv = seed_direct(&h.db, alice, bob);

    let payload = h.pipeline.submit(draft(conv, alice, "mine")).await.unwrap();

    let err = h
        .receipts
        .mark_seen(conv, eve, vec![payload.id])
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::AccessDenied));

    let own = h
        .receipts
        .mark_seen(conv, alice, vec![payload.id])
        .await
        .unwrap();
    assert!(own.is_empty());
    let row = h.db.get_message(&payload.id.to_string()).unwrap().unwrap();
    assert_eq!(row.status, "sent");
}

#[tokio::test]
async fn read_receipts_off_withholds_the_notification_but_records_state() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);
    h.db
        .update_privacy(&bob.to_string(), None, None, Some(false))
        .unwrap();

    let payload = h.pipeline.submit(draft(conv, alice, "psst")).await.unwrap();

    let (_alice_conn, mut alice_rx, _) = h.registry.connect(alice).await;
    let updates = h
        .receipts
        .mark_seen(conv, bob, vec![payload.id])
        .await
        .unwrap();
    assert_eq!(updates.len(), 1);
    assert!(alice_rx.try_recv().is_err());

    let row = h.db.get_message(&payload.id.to_string()).unwrap().unwrap();
    assert_eq!(row.status, "seen");
}

#[tokio::test]
async fn delete_for_everyone_is_sender_only_and_tombstones() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);

    let payload = h.pipeline.submit(draft(conv, alice, "oops")).await.unwrap();

    let err = h
        .pipeline
        .delete_for_everyone(bob, payload.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Forbidden(_)));

    let gone = h
        .pipeline
        .delete_for_everyone(alice, payload.id)
        .await
        .unwrap();
    assert!(gone.is_deleted);
    assert_eq!(gone.text.as_deref(), Some(TOMBSTONE_TEXT));
    assert!(gone.media_url.is_none());
}

#[tokio::test]
async fn delete_for_self_hides_only_for_the_requester() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);

    let err = h
        .pipeline
        .delete_for_self(bob, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));

    let payload = h.pipeline.submit(draft(conv, alice, "noise")).await.unwrap();

    let eve = seed_participant(&h.db, "eve");
    let err = h
        .pipeline
        .delete_for_self(eve, payload.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::AccessDenied));

    h.pipeline.delete_for_self(bob, payload.id).await.unwrap();

    let for_bob = h
        .db
        .get_messages(&conv.to_string(), &bob.to_string(), 50, None)
        .unwrap();
    assert!(for_bob.is_empty());
    let for_alice = h
        .db
        .get_messages(&conv.to_string(), &alice.to_string(), 50, None)
        .unwrap();
    assert_eq!(for_alice.len(), 1);
}

#[tokio::test]
async fn pin_toggle_round_trips_and_requires_membership() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let eve = seed_participant(&h.db, "eve");
    let conv = seed_direct(&h.db, alice, bob);

    let payload = h.pipeline.submit(draft(conv, alice, "keep this")).await.unwrap();

    let err = h.pipeline.toggle_pin(eve, payload.id).await.unwrap_err();
    assert!(matches!(err, ChatError::AccessDenied));

    let pinned = h.pipeline.toggle_pin(bob, payload.id).await.unwrap();
    assert!(pinned.is_pinned);
    assert_eq!(pinned.pinned_by, Some(bob));
    let ids = h.db.pinned_message_ids(&conv.to_string()).unwrap();
    assert_eq!(ids, vec![payload.id.to_string()]);

    let unpinned = h.pipeline.toggle_pin(bob, payload.id).await.unwrap();
    assert!(!unpinned.is_pinned);
    assert_eq!(unpinned.pinned_by, None);
    assert!(h.db.pinned_message_ids(&conv.to_string()).unwrap().is_empty());
}

#[tokio::test]
async fn enrichment_lands_as_an_update_event() {
    let h = harness_with(Arc::new(CannedEnricher));
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);

    let (_bob_conn, mut bob_rx, _) = h.registry.connect(bob).await;

    h.pipeline
        .submit(draft(conv, alice, "don't forget the deadline tomorrow"))
        .await
        .unwrap();

    match expect_event(&mut bob_rx).await {
        GatewayEvent::MessageNew { message } => assert!(message.enrichment.is_empty()),
        other => panic!("expected message:new, got {other:?}"),
    }
    match expect_event(&mut bob_rx).await {
        GatewayEvent::MessageUpdated { message } => {
            assert_eq!(
                message.enrichment.smart_replies,
                Some(vec!["On it".to_string()])
            );
            assert_eq!(message.enrichment.intent, Some(IntentTag::Task));
            assert_eq!(message.enrichment.is_important, Some(true));
        }
        other => panic!("expected message:updated, got {other:?}"),
    }
}

#[tokio::test]
async fn short_messages_skip_enrichment() {
    let h = harness_with(Arc::new(CannedEnricher));
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);

    let (_bob_conn, mut bob_rx, _) = h.registry.connect(bob).await;

    let payload = h.pipeline.submit(draft(conv, alice, "short one")).await.unwrap();

    match expect_event(&mut bob_rx).await {
        GatewayEvent::MessageNew { .. } => {}
        other => panic!("expected message:new, got {other:?}"),
    }
    assert!(bob_rx.try_recv().is_err());
    let row = h.db.get_message(&payload.id.to_string()).unwrap().unwrap();
    assert!(row.smart_replies.is_none());
}

#[tokio::test]
async fn concurrent_submissions_never_lose_the_last_message_pointer() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);

    let (first, second) = tokio::join!(
        h.pipeline.submit(draft(conv, alice, "one")),
        h.pipeline.submit(draft(conv, bob, "two")),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_ne!(first.id, second.id);

    let row = h.db.get_conversation(&conv.to_string()).unwrap().unwrap();
    let pointer = row.last_message_id.unwrap();
    assert!(pointer == first.id.to_string() || pointer == second.id.to_string());

    let rows = h
        .db
        .get_messages(&conv.to_string(), &alice.to_string(), 50, None)
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn joining_requires_membership_and_typing_stays_scoped() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let eve = seed_participant(&h.db, "eve");
    let conv = seed_direct(&h.db, alice, bob);

    let (alice_conn, mut alice_rx, _) = h.registry.connect(alice).await;
    let (bob_conn, mut bob_rx, _) = h.registry.connect(bob).await;
    let (eve_conn, _eve_rx, _) = h.registry.connect(eve).await;

    let err = h.router.join(eve_conn, eve, conv).await.unwrap_err();
    assert!(matches!(err, ChatError::AccessDenied));
    let err = h
        .router
        .join(alice_conn, alice, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));

    h.router.join(alice_conn, alice, conv).await.unwrap();
    h.router.join(bob_conn, bob, conv).await.unwrap();

    let typing = GatewayEvent::UserTyping {
        conversation_id: conv,
        participant_id: alice,
        name: "alice".to_string(),
    };
    h.router
        .send_to_joined(conv, typing.clone(), Some(alice_conn))
        .await;

    match expect_event(&mut bob_rx).await {
        GatewayEvent::UserTyping { participant_id, .. } => assert_eq!(participant_id, alice),
        other => panic!("expected user:typing, got {other:?}"),
    }
    assert!(alice_rx.try_recv().is_err());

    h.router.leave(bob_conn, conv).await;
    h.router.send_to_joined(conv, typing, Some(alice_conn)).await;
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn live_connections_span_every_member_device() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let eve = seed_participant(&h.db, "eve");
    let conv = seed_direct(&h.db, alice, bob);

    let (alice_phone, _rx_a, _) = h.registry.connect(alice).await;
    let (alice_laptop, _rx_b, _) = h.registry.connect(alice).await;
    let (bob_conn, _rx_c, _) = h.registry.connect(bob).await;
    let (_eve_conn, _rx_d, _) = h.registry.connect(eve).await;

    let live = h.router.live_connections_for(conv).await.unwrap();
    assert_eq!(live.len(), 3);
    assert!(live.contains(&alice_phone));
    assert!(live.contains(&alice_laptop));
    assert!(live.contains(&bob_conn));

    let err = h
        .router
        .live_connections_for(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}

#[tokio::test]
async fn presence_audiences_resolve_stored_visibility_settings() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let carol = seed_participant(&h.db, "carol");
    let dave = seed_participant(&h.db, "dave");
    let mallory = seed_participant(&h.db, "mallory");
    let frank = seed_participant(&h.db, "frank");
    seed_direct(&h.db, alice, carol);
    seed_direct(&h.db, carol, frank);

    // alice: everyone, but hides from mallory
    h.db
        .set_presence_hidden(&alice.to_string(), &[mallory.to_string()])
        .unwrap();
    // carol: contacts only, and hides from alice even though they share a room
    h.db
        .update_privacy(&carol.to_string(), Some("contacts"), None, None)
        .unwrap();
    h.db
        .set_presence_hidden(&carol.to_string(), &[alice.to_string()])
        .unwrap();
    // dave: nobody
    h.db
        .update_privacy(&dave.to_string(), Some("nobody"), None, None)
        .unwrap();

    let audience = presence::presence_audience(&h.db, alice).await.unwrap();
    assert!(audience.allows(bob));
    assert!(!audience.allows(mallory));

    let audience = presence::presence_audience(&h.db, carol).await.unwrap();
    assert!(audience.allows(carol));
    assert!(audience.allows(frank));
    assert!(!audience.allows(alice));
    assert!(!audience.allows(bob));

    let audience = presence::presence_audience(&h.db, dave).await.unwrap();
    assert!(audience.allows(dave));
    assert!(!audience.allows(bob));
    assert!(!audience.allows(frank));
}

#[tokio::test]
async fn online_roster_is_filtered_per_observer() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let carol = seed_participant(&h.db, "carol");
    let dave = seed_participant(&h.db, "dave");
    let frank = seed_participant(&h.db, "frank");
    seed_direct(&h.db, carol, frank);

    h.db
        .update_privacy(&carol.to_string(), Some("contacts"), None, None)
        .unwrap();
    h.db
        .update_privacy(&dave.to_string(), Some("nobody"), None, None)
        .unwrap();

    let (_, _rx_a, _) = h.registry.connect(alice).await;
    let (_, _rx_c, _) = h.registry.connect(carol).await;
    let (_, _rx_d, _) = h.registry.connect(dave).await;

    // bob is nobody's contact: only alice's open presence shows
    let visible = presence::visible_online_roster(&h.db, &h.registry, bob)
        .await
        .unwrap();
    assert_eq!(visible, vec![alice]);

    // frank shares a room with carol, so she shows too; dave never does
    let visible = presence::visible_online_roster(&h.db, &h.registry, frank)
        .await
        .unwrap();
    assert_eq!(visible.len(), 2);
    assert!(visible.contains(&alice));
    assert!(visible.contains(&carol));
}

#[tokio::test]
async fn sweep_reaps_messages_past_their_expiry() {
    let h = harness();
    let alice = seed_participant(&h.db, "alice");
    let bob = seed_participant(&h.db, "bob");
    let conv = seed_direct(&h.db, alice, bob);
    h.db
        .update_expiry(&conv.to_string(), true, Some(1), false, &Utc::now().to_rfc3339())
        .unwrap();

    let payload = h.pipeline.submit(draft(conv, alice, "gone soon")).await.unwrap();
    assert!(payload.expires_at.is_some());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let reaped = sweeper::sweep_expired(&h.db).await.unwrap();
    assert_eq!(reaped, 1);
    assert!(h.db.get_message(&payload.id.to_string()).unwrap().is_none());
}
