use chrono::{Duration, Utc};
use pulse_db::Database;
use pulse_db::models::NewMessageRow;

fn ts(offset_secs: i64) -> String {
    (Utc::now() + Duration::seconds(offset_secs)).to_rfc3339()
}

fn seed_participant(db: &Database, id: &str, name: &str) {
    db.create_participant(
        id,
        name,
        &format!("{id}@example.test"),
        "hash",
        "I'm currently focusing.",
        &ts(0),
    )
    .unwrap();
}

fn text_message(id: &str, conversation_id: &str, sender_id: &str, body: &str, created_at: String) -> NewMessageRow {
    NewMessageRow {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        kind: "text".to_string(),
        body: Some(body.to_string()),
        media_url: None,
        media_kind: None,
        reply_to: None,
        status: "sent".to_string(),
        expires_at: None,
        created_at,
    }
}

#[test]
fn direct_pair_is_unique_regardless_of_order() {
    let db = Database::open_in_memory().unwrap();
    seed_participant(&db, "alice", "Alice");
    seed_participant(&db, "bob", "Bob");

    let (first, created) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();
    assert!(created);

    let (second, created) = db.get_or_create_direct("conv-2", "bob", "alice", &ts(1)).unwrap();
    assert!(!created);
    assert_eq!(first, second);

    let members = db.members_of(&first).unwrap();
    assert_eq!(members.len(), 2);
}

#[test]
fn insert_advances_last_message_pointer() {
    let db = Database::open_in_memory().unwrap();
    seed_participant(&db, "alice", "Alice");
    seed_participant(&db, "bob", "Bob");
    let (conv, _) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();

    db.insert_message(&text_message("m1", &conv, "alice", "first", ts(1))).unwrap();
    db.insert_message(&text_message("m2", &conv, "alice", "second", ts(2))).unwrap();

    let row = db.get_conversation(&conv).unwrap().unwrap();
    assert_eq!(row.last_message_id.as_deref(), Some("m2"));
}

#[test]
fn delivered_receipt_is_idempotent() {
    let db = Database::open_in_memory().unwrap();
    seed_participant(&db, "alice", "Alice");
    seed_participant(&db, "bob", "Bob");
    let (conv, _) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();
    db.insert_message(&text_message("m1", &conv, "alice", "hi", ts(1))).unwrap();

    let first_at = ts(2);
    assert!(db.mark_delivered("m1", "bob", &first_at).unwrap());
    assert!(!db.mark_delivered("m1", "bob", &ts(30)).unwrap());

    let receipts = db.receipts_for_messages(&["m1".to_string()]).unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].delivered_at.as_deref(), Some(first_at.as_str()));

    let row = db.get_message("m1").unwrap().unwrap();
    assert_eq!(row.status, "delivered");
}

#[test]
fn seen_backfills_delivery_and_never_regresses() {
    let db = Database::open_in_memory().unwrap();
    seed_participant(&db, "alice", "Alice");
    seed_participant(&db, "bob", "Bob");
    let (conv, _) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();
    db.insert_message(&text_message("m1", &conv, "alice", "hi", ts(1))).unwrap();

    // Seen without any prior delivered receipt
    let seen_at = ts(2);
    assert!(db.mark_seen("m1", "bob", &seen_at).unwrap());

    let receipts = db.receipts_for_messages(&["m1".to_string()]).unwrap();
    assert_eq!(receipts[0].delivered_at.as_deref(), Some(seen_at.as_str()));
    assert_eq!(receipts[0].seen_at.as_deref(), Some(seen_at.as_str()));
    assert_eq!(db.get_message("m1").unwrap().unwrap().status, "seen");

    // Repeat seen is a no-op, and a late delivered mark cannot regress status
    assert!(!db.mark_seen("m1", "bob", &ts(40)).unwrap());
    assert!(!db.mark_delivered("m1", "bob", &ts(41)).unwrap());
    assert_eq!(db.get_message("m1").unwrap().unwrap().status, "seen");
}

#[test]
fn vote_moves_keep_one_row_per_voter() {
    let db = Database::open_in_memory().unwrap();
    seed_participant(&db, "alice", "Alice");
    seed_participant(&db, "bob", "Bob");
    let (conv, _) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();
    db.create_poll(
        "poll-1",
        &conv,
        "alice",
        "Lunch?",
        &["pizza".to_string(), "sushi".to_string()],
        None,
        &ts(1),
    )
    .unwrap();

    db.cast_vote("poll-1", "bob", 0).unwrap();
    db.cast_vote("poll-1", "bob", 1).unwrap();

    let votes = db.poll_votes("poll-1").unwrap();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].option_index, 1);
}

#[test]
fn removing_last_admin_promotes_longest_tenured_member() {
    let db = Database::open_in_memory().unwrap();
    for id in ["ada", "ben", "cal"] {
        seed_participant(&db, id, id);
    }
    db.create_group(
        "grp-1",
        "team",
        None,
        "ada",
        &["ben".to_string(), "cal".to_string()],
        &ts(0),
    )
    .unwrap();
    // Give ben an earlier joined_at than cal so tenure ordering is deterministic
    db.with_conn_mut(|conn| {
        conn.execute(
            "UPDATE members SET joined_at = ?1 WHERE conversation_id = 'grp-1' AND participant_id = 'ben'",
            [ts(-10)],
        )?;
        Ok(())
    })
    .unwrap();

    let promoted = db.remove_member("grp-1", "ada").unwrap();
    assert_eq!(promoted.as_deref(), Some("ben"));
    assert_eq!(db.member_role("grp-1", "ben").unwrap().as_deref(), Some("admin"));
}

#[test]
fn expired_messages_are_reaped_with_their_rows() {
    let db = Database::open_in_memory().unwrap();
    seed_participant(&db, "alice", "Alice");
    seed_participant(&db, "bob", "Bob");
    let (conv, _) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();

    let mut doomed = text_message("m1", &conv, "alice", "soon gone", ts(-60));
    doomed.expires_at = Some(ts(-5));
    db.insert_message(&doomed).unwrap();
    db.insert_message(&text_message("m2", &conv, "alice", "stays", ts(1))).unwrap();
    db.mark_delivered("m1", "bob", &ts(-50)).unwrap();

    let reaped = db.delete_expired(&ts(0)).unwrap();
    assert_eq!(reaped, 1);

    assert!(db.get_message("m1").unwrap().is_none());
    assert!(db.get_message("m2").unwrap().is_some());
    assert!(db.receipts_for_messages(&["m1".to_string()]).unwrap().is_empty());
}

#[test]
fn reaping_the_newest_message_clears_the_pointer() {
    let db = Database::open_in_memory().unwrap();
    seed_participant(&db, "alice", "Alice");
    seed_participant(&db, "bob", "Bob");
    let (conv, _) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();

    let mut doomed = text_message("m1", &conv, "alice", "gone", ts(-60));
    doomed.expires_at = Some(ts(-5));
    db.insert_message(&doomed).unwrap();

    db.delete_expired(&ts(0)).unwrap();
    let row = db.get_conversation(&conv).unwrap().unwrap();
    assert!(row.last_message_id.is_none());
}

#[test]
fn enrichment_merge_skips_tombstoned_messages() {
    let db = Database::open_in_memory().unwrap();
    seed_participant(&db, "alice", "Alice");
    seed_participant(&db, "bob", "Bob");
    let (conv, _) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();
    db.insert_message(&text_message("m1", &conv, "alice", "let's meet tomorrow", ts(1))).unwrap();

    db.tombstone_message("m1").unwrap();
    let merged = db
        .merge_enrichment("m1", Some(r#"["Sounds good"]"#), Some("meeting"), Some(true))
        .unwrap();
    assert!(!merged);

    let row = db.get_message("m1").unwrap().unwrap();
    assert_eq!(row.body.as_deref(), Some(pulse_db::TOMBSTONE_TEXT));
    assert!(row.smart_replies.is_none());
    assert!(row.intent.is_none());
}

#[test]
fn hidden_messages_are_filtered_per_viewer() {
    let db = Database::open_in_memory().unwrap();
    seed_participant(&db, "alice", "Alice");
    seed_participant(&db, "bob", "Bob");
    let (conv, _) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();
    db.insert_message(&text_message("m1", &conv, "alice", "hello", ts(1))).unwrap();

    db.hide_message_for("m1", "bob").unwrap();

    let for_bob = db.get_messages(&conv, "bob", 50, None).unwrap();
    assert!(for_bob.is_empty());
    let for_alice = db.get_messages(&conv, "alice", 50, None).unwrap();
    assert_eq!(for_alice.len(), 1);
}

#[test]
fn before_cursor_pages_into_older_history() {
    let db = Database::open_in_memory().unwrap();
    seed_participant(&db, "alice", "Alice");
    seed_participant(&db, "bob", "Bob");
    let (conv, _) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();

    db.insert_message(&text_message("m1", &conv, "alice", "one", ts(1))).unwrap();
    db.insert_message(&text_message("m2", &conv, "alice", "two", ts(2))).unwrap();
    db.insert_message(&text_message("m3", &conv, "alice", "three", ts(3))).unwrap();

    let newest = db.get_messages(&conv, "bob", 1, None).unwrap();
    assert_eq!(newest[0].id, "m3");

    let older = db
        .get_messages(&conv, "bob", 50, Some(newest[0].created_at.as_str()))
        .unwrap();
    let ids: Vec<&str> = older.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m1"]);
}

#[test]
fn search_skips_tombstones_and_foreign_conversations() {
    let db = Database::open_in_memory().unwrap();
    for id in ["alice", "bob", "eve"] {
        seed_participant(&db, id, id);
    }
    let (conv, _) = db.get_or_create_direct("conv-1", "alice", "bob", &ts(0)).unwrap();
    db.insert_message(&text_message("m1", &conv, "alice", "project deadline friday", ts(1))).unwrap();
    db.insert_message(&text_message("m2", &conv, "alice", "deadline moved", ts(2))).unwrap();
    db.tombstone_message("m2").unwrap();

    let hits = db.search_messages("bob", "deadline", None, 50).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "m1");

    // eve shares no conversation with the matched message
    assert!(db.search_messages("eve", "deadline", None, 50).unwrap().is_empty());
}
