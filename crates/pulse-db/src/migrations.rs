use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS participants (
            id                  TEXT PRIMARY KEY,
            name                TEXT NOT NULL,
            email               TEXT NOT NULL UNIQUE,
            password            TEXT NOT NULL,
            avatar              TEXT,
            bio                 TEXT,
            is_online           INTEGER NOT NULL DEFAULT 0,
            last_seen           TEXT NOT NULL,
            show_online_status  TEXT NOT NULL DEFAULT 'everyone',
            show_last_seen      TEXT NOT NULL DEFAULT 'everyone',
            read_receipts       INTEGER NOT NULL DEFAULT 1,
            focus_active        INTEGER NOT NULL DEFAULT 0,
            focus_auto_reply    TEXT NOT NULL,
            focus_start         TEXT,
            focus_end           TEXT,
            focus_days          TEXT,
            created_at          TEXT NOT NULL
        );

        -- Senders whose messages bypass a participant's focus mode
        CREATE TABLE IF NOT EXISTS focus_allowed (
            participant_id  TEXT NOT NULL REFERENCES participants(id),
            contact_id      TEXT NOT NULL REFERENCES participants(id),
            PRIMARY KEY (participant_id, contact_id)
        );

        -- Participants the owner is invisible to, regardless of visibility level
        CREATE TABLE IF NOT EXISTS presence_hidden (
            participant_id  TEXT NOT NULL REFERENCES participants(id),
            hidden_id       TEXT NOT NULL REFERENCES participants(id),
            PRIMARY KEY (participant_id, hidden_id)
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY,
            kind                TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
            name                TEXT,
            description         TEXT,
            avatar              TEXT,
            direct_key          TEXT UNIQUE,
            last_message_id     TEXT,
            expiry_enabled      INTEGER NOT NULL DEFAULT 0,
            expiry_duration_ms  INTEGER,
            delete_after_seen   INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS members (
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            participant_id   TEXT NOT NULL REFERENCES participants(id),
            role             TEXT NOT NULL DEFAULT 'member'
                             CHECK (role IN ('member', 'moderator', 'admin')),
            joined_at        TEXT NOT NULL,
            PRIMARY KEY (conversation_id, participant_id)
        );

        CREATE INDEX IF NOT EXISTS idx_members_participant
            ON members(participant_id);

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            sender_id        TEXT NOT NULL REFERENCES participants(id),
            kind             TEXT NOT NULL DEFAULT 'text',
            body             TEXT,
            media_url        TEXT,
            media_kind       TEXT,
            reply_to         TEXT,
            status           TEXT NOT NULL DEFAULT 'sent'
                             CHECK (status IN ('sent', 'delivered', 'seen')),
            is_pinned        INTEGER NOT NULL DEFAULT 0,
            pinned_by        TEXT,
            is_deleted       INTEGER NOT NULL DEFAULT 0,
            expires_at       TEXT,
            smart_replies    TEXT,
            intent           TEXT,
            is_important     INTEGER,
            created_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_expiry
            ON messages(expires_at) WHERE expires_at IS NOT NULL;

        -- One row per (message, recipient); timestamps only ever move forward
        CREATE TABLE IF NOT EXISTS receipts (
            message_id      TEXT NOT NULL REFERENCES messages(id),
            participant_id  TEXT NOT NULL REFERENCES participants(id),
            delivered_at    TEXT,
            seen_at         TEXT,
            PRIMARY KEY (message_id, participant_id)
        );

        -- Delete-for-self exclusions
        CREATE TABLE IF NOT EXISTS message_hidden (
            message_id      TEXT NOT NULL REFERENCES messages(id),
            participant_id  TEXT NOT NULL REFERENCES participants(id),
            PRIMARY KEY (message_id, participant_id)
        );

        CREATE TABLE IF NOT EXISTS polls (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            created_by       TEXT NOT NULL REFERENCES participants(id),
            question         TEXT NOT NULL,
            expires_at       TEXT,
            created_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS poll_options (
            poll_id       TEXT NOT NULL REFERENCES polls(id),
            option_index  INTEGER NOT NULL,
            label         TEXT NOT NULL,
            PRIMARY KEY (poll_id, option_index)
        );

        -- The primary key keeps each voter on at most one option
        CREATE TABLE IF NOT EXISTS poll_votes (
            poll_id       TEXT NOT NULL REFERENCES polls(id),
            voter_id      TEXT NOT NULL REFERENCES participants(id),
            option_index  INTEGER NOT NULL,
            PRIMARY KEY (poll_id, voter_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
