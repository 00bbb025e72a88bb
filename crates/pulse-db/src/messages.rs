use crate::models::{MessageRow, NewMessageRow, ReplyRow};
use crate::participants::like_pattern;
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::Connection;

/// Replacement body for messages deleted for everyone.
pub const TOMBSTONE_TEXT: &str = "This message was deleted";

const MESSAGE_COLS: &str = "m.id, m.conversation_id, m.sender_id, p.name, p.avatar, m.kind, \
     m.body, m.media_url, m.media_kind, m.reply_to, m.status, m.is_pinned, m.pinned_by, \
     m.is_deleted, m.expires_at, m.smart_replies, m.intent, m.is_important, m.created_at";

impl Database {
    // -- Writes --

    /// Insert a message and advance the conversation's last-message pointer
    /// in one transaction, so concurrent submissions leave the pointer at
    /// whichever insert committed last.
    pub fn insert_message(&self, row: &NewMessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, kind, body, media_url,
                                       media_kind, reply_to, status, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    row.id,
                    row.conversation_id,
                    row.sender_id,
                    row.kind,
                    row.body,
                    row.media_url,
                    row.media_kind,
                    row.reply_to,
                    row.status,
                    row.expires_at,
                    row.created_at,
                ],
            )?;
            tx.execute(
                "UPDATE conversations SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![row.conversation_id, row.id, row.created_at],
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    // -- Reads --

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages m
                 LEFT JOIN participants p ON m.sender_id = p.id
                 WHERE m.id = ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([id], message_from_row).optional()?;
            Ok(row)
        })
    }

    /// Page of conversation history for one viewer, newest first. Messages
    /// the viewer deleted for themselves are omitted.
    pub fn get_messages(
        &self,
        conversation_id: &str,
        viewer_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages m
                 LEFT JOIN participants p ON m.sender_id = p.id
                 WHERE m.conversation_id = ?1
                   AND (?2 IS NULL OR m.created_at < ?2)
                   AND NOT EXISTS (SELECT 1 FROM message_hidden h
                                   WHERE h.message_id = m.id AND h.participant_id = ?3)
                 ORDER BY m.created_at DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![conversation_id, before, viewer_id, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch full rows by id, in no particular order.
    pub fn get_messages_by_ids(&self, ids: &[String]) -> Result<Vec<MessageRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages m
                 LEFT JOIN participants p ON m.sender_id = p.id
                 WHERE m.id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Batch-fetch the messages a page of replies points at.
    pub fn get_replies(&self, ids: &[String]) -> Result<Vec<ReplyRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, conversation_id, sender_id, body, is_deleted
                 FROM messages WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReplyRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        body: row.get(3)?,
                        is_deleted: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Body search across the viewer's conversations, tombstones excluded.
    pub fn search_messages(
        &self,
        viewer_id: &str,
        q: &str,
        conversation_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages m
                 LEFT JOIN participants p ON m.sender_id = p.id
                 JOIN members mb ON mb.conversation_id = m.conversation_id
                                AND mb.participant_id = ?1
                 WHERE m.body LIKE ?2 ESCAPE '\\'
                   AND m.is_deleted = 0
                   AND (?3 IS NULL OR m.conversation_id = ?3)
                   AND NOT EXISTS (SELECT 1 FROM message_hidden h
                                   WHERE h.message_id = m.id AND h.participant_id = ?1)
                 ORDER BY m.created_at DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![viewer_id, like_pattern(q), conversation_id, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn pinned_message_ids(&self, conversation_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM messages
                 WHERE conversation_id = ?1 AND is_pinned = 1
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch variant returning (conversation_id, message_id) pairs.
    pub fn pinned_ids_for_many(
        &self,
        conversation_ids: &[String],
    ) -> Result<Vec<(String, String)>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=conversation_ids.len())
                .map(|i| format!("?{}", i))
                .collect();
            let sql = format!(
                "SELECT conversation_id, id FROM messages
                 WHERE is_pinned = 1 AND conversation_id IN ({})
                 ORDER BY created_at ASC",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = conversation_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Mutation --

    /// Replace content with the tombstone and strip media and annotations.
    pub fn tombstone_message(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET
                     body = ?2,
                     media_url = NULL,
                     media_kind = NULL,
                     is_deleted = 1,
                     smart_replies = NULL,
                     intent = NULL,
                     is_important = NULL
                 WHERE id = ?1",
                rusqlite::params![id, TOMBSTONE_TEXT],
            )?;
            Ok(())
        })
    }

    pub fn hide_message_for(&self, message_id: &str, participant_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_hidden (message_id, participant_id) VALUES (?1, ?2)",
                [message_id, participant_id],
            )?;
            Ok(())
        })
    }

    pub fn set_pinned(&self, id: &str, pinned: bool, pinned_by: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET is_pinned = ?2, pinned_by = ?3 WHERE id = ?1",
                rusqlite::params![id, pinned, pinned_by],
            )?;
            Ok(())
        })
    }

    /// Field-by-field merge of enrichment output. Returns false when the
    /// message is gone or was tombstoned meanwhile, in which case nothing
    /// is written.
    pub fn merge_enrichment(
        &self,
        id: &str,
        smart_replies_json: Option<&str>,
        intent: Option<&str>,
        is_important: Option<bool>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET
                     smart_replies = COALESCE(?2, smart_replies),
                     intent = COALESCE(?3, intent),
                     is_important = COALESCE(?4, is_important)
                 WHERE id = ?1 AND is_deleted = 0",
                rusqlite::params![id, smart_replies_json, intent, is_important],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn set_expires_at(&self, id: &str, expires_at: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET expires_at = ?2 WHERE id = ?1",
                [id, expires_at],
            )?;
            Ok(())
        })
    }

    // -- Expiry --

    /// Hard-delete every message whose expiry has passed, along with its
    /// receipt and exclusion rows. Returns the number of messages removed.
    pub fn delete_expired(&self, now: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "UPDATE conversations SET last_message_id = NULL
                 WHERE last_message_id IN
                    (SELECT id FROM messages WHERE expires_at IS NOT NULL AND expires_at <= ?1)",
                [now],
            )?;
            tx.execute(
                "DELETE FROM receipts WHERE message_id IN
                    (SELECT id FROM messages WHERE expires_at IS NOT NULL AND expires_at <= ?1)",
                [now],
            )?;
            tx.execute(
                "DELETE FROM message_hidden WHERE message_id IN
                    (SELECT id FROM messages WHERE expires_at IS NOT NULL AND expires_at <= ?1)",
                [now],
            )?;
            let deleted = tx.execute(
                "DELETE FROM messages WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                [now],
            )?;

            tx.commit()?;
            Ok(deleted)
        })
    }
}

fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        sender_avatar: row.get(4)?,
        kind: row.get(5)?,
        body: row.get(6)?,
        media_url: row.get(7)?,
        media_kind: row.get(8)?,
        reply_to: row.get(9)?,
        status: row.get(10)?,
        is_pinned: row.get(11)?,
        pinned_by: row.get(12)?,
        is_deleted: row.get(13)?,
        expires_at: row.get(14)?,
        smart_replies: row.get(15)?,
        intent: row.get(16)?,
        is_important: row.get(17)?,
        created_at: row.get(18)?,
    })
}
