use crate::models::ReceiptRow;
use crate::{Database, OptionalExt};
use anyhow::Result;

impl Database {
    /// Record delivery for one recipient. The first timestamp wins; repeat
    /// calls are no-ops. Message status advances `sent -> delivered` only.
    /// Returns true when the receipt was newly recorded.
    pub fn mark_delivered(&self, message_id: &str, participant_id: &str, at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let already: Option<Option<String>> = tx
                .query_row(
                    "SELECT delivered_at FROM receipts
                     WHERE message_id = ?1 AND participant_id = ?2",
                    [message_id, participant_id],
                    |row| row.get(0),
                )
                .optional()?;
            if matches!(already, Some(Some(_))) {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO receipts (message_id, participant_id, delivered_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(message_id, participant_id) DO UPDATE SET
                     delivered_at = COALESCE(receipts.delivered_at, excluded.delivered_at)",
                [message_id, participant_id, at],
            )?;
            tx.execute(
                "UPDATE messages SET status = 'delivered' WHERE id = ?1 AND status = 'sent'",
                [message_id],
            )?;

            tx.commit()?;
            Ok(true)
        })
    }

    /// Record that a recipient has seen a message, backfilling delivery if it
    /// was never recorded (seen implies delivered). Status advances to
    /// `seen`. Returns true when the receipt was newly recorded; repeat
    /// calls are no-ops.
    pub fn mark_seen(&self, message_id: &str, participant_id: &str, at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let already: Option<Option<String>> = tx
                .query_row(
                    "SELECT seen_at FROM receipts
                     WHERE message_id = ?1 AND participant_id = ?2",
                    [message_id, participant_id],
                    |row| row.get(0),
                )
                .optional()?;
            if matches!(already, Some(Some(_))) {
                return Ok(false);
            }

            tx.execute(
                "INSERT INTO receipts (message_id, participant_id, delivered_at, seen_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(message_id, participant_id) DO UPDATE SET
                     delivered_at = COALESCE(receipts.delivered_at, excluded.delivered_at),
                     seen_at = COALESCE(receipts.seen_at, excluded.seen_at)",
                [message_id, participant_id, at],
            )?;
            tx.execute(
                "UPDATE messages SET status = 'seen' WHERE id = ?1 AND status != 'seen'",
                [message_id],
            )?;

            tx.commit()?;
            Ok(true)
        })
    }

    /// Batch-fetch receipts for a set of message IDs.
    pub fn receipts_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReceiptRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, participant_id, delivered_at, seen_at
                 FROM receipts WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReceiptRow {
                        message_id: row.get(0)?,
                        participant_id: row.get(1)?,
                        delivered_at: row.get(2)?,
                        seen_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Number of members other than the sender who have not yet seen the
    /// message. Zero means everyone has.
    pub fn count_unseen_recipients(
        &self,
        conversation_id: &str,
        message_id: &str,
        sender_id: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM members mb
                 WHERE mb.conversation_id = ?1 AND mb.participant_id != ?3
                   AND NOT EXISTS (SELECT 1 FROM receipts r
                                   WHERE r.message_id = ?2
                                     AND r.participant_id = mb.participant_id
                                     AND r.seen_at IS NOT NULL)",
                [conversation_id, message_id, sender_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}
