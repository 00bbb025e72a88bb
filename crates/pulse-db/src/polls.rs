use crate::models::{PollOptionRow, PollRow, PollVoteRow};
use crate::{Database, OptionalExt};
use anyhow::Result;

impl Database {
    pub fn create_poll(
        &self,
        id: &str,
        conversation_id: &str,
        created_by: &str,
        question: &str,
        labels: &[String],
        expires_at: Option<&str>,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO polls (id, conversation_id, created_by, question, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, conversation_id, created_by, question, expires_at, now],
            )?;
            for (index, label) in labels.iter().enumerate() {
                tx.execute(
                    "INSERT INTO poll_options (poll_id, option_index, label) VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, index as i64, label],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_poll(&self, id: &str) -> Result<Option<PollRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, conversation_id, created_by, question, expires_at, created_at
                     FROM polls WHERE id = ?1",
                    [id],
                    poll_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn polls_for_conversation(&self, conversation_id: &str) -> Result<Vec<PollRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, created_by, question, expires_at, created_at
                 FROM polls WHERE conversation_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([conversation_id], poll_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn poll_options(&self, poll_id: &str) -> Result<Vec<PollOptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT poll_id, option_index, label FROM poll_options
                 WHERE poll_id = ?1 ORDER BY option_index ASC",
            )?;
            let rows = stmt
                .query_map([poll_id], |row| {
                    Ok(PollOptionRow {
                        poll_id: row.get(0)?,
                        option_index: row.get(1)?,
                        label: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn poll_votes(&self, poll_id: &str) -> Result<Vec<PollVoteRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT poll_id, voter_id, option_index FROM poll_votes WHERE poll_id = ?1",
            )?;
            let rows = stmt
                .query_map([poll_id], |row| {
                    Ok(PollVoteRow {
                        poll_id: row.get(0)?,
                        voter_id: row.get(1)?,
                        option_index: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// One statement covers both first votes and moved votes; the primary
    /// key keeps each voter on a single option throughout.
    pub fn cast_vote(&self, poll_id: &str, voter_id: &str, option_index: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO poll_votes (poll_id, voter_id, option_index)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(poll_id, voter_id) DO UPDATE SET
                     option_index = excluded.option_index",
                rusqlite::params![poll_id, voter_id, option_index],
            )?;
            Ok(())
        })
    }
}

fn poll_from_row(row: &rusqlite::Row) -> rusqlite::Result<PollRow> {
    Ok(PollRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        created_by: row.get(2)?,
        question: row.get(3)?,
        expires_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}
