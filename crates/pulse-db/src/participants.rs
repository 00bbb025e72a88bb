use crate::models::ParticipantRow;
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::Connection;

const PARTICIPANT_COLS: &str = "id, name, email, password, avatar, bio, is_online, last_seen, \
     show_online_status, show_last_seen, read_receipts, focus_active, focus_auto_reply, \
     focus_start, focus_end, focus_days, created_at";

impl Database {
    // -- Accounts --

    pub fn create_participant(
        &self,
        id: &str,
        name: &str,
        email: &str,
        password_hash: &str,
        auto_reply: &str,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO participants (id, name, email, password, last_seen, focus_auto_reply, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?5)",
                rusqlite::params![id, name, email, password_hash, now, auto_reply],
            )?;
            Ok(())
        })
    }

    pub fn get_participant_by_email(&self, email: &str) -> Result<Option<ParticipantRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PARTICIPANT_COLS} FROM participants WHERE email = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([email], participant_from_row).optional()?;
            Ok(row)
        })
    }

    pub fn get_participant(&self, id: &str) -> Result<Option<ParticipantRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PARTICIPANT_COLS} FROM participants WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([id], participant_from_row).optional()?;
            Ok(row)
        })
    }

    /// Batch-fetch participants by id.
    pub fn get_participants(&self, ids: &[String]) -> Result<Vec<ParticipantRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {PARTICIPANT_COLS} FROM participants WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), participant_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn search_participants(
        &self,
        q: &str,
        exclude_id: &str,
        limit: u32,
    ) -> Result<Vec<ParticipantRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PARTICIPANT_COLS} FROM participants
                 WHERE (name LIKE ?1 ESCAPE '\\' OR email LIKE ?1 ESCAPE '\\') AND id != ?2
                 ORDER BY name ASC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![like_pattern(q), exclude_id, limit],
                    participant_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Profile & settings --

    /// `None` fields are left unchanged.
    pub fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        bio: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE participants SET
                     name = COALESCE(?2, name),
                     bio = COALESCE(?3, bio),
                     avatar = COALESCE(?4, avatar)
                 WHERE id = ?1",
                rusqlite::params![id, name, bio, avatar],
            )?;
            Ok(())
        })
    }

    pub fn update_privacy(
        &self,
        id: &str,
        show_online_status: Option<&str>,
        show_last_seen: Option<&str>,
        read_receipts: Option<bool>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE participants SET
                     show_online_status = COALESCE(?2, show_online_status),
                     show_last_seen = COALESCE(?3, show_last_seen),
                     read_receipts = COALESCE(?4, read_receipts)
                 WHERE id = ?1",
                rusqlite::params![id, show_online_status, show_last_seen, read_receipts],
            )?;
            Ok(())
        })
    }

    pub fn update_focus(
        &self,
        id: &str,
        active: Option<bool>,
        auto_reply: Option<&str>,
        schedule: Option<(&str, &str, &str)>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE participants SET
                     focus_active = COALESCE(?2, focus_active),
                     focus_auto_reply = COALESCE(?3, focus_auto_reply)
                 WHERE id = ?1",
                rusqlite::params![id, active, auto_reply],
            )?;
            if let Some((start, end, days)) = schedule {
                conn.execute(
                    "UPDATE participants SET focus_start = ?2, focus_end = ?3, focus_days = ?4
                     WHERE id = ?1",
                    rusqlite::params![id, start, end, days],
                )?;
            }
            Ok(())
        })
    }

    /// Replace the focus allow-list wholesale.
    pub fn set_focus_allowed(&self, id: &str, contacts: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM focus_allowed WHERE participant_id = ?1", [id])?;
            for contact in contacts {
                tx.execute(
                    "INSERT OR IGNORE INTO focus_allowed (participant_id, contact_id) VALUES (?1, ?2)",
                    rusqlite::params![id, contact],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_focus_allowed(&self, id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT contact_id FROM focus_allowed WHERE participant_id = ?1")?;
            let rows = stmt
                .query_map([id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Replace the hidden-from list wholesale.
    pub fn set_presence_hidden(&self, id: &str, hidden: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM presence_hidden WHERE participant_id = ?1", [id])?;
            for h in hidden {
                tx.execute(
                    "INSERT OR IGNORE INTO presence_hidden (participant_id, hidden_id) VALUES (?1, ?2)",
                    rusqlite::params![id, h],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_presence_hidden(&self, id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT hidden_id FROM presence_hidden WHERE participant_id = ?1")?;
            let rows = stmt
                .query_map([id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Presence --

    pub fn set_online(&self, id: &str, online: bool, last_seen: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE participants SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
                rusqlite::params![id, online, last_seen],
            )?;
            Ok(())
        })
    }

    /// Everyone who shares at least one conversation with `id`.
    pub fn contacts_of(&self, id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| query_contacts_of(conn, id))
    }
}

fn query_contacts_of(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT mb2.participant_id
         FROM members mb1
         JOIN members mb2 ON mb1.conversation_id = mb2.conversation_id
         WHERE mb1.participant_id = ?1 AND mb2.participant_id != ?1",
    )?;

    let rows = stmt
        .query_map([id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn participant_from_row(row: &rusqlite::Row) -> rusqlite::Result<ParticipantRow> {
    Ok(ParticipantRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        avatar: row.get(4)?,
        bio: row.get(5)?,
        is_online: row.get(6)?,
        last_seen: row.get(7)?,
        show_online_status: row.get(8)?,
        show_last_seen: row.get(9)?,
        read_receipts: row.get(10)?,
        focus_active: row.get(11)?,
        focus_auto_reply: row.get(12)?,
        focus_start: row.get(13)?,
        focus_end: row.get(14)?,
        focus_days: row.get(15)?,
        created_at: row.get(16)?,
    })
}

/// Contains-match pattern with LIKE wildcards escaped.
pub(crate) fn like_pattern(q: &str) -> String {
    let escaped = q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}
