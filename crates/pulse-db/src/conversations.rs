use crate::models::{ConversationRow, MemberRow};
use crate::{Database, OptionalExt};
use anyhow::Result;
use rusqlite::Connection;

const CONVERSATION_COLS: &str = "id, kind, name, description, avatar, direct_key, \
     last_message_id, expiry_enabled, expiry_duration_ms, delete_after_seen, created_at, updated_at";

/// Canonical key for a direct pair, identical for either member order.
pub fn direct_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

impl Database {
    // -- Creation --

    /// Returns the existing direct conversation for the pair, or inserts one
    /// under `new_id`. The bool is true when a row was created.
    pub fn get_or_create_direct(
        &self,
        new_id: &str,
        a: &str,
        b: &str,
        now: &str,
    ) -> Result<(String, bool)> {
        let key = direct_key(a, b);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM conversations WHERE direct_key = ?1",
                    [&key],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                return Ok((id, false));
            }

            tx.execute(
                "INSERT INTO conversations (id, kind, direct_key, created_at, updated_at)
                 VALUES (?1, 'direct', ?2, ?3, ?3)",
                rusqlite::params![new_id, key, now],
            )?;
            for participant in [a, b] {
                tx.execute(
                    "INSERT INTO members (conversation_id, participant_id, role, joined_at)
                     VALUES (?1, ?2, 'member', ?3)",
                    rusqlite::params![new_id, participant, now],
                )?;
            }

            tx.commit()?;
            Ok((new_id.to_string(), true))
        })
    }

    /// Creates a group with the creator as admin and the rest as members.
    pub fn create_group(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
        creator: &str,
        member_ids: &[String],
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO conversations (id, kind, name, description, created_at, updated_at)
                 VALUES (?1, 'group', ?2, ?3, ?4, ?4)",
                rusqlite::params![id, name, description, now],
            )?;
            tx.execute(
                "INSERT INTO members (conversation_id, participant_id, role, joined_at)
                 VALUES (?1, ?2, 'admin', ?3)",
                rusqlite::params![id, creator, now],
            )?;
            for member in member_ids {
                if member == creator {
                    continue;
                }
                tx.execute(
                    "INSERT OR IGNORE INTO members (conversation_id, participant_id, role, joined_at)
                     VALUES (?1, ?2, 'member', ?3)",
                    rusqlite::params![id, member, now],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    // -- Reads --

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt.query_row([id], conversation_from_row).optional()?;
            Ok(row)
        })
    }

    /// All conversations the participant belongs to, most recently active first.
    pub fn conversations_for(&self, participant_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLS} FROM conversations c
                 JOIN members mb ON mb.conversation_id = c.id
                 WHERE mb.participant_id = ?1
                 ORDER BY c.updated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([participant_id], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn members_of(&self, conversation_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| query_members(conn, &[conversation_id.to_string()]))
    }

    /// Batch-fetch members for a set of conversations.
    pub fn members_of_many(&self, conversation_ids: &[String]) -> Result<Vec<MemberRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| query_members(conn, conversation_ids))
    }

    pub fn member_role(&self, conversation_id: &str, participant_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let role = conn
                .query_row(
                    "SELECT role FROM members WHERE conversation_id = ?1 AND participant_id = ?2",
                    [conversation_id, participant_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(role)
        })
    }

    // -- Mutation --

    /// `None` fields are left unchanged.
    pub fn update_group(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
        avatar: Option<&str>,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE conversations SET
                     name = COALESCE(?2, name),
                     description = COALESCE(?3, description),
                     avatar = COALESCE(?4, avatar),
                     updated_at = ?5
                 WHERE id = ?1",
                rusqlite::params![id, name, description, avatar, now],
            )?;
            Ok(())
        })
    }

    pub fn update_expiry(
        &self,
        id: &str,
        enabled: bool,
        duration_ms: Option<i64>,
        delete_after_seen: bool,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE conversations SET
                     expiry_enabled = ?2,
                     expiry_duration_ms = ?3,
                     delete_after_seen = ?4,
                     updated_at = ?5
                 WHERE id = ?1",
                rusqlite::params![id, enabled, duration_ms, delete_after_seen, now],
            )?;
            Ok(())
        })
    }

    pub fn add_members(
        &self,
        conversation_id: &str,
        member_ids: &[String],
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for member in member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO members (conversation_id, participant_id, role, joined_at)
                     VALUES (?1, ?2, 'member', ?3)",
                    rusqlite::params![conversation_id, member, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Removes a member. If that removal leaves the group without an admin,
    /// the longest-tenured remaining member is promoted in the same
    /// transaction; the promoted id is returned.
    pub fn remove_member(
        &self,
        conversation_id: &str,
        participant_id: &str,
    ) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let removed = tx.execute(
                "DELETE FROM members WHERE conversation_id = ?1 AND participant_id = ?2",
                [conversation_id, participant_id],
            )?;
            if removed == 0 {
                return Ok(None);
            }

            let admins: i64 = tx.query_row(
                "SELECT COUNT(*) FROM members WHERE conversation_id = ?1 AND role = 'admin'",
                [conversation_id],
                |row| row.get(0),
            )?;

            let mut promoted = None;
            if admins == 0 {
                let next: Option<String> = tx
                    .query_row(
                        "SELECT participant_id FROM members WHERE conversation_id = ?1
                         ORDER BY joined_at ASC, participant_id ASC
                         LIMIT 1",
                        [conversation_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(next_admin) = next {
                    tx.execute(
                        "UPDATE members SET role = 'admin'
                         WHERE conversation_id = ?1 AND participant_id = ?2",
                        [conversation_id, next_admin.as_str()],
                    )?;
                    promoted = Some(next_admin);
                }
            }

            tx.commit()?;
            Ok(promoted)
        })
    }
}

fn query_members(conn: &Connection, conversation_ids: &[String]) -> Result<Vec<MemberRow>> {
    let placeholders: Vec<String> = (1..=conversation_ids.len())
        .map(|i| format!("?{}", i))
        .collect();
    // JOIN participants to fetch display fields in a single query (eliminates N+1)
    let sql = format!(
        "SELECT mb.conversation_id, mb.participant_id, p.name, p.avatar, mb.role, mb.joined_at
         FROM members mb
         LEFT JOIN participants p ON mb.participant_id = p.id
         WHERE mb.conversation_id IN ({})
         ORDER BY mb.joined_at ASC",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = conversation_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(MemberRow {
                conversation_id: row.get(0)?,
                participant_id: row.get(1)?,
                name: row
                    .get::<_, Option<String>>(2)?
                    .unwrap_or_else(|| "unknown".to_string()),
                avatar: row.get(3)?,
                role: row.get(4)?,
                joined_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn conversation_from_row(row: &rusqlite::Row) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        avatar: row.get(4)?,
        direct_key: row.get(5)?,
        last_message_id: row.get(6)?,
        expiry_enabled: row.get(7)?,
        expiry_duration_ms: row.get(8)?,
        delete_after_seen: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}
