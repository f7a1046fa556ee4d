use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use super::GroupStore;
use crate::platform::{ChatInfo, ChatKind};

/// A group the bot has been added to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRecord {
    pub id: i64,
    pub name: String,
    pub username: Option<String>,
    pub chat_type: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Metadata used to create a group record
#[derive(Debug, Clone, PartialEq)]
pub struct NewGroup {
    pub id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
    pub chat_type: ChatKind,
    pub description: Option<String>,
}

impl NewGroup {
    /// Stored name: the chat title, or `Group <id>` for untitled chats
    pub fn display_name(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => format!("Group {}", self.id),
        }
    }
}

impl From<&ChatInfo> for NewGroup {
    fn from(chat: &ChatInfo) -> Self {
        NewGroup {
            id: chat.id,
            title: chat.title.clone(),
            username: chat.username.clone(),
            chat_type: chat.kind,
            description: chat.description.clone(),
        }
    }
}

/// Outcome of `get_or_create_group`
#[derive(Debug, Clone)]
pub struct GroupRegistration {
    pub record: GroupRecord,
    /// A new row was inserted
    pub created: bool,
    /// An existing inactive row was switched back on
    pub reactivated: bool,
}

const GROUP_COLUMNS: &str =
    "id, name, username, chat_type, description, is_active, created_at, updated_at";

impl GroupStore {
    /// Return the group with this id, creating it first if absent.
    ///
    /// An existing row keeps its stored metadata; only an inactive row is
    /// reactivated.
    pub async fn get_or_create_group(&self, group: &NewGroup) -> Result<GroupRegistration> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .context("Failed to begin group transaction")?;

        let inserted = tx
            .execute(
                "INSERT INTO groups (id, name, username, chat_type, description)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO NOTHING",
                rusqlite::params![
                    group.id,
                    group.display_name(),
                    group.username,
                    group.chat_type.as_str(),
                    group.description,
                ],
            )
            .context("Failed to insert group")?;
        let created = inserted == 1;

        let reactivated = if created {
            false
        } else {
            tx.execute(
                "UPDATE groups SET is_active = 1, updated_at = datetime('now')
                 WHERE id = ?1 AND is_active = 0",
                rusqlite::params![group.id],
            )
            .context("Failed to reactivate group")?
                == 1
        };

        let record = query_group(&tx, group.id)?
            .with_context(|| format!("Group {} missing after upsert", group.id))?;
        tx.commit().context("Failed to commit group transaction")?;

        Ok(GroupRegistration {
            record,
            created,
            reactivated,
        })
    }

    /// Mark a group inactive. Returns false if it was unknown or already inactive.
    pub async fn deactivate_group(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE groups SET is_active = 0, updated_at = datetime('now')
                 WHERE id = ?1 AND is_active = 1",
                rusqlite::params![id],
            )
            .context("Failed to deactivate group")?;
        Ok(changed == 1)
    }

    /// Remove a group row. Returns false if no such group exists.
    pub async fn delete_group(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute("DELETE FROM groups WHERE id = ?1", rusqlite::params![id])
            .with_context(|| format!("Failed to delete group {}", id))?;
        Ok(deleted == 1)
    }

    pub async fn get_group(&self, id: i64) -> Result<Option<GroupRecord>> {
        let conn = self.conn.lock().await;
        query_group(&conn, id)
    }

    /// List groups, oldest first. Inactive groups are skipped unless `include_inactive`.
    pub async fn list_groups(&self, include_inactive: bool) -> Result<Vec<GroupRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM groups
             WHERE ?1 OR is_active = 1
             ORDER BY created_at ASC, id ASC",
            GROUP_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare group listing")?;
        let groups = stmt
            .query_map(rusqlite::params![include_inactive], parse_group_row)
            .context("Failed to map group rows")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect group rows")?;
        Ok(groups)
    }
}

fn query_group(conn: &Connection, id: i64) -> Result<Option<GroupRecord>> {
    let sql = format!("SELECT {} FROM groups WHERE id = ?1", GROUP_COLUMNS);
    conn.query_row(&sql, rusqlite::params![id], parse_group_row)
        .optional()
        .with_context(|| format!("Failed to load group {}", id))
}

fn parse_group_row(row: &rusqlite::Row) -> rusqlite::Result<GroupRecord> {
    Ok(GroupRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        chat_type: row.get(3)?,
        description: row.get(4)?,
        is_active: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
