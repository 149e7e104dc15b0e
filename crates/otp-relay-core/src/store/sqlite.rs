//! [`SqliteStore`]: the database backend.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread without
//! blocking the runtime. Every operation is a single statement (or one transaction for
//! `import`), which gives per-operation atomicity across the worker and command paths.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension as _;
use tracing::debug;

use crate::{
    domain::{Destination, DestinationId, UserId},
    errors::Error,
    store::{schema::SCHEMA, ConfigStore, DestinationPatch, Snapshot},
    Result,
};

const DESTINATION_COLUMNS: &str =
    "id, title, button_label, button_target, enabled, message_count";

/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
    owner: UserId,
}

impl SqliteStore {
    /// Open (or create) a store at `path` and run schema initialisation.
    pub async fn open(path: impl AsRef<Path>, owner: UserId) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path.as_ref()).await?;
        let store = Self { conn, owner };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store, useful for testing.
    pub async fn open_in_memory(owner: UserId) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn, owner };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// A `destinations` row before id validation.
struct RawDestination {
    id: String,
    title: Option<String>,
    button_label: Option<String>,
    button_target: Option<String>,
    enabled: i64,
    message_count: i64,
}

impl RawDestination {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            button_label: row.get(2)?,
            button_target: row.get(3)?,
            enabled: row.get(4)?,
            message_count: row.get(5)?,
        })
    }

    fn decode(self) -> Result<Destination> {
        let id = DestinationId::parse(&self.id)
            .map_err(|e| Error::Storage(format!("corrupt destination row {:?}: {e}", self.id)))?;
        Ok(Destination {
            id,
            title: self.title,
            button_label: self.button_label,
            button_target: self.button_target,
            enabled: self.enabled != 0,
            message_count: self.message_count.max(0) as u64,
        })
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    fn owner(&self) -> UserId {
        self.owner
    }

    async fn upsert_destination(&self, dest: Destination) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO destinations
                       (id, title, button_label, button_target, enabled, message_count, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                       title         = excluded.title,
                       button_label  = excluded.button_label,
                       button_target = excluded.button_target,
                       enabled       = excluded.enabled",
                    rusqlite::params![
                        dest.id.as_str(),
                        dest.title,
                        dest.button_label,
                        dest.button_target,
                        dest.enabled as i64,
                        now,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn insert_destination(&self, dest: Destination) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "INSERT INTO destinations
                       (id, title, button_label, button_target, enabled, message_count, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
                     ON CONFLICT(id) DO NOTHING",
                    rusqlite::params![
                        dest.id.as_str(),
                        dest.title,
                        dest.button_label,
                        dest.button_target,
                        dest.enabled as i64,
                        now,
                    ],
                )?)
            })
            .await?;
        Ok(n > 0)
    }

    async fn update_destination(&self, id: &DestinationId, patch: &DestinationPatch) -> Result<bool> {
        let id = id.as_str().to_string();
        let set_button = patch.button.is_some();
        let (label, target) = patch.button.clone().flatten().unzip();
        let enabled = patch.enabled.map(i64::from);
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE destinations SET
                       button_label  = CASE WHEN ?2 THEN ?3 ELSE button_label END,
                       button_target = CASE WHEN ?2 THEN ?4 ELSE button_target END,
                       enabled       = COALESCE(?5, enabled)
                     WHERE id = ?1",
                    rusqlite::params![id, set_button, label, target, enabled],
                )?)
            })
            .await?;
        Ok(n > 0)
    }

    async fn remove_destination(&self, id: &DestinationId) -> Result<bool> {
        let id = id.as_str().to_string();
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM destinations WHERE id = ?1",
                    rusqlite::params![id],
                )?)
            })
            .await?;
        Ok(n > 0)
    }

    async fn get_destination(&self, id: &DestinationId) -> Result<Option<Destination>> {
        let id = id.as_str().to_string();
        let row = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {DESTINATION_COLUMNS} FROM destinations WHERE id = ?1"),
                        rusqlite::params![id],
                        RawDestination::from_row,
                    )
                    .optional()?)
            })
            .await?;
        row.map(RawDestination::decode).transpose()
    }

    async fn list_destinations(&self) -> Result<Vec<Destination>> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {DESTINATION_COLUMNS} FROM destinations ORDER BY rowid"
                ))?;
                let rows = stmt
                    .query_map([], RawDestination::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(RawDestination::decode).collect()
    }

    async fn increment_message_count(&self, id: &DestinationId) -> Result<bool> {
        let key = id.as_str().to_string();
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE destinations SET message_count = message_count + 1 WHERE id = ?1",
                    rusqlite::params![key],
                )?)
            })
            .await?;
        if n == 0 {
            debug!(destination = %id, "increment skipped, destination is gone");
        }
        Ok(n > 0)
    }

    async fn add_admin(&self, id: UserId) -> Result<()> {
        if id == self.owner {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO admins (user_id, added_at) VALUES (?1, ?2)",
                    rusqlite::params![id.0, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn remove_admin(&self, id: UserId) -> Result<bool> {
        if id == self.owner {
            return Err(Error::Forbidden("the owner cannot be removed".to_string()));
        }
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM admins WHERE user_id = ?1",
                    rusqlite::params![id.0],
                )?)
            })
            .await?;
        Ok(n > 0)
    }

    async fn roster(&self) -> Result<Vec<UserId>> {
        let owner = self.owner;
        let ids = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT user_id FROM admins ORDER BY rowid")?;
                let ids = stmt
                    .query_map([], |r| r.get::<_, i64>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids.into_iter().map(UserId).filter(|a| *a != owner).collect())
    }

    async fn export(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            destinations: self.list_destinations().await?,
            admins: self.roster().await?,
        })
    }

    async fn import(&self, snapshot: Snapshot) -> Result<()> {
        let owner = self.owner;
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM destinations", [])?;
                tx.execute("DELETE FROM admins", [])?;
                for d in &snapshot.destinations {
                    // Later duplicates win, matching upsert semantics.
                    tx.execute(
                        "INSERT INTO destinations
                           (id, title, button_label, button_target, enabled, message_count, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                         ON CONFLICT(id) DO UPDATE SET
                           title         = excluded.title,
                           button_label  = excluded.button_label,
                           button_target = excluded.button_target,
                           enabled       = excluded.enabled,
                           message_count = excluded.message_count",
                        rusqlite::params![
                            d.id.as_str(),
                            d.title,
                            d.button_label,
                            d.button_target,
                            d.enabled as i64,
                            d.message_count.min(i64::MAX as u64) as i64,
                            now,
                        ],
                    )?;
                }
                for a in snapshot.admins.iter().filter(|a| **a != owner) {
                    tx.execute(
                        "INSERT OR IGNORE INTO admins (user_id, added_at) VALUES (?1, ?2)",
                        rusqlite::params![a.0, now],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
