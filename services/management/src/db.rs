//! Management store: factories and gateways over SQLite.
//!
//! Single-node data, single writer; the connection lives behind an async
//! mutex in [`crate::state::AppState`]. Reads exclude soft-deleted rows and
//! never surface `deleted_at`.

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

const SCHEMA_SQL: &str = include_str!("storage/schema.sql");

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryRecord {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    /// JSON object, stored as text.
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRecord {
    pub id: String,
    pub factory_id: String,
    /// Device-reported identity, distinct from the row id.
    pub gateway_id: String,
    pub name: String,
    pub url: String,
    pub email: String,
    /// JSON blob {encrypted, iv, authTag} as produced by the credential codec.
    pub encrypted_credential: String,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub last_seen_at: Option<String>,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One page of rows plus the undeleted total for the pagination envelope.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

// ---------------------------------------------------------------------------
// Db
// ---------------------------------------------------------------------------

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: &Path) -> DbResult<Self> {
        let db = Self {
            conn: Connection::open(path)?,
        };
        db.apply_pragmas()?;
        db.apply_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.apply_pragmas()?;
        db.apply_schema()?;
        Ok(db)
    }

    fn apply_pragmas(&self) -> DbResult<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )?;
        Ok(())
    }

    fn apply_schema(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // -- factories ----------------------------------------------------------

    pub fn create_factory(&self, factory: &FactoryRecord) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO factories (id, name, location, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                factory.id,
                factory.name,
                factory.location,
                factory.metadata,
                factory.created_at,
                factory.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_factory(&self, id: &str) -> DbResult<Option<FactoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, location, metadata, created_at, updated_at
             FROM factories WHERE id = ?1 AND deleted_at IS NULL",
        )?;
        let mut rows = stmt.query_map([id], factory_from_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_factories(&self, limit: u32, offset: u32) -> DbResult<Page<FactoryRecord>> {
        let total: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM factories WHERE deleted_at IS NULL",
            [],
            |row| row.get::<_, i64>(0),
        )? as u64;

        let mut stmt = self.conn.prepare(
            "SELECT id, name, location, metadata, created_at, updated_at
             FROM factories WHERE deleted_at IS NULL
             ORDER BY created_at, id LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map([i64::from(limit), i64::from(offset)], factory_from_row)?;
        Ok(Page {
            items: rows.collect::<Result<Vec<_>, _>>()?,
            total,
        })
    }

    /// Update name/location/metadata; returns the fresh row, or None if the
    /// factory does not exist (or is deleted).
    pub fn update_factory(
        &self,
        id: &str,
        name: &str,
        location: Option<&str>,
        metadata: &str,
        updated_at: &str,
    ) -> DbResult<Option<FactoryRecord>> {
        let changed = self.conn.execute(
            "UPDATE factories SET name = ?2, location = ?3, metadata = ?4, updated_at = ?5
             WHERE id = ?1 AND deleted_at IS NULL",
            rusqlite::params![id, name, location, metadata, updated_at],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_factory(id)
    }

    pub fn soft_delete_factory(&self, id: &str, deleted_at: &str) -> DbResult<bool> {
        let changed = self.conn.execute(
            "UPDATE factories SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            rusqlite::params![id, deleted_at],
        )?;
        Ok(changed > 0)
    }

    // -- gateways -----------------------------------------------------------

    pub fn create_gateway(&self, gateway: &GatewayRecord) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO gateways (id, factory_id, gateway_id, name, url, email,
                                   encrypted_credential, model, firmware_version,
                                   last_seen_at, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                gateway.id,
                gateway.factory_id,
                gateway.gateway_id,
                gateway.name,
                gateway.url,
                gateway.email,
                gateway.encrypted_credential,
                gateway.model,
                gateway.firmware_version,
                gateway.last_seen_at,
                gateway.metadata,
                gateway.created_at,
                gateway.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_gateway(&self, id: &str) -> DbResult<Option<GatewayRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, factory_id, gateway_id, name, url, email, encrypted_credential,
                    model, firmware_version, last_seen_at, metadata, created_at, updated_at
             FROM gateways WHERE id = ?1 AND deleted_at IS NULL",
        )?;
        let mut rows = stmt.query_map([id], gateway_from_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_gateways(
        &self,
        factory_id: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> DbResult<Page<GatewayRecord>> {
        let (total, items) = match factory_id {
            Some(factory_id) => {
                let total: i64 = self.conn.query_row(
                    "SELECT COUNT(*) FROM gateways
                     WHERE deleted_at IS NULL AND factory_id = ?1",
                    [factory_id],
                    |row| row.get(0),
                )?;
                let mut stmt = self.conn.prepare(
                    "SELECT id, factory_id, gateway_id, name, url, email, encrypted_credential,
                            model, firmware_version, last_seen_at, metadata, created_at, updated_at
                     FROM gateways WHERE deleted_at IS NULL AND factory_id = ?1
                     ORDER BY created_at, id LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![factory_id, i64::from(limit), i64::from(offset)],
                    gateway_from_row,
                )?;
                (total, rows.collect::<Result<Vec<_>, _>>()?)
            }
            None => {
                let total: i64 = self.conn.query_row(
                    "SELECT COUNT(*) FROM gateways WHERE deleted_at IS NULL",
                    [],
                    |row| row.get(0),
                )?;
                let mut stmt = self.conn.prepare(
                    "SELECT id, factory_id, gateway_id, name, url, email, encrypted_credential,
                            model, firmware_version, last_seen_at, metadata, created_at, updated_at
                     FROM gateways WHERE deleted_at IS NULL
                     ORDER BY created_at, id LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![i64::from(limit), i64::from(offset)],
                    gateway_from_row,
                )?;
                (total, rows.collect::<Result<Vec<_>, _>>()?)
            }
        };
        Ok(Page {
            items,
            total: total as u64,
        })
    }

    /// Overwrite the mutable gateway columns; returns the fresh row.
    pub fn update_gateway(&self, gateway: &GatewayRecord) -> DbResult<Option<GatewayRecord>> {
        let changed = self.conn.execute(
            "UPDATE gateways SET name = ?2, url = ?3, email = ?4, encrypted_credential = ?5,
                                 model = ?6, firmware_version = ?7, metadata = ?8, updated_at = ?9
             WHERE id = ?1 AND deleted_at IS NULL",
            rusqlite::params![
                gateway.id,
                gateway.name,
                gateway.url,
                gateway.email,
                gateway.encrypted_credential,
                gateway.model,
                gateway.firmware_version,
                gateway.metadata,
                gateway.updated_at,
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_gateway(&gateway.id)
    }

    pub fn soft_delete_gateway(&self, id: &str, deleted_at: &str) -> DbResult<bool> {
        let changed = self.conn.execute(
            "UPDATE gateways SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            rusqlite::params![id, deleted_at],
        )?;
        Ok(changed > 0)
    }
}

fn factory_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FactoryRecord> {
    Ok(FactoryRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        location: row.get(2)?,
        metadata: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn gateway_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GatewayRecord> {
    Ok(GatewayRecord {
        id: row.get(0)?,
        factory_id: row.get(1)?,
        gateway_id: row.get(2)?,
        name: row.get(3)?,
        url: row.get(4)?,
        email: row.get(5)?,
        encrypted_credential: row.get(6)?,
        model: row.get(7)?,
        firmware_version: row.get(8)?,
        last_seen_at: row.get(9)?,
        metadata: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}
