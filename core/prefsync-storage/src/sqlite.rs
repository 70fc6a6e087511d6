//! SQLite-backed settings stores.
//!
//! All owners and categories share one database file and one table, keyed by
//! `(category, owner, key)`. Values are stored as compact JSON text.

use crate::store::{SettingsMap, SettingsStore, StoreFactory};
use crate::{StorageError, StorageResult};
use prefsync_types::{DataCategory, OwnerId, SettingValue};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

type SharedConnection = Arc<Mutex<Connection>>;

fn lock(conn: &SharedConnection) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StorageError::Corruption("settings database lock poisoned".to_string()))
}

/// Opens per-owner [`SqliteStore`]s over a shared database.
pub struct SqliteStoreFactory {
    conn: SharedConnection,
}

impl SqliteStoreFactory {
    /// Opens (or creates) the settings database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        debug!("Opened settings database at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let factory = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        factory.init_schema()?;
        Ok(factory)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS settings (
                category TEXT NOT NULL,
                owner TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (category, owner, key)
            );
            ",
        )?;
        Ok(())
    }
}

impl StoreFactory for SqliteStoreFactory {
    fn open(
        &self,
        category: &DataCategory,
        owner: &OwnerId,
    ) -> StorageResult<Box<dyn SettingsStore>> {
        Ok(Box::new(SqliteStore {
            conn: self.conn.clone(),
            category: category.clone(),
            owner: owner.clone(),
        }))
    }

    fn known_owners(&self, category: &DataCategory) -> StorageResult<Vec<OwnerId>> {
        let conn = lock(&self.conn)?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT owner FROM settings WHERE category = ?1 ORDER BY owner")?;
        let rows = stmt.query_map(params![category.as_str()], |row| row.get::<_, String>(0))?;

        let mut owners = Vec::new();
        for row in rows {
            owners.push(OwnerId::new(row?));
        }
        Ok(owners)
    }
}

/// The settings of one owner in one category.
pub struct SqliteStore {
    conn: SharedConnection,
    category: DataCategory,
    owner: OwnerId,
}

impl SqliteStore {
    fn decode(key: &str, raw: &str) -> StorageResult<SettingValue> {
        serde_json::from_str(raw)
            .map_err(|e| StorageError::InvalidData(format!("bad value for {key}: {e}")))
    }
}

impl SettingsStore for SqliteStore {
    fn get(&self, keys: &[String]) -> StorageResult<SettingsMap> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT value FROM settings WHERE category = ?1 AND owner = ?2 AND key = ?3",
        )?;

        let mut result = SettingsMap::new();
        for key in keys {
            let mut rows = stmt.query(params![self.category.as_str(), self.owner.as_str(), key])?;
            if let Some(row) = rows.next()? {
                let raw: String = row.get(0)?;
                result.insert(key.clone(), Self::decode(key, &raw)?);
            }
        }
        Ok(result)
    }

    fn get_all(&self) -> StorageResult<SettingsMap> {
        let conn = lock(&self.conn)?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM settings WHERE category = ?1 AND owner = ?2")?;
        let rows = stmt.query_map(params![self.category.as_str(), self.owner.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut result = SettingsMap::new();
        for row in rows {
            let (key, raw) = row?;
            let value = Self::decode(&key, &raw)?;
            result.insert(key, value);
        }
        Ok(result)
    }

    fn set(&mut self, key: &str, value: &SettingValue) -> StorageResult<()> {
        let raw = serde_json::to_string(value)?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO settings (category, owner, key, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(category, owner, key) DO UPDATE SET value = excluded.value",
            params![self.category.as_str(), self.owner.as_str(), key, raw],
        )?;
        Ok(())
    }

    fn remove(&mut self, keys: &[String]) -> StorageResult<()> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "DELETE FROM settings WHERE category = ?1 AND owner = ?2 AND key = ?3",
            )?;
            for key in keys {
                stmt.execute(params![self.category.as_str(), self.owner.as_str(), key])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&mut self) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "DELETE FROM settings WHERE category = ?1 AND owner = ?2",
            params![self.category.as_str(), self.owner.as_str()],
        )?;
        Ok(())
    }
}
