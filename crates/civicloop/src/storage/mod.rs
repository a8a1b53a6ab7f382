//! Storage layer for civicloop.
//!
//! This module provides `SQLite`-backed keyed boxes: each box is a single JSON
//! blob addressed by a string key, read and replaced as a whole. Every
//! read-modify-write of a box runs inside one transaction while holding the
//! connection lock, so writers are serialized and never overwrite each other.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Storage engine for keyed JSON boxes.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection; the lock is the single-writer serialization point.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw JSON text stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        Self::select(&conn, key)
    }

    /// Replace the raw JSON text stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        Self::upsert(&conn, key, value)
    }

    /// Delete the box stored under `key`.
    ///
    /// Returns `true` if a box was deleted, `false` if none existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn
            .lock()
            .execute("DELETE FROM boxes WHERE key = ?1", [key])?;
        Ok(affected > 0)
    }

    /// Read and decode the box under `key`.
    ///
    /// Missing, unreadable, or undecodable boxes are all reported as `None`;
    /// failures are logged and never returned to the caller.
    #[must_use]
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get_raw(key) {
            Ok(raw) => raw.and_then(|text| Self::decode(key, &text)),
            Err(e) => {
                warn!("Failed to read box {}: {}", key, e);
                None
            }
        }
    }

    /// Encode `value` and store it under `key`, replacing any previous box.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails.
    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.put_raw(key, &text)
    }

    /// Atomically read, modify, and write back the box under `key`.
    ///
    /// A missing or corrupt box starts from `T::default()`. The closure runs
    /// while the connection lock is held, so it must not block.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails; in
    /// that case nothing is written.
    pub fn update_json<T, R, F>(&self, key: &str, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> R,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut value: T = Self::select(&tx, key)?
            .and_then(|text| Self::decode(key, &text))
            .unwrap_or_default();
        let result = f(&mut value);

        let text = serde_json::to_string(&value)?;
        Self::upsert(&tx, key, &text)?;
        tx.commit()?;

        Ok(result)
    }

    /// Atomically read, modify, and write back two boxes together.
    ///
    /// Both boxes commit in one transaction or neither does. Loading and
    /// locking follow [`Storage::update_json`].
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails; in
    /// that case neither box is written.
    pub fn update_json_pair<A, B, R, F>(&self, key_a: &str, key_b: &str, f: F) -> Result<R>
    where
        A: Serialize + DeserializeOwned + Default,
        B: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut A, &mut B) -> R,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut a: A = Self::select(&tx, key_a)?
            .and_then(|text| Self::decode(key_a, &text))
            .unwrap_or_default();
        let mut b: B = Self::select(&tx, key_b)?
            .and_then(|text| Self::decode(key_b, &text))
            .unwrap_or_default();
        let result = f(&mut a, &mut b);

        Self::upsert(&tx, key_a, &serde_json::to_string(&a)?)?;
        Self::upsert(&tx, key_b, &serde_json::to_string(&b)?)?;
        tx.commit()?;

        Ok(result)
    }

    /// List the keys of all stored boxes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM boxes ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let (boxes, payload_bytes): (i64, i64) = self.conn.lock().query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(value)), 0) FROM boxes",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            boxes: u64::try_from(boxes).unwrap_or(0),
            payload_bytes: u64::try_from(payload_bytes).unwrap_or(0),
            db_size_bytes,
        })
    }

    fn select(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value = conn
            .query_row("SELECT value FROM boxes WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn upsert(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            r"
            INSERT INTO boxes (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn decode<T: DeserializeOwned>(key: &str, text: &str) -> Option<T> {
        match serde_json::from_str(text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Box {} is corrupt, treating as absent: {}", key, e);
                None
            }
        }
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of stored boxes.
    pub boxes: u64,
    /// Total size of the stored JSON payloads in bytes.
    pub payload_bytes: u64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
