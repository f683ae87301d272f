//! SQLite-backed token store shared by every cardctl process of a user
//!
//! Other processes cannot push notifications into this one, so changes are
//! detected by polling `PRAGMA data_version`, which SQLite bumps only when a
//! *different* connection commits to the database.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;

use super::{CHANGE_CHANNEL_CAPACITY, StoreChange, StoreResult, TokenStore};
use crate::error::StoreError;

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 1;

/// How long a write waits for another process holding the database lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    conn: Connection,
    data_version: i64,
}

/// Token store persisted in a SQLite database file
pub struct SqliteTokenStore {
    inner: Mutex<Inner>,
    path: PathBuf,
    tx: broadcast::Sender<StoreChange>,
}

impl std::fmt::Debug for SqliteTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTokenStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteTokenStore {
    /// Open or create the token database at `path`
    pub fn open_at(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("Failed to create store dir: {}", e)))?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "Token store schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            conn.execute_batch("DROP TABLE IF EXISTS tokens;")?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tokens (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)
                .map_err(|e| StoreError::Io(format!("Failed to restrict store file: {}", e)))?;
        }

        let data_version = read_data_version(&conn)?;
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Mutex::new(Inner { conn, data_version }),
            path: path.to_path_buf(),
            tx,
        })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_data_version(conn: &Connection) -> StoreResult<i64> {
    Ok(conn.pragma_query_value(None, "data_version", |r| r.get(0))?)
}

impl TokenStore for SqliteTokenStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let inner = self.lock();
        let value = inner
            .conn
            .query_row(
                "SELECT value FROM tokens WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let inner = self.lock();
        inner.conn.execute(
            "INSERT OR REPLACE INTO tokens (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let inner = self.lock();
        inner
            .conn
            .execute("DELETE FROM tokens WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> StoreResult<()> {
        let mut inner = self.lock();
        let tx = inner.conn.transaction()?;
        let now = Utc::now().timestamp();
        for (key, value) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO tokens (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> StoreResult<()> {
        let mut inner = self.lock();
        let tx = inner.conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM tokens WHERE key = ?1", params![key])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }

    fn poll_changes(&self) -> StoreResult<bool> {
        let mut inner = self.lock();
        let current = read_data_version(&inner.conn)?;
        if current == inner.data_version {
            return Ok(false);
        }
        inner.data_version = current;
        drop(inner);

        log::debug!("Token store changed by another process");
        let _ = self.tx.send(StoreChange { key: None });
        Ok(true)
    }
}
