// Durable key/value storage backing the credential store

use anyhow::{Context, Result};
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use std::path::Path;
use std::sync::Mutex;

/// String key/value store.
///
/// Multi-key writes and removals are all-or-nothing where the backend allows it,
/// so the two tokens never end up half written.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// SQLite-backed storage, survives process restarts
pub struct SqliteStorage {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStorage {
    /// Open (or create) the session database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory: {}", parent.display())
                })?;
            }
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open session database: {}", path.display()))?;
        tracing::debug!("Opened session database: {}", path.display());
        Self::with_connection(conn)
    }

    /// Non-durable database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .context("Failed to open in-memory session database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create session_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Session database lock poisoned"))
    }
}

const UPSERT: &str = "INSERT INTO session_kv (key, value) VALUES (?1, ?2) \
                      ON CONFLICT(key) DO UPDATE SET value = excluded.value";

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM session_kv WHERE key = ?",
            [key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read session key: {}", key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(UPSERT, [key, value])
            .with_context(|| format!("Failed to write session key: {}", key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM session_kv WHERE key = ?", [key])
            .with_context(|| format!("Failed to remove session key: {}", key))?;
        Ok(())
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .context("Failed to begin session transaction")?;
        for (key, value) in entries {
            tx.execute(UPSERT, [key, value])
                .with_context(|| format!("Failed to write session key: {}", key))?;
        }
        tx.commit().context("Failed to commit session write")
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .context("Failed to begin session transaction")?;
        for key in keys {
            tx.execute("DELETE FROM session_kv WHERE key = ?", [key])
                .with_context(|| format!("Failed to remove session key: {}", key))?;
        }
        tx.commit().context("Failed to commit session removal")
    }
}

/// In-process storage for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
