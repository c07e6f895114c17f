//! SQLite handle for the report store.
//!
//! Every search lists a snapshot of reports while intake writes one row at a
//! time, so a file-backed store runs in WAL mode and waits for a busy writer
//! instead of failing the read. In-memory stores skip the journal settings
//! but get the same schema.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use curbside_core::error::{CurbsideError, Result};

use crate::migrations;

/// How long a statement waits on a locked store before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA temp_store = MEMORY;";

fn storage_error(action: &'static str) -> impl Fn(rusqlite::Error) -> CurbsideError {
    move |e| CurbsideError::Storage(format!("Failed to {}: {}", action, e))
}

/// The report store's single connection, shared behind a mutex.
pub struct Database {
    conn: Mutex<Connection>,
    location: Option<PathBuf>,
}

impl Database {
    /// Open the store at `path`, creating the file and its parent directories
    /// on first use, and bring the schema up to date.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(storage_error("open report store"))?;
        conn.execute_batch(FILE_PRAGMAS)
            .map_err(storage_error("configure report store"))?;

        let db = Self::prepare(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "Report store ready");
        Ok(db)
    }

    /// A throwaway store that lives as long as the handle.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_error("open in-memory store"))?;
        Self::prepare(conn, None)
    }

    fn prepare(conn: Connection, location: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(storage_error("set busy timeout"))?;
        migrations::run_migrations(&conn)?;
        debug!(in_memory = location.is_none(), "Report schema up to date");

        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    /// Backing file, `None` for an in-memory store.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Run `f` with exclusive use of the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CurbsideError::Storage(format!("Report store lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .finish()
    }
}
