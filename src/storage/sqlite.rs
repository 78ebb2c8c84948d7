//! SQLite connection and lifecycle

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rusqlite::{Connection, ErrorCode, ffi};

use crate::{Error, Result};
use super::schema;

/// VM instructions between deadline checks while a statement runs
const PROGRESS_OPS: i32 = 64;

/// Connection-level settings applied when a database is opened
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// How long SQLite waits on a locked database before reporting busy
    pub busy_timeout: Duration,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite-backed system of record for features, provisions and links.
///
/// A `Database` is opened once at process start and shared by injection
/// (`Arc<Database>`). [`Database::close`] releases the connection; every
/// operation after that fails with [`Error::TransientStorage`].
pub struct Database {
    conn: Mutex<Option<Connection>>,
    location: String,
}

impl Database {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &StorageOptions::default())
    }

    pub fn open_with(path: &Path, options: &StorageOptions) -> Result<Self> {
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        Self::from_connection(conn, path.display().to_string(), options)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, ":memory:".to_string(), &StorageOptions::default())
    }

    fn from_connection(conn: Connection, location: String, options: &StorageOptions) -> Result<Self> {
        conn.busy_timeout(options.busy_timeout)?;
        for stmt in schema::all_schema_statements() {
            conn.execute(stmt, [])?;
        }
        tracing::info!(location = %location, "database opened");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            location,
        })
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Release the connection. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| Error::UnexpectedStorage("connection lock poisoned".to_string()))?
            .take();

        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| Error::from(e))?;
            tracing::info!(location = %self.location, "database closed");
        }
        Ok(())
    }

    /// Run `f` with exclusive access to the connection
    #[cfg(test)]
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        self.with_conn_until(None, f)
    }

    /// Run `f` with exclusive access to the connection, bounded by `deadline`.
    ///
    /// A deadline that passed while waiting for the connection fails before
    /// `f` runs. One that passes while `f` runs interrupts the current
    /// statement, which SQLite rolls back as a unit.
    pub(crate) fn with_conn_until<T>(
        &self,
        deadline: Option<Instant>,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| Error::UnexpectedStorage("connection lock poisoned".to_string()))?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::TransientStorage("database is closed".to_string()))?;

        let Some(deadline) = deadline else {
            return f(conn);
        };
        if Instant::now() >= deadline {
            return Err(Error::TransientStorage("deadline exceeded before storage call".to_string()));
        }

        conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        let result = f(&mut *conn);
        conn.progress_handler(0, None::<fn() -> bool>);
        result
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .field("open", &self.is_open())
            .finish()
    }
}

/// True for UNIQUE and PRIMARY KEY constraint failures
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn count_links(db: &Database) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM feature_provision_link", [], |row| row.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn test_schema_created() {
        let db = Database::open_in_memory().unwrap();
        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(names)
            })
            .unwrap();

        assert!(tables.contains(&"feature".to_string()));
        assert!(tables.contains(&"provision".to_string()));
        assert!(tables.contains(&"feature_provision_link".to_string()));
    }

    #[test]
    fn test_unique_pair_enforced_by_storage() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                conn.execute("INSERT INTO feature_provision_link (feature_id, provision_id) VALUES (1, 2)", [])?;
                match conn.execute("INSERT INTO feature_provision_link (feature_id, provision_id) VALUES (1, 2)", []) {
                    Ok(_) => Ok(false),
                    Err(e) => Ok(is_unique_violation(&e)),
                }
            })
            .unwrap();
        assert!(err);
        assert_eq!(count_links(&db), 1);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("complink.db");

        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO feature_provision_link (feature_id, provision_id) VALUES (4, 5)", [])?;
            Ok(())
        })
        .unwrap();
        db.close().unwrap();

        let reopened = Database::open(&path).unwrap();
        assert_eq!(count_links(&reopened), 1);
    }

    #[test]
    fn test_expired_deadline_skips_operation() {
        let db = Database::open_in_memory().unwrap();
        let deadline = Instant::now() - Duration::from_millis(1);

        let err = db
            .with_conn_until(Some(deadline), |conn| {
                conn.execute("INSERT INTO feature_provision_link (feature_id, provision_id) VALUES (1, 2)", [])?;
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(count_links(&db), 0);
    }

    #[test]
    fn test_deadline_interrupts_running_statement() {
        let db = Database::open_in_memory().unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);

        // unbounded recursive CTE; only the progress handler can stop it
        let err = db
            .with_conn_until(Some(deadline), |conn| {
                Ok(conn.query_row(
                    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT COUNT(*) FROM n",
                    [],
                    |row| row.get::<_, i64>(0),
                )?)
            })
            .unwrap_err();
        assert!(err.is_transient());

        // handler is cleared afterwards
        assert_eq!(count_links(&db), 0);
    }

    #[test]
    fn test_closed_database_is_transient() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.is_open());
        db.close().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());

        let err = db.with_conn(|_| Ok(())).unwrap_err();
        assert!(err.is_transient());
    }
}
