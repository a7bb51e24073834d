/*!
 * SQLite connection handling for the audit store.
 *
 * Access from async code goes through `spawn_blocking` so a slow disk never
 * stalls the runtime.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::schema;

/// Shared, thread-safe audit connection
#[derive(Clone)]
pub struct AuditConnection {
    db_path: PathBuf,
    connection: Arc<Mutex<Connection>>,
}

impl AuditConnection {
    /// Open (or create) the audit database at `db_path`
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create audit directory: {:?}", parent))?;
        }

        info!("Opening audit database at: {:?}", db_path);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open audit database: {:?}", db_path))?;
        schema::initialize_schema(&conn)?;

        Ok(Self {
            db_path,
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        debug!("Creating in-memory audit database");
        let conn = Connection::open_in_memory().context("Failed to create in-memory audit database")?;
        schema::initialize_schema(&conn)?;

        Ok(Self {
            db_path: PathBuf::from(":memory:"),
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` against the connection on the current thread
    pub fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .connection
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire audit database lock: {}", e))?;
        f(&conn)
    }

    /// Run `f` on the blocking pool
    pub async fn execute_async<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Failed to acquire audit database lock: {}", e))?;
            f(&conn)
        })
        .await
        .context("Audit database task panicked")?
    }

    /// Run `f` inside a transaction on the blocking pool; committed when `f` succeeds
    pub async fn transaction_async<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Failed to acquire audit database lock: {}", e))?;
            let tx = conn.transaction().context("Failed to begin audit transaction")?;
            let result = f(&tx)?;
            tx.commit().context("Failed to commit audit transaction")?;
            Ok(result)
        })
        .await
        .context("Audit database task panicked")?
    }
}
