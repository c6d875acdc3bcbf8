//! Store handle over the embedded SQLite graph database.
//!
//! Every call opens its own connection on a blocking task, bounded by the
//! configured store timeout. Mutations go through [`Db::with_transaction`],
//! which commits all-or-nothing.

use rusqlite::{Connection, InterruptHandle, OpenFlags, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{self, JoinError};
use crate::error::{Result, DepgraphError};

pub mod lifecycle;
pub mod migrate;

/// File name of the graph database inside a storage location
pub const DB_FILE_NAME: &str = "graph.db";

/// Default time allowed for a single store call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Database connection wrapper
pub struct Db {
    path: PathBuf,
    timeout: Duration,
    closed: AtomicBool,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self::with_timeout(db_path, DEFAULT_TIMEOUT)
    }

    /// Create a connection manager whose calls fail with `StoreUnavailable` after `timeout`
    pub fn with_timeout<P: AsRef<Path>>(db_path: P, timeout: Duration) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(f).await
    }

    /// Execute a closure inside one immediate transaction.
    ///
    /// The transaction commits only if the closure returns `Ok`; any error,
    /// panic, or interrupted statement rolls back everything it wrote.
    pub async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
    }

    /// Open a connection and run `f` on a blocking task, both inside the store timeout.
    async fn run_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(DepgraphError::StoreClosed);
        }

        let path = self.path.clone();
        let busy_timeout = self.timeout;
        let (interrupt_tx, mut interrupt_rx) = oneshot::channel::<InterruptHandle>();
        let mut handle = task::spawn_blocking(move || {
            let mut conn = open_connection(&path, busy_timeout)?;
            let _ = interrupt_tx.send(conn.get_interrupt_handle());
            f(&mut conn)
        });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(joined) => joined.map_err(task_failure)?,
            Err(_) => {
                log::warn!(
                    "Store call exceeded {:?} on {}, interrupting",
                    self.timeout,
                    self.path.display()
                );
                if let Ok(interrupt) = interrupt_rx.try_recv() {
                    interrupt.interrupt();
                }
                match handle.await.map_err(task_failure)? {
                    // Committed before the interrupt landed
                    Ok(out) => Ok(out),
                    Err(e) if !e.is_retryable() => Err(e),
                    Err(e) => Err(DepgraphError::StoreUnavailable(format!(
                        "store call timed out after {:?}: {}",
                        self.timeout, e
                    ))),
                }
            }
        }
    }

    /// Flush the write-ahead log and refuse further calls.
    ///
    /// Returns `Ok(false)` when the store was already closed.
    pub async fn close(&self) -> Result<bool> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let path = self.path.clone();
        let busy_timeout = self.timeout;
        let flush = task::spawn_blocking(move || checkpoint(&path, busy_timeout));
        match tokio::time::timeout(self.timeout, flush).await {
            Ok(joined) => joined.map_err(task_failure)??,
            Err(_) => log::warn!(
                "WAL checkpoint on {} exceeded {:?}",
                self.path.display(),
                self.timeout
            ),
        }

        log::info!("Graph store closed: {}", self.path.display());
        Ok(true)
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let path = self.path.clone();
        let busy_timeout = self.timeout;
        let flush = move || {
            if let Err(e) = checkpoint(&path, busy_timeout) {
                log::warn!("Failed to close graph store {}: {}", path.display(), e);
            }
        };

        // Off the async workers when dropped inside a runtime
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let _ = runtime.spawn_blocking(flush);
            }
            Err(_) => flush(),
        }
    }
}

/// Open a connection with the store pragmas applied
fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path).map_err(DepgraphError::Database)?;

    // busy_timeout first so the remaining pragmas wait on a locked file too
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY;"
    )?;

    Ok(conn)
}

/// Truncate the write-ahead log. Never creates the database file.
fn checkpoint(path: &Path, busy_timeout: Duration) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(busy_timeout)?;
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
    Ok(())
}

fn task_failure(e: JoinError) -> DepgraphError {
    if e.is_panic() {
        DepgraphError::TaskFailed(e.to_string())
    } else {
        DepgraphError::StoreUnavailable(format!("store task cancelled: {}", e))
    }
}
