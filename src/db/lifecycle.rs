//! Store lifecycle: destructive reset, open, and shutdown on termination signals.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{migrate, Db, DB_FILE_NAME};
use crate::error::{DepgraphError, Result};

/// Exit status used after a signal-triggered shutdown (128 + SIGINT)
pub const SIGNAL_EXIT_CODE: i32 = 130;

/// Stores with a registered shutdown handler, closed together on a signal
static OPEN_STORES: Mutex<Vec<Weak<Db>>> = Mutex::new(Vec::new());

/// Open the graph store at `location`, creating it if needed.
///
/// **Destructive:** with `reset_existing = true` everything already stored at
/// `location` is deleted before the fresh store is initialized.
pub async fn open(location: &Path, reset_existing: bool, timeout: Duration) -> Result<Db> {
    if location.as_os_str().is_empty() {
        return Err(DepgraphError::Config("store location must not be empty".to_string()));
    }

    if reset_existing {
        reset_location(location)?;
    }

    std::fs::create_dir_all(location)?;

    let db = Db::with_timeout(location.join(DB_FILE_NAME), timeout);
    db.with_connection(migrate::run_migrations).await?;

    log::info!(
        "Graph store ready at {} (reset: {})",
        location.display(),
        reset_existing
    );
    Ok(db)
}

/// Recursively delete whatever exists at `location`.
pub fn reset_location(location: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(location) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if location.parent().is_none() {
        return Err(DepgraphError::Config(format!(
            "refusing to reset filesystem root {}",
            location.display()
        )));
    }

    log::warn!("Discarding existing graph data at {}", location.display());
    if meta.is_dir() {
        std::fs::remove_dir_all(location)?;
    } else {
        std::fs::remove_file(location)?;
    }
    Ok(())
}

/// Close `db` once `signal` resolves. Returns whether this call closed it.
///
/// Only a weak reference is held; a store dropped in the meantime is left alone.
pub async fn shutdown_on<S>(db: Weak<Db>, signal: S) -> bool
where
    S: Future<Output = ()>,
{
    signal.await;

    let db = match db.upgrade() {
        Some(db) => db,
        None => return false,
    };
    match db.close().await {
        Ok(closed) => closed,
        Err(e) => {
            log::error!("Graph store shutdown failed for {}: {}", db.path().display(), e);
            false
        }
    }
}

/// On Ctrl-C (or SIGTERM on Unix) close every registered store, then exit
/// with [`SIGNAL_EXIT_CODE`].
///
/// Must be called from within a Tokio runtime. Abort the returned task to
/// unregister the listener.
pub fn install_shutdown_handler(db: &Arc<Db>) -> JoinHandle<()> {
    {
        let mut stores = OPEN_STORES.lock().unwrap_or_else(PoisonError::into_inner);
        stores.retain(|store| store.strong_count() > 0);
        stores.push(Arc::downgrade(db));
    }

    tokio::spawn(async {
        wait_for_termination().await;
        log::warn!("Termination signal received, shutting down graph stores");

        let stores = OPEN_STORES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for store in stores {
            shutdown_on(store, std::future::ready(())).await;
        }
        std::process::exit(SIGNAL_EXIT_CODE);
    })
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a listener there is nothing to wait for; never fire spuriously.
        log::warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}
