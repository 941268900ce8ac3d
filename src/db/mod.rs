use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use rusqlite::Connection;
use tokio::sync::{oneshot, watch};

pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

use migrations::run_migrations;

pub use models::{ActiveDays, ChallengeMode, DailyStat, InterceptionRecord, Schedule, TrackedApp};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Stop,
}

/// The SQLite connection lives on this thread and nowhere else.
struct Worker {
    jobs: mpsc::Sender<WorkerMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn spawn(path: PathBuf) -> Result<Self> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<WorkerMessage>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("friction-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                serve(&mut conn, jobs_rx);
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        Ok(Self {
            jobs: jobs_tx,
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if self.jobs.send(WorkerMessage::Stop).is_err() {
                debug!("Database worker already gone");
            }
            if let Err(join_err) = handle.join() {
                error!("Database worker panicked: {join_err:?}");
            }
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database at {}", path.display()))?;

    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    // Non-fatal: some filesystems refuse WAL and fall back to the rollback journal.
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(conn: &mut Connection, jobs: mpsc::Receiver<WorkerMessage>) {
    for message in jobs {
        match message {
            WorkerMessage::Run(job) => job(conn),
            WorkerMessage::Stop => break,
        }
    }
    info!("Database thread shutting down");
}

/// SQLite-backed configuration store and interception event log.
///
/// All statements run on one dedicated thread; async callers hand it a
/// closure and await the reply. Nothing on the interception hot path goes
/// through here.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
    /// Bumped after every committed write to `tracked_apps`.
    tracked_apps_revision: Arc<watch::Sender<u64>>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let worker = Worker::spawn(db_path.clone())?;
        info!("Database initialized at {}", db_path.display());

        let (tracked_apps_revision, _) = watch::channel(0);
        Ok(Self {
            worker: Arc::new(worker),
            path: Arc::new(db_path),
            tracked_apps_revision: Arc::new(tracked_apps_revision),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Runs `task` on the database thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have been cancelled; nothing to do then.
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .send(WorkerMessage::Run(job))
            .map_err(|_| anyhow!("database worker is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the request"))?
    }

    /// Live view of the tracked-app table: the receiver is marked changed
    /// after every write. Pair with `get_enabled_tracked_apps` to re-read.
    pub fn subscribe_tracked_apps(&self) -> watch::Receiver<u64> {
        self.tracked_apps_revision.subscribe()
    }

    pub(crate) fn notify_tracked_apps_changed(&self) {
        self.tracked_apps_revision
            .send_modify(|revision| *revision = revision.wrapping_add(1));
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Database;

    /// Opens a database in a fresh temp dir; keep the guard alive for the test.
    pub fn temp_database() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db = Database::new(dir.path().join("friction.sqlite3")).expect("open database");
        (db, dir)
    }
}
