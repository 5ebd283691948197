//! The store's single writer: one OS thread that owns the SQLite connection
//! and runs queued jobs in submission order.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const WORKER_THREAD_NAME: &str = "waytrace-store";

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Open the file and apply the durability settings every store relies on.
/// WAL plus FULL sync means a committed sample survives an abrupt kill.
fn open_durable(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal")?;
    conn.pragma_update(None, "synchronous", "FULL")
        .context("failed to set synchronous=FULL")?;
    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

/// Drains jobs until every sender is gone.
fn run_jobs(mut conn: Connection, jobs: mpsc::Receiver<Job>) {
    let mut processed = 0u64;
    for job in jobs {
        job(&mut conn);
        processed += 1;
    }
    if let Err((_, err)) = conn.close() {
        error!("Failed to close store connection: {err}");
    }
    info!("Store worker stopped after {processed} jobs");
}

struct StoreWorker {
    jobs: Option<mpsc::Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl StoreWorker {
    fn spawn(path: PathBuf) -> Result<Self> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || match open_durable(&path) {
                Ok(conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        run_jobs(conn, jobs_rx);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before it was ready")??;

        Ok(Self {
            jobs: Some(jobs_tx),
            thread: Some(thread),
        })
    }

    fn submit(&self, job: Job) -> Result<()> {
        self.jobs
            .as_ref()
            .ok_or_else(|| anyhow!("store worker is shutting down"))?
            .send(job)
            .map_err(|_| anyhow!("store worker is gone"))
    }
}

impl Drop for StoreWorker {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop once pending jobs ran.
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if let Err(err) = thread.join() {
                error!("Failed to join store worker: {err:?}");
            }
        }
    }
}

/// Handle to the SQLite store.
///
/// Cloning is cheap. The worker thread exits once the last clone is dropped
/// and every queued job has run.
#[derive(Clone)]
pub struct Database {
    worker: Arc<StoreWorker>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let worker = StoreWorker::spawn(db_path.clone())?;
        info!("Store ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(worker),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Run `task` on the worker thread and await its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.worker.submit(Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                debug!("store caller went away before the reply");
            }
        }))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store worker dropped the job"))?
    }
}
