//! JobManager: the bounded thread/process execution layer with
//! predicate gating and optional cron scheduling.
//!
//! Scheduling model is a parallel worker pool over a single-threaded
//! dispatcher: [`JobManager::run`] is the dispatcher loop; it never
//! itself blocks on a worker. A ready-task stream feeds a bounded
//! `tokio::sync::Semaphore`, with a separate pattern for spawning and
//! waiting on a child process.

mod handle;
mod pinfo;
mod predicate;
mod schedule;
mod table;

pub use handle::Handle;
pub use pinfo::PInfo;
pub use predicate::Predicate;
pub use schedule::CronSchedule;
pub use table::{JobSnapshot, JobTable};

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};

pub type JobId = u64;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("worker task failed")]
    Worker(#[source] anyhow::Error),
    #[error("failed to spawn process")]
    Spawn(#[source] std::io::Error),
    #[error("process exited with status {0}")]
    ExitStatus(std::process::ExitStatus),
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

struct Pending {
    id: JobId,
    info: PInfo,
    task: BoxFuture<anyhow::Result<()>>,
}

/// Shared state behind every clone of a [`JobManager`].
struct Inner {
    thread_permits: Semaphore,
    process_permits: Semaphore,
    table: JobTable,
    next_id: AtomicU64,
    queue: tokio::sync::Mutex<std::collections::VecDeque<Pending>>,
    notify: tokio::sync::Notify,
}

/// A single point that turns a request for work into a running unit.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(max_threads: usize, max_processes: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                thread_permits: Semaphore::new(max_threads),
                process_permits: Semaphore::new(max_processes),
                table: JobTable::new(),
                next_id: AtomicU64::new(1),
                queue: tokio::sync::Mutex::new(std::collections::VecDeque::new()),
                notify: tokio::sync::Notify::new(),
            }),
        }
    }

    fn alloc_id(&self) -> JobId {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A read-only view of the live job table, for predicates and
    /// introspection.
    pub fn table(&self) -> &JobTable {
        &self.inner.table
    }

    /// Submits a task built by `make_task` for execution, optionally as a
    /// recurring cron job. Predicate gating, if any, is carried on
    /// `info.predicates` and is evaluated by the dispatcher before the task
    /// is ever polled. `make_task` is called once for a one-shot submission,
    /// or once per tick of `schedule` for a recurring one — each call must
    /// produce a fresh, independently pollable future.
    pub fn submit<G, F>(&self, info: PInfo, make_task: G, schedule: Option<CronSchedule>) -> Handle
    where
        G: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.alloc_id();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        self.inner.table.insert(id, info.clone());

        if let Some(schedule) = schedule {
            let mgr = self.clone();
            tokio::spawn(async move {
                loop {
                    let sleep = schedule.sleep_until_next();
                    tokio::select! {
                        _ = sleep => {}
                        _ = &mut cancel_rx => return,
                    }
                    mgr.enqueue(id, info.clone(), Box::pin(make_task())).await;
                }
            });
            return Handle { id, cancel: Some(cancel_tx) };
        }

        let task = make_task();
        let fut: BoxFuture<anyhow::Result<()>> = Box::pin(async move {
            tokio::select! {
                res = task => res,
                _ = &mut cancel_rx => Ok(()),
            }
        });

        let mgr = self.clone();
        tokio::spawn(async move {
            mgr.enqueue(id, info, fut).await;
        });

        Handle { id, cancel: Some(cancel_tx) }
    }

    async fn enqueue(&self, id: JobId, info: PInfo, task: BoxFuture<anyhow::Result<()>>) {
        self.inner
            .queue
            .lock()
            .await
            .push_back(Pending { id, info, task });
        self.inner.notify.notify_one();
    }

    /// Runs the dispatcher loop until `shutdown` resolves. Pops
    /// predicate-satisfying pending tasks and spawns them on the
    /// (unbounded-concurrency, `tokio::spawn`-backed) dispatch layer; tasks
    /// that must compute go through [`Self::defer_to_process`] /
    /// [`Self::defer_to_thread`] internally for their heavy lifting. The
    /// dispatcher itself never blocks on a worker.
    pub async fn run(&self, mut shutdown: impl Future<Output = ()> + Unpin) {
        loop {
            let ready = self.drain_ready().await;
            for pending in ready {
                let table = self.inner.table.clone();
                tokio::spawn(async move {
                    let result = pending.task.await;
                    match result {
                        Ok(()) => table.mark_done(pending.id),
                        Err(err) => {
                            tracing::warn!(job = pending.id, ?err, "job failed");
                            table.mark_failed(pending.id, err.to_string());
                        }
                    }
                });
            }

            tokio::select! {
                _ = &mut shutdown => return,
                _ = self.inner.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    /// Pulls every queued task whose predicates currently pass, leaving
    /// the rest queued for the next tick. A predicate exception (an
    /// `Err` from the predicate itself, modeled here as a panic-free
    /// `bool`) would be "not ready, retry"; since our predicates are
    /// infallible closures, "not ready" is simply `false`.
    async fn drain_ready(&self) -> Vec<Pending> {
        let mut queue = self.inner.queue.lock().await;
        let mut ready = Vec::new();
        let mut still_pending = std::collections::VecDeque::new();
        while let Some(pending) = queue.pop_front() {
            if pending.info.predicates_pass(&self.inner.table) {
                ready.push(pending);
            } else {
                still_pending.push_back(pending);
            }
        }
        *queue = still_pending;
        ready
    }

    /// Runs `f` on a worker thread, bounded by the thread pool's
    /// semaphore.
    pub async fn defer_to_thread<T, F>(&self, info: PInfo, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let _permit = self
            .inner
            .thread_permits
            .acquire()
            .await
            .expect("semaphore not closed");
        tracing::debug!(?info, "deferring to thread");
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|join_err| Error::Worker(join_err.into()))?
            .map_err(Error::Worker)
    }

    /// Runs a command to completion in a worker process, bounded by the
    /// process pool's semaphore.
    pub async fn defer_to_process(
        &self,
        info: PInfo,
        mut cmd: tokio::process::Command,
    ) -> Result<std::process::Output, Error> {
        let _permit = self
            .inner
            .process_permits
            .acquire()
            .await
            .expect("semaphore not closed");
        tracing::debug!(?info, program = ?cmd.as_std().get_program(), "spawning worker process");
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        let output = cmd.output().await.map_err(Error::Spawn)?;
        if !output.status.success() {
            return Err(Error::ExitStatus(output.status));
        }
        Ok(output)
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(num_cpus_fallback(), 4)
    }
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
