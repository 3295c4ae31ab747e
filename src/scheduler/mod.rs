//! Cooperative scheduler for straight-line network procedures
//!
//! A procedure is an async block spawned through [`Scheduler::spawn`]. It
//! runs on the session's tokio runtime and hands each blocking call to the
//! worker pool through its [`Suspend`] context, resuming at the await point
//! with the call's result. Worker-side failures surface at that same point,
//! so procedures use ordinary `?` propagation and no implicit retry exists.
//!
//! `stop` aborts the tracked procedures before stopping the pool, so a
//! result that arrives late lands in a dead task and is dropped silently.

pub mod pool;

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::types::error::Result;
use pool::WorkerPool;

/// Hand-off context owned by one procedure
///
/// The `&mut self` receiver on [`Suspend::run`] means a procedure can have
/// at most one blocking call in flight; the next one cannot start until the
/// previous await resolves.
pub struct Suspend {
    pool: Arc<WorkerPool>,
}

impl Suspend {
    /// Run `work` on a worker thread and await its result here.
    pub async fn run<T, F>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.run(work).await
    }
}

/// Cancelable handle for a scheduled timer
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel the timer. A timer whose callback already started cannot be
    /// recalled.
    pub fn cancel(self) {
        self.task.abort();
    }
}

/// Spawns and tracks procedures, owns the worker pool, and provides the
/// one-shot timer primitive the polling machines schedule with.
#[derive(Clone)]
pub struct Scheduler {
    pool: Arc<WorkerPool>,
    procedures: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    /// Build a scheduler with `workers` pool threads, started immediately.
    pub fn new(workers: usize) -> Result<Self> {
        let pool = Arc::new(WorkerPool::new(workers));
        pool.start()?;
        Ok(Self {
            pool,
            procedures: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn tracked(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.procedures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a tracked procedure. The procedure receives its own [`Suspend`]
    /// context; a procedure that ends with an error is logged and simply
    /// stops being driven.
    pub fn spawn<F, Fut>(&self, procedure: F)
    where
        F: FnOnce(Suspend) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let suspend = self.suspend();
        let handle = tokio::spawn(async move {
            if let Err(err) = procedure(suspend).await {
                debug!(error = %err, "procedure ended with error");
            }
        });
        let mut procedures = self.tracked();
        procedures.retain(|task| !task.is_finished());
        procedures.push(handle);
    }

    /// Create a stand-alone suspend context for callers that drive a
    /// procedure themselves instead of spawning it.
    pub fn suspend(&self) -> Suspend {
        Suspend {
            pool: Arc::clone(&self.pool),
        }
    }

    /// Run one blocking closure on the pool from any async context.
    pub async fn io<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.pool.run(work).await
    }

    /// Arm a one-shot timer invoking `callback` after `delay`.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TimerHandle { task }
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    /// Abort every tracked procedure, then stop the worker pool. Outstanding
    /// worker results are dropped instead of resuming anything.
    pub fn stop(&self) {
        let mut procedures = self.tracked();
        for task in procedures.drain(..) {
            task.abort();
        }
        drop(procedures);
        self.pool.stop();
        info!("scheduler stopped");
    }
}
