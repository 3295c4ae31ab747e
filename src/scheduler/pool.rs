//! Bounded worker pool for blocking calls
//!
//! The pool owns a fixed set of worker threads fed from a single flume
//! queue. Procedures hand one blocking closure at a time across this
//! boundary; the result travels back over a oneshot channel, which is the
//! only synchronization point between the workers and the reactive side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::types::error::{BridgeError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum PoolMessage {
    Job(Job),
    Shutdown,
}

/// Fixed-size pool of worker threads executing blocking closures
pub struct WorkerPool {
    size: usize,
    tx: flume::Sender<PoolMessage>,
    rx: flume::Receiver<PoolMessage>,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with `size` workers. No threads run until `start`.
    pub fn new(size: usize) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            size: size.max(1),
            tx,
            rx,
            running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    fn worker_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker threads. Calling `start` on a running pool is a
    /// no-op.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut workers = self.worker_handles();
        for index in 0..self.size {
            let rx = self.rx.clone();
            let running = Arc::clone(&self.running);
            let handle = std::thread::Builder::new()
                .name(format!("voicebridge-worker-{index}"))
                .spawn(move || worker_loop(index, rx, running))
                .map_err(|err| {
                    BridgeError::Scheduler(format!("failed to spawn worker thread: {err}"))
                })?;
            workers.push(handle);
        }
        info!(workers = self.size, "worker pool started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue one blocking closure. Fails when the pool is not running.
    pub fn submit(&self, job: Job) -> Result<()> {
        if !self.is_running() {
            return Err(BridgeError::Scheduler("worker pool is not running".into()));
        }
        self.tx
            .send(PoolMessage::Job(job))
            .map_err(|_| BridgeError::Scheduler("worker pool queue is closed".into()))
    }

    /// Run one blocking closure on a worker and await its result.
    ///
    /// A worker-side `Err` is returned to the caller unchanged, so the
    /// awaiting procedure observes the failure exactly where it suspended.
    pub async fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Box::new(move || {
            let _ = tx.send(work());
        }))?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Scheduler(
                "worker pool dropped the job before completion".into(),
            )),
        }
    }

    /// Stop the pool: reject new submissions, discard queued jobs, let each
    /// worker finish its current job, and join the threads.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.worker_handles();
        for _ in 0..workers.len() {
            let _ = self.tx.send(PoolMessage::Shutdown);
        }
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
        info!("worker pool stopped");
    }
}

fn worker_loop(index: usize, rx: flume::Receiver<PoolMessage>, running: Arc<AtomicBool>) {
    debug!(worker = index, "worker thread started");
    while let Ok(message) = rx.recv() {
        match message {
            PoolMessage::Job(job) => {
                if running.load(Ordering::SeqCst) {
                    job();
                } else {
                    debug!(worker = index, "discarding queued job after stop");
                }
            }
            PoolMessage::Shutdown => break,
        }
    }
    debug!(worker = index, "worker thread exiting");
}
