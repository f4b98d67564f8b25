//! Bounded worker pools.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pelago_common::{AppError, AppResult, get_metrics};

use crate::queue::TaskQueue;

/// Processing function bound to a pool after construction.
type ProcessFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// A pool of workers consuming one pipeline's task queue.
///
/// At most `worker_count` messages are executed concurrently; the queue in
/// front of the pool is unbounded, so producers are never blocked and the
/// backlog depth is an operator-visible signal instead.
///
/// Lifecycle: construct with [`WorkerPool::new`], size with
/// [`WorkerPool::init`], bind the processing function with
/// [`WorkerPool::set_processor`] once the consumer exists, then
/// [`WorkerPool::start`]. [`WorkerPool::stop`] halts consumption and waits
/// (bounded) for in-flight messages; whatever is still queued stays queued
/// for persistence.
pub struct WorkerPool<T: Send + 'static> {
    name: &'static str,
    queue: TaskQueue<T>,
    worker_count: AtomicUsize,
    busy: Arc<AtomicUsize>,
    process: RwLock<Option<ProcessFn<T>>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: fmt::Debug + Send + 'static> WorkerPool<T> {
    /// Create a stopped, unsized pool with an empty queue.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name,
            queue: TaskQueue::new(),
            worker_count: AtomicUsize::new(0),
            busy: Arc::new(AtomicUsize::new(0)),
            process: RwLock::new(None),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Pipeline name of this pool.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Set the concurrency bound. Must be called before [`WorkerPool::start`].
    pub fn init(&self, worker_count: usize) {
        self.worker_count.store(worker_count, Ordering::Release);
    }

    /// Bind the processing function. Called once the consumer component
    /// exists; pools are constructed before their consumers, so this is a
    /// separate wiring phase by design of the composition root.
    pub fn set_processor<F, Fut>(&self, process: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = AppResult<()>> + Send + 'static,
    {
        let process: ProcessFn<T> = Arc::new(move |msg| Box::pin(process(msg)));
        *self
            .process
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(process);
    }

    /// Launch the consumption loops.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Queue`] if the pool is already running, has no
    /// worker count set, or has no processing function bound.
    pub fn start(&self) -> AppResult<()> {
        let process = self
            .process
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                AppError::Queue(format!("{}: no processing function bound", self.name))
            })?;

        let worker_count = self.worker_count.load(Ordering::Acquire);
        if worker_count == 0 {
            return Err(AppError::Queue(format!(
                "{}: init must be called before start",
                self.name
            )));
        }

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if !handles.is_empty() {
            return Err(AppError::Queue(format!("{}: already started", self.name)));
        }

        self.shutdown_tx.send_replace(false);

        for index in 0..worker_count {
            let queue = self.queue.clone();
            let process = Arc::clone(&process);
            let busy = Arc::clone(&self.busy);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let name = self.name;
            handles.push(tokio::spawn(worker_loop(
                name,
                index,
                queue,
                process,
                busy,
                shutdown_rx,
            )));
        }

        info!(pool = self.name, workers = worker_count, "Started worker pool");
        Ok(())
    }

    /// Signal all workers to stop pulling new messages and wait up to
    /// `timeout` for in-flight messages to finish.
    ///
    /// The queue is never truncated here; unprocessed messages remain for
    /// the persistence pass. No message begins processing after this
    /// returns.
    pub async fn stop(&self, timeout: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *handles)
        };
        if handles.is_empty() {
            return;
        }

        let _ = self.shutdown_tx.send(true);

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                pool = self.name,
                busy = self.len(),
                "Timed out waiting for in-flight messages; shutdown proceeds"
            );
        }

        info!(
            pool = self.name,
            queued = self.queue.len(),
            "Stopped worker pool"
        );
    }

    /// Number of currently busy worker slots (0..=`worker_count`).
    pub fn len(&self) -> usize {
        self.busy.load(Ordering::Acquire)
    }

    /// Whether no worker slot is currently busy.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The pool's task queue, for producers and the persistence drain.
    #[must_use]
    pub const fn queue(&self) -> &TaskQueue<T> {
        &self.queue
    }
}

/// One consumption loop: pop, process, log failures, repeat until shutdown.
async fn worker_loop<T: fmt::Debug + Send + 'static>(
    name: &'static str,
    index: usize,
    queue: TaskQueue<T>,
    process: ProcessFn<T>,
    busy: Arc<AtomicUsize>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(pool = name, worker = index, "Worker loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let msg = tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            msg = queue.pop() => msg,
        };

        // The message's identifying attributes, for the failure log below.
        // Job Debug impls elide their payloads, so this stays cheap.
        let identity = format!("{msg:?}");

        busy.fetch_add(1, Ordering::AcqRel);
        let result = (process)(msg).await;
        busy.fetch_sub(1, Ordering::AcqRel);

        match result {
            Ok(()) => get_metrics().record_message(true),
            Err(e) => {
                // A failed message never halts the pool; log and move on.
                error!(
                    pool = name,
                    message = %identity,
                    error = %e,
                    "Error processing message"
                );
                get_metrics().record_message(false);
            }
        }
    }

    debug!(pool = name, worker = index, "Worker loop exited");
}
