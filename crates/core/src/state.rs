//! Composed process state.

use std::sync::Arc;
use std::time::Duration;

use pelago_common::TtlCache;
use pelago_db::repositories::WorkerTaskStore;
use pelago_queue::Workers;

/// How long dereferenced remote objects stay cached.
const DEREFERENCE_TTL: Duration = Duration::from_secs(15 * 60);

/// In-process caches, swept periodically by the scheduler.
pub struct Caches {
    /// Remote objects fetched by the dereference pipeline, keyed by URI.
    pub dereference: TtlCache<String, serde_json::Value>,
}

impl Default for Caches {
    fn default() -> Self {
        Self::new()
    }
}

impl Caches {
    /// Create empty caches.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dereference: TtlCache::new(DEREFERENCE_TTL),
        }
    }

    /// Sweep all caches, returning how many entries were reclaimed.
    pub fn sweep(&self) -> usize {
        self.dereference.sweep()
    }
}

/// Everything a subsystem needs, composed once in `main` and passed by
/// reference. Deliberately not a process-wide singleton: tests build as
/// many instances as they like.
pub struct State {
    /// The worker pools and scheduler.
    pub workers: Arc<Workers>,
    /// Durable persistence for queued-but-unprocessed messages.
    pub tasks: Arc<dyn WorkerTaskStore>,
    /// In-process caches.
    pub caches: Arc<Caches>,
}

impl State {
    /// Compose process state.
    #[must_use]
    pub fn new(workers: Arc<Workers>, tasks: Arc<dyn WorkerTaskStore>) -> Self {
        Self {
            workers,
            tasks,
            caches: Arc::new(Caches::new()),
        }
    }
}
