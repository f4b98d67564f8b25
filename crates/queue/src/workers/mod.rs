//! Worker pool composition.

mod deliver;
mod webpush;

pub use deliver::{DeliverContext, RequestSigner, deliver_worker};
pub use webpush::{WebPushContext, web_push_worker};

use std::time::Duration;

use tracing::info;

use pelago_common::AppResult;
use pelago_common::config::WorkersConfig;

use crate::jobs::{ClientJob, DeliverJob, InboxJob, OneshotJob, WebPushJob};
use crate::pool::WorkerPool;
use crate::scheduler::Scheduler;

/// One worker pool per message pipeline, plus the recurring scheduler.
///
/// Pools are constructed empty and sized here; their processing functions
/// are bound by the composition root once the consumer side exists, after
/// which [`Workers::start`] brings everything up.
pub struct Workers {
    /// Client API side effects.
    pub client: WorkerPool<ClientJob>,
    /// Inbound federation side effects.
    pub federator: WorkerPool<InboxJob>,
    /// Outbound signed delivery.
    pub delivery: WorkerPool<DeliverJob>,
    /// On-demand remote dereferencing.
    pub dereference: WorkerPool<OneshotJob>,
    /// Media post-processing.
    pub processing: WorkerPool<OneshotJob>,
    /// Push notification fan-out.
    pub web_push: WorkerPool<WebPushJob>,
    /// Recurring maintenance scheduler.
    pub scheduler: Scheduler,
}

impl Workers {
    /// Construct and size all pools. No pool consumes anything until its
    /// processing function is bound and [`Workers::start`] is called.
    #[must_use]
    pub fn new(config: &WorkersConfig) -> Self {
        let workers = Self {
            client: WorkerPool::new("client"),
            federator: WorkerPool::new("federator"),
            delivery: WorkerPool::new("delivery"),
            dereference: WorkerPool::new("dereference"),
            processing: WorkerPool::new("processing"),
            web_push: WorkerPool::new("web_push"),
            scheduler: Scheduler::new(),
        };

        workers.client.init(resolve_count(config.client, 4));
        workers.federator.init(resolve_count(config.federator, 4));
        workers.delivery.init(resolve_count(config.delivery, 8));
        workers.dereference.init(resolve_count(config.dereference, 4));
        workers.processing.init(resolve_count(config.processing, 1));
        workers.web_push.init(resolve_count(config.web_push, 2));

        workers
    }

    /// Start every pool and the scheduler. All processing functions must be
    /// bound first.
    pub fn start(&self) -> AppResult<()> {
        self.client.start()?;
        self.federator.start()?;
        self.delivery.start()?;
        self.dereference.start()?;
        self.processing.start()?;
        self.web_push.start()?;
        self.scheduler.start();

        info!("All worker pools started");
        Ok(())
    }

    /// Stop the scheduler, then every pool with a bounded drain. Queued
    /// messages stay queued for persistence.
    pub async fn stop(&self, timeout: Duration) {
        // Scheduler first so no periodic job enqueues into stopping pools.
        self.scheduler.stop().await;

        self.client.stop(timeout).await;
        self.federator.stop(timeout).await;
        self.delivery.stop(timeout).await;
        self.dereference.stop(timeout).await;
        self.processing.stop(timeout).await;
        self.web_push.stop(timeout).await;

        info!("All worker pools stopped");
    }
}

/// A configured worker count of zero scales from available parallelism.
fn resolve_count(configured: usize, multiplier: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    (cpus * multiplier).max(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_count_explicit_wins() {
        assert_eq!(resolve_count(3, 8), 3);
    }

    #[test]
    fn test_resolve_count_scales_from_cpus() {
        let resolved = resolve_count(0, 2);
        assert!(resolved >= 2);
    }

    #[tokio::test]
    async fn test_start_fails_before_wiring() {
        let workers = Workers::new(&WorkersConfig::default());

        // No processing functions bound yet; two-phase wiring incomplete.
        assert!(workers.start().is_err());
    }
}
