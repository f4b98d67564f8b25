//! Message processor.
//!
//! The consumer bound to the client and federator pools. Pools are
//! constructed before this exists and this holds references to the pools
//! for pushing derived messages, so wiring is two-phase: the composition
//! root builds the pools, builds the processor, then attaches the
//! processing functions.

mod client;
mod federator;
mod workertask;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, info};

use pelago_common::{AppError, AppResult};
use pelago_queue::jobs::ap;
use pelago_queue::{ClientJob, InboxJob};

use crate::maintenance::MaintenanceStore;
use crate::state::State;

/// Routes messages to their side effects and owns the durable queue
/// persist/fill contract.
pub struct Processor {
    state: Arc<State>,
    http_client: Client,
    maintenance: Option<Arc<dyn MaintenanceStore>>,
}

impl Processor {
    /// Create a processor over composed state. `http_client` serves the
    /// dereference pipeline's remote fetches.
    #[must_use]
    pub const fn new(state: Arc<State>, http_client: Client) -> Self {
        Self {
            state,
            http_client,
            maintenance: None,
        }
    }

    /// Attach the maintenance store backing the scheduler-driven jobs.
    #[must_use]
    pub fn with_maintenance(mut self, store: Arc<dyn MaintenanceStore>) -> Self {
        self.maintenance = Some(store);
        self
    }

    /// Composed state, for the composition root.
    #[must_use]
    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    /// Process one client API side-effect message.
    pub async fn process_from_client_api(self: &Arc<Self>, msg: ClientJob) -> AppResult<()> {
        client::process(self, msg).await
    }

    /// Process one inbound federation side-effect message.
    pub async fn process_from_fedi_api(self: &Arc<Self>, msg: InboxJob) -> AppResult<()> {
        federator::process(self, msg).await
    }

    /// Sweep the in-process caches. Registered with the scheduler.
    pub fn sweep_caches(&self) -> usize {
        let swept = self.state.caches.sweep();
        if swept > 0 {
            debug!(swept, "Swept caches");
        }
        swept
    }

    /// Dispatch side effects for polls that closed. Registered with the
    /// scheduler when a maintenance store is configured.
    pub async fn dispatch_poll_expiries(&self, now: DateTime<Utc>) -> AppResult<()> {
        let store = self.require_maintenance()?;

        let expiries = store.due_poll_expiries(now).await?;
        let count = expiries.len();
        for expiry in expiries {
            self.state.workers.client.queue().push(
                ClientJob::new(
                    ap::ACTIVITY_UPDATE.to_string(),
                    ap::OBJECT_POLL.to_string(),
                    expiry.model,
                )
                .with_origin(expiry.author_id),
            );
        }

        if count > 0 {
            info!(count, "Dispatched poll expiries");
        }
        Ok(())
    }

    /// Publish statuses whose scheduled time has come. Registered with the
    /// scheduler when a maintenance store is configured.
    pub async fn publish_scheduled_statuses(&self, now: DateTime<Utc>) -> AppResult<()> {
        let store = self.require_maintenance()?;

        let due = store.due_scheduled_statuses(now).await?;
        let count = due.len();
        for status in due {
            self.state.workers.client.queue().push(
                ClientJob::new(
                    ap::ACTIVITY_CREATE.to_string(),
                    ap::OBJECT_NOTE.to_string(),
                    status.model,
                )
                .with_origin(status.author_id),
            );
        }

        if count > 0 {
            info!(count, "Published scheduled statuses");
        }
        Ok(())
    }

    /// Refresh domain permission subscriptions. Registered with the
    /// scheduler when a maintenance store is configured.
    pub async fn refresh_permission_subscriptions(&self, now: DateTime<Utc>) -> AppResult<()> {
        let store = self.require_maintenance()?;

        let refreshed = store.refresh_permission_subscriptions(now).await?;
        if refreshed > 0 {
            info!(refreshed, "Refreshed domain permission subscriptions");
        }
        Ok(())
    }

    fn require_maintenance(&self) -> AppResult<&Arc<dyn MaintenanceStore>> {
        self.maintenance
            .as_ref()
            .ok_or_else(|| AppError::Config("no maintenance store configured".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::workertask::testing::in_memory_store;
    use super::*;
    use crate::maintenance::{PollExpiry, ScheduledStatus};
    use async_trait::async_trait;
    use pelago_common::config::WorkersConfig;
    use pelago_queue::Workers;

    struct FixedMaintenanceStore {
        polls: Vec<PollExpiry>,
        statuses: Vec<ScheduledStatus>,
    }

    #[async_trait]
    impl MaintenanceStore for FixedMaintenanceStore {
        async fn due_poll_expiries(&self, _now: DateTime<Utc>) -> AppResult<Vec<PollExpiry>> {
            Ok(self.polls.clone())
        }

        async fn due_scheduled_statuses(
            &self,
            _now: DateTime<Utc>,
        ) -> AppResult<Vec<ScheduledStatus>> {
            Ok(self.statuses.clone())
        }

        async fn refresh_permission_subscriptions(&self, _now: DateTime<Utc>) -> AppResult<u64> {
            Ok(2)
        }
    }

    fn test_processor(store: FixedMaintenanceStore) -> Arc<Processor> {
        let workers = Arc::new(Workers::new(&WorkersConfig::default()));
        let state = Arc::new(State::new(workers, in_memory_store()));
        Arc::new(Processor::new(state, Client::new()).with_maintenance(Arc::new(store)))
    }

    #[tokio::test]
    async fn test_poll_expiries_become_client_messages() {
        let processor = test_processor(FixedMaintenanceStore {
            polls: vec![PollExpiry {
                poll_id: "p1".to_string(),
                author_id: "01HGW".to_string(),
                model: serde_json::json!({"id": "p1"}),
            }],
            statuses: Vec::new(),
        });

        processor.dispatch_poll_expiries(Utc::now()).await.unwrap();

        let queued = processor.state().workers.client.queue().try_pop().unwrap();
        assert_eq!(queued.activity_type, ap::ACTIVITY_UPDATE);
        assert_eq!(queued.object_type, ap::OBJECT_POLL);
        assert_eq!(queued.origin_id.as_deref(), Some("01HGW"));
    }

    #[tokio::test]
    async fn test_scheduled_statuses_become_client_messages() {
        let processor = test_processor(FixedMaintenanceStore {
            polls: Vec::new(),
            statuses: vec![ScheduledStatus {
                status_id: "s1".to_string(),
                author_id: "01HGW".to_string(),
                model: serde_json::json!({"id": "s1"}),
            }],
        });

        processor
            .publish_scheduled_statuses(Utc::now())
            .await
            .unwrap();

        let queued = processor.state().workers.client.queue().try_pop().unwrap();
        assert_eq!(queued.activity_type, ap::ACTIVITY_CREATE);
        assert_eq!(queued.object_type, ap::OBJECT_NOTE);
    }

    #[tokio::test]
    async fn test_maintenance_without_store_errors() {
        let workers = Arc::new(Workers::new(&WorkersConfig::default()));
        let state = Arc::new(State::new(workers, in_memory_store()));
        let processor = Arc::new(Processor::new(state, Client::new()));

        assert!(processor.dispatch_poll_expiries(Utc::now()).await.is_err());
    }
}
