//! Narrow interfaces for scheduled maintenance.
//!
//! The recurring scheduler drives these through the processor. The backing
//! queries live in the wider application's database layer; deployments
//! without one simply skip registering the corresponding jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pelago_common::AppResult;

/// A poll that reached its close time and needs expiry side effects
/// (closing notifications, a final federated Update).
#[derive(Debug, Clone)]
pub struct PollExpiry {
    /// ID of the expired poll.
    pub poll_id: String,
    /// Author of the status carrying the poll.
    pub author_id: String,
    /// Serialized poll model, becomes the dispatched message payload.
    pub model: serde_json::Value,
}

/// A status scheduled for publication whose time has come.
#[derive(Debug, Clone)]
pub struct ScheduledStatus {
    /// ID of the scheduled status.
    pub status_id: String,
    /// Author publishing it.
    pub author_id: String,
    /// Serialized status model, becomes the dispatched message payload.
    pub model: serde_json::Value,
}

/// Store behind the scheduler-driven maintenance jobs.
///
/// `due_*` calls are consuming: returned work is marked handled by the
/// store, so a crash between firings re-surfaces it at the next firing
/// rather than losing or duplicating it within one.
#[async_trait]
pub trait MaintenanceStore: Send + Sync {
    /// Polls that closed at or before `now`.
    async fn due_poll_expiries(&self, now: DateTime<Utc>) -> AppResult<Vec<PollExpiry>>;

    /// Statuses scheduled for publication at or before `now`.
    async fn due_scheduled_statuses(&self, now: DateTime<Utc>) -> AppResult<Vec<ScheduledStatus>>;

    /// Re-fetch domain permission subscriptions, returning how many were
    /// refreshed.
    async fn refresh_permission_subscriptions(&self, now: DateTime<Utc>) -> AppResult<u64>;
}
