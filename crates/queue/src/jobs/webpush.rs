//! Web push fan-out job.

use serde::{Deserialize, Serialize};

/// Job to send one push notification to one subscription endpoint.
///
/// The enqueuer resolves the receiving user's subscriptions; one job is
/// pushed per subscription so that a slow push service only occupies one
/// worker slot.
#[derive(Clone, Serialize, Deserialize)]
pub struct WebPushJob {
    /// Push service endpoint URL.
    pub endpoint: String,

    /// Subscription public key (p256dh).
    pub p256dh: String,

    /// Subscription auth secret.
    pub auth: String,

    /// Notification payload, serialized for the service worker.
    pub payload: serde_json::Value,
}

impl WebPushJob {
    /// Create a new web push job.
    #[must_use]
    pub const fn new(
        endpoint: String,
        p256dh: String,
        auth: String,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            endpoint,
            p256dh,
            auth,
            payload,
        }
    }
}

// Auth material must never reach the logs.
impl std::fmt::Debug for WebPushJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebPushJob")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
