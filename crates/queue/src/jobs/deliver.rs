//! `ActivityPub` delivery job.

use serde::{Deserialize, Serialize};

/// Job to deliver a signed activity to a remote inbox.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeliverJob {
    /// ID of the account the delivery is signed as. `None` means the
    /// instance actor signs it.
    pub actor_id: Option<String>,

    /// Target inbox URL.
    pub inbox: String,

    /// Activity JSON to deliver.
    pub activity: serde_json::Value,

    /// Failed attempts so far; drives the retry backoff. Survives a
    /// persistence round trip so recovered deliveries keep their place in
    /// the backoff schedule.
    #[serde(default)]
    pub attempts: u32,
}

impl DeliverJob {
    /// Create a new deliver job.
    #[must_use]
    pub const fn new(actor_id: Option<String>, inbox: String, activity: serde_json::Value) -> Self {
        Self {
            actor_id,
            inbox,
            activity,
            attempts: 0,
        }
    }
}

// The activity body can be large; identity fields are enough for logs.
impl std::fmt::Debug for DeliverJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliverJob")
            .field("actor_id", &self.actor_id)
            .field("inbox", &self.inbox)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}
