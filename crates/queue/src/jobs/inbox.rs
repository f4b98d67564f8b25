//! Federator side-effect job.

use serde::{Deserialize, Serialize};

/// Side effects of an activity received from a remote instance, e.g.
/// applying an incoming Like and notifying the liked account.
#[derive(Clone, Serialize, Deserialize)]
pub struct InboxJob {
    /// Activity type tag, routes the job to a processing branch.
    pub activity_type: String,

    /// Object type tag of the model this job concerns.
    pub object_type: String,

    /// Serialized domain object the job concerns.
    pub model: serde_json::Value,

    /// URI of the object this job targets, if any.
    pub target_uri: Option<String>,

    /// ID of the remote account that sent the activity.
    pub requesting_id: Option<String>,

    /// ID of the local account whose inbox received it.
    pub receiving_id: Option<String>,
}

impl InboxJob {
    /// Create a new federator side-effect job.
    #[must_use]
    pub const fn new(
        activity_type: String,
        object_type: String,
        model: serde_json::Value,
    ) -> Self {
        Self {
            activity_type,
            object_type,
            model,
            target_uri: None,
            requesting_id: None,
            receiving_id: None,
        }
    }

    /// Set the target URI.
    #[must_use]
    pub fn with_target_uri(mut self, uri: impl Into<String>) -> Self {
        self.target_uri = Some(uri.into());
        self
    }

    /// Set the requesting (remote) account ID.
    #[must_use]
    pub fn with_requesting(mut self, id: impl Into<String>) -> Self {
        self.requesting_id = Some(id.into());
        self
    }

    /// Set the receiving (local) account ID.
    #[must_use]
    pub fn with_receiving(mut self, id: impl Into<String>) -> Self {
        self.receiving_id = Some(id.into());
        self
    }
}

// The model payload can be large; identity fields are enough for logs.
impl std::fmt::Debug for InboxJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboxJob")
            .field("activity_type", &self.activity_type)
            .field("object_type", &self.object_type)
            .field("target_uri", &self.target_uri)
            .field("requesting_id", &self.requesting_id)
            .field("receiving_id", &self.receiving_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let job = InboxJob::new(
            crate::jobs::ap::ACTIVITY_LIKE.to_string(),
            crate::jobs::ap::OBJECT_NOTE.to_string(),
            serde_json::json!({"id": "01ARZ"}),
        )
        .with_requesting("https://remote.example/users/a")
        .with_receiving("01HGW");

        let data = serde_json::to_vec(&job).unwrap();
        let parsed: InboxJob = serde_json::from_slice(&data).unwrap();

        assert_eq!(parsed.activity_type, "Like");
        assert_eq!(
            parsed.requesting_id.as_deref(),
            Some("https://remote.example/users/a")
        );
        assert_eq!(parsed.receiving_id.as_deref(), Some("01HGW"));
    }
}
