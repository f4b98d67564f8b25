//! Client API side-effect job.

use serde::{Deserialize, Serialize};

/// Side effects of an action taken through the client API, e.g. federating
/// a newly created status outward.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientJob {
    /// Activity type tag, routes the job to a processing branch.
    pub activity_type: String,

    /// Object type tag of the model this job concerns.
    pub object_type: String,

    /// Serialized domain object the job concerns.
    pub model: serde_json::Value,

    /// URI of the object or actor this job targets, if any.
    pub target_uri: Option<String>,

    /// ID of the account that caused this job.
    pub origin_id: Option<String>,

    /// ID of the account this job is directed at, if any.
    pub target_id: Option<String>,
}

impl ClientJob {
    /// Create a new client side-effect job.
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
            origin_id: None,
            target_id: None,
        }
    }

    /// Set the target URI.
    #[must_use]
    pub fn with_target_uri(mut self, uri: impl Into<String>) -> Self {
        self.target_uri = Some(uri.into());
        self
    }

    /// Set the origin account ID.
    #[must_use]
    pub fn with_origin(mut self, id: impl Into<String>) -> Self {
        self.origin_id = Some(id.into());
        self
    }

    /// Set the target account ID.
    #[must_use]
    pub fn with_target(mut self, id: impl Into<String>) -> Self {
        self.target_id = Some(id.into());
        self
    }
}

// The model payload can be large; identity fields are enough for logs.
impl std::fmt::Debug for ClientJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientJob")
            .field("activity_type", &self.activity_type)
            .field("object_type", &self.object_type)
            .field("target_uri", &self.target_uri)
            .field("origin_id", &self.origin_id)
            .field("target_id", &self.target_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let job = ClientJob::new(
            crate::jobs::ap::ACTIVITY_CREATE.to_string(),
            crate::jobs::ap::OBJECT_NOTE.to_string(),
            serde_json::json!({"id": "01ARZ", "content": "hello"}),
        )
        .with_target_uri("https://remote.example/users/a/inbox")
        .with_origin("01HGW");

        let data = serde_json::to_vec(&job).unwrap();
        let parsed: ClientJob = serde_json::from_slice(&data).unwrap();

        assert_eq!(parsed.activity_type, "Create");
        assert_eq!(parsed.object_type, "Note");
        assert_eq!(parsed.origin_id.as_deref(), Some("01HGW"));
        assert_eq!(parsed.model["content"], "hello");
    }

    #[test]
    fn test_debug_elides_model() {
        let job = ClientJob::new(
            "Create".to_string(),
            "Note".to_string(),
            serde_json::json!({"secret": "do not log"}),
        );

        let debug = format!("{job:?}");
        assert!(debug.contains("Create"));
        assert!(!debug.contains("do not log"));
    }
}
