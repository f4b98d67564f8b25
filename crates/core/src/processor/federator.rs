//! Inbound federation side-effect routing.

use std::sync::Arc;

use tracing::{debug, warn};

use pelago_common::{AppError, AppResult};
use pelago_queue::jobs::ap;
use pelago_queue::{DeliverJob, InboxJob, OneshotJob};

use super::Processor;

pub(super) async fn process(processor: &Arc<Processor>, msg: InboxJob) -> AppResult<()> {
    match (msg.activity_type.as_str(), msg.object_type.as_str()) {
        (ap::ACTIVITY_CREATE, _) => create(processor, msg),
        (ap::ACTIVITY_FOLLOW, ap::OBJECT_PROFILE) => follow(processor, msg),
        (activity, object) => {
            debug!(activity, object, "Unhandled federator activity");
            Ok(())
        }
    }
}

/// An incoming Create whose object arrived by reference gets dereferenced
/// off-band; the fetched object re-enters this pipeline as a fresh message
/// with the model embedded.
fn create(processor: &Arc<Processor>, msg: InboxJob) -> AppResult<()> {
    let Some(uri) = msg.model.as_str().map(ToOwned::to_owned) else {
        // Object is embedded; applying it to local state is the business
        // layer's concern, nothing left to do here.
        debug!(object = %msg.object_type, "Processed embedded create");
        return Ok(());
    };

    let p = Arc::clone(processor);
    let desc = format!("dereference {uri}");
    processor
        .state()
        .workers
        .dereference
        .queue()
        .push(OneshotJob::new(desc, async move {
            let model = p.dereference(&uri).await?;
            p.state().workers.federator.queue().push(InboxJob {
                model,
                ..msg
            });
            Ok(())
        }));

    Ok(())
}

/// Accept the follow and queue delivery of the Accept back to the
/// requester's inbox.
fn follow(processor: &Arc<Processor>, msg: InboxJob) -> AppResult<()> {
    let Some(inbox) = msg.target_uri else {
        warn!("Follow without a reply inbox, dropping");
        return Ok(());
    };

    let actor_id = msg.receiving_id.clone();
    let accept = serde_json::json!({
        "type": ap::ACTIVITY_ACCEPT,
        "actor": msg.receiving_id,
        "object": msg.model,
    });

    processor
        .state()
        .workers
        .delivery
        .queue()
        .push(DeliverJob::new(actor_id, inbox, accept));

    Ok(())
}

impl Processor {
    /// Fetch a remote object, consulting the dereference cache first.
    pub(super) async fn dereference(&self, uri: &str) -> AppResult<serde_json::Value> {
        if let Some(cached) = self.state().caches.dereference.get(&uri.to_string()) {
            return Ok(cached);
        }

        let response = self
            .http_client
            .get(uri)
            .header("Accept", "application/activity+json")
            .send()
            .await
            .map_err(|e| AppError::Delivery(format!("dereferencing {uri}: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Delivery(format!(
                "dereferencing {uri}: status {}",
                response.status()
            )));
        }

        let model: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Delivery(format!("parsing {uri}: {e}")))?;

        self.state()
            .caches
            .dereference
            .insert(uri.to_string(), model.clone());
        Ok(model)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::processor::workertask::testing::in_memory_store;
    use crate::state::State;
    use pelago_common::config::WorkersConfig;
    use pelago_queue::Workers;

    fn test_processor() -> Arc<Processor> {
        let workers = Arc::new(Workers::new(&WorkersConfig::default()));
        let state = Arc::new(State::new(workers, in_memory_store()));
        Arc::new(Processor::new(state, reqwest::Client::new()))
    }

    #[tokio::test]
    async fn test_follow_queues_accept_delivery() {
        let processor = test_processor();

        let msg = InboxJob::new(
            ap::ACTIVITY_FOLLOW.to_string(),
            ap::OBJECT_PROFILE.to_string(),
            serde_json::json!({"id": "https://remote.example/follows/1"}),
        )
        .with_target_uri("https://remote.example/users/a/inbox")
        .with_requesting("https://remote.example/users/a")
        .with_receiving("01HGW");

        processor.process_from_fedi_api(msg).await.unwrap();

        let queued = processor.state().workers.delivery.queue().try_pop().unwrap();
        assert_eq!(queued.inbox, "https://remote.example/users/a/inbox");
        assert_eq!(queued.activity["type"], "Accept");
    }

    #[tokio::test]
    async fn test_create_by_reference_queues_dereference() {
        let processor = test_processor();

        let msg = InboxJob::new(
            ap::ACTIVITY_CREATE.to_string(),
            ap::OBJECT_NOTE.to_string(),
            serde_json::json!("https://remote.example/notes/1"),
        );

        processor.process_from_fedi_api(msg).await.unwrap();

        let job = processor
            .state()
            .workers
            .dereference
            .queue()
            .try_pop()
            .unwrap();
        assert!(job.desc().contains("https://remote.example/notes/1"));
    }

    #[tokio::test]
    async fn test_embedded_create_is_terminal() {
        let processor = test_processor();

        let msg = InboxJob::new(
            ap::ACTIVITY_CREATE.to_string(),
            ap::OBJECT_NOTE.to_string(),
            serde_json::json!({"content": "hello"}),
        );

        processor.process_from_fedi_api(msg).await.unwrap();

        assert!(processor.state().workers.dereference.queue().is_empty());
        assert!(processor.state().workers.delivery.queue().is_empty());
    }

    #[tokio::test]
    async fn test_dereference_uses_cache() {
        let processor = test_processor();
        let uri = "https://remote.example/notes/9";

        processor
            .state()
            .caches
            .dereference
            .insert(uri.to_string(), serde_json::json!({"id": uri}));

        // Served from cache; no network involved.
        let model = processor.dereference(uri).await.unwrap();
        assert_eq!(model["id"], uri);
    }
}
