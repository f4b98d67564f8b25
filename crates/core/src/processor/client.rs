//! Client API side-effect routing.
//!
//! Applying an action to local state happens before the message is queued;
//! what remains here is fan-out: wrapping the model in an activity and
//! handing it to the delivery pipeline.

use std::sync::Arc;

use tracing::debug;

use pelago_common::AppResult;
use pelago_queue::jobs::ap;
use pelago_queue::{ClientJob, DeliverJob};

use super::Processor;

pub(super) async fn process(processor: &Arc<Processor>, msg: ClientJob) -> AppResult<()> {
    match msg.activity_type.as_str() {
        ap::ACTIVITY_CREATE
        | ap::ACTIVITY_UPDATE
        | ap::ACTIVITY_DELETE
        | ap::ACTIVITY_LIKE
        | ap::ACTIVITY_ANNOUNCE
        | ap::ACTIVITY_FOLLOW
        | ap::ACTIVITY_UNDO => federate_out(processor, msg),
        other => {
            debug!(activity = other, "Unhandled client activity");
            Ok(())
        }
    }
}

/// Wrap the model in an activity envelope and queue delivery to the target
/// inbox. Without a target there is nowhere to federate to.
fn federate_out(processor: &Arc<Processor>, msg: ClientJob) -> AppResult<()> {
    let Some(inbox) = msg.target_uri else {
        debug!(
            activity = %msg.activity_type,
            object = %msg.object_type,
            "No target inbox, nothing to federate"
        );
        return Ok(());
    };

    let actor_id = msg.origin_id.clone();
    let activity = serde_json::json!({
        "type": msg.activity_type,
        "actor": msg.origin_id,
        "object": msg.model,
    });

    processor
        .state()
        .workers
        .delivery
        .queue()
        .push(DeliverJob::new(actor_id, inbox, activity));

    Ok(())
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
    async fn test_create_fans_out_to_delivery() {
        let processor = test_processor();

        let msg = ClientJob::new(
            ap::ACTIVITY_CREATE.to_string(),
            ap::OBJECT_NOTE.to_string(),
            serde_json::json!({"content": "hello"}),
        )
        .with_target_uri("https://remote.example/inbox")
        .with_origin("01HGW");

        processor.process_from_client_api(msg).await.unwrap();

        let queued = processor.state().workers.delivery.queue().try_pop().unwrap();
        assert_eq!(queued.inbox, "https://remote.example/inbox");
        assert_eq!(queued.actor_id.as_deref(), Some("01HGW"));
        assert_eq!(queued.activity["type"], "Create");
    }

    #[tokio::test]
    async fn test_no_target_is_noop() {
        let processor = test_processor();

        let msg = ClientJob::new(
            ap::ACTIVITY_LIKE.to_string(),
            ap::OBJECT_NOTE.to_string(),
            serde_json::json!({}),
        );

        processor.process_from_client_api(msg).await.unwrap();

        assert!(processor.state().workers.delivery.queue().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_activity_is_noop() {
        let processor = test_processor();

        let msg = ClientJob::new(
            "Arrive".to_string(),
            ap::OBJECT_NOTE.to_string(),
            serde_json::json!({}),
        )
        .with_target_uri("https://remote.example/inbox");

        processor.process_from_client_api(msg).await.unwrap();

        assert!(processor.state().workers.delivery.queue().is_empty());
    }
}
