//! Web push worker.
//!
//! Processing function for the web push pipeline. Fan-out is disabled when
//! no VAPID key is configured; jobs are then quietly dropped.

use std::sync::Arc;

use tracing::{debug, warn};
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder,
};

use pelago_common::config::WebPushConfig;
use pelago_common::{AppError, AppResult, get_metrics};

use crate::jobs::WebPushJob;

/// Context shared by all web push workers.
pub struct WebPushContext {
    client: IsahcWebPushClient,
    vapid_private_key: Option<String>,
    contact: Option<String>,
}

impl WebPushContext {
    /// Create a web push context from configuration.
    pub fn new(config: &WebPushConfig) -> AppResult<Self> {
        Ok(Self {
            client: IsahcWebPushClient::new()
                .map_err(|e| AppError::Internal(format!("Failed to create push client: {e}")))?,
            vapid_private_key: config.vapid_private_key.clone(),
            contact: config.contact.clone(),
        })
    }

    /// Whether push fan-out is enabled.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.vapid_private_key.is_some()
    }
}

/// Worker function for sending push notifications.
///
/// # Errors
/// Returns an error if the push service rejects the message for a reason
/// other than an expired subscription.
pub async fn web_push_worker(job: WebPushJob, ctx: Arc<WebPushContext>) -> AppResult<()> {
    let Some(ref vapid_key) = ctx.vapid_private_key else {
        debug!("Web push not configured, dropping notification");
        return Ok(());
    };

    let subscription = SubscriptionInfo::new(&job.endpoint, &job.p256dh, &job.auth);

    let mut signature = VapidSignatureBuilder::from_base64(vapid_key, &subscription)
        .map_err(|e| AppError::Delivery(format!("invalid VAPID key: {e}")))?;
    if let Some(ref contact) = ctx.contact {
        signature.add_claim("sub", contact.as_str());
    }
    let signature = signature
        .build()
        .map_err(|e| AppError::Delivery(format!("VAPID signing failed: {e}")))?;

    let payload = serde_json::to_vec(&job.payload)
        .map_err(|e| AppError::Delivery(format!("unserializable payload: {e}")))?;

    let mut builder = WebPushMessageBuilder::new(&subscription);
    builder.set_payload(ContentEncoding::Aes128Gcm, &payload);
    builder.set_vapid_signature(signature);
    let message = builder
        .build()
        .map_err(|e| AppError::Delivery(format!("building push message failed: {e}")))?;

    match ctx.client.send(message).await {
        Ok(()) => {
            get_metrics().record_push(true);
            debug!(endpoint = %job.endpoint, "Push notification sent");
            Ok(())
        }
        Err(WebPushError::EndpointNotValid(_) | WebPushError::EndpointNotFound(_)) => {
            // Expired or unsubscribed endpoint; nothing left to notify.
            warn!(endpoint = %job.endpoint, "Push endpoint gone");
            get_metrics().record_push(false);
            Ok(())
        }
        Err(e) => {
            get_metrics().record_push(false);
            Err(AppError::Delivery(format!("push send failed: {e}")))
        }
    }
}
