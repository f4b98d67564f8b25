//! Deliver worker.
//!
//! Processing function for the delivery pipeline: signs the activity with
//! the sending actor's key (or the instance key) and POSTs it to the remote
//! inbox. Transient failures re-enter the queue with exponential backoff;
//! permanent failures and exhausted retries are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use rsa::RsaPrivateKey;
use tracing::{debug, info, warn};
use url::Url;

use pelago_common::metrics::DeliveryOutcome;
use pelago_common::{AppError, AppResult, calculate_digest, get_metrics, sign_request};

use crate::jobs::DeliverJob;
use crate::queue::TaskQueue;
use crate::retry::{RetryConfig, is_permanent_status};

/// Headers covered by the outbound HTTP signature.
const SIGNED_HEADERS: &[&str] = &["(request-target)", "host", "date", "digest"];

/// Signs outbound requests with the instance actor's key.
pub struct RequestSigner {
    private_key: RsaPrivateKey,
    key_id: String,
}

impl RequestSigner {
    /// Create a signer from a parsed private key and its public key ID.
    #[must_use]
    pub const fn new(private_key: RsaPrivateKey, key_id: String) -> Self {
        Self {
            private_key,
            key_id,
        }
    }

    /// Produce a `Signature` header value for the given request.
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        headers: &HashMap<String, String>,
    ) -> AppResult<String> {
        sign_request(
            &self.private_key,
            &self.key_id,
            method,
            path,
            headers,
            SIGNED_HEADERS,
        )
    }
}

/// Context shared by all delivery workers.
///
/// The HTTP client is shared across the pool's workers; connection reuse
/// against frequently-delivered-to instances comes from its internal pool.
pub struct DeliverContext {
    /// Shared outbound HTTP client.
    pub http_client: Client,
    /// Request signer.
    pub signer: Arc<RequestSigner>,
    /// User-Agent header for outbound requests.
    pub user_agent: String,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
    queue: TaskQueue<DeliverJob>,
}

impl DeliverContext {
    /// Create a new deliver context. `queue` is the delivery pipeline's own
    /// queue, used to re-push retried jobs.
    ///
    /// # Panics
    /// Panics if the HTTP client fails to build.
    #[must_use]
    #[allow(clippy::expect_used)] // Client build only fails with incompatible TLS settings
    pub fn new(
        signer: Arc<RequestSigner>,
        user_agent: String,
        retry: RetryConfig,
        queue: TaskQueue<DeliverJob>,
    ) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            signer,
            user_agent,
            retry,
            queue,
        }
    }
}

/// Worker function for delivering activities.
///
/// # Errors
/// Returns an error for permanent failures and exhausted retries; transient
/// failures are handled by re-queueing and return `Ok`.
pub async fn deliver_worker(job: DeliverJob, ctx: Arc<DeliverContext>) -> AppResult<()> {
    debug!(
        inbox = %job.inbox,
        attempts = job.attempts,
        "Delivering activity"
    );

    match attempt_delivery(&job, &ctx).await {
        Ok(()) => {
            get_metrics().record_delivery(DeliveryOutcome::Succeeded);
            info!(inbox = %job.inbox, "Activity delivered");
            Ok(())
        }
        Err(Attempt::Permanent(detail)) => {
            get_metrics().record_delivery(DeliveryOutcome::Dropped);
            Err(AppError::Delivery(detail))
        }
        Err(Attempt::Transient(detail)) => {
            if ctx.retry.should_retry(job.attempts) {
                let delay = ctx.retry.delay_for_attempt(job.attempts);
                warn!(
                    inbox = %job.inbox,
                    attempts = job.attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %detail,
                    "Delivery failed; scheduling retry"
                );
                get_metrics().record_delivery(DeliveryOutcome::Retried);

                let queue = ctx.queue.clone();
                let mut retried = job;
                retried.attempts += 1;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.push(retried);
                });
                Ok(())
            } else {
                get_metrics().record_delivery(DeliveryOutcome::Dropped);
                Err(AppError::Delivery(format!(
                    "giving up after {} attempts: {detail}",
                    job.attempts + 1
                )))
            }
        }
    }
}

/// How a single delivery attempt failed.
enum Attempt {
    /// Do not retry.
    Permanent(String),
    /// Worth retrying with backoff.
    Transient(String),
}

async fn attempt_delivery(job: &DeliverJob, ctx: &DeliverContext) -> Result<(), Attempt> {
    let inbox_url = Url::parse(&job.inbox)
        .map_err(|e| Attempt::Permanent(format!("invalid inbox URL: {e}")))?;
    let host = inbox_url
        .host_str()
        .ok_or_else(|| Attempt::Permanent("invalid inbox URL: no host".to_string()))?
        .to_string();
    let path = inbox_url.path().to_string();

    let body = serde_json::to_vec(&job.activity)
        .map_err(|e| Attempt::Permanent(format!("unserializable activity: {e}")))?;

    let digest = calculate_digest(&body);
    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

    let mut headers = HashMap::new();
    headers.insert("host".to_string(), host.clone());
    headers.insert("date".to_string(), date.clone());
    headers.insert("digest".to_string(), digest.clone());

    let signature = ctx
        .signer
        .sign("POST", &path, &headers)
        .map_err(|e| Attempt::Permanent(format!("signing failed: {e}")))?;

    let response = ctx
        .http_client
        .post(&job.inbox)
        .header("Host", host)
        .header("Date", date)
        .header("Digest", digest)
        .header("Signature", signature)
        .header("Content-Type", "application/activity+json")
        .header("Accept", "application/activity+json")
        .header("User-Agent", &ctx.user_agent)
        .body(body)
        .send()
        .await
        .map_err(|e| Attempt::Transient(format!("request failed: {e}")))?;

    let status = response.status();

    if status.is_success() {
        Ok(())
    } else if status.as_u16() == 410 {
        // Gone: the remote actor was deleted, nothing left to deliver to.
        warn!(inbox = %job.inbox, "Remote actor gone (410)");
        Ok(())
    } else {
        let detail = response.text().await.unwrap_or_default();
        if is_permanent_status(status.as_u16()) {
            Err(Attempt::Permanent(format!("client error {status}: {detail}")))
        } else {
            Err(Attempt::Transient(format!("server error {status}: {detail}")))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pelago_common::{generate_rsa_keypair, parse_private_key};

    fn test_signer() -> Arc<RequestSigner> {
        let keypair = generate_rsa_keypair().unwrap();
        let private_key = parse_private_key(&keypair.private_key_pem).unwrap();
        Arc::new(RequestSigner::new(
            private_key,
            "https://local.example/actor#main-key".to_string(),
        ))
    }

    #[tokio::test]
    async fn test_invalid_inbox_is_permanent() {
        let queue = TaskQueue::new();
        let ctx = DeliverContext::new(
            test_signer(),
            "pelago-test".to_string(),
            RetryConfig::default(),
            queue.clone(),
        );
        let job = DeliverJob::new(None, "not a url".to_string(), serde_json::json!({}));

        let result = deliver_worker(job, Arc::new(ctx)).await;

        assert!(result.is_err());
        // Permanent failures are never re-queued.
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_with_bumped_attempts() {
        let queue = TaskQueue::new();
        let retry = RetryConfig {
            initial_delay: std::time::Duration::from_millis(10),
            ..Default::default()
        };
        let ctx = DeliverContext::new(
            test_signer(),
            "pelago-test".to_string(),
            retry,
            queue.clone(),
        );
        // Nothing listens on this port; connection errors are transient.
        let job = DeliverJob::new(
            None,
            "http://127.0.0.1:1/inbox".to_string(),
            serde_json::json!({}),
        );

        let result = deliver_worker(job, Arc::new(ctx)).await;
        assert!(result.is_ok());

        // Wait for the backoff timer to re-push.
        let retried = tokio::time::timeout(std::time::Duration::from_secs(5), queue.pop())
            .await
            .unwrap();
        assert_eq!(retried.attempts, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dropped() {
        let queue = TaskQueue::new();
        let retry = RetryConfig {
            max_retries: 2,
            ..Default::default()
        };
        let ctx = DeliverContext::new(
            test_signer(),
            "pelago-test".to_string(),
            retry,
            queue.clone(),
        );
        let mut job = DeliverJob::new(
            None,
            "http://127.0.0.1:1/inbox".to_string(),
            serde_json::json!({}),
        );
        job.attempts = 2;

        let result = deliver_worker(job, Arc::new(ctx)).await;

        assert!(result.is_err());
        assert!(queue.is_empty());
    }
}
