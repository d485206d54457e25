// Webhook event fan-out and the durable delivery queue processor.
//
// Enqueueing coalesces: a fresh event for a (webhook, transaction) pair
// cancels every older non-terminal delivery for that pair, so endpoints only
// ever receive the newest state. Delivery state is persisted and survives a
// restart; the in-process loop just drains it.

use mongodb::bson::{oid::ObjectId, to_document, Document};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{webhook as webhook_db, Db, StoreError};
use crate::models::{
    now_ms, ActiveTransaction, DeliveryStatus, PayloadTransaction, Webhook, WebhookDelivery,
    WebhookPayload,
};

/// Failure backoff schedule. Attempts beyond the table reuse the last slot.
const BACKOFF: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(30),
    Duration::from_secs(300),
    Duration::from_secs(3600),
];

/// How much of a 2xx response body is kept on the delivery record.
const RESPONSE_BODY_CAP: usize = 1024;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Delay before the next attempt after `attempts` failures.
pub fn retry_backoff(attempts: i64) -> Duration {
    let index = (attempts - 1).clamp(0, BACKOFF.len() as i64 - 1) as usize;
    BACKOFF[index]
}

/// The address list delivered to a webhook: the full set for monitor-all
/// hooks, the intersection with the hook's own set otherwise.
pub fn filter_payload_addresses(webhook: &Webhook, addresses: &[String]) -> Vec<String> {
    if webhook.monitor_all {
        return addresses.to_vec();
    }
    addresses
        .iter()
        .filter(|a| webhook.addresses.contains(a))
        .cloned()
        .collect()
}

/// Build the payload body for one webhook and transaction state.
pub fn build_payload(
    webhook: &Webhook,
    tx: &ActiveTransaction,
    changes: Document,
) -> WebhookPayload {
    let mut transaction = PayloadTransaction::from_active(tx);
    transaction.addresses = filter_payload_addresses(webhook, &tx.addresses);
    WebhookPayload {
        timestamp: now_ms(),
        transaction,
        changes,
    }
}

/// Queue one delivery for one webhook, superseding older pending updates
/// for the same transaction.
pub async fn enqueue(
    db: &Db,
    webhook: &Webhook,
    tx: &ActiveTransaction,
    changes: Document,
) -> Result<(), StoreError> {
    let payload = build_payload(webhook, tx, changes);
    let created_at = payload.timestamp;

    // The fresh delivery is not inserted yet, so every non-terminal entry
    // for this pair is by definition older.
    let cancelled = webhook_db::cancel_pending_for_pair(db, &webhook.id, &tx.txid).await?;
    if cancelled > 0 {
        debug!(
            "Superseded {} older deliveries for webhook {} tx {}",
            cancelled, webhook.id, tx.txid
        );
    }

    let delivery = WebhookDelivery {
        id: ObjectId::new().to_hex(),
        webhook_id: webhook.id.clone(),
        url: webhook.url.clone(),
        payload: to_document(&payload)
            .map_err(|e| StoreError::Backend(mongodb::error::Error::custom(e.to_string())))?,
        transaction_id: Some(tx.txid.clone()),
        status: DeliveryStatus::Pending,
        attempts: 0,
        next_retry: created_at,
        last_error: None,
        created_at,
        last_attempt: None,
        completed_at: None,
        failed_at: None,
        cancelled_at: None,
        cancel_reason: None,
        response_status: None,
        response_body: None,
    };
    webhook_db::insert_delivery(db, &delivery).await?;
    webhook_db::bump_trigger(db, &webhook.id).await?;
    Ok(())
}

/// Fan one transaction event out to every matching active webhook.
pub async fn notify_transaction(
    db: &Db,
    tx: &ActiveTransaction,
    changes: Document,
) -> Result<usize, StoreError> {
    let hooks = webhook_db::matching(db, &tx.addresses).await?;
    let mut enqueued = 0;
    for hook in &hooks {
        match enqueue(db, hook, tx, changes.clone()).await {
            Ok(()) => enqueued += 1,
            Err(e) => warn!("Failed to enqueue delivery for webhook {}: {}", hook.id, e),
        }
    }
    Ok(enqueued)
}

pub struct WebhookDispatcher {
    db: Db,
    http: reqwest::Client,
    batch_size: i64,
    interval: Duration,
    timeout: Duration,
    max_retries: i64,
    cleanup_after: Duration,
    in_progress: AtomicBool,
    last_cleanup: Mutex<i64>,
}

impl WebhookDispatcher {
    pub fn new(db: Db, config: &Config) -> Self {
        Self {
            db,
            http: reqwest::Client::new(),
            batch_size: config.webhook_batch_size,
            interval: config.webhook_processing_interval,
            timeout: config.webhook_timeout,
            max_retries: config.webhook_max_retries,
            cleanup_after: Duration::from_secs(
                config.webhook_cleanup_days.max(0) as u64 * 24 * 60 * 60,
            ),
            in_progress: AtomicBool::new(false),
            last_cleanup: Mutex::new(0),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            "Webhook dispatcher started (batch {}, interval {:?})",
            self.batch_size, self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.process_queue().await {
                        error!("Webhook queue processing failed: {}", e);
                    }
                    self.maybe_cleanup().await;
                }
                _ = shutdown.cancelled() => {
                    info!("Webhook dispatcher shutting down");
                    break;
                }
            }
        }
    }

    /// Claim and deliver up to one batch of due entries. Overlapping wake-ups
    /// are dropped.
    pub async fn process_queue(&self) -> Result<usize, StoreError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(0);
        }
        let result = self.drain_batch().await;
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn drain_batch(&self) -> Result<usize, StoreError> {
        let mut delivered = 0;
        for _ in 0..self.batch_size {
            let Some(delivery) = webhook_db::claim_due(&self.db, now_ms()).await? else {
                break;
            };

            // Claim-time supersession pass to absorb enqueue races.
            if let Some(txid) = delivery.transaction_id.clone() {
                webhook_db::cancel_superseded(
                    &self.db,
                    &delivery.webhook_id,
                    &txid,
                    delivery.created_at,
                )
                .await?;
                if webhook_db::newer_pending_exists(
                    &self.db,
                    &delivery.webhook_id,
                    &txid,
                    delivery.created_at,
                )
                .await?
                {
                    webhook_db::mark_cancelled(&self.db, &delivery.id, "superseded").await?;
                    continue;
                }
            }

            self.deliver(&delivery).await?;
            delivered += 1;
        }
        Ok(delivered)
    }

    async fn deliver(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        debug!(
            "Delivering webhook {} (attempt {})",
            delivery.id,
            delivery.attempts + 1
        );
        let result = self
            .http
            .post(&delivery.url)
            .timeout(self.timeout)
            .json(&delivery.payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                let status = response.status().as_u16() as i32;
                let mut body = response.text().await.unwrap_or_default();
                body.truncate(RESPONSE_BODY_CAP);
                webhook_db::mark_completed(&self.db, &delivery.id, status, &body).await?;
                debug!("Delivery {} completed with status {}", delivery.id, status);
            }
            Ok(response) => {
                let error = format!("endpoint returned status {}", response.status());
                self.record_failure(delivery, &error).await?;
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.to_string()
                };
                self.record_failure(delivery, &error).await?;
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        delivery: &WebhookDelivery,
        error: &str,
    ) -> Result<(), StoreError> {
        let attempts = delivery.attempts + 1;
        if attempts >= self.max_retries {
            warn!(
                "Delivery {} failed permanently after {} attempts: {}",
                delivery.id, attempts, error
            );
            webhook_db::mark_failed(&self.db, &delivery.id, attempts, error).await?;
        } else {
            let next_retry = now_ms() + retry_backoff(attempts).as_millis() as i64;
            debug!(
                "Delivery {} failed (attempt {}), retrying at {}: {}",
                delivery.id, attempts, next_retry, error
            );
            webhook_db::mark_retry(&self.db, &delivery.id, attempts, next_retry, error).await?;
        }
        Ok(())
    }

    /// Daily sweep of terminal queue records.
    async fn maybe_cleanup(&self) {
        let now = now_ms();
        let mut last = self.last_cleanup.lock().await;
        if now - *last < CLEANUP_INTERVAL.as_millis() as i64 {
            return;
        }
        *last = now;
        drop(last);

        let cutoff = now - self.cleanup_after.as_millis() as i64;
        match webhook_db::cleanup_terminal(&self.db, cutoff).await {
            Ok(0) => {}
            Ok(deleted) => info!("Cleaned up {} terminal webhook deliveries", deleted),
            Err(e) => error!("Webhook cleanup failed: {}", e),
        }
    }
}
