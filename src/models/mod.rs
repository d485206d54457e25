// Persistent entity models for the five store collections, plus the webhook
// payload shapes shared by the intake pipeline and the confirmation tracker.

use mongodb::bson::Document;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as unix-epoch milliseconds. All persisted
/// timestamps use this representation.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A curated address the service watches for on-chain activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedAddress {
    #[serde(rename = "_id")]
    pub address: String,
    pub active: bool,
    pub created_at: i64,
    #[serde(default)]
    pub last_activity: Option<i64>,
    #[serde(default)]
    pub transaction_count: i64,
    #[serde(default)]
    pub historical_fetched: bool,
    #[serde(default)]
    pub historical_fetched_at: Option<i64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub metadata: Option<Document>,
}

impl WatchedAddress {
    pub fn new(address: String, label: Option<String>) -> Self {
        Self {
            address,
            active: true,
            created_at: now_ms(),
            last_activity: None,
            transaction_count: 0,
            historical_fetched: false,
            historical_fetched_at: None,
            label,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirming,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirming => "confirming",
        }
    }
}

/// A transaction still moving through the confirmation lifecycle.
///
/// `status = pending` iff the transaction has no known block; `confirming`
/// records always carry `block_height`, `block_hash` and at least one
/// confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTransaction {
    #[serde(rename = "_id")]
    pub txid: String,
    pub addresses: Vec<String>,
    #[serde(default)]
    pub block_height: Option<i64>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub confirmations: i64,
    pub first_seen: i64,
    pub status: TxStatus,
    #[serde(default)]
    pub is_historical: bool,
    #[serde(default)]
    pub last_verified: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
}

/// Terminal mirror of an [`ActiveTransaction`] once it crossed the archive
/// threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedTransaction {
    #[serde(rename = "_id")]
    pub txid: String,
    pub addresses: Vec<String>,
    pub block_height: i64,
    /// Absent only on historical records merged from the explorer, which
    /// does not serve block hashes.
    #[serde(default)]
    pub block_hash: Option<String>,
    pub final_confirmations: i64,
    pub first_seen: i64,
    pub is_historical: bool,
    pub archived_at: i64,
    pub archive_height: i64,
}

/// A registered webhook endpoint. `monitor_all = true` implies an empty
/// `addresses` set and delivery of every tracked transaction event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(rename = "_id")]
    pub id: String,
    pub url: String,
    pub addresses: Vec<String>,
    pub monitor_all: bool,
    pub active: bool,
    pub created_at: i64,
    #[serde(default)]
    pub trigger_count: i64,
    #[serde(default)]
    pub last_triggered: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Retry,
    Completed,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Processing => "processing",
            DeliveryStatus::Retry => "retry",
            DeliveryStatus::Completed => "completed",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled deliveries never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Completed | DeliveryStatus::Failed | DeliveryStatus::Cancelled
        )
    }
}

/// A single queued webhook POST. Queue state is persisted so retries
/// survive a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    #[serde(rename = "_id")]
    pub id: String,
    pub webhook_id: String,
    pub url: String,
    pub payload: Document,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub attempts: i64,
    pub next_retry: i64,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub last_attempt: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub failed_at: Option<i64>,
    #[serde(default)]
    pub cancelled_at: Option<i64>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub response_status: Option<i32>,
    #[serde(default)]
    pub response_body: Option<String>,
}

/// Transaction snapshot carried inside a webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadTransaction {
    #[serde(rename = "_id")]
    pub txid: String,
    pub addresses: Vec<String>,
    pub confirmations: i64,
    pub status: String,
    pub block_height: Option<i64>,
    pub block_hash: Option<String>,
    pub first_seen: i64,
}

impl PayloadTransaction {
    pub fn from_active(tx: &ActiveTransaction) -> Self {
        Self {
            txid: tx.txid.clone(),
            addresses: tx.addresses.clone(),
            confirmations: tx.confirmations,
            status: tx.status.as_str().to_string(),
            block_height: tx.block_height,
            block_hash: tx.block_hash.clone(),
            first_seen: tx.first_seen,
        }
    }
}

/// Body POSTed to a webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub timestamp: i64,
    pub transaction: PayloadTransaction,
    pub changes: Document,
}
