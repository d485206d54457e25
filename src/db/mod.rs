pub mod address;
pub mod connection;
pub mod transaction;
pub mod webhook;

pub use connection::Db;

use mongodb::bson::doc;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::IndexModel;
use thiserror::Error;
use tracing::info;

pub const TRACKED_ADDRESSES: &str = "trackedAddresses";
pub const ACTIVE_TRANSACTIONS: &str = "activeTransactions";
pub const ARCHIVED_TRANSACTIONS: &str = "archivedTransactions";
pub const WEBHOOKS: &str = "webhooks";
pub const WEBHOOK_QUEUE: &str = "webhookQueue";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store error: {0}")]
    Backend(#[from] mongodb::error::Error),
}

const DUPLICATE_KEY: i32 = 11000;

/// Duplicate primary keys are an expected race outcome on upserts and
/// unordered bulk inserts, not a failure.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == DUPLICATE_KEY,
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .as_ref()
            .map(|errors| errors.iter().all(|e| e.code == DUPLICATE_KEY))
            .unwrap_or(false),
        _ => false,
    }
}

/// Create the secondary indexes every collection relies on. Safe to run on
/// every startup; index creation is idempotent.
pub async fn ensure_indexes(db: &Db) -> Result<(), StoreError> {
    info!("Ensuring store indexes");

    let addresses = db.addresses();
    for keys in [
        doc! { "active": 1 },
        doc! { "historical_fetched": 1 },
        doc! { "active": 1, "historical_fetched": 1 },
    ] {
        addresses
            .create_index(IndexModel::builder().keys(keys).build(), None)
            .await?;
    }

    let active = db.active_txs();
    for keys in [
        doc! { "addresses": 1 },
        doc! { "status": 1 },
        doc! { "block_height": 1 },
        doc! { "status": 1, "block_height": 1 },
        doc! { "first_seen": -1 },
    ] {
        active
            .create_index(IndexModel::builder().keys(keys).build(), None)
            .await?;
    }

    let archived = db.archived_txs();
    for keys in [
        doc! { "addresses": 1 },
        doc! { "archived_at": -1 },
        doc! { "block_height": 1 },
    ] {
        archived
            .create_index(IndexModel::builder().keys(keys).build(), None)
            .await?;
    }

    let queue = db.webhook_queue();
    for keys in [
        doc! { "webhook_id": 1, "transaction_id": 1, "status": 1 },
        doc! { "status": 1, "next_retry": 1 },
    ] {
        queue
            .create_index(IndexModel::builder().keys(keys).build(), None)
            .await?;
    }

    Ok(())
}
