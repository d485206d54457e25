// Realtime transaction intake: every rawtx frame from the node is decoded,
// pre-screened against the in-memory membership set, confirmed against the
// store and recorded as a pending active transaction.
//
// Failures are per-frame: the frame is logged and dropped, the loop keeps
// running. A dropped frame self-heals on the next block-driven verification.

use mongodb::bson::doc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{address as address_db, transaction as tx_db, StoreError};
use crate::models::now_ms;
use crate::parser::{self, ParseError};
use crate::state::AppState;
use crate::webhook;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one frame, for logging and tests.
#[derive(Debug, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// No watched address involved.
    Ignored,
    /// Recorded (or re-recorded) under this txid.
    Recorded(String),
}

/// Entry point for the rawtx ZMQ loop. Never fails; errors are logged.
pub async fn handle_raw_tx(state: &AppState, bytes: &[u8]) {
    match process_raw_tx(state, bytes).await {
        Ok(IntakeOutcome::Recorded(txid)) => {
            info!("Recorded transaction {}", txid);
        }
        Ok(IntakeOutcome::Ignored) => {}
        Err(IntakeError::Parse(e)) => {
            warn!("Dropping undecodable transaction frame: {}", e);
        }
        Err(IntakeError::Store(e)) => {
            warn!("Store error during intake, frame dropped: {}", e);
        }
    }
}

pub async fn process_raw_tx(state: &AppState, bytes: &[u8]) -> Result<IntakeOutcome, IntakeError> {
    let extracted = parser::extract_addresses(
        bytes,
        state.config.network,
        state.config.max_tx_size_bytes,
    )?;

    // O(1) pre-screen before any store round trip.
    let candidates = state
        .membership
        .filter(extracted.all_addresses.iter().map(String::as_str))
        .await;
    if candidates.is_empty() {
        return Ok(IntakeOutcome::Ignored);
    }

    // The membership set may be stale-positive; the store is authoritative.
    let tracked = address_db::find_active(&state.db, &candidates).await?;
    if tracked.is_empty() {
        debug!(
            "Membership match for {} resolved to no active addresses",
            extracted.txid
        );
        return Ok(IntakeOutcome::Ignored);
    }
    let tracked_ids: Vec<String> = tracked.into_iter().map(|a| a.address).collect();

    let now = now_ms();
    let tx = tx_db::upsert_from_intake(&state.db, &extracted.txid, &tracked_ids, now).await?;
    address_db::record_activity(&state.db, &tracked_ids, now).await?;

    debug!(
        "Transaction {} touches {} watched addresses",
        tx.txid,
        tracked_ids.len()
    );

    if state.config.enable_webhooks {
        let enqueued =
            webhook::notify_transaction(&state.db, &tx, doc! { "status": "new" }).await?;
        if enqueued > 0 {
            debug!("Enqueued {} webhook deliveries for {}", enqueued, tx.txid);
        }
    }

    Ok(IntakeOutcome::Recorded(tx.txid))
}
