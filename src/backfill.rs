// Historical backfill: newly registered addresses are enriched with their
// confirmed history from the block explorer, without duplicating anything
// the realtime pipeline already recorded.
//
// Runs per address, from three triggers: registration, an operator-forced
// refetch, and the startup sweep over addresses never fetched.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::{address as address_db, transaction as tx_db, StoreError};
use crate::explorer::{self, ExplorerError, HistoryItem};
use crate::models::{now_ms, ActiveTransaction, ArchivedTransaction, TxStatus};
use crate::state::AppState;

#[derive(Error, Debug)]
pub enum BackfillError {
    #[error(transparent)]
    Explorer(#[from] ExplorerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default)]
pub struct BackfillOutcome {
    pub fetched: usize,
    pub merged_active: usize,
    pub merged_archived: usize,
    pub skipped: usize,
}

/// Where one history entry lands: still tracked, or straight to the
/// archive.
#[derive(Debug, Clone)]
pub enum MergedRecord {
    Active(ActiveTransaction),
    Archived(ArchivedTransaction),
}

/// Classify one explorer history entry under the current tip. Pure; the
/// caller handles persistence.
///
/// With the tip unknown (0) every record enters as pending. Confirmed
/// records below the archive threshold enter as confirming; the first
/// verification cycle fills in the block hash.
pub fn classify_history_item(
    item: &HistoryItem,
    address: &str,
    tip_height: u64,
    archive_threshold: i64,
    now: i64,
) -> MergedRecord {
    let confirmations = if tip_height > 0 && item.height > 0 {
        (tip_height as i64 - item.height + 1).max(0)
    } else {
        0
    };
    let first_seen = item.time.map(|t| t * 1000).unwrap_or(now);

    if confirmations >= archive_threshold {
        return MergedRecord::Archived(ArchivedTransaction {
            txid: item.tx_hash.clone(),
            addresses: vec![address.to_string()],
            block_height: item.height,
            block_hash: None,
            final_confirmations: confirmations,
            first_seen,
            is_historical: true,
            archived_at: now,
            archive_height: tip_height as i64,
        });
    }

    let confirmed = confirmations > 0;
    MergedRecord::Active(ActiveTransaction {
        txid: item.tx_hash.clone(),
        addresses: vec![address.to_string()],
        block_height: confirmed.then_some(item.height),
        block_hash: None,
        block_time: None,
        confirmations,
        first_seen,
        status: if confirmed {
            TxStatus::Confirming
        } else {
            TxStatus::Pending
        },
        is_historical: true,
        last_verified: None,
        hex: None,
    })
}

/// Fetch and merge the confirmed history of one address. Idempotent:
/// transactions already present in either collection are skipped, and
/// duplicate-key races on insert are survivable.
pub async fn backfill_address(
    state: &AppState,
    address: &str,
) -> Result<BackfillOutcome, BackfillError> {
    let history = explorer::paginate(
        state.explorer.as_ref(),
        address,
        state.config.max_history_per_address,
    )
    .await?;

    let mut outcome = BackfillOutcome {
        fetched: history.len(),
        ..Default::default()
    };

    if !history.is_empty() {
        // One tip read per batch; failure degrades every record to pending
        // and the tracker repairs them later.
        let tip_height = match state.node.get_block_count().await {
            Ok(tip) => tip,
            Err(e) => {
                warn!("Tip unavailable during backfill of {}: {}", address, e);
                0
            }
        };

        let txids: Vec<String> = history.iter().map(|item| item.tx_hash.clone()).collect();
        let existing = tx_db::existing_txids(&state.db, &txids).await?;

        let now = now_ms();
        let mut active_records = Vec::new();
        let mut archived_records = Vec::new();
        for item in &history {
            if existing.contains(&item.tx_hash) {
                outcome.skipped += 1;
                continue;
            }
            match classify_history_item(
                item,
                address,
                tip_height,
                state.config.archive_threshold,
                now,
            ) {
                MergedRecord::Active(tx) => active_records.push(tx),
                MergedRecord::Archived(tx) => archived_records.push(tx),
            }
        }

        outcome.merged_active = tx_db::insert_active_many(&state.db, &active_records).await?;
        outcome.merged_archived =
            tx_db::insert_archived_many(&state.db, &archived_records).await?;
    }

    // Marked even on empty history; only unrecoverable explorer errors
    // leave the flag unset so the next startup retries.
    address_db::mark_historical_fetched(&state.db, address).await?;

    info!(
        "Backfilled {}: {} fetched, {} active, {} archived, {} already known",
        address, outcome.fetched, outcome.merged_active, outcome.merged_archived, outcome.skipped
    );
    Ok(outcome)
}

/// Backfill a batch of addresses sequentially, logging and advancing on
/// per-address failures.
pub async fn backfill_many(state: &AppState, addresses: &[String]) {
    for address in addresses {
        if let Err(e) = backfill_address(state, address).await {
            error!("Backfill of {} failed: {}", address, e);
        }
    }
}

/// Startup sweep: every active address whose history was never fetched.
pub async fn run_startup_sweep(state: Arc<AppState>) {
    let pending = match address_db::unfetched_active_ids(&state.db).await {
        Ok(ids) => ids,
        Err(e) => {
            error!("Failed to scan for unfetched addresses: {}", e);
            return;
        }
    };
    if pending.is_empty() {
        return;
    }
    info!(
        "Startup backfill sweep covering {} addresses",
        pending.len()
    );
    backfill_many(&state, &pending).await;
}
