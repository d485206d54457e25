// Block-driven confirmation tracking.
//
// Every hashblock frame triggers one cycle: read the tip, re-verify active
// transactions through a bounded RPC pool, archive records that crossed the
// confirmation threshold, and drain the in-memory retry queue. Cycles are
// single-flight; frames arriving mid-cycle are dropped and subsumed by the
// next tip read.

use futures::future;
use mongodb::bson::{doc, Document};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{address as address_db, transaction as tx_db, Db};
use crate::models::{now_ms, ActiveTransaction, ArchivedTransaction, TxStatus};
use crate::node::{NodeClient, NodeError, RawTransactionInfo};
use crate::webhook;

/// Hard cap on RPC verifications submitted per cycle.
const PENDING_TX_LIMIT: usize = 50;

/// Pause between verification batches to cap burst rate on the node.
const INTER_BATCH_PAUSE: Duration = Duration::from_millis(200);

const RETRY_DELAY: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const RETRY_DRAIN_PER_CYCLE: usize = 10;

#[derive(Debug, Clone)]
struct RetryEntry {
    txid: String,
    attempts: u32,
    ready_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackerSnapshot {
    pub in_progress: bool,
    pub retry_queue_depth: usize,
    pub cycles: u64,
    pub last_tip: Option<u64>,
    pub last_cycle_at: Option<i64>,
    pub last_cycle_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleOutcome {
    pub triggered: bool,
    pub tip_height: u64,
    pub verified: usize,
    pub archived: usize,
    pub retried: usize,
}

/// What one verification result means for a stored record. Pure decision,
/// separated from the store write.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationPlan {
    /// Not in a block yet (or not yet visible under this tip).
    StillPending,
    /// In a block; record the position and confirmation count.
    Update {
        block_hash: String,
        block_height: i64,
        block_time: Option<i64>,
        confirmations: i64,
        status: TxStatus,
    },
    /// The block the record pointed at is gone; clear and start over.
    Reorged,
}

pub fn plan_verification(
    prev: &ActiveTransaction,
    info: &RawTransactionInfo,
    tip_height: u64,
) -> VerificationPlan {
    let Some(block_hash) = info.blockhash.clone() else {
        // Known block disappeared from the verbose result.
        if prev.block_hash.is_some() {
            return VerificationPlan::Reorged;
        }
        return VerificationPlan::StillPending;
    };

    if let Some(prev_hash) = &prev.block_hash {
        if *prev_hash != block_hash {
            return VerificationPlan::Reorged;
        }
    }

    // Prefer the explicit height; fall back to deriving it from the node's
    // own confirmation count.
    let block_height = match info.blockheight {
        Some(h) => h,
        None => match info.confirmations {
            Some(c) if c > 0 => tip_height as i64 - c + 1,
            _ => return VerificationPlan::StillPending,
        },
    };

    let confirmations = tip_height as i64 - block_height + 1;
    if confirmations < 1 {
        // The tip we read predates this block; pick it up next cycle.
        return VerificationPlan::StillPending;
    }

    VerificationPlan::Update {
        block_hash,
        block_height,
        block_time: info.blocktime,
        confirmations,
        status: TxStatus::Confirming,
    }
}

pub struct ConfirmationTracker {
    db: Db,
    node: Arc<dyn NodeClient>,
    archive_threshold: i64,
    scan_batch_size: i64,
    rpc_concurrency: usize,
    max_cached_hex_len: usize,
    enable_webhooks: bool,
    in_progress: AtomicBool,
    retry_queue: Mutex<VecDeque<RetryEntry>>,
    stats: RwLock<TrackerSnapshot>,
}

impl ConfirmationTracker {
    pub fn new(db: Db, node: Arc<dyn NodeClient>, config: &Config) -> Self {
        Self {
            db,
            node,
            archive_threshold: config.archive_threshold,
            scan_batch_size: config.confirmation_batch_size,
            rpc_concurrency: config.rpc_concurrency.max(1),
            max_cached_hex_len: config.max_tx_size_bytes.saturating_mul(2),
            enable_webhooks: config.enable_webhooks,
            in_progress: AtomicBool::new(false),
            retry_queue: Mutex::new(VecDeque::new()),
            stats: RwLock::new(TrackerSnapshot::default()),
        }
    }

    /// Entry point for hashblock frames and the manual trigger endpoint.
    /// A cycle already in flight makes this a no-op.
    pub async fn process_new_block(&self) -> Result<CycleOutcome, NodeError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Confirmation cycle already in progress, dropping trigger");
            return Ok(CycleOutcome::default());
        }
        let result = self.run_cycle().await;
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, NodeError> {
        let started = Instant::now();
        let tip_height = self.node.get_block_count().await?;
        debug!("Confirmation cycle at tip {}", tip_height);

        // Verification pool and archival sweep run concurrently; their
        // writes target disjoint primary keys.
        let (verified, archived) =
            tokio::join!(self.verify_active(tip_height), self.archive_matured(tip_height));
        let retried = self.drain_retry_queue(tip_height).await;

        let elapsed = started.elapsed();
        {
            let mut stats = self.stats.write().await;
            stats.cycles += 1;
            stats.last_tip = Some(tip_height);
            stats.last_cycle_at = Some(now_ms());
            stats.last_cycle_ms = Some(elapsed.as_millis() as u64);
        }

        info!(
            "Confirmation cycle done: tip {}, {} verified, {} archived, {} retried in {:?}",
            tip_height, verified, archived, retried, elapsed
        );
        Ok(CycleOutcome {
            triggered: true,
            tip_height,
            verified,
            archived,
            retried,
        })
    }

    /// Re-verify active transactions through the bounded RPC pool.
    async fn verify_active(&self, tip_height: u64) -> usize {
        let mut txids = match tx_db::unverified_txids(&self.db, self.scan_batch_size).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to scan active transactions: {}", e);
                return 0;
            }
        };
        txids.truncate(PENDING_TX_LIMIT);
        if txids.is_empty() {
            return 0;
        }

        let mut updated = 0;
        let mut chunks = txids.chunks(self.rpc_concurrency).peekable();
        while let Some(chunk) = chunks.next() {
            let results = future::join_all(
                chunk
                    .iter()
                    .map(|txid| self.verify_one(txid, tip_height, 0)),
            )
            .await;
            updated += results.into_iter().filter(|changed| *changed).count();

            if chunks.peek().is_some() {
                tokio::time::sleep(INTER_BATCH_PAUSE).await;
            }
        }
        updated
    }

    /// One RPC lookup plus the resulting store write. Returns true when the
    /// record changed.
    async fn verify_one(&self, txid: &str, tip_height: u64, attempts: u32) -> bool {
        match self.node.get_raw_transaction(txid).await {
            Ok(info) => self.apply_verification(txid, tip_height, info).await,
            Err(e) if e.is_transient() => {
                self.schedule_retry(txid, attempts).await;
                false
            }
            Err(e) => {
                warn!("Verification of {} failed: {}", txid, e);
                false
            }
        }
    }

    async fn apply_verification(
        &self,
        txid: &str,
        tip_height: u64,
        info: RawTransactionInfo,
    ) -> bool {
        let prev = match tx_db::get_active(&self.db, txid).await {
            Ok(Some(tx)) => tx,
            // Archived (or otherwise removed) while this lookup was in
            // flight; nothing to do.
            Ok(None) => return false,
            Err(e) => {
                error!("Failed to load active transaction {}: {}", txid, e);
                return false;
            }
        };

        let now = now_ms();
        let plan = plan_verification(&prev, &info, tip_height);
        let (update, next, changes) = match &plan {
            VerificationPlan::StillPending => {
                (doc! { "last_verified": now }, None, Document::new())
            }
            VerificationPlan::Reorged => {
                warn!("Reorg detected for {}, resetting to pending", txid);
                let update = doc! {
                    "block_hash": null,
                    "block_height": null,
                    "block_time": null,
                    "confirmations": 0i64,
                    "status": "pending",
                    "last_verified": now,
                };
                let mut next = prev.clone();
                next.block_hash = None;
                next.block_height = None;
                next.block_time = None;
                next.confirmations = 0;
                next.status = TxStatus::Pending;
                (update, Some(next), doc! { "status": "pending" })
            }
            VerificationPlan::Update {
                block_hash,
                block_height,
                block_time,
                confirmations,
                status,
            } => {
                let mut update = doc! {
                    "block_hash": block_hash.clone(),
                    "block_height": *block_height,
                    "block_time": *block_time,
                    "confirmations": *confirmations,
                    "status": status.as_str(),
                    "last_verified": now,
                };
                if info.hex.len() <= self.max_cached_hex_len {
                    update.insert("hex", info.hex.clone());
                }

                let mut changes = Document::new();
                if prev.status != *status {
                    changes.insert("status", status.as_str());
                }
                if prev.block_height != Some(*block_height) {
                    changes.insert("block_height", *block_height);
                }
                if prev.confirmations != *confirmations {
                    changes.insert("confirmations", *confirmations);
                }

                let mut next = prev.clone();
                next.block_hash = Some(block_hash.clone());
                next.block_height = Some(*block_height);
                next.block_time = *block_time;
                next.confirmations = *confirmations;
                next.status = *status;
                (update, Some(next), changes)
            }
        };

        match tx_db::apply_verification(&self.db, txid, update).await {
            Ok(true) => {}
            // Archived mid-flight; the update matched nothing.
            Ok(false) => return false,
            Err(e) => {
                error!("Failed to write verification for {}: {}", txid, e);
                return false;
            }
        }

        if let Some(next) = next {
            if self.enable_webhooks && !changes.is_empty() {
                if let Err(e) = webhook::notify_transaction(&self.db, &next, changes).await {
                    warn!("Failed to enqueue webhook deliveries for {}: {}", txid, e);
                }
            }
            return true;
        }
        false
    }

    /// Move records past the archive threshold into archived storage.
    async fn archive_matured(&self, tip_height: u64) -> usize {
        let matured = match tx_db::find_matured(
            &self.db,
            tip_height as i64,
            self.archive_threshold,
            self.scan_batch_size,
        )
        .await
        {
            Ok(txs) => txs,
            Err(e) => {
                error!("Archival scan failed: {}", e);
                return 0;
            }
        };

        let mut archived_count = 0;
        for tx in matured {
            let Some(block_height) = tx.block_height else {
                continue;
            };
            let Some(block_hash) = tx.block_hash.clone() else {
                continue;
            };
            let final_confirmations = tip_height as i64 - block_height + 1;

            let archived = ArchivedTransaction {
                txid: tx.txid.clone(),
                addresses: tx.addresses.clone(),
                block_height,
                block_hash: Some(block_hash),
                final_confirmations,
                first_seen: tx.first_seen,
                is_historical: tx.is_historical,
                archived_at: now_ms(),
                archive_height: tip_height as i64,
            };

            if let Err(e) = tx_db::archive(&self.db, &archived).await {
                error!("Failed to archive {}: {}", tx.txid, e);
                continue;
            }
            if let Err(e) = address_db::increment_tx_counts(&self.db, &tx.addresses).await {
                warn!(
                    "Failed to bump transaction counts after archiving {}: {}",
                    tx.txid, e
                );
            }

            info!(
                "Archived {} at {} confirmations",
                tx.txid, final_confirmations
            );
            archived_count += 1;

            if self.enable_webhooks {
                let mut snapshot = tx;
                snapshot.confirmations = final_confirmations;
                let changes = doc! {
                    "status": "archived",
                    "confirmations": final_confirmations,
                };
                if let Err(e) = webhook::notify_transaction(&self.db, &snapshot, changes).await {
                    warn!(
                        "Failed to enqueue archival webhook for {}: {}",
                        snapshot.txid, e
                    );
                }
            }
        }
        archived_count
    }

    async fn schedule_retry(&self, txid: &str, attempts: u32) {
        if attempts >= MAX_RETRIES {
            warn!(
                "Giving up on {} after {} transient failures",
                txid,
                attempts + 1
            );
            return;
        }
        let entry = RetryEntry {
            txid: txid.to_string(),
            attempts: attempts + 1,
            ready_at: now_ms() + RETRY_DELAY.as_millis() as i64,
        };
        debug!(
            "Scheduling retry {} for {} at {}",
            entry.attempts, entry.txid, entry.ready_at
        );
        self.retry_queue.lock().await.push_back(entry);
    }

    /// Re-verify a bounded number of entries whose delay has elapsed. The
    /// queue is process memory only; RPC failures are block-driven and
    /// self-healing.
    async fn drain_retry_queue(&self, tip_height: u64) -> usize {
        let now = now_ms();
        let ready: Vec<RetryEntry> = {
            let mut queue = self.retry_queue.lock().await;
            let mut ready = Vec::new();
            let mut remaining = VecDeque::with_capacity(queue.len());
            while let Some(entry) = queue.pop_front() {
                if entry.ready_at <= now && ready.len() < RETRY_DRAIN_PER_CYCLE {
                    ready.push(entry);
                } else {
                    remaining.push_back(entry);
                }
            }
            *queue = remaining;
            ready
        };

        let mut processed = 0;
        for entry in ready {
            self.verify_one(&entry.txid, tip_height, entry.attempts).await;
            processed += 1;
        }
        processed
    }

    pub async fn snapshot(&self) -> TrackerSnapshot {
        let mut snapshot = self.stats.read().await.clone();
        snapshot.in_progress = self.in_progress.load(Ordering::SeqCst);
        snapshot.retry_queue_depth = self.retry_queue.lock().await.len();
        snapshot
    }
}
