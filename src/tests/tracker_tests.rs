//! Verification planning: the pure state-machine decisions the tracker
//! writes back to the store.

use crate::models::{ActiveTransaction, TxStatus};
use crate::node::RawTransactionInfo;
use crate::tracker::{plan_verification, VerificationPlan};

fn pending_tx(txid: &str) -> ActiveTransaction {
    ActiveTransaction {
        txid: txid.to_string(),
        addresses: vec!["mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR".to_string()],
        block_height: None,
        block_hash: None,
        block_time: None,
        confirmations: 0,
        first_seen: 1_700_000_000_000,
        status: TxStatus::Pending,
        is_historical: false,
        last_verified: None,
        hex: None,
    }
}

fn confirming_tx(txid: &str, block_hash: &str, height: i64, confirmations: i64) -> ActiveTransaction {
    let mut tx = pending_tx(txid);
    tx.block_hash = Some(block_hash.to_string());
    tx.block_height = Some(height);
    tx.confirmations = confirmations;
    tx.status = TxStatus::Confirming;
    tx
}

fn info(blockhash: Option<&str>, blockheight: Option<i64>, confirmations: Option<i64>) -> RawTransactionInfo {
    RawTransactionInfo {
        hex: "0100".to_string(),
        blockhash: blockhash.map(str::to_string),
        blockheight,
        blocktime: Some(1_700_000_100),
        confirmations,
    }
}

#[test]
fn unconfirmed_stays_pending() {
    let prev = pending_tx("aa");
    let plan = plan_verification(&prev, &info(None, None, Some(0)), 100_000);
    assert_eq!(plan, VerificationPlan::StillPending);
}

#[test]
fn first_block_sighting_moves_to_confirming() {
    let prev = pending_tx("aa");
    let plan = plan_verification(&prev, &info(Some("beef"), Some(100_000), Some(143)), 100_142);
    match plan {
        VerificationPlan::Update {
            block_hash,
            block_height,
            confirmations,
            status,
            ..
        } => {
            assert_eq!(block_hash, "beef");
            assert_eq!(block_height, 100_000);
            assert_eq!(confirmations, 143);
            assert_eq!(status, TxStatus::Confirming);
        }
        other => panic!("expected update, got {:?}", other),
    }
}

#[test]
fn confirmations_track_the_tip() {
    let prev = confirming_tx("aa", "beef", 100_000, 5);

    let plan = plan_verification(&prev, &info(Some("beef"), Some(100_000), None), 100_142);
    assert!(matches!(
        plan,
        VerificationPlan::Update { confirmations: 143, .. }
    ));

    // One block later the record crosses the 144 threshold.
    let plan = plan_verification(&prev, &info(Some("beef"), Some(100_000), None), 100_143);
    assert!(matches!(
        plan,
        VerificationPlan::Update { confirmations: 144, .. }
    ));
}

#[test]
fn height_derives_from_node_confirmations_when_missing() {
    let prev = pending_tx("aa");
    let plan = plan_verification(&prev, &info(Some("beef"), None, Some(5)), 100);
    assert!(matches!(
        plan,
        VerificationPlan::Update {
            block_height: 96,
            confirmations: 5,
            ..
        }
    ));
}

#[test]
fn block_ahead_of_tip_waits_for_next_cycle() {
    // The tip was read before the node indexed this block.
    let prev = pending_tx("aa");
    let plan = plan_verification(&prev, &info(Some("beef"), Some(101), None), 100);
    assert_eq!(plan, VerificationPlan::StillPending);
}

#[test]
fn vanished_block_is_a_reorg() {
    let prev = confirming_tx("aa", "beef", 100_000, 5);
    let plan = plan_verification(&prev, &info(None, None, Some(0)), 100_005);
    assert_eq!(plan, VerificationPlan::Reorged);
}

#[test]
fn changed_block_hash_is_a_reorg() {
    let prev = confirming_tx("aa", "beef", 100_000, 5);
    let plan = plan_verification(&prev, &info(Some("cafe"), Some(100_001), None), 100_005);
    assert_eq!(plan, VerificationPlan::Reorged);
}
