//! Merge classification for explorer history entries.

use crate::backfill::{classify_history_item, MergedRecord};
use crate::explorer::HistoryItem;
use crate::models::TxStatus;

const ADDR: &str = "mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR";
const THRESHOLD: i64 = 144;
const NOW: i64 = 1_700_000_000_000;

fn item(height: i64, time: Option<i64>) -> HistoryItem {
    HistoryItem {
        tx_hash: "f1a7b1854ba8ea120f9cd47db7a8ff190b5c5bc2385b01cbd8fcc5a9df8598c0".to_string(),
        height,
        time,
    }
}

#[test]
fn unknown_tip_degrades_everything_to_pending() {
    let record = classify_history_item(&item(100_000, None), ADDR, 0, THRESHOLD, NOW);
    match record {
        MergedRecord::Active(tx) => {
            assert_eq!(tx.status, TxStatus::Pending);
            assert_eq!(tx.confirmations, 0);
            assert!(tx.block_height.is_none());
            assert!(tx.is_historical);
        }
        MergedRecord::Archived(_) => panic!("must not archive without a tip"),
    }
}

#[test]
fn below_threshold_enters_as_confirming() {
    // 143 confirmations: one short of the archive threshold.
    let record = classify_history_item(&item(100_000, None), ADDR, 100_142, THRESHOLD, NOW);
    match record {
        MergedRecord::Active(tx) => {
            assert_eq!(tx.status, TxStatus::Confirming);
            assert_eq!(tx.confirmations, 143);
            assert_eq!(tx.block_height, Some(100_000));
            assert_eq!(tx.addresses, vec![ADDR.to_string()]);
        }
        MergedRecord::Archived(_) => panic!("below threshold must stay active"),
    }
}

#[test]
fn at_threshold_goes_straight_to_the_archive() {
    let record = classify_history_item(&item(100_000, None), ADDR, 100_143, THRESHOLD, NOW);
    match record {
        MergedRecord::Archived(tx) => {
            assert_eq!(tx.final_confirmations, 144);
            assert_eq!(tx.archive_height, 100_143);
            assert_eq!(tx.archived_at, NOW);
            assert!(tx.is_historical);
        }
        MergedRecord::Active(_) => panic!("threshold reached, must archive"),
    }
}

#[test]
fn explorer_seconds_become_millisecond_timestamps() {
    let record = classify_history_item(
        &item(100_000, Some(1_650_000_000)),
        ADDR,
        100_001,
        THRESHOLD,
        NOW,
    );
    match record {
        MergedRecord::Active(tx) => assert_eq!(tx.first_seen, 1_650_000_000_000),
        MergedRecord::Archived(_) => panic!("2 confirmations must stay active"),
    }
}
