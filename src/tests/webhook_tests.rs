//! Webhook payload shaping and the failure backoff schedule.

use crate::models::{ActiveTransaction, TxStatus, Webhook};
use crate::webhook::{build_payload, filter_payload_addresses, retry_backoff};
use mongodb::bson::doc;
use std::time::Duration;

const ADDR_A: &str = "mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR";
const ADDR_B: &str = "mxtHrvoExpf55rts14HyyKeZc7FtwSoxY5";

fn hook(monitor_all: bool, addresses: Vec<&str>) -> Webhook {
    Webhook {
        id: "65f000000000000000000001".to_string(),
        url: "https://example.com/hook".to_string(),
        addresses: addresses.into_iter().map(str::to_string).collect(),
        monitor_all,
        active: true,
        created_at: 0,
        trigger_count: 0,
        last_triggered: None,
    }
}

fn tx(addresses: Vec<&str>) -> ActiveTransaction {
    ActiveTransaction {
        txid: "f1a7b1854ba8ea120f9cd47db7a8ff190b5c5bc2385b01cbd8fcc5a9df8598c0".to_string(),
        addresses: addresses.into_iter().map(str::to_string).collect(),
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

#[test]
fn backoff_schedule_matches_the_table() {
    assert_eq!(retry_backoff(1), Duration::from_secs(1));
    assert_eq!(retry_backoff(2), Duration::from_secs(5));
    assert_eq!(retry_backoff(3), Duration::from_secs(30));
    assert_eq!(retry_backoff(4), Duration::from_secs(300));
    assert_eq!(retry_backoff(5), Duration::from_secs(3600));
    // Attempts past the table reuse the last slot.
    assert_eq!(retry_backoff(9), Duration::from_secs(3600));
}

#[test]
fn monitor_all_hooks_see_every_address() {
    let hook = hook(true, vec![]);
    let filtered = filter_payload_addresses(&hook, &[ADDR_A.to_string(), ADDR_B.to_string()]);
    assert_eq!(filtered, vec![ADDR_A.to_string(), ADDR_B.to_string()]);
}

#[test]
fn scoped_hooks_see_only_the_intersection() {
    let hook = hook(false, vec![ADDR_A]);
    let filtered = filter_payload_addresses(&hook, &[ADDR_A.to_string(), ADDR_B.to_string()]);
    assert_eq!(filtered, vec![ADDR_A.to_string()]);

    // Delivered addresses are always a subset of the hook's own set.
    for addr in &filtered {
        assert!(hook.addresses.contains(addr));
    }

    let disjoint = filter_payload_addresses(&hook, &[ADDR_B.to_string()]);
    assert!(disjoint.is_empty());
}

#[test]
fn new_transaction_payload_shape() {
    let hook = hook(true, vec![]);
    let tx = tx(vec![ADDR_A]);
    let payload = build_payload(&hook, &tx, doc! { "status": "new" });

    assert_eq!(payload.transaction.addresses, vec![ADDR_A.to_string()]);
    assert_eq!(payload.transaction.status, "pending");
    assert_eq!(payload.changes, doc! { "status": "new" });

    let value = serde_json::to_value(&payload).unwrap();
    assert!(value.get("timestamp").is_some());
    assert_eq!(
        value["transaction"]["_id"],
        serde_json::json!(tx.txid)
    );
    assert_eq!(value["changes"]["status"], serde_json::json!("new"));
}

#[test]
fn scoped_payload_filters_transaction_addresses() {
    let hook = hook(false, vec![ADDR_B]);
    let tx = tx(vec![ADDR_A, ADDR_B]);
    let payload = build_payload(&hook, &tx, doc! { "confirmations": 3i64 });
    assert_eq!(payload.transaction.addresses, vec![ADDR_B.to_string()]);
}
