//! Behavior of the in-memory membership pre-screen.

use crate::membership::AddressSet;

const ADDR_A: &str = "mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR";
const ADDR_B: &str = "mxtHrvoExpf55rts14HyyKeZc7FtwSoxY5";
const ADDR_C: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

#[tokio::test]
async fn add_contains_remove() {
    let set = AddressSet::new();
    assert!(set.is_empty().await);

    assert!(set.add(ADDR_A).await);
    assert!(!set.add(ADDR_A).await, "second add reports already present");
    assert!(set.contains(ADDR_A).await);
    assert!(!set.contains(ADDR_B).await);
    assert_eq!(set.len().await, 1);

    assert!(set.remove(ADDR_A).await);
    assert!(!set.remove(ADDR_A).await);
    assert!(!set.contains(ADDR_A).await);
}

#[tokio::test]
async fn add_many_bulk_populates() {
    let set = AddressSet::new();
    set.add_many(vec![ADDR_A.to_string(), ADDR_B.to_string()]).await;
    assert_eq!(set.len().await, 2);
    assert!(set.contains(ADDR_A).await);
    assert!(set.contains(ADDR_B).await);
}

#[tokio::test]
async fn filter_returns_exactly_the_watched_subset() {
    let set = AddressSet::new();
    set.add(ADDR_A).await;
    set.add(ADDR_C).await;

    let matched = set.filter([ADDR_A, ADDR_B, ADDR_C]).await;
    assert_eq!(matched, vec![ADDR_A.to_string(), ADDR_C.to_string()]);

    // A watched address passed as a candidate is never missed.
    assert!(matched.contains(&ADDR_A.to_string()));

    let none = set.filter([ADDR_B]).await;
    assert!(none.is_empty());
}
