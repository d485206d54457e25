// Store access for the trackedAddresses collection.

use crate::db::{is_duplicate_key, Db, StoreError};
use crate::models::{now_ms, WatchedAddress};
use futures::stream::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::FindOptions;

pub async fn get(db: &Db, address: &str) -> Result<Option<WatchedAddress>, StoreError> {
    Ok(db.addresses().find_one(doc! { "_id": address }, None).await?)
}

/// Insert a new watched address. Returns false when the address already
/// exists.
pub async fn insert(db: &Db, address: &WatchedAddress) -> Result<bool, StoreError> {
    match db.addresses().insert_one(address, None).await {
        Ok(_) => Ok(true),
        Err(e) if is_duplicate_key(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Reactivate an existing address ahead of a forced historical refetch.
pub async fn reactivate(db: &Db, address: &str) -> Result<(), StoreError> {
    db.addresses()
        .update_one(
            doc! { "_id": address },
            doc! { "$set": { "active": true } },
            None,
        )
        .await?;
    Ok(())
}

/// Deactivate an address. Returns false when no such address exists.
pub async fn deactivate(db: &Db, address: &str) -> Result<bool, StoreError> {
    let result = db
        .addresses()
        .update_one(
            doc! { "_id": address },
            doc! { "$set": { "active": false } },
            None,
        )
        .await?;
    Ok(result.matched_count > 0)
}

/// All active address strings, streamed in one pass for the membership set.
pub async fn all_active_ids(db: &Db) -> Result<Vec<String>, StoreError> {
    let mut cursor = db.addresses().find(doc! { "active": true }, None).await?;
    let mut ids = Vec::new();
    while let Some(addr) = cursor.try_next().await? {
        ids.push(addr.address);
    }
    Ok(ids)
}

/// Load the active records among `candidates`. Resolves stale positives
/// from the in-memory pre-screen.
pub async fn find_active(db: &Db, candidates: &[String]) -> Result<Vec<WatchedAddress>, StoreError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let cursor = db
        .addresses()
        .find(doc! { "_id": { "$in": candidates }, "active": true }, None)
        .await?;
    Ok(cursor.try_collect().await?)
}

/// Bump `transaction_count` and refresh `last_activity` for every address
/// touched by a newly observed transaction.
pub async fn record_activity(db: &Db, addresses: &[String], at: i64) -> Result<(), StoreError> {
    if addresses.is_empty() {
        return Ok(());
    }
    db.addresses()
        .update_many(
            doc! { "_id": { "$in": addresses } },
            doc! { "$inc": { "transaction_count": 1 }, "$set": { "last_activity": at } },
            None,
        )
        .await?;
    Ok(())
}

/// Archival bump: counts only, `last_activity` stays untouched.
pub async fn increment_tx_counts(db: &Db, addresses: &[String]) -> Result<(), StoreError> {
    if addresses.is_empty() {
        return Ok(());
    }
    db.addresses()
        .update_many(
            doc! { "_id": { "$in": addresses } },
            doc! { "$inc": { "transaction_count": 1 } },
            None,
        )
        .await?;
    Ok(())
}

pub async fn mark_historical_fetched(db: &Db, address: &str) -> Result<(), StoreError> {
    db.addresses()
        .update_one(
            doc! { "_id": address },
            doc! { "$set": { "historical_fetched": true, "historical_fetched_at": now_ms() } },
            None,
        )
        .await?;
    Ok(())
}

/// Clear the fetched flag so the next sweep re-pages history.
pub async fn reset_historical_fetched(db: &Db, address: &str) -> Result<(), StoreError> {
    db.addresses()
        .update_one(
            doc! { "_id": address },
            doc! { "$set": { "historical_fetched": false, "historical_fetched_at": null } },
            None,
        )
        .await?;
    Ok(())
}

/// Active addresses whose history has not been fetched yet, for the startup
/// sweep.
pub async fn unfetched_active_ids(db: &Db) -> Result<Vec<String>, StoreError> {
    let mut cursor = db
        .addresses()
        .find(
            doc! { "active": true, "historical_fetched": { "$ne": true } },
            None,
        )
        .await?;
    let mut ids = Vec::new();
    while let Some(addr) = cursor.try_next().await? {
        ids.push(addr.address);
    }
    Ok(ids)
}

pub async fn list(
    db: &Db,
    active: Option<bool>,
    limit: i64,
    offset: u64,
) -> Result<(Vec<WatchedAddress>, u64), StoreError> {
    let filter = match active {
        Some(flag) => doc! { "active": flag },
        None => doc! {},
    };
    let total = db.addresses().count_documents(filter.clone(), None).await?;
    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(offset)
        .limit(limit)
        .build();
    let items = db
        .addresses()
        .find(filter, options)
        .await?
        .try_collect()
        .await?;
    Ok((items, total))
}

pub async fn count(db: &Db, active_only: bool) -> Result<u64, StoreError> {
    let filter = if active_only {
        doc! { "active": true }
    } else {
        doc! {}
    };
    Ok(db.addresses().count_documents(filter, None).await?)
}
