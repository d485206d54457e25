// Store access for the activeTransactions and archivedTransactions
// collections.

use crate::db::{is_duplicate_key, Db, StoreError};
use crate::models::{ActiveTransaction, ArchivedTransaction, TxStatus};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, InsertManyOptions, ReturnDocument};
use std::collections::HashSet;

/// Upsert the active record for a broadcast transaction.
///
/// On a pre-existing id the address set is unioned while `first_seen`,
/// status and block fields are preserved, so repeated intake of the same
/// transaction is idempotent. Returns the post-update document.
pub async fn upsert_from_intake(
    db: &Db,
    txid: &str,
    addresses: &[String],
    seen_at: i64,
) -> Result<ActiveTransaction, StoreError> {
    let options = FindOneAndUpdateOptions::builder()
        .upsert(true)
        .return_document(ReturnDocument::After)
        .build();
    let update = doc! {
        "$setOnInsert": {
            "first_seen": seen_at,
            "status": "pending",
            "confirmations": 0i64,
            "block_height": null,
            "block_hash": null,
            "block_time": null,
            "is_historical": false,
            "last_verified": null,
        },
        "$addToSet": { "addresses": { "$each": addresses } },
    };
    let tx = db
        .active_txs()
        .find_one_and_update(doc! { "_id": txid }, update, options)
        .await?
        .ok_or_else(|| {
            // Upsert with ReturnDocument::After always yields a document.
            mongodb::error::Error::custom(format!("upsert returned no document for {}", txid))
        })?;
    Ok(tx)
}

pub async fn get_active(db: &Db, txid: &str) -> Result<Option<ActiveTransaction>, StoreError> {
    Ok(db.active_txs().find_one(doc! { "_id": txid }, None).await?)
}

pub async fn get_archived(db: &Db, txid: &str) -> Result<Option<ArchivedTransaction>, StoreError> {
    Ok(db.archived_txs().find_one(doc! { "_id": txid }, None).await?)
}

/// Ids of transactions still awaiting verification, oldest first.
pub async fn unverified_txids(db: &Db, limit: i64) -> Result<Vec<String>, StoreError> {
    let options = FindOptions::builder()
        .sort(doc! { "first_seen": 1 })
        .limit(limit)
        .build();
    let mut cursor = db
        .active_txs()
        .find(doc! { "status": { "$in": ["pending", "confirming"] } }, options)
        .await?;
    let mut ids = Vec::new();
    while let Some(tx) = cursor.try_next().await? {
        ids.push(tx.txid);
    }
    Ok(ids)
}

/// Apply a verification result. The update targets a single primary key, so
/// concurrent pool writers never conflict. A record archived mid-flight is
/// simply not matched (no upsert, no resurrection).
pub async fn apply_verification(db: &Db, txid: &str, update: Document) -> Result<bool, StoreError> {
    let result = db
        .active_txs()
        .update_one(doc! { "_id": txid }, doc! { "$set": update }, None)
        .await?;
    Ok(result.matched_count > 0)
}

/// Confirming transactions whose block depth has crossed the archive
/// threshold under the given tip.
pub async fn find_matured(
    db: &Db,
    tip_height: i64,
    archive_threshold: i64,
    limit: i64,
) -> Result<Vec<ActiveTransaction>, StoreError> {
    let cutoff = tip_height - archive_threshold + 1;
    let options = FindOptions::builder().limit(limit).build();
    let cursor = db
        .active_txs()
        .find(
            doc! { "status": "confirming", "block_height": { "$lte": cutoff } },
            options,
        )
        .await?;
    Ok(cursor.try_collect().await?)
}

/// Move one record from active to archived storage. A duplicate key on the
/// archived insert means another writer got there first; the active record
/// is still removed.
pub async fn archive(db: &Db, archived: &ArchivedTransaction) -> Result<(), StoreError> {
    match db.archived_txs().insert_one(archived, None).await {
        Ok(_) => {}
        Err(e) if is_duplicate_key(&e) => {}
        Err(e) => return Err(e.into()),
    }
    db.active_txs()
        .delete_one(doc! { "_id": archived.txid.as_str() }, None)
        .await?;
    Ok(())
}

/// Which of `txids` already exist in either transaction collection.
pub async fn existing_txids(db: &Db, txids: &[String]) -> Result<HashSet<String>, StoreError> {
    let mut existing = HashSet::new();
    if txids.is_empty() {
        return Ok(existing);
    }
    let mut cursor = db
        .active_txs()
        .find(doc! { "_id": { "$in": txids } }, None)
        .await?;
    while let Some(tx) = cursor.try_next().await? {
        existing.insert(tx.txid);
    }
    let mut cursor = db
        .archived_txs()
        .find(doc! { "_id": { "$in": txids } }, None)
        .await?;
    while let Some(tx) = cursor.try_next().await? {
        existing.insert(tx.txid);
    }
    Ok(existing)
}

/// Unordered bulk insert of active records; duplicate-key races with the
/// realtime intake are survivable.
pub async fn insert_active_many(db: &Db, txs: &[ActiveTransaction]) -> Result<usize, StoreError> {
    if txs.is_empty() {
        return Ok(0);
    }
    let options = InsertManyOptions::builder().ordered(false).build();
    match db.active_txs().insert_many(txs, options).await {
        Ok(result) => Ok(result.inserted_ids.len()),
        Err(e) if is_duplicate_key(&e) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

pub async fn insert_archived_many(
    db: &Db,
    txs: &[ArchivedTransaction],
) -> Result<usize, StoreError> {
    if txs.is_empty() {
        return Ok(0);
    }
    let options = InsertManyOptions::builder().ordered(false).build();
    match db.archived_txs().insert_many(txs, options).await {
        Ok(result) => Ok(result.inserted_ids.len()),
        Err(e) if is_duplicate_key(&e) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

pub async fn list_active(
    db: &Db,
    status: Option<TxStatus>,
    limit: i64,
    offset: u64,
) -> Result<(Vec<ActiveTransaction>, u64), StoreError> {
    let filter = match status {
        Some(s) => doc! { "status": s.as_str() },
        None => doc! {},
    };
    let total = db.active_txs().count_documents(filter.clone(), None).await?;
    let options = FindOptions::builder()
        .sort(doc! { "first_seen": -1 })
        .skip(offset)
        .limit(limit)
        .build();
    let items = db
        .active_txs()
        .find(filter, options)
        .await?
        .try_collect()
        .await?;
    Ok((items, total))
}

/// Most recent active transactions touching one address.
pub async fn recent_for_address(
    db: &Db,
    address: &str,
    limit: i64,
) -> Result<Vec<ActiveTransaction>, StoreError> {
    let options = FindOptions::builder()
        .sort(doc! { "first_seen": -1 })
        .limit(limit)
        .build();
    let cursor = db
        .active_txs()
        .find(doc! { "addresses": address }, options)
        .await?;
    Ok(cursor.try_collect().await?)
}

pub async fn count_active_by_status(db: &Db, status: TxStatus) -> Result<u64, StoreError> {
    Ok(db
        .active_txs()
        .count_documents(doc! { "status": status.as_str() }, None)
        .await?)
}

pub async fn count_archived(db: &Db) -> Result<u64, StoreError> {
    Ok(db.archived_txs().count_documents(doc! {}, None).await?)
}
