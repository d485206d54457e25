// Store access for the webhooks collection and the durable delivery queue.

use crate::db::{Db, StoreError};
use crate::models::{now_ms, DeliveryStatus, Webhook, WebhookDelivery};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};

pub async fn insert(db: &Db, webhook: &Webhook) -> Result<(), StoreError> {
    db.webhooks().insert_one(webhook, None).await?;
    Ok(())
}

pub async fn get(db: &Db, id: &str) -> Result<Option<Webhook>, StoreError> {
    Ok(db.webhooks().find_one(doc! { "_id": id }, None).await?)
}

pub async fn update(db: &Db, id: &str, changes: Document) -> Result<Option<Webhook>, StoreError> {
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    Ok(db
        .webhooks()
        .find_one_and_update(doc! { "_id": id }, doc! { "$set": changes }, options)
        .await?)
}

pub async fn delete(db: &Db, id: &str) -> Result<bool, StoreError> {
    let result = db.webhooks().delete_one(doc! { "_id": id }, None).await?;
    Ok(result.deleted_count > 0)
}

pub async fn list(
    db: &Db,
    active: Option<bool>,
    limit: i64,
    offset: u64,
) -> Result<(Vec<Webhook>, u64), StoreError> {
    let filter = match active {
        Some(flag) => doc! { "active": flag },
        None => doc! {},
    };
    let total = db.webhooks().count_documents(filter.clone(), None).await?;
    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(offset)
        .limit(limit)
        .build();
    let items = db
        .webhooks()
        .find(filter, options)
        .await?
        .try_collect()
        .await?;
    Ok((items, total))
}

/// Active webhooks interested in any of `addresses`: monitor-all hooks plus
/// hooks whose own address set intersects.
pub async fn matching(db: &Db, addresses: &[String]) -> Result<Vec<Webhook>, StoreError> {
    let filter = doc! {
        "active": true,
        "$or": [
            { "monitor_all": true },
            { "addresses": { "$in": addresses } },
        ],
    };
    let cursor = db.webhooks().find(filter, None).await?;
    Ok(cursor.try_collect().await?)
}

pub async fn bump_trigger(db: &Db, id: &str) -> Result<(), StoreError> {
    db.webhooks()
        .update_one(
            doc! { "_id": id },
            doc! { "$inc": { "trigger_count": 1 }, "$set": { "last_triggered": now_ms() } },
            None,
        )
        .await?;
    Ok(())
}

pub async fn count(db: &Db, active_only: bool) -> Result<u64, StoreError> {
    let filter = if active_only {
        doc! { "active": true }
    } else {
        doc! {}
    };
    Ok(db.webhooks().count_documents(filter, None).await?)
}

// --- delivery queue ---

pub async fn insert_delivery(db: &Db, delivery: &WebhookDelivery) -> Result<(), StoreError> {
    db.webhook_queue().insert_one(delivery, None).await?;
    Ok(())
}

/// Cancel every non-terminal delivery for a `(webhook, transaction)` pair.
/// Run before inserting a fresh delivery, so only the newest update is ever
/// delivered.
pub async fn cancel_pending_for_pair(
    db: &Db,
    webhook_id: &str,
    transaction_id: &str,
) -> Result<u64, StoreError> {
    let result = db
        .webhook_queue()
        .update_many(
            doc! {
                "webhook_id": webhook_id,
                "transaction_id": transaction_id,
                "status": { "$in": ["pending", "retry"] },
            },
            doc! { "$set": {
                "status": "cancelled",
                "cancel_reason": "superseded",
                "cancelled_at": now_ms(),
            } },
            None,
        )
        .await?;
    Ok(result.modified_count)
}

/// Cancel every non-terminal delivery for the same `(webhook, transaction)`
/// pair created before `before`. The claim-time variant of the supersession
/// pass; it must not touch deliveries fresher than the claimed one.
pub async fn cancel_superseded(
    db: &Db,
    webhook_id: &str,
    transaction_id: &str,
    before: i64,
) -> Result<u64, StoreError> {
    let result = db
        .webhook_queue()
        .update_many(
            doc! {
                "webhook_id": webhook_id,
                "transaction_id": transaction_id,
                "status": { "$in": ["pending", "retry"] },
                "created_at": { "$lt": before },
            },
            doc! { "$set": {
                "status": "cancelled",
                "cancel_reason": "superseded",
                "cancelled_at": now_ms(),
            } },
            None,
        )
        .await?;
    Ok(result.modified_count)
}

/// True when a fresher non-terminal delivery exists for the same pair.
pub async fn newer_pending_exists(
    db: &Db,
    webhook_id: &str,
    transaction_id: &str,
    after: i64,
) -> Result<bool, StoreError> {
    let found = db
        .webhook_queue()
        .find_one(
            doc! {
                "webhook_id": webhook_id,
                "transaction_id": transaction_id,
                "status": { "$in": ["pending", "retry"] },
                "created_at": { "$gt": after },
            },
            None,
        )
        .await?;
    Ok(found.is_some())
}

/// Atomically claim the oldest due delivery, marking it `processing`.
pub async fn claim_due(db: &Db, now: i64) -> Result<Option<WebhookDelivery>, StoreError> {
    let options = FindOneAndUpdateOptions::builder()
        .sort(doc! { "created_at": 1 })
        .return_document(ReturnDocument::After)
        .build();
    Ok(db
        .webhook_queue()
        .find_one_and_update(
            doc! {
                "status": { "$in": ["pending", "retry"] },
                "next_retry": { "$lte": now },
            },
            doc! { "$set": { "status": "processing", "last_attempt": now } },
            options,
        )
        .await?)
}

pub async fn mark_cancelled(db: &Db, id: &str, reason: &str) -> Result<(), StoreError> {
    db.webhook_queue()
        .update_one(
            doc! { "_id": id },
            doc! { "$set": {
                "status": "cancelled",
                "cancel_reason": reason,
                "cancelled_at": now_ms(),
            } },
            None,
        )
        .await?;
    Ok(())
}

pub async fn mark_completed(
    db: &Db,
    id: &str,
    response_status: i32,
    response_body: &str,
) -> Result<(), StoreError> {
    db.webhook_queue()
        .update_one(
            doc! { "_id": id },
            doc! { "$set": {
                "status": "completed",
                "completed_at": now_ms(),
                "response_status": response_status,
                "response_body": response_body,
            } },
            None,
        )
        .await?;
    Ok(())
}

pub async fn mark_retry(
    db: &Db,
    id: &str,
    attempts: i64,
    next_retry: i64,
    error: &str,
) -> Result<(), StoreError> {
    db.webhook_queue()
        .update_one(
            doc! { "_id": id },
            doc! { "$set": {
                "status": "retry",
                "attempts": attempts,
                "next_retry": next_retry,
                "last_error": error,
            } },
            None,
        )
        .await?;
    Ok(())
}

pub async fn mark_failed(db: &Db, id: &str, attempts: i64, error: &str) -> Result<(), StoreError> {
    db.webhook_queue()
        .update_one(
            doc! { "_id": id },
            doc! { "$set": {
                "status": "failed",
                "attempts": attempts,
                "failed_at": now_ms(),
                "last_error": error,
            } },
            None,
        )
        .await?;
    Ok(())
}

/// Cancel all non-terminal deliveries for a removed webhook.
pub async fn cancel_for_webhook(db: &Db, webhook_id: &str) -> Result<u64, StoreError> {
    let result = db
        .webhook_queue()
        .update_many(
            doc! {
                "webhook_id": webhook_id,
                "status": { "$in": ["pending", "retry", "processing"] },
            },
            doc! { "$set": {
                "status": "cancelled",
                "cancel_reason": "webhook_deleted",
                "cancelled_at": now_ms(),
            } },
            None,
        )
        .await?;
    Ok(result.modified_count)
}

pub async fn recent_deliveries(
    db: &Db,
    webhook_id: &str,
    limit: i64,
) -> Result<Vec<WebhookDelivery>, StoreError> {
    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .limit(limit)
        .build();
    let cursor = db
        .webhook_queue()
        .find(doc! { "webhook_id": webhook_id }, options)
        .await?;
    Ok(cursor.try_collect().await?)
}

pub async fn count_queue_by_status(db: &Db, status: DeliveryStatus) -> Result<u64, StoreError> {
    Ok(db
        .webhook_queue()
        .count_documents(doc! { "status": status.as_str() }, None)
        .await?)
}

/// Delete terminal records older than the cutoff, judged by each status'
/// own timestamp field.
pub async fn cleanup_terminal(db: &Db, cutoff: i64) -> Result<u64, StoreError> {
    let mut deleted = 0;
    for (status, field) in [
        ("completed", "completed_at"),
        ("failed", "failed_at"),
        ("cancelled", "cancelled_at"),
    ] {
        let result = db
            .webhook_queue()
            .delete_many(doc! { "status": status, field: { "$lt": cutoff } }, None)
            .await?;
        deleted += result.deleted_count;
    }
    Ok(deleted)
}
