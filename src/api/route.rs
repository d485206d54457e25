// REST control surface: address CRUD, webhook CRUD, transaction lookups,
// stats and the manual confirmation trigger.
//
// The membership set is updated before any add/remove response returns, so
// the intake pre-screen never lags behind what an operator was told.

use axum::{
    extract::{Path, Query, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mongodb::bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::api::{error::ApiError, response::ListResponse};
use crate::backfill;
use crate::db::{address as address_db, transaction as tx_db, webhook as webhook_db};
use crate::models::{now_ms, DeliveryStatus, TxStatus, WatchedAddress, Webhook};
use crate::node::NodeError;
use crate::state::AppState;
use crate::validation::{validate_address, validate_limit, validate_offset, validate_webhook_url};

const RECENT_TX_LIMIT: i64 = 10;
const RECENT_DELIVERY_LIMIT: i64 = 10;

pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/addresses", post(add_addresses).get(list_addresses))
        .route("/addresses/:addr", get(get_address).delete(delete_address))
        .route("/transactions", get(list_transactions))
        .route("/transaction/:txid", get(get_transaction))
        .route("/stats", get(stats))
        .route("/webhooks", post(create_webhook).get(list_webhooks))
        .route(
            "/webhooks/:id",
            get(get_webhook).put(update_webhook).delete(delete_webhook),
        )
        .route("/trigger/confirmations", post(trigger_confirmations))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// API-key gate for everything except /health. Accepts the key from the
/// X-API-Key header or the api_key query parameter.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.require_api_key {
        return next.run(request).await;
    }
    let Some(expected) = state.config.api_key.as_deref() else {
        // Startup validation rejects this combination; treat as closed.
        return ApiError::Unauthorized.into_response();
    };

    let from_header = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let provided = from_header.or_else(|| query_param(request.uri().query(), "api_key"));

    match provided {
        Some(key) if key == expected => next.run(request).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": now_ms() }))
}

// --- addresses ---

#[derive(Deserialize)]
pub struct AddAddressesRequest {
    pub addresses: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddAddressesSummary {
    pub added: Vec<String>,
    pub already_exist: Vec<String>,
    pub forced_refetch: Vec<String>,
    pub invalid: Vec<String>,
}

async fn add_addresses(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddAddressesRequest>,
) -> Result<Json<AddAddressesSummary>, ApiError> {
    if body.addresses.is_empty() {
        return Err(ApiError::BadRequest(
            "addresses must be a non-empty array".to_string(),
        ));
    }

    let mut summary = AddAddressesSummary::default();
    let mut to_backfill = Vec::new();

    for raw in &body.addresses {
        let address = raw.trim();
        if validate_address(address, state.config.network).is_err() {
            summary.invalid.push(address.to_string());
            continue;
        }

        match address_db::get(&state.db, address).await? {
            Some(_) if body.force => {
                address_db::reactivate(&state.db, address).await?;
                address_db::reset_historical_fetched(&state.db, address).await?;
                state.membership.add(address).await;
                to_backfill.push(address.to_string());
                summary.forced_refetch.push(address.to_string());
            }
            Some(_) => {
                summary.already_exist.push(address.to_string());
            }
            None => {
                let record = WatchedAddress::new(address.to_string(), None);
                if address_db::insert(&state.db, &record).await? {
                    state.membership.add(address).await;
                    to_backfill.push(address.to_string());
                    summary.added.push(address.to_string());
                } else {
                    // Lost a race with a concurrent registration.
                    summary.already_exist.push(address.to_string());
                }
            }
        }
    }

    info!(
        "Address registration: {} added, {} existing, {} forced, {} invalid",
        summary.added.len(),
        summary.already_exist.len(),
        summary.forced_refetch.len(),
        summary.invalid.len()
    );

    if !to_backfill.is_empty() {
        let state = state.clone();
        tokio::spawn(async move {
            backfill::backfill_many(&state, &to_backfill).await;
        });
    }

    Ok(Json(summary))
}

#[derive(Deserialize)]
pub struct AddressListQuery {
    pub active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

async fn list_addresses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AddressListQuery>,
) -> Result<Json<ListResponse<WatchedAddress>>, ApiError> {
    let limit = validate_limit(params.limit)?;
    let offset = validate_offset(params.offset)?;
    let (items, total) = address_db::list(&state.db, params.active, limit, offset).await?;
    Ok(Json(ListResponse::new(items, total, limit, offset)))
}

async fn get_address(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let address = address_db::get(&state.db, &addr)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("address {}", addr)))?;
    let recent = tx_db::recent_for_address(&state.db, &addr, RECENT_TX_LIMIT).await?;
    Ok(Json(json!({
        "address": address,
        "recent_transactions": recent,
    })))
}

async fn delete_address(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !address_db::deactivate(&state.db, &addr).await? {
        return Err(ApiError::NotFound(format!("address {}", addr)));
    }
    // Removed from the pre-screen before the caller hears back.
    state.membership.remove(&addr).await;
    info!("Deactivated address {}", addr);
    Ok(Json(json!({ "deactivated": addr })))
}

// --- transactions ---

#[derive(Deserialize)]
pub struct TxListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TxListQuery>,
) -> Result<Json<ListResponse<crate::models::ActiveTransaction>>, ApiError> {
    let limit = validate_limit(params.limit)?;
    let offset = validate_offset(params.offset)?;
    let status = match params.status.as_deref() {
        None => None,
        Some("pending") => Some(TxStatus::Pending),
        Some("confirming") => Some(TxStatus::Confirming),
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "unknown status filter: {}",
                other
            )))
        }
    };
    let (items, total) = tx_db::list_active(&state.db, status, limit, offset).await?;
    Ok(Json(ListResponse::new(items, total, limit, offset)))
}

async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(txid): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(tx) = tx_db::get_active(&state.db, &txid).await? {
        return Ok(Json(json!({ "transaction": tx, "archived": false })));
    }
    if let Some(tx) = tx_db::get_archived(&state.db, &txid).await? {
        return Ok(Json(json!({ "transaction": tx, "archived": true })));
    }
    Err(ApiError::NotFound(format!("transaction {}", txid)))
}

// --- stats ---

async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let pending = tx_db::count_active_by_status(&state.db, TxStatus::Pending).await?;
    let confirming = tx_db::count_active_by_status(&state.db, TxStatus::Confirming).await?;

    let mut queue = Document::new();
    for status in [
        DeliveryStatus::Pending,
        DeliveryStatus::Processing,
        DeliveryStatus::Retry,
        DeliveryStatus::Completed,
        DeliveryStatus::Failed,
        DeliveryStatus::Cancelled,
    ] {
        let count = webhook_db::count_queue_by_status(&state.db, status).await?;
        queue.insert(status.as_str(), count as i64);
    }

    Ok(Json(json!({
        "timestamp": now_ms(),
        "addresses": {
            "total": address_db::count(&state.db, false).await?,
            "active": address_db::count(&state.db, true).await?,
            "membership_set": state.membership.len().await,
        },
        "transactions": {
            "pending": pending,
            "confirming": confirming,
            "active": pending + confirming,
            "archived": tx_db::count_archived(&state.db).await?,
        },
        "webhooks": {
            "total": webhook_db::count(&state.db, false).await?,
            "active": webhook_db::count(&state.db, true).await?,
            "queue": queue,
        },
        "tracker": state.tracker.snapshot().await,
    })))
}

// --- webhooks ---

#[derive(Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
    #[serde(default)]
    pub active: Option<bool>,
}

async fn create_webhook(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWebhookRequest>,
) -> Result<Json<Webhook>, ApiError> {
    validate_webhook_url(&body.url)?;

    let addresses = body.addresses.unwrap_or_default();
    for addr in &addresses {
        validate_address(addr, state.config.network)?;
    }

    let webhook = Webhook {
        id: ObjectId::new().to_hex(),
        url: body.url,
        monitor_all: addresses.is_empty(),
        addresses,
        active: body.active.unwrap_or(true),
        created_at: now_ms(),
        trigger_count: 0,
        last_triggered: None,
    };
    webhook_db::insert(&state.db, &webhook).await?;
    info!(
        "Registered webhook {} (monitor_all: {})",
        webhook.id, webhook.monitor_all
    );
    Ok(Json(webhook))
}

#[derive(Deserialize)]
pub struct WebhookListQuery {
    pub active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

async fn list_webhooks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WebhookListQuery>,
) -> Result<Json<ListResponse<Webhook>>, ApiError> {
    let limit = validate_limit(params.limit)?;
    let offset = validate_offset(params.offset)?;
    let (items, total) = webhook_db::list(&state.db, params.active, limit, offset).await?;
    Ok(Json(ListResponse::new(items, total, limit, offset)))
}

async fn get_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hook = webhook_db::get(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("webhook {}", id)))?;
    let deliveries = webhook_db::recent_deliveries(&state.db, &id, RECENT_DELIVERY_LIMIT).await?;
    Ok(Json(json!({
        "webhook": hook,
        "recent_deliveries": deliveries,
    })))
}

#[derive(Deserialize)]
pub struct UpdateWebhookRequest {
    pub url: Option<String>,
    pub addresses: Option<Vec<String>>,
    pub active: Option<bool>,
    pub monitor_all: Option<bool>,
}

async fn update_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateWebhookRequest>,
) -> Result<Json<Webhook>, ApiError> {
    let mut changes = Document::new();

    if let Some(url) = &body.url {
        validate_webhook_url(url)?;
        changes.insert("url", url.clone());
    }
    if let Some(active) = body.active {
        changes.insert("active", active);
    }
    if body.monitor_all == Some(true) {
        if body.addresses.as_ref().is_some_and(|a| !a.is_empty()) {
            return Err(ApiError::BadRequest(
                "monitor_all excludes an explicit address list".to_string(),
            ));
        }
        changes.insert("monitor_all", true);
        changes.insert("addresses", Vec::<String>::new());
    } else if let Some(addresses) = &body.addresses {
        for addr in addresses {
            validate_address(addr, state.config.network)?;
        }
        changes.insert("monitor_all", addresses.is_empty());
        changes.insert("addresses", addresses.clone());
    } else if body.monitor_all == Some(false) {
        changes.insert("monitor_all", false);
    }

    if changes.is_empty() {
        return Err(ApiError::BadRequest("no fields to update".to_string()));
    }

    let updated = webhook_db::update(&state.db, &id, changes)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("webhook {}", id)))?;
    Ok(Json(updated))
}

async fn delete_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !webhook_db::delete(&state.db, &id).await? {
        return Err(ApiError::NotFound(format!("webhook {}", id)));
    }
    let cancelled = webhook_db::cancel_for_webhook(&state.db, &id).await?;
    info!(
        "Deleted webhook {} and cancelled {} pending deliveries",
        id, cancelled
    );
    Ok(Json(json!({ "deleted": id, "cancelled_deliveries": cancelled })))
}

// --- confirmation trigger ---

async fn trigger_confirmations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.tracker.process_new_block().await {
        Ok(outcome) => Ok(Json(serde_json::to_value(&outcome).map_err(|e| {
            ApiError::Internal(e.to_string())
        })?)),
        Err(e @ (NodeError::RpcTimeout | NodeError::RpcUnavailable(_))) => {
            Err(ApiError::ServiceUnavailable(e.to_string()))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}
