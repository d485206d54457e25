// JSON-RPC client for the SV node. Only two methods are consumed:
// getblockcount and getrawtransaction (verbose). Every call carries a hard
// timeout that cancels the underlying request.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("rpc call timed out")]
    RpcTimeout,

    #[error("rpc unavailable: {0}")]
    RpcUnavailable(String),

    #[error("rpc error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),
}

impl NodeError {
    /// Timeouts and transport failures are worth retrying on a later cycle;
    /// application errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::RpcTimeout | NodeError::RpcUnavailable(_))
    }
}

/// Verbose getrawtransaction result, reduced to the fields the tracker
/// consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransactionInfo {
    pub hex: String,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub blockheight: Option<i64>,
    #[serde(default)]
    pub blocktime: Option<i64>,
    #[serde(default)]
    pub confirmations: Option<i64>,
}

#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_block_count(&self) -> Result<u64, NodeError>;
    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransactionInfo, NodeError>;
}

pub struct SvNodeClient {
    http: reqwest::Client,
    url: String,
    user: String,
    password: String,
    timeout: Duration,
}

impl SvNodeClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: config.rpc_url(),
            user: config.rpc_user.clone(),
            password: config.rpc_password.clone(),
            timeout: config.rpc_timeout,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "bsv-address-monitor",
            "method": method,
            "params": params,
        });

        debug!("rpc call {}", method);
        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NodeError::RpcTimeout
                } else {
                    NodeError::RpcUnavailable(e.to_string())
                }
            })?;

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                NodeError::RpcTimeout
            } else {
                NodeError::InvalidResponse(e.to_string())
            }
        })?;

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            return Err(NodeError::RpcError {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| NodeError::InvalidResponse("missing result field".to_string()))
    }
}

#[async_trait]
impl NodeClient for SvNodeClient {
    async fn get_block_count(&self) -> Result<u64, NodeError> {
        let result = self.call("getblockcount", json!([])).await?;
        result
            .as_u64()
            .ok_or_else(|| NodeError::InvalidResponse("getblockcount is not an integer".to_string()))
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransactionInfo, NodeError> {
        let result = self.call("getrawtransaction", json!([txid, 1])).await?;
        serde_json::from_value(result)
            .map_err(|e| NodeError::InvalidResponse(format!("getrawtransaction: {}", e)))
    }
}
