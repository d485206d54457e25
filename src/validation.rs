use crate::config::Network;
use crate::parser;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    #[error("Invalid webhook url: {0}")]
    InvalidUrl(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 500;

/// Base58Check P2PKH address for the configured network, checksum included.
pub fn validate_address(address: &str, network: Network) -> Result<(), ValidationError> {
    if address.trim().is_empty() {
        return Err(ValidationError::MissingParameter("address".to_string()));
    }
    if !parser::is_valid_address(address, network) {
        return Err(ValidationError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// Absolute http(s) URL for webhook registration.
pub fn validate_webhook_url(url: &str) -> Result<(), ValidationError> {
    let parsed =
        reqwest::Url::parse(url).map_err(|_| ValidationError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(ValidationError::InvalidUrl(url.to_string())),
    }
}

pub fn validate_limit(limit: Option<i64>) -> Result<i64, ValidationError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if limit <= 0 {
        return Err(ValidationError::InvalidParameter(
            "Limit must be positive".to_string(),
        ));
    }
    if limit > MAX_PAGE_LIMIT {
        return Err(ValidationError::InvalidParameter(format!(
            "Limit cannot exceed {}",
            MAX_PAGE_LIMIT
        )));
    }
    Ok(limit)
}

pub fn validate_offset(offset: Option<i64>) -> Result<u64, ValidationError> {
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(ValidationError::InvalidParameter(
            "Offset must be non-negative".to_string(),
        ));
    }
    Ok(offset as u64)
}
