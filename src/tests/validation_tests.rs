//! Request validation edge cases.

use crate::config::Network;
use crate::validation::{
    validate_address, validate_limit, validate_offset, validate_webhook_url, ValidationError,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};

#[test]
fn limits_have_defaults_and_bounds() {
    assert_eq!(validate_limit(None).unwrap(), DEFAULT_PAGE_LIMIT);
    assert_eq!(validate_limit(Some(10)).unwrap(), 10);
    assert_eq!(validate_limit(Some(MAX_PAGE_LIMIT)).unwrap(), MAX_PAGE_LIMIT);
    assert!(validate_limit(Some(0)).is_err());
    assert!(validate_limit(Some(-5)).is_err());
    assert!(validate_limit(Some(MAX_PAGE_LIMIT + 1)).is_err());
}

#[test]
fn offsets_must_be_non_negative() {
    assert_eq!(validate_offset(None).unwrap(), 0);
    assert_eq!(validate_offset(Some(25)).unwrap(), 25);
    assert!(validate_offset(Some(-1)).is_err());
}

#[test]
fn webhook_urls_must_be_absolute_http() {
    assert!(validate_webhook_url("https://example.com/hook").is_ok());
    assert!(validate_webhook_url("http://10.0.0.5:8080/notify").is_ok());
    assert!(validate_webhook_url("ftp://example.com/hook").is_err());
    assert!(validate_webhook_url("/relative/path").is_err());
    assert!(validate_webhook_url("not a url").is_err());
}

#[test]
fn empty_address_is_a_missing_parameter() {
    let err = validate_address("  ", Network::Mainnet).unwrap_err();
    assert!(matches!(err, ValidationError::MissingParameter(_)));

    let err = validate_address("bogus", Network::Mainnet).unwrap_err();
    assert!(matches!(err, ValidationError::InvalidAddress(_)));
}
