//! Address extraction against known transactions and crafted scripts.

use crate::config::Network;
use crate::parser::{
    decode_p2pkh_address, encode_p2pkh_address, extract_addresses, is_valid_address, ParseError,
};

/// Broadcast testnet transaction with one compressed-key input and one
/// P2PKH output.
const TESTNET_TX_HEX: &str = "01000000014f226ee6c5e75ea5528219c9e98ad372fcb5cd3c9ac300d1cd25680370903dd02e0000006b483045022100e27577999098d75ae8afc04cad0253a879ef052e2776ccd9e1b921d4339a08a102203c9291d9c32ca06799d53567cb05df2ab973f4281a0a2a4bb85066e9d6964aaa41210292acdb57c788c1e8c83cdb0ae8f23e079139ba7ba1bccf67b31653c7af12c4b4ffffffff0140860100000000001976a914be83350213ab6483e111f675268b5bbaba7cdcae88ac00000000";
const TESTNET_TXID: &str = "f1a7b1854ba8ea120f9cd47db7a8ff190b5c5bc2385b01cbd8fcc5a9df8598c0";
const TESTNET_INPUT_ADDR: &str = "mnai8LzKea5e3C9qgrBo7JHgpiEnHKMhwR";
const TESTNET_OUTPUT_ADDR: &str = "mxtHrvoExpf55rts14HyyKeZc7FtwSoxY5";

const MAX_SIZE: usize = 4 * 1024 * 1024;

fn tx_bytes() -> Vec<u8> {
    hex::decode(TESTNET_TX_HEX).unwrap()
}

#[test]
fn extracts_known_testnet_transaction() {
    let extracted = extract_addresses(&tx_bytes(), Network::Testnet, MAX_SIZE).unwrap();

    assert_eq!(extracted.txid, TESTNET_TXID);
    assert_eq!(extracted.input_addresses, vec![TESTNET_INPUT_ADDR]);
    assert_eq!(extracted.output_addresses, vec![TESTNET_OUTPUT_ADDR]);
    assert_eq!(
        extracted.all_addresses,
        vec![TESTNET_INPUT_ADDR, TESTNET_OUTPUT_ADDR]
    );
}

#[test]
fn size_cap_is_exact() {
    let bytes = tx_bytes();

    // Exactly at the cap parses; one byte under the cap rejects.
    assert!(extract_addresses(&bytes, Network::Testnet, bytes.len()).is_ok());
    let err = extract_addresses(&bytes, Network::Testnet, bytes.len() - 1).unwrap_err();
    assert!(matches!(err, ParseError::TxTooLarge { .. }));
}

#[test]
fn truncated_bytes_are_malformed() {
    let bytes = tx_bytes();
    for cut in [0, 3, 10, bytes.len() / 2, bytes.len() - 1] {
        let err = extract_addresses(&bytes[..cut], Network::Testnet, MAX_SIZE).unwrap_err();
        assert!(matches!(err, ParseError::MalformedTx(_)), "cut at {}", cut);
    }
}

#[test]
fn trailing_bytes_are_malformed() {
    let mut bytes = tx_bytes();
    bytes.push(0x00);
    let err = extract_addresses(&bytes, Network::Testnet, MAX_SIZE).unwrap_err();
    assert!(matches!(err, ParseError::MalformedTx(_)));
}

/// Build a minimal transaction with the given output scripts and an empty
/// unlocking script.
fn build_tx(output_scripts: &[Vec<u8>]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.push(1); // one input
    bytes.extend_from_slice(&[0u8; 32]);
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.push(0); // empty scriptSig
    bytes.extend_from_slice(&0xffffffffu32.to_le_bytes());
    bytes.push(output_scripts.len() as u8);
    for script in output_scripts {
        bytes.extend_from_slice(&546u64.to_le_bytes());
        bytes.push(script.len() as u8);
        bytes.extend_from_slice(script);
    }
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes
}

fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 20];
    script.extend_from_slice(hash);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

#[test]
fn non_standard_scripts_are_skipped_silently() {
    // OP_RETURN output and an empty input script: parseable, no addresses.
    let tx = build_tx(&[vec![0x6a]]);
    let extracted = extract_addresses(&tx, Network::Mainnet, MAX_SIZE).unwrap();
    assert!(extracted.all_addresses.is_empty());
}

#[test]
fn duplicate_addresses_coalesce() {
    let hash = [0x11u8; 20];
    let tx = build_tx(&[p2pkh_script(&hash), p2pkh_script(&hash)]);
    let extracted = extract_addresses(&tx, Network::Mainnet, MAX_SIZE).unwrap();

    let expected = encode_p2pkh_address(&hash, Network::Mainnet);
    assert_eq!(extracted.output_addresses, vec![expected]);
}

#[test]
fn genesis_address_round_trips() {
    // hash160 of the genesis coinbase public key.
    let hash: [u8; 20] = hex::decode("62e907b15cbf27d5425399ebf6f0fb50ebb88f18")
        .unwrap()
        .try_into()
        .unwrap();
    let address = encode_p2pkh_address(&hash, Network::Mainnet);
    assert_eq!(address, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa");
    assert_eq!(decode_p2pkh_address(&address, Network::Mainnet).unwrap(), hash);
}

#[test]
fn address_validation_checks_network_and_checksum() {
    assert!(is_valid_address(TESTNET_INPUT_ADDR, Network::Testnet));
    assert!(is_valid_address(TESTNET_OUTPUT_ADDR, Network::Testnet));
    assert!(!is_valid_address(TESTNET_INPUT_ADDR, Network::Mainnet));

    assert!(is_valid_address(
        "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
        Network::Mainnet
    ));

    // Corrupt the checksum.
    assert!(!is_valid_address(
        "1A1zP1eP5QGefi2DMPTfTL5SLmv7Divfgb",
        Network::Mainnet
    ));
    assert!(!is_valid_address("", Network::Mainnet));
    assert!(!is_valid_address("not-base58-0OIl", Network::Mainnet));
}
