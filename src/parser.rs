// Raw transaction parsing and P2PKH address extraction.
//
// The service only recognizes the standard pay-to-public-key-hash template.
// Outputs must match `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY
// OP_CHECKSIG` exactly; inputs must be a two-push unlocking script ending in
// a 33-byte compressed public key. Everything else is skipped without error.

use crate::config::Network;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use thiserror::Error;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed transaction: {0}")]
    MalformedTx(String),

    #[error("transaction exceeds the {limit} byte size cap")]
    TxTooLarge { limit: usize },
}

/// Result of scanning one raw transaction: its id and every recognized
/// address, with set semantics within each group.
#[derive(Debug, Clone)]
pub struct ExtractedTx {
    pub txid: String,
    pub input_addresses: Vec<String>,
    pub output_addresses: Vec<String>,
    pub all_addresses: Vec<String>,
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::MalformedTx(format!(
                "unexpected end of data at offset {}",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32_le(&mut self) -> Result<u32, ParseError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64_le(&mut self) -> Result<u64, ParseError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Bitcoin variable-length integer.
    fn read_varint(&mut self) -> Result<u64, ParseError> {
        let first = self.read_u8()?;
        match first {
            0xfd => {
                let b = self.take(2)?;
                Ok(u16::from_le_bytes([b[0], b[1]]) as u64)
            }
            0xfe => Ok(self.read_u32_le()? as u64),
            0xff => self.read_u64_le(),
            n => Ok(n as u64),
        }
    }
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(sha);
    ripe.into()
}

pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Base58Check-encode a 20-byte pubkey hash under the network version byte.
pub fn encode_p2pkh_address(pubkey_hash: &[u8; 20], network: Network) -> String {
    let mut payload = Vec::with_capacity(25);
    payload.push(network.version_byte());
    payload.extend_from_slice(pubkey_hash);
    let checksum = double_sha256(&payload);
    payload.extend_from_slice(&checksum[0..4]);
    bs58::encode(payload).into_string()
}

/// Decode a Base58Check address, verifying length, version byte and
/// checksum. Returns the 20-byte pubkey hash.
pub fn decode_p2pkh_address(address: &str, network: Network) -> Result<[u8; 20], ParseError> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| ParseError::MalformedTx(format!("invalid base58: {}", address)))?;
    if decoded.len() != 25 {
        return Err(ParseError::MalformedTx(format!(
            "address payload must be 25 bytes, got {}",
            decoded.len()
        )));
    }
    if decoded[0] != network.version_byte() {
        return Err(ParseError::MalformedTx(format!(
            "address version byte {:#04x} does not match the configured network",
            decoded[0]
        )));
    }
    let checksum = double_sha256(&decoded[0..21]);
    if checksum[0..4] != decoded[21..25] {
        return Err(ParseError::MalformedTx("address checksum mismatch".to_string()));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&decoded[1..21]);
    Ok(hash)
}

/// True when `address` is a well-formed P2PKH address for `network`.
pub fn is_valid_address(address: &str, network: Network) -> bool {
    decode_p2pkh_address(address, network).is_ok()
}

/// Decode a raw transaction and extract every P2PKH address it references.
///
/// `max_size` bounds the accepted serialized length; anything longer fails
/// with [`ParseError::TxTooLarge`] before any parsing work happens.
pub fn extract_addresses(
    bytes: &[u8],
    network: Network,
    max_size: usize,
) -> Result<ExtractedTx, ParseError> {
    if bytes.len() > max_size {
        return Err(ParseError::TxTooLarge { limit: max_size });
    }

    let mut reader = ByteReader::new(bytes);
    let _version = reader.read_u32_le()?;

    let mut input_addresses = BTreeSet::new();
    let mut output_addresses = BTreeSet::new();

    let input_count = reader.read_varint()?;
    if input_count == 0 {
        return Err(ParseError::MalformedTx("transaction has no inputs".to_string()));
    }
    for _ in 0..input_count {
        let _prev_txid = reader.take(32)?;
        let _prev_vout = reader.read_u32_le()?;
        let script_len = reader.read_varint()? as usize;
        let script = reader.take(script_len)?;
        let _sequence = reader.read_u32_le()?;

        if let Some(pubkey) = extract_compressed_pubkey(script) {
            let hash = hash160(pubkey);
            input_addresses.insert(encode_p2pkh_address(&hash, network));
        }
    }

    let output_count = reader.read_varint()?;
    for _ in 0..output_count {
        let _value = reader.read_u64_le()?;
        let script_len = reader.read_varint()? as usize;
        let script = reader.take(script_len)?;

        if let Some(hash) = match_p2pkh_output(script) {
            output_addresses.insert(encode_p2pkh_address(&hash, network));
        }
    }

    let _locktime = reader.read_u32_le()?;
    if reader.remaining() != 0 {
        return Err(ParseError::MalformedTx(format!(
            "{} trailing bytes after transaction",
            reader.remaining()
        )));
    }

    // Txid renders the double hash byte-reversed, as the wire convention
    // requires.
    let mut digest = double_sha256(bytes);
    digest.reverse();
    let txid = hex::encode(digest);

    let all_addresses: Vec<String> = input_addresses
        .union(&output_addresses)
        .cloned()
        .collect();

    Ok(ExtractedTx {
        txid,
        input_addresses: input_addresses.into_iter().collect(),
        output_addresses: output_addresses.into_iter().collect(),
        all_addresses,
    })
}

/// Match the exact 25-byte P2PKH locking script and return the pubkey hash.
fn match_p2pkh_output(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() != 25 {
        return None;
    }
    if script[0] != OP_DUP
        || script[1] != OP_HASH160
        || script[2] != 20
        || script[23] != OP_EQUALVERIFY
        || script[24] != OP_CHECKSIG
    {
        return None;
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&script[3..23]);
    Some(hash)
}

/// Recognize a `<sig> <pubkey>` unlocking script where the second push is a
/// 33-byte compressed SEC public key. Returns the pubkey bytes.
fn extract_compressed_pubkey(script: &[u8]) -> Option<&[u8]> {
    let mut pushes = Vec::with_capacity(2);
    let mut pos = 0usize;

    while pos < script.len() {
        if pushes.len() == 2 {
            // More than two items disqualifies the template.
            return None;
        }
        let opcode = script[pos];
        pos += 1;
        let len = match opcode {
            1..=75 => opcode as usize,
            OP_PUSHDATA1 => {
                let l = *script.get(pos)? as usize;
                pos += 1;
                l
            }
            OP_PUSHDATA2 => {
                let lo = *script.get(pos)? as usize;
                let hi = *script.get(pos + 1)? as usize;
                pos += 2;
                lo | (hi << 8)
            }
            OP_PUSHDATA4 => {
                let b: &[u8] = script.get(pos..pos + 4)?;
                pos += 4;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
            }
            // Any non-push opcode disqualifies the template.
            _ => return None,
        };
        let data = script.get(pos..pos + len)?;
        pos += len;
        pushes.push(data);
    }

    if pushes.len() != 2 {
        return None;
    }
    let pubkey = pushes[1];
    if pubkey.len() == 33 && (pubkey[0] == 0x02 || pubkey[0] == 0x03) {
        Some(pubkey)
    } else {
        None
    }
}
