//! Crockford-style base32 ("c32") and c32check encoding used by Stacks
//! addresses.
//!
//! A Stacks address is `'S'`, the c32 character of the version byte, then
//! the c32 encoding of `hash160 || checksum` where the checksum is the first
//! four bytes of `sha256(sha256(version || hash160))`.

use sha2::{Digest, Sha256};

use crate::error::{BridgeError, BridgeResult};

/// c32 alphabet (no I, L, O, U).
pub const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Length of the c32check checksum in bytes.
pub const CHECKSUM_LEN: usize = 4;

/// Leading character of every Stacks address.
pub const ADDRESS_PREFIX: char = 'S';

/// Encode bytes as c32, one leading `'0'` per leading zero byte.
pub fn encode(bytes: &[u8]) -> String {
    let zeros = bytes.iter().take_while(|b| **b == 0).count();

    // Base-32 digits, least significant first.
    let mut digits: Vec<u8> = Vec::with_capacity(bytes.len() * 8 / 5 + 1);
    for &byte in &bytes[zeros..] {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 32) as u8;
            carry /= 32;
        }
        while carry > 0 {
            digits.push((carry % 32) as u8);
            carry /= 32;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('0').take(zeros));
    out.extend(digits.iter().rev().map(|d| ALPHABET[*d as usize] as char));
    out
}

/// Decode a c32 string. Lower case and the `O`, `I`, `L` confusables are
/// accepted.
pub fn decode(input: &str) -> BridgeResult<Vec<u8>> {
    let normalized = normalize(input);
    let zeros = normalized.bytes().take_while(|c| *c == b'0').count();

    // Base-256 bytes, least significant first.
    let mut bytes: Vec<u8> = Vec::with_capacity(normalized.len() * 5 / 8 + 1);
    for c in normalized.bytes().skip(zeros) {
        let mut carry = digit_value(c)? as u32;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) << 5;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; zeros];
    out.extend(bytes.iter().rev());
    Ok(out)
}

/// Compute the c32check checksum of `version || data`.
pub fn checksum(version: u8, data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::new().chain_update([version]).chain_update(data).finalize();
    let second = Sha256::digest(first);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&second[..CHECKSUM_LEN]);
    out
}

/// Render a Stacks address from a version byte and payload.
pub fn address_encode(version: u8, data: &[u8]) -> BridgeResult<String> {
    if version >= 32 {
        return Err(BridgeError::InvalidAddress(format!(
            "version {} does not fit a c32 character",
            version
        )));
    }

    let mut payload = Vec::with_capacity(data.len() + CHECKSUM_LEN);
    payload.extend_from_slice(data);
    payload.extend_from_slice(&checksum(version, data));

    let mut out = String::with_capacity(2 + payload.len() * 2);
    out.push(ADDRESS_PREFIX);
    out.push(ALPHABET[version as usize] as char);
    out.push_str(&encode(&payload));
    Ok(out)
}

/// Parse a Stacks address into its version byte and payload, verifying the
/// checksum.
pub fn address_decode(address: &str) -> BridgeResult<(u8, Vec<u8>)> {
    let normalized = normalize(address);
    let rest = normalized.strip_prefix(ADDRESS_PREFIX).ok_or_else(|| {
        BridgeError::InvalidAddress(format!("{} does not start with 'S'", address))
    })?;

    if rest.len() < 2 {
        return Err(BridgeError::InvalidAddress(format!(
            "{} is too short to be a Stacks address",
            address
        )));
    }

    let version = digit_value(rest.as_bytes()[0])?;
    let decoded = decode(&rest[1..])?;

    if decoded.len() < CHECKSUM_LEN {
        return Err(BridgeError::InvalidAddress(format!(
            "{} is missing its checksum",
            address
        )));
    }

    let (data, expected) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    if checksum(version, data) != expected {
        return Err(BridgeError::InvalidAddress(format!(
            "checksum mismatch for {}",
            address
        )));
    }

    Ok((version, data.to_vec()))
}

fn normalize(input: &str) -> String {
    input
        .to_ascii_uppercase()
        .chars()
        .map(|c| match c {
            'O' => '0',
            'I' | 'L' => '1',
            other => other,
        })
        .collect()
}

fn digit_value(c: u8) -> BridgeResult<u8> {
    ALPHABET
        .iter()
        .position(|a| *a == c)
        .map(|p| p as u8)
        .ok_or_else(|| {
            BridgeError::InvalidAddress(format!("'{}' is not a c32 character", c as char))
        })
}
