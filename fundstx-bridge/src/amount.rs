//! Decimal amount parsing.
//!
//! Amounts travel through the transfer path as integers in the token's
//! smallest unit. User-entered decimal strings are converted exactly once,
//! when an intent is built; input with more fractional digits than the token
//! supports is rejected rather than rounded.

use crate::error::{BridgeError, BridgeResult};

/// USDC / USDCx decimal exponent.
pub const USDC_DECIMALS: u8 = 6;

/// Largest exponent that still fits `10^decimals` in a `u128`.
pub const MAX_DECIMALS: u8 = 38;

/// Parse a decimal string (`"1.5"`, `"0.000001"`, `".5"`) into smallest
/// units.
pub fn parse_units(amount: &str, decimals: u8) -> BridgeResult<u128> {
    if decimals > MAX_DECIMALS {
        return Err(BridgeError::InvalidAmount(format!(
            "unsupported decimal exponent {}",
            decimals
        )));
    }

    let amount = amount.trim();
    if amount.is_empty() {
        return Err(BridgeError::InvalidAmount("empty amount".into()));
    }
    if amount.starts_with('-') {
        return Err(BridgeError::InvalidAmount(format!(
            "amount must be positive: {}",
            amount
        )));
    }

    let (whole_part, frac_part) = match amount.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (amount, ""),
    };

    if frac_part.contains('.') {
        return Err(BridgeError::InvalidAmount(format!(
            "multiple decimal points: {}",
            amount
        )));
    }
    if whole_part.is_empty() && frac_part.is_empty() {
        return Err(BridgeError::InvalidAmount(format!("no digits: {}", amount)));
    }
    if !whole_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(BridgeError::InvalidAmount(format!(
            "invalid whole part: {}",
            whole_part
        )));
    }
    if !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(BridgeError::InvalidAmount(format!(
            "invalid fractional part: {}",
            frac_part
        )));
    }
    if frac_part.len() > decimals as usize {
        return Err(BridgeError::InvalidAmount(format!(
            "{} has more than {} decimal places",
            amount, decimals
        )));
    }

    let scale = 10u128.pow(decimals as u32);
    let overflow = || BridgeError::InvalidAmount(format!("amount overflow: {}", amount));

    let whole: u128 = if whole_part.is_empty() {
        0
    } else {
        whole_part
            .parse::<u128>()
            .map_err(|_| overflow())?
            .checked_mul(scale)
            .ok_or_else(overflow)?
    };

    let frac: u128 = if frac_part.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac_part, width = decimals as usize);
        padded.parse::<u128>().map_err(|_| overflow())?
    };

    let total = whole.checked_add(frac).ok_or_else(overflow)?;
    if total == 0 {
        return Err(BridgeError::InvalidAmount("amount must be greater than zero".into()));
    }
    Ok(total)
}

/// Render smallest units as a decimal string with trailing zeros trimmed.
pub fn format_units(amount: u128, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10u128.pow(decimals.min(MAX_DECIMALS) as u32);
    let whole = amount / scale;
    let frac = amount % scale;

    if frac == 0 {
        return whole.to_string();
    }

    let frac = format!("{:0>width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}
