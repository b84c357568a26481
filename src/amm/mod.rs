//! Constant-product AMM pricing
//!
//! All on-chain quantities are unsigned fixed-point integers with 9 decimal
//! places ("nano" units). Products of two such quantities are computed in
//! 256-bit integers and narrowed back to `u128`.

pub mod pool;
pub mod quote;

pub use pool::Pool;
pub use quote::{compute_output, fee, minimum_output, price_impact, SwapQuote};

use crate::error::{QuoteError, ValidationError};

use alloy_primitives::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Basis-point denominator (10 000 = 100%)
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Decimal places of on-chain amounts
pub const NANO_DECIMALS: u32 = 9;

/// One whole unit in nano units
pub const NANO: u128 = 1_000_000_000;

/// A fraction expressed in basis points, bounded to [0, 10000]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BasisPoints(u16);

impl BasisPoints {
    pub const ZERO: BasisPoints = BasisPoints(0);
    pub const MAX: BasisPoints = BasisPoints(10_000);

    pub fn new(bps: u32) -> Result<Self, ValidationError> {
        if bps > BPS_DENOMINATOR as u32 {
            return Err(ValidationError::SlippageOutOfRange(bps));
        }
        Ok(Self(bps as u16))
    }

    pub fn get(self) -> u32 {
        self.0 as u32
    }

    /// `10000 - self`
    pub fn complement(self) -> u128 {
        BPS_DENOMINATOR - self.0 as u128
    }
}

impl TryFrom<u32> for BasisPoints {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BasisPoints> for u32 {
    fn from(value: BasisPoints) -> Self {
        value.get()
    }
}

impl fmt::Display for BasisPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bps", self.0)
    }
}

/// `floor(a * b / c)` without intermediate overflow
pub(crate) fn mul_div(a: u128, b: u128, c: u128) -> Result<u128, QuoteError> {
    if c == 0 {
        return Err(QuoteError::Overflow);
    }
    let wide = U256::from(a) * U256::from(b) / U256::from(c);
    u128::try_from(wide).map_err(|_| QuoteError::Overflow)
}

/// Parse a user-entered decimal amount into nano units.
///
/// Rejects non-numeric input, values `<= 0` and more than 9 fractional digits.
pub fn parse_amount(input: &str) -> Result<u128, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EnterAmount);
    }
    let value = Decimal::from_str(trimmed).map_err(|_| ValidationError::EnterAmount)?;
    to_nano(value)
}

/// Convert a whole-unit decimal into nano units
pub fn to_nano(value: Decimal) -> Result<u128, ValidationError> {
    if value <= Decimal::ZERO || value.normalize().scale() > NANO_DECIMALS {
        return Err(ValidationError::InvalidAmount);
    }
    value
        .checked_mul(Decimal::from(NANO as u64))
        .and_then(|nano| nano.to_u128())
        .ok_or(ValidationError::InvalidAmount)
}

/// Render nano units as a whole-unit decimal
pub fn from_nano(nano: u128) -> Decimal {
    i128::try_from(nano)
        .ok()
        .and_then(|n| Decimal::try_from_i128_with_scale(n, NANO_DECIMALS).ok())
        .map(|d| d.normalize())
        .unwrap_or(Decimal::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_basis_points_bounds() {
        assert!(BasisPoints::new(10_000).is_ok());
        assert_eq!(
            BasisPoints::new(10_001),
            Err(ValidationError::SlippageOutOfRange(10_001))
        );
        assert_eq!(BasisPoints::new(30).unwrap().complement(), 9_970);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("10"), Ok(10 * NANO));
        assert_eq!(parse_amount(" 0.000000001 "), Ok(1));
        assert_eq!(parse_amount("1.5"), Ok(1_500_000_000));
        assert_eq!(parse_amount(""), Err(ValidationError::EnterAmount));
        assert_eq!(parse_amount("abc"), Err(ValidationError::EnterAmount));
        assert_eq!(parse_amount("0"), Err(ValidationError::InvalidAmount));
        assert_eq!(parse_amount("-3"), Err(ValidationError::InvalidAmount));
        assert_eq!(
            parse_amount("0.0000000001"),
            Err(ValidationError::InvalidAmount)
        );
    }

    #[test]
    fn test_from_nano() {
        assert_eq!(from_nano(1_500_000_000), dec!(1.5));
        assert_eq!(from_nano(0), dec!(0));
    }

    #[test]
    fn test_mul_div_wide() {
        // 1e30 * 1e10 overflows u128 but the quotient fits
        let big = 1_000_000_000_000_000_000_000_000_000_000u128;
        assert_eq!(mul_div(big, 10_000_000_000, 100_000_000_000), Ok(big / 10));
        assert_eq!(mul_div(1, 1, 0), Err(QuoteError::Overflow));
    }
}
