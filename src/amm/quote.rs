//! Swap quoting against constant-product reserves
//!
//! Pure functions: identical inputs always produce identical quotes.
//!
//! # Output formula
//!
//! 1. `amount_in_with_fee = amount_in × (10 000 − fee_bps)`
//! 2. `numerator = amount_in_with_fee × reserve_out`
//! 3. `denominator = reserve_in × 10 000 + amount_in_with_fee`
//! 4. `amount_out = ⌊numerator / denominator⌋`
//!
//! The fee is retained by the pool, so `reserve_in × reserve_out` never
//! decreases across a swap.

use super::{mul_div, BasisPoints, BPS_DENOMINATOR};
use crate::error::QuoteError;

use alloy_primitives::U256;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A priced swap, ready to be turned into a swap message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub amount_in: u128,
    pub estimated_output: u128,
    pub minimum_output: u128,
    pub price_impact_percent: Decimal,
    pub fee_amount: u128,
    /// Ordered token addresses, input first
    pub route: Vec<String>,
}

impl SwapQuote {
    /// Price a swap of `amount_in` against the given reserves
    pub fn compute(
        amount_in: u128,
        reserve_in: u128,
        reserve_out: u128,
        fee_bps: BasisPoints,
        slippage: BasisPoints,
        route: Vec<String>,
    ) -> Result<Self, QuoteError> {
        let estimated_output = compute_output(amount_in, reserve_in, reserve_out, fee_bps)?;
        let minimum_output = minimum_output(estimated_output, slippage);
        let price_impact_percent =
            price_impact(amount_in, estimated_output, reserve_in, reserve_out)?;

        Ok(Self {
            amount_in,
            estimated_output,
            minimum_output,
            price_impact_percent,
            fee_amount: fee(amount_in, fee_bps),
            route,
        })
    }
}

/// Output amount for `amount_in` after the pool fee
pub fn compute_output(
    amount_in: u128,
    reserve_in: u128,
    reserve_out: u128,
    fee_bps: BasisPoints,
) -> Result<u128, QuoteError> {
    if reserve_in == 0 || reserve_out == 0 {
        return Err(QuoteError::PoolEmpty);
    }
    if amount_in == 0 {
        return Err(QuoteError::InvalidAmount);
    }

    // amount_in × complement × reserve_out can exceed 256 bits
    let amount_in_with_fee = U256::from(amount_in) * U256::from(fee_bps.complement());
    let numerator = amount_in_with_fee
        .checked_mul(U256::from(reserve_out))
        .ok_or(QuoteError::Overflow)?;
    let denominator = (U256::from(reserve_in) * U256::from(BPS_DENOMINATOR))
        .checked_add(amount_in_with_fee)
        .ok_or(QuoteError::Overflow)?;

    u128::try_from(numerator / denominator).map_err(|_| QuoteError::Overflow)
}

/// Worst acceptable output under the given slippage tolerance
pub fn minimum_output(estimated_output: u128, slippage: BasisPoints) -> u128 {
    // complement <= denominator, so the quotient never exceeds the input
    mul_div(estimated_output, slippage.complement(), BPS_DENOMINATOR).unwrap_or(0)
}

/// Deviation of the execution price from the spot price, in percent
pub fn price_impact(
    amount_in: u128,
    amount_out: u128,
    reserve_in: u128,
    reserve_out: u128,
) -> Result<Decimal, QuoteError> {
    if reserve_in == 0 || reserve_out == 0 {
        return Err(QuoteError::PoolEmpty);
    }
    if amount_in == 0 {
        return Err(QuoteError::InvalidAmount);
    }

    let spot = to_decimal(reserve_out)?
        .checked_div(to_decimal(reserve_in)?)
        .ok_or(QuoteError::Overflow)?;
    if spot.is_zero() {
        // Reserves too lopsided to express; treat the trade as moving the whole price
        return Ok(dec!(100));
    }
    let execution = to_decimal(amount_out)?
        .checked_div(to_decimal(amount_in)?)
        .ok_or(QuoteError::Overflow)?;

    (spot - execution)
        .checked_div(spot)
        .and_then(|ratio| ratio.checked_mul(dec!(100)))
        .ok_or(QuoteError::Overflow)
}

/// Pool fee charged on `amount_in`
pub fn fee(amount_in: u128, fee_bps: BasisPoints) -> u128 {
    // fee_bps <= denominator, so the quotient never exceeds the input
    mul_div(amount_in, fee_bps.get() as u128, BPS_DENOMINATOR).unwrap_or(amount_in)
}

fn to_decimal(value: u128) -> Result<Decimal, QuoteError> {
    i128::try_from(value)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, 0).ok())
        .ok_or(QuoteError::Overflow)
}
