//! Two-token constant-product pool state

use super::quote::compute_output;
use super::BasisPoints;
use crate::error::{ClientResult, ProtocolError, QuoteError};

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Reserves of a pool, oriented for a given swap direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserves {
    pub reserve_in: u128,
    pub reserve_out: u128,
}

/// Result of a swap applied to a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOutcome {
    pub amount_in: u128,
    pub amount_out: u128,
    pub k_before: U256,
    pub k_after: U256,
}

/// A constant-product pool between `token_a` and `token_b`.
///
/// The fee component of every input stays in the pool, so `k` is
/// non-decreasing across swaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub address: String,
    pub token_a: String,
    pub token_b: String,
    reserve_a: u128,
    reserve_b: u128,
    pub fee_bps: BasisPoints,
}

impl Pool {
    pub fn new(
        address: impl Into<String>,
        token_a: impl Into<String>,
        token_b: impl Into<String>,
        reserve_a: u128,
        reserve_b: u128,
        fee_bps: BasisPoints,
    ) -> Result<Self, QuoteError> {
        if reserve_a == 0 || reserve_b == 0 {
            return Err(QuoteError::PoolEmpty);
        }
        Ok(Self {
            address: address.into(),
            token_a: token_a.into(),
            token_b: token_b.into(),
            reserve_a,
            reserve_b,
            fee_bps,
        })
    }

    /// Whether this pool trades the given pair, in either direction
    pub fn trades(&self, token_in: &str, token_out: &str) -> bool {
        (self.token_a == token_in && self.token_b == token_out)
            || (self.token_b == token_in && self.token_a == token_out)
    }

    /// Reserves oriented so that `token_in` is the input side
    pub fn reserves_for(&self, token_in: &str) -> Option<Reserves> {
        if token_in == self.token_a {
            Some(Reserves {
                reserve_in: self.reserve_a,
                reserve_out: self.reserve_b,
            })
        } else if token_in == self.token_b {
            Some(Reserves {
                reserve_in: self.reserve_b,
                reserve_out: self.reserve_a,
            })
        } else {
            None
        }
    }

    /// Constant-product invariant `reserve_a × reserve_b`
    pub fn k(&self) -> U256 {
        U256::from(self.reserve_a) * U256::from(self.reserve_b)
    }

    /// Execute a swap, refusing outputs below `min_out`
    pub fn swap(&mut self, token_in: &str, amount_in: u128, min_out: u128) -> ClientResult<SwapOutcome> {
        let reserves = self
            .reserves_for(token_in)
            .ok_or_else(|| QuoteError::PoolUnreachable(format!("{} not in pool", token_in)))?;

        let amount_out =
            compute_output(amount_in, reserves.reserve_in, reserves.reserve_out, self.fee_bps)?;
        if amount_out < min_out {
            return Err(ProtocolError::SlippageTooHigh {
                minimum: min_out,
                actual: amount_out,
            }
            .into());
        }

        let new_in = reserves
            .reserve_in
            .checked_add(amount_in)
            .ok_or(QuoteError::Overflow)?;
        // amount_out < reserve_out always holds for positive reserves
        let new_out = reserves.reserve_out - amount_out;

        let k_before = self.k();
        if token_in == self.token_a {
            self.reserve_a = new_in;
            self.reserve_b = new_out;
        } else {
            self.reserve_b = new_in;
            self.reserve_a = new_out;
        }

        Ok(SwapOutcome {
            amount_in,
            amount_out,
            k_before,
            k_after: self.k(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use proptest::prelude::*;

    fn pool(reserve_a: u128, reserve_b: u128, fee: u32) -> Pool {
        Pool::new(
            "pool",
            "A",
            "B",
            reserve_a,
            reserve_b,
            BasisPoints::new(fee).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(Pool::new("p", "A", "B", 0, 1, BasisPoints::ZERO).is_err());
    }

    #[test]
    fn test_reserves_orientation() {
        let p = pool(5, 7, 30);
        assert_eq!(p.reserves_for("B").unwrap().reserve_in, 7);
        assert!(p.reserves_for("C").is_none());
        assert!(p.trades("B", "A"));
    }

    #[test]
    fn test_swap_updates_reserves() {
        let mut p = pool(100_000_000_000, 100_000_000_000, 30);
        let outcome = p.swap("A", 10_000_000_000, 0).unwrap();
        assert_eq!(outcome.amount_out, 9_066_108_938);
        assert_eq!(p.reserves_for("A").unwrap().reserve_in, 110_000_000_000);
        assert_eq!(
            p.reserves_for("A").unwrap().reserve_out,
            100_000_000_000 - 9_066_108_938
        );
        assert!(outcome.k_after > outcome.k_before);
    }

    #[test]
    fn test_swap_below_minimum_leaves_pool_untouched() {
        let mut p = pool(100, 100, 30);
        let before = p.clone();
        let err = p.swap("A", 10, 50).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::SlippageTooHigh { minimum: 50, .. })
        ));
        assert_eq!(p, before);
    }

    proptest! {
        #[test]
        fn prop_k_never_decreases(
            reserve_a in 1u128..=u64::MAX as u128,
            reserve_b in 1u128..=u64::MAX as u128,
            amount_in in 1u128..=u64::MAX as u128,
            fee in 0u32..=1_000,
            a_to_b in any::<bool>(),
        ) {
            let mut p = pool(reserve_a, reserve_b, fee);
            let token_in = if a_to_b { "A" } else { "B" };
            let outcome = p.swap(token_in, amount_in, 0).unwrap();
            prop_assert!(outcome.k_after >= outcome.k_before);
        }
    }
}
