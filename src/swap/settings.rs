//! Session-scoped swap settings

use crate::amm::BasisPoints;
use crate::config::SwapConfig;
use crate::error::ValidationError;

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const DEADLINE_MINUTES: RangeInclusive<u32> = 1..=60;

/// Slippage tolerance and deadline chosen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapSettings {
    pub slippage: BasisPoints,
    pub deadline_minutes: u32,
}

/// Partial settings change; absent fields keep their value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsUpdate {
    pub slippage_bps: Option<u32>,
    pub deadline_minutes: Option<u32>,
}

impl SwapSettings {
    pub fn new(slippage_bps: u32, deadline_minutes: u32) -> Result<Self, ValidationError> {
        let slippage = BasisPoints::new(slippage_bps)?;
        if !DEADLINE_MINUTES.contains(&deadline_minutes) {
            return Err(ValidationError::DeadlineOutOfRange(deadline_minutes));
        }
        Ok(Self {
            slippage,
            deadline_minutes,
        })
    }

    pub fn from_config(config: &SwapConfig) -> Result<Self, ValidationError> {
        Self::new(config.slippage_bps, config.deadline_minutes)
    }

    pub fn deadline_secs(&self) -> i64 {
        self.deadline_minutes as i64 * 60
    }

    /// Apply `update` if every field is in range. Returns whether the
    /// slippage changed, which invalidates the current quote.
    pub fn apply(&mut self, update: SettingsUpdate) -> Result<bool, ValidationError> {
        let next = Self::new(
            update.slippage_bps.unwrap_or(self.slippage.get()),
            update.deadline_minutes.unwrap_or(self.deadline_minutes),
        )?;
        let slippage_changed = next.slippage != self.slippage;
        *self = next;
        Ok(slippage_changed)
    }
}
