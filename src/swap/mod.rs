//! Swap execution
//!
//! Handles:
//! - Debounced quoting with stale-response discard
//! - Single in-flight execution per session
//! - Bounded confirmation wait and balance refresh

pub mod controller;
pub mod settings;

pub use controller::{SwapController, SwapControllerConfig, SwapSnapshot, SwapState};
pub use settings::{SettingsUpdate, SwapSettings};
