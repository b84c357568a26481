//! Static chain table, loaded once from configuration

use crate::config::ChainConfig;

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Confirmations assumed for a destination missing from the table
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u32 = 1;

/// An enabled bridge endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chain {
    pub id: u32,
    pub name: String,
    pub native_token: String,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub estimated_confirmation_minutes: u32,
    pub required_confirmations: u32,
}

impl From<&ChainConfig> for Chain {
    fn from(config: &ChainConfig) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            native_token: config.native_token.clone(),
            min_amount: config.min_amount,
            max_amount: config.max_amount,
            estimated_confirmation_minutes: config.estimated_confirmation_minutes,
            required_confirmations: config.required_confirmations.max(1),
        }
    }
}

/// Immutable, cheaply clonable lookup of enabled chains by id
#[derive(Debug, Clone, Default)]
pub struct ChainTable {
    chains: Arc<BTreeMap<u32, Chain>>,
}

impl ChainTable {
    pub fn from_config(configs: &[ChainConfig]) -> Self {
        let chains = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| (c.id, Chain::from(c)))
            .collect();
        Self {
            chains: Arc::new(chains),
        }
    }

    pub fn get(&self, id: u32) -> Option<&Chain> {
        self.chains.get(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }

    /// Confirmations the destination chain needs before a transfer completes
    pub fn required_confirmations(&self, target_chain_id: u32) -> u32 {
        self.get(target_chain_id)
            .map(|c| c.required_confirmations)
            .unwrap_or(DEFAULT_REQUIRED_CONFIRMATIONS)
    }
}
