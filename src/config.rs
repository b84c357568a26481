//! Configuration management for the swap and bridge client
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub session: SessionConfig,
    pub swap: SwapConfig,
    pub bridge: BridgeConfig,
    pub chains: Vec<ChainConfig>,
    pub validators: ValidatorConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub devnet: DevnetConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Interval between transfer status polls
    pub poll_interval_secs: u64,
    /// Quiet period after the last input change before a quote fires
    pub quote_debounce_ms: u64,
    pub confirmation_attempts: u32,
    pub confirmation_backoff_ms: u64,
    pub confirmation_max_wait_secs: u64,
    /// Upper bound on a single ledger call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    pub router_address: String,
    pub slippage_bps: u32,
    pub deadline_minutes: u32,
    /// Percent; quotes with a larger price impact are not executed
    pub max_price_impact_percent: Decimal,
    /// Native value attached to a swap message to cover execution, nano units
    #[serde(default = "default_swap_gas", deserialize_with = "nano_amount")]
    pub gas_estimate: u128,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub contract_address: String,
    /// Percentage fee charged on lock, in basis points (30 = 0.3%)
    pub percentage_fee_bps: u32,
    /// Fixed gas estimate in nano units
    #[serde(deserialize_with = "nano_amount")]
    pub gas_estimate: u128,
    /// How long a lock message stays valid
    pub lock_valid_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub id: u32,
    pub name: String,
    pub native_token: String,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub estimated_confirmation_minutes: u32,
    pub required_confirmations: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    pub min_validators: usize,
    pub whitelist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Seed state for the simulated ledger
#[derive(Debug, Clone, Deserialize)]
pub struct DevnetConfig {
    pub wallet_address: String,
    pub native_token: String,
    /// Base bridge fee in nano units
    #[serde(deserialize_with = "nano_amount")]
    pub base_fee: u128,
    #[serde(default)]
    pub pools: Vec<DevnetPool>,
    #[serde(default)]
    pub balances: Vec<DevnetBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevnetPool {
    pub address: String,
    pub token_a: String,
    pub token_b: String,
    #[serde(deserialize_with = "nano_amount")]
    pub reserve_a: u128,
    #[serde(deserialize_with = "nano_amount")]
    pub reserve_b: u128,
    pub fee_bps: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevnetBalance {
    pub token: String,
    #[serde(deserialize_with = "nano_amount")]
    pub amount: u128,
}

fn default_true() -> bool {
    true
}

fn default_swap_gas() -> u128 {
    100_000_000
}

/// Nano-unit quantity written either as a TOML integer or, past the
/// 64-bit range TOML integers cover, as a decimal string
fn nano_amount<'de, D>(deserializer: D) -> std::result::Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Integer(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Integer(value) => Ok(u128::from(value)),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|e| de::Error::custom(format!("invalid amount {:?}: {}", text, e))),
    }
}

fn default_request_timeout() -> u64 {
    10
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAPBRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.id) {
                anyhow::bail!("Chain id {} configured twice", chain.id);
            }
            if chain.min_amount <= Decimal::ZERO || chain.min_amount > chain.max_amount {
                anyhow::bail!(
                    "Chain {} has invalid amount range [{}, {}]",
                    chain.name,
                    chain.min_amount,
                    chain.max_amount
                );
            }
            if chain.required_confirmations == 0 {
                tracing::warn!("Chain {} requires no confirmations - using 1", chain.name);
            }
        }

        if self.swap.slippage_bps > 10_000 {
            anyhow::bail!("Slippage {} bps is outside [0, 10000]", self.swap.slippage_bps);
        }
        if !(1..=60).contains(&self.swap.deadline_minutes) {
            anyhow::bail!(
                "Deadline {} minutes is outside [1, 60]",
                self.swap.deadline_minutes
            );
        }
        if self.bridge.percentage_fee_bps > 10_000 {
            anyhow::bail!("Bridge fee {} bps exceeds 100%", self.bridge.percentage_fee_bps);
        }

        let validators: HashSet<&String> = self.validators.whitelist.iter().collect();
        if self.validators.min_validators == 0 || self.validators.min_validators > validators.len()
        {
            anyhow::bail!(
                "min_validators must be in [1, {}], got {}",
                validators.len(),
                self.validators.min_validators
            );
        }

        if self.session.confirmation_attempts == 0 {
            anyhow::bail!("confirmation_attempts must be at least 1");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<&ChainConfig> {
        self.chains.iter().filter(|c| c.enabled).collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
[session]
poll_interval_secs = 15
quote_debounce_ms = 500
confirmation_attempts = 10
confirmation_backoff_ms = 1500
confirmation_max_wait_secs = 60

[swap]
router_address = "EQRouter"
slippage_bps = 50
deadline_minutes = 20
max_price_impact_percent = "15"

[bridge]
contract_address = "EQBridge"
percentage_fee_bps = 30
gas_estimate = 100000000
lock_valid_secs = 300

[[chains]]
id = 1
name = "TON"
native_token = "TON"
min_amount = "10"
max_amount = "10000"
estimated_confirmation_minutes = 15
required_confirmations = 1

[[chains]]
id = 2
name = "Ethereum"
native_token = "ETH"
min_amount = "0.1"
max_amount = "100"
estimated_confirmation_minutes = 20
required_confirmations = 12

[[chains]]
id = 3
name = "BSC"
native_token = "BNB"
min_amount = "0.1"
max_amount = "500"
estimated_confirmation_minutes = 10
required_confirmations = 5

[validators]
min_validators = 3
whitelist = ["VA", "VB", "VC", "VD"]

[store]
directory = "${SWAPBRIDGE_TEST_STORE_DIR}data"

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[devnet]
wallet_address = "EQWallet"
native_token = "TON"
base_fee = 50000000

[[devnet.pools]]
address = "EQPoolAB"
token_a = "EQTokenA"
token_b = "EQTokenB"
reserve_a = 100000000000
reserve_b = 100000000000
fee_bps = 30

[[devnet.balances]]
token = "EQTokenA"
amount = 50000000000

[[devnet.balances]]
token = "TON"
amount = 1000000000000
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_sample_parses() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        assert_eq!(settings.enabled_chains().len(), 3);
        assert_eq!(settings.chains[1].min_amount, Decimal::new(1, 1));
        assert_eq!(settings.devnet.pools.len(), 1);
        assert_eq!(settings.session.log_format, "text");
    }

    #[test]
    fn test_shipped_config_loads() {
        let settings = Settings::from_toml(include_str!("../config/default.toml")).unwrap();
        assert_eq!(settings.swap.gas_estimate, 100_000_000);
        assert_eq!(settings.bridge.gas_estimate, 100_000_000);
        assert_eq!(settings.devnet.base_fee, 50_000_000);
        assert_eq!(settings.devnet.pools[0].reserve_b, 5_000_000_000_000_000);
        assert_eq!(settings.devnet.balances[0].amount, 5_000_000_000_000);
    }

    #[test]
    fn test_amount_beyond_toml_integers_as_string() {
        let big = SAMPLE.replace(
            "reserve_a = 100000000000\n",
            "reserve_a = \"340282366920938463463374607431768211455\"\n",
        );
        let settings = Settings::from_toml(&big).unwrap();
        assert_eq!(settings.devnet.pools[0].reserve_a, u128::MAX);

        let bad = SAMPLE.replace("base_fee = 50000000", "base_fee = \"fifty\"");
        assert!(Settings::from_toml(&bad).is_err());
        let negative = SAMPLE.replace("base_fee = 50000000", "base_fee = -1");
        assert!(Settings::from_toml(&negative).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_slippage() {
        let bad = SAMPLE.replace("slippage_bps = 50", "slippage_bps = 10001");
        assert!(Settings::from_toml(&bad).is_err());
    }

    #[test]
    fn test_rejects_oversized_quorum() {
        let bad = SAMPLE.replace("min_validators = 3", "min_validators = 5");
        assert!(Settings::from_toml(&bad).is_err());
    }

    #[test]
    fn test_rejects_inverted_amount_range() {
        let bad = SAMPLE.replace("max_amount = \"100\"", "max_amount = \"0.01\"");
        assert!(Settings::from_toml(&bad).is_err());
    }
}
