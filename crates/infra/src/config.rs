//! Engine configuration.
//!
//! Layered loading:
//! 1. Default values in code
//! 2. Optional file `config/stockledger.toml`
//! 3. Environment overrides with the `STOCKLEDGER` prefix and `__` separator
//!    (e.g. `STOCKLEDGER__RECEIVING__ALLOW_OVER_RECEIPT=true`)
//!
//! A `.env` file is loaded into the process environment first when present.

use config::{ConfigError, Environment, File, Source};
use serde::Deserialize;

use stockledger_core::quantity::DEFAULT_MAX_SCALE;
use stockledger_inventory::AllocationPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "config/stockledger";
pub const ENV_PREFIX: &str = "STOCKLEDGER";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct EngineConfig {
    pub allocation: AllocationConfig,
    pub receiving: ReceivingConfig,
    pub quantity: QuantityConfig,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AllocationConfig {
    /// Row order for implicit allocation.
    pub policy: AllocationPolicy,

    /// Ignore lots past their expiry date unless the caller pins the lot.
    pub skip_expired_lots: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            policy: AllocationPolicy::FifoByExpiry,
            skip_expired_lots: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceivingConfig {
    /// Accept receipts beyond the expected quantity.
    pub allow_over_receipt: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct QuantityConfig {
    /// Maximum decimal places accepted on a quantity.
    pub max_scale: u32,
}

impl Default for QuantityConfig {
    fn default() -> Self {
        Self {
            max_scale: DEFAULT_MAX_SCALE,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Connection URL; the relational engine is unused when absent.
    pub url: Option<String>,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `.env`, the optional config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        // a missing .env file is not an error
        let _ = dotenvy::dotenv();

        Self::load_from(
            File::with_name(DEFAULT_CONFIG_FILE).required(false),
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
    }

    /// Build from explicit sources layered over the defaults.
    pub fn load_from<F, E>(file: F, env: E) -> Result<Self, ConfigError>
    where
        F: Source + Send + Sync + 'static,
        E: Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .set_default("allocation.policy", "fifo_by_expiry")?
            .set_default("allocation.skip_expired_lots", true)?
            .set_default("receiving.allow_over_receipt", false)?
            .set_default("quantity.max_scale", i64::from(DEFAULT_MAX_SCALE))?
            .set_default("postgres.max_connections", 10)?
            .add_source(file)
            .add_source(env)
            .build()?;

        config.try_deserialize()
    }
}
