use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ChainError;
use crate::Result;

/// Top-level configuration for the ledger and its simulation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub consensus: ConsensusConfig,
    pub storage: StorageConfig,
    pub price: PriceConfig,
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from a TOML file with environment overrides.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("MYCHAIN_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(difficulty) = std::env::var("MYCHAIN_DIFFICULTY") {
            if let Ok(value) = difficulty.parse::<usize>() {
                self.consensus.difficulty = value;
            }
        }
        if let Ok(bias) = std::env::var("MYCHAIN_BUY_BIAS") {
            if let Ok(value) = bias.parse::<f64>() {
                self.simulation.buy_bias = value.clamp(0.0, 1.0);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.consensus.validate()?;
        self.storage.validate()?;
        self.price.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

/// Ledger parameters. Difficulty bounds mining latency, not security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub chain_name: String,
    pub difficulty: usize,
    pub genesis_supply: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            chain_name: "MyChain".to_string(),
            difficulty: 1,
            genesis_supply: 1_000_000_000_000_000.0,
        }
    }
}

impl ConsensusConfig {
    fn validate(&self) -> Result<()> {
        if self.chain_name.is_empty() {
            return Err(ChainError::InvalidConfig("chain_name must not be empty".into()));
        }
        if self.difficulty == 0 || self.difficulty > 8 {
            return Err(ChainError::InvalidConfig(
                "difficulty must be between 1 and 8 leading zero hex chars".into(),
            ));
        }
        if self.genesis_supply <= 0.0 {
            return Err(ChainError::InvalidConfig("genesis_supply must be positive".into()));
        }
        Ok(())
    }
}

/// File locations and the compaction threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub chain_file: String,
    pub registry_file: String,
    pub price_file: String,
    /// Serialized chain size above which the chain is truncated back to
    /// the genesis block (compaction-by-discard).
    pub max_chain_file_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./chain-data"),
            chain_file: "blockchain.json".to_string(),
            registry_file: "wallets.json".to_string(),
            price_file: "price.txt".to_string(),
            max_chain_file_bytes: 1024 * 1024,
        }
    }
}

impl StorageConfig {
    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join(&self.chain_file)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(&self.registry_file)
    }

    pub fn price_path(&self) -> PathBuf {
        self.data_dir.join(&self.price_file)
    }

    fn validate(&self) -> Result<()> {
        if self.max_chain_file_bytes < 4096 {
            return Err(ChainError::InvalidConfig(
                "max_chain_file_bytes must be at least 4096".into(),
            ));
        }
        Ok(())
    }
}

/// Synthetic market constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceConfig {
    pub initial_price: f64,
    /// Linear impact coefficient: impact = amount * impact_factor * price.
    pub impact_factor: f64,
    /// Bounded symmetric noise applied after every committed trade.
    pub base_volatility: f64,
    /// Sell-side circuit breaker: reject a trade whose impact magnitude
    /// exceeds this fraction of the current price.
    pub max_drop_fraction: f64,
    pub price_floor: f64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            initial_price: 0.1,
            impact_factor: 1e-8,
            base_volatility: 1e-5,
            max_drop_fraction: 0.6,
            price_floor: 0.01,
        }
    }
}

impl PriceConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_price <= 0.0 || self.price_floor <= 0.0 {
            return Err(ChainError::InvalidConfig("prices must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.max_drop_fraction) {
            return Err(ChainError::InvalidConfig(
                "max_drop_fraction must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Scheduler tuning. Every knob of the four timers lives here so divergent
/// tuning revisions become configuration instead of code forks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    // Wallet-creation timer
    pub initial_wallet_period_ms: u64,
    pub min_wallet_period_ms: u64,
    /// Multiplicative decay applied each time the user-wallet count crosses
    /// a threshold multiple.
    pub period_multiplier: f64,
    pub period_threshold: usize,

    // Trade timer: the delay window narrows as the peak wallet count grows.
    pub trade_min_delay_base_ms: u64,
    pub trade_max_delay_base_ms: u64,
    pub trade_min_delay_floor_ms: u64,
    pub delay_reduction_per_wallet_ms: u64,

    // Observer timers
    pub update_period_ms: u64,
    pub price_tick_ms: u64,

    // Trade shaping
    pub buy_bias: f64,
    pub min_trade_fraction: f64,
    pub max_trade_fraction: f64,
    pub min_trade_usd: f64,
    pub max_trade_usd: f64,
    /// Coin amounts below this are rejected outright.
    pub dust_coin_amount: f64,
    /// Wallets whose coin balance is below this are forced to buy.
    pub dust_balance: f64,
    /// Balance headroom required beyond the traded amount.
    pub balance_headroom: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_wallet_period_ms: 1000,
            min_wallet_period_ms: 100,
            period_multiplier: 0.95,
            period_threshold: 50,
            trade_min_delay_base_ms: 300,
            trade_max_delay_base_ms: 900,
            trade_min_delay_floor_ms: 10,
            delay_reduction_per_wallet_ms: 1,
            update_period_ms: 10_000,
            price_tick_ms: 1000,
            buy_bias: 0.5,
            min_trade_fraction: 0.33,
            max_trade_fraction: 0.95,
            min_trade_usd: 1.0,
            max_trade_usd: 10_000_000_000.0,
            dust_coin_amount: 0.001,
            dust_balance: 0.01,
            balance_headroom: 0.01,
        }
    }
}

impl SimulationConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.buy_bias) {
            return Err(ChainError::InvalidConfig("buy_bias must be within [0, 1]".into()));
        }
        if !(0.0..1.0).contains(&self.period_multiplier) {
            return Err(ChainError::InvalidConfig(
                "period_multiplier must be within (0, 1)".into(),
            ));
        }
        if self.period_threshold == 0 {
            return Err(ChainError::InvalidConfig("period_threshold must be positive".into()));
        }
        if self.min_trade_fraction >= self.max_trade_fraction {
            return Err(ChainError::InvalidConfig(
                "min_trade_fraction must be below max_trade_fraction".into(),
            ));
        }
        if self.trade_min_delay_base_ms > self.trade_max_delay_base_ms {
            return Err(ChainError::InvalidConfig(
                "trade delay window is inverted".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `load_from_file` reads process-global environment variables, so the
    // tests touching them serialize on this lock.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_toml_roundtrip() {
        let _env = ENV_LOCK.lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mychain.toml");
        let config = Config::default();
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.consensus.chain_name, config.consensus.chain_name);
        assert_eq!(loaded.consensus.difficulty, config.consensus.difficulty);
        assert_eq!(loaded.simulation.buy_bias, config.simulation.buy_bias);
        assert_eq!(loaded.storage.max_chain_file_bytes, config.storage.max_chain_file_bytes);
    }

    #[test]
    fn test_env_overrides() {
        let _env = ENV_LOCK.lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mychain.toml");
        Config::default().save_to_file(&path).unwrap();

        std::env::set_var("MYCHAIN_DATA_DIR", "/tmp/override-data");
        std::env::set_var("MYCHAIN_DIFFICULTY", "2");
        std::env::set_var("MYCHAIN_BUY_BIAS", "0.75");
        let loaded = Config::load_from_file(&path).unwrap();
        std::env::remove_var("MYCHAIN_DATA_DIR");
        std::env::remove_var("MYCHAIN_DIFFICULTY");
        std::env::remove_var("MYCHAIN_BUY_BIAS");

        assert_eq!(loaded.storage.data_dir, PathBuf::from("/tmp/override-data"));
        assert_eq!(loaded.consensus.difficulty, 2);
        assert_eq!(loaded.simulation.buy_bias, 0.75);
    }

    #[test]
    fn test_env_override_clamps_buy_bias() {
        let _env = ENV_LOCK.lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mychain.toml");
        Config::default().save_to_file(&path).unwrap();

        std::env::set_var("MYCHAIN_BUY_BIAS", "3.0");
        let loaded = Config::load_from_file(&path).unwrap();
        std::env::remove_var("MYCHAIN_BUY_BIAS");

        assert_eq!(loaded.simulation.buy_bias, 1.0);
        loaded.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.consensus.difficulty = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.simulation.buy_bias = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.price.max_drop_fraction = -0.1;
        assert!(config.validate().is_err());
    }
}
