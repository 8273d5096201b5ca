use std::fs;

use log::{info, warn};

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::config::{ConsensusConfig, StorageConfig};
use crate::error::ChainError;
use crate::registry::WalletRegistry;
use crate::wallet::Wallet;
use crate::Result;

/// File-backed persistence: the chain and the registry subset as JSON
/// documents, the price as a plain decimal text file.
///
/// Loads never fail the caller — missing or corrupt files fall back to a
/// freshly synthesized default state. Saves are best-effort after the
/// in-memory mutation; callers log failures and move on.
pub struct Storage {
    config: StorageConfig,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)
            .map_err(|e| ChainError::Persistence(format!("cannot create data dir: {e}")))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /* ---------------------------- chain ---------------------------- */

    pub fn save_chain(&self, chain: &Blockchain) -> Result<()> {
        let json = serde_json::to_string(chain.blocks())?;
        fs::write(self.config.chain_path(), json)
            .map_err(|e| ChainError::Persistence(format!("cannot write chain file: {e}")))
    }

    /// Load the chain, or synthesize a fresh genesis chain crediting the
    /// supply wallet when the file is missing, empty or corrupt.
    pub fn load_chain(&self, consensus: &ConsensusConfig, supply_address: &str) -> Blockchain {
        let fresh = || {
            Blockchain::new(
                &consensus.chain_name,
                consensus.difficulty,
                supply_address,
                consensus.genesis_supply,
            )
        };
        let path = self.config.chain_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => {
                info!("No chain file at {} - creating a fresh chain", path.display());
                return fresh();
            }
        };
        match serde_json::from_str::<Vec<Block>>(&raw) {
            Ok(blocks) if !blocks.is_empty() => {
                info!("Loaded {} block(s) from {}", blocks.len(), path.display());
                Blockchain::from_blocks(blocks, &consensus.chain_name, consensus.difficulty)
            }
            Ok(_) => {
                warn!("Chain file is empty - creating a fresh chain");
                fresh()
            }
            Err(e) => {
                warn!("Chain file is corrupt ({e}) - creating a fresh chain");
                fresh()
            }
        }
    }

    pub fn chain_file_len(&self) -> u64 {
        fs::metadata(self.config.chain_path())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Size check for compaction-by-discard: true when the serialized
    /// chain exceeds the configured threshold.
    pub fn chain_file_oversized(&self) -> bool {
        self.chain_file_len() > self.config.max_chain_file_bytes
    }

    /* --------------------------- registry -------------------------- */

    pub fn save_registry(&self, registry: &WalletRegistry) -> Result<()> {
        let json = serde_json::to_string(&registry.persisted_subset())?;
        fs::write(self.config.registry_path(), json)
            .map_err(|e| ChainError::Persistence(format!("cannot write registry file: {e}")))
    }

    /// Load the persisted registry subset, restoring key material. Returns
    /// `None` when the file is missing or unusable; the caller seeds a
    /// fresh registry in that case.
    pub fn load_registry(&self) -> Option<WalletRegistry> {
        let path = self.config.registry_path();
        let raw = fs::read_to_string(&path).ok()?;
        let mut wallets: Vec<Wallet> = match serde_json::from_str(&raw) {
            Ok(wallets) => wallets,
            Err(e) => {
                warn!("Registry file is corrupt ({e}) - starting with a fresh registry");
                return None;
            }
        };
        for wallet in &mut wallets {
            if let Err(e) = wallet.restore_keys() {
                warn!("Cannot restore wallet keys ({e}) - starting with a fresh registry");
                return None;
            }
        }
        match WalletRegistry::from_persisted(wallets) {
            Ok(registry) => {
                info!("Registry loaded from {}", path.display());
                Some(registry)
            }
            Err(e) => {
                warn!("Registry document unusable ({e}) - starting with a fresh registry");
                None
            }
        }
    }

    /* ---------------------------- price ---------------------------- */

    pub fn save_price(&self, price: f64) -> Result<()> {
        fs::write(self.config.price_path(), format!("{price}"))
            .map_err(|e| ChainError::Persistence(format!("cannot write price file: {e}")))
    }

    pub fn load_price(&self, default: f64) -> f64 {
        match fs::read_to_string(self.config.price_path()) {
            Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!("Price file unreadable - using default {default}");
                default
            }),
            Err(_) => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_in(dir: &std::path::Path) -> Storage {
        let config = StorageConfig {
            data_dir: dir.to_path_buf(),
            ..StorageConfig::default()
        };
        Storage::new(config).unwrap()
    }

    #[test]
    fn test_chain_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        let consensus = ConsensusConfig::default();

        let mut chain = storage.load_chain(&consensus, "1SupplyAddr");
        chain.add_block(vec![crate::transaction::Transaction::system(
            "1Recipient",
            42.0,
            "grant",
        )]);
        storage.save_chain(&chain).unwrap();

        let reloaded = storage.load_chain(&consensus, "1SupplyAddr");
        assert_eq!(reloaded.len(), chain.len());
        assert_eq!(reloaded.tip_hash(), chain.tip_hash());
        assert!(reloaded.is_valid());
    }

    #[test]
    fn test_corrupt_chain_falls_back_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        std::fs::write(storage.config().chain_path(), "not json at all").unwrap();

        let chain = storage.load_chain(&ConsensusConfig::default(), "1SupplyAddr");
        assert_eq!(chain.len(), 1);
        assert!(chain.is_valid());
        assert_eq!(chain.blocks()[0].transactions[0].recipient, "1SupplyAddr");
    }

    #[test]
    fn test_registry_roundtrip_restores_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());

        let registry = WalletRegistry::new();
        registry.create_wallet();
        storage.save_registry(&registry).unwrap();

        let restored = storage.load_registry().unwrap();
        assert_eq!(restored.supply_address(), registry.supply_address());
        // User wallets are not durable; only the supply record comes back.
        assert_eq!(restored.user_count(), 0);
        // The restored supply wallet can still sign (keys rebuilt).
        let chain = Blockchain::new("T", 1, restored.supply_address(), 100.0);
        restored.recalculate_all_balances(&chain);
        let tx = restored
            .sign_transfer(restored.supply_address(), "1Recipient", 10.0, "m")
            .unwrap();
        assert!(!tx.signature.is_empty());
    }

    #[test]
    fn test_missing_registry_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        assert!(storage.load_registry().is_none());
    }

    #[test]
    fn test_price_roundtrip_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        assert_eq!(storage.load_price(0.1), 0.1);
        storage.save_price(1.2345).unwrap();
        assert_eq!(storage.load_price(0.1), 1.2345);
    }

    #[test]
    fn test_oversize_detection() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            ..StorageConfig::default()
        };
        config.max_chain_file_bytes = 64;
        let storage = Storage::new(config).unwrap();
        assert!(!storage.chain_file_oversized());
        std::fs::write(storage.config().chain_path(), vec![b'x'; 65]).unwrap();
        assert!(storage.chain_file_oversized());
    }
}
