use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::config::Config;
use crate::price::PriceModel;
use crate::registry::WalletRegistry;
use crate::storage::Storage;
use crate::transaction::Transaction;
use crate::wallet::Wallet;
use crate::{Result, EXCHANGE_ADDRESS};

/// Why a transfer or trade was rejected. Carried as a value; rejections
/// leave the chain, balances and price untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    InsufficientCoins { needed: f64, available: f64 },
    InsufficientUsd { needed: f64, available: f64 },
    UnknownParticipant(String),
    SupplyExhausted { needed: f64, available: f64 },
    CircuitBreaker,
    BelowDust,
}

/// Structured result of a transfer/trade submitted at the operation
/// boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Completed {
        amount: f64,
        usd_value: f64,
        new_price: f64,
    },
    Rejected(RejectReason),
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed { .. })
    }
}

/// The application context: one instance owns the chain, the registry,
/// the price model and the persistence layer, and serializes every
/// mutation through a single settlement lock.
///
/// Constructed once at startup and shared by handle; replaces the
/// process-wide singletons of earlier designs.
pub struct ChainContext {
    config: Config,
    storage: Storage,
    chain: RwLock<Blockchain>,
    registry: WalletRegistry,
    price: Mutex<PriceModel>,
    /// Guards the append-settle sequence: block append, compaction check,
    /// persistence and balance replay happen as one critical section.
    settle: Mutex<()>,
}

impl ChainContext {
    /// Load persisted state (or synthesize defaults), replay balances and
    /// return a ready context.
    pub fn load(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Storage::new(config.storage.clone())?;

        let registry = storage.load_registry().unwrap_or_else(|| {
            info!("Starting with a fresh registry");
            WalletRegistry::new()
        });
        registry.seed_user_wallet_if_missing();

        let chain = storage.load_chain(&config.consensus, registry.supply_address());
        let initial_price = storage.load_price(config.price.initial_price);
        let price = PriceModel::new(initial_price, config.price.clone());

        registry.recalculate_all_balances(&chain);

        let context = Self {
            config,
            storage,
            chain: RwLock::new(chain),
            registry,
            price: Mutex::new(price),
            settle: Mutex::new(()),
        };
        context.persist_all();
        Ok(context)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &WalletRegistry {
        &self.registry
    }

    pub fn supply_address(&self) -> &str {
        self.registry.supply_address()
    }

    pub fn current_price(&self) -> f64 {
        self.price.lock().current_price()
    }

    pub fn list_wallets(&self) -> Vec<Wallet> {
        self.registry.snapshot()
    }

    pub fn list_blocks(&self) -> Vec<Block> {
        self.chain.read().blocks().to_vec()
    }

    pub fn chain_len(&self) -> usize {
        self.chain.read().len()
    }

    /// Read-only integrity probe over the whole chain.
    pub fn validate(&self) -> bool {
        self.chain.read().is_valid()
    }

    /// Create a user wallet and persist the registry subset.
    pub fn create_wallet(&self) -> Wallet {
        let wallet = self.registry.create_wallet();
        if let Err(e) = self.storage.save_registry(&self.registry) {
            warn!("Registry persistence failed: {e}");
        }
        wallet
    }

    /// Presentation-layer transfer entry point. Sends to the exchange sink
    /// settle as sells, transfers originating from the supply wallet as
    /// buys paid by the recipient; everything else is a plain signed
    /// wallet-to-wallet transfer with no price impact.
    pub fn submit_transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        message: &str,
    ) -> Result<TransferOutcome> {
        if to == EXCHANGE_ADDRESS {
            return self.execute_sell(from, amount, message);
        }
        if from == self.registry.supply_address() {
            let usd_value = amount * self.current_price();
            return self.execute_buy(to, amount, usd_value, message);
        }
        self.execute_plain_transfer(from, to, amount, message)
    }

    /// Buy leg: the trader pays USD, the supply wallet transfers coins.
    /// Succeeds only if both the USD debit and the supply balance suffice.
    pub fn execute_buy(
        &self,
        trader: &str,
        coin_amount: f64,
        usd_value: f64,
        message: &str,
    ) -> Result<TransferOutcome> {
        let _guard = self.settle.lock();
        let headroom = self.config.simulation.balance_headroom;

        let usd_available = match self.registry.usd_balance(trader) {
            Some(balance) => balance,
            None => {
                return Ok(TransferOutcome::Rejected(RejectReason::UnknownParticipant(
                    trader.to_string(),
                )))
            }
        };
        if usd_available < usd_value {
            return Ok(TransferOutcome::Rejected(RejectReason::InsufficientUsd {
                needed: usd_value,
                available: usd_available,
            }));
        }

        let supply_address = self.registry.supply_address().to_string();
        let supply_coins = self.registry.coin_balance(&supply_address).unwrap_or(0.0);
        if supply_coins < coin_amount + headroom {
            return Ok(TransferOutcome::Rejected(RejectReason::SupplyExhausted {
                needed: coin_amount,
                available: supply_coins,
            }));
        }

        self.registry.debit_usd(trader, usd_value)?;
        let tx = self
            .registry
            .sign_transfer(&supply_address, trader, coin_amount, message)?;
        let new_price = {
            let mut price = self.price.lock();
            price.execute_trade(coin_amount, true);
            price.current_price()
        };
        self.settle_block(vec![tx]);

        Ok(TransferOutcome::Completed {
            amount: coin_amount,
            usd_value,
            new_price,
        })
    }

    /// Sell leg: coins go to the exchange sink (out of circulation), the
    /// trader is credited USD at the pre-trade price. The price circuit
    /// breaker is consulted before any state changes.
    pub fn execute_sell(
        &self,
        trader: &str,
        coin_amount: f64,
        message: &str,
    ) -> Result<TransferOutcome> {
        let _guard = self.settle.lock();
        let headroom = self.config.simulation.balance_headroom;

        let coins_available = match self.registry.coin_balance(trader) {
            Some(balance) => balance,
            None => {
                return Ok(TransferOutcome::Rejected(RejectReason::UnknownParticipant(
                    trader.to_string(),
                )))
            }
        };
        if coins_available < coin_amount + headroom {
            return Ok(TransferOutcome::Rejected(RejectReason::InsufficientCoins {
                needed: coin_amount,
                available: coins_available,
            }));
        }

        let usd_value;
        let new_price;
        {
            let mut price = self.price.lock();
            usd_value = coin_amount * price.current_price();
            if price.execute_trade(coin_amount, false).is_rejected() {
                return Ok(TransferOutcome::Rejected(RejectReason::CircuitBreaker));
            }
            new_price = price.current_price();
        }

        self.registry.credit_usd(trader, usd_value)?;
        let tx = self
            .registry
            .sign_transfer(trader, EXCHANGE_ADDRESS, coin_amount, message)?;
        self.settle_block(vec![tx]);

        Ok(TransferOutcome::Completed {
            amount: coin_amount,
            usd_value,
            new_price,
        })
    }

    fn execute_plain_transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        message: &str,
    ) -> Result<TransferOutcome> {
        let _guard = self.settle.lock();
        if !self.registry.contains(to) {
            return Ok(TransferOutcome::Rejected(RejectReason::UnknownParticipant(
                to.to_string(),
            )));
        }
        let tx = match self.registry.sign_transfer(from, to, amount, message) {
            Ok(tx) => tx,
            Err(crate::ChainError::InsufficientFunds { needed, available, .. }) => {
                return Ok(TransferOutcome::Rejected(RejectReason::InsufficientCoins {
                    needed,
                    available,
                }))
            }
            Err(crate::ChainError::InvalidParticipant(addr)) => {
                return Ok(TransferOutcome::Rejected(RejectReason::UnknownParticipant(addr)))
            }
            Err(e) => return Err(e),
        };
        self.settle_block(vec![tx]);
        Ok(TransferOutcome::Completed {
            amount,
            usd_value: 0.0,
            new_price: self.current_price(),
        })
    }

    /// Append-settle sequence, callers hold the settlement lock: mine and
    /// append the block, run the compaction check, persist the chain,
    /// replay all balances, persist the registry and price. Persistence is
    /// best-effort; in-memory state is already committed.
    fn settle_block(&self, transactions: Vec<Transaction>) {
        {
            let mut chain = self.chain.write();
            chain.add_block(transactions);
            if self.storage.chain_file_oversized() {
                warn!(
                    "Chain file exceeds {} bytes - truncating to genesis",
                    self.storage.config().max_chain_file_bytes
                );
                chain.reset_to_genesis();
            }
            if let Err(e) = self.storage.save_chain(&chain) {
                warn!("Chain persistence failed: {e}");
            }
            self.registry.recalculate_all_balances(&chain);
        }
        if let Err(e) = self.storage.save_registry(&self.registry) {
            warn!("Registry persistence failed: {e}");
        }
        if let Err(e) = self.storage.save_price(self.current_price()) {
            warn!("Price persistence failed: {e}");
        }
    }

    fn persist_all(&self) {
        let chain = self.chain.read();
        if let Err(e) = self.storage.save_chain(&chain) {
            warn!("Chain persistence failed: {e}");
        }
        drop(chain);
        if let Err(e) = self.storage.save_registry(&self.registry) {
            warn!("Registry persistence failed: {e}");
        }
        if let Err(e) = self.storage.save_price(self.current_price()) {
            warn!("Price persistence failed: {e}");
        }
    }
}
