use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::{debug, info};
use parking_lot::RwLock;
use rand::Rng;

use crate::blockchain::Blockchain;
use crate::crypto::random_password;
use crate::error::ChainError;
use crate::transaction::Transaction;
use crate::wallet::Wallet;
use crate::{Result, EXCHANGE_ADDRESS};

/// Endowment tier selected for a newly created wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletTier {
    Normal,
    Large,
    Mega,
}

/// Durable collection of wallets plus the distinguished supply wallet.
///
/// Iteration happens over cloned snapshots taken under the read lock, so
/// listing and trade-candidate selection tolerate concurrent creation.
/// Coin balances are written only by [`WalletRegistry::recalculate_all_balances`].
pub struct WalletRegistry {
    wallets: RwLock<Vec<Wallet>>,
    next_id: AtomicU64,
    /// Historical peak user-wallet count; drives the trade-delay window.
    peak_user_count: AtomicUsize,
    supply_address: String,
}

impl WalletRegistry {
    /// Fresh registry: a supply wallet with zero USD and nothing else.
    pub fn new() -> Self {
        let supply = Wallet::new("admin", 0.0, 1);
        let supply_address = supply.address().to_string();
        Self {
            wallets: RwLock::new(vec![supply]),
            next_id: AtomicU64::new(2),
            peak_user_count: AtomicUsize::new(0),
            supply_address,
        }
    }

    /// Rebuild a registry from the persisted subset. The first record is
    /// the supply wallet; any further records (an exchange-backed wallet)
    /// are re-added as ordinary entries. Keys must already be restored.
    pub fn from_persisted(persisted: Vec<Wallet>) -> Result<Self> {
        let supply = persisted
            .first()
            .ok_or_else(|| ChainError::Persistence("registry document is empty".into()))?;
        let supply_address = supply.address().to_string();
        let max_id = persisted.iter().map(|w| w.unique_id()).max().unwrap_or(1);
        let user_count = persisted.len() - 1;
        let registry = Self {
            wallets: RwLock::new(persisted),
            next_id: AtomicU64::new(max_id + 1),
            peak_user_count: AtomicUsize::new(user_count),
            supply_address,
        };
        Ok(registry)
    }

    pub fn supply_address(&self) -> &str {
        &self.supply_address
    }

    /// Number of wallets excluding the supply wallet.
    pub fn user_count(&self) -> usize {
        self.wallets.read().len().saturating_sub(1)
    }

    pub fn peak_user_count(&self) -> usize {
        self.peak_user_count.load(Ordering::Relaxed)
    }

    /// Create a user wallet with a tier-scheduled USD endowment and the
    /// next sequential id. Returns a clone of the stored wallet.
    pub fn create_wallet(&self) -> Wallet {
        let mut wallets = self.wallets.write();
        let user_count = wallets.len() - 1;
        let (tier, starting_usd) = select_tier(user_count, &mut rand::thread_rng());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let wallet = Wallet::new(&random_password(), starting_usd, id);
        info!(
            "{:?} wallet #{} created: {:.2} USD ({})",
            tier,
            user_count + 1,
            starting_usd,
            wallet.address()
        );
        wallets.push(wallet.clone());

        let users = wallets.len() - 1;
        self.peak_user_count.fetch_max(users, Ordering::Relaxed);
        wallet
    }

    /// Ensure at least one user wallet exists (fresh-process seeding).
    pub fn seed_user_wallet_if_missing(&self) -> bool {
        if self.user_count() == 0 {
            self.create_wallet();
            true
        } else {
            false
        }
    }

    /// Snapshot of every wallet, supply included.
    pub fn snapshot(&self) -> Vec<Wallet> {
        self.wallets.read().clone()
    }

    /// Snapshot of user wallets only.
    pub fn user_snapshot(&self) -> Vec<Wallet> {
        self.wallets
            .read()
            .iter()
            .filter(|w| w.address() != self.supply_address)
            .cloned()
            .collect()
    }

    pub fn find(&self, address: &str) -> Option<Wallet> {
        self.wallets
            .read()
            .iter()
            .find(|w| w.address() == address)
            .cloned()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.wallets.read().iter().any(|w| w.address() == address)
    }

    pub fn coin_balance(&self, address: &str) -> Option<f64> {
        self.wallets
            .read()
            .iter()
            .find(|w| w.address() == address)
            .map(|w| w.balance)
    }

    pub fn usd_balance(&self, address: &str) -> Option<f64> {
        self.wallets
            .read()
            .iter()
            .find(|w| w.address() == address)
            .map(|w| w.usd_balance)
    }

    pub fn credit_usd(&self, address: &str, amount: f64) -> Result<()> {
        let mut wallets = self.wallets.write();
        let wallet = wallets
            .iter_mut()
            .find(|w| w.address() == address)
            .ok_or_else(|| ChainError::InvalidParticipant(address.to_string()))?;
        wallet.credit_usd(amount);
        Ok(())
    }

    pub fn debit_usd(&self, address: &str, amount: f64) -> Result<()> {
        let mut wallets = self.wallets.write();
        let wallet = wallets
            .iter_mut()
            .find(|w| w.address() == address)
            .ok_or_else(|| ChainError::InvalidParticipant(address.to_string()))?;
        wallet.debit_usd(amount)
    }

    /// Build a signed transfer from a registry wallet, enforcing the
    /// coin-balance check.
    pub fn sign_transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        message: &str,
    ) -> Result<Transaction> {
        let wallets = self.wallets.read();
        let wallet = wallets
            .iter()
            .find(|w| w.address() == from)
            .ok_or_else(|| ChainError::InvalidParticipant(from.to_string()))?;
        wallet.create_transaction(to, amount, message)
    }

    /// The single authoritative balance-update path: zero every wallet,
    /// then replay the whole chain from genesis. Senders other than
    /// "system" are debited; recipients other than the exchange sink are
    /// credited. Legs naming unknown addresses are skipped.
    pub fn recalculate_all_balances(&self, chain: &Blockchain) {
        let mut wallets = self.wallets.write();
        for wallet in wallets.iter_mut() {
            wallet.reset_balance();
        }

        let index: HashMap<String, usize> = wallets
            .iter()
            .enumerate()
            .map(|(i, w)| (w.address().to_string(), i))
            .collect();

        for block in chain.blocks() {
            for tx in &block.transactions {
                if !tx.is_system() {
                    match index.get(&tx.sender) {
                        Some(&i) => wallets[i].debit(tx.amount),
                        None => debug!("Replay: unknown sender {} skipped", tx.sender),
                    }
                }
                if tx.recipient != EXCHANGE_ADDRESS {
                    match index.get(&tx.recipient) {
                        Some(&i) => wallets[i].credit(tx.amount),
                        None => debug!("Replay: unknown recipient {} skipped", tx.recipient),
                    }
                }
            }
        }
    }

    /// The subset written to disk: the supply wallet first, then an
    /// exchange-backed wallet if one exists. User wallets stay in memory
    /// and are lost on restart; this is documented current behavior.
    pub fn persisted_subset(&self) -> Vec<Wallet> {
        let wallets = self.wallets.read();
        let mut subset = Vec::with_capacity(2);
        if let Some(supply) = wallets.iter().find(|w| w.address() == self.supply_address) {
            subset.push(supply.clone());
        }
        if let Some(exchange) = wallets.iter().find(|w| w.address() == EXCHANGE_ADDRESS) {
            subset.push(exchange.clone());
        }
        subset
    }
}

impl Default for WalletRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Cyclic endowment schedule over the count of previously created user
/// wallets: positions 95-100 of every 100-cycle get a mega endowment,
/// positions 8-12 of every 12-cycle a large one, everything else normal.
/// Load shaping for the simulation, not a security property.
fn select_tier<R: Rng>(user_count: usize, rng: &mut R) -> (WalletTier, f64) {
    let position = user_count + 1;
    let cycle100 = position % 100;
    if cycle100 >= 95 || cycle100 == 0 {
        return (WalletTier::Mega, rng.gen_range(10_000_000.0..100_000_000.0));
    }
    let cycle12 = position % 12;
    if cycle12 >= 8 || cycle12 == 0 {
        (WalletTier::Large, rng.gen_range(500_000.0..10_000_000.0))
    } else {
        (WalletTier::Normal, rng.gen_range(5_000.0..499_999.9))
    }
}
