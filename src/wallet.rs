use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::crypto::{derive_address, sha256_hex, verifying_key_from_b64, KeyPair};
use crate::error::ChainError;
use crate::transaction::Transaction;
use crate::Result;

/// An identity: key pair, derived address, password digest and balances.
///
/// `balance` is never the source of truth — it is recomputed from the
/// chain by replay after every mutation. `usd_balance` is a ledger-external
/// fiat balance mutated directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    unique_id: u64,
    address: String,
    private_key_b64: String,
    public_key_b64: String,
    password_hash: String,
    pub balance: f64,
    pub usd_balance: f64,
    initial_usd_balance: f64,
    #[serde(skip)]
    keypair: Option<KeyPair>,
}

impl Wallet {
    pub fn new(password: &str, starting_usd: f64, unique_id: u64) -> Self {
        let keypair = KeyPair::generate();
        let address = derive_address(keypair.verifying_key());
        Self {
            unique_id,
            address,
            private_key_b64: keypair.secret_b64(),
            public_key_b64: keypair.public_b64(),
            password_hash: sha256_hex(password),
            balance: 0.0,
            usd_balance: starting_usd,
            initial_usd_balance: starting_usd,
            keypair: Some(keypair),
        }
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn initial_usd_balance(&self) -> f64 {
        self.initial_usd_balance
    }

    pub fn check_password(&self, candidate: &str) -> bool {
        self.password_hash == sha256_hex(candidate)
    }

    /// Rebuild the in-memory key pair from the persisted base64 material.
    /// Needed after deserialization; the keypair field is never serialized.
    pub fn restore_keys(&mut self) -> Result<()> {
        let keypair = KeyPair::from_secret_b64(&self.private_key_b64)?;
        if derive_address(keypair.verifying_key()) != self.address {
            return Err(ChainError::Crypto(format!(
                "restored key does not match address {}",
                self.address
            )));
        }
        self.keypair = Some(keypair);
        Ok(())
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        verifying_key_from_b64(&self.public_key_b64)
    }

    fn keypair(&self) -> Result<&KeyPair> {
        self.keypair.as_ref().ok_or_else(|| {
            ChainError::Crypto(format!("wallet {} has no loaded signing key", self.address))
        })
    }

    /// Build a signed transfer after the caller-side balance check.
    pub fn create_transaction(
        &self,
        recipient: &str,
        amount: f64,
        message: &str,
    ) -> Result<Transaction> {
        if self.balance < amount {
            return Err(ChainError::insufficient_coins(amount, self.balance));
        }
        Ok(Transaction::new(
            &self.address,
            self.keypair()?,
            recipient,
            amount,
            message,
        ))
    }

    // Coin balance is only written by the registry's replay.
    pub(crate) fn credit(&mut self, amount: f64) {
        self.balance += amount;
    }

    pub(crate) fn debit(&mut self, amount: f64) {
        self.balance -= amount;
    }

    pub(crate) fn reset_balance(&mut self) {
        self.balance = 0.0;
    }

    pub fn credit_usd(&mut self, amount: f64) {
        self.usd_balance += amount;
    }

    pub fn debit_usd(&mut self, amount: f64) -> Result<()> {
        if self.usd_balance < amount {
            return Err(ChainError::insufficient_usd(amount, self.usd_balance));
        }
        self.usd_balance -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_check() {
        let wallet = Wallet::new("hunter2", 100.0, 1);
        assert!(wallet.check_password("hunter2"));
        assert!(!wallet.check_password("hunter3"));
    }

    #[test]
    fn test_new_wallet_balances() {
        let wallet = Wallet::new("pw", 5000.0, 7);
        assert_eq!(wallet.balance, 0.0);
        assert_eq!(wallet.usd_balance, 5000.0);
        assert_eq!(wallet.initial_usd_balance(), 5000.0);
        assert_eq!(wallet.unique_id(), 7);
    }

    #[test]
    fn test_serde_roundtrip_restores_keys() {
        let wallet = Wallet::new("pw", 10.0, 3);
        let json = serde_json::to_string(&wallet).unwrap();
        assert!(!json.contains("keypair"));

        let mut restored: Wallet = serde_json::from_str(&json).unwrap();
        restored.restore_keys().unwrap();
        assert_eq!(restored.address(), wallet.address());
        assert!(restored.check_password("pw"));

        // The restored wallet can still sign.
        restored.balance = 5.0;
        let tx = restored.create_transaction("1Recipient", 1.0, "m").unwrap();
        assert!(tx.verify(&restored.verifying_key().unwrap()));
    }

    #[test]
    fn test_create_transaction_requires_balance() {
        let mut wallet = Wallet::new("pw", 0.0, 1);
        let err = wallet.create_transaction("1Recipient", 1.0, "m").unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds { .. }));

        wallet.balance = 2.0;
        let tx = wallet.create_transaction("1Recipient", 1.0, "m").unwrap();
        assert_eq!(tx.sender, wallet.address());
        assert!(tx.verify(&wallet.verifying_key().unwrap()));
    }

    #[test]
    fn test_usd_debit_guard() {
        let mut wallet = Wallet::new("pw", 10.0, 1);
        assert!(wallet.debit_usd(20.0).is_err());
        assert_eq!(wallet.usd_balance, 10.0);
        wallet.debit_usd(4.0).unwrap();
        wallet.credit_usd(1.0);
        assert_eq!(wallet.usd_balance, 7.0);
    }
}
