use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::crypto::{sha256_hex, verify_signature, KeyPair};
use crate::SYSTEM_SENDER;

/// Process-wide salt counter so two transactions built in the same
/// nanosecond still hash differently.
static TX_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An immutable signed transfer intent. The id is derived from the content
/// plus a uniqueness salt; the signature covers the canonical payload
/// including the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "txId")]
    pub tx_id: String,
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    pub message: String,
    #[serde(with = "hex_signature")]
    pub signature: Vec<u8>,
    pub timestamp: i64,
}

impl Transaction {
    /// Build and sign a transfer. The caller is responsible for the balance
    /// check; this constructor only derives the id and signs the payload.
    pub fn new(
        sender: &str,
        keypair: &KeyPair,
        recipient: &str,
        amount: f64,
        message: &str,
    ) -> Self {
        let timestamp = now_millis();
        let tx_id = derive_id(sender, recipient, amount, message);
        let payload = canonical_payload(sender, recipient, amount, message, &tx_id);
        let signature = keypair.sign(payload.as_bytes());
        Self {
            tx_id,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount,
            message: message.to_string(),
            signature,
            timestamp,
        }
    }

    /// Unsigned issuance transaction (genesis grant, buy-side supply
    /// transfer bookkeeping). Always verifies.
    pub fn system(recipient: &str, amount: f64, message: &str) -> Self {
        let timestamp = now_millis();
        let tx_id = derive_id(SYSTEM_SENDER, recipient, amount, message);
        Self {
            tx_id,
            sender: SYSTEM_SENDER.to_string(),
            recipient: recipient.to_string(),
            amount,
            message: message.to_string(),
            signature: Vec::new(),
            timestamp,
        }
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    /// Verify the signature against the sender's public key. System
    /// transactions verify unconditionally.
    pub fn verify(&self, key: &VerifyingKey) -> bool {
        if self.is_system() {
            return true;
        }
        let payload = canonical_payload(
            &self.sender,
            &self.recipient,
            self.amount,
            &self.message,
            &self.tx_id,
        );
        verify_signature(payload.as_bytes(), &self.signature, key)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn derive_id(sender: &str, recipient: &str, amount: f64, message: &str) -> String {
    let salt = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = TX_COUNTER.fetch_add(1, Ordering::Relaxed);
    sha256_hex(&format!("{sender}{recipient}{amount}{message}{salt}{seq}"))
}

fn canonical_payload(
    sender: &str,
    recipient: &str,
    amount: f64,
    message: &str,
    tx_id: &str,
) -> String {
    format!("{sender}{recipient}{amount}{message}{tx_id}")
}

/// Serialize signatures as hex strings so the chain document stays
/// human-readable.
mod hex_signature {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_address;

    #[test]
    fn test_signed_transaction_verifies() {
        let pair = KeyPair::generate();
        let sender = derive_address(pair.verifying_key());
        let tx = Transaction::new(&sender, &pair, "1Recipient", 12.5, "test transfer");

        assert!(tx.verify(pair.verifying_key()));
        assert_eq!(tx.tx_id.len(), 64);
        assert!(!tx.signature.is_empty());

        let other = KeyPair::generate();
        assert!(!tx.verify(other.verifying_key()));
    }

    #[test]
    fn test_system_transaction_always_verifies() {
        let tx = Transaction::system("1Recipient", 1000.0, "genesis");
        assert!(tx.is_system());
        assert!(tx.signature.is_empty());
        // Any key works; the signature is never inspected.
        let unrelated = KeyPair::generate();
        assert!(tx.verify(unrelated.verifying_key()));
    }

    #[test]
    fn test_rapid_ids_are_unique() {
        let ids: Vec<String> = (0..64)
            .map(|_| Transaction::system("1Recipient", 1.0, "same content").tx_id)
            .collect();
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
    }

    #[test]
    fn test_serde_roundtrip_preserves_signature() {
        let pair = KeyPair::generate();
        let sender = derive_address(pair.verifying_key());
        let tx = Transaction::new(&sender, &pair, "1Recipient", 0.125, "memo");

        let json = serde_json::to_string(&tx).unwrap();
        let restored: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tx_id, tx.tx_id);
        assert_eq!(restored.amount, tx.amount);
        assert!(restored.verify(pair.verifying_key()));
    }
}
