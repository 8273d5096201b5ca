use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};

use crate::crypto::sha256_hex;
use crate::transaction::Transaction;

/// A proof-of-work block. `hash` commits to the previous hash, timestamp,
/// nonce and the concatenated transaction ids; mining searches for a nonce
/// giving `difficulty` leading zero hex characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    #[serde(rename = "previousHash")]
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
    #[serde(rename = "timeStamp")]
    pub time_stamp: i64,
    pub nonce: u64,
}

impl Block {
    pub fn new(transactions: Vec<Transaction>, previous_hash: &str) -> Self {
        let mut block = Self {
            hash: String::new(),
            previous_hash: previous_hash.to_string(),
            transactions,
            time_stamp: Utc::now().timestamp_millis(),
            nonce: 0,
        };
        block.hash = block.calculate_hash();
        block
    }

    pub fn calculate_hash(&self) -> String {
        let mut tx_ids = String::new();
        for tx in &self.transactions {
            tx_ids.push_str(&tx.tx_id);
        }
        sha256_hex(&format!(
            "{}{}{}{}",
            self.previous_hash, self.time_stamp, self.nonce, tx_ids
        ))
    }

    /// Unbounded nonce search. Difficulty is a latency knob here, not a
    /// security parameter; an unreachable difficulty blocks the caller.
    pub fn mine(&mut self, difficulty: usize) {
        let target = "0".repeat(difficulty);
        while !self.hash.starts_with(&target) {
            self.nonce += 1;
            self.hash = self.calculate_hash();
        }
        info!("Block mined: nonce={} hash={}", self.nonce, self.hash);
    }

    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        self.hash.starts_with(&"0".repeat(difficulty))
    }
}
