use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Insufficient {currency} balance: needed {needed:.3}, available {available:.3}")]
    InsufficientFunds {
        currency: &'static str,
        needed: f64,
        available: f64,
    },

    #[error("Unknown transfer participant: {0}")]
    InvalidParticipant(String),

    #[error("Chain integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ChainError {
    /// Convenience constructor for coin-side shortfalls.
    pub fn insufficient_coins(needed: f64, available: f64) -> Self {
        ChainError::InsufficientFunds { currency: "SC", needed, available }
    }

    /// Convenience constructor for fiat-side shortfalls.
    pub fn insufficient_usd(needed: f64, available: f64) -> Self {
        ChainError::InsufficientFunds { currency: "USD", needed, available }
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for ChainError {
    fn from(err: toml::ser::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}
