pub mod block;
pub mod blockchain;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod price;
pub mod registry;
pub mod simulator;
pub mod storage;
pub mod transaction;
pub mod wallet;

pub use block::Block;
pub use blockchain::Blockchain;
pub use config::Config;
pub use context::{ChainContext, TransferOutcome};
pub use error::ChainError;
pub use price::{PriceModel, TradeImpact};
pub use registry::WalletRegistry;
pub use simulator::NetworkSimulator;
pub use transaction::Transaction;
pub use wallet::Wallet;

/// Sender string carried by issuance transactions (genesis and buy-side
/// supply transfers). Requires no signature and always verifies.
pub const SYSTEM_SENDER: &str = "system";

/// Well-known non-custodial settlement address for sell trades. Coins sent
/// here leave circulation; balance replay never credits it.
pub const EXCHANGE_ADDRESS: &str = "EXCHANGE_MARKET_SC_SELL";

pub type Result<T> = std::result::Result<T, ChainError>;
