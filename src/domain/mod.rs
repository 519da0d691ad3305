//! Core trading/ledger domain: entities, pure analytics kernels, error taxonomy,
//! and the narrow ports the application layer is built against.

pub mod account;
pub mod balance_snapshot;
pub mod errors;
pub mod kernels;
pub mod money;
pub mod portfolio_snapshot;
pub mod ports;
pub mod price_history;
pub mod transaction;

pub use account::{Account, SyncStatus};
pub use balance_snapshot::BalanceSnapshot;
pub use portfolio_snapshot::PortfolioSnapshot;
pub use price_history::{CandleInterval, PriceHistory};
pub use transaction::{Transaction, TransactionType};
