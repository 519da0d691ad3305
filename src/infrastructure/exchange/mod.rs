pub mod client;
pub mod pagination;
pub mod rate_limit;
pub mod signing;
pub mod symbol;

pub use client::BinanceClient;
