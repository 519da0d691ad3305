//! Use-case layer: orchestrates a sync pass, composes the persisted ledger
//! into portfolio views, and derives the analytics-view adapters, all on top
//! of the domain ports. Nothing in this layer talks to SQLite or the
//! exchange's HTTP API directly.

pub mod analytics_views;
pub mod bootstrap;
pub mod envelope;
pub mod portfolio_service;
pub mod sync_orchestrator;

pub use envelope::Envelope;
pub use portfolio_service::PortfolioService;
pub use sync_orchestrator::{JobHandle, JobRegistry, SyncOrchestrator, SyncStats};
