//! Thrift Settlement Core
//!
//! A cash-deposit settlement core for field agents that:
//! - Records every money movement in an append-only event ledger
//! - Derives every balance by folding over events (never stored)
//! - Locks deposit capture when an agent's unreconciled cash hits the limit
//! - Gates withdrawals behind contributor OTP and admin approval
//! - Settles agent cash through a reconciliation watermark
//! - Replays offline-captured deposits through a bounded retry queue
//!
//! MONEY FLOW:
//! CAPTURE → LEDGER → DERIVE → VERIFY → SETTLE

pub mod audit;
pub mod balance;
pub mod config;
pub mod contributor;
pub mod deposit;
pub mod error;
pub mod ledger;
pub mod models;
pub mod otp;
pub mod outbox;
pub mod reconciliation;
pub mod sms;
pub mod store;
pub mod sync;
pub mod withdrawal;

pub use error::{CoreError, Result};

// Re-export common types
pub use config::SystemConfig;
pub use models::*;
pub use store::CoreStore;
