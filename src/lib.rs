//! Creator wallet ledger: an append-only transaction log with cached
//! balances, a platform fee engine and a payout state machine settled through
//! an external payment processor.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
