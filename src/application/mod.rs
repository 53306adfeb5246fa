//! Use cases of the wallet subsystem.
//!
//! `WalletLedger` (in `engine`) is the entry point; its operations are split
//! across `engine` (sales, reads, bank verification), `payouts` and
//! `reconciliation`. `ledger`, `projector` and `guard` are the building blocks
//! every operation is written against.

pub mod engine;
pub mod guard;
pub mod ledger;
pub mod payouts;
pub mod projector;
pub mod reconciliation;
