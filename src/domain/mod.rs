//! Domain model of the wallet ledger: money types, wallets, ledger entries,
//! payout requests, and the ports the application layer depends on.

pub mod events;
pub mod fee;
pub mod money;
pub mod payout;
pub mod ports;
pub mod transaction;
pub mod wallet;
