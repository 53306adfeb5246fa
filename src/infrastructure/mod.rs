pub mod in_memory;
pub mod notifier;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod simulated;
