pub mod in_memory;
pub mod ledger;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
