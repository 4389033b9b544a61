//! Infrastructure: storage backends and sandbox provider adapters.

pub mod in_memory;
pub mod providers;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
