//! Adapters behind the domain ports: storage backends, processor clients and clocks.

pub mod clock;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod simulated;
pub mod stripe;
