//! Adapters implementing the domain ports.
//!
//! The in-memory adapters are always available. Production backends are
//! compiled in behind cargo features.

pub mod in_memory;
pub mod memory_bus;
pub mod simulated;

#[cfg(feature = "bus-kafka")]
pub mod kafka;
#[cfg(feature = "lock-redis")]
pub mod redis;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
