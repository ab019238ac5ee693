//! Concrete adapters for the domain ports: an in-memory correlation store
//! and the durable RocksDB-backed one.

pub mod in_memory;
pub mod rocksdb;
