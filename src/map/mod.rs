//! Durable ordered byte-string map.
//!
//! The engine persists everything (metadata, key directory, compressed
//! fragments, tag bitmaps) through the [`DurableMap`] trait. [`LogMap`] is the
//! file-backed implementation: a checksummed append-only record log replayed
//! into a skiplist on open. [`MemoryMap`] keeps the same table without a log.
//!
//! # File Format
//!
//! ```text
//! +------------------+
//! | Header (14 bytes)|  magic "TSDB", version, entry count
//! +------------------+
//! | Record 1         |  put or delete, CRC32C protected
//! +------------------+
//! | ...              |
//! +------------------+
//! ```
//!
//! Later records shadow earlier ones for the same key. Compaction rewrites
//! the live set into a fresh log.

pub mod header;
pub mod log;
pub mod memory;
pub mod memtable;
pub mod record;
pub mod store;

pub use memory::MemoryMap;
pub use memtable::{Memtable, ScanIter};
pub use store::{LogMap, LogOptions};

use crate::error::Result;

pub trait DurableMap {
    /// Retrieves the value for a given key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Inserts or replaces a key-value pair. Fails with `ReadOnly` when the
    /// map was opened without write access.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes a key. Removing an absent key is not an error.
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Returns whether a key is present.
    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Iterates over all key-value pairs starting with the given prefix, in
    /// key order.
    fn scan_prefix<'a>(&'a self, prefix: &[u8]) -> ScanIter<'a>;

    /// Makes every preceding write durable.
    fn sync(&mut self) -> Result<()>;

    /// Syncs and releases resources. A failed close may be retried.
    fn close(&mut self) -> Result<()> {
        self.sync()
    }

    fn is_read_only(&self) -> bool;
}
