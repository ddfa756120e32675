use super::{DurableMap, Memtable, ScanIter};
use crate::error::{Error, Result};

/// A [`DurableMap`] kept entirely in memory. Nothing survives the process;
/// `sync` is a no-op.
#[derive(Debug, Default)]
pub struct MemoryMap {
    table: Memtable,
    read_only: bool,
    // Number of successful puts, for observing write amplification
    puts: u64,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freezes the map: every later write fails with `ReadOnly`.
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn put_count(&self) -> u64 {
        self.puts
    }
}

impl DurableMap for MemoryMap {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.table.get(key))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.table.put(key.to_vec(), value.to_vec());
        self.puts += 1;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.table.remove(key);
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.table.contains(key))
    }

    fn scan_prefix<'a>(&'a self, prefix: &[u8]) -> ScanIter<'a> {
        self.table.scan_prefix(prefix)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
