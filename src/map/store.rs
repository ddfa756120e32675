use std::path::{Path, PathBuf};

use super::header::HEADER_SIZE;
use super::log::LogFile;
use super::record::{Record, RECORD_OVERHEAD};
use super::{DurableMap, Memtable, ScanIter};
use crate::error::{Error, Result};
use crate::flock::{FileLock, LockMode};

/// Dead bytes below which compaction on close is never worthwhile.
const COMPACTION_MIN_DEAD_BYTES: u64 = 1024 * 1024;

/// Options for opening a [`LogMap`].
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Create the log when the file does not exist (default: true)
    pub create_if_missing: bool,
    /// Open without write access and with a shared lock (default: false)
    pub read_only: bool,
    /// Writer buffer size (default: 64KB)
    pub buffer_size: usize,
    /// Compact on close when dead records outweigh live ones (default: true)
    pub compact_on_close: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_only: false,
            buffer_size: 64 * 1024,
            compact_on_close: true,
        }
    }
}

/// File-backed [`DurableMap`].
///
/// Every mutation is appended to a record log; the live contents are kept in
/// a skiplist rebuilt by replaying the log on open. Writes become durable on
/// [`sync`](DurableMap::sync).
///
/// The whole live set stays resident for the life of the handle, compressed
/// fragments of every epoch included. Memory use grows with the store; there
/// is no spill to sorted on-disk tables.
#[derive(Debug)]
pub struct LogMap {
    log: LogFile,
    table: Memtable,
    options: LogOptions,
    path: PathBuf,
    _lock: FileLock,
}

impl LogMap {
    pub fn open<P: AsRef<Path>>(path: P, options: LogOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();
        if !exists && (options.read_only || !options.create_if_missing) {
            return Err(Error::not_found(format!("store file {}", path.display())));
        }

        let mode = if options.read_only {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        };
        let lock = FileLock::lock(FileLock::path_for(&path), mode).map_err(Error::LockError)?;

        let mut log = if exists {
            LogFile::open(&path, options.read_only, options.buffer_size)?
        } else {
            tracing::info!(path = %path.display(), "Creating store file");
            LogFile::create(&path, options.buffer_size)?
        };

        let mut table = Memtable::new();
        let mut replay = log.replay()?;
        let mut torn = None;
        for record in replay.by_ref() {
            match record {
                Ok(Record::Put { key, value }) => table.put(key, value),
                Ok(Record::Delete { key }) => {
                    table.remove(&key);
                }
                Err(Error::CorruptedLog(msg)) => {
                    torn = Some(msg);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(msg) = &torn {
            tracing::warn!(
                path = %path.display(),
                offset = replay.offset(),
                records = replay.records(),
                reason = %msg,
                "Ignoring damaged log tail"
            );
        }
        if !options.read_only
            && (torn.is_some() || log.header().entry_count != replay.records())
        {
            log.truncate(replay.offset(), replay.records())?;
            log.sync()?;
        }

        tracing::debug!(
            path = %path.display(),
            entries = table.len(),
            log_bytes = log.len(),
            read_only = options.read_only,
            "Replayed store log"
        );

        Ok(Self {
            log,
            table,
            options,
            path,
            _lock: lock,
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Bytes the live entries would occupy in a freshly compacted log.
    pub fn live_bytes(&self) -> u64 {
        (self.table.size() + self.table.len() * RECORD_OVERHEAD) as u64
    }

    /// Bytes of overwritten and deleted records still held by the log.
    pub fn dead_bytes(&self) -> u64 {
        self.log
            .len()
            .saturating_sub(HEADER_SIZE as u64 + self.live_bytes())
    }

    fn should_compact(&self) -> bool {
        let dead = self.dead_bytes();
        dead > self.live_bytes() && dead > COMPACTION_MIN_DEAD_BYTES
    }

    /// Rewrites the log with only the live entries.
    pub fn compact(&mut self) -> Result<()> {
        if self.options.read_only {
            return Err(Error::ReadOnly);
        }
        let before = self.log.len();

        let mut name = self.path.as_os_str().to_os_string();
        name.push(".compact");
        let compact_path = PathBuf::from(name);

        let mut fresh = LogFile::create(&compact_path, self.options.buffer_size)?;
        for (key, value) in self.table.iter() {
            fresh.append(&Record::Put { key, value })?;
        }
        fresh.sync()?;
        drop(fresh);

        std::fs::rename(&compact_path, &self.path)?;
        self.log = LogFile::open(&self.path, false, self.options.buffer_size)?;

        tracing::info!(
            path = %self.path.display(),
            before_bytes = before,
            after_bytes = self.log.len(),
            entries = self.table.len(),
            "Compacted store log"
        );
        Ok(())
    }
}

impl DurableMap for LogMap {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.table.get(key))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.options.read_only {
            return Err(Error::ReadOnly);
        }
        let record = Record::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        };
        self.log.append(&record)?;
        if let Record::Put { key, value } = record {
            self.table.put(key, value);
        }
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        if self.options.read_only {
            return Err(Error::ReadOnly);
        }
        if !self.table.contains(key) {
            return Ok(());
        }
        self.log.append(&Record::Delete { key: key.to_vec() })?;
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
        self.log.sync()
    }

    fn close(&mut self) -> Result<()> {
        if !self.options.read_only && self.options.compact_on_close && self.should_compact() {
            self.compact()?;
        }
        self.log.sync()
    }

    fn is_read_only(&self) -> bool {
        self.options.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn read_only() -> LogOptions {
        LogOptions {
            read_only: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_persists_across_reopen() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("store.tsdb");

        {
            let mut map = LogMap::open(&path, LogOptions::default())?;
            map.put(b"lowest_free_index", &2u32.to_le_bytes())?;
            map.put(b"key-eth0", &0u32.to_le_bytes())?;
            map.put(b"key-eth1", &1u32.to_le_bytes())?;
            map.put(b"key-eth1", &7u32.to_le_bytes())?;
            map.delete(b"key-eth0")?;
            map.close()?;
        }

        let map = LogMap::open(&path, read_only())?;
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(b"key-eth0")?, None);
        assert_eq!(map.get(b"key-eth1")?, Some(7u32.to_le_bytes().to_vec()));

        let keys: Vec<_> = map.scan_prefix(b"key-").map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"key-eth1".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_missing_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("absent.tsdb");

        let no_create = LogOptions {
            create_if_missing: false,
            ..Default::default()
        };
        assert!(matches!(
            LogMap::open(&path, no_create),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            LogMap::open(&path, read_only()),
            Err(Error::NotFound(_))
        ));
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_read_only_rejects_writes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("store.tsdb");
        LogMap::open(&path, LogOptions::default())?.close()?;

        let mut map = LogMap::open(&path, read_only())?;
        assert!(map.is_read_only());
        assert!(matches!(map.put(b"k", b"v"), Err(Error::ReadOnly)));
        assert!(matches!(map.delete(b"k"), Err(Error::ReadOnly)));
        assert!(matches!(map.compact(), Err(Error::ReadOnly)));
        map.close()?;
        Ok(())
    }

    #[test]
    fn test_writer_lock_is_exclusive() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("store.tsdb");

        let writer = LogMap::open(&path, LogOptions::default())?;
        assert!(matches!(
            LogMap::open(&path, LogOptions::default()),
            Err(Error::LockError(_))
        ));
        assert!(matches!(
            LogMap::open(&path, read_only()),
            Err(Error::LockError(_))
        ));
        drop(writer);

        let reader_a = LogMap::open(&path, read_only())?;
        let reader_b = LogMap::open(&path, read_only())?;
        assert!(reader_a.is_empty() && reader_b.is_empty());
        Ok(())
    }

    #[test]
    fn test_torn_tail_recovery() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("store.tsdb");

        {
            let mut map = LogMap::open(&path, LogOptions::default())?;
            map.put(b"key-a", b"1")?;
            map.put(b"key-b", b"2")?;
            map.close()?;
        }

        let partial = Record::Put {
            key: b"key-c".to_vec(),
            value: b"3".to_vec(),
        }
        .encode()?;
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&partial[..partial.len() - 3])?;
        drop(file);

        {
            let reader = LogMap::open(&path, read_only())?;
            assert_eq!(reader.len(), 2);
        }

        {
            let mut map = LogMap::open(&path, LogOptions::default())?;
            assert_eq!(map.len(), 2);
            assert_eq!(map.get(b"key-c")?, None);
            map.put(b"key-d", b"4")?;
            map.close()?;
        }

        let map = LogMap::open(&path, read_only())?;
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(b"key-d")?, Some(b"4".to_vec()));
        Ok(())
    }

    #[test]
    fn test_compaction_drops_dead_records() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("store.tsdb");

        {
            let mut map = LogMap::open(&path, LogOptions::default())?;
            for round in 0..4u8 {
                map.put(b"1700000000-0", &vec![round; 4096])?;
            }
            map.put(b"key-a", b"x")?;
            assert!(map.dead_bytes() >= 3 * 4096);

            map.sync()?;
            let before = std::fs::metadata(&path)?.len();
            map.compact()?;
            let after = std::fs::metadata(&path)?.len();
            assert!(after < before);
            assert_eq!(map.dead_bytes(), 0);

            // Appends keep working on the compacted log
            map.put(b"key-b", b"y")?;
            map.close()?;
        }

        let map = LogMap::open(&path, read_only())?;
        assert_eq!(map.get(b"1700000000-0")?, Some(vec![3u8; 4096]));
        assert_eq!(map.get(b"key-b")?, Some(b"y".to_vec()));
        assert_eq!(map.len(), 3);
        Ok(())
    }
}
