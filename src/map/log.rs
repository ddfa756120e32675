use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::header::{Header, HEADER_SIZE};
use super::record::Record;
use crate::error::{Error, Result};

/// Append-only record log backing a [`LogMap`](super::LogMap).
pub struct LogFile {
    file: File,
    writer: Option<BufWriter<File>>,
    header: Header,
    path: PathBuf,
    // Bytes of the file including header, as of the last append
    len: u64,
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("entry_count", &self.header.entry_count)
            .finish()
    }
}

impl LogFile {
    /// Creates a fresh log, truncating anything at `path`.
    pub fn create(path: &Path, buffer_size: usize) -> Result<Self> {
        let mut file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let header = Header::new();
        file.write_all(&header.encode())?;
        file.sync_all()?;

        let writer = BufWriter::with_capacity(buffer_size, file.try_clone()?);
        Ok(Self {
            file,
            writer: Some(writer),
            header,
            path: path.to_path_buf(),
            len: HEADER_SIZE as u64,
        })
    }

    /// Opens an existing log. A zero-length file is initialized with a
    /// header when writable.
    pub fn open(path: &Path, read_only: bool, buffer_size: usize) -> Result<Self> {
        let mut file = File::options().read(true).write(!read_only).open(path)?;
        let file_len = file.metadata()?.len();

        let header = if file_len == 0 {
            if read_only {
                return Err(Error::InvalidHeader);
            }
            let h = Header::new();
            file.write_all(&h.encode())?;
            file.sync_all()?;
            h
        } else {
            Header::read_from(&mut file)?
        };
        // Appends go after the existing records
        file.seek(SeekFrom::End(0))?;

        let writer = if read_only {
            None
        } else {
            Some(BufWriter::with_capacity(buffer_size, file.try_clone()?))
        };

        Ok(Self {
            file,
            writer,
            header,
            path: path.to_path_buf(),
            len: file_len.max(HEADER_SIZE as u64),
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }

    /// Appends a record through the buffered writer.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::ReadOnly)?;
        let written = record.write_to(writer)?;
        self.len += written as u64;
        self.header.entry_count += 1;
        Ok(())
    }

    /// Replays the log from the first record. The replay reads through its
    /// own handle and does not disturb the append position.
    pub fn replay(&self) -> Result<ReplayIterator> {
        let reader = BufReader::new(File::open(&self.path)?);
        ReplayIterator::new(reader)
    }

    /// Cuts the log after `offset`, dropping a torn tail.
    pub fn truncate(&mut self, offset: u64, entry_count: u64) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::ReadOnly)?;
        writer.flush()?;
        self.file.set_len(offset)?;
        self.file.sync_all()?;
        writer.seek(SeekFrom::Start(offset))?;
        self.len = offset;
        self.header.entry_count = entry_count;
        Ok(())
    }

    /// Flushes buffered records, persists the entry count and fsyncs.
    pub fn sync(&mut self) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writer.flush()?;

        // Writer and file share one cursor: rewrite the header, then return
        // to the end for subsequent appends
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.encode())?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.sync_all()?;

        Ok(())
    }
}

pub struct ReplayIterator {
    reader: BufReader<File>,
    offset: u64,
    count: u64,
}

impl ReplayIterator {
    pub fn new(mut reader: BufReader<File>) -> Result<Self> {
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

        Ok(ReplayIterator {
            reader,
            offset: HEADER_SIZE as u64,
            count: 0,
        })
    }

    /// Offset just past the last good record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Records read so far.
    pub fn records(&self) -> u64 {
        self.count
    }
}

impl Iterator for ReplayIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match Record::read_from(&mut self.reader) {
            Ok(Some(record)) => {
                self.offset += record.encoded_len() as u64;
                self.count += 1;
                Some(Ok(record))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn put(key: &[u8], value: &[u8]) -> Record {
        Record::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_append_and_replay() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("store.tsdb");

        let mut log = LogFile::create(&path, 4096).expect("Failed to create log");
        log.append(&put(b"key1", b"value1")).expect("Failed to append");
        log.append(&put(b"key2", b"value2")).expect("Failed to append");
        log.append(&Record::Delete { key: b"key1".to_vec() })
            .expect("Failed to append");
        log.sync().expect("Failed to sync");
        assert_eq!(log.header().entry_count, 3);

        let reopened = LogFile::open(&path, true, 4096).expect("Failed to reopen");
        assert_eq!(reopened.header().entry_count, 3);

        let records: Vec<_> = reopened
            .replay()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .expect("Replay failed");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], put(b"key1", b"value1"));
        assert_eq!(records[2], Record::Delete { key: b"key1".to_vec() });
    }

    #[test]
    fn test_empty_replay() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("store.tsdb");

        let log = LogFile::create(&path, 4096).expect("Failed to create log");
        assert_eq!(log.replay().unwrap().count(), 0);
        assert_eq!(log.len(), HEADER_SIZE as u64);
    }

    #[test]
    fn test_torn_tail_is_detected_and_truncated() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("store.tsdb");

        let mut log = LogFile::create(&path, 4096).unwrap();
        log.append(&put(b"key1", b"value1")).unwrap();
        log.append(&put(b"key2", b"value2")).unwrap();
        log.sync().unwrap();
        let good_len = log.len();
        drop(log);

        // Simulate a crash in the middle of a third append
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&put(b"key3", b"value3").encode().unwrap()[..7])
            .unwrap();
        drop(file);

        let mut log = LogFile::open(&path, false, 4096).unwrap();
        let mut replay = log.replay().unwrap();
        let mut good = 0;
        let mut corrupted = false;
        while let Some(entry) = replay.next() {
            match entry {
                Ok(_) => good += 1,
                Err(Error::CorruptedLog(_)) => {
                    corrupted = true;
                    break;
                }
                Err(e) => panic!("Unexpected error during replay: {:?}", e),
            }
        }
        assert_eq!(good, 2);
        assert!(corrupted, "Torn tail not detected during replay");
        assert_eq!(replay.offset(), good_len);

        log.truncate(replay.offset(), replay.records()).unwrap();
        log.append(&put(b"key4", b"value4")).unwrap();
        log.sync().unwrap();

        let records: Vec<_> = log
            .replay()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .expect("Replay after truncate failed");
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], put(b"key4", b"value4"));
    }

    #[test]
    fn test_read_only_log_rejects_appends() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("store.tsdb");
        LogFile::create(&path, 4096).unwrap();

        let mut log = LogFile::open(&path, true, 4096).unwrap();
        assert!(log.is_read_only());
        assert!(matches!(
            log.append(&put(b"k", b"v")),
            Err(Error::ReadOnly)
        ));
        log.sync().expect("Sync is a no-op when read-only");
    }
}
