//! Log record framing.
//!
//! ```text
//! +-------+-----------+-------+-----------+-------+-----------+
//! | op:u8 |key_len:u32| key   |val_len:u32| value |crc32c:u32 |
//! +-------+-----------+-------+-----------+-------+-----------+
//! ```
//!
//! Integers are big-endian. The checksum covers every byte before it.
//! Deletes carry `val_len = 0` and no value bytes.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use std::io::{self, Read, Write};

use crate::error::{Error, Result};

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

// op + key_len + val_len + crc
pub const RECORD_OVERHEAD: usize = 1 + 4 + 4 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl Record {
    /// Bytes this record occupies in the log.
    pub fn encoded_len(&self) -> usize {
        RECORD_OVERHEAD
            + match self {
                Record::Put { key, value } => key.len() + value.len(),
                Record::Delete { key } => key.len(),
            }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let (op, key, value): (u8, &[u8], &[u8]) = match self {
            Record::Put { key, value } => (OP_PUT, key, value),
            Record::Delete { key } => (OP_DELETE, key, &[]),
        };

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.write_u8(op).map_err(|e| Error::Encode("op", e))?;
        buf.write_u32::<BigEndian>(key.len() as u32)
            .map_err(|e| Error::Encode("key_len", e))?;
        buf.extend_from_slice(key);
        buf.write_u32::<BigEndian>(value.len() as u32)
            .map_err(|e| Error::Encode("val_len", e))?;
        buf.extend_from_slice(value);

        let checksum = CRC32.checksum(&buf);
        buf.write_u32::<BigEndian>(checksum)
            .map_err(|e| Error::Encode("checksum", e))?;
        Ok(buf)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let bytes = self.encode()?;
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Reads the next record. Returns `Ok(None)` on a clean end of log and
    /// `CorruptedLog` for a torn or damaged record.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Record>> {
        let op = match reader.read_u8() {
            Ok(op) => op,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::IoError(e)),
        };
        if op != OP_PUT && op != OP_DELETE {
            return Err(Error::CorruptedLog(format!("unknown record op {}", op)));
        }

        let mut digest = CRC32.digest();
        digest.update(&[op]);

        let key_len = read_u32(reader, "key length")?;
        digest.update(&key_len.to_be_bytes());
        let key = read_bytes(reader, key_len as usize, "key")?;
        digest.update(&key);

        let value_len = read_u32(reader, "value length")?;
        digest.update(&value_len.to_be_bytes());
        let value = read_bytes(reader, value_len as usize, "value")?;
        digest.update(&value);

        let stored = read_u32(reader, "checksum")?;
        let computed = digest.finalize();
        if stored != computed {
            return Err(Error::CorruptedLog(format!(
                "Checksum mismatch: computed = {}, stored = {}",
                computed, stored
            )));
        }

        Ok(Some(match op {
            OP_PUT => Record::Put { key, value },
            _ => Record::Delete { key },
        }))
    }
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    reader.read_u32::<BigEndian>().map_err(|e| eof_as_corruption(e, what))
}

fn read_bytes<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u8>> {
    // Bounded read: a damaged length must not trigger a huge allocation
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| eof_as_corruption(e, what))?;
    if buf.len() != len {
        return Err(Error::CorruptedLog(format!(
            "Unexpected EOF while reading {}",
            what
        )));
    }
    Ok(buf)
}

fn eof_as_corruption(e: io::Error, what: &str) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            Error::CorruptedLog(format!("Unexpected EOF while reading {}", what))
        }
        _ => Error::IoError(e),
    }
}
