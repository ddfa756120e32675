use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::Read;

use crate::error::{Error, Result};

// magic (4) + version (2) + entry count (8)
pub const HEADER_SIZE: usize = 14;

pub const MAGIC: u32 = 0x54_53_44_42; // ASCII "TSDB"
pub const VERSION: u16 = 1;

/// Fixed header at the start of every store log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic_number: u32,
    pub version: u16,
    /// Records appended as of the last sync.
    pub entry_count: u64,
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

impl Header {
    pub fn new() -> Self {
        Header {
            magic_number: MAGIC,
            version: VERSION,
            entry_count: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        BigEndian::write_u32(&mut buf[0..4], self.magic_number);
        BigEndian::write_u16(&mut buf[4..6], self.version);
        BigEndian::write_u64(&mut buf[6..14], self.entry_count);
        buf
    }

    /// Reads and validates a header. Foreign magic numbers and unknown
    /// versions are rejected.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic_number = reader
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("magic_number", e))?;
        let version = reader
            .read_u16::<BigEndian>()
            .map_err(|e| Error::Decode("version", e))?;
        let entry_count = reader
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("entry_count", e))?;

        if magic_number != MAGIC || version != VERSION {
            return Err(Error::InvalidHeader);
        }
        Ok(Header {
            magic_number,
            version,
            entry_count,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidHeader);
        }
        Self::read_from(&mut &bytes[..HEADER_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_layout() {
        let header = Header {
            entry_count: 42,
            ..Header::new()
        };

        let encoded = header.encode();
        assert_eq!(&encoded[..4], b"TSDB");
        assert_eq!(&encoded[4..6], &[0, 1]);
        assert_eq!(encoded[13], 42);
        assert_eq!(Header::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_short_input() {
        assert!(matches!(
            Header::decode(&[0u8; HEADER_SIZE - 2]),
            Err(Error::InvalidHeader)
        ));

        let mut reader = Cursor::new(vec![0x54, 0x53, 0x44, 0x42, 0]);
        assert!(matches!(
            Header::read_from(&mut reader),
            Err(Error::Decode("version", _))
        ));
    }

    #[test]
    fn test_header_rejects_foreign_magic() {
        let mut encoded = Header::new().encode();
        encoded[0] = b'X';
        assert!(matches!(Header::decode(&encoded), Err(Error::InvalidHeader)));

        let mut encoded = Header::new().encode();
        encoded[5] = 9;
        assert!(matches!(Header::decode(&encoded), Err(Error::InvalidHeader)));
    }
}
