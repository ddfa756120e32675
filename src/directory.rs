use crate::error::{Error, Result};
use crate::map::DurableMap;
use crate::meta::{decode_u32, encode_u32, store_lowest_free_index};

pub const KEY_PREFIX: &str = "key-";

/// Store key holding the index of `key`.
pub fn key_record(key: &str) -> Vec<u8> {
    format!("{}{}", KEY_PREFIX, key).into_bytes()
}

/// Permanent mapping from string keys to dense row indexes.
///
/// Indexes are handed out from a persisted counter and never reused, so a
/// key addresses the same row in every epoch for the life of the store.
#[derive(Debug, Clone)]
pub struct KeyDirectory {
    lowest_free_index: u32,
}

impl KeyDirectory {
    pub fn new(lowest_free_index: u32) -> Self {
        Self { lowest_free_index }
    }

    /// The next index to be allocated.
    pub fn lowest_free_index(&self) -> u32 {
        self.lowest_free_index
    }

    /// Index of an existing key.
    pub fn lookup<M: DurableMap>(&self, map: &M, key: &str) -> Result<u32> {
        match map.get(&key_record(key))? {
            Some(bytes) => decode_u32(&bytes, "key index"),
            None => Err(Error::not_found(format!("key {}", key))),
        }
    }

    /// Index of `key`, allocating the next free one when the key is unknown
    /// and `allocate` is set.
    pub fn ensure_index<M: DurableMap>(
        &mut self,
        map: &mut M,
        key: &str,
        allocate: bool,
    ) -> Result<u32> {
        match self.lookup(map, key) {
            Err(e) if e.is_not_found() && allocate => {}
            other => return other,
        }

        let index = self.lowest_free_index;
        let next = index.checked_add(1).ok_or(Error::OutOfRange {
            index,
            capacity: u32::MAX,
        })?;

        store_lowest_free_index(map, next)?;
        map.put(&key_record(key), &encode_u32(index))?;
        self.lowest_free_index = next;

        tracing::debug!(key = key, index = index, "Allocated key index");
        Ok(index)
    }

    /// Every `(key, index)` pair in key order.
    pub fn entries<M: DurableMap>(map: &M) -> Result<Vec<(String, u32)>> {
        map.scan_prefix(KEY_PREFIX.as_bytes())
            .map(|(record, value)| {
                let key = String::from_utf8(record[KEY_PREFIX.len()..].to_vec())
                    .map_err(|e| Error::InvalidData(format!("key is not UTF-8: {}", e)))?;
                let index = decode_u32(&value, "key index")?;
                Ok((key, index))
            })
            .collect()
    }
}
