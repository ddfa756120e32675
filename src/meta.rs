//! Persisted store metadata.
//!
//! Scalars live under fixed keys and are encoded little-endian. Values found
//! in the store always win over the configured ones, so a store keeps its
//! geometry for its whole lifetime.

use byteorder::{ByteOrder, LittleEndian};

use crate::config::{TsdbConfig, DEFAULT_FRAGMENT_ROWS, DEFAULT_MAX_FRAGMENTS};
use crate::error::{Error, Result};
use crate::map::DurableMap;

pub const LOWEST_FREE_INDEX_KEY: &[u8] = b"lowest_free_index";
pub const SLOT_DURATION_KEY: &[u8] = b"slot_duration";
pub const VALUES_PER_ENTRY_KEY: &[u8] = b"values_per_entry";
pub const FRAGMENT_ROWS_KEY: &[u8] = b"fragment_rows";
pub const MAX_FRAGMENTS_KEY: &[u8] = b"max_fragments";

/// Width in bytes of one stored value.
pub const VALUE_WIDTH: usize = 4;

pub fn encode_u32(value: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, value);
    buf
}

pub fn decode_u32(bytes: &[u8], what: &str) -> Result<u32> {
    if bytes.len() != 4 {
        return Err(Error::InvalidData(format!(
            "{} holds {} bytes, expected 4",
            what,
            bytes.len()
        )));
    }
    Ok(LittleEndian::read_u32(bytes))
}

pub fn encode_u16(value: u16) -> [u8; 2] {
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, value);
    buf
}

pub fn decode_u16(bytes: &[u8], what: &str) -> Result<u16> {
    if bytes.len() != 2 {
        return Err(Error::InvalidData(format!(
            "{} holds {} bytes, expected 2",
            what,
            bytes.len()
        )));
    }
    Ok(LittleEndian::read_u16(bytes))
}

fn load_u32<M: DurableMap>(map: &M, key: &[u8]) -> Result<Option<u32>> {
    map.get(key)?
        .map(|bytes| decode_u32(&bytes, &String::from_utf8_lossy(key)))
        .transpose()
}

fn load_u16<M: DurableMap>(map: &M, key: &[u8]) -> Result<Option<u16>> {
    map.get(key)?
        .map(|bytes| decode_u16(&bytes, &String::from_utf8_lossy(key)))
        .transpose()
}

/// Metadata every store carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreMeta {
    pub values_per_entry: u16,
    pub slot_duration: u32,
    pub fragment_rows: u32,
    pub max_fragments: u32,
    pub lowest_free_index: u32,
}

impl StoreMeta {
    /// Reads the metadata from `map`, falling back to `config` for whatever
    /// is absent. Absent values are written back unless the map or the
    /// config is read-only.
    pub fn load_or_init<M: DurableMap>(map: &mut M, config: &TsdbConfig) -> Result<Self> {
        let stored_values = load_u16(map, VALUES_PER_ENTRY_KEY)?;
        let stored_slot = load_u32(map, SLOT_DURATION_KEY)?;
        let stored_rows = load_u32(map, FRAGMENT_ROWS_KEY)?;
        let stored_max = load_u32(map, MAX_FRAGMENTS_KEY)?;
        let stored_lowest = load_u32(map, LOWEST_FREE_INDEX_KEY)?;

        // Stores written before fragment geometry was recorded use the
        // defaults. A fragment cap below the one they were written with
        // would hide stored fragments, so never go under the default.
        let configured_max = u32::try_from(config.max_fragments).unwrap_or(u32::MAX);
        let existing = stored_values.is_some() || stored_slot.is_some();
        let (default_rows, default_max) = if existing {
            (
                DEFAULT_FRAGMENT_ROWS,
                configured_max.max(DEFAULT_MAX_FRAGMENTS as u32),
            )
        } else {
            (config.fragment_rows, configured_max)
        };

        let meta = Self {
            values_per_entry: stored_values.unwrap_or(config.values_per_entry),
            slot_duration: stored_slot.unwrap_or(config.slot_duration),
            fragment_rows: stored_rows.unwrap_or(default_rows),
            max_fragments: stored_max.unwrap_or(default_max),
            lowest_free_index: stored_lowest.unwrap_or(0),
        };
        meta.validate()?;

        if let Some(stored) = stored_values.filter(|v| *v != config.values_per_entry) {
            tracing::debug!(
                configured = config.values_per_entry,
                stored,
                "Using persisted values_per_entry"
            );
        }
        if let Some(stored) = stored_slot.filter(|v| *v != config.slot_duration) {
            tracing::debug!(
                configured = config.slot_duration,
                stored,
                "Using persisted slot_duration"
            );
        }
        if let Some(stored) = stored_max.filter(|v| *v != configured_max) {
            tracing::debug!(
                configured = configured_max,
                stored,
                "Using persisted max_fragments"
            );
        }

        if !config.read_only && !map.is_read_only() {
            if stored_values.is_none() {
                map.put(VALUES_PER_ENTRY_KEY, &encode_u16(meta.values_per_entry))?;
            }
            if stored_slot.is_none() {
                map.put(SLOT_DURATION_KEY, &encode_u32(meta.slot_duration))?;
            }
            if stored_rows.is_none() {
                map.put(FRAGMENT_ROWS_KEY, &encode_u32(meta.fragment_rows))?;
            }
            if stored_max.is_none() {
                map.put(MAX_FRAGMENTS_KEY, &encode_u32(meta.max_fragments))?;
            }
            if stored_lowest.is_none() {
                map.put(LOWEST_FREE_INDEX_KEY, &encode_u32(meta.lowest_free_index))?;
            }
        }

        Ok(meta)
    }

    fn validate(&self) -> Result<()> {
        if self.values_per_entry == 0
            || self.slot_duration == 0
            || self.fragment_rows == 0
            || self.max_fragments == 0
        {
            return Err(Error::InvalidData(format!(
                "unusable store metadata: values_per_entry = {}, slot_duration = {}, fragment_rows = {}, max_fragments = {}",
                self.values_per_entry, self.slot_duration, self.fragment_rows, self.max_fragments
            )));
        }
        Ok(())
    }

    /// Byte width of one row.
    pub fn entry_width(&self) -> usize {
        self.values_per_entry as usize * VALUE_WIDTH
    }
}

/// Persists the allocation counter.
pub fn store_lowest_free_index<M: DurableMap>(map: &mut M, value: u32) -> Result<()> {
    map.put(LOWEST_FREE_INDEX_KEY, &encode_u32(value))
}
