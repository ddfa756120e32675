use std::path::PathBuf;

use crate::epoch::TimeZone;
use crate::error::{Error, Result};

/// Rows held by one fragment, which is also the chunk growth increment.
pub const DEFAULT_FRAGMENT_ROWS: u32 = 10_000;

/// Upper bound on fragments per epoch (dirty-bit capacity).
pub const DEFAULT_MAX_FRAGMENTS: usize = 16_384;

/// Words (32 bits each) added to a tag bitmap per growth step.
pub const DEFAULT_TAG_GROWTH_WORDS: usize = DEFAULT_FRAGMENT_ROWS as usize / 4;

/// Configuration for a time-series store
#[derive(Debug, Clone)]
pub struct TsdbConfig {
    /// Path of the store file (default: ./ashtsdb.tsdb)
    pub path: PathBuf,

    /// Values stored per key and epoch (default: 1). Ignored when the store
    /// already records its own value.
    pub values_per_entry: u16,

    /// Seconds per epoch slot (default: 60). Ignored when the store already
    /// records its own value.
    pub slot_duration: u32,

    /// Open without write access (default: false)
    pub read_only: bool,

    /// Create the store file when it does not exist (default: true)
    pub create_if_missing: bool,

    /// Byte pattern filling never-written slots (default: 0)
    pub unknown_fill: u8,

    /// Rows per fragment and per growth step (default: 10 000)
    pub fragment_rows: u32,

    /// Maximum number of fragments in one epoch (default: 16 384)
    pub max_fragments: usize,

    /// Tag bitmap growth step in 32-bit words (default: 2 500)
    pub tag_growth_words: usize,

    /// Local-time correction applied to normalized epochs (default: UTC)
    pub time_zone: TimeZone,

    /// Log writer buffer size (default: 64KB)
    pub log_buffer_size: usize,

    /// Sync the store file on every explicit flush (default: true)
    pub sync_on_flush: bool,

    /// Rewrite the log without dead entries on close when worthwhile
    /// (default: true)
    pub compact_on_close: bool,
}

impl Default for TsdbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./ashtsdb.tsdb"),
            values_per_entry: 1,
            slot_duration: 60,
            read_only: false,
            create_if_missing: true,
            unknown_fill: 0,
            fragment_rows: DEFAULT_FRAGMENT_ROWS,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            tag_growth_words: DEFAULT_TAG_GROWTH_WORDS,
            time_zone: TimeZone::UTC,
            log_buffer_size: 64 * 1024, // 64KB
            sync_on_flush: true,
            compact_on_close: true,
        }
    }
}

impl TsdbConfig {
    /// Create a new config for the store at the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set values per entry
    pub fn values_per_entry(mut self, count: u16) -> Self {
        self.values_per_entry = count;
        self
    }

    /// Set slot duration in seconds
    pub fn slot_duration(mut self, seconds: u32) -> Self {
        self.slot_duration = seconds;
        self
    }

    /// Open read-only
    pub fn read_only(mut self, enabled: bool) -> Self {
        self.read_only = enabled;
        self
    }

    /// Create the store file when absent
    pub fn create_if_missing(mut self, enabled: bool) -> Self {
        self.create_if_missing = enabled;
        self
    }

    /// Set the fill byte of never-written slots
    pub fn unknown_fill(mut self, fill: u8) -> Self {
        self.unknown_fill = fill;
        self
    }

    /// Set rows per fragment
    pub fn fragment_rows(mut self, rows: u32) -> Self {
        self.fragment_rows = rows;
        self
    }

    /// Set the fragment limit per epoch
    pub fn max_fragments(mut self, count: usize) -> Self {
        self.max_fragments = count;
        self
    }

    /// Set tag bitmap growth step
    pub fn tag_growth_words(mut self, words: usize) -> Self {
        self.tag_growth_words = words;
        self
    }

    /// Set the local-time correction
    pub fn time_zone(mut self, zone: TimeZone) -> Self {
        self.time_zone = zone;
        self
    }

    /// Set log buffer size
    pub fn log_buffer_size(mut self, size: usize) -> Self {
        self.log_buffer_size = size;
        self
    }

    /// Sync on explicit flush
    pub fn sync_on_flush(mut self, enabled: bool) -> Self {
        self.sync_on_flush = enabled;
        self
    }

    /// Compact the log on close
    pub fn compact_on_close(mut self, enabled: bool) -> Self {
        self.compact_on_close = enabled;
        self
    }

    /// Rejects settings the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.values_per_entry == 0 {
            return Err(Error::InvalidInput(
                "values_per_entry must be greater than zero".to_string(),
            ));
        }
        if self.slot_duration == 0 {
            return Err(Error::InvalidInput(
                "slot_duration must be greater than zero".to_string(),
            ));
        }
        if self.fragment_rows == 0 {
            return Err(Error::InvalidInput(
                "fragment_rows must be greater than zero".to_string(),
            ));
        }
        if self.max_fragments == 0 {
            return Err(Error::InvalidInput(
                "max_fragments must be greater than zero".to_string(),
            ));
        }
        if self.tag_growth_words == 0 {
            return Err(Error::InvalidInput(
                "tag_growth_words must be greater than zero".to_string(),
            ));
        }
        if self.log_buffer_size == 0 {
            return Err(Error::InvalidInput(
                "log_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
