//! The store handler.
//!
//! [`Tsdb`] owns the durable map, the block codec, the key directory and the
//! active chunk. All operations take exclusive access; reads may page
//! fragments in and out, so they need `&mut self` too.

use crate::chunk::{ChunkLayout, ChunkManager, LoadMode};
use crate::codec::{BlockCodec, Lz4Codec};
use crate::config::TsdbConfig;
use crate::directory::KeyDirectory;
use crate::epoch::SlotClock;
use crate::error::{Error, Result};
use crate::map::{DurableMap, LogMap, LogOptions};
use crate::meta::{store_lowest_free_index, StoreMeta};
use crate::tag::{Tag, TagIndex, TagOp};

/// How [`Tsdb::goto_epoch`] treats the selected epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochOptions {
    /// Create the epoch when it has no stored fragments
    pub create_if_missing: bool,
    /// Let writes grow the epoch beyond its current rows
    pub growable: bool,
    /// Defer loading to the first access, one fragment at a time
    pub load_on_demand: bool,
}

impl EpochOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_if_missing(mut self, enabled: bool) -> Self {
        self.create_if_missing = enabled;
        self
    }

    pub fn growable(mut self, enabled: bool) -> Self {
        self.growable = enabled;
        self
    }

    pub fn load_on_demand(mut self, enabled: bool) -> Self {
        self.load_on_demand = enabled;
        self
    }
}

/// Summary of an open store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreInfo {
    pub values_per_entry: u16,
    pub slot_duration: u32,
    pub fragment_rows: u32,
    pub lowest_free_index: u32,
    pub read_only: bool,
    pub current_epoch: Option<u32>,
}

pub struct Tsdb<M: DurableMap = LogMap, C: BlockCodec = Lz4Codec> {
    map: M,
    codec: C,
    meta: StoreMeta,
    clock: SlotClock,
    directory: KeyDirectory,
    tags: TagIndex,
    chunks: ChunkManager,
    read_only: bool,
    sync_on_flush: bool,
    closed: bool,
}

impl Tsdb<LogMap, Lz4Codec> {
    /// Opens the store file at `config.path`, creating it if allowed.
    pub fn open(config: TsdbConfig) -> Result<Self> {
        config.validate()?;
        let map = LogMap::open(
            &config.path,
            LogOptions {
                create_if_missing: config.create_if_missing,
                read_only: config.read_only,
                buffer_size: config.log_buffer_size,
                compact_on_close: config.compact_on_close,
            },
        )?;
        Self::with_map(map, config, Lz4Codec::new())
    }
}

impl<M: DurableMap, C: BlockCodec> Tsdb<M, C> {
    /// Builds a handler over an already opened map.
    pub fn with_map(mut map: M, config: TsdbConfig, codec: C) -> Result<Self> {
        config.validate()?;
        let read_only = config.read_only || map.is_read_only();

        let meta = StoreMeta::load_or_init(&mut map, &config)?;
        let clock = SlotClock::new(meta.slot_duration, config.time_zone)?;
        let layout = ChunkLayout {
            entry_width: meta.entry_width(),
            fragment_rows: meta.fragment_rows,
            max_fragments: meta.max_fragments as usize,
            fill: config.unknown_fill,
        };

        tracing::info!(
            path = %config.path.display(),
            values_per_entry = meta.values_per_entry,
            slot_duration = meta.slot_duration,
            fragment_rows = meta.fragment_rows,
            max_fragments = meta.max_fragments,
            lowest_free_index = meta.lowest_free_index,
            read_only = read_only,
            "Opened store"
        );

        Ok(Self {
            map,
            codec,
            meta,
            clock,
            directory: KeyDirectory::new(meta.lowest_free_index),
            tags: TagIndex::new(config.tag_growth_words),
            chunks: ChunkManager::new(layout),
            read_only,
            sync_on_flush: config.sync_on_flush,
            closed: false,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn values_per_entry(&self) -> u16 {
        self.meta.values_per_entry
    }

    pub fn slot_duration(&self) -> u32 {
        self.meta.slot_duration
    }

    pub fn lowest_free_index(&self) -> u32 {
        self.directory.lowest_free_index()
    }

    /// The underlying durable map.
    pub fn map(&self) -> &M {
        &self.map
    }

    /// Rows held by the loaded chunk, if any.
    pub fn chunk_rows(&self) -> Option<u32> {
        self.chunks.chunk().map(|c| c.rows())
    }

    pub fn normalize_epoch(&self, epoch: u32) -> u32 {
        self.clock.normalize(epoch)
    }

    /// The selected, normalized epoch.
    pub fn current_epoch(&self) -> Option<u32> {
        self.chunks.current_epoch()
    }

    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            values_per_entry: self.meta.values_per_entry,
            slot_duration: self.meta.slot_duration,
            fragment_rows: self.meta.fragment_rows,
            lowest_free_index: self.directory.lowest_free_index(),
            read_only: self.read_only,
            current_epoch: self.chunks.current_epoch(),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            tracing::warn!("Write rejected: store is read-only");
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Flushes the current chunk and selects the slot containing `epoch`.
    ///
    /// Eager selection of a missing epoch without `create_if_missing` fails
    /// with `NotFound` and leaves nothing selected. On-demand selection
    /// always succeeds; missing fragments surface on access. Read-only
    /// stores always load on demand and never create.
    pub fn goto_epoch(&mut self, epoch: u32, options: EpochOptions) -> Result<()> {
        let normalized = self.clock.normalize(epoch);
        let mode = if self.read_only || options.load_on_demand {
            LoadMode::OnDemand
        } else {
            LoadMode::Eager
        };

        self.chunks.goto_epoch(
            &mut self.map,
            &mut self.codec,
            normalized,
            options.create_if_missing && !self.read_only,
            options.growable && !self.read_only,
            mode,
        )?;

        tracing::debug!(
            epoch = epoch,
            normalized = normalized,
            mode = ?mode,
            "Moved to epoch"
        );
        Ok(())
    }

    /// Stores `values` for `key` in the selected epoch, allocating an index
    /// for unknown keys. Returns the key's index.
    pub fn set(&mut self, key: &str, values: &[u32]) -> Result<u32> {
        self.ensure_writable()?;
        self.chunks.ensure_selected()?;
        if values.len() != self.meta.values_per_entry as usize {
            return Err(Error::InvalidInput(format!(
                "expected {} values, got {}",
                self.meta.values_per_entry,
                values.len()
            )));
        }

        let index = self.directory.ensure_index(&mut self.map, key, true)?;
        self.chunks
            .write(&mut self.map, &mut self.codec, index, values)?;
        Ok(index)
    }

    /// Values of `key` in the selected epoch.
    pub fn get(&mut self, key: &str) -> Result<Vec<u32>> {
        self.chunks.ensure_selected()?;
        let index = self.directory.lookup(&self.map, key)?;
        self.chunks.read(&mut self.map, &mut self.codec, index)
    }

    /// Values at row `index` of the selected epoch.
    pub fn get_by_index(&mut self, index: u32) -> Result<Vec<u32>> {
        self.chunks.read(&mut self.map, &mut self.codec, index)
    }

    /// Permanent index of `key`.
    pub fn key_index(&self, key: &str) -> Result<u32> {
        self.directory.lookup(&self.map, key)
    }

    /// Every known key with its index, in key order.
    pub fn keys(&self) -> Result<Vec<(String, u32)>> {
        KeyDirectory::entries(&self.map)
    }

    /// Adds `key` to tag `tag`. The key must already have an index.
    pub fn tag_key(&mut self, key: &str, tag: &str) -> Result<()> {
        self.ensure_writable()?;
        let index = self.directory.lookup(&self.map, key)?;
        self.tags
            .tag_index(&mut self.map, tag, index, self.directory.lowest_free_index())?;
        tracing::debug!(key = key, tag = tag, index = index, "Tagged key");
        Ok(())
    }

    /// Snapshot of a tag.
    pub fn get_tag(&self, name: &str) -> Result<Tag> {
        self.tags.get(&self.map, name)
    }

    /// Whether `key` is in `tag`. Unknown keys are in no tag.
    pub fn is_tag_key(&self, tag: &Tag, key: &str) -> Result<bool> {
        match self.directory.lookup(&self.map, key) {
            Ok(index) => Ok(tag.contains(index)),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Indexes in tag `name`, ascending, below
    /// `min(capacity, lowest_free_index)`.
    pub fn tag_indexes(&self, name: &str, capacity: u32) -> Result<Vec<u32>> {
        self.tags
            .indexes(&self.map, name, capacity, self.directory.lowest_free_index())
    }

    /// Indexes in the AND or OR of the named tags. Missing tags are skipped.
    pub fn consolidated_tag_indexes<S: AsRef<str>>(
        &self,
        names: &[S],
        op: TagOp,
        capacity: u32,
    ) -> Result<Vec<u32>> {
        self.tags.consolidated_indexes(
            &self.map,
            names,
            op,
            capacity,
            self.directory.lowest_free_index(),
        )
    }

    /// Compresses and persists dirty fragments without leaving the epoch.
    /// Returns the number of fragments written.
    pub fn flush(&mut self) -> Result<usize> {
        if self.read_only {
            return Ok(0);
        }
        let written = self.chunks.flush(&mut self.map, &mut self.codec)?;
        if self.sync_on_flush {
            self.map.sync()?;
        }
        tracing::debug!(fragments = written, "Flushed store");
        Ok(written)
    }

    /// Flushes everything and closes the map.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Persists the counter, flushes the chunk and closes the map. Every
    /// step is attempted even when an earlier one fails; the first error is
    /// returned and the handler stays open so a later call can retry.
    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let counter = if self.read_only {
            Ok(())
        } else {
            store_lowest_free_index(&mut self.map, self.directory.lowest_free_index())
        };
        let released = self.chunks.release(&mut self.map, &mut self.codec);
        let closed = self.map.close();

        let written = match (counter, released, closed) {
            (Ok(()), Ok(written), Ok(())) => written,
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                tracing::error!(error = %e, "Failed to close store");
                return Err(e);
            }
        };
        self.closed = true;

        tracing::info!(
            lowest_free_index = self.directory.lowest_free_index(),
            fragments_written = written,
            "Closed store"
        );
        Ok(())
    }
}

impl<M: DurableMap, C: BlockCodec> Drop for Tsdb<M, C> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        tracing::warn!("Store dropped without close");
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "Failed to close store on drop");
        }
    }
}
