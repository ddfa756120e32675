use super::fragment::{self, flush_chunk, load_epoch, load_fragment};
use super::{Chunk, ChunkLayout};
use crate::codec::BlockCodec;
use crate::error::{Error, Result};
use crate::map::DurableMap;

/// How the chunk of a selected epoch is brought into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Load every fragment of the epoch when it is selected.
    Eager,
    /// Load only the fragment holding the addressed row, on first access.
    OnDemand,
}

#[derive(Debug, Clone, Copy)]
struct Selection {
    epoch: u32,
    growable: bool,
    mode: LoadMode,
}

/// Owns the active chunk and moves it between epochs.
#[derive(Debug)]
pub struct ChunkManager {
    layout: ChunkLayout,
    selection: Option<Selection>,
    chunk: Option<Chunk>,
}

impl ChunkManager {
    pub fn new(layout: ChunkLayout) -> Self {
        Self {
            layout,
            selection: None,
            chunk: None,
        }
    }

    /// The selected epoch, if any.
    pub fn current_epoch(&self) -> Option<u32> {
        self.selection.map(|s| s.epoch)
    }

    /// The loaded chunk, if any.
    pub fn chunk(&self) -> Option<&Chunk> {
        self.chunk.as_ref()
    }

    /// Fails with `NotFound` unless an epoch is selected.
    pub fn ensure_selected(&self) -> Result<u32> {
        self.current_epoch()
            .ok_or_else(|| Error::not_found("no epoch selected"))
    }

    /// Switches to `epoch`, which must already be slot-aligned. The previous
    /// chunk is flushed and released first; if that flush fails the previous
    /// selection stays active.
    pub fn goto_epoch<M: DurableMap, C: BlockCodec>(
        &mut self,
        map: &mut M,
        codec: &mut C,
        epoch: u32,
        create_if_missing: bool,
        growable: bool,
        mode: LoadMode,
    ) -> Result<()> {
        self.release(map, codec)?;

        let selection = Selection {
            epoch,
            growable,
            mode,
        };
        if mode == LoadMode::OnDemand {
            tracing::debug!(epoch = epoch, "Selected epoch for on-demand loading");
            self.selection = Some(selection);
            return Ok(());
        }

        let chunk = match load_epoch(map, codec, &self.layout, epoch)? {
            Some((data, count)) => {
                let chunk = Chunk::from_bytes(epoch, self.layout, 0, data, count)?;
                tracing::info!(
                    epoch = epoch,
                    fragments = count,
                    rows = chunk.rows(),
                    "Loaded epoch"
                );
                chunk
            }
            None if create_if_missing => {
                tracing::info!(epoch = epoch, "Creating epoch");
                Chunk::allocate(epoch, self.layout, 0, 1)?
            }
            None => {
                tracing::info!(epoch = epoch, "Epoch not found");
                return Err(Error::not_found(format!("epoch {}", epoch)));
            }
        };

        self.chunk = Some(chunk);
        self.selection = Some(selection);
        Ok(())
    }

    /// Brings the chunk holding row `index` into memory and makes the row
    /// addressable. Writes may allocate missing fragments and grow the chunk;
    /// reads never do.
    fn prepare<M: DurableMap, C: BlockCodec>(
        &mut self,
        map: &mut M,
        codec: &mut C,
        index: u32,
        for_write: bool,
    ) -> Result<&mut Chunk> {
        let selection = self
            .selection
            .ok_or_else(|| Error::not_found("no epoch selected"))?;

        if selection.mode == LoadMode::OnDemand
            && !self.chunk.as_ref().is_some_and(|c| c.holds(index))
        {
            self.page_in(map, codec, selection.epoch, index, for_write)?;
        }

        let growable = selection.growable && for_write;
        let chunk = self
            .chunk
            .as_mut()
            .ok_or_else(|| Error::not_found(format!("epoch {}", selection.epoch)))?;
        chunk.ensure_capacity(index, growable)?;
        Ok(chunk)
    }

    fn page_in<M: DurableMap, C: BlockCodec>(
        &mut self,
        map: &mut M,
        codec: &mut C,
        epoch: u32,
        index: u32,
        for_write: bool,
    ) -> Result<()> {
        let fragment_id = self.layout.fragment_of(index);
        if fragment_id as usize >= self.layout.max_fragments {
            return Err(Error::OutOfRange {
                index,
                capacity: self.layout.max_rows().min(u32::MAX as u64) as u32,
            });
        }
        let base_index = fragment_id * self.layout.fragment_rows;

        // The fragment being replaced may hold unflushed writes
        self.flush(map, codec)?;
        self.chunk = None;

        let chunk = match load_fragment(map, codec, &self.layout, epoch, fragment_id)? {
            Some(data) => Chunk::from_bytes(epoch, self.layout, base_index, data, 1)?,
            None if for_write => {
                tracing::debug!(epoch = epoch, fragment = fragment_id, "Allocating fragment");
                Chunk::allocate(epoch, self.layout, base_index, 1)?
            }
            None => {
                tracing::debug!(epoch = epoch, fragment = fragment_id, "Fragment not found");
                return Err(Error::not_found(format!(
                    "fragment {}",
                    String::from_utf8_lossy(&fragment::fragment_key(epoch, fragment_id))
                )));
            }
        };
        self.chunk = Some(chunk);
        Ok(())
    }

    /// Values at row `index` of the selected epoch.
    pub fn read<M: DurableMap, C: BlockCodec>(
        &mut self,
        map: &mut M,
        codec: &mut C,
        index: u32,
    ) -> Result<Vec<u32>> {
        self.prepare(map, codec, index, false)?.read(index)
    }

    /// Stores `values` at row `index` of the selected epoch.
    pub fn write<M: DurableMap, C: BlockCodec>(
        &mut self,
        map: &mut M,
        codec: &mut C,
        index: u32,
        values: &[u32],
    ) -> Result<()> {
        if values.len() != self.layout.values_per_entry() {
            return Err(Error::InvalidInput(format!(
                "expected {} values, got {}",
                self.layout.values_per_entry(),
                values.len()
            )));
        }
        self.prepare(map, codec, index, true)?.write(index, values)
    }

    /// Persists dirty fragments and keeps the chunk loaded. Returns the
    /// number of fragments written.
    pub fn flush<M: DurableMap, C: BlockCodec>(
        &mut self,
        map: &mut M,
        codec: &mut C,
    ) -> Result<usize> {
        let Some(chunk) = self.chunk.as_mut() else {
            return Ok(0);
        };
        if map.is_read_only() {
            return Ok(0);
        }
        flush_chunk(map, codec, chunk)
    }

    /// Flushes, then drops the chunk and the selection.
    pub fn release<M: DurableMap, C: BlockCodec>(
        &mut self,
        map: &mut M,
        codec: &mut C,
    ) -> Result<usize> {
        let written = self.flush(map, codec)?;
        if let Some(chunk) = self.chunk.take() {
            tracing::debug!(
                epoch = chunk.epoch(),
                fragments_written = written,
                "Released chunk"
            );
        }
        self.selection = None;
        Ok(written)
    }
}
