//! Epoch chunks.
//!
//! A [`Chunk`] is the in-memory slot array of one epoch, or of a single
//! fragment of it when pages are loaded on demand. Row `i` occupies bytes
//! `[i * entry_width, (i + 1) * entry_width)` relative to the chunk's base
//! row. The array is split into fragments of `fragment_rows` rows, each
//! compressed and persisted on its own under `<epoch>-<fragment_id>`.
//!
//! ```text
//! epoch 1700000000
//! +-------------+-------------+-------------+
//! | fragment 0  | fragment 1  | fragment 2  |  <- one dirty bit each
//! | rows 0..R   | rows R..2R  | rows 2R..3R |
//! +-------------+-------------+-------------+
//! ```

pub mod fragment;
pub mod manager;

pub use manager::{ChunkManager, LoadMode};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::meta::VALUE_WIDTH;

/// Geometry shared by every chunk of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Bytes per row
    pub entry_width: usize,
    /// Rows per fragment and per growth step
    pub fragment_rows: u32,
    /// Fragments an epoch may hold
    pub max_fragments: usize,
    /// Byte pattern of never-written slots
    pub fill: u8,
}

impl ChunkLayout {
    pub fn fragment_bytes(&self) -> usize {
        self.entry_width * self.fragment_rows as usize
    }

    /// Fragment holding row `index`.
    pub fn fragment_of(&self, index: u32) -> u32 {
        index / self.fragment_rows
    }

    /// Rows an epoch may hold.
    pub fn max_rows(&self) -> u64 {
        self.max_fragments as u64 * self.fragment_rows as u64
    }

    pub fn values_per_entry(&self) -> usize {
        self.entry_width / VALUE_WIDTH
    }
}

/// Owned slot arena for one epoch or one fragment of it.
#[derive(Debug)]
pub struct Chunk {
    epoch: u32,
    layout: ChunkLayout,
    data: Vec<u8>,
    // First row held by this chunk
    base_index: u32,
    // One bit per fragment held, relative to the base
    dirty: Vec<bool>,
    // Leading fragments known to exist in the store
    persisted: usize,
}

fn reserve(data: &mut Vec<u8>, additional: usize) -> Result<()> {
    data.try_reserve_exact(additional).map_err(|_| {
        tracing::warn!(bytes = data.len() + additional, "Not enough memory");
        Error::OutOfMemory(data.len() + additional)
    })
}

impl Chunk {
    /// A fill-initialized chunk of `fragments` fragments starting at row
    /// `base_index`.
    pub fn allocate(
        epoch: u32,
        layout: ChunkLayout,
        base_index: u32,
        fragments: usize,
    ) -> Result<Self> {
        let len = fragments * layout.fragment_bytes();
        let mut data = Vec::new();
        reserve(&mut data, len)?;
        data.resize(len, layout.fill);

        Ok(Self {
            epoch,
            layout,
            data,
            base_index,
            dirty: vec![false; fragments],
            persisted: 0,
        })
    }

    /// Wraps decompressed fragment bytes. `persisted` is the number of
    /// fragments `data` was assembled from. A trailing partial fragment is
    /// padded with the fill pattern.
    pub fn from_bytes(
        epoch: u32,
        layout: ChunkLayout,
        base_index: u32,
        mut data: Vec<u8>,
        persisted: usize,
    ) -> Result<Self> {
        if data.len() % layout.entry_width != 0 {
            return Err(Error::InvalidData(format!(
                "epoch {} holds {} bytes, not a multiple of the {} byte entry width",
                epoch,
                data.len(),
                layout.entry_width
            )));
        }

        let fragment_bytes = layout.fragment_bytes();
        let fragments = data.len().div_ceil(fragment_bytes).max(1);
        let padded = fragments * fragment_bytes;
        if padded > data.len() {
            let extra = padded - data.len();
            reserve(&mut data, extra)?;
            data.resize(padded, layout.fill);
        }

        Ok(Self {
            epoch,
            layout,
            data,
            base_index,
            dirty: vec![false; fragments],
            persisted: persisted.min(fragments),
        })
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn base_index(&self) -> u32 {
        self.base_index
    }

    /// Fragment id of the first fragment held.
    pub fn base_fragment(&self) -> u32 {
        self.layout.fragment_of(self.base_index)
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rows the buffer currently holds.
    pub fn rows(&self) -> u32 {
        (self.data.len() / self.layout.entry_width) as u32
    }

    pub fn fragments(&self) -> usize {
        self.dirty.len()
    }

    /// Whether row `index` falls inside this chunk.
    pub fn holds(&self, index: u32) -> bool {
        index >= self.base_index && index - self.base_index < self.rows()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|d| *d)
    }

    /// Local ids of dirty fragments, ascending.
    pub fn dirty_fragments(&self) -> Vec<usize> {
        self.dirty
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.then_some(i))
            .collect()
    }

    pub fn persisted(&self) -> usize {
        self.persisted
    }

    /// Bytes of local fragment `local`.
    pub fn fragment(&self, local: usize) -> &[u8] {
        let size = self.layout.fragment_bytes();
        let start = (local * size).min(self.data.len());
        let end = (start + size).min(self.data.len());
        &self.data[start..end]
    }

    /// Records that local fragments up to and including `local` are stored
    /// and that `local` is clean.
    pub fn mark_persisted(&mut self, local: usize) {
        if let Some(dirty) = self.dirty.get_mut(local) {
            *dirty = false;
        }
        if local >= self.persisted {
            self.persisted = local + 1;
        }
    }

    /// Adds one fragment of fill-initialized rows. Existing bytes are left
    /// untouched if the allocation fails.
    pub fn grow(&mut self) -> Result<()> {
        let total = self.base_fragment() as usize + self.fragments();
        if total >= self.layout.max_fragments {
            return Err(Error::OutOfRange {
                index: self.base_index.saturating_add(self.rows()),
                capacity: self.layout.max_rows().min(u32::MAX as u64) as u32,
            });
        }

        let fragment_bytes = self.layout.fragment_bytes();
        reserve(&mut self.data, fragment_bytes)?;
        self.data.resize(self.data.len() + fragment_bytes, self.layout.fill);
        self.dirty.push(false);

        tracing::info!(
            epoch = self.epoch,
            rows = self.rows(),
            fragments = self.fragments(),
            "Grown chunk"
        );
        Ok(())
    }

    /// Makes row `index` addressable, growing one fragment at a time when
    /// `growable` is set.
    pub fn ensure_capacity(&mut self, index: u32, growable: bool) -> Result<()> {
        let local = self.local(index)?;
        while local >= self.rows() {
            if !growable {
                tracing::debug!(
                    index = index,
                    capacity = self.base_index as u64 + self.rows() as u64,
                    "Index out of range"
                );
                return Err(Error::OutOfRange {
                    index,
                    capacity: self.base_index.saturating_add(self.rows()),
                });
            }
            self.grow()?;
        }
        Ok(())
    }

    fn local(&self, index: u32) -> Result<u32> {
        index.checked_sub(self.base_index).ok_or_else(|| {
            tracing::error!(
                index = index,
                base_index = self.base_index,
                "Index below chunk base"
            );
            Error::InternalInconsistency(format!(
                "index {} below chunk base {}",
                index, self.base_index
            ))
        })
    }

    fn slot_range(&self, index: u32) -> Result<std::ops::Range<usize>> {
        let local = self.local(index)?;
        let offset = local as usize * self.layout.entry_width;
        let end = offset + self.layout.entry_width;
        if end > self.data.len() {
            tracing::error!(
                epoch = self.epoch,
                index = index,
                offset = offset,
                len = self.data.len(),
                "Slot offset beyond chunk"
            );
            return Err(Error::InternalInconsistency(format!(
                "offset {} beyond chunk of {} bytes",
                offset,
                self.data.len()
            )));
        }
        Ok(offset..end)
    }

    /// Values stored at row `index`.
    pub fn read(&self, index: u32) -> Result<Vec<u32>> {
        let range = self.slot_range(index)?;
        let mut values = vec![0u32; self.layout.values_per_entry()];
        LittleEndian::read_u32_into(&self.data[range], &mut values);
        Ok(values)
    }

    /// Overwrites row `index` and marks its fragment dirty.
    pub fn write(&mut self, index: u32, values: &[u32]) -> Result<()> {
        if values.len() != self.layout.values_per_entry() {
            return Err(Error::InvalidInput(format!(
                "expected {} values, got {}",
                self.layout.values_per_entry(),
                values.len()
            )));
        }
        let range = self.slot_range(index)?;
        LittleEndian::write_u32_into(values, &mut self.data[range]);

        let local = (index - self.base_index) / self.layout.fragment_rows;
        match self.dirty.get_mut(local as usize) {
            Some(dirty) => *dirty = true,
            None => {
                return Err(Error::InternalInconsistency(format!(
                    "fragment {} beyond {} tracked fragments",
                    local,
                    self.dirty.len()
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn layout() -> ChunkLayout {
        ChunkLayout {
            entry_width: 8,
            fragment_rows: 4,
            max_fragments: 3,
            fill: 0xff,
        }
    }

    #[test]
    fn test_allocate_fills_unknown() {
        let chunk = Chunk::allocate(60, layout(), 0, 1).unwrap();
        assert_eq!(chunk.len(), 32);
        assert_eq!(chunk.rows(), 4);
        assert_eq!(chunk.fragments(), 1);
        assert!(!chunk.is_dirty());
        assert_eq!(chunk.read(3).unwrap(), vec![u32::MAX, u32::MAX]);
    }

    #[test]
    fn test_write_marks_fragment_dirty() {
        let mut chunk = Chunk::allocate(60, layout(), 0, 2).unwrap();
        chunk.write(5, &[10, 20]).unwrap();
        assert_eq!(chunk.read(5).unwrap(), vec![10, 20]);
        assert_eq!(chunk.dirty_fragments(), vec![1]);

        chunk.mark_persisted(1);
        assert!(!chunk.is_dirty());
        assert_eq!(chunk.persisted(), 2);

        assert!(matches!(
            chunk.write(0, &[1]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_growth_preserves_rows() {
        let mut chunk = Chunk::allocate(60, layout(), 0, 1).unwrap();
        chunk.write(3, &[7, 8]).unwrap();

        chunk.ensure_capacity(3, false).unwrap();
        assert_eq!(chunk.len(), 32);

        assert!(matches!(
            chunk.ensure_capacity(4, false),
            Err(Error::OutOfRange {
                index: 4,
                capacity: 4
            })
        ));

        chunk.ensure_capacity(4, true).unwrap();
        assert_eq!(chunk.len(), 64);
        assert_eq!(chunk.read(3).unwrap(), vec![7, 8]);
        assert_eq!(chunk.read(7).unwrap(), vec![u32::MAX, u32::MAX]);

        chunk.ensure_capacity(11, true).unwrap();
        assert_eq!(chunk.fragments(), 3);

        // max_fragments reached
        assert!(matches!(
            chunk.ensure_capacity(12, true),
            Err(Error::OutOfRange { .. })
        ));
        assert_eq!(chunk.fragments(), 3);
    }

    #[test]
    fn test_based_chunk() {
        let mut chunk = Chunk::allocate(60, layout(), 8, 1).unwrap();
        assert_eq!(chunk.base_fragment(), 2);
        assert!(chunk.holds(8) && chunk.holds(11));
        assert!(!chunk.holds(7) && !chunk.holds(12));

        chunk.write(9, &[1, 2]).unwrap();
        assert_eq!(chunk.read(9).unwrap(), vec![1, 2]);
        assert_eq!(chunk.dirty_fragments(), vec![0]);
        assert!(matches!(
            chunk.read(3),
            Err(Error::InternalInconsistency(_))
        ));
        assert!(matches!(chunk.grow(), Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn test_from_bytes() {
        let chunk = Chunk::from_bytes(60, layout(), 0, vec![0u8; 48], 2).unwrap();
        assert_eq!(chunk.fragments(), 2);
        assert_eq!(chunk.len(), 64);
        assert_eq!(chunk.persisted(), 2);
        assert_eq!(chunk.read(5).unwrap(), vec![0, 0]);
        assert_eq!(chunk.read(6).unwrap(), vec![u32::MAX, u32::MAX]);

        assert!(matches!(
            Chunk::from_bytes(60, layout(), 0, vec![0u8; 7], 1),
            Err(Error::InvalidData(_))
        ));
    }
}
