//! Fragment persistence.
//!
//! Fragments are stored under `<epoch>-<fragment_id>` as codec blocks. Ids
//! are dense: an eager load stops at the first missing id, so writes never
//! leave a gap below a stored fragment.

use super::{Chunk, ChunkLayout};
use crate::codec::BlockCodec;
use crate::error::{Error, Result};
use crate::map::DurableMap;

pub fn fragment_key(epoch: u32, fragment_id: u32) -> Vec<u8> {
    format!("{}-{}", epoch, fragment_id).into_bytes()
}

/// Decompresses one stored fragment, or `None` if it does not exist.
pub fn load_fragment<M: DurableMap, C: BlockCodec>(
    map: &M,
    codec: &mut C,
    layout: &ChunkLayout,
    epoch: u32,
    fragment_id: u32,
) -> Result<Option<Vec<u8>>> {
    let Some(block) = map.get(&fragment_key(epoch, fragment_id))? else {
        return Ok(None);
    };
    let data = codec.decompress(&block)?;
    if data.len() % layout.entry_width != 0 {
        return Err(Error::InvalidData(format!(
            "fragment {}-{} holds {} bytes, not a multiple of the {} byte entry width",
            epoch,
            fragment_id,
            data.len(),
            layout.entry_width
        )));
    }

    tracing::debug!(
        epoch = epoch,
        fragment = fragment_id,
        compressed = block.len(),
        decompressed = data.len(),
        "Decompressed fragment"
    );
    Ok(Some(data))
}

/// Concatenates fragments `0, 1, 2, …` of an epoch until the first missing
/// id. Returns the bytes and the number of fragments read, or `None` when
/// fragment 0 does not exist.
pub fn load_epoch<M: DurableMap, C: BlockCodec>(
    map: &M,
    codec: &mut C,
    layout: &ChunkLayout,
    epoch: u32,
) -> Result<Option<(Vec<u8>, usize)>> {
    let mut data = Vec::new();
    let mut count = 0usize;

    while count < layout.max_fragments {
        let Some(block) = map.get(&fragment_key(epoch, count as u32))? else {
            break;
        };

        let len = codec.decompressed_len(&block)?;
        data.try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory(data.len() + len))?;
        let fragment = codec.decompress(&block)?;
        data.extend_from_slice(&fragment);

        tracing::debug!(
            epoch = epoch,
            fragment = count,
            compressed = block.len(),
            decompressed = fragment.len(),
            "Decompressed fragment"
        );
        count += 1;
    }

    if count == 0 {
        return Ok(None);
    }
    Ok(Some((data, count)))
}

fn store_fragment<M: DurableMap, C: BlockCodec>(
    map: &mut M,
    codec: &mut C,
    epoch: u32,
    fragment_id: u32,
    data: &[u8],
) -> Result<()> {
    let block = codec.compress(data);
    let percent = block.len() as f64 * 100.0 / data.len().max(1) as f64;
    tracing::debug!(
        epoch = epoch,
        fragment = fragment_id,
        size = data.len(),
        compressed = block.len(),
        percent = percent,
        "Compressed fragment"
    );
    map.put(&fragment_key(epoch, fragment_id), &block)
}

/// Persists the dirty fragments of `chunk` and returns how many fragments
/// were written.
///
/// Fragments between the last persisted one and the highest dirty one are
/// written too, and missing fragment ids below the chunk's base are
/// backfilled with fill-initialized blocks.
pub fn flush_chunk<M: DurableMap, C: BlockCodec>(
    map: &mut M,
    codec: &mut C,
    chunk: &mut Chunk,
) -> Result<usize> {
    let dirty = chunk.dirty_fragments();
    let Some(&highest) = dirty.last() else {
        tracing::debug!(epoch = chunk.epoch(), "Skipping flush of clean chunk");
        return Ok(0);
    };

    let epoch = chunk.epoch();
    let base_fragment = chunk.base_fragment();
    let mut written = 0;

    let mut fill_block: Option<Vec<u8>> = None;
    for fragment_id in 0..base_fragment {
        if map.contains(&fragment_key(epoch, fragment_id))? {
            continue;
        }
        let block = match &fill_block {
            Some(block) => block.clone(),
            None => {
                let layout = chunk.layout();
                let empty = vec![layout.fill; layout.fragment_bytes()];
                let block = codec.compress(&empty);
                fill_block = Some(block.clone());
                block
            }
        };
        tracing::debug!(epoch = epoch, fragment = fragment_id, "Backfilling fragment");
        map.put(&fragment_key(epoch, fragment_id), &block)?;
        written += 1;
    }

    for local in 0..=highest {
        if local >= chunk.persisted() || dirty.contains(&local) {
            store_fragment(
                map,
                codec,
                epoch,
                base_fragment + local as u32,
                chunk.fragment(local),
            )?;
            chunk.mark_persisted(local);
            written += 1;
        } else {
            tracing::debug!(
                epoch = epoch,
                fragment = base_fragment + local as u32,
                "Skipping unchanged fragment"
            );
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::tests::layout;
    use crate::codec::Lz4Codec;
    use crate::map::MemoryMap;

    #[test]
    fn test_fragment_key() {
        assert_eq!(fragment_key(1700000000, 0), b"1700000000-0".to_vec());
        assert_eq!(fragment_key(60, 12), b"60-12".to_vec());
    }

    #[test]
    fn test_flush_and_reload() -> Result<()> {
        let mut map = MemoryMap::new();
        let mut codec = Lz4Codec::new();

        let mut chunk = Chunk::allocate(60, layout(), 0, 1)?;
        chunk.write(1, &[1, 2])?;
        chunk.ensure_capacity(5, true)?;
        chunk.write(5, &[3, 4])?;

        assert_eq!(flush_chunk(&mut map, &mut codec, &mut chunk)?, 2);
        assert!(!chunk.is_dirty());

        let (data, count) = load_epoch(&map, &mut codec, &layout(), 60)?.expect("epoch stored");
        assert_eq!(count, 2);
        let loaded = Chunk::from_bytes(60, layout(), 0, data, count)?;
        assert_eq!(loaded.read(1)?, vec![1, 2]);
        assert_eq!(loaded.read(5)?, vec![3, 4]);
        assert_eq!(loaded.read(7)?, vec![u32::MAX, u32::MAX]);

        assert!(load_epoch(&map, &mut codec, &layout(), 120)?.is_none());
        Ok(())
    }

    #[test]
    fn test_second_flush_writes_nothing() -> Result<()> {
        let mut map = MemoryMap::new();
        let mut codec = Lz4Codec::new();

        let mut chunk = Chunk::allocate(60, layout(), 0, 1)?;
        chunk.write(0, &[9, 9])?;
        assert_eq!(flush_chunk(&mut map, &mut codec, &mut chunk)?, 1);
        let puts = map.put_count();

        assert_eq!(flush_chunk(&mut map, &mut codec, &mut chunk)?, 0);
        assert_eq!(map.put_count(), puts);
        Ok(())
    }

    #[test]
    fn test_only_dirty_fragments_are_rewritten() -> Result<()> {
        let mut map = MemoryMap::new();
        let mut codec = Lz4Codec::new();

        let mut chunk = Chunk::allocate(60, layout(), 0, 3)?;
        for index in [0, 4, 8] {
            chunk.write(index, &[index, index])?;
        }
        assert_eq!(flush_chunk(&mut map, &mut codec, &mut chunk)?, 3);

        chunk.write(4, &[40, 40])?;
        assert_eq!(flush_chunk(&mut map, &mut codec, &mut chunk)?, 1);
        Ok(())
    }

    #[test]
    fn test_gap_below_dirty_fragment_is_written() -> Result<()> {
        let mut map = MemoryMap::new();
        let mut codec = Lz4Codec::new();

        // Fresh epoch where only fragment 2 receives data
        let mut chunk = Chunk::allocate(60, layout(), 0, 3)?;
        chunk.write(9, &[5, 6])?;
        assert_eq!(flush_chunk(&mut map, &mut codec, &mut chunk)?, 3);

        let (data, count) = load_epoch(&map, &mut codec, &layout(), 60)?.expect("epoch stored");
        assert_eq!(count, 3);
        let loaded = Chunk::from_bytes(60, layout(), 0, data, count)?;
        assert_eq!(loaded.read(9)?, vec![5, 6]);
        assert_eq!(loaded.read(0)?, vec![u32::MAX, u32::MAX]);
        Ok(())
    }

    #[test]
    fn test_backfill_below_single_fragment() -> Result<()> {
        let mut map = MemoryMap::new();
        let mut codec = Lz4Codec::new();

        let mut chunk = Chunk::allocate(60, layout(), 8, 1)?;
        chunk.write(10, &[7, 7])?;
        assert_eq!(flush_chunk(&mut map, &mut codec, &mut chunk)?, 3);
        assert!(map.contains(b"60-0")?);
        assert!(map.contains(b"60-1")?);

        let block = load_fragment(&map, &mut codec, &layout(), 60, 1)?.expect("backfilled");
        assert!(block.iter().all(|b| *b == 0xff));

        // Existing lower fragments are left alone
        let mut again = Chunk::allocate(60, layout(), 8, 1)?;
        again.write(11, &[8, 8])?;
        assert_eq!(flush_chunk(&mut map, &mut codec, &mut again)?, 1);
        Ok(())
    }
}
