//! Tag index: named bitmaps over key indexes.
//!
//! A tag is stored whole under `tag-<name>` and rewritten on every mutation.
//! Bitmaps grow in fixed word steps so they always cover every allocated
//! index.

use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::map::DurableMap;

pub const TAG_PREFIX: &str = "tag-";

pub fn tag_record(name: &str) -> Vec<u8> {
    format!("{}{}", TAG_PREFIX, name).into_bytes()
}

/// Boolean fold applied across several tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    And,
    Or,
}

/// Snapshot of a tag's bitmap. Later mutations of the stored tag are not
/// observed until it is read again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    name: String,
    bitmap: Bitmap,
}

impl Tag {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Whether the key at `index` carries this tag.
    pub fn contains(&self, index: u32) -> bool {
        self.bitmap.get(index)
    }

    fn load<M: DurableMap>(map: &M, name: &str) -> Result<Option<Tag>> {
        let Some(bytes) = map.get(&tag_record(name))? else {
            return Ok(None);
        };
        Ok(Some(Tag {
            name: name.to_string(),
            bitmap: Bitmap::from_bytes(&bytes)?,
        }))
    }
}

/// Reads and updates tags stored in a [`DurableMap`].
#[derive(Debug, Clone)]
pub struct TagIndex {
    growth_words: usize,
}

impl TagIndex {
    pub fn new(growth_words: usize) -> Self {
        Self { growth_words }
    }

    /// Loads a tag, failing with `NotFound` when it was never created.
    pub fn get<M: DurableMap>(&self, map: &M, name: &str) -> Result<Tag> {
        Tag::load(map, name)?.ok_or_else(|| Error::not_found(format!("tag {}", name)))
    }

    /// Sets the bit of `index` in tag `name`, creating the tag if needed.
    pub fn tag_index<M: DurableMap>(
        &self,
        map: &mut M,
        name: &str,
        index: u32,
        lowest_free_index: u32,
    ) -> Result<()> {
        let mut tag = match Tag::load(map, name)? {
            Some(tag) => tag,
            None => {
                tracing::debug!(tag = name, "Creating tag");
                Tag {
                    name: name.to_string(),
                    bitmap: Bitmap::zeroed(self.growth_words)?,
                }
            }
        };

        let cover = index.max(lowest_free_index.saturating_sub(1));
        if tag.bitmap.grow_to_cover(cover, self.growth_words)? {
            tracing::debug!(
                tag = name,
                words = tag.bitmap.words().len(),
                "Grew tag bitmap"
            );
        }
        tag.bitmap.set(index)?;

        map.put(&tag_record(name), &tag.bitmap.to_bytes())
    }

    /// Indexes carrying tag `name`, ascending, below
    /// `min(capacity, lowest_free_index)`.
    pub fn indexes<M: DurableMap>(
        &self,
        map: &M,
        name: &str,
        capacity: u32,
        lowest_free_index: u32,
    ) -> Result<Vec<u32>> {
        let tag = self.get(map, name)?;
        Ok(scan(&tag.bitmap, capacity, lowest_free_index))
    }

    /// Folds the named tags word by word with `op` and scans the result.
    /// Missing tags are skipped; if none exist the result is empty.
    pub fn consolidated_indexes<M: DurableMap, S: AsRef<str>>(
        &self,
        map: &M,
        names: &[S],
        op: TagOp,
        capacity: u32,
        lowest_free_index: u32,
    ) -> Result<Vec<u32>> {
        let mut folded: Option<Bitmap> = None;
        for name in names {
            let name: &str = name.as_ref();
            let Some(tag) = Tag::load(map, name)? else {
                tracing::debug!(tag = name, "Skipping missing tag");
                continue;
            };
            match folded.as_mut() {
                None => folded = Some(tag.bitmap),
                Some(acc) => match op {
                    TagOp::And => acc.and_assign(&tag.bitmap),
                    TagOp::Or => acc.or_assign(&tag.bitmap)?,
                },
            }
        }

        Ok(folded
            .map(|bitmap| scan(&bitmap, capacity, lowest_free_index))
            .unwrap_or_default())
    }
}

fn scan(bitmap: &Bitmap, capacity: u32, lowest_free_index: u32) -> Vec<u32> {
    let limit = capacity.min(lowest_free_index) as u64;
    bitmap.iter_ones(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MemoryMap;

    #[test]
    fn test_tag_and_query() -> Result<()> {
        let mut map = MemoryMap::new();
        let tags = TagIndex::new(4);

        tags.tag_index(&mut map, "blue", 0, 2)?;
        tags.tag_index(&mut map, "blue", 1, 2)?;
        tags.tag_index(&mut map, "red", 1, 2)?;

        assert_eq!(tags.indexes(&map, "blue", 100, 2)?, vec![0, 1]);
        assert_eq!(tags.indexes(&map, "red", 100, 2)?, vec![1]);
        assert_eq!(tags.indexes(&map, "blue", 1, 2)?, vec![0]);
        assert!(tags.indexes(&map, "green", 100, 2).unwrap_err().is_not_found());

        // One growth step of 4 words
        assert_eq!(map.get(b"tag-red")?.map(|b| b.len()), Some(16));
        Ok(())
    }

    #[test]
    fn test_consolidated() -> Result<()> {
        let mut map = MemoryMap::new();
        let tags = TagIndex::new(4);
        tags.tag_index(&mut map, "blue", 0, 2)?;
        tags.tag_index(&mut map, "blue", 1, 2)?;
        tags.tag_index(&mut map, "red", 1, 2)?;

        assert_eq!(
            tags.consolidated_indexes(&map, &["blue", "red"], TagOp::And, 100, 2)?,
            vec![1]
        );
        assert_eq!(
            tags.consolidated_indexes(&map, &["blue", "red"], TagOp::Or, 100, 2)?,
            vec![0, 1]
        );
        assert_eq!(
            tags.consolidated_indexes(&map, &["missing", "red"], TagOp::And, 100, 2)?,
            vec![1]
        );
        assert!(tags
            .consolidated_indexes(&map, &["missing", "gone"], TagOp::Or, 100, 2)?
            .is_empty());
        Ok(())
    }

    #[test]
    fn test_bitmap_grows_with_index_space() -> Result<()> {
        let mut map = MemoryMap::new();
        let tags = TagIndex::new(1);

        tags.tag_index(&mut map, "wide", 3, 4)?;
        assert_eq!(tags.get(&map, "wide")?.bitmap().words().len(), 1);

        // Covers lowest_free_index - 1 even when the tagged index is small
        tags.tag_index(&mut map, "wide", 4, 100)?;
        let tag = tags.get(&map, "wide")?;
        assert_eq!(tag.bitmap().words().len(), 4);
        assert!(tag.contains(3) && tag.contains(4));
        assert!(!tag.contains(99));

        tags.tag_index(&mut map, "wide", 99, 100)?;
        assert_eq!(tags.indexes(&map, "wide", u32::MAX, 100)?, vec![3, 4, 99]);
        Ok(())
    }

    #[test]
    fn test_snapshot_does_not_observe_updates() -> Result<()> {
        let mut map = MemoryMap::new();
        let tags = TagIndex::new(2);
        tags.tag_index(&mut map, "blue", 0, 2)?;

        let snapshot = tags.get(&map, "blue")?;
        tags.tag_index(&mut map, "blue", 1, 2)?;
        assert!(!snapshot.contains(1));
        assert!(tags.get(&map, "blue")?.contains(1));
        assert_eq!(snapshot.name(), "blue");
        Ok(())
    }
}
