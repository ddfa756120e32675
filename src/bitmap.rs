//! Dense bitmaps over the key index space.
//!
//! Bit `i` lives in word `i / 32` at position `i % 32`. Words serialize as
//! little-endian `u32`s.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

pub const BITS_PER_WORD: u32 = u32::BITS;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u32>,
}

fn word_offset(index: u32) -> usize {
    (index / BITS_PER_WORD) as usize
}

fn bit_mask(index: u32) -> u32 {
    1 << (index % BITS_PER_WORD)
}

impl Bitmap {
    /// A cleared bitmap of `words` words.
    pub fn zeroed(words: usize) -> Result<Self> {
        let mut bitmap = Self::default();
        bitmap.extend(words)?;
        Ok(bitmap)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::InvalidData(format!(
                "bitmap of {} bytes is not word aligned",
                bytes.len()
            )));
        }
        let mut words = Vec::new();
        words
            .try_reserve_exact(bytes.len() / 4)
            .map_err(|_| Error::OutOfMemory(bytes.len()))?;
        words.resize(bytes.len() / 4, 0);
        LittleEndian::read_u32_into(bytes, &mut words);
        Ok(Self { words })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.words.len() * 4];
        LittleEndian::write_u32_into(&self.words, &mut bytes);
        bytes
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Number of addressable bits.
    pub fn capacity(&self) -> u64 {
        self.words.len() as u64 * BITS_PER_WORD as u64
    }

    fn extend(&mut self, words: usize) -> Result<()> {
        self.words
            .try_reserve_exact(words)
            .map_err(|_| Error::OutOfMemory(words * 4))?;
        self.words.resize(self.words.len() + words, 0);
        Ok(())
    }

    /// Grows by `step_words` at a time until bit `index` is addressable.
    /// Returns whether the bitmap grew.
    pub fn grow_to_cover(&mut self, index: u32, step_words: usize) -> Result<bool> {
        if step_words == 0 {
            return Err(Error::InvalidInput("bitmap growth step is zero".to_string()));
        }
        let needed = word_offset(index) + 1;
        if self.words.len() >= needed {
            return Ok(false);
        }
        let steps = (needed - self.words.len()).div_ceil(step_words);
        self.extend(steps * step_words)?;
        Ok(true)
    }

    pub fn set(&mut self, index: u32) -> Result<()> {
        let capacity = self.capacity();
        let word = self
            .words
            .get_mut(word_offset(index))
            .ok_or(Error::OutOfRange {
                index,
                capacity: capacity.min(u32::MAX as u64) as u32,
            })?;
        *word |= bit_mask(index);
        Ok(())
    }

    /// Clears a bit. Bits beyond the capacity are already clear.
    pub fn clear(&mut self, index: u32) {
        if let Some(word) = self.words.get_mut(word_offset(index)) {
            *word &= !bit_mask(index);
        }
    }

    pub fn get(&self, index: u32) -> bool {
        self.words
            .get(word_offset(index))
            .is_some_and(|word| word & bit_mask(index) != 0)
    }

    /// Keeps only bits also set in `other`.
    pub fn and_assign(&mut self, other: &Bitmap) {
        for (i, word) in self.words.iter_mut().enumerate() {
            *word &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// Adds every bit set in `other`, growing to its size if needed.
    pub fn or_assign(&mut self, other: &Bitmap) -> Result<()> {
        if other.words.len() > self.words.len() {
            self.extend(other.words.len() - self.words.len())?;
        }
        for (word, theirs) in self.words.iter_mut().zip(&other.words) {
            *word |= theirs;
        }
        Ok(())
    }

    pub fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Set bits below `limit` in ascending order.
    pub fn iter_ones(&self, limit: u64) -> Ones<'_> {
        Ones {
            words: &self.words,
            word: 0,
            current: self.words.first().copied().unwrap_or(0),
            limit,
        }
    }
}

pub struct Ones<'a> {
    words: &'a [u32],
    word: usize,
    current: u32,
    limit: u64,
}

impl Iterator for Ones<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros();
                let index = self.word as u64 * BITS_PER_WORD as u64 + bit as u64;
                if index >= self.limit {
                    return None;
                }
                self.current &= self.current - 1;
                return Some(index as u32);
            }
            self.word += 1;
            if self.word >= self.words.len()
                || self.word as u64 * BITS_PER_WORD as u64 >= self.limit
            {
                return None;
            }
            self.current = self.words[self.word];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_get() {
        let mut bitmap = Bitmap::zeroed(2).unwrap();
        assert_eq!(bitmap.capacity(), 64);

        bitmap.set(0).unwrap();
        bitmap.set(31).unwrap();
        bitmap.set(32).unwrap();
        bitmap.set(63).unwrap();
        assert!(bitmap.get(0) && bitmap.get(31) && bitmap.get(32) && bitmap.get(63));
        assert!(!bitmap.get(1));
        assert!(!bitmap.get(64));
        assert_eq!(bitmap.words(), &[0x8000_0001, 0x8000_0001]);

        bitmap.clear(31);
        bitmap.clear(1000);
        assert!(!bitmap.get(31));
        assert_eq!(bitmap.count_ones(), 3);

        assert!(matches!(
            bitmap.set(64),
            Err(Error::OutOfRange {
                index: 64,
                capacity: 64
            })
        ));
    }

    #[test]
    fn test_grow_in_steps() {
        let mut bitmap = Bitmap::zeroed(4).unwrap();
        assert!(!bitmap.grow_to_cover(127, 4).unwrap());
        assert!(bitmap.grow_to_cover(128, 4).unwrap());
        assert_eq!(bitmap.words().len(), 8);
        assert!(bitmap.grow_to_cover(1000, 4).unwrap());
        assert_eq!(bitmap.words().len(), 32);
        assert!(bitmap.grow_to_cover(1, 0).is_err());
    }

    #[test]
    fn test_bytes() {
        let mut bitmap = Bitmap::zeroed(2).unwrap();
        bitmap.set(1).unwrap();
        bitmap.set(40).unwrap();
        let bytes = bitmap.to_bytes();
        assert_eq!(bytes, vec![2, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(Bitmap::from_bytes(&bytes).unwrap(), bitmap);
        assert!(matches!(
            Bitmap::from_bytes(&[0, 1, 2]),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_and_or() {
        let mut blue = Bitmap::zeroed(1).unwrap();
        blue.set(0).unwrap();
        blue.set(1).unwrap();
        let mut red = Bitmap::zeroed(2).unwrap();
        red.set(1).unwrap();
        red.set(40).unwrap();

        let mut and = blue.clone();
        and.and_assign(&red);
        assert_eq!(and.iter_ones(u64::MAX).collect::<Vec<_>>(), vec![1]);

        let mut or = blue.clone();
        or.or_assign(&red).unwrap();
        assert_eq!(or.iter_ones(u64::MAX).collect::<Vec<_>>(), vec![0, 1, 40]);

        // Words missing from the right-hand side count as zero
        let mut wide = red.clone();
        wide.and_assign(&blue);
        assert_eq!(wide.iter_ones(u64::MAX).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_iter_ones_limit() {
        let mut bitmap = Bitmap::zeroed(3).unwrap();
        for index in [0, 5, 31, 33, 70] {
            bitmap.set(index).unwrap();
        }
        assert_eq!(bitmap.iter_ones(71).collect::<Vec<_>>(), vec![0, 5, 31, 33, 70]);
        assert_eq!(bitmap.iter_ones(70).collect::<Vec<_>>(), vec![0, 5, 31, 33]);
        assert_eq!(bitmap.iter_ones(32).collect::<Vec<_>>(), vec![0, 5, 31]);
        assert_eq!(bitmap.iter_ones(0).count(), 0);
        assert_eq!(Bitmap::default().iter_ones(100).count(), 0);
    }
}
