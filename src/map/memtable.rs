use crossbeam_skiplist::{map::Entry, SkipMap};
use std::ops::Bound;

/// Ordered in-memory table holding the live contents of a durable map.
#[derive(Debug, Default)]
pub struct Memtable {
    data: SkipMap<Vec<u8>, Vec<u8>>,
    // Sum of key and value lengths of live entries
    size: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
            size: 0,
        }
    }

    /// Inserts or replaces a key-value pair.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let entry_size = key.len() + value.len();
        if let Some(old) = self.data.get(key.as_slice()) {
            self.size -= old.key().len() + old.value().len();
        }
        self.data.insert(key, value);
        self.size += entry_size;
    }

    /// Removes a key. Returns whether it was present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        match self.data.remove(key) {
            Some(entry) => {
                self.size -= entry.key().len() + entry.value().len();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.data.contains_key(key)
    }

    /// Size of the live entries in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> ScanIter<'_> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    /// Iterates over all entries whose key starts with `prefix`.
    pub fn scan_prefix(&self, prefix: &[u8]) -> ScanIter<'_> {
        let start = Bound::Included(prefix.to_vec());
        let end = match prefix.iter().rposition(|b| *b != 0xff) {
            Some(i) => Bound::Excluded(
                prefix[..i]
                    .iter()
                    .chain(std::iter::once(&(prefix[i] + 1)))
                    .copied()
                    .collect::<Vec<u8>>(),
            ),
            None => Bound::Unbounded,
        };
        self.range(start, end)
    }

    fn range(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> ScanIter<'_> {
        ScanIter {
            inner: self.data.range((start, end)),
        }
    }
}

type SkipMapRange<'a> =
    crossbeam_skiplist::map::Range<'a, Vec<u8>, (Bound<Vec<u8>>, Bound<Vec<u8>>), Vec<u8>, Vec<u8>>;

pub struct ScanIter<'a> {
    inner: SkipMapRange<'a>,
}

impl<'a> ScanIter<'a> {
    fn map(entry: Entry<'_, Vec<u8>, Vec<u8>>) -> (Vec<u8>, Vec<u8>) {
        (entry.key().clone(), entry.value().clone())
    }
}

impl<'a> Iterator for ScanIter<'a> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Self::map)
    }
}
