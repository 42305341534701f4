//! GC heap arena and configuration

use crate::collector::StrategyKind;
use crate::free_list::FitPolicy;
use crate::value::Value;
use serde::Deserialize;
use std::fmt;

/// Size of one heap word in bytes
pub const WORD_BYTES: usize = 8;

/// One heap word
pub type Word = u64;

/// Word index into the heap arena
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(pub usize);

impl Addr {
    /// Address `words` words further on
    #[inline]
    pub const fn add(self, words: usize) -> Addr {
        Addr(self.0 + words)
    }

    /// Address `words` words back
    #[inline]
    pub const fn sub(self, words: usize) -> Addr {
        Addr(self.0 - words)
    }

    /// Distance in words from `earlier` to `self`
    #[inline]
    pub const fn words_since(self, earlier: Addr) -> usize {
        self.0 - earlier.0
    }

    /// Raw word index
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:#x}", self.0 * WORD_BYTES)
    }
}

/// Half-open range of heap words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// First word of the region
    pub start: Addr,
    /// One past the last word
    pub end: Addr,
}

impl Region {
    /// Region of `len` words starting at `start`
    pub const fn new(start: Addr, len: usize) -> Self {
        Self {
            start,
            end: Addr(start.0 + len),
        }
    }

    /// Size in words
    pub const fn len(&self) -> usize {
        self.end.0 - self.start.0
    }

    /// Whether the region has no words
    pub const fn is_empty(&self) -> bool {
        self.start.0 == self.end.0
    }

    /// Whether `addr` lies inside the region
    #[inline]
    pub const fn contains(&self, addr: Addr) -> bool {
        addr.0 >= self.start.0 && addr.0 < self.end.0
    }
}

/// GC configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcConfig {
    /// Collection strategy (default: mark-sweep)
    pub strategy: StrategyKind,
    /// Heap size in bytes (default: 16KB)
    pub heap_size: usize,
    /// Collect on every allocation request
    pub stress: bool,
    /// Operand stack slots (default: 1M)
    pub stack_capacity: usize,
    /// Global table buckets (default: 3000)
    pub global_table_size: usize,
    /// Explicit mark stack entries (default: 1000)
    pub mark_stack_capacity: usize,
    /// Remembered set entries (default: 100)
    pub remembered_set_capacity: usize,
    /// Zero count table entries (default: 1024)
    pub zct_capacity: usize,
    /// Minor collections survived before promotion (default: 15)
    pub tenuring_threshold: u8,
    /// Each nursery semispace is `heap_size / nursery_fraction` (default: 5)
    pub nursery_fraction: usize,
    /// Free-list search policy (default: first-fit)
    pub fit: FitPolicy,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            heap_size: 16 * 1024,       // 16KB
            stress: false,
            stack_capacity: 1024 * 1024, // 1M slots
            global_table_size: 3000,
            mark_stack_capacity: 1000,
            remembered_set_capacity: 100,
            zct_capacity: 1024,
            tenuring_threshold: 15,
            nursery_fraction: 5,
            fit: FitPolicy::FirstFit,
        }
    }
}

impl GcConfig {
    /// Config for `strategy` with a heap of `heap_size` bytes
    pub fn new(strategy: StrategyKind, heap_size: usize) -> Self {
        Self {
            strategy,
            heap_size,
            ..Self::default()
        }
    }

    /// Heap size rounded down to whole words
    pub fn heap_words(&self) -> usize {
        self.heap_size / WORD_BYTES
    }
}

/// Word arena holding every collected object
pub struct GcHeap {
    words: Vec<Word>,
}

impl GcHeap {
    /// Create a zeroed arena of `size_bytes` bytes, rounded down to whole words
    pub fn new(size_bytes: usize) -> Self {
        Self {
            words: vec![0; size_bytes / WORD_BYTES],
        }
    }

    /// Arena size in words
    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    /// Arena size in bytes
    pub fn size_bytes(&self) -> usize {
        self.words.len() * WORD_BYTES
    }

    /// Region covering the whole arena
    pub fn region(&self) -> Region {
        Region::new(Addr(0), self.words.len())
    }

    /// Read a raw word
    #[inline]
    pub fn load(&self, addr: Addr) -> Word {
        self.words[addr.0]
    }

    /// Write a raw word
    #[inline]
    pub fn store(&mut self, addr: Addr, word: Word) {
        self.words[addr.0] = word;
    }

    /// Read a word as a value
    #[inline]
    pub fn load_value(&self, addr: Addr) -> Value {
        Value::from_bits(self.words[addr.0])
    }

    /// Write a value into a word
    #[inline]
    pub fn store_value(&mut self, addr: Addr, value: Value) {
        self.words[addr.0] = value.bits();
    }

    /// Copy `len` words from `src` to `dst`; the ranges may overlap
    pub fn copy_words(&mut self, src: Addr, dst: Addr, len: usize) {
        self.words.copy_within(src.0..src.0 + len, dst.0);
    }

    /// Zero `len` words starting at `start`
    pub fn clear(&mut self, start: Addr, len: usize) {
        self.words[start.0..start.0 + len].fill(0);
    }

    /// Give the arena memory back; the heap is empty afterwards
    pub fn release(&mut self) {
        self.words = Vec::new();
    }
}

impl fmt::Debug for GcHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcHeap")
            .field("words", &self.words.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_creation() {
        let heap = GcHeap::new(16 * 1024);
        assert_eq!(heap.len_words(), 2048);
        assert_eq!(heap.size_bytes(), 16 * 1024);
    }

    #[test]
    fn test_copy_overlapping() {
        let mut heap = GcHeap::new(8 * WORD_BYTES);
        for i in 0..4 {
            heap.store(Addr(2 + i), i as Word + 10);
        }
        heap.copy_words(Addr(2), Addr(0), 4);
        assert_eq!(heap.load(Addr(0)), 10);
        assert_eq!(heap.load(Addr(3)), 13);
    }

    #[test]
    fn test_region() {
        let region = Region::new(Addr(4), 4);
        assert!(region.contains(Addr(4)));
        assert!(region.contains(Addr(7)));
        assert!(!region.contains(Addr(8)));
        assert_eq!(region.len(), 4);
    }

    #[test]
    fn test_config_defaults() {
        let config = GcConfig::default();
        assert_eq!(config.strategy, StrategyKind::MarkSweep);
        assert_eq!(config.heap_words(), 2048);
        assert_eq!(config.tenuring_threshold, 15);
    }
}
