//! Bump allocation inside a heap region

use crate::heap::{Addr, Region};

/// Bump allocator over one region
#[derive(Debug, Clone, Copy)]
pub struct BumpAllocator {
    region: Region,
    top: Addr,
}

impl BumpAllocator {
    /// Empty allocator over `region`
    pub fn new(region: Region) -> Self {
        Self {
            top: region.start,
            region,
        }
    }

    /// Allocate `words` words (returns None if a collection is needed)
    pub fn allocate(&mut self, words: usize) -> Option<Addr> {
        if !self.fits(words) {
            return None;
        }
        let block = self.top;
        self.top = self.top.add(words);
        Some(block)
    }

    /// Whether `words` more words fit
    pub fn fits(&self, words: usize) -> bool {
        self.top.0 + words <= self.region.end.0
    }

    /// Current allocation pointer
    pub fn top(&self) -> Addr {
        self.top
    }

    /// Move the allocation pointer, e.g. after evacuating into the region
    pub fn set_top(&mut self, top: Addr) {
        debug_assert!(top >= self.region.start && top <= self.region.end);
        self.top = top;
    }

    /// Words handed out so far
    pub fn used(&self) -> usize {
        self.top.words_since(self.region.start)
    }

    /// Words still available
    pub fn remaining(&self) -> usize {
        self.region.end.words_since(self.top)
    }

    /// Region being allocated into
    pub fn region(&self) -> Region {
        self.region
    }

    /// Start over from the bottom of the region
    pub fn reset(&mut self) {
        self.top = self.region.start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_bump() {
        let mut alloc = BumpAllocator::new(Region::new(Addr(10), 8));
        assert_eq!(alloc.allocate(3), Some(Addr(10)));
        assert_eq!(alloc.allocate(5), Some(Addr(13)));
        assert_eq!(alloc.allocate(1), None);
        assert_eq!(alloc.used(), 8);
        assert_eq!(alloc.remaining(), 0);
    }

    #[test]
    fn test_allocator_reset() {
        let mut alloc = BumpAllocator::new(Region::new(Addr(0), 8));
        let first = alloc.allocate(4);
        alloc.reset();
        // After reset, should allocate from same position
        assert_eq!(alloc.allocate(4), first);
    }
}
