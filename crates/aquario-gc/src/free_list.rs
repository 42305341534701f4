//! Address-ordered free list threaded through the heap arena
//!
//! Each free chunk stores its size in words at word 0 and the address of the
//! next chunk at word 1 (0 terminates the list). Chunks never overlap and the
//! list is kept in strictly increasing address order, so neighbours can be
//! coalesced on insertion.

use crate::heap::{Addr, GcHeap, Region};
use serde::Deserialize;

/// Smallest chunk the list can describe
pub const MIN_CHUNK_WORDS: usize = 2;

/// Chunk search policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitPolicy {
    /// First chunk large enough
    #[default]
    FirstFit,
    /// Smallest chunk large enough
    BestFit,
}

/// Intrusive free list
#[derive(Debug)]
pub struct FreeList {
    head: Option<Addr>,
    tail: Option<Addr>,
    policy: FitPolicy,
    free_words: usize,
}

#[inline]
fn chunk_size(heap: &GcHeap, chunk: Addr) -> usize {
    heap.load(chunk) as usize
}

#[inline]
fn chunk_next(heap: &GcHeap, chunk: Addr) -> Option<Addr> {
    match heap.load(chunk.add(1)) {
        0 => None,
        next => Some(Addr(next as usize)),
    }
}

#[inline]
fn write_chunk(heap: &mut GcHeap, chunk: Addr, size: usize, next: Option<Addr>) {
    heap.store(chunk, size as u64);
    heap.store(chunk.add(1), next.map_or(0, |n| n.0 as u64));
}

impl FreeList {
    /// Empty list
    pub fn new(policy: FitPolicy) -> Self {
        Self {
            head: None,
            tail: None,
            policy,
            free_words: 0,
        }
    }

    /// List holding `region` as a single chunk
    pub fn with_region(heap: &mut GcHeap, region: Region, policy: FitPolicy) -> Self {
        let mut list = Self::new(policy);
        if region.len() >= MIN_CHUNK_WORDS {
            list.push_back(heap, region.start, region.len());
        }
        list
    }

    /// Total words held by the list
    pub fn free_words(&self) -> usize {
        self.free_words
    }

    /// Forget every chunk, ready for an ordered rebuild with [`push_back`](Self::push_back)
    pub fn reset(&mut self) {
        self.head = None;
        self.tail = None;
        self.free_words = 0;
    }

    fn link(&mut self, heap: &mut GcHeap, prev: Option<Addr>, to: Option<Addr>) {
        match prev {
            Some(p) => heap.store(p.add(1), to.map_or(0, |n| n.0 as u64)),
            None => self.head = to,
        }
    }

    /// Remove a block of at least `size` words.
    ///
    /// Returns the block address and its actual size: the chunk is split when
    /// the remainder can still hold a chunk, otherwise it is handed out whole.
    pub fn take(&mut self, heap: &mut GcHeap, size: usize) -> Option<(Addr, usize)> {
        let size = size.max(MIN_CHUNK_WORDS);
        let mut prev = None;
        let mut cur = self.head;
        let mut found: Option<(Option<Addr>, Addr, usize)> = None;

        while let Some(chunk) = cur {
            let len = chunk_size(heap, chunk);
            if len >= size {
                let better = found.is_none_or(|(_, _, best)| len < best);
                if better {
                    found = Some((prev, chunk, len));
                }
                if self.policy == FitPolicy::FirstFit || len == size {
                    break;
                }
            }
            prev = Some(chunk);
            cur = chunk_next(heap, chunk);
        }

        let (prev, chunk, len) = found?;
        let next = chunk_next(heap, chunk);
        if len - size >= MIN_CHUNK_WORDS {
            let rest = chunk.add(size);
            write_chunk(heap, rest, len - size, next);
            self.link(heap, prev, Some(rest));
            if self.tail == Some(chunk) {
                self.tail = Some(rest);
            }
            self.free_words -= size;
            Some((chunk, size))
        } else {
            self.link(heap, prev, next);
            if self.tail == Some(chunk) {
                self.tail = prev;
            }
            self.free_words -= len;
            Some((chunk, len))
        }
    }

    /// Return a block, merging it with adjacent chunks
    pub fn give(&mut self, heap: &mut GcHeap, addr: Addr, size: usize) {
        let mut prev = None;
        let mut cur = self.head;
        while let Some(chunk) = cur {
            if chunk > addr {
                break;
            }
            prev = Some(chunk);
            cur = chunk_next(heap, chunk);
        }
        debug_assert!(prev.is_none_or(|p| p.add(chunk_size(heap, p)) <= addr));
        debug_assert!(cur.is_none_or(|n| addr.add(size) <= n));

        self.free_words += size;
        let mut len = size;
        let mut next = cur;
        if let Some(n) = cur
            && addr.add(size) == n
        {
            len += chunk_size(heap, n);
            next = chunk_next(heap, n);
        }

        let merged = match prev {
            Some(p) if p.add(chunk_size(heap, p)) == addr => {
                let total = chunk_size(heap, p) + len;
                write_chunk(heap, p, total, next);
                p
            }
            _ => {
                write_chunk(heap, addr, len, next);
                self.link(heap, prev, Some(addr));
                addr
            }
        };
        if next.is_none() {
            self.tail = Some(merged);
        }
    }

    /// Append a block above every chunk already in the list, merging it into
    /// the last chunk when they touch
    pub fn push_back(&mut self, heap: &mut GcHeap, addr: Addr, size: usize) {
        debug_assert!(size >= MIN_CHUNK_WORDS);
        self.free_words += size;
        match self.tail {
            Some(tail) if tail.add(chunk_size(heap, tail)) == addr => {
                let total = chunk_size(heap, tail) + size;
                heap.store(tail, total as u64);
            }
            tail => {
                debug_assert!(tail.is_none_or(|t| t < addr));
                write_chunk(heap, addr, size, None);
                self.link(heap, tail, Some(addr));
                self.tail = Some(addr);
            }
        }
    }

    /// Walk the chunks in address order
    pub fn chunks<'a>(&self, heap: &'a GcHeap) -> Chunks<'a> {
        Chunks {
            heap,
            cur: self.head,
        }
    }

    /// Size of the largest chunk
    pub fn largest_chunk(&self, heap: &GcHeap) -> usize {
        self.chunks(heap).map(|(_, len)| len).max().unwrap_or(0)
    }

    /// Visit every block of `region` that is not on the list.
    ///
    /// Allocated blocks must keep their size at word 0 like free chunks do,
    /// so the region can be walked block by block.
    pub fn for_each_allocated<F>(&self, heap: &GcHeap, region: Region, mut visit: F)
    where
        F: FnMut(Addr, usize),
    {
        let mut chunks = self.chunks(heap).peekable();
        let mut scan = region.start;
        while scan < region.end {
            let size = heap.load(scan) as usize;
            if size == 0 {
                break;
            }
            if chunks.peek().is_some_and(|&(chunk, _)| chunk == scan) {
                chunks.next();
            } else {
                visit(scan, size);
            }
            scan = scan.add(size);
        }
    }
}

/// Iterator over `(address, size)` of each free chunk
pub struct Chunks<'a> {
    heap: &'a GcHeap,
    cur: Option<Addr>,
}

impl Iterator for Chunks<'_> {
    type Item = (Addr, usize);

    fn next(&mut self) -> Option<(Addr, usize)> {
        let chunk = self.cur?;
        self.cur = chunk_next(self.heap, chunk);
        Some((chunk, chunk_size(self.heap, chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::WORD_BYTES;

    fn heap_and_list(words: usize, policy: FitPolicy) -> (GcHeap, FreeList) {
        let mut heap = GcHeap::new(words * WORD_BYTES);
        let region = heap.region();
        let list = FreeList::with_region(&mut heap, region, policy);
        (heap, list)
    }

    #[test]
    fn test_take_splits_front() {
        let (mut heap, mut list) = heap_and_list(64, FitPolicy::FirstFit);
        assert_eq!(list.take(&mut heap, 10), Some((Addr(0), 10)));
        assert_eq!(list.take(&mut heap, 10), Some((Addr(10), 10)));
        assert_eq!(list.free_words(), 44);
        assert_eq!(list.chunks(&heap).collect::<Vec<_>>(), vec![(Addr(20), 44)]);
    }

    #[test]
    fn test_take_whole_chunk_when_remainder_too_small() {
        let (mut heap, mut list) = heap_and_list(11, FitPolicy::FirstFit);
        assert_eq!(list.take(&mut heap, 10), Some((Addr(0), 11)));
        assert_eq!(list.free_words(), 0);
        assert_eq!(list.take(&mut heap, 2), None);
    }

    #[test]
    fn test_give_coalesces_both_sides() {
        let (mut heap, mut list) = heap_and_list(30, FitPolicy::FirstFit);
        let (a, _) = list.take(&mut heap, 10).unwrap();
        let (b, _) = list.take(&mut heap, 10).unwrap();
        let (c, _) = list.take(&mut heap, 10).unwrap();
        assert_eq!(list.free_words(), 0);

        list.give(&mut heap, a, 10);
        list.give(&mut heap, c, 10);
        assert_eq!(
            list.chunks(&heap).collect::<Vec<_>>(),
            vec![(Addr(0), 10), (Addr(20), 10)]
        );

        list.give(&mut heap, b, 10);
        assert_eq!(list.chunks(&heap).collect::<Vec<_>>(), vec![(Addr(0), 30)]);
        assert_eq!(list.free_words(), 30);
    }

    #[test]
    fn test_address_order_kept() {
        let (mut heap, mut list) = heap_and_list(40, FitPolicy::FirstFit);
        let blocks: Vec<_> = (0..4).map(|_| list.take(&mut heap, 10).unwrap().0).collect();
        list.give(&mut heap, blocks[3], 10);
        list.give(&mut heap, blocks[1], 10);
        let chunks: Vec<_> = list.chunks(&heap).map(|(a, _)| a).collect();
        assert_eq!(chunks, vec![blocks[1], blocks[3]]);
    }

    #[test]
    fn test_best_fit() {
        let (mut heap, mut list) = heap_and_list(40, FitPolicy::BestFit);
        let a = list.take(&mut heap, 8).unwrap().0;
        let _keep = list.take(&mut heap, 2).unwrap();
        let b = list.take(&mut heap, 4).unwrap().0;
        let _keep = list.take(&mut heap, 26).unwrap();
        list.give(&mut heap, a, 8);
        list.give(&mut heap, b, 4);
        // first-fit would pick the 8-word chunk
        assert_eq!(list.take(&mut heap, 4), Some((b, 4)));
    }

    #[test]
    fn test_push_back_merges_tail() {
        let mut heap = GcHeap::new(32 * WORD_BYTES);
        let mut list = FreeList::new(FitPolicy::FirstFit);
        list.push_back(&mut heap, Addr(2), 4);
        list.push_back(&mut heap, Addr(6), 4);
        list.push_back(&mut heap, Addr(20), 2);
        assert_eq!(
            list.chunks(&heap).collect::<Vec<_>>(),
            vec![(Addr(2), 8), (Addr(20), 2)]
        );
        assert_eq!(list.largest_chunk(&heap), 8);
    }

    #[test]
    fn test_for_each_allocated_skips_chunks() {
        let (mut heap, mut list) = heap_and_list(30, FitPolicy::FirstFit);
        let blocks: Vec<_> = (0..3).map(|_| list.take(&mut heap, 10).unwrap().0).collect();
        for &block in &blocks {
            heap.store(block, 10);
        }
        list.give(&mut heap, blocks[1], 10);

        let mut seen = Vec::new();
        let region = heap.region();
        list.for_each_allocated(&heap, region, |addr, size| seen.push((addr, size)));
        assert_eq!(seen, vec![(blocks[0], 10), (blocks[2], 10)]);
    }
}
