//! Mark-sweep collector
//!
//! Objects carry a single size word in front of the object word and are
//! carved out of an address-ordered free list. Marks live in a side bitmap
//! with one bit per heap word. The sweep walks the arena linearly and
//! rebuilds the free list, coalescing runs of dead blocks into one chunk.

use crate::collector::{Collector, CycleKind, GcContext, ObjectInfo, StrategyKind};
use crate::error::{GcError, GcResult};
use crate::free_list::{FreeList, MIN_CHUNK_WORDS};
use crate::heap::{Addr, GcConfig, GcHeap, Region, WORD_BYTES};
use crate::object::ObjRef;
use crate::trace::{MarkStack, trace_object, trace_roots};
use crate::value::Value;
use std::time::Instant;

const HEADER_WORDS: usize = 1;

#[inline]
fn block_size(heap: &GcHeap, obj: ObjRef) -> usize {
    heap.load(obj.header(HEADER_WORDS)) as usize
}

/// One mark bit per heap word
#[derive(Debug)]
pub struct MarkBitmap {
    bits: Vec<u64>,
}

impl MarkBitmap {
    /// Bitmap covering `words` heap words
    pub fn new(words: usize) -> Self {
        Self {
            bits: vec![0; words.div_ceil(64)],
        }
    }

    /// Set the bit for `addr`; returns false if it was already set
    #[inline]
    pub fn mark(&mut self, addr: Addr) -> bool {
        let (word, bit) = (addr.0 / 64, addr.0 % 64);
        let was_clear = self.bits[word] & (1 << bit) == 0;
        self.bits[word] |= 1 << bit;
        was_clear
    }

    /// Whether the bit for `addr` is set
    #[inline]
    pub fn is_marked(&self, addr: Addr) -> bool {
        self.bits[addr.0 / 64] & (1 << (addr.0 % 64)) != 0
    }

    /// Clear every bit
    pub fn clear(&mut self) {
        self.bits.fill(0);
    }
}

struct Marker<'a> {
    marks: &'a mut MarkBitmap,
    stack: &'a mut MarkStack,
    marked: usize,
}

impl Marker<'_> {
    fn visit(&mut self, value: Value) -> GcResult<()> {
        if let Some(obj) = value.as_ref()
            && self.marks.mark(obj.addr())
        {
            self.marked += 1;
            self.stack.push(obj)?;
        }
        Ok(())
    }
}

/// Mark-sweep collector
pub struct MarkSweepCollector {
    region: Region,
    free_list: FreeList,
    marks: MarkBitmap,
    mark_stack: MarkStack,
}

impl MarkSweepCollector {
    /// Hand the whole arena to the free list
    pub fn new(config: &GcConfig, heap: &mut GcHeap) -> Self {
        let region = heap.region();
        Self {
            free_list: FreeList::with_region(heap, region, config.fit),
            marks: MarkBitmap::new(region.len()),
            mark_stack: MarkStack::new(config.mark_stack_capacity),
            region,
        }
    }

    /// Words currently on the free list
    pub fn free_words(&self) -> usize {
        self.free_list.free_words()
    }

    fn mark(&mut self, ctx: &mut GcContext) -> GcResult<usize> {
        self.marks.clear();
        self.mark_stack.clear();
        let mut marker = Marker {
            marks: &mut self.marks,
            stack: &mut self.mark_stack,
            marked: 0,
        };
        trace_roots(&mut ctx.roots, &mut ctx.heap, |_, v| marker.visit(*v))?;
        while let Some(obj) = marker.stack.pop() {
            trace_object(&mut ctx.heap, obj, |_, v| marker.visit(*v))?;
        }
        Ok(marker.marked)
    }

    fn sweep(&mut self, heap: &mut GcHeap) -> usize {
        self.free_list.reset();
        let mut live = 0;
        let mut scan = self.region.start;
        while scan < self.region.end {
            let size = heap.load(scan) as usize;
            if self.marks.is_marked(scan.add(HEADER_WORDS)) {
                live += size;
            } else {
                self.free_list.push_back(heap, scan, size);
            }
            scan = scan.add(size);
        }
        live
    }

    fn mark_and_sweep(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        let started = Instant::now();
        let free_before = self.free_list.free_words();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "aquario::gc",
            strategy = "ms",
            free_words = free_before,
            "GC cycle starting"
        );

        let _marked = self.mark(ctx)?;
        let live = self.sweep(&mut ctx.heap);

        #[cfg(feature = "gc_logging")]
        tracing::trace!(target: "aquario::gc", marked = _marked, live_words = live, "sweep done");

        let reclaimed = self.free_list.free_words().saturating_sub(free_before);
        ctx.stats
            .record_cycle(StrategyKind::MarkSweep, CycleKind::Full, started, reclaimed, live);
        Ok(())
    }
}

impl Collector for MarkSweepCollector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MarkSweep
    }

    fn header_words(&self) -> usize {
        HEADER_WORDS
    }

    fn allocate(&mut self, ctx: &mut GcContext, words: usize) -> GcResult<ObjRef> {
        let size = (words + HEADER_WORDS).max(MIN_CHUNK_WORDS);
        if size > self.region.len() {
            return Err(GcError::ObjectTooLarge {
                requested: size * WORD_BYTES,
                limit: self.region.len() * WORD_BYTES,
            });
        }
        if ctx.stress {
            self.mark_and_sweep(ctx)?;
        }
        let (block, actual) = match self.free_list.take(&mut ctx.heap, size) {
            Some(found) => found,
            None => {
                self.mark_and_sweep(ctx)?;
                self.free_list
                    .take(&mut ctx.heap, size)
                    .ok_or(GcError::HeapExhausted {
                        requested: size * WORD_BYTES,
                        strategy: StrategyKind::MarkSweep.short_name(),
                    })?
            }
        };

        let obj = ObjRef::new(block.add(HEADER_WORDS));
        ctx.heap.store(block, actual as u64);
        ctx.heap.clear(obj.addr(), actual - HEADER_WORDS);
        Ok(obj)
    }

    fn collect(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        self.mark_and_sweep(ctx)
    }

    fn for_each_object(&self, heap: &GcHeap, visit: &mut dyn FnMut(ObjRef, usize)) {
        self.free_list
            .for_each_allocated(heap, self.region, |block, size| {
                visit(ObjRef::new(block.add(HEADER_WORDS)), size)
            });
    }

    fn describe(&self, heap: &GcHeap, obj: ObjRef) -> ObjectInfo {
        ObjectInfo {
            size_words: block_size(heap, obj),
            ..ObjectInfo::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{CAR, CDR, ObjectTag, object_word};

    fn setup(words: usize) -> (MarkSweepCollector, GcContext) {
        let config = GcConfig::new(StrategyKind::MarkSweep, words * WORD_BYTES);
        let mut ctx = GcContext::new(&config);
        let gc = MarkSweepCollector::new(&config, &mut ctx.heap);
        (gc, ctx)
    }

    fn pair(gc: &mut MarkSweepCollector, ctx: &mut GcContext, car: Value, cdr: Value) -> ObjRef {
        let obj = gc.allocate(ctx, 3).unwrap();
        ctx.heap.store(obj.addr(), object_word(ObjectTag::Pair, 0));
        ctx.heap.store_value(obj.field(CAR), car);
        ctx.heap.store_value(obj.field(CDR), cdr);
        obj
    }

    #[test]
    fn test_bitmap() {
        let mut bits = MarkBitmap::new(130);
        assert!(bits.mark(Addr(129)));
        assert!(!bits.mark(Addr(129)));
        assert!(bits.is_marked(Addr(129)));
        bits.clear();
        assert!(!bits.is_marked(Addr(129)));
    }

    #[test]
    fn test_sweep_coalesces_dead_runs() {
        let (mut gc, mut ctx) = setup(64);
        let a = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        let _b = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        let _c = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        ctx.roots.push(a.into()).unwrap();

        gc.collect(&mut ctx).unwrap();

        // b, c and the tail chunk merge into a single chunk after a
        let chunks: Vec<_> = gc.free_list.chunks(&ctx.heap).collect();
        assert_eq!(chunks, vec![(Addr(4), 60)]);
        assert_eq!(ctx.stats.last_reclaimed, 8 * WORD_BYTES);
    }

    #[test]
    fn test_reachable_chain_survives() {
        let (mut gc, mut ctx) = setup(64);
        let tail = pair(&mut gc, &mut ctx, Value::int(2), Value::NIL);
        ctx.roots.push(tail.into()).unwrap();
        let head = pair(&mut gc, &mut ctx, Value::int(1), tail.into());
        ctx.roots.pop().unwrap();
        ctx.roots.push(head.into()).unwrap();

        gc.collect(&mut ctx).unwrap();

        let mut live = Vec::new();
        gc.for_each_object(&ctx.heap, &mut |obj, _| live.push(obj));
        assert_eq!(live, vec![tail, head]);
    }

    #[test]
    fn test_mark_stack_overflow_is_fatal() {
        let config = GcConfig {
            mark_stack_capacity: 1,
            ..GcConfig::new(StrategyKind::MarkSweep, 64 * WORD_BYTES)
        };
        let mut ctx = GcContext::new(&config);
        let mut gc = MarkSweepCollector::new(&config, &mut ctx.heap);
        let a = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        let b = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        ctx.roots.push(a.into()).unwrap();
        ctx.roots.push(b.into()).unwrap();
        assert_eq!(
            gc.collect(&mut ctx),
            Err(GcError::MarkStackOverflow { capacity: 1 })
        );
    }

    #[test]
    fn test_exhaustion_after_collection() {
        let (mut gc, mut ctx) = setup(16);
        for _ in 0..4 {
            let obj = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
            ctx.roots.push(obj.into()).unwrap();
        }
        assert!(matches!(
            gc.allocate(&mut ctx, 3),
            Err(GcError::HeapExhausted { strategy: "ms", .. })
        ));
    }
}
