//! Semispace copying collector
//!
//! The arena is split into two halves. Objects are bump-allocated in
//! from-space; a collection evacuates everything reachable into to-space
//! with a Cheney scan and swaps the halves.
//!
//! Header layout (in front of the object word):
//!
//! | offset | content                              |
//! |--------|--------------------------------------|
//! | -2     | block size in words, header included |
//! | -1     | forwarding address, 0 when not moved |

use crate::allocator::BumpAllocator;
use crate::collector::{Collector, CycleKind, GcContext, ObjectInfo, StrategyKind};
use crate::error::{GcError, GcResult};
use crate::heap::{Addr, GcHeap, Region, WORD_BYTES};
use crate::object::ObjRef;
use crate::trace::{trace_object, trace_roots};
use crate::value::Value;
use std::time::Instant;

const HEADER_WORDS: usize = 2;
const SIZE: usize = 2;
const FORWARD: usize = 1;

#[inline]
fn block_size(heap: &GcHeap, obj: ObjRef) -> usize {
    heap.load(obj.header(SIZE)) as usize
}

#[inline]
fn forwarding(heap: &GcHeap, obj: ObjRef) -> Option<ObjRef> {
    match heap.load(obj.header(FORWARD)) {
        0 => None,
        addr => Some(ObjRef::new(Addr(addr as usize))),
    }
}

#[inline]
fn set_forwarding(heap: &mut GcHeap, obj: ObjRef, to: Option<ObjRef>) {
    heap.store(obj.header(FORWARD), to.map_or(0, |o| o.addr().0 as u64));
}

/// Evacuates reachable objects into to-space
struct Forwarder {
    from: Region,
    to: BumpAllocator,
}

impl Forwarder {
    fn forward(&mut self, heap: &mut GcHeap, value: &mut Value) -> GcResult<()> {
        let Some(obj) = value.as_ref() else {
            return Ok(());
        };
        if let Some(moved) = forwarding(heap, obj) {
            *value = moved.into();
            return Ok(());
        }
        debug_assert!(self.from.contains(obj.addr()));

        let size = block_size(heap, obj);
        // survivors never outgrow the half they came from
        let dst = self.to.allocate(size).ok_or(GcError::HeapExhausted {
            requested: size * WORD_BYTES,
            strategy: StrategyKind::Copying.short_name(),
        })?;
        heap.copy_words(obj.header(HEADER_WORDS), dst, size);
        let moved = ObjRef::new(dst.add(HEADER_WORDS));
        set_forwarding(heap, moved, None);
        set_forwarding(heap, obj, Some(moved));
        *value = moved.into();
        Ok(())
    }
}

/// Semispace copying collector
pub struct CopyingCollector {
    from: BumpAllocator,
    to: Region,
}

impl CopyingCollector {
    /// Split the arena into two halves
    pub fn new(heap: &GcHeap) -> Self {
        let half = heap.len_words() / 2;
        Self {
            from: BumpAllocator::new(Region::new(Addr(0), half)),
            to: Region::new(Addr(half), half),
        }
    }

    /// Space objects are currently allocated in
    pub fn from_space(&self) -> Region {
        self.from.region()
    }

    fn evacuate(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        let started = Instant::now();
        let used_before = self.from.used();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "aquario::gc",
            strategy = "copy",
            used_words = used_before,
            "GC cycle starting"
        );

        let mut forwarder = Forwarder {
            from: self.from.region(),
            to: BumpAllocator::new(self.to),
        };
        trace_roots(&mut ctx.roots, &mut ctx.heap, |heap, v| {
            forwarder.forward(heap, v)
        })?;

        let mut scan = self.to.start;
        while scan < forwarder.to.top() {
            let obj = ObjRef::new(scan.add(HEADER_WORDS));
            let size = block_size(&ctx.heap, obj);
            trace_object(&mut ctx.heap, obj, |heap, v| forwarder.forward(heap, v))?;
            scan = scan.add(size);
        }

        let survivors = forwarder.to;
        self.to = self.from.region();
        self.from = survivors;

        ctx.stats.record_cycle(
            StrategyKind::Copying,
            CycleKind::Full,
            started,
            used_before.saturating_sub(self.from.used()),
            self.from.used(),
        );
        Ok(())
    }
}

impl Collector for CopyingCollector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Copying
    }

    fn header_words(&self) -> usize {
        HEADER_WORDS
    }

    fn allocate(&mut self, ctx: &mut GcContext, words: usize) -> GcResult<ObjRef> {
        let size = words + HEADER_WORDS;
        if size > self.to.len() {
            return Err(GcError::ObjectTooLarge {
                requested: size * WORD_BYTES,
                limit: self.to.len() * WORD_BYTES,
            });
        }
        if ctx.stress || !self.from.fits(size) {
            self.evacuate(ctx)?;
        }
        let block = self.from.allocate(size).ok_or(GcError::HeapExhausted {
            requested: size * WORD_BYTES,
            strategy: StrategyKind::Copying.short_name(),
        })?;

        let obj = ObjRef::new(block.add(HEADER_WORDS));
        ctx.heap.store(obj.header(SIZE), size as u64);
        set_forwarding(&mut ctx.heap, obj, None);
        ctx.heap.clear(obj.addr(), words);
        Ok(obj)
    }

    fn collect(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        self.evacuate(ctx)
    }

    fn for_each_object(&self, heap: &GcHeap, visit: &mut dyn FnMut(ObjRef, usize)) {
        let mut scan = self.from.region().start;
        while scan < self.from.top() {
            let obj = ObjRef::new(scan.add(HEADER_WORDS));
            let size = block_size(heap, obj);
            visit(obj, size);
            scan = scan.add(size);
        }
    }

    fn describe(&self, heap: &GcHeap, obj: ObjRef) -> ObjectInfo {
        ObjectInfo {
            size_words: block_size(heap, obj),
            ..ObjectInfo::default()
        }
    }
}
