//! Sliding mark-compact collector
//!
//! Allocation bumps through the whole arena. A collection marks from the
//! roots, assigns every live object its new address in heap order, rewrites
//! all references and slides the objects down, so survivors keep their
//! relative order and the free space ends up as one run at the top.
//!
//! Header layout (in front of the object word):
//!
//! | offset | content                              |
//! |--------|--------------------------------------|
//! | -3     | block size in words, header included |
//! | -2     | forwarding address, 0 when unset     |
//! | -1     | mark word                            |

use crate::allocator::BumpAllocator;
use crate::collector::{Collector, CycleKind, GcContext, ObjectInfo, StrategyKind};
use crate::error::{GcError, GcResult};
use crate::heap::{Addr, GcConfig, GcHeap, WORD_BYTES};
use crate::object::ObjRef;
use crate::trace::{MarkStack, trace_object, trace_roots};
use crate::value::Value;
use std::time::Instant;

const HEADER_WORDS: usize = 3;
const SIZE: usize = 3;
const FORWARD: usize = 2;
const MARK: usize = 1;

#[inline]
fn block_size(heap: &GcHeap, obj: ObjRef) -> usize {
    heap.load(obj.header(SIZE)) as usize
}

#[inline]
fn is_marked(heap: &GcHeap, obj: ObjRef) -> bool {
    heap.load(obj.header(MARK)) != 0
}

#[inline]
fn forwarding(heap: &GcHeap, obj: ObjRef) -> Option<ObjRef> {
    match heap.load(obj.header(FORWARD)) {
        0 => None,
        addr => Some(ObjRef::new(Addr(addr as usize))),
    }
}

fn mark_value(heap: &mut GcHeap, stack: &mut MarkStack, value: Value) -> GcResult<()> {
    if let Some(obj) = value.as_ref()
        && !is_marked(heap, obj)
    {
        heap.store(obj.header(MARK), 1);
        stack.push(obj)?;
    }
    Ok(())
}

fn update_reference(heap: &GcHeap, value: &mut Value) {
    if let Some(obj) = value.as_ref()
        && let Some(moved) = forwarding(heap, obj)
    {
        *value = moved.into();
    }
}

/// Sliding mark-compact collector
pub struct MarkCompactCollector {
    space: BumpAllocator,
    mark_stack: MarkStack,
}

impl MarkCompactCollector {
    /// Bump-allocate over the whole arena
    pub fn new(config: &GcConfig, heap: &GcHeap) -> Self {
        Self {
            space: BumpAllocator::new(heap.region()),
            mark_stack: MarkStack::new(config.mark_stack_capacity),
        }
    }

    fn objects(&self, heap: &GcHeap) -> Vec<ObjRef> {
        let mut objects = Vec::new();
        self.for_each_object(heap, &mut |obj, _| objects.push(obj));
        objects
    }

    fn mark(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        self.mark_stack.clear();
        let stack = &mut self.mark_stack;
        trace_roots(&mut ctx.roots, &mut ctx.heap, |heap, v| mark_value(heap, stack, *v))?;
        while let Some(obj) = self.mark_stack.pop() {
            let stack = &mut self.mark_stack;
            trace_object(&mut ctx.heap, obj, |heap, v| mark_value(heap, stack, *v))?;
        }
        Ok(())
    }

    /// Assign new addresses in heap order; returns the new top
    fn compute_addresses(&self, heap: &mut GcHeap, live: &[ObjRef]) -> Addr {
        let mut new_top = self.space.region().start;
        for &obj in live {
            heap.store(obj.header(FORWARD), new_top.add(HEADER_WORDS).0 as u64);
            new_top = new_top.add(block_size(heap, obj));
        }
        new_top
    }

    fn update_references(&self, ctx: &mut GcContext, live: &[ObjRef]) -> GcResult<()> {
        trace_roots(&mut ctx.roots, &mut ctx.heap, |heap, v| {
            update_reference(heap, v);
            Ok(())
        })?;
        for &obj in live {
            trace_object(&mut ctx.heap, obj, |heap, v| {
                update_reference(heap, v);
                Ok(())
            })?;
        }
        Ok(())
    }

    fn slide(heap: &mut GcHeap, live: &[ObjRef]) {
        for &obj in live {
            let Some(dest) = forwarding(heap, obj) else {
                continue;
            };
            let size = block_size(heap, obj);
            heap.copy_words(obj.header(HEADER_WORDS), dest.header(HEADER_WORDS), size);
            heap.store(dest.header(FORWARD), 0);
            heap.store(dest.header(MARK), 0);
        }
    }

    fn compact(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        let started = Instant::now();
        let used_before = self.space.used();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "aquario::gc",
            strategy = "mc",
            used_words = used_before,
            "GC cycle starting"
        );

        self.mark(ctx)?;
        let live: Vec<ObjRef> = self
            .objects(&ctx.heap)
            .into_iter()
            .filter(|&obj| is_marked(&ctx.heap, obj))
            .collect();
        let new_top = self.compute_addresses(&mut ctx.heap, &live);
        self.update_references(ctx, &live)?;
        Self::slide(&mut ctx.heap, &live);
        self.space.set_top(new_top);

        ctx.stats.record_cycle(
            StrategyKind::MarkCompact,
            CycleKind::Full,
            started,
            used_before.saturating_sub(self.space.used()),
            self.space.used(),
        );
        Ok(())
    }
}

impl Collector for MarkCompactCollector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MarkCompact
    }

    fn header_words(&self) -> usize {
        HEADER_WORDS
    }

    fn allocate(&mut self, ctx: &mut GcContext, words: usize) -> GcResult<ObjRef> {
        let size = words + HEADER_WORDS;
        let limit = self.space.region().len();
        if size > limit {
            return Err(GcError::ObjectTooLarge {
                requested: size * WORD_BYTES,
                limit: limit * WORD_BYTES,
            });
        }
        if ctx.stress || !self.space.fits(size) {
            self.compact(ctx)?;
        }
        let block = self.space.allocate(size).ok_or(GcError::HeapExhausted {
            requested: size * WORD_BYTES,
            strategy: StrategyKind::MarkCompact.short_name(),
        })?;

        let obj = ObjRef::new(block.add(HEADER_WORDS));
        ctx.heap.store(obj.header(SIZE), size as u64);
        ctx.heap.store(obj.header(FORWARD), 0);
        ctx.heap.store(obj.header(MARK), 0);
        ctx.heap.clear(obj.addr(), words);
        Ok(obj)
    }

    fn collect(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        self.compact(ctx)
    }

    fn for_each_object(&self, heap: &GcHeap, visit: &mut dyn FnMut(ObjRef, usize)) {
        let mut scan = self.space.region().start;
        while scan < self.space.top() {
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
