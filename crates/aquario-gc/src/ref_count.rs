//! Reference counting collectors
//!
//! Two variants share one free-list heap:
//!
//! - **Eager**: every store into a heap field or root slot, and every
//!   operand stack push and pop, adjusts counts. An object whose count drops
//!   to zero is reclaimed on the spot and its children are decremented.
//! - **Deferred**: only heap fields are counted. Objects whose count is zero
//!   (new ones included) are queued in a zero count table. A scan
//!   temporarily counts the roots, reclaims every queued object that is
//!   still at zero, then uncounts the roots again. Survivors held only by
//!   roots leave the table and are queued again when a pop or root store
//!   drops them, so the table never fills up with live objects.
//!
//! Neither variant detects cycles: cyclic garbage is never reclaimed.
//!
//! Header layout (in front of the object word):
//!
//! | eager | deferred | content                              |
//! |-------|----------|--------------------------------------|
//! | -2    | -3       | block size in words, header included |
//! | -1    | -2       | signed reference count               |
//! |       | -1       | queued in the zero count table       |

use crate::collector::{Collector, CycleKind, GcContext, ObjectInfo, StrategyKind};
use crate::error::{GcError, GcResult};
use crate::free_list::FreeList;
use crate::heap::{Addr, GcConfig, GcHeap, Region, WORD_BYTES};
use crate::object::ObjRef;
use crate::roots::RootSlot;
use crate::trace::{pointer_fields, trace_roots};
use crate::value::Value;
use std::time::Instant;

/// When counts are maintained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// Heap, root and stack references are counted
    Eager,
    /// Only heap references are counted; zero counts are queued
    Deferred,
}

/// Fixed-capacity queue of objects whose count dropped to zero
#[derive(Debug)]
pub struct ZeroCountTable {
    entries: Vec<ObjRef>,
    capacity: usize,
}

impl ZeroCountTable {
    /// Empty table holding at most `capacity` objects
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Whether no more entries fit
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Number of queued objects
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, obj: ObjRef) -> GcResult<()> {
        if self.is_full() {
            return Err(GcError::ZeroCountTableFull {
                capacity: self.capacity,
            });
        }
        self.entries.push(obj);
        Ok(())
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Reference counting collector, eager or deferred
pub struct RefCountCollector {
    mode: CountMode,
    region: Region,
    free_list: FreeList,
    zct: ZeroCountTable,
    header_words: usize,
}

impl RefCountCollector {
    /// Hand the whole arena to the free list
    pub fn new(mode: CountMode, config: &GcConfig, heap: &mut GcHeap) -> Self {
        let region = heap.region();
        Self {
            mode,
            free_list: FreeList::with_region(heap, region, config.fit),
            zct: ZeroCountTable::new(config.zct_capacity),
            header_words: match mode {
                CountMode::Eager => 2,
                CountMode::Deferred => 3,
            },
            region,
        }
    }

    /// Counting variant
    pub fn mode(&self) -> CountMode {
        self.mode
    }

    /// Words currently on the free list
    pub fn free_words(&self) -> usize {
        self.free_list.free_words()
    }

    /// Objects queued in the zero count table
    pub fn zct_len(&self) -> usize {
        self.zct.len()
    }

    #[inline]
    fn count_addr(&self, obj: ObjRef) -> Addr {
        obj.header(self.header_words - 1)
    }

    #[inline]
    fn count(&self, heap: &GcHeap, obj: ObjRef) -> i64 {
        heap.load(self.count_addr(obj)) as i64
    }

    #[inline]
    fn set_count(&self, heap: &mut GcHeap, obj: ObjRef, count: i64) {
        heap.store(self.count_addr(obj), count as u64);
    }

    #[inline]
    fn in_zct(&self, heap: &GcHeap, obj: ObjRef) -> bool {
        self.mode == CountMode::Deferred && heap.load(obj.header(1)) != 0
    }

    #[inline]
    fn set_in_zct(&self, heap: &mut GcHeap, obj: ObjRef, queued: bool) {
        heap.store(obj.header(1), u64::from(queued));
    }

    #[inline]
    fn block_size(&self, heap: &GcHeap, obj: ObjRef) -> usize {
        heap.load(obj.header(self.header_words)) as usize
    }

    fn inc(&self, heap: &mut GcHeap, value: Value) {
        if let Some(obj) = value.as_ref() {
            let count = self.count(heap, obj);
            self.set_count(heap, obj, count + 1);
        }
    }

    fn dec(&mut self, ctx: &mut GcContext, value: Value) -> GcResult<()> {
        let Some(obj) = value.as_ref() else {
            return Ok(());
        };
        let count = self.count(&ctx.heap, obj) - 1;
        self.set_count(&mut ctx.heap, obj, count);
        if count == 0 {
            match self.mode {
                CountMode::Eager => {
                    self.release(&mut ctx.heap, obj)?;
                }
                CountMode::Deferred => self.enqueue(ctx, obj)?,
            }
        }
        Ok(())
    }

    /// Queue `obj`, scanning first when the table is full
    fn enqueue(&mut self, ctx: &mut GcContext, obj: ObjRef) -> GcResult<()> {
        if self.in_zct(&ctx.heap, obj) {
            return Ok(());
        }
        if self.zct.is_full() {
            self.scan(ctx)?;
        }
        self.zct.push(obj)?;
        self.set_in_zct(&mut ctx.heap, obj, true);
        Ok(())
    }

    /// Reclaim `obj` and every child whose count drops to zero with it.
    /// Returns the number of words given back.
    fn release(&mut self, heap: &mut GcHeap, obj: ObjRef) -> GcResult<usize> {
        let mut pending = vec![obj];
        let mut freed = 0;
        while let Some(obj) = pending.pop() {
            for field in pointer_fields(heap, obj)? {
                let Some(child) = heap.load_value(field).as_ref() else {
                    continue;
                };
                let count = self.count(heap, child) - 1;
                self.set_count(heap, child, count);
                if count != 0 {
                    continue;
                }
                match self.mode {
                    CountMode::Eager => pending.push(child),
                    // queued children are picked up by the running scan
                    CountMode::Deferred if self.in_zct(heap, child) => {}
                    CountMode::Deferred if self.zct.is_full() => pending.push(child),
                    CountMode::Deferred => {
                        self.zct.push(child)?;
                        self.set_in_zct(heap, child, true);
                    }
                }
            }
            let block = obj.header(self.header_words);
            let size = self.block_size(heap, obj);
            self.free_list.give(heap, block, size);
            freed += size;
        }
        Ok(freed)
    }

    /// Queue `obj` once the last root holding it is gone
    fn unrooted(&mut self, ctx: &mut GcContext, value: Value) -> GcResult<()> {
        match value.as_ref() {
            Some(obj) if self.count(&ctx.heap, obj) == 0 => self.enqueue(ctx, obj),
            _ => Ok(()),
        }
    }

    /// Reclaim every queued object that no root or heap field references
    fn scan(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        let started = Instant::now();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "aquario::gc",
            strategy = "zct",
            queued = self.zct.len(),
            "ZCT scan starting"
        );

        trace_roots(&mut ctx.roots, &mut ctx.heap, |heap, v| {
            self.inc(heap, *v);
            Ok(())
        })?;

        let mut freed = 0;
        loop {
            let mut progress = false;
            let mut i = 0;
            while i < self.zct.len() {
                let obj = self.zct.entries[i];
                if self.count(&ctx.heap, obj) <= 0 {
                    self.zct.entries.swap_remove(i);
                    freed += self.release(&mut ctx.heap, obj)?;
                    progress = true;
                } else {
                    i += 1;
                }
            }
            if !progress {
                break;
            }
        }

        trace_roots(&mut ctx.roots, &mut ctx.heap, |heap, v| {
            let Some(obj) = v.as_ref() else {
                return Ok(());
            };
            let count = self.count(heap, obj) - 1;
            self.set_count(heap, obj, count);
            Ok(())
        })?;

        // parked values are unparked without a barrier, so they stay queued
        let heap = &mut ctx.heap;
        let parked = ctx.roots.parked();
        let mut entries = std::mem::take(&mut self.zct.entries);
        entries.retain(|&obj| {
            let queued = self.count(heap, obj) == 0 && parked.contains(&obj.into());
            if !queued {
                self.set_in_zct(heap, obj, false);
            }
            queued
        });
        self.zct.entries = entries;

        let live = self.region.len() - self.free_list.free_words();
        ctx.stats
            .record_cycle(StrategyKind::RefCountZct, CycleKind::ZctScan, started, freed, live);
        Ok(())
    }

    fn exhausted(&self, words: usize) -> GcError {
        GcError::HeapExhausted {
            requested: words * WORD_BYTES,
            strategy: self.kind().short_name(),
        }
    }
}

impl Collector for RefCountCollector {
    fn kind(&self) -> StrategyKind {
        match self.mode {
            CountMode::Eager => StrategyKind::RefCount,
            CountMode::Deferred => StrategyKind::RefCountZct,
        }
    }

    fn header_words(&self) -> usize {
        self.header_words
    }

    fn allocate(&mut self, ctx: &mut GcContext, words: usize) -> GcResult<ObjRef> {
        let size = words + self.header_words;
        if size > self.region.len() {
            return Err(GcError::ObjectTooLarge {
                requested: size * WORD_BYTES,
                limit: self.region.len() * WORD_BYTES,
            });
        }

        let (block, actual) = match self.mode {
            CountMode::Eager => self
                .free_list
                .take(&mut ctx.heap, size)
                .ok_or_else(|| self.exhausted(size))?,
            CountMode::Deferred => {
                if ctx.stress || self.zct.is_full() {
                    self.scan(ctx)?;
                }
                match self.free_list.take(&mut ctx.heap, size) {
                    Some(found) => found,
                    None => {
                        self.scan(ctx)?;
                        self.free_list
                            .take(&mut ctx.heap, size)
                            .ok_or_else(|| self.exhausted(size))?
                    }
                }
            }
        };

        let obj = ObjRef::new(block.add(self.header_words));
        ctx.heap.store(block, actual as u64);
        ctx.heap.clear(block.add(1), actual - 1);
        if self.mode == CountMode::Deferred {
            if let Err(err) = self.zct.push(obj) {
                self.free_list.give(&mut ctx.heap, block, actual);
                return Err(err);
            }
            self.set_in_zct(&mut ctx.heap, obj, true);
        }
        Ok(obj)
    }

    fn collect(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        match self.mode {
            CountMode::Eager => Ok(()),
            CountMode::Deferred => self.scan(ctx),
        }
    }

    fn write_barrier(
        &mut self,
        ctx: &mut GcContext,
        _owner: ObjRef,
        field: Addr,
        value: Value,
    ) -> GcResult<()> {
        self.inc(&mut ctx.heap, value);
        let old = ctx.heap.load_value(field);
        ctx.heap.store_value(field, value);
        self.dec(ctx, old)
    }

    fn write_barrier_root(
        &mut self,
        ctx: &mut GcContext,
        slot: RootSlot,
        value: Value,
    ) -> GcResult<()> {
        if self.mode == CountMode::Deferred {
            let old = ctx.roots.get(slot);
            ctx.roots.set(slot, value);
            return self.unrooted(ctx, old);
        }
        self.inc(&mut ctx.heap, value);
        let old = ctx.roots.get(slot);
        ctx.roots.set(slot, value);
        self.dec(ctx, old)
    }

    fn init_field(&mut self, ctx: &mut GcContext, field: Addr, value: Value) -> GcResult<()> {
        self.inc(&mut ctx.heap, value);
        ctx.heap.store_value(field, value);
        Ok(())
    }

    fn push(&mut self, ctx: &mut GcContext, value: Value) -> GcResult<()> {
        ctx.roots.push(value)?;
        if self.mode == CountMode::Eager {
            self.inc(&mut ctx.heap, value);
        }
        Ok(())
    }

    fn pop(&mut self, ctx: &mut GcContext) -> GcResult<Value> {
        let value = ctx.roots.pop()?;
        match self.mode {
            CountMode::Eager => self.dec(ctx, value)?,
            CountMode::Deferred => self.unrooted(ctx, value)?,
        }
        Ok(value)
    }

    fn copy_object(&mut self, ctx: &mut GcContext, obj: ObjRef) -> GcResult<()> {
        for field in pointer_fields(&ctx.heap, obj)? {
            let child = ctx.heap.load_value(field);
            self.inc(&mut ctx.heap, child);
        }
        Ok(())
    }

    fn for_each_object(&self, heap: &GcHeap, visit: &mut dyn FnMut(ObjRef, usize)) {
        self.free_list
            .for_each_allocated(heap, self.region, |block, size| {
                visit(ObjRef::new(block.add(self.header_words)), size)
            });
    }

    fn describe(&self, heap: &GcHeap, obj: ObjRef) -> ObjectInfo {
        ObjectInfo {
            size_words: self.block_size(heap, obj),
            ref_count: Some(self.count(heap, obj)),
            in_zct: (self.mode == CountMode::Deferred).then(|| self.in_zct(heap, obj)),
            ..ObjectInfo::default()
        }
    }

    fn terminate(&mut self, _ctx: &mut GcContext) {
        self.zct.clear();
        self.free_list.reset();
    }
}
