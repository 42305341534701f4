//! Generational collector
//!
//! The arena is split into two nursery semispaces and a tenured space:
//!
//! ```text
//! | nursery from | nursery to | tenured ................... |
//!   heap/5         heap/5       remainder
//! ```
//!
//! Objects are always allocated in the nursery. A minor collection copies
//! live nursery objects into the other semispace, bumping their age, and
//! promotes those that reach the tenuring threshold into tenured space.
//! Tenured objects that point into the nursery are kept in a remembered set
//! maintained by the write barrier. When tenured space can no longer absorb
//! a full nursery, a major collection compacts it in place.
//!
//! Header layout (in front of the object word):
//!
//! | offset | content                                  |
//! |--------|------------------------------------------|
//! | -3     | forwarding address, 0 when not moved     |
//! | -2     | block size in words, header included     |
//! | -1     | flags: age, remembered, tenured, marked  |

use crate::allocator::BumpAllocator;
use crate::barrier::RememberedSet;
use crate::collector::{Collector, CycleKind, GcContext, ObjectInfo, StrategyKind};
use crate::error::{GcError, GcResult};
use crate::heap::{Addr, GcConfig, GcHeap, Region, WORD_BYTES};
use crate::object::ObjRef;
use crate::trace::{MarkStack, trace_object, trace_object_any, trace_roots};
use crate::value::Value;
use std::time::Instant;

const HEADER_WORDS: usize = 3;
const FORWARD: usize = 3;
const SIZE: usize = 2;
const FLAGS: usize = 1;

const AGE_MASK: u64 = 0xFF;
const REMEMBERED: u64 = 1 << 8;
const TENURED: u64 = 1 << 9;
const MARKED: u64 = 1 << 10;

#[inline]
fn block_size(heap: &GcHeap, obj: ObjRef) -> usize {
    heap.load(obj.header(SIZE)) as usize
}

#[inline]
fn flags(heap: &GcHeap, obj: ObjRef) -> u64 {
    heap.load(obj.header(FLAGS))
}

#[inline]
fn set_flag(heap: &mut GcHeap, obj: ObjRef, flag: u64, on: bool) {
    let old = flags(heap, obj);
    let new = if on { old | flag } else { old & !flag };
    heap.store(obj.header(FLAGS), new);
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

/// Whether any field of `obj` points into `young`
///
/// Decided by address: during a collection the header at a child's
/// forwarded address may not have been written yet.
fn points_into(heap: &GcHeap, obj: ObjRef, young: Region) -> GcResult<bool> {
    trace_object_any(heap, obj, |child| young.contains(child.addr()))
}

fn walk(heap: &GcHeap, region: Region, top: Addr, visit: &mut dyn FnMut(ObjRef, usize)) {
    let mut scan = region.start;
    while scan < top {
        let obj = ObjRef::new(scan.add(HEADER_WORDS));
        let size = block_size(heap, obj);
        visit(obj, size);
        scan = scan.add(size);
    }
}

fn mark_value(heap: &mut GcHeap, stack: &mut MarkStack, value: Value) -> GcResult<()> {
    if let Some(obj) = value.as_ref()
        && flags(heap, obj) & MARKED == 0
    {
        set_flag(heap, obj, MARKED, true);
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

fn exhausted(words: usize) -> GcError {
    GcError::HeapExhausted {
        requested: words * WORD_BYTES,
        strategy: StrategyKind::Generational.short_name(),
    }
}

/// Copies nursery survivors during a minor collection
struct Evacuator {
    survivors: BumpAllocator,
    tenured: BumpAllocator,
    threshold: u8,
    promoted: usize,
}

impl Evacuator {
    fn forward(&mut self, heap: &mut GcHeap, value: &mut Value) -> GcResult<()> {
        let Some(obj) = value.as_ref() else {
            return Ok(());
        };
        let old_flags = flags(heap, obj);
        if old_flags & TENURED != 0 {
            return Ok(());
        }
        if let Some(moved) = forwarding(heap, obj) {
            *value = moved.into();
            return Ok(());
        }

        let size = block_size(heap, obj);
        let age = ((old_flags & AGE_MASK) + 1).min(AGE_MASK);
        let mut new_flags = (old_flags & !AGE_MASK) | age;
        let target = if age >= u64::from(self.threshold) {
            new_flags |= TENURED;
            self.promoted += size;
            &mut self.tenured
        } else {
            &mut self.survivors
        };
        let dst = target.allocate(size).ok_or_else(|| exhausted(size))?;

        heap.copy_words(obj.header(HEADER_WORDS), dst, size);
        let moved = ObjRef::new(dst.add(HEADER_WORDS));
        set_forwarding(heap, moved, None);
        heap.store(moved.header(FLAGS), new_flags);
        set_forwarding(heap, obj, Some(moved));
        *value = moved.into();

        #[cfg(feature = "gc_logging")]
        if new_flags & TENURED != 0 {
            tracing::trace!(target: "aquario::gc", from = %obj.addr(), to = %moved.addr(), "promoted");
        }
        Ok(())
    }
}

/// Generational collector
pub struct GenerationalCollector {
    nursery: BumpAllocator,
    survivor_space: Region,
    tenured: BumpAllocator,
    remembered: RememberedSet,
    mark_stack: MarkStack,
    threshold: u8,
}

impl GenerationalCollector {
    /// Carve the nursery semispaces and tenured space out of the arena
    pub fn new(config: &GcConfig, heap: &GcHeap) -> Self {
        let total = heap.len_words();
        let nursery = total / config.nursery_fraction.max(3);
        Self {
            nursery: BumpAllocator::new(Region::new(Addr(0), nursery)),
            survivor_space: Region::new(Addr(nursery), nursery),
            tenured: BumpAllocator::new(Region::new(Addr(2 * nursery), total - 2 * nursery)),
            remembered: RememberedSet::new(config.remembered_set_capacity),
            mark_stack: MarkStack::new(config.mark_stack_capacity),
            threshold: config.tenuring_threshold,
        }
    }

    /// Nursery semispace currently allocated into
    pub fn nursery(&self) -> Region {
        self.nursery.region()
    }

    /// Tenured space
    pub fn tenured(&self) -> Region {
        self.tenured.region()
    }

    /// Number of remembered tenured objects
    pub fn remembered_len(&self) -> usize {
        self.remembered.len()
    }

    fn remember(&mut self, heap: &mut GcHeap, obj: ObjRef, young: Region) -> GcResult<()> {
        if self.remembered.is_full() {
            self.clean_remembered(heap, young)?;
        }
        self.remembered.add(obj)?;
        set_flag(heap, obj, REMEMBERED, true);
        Ok(())
    }

    /// Drop entries that no longer point into `young`
    fn clean_remembered(&mut self, heap: &mut GcHeap, young: Region) -> GcResult<()> {
        let _before = self.remembered.len();
        let mut failed = None;
        self.remembered.retain(|&obj| match points_into(heap, obj, young) {
            Ok(true) => true,
            Ok(false) => {
                set_flag(heap, obj, REMEMBERED, false);
                false
            }
            Err(err) => {
                failed.get_or_insert(err);
                true
            }
        });
        if let Some(err) = failed {
            return Err(err);
        }

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "aquario::gc",
            before = _before,
            after = self.remembered.len(),
            "remembered set cleaned"
        );
        Ok(())
    }

    /// Evacuate the nursery
    pub fn collect_minor(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        self.evacuate(ctx, self.threshold)
    }

    /// Evacuate the nursery, promoting survivors of age `threshold` or more
    fn evacuate(&mut self, ctx: &mut GcContext, threshold: u8) -> GcResult<()> {
        let started = Instant::now();
        let nursery_used = self.nursery.used();
        let old_top = self.tenured.top();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "aquario::gc",
            strategy = "gen",
            nursery_words = nursery_used,
            remembered = self.remembered.len(),
            "minor GC starting"
        );

        let mut ev = Evacuator {
            survivors: BumpAllocator::new(self.survivor_space),
            tenured: self.tenured,
            threshold,
            promoted: 0,
        };
        trace_roots(&mut ctx.roots, &mut ctx.heap, |heap, v| ev.forward(heap, v))?;
        for obj in self.remembered.roots() {
            trace_object(&mut ctx.heap, obj, |heap, v| ev.forward(heap, v))?;
        }

        let young = self.survivor_space;
        let mut scan_young = young.start;
        let mut scan_old = old_top;
        while scan_young < ev.survivors.top() || scan_old < ev.tenured.top() {
            while scan_young < ev.survivors.top() {
                let obj = ObjRef::new(scan_young.add(HEADER_WORDS));
                trace_object(&mut ctx.heap, obj, |heap, v| ev.forward(heap, v))?;
                scan_young = scan_young.add(block_size(&ctx.heap, obj));
            }
            while scan_old < ev.tenured.top() {
                let obj = ObjRef::new(scan_old.add(HEADER_WORDS));
                trace_object(&mut ctx.heap, obj, |heap, v| ev.forward(heap, v))?;
                if flags(&ctx.heap, obj) & REMEMBERED == 0 && points_into(&ctx.heap, obj, young)? {
                    self.remember(&mut ctx.heap, obj, young)?;
                }
                scan_old = scan_old.add(block_size(&ctx.heap, obj));
            }
        }

        self.survivor_space = self.nursery.region();
        self.nursery = ev.survivors;
        self.tenured = ev.tenured;

        let kept = self.nursery.used() + ev.promoted;
        ctx.stats.record_cycle(
            StrategyKind::Generational,
            CycleKind::Minor,
            started,
            nursery_used.saturating_sub(kept),
            self.nursery.used() + self.tenured.used(),
        );
        Ok(())
    }

    /// Mark the whole heap and compact tenured space
    pub fn collect_major(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        let started = Instant::now();
        let used_before = self.tenured.used();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "aquario::gc",
            strategy = "gen",
            tenured_words = used_before,
            "major GC starting"
        );

        self.mark_stack.clear();
        let stack = &mut self.mark_stack;
        trace_roots(&mut ctx.roots, &mut ctx.heap, |heap, v| mark_value(heap, stack, *v))?;
        while let Some(obj) = self.mark_stack.pop() {
            let stack = &mut self.mark_stack;
            trace_object(&mut ctx.heap, obj, |heap, v| mark_value(heap, stack, *v))?;
        }

        let mut live_old = Vec::new();
        walk(&ctx.heap, self.tenured.region(), self.tenured.top(), &mut |obj, _| {
            live_old.push(obj)
        });
        live_old.retain(|&obj| flags(&ctx.heap, obj) & MARKED != 0);
        let mut live_young = Vec::new();
        walk(&ctx.heap, self.nursery.region(), self.nursery.top(), &mut |obj, _| {
            live_young.push(obj)
        });
        live_young.retain(|&obj| flags(&ctx.heap, obj) & MARKED != 0);

        // remembered flags; the nursery does not move, so this holds after the slide
        let nursery = self.nursery.region();
        let mut remembered = 0;
        for &obj in &live_old {
            let young = points_into(&ctx.heap, obj, nursery)?;
            set_flag(&mut ctx.heap, obj, REMEMBERED, young);
            remembered += usize::from(young);
        }
        if remembered > self.remembered.capacity() {
            return Err(GcError::RememberedSetFull {
                capacity: self.remembered.capacity(),
            });
        }

        // new addresses
        let mut new_top = self.tenured.region().start;
        for &obj in &live_old {
            set_forwarding(&mut ctx.heap, obj, Some(ObjRef::new(new_top.add(HEADER_WORDS))));
            new_top = new_top.add(block_size(&ctx.heap, obj));
        }

        // references
        self.remembered.clear();
        trace_roots(&mut ctx.roots, &mut ctx.heap, |heap, v| {
            update_reference(heap, v);
            Ok(())
        })?;
        for &obj in &live_old {
            trace_object(&mut ctx.heap, obj, |heap, v| {
                update_reference(heap, v);
                Ok(())
            })?;
        }
        for &obj in &live_young {
            trace_object(&mut ctx.heap, obj, |heap, v| {
                update_reference(heap, v);
                Ok(())
            })?;
            set_flag(&mut ctx.heap, obj, MARKED, false);
        }

        // slide
        for &obj in &live_old {
            let Some(dest) = forwarding(&ctx.heap, obj) else {
                continue;
            };
            let size = block_size(&ctx.heap, obj);
            ctx.heap
                .copy_words(obj.header(HEADER_WORDS), dest.header(HEADER_WORDS), size);
            set_forwarding(&mut ctx.heap, dest, None);
            set_flag(&mut ctx.heap, dest, MARKED, false);
            if flags(&ctx.heap, dest) & REMEMBERED != 0 {
                self.remembered.add(dest)?;
            }
        }
        self.tenured.set_top(new_top);

        ctx.stats.record_cycle(
            StrategyKind::Generational,
            CycleKind::Major,
            started,
            used_before.saturating_sub(self.tenured.used()),
            self.nursery.used() + self.tenured.used(),
        );
        Ok(())
    }
}

impl Collector for GenerationalCollector {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Generational
    }

    fn header_words(&self) -> usize {
        HEADER_WORDS
    }

    fn allocate(&mut self, ctx: &mut GcContext, words: usize) -> GcResult<ObjRef> {
        let size = words + HEADER_WORDS;
        let limit = self.nursery.region().len();
        if size > limit {
            return Err(GcError::ObjectTooLarge {
                requested: size * WORD_BYTES,
                limit: limit * WORD_BYTES,
            });
        }
        if ctx.stress || !self.nursery.fits(size) {
            self.collect(ctx)?;
        }
        if !self.nursery.fits(size) {
            // survivors alone fill the nursery
            self.evacuate(ctx, 0)?;
        }
        let block = self.nursery.allocate(size).ok_or_else(|| exhausted(size))?;

        let obj = ObjRef::new(block.add(HEADER_WORDS));
        set_forwarding(&mut ctx.heap, obj, None);
        ctx.heap.store(obj.header(SIZE), size as u64);
        ctx.heap.store(obj.header(FLAGS), 0);
        ctx.heap.clear(obj.addr(), words);
        Ok(obj)
    }

    fn collect(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        self.collect_minor(ctx)?;
        if !self.tenured.fits(self.nursery.region().len()) {
            self.collect_major(ctx)?;
        }
        Ok(())
    }

    fn collect_full(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        self.collect_minor(ctx)?;
        self.collect_major(ctx)
    }

    fn write_barrier(
        &mut self,
        ctx: &mut GcContext,
        owner: ObjRef,
        field: Addr,
        value: Value,
    ) -> GcResult<()> {
        ctx.heap.store_value(field, value);
        let owner_flags = flags(&ctx.heap, owner);
        if owner_flags & TENURED != 0
            && owner_flags & REMEMBERED == 0
            && value.as_ref().is_some_and(|v| self.nursery.region().contains(v.addr()))
        {
            let young = self.nursery.region();
            self.remember(&mut ctx.heap, owner, young)?;
        }
        Ok(())
    }

    fn for_each_object(&self, heap: &GcHeap, visit: &mut dyn FnMut(ObjRef, usize)) {
        walk(heap, self.nursery.region(), self.nursery.top(), visit);
        walk(heap, self.tenured.region(), self.tenured.top(), visit);
    }

    fn describe(&self, heap: &GcHeap, obj: ObjRef) -> ObjectInfo {
        let f = flags(heap, obj);
        ObjectInfo {
            size_words: block_size(heap, obj),
            age: Some((f & AGE_MASK) as u8),
            tenured: Some(f & TENURED != 0),
            remembered: Some(f & REMEMBERED != 0),
            ..ObjectInfo::default()
        }
    }

    fn terminate(&mut self, _ctx: &mut GcContext) {
        self.remembered.clear();
        self.mark_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{CAR, CDR, ObjectTag, object_word};
    use crate::roots::RootSlot;

    fn is_tenured(heap: &GcHeap, obj: ObjRef) -> bool {
        flags(heap, obj) & TENURED != 0
    }

    fn setup(config: GcConfig) -> (GenerationalCollector, GcContext) {
        let ctx = GcContext::new(&config);
        (GenerationalCollector::new(&config, &ctx.heap), ctx)
    }

    fn small() -> GcConfig {
        GcConfig {
            tenuring_threshold: 2,
            ..GcConfig::new(StrategyKind::Generational, 500 * WORD_BYTES)
        }
    }

    fn pair(
        gc: &mut GenerationalCollector,
        ctx: &mut GcContext,
        car: Value,
        cdr: Value,
    ) -> ObjRef {
        let obj = gc.allocate(ctx, 3).unwrap();
        ctx.heap.store(obj.addr(), object_word(ObjectTag::Pair, 0));
        ctx.heap.store_value(obj.field(CAR), car);
        ctx.heap.store_value(obj.field(CDR), cdr);
        obj
    }

    fn top(ctx: &GcContext) -> ObjRef {
        ctx.roots.peek(0).and_then(Value::as_ref).unwrap()
    }

    #[test]
    fn test_layout() {
        let (gc, _ctx) = setup(small());
        assert_eq!(gc.nursery(), Region::new(Addr(0), 100));
        assert_eq!(gc.survivor_space, Region::new(Addr(100), 100));
        assert_eq!(gc.tenured(), Region::new(Addr(200), 300));
    }

    #[test]
    fn test_promotion_at_threshold() {
        let (mut gc, mut ctx) = setup(small());
        let obj = pair(&mut gc, &mut ctx, Value::int(7), Value::NIL);
        ctx.roots.push(obj.into()).unwrap();

        gc.collect(&mut ctx).unwrap();
        let info = gc.describe(&ctx.heap, top(&ctx));
        assert_eq!(info.age, Some(1));
        assert_eq!(info.tenured, Some(false));
        assert!(gc.nursery().contains(top(&ctx).addr()));

        gc.collect(&mut ctx).unwrap();
        let info = gc.describe(&ctx.heap, top(&ctx));
        assert_eq!(info.age, Some(2));
        assert_eq!(info.tenured, Some(true));
        assert!(gc.tenured().contains(top(&ctx).addr()));
        assert_eq!(ctx.heap.load_value(top(&ctx).field(CAR)), Value::int(7));
    }

    #[test]
    fn test_barrier_remembers_tenured_owner() {
        let (mut gc, mut ctx) = setup(small());
        let old = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        ctx.roots.push(old.into()).unwrap();
        gc.collect(&mut ctx).unwrap();
        gc.collect(&mut ctx).unwrap();
        let old = top(&ctx);
        assert!(is_tenured(&ctx.heap, old));

        let young = pair(&mut gc, &mut ctx, Value::int(42), Value::NIL);
        gc.write_barrier(&mut ctx, old, old.field(CAR), young.into())
            .unwrap();
        assert_eq!(gc.remembered_len(), 1);
        assert_eq!(gc.describe(&ctx.heap, old).remembered, Some(true));

        gc.collect_minor(&mut ctx).unwrap();
        let young = ctx.heap.load_value(old.field(CAR)).as_ref().unwrap();
        assert!(gc.nursery().contains(young.addr()));
        assert_eq!(ctx.heap.load_value(young.field(CAR)), Value::int(42));
    }

    #[test]
    fn test_promoted_parent_of_young_child_is_remembered() {
        let (mut gc, mut ctx) = setup(small());
        let parent = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        ctx.roots.push(parent.into()).unwrap();
        gc.collect(&mut ctx).unwrap();

        // parent is one collection away from promotion; child is brand new
        let parent = top(&ctx);
        let child = pair(&mut gc, &mut ctx, Value::int(1), Value::NIL);
        gc.write_barrier(&mut ctx, parent, parent.field(CDR), child.into())
            .unwrap();
        gc.collect(&mut ctx).unwrap();

        let parent = top(&ctx);
        assert!(is_tenured(&ctx.heap, parent));
        assert_eq!(gc.describe(&ctx.heap, parent).remembered, Some(true));
        let child = ctx.heap.load_value(parent.field(CDR)).as_ref().unwrap();
        assert!(!is_tenured(&ctx.heap, child));
    }

    #[test]
    fn test_major_compacts_tenured() {
        let (mut gc, mut ctx) = setup(small());
        let keep = pair(&mut gc, &mut ctx, Value::int(1), Value::NIL);
        let gone = pair(&mut gc, &mut ctx, Value::int(2), Value::NIL);
        ctx.roots.push(keep.into()).unwrap();
        ctx.roots.push(gone.into()).unwrap();
        gc.collect(&mut ctx).unwrap();
        gc.collect(&mut ctx).unwrap();
        assert_eq!(gc.tenured.used(), 12);

        ctx.roots.pop().unwrap();
        gc.collect_full(&mut ctx).unwrap();
        assert_eq!(gc.tenured.used(), 6);
        let keep = top(&ctx);
        assert_eq!(keep.addr(), Addr(200 + HEADER_WORDS));
        assert_eq!(ctx.heap.load_value(keep.field(CAR)), Value::int(1));
        assert_eq!(ctx.stats.major_collections, 1);
    }

    #[test]
    fn test_major_leaves_tenured_list_unremembered() {
        let config = GcConfig {
            tenuring_threshold: 1,
            remembered_set_capacity: 4,
            ..GcConfig::new(StrategyKind::Generational, 2000 * WORD_BYTES)
        };
        let (mut gc, mut ctx) = setup(config);
        let garbage = gc.allocate(&mut ctx, 1).unwrap();
        ctx.heap
            .store(garbage.addr(), object_word(ObjectTag::Char, u64::from('x')));
        ctx.roots.push(garbage.into()).unwrap();
        gc.collect_minor(&mut ctx).unwrap();

        let mut list = Value::NIL;
        for i in 0..30 {
            list = pair(&mut gc, &mut ctx, Value::int(i), list).into();
        }
        ctx.roots.push(list).unwrap();
        gc.collect_minor(&mut ctx).unwrap();
        assert_eq!(gc.tenured.used(), 4 + 30 * 6);

        ctx.roots.set(RootSlot::Stack(0), Value::NIL);
        gc.collect_major(&mut ctx).unwrap();
        assert_eq!(gc.tenured.used(), 30 * 6);
        assert_eq!(gc.remembered_len(), 0);

        let mut cell = ctx.roots.peek(0).unwrap();
        for i in (0..30).rev() {
            let obj = cell.as_ref().unwrap();
            let info = gc.describe(&ctx.heap, obj);
            assert_eq!(info.tenured, Some(true));
            assert_eq!(info.remembered, Some(false), "cell {i}");
            assert_eq!(ctx.heap.load_value(obj.field(CAR)), Value::int(i));
            cell = ctx.heap.load_value(obj.field(CDR));
        }
        assert_eq!(cell, Value::NIL);
    }

    #[test]
    fn test_young_child_of_moved_owner_survives() {
        let (mut gc, mut ctx) = setup(small());
        let garbage = gc.allocate(&mut ctx, 1).unwrap();
        ctx.heap
            .store(garbage.addr(), object_word(ObjectTag::Char, u64::from('x')));
        ctx.roots.push(garbage.into()).unwrap();
        gc.collect_minor(&mut ctx).unwrap();
        gc.collect_minor(&mut ctx).unwrap();

        let owner = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        ctx.roots.push(owner.into()).unwrap();
        gc.collect_minor(&mut ctx).unwrap();
        gc.collect_minor(&mut ctx).unwrap();
        let owner = top(&ctx);
        assert!(is_tenured(&ctx.heap, owner));

        let child = pair(&mut gc, &mut ctx, Value::int(42), Value::NIL);
        gc.write_barrier(&mut ctx, owner, owner.field(CAR), child.into())
            .unwrap();
        ctx.roots.set(RootSlot::Stack(0), Value::NIL);

        gc.collect_major(&mut ctx).unwrap();
        let owner = top(&ctx);
        assert_eq!(owner.addr(), Addr(200 + HEADER_WORDS));
        assert_eq!(gc.describe(&ctx.heap, owner).remembered, Some(true));
        assert_eq!(gc.remembered_len(), 1);

        gc.collect_minor(&mut ctx).unwrap();
        let child = ctx.heap.load_value(owner.field(CAR)).as_ref().unwrap();
        assert!(gc.nursery().contains(child.addr()));
        assert_eq!(ctx.heap.load_value(child.field(CAR)), Value::int(42));
    }

    #[test]
    fn test_major_fails_before_sliding_when_remembered_set_overflows() {
        let config = GcConfig {
            remembered_set_capacity: 1,
            ..small()
        };
        let (mut gc, mut ctx) = setup(config);
        let garbage = gc.allocate(&mut ctx, 1).unwrap();
        ctx.heap
            .store(garbage.addr(), object_word(ObjectTag::Char, u64::from('x')));
        ctx.roots.push(garbage.into()).unwrap();
        gc.collect_minor(&mut ctx).unwrap();
        gc.collect_minor(&mut ctx).unwrap();
        for _ in 0..2 {
            let obj = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
            ctx.roots.push(obj.into()).unwrap();
        }
        gc.collect_minor(&mut ctx).unwrap();
        gc.collect_minor(&mut ctx).unwrap();

        // both owners point young, one without going through the barrier
        let a = top(&ctx);
        let b = ctx.roots.peek(1).and_then(Value::as_ref).unwrap();
        let y1 = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        gc.write_barrier(&mut ctx, a, a.field(CAR), y1.into()).unwrap();
        let y2 = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        ctx.heap.store_value(b.field(CAR), y2.into());
        ctx.roots.set(RootSlot::Stack(0), Value::NIL);

        let used = gc.tenured.used();
        assert_eq!(
            gc.collect_major(&mut ctx),
            Err(GcError::RememberedSetFull { capacity: 1 })
        );
        assert_eq!(gc.tenured.used(), used);
        assert_eq!(ctx.heap.load_value(a.field(CAR)), y1.into());
        assert_eq!(ctx.heap.load_value(b.field(CAR)), y2.into());
    }

    #[test]
    fn test_remembered_set_overflow_after_cleaning() {
        let config = GcConfig {
            remembered_set_capacity: 1,
            ..small()
        };
        let (mut gc, mut ctx) = setup(config);
        for _ in 0..2 {
            let obj = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
            ctx.roots.push(obj.into()).unwrap();
        }
        gc.collect(&mut ctx).unwrap();
        gc.collect(&mut ctx).unwrap();
        let a = ctx.roots.peek(0).and_then(Value::as_ref).unwrap();
        let b = ctx.roots.peek(1).and_then(Value::as_ref).unwrap();

        let y1 = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        gc.write_barrier(&mut ctx, a, a.field(CAR), y1.into()).unwrap();
        let y2 = pair(&mut gc, &mut ctx, Value::NIL, Value::NIL);
        assert_eq!(
            gc.write_barrier(&mut ctx, b, b.field(CAR), y2.into()),
            Err(GcError::RememberedSetFull { capacity: 1 })
        );
    }
}
