//! Collector contract shared by every strategy

use crate::copying::CopyingCollector;
use crate::error::GcResult;
use crate::generational::GenerationalCollector;
use crate::heap::{Addr, GcConfig, GcHeap, WORD_BYTES};
use crate::mark_compact::MarkCompactCollector;
use crate::mark_sweep::MarkSweepCollector;
use crate::object::ObjRef;
use crate::ref_count::{CountMode, RefCountCollector};
use crate::roots::{RootSet, RootSlot};
use crate::value::Value;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Available collection strategies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum StrategyKind {
    /// Semispace copying
    Copying,
    /// Mark-sweep over a free list
    #[default]
    MarkSweep,
    /// Sliding mark-compact
    MarkCompact,
    /// Copying nursery with a mark-compact tenured space
    Generational,
    /// Eager reference counting
    RefCount,
    /// Deferred reference counting with a zero count table
    RefCountZct,
}

impl StrategyKind {
    /// Every strategy, in selection-name order
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::Copying,
        StrategyKind::MarkSweep,
        StrategyKind::MarkCompact,
        StrategyKind::Generational,
        StrategyKind::RefCount,
        StrategyKind::RefCountZct,
    ];

    /// Resolve a selection name; unknown names fall back to mark-sweep
    pub fn from_name(name: &str) -> Self {
        match name {
            "copy" | "copying" => StrategyKind::Copying,
            "mc" | "mark-compact" => StrategyKind::MarkCompact,
            "gen" | "generational" => StrategyKind::Generational,
            "ref" | "reference-count" => StrategyKind::RefCount,
            "zct" | "reference-count-zct" => StrategyKind::RefCountZct,
            _ => StrategyKind::MarkSweep,
        }
    }

    /// Short selection name
    pub fn short_name(self) -> &'static str {
        match self {
            StrategyKind::Copying => "copy",
            StrategyKind::MarkSweep => "ms",
            StrategyKind::MarkCompact => "mc",
            StrategyKind::Generational => "gen",
            StrategyKind::RefCount => "ref",
            StrategyKind::RefCountZct => "zct",
        }
    }

    /// Whether objects can change address during a collection
    pub fn is_moving(self) -> bool {
        matches!(
            self,
            StrategyKind::Copying | StrategyKind::MarkCompact | StrategyKind::Generational
        )
    }

    /// Build the collector and lay out its spaces in `heap`
    pub fn build(self, config: &GcConfig, heap: &mut GcHeap) -> Box<dyn Collector> {
        match self {
            StrategyKind::Copying => Box::new(CopyingCollector::new(heap)),
            StrategyKind::MarkSweep => Box::new(MarkSweepCollector::new(config, heap)),
            StrategyKind::MarkCompact => Box::new(MarkCompactCollector::new(config, heap)),
            StrategyKind::Generational => Box::new(GenerationalCollector::new(config, heap)),
            StrategyKind::RefCount => {
                Box::new(RefCountCollector::new(CountMode::Eager, config, heap))
            }
            StrategyKind::RefCountZct => {
                Box::new(RefCountCollector::new(CountMode::Deferred, config, heap))
            }
        }
    }
}

impl FromStr for StrategyKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StrategyKind::from_name(s))
    }
}

impl From<String> for StrategyKind {
    fn from(name: String) -> Self {
        StrategyKind::from_name(&name)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Kind of a collection cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Whole-heap collection
    Full,
    /// Nursery-only collection
    Minor,
    /// Tenured-space compaction
    Major,
    /// Zero count table scan
    ZctScan,
}

/// GC statistics
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Number of collections of any kind
    pub collections: u64,
    /// Nursery collections
    pub minor_collections: u64,
    /// Tenured compactions
    pub major_collections: u64,
    /// Successful allocation requests
    pub allocations: u64,
    /// Bytes handed out, headers included
    pub allocated_bytes: u64,
    /// Bytes reclaimed by the last collection
    pub last_reclaimed: usize,
    /// Bytes reclaimed since start
    pub total_reclaimed: u64,
    /// Bytes in use after the last collection
    pub live_bytes: usize,
    /// Pause of the last collection
    pub last_pause: Duration,
    /// Total time spent collecting
    pub total_pause: Duration,
}

impl GcStats {
    /// Account for a successful allocation of `words` words
    pub(crate) fn record_allocation(&mut self, words: usize) {
        self.allocations += 1;
        self.allocated_bytes += (words * WORD_BYTES) as u64;
    }

    /// Account for a finished cycle
    pub(crate) fn record_cycle(
        &mut self,
        strategy: StrategyKind,
        kind: CycleKind,
        started: Instant,
        reclaimed_words: usize,
        live_words: usize,
    ) {
        let pause = started.elapsed();
        self.collections += 1;
        match kind {
            CycleKind::Minor => self.minor_collections += 1,
            CycleKind::Major => self.major_collections += 1,
            CycleKind::Full | CycleKind::ZctScan => {}
        }
        self.last_reclaimed = reclaimed_words * WORD_BYTES;
        self.total_reclaimed += (reclaimed_words * WORD_BYTES) as u64;
        self.live_bytes = live_words * WORD_BYTES;
        self.last_pause = pause;
        self.total_pause += pause;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "aquario::gc",
            strategy = strategy.short_name(),
            kind = ?kind,
            collection = self.collections,
            reclaimed_bytes = self.last_reclaimed,
            live_bytes = self.live_bytes,
            pause_us = pause.as_micros() as u64,
            "GC cycle complete"
        );
        #[cfg(not(feature = "gc_logging"))]
        let _ = strategy;
    }
}

/// Per-object collector metadata, for inspection and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Block size in words, header included
    pub size_words: usize,
    /// Minor collections survived
    pub age: Option<u8>,
    /// Lives in tenured space
    pub tenured: Option<bool>,
    /// Listed in the remembered set
    pub remembered: Option<bool>,
    /// Counted references
    pub ref_count: Option<i64>,
    /// Queued in the zero count table
    pub in_zct: Option<bool>,
}

/// Mutable state every collector works on
pub struct GcContext {
    /// Object arena
    pub heap: GcHeap,
    /// Stack and global roots
    pub roots: RootSet,
    /// Collect on every allocation request
    pub stress: bool,
    /// Measurements
    pub stats: GcStats,
}

impl GcContext {
    /// Context with an arena of `config.heap_size` bytes and empty roots
    pub fn new(config: &GcConfig) -> Self {
        Self {
            heap: GcHeap::new(config.heap_size),
            roots: RootSet::new(config.stack_capacity, config.global_table_size),
            stress: config.stress,
            stats: GcStats::default(),
        }
    }
}

/// A collection strategy.
///
/// Barrier hooks default to plain stores; strategies override the ones they
/// need.
pub trait Collector {
    /// Which strategy this is
    fn kind(&self) -> StrategyKind;

    /// Header words in front of every object
    fn header_words(&self) -> usize;

    /// Allocate `words` zeroed payload words, collecting first if needed
    fn allocate(&mut self, ctx: &mut GcContext, words: usize) -> GcResult<ObjRef>;

    /// Run the strategy's regular collection
    fn collect(&mut self, ctx: &mut GcContext) -> GcResult<()>;

    /// Collect every space the strategy manages
    fn collect_full(&mut self, ctx: &mut GcContext) -> GcResult<()> {
        self.collect(ctx)
    }

    /// Store `value` into `field` of `owner`
    fn write_barrier(
        &mut self,
        ctx: &mut GcContext,
        owner: ObjRef,
        field: Addr,
        value: Value,
    ) -> GcResult<()> {
        let _ = owner;
        ctx.heap.store_value(field, value);
        Ok(())
    }

    /// Store `value` into a root slot
    fn write_barrier_root(
        &mut self,
        ctx: &mut GcContext,
        slot: RootSlot,
        value: Value,
    ) -> GcResult<()> {
        ctx.roots.set(slot, value);
        Ok(())
    }

    /// First store into a field of a freshly allocated object
    fn init_field(&mut self, ctx: &mut GcContext, field: Addr, value: Value) -> GcResult<()> {
        ctx.heap.store_value(field, value);
        Ok(())
    }

    /// Push onto the operand stack
    fn push(&mut self, ctx: &mut GcContext, value: Value) -> GcResult<()> {
        ctx.roots.push(value)
    }

    /// Pop from the operand stack
    fn pop(&mut self, ctx: &mut GcContext) -> GcResult<Value> {
        ctx.roots.pop()
    }

    /// Called after `obj` was filled with a copy of another object's payload
    fn copy_object(&mut self, ctx: &mut GcContext, obj: ObjRef) -> GcResult<()> {
        let _ = (ctx, obj);
        Ok(())
    }

    /// Visit every allocated object with its block size in words
    fn for_each_object(&self, heap: &GcHeap, visit: &mut dyn FnMut(ObjRef, usize));

    /// Collector metadata of `obj`
    fn describe(&self, heap: &GcHeap, obj: ObjRef) -> ObjectInfo;

    /// Release strategy-owned tables
    fn terminate(&mut self, ctx: &mut GcContext) {
        let _ = ctx;
    }
}

/// Store `value` into a field of `owner` through `collector`'s barrier
pub fn write_barrier(
    collector: &mut dyn Collector,
    ctx: &mut GcContext,
    owner: ObjRef,
    field: Addr,
    value: Value,
) -> GcResult<()> {
    collector.write_barrier(ctx, owner, field, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        for kind in StrategyKind::ALL {
            assert_eq!(StrategyKind::from_name(kind.short_name()), kind);
        }
        assert_eq!(StrategyKind::from_name("mark-compact"), StrategyKind::MarkCompact);
        assert_eq!(StrategyKind::from_name("bogus"), StrategyKind::MarkSweep);
        assert_eq!("gen".parse::<StrategyKind>(), Ok(StrategyKind::Generational));
    }

    #[test]
    fn test_stats_record_cycle() {
        let mut stats = GcStats::default();
        stats.record_allocation(4);
        stats.record_cycle(StrategyKind::Generational, CycleKind::Minor, Instant::now(), 10, 6);
        stats.record_cycle(StrategyKind::Generational, CycleKind::Major, Instant::now(), 2, 4);
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.allocated_bytes, 32);
        assert_eq!(stats.collections, 2);
        assert_eq!(stats.minor_collections, 1);
        assert_eq!(stats.major_collections, 1);
        assert_eq!(stats.last_reclaimed, 16);
        assert_eq!(stats.total_reclaimed, 96);
        assert_eq!(stats.live_bytes, 32);
    }
}
