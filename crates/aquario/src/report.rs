//! End-of-run measurement report

use crate::workloads::Workload;
use aquario_gc::{GcRuntime, GcStats, StrategyKind};
use std::fmt;
use std::time::Duration;

/// What a run cost, printed when the driver exits
#[derive(Debug)]
pub struct Report {
    pub strategy: StrategyKind,
    pub workload: Workload,
    pub stats: GcStats,
    pub live_objects: usize,
    pub live_bytes: usize,
    pub total_time: Duration,
}

impl Report {
    /// Snapshot the runtime after a workload finished
    pub fn new(rt: &GcRuntime, workload: Workload, total_time: Duration) -> Self {
        let live = rt.live_objects();
        Self {
            strategy: rt.kind(),
            workload,
            stats: rt.stats().clone(),
            live_objects: live.len(),
            live_bytes: live.iter().map(|&(_, size)| size * aquario_gc::WORD_BYTES).sum(),
            total_time,
        }
    }

    /// Share of the run spent collecting, in percent
    pub fn gc_share(&self) -> f64 {
        if self.total_time.is_zero() {
            return 0.0;
        }
        self.stats.total_pause.as_secs_f64() / self.total_time.as_secs_f64() * 100.0
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.stats;
        writeln!(f, "strategy:      {}", self.strategy)?;
        writeln!(f, "workload:      {}", self.workload)?;
        writeln!(
            f,
            "allocations:   {} ({} bytes)",
            stats.allocations, stats.allocated_bytes
        )?;
        writeln!(
            f,
            "GC count:      {} (minor {}, major {})",
            stats.collections, stats.minor_collections, stats.major_collections
        )?;
        writeln!(f, "reclaimed:     {} bytes", stats.total_reclaimed)?;
        writeln!(
            f,
            "live:          {} objects, {} bytes",
            self.live_objects, self.live_bytes
        )?;
        writeln!(
            f,
            "GC time:       {:.3} ms ({:.1}%)",
            stats.total_pause.as_secs_f64() * 1000.0,
            self.gc_share()
        )?;
        write!(
            f,
            "total time:    {:.3} ms",
            self.total_time.as_secs_f64() * 1000.0
        )
    }
}
