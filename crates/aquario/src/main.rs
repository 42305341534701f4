//! Aquario GC driver.
//!
//! Selects a collector, runs a synthetic allocation workload against it and
//! prints the measurement report.

use anyhow::{Context, Result};
use aquario_gc::{GcRuntime, StrategyKind};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::filter::EnvFilter;

mod config;
mod report;
mod workloads;

use report::Report;
use workloads::Workload;

#[derive(Parser)]
#[command(
    name = "aquario",
    version,
    about = "Run allocation workloads against an Aquario garbage collector",
    long_about = "Runs a synthetic workload on the selected collector and prints GC measurements.\n\n\
                  Collectors: copy, ms (default), mc, gen, ref, zct\n\
                  Example:    aquario --gc gen --heap-size 65536 --workload tree"
)]
struct Cli {
    /// Collector to use; unknown names select mark-sweep
    #[arg(long, value_name = "NAME")]
    gc: Option<String>,

    /// Heap size in bytes
    #[arg(long, value_name = "BYTES")]
    heap_size: Option<usize>,

    /// Collect on every allocation
    #[arg(long)]
    stress: bool,

    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Workload to run
    #[arg(short, long, value_enum)]
    workload: Option<Workload>,

    /// Workload steps
    #[arg(short = 'n', long)]
    iterations: Option<usize>,

    /// Verbose output, including GC events
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "aquario=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(name) = &cli.gc {
        config.gc.strategy = StrategyKind::from_name(name);
    }
    if let Some(heap_size) = cli.heap_size {
        config.gc.heap_size = heap_size;
    }
    config.gc.stress |= cli.stress;
    let workload = cli.workload.unwrap_or(config.run.workload);
    let iterations = cli.iterations.unwrap_or(config.run.iterations);

    tracing::debug!(
        strategy = %config.gc.strategy,
        heap_size = config.gc.heap_size,
        stress = config.gc.stress,
        "starting"
    );

    let started = Instant::now();
    let strategy = config.gc.strategy;
    let mut rt = GcRuntime::with_config(config.gc);
    workloads::run(&mut rt, workload, iterations)
        .with_context(|| format!("{workload} workload failed under the {strategy} collector"))?;
    let report = Report::new(&rt, workload, started.elapsed());
    rt.terminate();

    println!("{report}");
    Ok(())
}
