//! Synthetic allocation workloads
//!
//! Each workload drives the runtime through the same calls the interpreter
//! makes and checks the heap contents afterwards, so a collector bug shows
//! up as a failed run rather than a wrong report.

use anyhow::{Context, Result, ensure};
use aquario_gc::{GcResult, GcRuntime, RootSlot, Value};
use serde::Deserialize;
use std::fmt;

/// Depth of the tree kept alive for the whole `tree` run
const LONG_LIVED_DEPTH: u32 = 5;
/// Depth of the short-lived trees built per iteration
const TEMP_DEPTH: u32 = 4;
/// Distinct names the `globals` workload cycles through
const GLOBAL_NAMES: usize = 32;

/// Workload to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Workload {
    /// Grow one long list
    List,
    /// Short-lived pairs and strings
    #[default]
    Churn,
    /// Binary trees, one long-lived and many temporary
    Tree,
    /// Global definitions and rebinding
    Globals,
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Workload::List => "list",
            Workload::Churn => "churn",
            Workload::Tree => "tree",
            Workload::Globals => "globals",
        })
    }
}

/// Run `workload` for `iterations` steps
pub fn run(rt: &mut GcRuntime, workload: Workload, iterations: usize) -> Result<()> {
    tracing::info!(%workload, iterations, strategy = %rt.kind(), "running workload");
    match workload {
        Workload::List => list(rt, iterations),
        Workload::Churn => churn(rt, iterations),
        Workload::Tree => tree(rt, iterations),
        Workload::Globals => globals(rt, iterations),
    }
}

fn list(rt: &mut GcRuntime, iterations: usize) -> Result<()> {
    rt.push(Value::NIL)?;
    let slot = RootSlot::Stack(rt.stack_depth() - 1);
    for i in 0..iterations {
        let tail = rt.peek(0).context("list root vanished")?;
        let list = rt.cons(Value::int(i as i64), tail)?;
        rt.write_barrier_root(slot, list)?;
    }

    let list = rt.peek(0).context("list root vanished")?;
    let items = rt.list_to_vec(list).context("list is not proper")?;
    ensure!(
        items.len() == iterations,
        "list holds {} items, expected {iterations}",
        items.len()
    );
    for (expected, item) in (0..iterations).rev().zip(items) {
        ensure!(
            item == Value::int(expected as i64),
            "list item {expected} is {item:?}"
        );
    }
    rt.pop()?;
    Ok(())
}

fn churn(rt: &mut GcRuntime, iterations: usize) -> Result<()> {
    for i in 0..iterations {
        let text = rt.make_string("churn")?;
        rt.push(text)?;
        let text = rt.peek(0).context("churn root vanished")?;
        let pair = rt.cons(text, Value::int(i as i64))?;
        rt.push(pair)?;
        let pair = rt.peek(0).context("churn root vanished")?;
        ensure!(
            rt.cdr(pair) == Some(Value::int(i as i64)),
            "pair {i} was overwritten"
        );
        rt.pop()?;
        rt.pop()?;
    }
    ensure!(rt.stack_depth() == 0, "stack left unbalanced");
    Ok(())
}

/// Build a complete binary tree of pairs with `(0 . ())` leaves
fn make_tree(rt: &mut GcRuntime, depth: u32) -> GcResult<Value> {
    if depth == 0 {
        return rt.cons(Value::int(0), Value::NIL);
    }
    let left = make_tree(rt, depth - 1)?;
    rt.push(left)?;
    let right = make_tree(rt, depth - 1)?;
    let left = rt.peek(0).unwrap_or(Value::NIL);
    let node = rt.cons(left, right)?;
    rt.pop()?;
    Ok(node)
}

fn count_nodes(rt: &GcRuntime, tree: Value) -> usize {
    match rt.car(tree) {
        Some(left) if !left.is_int() => {
            let right = rt.cdr(tree).unwrap_or(Value::NIL);
            1 + count_nodes(rt, left) + count_nodes(rt, right)
        }
        Some(_) => 1,
        None => 0,
    }
}

fn tree(rt: &mut GcRuntime, iterations: usize) -> Result<()> {
    let long_lived = make_tree(rt, LONG_LIVED_DEPTH)?;
    rt.push(long_lived)?;

    let expected = (1 << (TEMP_DEPTH + 1)) - 1;
    for _ in 0..iterations {
        let temp = make_tree(rt, TEMP_DEPTH)?;
        rt.push(temp)?;
        let nodes = count_nodes(rt, rt.peek(0).unwrap_or(Value::NIL));
        ensure!(nodes == expected, "temporary tree has {nodes} nodes");
        rt.pop()?;
    }

    let long_lived = rt.peek(0).context("tree root vanished")?;
    let nodes = count_nodes(rt, long_lived);
    ensure!(
        nodes == (1 << (LONG_LIVED_DEPTH + 1)) - 1,
        "long-lived tree has {nodes} nodes"
    );
    rt.pop()?;
    Ok(())
}

fn globals(rt: &mut GcRuntime, iterations: usize) -> Result<()> {
    for i in 0..iterations {
        let name = format!("g{}", i % GLOBAL_NAMES);
        let value = rt.cons(Value::int(i as i64), Value::NIL)?;
        rt.define_global(&name, value)?;
    }

    let names = iterations.min(GLOBAL_NAMES);
    for n in 0..names {
        let name = format!("g{n}");
        let last = (0..iterations).rev().find(|i| i % GLOBAL_NAMES == n).unwrap_or(n);
        let value = rt
            .lookup_global(&name)
            .with_context(|| format!("{name} is unbound"))?;
        ensure!(
            rt.car(value) == Some(Value::int(last as i64)),
            "{name} lost its last binding"
        );
    }
    Ok(())
}
