//! # Aquario Garbage Collectors
//!
//! Pluggable collectors for the Aquario Lisp heap.
//!
//! ## Design
//!
//! - **Arena**: one word-addressed heap; objects are a strategy header
//!   followed by the payload, referenced by payload address
//! - **Strategies**: semispace copying, mark-sweep, mark-compact,
//!   generational and reference counting (eager or deferred), all behind
//!   the [`Collector`] trait
//! - **Runtime**: [`GcRuntime`] owns heap, roots and collector and is the
//!   only entry point the interpreter needs
//!
//! Reference counting does not reclaim cycles, and lambda fields are never
//! traced.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod allocator;
pub mod barrier;
pub mod collector;
pub mod copying;
pub mod error;
pub mod free_list;
pub mod generational;
pub mod heap;
pub mod mark_compact;
pub mod mark_sweep;
pub mod object;
pub mod ref_count;
pub mod roots;
pub mod runtime;
pub mod trace;
pub mod value;

pub use collector::{Collector, CycleKind, GcContext, GcStats, ObjectInfo, StrategyKind, write_barrier};
pub use error::{GcError, GcResult};
pub use free_list::{FitPolicy, FreeList};
pub use heap::{Addr, GcConfig, GcHeap, WORD_BYTES};
pub use object::{ObjRef, ObjectTag};
pub use roots::{RootSet, RootSlot};
pub use runtime::GcRuntime;
pub use trace::{trace_object, trace_roots};
pub use value::Value;
