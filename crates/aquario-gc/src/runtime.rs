//! GC runtime: the heap, roots and the selected collector behind one handle
//!
//! Everything the interpreter does that touches the heap goes through
//! [`GcRuntime`]: allocation, barriers, operand stack traffic, object
//! construction and the global table. Values handed out may be moved by a
//! collection; anything that has to survive an allocation must sit on the
//! operand stack or in a global.

use crate::collector::{self, Collector, GcContext, GcStats, ObjectInfo, StrategyKind};
use crate::error::{GcError, GcResult};
use crate::heap::{Addr, GcConfig, GcHeap, WORD_BYTES};
use crate::object::{
    CAR, CDR, CHAR_WORDS, LAMBDA_ENTRY, LAMBDA_PARAMS, LAMBDA_WORDS, ObjRef, ObjectTag,
    PAIR_WORDS, aux_of, object_word, payload_words, read_text, tag_of, text_words, write_text,
};
use crate::roots::{RootSet, RootSlot};
use crate::trace::pointer_fields;
use crate::value::Value;
use rustc_hash::FxHashSet;

/// Owner of the heap, the root set and the collector
pub struct GcRuntime {
    ctx: GcContext,
    collector: Box<dyn Collector>,
    poisoned: bool,
}

impl GcRuntime {
    /// Runtime for the strategy called `name` with a `heap_size` byte heap.
    ///
    /// Unknown names select mark-sweep.
    pub fn select(name: &str, heap_size: usize) -> Self {
        Self::with_config(GcConfig::new(StrategyKind::from_name(name), heap_size))
    }

    /// Runtime built from a full configuration
    pub fn with_config(config: GcConfig) -> Self {
        let mut ctx = GcContext::new(&config);
        let collector = config.strategy.build(&config, &mut ctx.heap);

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "aquario::gc",
            strategy = config.strategy.short_name(),
            heap_size = config.heap_size,
            stress = config.stress,
            "GC initialized"
        );

        Self {
            ctx,
            collector,
            poisoned: false,
        }
    }

    /// Selected strategy
    pub fn kind(&self) -> StrategyKind {
        self.collector.kind()
    }

    /// Turn stress mode on or off
    pub fn set_stress(&mut self, stress: bool) {
        self.ctx.stress = stress;
    }

    /// Whether every allocation collects first
    pub fn stress(&self) -> bool {
        self.ctx.stress
    }

    /// Whether a fatal error has disabled the heap
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn check(&self) -> GcResult<()> {
        if self.poisoned {
            Err(GcError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn guard<T>(&mut self, result: GcResult<T>) -> GcResult<T> {
        if let Err(err) = &result
            && err.is_fatal()
            && !self.poisoned
        {
            #[cfg(feature = "gc_logging")]
            tracing::error!(target: "aquario::gc", error = %err, "heap poisoned");
            self.poisoned = true;
        }
        result
    }

    // ---- allocation and collection ----

    /// Allocate an object of `size_bytes` payload bytes, rounded up to whole
    /// words. The payload is zeroed and its object word is left for the
    /// caller to fill in.
    pub fn allocate(&mut self, size_bytes: usize) -> GcResult<ObjRef> {
        self.allocate_words(size_bytes.div_ceil(WORD_BYTES).max(1))
    }

    fn allocate_words(&mut self, words: usize) -> GcResult<ObjRef> {
        self.check()?;
        let result = self.collector.allocate(&mut self.ctx, words);
        let obj = self.guard(result)?;
        let header = self.collector.header_words();
        self.ctx.stats.record_allocation(words + header);
        Ok(obj)
    }

    /// Run the strategy's regular collection
    pub fn collect(&mut self) -> GcResult<()> {
        self.check()?;
        let result = self.collector.collect(&mut self.ctx);
        self.guard(result)
    }

    /// Collect every space the strategy manages
    pub fn collect_full(&mut self) -> GcResult<()> {
        self.check()?;
        let result = self.collector.collect_full(&mut self.ctx);
        self.guard(result)
    }

    // ---- barriers ----

    /// Store `value` into `field` of `owner` through the write barrier
    pub fn write_barrier(&mut self, owner: ObjRef, field: Addr, value: Value) -> GcResult<()> {
        self.check()?;
        let result =
            collector::write_barrier(self.collector.as_mut(), &mut self.ctx, owner, field, value);
        self.guard(result)
    }

    /// Store `value` into a root slot through the root barrier
    pub fn write_barrier_root(&mut self, slot: RootSlot, value: Value) -> GcResult<()> {
        self.check()?;
        let result = self
            .collector
            .write_barrier_root(&mut self.ctx, slot, value);
        self.guard(result)
    }

    fn init_field(&mut self, field: Addr, value: Value) -> GcResult<()> {
        let result = self.collector.init_field(&mut self.ctx, field, value);
        self.guard(result)
    }

    // ---- operand stack ----

    /// Push onto the operand stack
    pub fn push(&mut self, value: Value) -> GcResult<()> {
        self.check()?;
        let result = self.collector.push(&mut self.ctx, value);
        self.guard(result)
    }

    /// Pop from the operand stack.
    ///
    /// Under eager reference counting the popped object is freed right away
    /// if the stack held its last reference.
    pub fn pop(&mut self) -> GcResult<Value> {
        self.check()?;
        let result = self.collector.pop(&mut self.ctx);
        self.guard(result)
    }

    /// Value `depth` slots below the top of the stack
    pub fn peek(&self, depth: usize) -> Option<Value> {
        self.ctx.roots.peek(depth)
    }

    /// Number of values on the operand stack
    pub fn stack_depth(&self) -> usize {
        self.ctx.roots.depth()
    }

    /// Run `alloc` with `values` parked on the stack, then hand back the
    /// (possibly moved) values alongside the result
    fn protected<const N: usize, T>(
        &mut self,
        values: [Value; N],
        alloc: impl FnOnce(&mut Self) -> GcResult<T>,
    ) -> GcResult<([Value; N], T)> {
        for (pushed, value) in values.into_iter().enumerate() {
            if let Err(err) = self.ctx.roots.park(value) {
                for _ in 0..pushed {
                    self.ctx.roots.unpark()?;
                }
                return self.guard(Err(err));
            }
        }
        let result = alloc(self);
        let mut moved = values;
        for slot in moved.iter_mut().rev() {
            *slot = self.ctx.roots.unpark()?;
        }
        Ok((moved, result?))
    }

    // ---- object construction ----

    /// New character object
    pub fn make_char(&mut self, c: char) -> GcResult<Value> {
        let obj = self.allocate_words(CHAR_WORDS)?;
        self.ctx
            .heap
            .store(obj.addr(), object_word(ObjectTag::Char, u64::from(c)));
        Ok(obj.into())
    }

    /// New string object holding `text`
    pub fn make_string(&mut self, text: &str) -> GcResult<Value> {
        self.make_text(ObjectTag::String, text.as_bytes())
    }

    /// New symbol object named `name`
    pub fn make_symbol(&mut self, name: &str) -> GcResult<Value> {
        self.make_text(ObjectTag::Symbol, name.as_bytes())
    }

    fn make_text(&mut self, tag: ObjectTag, bytes: &[u8]) -> GcResult<Value> {
        let obj = self.allocate_words(text_words(bytes.len()))?;
        self.ctx
            .heap
            .store(obj.addr(), object_word(tag, bytes.len() as u64));
        write_text(&mut self.ctx.heap, obj, bytes);
        Ok(obj.into())
    }

    /// New pair `(car . cdr)`
    pub fn cons(&mut self, car: Value, cdr: Value) -> GcResult<Value> {
        self.check()?;
        let ([car, cdr], obj) = self.protected([car, cdr], |rt| rt.allocate_words(PAIR_WORDS))?;
        self.ctx
            .heap
            .store(obj.addr(), object_word(ObjectTag::Pair, 0));
        self.init_field(obj.field(CDR), cdr)?;
        self.init_field(obj.field(CAR), car)?;
        Ok(obj.into())
    }

    /// New lambda with a code entry address and parameter count
    pub fn make_lambda(&mut self, entry: i64, params: i64, variadic: bool) -> GcResult<Value> {
        let obj = self.allocate_words(LAMBDA_WORDS)?;
        self.ctx.heap.store(
            obj.addr(),
            object_word(ObjectTag::Lambda, u64::from(variadic)),
        );
        self.ctx
            .heap
            .store_value(obj.field(LAMBDA_ENTRY), Value::int(entry));
        self.ctx
            .heap
            .store_value(obj.field(LAMBDA_PARAMS), Value::int(params));
        Ok(obj.into())
    }

    /// Shallow copy of a heap object; immediates are returned unchanged
    pub fn duplicate(&mut self, value: Value) -> GcResult<Value> {
        let Some(obj) = value.as_ref() else {
            return Ok(value);
        };
        self.check()?;
        let words = payload_words(&self.ctx.heap, obj)?;
        let ([value], copy) = self.protected([value], |rt| rt.allocate_words(words))?;
        let Some(src) = value.as_ref() else {
            return Ok(value);
        };
        self.ctx.heap.copy_words(src.addr(), copy.addr(), words);
        let result = self.collector.copy_object(&mut self.ctx, copy);
        self.guard(result)?;
        Ok(copy.into())
    }

    // ---- accessors ----

    /// Tag of a heap value
    pub fn tag(&self, value: Value) -> Option<ObjectTag> {
        value.as_ref().and_then(|obj| tag_of(&self.ctx.heap, obj).ok())
    }

    fn as_pair(&self, value: Value) -> Option<ObjRef> {
        value
            .as_ref()
            .filter(|&obj| tag_of(&self.ctx.heap, obj) == Ok(ObjectTag::Pair))
    }

    /// Car of a pair
    pub fn car(&self, pair: Value) -> Option<Value> {
        self.as_pair(pair)
            .map(|obj| self.ctx.heap.load_value(obj.field(CAR)))
    }

    /// Cdr of a pair
    pub fn cdr(&self, pair: Value) -> Option<Value> {
        self.as_pair(pair)
            .map(|obj| self.ctx.heap.load_value(obj.field(CDR)))
    }

    /// Replace the car of a pair; non-pairs are left alone
    pub fn set_car(&mut self, pair: Value, value: Value) -> GcResult<()> {
        match self.as_pair(pair) {
            Some(obj) => self.write_barrier(obj, obj.field(CAR), value),
            None => Ok(()),
        }
    }

    /// Replace the cdr of a pair; non-pairs are left alone
    pub fn set_cdr(&mut self, pair: Value, value: Value) -> GcResult<()> {
        match self.as_pair(pair) {
            Some(obj) => self.write_barrier(obj, obj.field(CDR), value),
            None => Ok(()),
        }
    }

    /// Text of a string or symbol
    pub fn string_value(&self, value: Value) -> Option<String> {
        match self.tag(value)? {
            ObjectTag::String | ObjectTag::Symbol => {
                let obj = value.as_ref()?;
                Some(String::from_utf8_lossy(&read_text(&self.ctx.heap, obj)).into_owned())
            }
            _ => None,
        }
    }

    /// Scalar of a character object
    pub fn char_value(&self, value: Value) -> Option<char> {
        match self.tag(value)? {
            ObjectTag::Char => char::from_u32(aux_of(&self.ctx.heap, value.as_ref()?) as u32),
            _ => None,
        }
    }

    /// Collect a proper list into a vector; `None` for improper lists
    pub fn list_to_vec(&self, mut list: Value) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        while !list.is_nil() {
            items.push(self.car(list)?);
            list = self.cdr(list)?;
        }
        Some(items)
    }

    // ---- globals ----

    /// Bind `name` to `value` in the global table.
    ///
    /// Each bucket holds a list of `(name . value)` entries; rebinding an
    /// existing name updates its entry in place.
    pub fn define_global(&mut self, name: &str, value: Value) -> GcResult<()> {
        self.check()?;
        if let Some(entry) = self.global_entry(name) {
            return self.set_cdr(entry, value);
        }

        let bucket = RootSlot::Global(self.ctx.roots.global_bucket(name.as_bytes()));
        let ([value], key) = self.protected([value], |rt| rt.make_string(name))?;
        let entry = self.cons(key, value)?;
        let head = match self.ctx.roots.get(bucket) {
            head if head.is_undef() => Value::NIL,
            head => head,
        };
        let link = self.cons(entry, head)?;
        self.write_barrier_root(bucket, link)
    }

    /// Current value bound to `name`
    pub fn lookup_global(&self, name: &str) -> Option<Value> {
        self.global_entry(name).and_then(|entry| self.cdr(entry))
    }

    fn global_entry(&self, name: &str) -> Option<Value> {
        let bucket = RootSlot::Global(self.ctx.roots.global_bucket(name.as_bytes()));
        let mut link = self.ctx.roots.get(bucket);
        while let Some(entry) = self.car(link) {
            if let Some(key) = self.car(entry)
                && self.string_value(key).as_deref() == Some(name)
            {
                return Some(entry);
            }
            link = self.cdr(link)?;
        }
        None
    }

    // ---- inspection ----

    /// Every object the collector currently holds, with its block size in words
    pub fn live_objects(&self) -> Vec<(ObjRef, usize)> {
        let mut objects = Vec::new();
        self.collector
            .for_each_object(&self.ctx.heap, &mut |obj, size| objects.push((obj, size)));
        objects
    }

    /// Bytes held by [`live_objects`](Self::live_objects), headers included
    pub fn live_bytes(&self) -> usize {
        self.live_objects()
            .iter()
            .map(|&(_, size)| size * WORD_BYTES)
            .sum()
    }

    /// Objects reachable from the roots
    pub fn reachable_objects(&self) -> GcResult<Vec<ObjRef>> {
        let roots = &self.ctx.roots;
        let mut pending: Vec<ObjRef> = (0..roots.depth())
            .map(RootSlot::Stack)
            .chain((0..roots.global_table_size()).map(RootSlot::Global))
            .filter_map(|slot| roots.get(slot).as_ref())
            .collect();
        let mut seen = FxHashSet::default();
        let mut reachable = Vec::new();
        while let Some(obj) = pending.pop() {
            if !seen.insert(obj) {
                continue;
            }
            reachable.push(obj);
            for field in pointer_fields(&self.ctx.heap, obj)? {
                if let Some(child) = self.ctx.heap.load_value(field).as_ref() {
                    pending.push(child);
                }
            }
        }
        Ok(reachable)
    }

    /// Collector metadata of `obj`
    pub fn describe(&self, obj: ObjRef) -> ObjectInfo {
        self.collector.describe(&self.ctx.heap, obj)
    }

    /// Measurements so far
    pub fn stats(&self) -> &GcStats {
        &self.ctx.stats
    }

    /// The object arena
    pub fn heap(&self) -> &GcHeap {
        &self.ctx.heap
    }

    /// Stack and global roots
    pub fn roots(&self) -> &RootSet {
        &self.ctx.roots
    }

    /// Release every strategy table and the arena, returning the final
    /// measurements
    pub fn terminate(mut self) -> GcStats {
        self.collector.terminate(&mut self.ctx);
        self.ctx.heap.release();
        self.ctx.roots.clear();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "aquario::gc",
            collections = self.ctx.stats.collections,
            "GC terminated"
        );

        std::mem::take(&mut self.ctx.stats)
    }
}

impl std::fmt::Debug for GcRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcRuntime")
            .field("strategy", &self.kind())
            .field("heap", &self.ctx.heap)
            .field("stack_depth", &self.ctx.roots.depth())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
