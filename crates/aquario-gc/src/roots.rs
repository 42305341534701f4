//! Root set: the operand stack and the global variable table

use crate::error::{GcError, GcResult};
use crate::value::Value;
use rustc_hash::FxHasher;
use std::hash::Hasher;

/// A single root slot that can be overwritten through a root barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSlot {
    /// Operand stack slot, counted from the bottom
    Stack(usize),
    /// Global table bucket
    Global(usize),
}

/// Every slot the collectors treat as a root
pub struct RootSet {
    stack: Vec<Value>,
    stack_capacity: usize,
    /// Values at the top of the stack parked across an allocation
    parked: usize,
    globals: Vec<Value>,
}

impl RootSet {
    /// Empty stack and a global table with every bucket unbound
    pub fn new(stack_capacity: usize, global_table_size: usize) -> Self {
        Self {
            stack: Vec::new(),
            stack_capacity,
            parked: 0,
            globals: vec![Value::UNDEF; global_table_size.max(1)],
        }
    }

    /// Push without any barrier
    pub fn push(&mut self, value: Value) -> GcResult<()> {
        if self.stack.len() >= self.stack_capacity {
            return Err(GcError::StackOverflow {
                capacity: self.stack_capacity,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pop without any barrier
    pub fn pop(&mut self) -> GcResult<Value> {
        self.stack.pop().ok_or(GcError::StackUnderflow)
    }

    /// Push a value that only needs to survive the next allocation
    pub fn park(&mut self, value: Value) -> GcResult<()> {
        self.push(value)?;
        self.parked += 1;
        Ok(())
    }

    /// Pop the most recently parked value
    pub fn unpark(&mut self) -> GcResult<Value> {
        let value = self.pop()?;
        self.parked = self.parked.saturating_sub(1);
        Ok(value)
    }

    /// Values currently parked
    pub fn parked(&self) -> &[Value] {
        let parked = self.parked.min(self.stack.len());
        &self.stack[self.stack.len() - parked..]
    }

    /// Value `depth` slots below the top
    pub fn peek(&self, depth: usize) -> Option<Value> {
        let len = self.stack.len();
        if depth < len {
            Some(self.stack[len - 1 - depth])
        } else {
            None
        }
    }

    /// Number of values on the stack
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Number of global buckets
    pub fn global_table_size(&self) -> usize {
        self.globals.len()
    }

    /// Current value of a slot
    pub fn get(&self, slot: RootSlot) -> Value {
        match slot {
            RootSlot::Stack(i) => self.stack[i],
            RootSlot::Global(i) => self.globals[i],
        }
    }

    /// Overwrite a slot without any barrier
    pub fn set(&mut self, slot: RootSlot, value: Value) {
        match slot {
            RootSlot::Stack(i) => self.stack[i] = value,
            RootSlot::Global(i) => self.globals[i] = value,
        }
    }

    /// Bucket a global name hashes into
    pub fn global_bucket(&self, name: &[u8]) -> usize {
        let mut hasher = FxHasher::default();
        hasher.write(name);
        (hasher.finish() % self.globals.len() as u64) as usize
    }

    pub(crate) fn stack_mut(&mut self) -> &mut [Value] {
        &mut self.stack
    }

    pub(crate) fn globals_mut(&mut self) -> &mut [Value] {
        &mut self.globals
    }

    /// Drop every root
    pub fn clear(&mut self) {
        self.stack.clear();
        self.parked = 0;
        self.globals.fill(Value::UNDEF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_bounds() {
        let mut roots = RootSet::new(2, 8);
        roots.push(Value::int(1)).unwrap();
        roots.push(Value::int(2)).unwrap();
        assert_eq!(
            roots.push(Value::int(3)),
            Err(GcError::StackOverflow { capacity: 2 })
        );
        assert_eq!(roots.peek(0), Some(Value::int(2)));
        assert_eq!(roots.peek(1), Some(Value::int(1)));
        assert_eq!(roots.peek(2), None);
        assert_eq!(roots.pop(), Ok(Value::int(2)));
        assert_eq!(roots.pop(), Ok(Value::int(1)));
        assert_eq!(roots.pop(), Err(GcError::StackUnderflow));
    }

    #[test]
    fn test_parked_values_sit_on_top() {
        let mut roots = RootSet::new(8, 8);
        roots.push(Value::int(1)).unwrap();
        roots.park(Value::int(2)).unwrap();
        roots.park(Value::int(3)).unwrap();
        assert_eq!(roots.parked(), &[Value::int(2), Value::int(3)]);
        assert_eq!(roots.depth(), 3);

        assert_eq!(roots.unpark(), Ok(Value::int(3)));
        assert_eq!(roots.unpark(), Ok(Value::int(2)));
        assert!(roots.parked().is_empty());
        assert_eq!(roots.peek(0), Some(Value::int(1)));
    }

    #[test]
    fn test_globals_start_unbound() {
        let roots = RootSet::new(4, 16);
        assert_eq!(roots.global_table_size(), 16);
        assert!((0..16).all(|i| roots.get(RootSlot::Global(i)).is_undef()));
    }

    #[test]
    fn test_bucket_is_stable() {
        let roots = RootSet::new(4, 3000);
        let a = roots.global_bucket(b"car");
        assert_eq!(a, roots.global_bucket(b"car"));
        assert!(a < 3000);
    }
}
