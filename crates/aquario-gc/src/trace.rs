//! Root and object tracing shared by every strategy

use crate::error::{GcError, GcResult};
use crate::heap::{Addr, GcHeap};
use crate::object::{CAR, CDR, ObjRef, ObjectTag, tag_of};
use crate::roots::RootSet;
use crate::value::Value;

/// Visit every root slot holding a heap reference.
///
/// Stack slots are visited from the top down, then every bound global
/// bucket. The visitor may rewrite the slot in place.
pub fn trace_roots<F>(roots: &mut RootSet, heap: &mut GcHeap, mut visit: F) -> GcResult<()>
where
    F: FnMut(&mut GcHeap, &mut Value) -> GcResult<()>,
{
    for slot in roots.stack_mut().iter_mut().rev() {
        if slot.is_ref() {
            visit(heap, slot)?;
        }
    }
    for slot in roots.globals_mut().iter_mut() {
        if !slot.is_undef() && slot.is_ref() {
            visit(heap, slot)?;
        }
    }
    Ok(())
}

/// Addresses of the fields of an object that hold heap references
#[derive(Debug, Clone, Copy)]
pub struct PointerFields {
    fields: [Addr; 2],
    len: u8,
    next: u8,
}

impl PointerFields {
    const EMPTY: PointerFields = PointerFields {
        fields: [Addr(0); 2],
        len: 0,
        next: 0,
    };

    fn push(&mut self, addr: Addr) {
        self.fields[self.len as usize] = addr;
        self.len += 1;
    }
}

impl Iterator for PointerFields {
    type Item = Addr;

    fn next(&mut self) -> Option<Addr> {
        if self.next < self.len {
            let addr = self.fields[self.next as usize];
            self.next += 1;
            Some(addr)
        } else {
            None
        }
    }
}

/// Collect the pointer fields of `obj`.
///
/// Lambda fields are deliberately not reported: entry address and parameter
/// count are plain integers, and anything else parked there is not kept
/// alive.
pub fn pointer_fields(heap: &GcHeap, obj: ObjRef) -> GcResult<PointerFields> {
    let mut fields = PointerFields::EMPTY;
    match tag_of(heap, obj)? {
        ObjectTag::Pair => {
            for index in [CAR, CDR] {
                let addr = obj.field(index);
                if heap.load_value(addr).is_ref() {
                    fields.push(addr);
                }
            }
        }
        ObjectTag::Char | ObjectTag::String | ObjectTag::Symbol | ObjectTag::Lambda => {}
    }
    Ok(fields)
}

/// Visit every pointer field of `obj`, writing back whatever the visitor
/// leaves in the value
pub fn trace_object<F>(heap: &mut GcHeap, obj: ObjRef, mut visit: F) -> GcResult<()>
where
    F: FnMut(&mut GcHeap, &mut Value) -> GcResult<()>,
{
    for field in pointer_fields(heap, obj)? {
        let mut value = heap.load_value(field);
        visit(heap, &mut value)?;
        heap.store_value(field, value);
    }
    Ok(())
}

/// Whether any pointer field of `obj` satisfies `pred`
pub fn trace_object_any<F>(heap: &GcHeap, obj: ObjRef, mut pred: F) -> GcResult<bool>
where
    F: FnMut(ObjRef) -> bool,
{
    for field in pointer_fields(heap, obj)? {
        if let Some(child) = heap.load_value(field).as_ref()
            && pred(child)
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Bounded gray stack for marking
#[derive(Debug)]
pub struct MarkStack {
    items: Vec<ObjRef>,
    capacity: usize,
}

impl MarkStack {
    /// Empty stack holding at most `capacity` objects
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Push a gray object; overflowing the capacity is fatal
    pub fn push(&mut self, obj: ObjRef) -> GcResult<()> {
        if self.items.len() >= self.capacity {
            return Err(GcError::MarkStackOverflow {
                capacity: self.capacity,
            });
        }
        self.items.push(obj);
        Ok(())
    }

    /// Pop the next gray object
    pub fn pop(&mut self) -> Option<ObjRef> {
        self.items.pop()
    }

    /// Drop any leftover entries
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::WORD_BYTES;
    use crate::object::{ObjectTag, object_word};

    fn pair_at(heap: &mut GcHeap, at: usize, car: Value, cdr: Value) -> ObjRef {
        let obj = ObjRef::new(Addr(at));
        heap.store(obj.addr(), object_word(ObjectTag::Pair, 0));
        heap.store_value(obj.field(CAR), car);
        heap.store_value(obj.field(CDR), cdr);
        obj
    }

    #[test]
    fn test_pair_fields() {
        let mut heap = GcHeap::new(16 * WORD_BYTES);
        let leaf = pair_at(&mut heap, 8, Value::int(1), Value::NIL);
        let node = pair_at(&mut heap, 1, Value::int(2), leaf.into());
        let fields: Vec<_> = pointer_fields(&heap, node).unwrap().collect();
        assert_eq!(fields, vec![node.field(CDR)]);
        assert_eq!(pointer_fields(&heap, leaf).unwrap().count(), 0);
    }

    #[test]
    fn test_lambda_fields_not_traced() {
        let mut heap = GcHeap::new(8 * WORD_BYTES);
        let obj = ObjRef::new(Addr(1));
        heap.store(obj.addr(), object_word(ObjectTag::Lambda, 0));
        heap.store_value(obj.field(1), Value::from(ObjRef::new(Addr(5))));
        assert_eq!(pointer_fields(&heap, obj).unwrap().count(), 0);
    }

    #[test]
    fn test_trace_object_rewrites() {
        let mut heap = GcHeap::new(16 * WORD_BYTES);
        let leaf = pair_at(&mut heap, 8, Value::NIL, Value::NIL);
        let node = pair_at(&mut heap, 1, leaf.into(), leaf.into());
        let moved = Value::from(ObjRef::new(Addr(12)));
        trace_object(&mut heap, node, |_, v| {
            *v = moved;
            Ok(())
        })
        .unwrap();
        assert_eq!(heap.load_value(node.field(CAR)), moved);
        assert_eq!(heap.load_value(node.field(CDR)), moved);
    }

    #[test]
    fn test_trace_roots_order() {
        let mut heap = GcHeap::new(16 * WORD_BYTES);
        let mut roots = RootSet::new(8, 4);
        let a = Value::from(ObjRef::new(Addr(1)));
        let b = Value::from(ObjRef::new(Addr(5)));
        let g = Value::from(ObjRef::new(Addr(9)));
        roots.push(a).unwrap();
        roots.push(Value::int(3)).unwrap();
        roots.push(b).unwrap();
        roots.set(crate::roots::RootSlot::Global(2), g);
        let mut seen = Vec::new();
        trace_roots(&mut roots, &mut heap, |_, v| {
            seen.push(*v);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![b, a, g]);
    }

    #[test]
    fn test_trace_object_any() {
        let mut heap = GcHeap::new(16 * WORD_BYTES);
        let leaf = pair_at(&mut heap, 8, Value::NIL, Value::NIL);
        let node = pair_at(&mut heap, 1, Value::int(0), leaf.into());
        assert!(trace_object_any(&heap, node, |c| c == leaf).unwrap());
        assert!(!trace_object_any(&heap, node, |c| c != leaf).unwrap());
    }

    #[test]
    fn test_mark_stack_overflow() {
        let mut stack = MarkStack::new(1);
        stack.push(ObjRef::new(Addr(1))).unwrap();
        assert_eq!(
            stack.push(ObjRef::new(Addr(2))),
            Err(GcError::MarkStackOverflow { capacity: 1 })
        );
    }
}
