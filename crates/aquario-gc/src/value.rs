//! Tagged machine-word values
//!
//! A value is either an immediate (boolean, nil, undefined, stack-frame
//! marker, small integer) or a reference to a heap object. References are the
//! byte offset of the object's payload inside the arena, so they always have
//! the two low bits clear and are never zero.

use crate::heap::{Addr, WORD_BYTES};
use crate::object::ObjRef;
use std::fmt;

/// One tagged word
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    /// `#f`
    pub const FALSE: Value = Value(0);
    /// `#t`
    pub const TRUE: Value = Value(2);
    /// Unbound slot marker
    pub const UNDEF: Value = Value(6);
    /// Stack frame marker
    pub const SFRAME: Value = Value(10);
    /// Empty list
    pub const NIL: Value = Value(14);

    /// Largest small integer
    pub const INT_MAX: i64 = i64::MAX >> 1;
    /// Smallest small integer
    pub const INT_MIN: i64 = i64::MIN >> 1;

    const REF_MASK: u64 = 0b11;

    /// Reinterpret raw bits
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Value(bits)
    }

    /// Raw bits
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Small integer; `n` wraps if it lies outside `INT_MIN..=INT_MAX`
    #[inline]
    pub const fn int(n: i64) -> Self {
        Value(((n << 1) | 1) as u64)
    }

    /// Reference to a heap object
    #[inline]
    pub const fn from_ref(obj: ObjRef) -> Self {
        Value((obj.addr().0 * WORD_BYTES) as u64)
    }

    /// Whether the value is a small integer
    #[inline]
    pub const fn is_int(self) -> bool {
        self.0 & 1 == 1
    }

    /// Whether the value points into the heap
    #[inline]
    pub const fn is_ref(self) -> bool {
        self.0 != 0 && self.0 & Self::REF_MASK == 0
    }

    /// Whether the value is `nil`
    #[inline]
    pub const fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }

    /// Whether the value is the unbound marker
    #[inline]
    pub const fn is_undef(self) -> bool {
        self.0 == Self::UNDEF.0
    }

    /// Integer payload
    #[inline]
    pub const fn as_int(self) -> Option<i64> {
        if self.is_int() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    /// Referenced object
    #[inline]
    pub const fn as_ref(self) -> Option<ObjRef> {
        if self.is_ref() {
            Some(ObjRef::new(Addr(self.0 as usize / WORD_BYTES)))
        } else {
            None
        }
    }
}

impl From<ObjRef> for Value {
    fn from(obj: ObjRef) -> Self {
        Value::from_ref(obj)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        if b { Value::TRUE } else { Value::FALSE }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::int(n)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::FALSE => f.write_str("#f"),
            Value::TRUE => f.write_str("#t"),
            Value::UNDEF => f.write_str("#<undef>"),
            Value::SFRAME => f.write_str("#<frame>"),
            Value::NIL => f.write_str("()"),
            v => match (v.as_int(), v.as_ref()) {
                (Some(n), _) => write!(f, "{n}"),
                (_, Some(obj)) => write!(f, "#<ref {}>", obj.addr()),
                _ => write!(f, "#<imm {:#x}>", v.0),
            },
        }
    }
}
