//! Collector error types

use crate::heap::Addr;
use thiserror::Error;

/// Errors raised by the heap, the collectors and the root set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcError {
    /// Allocation could not be satisfied even after a collection
    #[error("heap exhausted: {strategy} could not allocate {requested} bytes")]
    HeapExhausted {
        /// Requested size in bytes, header included
        requested: usize,
        /// Short name of the active strategy
        strategy: &'static str,
    },

    /// A single request is larger than the region it must live in
    #[error("object of {requested} bytes exceeds the {limit} byte allocation limit")]
    ObjectTooLarge {
        /// Requested size in bytes, header included
        requested: usize,
        /// Largest satisfiable request in bytes
        limit: usize,
    },

    /// The explicit mark stack ran out of room
    #[error("mark stack overflow (capacity {capacity})")]
    MarkStackOverflow {
        /// Number of entries the mark stack holds
        capacity: usize,
    },

    /// The remembered set is still full after cleaning
    #[error("remembered set full (capacity {capacity})")]
    RememberedSetFull {
        /// Number of entries the remembered set holds
        capacity: usize,
    },

    /// The zero count table is still full after a scan
    #[error("zero count table full (capacity {capacity})")]
    ZeroCountTableFull {
        /// Number of entries the table holds
        capacity: usize,
    },

    /// Operand stack push beyond its capacity
    #[error("operand stack overflow (capacity {capacity})")]
    StackOverflow {
        /// Number of slots the operand stack holds
        capacity: usize,
    },

    /// Operand stack pop on an empty stack
    #[error("operand stack underflow")]
    StackUnderflow,

    /// Object tracing met a tag it does not know
    #[error("object corrupted at {addr}: unknown tag {tag}")]
    CorruptObject {
        /// Payload address of the object
        addr: Addr,
        /// The offending tag byte
        tag: u8,
    },

    /// An earlier fatal error left the heap unusable
    #[error("heap is poisoned by an earlier fatal error")]
    Poisoned,
}

impl GcError {
    /// Whether the error leaves the heap in an unusable state.
    ///
    /// Operand stack bounds are checked before anything is written, so they
    /// are the only recoverable errors.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GcError::StackOverflow { .. } | GcError::StackUnderflow)
    }
}

/// Result alias used throughout the collector
pub type GcResult<T> = Result<T, GcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_errors_are_recoverable() {
        assert!(!GcError::StackUnderflow.is_fatal());
        assert!(!GcError::StackOverflow { capacity: 4 }.is_fatal());
        assert!(GcError::MarkStackOverflow { capacity: 4 }.is_fatal());
        assert!(GcError::Poisoned.is_fatal());
    }

    #[test]
    fn test_messages() {
        let err = GcError::HeapExhausted {
            requested: 32,
            strategy: "ms",
        };
        assert_eq!(
            err.to_string(),
            "heap exhausted: ms could not allocate 32 bytes"
        );
        let err = GcError::CorruptObject {
            addr: Addr(3),
            tag: 9,
        };
        assert_eq!(err.to_string(), "object corrupted at @0x18: unknown tag 9");
    }
}
