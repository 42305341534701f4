//! Remembered set for generational collection
//!
//! Records tenured objects that may hold pointers into the nursery so a
//! minor collection can treat them as extra roots. The set has a fixed
//! capacity; the owner decides how to make room when it fills up.

use crate::error::{GcError, GcResult};
use crate::object::ObjRef;

/// Bounded list of tenured objects pointing into the nursery
#[derive(Debug)]
pub struct RememberedSet {
    entries: Vec<ObjRef>,
    capacity: usize,
}

impl RememberedSet {
    /// Create an empty set holding at most `capacity` objects
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Add an entry; fails when the set is full
    pub fn add(&mut self, obj: ObjRef) -> GcResult<()> {
        if self.is_full() {
            return Err(GcError::RememberedSetFull {
                capacity: self.capacity,
            });
        }
        self.entries.push(obj);
        Ok(())
    }

    /// Keep only the entries `keep` accepts
    pub fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&ObjRef) -> bool,
    {
        self.entries.retain(keep);
    }

    /// Snapshot of the entries, for use as roots while the heap changes
    pub fn roots(&self) -> Vec<ObjRef> {
        self.entries.clone()
    }

    /// Whether no more entries fit
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Clear the set
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Addr;

    #[test]
    fn test_remembered_set_basic() {
        let mut rs = RememberedSet::new(4);
        assert!(rs.is_empty());

        let obj = ObjRef::new(Addr(3));
        rs.add(obj).unwrap();
        rs.add(ObjRef::new(Addr(9))).unwrap();
        assert_eq!(rs.len(), 2);

        rs.retain(|&o| o != obj);
        assert_eq!(rs.roots(), vec![ObjRef::new(Addr(9))]);
    }

    #[test]
    fn test_remembered_set_capacity() {
        let mut rs = RememberedSet::new(2);
        rs.add(ObjRef::new(Addr(3))).unwrap();
        rs.add(ObjRef::new(Addr(9))).unwrap();
        assert!(rs.is_full());
        assert_eq!(
            rs.add(ObjRef::new(Addr(15))),
            Err(GcError::RememberedSetFull { capacity: 2 })
        );
        rs.clear();
        assert_eq!(rs.len(), 0);
        assert_eq!(rs.capacity(), 2);
    }
}
