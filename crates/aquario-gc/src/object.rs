//! GC object layout
//!
//! Every object starts with an object word: the type tag in the low byte and
//! an auxiliary field in the remaining bits. The collector header sits in
//! front of the object word at strategy-specific negative offsets.
//!
//! | tag    | aux            | words 1..                      |
//! |--------|----------------|--------------------------------|
//! | char   | scalar value   | none                           |
//! | string | byte length    | bytes, little-endian packed    |
//! | pair   | unused         | car, cdr                       |
//! | symbol | byte length    | bytes, little-endian packed    |
//! | lambda | variadic flag  | entry address, parameter count |

use crate::error::{GcError, GcResult};
use crate::heap::{Addr, GcHeap, WORD_BYTES, Word};

/// Reference to a heap object: the address of its object word
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjRef(Addr);

impl ObjRef {
    /// Wrap a payload address
    #[inline]
    pub const fn new(addr: Addr) -> Self {
        ObjRef(addr)
    }

    /// Payload address
    #[inline]
    pub const fn addr(self) -> Addr {
        self.0
    }

    /// Address of payload word `index`
    #[inline]
    pub const fn field(self, index: usize) -> Addr {
        self.0.add(index)
    }

    /// Address `words` words in front of the payload
    #[inline]
    pub const fn header(self, words: usize) -> Addr {
        self.0.sub(words)
    }
}

/// Object type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectTag {
    /// Character
    Char = 0,
    /// Mutable string
    String = 1,
    /// Cons cell
    Pair = 2,
    /// Interned name
    Symbol = 5,
    /// Compiled procedure
    Lambda = 6,
}

impl TryFrom<u8> for ObjectTag {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, u8> {
        match tag {
            0 => Ok(ObjectTag::Char),
            1 => Ok(ObjectTag::String),
            2 => Ok(ObjectTag::Pair),
            5 => Ok(ObjectTag::Symbol),
            6 => Ok(ObjectTag::Lambda),
            other => Err(other),
        }
    }
}

/// Field index of a pair's car
pub const CAR: usize = 1;
/// Field index of a pair's cdr
pub const CDR: usize = 2;
/// Field index of a lambda's entry address
pub const LAMBDA_ENTRY: usize = 1;
/// Field index of a lambda's parameter count
pub const LAMBDA_PARAMS: usize = 2;

/// Payload words of a char
pub const CHAR_WORDS: usize = 1;
/// Payload words of a pair
pub const PAIR_WORDS: usize = 3;
/// Payload words of a lambda
pub const LAMBDA_WORDS: usize = 3;

/// Payload words needed for a string or symbol of `len` bytes
pub const fn text_words(len: usize) -> usize {
    1 + len.div_ceil(WORD_BYTES)
}

/// Build an object word
#[inline]
pub const fn object_word(tag: ObjectTag, aux: u64) -> Word {
    tag as u64 | (aux << 8)
}

/// Raw tag byte of an object
#[inline]
pub fn raw_tag(heap: &GcHeap, obj: ObjRef) -> u8 {
    (heap.load(obj.addr()) & 0xFF) as u8
}

/// Decoded tag of an object
pub fn tag_of(heap: &GcHeap, obj: ObjRef) -> GcResult<ObjectTag> {
    ObjectTag::try_from(raw_tag(heap, obj)).map_err(|tag| GcError::CorruptObject {
        addr: obj.addr(),
        tag,
    })
}

/// Auxiliary field of an object word
#[inline]
pub fn aux_of(heap: &GcHeap, obj: ObjRef) -> u64 {
    heap.load(obj.addr()) >> 8
}

/// Pack `bytes` into the text words of `obj`
pub fn write_text(heap: &mut GcHeap, obj: ObjRef, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(WORD_BYTES).enumerate() {
        let mut buf = [0u8; WORD_BYTES];
        buf[..chunk.len()].copy_from_slice(chunk);
        heap.store(obj.field(1 + i), Word::from_le_bytes(buf));
    }
}

/// Unpack the text bytes of a string or symbol
pub fn read_text(heap: &GcHeap, obj: ObjRef) -> Vec<u8> {
    let len = aux_of(heap, obj) as usize;
    let mut bytes = Vec::with_capacity(len);
    for i in 0..len.div_ceil(WORD_BYTES) {
        bytes.extend_from_slice(&heap.load(obj.field(1 + i)).to_le_bytes());
    }
    bytes.truncate(len);
    bytes
}

/// Payload words of `obj`, object word included
pub fn payload_words(heap: &GcHeap, obj: ObjRef) -> GcResult<usize> {
    Ok(match tag_of(heap, obj)? {
        ObjectTag::Char => CHAR_WORDS,
        ObjectTag::String | ObjectTag::Symbol => text_words(aux_of(heap, obj) as usize),
        ObjectTag::Pair => PAIR_WORDS,
        ObjectTag::Lambda => LAMBDA_WORDS,
    })
}
