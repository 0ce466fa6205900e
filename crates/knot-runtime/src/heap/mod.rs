//! The object heap. Objects live in a single word arena and are reached through a
//! table of generation checked slots, so the copying collector can move an object
//! by updating its slot while every [Handle] that names it stays the same.
//!
//! Object layout, in words:
//!
//! ```text
//! [header][own handle][payload ...]
//! ```
//!
//! The header packs the object kind, a 24 bit type id (cvalues only) and a 32 bit
//! length: field count for pairs, vectors and closures, byte count for cvalues.

mod tracer;

pub use tracer::Tracer;

use crate::error::{Result, RuntimeError};
use crate::value::{Handle, Value, Word};

pub(crate) const HEADER_WORDS: usize = 2;

const FORWARDED: u64 = 0xFF;
const TYPE_ID_MASK: u64 = 0xFF_FFFF;

/// Largest type id that fits in a header.
pub(crate) const MAX_TYPE_ID: u32 = TYPE_ID_MASK as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Cons = 1,
    Vector = 2,
    CValue = 3,
    Closure = 4,
}

impl Kind {
    fn value(self, handle: Handle) -> Value {
        match self {
            Kind::Cons => Value::Cons(handle),
            Kind::Vector => Value::Vector(handle),
            Kind::CValue => Value::CValue(handle),
            Kind::Closure => Value::Closure(handle),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Header(pub(crate) u64);

impl Header {
    pub(crate) fn new(kind: Kind, type_id: u32, len: u32) -> Header {
        Header(kind as u64 | ((type_id as u64 & TYPE_ID_MASK) << 8) | ((len as u64) << 32))
    }

    /// Header left behind in from-space once an object has been copied.
    pub(crate) fn forwarded(offset: usize) -> Header {
        Header(FORWARDED | ((offset as u64) << 8))
    }

    pub(crate) fn is_forwarded(self) -> bool {
        self.0 & 0xFF == FORWARDED
    }

    pub(crate) fn forward_offset(self) -> usize {
        (self.0 >> 8) as usize
    }

    pub(crate) fn kind(self) -> Kind {
        match self.0 & 0xFF {
            1 => Kind::Cons,
            2 => Kind::Vector,
            3 => Kind::CValue,
            4 => Kind::Closure,
            tag => unreachable!("corrupted object header with kind {tag:#x}"),
        }
    }

    pub(crate) fn type_id(self) -> u32 {
        ((self.0 >> 8) & TYPE_ID_MASK) as u32
    }

    pub(crate) fn len(self) -> usize {
        (self.0 >> 32) as usize
    }

    pub(crate) fn payload_words(self) -> usize {
        match self.kind() {
            Kind::CValue => (self.len() + 7) / 8,
            _ => self.len(),
        }
    }

    pub(crate) fn total_words(self) -> usize {
        HEADER_WORDS + self.payload_words()
    }
}

/// Words needed by an object of `kind` with `len` fields (or bytes), [None] on
/// overflow.
pub(crate) fn object_words(kind: Kind, len: usize) -> Option<usize> {
    let payload = match kind {
        Kind::CValue => len.checked_add(7)? / 8,
        _ => len,
    };
    payload.checked_add(HEADER_WORDS)
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    offset: usize,
    live: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub collections: usize,
    pub live_objects: usize,
    pub live_words: usize,
    pub freed_objects: usize,
    pub allocated_words: usize,
    pub capacity: usize,
}

pub struct Heap {
    space: Vec<u64>,
    limit: usize,
    max_words: usize,
    slots: Vec<Slot>,
    free: Vec<u32>,
    stats: HeapStats,
}

fn bytes_of(space: &[u64], offset: usize, len: usize) -> &[u8] {
    let start = offset + HEADER_WORDS;
    let words = &space[start..start + (len + 7) / 8];
    // SAFETY: the payload words are initialized and cover at least `len` bytes.
    unsafe { std::slice::from_raw_parts(words.as_ptr() as *const u8, len) }
}

fn bytes_of_mut(space: &mut [u64], offset: usize, len: usize) -> &mut [u8] {
    let start = offset + HEADER_WORDS;
    let words = &mut space[start..start + (len + 7) / 8];
    // SAFETY: same as above, and the borrow is unique.
    unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, len) }
}

impl Heap {
    pub fn new(words: usize, max_words: usize) -> Heap {
        let limit = words.max(HEADER_WORDS * 4).min(max_words.max(HEADER_WORDS * 4));
        Heap {
            space: Vec::with_capacity(limit),
            limit,
            max_words,
            slots: Vec::new(),
            free: Vec::new(),
            stats: HeapStats::default(),
        }
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_words: self.space.len(),
            capacity: self.limit,
            ..self.stats
        }
    }

    pub fn used_words(&self) -> usize {
        self.space.len()
    }

    pub fn capacity(&self) -> usize {
        self.limit
    }

    pub(crate) fn fits(&self, words: usize) -> bool {
        self.space.len().saturating_add(words) <= self.limit
    }

    /// Raises the space limit so `needed` more words fit, doubling each time.
    pub(crate) fn grow(&mut self, needed: usize) -> Result<()> {
        let required = self
            .space
            .len()
            .checked_add(needed)
            .filter(|required| *required <= self.max_words)
            .ok_or(RuntimeError::OutOfMemory("heap limit reached"))?;

        let mut limit = self.limit.max(1);
        while limit < required {
            limit = limit.saturating_mul(2);
        }
        self.limit = limit.min(self.max_words);
        self.space.reserve(self.limit - self.space.len());
        tracing::trace!(capacity = self.limit, "heap grown");
        Ok(())
    }

    /// Grows after a collection that left the space more than half full.
    pub(crate) fn adjust(&mut self) {
        if self.space.len() * 2 > self.limit && self.limit < self.max_words {
            self.limit = self.limit.saturating_mul(2).min(self.max_words);
            tracing::trace!(capacity = self.limit, "heap grown after collection");
        }
    }

    /// Bump allocates an object with a zeroed payload. The caller must have made
    /// room with [Heap::fits] or [Heap::grow].
    pub(crate) fn allocate(&mut self, kind: Kind, type_id: u32, len: u32) -> Handle {
        let header = Header::new(kind, type_id, len);
        let words = header.total_words();
        debug_assert!(self.fits(words));

        let offset = self.space.len();
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.live = true;
                slot.offset = offset;
                Handle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    offset,
                    live: true,
                });
                Handle {
                    index,
                    generation: 0,
                }
            }
        };

        self.space.push(header.0);
        self.space.push(Word::from(kind.value(handle)).0);
        self.space.resize(offset + words, 0);
        self.stats.allocated_words += words;
        self.stats.live_objects += 1;
        handle
    }

    pub fn is_live(&self, handle: Handle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.live && slot.generation == handle.generation)
    }

    /// Current offset of the object named by `handle`. A stale handle is a broken
    /// rooting invariant somewhere in the runtime.
    pub(crate) fn offset(&self, handle: Handle) -> usize {
        assert!(self.is_live(handle), "stale handle {handle:?}");
        self.slots[handle.index as usize].offset
    }

    pub(crate) fn header(&self, handle: Handle) -> Header {
        Header(self.space[self.offset(handle)])
    }

    pub(crate) fn field(&self, handle: Handle, index: usize) -> Value {
        let offset = self.offset(handle);
        debug_assert!(index < Header(self.space[offset]).len());
        Value::from(Word(self.space[offset + HEADER_WORDS + index]))
    }

    pub(crate) fn set_field(&mut self, handle: Handle, index: usize, value: Value) {
        let offset = self.offset(handle);
        debug_assert!(index < Header(self.space[offset]).len());
        self.space[offset + HEADER_WORDS + index] = Word::from(value).0;
    }

    pub(crate) fn bytes(&self, handle: Handle) -> &[u8] {
        let offset = self.offset(handle);
        bytes_of(&self.space, offset, Header(self.space[offset]).len())
    }

    pub(crate) fn bytes_mut(&mut self, handle: Handle) -> &mut [u8] {
        let offset = self.offset(handle);
        let len = Header(self.space[offset]).len();
        bytes_of_mut(&mut self.space, offset, len)
    }

    pub(crate) fn begin_collection(&mut self) -> Tracer<'_> {
        Tracer::new(self)
    }

    /// Walks the whole space and checks that every object is named by a live slot
    /// and that every field refers to a live object.
    pub(crate) fn verify(&self) -> std::result::Result<(), String> {
        let mut offset = 0;
        let mut objects = 0;
        while offset < self.space.len() {
            let header = Header(self.space[offset]);
            if header.is_forwarded() {
                return Err(format!("forwarding header left at offset {offset}"));
            }

            let own = Value::from(Word(self.space[offset + 1]));
            let handle = own
                .handle()
                .ok_or_else(|| format!("object at offset {offset} names {own:?}"))?;
            if !self.is_live(handle) || self.slots[handle.index as usize].offset != offset {
                return Err(format!("object at offset {offset} has a stale slot {handle:?}"));
            }
            if header.kind().value(handle) != own {
                return Err(format!("object at offset {offset} changed kind"));
            }

            if header.kind() != Kind::CValue {
                for i in 0..header.len() {
                    let field = Value::from(Word(self.space[offset + HEADER_WORDS + i]));
                    self.check(field)?;
                }
            }

            offset += header.total_words();
            objects += 1;
        }

        let live = self.slots.iter().filter(|slot| slot.live).count();
        if live != objects {
            return Err(format!("{live} live slots for {objects} objects"));
        }
        Ok(())
    }

    pub(crate) fn check(&self, value: Value) -> std::result::Result<(), String> {
        match value.handle() {
            Some(handle) if !self.is_live(handle) => Err(format!("dangling reference {value:?}")),
            _ => Ok(()),
        }
    }
}
