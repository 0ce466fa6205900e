//! Cheney style copying. Roots are handed to [Tracer::relocate], which copies the
//! object into to-space on first sight and leaves a forwarding header behind. The
//! scan then walks to-space breadth first, relocating every field it finds.

use super::{bytes_of, bytes_of_mut, Header, Heap, HeapStats, Kind, HEADER_WORDS};
use crate::types::{TypeId, TypeRegistry};
use crate::value::word::GENERATION_MASK;
use crate::value::{Handle, Value, Word};

pub struct Tracer<'a> {
    heap: &'a mut Heap,
    to: Vec<u64>,
}

impl<'a> Tracer<'a> {
    pub(crate) fn new(heap: &'a mut Heap) -> Self {
        let to = Vec::with_capacity(heap.limit);
        Self { heap, to }
    }

    /// Makes `value` survive the current collection and returns it. Handles are
    /// stable, so the returned value is always the one passed in, callers still
    /// store it back so a moving representation stays possible.
    pub fn relocate(&mut self, value: Value) -> Value {
        if let Some(handle) = value.handle() {
            self.evacuate(handle);
        }
        value
    }

    fn evacuate(&mut self, handle: Handle) -> usize {
        let offset = self.heap.offset(handle);
        let header = Header(self.heap.space[offset]);
        if header.is_forwarded() {
            return header.forward_offset();
        }

        let new = self.to.len();
        let total = header.total_words();
        self.to
            .extend_from_slice(&self.heap.space[offset..offset + total]);
        self.heap.space[offset] = Header::forwarded(new).0;
        new
    }

    /// The to-space bytes of a cvalue, evacuating it if needed. Used by relocate
    /// hooks that keep values inside of their payload.
    pub fn cvalue_bytes_mut(&mut self, value: Value) -> &mut [u8] {
        let Value::CValue(handle) = value else {
            return &mut [];
        };
        let new = self.evacuate(handle);
        let len = Header(self.to[new]).len();
        bytes_of_mut(&mut self.to, new, len)
    }

    /// Reads the `index`th word stored in a cvalue payload.
    pub fn cvalue_word(&mut self, value: Value, index: usize) -> Value {
        let bytes = self.cvalue_bytes_mut(value);
        let mut raw = [0; 8];
        raw.copy_from_slice(&bytes[index * 8..index * 8 + 8]);
        Value::from(Word(u64::from_ne_bytes(raw)))
    }

    pub fn set_cvalue_word(&mut self, value: Value, index: usize, word: Value) {
        let bytes = self.cvalue_bytes_mut(value);
        bytes[index * 8..index * 8 + 8].copy_from_slice(&Word::from(word).0.to_ne_bytes());
    }

    fn scan(&mut self, types: &TypeRegistry) {
        let mut scan = 0;
        while scan < self.to.len() {
            let header = Header(self.to[scan]);
            match header.kind() {
                Kind::CValue => {
                    let type_id = TypeId(header.type_id());
                    if let Some(relocate) = types.info(type_id).vtable.relocate {
                        let own = Value::from(Word(self.to[scan + 1]));
                        relocate(self, own);
                    }
                }
                Kind::Cons | Kind::Vector | Kind::Closure => {
                    for i in 0..header.len() {
                        let field = Value::from(Word(self.to[scan + HEADER_WORDS + i]));
                        self.relocate(field);
                    }
                }
            }
            scan += header.total_words();
        }
    }

    /// Finishes the collection: scans to-space, releases every slot whose object
    /// was not reached, and flips the spaces.
    pub(crate) fn finish(mut self, types: &TypeRegistry) -> HeapStats {
        self.scan(types);

        let Tracer { heap, to } = self;
        let mut freed = 0;
        for (index, slot) in heap.slots.iter_mut().enumerate() {
            if !slot.live {
                continue;
            }

            let header = Header(heap.space[slot.offset]);
            if header.is_forwarded() {
                slot.offset = header.forward_offset();
                continue;
            }

            if header.kind() == Kind::CValue {
                let type_id = TypeId(header.type_id());
                if let Some(free) = types.info(type_id).vtable.free {
                    free(type_id, bytes_of(&heap.space, slot.offset, header.len()));
                }
            }

            slot.live = false;
            slot.generation = (slot.generation + 1) & GENERATION_MASK;
            heap.free.push(index as u32);
            freed += 1;
        }

        heap.space = to;
        heap.stats.collections += 1;
        heap.stats.freed_objects += freed;
        heap.stats.live_objects -= freed;
        heap.adjust();
        heap.stats()
    }
}
