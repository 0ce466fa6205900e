//! Equivalence, structural equality, ordering and hashing of values.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use fxhash::{FxHashSet, FxHasher};

use crate::runtime::Runtime;
use crate::types::TypeId;
use crate::value::{Handle, Value, Word};

/// How deep [Runtime::compare] and [Runtime::hash_equal] descend into nested
/// structure.
const DEPTH_LIMIT: usize = 64;

/// How many elements of a single list or vector [Runtime::hash_equal] looks at.
const HASH_SPAN: usize = 64;

impl Runtime {
    /// `eq`, plus boxed scalars and enums of the same type holding the same
    /// value. Strings and arrays are only `eqv` when they are `eq`.
    pub fn eqv(&self, a: Value, b: Value) -> bool {
        if a == b {
            return true;
        }
        match (a, b) {
            (Value::CValue(x), Value::CValue(y)) => {
                let ty = self.heap.header(x).type_id();
                ty == self.heap.header(y).type_id()
                    && self.types.info(TypeId(ty)).numtype.is_some()
                    && self.heap.bytes(x) == self.heap.bytes(y)
            }
            _ => false,
        }
    }

    /// Arrays, strings included, of the same type with the same contents.
    fn equal_arrays(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::CValue(x), Value::CValue(y)) => {
                let ty = self.heap.header(x).type_id();
                ty == self.heap.header(y).type_id()
                    && self.types.info(TypeId(ty)).is_array()
                    && self.heap.bytes(x) == self.heap.bytes(y)
            }
            _ => false,
        }
    }

    /// Structural equality. Cyclic structure terminates: a pair of objects
    /// already being compared is assumed equal. Nesting depth is only bounded
    /// by memory.
    pub fn equal(&self, a: Value, b: Value) -> bool {
        let mut seen: FxHashSet<(Handle, Handle)> = FxHashSet::default();
        let mut pending = vec![(a, b)];
        while let Some((a, b)) = pending.pop() {
            if a == b {
                continue;
            }
            match (a, b) {
                (Value::Cons(x), Value::Cons(y)) => {
                    if seen.insert((x, y)) {
                        pending.push((self.heap.field(x, 1), self.heap.field(y, 1)));
                        pending.push((self.heap.field(x, 0), self.heap.field(y, 0)));
                    }
                }
                (Value::Vector(x), Value::Vector(y)) => {
                    if !seen.insert((x, y)) {
                        continue;
                    }
                    let len = self.heap.header(x).len();
                    if len != self.heap.header(y).len() {
                        return false;
                    }
                    for i in (0..len).rev() {
                        pending.push((self.heap.field(x, i), self.heap.field(y, i)));
                    }
                }
                _ if self.eqv(a, b) || self.equal_arrays(a, b) => {}
                _ => return false,
            }
        }
        true
    }

    /// A total order used by sorting and `compare`. Numbers compare by value,
    /// strings by bytes, symbols by name, pairs and vectors element-wise, and
    /// values of unrelated kinds by kind.
    pub fn compare(&self, a: Value, b: Value) -> Ordering {
        self.compare_in(a, b, 0)
    }

    fn compare_in(&self, a: Value, b: Value, depth: usize) -> Ordering {
        if a == b || depth > DEPTH_LIMIT {
            return Ordering::Equal;
        }
        if let (Some(x), Some(y)) = (self.to_num(a), self.to_num(b)) {
            return x.compare(y).unwrap_or(Ordering::Equal);
        }
        if let (Some(x), Some(y)) = (self.string_bytes(a), self.string_bytes(b)) {
            return x.cmp(y);
        }

        match (a, b) {
            (Value::Symbol(x), Value::Symbol(y)) => self.symbols.name(x).cmp(self.symbols.name(y)),
            (Value::Cons(_), Value::Cons(_)) => {
                let (mut a, mut b) = (a, b);
                for _ in 0..=DEPTH_LIMIT * HASH_SPAN {
                    match (a, b) {
                        (Value::Cons(x), Value::Cons(y)) => {
                            let ordering = self.compare_in(self.heap.field(x, 0), self.heap.field(y, 0), depth + 1);
                            if ordering != Ordering::Equal {
                                return ordering;
                            }
                            a = self.heap.field(x, 1);
                            b = self.heap.field(y, 1);
                        }
                        _ => return self.compare_in(a, b, depth + 1),
                    }
                }
                Ordering::Equal
            }
            (Value::Vector(x), Value::Vector(y)) => {
                let (xl, yl) = (self.heap.header(x).len(), self.heap.header(y).len());
                for i in 0..xl.min(yl) {
                    let ordering = self.compare_in(self.heap.field(x, i), self.heap.field(y, i), depth + 1);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                xl.cmp(&yl)
            }
            (Value::CValue(x), Value::CValue(y)) => {
                let (tx, ty) = (self.heap.header(x).type_id(), self.heap.header(y).type_id());
                tx.cmp(&ty).then_with(|| self.heap.bytes(x).cmp(self.heap.bytes(y)))
            }
            _ => kind_rank(a)
                .cmp(&kind_rank(b))
                .then_with(|| Word::from(a).0.cmp(&Word::from(b).0)),
        }
    }

    /// Hash consistent with [Runtime::equal]. Heap addresses never take part,
    /// so the hash of a value survives collections.
    pub fn hash_equal(&self, value: Value) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash_into(value, &mut hasher, 0);
        hasher.finish()
    }

    /// Hash consistent with `eq`.
    pub fn hash_eq(&self, value: Value) -> u64 {
        fxhash::hash64(&Word::from(value).0)
    }

    fn hash_into(&self, value: Value, hasher: &mut FxHasher, depth: usize) {
        if depth > DEPTH_LIMIT {
            return;
        }
        kind_rank(value).hash(hasher);
        match value {
            Value::Cons(_) => {
                let mut cursor = value;
                for _ in 0..HASH_SPAN {
                    let Value::Cons(handle) = cursor else {
                        break;
                    };
                    self.hash_into(self.heap.field(handle, 0), hasher, depth + 1);
                    cursor = self.heap.field(handle, 1);
                }
                if !cursor.is_cons() {
                    self.hash_into(cursor, hasher, depth + 1);
                }
            }
            Value::Vector(handle) => {
                let len = self.heap.header(handle).len();
                len.hash(hasher);
                for i in 0..len.min(HASH_SPAN) {
                    self.hash_into(self.heap.field(handle, i), hasher, depth + 1);
                }
            }
            Value::CValue(handle) => {
                self.heap.header(handle).type_id().hash(hasher);
                self.heap.bytes(handle).hash(hasher);
            }
            // Closures are only `eqv` to themselves, and their handle is stable.
            _ => Word::from(value).0.hash(hasher),
        }
    }
}

fn kind_rank(value: Value) -> u8 {
    match value {
        Value::Special(_) => 0,
        Value::Fixnum(_) => 1,
        Value::CValue(_) => 2,
        Value::Symbol(_) => 3,
        Value::Cons(_) => 4,
        Value::Vector(_) => 5,
        Value::Builtin(_) => 6,
        Value::Closure(_) => 7,
    }
}

#[cfg(test)]
mod tests {
    use crate::number::Num;
    use crate::{Runtime, Value};
    use std::cmp::Ordering;

    #[test]
    fn test_eqv_on_boxed_numbers() {
        let mut rt = Runtime::default();
        let a = rt.double(1.5).unwrap();
        rt.push(a).unwrap();
        let b = rt.double(1.5).unwrap();
        assert_ne!(a, b);
        assert!(rt.eqv(a, b));
        let c = rt.number(Num::Int(1 << 62)).unwrap();
        assert!(!rt.eqv(a, c));
    }

    #[test]
    fn test_equal_on_fresh_lists() {
        let mut rt = Runtime::default();
        let items = [Value::Fixnum(1), Value::Fixnum(2)];
        let a = rt.list(&items).unwrap();
        rt.push(a).unwrap();
        let b = rt.list(&items).unwrap();
        assert!(!rt.eqv(a, b));
        assert!(rt.equal(a, b));
        assert_eq!(rt.hash_equal(a), rt.hash_equal(b));
    }

    #[test]
    fn test_strings_are_equal_but_not_eqv() {
        let mut rt = Runtime::default();
        let a = rt.string("abc").unwrap();
        rt.push(a).unwrap();
        let b = rt.string("abc").unwrap();
        rt.push(b).unwrap();
        assert!(!rt.eqv(a, b));
        assert!(rt.equal(a, b));
        let c = rt.string("abd").unwrap();
        assert!(!rt.equal(a, c));

        let x = rt.wchar('x').unwrap();
        rt.push(x).unwrap();
        let y = rt.wchar('x').unwrap();
        assert!(rt.eqv(x, y));
    }

    #[test]
    fn test_equal_handles_deep_nesting() {
        let mut rt = Runtime::default();
        let mut chains = [Value::NIL, Value::NIL];
        for chain in chains.iter_mut() {
            rt.push(Value::NIL).unwrap();
            for _ in 0..200_000 {
                *chain = rt.alloc_cons(*chain, Value::NIL).unwrap();
                rt.pop();
                rt.push(*chain).unwrap();
            }
        }
        assert!(rt.equal(chains[0], chains[1]));

        let longer = rt.alloc_cons(chains[1], Value::NIL).unwrap();
        assert!(!rt.equal(chains[0], longer));
    }

    #[test]
    fn test_equal_terminates_on_cycles() {
        let mut rt = Runtime::default();
        let a = rt.list(&[Value::Fixnum(1)]).unwrap();
        rt.push(a).unwrap();
        rt.set_cdr(a, a).unwrap();
        let b = rt.list(&[Value::Fixnum(1)]).unwrap();
        rt.push(b).unwrap();
        rt.set_cdr(b, b).unwrap();

        assert!(rt.equal(a, b));
        rt.hash_equal(a);
        assert_eq!(rt.compare(a, b), Ordering::Equal);
    }

    #[test]
    fn test_compare() {
        let mut rt = Runtime::default();
        assert_eq!(rt.compare(Value::Fixnum(1), Value::Fixnum(2)), Ordering::Less);
        let half = rt.double(0.5).unwrap();
        assert_eq!(rt.compare(half, Value::Fixnum(1)), Ordering::Less);

        let apple = rt.intern("apple");
        let banana = rt.intern("banana");
        assert_eq!(rt.compare(banana, apple), Ordering::Greater);

        let x = rt.string("abc").unwrap();
        rt.push(x).unwrap();
        let y = rt.string("abd").unwrap();
        assert_eq!(rt.compare(x, y), Ordering::Less);
    }

    #[test]
    fn test_hash_is_stable_across_collections() {
        let mut rt = Runtime::default();
        let s = rt.string("key").unwrap();
        rt.push(s).unwrap();
        let list = rt.list(&[s, Value::Fixnum(3)]).unwrap();
        rt.push(list).unwrap();
        let before = rt.hash_equal(list);
        rt.collect();
        assert_eq!(rt.hash_equal(list), before);
    }
}
