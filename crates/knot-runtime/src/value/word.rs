//! Tagged word encoding. Every heap field is a [Word]: the low three bits are the
//! tag and the remaining 61 bits are the payload.

use std::fmt::Debug;

use super::{BuiltinId, Handle, Special, Value};
use crate::symbol::SymbolId;

pub const FIXNUM: u64 = 0b000;
pub const CONS: u64 = 0b001;
pub const VECTOR: u64 = 0b010;
pub const CVALUE: u64 = 0b011;
pub const SYMBOL: u64 = 0b100;
pub const CLOSURE: u64 = 0b101;
pub const BUILTIN: u64 = 0b110;
pub const SPECIAL: u64 = 0b111;

pub const MASK: u64 = 0b111;

/// Sub tags of [SPECIAL], stored above the tag bits.
pub const TRUE: u64 = SPECIAL;
pub const FALSE: u64 = (1 << 3) | SPECIAL;
pub const NIL: u64 = (2 << 3) | SPECIAL;
pub const EOF: u64 = (3 << 3) | SPECIAL;
pub const UNBOUND: u64 = (4 << 3) | SPECIAL;

pub const GENERATION_BITS: u32 = 29;
pub const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

const INDEX_SHIFT: u32 = 3;
const GENERATION_SHIFT: u32 = 35;

/// A compact tagged value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Word(pub u64);

impl Word {
    pub fn tag(self) -> u64 {
        self.0 & MASK
    }

    fn handle(self) -> Handle {
        Handle {
            index: (self.0 >> INDEX_SHIFT) as u32,
            generation: (self.0 >> GENERATION_SHIFT) as u32,
        }
    }
}

fn pack(handle: Handle, tag: u64) -> u64 {
    ((handle.generation as u64 & GENERATION_MASK as u64) << GENERATION_SHIFT)
        | ((handle.index as u64) << INDEX_SHIFT)
        | tag
}

impl From<Value> for Word {
    fn from(value: Value) -> Self {
        Word(match value {
            Value::Fixnum(n) => ((n as u64) << 3) | FIXNUM,
            Value::Cons(h) => pack(h, CONS),
            Value::Vector(h) => pack(h, VECTOR),
            Value::CValue(h) => pack(h, CVALUE),
            Value::Closure(h) => pack(h, CLOSURE),
            Value::Symbol(SymbolId(id)) => ((id as u64) << 3) | SYMBOL,
            Value::Builtin(BuiltinId(id)) => ((id as u64) << 3) | BUILTIN,
            Value::Special(Special::True) => TRUE,
            Value::Special(Special::False) => FALSE,
            Value::Special(Special::Nil) => NIL,
            Value::Special(Special::Eof) => EOF,
            Value::Special(Special::Unbound) => UNBOUND,
        })
    }
}

impl From<Word> for Value {
    fn from(word: Word) -> Self {
        match word.tag() {
            FIXNUM => Value::Fixnum((word.0 as i64) >> 3),
            CONS => Value::Cons(word.handle()),
            VECTOR => Value::Vector(word.handle()),
            CVALUE => Value::CValue(word.handle()),
            CLOSURE => Value::Closure(word.handle()),
            SYMBOL => Value::Symbol(SymbolId((word.0 >> 3) as u32)),
            BUILTIN => Value::Builtin(BuiltinId((word.0 >> 3) as u32)),
            _ => match word.0 {
                TRUE => Value::T,
                FALSE => Value::F,
                NIL => Value::NIL,
                EOF => Value::EOF,
                _ => Value::UNBOUND,
            },
        }
    }
}

impl Debug for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Word({:#x} = {:?})", self.0, Value::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FIXNUM_MIN;

    #[test]
    fn test_negative_fixnum_keeps_sign() {
        let word = Word::from(Value::Fixnum(FIXNUM_MIN));
        assert_eq!(word.tag(), FIXNUM);
        assert_eq!(Value::from(word), Value::Fixnum(FIXNUM_MIN));
    }

    #[test]
    fn test_handle_keeps_generation() {
        let handle = Handle {
            index: u32::MAX,
            generation: GENERATION_MASK,
        };
        let word = Word::from(Value::Closure(handle));
        assert_eq!(word.tag(), CLOSURE);
        assert_eq!(Value::from(word), Value::Closure(handle));
    }

    #[test]
    fn test_specials_are_distinct() {
        let words = [TRUE, FALSE, NIL, EOF, UNBOUND];
        for (i, a) in words.iter().enumerate() {
            assert_eq!(a & MASK, SPECIAL);
            for b in &words[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(Value::from(Word(NIL)), Value::NIL);
    }
}
