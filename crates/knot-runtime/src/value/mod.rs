//! This module describes the values that the knot runtime manipulates. [Value] is
//! the fat representation used on the rust side, while [Word] is the tagged 64 bit
//! form stored inside of heap objects.

pub mod word;

pub use word::Word;

use crate::symbol::SymbolId;

/// Index of a host procedure inside of the runtime's builtin table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuiltinId(pub(crate) u32);

/// A generation checked reference to a heap object. The handle itself never
/// changes when the collector moves the object, only the slot it names does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Handle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Immediate constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Special {
    True,
    False,
    Nil,
    Eof,
    Unbound,
}

/// Largest integer that still fits in an immediate fixnum.
pub const FIXNUM_MAX: i64 = (1 << 60) - 1;

/// Smallest integer that still fits in an immediate fixnum.
pub const FIXNUM_MIN: i64 = -(1 << 60);

/// A lisp value. Immediates are stored inline, everything else is a [Handle]
/// into the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Fixnum(i64),
    Cons(Handle),
    Vector(Handle),
    CValue(Handle),
    Closure(Handle),
    Symbol(SymbolId),
    Builtin(BuiltinId),
    Special(Special),
}

impl Value {
    pub const T: Value = Value::Special(Special::True);
    pub const F: Value = Value::Special(Special::False);
    pub const NIL: Value = Value::Special(Special::Nil);
    pub const EOF: Value = Value::Special(Special::Eof);
    pub const UNBOUND: Value = Value::Special(Special::Unbound);

    /// Creates a fixnum, returns [None] if the integer is outside of the
    /// immediate range.
    pub fn fixnum(n: i64) -> Option<Value> {
        if (FIXNUM_MIN..=FIXNUM_MAX).contains(&n) {
            Some(Value::Fixnum(n))
        } else {
            None
        }
    }

    pub fn from_bool(value: bool) -> Value {
        if value {
            Value::T
        } else {
            Value::F
        }
    }

    /// Only `F` is false.
    pub fn is_true(&self) -> bool {
        *self != Value::F
    }

    pub fn is_nil(&self) -> bool {
        *self == Value::NIL
    }

    pub fn is_cons(&self) -> bool {
        matches!(self, Value::Cons(_))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Value::Symbol(_))
    }

    pub fn is_fixnum(&self) -> bool {
        matches!(self, Value::Fixnum(_))
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Value::Vector(_))
    }

    pub fn is_cvalue(&self) -> bool {
        matches!(self, Value::CValue(_))
    }

    pub fn is_closure(&self) -> bool {
        matches!(self, Value::Closure(_))
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Value::Builtin(_))
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Value::Special(Special::True | Special::False))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Builtin(_))
    }

    /// The heap handle of this value, if it lives on the heap.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Value::Cons(h) | Value::Vector(h) | Value::CValue(h) | Value::Closure(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_fixnum(&self) -> Option<i64> {
        match self {
            Value::Fixnum(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<SymbolId> {
        match self {
            Value::Symbol(id) => Some(*id),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Fixnum(_) => "fixnum",
            Value::Cons(_) => "cons",
            Value::Vector(_) => "vector",
            Value::CValue(_) => "cvalue",
            Value::Closure(_) => "closure",
            Value::Symbol(_) => "symbol",
            Value::Builtin(_) => "builtin",
            Value::Special(Special::True | Special::False) => "boolean",
            Value::Special(Special::Nil) => "nil",
            Value::Special(Special::Eof) => "eof",
            Value::Special(Special::Unbound) => "unbound",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::from_bool(value)
    }
}

impl From<SymbolId> for Value {
    fn from(value: SymbolId) -> Self {
        Value::Symbol(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixnum_range() {
        assert_eq!(Value::fixnum(FIXNUM_MAX), Some(Value::Fixnum(FIXNUM_MAX)));
        assert_eq!(Value::fixnum(FIXNUM_MAX + 1), None);
        assert_eq!(Value::fixnum(FIXNUM_MIN - 1), None);
    }

    #[test]
    fn test_only_false_is_false() {
        assert!(!Value::F.is_true());
        assert!(Value::NIL.is_true());
        assert!(Value::Fixnum(0).is_true());
    }
}
