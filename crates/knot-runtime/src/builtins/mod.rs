//! Host procedures callable from bytecode. A builtin sees its arguments through a
//! [CallScope], still pinned on the vm stack, so it may allocate freely.

pub mod base;
pub mod string;
pub mod table;

use std::fmt::Debug;

use crate::error::{Result, RuntimeError};
use crate::runtime::Runtime;
use crate::value::Value;

pub type Prim = fn(CallScope<'_>) -> Result<Value>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub call: Prim,
}

impl Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin").field("name", &self.name).finish()
    }
}

pub struct CallScope<'a> {
    pub rt: &'a mut Runtime,
    base: usize,
    argc: usize,
    pub name: &'static str,
}

impl<'a> CallScope<'a> {
    pub(crate) fn new(rt: &'a mut Runtime, base: usize, argc: usize, name: &'static str) -> Self {
        Self { rt, base, argc, name }
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    /// The `nth` argument, `UNBOUND` when it was not passed. Arguments are read
    /// from the stack, so they are current even after a collection.
    pub fn at(&self, nth: usize) -> Value {
        if nth < self.argc {
            self.rt.machine.stack[self.base + nth]
        } else {
            Value::UNBOUND
        }
    }

    pub fn args(&self) -> Vec<Value> {
        self.rt.machine.stack[self.base..self.base + self.argc].to_vec()
    }

    pub fn assert_arity(&self, size: usize) -> Result<()> {
        if self.argc != size {
            Err(RuntimeError::arity(self.name, size, self.argc))
        } else {
            Ok(())
        }
    }

    pub fn assert_at_least(&self, size: usize) -> Result<()> {
        if self.argc < size {
            Err(RuntimeError::arity_at_least(self.name, size, self.argc))
        } else {
            Ok(())
        }
    }

    pub fn assert_between(&self, min: usize, max: usize) -> Result<()> {
        if self.argc < min || self.argc > max {
            Err(RuntimeError::ArgCount {
                op: self.name,
                min,
                max: Some(max),
                got: self.argc,
            })
        } else {
            Ok(())
        }
    }

    pub fn type_error(&self, expected: &'static str, value: Value) -> RuntimeError {
        self.rt.type_error(self.name, expected, value)
    }

    pub fn bounds_error(&self, value: Value, index: Value) -> RuntimeError {
        self.rt.bounds_error(self.name, value, index)
    }

    pub fn fixnum_at(&self, nth: usize) -> Result<i64> {
        let value = self.at(nth);
        value.as_fixnum().ok_or_else(|| self.type_error("fixnum", value))
    }

    /// The `nth` argument as a string index, `default` when it was not passed.
    pub fn index_at(&self, nth: usize, default: usize) -> Result<usize> {
        match self.at(nth) {
            Value::Special(crate::value::Special::Unbound) => Ok(default),
            Value::Fixnum(n) if n >= 0 => Ok(n as usize),
            Value::Fixnum(_) => Err(self.bounds_error(self.at(0), self.at(nth))),
            other => Err(self.type_error("fixnum", other)),
        }
    }

    /// Pins `value` for the rest of the call and returns its slot.
    pub fn push(&mut self, value: Value) -> Result<usize> {
        self.rt.push(value)?;
        Ok(self.rt.stack_depth() - 1)
    }

    pub fn slot(&self, slot: usize) -> Value {
        self.rt.machine.stack[slot]
    }

    pub fn set_slot(&mut self, slot: usize, value: Value) {
        self.rt.machine.stack[slot] = value;
    }
}

/// Registers every builtin of a fresh runtime.
pub(crate) fn register_intrinsics(rt: &mut Runtime) -> Result<()> {
    base::register(rt)?;
    string::register(rt)?;
    table::register(rt)?;
    Ok(())
}
