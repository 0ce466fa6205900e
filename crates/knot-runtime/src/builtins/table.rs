//! Hash tables with `equal` keys. A table is an opaque cvalue holding two words:
//! the backing vector and the entry count. The backing vector stores keys and
//! values interleaved and is probed linearly, `UNBOUND` marks an empty slot.

use std::fmt::Write;

use crate::builtins::CallScope;
use crate::error::{Result, RuntimeError};
use crate::heap::Tracer;
use crate::runtime::Runtime;
use crate::types::CValueVTable;
use crate::value::{Handle, Value};

const BACKING: usize = 0;
const COUNT: usize = 1;
const MIN_CAPACITY: usize = 8;

fn relocate_table(tracer: &mut Tracer<'_>, table: Value) {
    let backing = tracer.cvalue_word(table, BACKING);
    let moved = tracer.relocate(backing);
    tracer.set_cvalue_word(table, BACKING, moved);
}

fn print_table(rt: &Runtime, table: Value, out: &mut dyn Write) -> std::fmt::Result {
    out.write_str("#table(")?;
    for (i, (key, value)) in rt.table_entries(table).into_iter().enumerate() {
        if i > 0 {
            out.write_char(' ')?;
        }
        write!(out, "{} {}", rt.display(key), rt.display(value))?;
    }
    out.write_char(')')
}

impl Runtime {
    pub fn table_new(&mut self) -> Result<Value> {
        let table = self.alloc_cvalue(self.prims.table, 16)?;
        self.set_cvalue_word(table, BACKING, Value::NIL);
        self.set_cvalue_word(table, COUNT, Value::Fixnum(0));
        Ok(table)
    }

    pub fn is_table(&self, value: Value) -> bool {
        self.cvalue_type(value) == Some(self.prims.table)
    }

    fn check_table(&self, op: &'static str, table: Value) -> Result<()> {
        if self.is_table(table) {
            Ok(())
        } else {
            Err(self.type_error(op, "table", table))
        }
    }

    pub fn table_count(&self, table: Value) -> Result<usize> {
        self.check_table("table.count", table)?;
        Ok(self.count_of(table))
    }

    fn count_of(&self, table: Value) -> usize {
        self.cvalue_word(table, COUNT)
            .and_then(|count| count.as_fixnum())
            .unwrap_or(0) as usize
    }

    /// The backing vector and its slot count, [None] before the first insert.
    fn backing(&self, table: Value) -> Option<(Handle, usize)> {
        match self.cvalue_word(table, BACKING)? {
            Value::Vector(handle) => Some((handle, self.heap.header(handle).len() / 2)),
            _ => None,
        }
    }

    /// Slot holding `key`, or the empty slot where it would go.
    fn probe(&self, backing: Handle, capacity: usize, key: Value) -> (usize, bool) {
        let mask = capacity - 1;
        let mut i = self.hash_equal(key) as usize & mask;
        loop {
            let slot = self.heap.field(backing, 2 * i);
            if slot == Value::UNBOUND {
                return (i, false);
            }
            if self.equal(slot, key) {
                return (i, true);
            }
            i = (i + 1) & mask;
        }
    }

    fn lookup(&self, table: Value, key: Value) -> Option<Value> {
        let (backing, capacity) = self.backing(table)?;
        match self.probe(backing, capacity, key) {
            (i, true) => Some(self.heap.field(backing, 2 * i + 1)),
            _ => None,
        }
    }

    pub fn table_get(&self, table: Value, key: Value) -> Result<Option<Value>> {
        self.check_table("get", table)?;
        Ok(self.lookup(table, key))
    }

    pub fn table_entries(&self, table: Value) -> Vec<(Value, Value)> {
        let Some((backing, capacity)) = self.backing(table) else {
            return Vec::new();
        };
        (0..capacity)
            .map(|i| (self.heap.field(backing, 2 * i), self.heap.field(backing, 2 * i + 1)))
            .filter(|(key, _)| *key != Value::UNBOUND)
            .collect()
    }

    /// Inserts or replaces an entry, growing the backing vector first when the
    /// table is half full.
    pub fn table_put(&mut self, table: Value, key: Value, value: Value) -> Result<()> {
        self.check_table("put!", table)?;
        let base = self.stack_depth();
        self.push(table)?;
        self.push(key)?;
        self.push(value)?;
        let result = self.table_insert(table, key, value);
        self.machine.stack.truncate(base);
        result
    }

    fn table_insert(&mut self, table: Value, key: Value, value: Value) -> Result<()> {
        let count = self.count_of(table);
        let capacity = self.backing(table).map_or(0, |(_, capacity)| capacity);
        if (count + 1) * 2 > capacity {
            self.table_resize(table, (capacity * 2).max(MIN_CAPACITY))?;
        }

        let Some((backing, capacity)) = self.backing(table) else {
            return Err(RuntimeError::OutOfMemory("table has no backing storage"));
        };
        let (i, found) = self.probe(backing, capacity, key);
        self.heap.set_field(backing, 2 * i, key);
        self.heap.set_field(backing, 2 * i + 1, value);
        if !found {
            self.set_cvalue_word(table, COUNT, Value::Fixnum(count as i64 + 1));
        }
        Ok(())
    }

    fn table_resize(&mut self, table: Value, capacity: usize) -> Result<()> {
        let fresh = self.alloc_vector(capacity * 2, Value::UNBOUND)?;
        let Value::Vector(handle) = fresh else {
            return Ok(());
        };
        for (key, value) in self.table_entries(table) {
            let (i, _) = self.probe(handle, capacity, key);
            self.heap.set_field(handle, 2 * i, key);
            self.heap.set_field(handle, 2 * i + 1, value);
        }
        self.set_cvalue_word(table, BACKING, fresh);
        tracing::trace!(capacity, "table resized");
        Ok(())
    }

    /// Removes `key`, shifting later entries of its probe run back so lookups
    /// never stop early. Returns whether the key was present.
    pub fn table_delete(&mut self, table: Value, key: Value) -> Result<bool> {
        self.check_table("del!", table)?;
        let Some((backing, capacity)) = self.backing(table) else {
            return Ok(false);
        };
        let (mut hole, found) = self.probe(backing, capacity, key);
        if !found {
            return Ok(false);
        }

        let mask = capacity - 1;
        let mut j = hole;
        loop {
            j = (j + 1) & mask;
            let next = self.heap.field(backing, 2 * j);
            if next == Value::UNBOUND {
                break;
            }
            let home = self.hash_equal(next) as usize & mask;
            let stays = if hole <= j {
                hole < home && home <= j
            } else {
                hole < home || home <= j
            };
            if !stays {
                let value = self.heap.field(backing, 2 * j + 1);
                self.heap.set_field(backing, 2 * hole, next);
                self.heap.set_field(backing, 2 * hole + 1, value);
                hole = j;
            }
        }
        self.heap.set_field(backing, 2 * hole, Value::UNBOUND);
        self.heap.set_field(backing, 2 * hole + 1, Value::UNBOUND);

        let count = self.count_of(table);
        self.set_cvalue_word(table, COUNT, Value::Fixnum(count as i64 - 1));
        Ok(true)
    }
}

fn table_at(scope: &CallScope<'_>, nth: usize) -> Result<Value> {
    let table = scope.at(nth);
    if scope.rt.is_table(table) {
        Ok(table)
    } else {
        Err(scope.type_error("table", table))
    }
}

/// table : (k v)... -> table
pub fn table(mut scope: CallScope<'_>) -> Result<Value> {
    if scope.argc() % 2 != 0 {
        return Err(RuntimeError::arity(scope.name, scope.argc() + 1, scope.argc()));
    }
    let table = scope.rt.table_new()?;
    let slot = scope.push(table)?;
    for i in (0..scope.argc()).step_by(2) {
        let (table, key, value) = (scope.slot(slot), scope.at(i), scope.at(i + 1));
        scope.rt.table_put(table, key, value)?;
    }
    Ok(scope.slot(slot))
}

/// table? : a -> bool
pub fn is_table(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    Ok(Value::from_bool(scope.rt.is_table(scope.at(0))))
}

/// put! : table -> k -> v -> table
pub fn put(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(3)?;
    let table = table_at(&scope, 0)?;
    let (key, value) = (scope.at(1), scope.at(2));
    scope.rt.table_put(table, key, value)?;
    Ok(table)
}

/// get : table -> k -> v? -> v
pub fn get(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_between(2, 3)?;
    let table = table_at(&scope, 0)?;
    let key = scope.at(1);
    match (scope.rt.table_get(table, key)?, scope.at(2)) {
        (Some(value), _) => Ok(value),
        (None, Value::UNBOUND) => Err(scope.bounds_error(table, key)),
        (None, default) => Ok(default),
    }
}

/// has? : table -> k -> bool
pub fn has(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(2)?;
    let table = table_at(&scope, 0)?;
    let key = scope.at(1);
    Ok(Value::from_bool(scope.rt.table_get(table, key)?.is_some()))
}

/// del! : table -> k -> table
pub fn del(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(2)?;
    let table = table_at(&scope, 0)?;
    let key = scope.at(1);
    if !scope.rt.table_delete(table, key)? {
        return Err(scope.bounds_error(table, key));
    }
    Ok(table)
}

/// table.count : table -> fixnum
pub fn count(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    let table = table_at(&scope, 0)?;
    Ok(Value::Fixnum(scope.rt.table_count(table)? as i64))
}

pub(crate) fn register(rt: &mut Runtime) -> Result<()> {
    let name = rt.symbols.intern("table");
    let vtable = CValueVTable {
        print: Some(print_table),
        relocate: Some(relocate_table),
        free: None,
    };
    rt.prims.table = rt.define_opaque_type(name, 16, vtable, None)?;

    rt.intrinsic("table", table)?;
    rt.intrinsic("table?", is_table)?;
    rt.intrinsic("put!", put)?;
    rt.intrinsic("get", get)?;
    rt.intrinsic("has?", has)?;
    rt.intrinsic("del!", del)?;
    rt.intrinsic("table.count", count)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{Config, ErrorKind, Runtime, Value};

    #[test]
    fn test_put_get_delete() {
        let mut rt = Runtime::default();
        let table = rt.table_new().unwrap();
        rt.push(table).unwrap();
        for i in 0..100 {
            rt.table_put(table, Value::Fixnum(i), Value::Fixnum(i * i)).unwrap();
        }
        assert_eq!(rt.table_count(table).unwrap(), 100);
        assert_eq!(rt.table_get(table, Value::Fixnum(9)).unwrap(), Some(Value::Fixnum(81)));

        for i in (0..100).step_by(2) {
            assert!(rt.table_delete(table, Value::Fixnum(i)).unwrap());
        }
        assert!(!rt.table_delete(table, Value::Fixnum(0)).unwrap());
        assert_eq!(rt.table_count(table).unwrap(), 50);
        for i in 0..100 {
            let expected = (i % 2 == 1).then_some(Value::Fixnum(i * i));
            assert_eq!(rt.table_get(table, Value::Fixnum(i)).unwrap(), expected);
        }
    }

    #[test]
    fn test_keys_compare_with_equal() {
        let mut rt = Runtime::default();
        let table = rt.table_new().unwrap();
        rt.push(table).unwrap();
        let key = rt.string("name").unwrap();
        rt.table_put(table, key, Value::T).unwrap();
        let fresh = rt.string("name").unwrap();
        assert_eq!(rt.table_get(table, fresh).unwrap(), Some(Value::T));
    }

    #[test]
    fn test_backing_survives_collections() {
        let mut rt = Runtime::new(Config::default().with_gc_stress(true)).unwrap();
        let table = rt.table_new().unwrap();
        rt.push(table).unwrap();
        for i in 0..20 {
            let key = rt.list(&[Value::Fixnum(i)]).unwrap();
            rt.table_put(table, key, Value::Fixnum(i)).unwrap();
        }
        rt.collect();
        rt.verify_heap().unwrap();
        let key = rt.list(&[Value::Fixnum(7)]).unwrap();
        assert_eq!(rt.table_get(table, key).unwrap(), Some(Value::Fixnum(7)));
    }

    #[test]
    fn test_missing_key_is_a_bounds_error() {
        let mut rt = Runtime::default();
        let get = rt.intern("get");
        let get = rt.eval(get).unwrap();
        let table = rt.table_new().unwrap();
        rt.push(table).unwrap();

        let error = rt.apply(get, &[table, Value::Fixnum(1)]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BoundsError);
        let fallback = rt.apply(get, &[table, Value::Fixnum(1), Value::F]).unwrap();
        assert_eq!(fallback, Value::F);
    }
}
