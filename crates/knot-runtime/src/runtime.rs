//! The runtime context. Every piece of state, heap, symbols, types, vm stack and
//! builtins, hangs off a [Runtime] value that is passed around explicitly.

use crate::builtins::{self, Builtin, Prim};
use crate::config::Config;
use crate::error::{Result, RuntimeError};
use crate::heap::{object_words, Heap, HeapStats, Kind};
use crate::symbol::{SymbolId, SymbolTable};
use crate::types::{TypeId, TypeRegistry};
use crate::value::{BuiltinId, Special, Value};
use crate::vm::{Arity, Machine};

/// Symbols the runtime itself needs to recognize.
pub(crate) struct Known {
    pub(crate) array: SymbolId,
    pub(crate) enumeration: SymbolId,
    pub(crate) quote: SymbolId,
    pub(crate) string: SymbolId,
    pub(crate) wcstring: SymbolId,
    pub(crate) type_error: SymbolId,
    pub(crate) arg_count_error: SymbolId,
    pub(crate) bounds_error: SymbolId,
    pub(crate) out_of_memory: SymbolId,
    pub(crate) unbound_error: SymbolId,
    pub(crate) user_error: SymbolId,
    pub(crate) divide_by_zero: SymbolId,
    pub(crate) malformed_type: SymbolId,
    pub(crate) invalid_bytecode: SymbolId,
}

impl Known {
    fn new(symbols: &mut SymbolTable) -> Known {
        Known {
            array: symbols.intern("array"),
            enumeration: symbols.intern("enum"),
            quote: symbols.intern("quote"),
            string: symbols.intern("*string-type*"),
            wcstring: symbols.intern("*wcstring-type*"),
            type_error: symbols.intern("type-error"),
            arg_count_error: symbols.intern("arg-count-error"),
            bounds_error: symbols.intern("bounds-error"),
            out_of_memory: symbols.intern("out-of-memory"),
            unbound_error: symbols.intern("unbound-error"),
            user_error: symbols.intern("user-error"),
            divide_by_zero: symbols.intern("divide-by-zero"),
            malformed_type: symbols.intern("malformed-type"),
            invalid_bytecode: symbols.intern("invalid-bytecode"),
        }
    }
}

/// Types registered at start-up.
#[derive(Debug, Default)]
pub(crate) struct Primitives {
    pub(crate) numeric: [TypeId; 10],
    pub(crate) char: TypeId,
    pub(crate) wchar: TypeId,
    pub(crate) string: TypeId,
    pub(crate) wcstring: TypeId,
    pub(crate) bytes: TypeId,
    pub(crate) table: TypeId,
}

pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) symbols: SymbolTable,
    pub(crate) types: TypeRegistry,
    pub(crate) machine: Machine,
    pub(crate) builtins: Vec<Builtin>,
    pub(crate) known: Known,
    pub(crate) prims: Primitives,
    pub(crate) config: Config,
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(Config::default()).expect("the default configuration fits the start-up types")
    }
}

impl Runtime {
    pub fn new(config: Config) -> Result<Runtime> {
        let mut symbols = SymbolTable::default();
        let known = Known::new(&mut symbols);
        let mut rt = Runtime {
            heap: Heap::new(config.heap_words, config.max_heap_words),
            symbols,
            types: TypeRegistry::default(),
            machine: Machine::default(),
            builtins: Vec::new(),
            known,
            prims: Primitives::default(),
            config,
        };
        rt.types_init()?;
        builtins::register_intrinsics(&mut rt)?;
        tracing::debug!(
            symbols = rt.symbols.len(),
            types = rt.types.len(),
            builtins = rt.builtins.len(),
            "runtime initialized"
        );
        Ok(rt)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn intern(&mut self, name: &str) -> Value {
        Value::Symbol(self.symbol(name))
    }

    pub fn symbol(&mut self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbol_name(&self, symbol: SymbolId) -> &str {
        self.symbols.name(symbol)
    }

    /// The raw global cell, `UNBOUND` when nothing was ever assigned.
    pub fn global(&self, symbol: SymbolId) -> Value {
        self.symbols.entry(symbol).value
    }

    pub fn global_value(&self, symbol: SymbolId) -> Result<Value> {
        match self.global(symbol) {
            Value::Special(Special::Unbound) => Err(self.unbound_error(symbol)),
            value => Ok(value),
        }
    }

    pub fn set_global(&mut self, symbol: SymbolId, value: Value) -> Result<()> {
        if self.symbols.entry(symbol).constant {
            return Err(self.type_error("set!", "non-constant symbol", Value::Symbol(symbol)));
        }
        self.symbols.entry_mut(symbol).value = value;
        Ok(())
    }

    pub fn define_constant(&mut self, symbol: SymbolId, value: Value) -> Result<()> {
        self.set_global(symbol, value)?;
        self.symbols.entry_mut(symbol).constant = true;
        Ok(())
    }

    /// Registers a host procedure and binds it to the global `name`.
    pub fn intrinsic(&mut self, name: &'static str, call: Prim) -> Result<Value> {
        let value = Value::Builtin(BuiltinId(self.builtins.len() as u32));
        self.builtins.push(Builtin { name, call });
        let symbol = self.symbols.intern(name);
        self.set_global(symbol, value)?;
        Ok(value)
    }

    pub fn builtins(&self) -> &[Builtin] {
        &self.builtins
    }

    pub fn builtin(&self, id: BuiltinId) -> &Builtin {
        &self.builtins[id.0 as usize]
    }

    /// Pins a value on the vm stack, the only place values are rooted besides
    /// globals.
    pub fn push(&mut self, value: Value) -> Result<()> {
        if self.machine.stack.len() >= self.config.max_stack {
            return Err(RuntimeError::OutOfMemory("stack overflow"));
        }
        self.machine.stack.push(value);
        Ok(())
    }

    /// Pops the top of the stack. Popping past the bottom is a bug in the
    /// caller: it panics in debug builds and yields `UNBOUND` otherwise.
    pub fn pop(&mut self) -> Value {
        debug_assert!(!self.machine.stack.is_empty(), "pop on an empty stack");
        self.machine.stack.pop().unwrap_or(Value::UNBOUND)
    }

    pub fn stack_depth(&self) -> usize {
        self.machine.stack.len()
    }

    /// Makes room for `words`, collecting and then growing the heap if needed.
    pub(crate) fn reserve(&mut self, words: usize) -> Result<()> {
        if words > self.config.max_heap_words {
            return Err(RuntimeError::OutOfMemory("allocation exceeds the heap limit"));
        }
        if self.config.gc_stress || !self.heap.fits(words) {
            self.collect();
        }
        if !self.heap.fits(words) {
            self.heap.grow(words)?;
        }
        Ok(())
    }

    fn allocate(&mut self, kind: Kind, len: usize) -> Result<crate::value::Handle> {
        let words = object_words(kind, len)
            .filter(|_| len <= u32::MAX as usize)
            .ok_or(RuntimeError::OutOfMemory("object is too large"))?;
        self.reserve(words)?;
        Ok(self.heap.allocate(kind, 0, len as u32))
    }

    pub fn alloc_cons(&mut self, car: Value, cdr: Value) -> Result<Value> {
        self.machine.stack.extend([car, cdr]);
        let handle = self.allocate(Kind::Cons, 2);
        self.machine.stack.truncate(self.machine.stack.len() - 2);
        let handle = handle?;
        self.heap.set_field(handle, 0, car);
        self.heap.set_field(handle, 1, cdr);
        Ok(Value::Cons(handle))
    }

    pub fn alloc_vector(&mut self, len: usize, fill: Value) -> Result<Value> {
        self.machine.stack.push(fill);
        let handle = self.allocate(Kind::Vector, len);
        self.machine.stack.pop();
        let handle = handle?;
        for i in 0..len {
            self.heap.set_field(handle, i, fill);
        }
        Ok(Value::Vector(handle))
    }

    pub fn alloc_closure(&mut self, code: Value, consts: Value, env: Value, arity: Arity) -> Result<Value> {
        self.machine.stack.extend([code, consts, env]);
        let handle = self.allocate(Kind::Closure, 4);
        self.machine.stack.truncate(self.machine.stack.len() - 3);
        let handle = handle?;
        self.heap.set_field(handle, 0, code);
        self.heap.set_field(handle, 1, consts);
        self.heap.set_field(handle, 2, env);
        self.heap.set_field(handle, 3, Value::Fixnum(arity.encode()));
        Ok(Value::Closure(handle))
    }

    /// Runs a full collection. Roots are the vm stack and frames, the global
    /// value cells and the type registry keys.
    pub fn collect(&mut self) -> HeapStats {
        let before = self.heap.used_words();
        let mut tracer = self.heap.begin_collection();
        for value in self.machine.stack.iter_mut() {
            *value = tracer.relocate(*value);
        }
        self.machine.relocate_frames(&mut tracer);
        self.symbols.relocate(&mut tracer);
        self.types.relocate_type_table(&mut tracer);
        let stats = tracer.finish(&self.types);
        tracing::debug!(
            before,
            after = stats.live_words,
            capacity = stats.capacity,
            collections = stats.collections,
            "collection finished"
        );
        stats
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub fn is_live(&self, value: Value) -> bool {
        value.handle().map_or(true, |handle| self.heap.is_live(handle))
    }

    /// Checks the heap and every root for dangling references.
    pub fn verify_heap(&self) -> std::result::Result<(), String> {
        self.heap.verify()?;
        for value in &self.machine.stack {
            self.heap.check(*value)?;
        }
        for value in self.machine.frame_roots() {
            self.heap.check(value)?;
        }
        for (_, entry) in self.symbols.iter() {
            self.heap.check(entry.value)?;
        }
        for (_, info) in self.types.iter() {
            self.heap.check(info.descriptor)?;
        }
        Ok(())
    }

    pub fn car(&self, value: Value) -> Result<Value> {
        match value {
            Value::Cons(handle) => Ok(self.heap.field(handle, 0)),
            _ => Err(self.type_error("car", "cons", value)),
        }
    }

    pub fn cdr(&self, value: Value) -> Result<Value> {
        match value {
            Value::Cons(handle) => Ok(self.heap.field(handle, 1)),
            _ => Err(self.type_error("cdr", "cons", value)),
        }
    }

    pub fn set_car(&mut self, cell: Value, value: Value) -> Result<()> {
        match cell {
            Value::Cons(handle) => {
                self.heap.set_field(handle, 0, value);
                Ok(())
            }
            _ => Err(self.type_error("set-car!", "cons", cell)),
        }
    }

    pub fn set_cdr(&mut self, cell: Value, value: Value) -> Result<()> {
        match cell {
            Value::Cons(handle) => {
                self.heap.set_field(handle, 1, value);
                Ok(())
            }
            _ => Err(self.type_error("set-cdr!", "cons", cell)),
        }
    }

    pub fn vector_len(&self, value: Value) -> Result<usize> {
        match value {
            Value::Vector(handle) => Ok(self.heap.header(handle).len()),
            _ => Err(self.type_error("vector-length", "vector", value)),
        }
    }

    pub fn vector_ref(&self, vector: Value, index: Value) -> Result<Value> {
        let len = self.vector_len(vector)?;
        let i = self.index(index, len, "aref", vector)?;
        match vector {
            Value::Vector(handle) => Ok(self.heap.field(handle, i)),
            _ => Err(self.type_error("aref", "vector", vector)),
        }
    }

    pub fn vector_set(&mut self, vector: Value, index: Value, value: Value) -> Result<()> {
        let len = self.vector_len(vector)?;
        let i = self.index(index, len, "aset!", vector)?;
        match vector {
            Value::Vector(handle) => {
                self.heap.set_field(handle, i, value);
                Ok(())
            }
            _ => Err(self.type_error("aset!", "vector", vector)),
        }
    }

    /// Builds a proper list out of `items`.
    pub fn list(&mut self, items: &[Value]) -> Result<Value> {
        let base = self.machine.stack.len();
        self.machine.stack.extend_from_slice(items);
        self.machine.stack.push(Value::NIL);
        let mut result = Ok(Value::NIL);
        for i in (0..items.len()).rev() {
            let tail = self.machine.stack[base + items.len()];
            match self.alloc_cons(self.machine.stack[base + i], tail) {
                Ok(cell) => self.machine.stack[base + items.len()] = cell,
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }
        if result.is_ok() {
            result = Ok(self.machine.stack[base + items.len()]);
        }
        self.machine.stack.truncate(base);
        result
    }

    /// Length of a proper list, [None] for improper or circular lists.
    pub fn list_length(&self, list: Value) -> Option<usize> {
        let (mut slow, mut fast) = (list, list);
        let mut len = 0;
        loop {
            for _ in 0..2 {
                match fast {
                    Value::Special(Special::Nil) => return Some(len),
                    Value::Cons(handle) => {
                        fast = self.heap.field(handle, 1);
                        len += 1;
                    }
                    _ => return None,
                }
            }
            if let Value::Cons(handle) = slow {
                slow = self.heap.field(handle, 1);
            }
            if fast == slow {
                return None;
            }
        }
    }

    pub fn list_to_vec(&self, list: Value) -> Option<Vec<Value>> {
        let len = self.list_length(list)?;
        let mut items = Vec::with_capacity(len);
        let mut cursor = list;
        while let Value::Cons(handle) = cursor {
            items.push(self.heap.field(handle, 0));
            cursor = self.heap.field(handle, 1);
        }
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "pop on an empty stack")]
    fn test_unbalanced_pop_panics() {
        let mut rt = Runtime::default();
        rt.push(Value::T).unwrap();
        rt.pop();
        rt.pop();
    }

    #[test]
    fn test_globals() {
        let mut rt = Runtime::default();
        let Value::Symbol(x) = rt.intern("x") else {
            unreachable!()
        };
        assert!(rt.global_value(x).is_err());
        rt.set_global(x, Value::Fixnum(1)).unwrap();
        assert_eq!(rt.global_value(x).unwrap(), Value::Fixnum(1));
        rt.define_constant(x, Value::Fixnum(2)).unwrap();
        assert!(rt.set_global(x, Value::Fixnum(3)).is_err());
    }

    #[test]
    fn test_list_helpers() {
        let mut rt = Runtime::default();
        let list = rt
            .list(&[Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)])
            .unwrap();
        assert_eq!(rt.list_length(list), Some(3));
        assert_eq!(rt.list_length(Value::NIL), Some(0));
        assert_eq!(rt.list_length(Value::Fixnum(1)), None);

        rt.push(list).unwrap();
        let improper = rt.alloc_cons(Value::Fixnum(0), Value::Fixnum(1)).unwrap();
        assert_eq!(rt.list_length(improper), None);

        let last = rt.cdr(rt.cdr(list).unwrap()).unwrap();
        rt.set_cdr(last, list).unwrap();
        assert_eq!(rt.list_length(list), None);
        assert_eq!(rt.list_to_vec(list), None);
    }

    #[test]
    fn test_car_of_nil_is_a_type_error() {
        let rt = Runtime::default();
        let error = rt.car(Value::NIL).unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::TypeError);
    }

    #[test]
    fn test_vector_bounds() {
        let mut rt = Runtime::default();
        let vector = rt.alloc_vector(3, Value::NIL).unwrap();
        rt.vector_set(vector, Value::Fixnum(2), Value::T).unwrap();
        assert_eq!(rt.vector_ref(vector, Value::Fixnum(2)).unwrap(), Value::T);
        for index in [3, 4, -1] {
            let error = rt.vector_ref(vector, Value::Fixnum(index)).unwrap_err();
            assert_eq!(error.kind(), crate::ErrorKind::BoundsError);
        }
    }

    #[test]
    fn test_allocation_larger_than_the_limit() {
        let mut rt = Runtime::new(Config::default().with_max_heap_words(1 << 16)).unwrap();
        let error = rt.alloc_vector(1 << 20, Value::NIL).unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::OutOfMemory);
        let error = rt.alloc_vector(usize::MAX, Value::NIL).unwrap_err();
        assert_eq!(error.kind(), crate::ErrorKind::OutOfMemory);
    }
}
