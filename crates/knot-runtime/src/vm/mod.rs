//! The bytecode interpreter. Arguments live on the value stack above the called
//! function, `let` bindings live in heap allocated environment vectors of the
//! shape `[parent, v1, ..., vn]`, and closures capture the environment in effect
//! when the `closure` instruction runs.

pub mod asm;
mod eval;
pub mod opcode;

use std::cmp::Ordering;

use crate::builtins::CallScope;
use crate::error::{Result, RuntimeError};
use crate::heap::Tracer;
use crate::number::Num;
use crate::runtime::Runtime;
use crate::value::{Handle, Value};
use opcode::Op;

/// Number of arguments a closure accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),

    /// At least this many, the rest is collected into a list.
    Variadic(usize),
}

impl Arity {
    pub(crate) fn encode(self) -> i64 {
        match self {
            Arity::Fixed(n) => n as i64,
            Arity::Variadic(required) => -(required as i64) - 1,
        }
    }

    pub(crate) fn decode(n: i64) -> Arity {
        if n >= 0 {
            Arity::Fixed(n as usize)
        } else {
            Arity::Variadic((-n - 1) as usize)
        }
    }

    pub fn accepts(self, nargs: usize) -> bool {
        match self {
            Arity::Fixed(n) => nargs == n,
            Arity::Variadic(required) => nargs >= required,
        }
    }

    fn mismatch(self, got: usize) -> RuntimeError {
        match self {
            Arity::Fixed(n) => RuntimeError::arity("closure", n, got),
            Arity::Variadic(required) => RuntimeError::arity_at_least("closure", required, got),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Frame {
    closure: Value,
    code: Handle,
    consts: Value,
    env: Value,
    pc: usize,

    /// Stack index of the first argument, the function sits right below it.
    bp: usize,
    nargs: usize,

    /// Frame of a `try` body, returning from it pops the innermost handler.
    catch: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Handler {
    /// Stack index of the handler function.
    sp: usize,
    frames: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Machine {
    pub(crate) stack: Vec<Value>,
    frames: Vec<Frame>,
    handlers: Vec<Handler>,
    max_frames: usize,
}

#[derive(Clone, Copy)]
struct Mark {
    stack: usize,
    frames: usize,
    handlers: usize,
}

impl Machine {
    fn mark(&self) -> Mark {
        Mark {
            stack: self.stack.len(),
            frames: self.frames.len(),
            handlers: self.handlers.len(),
        }
    }

    fn restore(&mut self, mark: Mark) {
        self.stack.truncate(mark.stack);
        self.frames.truncate(mark.frames);
        self.handlers.truncate(mark.handlers);
    }

    pub(crate) fn relocate_frames(&mut self, tracer: &mut Tracer<'_>) {
        for frame in self.frames.iter_mut() {
            frame.closure = tracer.relocate(frame.closure);
            frame.consts = tracer.relocate(frame.consts);
            frame.env = tracer.relocate(frame.env);
            tracer.relocate(Value::CValue(frame.code));
        }
    }

    pub(crate) fn frame_roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.frames
            .iter()
            .flat_map(|frame| [frame.closure, Value::CValue(frame.code), frame.consts, frame.env])
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Tail,
    Catch,
}

enum Flow {
    Next,

    /// The frame the current run started with returned this value.
    Return(Value),
}

fn invalid(message: impl Into<String>) -> RuntimeError {
    RuntimeError::InvalidBytecode(message.into())
}

impl Runtime {
    /// Runs a closure to completion.
    pub fn execute(&mut self, closure: Value, args: &[Value]) -> Result<Value> {
        if !closure.is_closure() {
            return Err(self.type_error("execute", "closure", closure));
        }
        self.apply(closure, args)
    }

    /// Calls any function value. Re-entrant: builtins may call back into the vm.
    /// On error the vm is put back in the state it had before the call.
    pub fn apply(&mut self, function: Value, args: &[Value]) -> Result<Value> {
        let mark = self.machine.mark();
        let result = self.apply_pinned(function, args);
        match result {
            Ok(_) => self.machine.stack.truncate(mark.stack),
            Err(_) => self.machine.restore(mark),
        }
        result
    }

    fn apply_pinned(&mut self, function: Value, args: &[Value]) -> Result<Value> {
        self.push(function)?;
        for arg in args {
            self.push(*arg)?;
        }
        self.invoke(args.len())
    }

    /// Calls the function sitting below `nargs` arguments on the stack and
    /// returns its result, popping the function and arguments.
    pub(crate) fn invoke(&mut self, nargs: usize) -> Result<Value> {
        let entry = self.machine.frames.len();
        self.call(nargs, Mode::Normal, entry)?;
        if self.machine.frames.len() > entry {
            self.run(entry)
        } else {
            Ok(self.pop())
        }
    }

    pub fn frame_depth(&self) -> usize {
        self.machine.frames.len()
    }

    /// Highest frame depth reached so far.
    pub fn max_frame_depth(&self) -> usize {
        self.machine.max_frames
    }

    fn run(&mut self, entry: usize) -> Result<Value> {
        loop {
            match self.dispatch(entry) {
                Ok(value) => return Ok(value),
                Err(error) => self.unwind(entry, error)?,
            }
        }
    }

    /// Transfers control to the innermost handler installed by this run, or
    /// hands the error back when there is none.
    fn unwind(&mut self, entry: usize, error: RuntimeError) -> Result<()> {
        let handler = match self.machine.handlers.last() {
            Some(handler) if error.is_recoverable() && handler.frames > entry => *handler,
            _ => return Err(error),
        };

        self.machine.handlers.pop();
        self.machine.frames.truncate(handler.frames);
        self.machine.stack.truncate(handler.sp + 1);
        tracing::trace!(%error, depth = handler.sp, "condition caught");

        let condition = self.condition_value(&error);
        self.machine.stack.push(condition);
        match self.call(1, Mode::Normal, entry) {
            Ok(_) => Ok(()),
            Err(error) => self.unwind(entry, error),
        }
    }

    fn call(&mut self, nargs: usize, mode: Mode, entry: usize) -> Result<Flow> {
        let sp = self.machine.stack.len();
        if nargs >= sp {
            return Err(invalid("call without a function on the stack"));
        }
        let bp = sp - nargs;
        let function = self.machine.stack[bp - 1];

        match function {
            Value::Closure(handle) => {
                let arity = Arity::decode(self.heap.field(handle, 3).as_fixnum().unwrap_or(0));
                if !arity.accepts(nargs) {
                    return Err(arity.mismatch(nargs));
                }
                let code = match self.heap.field(handle, 0) {
                    Value::CValue(code) => code,
                    other => return Err(invalid(format!("closure without code: {other:?}"))),
                };
                let consts = self.heap.field(handle, 1);
                let env = self.heap.field(handle, 2);

                if mode == Mode::Tail {
                    let Some(old_bp) = self.machine.frames.last().map(|frame| frame.bp) else {
                        return Err(invalid("tail call outside of a frame"));
                    };
                    self.machine.stack.drain(old_bp - 1..bp - 1);
                    if let Some(frame) = self.machine.frames.last_mut() {
                        frame.closure = function;
                        frame.code = code;
                        frame.consts = consts;
                        frame.env = env;
                        frame.pc = 0;
                        frame.nargs = nargs;
                    }
                    return Ok(Flow::Next);
                }

                if sp >= self.config.max_stack || self.machine.frames.len() >= self.config.max_stack {
                    return Err(RuntimeError::OutOfMemory("stack overflow"));
                }
                self.machine.frames.push(Frame {
                    closure: function,
                    code,
                    consts,
                    env,
                    pc: 0,
                    bp,
                    nargs,
                    catch: mode == Mode::Catch,
                });
                self.machine.max_frames = self.machine.max_frames.max(self.machine.frames.len());
                Ok(Flow::Next)
            }
            Value::Builtin(id) => {
                let builtin = *self.builtin(id);
                let result = (builtin.call)(CallScope::new(self, bp, nargs, builtin.name))?;
                self.machine.stack.truncate(bp - 1);
                match mode {
                    Mode::Normal => {
                        self.machine.stack.push(result);
                        Ok(Flow::Next)
                    }
                    Mode::Tail => Ok(self.return_from_frame(result, entry)),
                    Mode::Catch => {
                        if let Some(handler) = self.machine.handlers.pop() {
                            self.machine.stack.truncate(handler.sp);
                        }
                        self.machine.stack.push(result);
                        Ok(Flow::Next)
                    }
                }
            }
            other => Err(self.type_error("apply", "function", other)),
        }
    }

    fn return_from_frame(&mut self, result: Value, entry: usize) -> Flow {
        if let Some(frame) = self.machine.frames.pop() {
            self.machine.stack.truncate(frame.bp - 1);
            if frame.catch {
                if let Some(handler) = self.machine.handlers.pop() {
                    self.machine.stack.truncate(handler.sp);
                }
            }
        }
        if self.machine.frames.len() == entry {
            Flow::Return(result)
        } else {
            self.machine.stack.push(result);
            Flow::Next
        }
    }

    fn frame(&self) -> Result<&Frame> {
        self.machine
            .frames
            .last()
            .ok_or_else(|| invalid("no active frame"))
    }

    fn frame_mut(&mut self) -> Result<&mut Frame> {
        self.machine
            .frames
            .last_mut()
            .ok_or_else(|| invalid("no active frame"))
    }

    fn fetch(&mut self) -> Result<u8> {
        let frame = self
            .machine
            .frames
            .last_mut()
            .ok_or_else(|| invalid("no active frame"))?;
        let byte = *self
            .heap
            .bytes(frame.code)
            .get(frame.pc)
            .ok_or_else(|| invalid(format!("pc {} out of range", frame.pc)))?;
        frame.pc += 1;
        Ok(byte)
    }

    fn fetch_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut bytes = [0; N];
        for byte in bytes.iter_mut() {
            *byte = self.fetch()?;
        }
        Ok(bytes)
    }

    fn fetch_i16(&mut self) -> Result<isize> {
        Ok(i16::from_le_bytes(self.fetch_array()?) as isize)
    }

    fn fetch_i32(&mut self) -> Result<isize> {
        Ok(i32::from_le_bytes(self.fetch_array()?) as isize)
    }

    fn fetch_u32(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.fetch_array()?) as usize)
    }

    fn jump(&mut self, offset: isize) -> Result<()> {
        let frame = self.frame_mut()?;
        frame.pc = frame
            .pc
            .checked_add_signed(offset)
            .ok_or_else(|| invalid("jump before the start of the code"))?;
        Ok(())
    }

    fn top(&self) -> Result<Value> {
        self.machine
            .stack
            .last()
            .copied()
            .ok_or_else(|| invalid("stack underflow"))
    }

    fn set_top(&mut self, value: Value) -> Result<()> {
        let top = self
            .machine
            .stack
            .last_mut()
            .ok_or_else(|| invalid("stack underflow"))?;
        *top = value;
        Ok(())
    }

    fn pop_value(&mut self) -> Result<Value> {
        self.machine.stack.pop().ok_or_else(|| invalid("stack underflow"))
    }

    fn push_value(&mut self, value: Value) {
        self.machine.stack.push(value);
    }

    /// The last `n` stack values.
    fn top_n(&self, n: usize) -> Result<&[Value]> {
        let len = self.machine.stack.len();
        if n > len {
            return Err(invalid("stack underflow"));
        }
        Ok(&self.machine.stack[len - n..])
    }

    fn constant(&self, index: usize) -> Result<Value> {
        match self.frame()?.consts {
            Value::Vector(handle) if index < self.heap.header(handle).len() => {
                Ok(self.heap.field(handle, index))
            }
            _ => Err(invalid(format!("constant {index} out of range"))),
        }
    }

    fn global_constant(&self, index: usize) -> Result<crate::SymbolId> {
        self.constant(index)?
            .as_symbol()
            .ok_or_else(|| invalid(format!("constant {index} is not a symbol")))
    }

    fn argument_slot(&self, index: usize) -> Result<usize> {
        let frame = self.frame()?;
        if index >= frame.nargs {
            return Err(invalid(format!("argument {index} out of range")));
        }
        Ok(frame.bp + index)
    }

    /// The environment vector `depth` levels up, and checks `index` against it.
    fn closed_slot(&self, depth: usize, index: usize) -> Result<(Handle, usize)> {
        let mut env = self.frame()?.env;
        for _ in 0..depth {
            env = match env {
                Value::Vector(handle) => self.heap.field(handle, 0),
                _ => return Err(invalid(format!("no environment at depth {depth}"))),
            };
        }
        match env {
            Value::Vector(handle) if index + 1 < self.heap.header(handle).len() => Ok((handle, index + 1)),
            _ => Err(invalid(format!("closed variable {depth}:{index} out of range"))),
        }
    }

    fn arith(&mut self, op: Op) -> Result<()> {
        let name = match op {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            _ => "/",
        };
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        let x = self.to_num(a).ok_or_else(|| self.type_error(name, "number", a))?;
        let y = self.to_num(b).ok_or_else(|| self.type_error(name, "number", b))?;
        let result = match op {
            Op::Add => x.add(y),
            Op::Sub => x.sub(y),
            Op::Mul => x.mul(y),
            _ => x.div(y).ok_or(RuntimeError::DivideByZero { op: name })?,
        };
        let value = self.number(result)?;
        self.push_value(value);
        Ok(())
    }

    fn numbers(&self, op: &'static str, a: Value, b: Value) -> Result<(Num, Num)> {
        let x = self.to_num(a).ok_or_else(|| self.type_error(op, "number", a))?;
        let y = self.to_num(b).ok_or_else(|| self.type_error(op, "number", b))?;
        Ok((x, y))
    }

    fn predicate(&mut self, op: Op) -> Result<()> {
        let v = self.pop_value()?;
        let result = match op {
            Op::Atomp => !v.is_cons(),
            Op::Not => v == Value::F,
            Op::Nullp => v.is_nil(),
            Op::Booleanp => v.is_boolean(),
            Op::Symbolp => v.is_symbol(),
            Op::Numberp => self.is_number(v),
            Op::Pairp => v.is_cons(),
            Op::Builtinp => v.is_builtin(),
            Op::Vectorp => v.is_vector(),
            Op::Fixnump => v.is_fixnum(),
            _ => match v {
                Value::Symbol(symbol) => self.global(symbol) != Value::UNBOUND,
                _ => return Err(self.type_error("bound?", "symbol", v)),
            },
        };
        self.push_value(Value::from_bool(result));
        Ok(())
    }

    /// Pops the trailing list of an `apply` and pushes its elements, returning
    /// the resulting argument count.
    fn spread(&mut self, n: usize) -> Result<usize> {
        if n == 0 {
            return Err(invalid("apply without an argument list"));
        }
        let list = self.pop_value()?;
        let items = self
            .list_to_vec(list)
            .ok_or_else(|| self.type_error("apply", "list", list))?;
        for item in &items {
            self.push(*item)?;
        }
        Ok(n - 1 + items.len())
    }

    fn aref(&mut self, container: Value, index: Value) -> Result<Value> {
        match container {
            Value::Vector(_) => self.vector_ref(container, index),
            Value::CValue(_) if self.is_array(container) => self.array_ref(container, index),
            _ => Err(self.type_error("aref", "sequence", container)),
        }
    }

    fn aset(&mut self, container: Value, index: Value, item: Value) -> Result<()> {
        match container {
            Value::Vector(_) => self.vector_set(container, index, item),
            Value::CValue(_) if self.is_array(container) => self.array_set(container, index, item),
            _ => Err(self.type_error("aset!", "sequence", container)),
        }
    }

    fn dispatch(&mut self, entry: usize) -> Result<Value> {
        loop {
            let op = Op::try_from(self.fetch()?)?;
            match op {
                Op::Nop => {}
                Op::Dup => {
                    let value = self.top()?;
                    self.push_value(value);
                }
                Op::Pop => {
                    self.pop_value()?;
                }
                Op::Call | Op::TCall => {
                    let nargs = self.fetch()? as usize;
                    let mode = if op == Op::TCall { Mode::Tail } else { Mode::Normal };
                    if let Flow::Return(value) = self.call(nargs, mode, entry)? {
                        return Ok(value);
                    }
                }
                Op::Apply | Op::TApply => {
                    let n = self.fetch()? as usize;
                    let nargs = self.spread(n)?;
                    let mode = if op == Op::TApply { Mode::Tail } else { Mode::Normal };
                    if let Flow::Return(value) = self.call(nargs, mode, entry)? {
                        return Ok(value);
                    }
                }
                Op::Jmp => {
                    let offset = self.fetch_i16()?;
                    self.jump(offset)?;
                }
                Op::JmpL => {
                    let offset = self.fetch_i32()?;
                    self.jump(offset)?;
                }
                Op::Brf | Op::Brt | Op::BrfL | Op::BrtL => {
                    let offset = match op {
                        Op::Brf | Op::Brt => self.fetch_i16()?,
                        _ => self.fetch_i32()?,
                    };
                    let falsy = self.pop_value()? == Value::F;
                    if falsy == matches!(op, Op::Brf | Op::BrfL) {
                        self.jump(offset)?;
                    }
                }
                Op::Ret => {
                    let value = self.pop_value()?;
                    if let Flow::Return(value) = self.return_from_frame(value, entry) {
                        return Ok(value);
                    }
                }

                Op::Eq | Op::Eqv | Op::Equal => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let result = match op {
                        Op::Eq => a == b,
                        Op::Eqv => self.eqv(a, b),
                        _ => self.equal(a, b),
                    };
                    self.push_value(Value::from_bool(result));
                }
                Op::Atomp
                | Op::Not
                | Op::Nullp
                | Op::Booleanp
                | Op::Symbolp
                | Op::Numberp
                | Op::Boundp
                | Op::Pairp
                | Op::Builtinp
                | Op::Vectorp
                | Op::Fixnump => self.predicate(op)?,

                Op::Cons => {
                    let [car, cdr] = self.top_n(2)? else {
                        return Err(invalid("stack underflow"));
                    };
                    let (car, cdr) = (*car, *cdr);
                    let cell = self.alloc_cons(car, cdr)?;
                    self.pop_value()?;
                    self.set_top(cell)?;
                }
                Op::List => {
                    let n = self.fetch()? as usize;
                    let items = self.top_n(n)?.to_vec();
                    let list = self.list(&items)?;
                    let len = self.machine.stack.len();
                    self.machine.stack.truncate(len - n);
                    self.push_value(list);
                }
                Op::Car => {
                    let cell = self.top()?;
                    let value = self.car(cell)?;
                    self.set_top(value)?;
                }
                Op::Cdr => {
                    let cell = self.top()?;
                    let value = self.cdr(cell)?;
                    self.set_top(value)?;
                }
                Op::SetCar | Op::SetCdr => {
                    let value = self.pop_value()?;
                    let cell = self.pop_value()?;
                    if op == Op::SetCar {
                        self.set_car(cell, value)?;
                    } else {
                        self.set_cdr(cell, value)?;
                    }
                    self.push_value(value);
                }
                Op::Eval => {
                    let form = self.top()?;
                    let value = self.eval(form)?;
                    self.set_top(value)?;
                }

                Op::Add | Op::Sub | Op::Mul | Op::Div => self.arith(op)?,
                Op::NumEq => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let (x, y) = self.numbers("=", a, b)?;
                    self.push_value(Value::from_bool(x.compare(y) == Some(Ordering::Equal)));
                }
                Op::Lt => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let less = match (self.to_num(a), self.to_num(b)) {
                        (Some(x), Some(y)) => x.compare(y) == Some(Ordering::Less),
                        _ => self.compare(a, b) == Ordering::Less,
                    };
                    self.push_value(Value::from_bool(less));
                }
                Op::Compare => {
                    let b = self.pop_value()?;
                    let a = self.pop_value()?;
                    let ordering = self.compare(a, b) as i64;
                    self.push_value(Value::Fixnum(ordering));
                }

                Op::Vector => {
                    let n = self.fetch()? as usize;
                    self.top_n(n)?;
                    let vector = self.alloc_vector(n, Value::NIL)?;
                    let len = self.machine.stack.len();
                    if let Value::Vector(handle) = vector {
                        for i in 0..n {
                            self.heap.set_field(handle, i, self.machine.stack[len - n + i]);
                        }
                    }
                    self.machine.stack.truncate(len - n);
                    self.push_value(vector);
                }
                Op::Aref => {
                    let index = self.pop_value()?;
                    let container = self.top()?;
                    let value = self.aref(container, index)?;
                    self.set_top(value)?;
                }
                Op::Aset => {
                    let [container, index, item] = self.top_n(3)? else {
                        return Err(invalid("stack underflow"));
                    };
                    let (container, index, item) = (*container, *index, *item);
                    self.aset(container, index, item)?;
                    let len = self.machine.stack.len();
                    self.machine.stack.truncate(len - 2);
                    self.set_top(item)?;
                }

                Op::LoadT => self.push_value(Value::T),
                Op::LoadF => self.push_value(Value::F),
                Op::LoadNil => self.push_value(Value::NIL),
                Op::Load0 => self.push_value(Value::Fixnum(0)),
                Op::Load1 => self.push_value(Value::Fixnum(1)),
                Op::LoadI8 => {
                    let n = self.fetch()? as i8;
                    self.push_value(Value::Fixnum(n as i64));
                }
                Op::LoadV | Op::LoadVL => {
                    let index = match op {
                        Op::LoadV => self.fetch()? as usize,
                        _ => self.fetch_u32()?,
                    };
                    let value = self.constant(index)?;
                    self.push_value(value);
                }
                Op::LoadG | Op::LoadGL => {
                    let index = match op {
                        Op::LoadG => self.fetch()? as usize,
                        _ => self.fetch_u32()?,
                    };
                    let symbol = self.global_constant(index)?;
                    let value = self.global_value(symbol)?;
                    self.push_value(value);
                }
                Op::SetG | Op::SetGL => {
                    let index = match op {
                        Op::SetG => self.fetch()? as usize,
                        _ => self.fetch_u32()?,
                    };
                    let symbol = self.global_constant(index)?;
                    let value = self.top()?;
                    self.set_global(symbol, value)?;
                }
                Op::LoadA => {
                    let index = self.fetch()? as usize;
                    let slot = self.argument_slot(index)?;
                    self.push_value(self.machine.stack[slot]);
                }
                Op::SetA => {
                    let index = self.fetch()? as usize;
                    let slot = self.argument_slot(index)?;
                    self.machine.stack[slot] = self.top()?;
                }
                Op::LoadC => {
                    let depth = self.fetch()? as usize;
                    let index = self.fetch()? as usize;
                    let (env, field) = self.closed_slot(depth, index)?;
                    self.push_value(self.heap.field(env, field));
                }
                Op::SetC => {
                    let depth = self.fetch()? as usize;
                    let index = self.fetch()? as usize;
                    let (env, field) = self.closed_slot(depth, index)?;
                    let value = self.top()?;
                    self.heap.set_field(env, field, value);
                }

                Op::Closure => {
                    let template = self.top()?;
                    let Value::Closure(handle) = template else {
                        return Err(self.type_error("closure", "closure template", template));
                    };
                    let code = self.heap.field(handle, 0);
                    let consts = self.heap.field(handle, 1);
                    let arity = Arity::decode(self.heap.field(handle, 3).as_fixnum().unwrap_or(0));
                    let env = self.frame()?.env;
                    let closure = self.alloc_closure(code, consts, env, arity)?;
                    self.set_top(closure)?;
                }
                Op::TryCatch => {
                    let sp = self.machine.stack.len();
                    if sp < 2 {
                        return Err(invalid("stack underflow"));
                    }
                    self.machine.handlers.push(Handler {
                        sp: sp - 2,
                        frames: self.machine.frames.len(),
                    });
                    self.call(0, Mode::Catch, entry)?;
                }
                Op::Argc => {
                    let n = self.fetch()? as usize;
                    let nargs = self.frame()?.nargs;
                    if nargs != n {
                        return Err(RuntimeError::arity("closure", n, nargs));
                    }
                }
                Op::Vargc => {
                    let n = self.fetch()? as usize;
                    let (bp, nargs) = {
                        let frame = self.frame()?;
                        (frame.bp, frame.nargs)
                    };
                    if nargs < n {
                        return Err(RuntimeError::arity_at_least("closure", n, nargs));
                    }
                    let rest = self.machine.stack[bp + n..bp + nargs].to_vec();
                    let rest = self.list(&rest)?;
                    self.machine.stack.truncate(bp + n);
                    self.push_value(rest);
                    self.frame_mut()?.nargs = n + 1;
                }
                Op::Close => {
                    let frame = self.frame()?;
                    let parent = match frame.env {
                        Value::Vector(handle) => self.heap.field(handle, 0),
                        _ => return Err(invalid("close without an environment")),
                    };
                    self.frame_mut()?.env = parent;
                }
                Op::Let => {
                    let n = self.fetch()? as usize;
                    self.top_n(n)?;
                    let env = self.alloc_vector(n + 1, Value::NIL)?;
                    let parent = self.frame()?.env;
                    let len = self.machine.stack.len();
                    if let Value::Vector(handle) = env {
                        self.heap.set_field(handle, 0, parent);
                        for i in 0..n {
                            self.heap.set_field(handle, i + 1, self.machine.stack[len - n + i]);
                        }
                    }
                    self.machine.stack.truncate(len - n);
                    self.frame_mut()?.env = env;
                }
                Op::For => {
                    let [lo, hi, function] = self.top_n(3)? else {
                        return Err(invalid("stack underflow"));
                    };
                    let (lo, hi, function) = (*lo, *hi, *function);
                    let (Value::Fixnum(lo), Value::Fixnum(hi)) = (lo, hi) else {
                        let culprit = if lo.is_fixnum() { hi } else { lo };
                        return Err(self.type_error("for", "fixnum", culprit));
                    };
                    for i in lo..=hi {
                        self.apply(function, &[Value::Fixnum(i)])?;
                    }
                    let len = self.machine.stack.len();
                    self.machine.stack.truncate(len - 3);
                    self.push_value(Value::T);
                }
            }
        }
    }
}
