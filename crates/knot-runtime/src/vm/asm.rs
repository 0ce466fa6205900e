//! A small assembler for the bytecode in [super::opcode], with forward labels
//! and a deduplicated constant pool. It is how hosts and tests build closures
//! without a compiler.

use std::fmt::Write;

use super::opcode::{Op, Operand};
use super::Arity;
use crate::error::{Result, RuntimeError};
use crate::runtime::Runtime;
use crate::symbol::SymbolId;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
struct Fixup {
    /// Position of the jump operand.
    at: usize,
    label: Label,
    long: bool,
}

/// Builds one closure. Heap constants handed to the assembler must stay
/// reachable until [Assembler::finish] returns.
#[derive(Debug, Clone)]
pub struct Assembler {
    code: Vec<u8>,
    consts: Vec<Value>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    arity: Arity,
}

impl Assembler {
    /// Starts a closure taking `arity` arguments, with its argument check
    /// already emitted.
    pub fn new(arity: Arity) -> Assembler {
        let mut asm = Assembler {
            code: Vec::new(),
            consts: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            arity,
        };
        match arity {
            Arity::Fixed(n) => asm.op_u8(Op::Argc, n as u8),
            Arity::Variadic(n) => asm.op_u8(Op::Vargc, n as u8),
        };
        asm
    }

    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn op(&mut self, op: Op) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    pub fn op_u8(&mut self, op: Op, operand: u8) -> &mut Self {
        self.code.extend([op as u8, operand]);
        self
    }

    fn op_u32(&mut self, op: Op, operand: u32) -> &mut Self {
        self.code.push(op as u8);
        self.code.extend(operand.to_le_bytes());
        self
    }

    fn constant(&mut self, value: Value) -> usize {
        match self.consts.iter().position(|constant| *constant == value) {
            Some(index) => index,
            None => {
                self.consts.push(value);
                self.consts.len() - 1
            }
        }
    }

    fn indexed(&mut self, short: Op, long: Op, index: usize) -> &mut Self {
        match u8::try_from(index) {
            Ok(index) => self.op_u8(short, index),
            Err(_) => self.op_u32(long, index as u32),
        }
    }

    pub fn load_i8(&mut self, n: i8) -> &mut Self {
        self.op_u8(Op::LoadI8, n as u8)
    }

    /// Loads any fixnum, inline when it fits in a byte.
    pub fn load_fixnum(&mut self, n: i64) -> &mut Self {
        match n {
            0 => self.op(Op::Load0),
            1 => self.op(Op::Load1),
            _ => match i8::try_from(n) {
                Ok(n) => self.load_i8(n),
                Err(_) => self.load_const(Value::Fixnum(n)),
            },
        }
    }

    pub fn load_const(&mut self, value: Value) -> &mut Self {
        let index = self.constant(value);
        self.indexed(Op::LoadV, Op::LoadVL, index)
    }

    pub fn load_global(&mut self, symbol: SymbolId) -> &mut Self {
        let index = self.constant(Value::Symbol(symbol));
        self.indexed(Op::LoadG, Op::LoadGL, index)
    }

    pub fn set_global(&mut self, symbol: SymbolId) -> &mut Self {
        let index = self.constant(Value::Symbol(symbol));
        self.indexed(Op::SetG, Op::SetGL, index)
    }

    pub fn load_arg(&mut self, index: u8) -> &mut Self {
        self.op_u8(Op::LoadA, index)
    }

    pub fn set_arg(&mut self, index: u8) -> &mut Self {
        self.op_u8(Op::SetA, index)
    }

    pub fn load_closed(&mut self, depth: u8, index: u8) -> &mut Self {
        self.code.extend([Op::LoadC as u8, depth, index]);
        self
    }

    pub fn set_closed(&mut self, depth: u8, index: u8) -> &mut Self {
        self.code.extend([Op::SetC as u8, depth, index]);
        self
    }

    /// Instantiates `template` over the current environment.
    pub fn closure(&mut self, template: Value) -> &mut Self {
        self.load_const(template).op(Op::Closure)
    }

    pub fn call(&mut self, nargs: u8) -> &mut Self {
        self.op_u8(Op::Call, nargs)
    }

    pub fn tail_call(&mut self, nargs: u8) -> &mut Self {
        self.op_u8(Op::TCall, nargs)
    }

    pub fn apply(&mut self, n: u8) -> &mut Self {
        self.op_u8(Op::Apply, n)
    }

    pub fn tail_apply(&mut self, n: u8) -> &mut Self {
        self.op_u8(Op::TApply, n)
    }

    pub fn list(&mut self, n: u8) -> &mut Self {
        self.op_u8(Op::List, n)
    }

    pub fn vector(&mut self, n: u8) -> &mut Self {
        self.op_u8(Op::Vector, n)
    }

    pub fn let_env(&mut self, n: u8) -> &mut Self {
        self.op_u8(Op::Let, n)
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current position.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.len());
        self
    }

    fn branch(&mut self, op: Op, label: Label) -> &mut Self {
        let long = matches!(op, Op::JmpL | Op::BrfL | Op::BrtL);
        self.code.push(op as u8);
        self.fixups.push(Fixup {
            at: self.code.len(),
            label,
            long,
        });
        let width = if long { 4 } else { 2 };
        self.code.extend(std::iter::repeat(0).take(width));
        self
    }

    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.branch(Op::Jmp, label)
    }

    pub fn branch_false(&mut self, label: Label) -> &mut Self {
        self.branch(Op::Brf, label)
    }

    pub fn branch_true(&mut self, label: Label) -> &mut Self {
        self.branch(Op::Brt, label)
    }

    pub fn jump_long(&mut self, label: Label) -> &mut Self {
        self.branch(Op::JmpL, label)
    }

    pub fn branch_false_long(&mut self, label: Label) -> &mut Self {
        self.branch(Op::BrfL, label)
    }

    pub fn branch_true_long(&mut self, label: Label) -> &mut Self {
        self.branch(Op::BrtL, label)
    }

    fn resolve(&mut self) -> Result<()> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0]
                .ok_or_else(|| RuntimeError::InvalidBytecode(format!("unbound label {}", fixup.label.0)))?;
            let width = if fixup.long { 4 } else { 2 };
            let offset = target as i64 - (fixup.at + width) as i64;
            if fixup.long {
                let offset = i32::try_from(offset)
                    .map_err(|_| RuntimeError::InvalidBytecode("jump is too far".into()))?;
                self.code[fixup.at..fixup.at + 4].copy_from_slice(&offset.to_le_bytes());
            } else {
                let offset = i16::try_from(offset)
                    .map_err(|_| RuntimeError::InvalidBytecode("jump is too far for a short branch".into()))?;
                self.code[fixup.at..fixup.at + 2].copy_from_slice(&offset.to_le_bytes());
            }
        }
        Ok(())
    }

    /// Resolves labels and allocates the closure.
    pub fn finish(mut self, rt: &mut Runtime) -> Result<Value> {
        self.resolve()?;
        let base = rt.stack_depth();
        let result = self.build(rt, base);
        rt.machine.stack.truncate(base);
        result
    }

    fn build(&self, rt: &mut Runtime, base: usize) -> Result<Value> {
        for constant in &self.consts {
            rt.push(*constant)?;
        }
        let consts = if self.consts.is_empty() {
            Value::NIL
        } else {
            let vector = rt.alloc_vector(self.consts.len(), Value::NIL)?;
            if let Value::Vector(handle) = vector {
                for i in 0..self.consts.len() {
                    rt.heap.set_field(handle, i, rt.machine.stack[base + i]);
                }
            }
            vector
        };
        rt.push(consts)?;

        let code = rt.alloc_cvalue(rt.prims.bytes, self.code.len())?;
        if let Some(bytes) = rt.cvalue_bytes_mut(code) {
            bytes.copy_from_slice(&self.code);
        }
        rt.alloc_closure(code, consts, Value::NIL, self.arity)
    }
}

/// Renders the code of a closure, one instruction per line.
pub fn disassemble(rt: &Runtime, closure: Value) -> Result<String> {
    let Value::Closure(handle) = closure else {
        return Err(rt.type_error("disassemble", "closure", closure));
    };
    let code = rt.heap.field(handle, 0);
    let consts = rt.heap.field(handle, 1);
    let code = rt
        .cvalue_bytes(code)
        .ok_or_else(|| RuntimeError::InvalidBytecode("closure without code".into()))?;

    let mut out = String::new();
    let mut pc = 0;
    while pc < code.len() {
        let op = Op::try_from(code[pc])?;
        let start = pc;
        pc += 1;
        let _ = write!(out, "{start:>5}  {}", op.name());

        let mut operands = Vec::new();
        for operand in op.operands() {
            let width = operand.width();
            let bytes = code
                .get(pc..pc + width)
                .ok_or_else(|| RuntimeError::InvalidBytecode(format!("truncated operand at {start}")))?;
            let n = match operand {
                Operand::U8 => bytes[0] as i64,
                Operand::I8 => bytes[0] as i8 as i64,
                Operand::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
                Operand::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
                Operand::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
            };
            pc += width;
            operands.push(n);
        }

        match (op, operands.as_slice()) {
            (Op::Jmp | Op::Brf | Op::Brt | Op::JmpL | Op::BrfL | Op::BrtL, [offset]) => {
                let _ = write!(out, " -> {}", pc as i64 + offset);
            }
            (Op::LoadV | Op::LoadVL | Op::LoadG | Op::LoadGL | Op::SetG | Op::SetGL, [index]) => {
                let shown = match consts {
                    Value::Vector(consts) if (*index as usize) < rt.heap.header(consts).len() => {
                        rt.display(rt.heap.field(consts, *index as usize))
                    }
                    _ => "?".to_string(),
                };
                let _ = write!(out, " {index} ; {shown}");
            }
            (_, operands) => {
                for n in operands {
                    let _ = write!(out, " {n}");
                }
            }
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prologue_checks_arity() {
        let mut rt = Runtime::default();
        let mut asm = Assembler::new(Arity::Fixed(2));
        asm.load_arg(0).load_arg(1).op(Op::Add).op(Op::Ret);
        let closure = asm.finish(&mut rt).unwrap();
        rt.push(closure).unwrap();

        let listing = disassemble(&rt, closure).unwrap();
        assert!(listing.starts_with("    0  argc 2\n"));
        assert!(listing.contains("add"));
    }

    #[test]
    fn test_forward_labels() {
        let mut rt = Runtime::default();
        let mut asm = Assembler::new(Arity::Fixed(1));
        let otherwise = asm.label();
        asm.load_arg(0).branch_false(otherwise).load_i8(10).op(Op::Ret);
        asm.bind(otherwise).load_i8(20).op(Op::Ret);
        let closure = asm.finish(&mut rt).unwrap();
        rt.push(closure).unwrap();

        assert_eq!(rt.execute(closure, &[Value::T]).unwrap(), Value::Fixnum(10));
        assert_eq!(rt.execute(closure, &[Value::F]).unwrap(), Value::Fixnum(20));
    }

    #[test]
    fn test_unbound_label() {
        let mut rt = Runtime::default();
        let mut asm = Assembler::new(Arity::Fixed(0));
        let nowhere = asm.label();
        asm.jump(nowhere);
        let error = asm.finish(&mut rt).unwrap_err();
        assert!(matches!(error, RuntimeError::InvalidBytecode(_)));
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let mut rt = Runtime::default();
        let mut asm = Assembler::new(Arity::Fixed(0));
        asm.load_fixnum(1000).load_fixnum(1000).op(Op::Add).op(Op::Ret);
        assert_eq!(asm.consts.len(), 1);
        let closure = asm.finish(&mut rt).unwrap();
        assert_eq!(rt.execute(closure, &[]).unwrap(), Value::Fixnum(2000));
    }
}
