//! Printed representation of values. [Runtime::display] quotes strings and
//! characters the way they would be read back, [Runtime::princ] writes their raw
//! contents. Output is bounded in depth and length, so cycles terminate.

use std::cell::Cell;
use std::fmt::{self, Write};

use crate::number::Num;
use crate::runtime::Runtime;
use crate::types::{NumType, TypeId};
use crate::value::{Special, Value};

const MAX_DEPTH: usize = 32;
const MAX_LENGTH: usize = 1000;
const MAX_ATOMS: usize = 10_000;

struct Printer<'a> {
    rt: &'a Runtime,
    raw: bool,
    budget: Cell<usize>,
}

impl Runtime {
    pub fn display(&self, value: Value) -> String {
        let mut out = String::new();
        let _ = self.write_value(value, &mut out, false);
        out
    }

    pub fn princ(&self, value: Value) -> String {
        let mut out = String::new();
        let _ = self.write_value(value, &mut out, true);
        out
    }

    pub fn write_value(&self, value: Value, out: &mut dyn Write, raw: bool) -> fmt::Result {
        let printer = Printer {
            rt: self,
            raw,
            budget: Cell::new(MAX_ATOMS),
        };
        printer.value(value, out, 0)
    }
}

fn write_num(num: Num, out: &mut dyn Write) -> fmt::Result {
    match num {
        Num::Int(n) => write!(out, "{n}"),
        Num::Float(f) if f.is_nan() => out.write_str("+nan.0"),
        Num::Float(f) if f.is_infinite() => out.write_str(if f > 0.0 { "+inf.0" } else { "-inf.0" }),
        Num::Float(f) => write!(out, "{f:?}"),
    }
}

impl Printer<'_> {
    fn value(&self, value: Value, out: &mut dyn Write, depth: usize) -> fmt::Result {
        if depth > MAX_DEPTH || self.budget.get() == 0 {
            return out.write_str("...");
        }
        self.budget.set(self.budget.get() - 1);
        let rt = self.rt;
        match value {
            Value::Fixnum(n) => write!(out, "{n}"),
            Value::Symbol(symbol) => out.write_str(rt.symbol_name(symbol)),
            Value::Special(special) => out.write_str(match special {
                Special::True => "#t",
                Special::False => "#f",
                Special::Nil => "()",
                Special::Eof => "#<eof>",
                Special::Unbound => "#<unbound>",
            }),
            Value::Builtin(id) => write!(out, "#<builtin {}>", rt.builtin(id).name),
            Value::Closure(_) => out.write_str("#<function>"),
            Value::Cons(_) => self.list(value, out, depth),
            Value::Vector(handle) => {
                out.write_char('[')?;
                let len = rt.heap.header(handle).len();
                for i in 0..len.min(MAX_LENGTH) {
                    if i > 0 {
                        out.write_char(' ')?;
                    }
                    self.value(rt.heap.field(handle, i), out, depth + 1)?;
                }
                if len > MAX_LENGTH {
                    out.write_str(" ...")?;
                }
                out.write_char(']')
            }
            Value::CValue(handle) => {
                let ty = TypeId(rt.heap.header(handle).type_id());
                let info = rt.types.info(ty);
                if let Some(print) = info.vtable.print {
                    return print(rt, value, out);
                }
                self.cdata(ty, rt.heap.bytes(handle), out, depth)
            }
        }
    }

    fn list(&self, value: Value, out: &mut dyn Write, depth: usize) -> fmt::Result {
        let rt = self.rt;
        let quote = Value::Symbol(rt.known.quote);
        if let Some([head, quoted]) = rt.list_to_vec(value).as_deref() {
            if *head == quote {
                out.write_char('\'')?;
                return self.value(*quoted, out, depth + 1);
            }
        }

        out.write_char('(')?;
        let mut cursor = value;
        let mut count = 0;
        while let Value::Cons(handle) = cursor {
            if count > 0 {
                out.write_char(' ')?;
            }
            if count == MAX_LENGTH {
                out.write_str("...")?;
                return out.write_char(')');
            }
            self.value(rt.heap.field(handle, 0), out, depth + 1)?;
            cursor = rt.heap.field(handle, 1);
            count += 1;
        }
        if !cursor.is_nil() {
            out.write_str(" . ")?;
            self.value(cursor, out, depth + 1)?;
        }
        out.write_char(')')
    }

    /// Writes raw cvalue data of type `ty`.
    fn cdata(&self, ty: TypeId, bytes: &[u8], out: &mut dyn Write, depth: usize) -> fmt::Result {
        let rt = self.rt;
        let prims = &rt.prims;
        let info = rt.types.info(ty);

        if ty == prims.string {
            let text = String::from_utf8_lossy(bytes);
            return if self.raw {
                out.write_str(&text)
            } else {
                write!(out, "{text:?}")
            };
        }
        if ty == prims.wcstring {
            let text: String = bytes
                .chunks_exact(4)
                .map(|raw| i32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
                .map(|code| char::from_u32(code as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect();
            return if self.raw {
                out.write_str(&text)
            } else {
                write!(out, "{text:?}")
            };
        }
        if ty == prims.wchar {
            let code = NumType::Int32.read(bytes);
            let c = match code {
                Num::Int(code) => u32::try_from(code).ok().and_then(char::from_u32),
                Num::Float(_) => None,
            }
            .unwrap_or(char::REPLACEMENT_CHARACTER);
            return if self.raw {
                out.write_char(c)
            } else {
                write!(out, "#\\{c}")
            };
        }

        match (info.descriptor, info.numtype, info.eltype) {
            (Value::Symbol(_), Some(numtype), _) => write_num(numtype.read(bytes), out),
            (Value::Cons(_), Some(numtype), None) => {
                // Enums print their member.
                let members = rt.cdr(info.descriptor).ok().and_then(|members| rt.list_to_vec(members));
                match (numtype.read(bytes), members) {
                    (Num::Int(index), Some(members)) if index >= 0 && (index as usize) < members.len() => {
                        self.value(members[index as usize], out, depth + 1)
                    }
                    (num, _) => write_num(num, out),
                }
            }
            (_, _, Some(eltype)) => {
                out.write_str("#array(")?;
                self.value(rt.types.info(eltype).descriptor, out, depth + 1)?;
                let elsz = info.elsz.max(1);
                for (i, element) in bytes.chunks_exact(elsz).enumerate() {
                    if i == MAX_LENGTH {
                        out.write_str(" ...")?;
                        break;
                    }
                    out.write_char(' ')?;
                    self.cdata(eltype, element, out, depth + 1)?;
                }
                out.write_char(')')
            }
            (descriptor, ..) => {
                out.write_str("#<")?;
                self.value(descriptor, out, depth + 1)?;
                out.write_char('>')
            }
        }
    }
}
