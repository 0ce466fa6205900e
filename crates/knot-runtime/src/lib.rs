//! The knot runtime: a tagged value model, a relocating collector and a bytecode
//! virtual machine for a small lisp. Everything hangs off a [Runtime] context, there
//! is no global state, so several runtimes can live in the same process.

pub mod builtins;
pub mod config;
pub mod cvalue;
pub mod equal;
pub mod error;
pub mod heap;
pub mod number;
pub mod print;
pub mod runtime;
pub mod symbol;
pub mod types;
pub mod value;
pub mod vm;

pub use builtins::{Builtin, CallScope, Prim};
pub use config::Config;
pub use error::{ErrorKind, Result, RuntimeError};
pub use heap::{HeapStats, Tracer};
pub use runtime::Runtime;
pub use symbol::SymbolId;
pub use types::{CValueVTable, NumType, TypeId};
pub use value::{BuiltinId, Handle, Special, Value, Word};
pub use vm::asm::{Assembler, Label};
pub use vm::opcode::Op;
pub use vm::Arity;
