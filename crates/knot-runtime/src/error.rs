//! Definitions of errors that can occur during runtime, and their conversion to
//! the condition values seen by `try/catch` handlers.

use thiserror::Error;

use crate::runtime::Runtime;
use crate::symbol::SymbolId;
use crate::value::Value;

#[derive(Error, miette::Diagnostic, Debug, Clone)]
pub enum RuntimeError {
    #[error("type error: {op}: expected {expected}, got {shown}")]
    #[diagnostic(code(knot::type_error))]
    TypeError {
        op: &'static str,
        expected: &'static str,
        value: Value,
        shown: String,
    },

    #[error("wrong arity, {op} expected {} arguments, got {got}", expected_text(.min, .max))]
    #[diagnostic(code(knot::arg_count_error))]
    ArgCount {
        op: &'static str,
        min: usize,
        max: Option<usize>,
        got: usize,
    },

    #[error("{op}: index {index_shown} out of bounds for {shown}")]
    #[diagnostic(code(knot::bounds_error))]
    Bounds {
        op: &'static str,
        value: Value,
        index: Value,
        shown: String,
        index_shown: String,
    },

    #[error("out of memory: {0}")]
    #[diagnostic(code(knot::out_of_memory))]
    OutOfMemory(&'static str),

    #[error("unbound variable '{name}'")]
    #[diagnostic(code(knot::unbound_error))]
    Unbound { symbol: SymbolId, name: String },

    #[error("{shown}")]
    #[diagnostic(code(knot::user_error))]
    UserError { value: Value, shown: String },

    #[error("{op}: division by zero")]
    #[diagnostic(code(knot::divide_by_zero))]
    DivideByZero { op: &'static str },

    #[error("malformed type descriptor {shown}: {reason}")]
    #[diagnostic(code(knot::malformed_type))]
    MalformedType { shown: String, reason: &'static str },

    #[error("invalid bytecode: {0}")]
    #[diagnostic(code(knot::invalid_bytecode))]
    InvalidBytecode(String),
}

fn expected_text(min: &usize, max: &Option<usize>) -> String {
    match max {
        Some(max) if max == min => min.to_string(),
        Some(max) => format!("{min} to {max}"),
        None => format!("at least {min}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TypeError,
    ArgCountError,
    BoundsError,
    OutOfMemory,
    UnboundError,
    UserError,
    DivideByZero,
    MalformedType,
    InvalidBytecode,
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::TypeError { .. } => ErrorKind::TypeError,
            RuntimeError::ArgCount { .. } => ErrorKind::ArgCountError,
            RuntimeError::Bounds { .. } => ErrorKind::BoundsError,
            RuntimeError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            RuntimeError::Unbound { .. } => ErrorKind::UnboundError,
            RuntimeError::UserError { .. } => ErrorKind::UserError,
            RuntimeError::DivideByZero { .. } => ErrorKind::DivideByZero,
            RuntimeError::MalformedType { .. } => ErrorKind::MalformedType,
            RuntimeError::InvalidBytecode(_) => ErrorKind::InvalidBytecode,
        }
    }

    /// Whether a `try/catch` handler may intercept this error. Malformed type
    /// descriptors and broken bytecode always reach the host.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::MalformedType | ErrorKind::InvalidBytecode
        )
    }

    pub fn arity(op: &'static str, expected: usize, got: usize) -> Self {
        RuntimeError::ArgCount {
            op,
            min: expected,
            max: Some(expected),
            got,
        }
    }

    pub fn arity_at_least(op: &'static str, min: usize, got: usize) -> Self {
        RuntimeError::ArgCount {
            op,
            min,
            max: None,
            got,
        }
    }
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

impl Runtime {
    pub fn type_error(&self, op: &'static str, expected: &'static str, value: Value) -> RuntimeError {
        RuntimeError::TypeError {
            op,
            expected,
            value,
            shown: self.display(value),
        }
    }

    pub fn bounds_error(&self, op: &'static str, value: Value, index: Value) -> RuntimeError {
        RuntimeError::Bounds {
            op,
            value,
            index,
            shown: self.display(value),
            index_shown: self.display(index),
        }
    }

    pub fn user_error(&self, value: Value) -> RuntimeError {
        RuntimeError::UserError {
            value,
            shown: self.princ(value),
        }
    }

    pub fn unbound_error(&self, symbol: SymbolId) -> RuntimeError {
        RuntimeError::Unbound {
            symbol,
            name: self.symbols.name(symbol).to_string(),
        }
    }

    pub(crate) fn malformed_type(&self, descriptor: Value, reason: &'static str) -> RuntimeError {
        RuntimeError::MalformedType {
            shown: self.display(descriptor),
            reason,
        }
    }

    /// Builds the value a handler receives for `error`. Out of memory never
    /// allocates, and any failure while building the list falls back to the bare
    /// kind symbol.
    pub fn condition_value(&mut self, error: &RuntimeError) -> Value {
        let kind = Value::Symbol(self.kind_symbol(error.kind()));
        let parts = match error {
            RuntimeError::OutOfMemory(_) => return kind,
            RuntimeError::UserError { value, .. } => return *value,
            RuntimeError::TypeError { op, value, .. } => {
                vec![kind, self.intern(op), *value]
            }
            RuntimeError::ArgCount { op, min, got, .. } => vec![
                kind,
                self.intern(op),
                Value::Fixnum(*min as i64),
                Value::Fixnum(*got as i64),
            ],
            RuntimeError::Bounds {
                op, value, index, ..
            } => vec![kind, self.intern(op), *value, *index],
            RuntimeError::Unbound { symbol, .. } => vec![kind, Value::Symbol(*symbol)],
            RuntimeError::DivideByZero { op } => vec![kind, self.intern(op)],
            RuntimeError::MalformedType { .. } | RuntimeError::InvalidBytecode(_) => {
                return kind
            }
        };
        self.list(&parts).unwrap_or(kind)
    }

    fn kind_symbol(&self, kind: ErrorKind) -> SymbolId {
        let known = &self.known;
        match kind {
            ErrorKind::TypeError => known.type_error,
            ErrorKind::ArgCountError => known.arg_count_error,
            ErrorKind::BoundsError => known.bounds_error,
            ErrorKind::OutOfMemory => known.out_of_memory,
            ErrorKind::UnboundError => known.unbound_error,
            ErrorKind::UserError => known.user_error,
            ErrorKind::DivideByZero => known.divide_by_zero,
            ErrorKind::MalformedType => known.malformed_type,
            ErrorKind::InvalidBytecode => known.invalid_bytecode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_message() {
        let error = RuntimeError::arity_at_least("string.sub", 2, 1);
        assert_eq!(
            error.to_string(),
            "wrong arity, string.sub expected at least 2 arguments, got 1"
        );
        assert_eq!(error.kind(), ErrorKind::ArgCountError);
    }

    #[test]
    fn test_fatal_errors_are_not_recoverable() {
        assert!(!RuntimeError::InvalidBytecode("pc".into()).is_recoverable());
        assert!(RuntimeError::OutOfMemory("heap").is_recoverable());
    }

    #[test]
    fn test_out_of_memory_condition_is_a_symbol() {
        let mut rt = Runtime::default();
        let condition = rt.condition_value(&RuntimeError::OutOfMemory("heap"));
        assert_eq!(condition, rt.intern("out-of-memory"));
    }

    #[test]
    fn test_type_error_condition() {
        let mut rt = Runtime::default();
        let error = rt.type_error("car", "cons", Value::NIL);
        let condition = rt.condition_value(&error);
        let parts = rt.list_to_vec(condition).unwrap();
        assert_eq!(parts, vec![rt.intern("type-error"), rt.intern("car"), Value::NIL]);
    }
}
