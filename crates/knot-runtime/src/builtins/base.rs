use crate::builtins::CallScope;
use crate::error::Result;
use crate::runtime::Runtime;
use crate::value::Value;

/// raise : a -> !
pub fn raise(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    Err(scope.rt.user_error(scope.at(0)))
}

/// gc : -> bool
pub fn gc(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(0)?;
    scope.rt.collect();
    Ok(Value::T)
}

/// length : sequence -> fixnum
pub fn length(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    let value = scope.at(0);
    let rt = &scope.rt;
    let len = match value {
        Value::Vector(_) => rt.vector_len(value)?,
        Value::CValue(_) => rt
            .array_length(value)
            .ok_or_else(|| scope.type_error("sequence", value))?,
        _ => rt
            .list_length(value)
            .ok_or_else(|| scope.type_error("sequence", value))?,
    };
    Ok(Value::Fixnum(len as i64))
}

/// c-value : type -> a? -> cvalue
pub fn c_value(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_between(1, 2)?;
    let (descriptor, init) = (scope.at(0), scope.at(1));
    scope.rt.cvalue_new(descriptor, init)
}

/// sizeof : (type | cvalue) -> fixnum
pub fn sizeof(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    let value = scope.at(0);
    if let Some(bytes) = scope.rt.cvalue_bytes(value) {
        return Ok(Value::Fixnum(bytes.len() as i64));
    }
    let (size, _) = scope.rt.sizeof(value)?;
    Ok(Value::Fixnum(size as i64))
}

/// list? : a -> bool
pub fn is_list(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    Ok(Value::from_bool(scope.rt.list_length(scope.at(0)).is_some()))
}

/// symbol-value : symbol -> a
pub fn symbol_value(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    let value = scope.at(0);
    let symbol = value
        .as_symbol()
        .ok_or_else(|| scope.type_error("symbol", value))?;
    scope.rt.global_value(symbol)
}

pub(crate) fn register(rt: &mut Runtime) -> Result<()> {
    rt.intrinsic("raise", raise)?;
    rt.intrinsic("gc", gc)?;
    rt.intrinsic("length", length)?;
    rt.intrinsic("c-value", c_value)?;
    rt.intrinsic("sizeof", sizeof)?;
    rt.intrinsic("list?", is_list)?;
    rt.intrinsic("symbol-value", symbol_value)?;
    Ok(())
}
