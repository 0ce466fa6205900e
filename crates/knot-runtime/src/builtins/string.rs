//! String builtins. Strings are UTF-8 byte arrays and every index is a byte
//! offset; operations that move by characters step over continuation bytes.

use crate::builtins::CallScope;
use crate::error::Result;
use crate::number::Num;
use crate::runtime::Runtime;
use crate::value::Value;

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// Length of the sequence starting with `lead`, 1 for stray bytes.
fn sequence_len(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

/// Splits `bytes` into its character sequences.
fn chars_of(bytes: &[u8]) -> Vec<&[u8]> {
    let mut chars = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let end = (i + sequence_len(bytes[i])).min(bytes.len());
        chars.push(&bytes[i..end]);
        i = end;
    }
    chars
}

fn text_at(scope: &CallScope<'_>, nth: usize) -> Result<Vec<u8>> {
    let value = scope.at(nth);
    scope
        .rt
        .string_bytes(value)
        .map(|bytes| bytes.to_vec())
        .ok_or_else(|| scope.type_error("string", value))
}

fn check_offset(scope: &CallScope<'_>, nth: usize, offset: usize, len: usize) -> Result<()> {
    if offset > len {
        return Err(scope.bounds_error(scope.at(0), scope.at(nth)));
    }
    Ok(())
}

/// string : a... -> string
pub fn string(scope: CallScope<'_>) -> Result<Value> {
    let mut out = Vec::new();
    for arg in scope.args() {
        match scope.rt.string_bytes(arg) {
            Some(bytes) => out.extend_from_slice(bytes),
            None => out.extend_from_slice(scope.rt.princ(arg).as_bytes()),
        }
    }
    scope.rt.string_from_bytes(&out)
}

/// string? : a -> bool
pub fn is_string(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    Ok(Value::from_bool(scope.rt.is_string(scope.at(0))))
}

/// string.count : string -> fixnum? -> fixnum? -> fixnum
pub fn count(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_between(1, 3)?;
    let text = text_at(&scope, 0)?;
    let start = scope.index_at(1, 0)?;
    let end = scope.index_at(2, text.len())?;
    check_offset(&scope, 1, start, text.len())?;
    check_offset(&scope, 2, end, text.len())?;
    if end <= start {
        return Ok(Value::Fixnum(0));
    }
    let count = text[start..end].iter().filter(|byte| !is_continuation(**byte)).count();
    Ok(Value::Fixnum(count as i64))
}

/// string.split : string -> string -> list
pub fn split(mut scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(2)?;
    let text = text_at(&scope, 0)?;
    let delims = text_at(&scope, 1)?;
    let delims = chars_of(&delims);

    let mut tokens = Vec::new();
    let mut i = 0;
    loop {
        let start = i;
        let mut delim = None;
        while i < text.len() {
            let end = (i + sequence_len(text[i])).min(text.len());
            if delims.contains(&&text[i..end]) {
                delim = Some(end);
                break;
            }
            i = end;
        }
        tokens.push(text[start..i].to_vec());
        match delim {
            Some(next) => i = next,
            None => break,
        }
    }

    let mut slots = Vec::with_capacity(tokens.len());
    for token in tokens {
        let value = scope.rt.string_from_bytes(&token)?;
        slots.push(scope.push(value)?);
    }
    let items: Vec<Value> = slots.into_iter().map(|slot| scope.slot(slot)).collect();
    scope.rt.list(&items)
}

/// string.sub : string -> fixnum -> fixnum? -> string
pub fn sub(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_between(2, 3)?;
    let text = text_at(&scope, 0)?;
    let start = scope.index_at(1, 0)?;
    let end = scope.index_at(2, text.len())?;
    check_offset(&scope, 1, start, text.len())?;
    check_offset(&scope, 2, end, text.len())?;
    if end <= start {
        return scope.rt.string("");
    }
    scope.rt.string_from_bytes(&text[start..end])
}

/// string.char : string -> fixnum -> wchar
pub fn char_at(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(2)?;
    let text = text_at(&scope, 0)?;
    let i = scope.index_at(1, 0)?;
    if i >= text.len() || i + sequence_len(text[i]) > text.len() {
        return Err(scope.bounds_error(scope.at(0), scope.at(1)));
    }
    let sequence = &text[i..i + sequence_len(text[i])];
    let c = std::str::from_utf8(sequence)
        .ok()
        .and_then(|s| s.chars().next())
        .unwrap_or(char::REPLACEMENT_CHARACTER);
    scope.rt.wchar(c)
}

/// string.inc : string -> fixnum -> fixnum? -> fixnum
pub fn inc(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_between(2, 3)?;
    let text = text_at(&scope, 0)?;
    let mut i = scope.index_at(1, 0)?;
    let steps = scope.index_at(2, 1)?;
    for _ in 0..steps {
        if i >= text.len() {
            return Err(scope.bounds_error(scope.at(0), scope.at(1)));
        }
        i += 1;
        while i < text.len() && is_continuation(text[i]) {
            i += 1;
        }
    }
    Ok(Value::Fixnum(i as i64))
}

/// string.dec : string -> fixnum -> fixnum? -> fixnum
pub fn dec(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_between(2, 3)?;
    let text = text_at(&scope, 0)?;
    let mut i = scope.index_at(1, 0)?;
    let steps = scope.index_at(2, 1)?;
    check_offset(&scope, 1, i, text.len())?;
    for _ in 0..steps {
        if i == 0 {
            return Err(scope.bounds_error(scope.at(0), scope.at(1)));
        }
        i -= 1;
        while i > 0 && is_continuation(text[i]) {
            i -= 1;
        }
    }
    Ok(Value::Fixnum(i as i64))
}

/// string.find : string -> (wchar | char | string) -> fixnum? -> fixnum | bool
pub fn find(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_between(2, 3)?;
    let text = text_at(&scope, 0)?;
    let start = scope.index_at(2, 0)?;
    check_offset(&scope, 2, start, text.len())?;

    let needle = scope.at(1);
    let rt = &scope.rt;
    let pattern = match rt.cvalue_type(needle) {
        Some(ty) if ty == rt.prims.wchar => {
            let code = rt.to_num(needle).and_then(|num| match num {
                Num::Int(code) => u32::try_from(code).ok().and_then(char::from_u32),
                Num::Float(_) => None,
            });
            let c = code.ok_or_else(|| scope.type_error("character", needle))?;
            c.to_string().into_bytes()
        }
        Some(ty) if ty == rt.prims.char || ty == rt.prims.numeric[crate::NumType::Uint8 as usize] => {
            rt.cvalue_bytes(needle).map(|bytes| bytes.to_vec()).unwrap_or_default()
        }
        _ => rt
            .string_bytes(needle)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| scope.type_error("character or string", needle))?,
    };

    if pattern.is_empty() {
        return Ok(Value::Fixnum(start as i64));
    }
    let found = text[start..]
        .windows(pattern.len())
        .position(|window| window == pattern.as_slice());
    Ok(match found {
        Some(offset) => Value::Fixnum((start + offset) as i64),
        None => Value::F,
    })
}

/// string.reverse : string -> string
pub fn reverse(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    let text = text_at(&scope, 0)?;
    let reversed: Vec<u8> = chars_of(&text).into_iter().rev().flatten().copied().collect();
    scope.rt.string_from_bytes(&reversed)
}

/// string.encode : wcstring -> string
pub fn encode(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_arity(1)?;
    let value = scope.at(0);
    let rt = &scope.rt;
    let is_wide = rt
        .cvalue_type(value)
        .map(|ty| rt.types.info(ty))
        .is_some_and(|info| info.eltype.is_some() && info.elsz == 4);
    if !is_wide {
        return Err(scope.type_error("wide string", value));
    }

    let text: String = rt
        .cvalue_bytes(value)
        .unwrap_or_default()
        .chunks_exact(4)
        .map(|raw| i32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
        .take_while(|code| *code != 0)
        .map(|code| char::from_u32(code as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    scope.rt.string(&text)
}

/// string.decode : string -> bool? -> wcstring
pub fn decode(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_between(1, 2)?;
    let text = text_at(&scope, 0)?;
    let terminate = !matches!(scope.at(1), Value::UNBOUND | Value::F);

    let mut raw: Vec<u8> = String::from_utf8_lossy(&text)
        .chars()
        .flat_map(|c| (c as i32).to_ne_bytes())
        .collect();
    if terminate {
        raw.extend(0i32.to_ne_bytes());
    }

    let wide = scope.rt.alloc_cvalue(scope.rt.prims.wcstring, raw.len())?;
    if let Some(bytes) = scope.rt.cvalue_bytes_mut(wide) {
        bytes.copy_from_slice(&raw);
    }
    Ok(wide)
}

fn to_radix(n: i128, radix: u32) -> String {
    if n == 0 {
        return "0".into();
    }
    let mut digits = Vec::new();
    let mut magnitude = n.unsigned_abs();
    while magnitude > 0 {
        let digit = (magnitude % radix as u128) as u32;
        digits.push(char::from_digit(digit, radix).unwrap_or('?'));
        magnitude /= radix as u128;
    }
    if n < 0 {
        digits.push('-');
    }
    digits.into_iter().rev().collect()
}

/// number->string : number -> fixnum? -> string
pub fn number_to_string(scope: CallScope<'_>) -> Result<Value> {
    scope.assert_between(1, 2)?;
    let value = scope.at(0);
    let num = scope
        .rt
        .to_num(value)
        .ok_or_else(|| scope.type_error("number", value))?;
    let radix = match scope.at(1) {
        Value::UNBOUND => 10,
        Value::Fixnum(radix) if (2..=36).contains(&radix) => radix as u32,
        Value::Fixnum(_) => return Err(scope.bounds_error(value, scope.at(1))),
        other => return Err(scope.type_error("fixnum", other)),
    };

    let text = match num {
        Num::Int(n) => to_radix(n, radix),
        Num::Float(_) => scope.rt.display(value),
    };
    scope.rt.string(&text)
}

pub(crate) fn register(rt: &mut Runtime) -> Result<()> {
    rt.intrinsic("string", string)?;
    rt.intrinsic("string?", is_string)?;
    rt.intrinsic("string.count", count)?;
    rt.intrinsic("string.split", split)?;
    rt.intrinsic("string.sub", sub)?;
    rt.intrinsic("string.char", char_at)?;
    rt.intrinsic("string.inc", inc)?;
    rt.intrinsic("string.dec", dec)?;
    rt.intrinsic("string.find", find)?;
    rt.intrinsic("string.reverse", reverse)?;
    rt.intrinsic("string.encode", encode)?;
    rt.intrinsic("string.decode", decode)?;
    rt.intrinsic("number->string", number_to_string)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{ErrorKind, Runtime, Value};

    fn call(rt: &mut Runtime, name: &str, args: &[Value]) -> crate::Result<Value> {
        let Value::Symbol(symbol) = rt.intern(name) else {
            unreachable!()
        };
        let function = rt.global_value(symbol)?;
        rt.apply(function, args)
    }

    fn text(rt: &mut Runtime, s: &str) -> Value {
        let value = rt.string(s).unwrap();
        rt.push(value).unwrap();
        value
    }

    #[test]
    fn test_count_counts_characters() {
        let mut rt = Runtime::default();
        let s = text(&mut rt, "héllo");
        assert_eq!(call(&mut rt, "string.count", &[s]).unwrap(), Value::Fixnum(5));
        assert_eq!(
            call(&mut rt, "string.count", &[s, Value::Fixnum(3), Value::Fixnum(1)]).unwrap(),
            Value::Fixnum(0)
        );
        let error = call(&mut rt, "string.count", &[s, Value::Fixnum(7)]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BoundsError);
    }

    #[test]
    fn test_split_keeps_trailing_empty_token() {
        let mut rt = Runtime::default();
        let s = text(&mut rt, "a,b;c,");
        let delims = text(&mut rt, ",;");
        let parts = call(&mut rt, "string.split", &[s, delims]).unwrap();
        let parts: Vec<String> = rt
            .list_to_vec(parts)
            .unwrap()
            .into_iter()
            .map(|part| rt.string_lossy(part).unwrap())
            .collect();
        assert_eq!(parts, ["a", "b", "c", ""]);
    }

    #[test]
    fn test_sub_and_bounds() {
        let mut rt = Runtime::default();
        let s = text(&mut rt, "hello");
        let sub = call(&mut rt, "string.sub", &[s, Value::Fixnum(1), Value::Fixnum(3)]).unwrap();
        assert_eq!(rt.string_lossy(sub).unwrap(), "el");
        let empty = call(&mut rt, "string.sub", &[s, Value::Fixnum(3), Value::Fixnum(1)]).unwrap();
        assert_eq!(rt.string_lossy(empty).unwrap(), "");
        let error = call(&mut rt, "string.sub", &[s, Value::Fixnum(0), Value::Fixnum(6)]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BoundsError);
    }

    #[test]
    fn test_char_at_length_is_out_of_bounds() {
        let mut rt = Runtime::default();
        let s = text(&mut rt, "aλ");
        let c = call(&mut rt, "string.char", &[s, Value::Fixnum(1)]).unwrap();
        assert_eq!(rt.princ(c), "λ");
        for index in [3, 4] {
            let error = call(&mut rt, "string.char", &[s, Value::Fixnum(index)]).unwrap_err();
            assert_eq!(error.kind(), ErrorKind::BoundsError);
        }
    }

    #[test]
    fn test_inc_and_dec_step_over_characters() {
        let mut rt = Runtime::default();
        let s = text(&mut rt, "aλb");
        assert_eq!(call(&mut rt, "string.inc", &[s, Value::Fixnum(1)]).unwrap(), Value::Fixnum(3));
        assert_eq!(call(&mut rt, "string.dec", &[s, Value::Fixnum(3)]).unwrap(), Value::Fixnum(1));
        assert_eq!(call(&mut rt, "string.dec", &[s, Value::Fixnum(4)]).unwrap(), Value::Fixnum(3));
        let error = call(&mut rt, "string.inc", &[s, Value::Fixnum(4)]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BoundsError);
        let error = call(&mut rt, "string.dec", &[s, Value::Fixnum(0)]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BoundsError);
    }

    #[test]
    fn test_find() {
        let mut rt = Runtime::default();
        let s = text(&mut rt, "banana");
        let needle = text(&mut rt, "na");
        assert_eq!(call(&mut rt, "string.find", &[s, needle]).unwrap(), Value::Fixnum(2));
        assert_eq!(
            call(&mut rt, "string.find", &[s, needle, Value::Fixnum(3)]).unwrap(),
            Value::Fixnum(4)
        );
        let c = rt.wchar('z').unwrap();
        assert_eq!(call(&mut rt, "string.find", &[s, c]).unwrap(), Value::F);
        let empty = text(&mut rt, "");
        assert_eq!(
            call(&mut rt, "string.find", &[s, empty, Value::Fixnum(6)]).unwrap(),
            Value::Fixnum(6)
        );
    }

    #[test]
    fn test_reverse_encode_decode() {
        let mut rt = Runtime::default();
        let s = text(&mut rt, "aλc");
        let reversed = call(&mut rt, "string.reverse", &[s]).unwrap();
        assert_eq!(rt.string_lossy(reversed).unwrap(), "cλa");

        let wide = call(&mut rt, "string.decode", &[s]).unwrap();
        rt.push(wide).unwrap();
        assert_eq!(rt.array_length(wide), Some(3));
        let back = call(&mut rt, "string.encode", &[wide]).unwrap();
        assert_eq!(rt.string_lossy(back).unwrap(), "aλc");

        let terminated = call(&mut rt, "string.decode", &[s, Value::T]).unwrap();
        assert_eq!(rt.array_length(terminated), Some(4));
    }

    #[test]
    fn test_number_to_string() {
        let mut rt = Runtime::default();
        let hex = call(&mut rt, "number->string", &[Value::Fixnum(-255), Value::Fixnum(16)]).unwrap();
        assert_eq!(rt.string_lossy(hex).unwrap(), "-ff");
        let error = call(&mut rt, "number->string", &[Value::Fixnum(1), Value::Fixnum(37)]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BoundsError);
    }

    #[test]
    fn test_string_concatenates() {
        let mut rt = Runtime::default();
        let s = text(&mut rt, "x=");
        let joined = call(&mut rt, "string", &[s, Value::Fixnum(4)]).unwrap();
        assert_eq!(rt.string_lossy(joined).unwrap(), "x=4");
    }
}
