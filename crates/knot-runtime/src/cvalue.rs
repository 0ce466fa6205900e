//! Boxed C-like data: scalars, strings, arrays, enums and opaque host types. A
//! cvalue is a type id plus a byte payload.

use crate::error::{Result, RuntimeError};
use crate::heap::{object_words, Kind};
use crate::number::Num;
use crate::runtime::Runtime;
use crate::types::{NumType, TypeId};
use crate::value::{Handle, Value};

impl Runtime {
    /// Allocates a zeroed cvalue of `size` bytes. The size is taken as given, so
    /// incomplete array types can be allocated at any length.
    pub fn alloc_cvalue(&mut self, ty: TypeId, size: usize) -> Result<Value> {
        let len = u32::try_from(size).map_err(|_| RuntimeError::OutOfMemory("cvalue is too large"))?;
        let words = object_words(Kind::CValue, size).ok_or(RuntimeError::OutOfMemory("cvalue is too large"))?;
        self.reserve(words)?;
        Ok(Value::CValue(self.heap.allocate(Kind::CValue, ty.0, len)))
    }

    pub fn cvalue_type(&self, value: Value) -> Option<TypeId> {
        match value {
            Value::CValue(handle) => Some(TypeId(self.heap.header(handle).type_id())),
            _ => None,
        }
    }

    pub fn cvalue_bytes(&self, value: Value) -> Option<&[u8]> {
        match value {
            Value::CValue(handle) => Some(self.heap.bytes(handle)),
            _ => None,
        }
    }

    pub fn cvalue_bytes_mut(&mut self, value: Value) -> Option<&mut [u8]> {
        match value {
            Value::CValue(handle) => Some(self.heap.bytes_mut(handle)),
            _ => None,
        }
    }

    /// Reads the `index`th word kept inside a cvalue payload.
    pub fn cvalue_word(&self, value: Value, index: usize) -> Option<Value> {
        let bytes = self.cvalue_bytes(value)?.get(index * 8..index * 8 + 8)?;
        let mut raw = [0; 8];
        raw.copy_from_slice(bytes);
        Some(Value::from(crate::value::Word(u64::from_ne_bytes(raw))))
    }

    pub fn set_cvalue_word(&mut self, value: Value, index: usize, word: Value) {
        if let Some(bytes) = self.cvalue_bytes_mut(value) {
            let raw = crate::value::Word::from(word).0.to_ne_bytes();
            bytes[index * 8..index * 8 + 8].copy_from_slice(&raw);
        }
    }

    pub fn string(&mut self, text: &str) -> Result<Value> {
        self.string_from_bytes(text.as_bytes())
    }

    pub fn string_from_bytes(&mut self, bytes: &[u8]) -> Result<Value> {
        let value = self.alloc_cvalue(self.prims.string, bytes.len())?;
        if let Value::CValue(handle) = value {
            self.heap.bytes_mut(handle).copy_from_slice(bytes);
        }
        Ok(value)
    }

    pub fn is_string(&self, value: Value) -> bool {
        self.cvalue_type(value) == Some(self.prims.string)
    }

    pub fn string_bytes(&self, value: Value) -> Option<&[u8]> {
        if self.is_string(value) {
            self.cvalue_bytes(value)
        } else {
            None
        }
    }

    /// The contents of a string, invalid utf-8 is replaced.
    pub fn string_lossy(&self, value: Value) -> Option<String> {
        self.string_bytes(value)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn string_type(&self) -> TypeId {
        self.prims.string
    }

    pub fn wcstring_type(&self) -> TypeId {
        self.prims.wcstring
    }

    pub fn numeric_type(&self, numtype: NumType) -> TypeId {
        self.prims.numeric[numtype as usize]
    }

    /// Numtype of a scalar cvalue. Enums and arrays are not numbers.
    pub(crate) fn scalar_numtype(&self, ty: TypeId) -> Option<NumType> {
        let info = self.types.info(ty);
        match info.descriptor {
            Value::Symbol(_) => info.numtype,
            _ => None,
        }
    }

    pub fn to_num(&self, value: Value) -> Option<Num> {
        match value {
            Value::Fixnum(n) => Some(Num::Int(n as i128)),
            Value::CValue(handle) => {
                let numtype = self.scalar_numtype(TypeId(self.heap.header(handle).type_id()))?;
                Some(numtype.read(self.heap.bytes(handle)))
            }
            _ => None,
        }
    }

    pub fn is_number(&self, value: Value) -> bool {
        self.to_num(value).is_some()
    }

    /// Narrows `num` to a fixnum when possible, otherwise boxes it as int64,
    /// uint64 or, past the 64 bit range, as a double.
    pub fn number(&mut self, num: Num) -> Result<Value> {
        match num {
            Num::Int(n) => {
                if let Some(value) = i64::try_from(n).ok().and_then(Value::fixnum) {
                    Ok(value)
                } else if i64::try_from(n).is_ok() {
                    self.boxed(NumType::Int64, num)
                } else if u64::try_from(n).is_ok() {
                    self.boxed(NumType::Uint64, num)
                } else {
                    self.boxed(NumType::Double, Num::Float(n as f64))
                }
            }
            Num::Float(_) => self.boxed(NumType::Double, num),
        }
    }

    pub fn boxed(&mut self, numtype: NumType, num: Num) -> Result<Value> {
        let ty = self.prims.numeric[numtype as usize];
        self.box_as(ty, numtype, num)
    }

    pub fn double(&mut self, value: f64) -> Result<Value> {
        self.boxed(NumType::Double, Num::Float(value))
    }

    fn box_as(&mut self, ty: TypeId, numtype: NumType, num: Num) -> Result<Value> {
        let value = self.alloc_cvalue(ty, numtype.size())?;
        if let Value::CValue(handle) = value {
            numtype.write(num, self.heap.bytes_mut(handle));
        }
        Ok(value)
    }

    /// A wide character.
    pub fn wchar(&mut self, c: char) -> Result<Value> {
        self.box_as(self.prims.wchar, NumType::Int32, Num::Int(c as i128))
    }

    /// Builds a cvalue from a type descriptor and an initializer, `UNBOUND` for a
    /// zeroed value.
    pub fn cvalue_new(&mut self, descriptor: Value, init: Value) -> Result<Value> {
        self.push(descriptor)?;
        self.push(init)?;
        let result = self.cvalue_new_pinned(descriptor, init);
        self.pop();
        self.pop();
        result
    }

    fn cvalue_new_pinned(&mut self, descriptor: Value, init: Value) -> Result<Value> {
        let ty = self.get_type(descriptor)?;
        let (init_fn, size) = {
            let info = self.types.info(ty);
            (info.init, info.size)
        };
        match init_fn {
            Some(init_fn) if init != Value::UNBOUND => init_fn(self, ty, init),
            _ if size > 0 => self.alloc_cvalue(ty, size),
            _ => Err(self.type_error("c-value", "complete type", descriptor)),
        }
    }

    /// Element type, element size and element count of an array cvalue.
    fn array_shape(&self, value: Value) -> Option<(Handle, TypeId, usize, usize)> {
        let Value::CValue(handle) = value else {
            return None;
        };
        let info = self.types.info(TypeId(self.heap.header(handle).type_id()));
        let eltype = info.eltype?;
        let count = self.heap.header(handle).len() / info.elsz;
        Some((handle, eltype, info.elsz, count))
    }

    pub fn is_array(&self, value: Value) -> bool {
        self.array_shape(value).is_some()
    }

    pub fn array_length(&self, value: Value) -> Option<usize> {
        self.array_shape(value).map(|(.., count)| count)
    }

    /// Copies an element out of an array into a fresh cvalue of the element type.
    pub fn array_ref(&mut self, array: Value, index: Value) -> Result<Value> {
        let (_, eltype, elsz, count) = self
            .array_shape(array)
            .ok_or_else(|| self.type_error("aref", "array", array))?;
        let i = self.index(index, count, "aref", array)?;

        self.push(array)?;
        let element = self.alloc_cvalue(eltype, elsz);
        self.pop();
        let element = element?;

        let start = i * elsz;
        let mut copy = vec![0; elsz];
        if let Some(bytes) = self.cvalue_bytes(array) {
            copy.copy_from_slice(&bytes[start..start + elsz]);
        }
        if let Some(bytes) = self.cvalue_bytes_mut(element) {
            bytes.copy_from_slice(&copy);
        }
        Ok(element)
    }

    pub fn array_set(&mut self, array: Value, index: Value, item: Value) -> Result<()> {
        let (_, eltype, elsz, count) = self
            .array_shape(array)
            .ok_or_else(|| self.type_error("aset!", "array", array))?;
        let i = self.index(index, count, "aset!", array)?;
        self.write_element(array, eltype, i * elsz, item)
    }

    /// Validates an index against `count` elements.
    pub(crate) fn index(&self, index: Value, count: usize, op: &'static str, value: Value) -> Result<usize> {
        match index {
            Value::Fixnum(i) if i >= 0 && (i as usize) < count => Ok(i as usize),
            Value::Fixnum(_) => Err(self.bounds_error(op, value, index)),
            _ => Err(self.type_error(op, "fixnum", index)),
        }
    }

    fn write_element(&mut self, dest: Value, eltype: TypeId, offset: usize, item: Value) -> Result<()> {
        let elsz = self.types.info(eltype).size;
        if let Some(numtype) = self.types.info(eltype).numtype {
            if self.types.info(eltype).descriptor.is_symbol() {
                let num = self
                    .to_num(item)
                    .ok_or_else(|| self.type_error("c-value", "number", item))?;
                if let Some(bytes) = self.cvalue_bytes_mut(dest) {
                    numtype.write(num, &mut bytes[offset..offset + elsz]);
                }
                return Ok(());
            }
        }

        // Composite elements come either as a cvalue of the element type or as an
        // initializer for it.
        let item = if self.cvalue_type(item) == Some(eltype) {
            item
        } else {
            let init = self
                .types
                .info(eltype)
                .init
                .ok_or_else(|| self.type_error("c-value", "element value", item))?;
            self.push(dest)?;
            if let Err(error) = self.push(item) {
                self.pop();
                return Err(error);
            }
            let built = init(self, eltype, item);
            self.pop();
            self.pop();
            built?
        };

        let mut copy = vec![0; elsz];
        if let Some(bytes) = self.cvalue_bytes(item) {
            copy.copy_from_slice(&bytes[..elsz]);
        }
        if let Some(bytes) = self.cvalue_bytes_mut(dest) {
            bytes[offset..offset + elsz].copy_from_slice(&copy);
        }
        Ok(())
    }
}

/// Builds a scalar out of any number.
pub(crate) fn scalar_init(rt: &mut Runtime, ty: TypeId, arg: Value) -> Result<Value> {
    let numtype = rt
        .types
        .info(ty)
        .numtype
        .ok_or_else(|| rt.type_error("c-value", "scalar type", arg))?;
    let num = rt
        .to_num(arg)
        .ok_or_else(|| rt.type_error("c-value", "number", arg))?;
    rt.box_as(ty, numtype, num)
}

/// Builds an array out of a list or vector of elements. Sized arrays need an
/// exact element count, incomplete ones take their length from the initializer.
pub(crate) fn array_init(rt: &mut Runtime, ty: TypeId, arg: Value) -> Result<Value> {
    let info = rt.types.info(ty);
    let (size, elsz) = (info.size, info.elsz);
    let Some(eltype) = info.eltype else {
        return Err(rt.type_error("c-value", "array type", arg));
    };

    let elements: Vec<Value> = match arg {
        Value::Vector(handle) => {
            let len = rt.heap.header(handle).len();
            (0..len).map(|i| rt.heap.field(handle, i)).collect()
        }
        _ => rt
            .list_to_vec(arg)
            .ok_or_else(|| rt.type_error("c-value", "list", arg))?,
    };

    let total = elements
        .len()
        .checked_mul(elsz)
        .ok_or(RuntimeError::OutOfMemory("array is too large"))?;
    let incomplete = rt.types.info(eltype).artype == Some(ty);
    if !incomplete && total != size {
        return Err(rt.bounds_error("c-value", arg, Value::Fixnum(elements.len() as i64)));
    }

    let array = rt.alloc_cvalue(ty, total)?;
    rt.push(array)?;
    let mut result = Ok(array);
    for (i, element) in elements.into_iter().enumerate() {
        if let Err(error) = rt.write_element(array, eltype, i * elsz, element) {
            result = Err(error);
            break;
        }
    }
    rt.pop();
    result
}

/// Builds an enum out of a member symbol or a member index.
pub(crate) fn enum_init(rt: &mut Runtime, ty: TypeId, arg: Value) -> Result<Value> {
    let descriptor = rt.types.info(ty).descriptor;
    let members = rt.cdr(descriptor)?;
    let members = rt
        .list_to_vec(members)
        .ok_or_else(|| rt.malformed_type(descriptor, "enum members must be symbols"))?;

    let index = match arg {
        Value::Symbol(_) => members.iter().position(|member| *member == arg),
        Value::Fixnum(n) if n >= 0 && (n as usize) < members.len() => Some(n as usize),
        Value::Fixnum(_) => None,
        _ => return Err(rt.type_error("c-value", "enum member", arg)),
    };
    let index = index.ok_or_else(|| rt.bounds_error("c-value", descriptor, arg))?;
    rt.box_as(ty, NumType::Int32, Num::Int(index as i128))
}
