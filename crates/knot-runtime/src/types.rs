//! The type registry. A cvalue's type is described by a lisp value, `int32`,
//! `(array char)`, `(array (array int8 2) 3)`, `(enum red green)` and so on.
//! [Runtime::get_type] interns descriptors into [TypeInfo] records, memoized by
//! structural equality, so every cvalue only carries a small [TypeId].

use std::fmt::Debug;

use fxhash::FxHashMap;

use crate::cvalue;
use crate::error::{Result, RuntimeError};
use crate::heap::{Tracer, MAX_TYPE_ID};
use crate::runtime::Runtime;
use crate::symbol::SymbolId;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TypeId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Double,
}

impl NumType {
    pub const ALL: [NumType; 10] = [
        NumType::Int8,
        NumType::Uint8,
        NumType::Int16,
        NumType::Uint16,
        NumType::Int32,
        NumType::Uint32,
        NumType::Int64,
        NumType::Uint64,
        NumType::Float,
        NumType::Double,
    ];

    pub fn size(self) -> usize {
        match self {
            NumType::Int8 | NumType::Uint8 => 1,
            NumType::Int16 | NumType::Uint16 => 2,
            NumType::Int32 | NumType::Uint32 | NumType::Float => 4,
            NumType::Int64 | NumType::Uint64 | NumType::Double => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NumType::Int8 => "int8",
            NumType::Uint8 => "uint8",
            NumType::Int16 => "int16",
            NumType::Uint16 => "uint16",
            NumType::Int32 => "int32",
            NumType::Uint32 => "uint32",
            NumType::Int64 => "int64",
            NumType::Uint64 => "uint64",
            NumType::Float => "float",
            NumType::Double => "double",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumType::Float | NumType::Double)
    }

    /// Scalar type names understood by the registry, including the aliases.
    pub fn from_name(name: &str) -> Option<NumType> {
        Some(match name {
            "long" => NumType::Int64,
            "ulong" => NumType::Uint64,
            "char" => NumType::Uint8,
            "wchar" => NumType::Int32,
            _ => return NumType::ALL.into_iter().find(|numtype| numtype.name() == name),
        })
    }
}

/// Renders a cvalue of an opaque type.
pub type PrintFn = fn(&Runtime, Value, &mut dyn std::fmt::Write) -> std::fmt::Result;

/// Called while the collector scans a cvalue, so values kept inside of its bytes
/// survive.
pub type RelocateFn = fn(&mut Tracer<'_>, Value);

/// Called with the payload of a cvalue that did not survive a collection.
pub type FreeFn = fn(TypeId, &[u8]);

/// Builds a cvalue of the given type out of an initializer value.
pub type InitFn = fn(&mut Runtime, TypeId, Value) -> Result<Value>;

/// Hooks of a host defined type, a missing hook means the default behaviour.
#[derive(Clone, Copy, Default)]
pub struct CValueVTable {
    pub print: Option<PrintFn>,
    pub relocate: Option<RelocateFn>,
    pub free: Option<FreeFn>,
}

impl Debug for CValueVTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CValueVTable")
            .field("print", &self.print.is_some())
            .field("relocate", &self.relocate.is_some())
            .field("free", &self.free.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub struct TypeInfo {
    pub descriptor: Value,
    pub size: usize,
    pub align: usize,
    pub numtype: Option<NumType>,
    pub eltype: Option<TypeId>,
    pub elsz: usize,

    /// The incomplete array type whose elements are of this type, once known.
    pub artype: Option<TypeId>,
    pub vtable: CValueVTable,
    pub init: Option<InitFn>,
}

impl Debug for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeInfo")
            .field("descriptor", &self.descriptor)
            .field("size", &self.size)
            .field("numtype", &self.numtype)
            .field("eltype", &self.eltype)
            .field("elsz", &self.elsz)
            .field("artype", &self.artype)
            .field("vtable", &self.vtable)
            .finish()
    }
}

impl TypeInfo {
    fn new(descriptor: Value) -> TypeInfo {
        TypeInfo {
            descriptor,
            size: 0,
            align: 1,
            numtype: None,
            eltype: None,
            elsz: 0,
            artype: None,
            vtable: CValueVTable::default(),
            init: None,
        }
    }

    pub fn is_array(&self) -> bool {
        self.eltype.is_some()
    }
}

#[derive(Default)]
pub struct TypeRegistry {
    infos: Vec<TypeInfo>,
    memo: FxHashMap<u64, Vec<(Value, TypeId)>>,
    structural_lookups: usize,
}

impl TypeRegistry {
    pub fn info(&self, id: TypeId) -> &TypeInfo {
        &self.infos[id.0 as usize]
    }

    pub(crate) fn info_mut(&mut self, id: TypeId) -> &mut TypeInfo {
        &mut self.infos[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Number of lookups that had to go through the structural memo table.
    pub fn structural_lookups(&self) -> usize {
        self.structural_lookups
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeInfo)> {
        self.infos
            .iter()
            .enumerate()
            .map(|(i, info)| (TypeId(i as u32), info))
    }

    fn push(&mut self, info: TypeInfo) -> Result<TypeId> {
        if self.infos.len() > MAX_TYPE_ID as usize {
            return Err(RuntimeError::OutOfMemory("type registry is full"));
        }
        self.infos.push(info);
        Ok(TypeId(self.infos.len() as u32 - 1))
    }

    /// Descriptor keys are heap values, relocate them and keep each record's
    /// descriptor in sync with its key.
    pub(crate) fn relocate_type_table(&mut self, tracer: &mut Tracer<'_>) {
        for bucket in self.memo.values_mut() {
            for (key, id) in bucket.iter_mut() {
                let moved = tracer.relocate(*key);
                if moved != *key {
                    *key = moved;
                    self.infos[id.0 as usize].descriptor = moved;
                }
            }
        }
    }
}

impl Runtime {
    /// Interns a type descriptor. Structurally equal descriptors always yield
    /// the same record.
    pub fn get_type(&mut self, descriptor: Value) -> Result<TypeId> {
        if let Value::Symbol(symbol) = descriptor {
            if let Some(id) = self.symbols.entry(symbol).type_info {
                return Ok(id);
            }
        }

        self.types.structural_lookups += 1;
        let hash = self.hash_equal(descriptor);
        if let Some(bucket) = self.types.memo.get(&hash) {
            for (key, id) in bucket {
                if self.equal(*key, descriptor) {
                    return Ok(*id);
                }
            }
        }

        let (info, incomplete) = self.build_type(descriptor)?;
        let eltype = info.eltype;
        let id = self.types.push(info)?;
        self.types.memo.entry(hash).or_default().push((descriptor, id));

        if let Value::Symbol(symbol) = descriptor {
            self.symbols.entry_mut(symbol).type_info = Some(id);
        }
        if let (Some(eltype), true) = (eltype, incomplete) {
            self.types.info_mut(eltype).artype = Some(id);
        }
        Ok(id)
    }

    /// Builds a fresh record, also telling whether it is an incomplete array.
    fn build_type(&mut self, descriptor: Value) -> Result<(TypeInfo, bool)> {
        let mut info = TypeInfo::new(descriptor);
        let mut incomplete = false;
        match descriptor {
            Value::Symbol(symbol) => {
                let numtype = NumType::from_name(self.symbols.name(symbol))
                    .ok_or_else(|| self.malformed_type(descriptor, "unknown type name"))?;
                info.size = numtype.size();
                info.align = numtype.size();
                info.numtype = Some(numtype);
                info.init = Some(cvalue::scalar_init);
            }
            Value::Cons(_) if self.car(descriptor)? == Value::Symbol(self.known.array) => {
                let rest = self.cdr(descriptor)?;
                if !rest.is_cons() {
                    return Err(self.malformed_type(descriptor, "array type needs an element type"));
                }

                let element = self.car(rest)?;
                let eltype = self.get_type(element)?;
                let element_info = self.types.info(eltype);
                if element_info.size == 0 {
                    return Err(self.malformed_type(descriptor, "array of an incomplete type"));
                }
                info.elsz = element_info.size;
                info.align = element_info.align;
                info.eltype = Some(eltype);
                info.init = Some(cvalue::array_init);

                // `(array T)` is incomplete, its size comes from each initializer.
                if self.cdr(rest)?.is_cons() {
                    (info.size, info.align) = self.sizeof(descriptor)?;
                } else {
                    incomplete = true;
                }
            }
            Value::Cons(_) if self.car(descriptor)? == Value::Symbol(self.known.enumeration) => {
                (info.size, info.align) = self.sizeof(descriptor)?;
                info.numtype = Some(NumType::Int32);
                info.init = Some(cvalue::enum_init);
            }
            _ => return Err(self.malformed_type(descriptor, "not a type descriptor")),
        }
        Ok((info, incomplete))
    }

    /// Size and alignment of a complete type.
    pub fn sizeof(&mut self, descriptor: Value) -> Result<(usize, usize)> {
        match descriptor {
            Value::Symbol(symbol) => {
                if let Some(id) = self.symbols.entry(symbol).type_info {
                    let info = self.types.info(id);
                    if info.size == 0 {
                        return Err(self.malformed_type(descriptor, "incomplete type has no size"));
                    }
                    return Ok((info.size, info.align));
                }
                NumType::from_name(self.symbols.name(symbol))
                    .map(|numtype| (numtype.size(), numtype.size()))
                    .ok_or_else(|| self.malformed_type(descriptor, "unknown type name"))
            }
            Value::Cons(_) => {
                let head = self.car(descriptor)?;
                if head == Value::Symbol(self.known.enumeration) {
                    let members = self.cdr(descriptor)?;
                    let members = self
                        .list_to_vec(members)
                        .filter(|members| members.iter().all(Value::is_symbol))
                        .ok_or_else(|| self.malformed_type(descriptor, "enum members must be symbols"))?;
                    if members.is_empty() {
                        return Err(self.malformed_type(descriptor, "enum has no members"));
                    }
                    return Ok((4, 4));
                }
                if head != Value::Symbol(self.known.array) {
                    return Err(self.malformed_type(descriptor, "unknown type constructor"));
                }

                let parts = self
                    .list_to_vec(descriptor)
                    .ok_or_else(|| self.malformed_type(descriptor, "improper array type"))?;
                let [_, element, length] = parts[..] else {
                    return Err(self.malformed_type(descriptor, "incomplete type has no size"));
                };
                let length = match length {
                    Value::Fixnum(n) if n >= 0 => n as usize,
                    _ => return Err(self.malformed_type(descriptor, "invalid array length")),
                };
                let (elsz, align) = self.sizeof(element)?;
                let size = elsz
                    .checked_mul(length)
                    .filter(|size| *size <= u32::MAX as usize)
                    .ok_or_else(|| self.malformed_type(descriptor, "array is too large"))?;
                Ok((size, align))
            }
            _ => Err(self.malformed_type(descriptor, "not a type descriptor")),
        }
    }

    /// The incomplete array type `(array element)`, cached on the element record.
    pub fn get_array_type(&mut self, element: Value) -> Result<TypeId> {
        let eltype = self.get_type(element)?;
        if let Some(artype) = self.types.info(eltype).artype {
            return Ok(artype);
        }

        self.push(element)?;
        let descriptor = self.list(&[Value::Symbol(self.known.array), element]);
        self.pop();
        self.get_type(descriptor?)
    }

    /// Registers a host type under `name`. Registering the same name again
    /// returns the first record untouched.
    pub fn define_opaque_type(
        &mut self,
        name: SymbolId,
        size: usize,
        vtable: CValueVTable,
        init: Option<InitFn>,
    ) -> Result<TypeId> {
        if let Some(id) = self.symbols.entry(name).type_info {
            return Ok(id);
        }

        let descriptor = Value::Symbol(name);
        let hash = self.hash_equal(descriptor);
        let id = self.types.push(TypeInfo {
            size,
            align: 8,
            vtable,
            init,
            ..TypeInfo::new(descriptor)
        })?;
        self.types.memo.entry(hash).or_default().push((descriptor, id));
        self.symbols.entry_mut(name).type_info = Some(id);
        tracing::trace!(name = self.symbols.name(name), size, "opaque type defined");
        Ok(id)
    }

    pub fn type_info(&self, id: TypeId) -> &TypeInfo {
        self.types.info(id)
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Registers the scalar and string types every runtime starts with.
    pub(crate) fn types_init(&mut self) -> Result<()> {
        for numtype in NumType::ALL {
            let symbol = self.intern(numtype.name());
            self.prims.numeric[numtype as usize] = self.get_type(symbol)?;
        }
        for alias in ["long", "ulong"] {
            let symbol = self.intern(alias);
            self.get_type(symbol)?;
        }

        let char = self.intern("char");
        let wchar = self.intern("wchar");
        self.prims.char = self.get_type(char)?;
        self.prims.wchar = self.get_type(wchar)?;
        self.prims.string = self.get_array_type(char)?;
        self.prims.wcstring = self.get_array_type(wchar)?;

        let uint8 = self.intern("uint8");
        self.prims.bytes = self.get_array_type(uint8)?;

        let string = self.known.string;
        let wcstring = self.known.wcstring;
        self.define_constant(string, self.types.info(self.prims.string).descriptor)?;
        self.define_constant(wcstring, self.types.info(self.prims.wcstring).descriptor)?;
        Ok(())
    }
}
