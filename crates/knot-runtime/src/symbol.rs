//! Interned symbols. Every name maps to exactly one [SymbolId] for the life of the
//! runtime, and each symbol owns a global value cell.

use fxhash::FxHashMap;

use crate::heap::Tracer;
use crate::types::TypeId;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub(crate) u32);

#[derive(Debug)]
pub struct SymbolEntry {
    pub name: Box<str>,
    pub value: Value,
    pub constant: bool,

    /// Type record cached by the registry when this symbol is used as a type
    /// descriptor.
    pub type_info: Option<TypeId>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    index: FxHashMap<Box<str>, SymbolId>,
}

impl SymbolTable {
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }

        let id = SymbolId(self.entries.len() as u32);
        self.entries.push(SymbolEntry {
            name: name.into(),
            value: Value::UNBOUND,
            constant: false,
            type_info: None,
        });
        self.index.insert(name.into(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.index.get(name).copied()
    }

    pub fn name(&self, id: SymbolId) -> &str {
        &self.entries[id.0 as usize].name
    }

    pub fn entry(&self, id: SymbolId) -> &SymbolEntry {
        &self.entries[id.0 as usize]
    }

    pub fn entry_mut(&mut self, id: SymbolId) -> &mut SymbolEntry {
        &mut self.entries[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &SymbolEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (SymbolId(i as u32), entry))
    }

    /// Global value cells are roots.
    pub(crate) fn relocate(&mut self, tracer: &mut Tracer<'_>) {
        for entry in self.entries.iter_mut() {
            entry.value = tracer.relocate(entry.value);
        }
    }
}
