//! Identity maps for the heap objects of one load.
//!
//! Every reference in a stream is a numeric ID. The first lookup of an ID,
//! whether it comes from a value tag or from the object's own definition,
//! creates an empty object; later lookups return that same instance. A
//! forward reference therefore sees the object fill in once its definition
//! is read, and a reference whose definition never appears stays a valid
//! empty object.

use std::collections::BTreeMap;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::bytecode::Bytecode;
use crate::context::LoadContext;
use crate::error::PersistResult;
use crate::value::{shared, ArrayObject, HashObject, RecordType, RecordValue, Shared, Value};
use crate::wire::{tag, TagNode};

/// Object counts, one per identity map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub procedures: usize,
    pub arrays: usize,
    pub hashes: usize,
    pub records: usize,
    pub record_types: usize,
}

impl GraphStats {
    pub fn total(&self) -> usize {
        self.procedures + self.arrays + self.hashes + self.records + self.record_types
    }
}

#[derive(Debug, Default)]
pub struct ObjectGraph {
    procedures: BTreeMap<u32, Shared<Bytecode>>,
    arrays: BTreeMap<u32, Shared<ArrayObject>>,
    hashes: BTreeMap<u32, Shared<HashObject>>,
    records: BTreeMap<u32, Shared<RecordValue>>,
    record_types: BTreeMap<u32, Shared<RecordType>>,
}

fn get_or_create<T: Default>(map: &mut BTreeMap<u32, Shared<T>>, id: u32) -> Shared<T> {
    map.entry(id).or_insert_with(|| shared(T::default())).clone()
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Lookup-or-create
    // =========================================================================

    pub fn procedure(&mut self, id: u32) -> Shared<Bytecode> {
        get_or_create(&mut self.procedures, id)
    }

    pub fn array(&mut self, id: u32) -> Shared<ArrayObject> {
        get_or_create(&mut self.arrays, id)
    }

    pub fn hash(&mut self, id: u32) -> Shared<HashObject> {
        get_or_create(&mut self.hashes, id)
    }

    pub fn record(&mut self, id: u32) -> Shared<RecordValue> {
        get_or_create(&mut self.records, id)
    }

    pub fn record_type(&mut self, id: u32) -> Shared<RecordType> {
        get_or_create(&mut self.record_types, id)
    }

    // =========================================================================
    // Read-only access
    // =========================================================================

    pub fn find_procedure(&self, id: u32) -> Option<Shared<Bytecode>> {
        self.procedures.get(&id).cloned()
    }

    pub fn find_array(&self, id: u32) -> Option<Shared<ArrayObject>> {
        self.arrays.get(&id).cloned()
    }

    pub fn find_hash(&self, id: u32) -> Option<Shared<HashObject>> {
        self.hashes.get(&id).cloned()
    }

    pub fn find_record(&self, id: u32) -> Option<Shared<RecordValue>> {
        self.records.get(&id).cloned()
    }

    pub fn find_record_type(&self, id: u32) -> Option<Shared<RecordType>> {
        self.record_types.get(&id).cloned()
    }

    /// Procedures in ascending ID order.
    pub fn procedures(&self) -> impl Iterator<Item = (u32, &Shared<Bytecode>)> {
        self.procedures.iter().map(|(id, procedure)| (*id, procedure))
    }

    pub fn arrays(&self) -> impl Iterator<Item = (u32, &Shared<ArrayObject>)> {
        self.arrays.iter().map(|(id, array)| (*id, array))
    }

    pub fn hashes(&self) -> impl Iterator<Item = (u32, &Shared<HashObject>)> {
        self.hashes.iter().map(|(id, hash)| (*id, hash))
    }

    pub fn records(&self) -> impl Iterator<Item = (u32, &Shared<RecordValue>)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    pub fn record_types(&self) -> impl Iterator<Item = (u32, &Shared<RecordType>)> {
        self.record_types.iter().map(|(id, ty)| (*id, ty))
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            procedures: self.procedures.len(),
            arrays: self.arrays.len(),
            hashes: self.hashes.len(),
            records: self.records.len(),
            record_types: self.record_types.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stats().total() == 0
    }
}

/// Decodes the two generic kinds every loader understands.
pub(crate) fn builtin_context(node: TagNode) -> Option<Value> {
    match node.code {
        tag::CONTEXT => Some(Value::Context(node.payload)),
        tag::MUTEX => Some(Value::Mutex(node.payload)),
        _ => None,
    }
}

impl LoadContext for ObjectGraph {
    fn load_procedure(&mut self, id: u32) -> Option<Shared<Bytecode>> {
        Some(self.procedure(id))
    }

    fn load_array(&mut self, id: u32) -> Option<Shared<ArrayObject>> {
        Some(self.array(id))
    }

    fn load_hash(&mut self, id: u32) -> Option<Shared<HashObject>> {
        Some(self.hash(id))
    }

    fn load_record(&mut self, id: u32) -> Option<Shared<RecordValue>> {
        Some(self.record(id))
    }

    fn load_record_type(&mut self, id: u32) -> Option<Shared<RecordType>> {
        Some(self.record_type(id))
    }

    fn load_context(&mut self, node: TagNode, _aux: &mut dyn Read) -> PersistResult<Option<Value>> {
        Ok(builtin_context(node))
    }
}

#[cfg(test)]
#[path = "tests/graph_tests.rs"]
mod tests;
