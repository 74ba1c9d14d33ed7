//! Resolution callbacks: the seams between the codec, the object graph and
//! the embedding application.

use std::io::Read;

use crate::bytecode::Bytecode;
use crate::error::PersistResult;
use crate::process::Process;
use crate::value::{ArrayObject, HashObject, RecordType, RecordValue, Shared, Value};
use crate::wire::TagNode;

/// Resolves references the value codec cannot decode on its own.
///
/// Returning `None` means the kind is not supported by this context; the codec
/// turns that into an error.
pub trait LoadContext {
    fn load_procedure(&mut self, id: u32) -> Option<Shared<Bytecode>>;
    fn load_array(&mut self, id: u32) -> Option<Shared<ArrayObject>>;
    fn load_hash(&mut self, id: u32) -> Option<Shared<HashObject>>;
    fn load_record(&mut self, id: u32) -> Option<Shared<RecordValue>>;
    fn load_record_type(&mut self, id: u32) -> Option<Shared<RecordType>>;

    /// Decodes a generic tag (contexts, mutexes and host-defined kinds).
    /// `aux` is positioned at this value's auxiliary bytes.
    fn load_context(&mut self, tag: TagNode, aux: &mut dyn Read) -> PersistResult<Option<Value>>;
}

/// Assigns stream IDs to heap objects on the writer side.
pub trait SaveContext {
    fn procedure_id(&mut self, procedure: &Shared<Bytecode>) -> u32;
    fn array_id(&mut self, array: &Shared<ArrayObject>) -> u32;
    fn hash_id(&mut self, hash: &Shared<HashObject>) -> u32;
    fn record_id(&mut self, record: &Shared<RecordValue>) -> u32;
    fn record_type_id(&mut self, ty: &Shared<RecordType>) -> u32;
}

/// Resolution callback for scalar-only decoding: every composite or generic
/// reference is refused.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScalarsOnly;

impl LoadContext for ScalarsOnly {
    fn load_procedure(&mut self, _id: u32) -> Option<Shared<Bytecode>> {
        None
    }

    fn load_array(&mut self, _id: u32) -> Option<Shared<ArrayObject>> {
        None
    }

    fn load_hash(&mut self, _id: u32) -> Option<Shared<HashObject>> {
        None
    }

    fn load_record(&mut self, _id: u32) -> Option<Shared<RecordValue>> {
        None
    }

    fn load_record_type(&mut self, _id: u32) -> Option<Shared<RecordType>> {
        None
    }

    fn load_context(&mut self, _tag: TagNode, _aux: &mut dyn Read) -> PersistResult<Option<Value>> {
        Ok(None)
    }
}

/// What an embedding application supplies to the object loader.
pub trait EmbeddingHost {
    /// Creates the process shell that a process object is loaded into.
    fn create_process(&mut self, id: u32) -> Process {
        Process::new(id)
    }

    /// Decodes generic tags other than the built-in context and mutex kinds.
    /// Return a `Value::HostContext` to have the value save back under its
    /// own tag; `aux` is positioned at this value's auxiliary bytes.
    fn decode_context(&mut self, tag: TagNode, aux: &mut dyn Read) -> PersistResult<Option<Value>> {
        let _ = (tag, aux);
        Ok(None)
    }
}

/// Host with no extra value kinds.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHost;

impl EmbeddingHost for DefaultHost {}
