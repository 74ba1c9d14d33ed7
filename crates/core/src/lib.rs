//! Binary persistence for a stack-based script machine.
//!
//! Layers, leaves first:
//! - [`wire`]: fixed-layout headers shared by reader and writer.
//! - [`chunk`]: the self-describing object container.
//! - [`codec`]: tag/value encoding of runtime values, including the 48-bit float.
//! - [`loader`] and [`saver`]: whole object graphs, with identity maps that
//!   resolve forward references.
//! - [`storage`]: object files and VM state files.

pub mod bytecode;
pub mod charset;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod context;
mod error;
pub mod float48;
pub mod graph;
pub mod inspect;
pub mod loader;
pub mod process;
pub mod resource;
pub mod saver;
pub mod storage;
pub mod value;
pub mod version;
pub mod wire;

pub use bytecode::{Bytecode, Instruction, LineEntry, ProcFlags};
pub use charset::{Charset, CharsetConverter, Latin1, Utf8};
pub use chunk::{ChunkReader, ChunkWriter, Property};
pub use codec::{ValueLoader, ValueSaver};
pub use config::{ConfigError, PersistConfig};
pub use context::{DefaultHost, EmbeddingHost, LoadContext, SaveContext, ScalarsOnly};
pub use error::{PersistError, PersistResult};
pub use graph::{GraphStats, ObjectGraph};
pub use inspect::{summarize_file, summarize_objects, FileKind, FileSummary, ObjectSummary};
pub use loader::{LoadedObject, ObjectLoader};
pub use process::{CallFrame, ExceptionHandler, Process, ProcessStatus};
pub use resource::LoadLimits;
pub use saver::ObjectSaver;
pub use storage::{
    copy_object_file, copy_vm_state, load_object_file, load_vm_state, read_object_file,
    read_vm_state, save_object_file, save_vm_state, write_object_file, write_vm_state,
    ObjectFile, VmState,
};
pub use value::{
    shared, ArrayObject, HashObject, HostContext, RecordType, RecordValue, Shared, Value,
};
pub use wire::{ObjectKind, TagNode};
