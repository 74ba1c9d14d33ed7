//! Object graph saver: the writer-side mirror of [`ObjectLoader`](crate::loader::ObjectLoader).
//!
//! Heap objects get IDs by pointer identity the first time they are
//! referenced, starting at 1. Each referenced object is queued and written
//! exactly once, so shared and cyclic structures come back with the same
//! shape.

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Seek, Write};
use std::rc::Rc;

use tracing::debug;

use crate::bytecode::Bytecode;
use crate::charset::{CharsetConverter, Latin1};
use crate::chunk::ChunkWriter;
use crate::codec::ValueSaver;
use crate::context::SaveContext;
use crate::error::{writer_error, PersistResult};
use crate::process::{CallFrame, Process};
use crate::value::{ArrayObject, HashObject, RecordType, RecordValue, Shared, Value};
use crate::wire::{FrameHeader, ObjectKind, ProcedureHeader, ProcessHeader};

const PROCEDURE_PROPERTIES: u32 = 8;
const PROCESS_PROPERTIES: u32 = 6;
const FRAME_PROPERTIES: u32 = 3;

enum Pending {
    Procedure(u32, Shared<Bytecode>),
    Array(u32, Shared<ArrayObject>),
    Hash(u32, Shared<HashObject>),
    Record(u32, Shared<RecordValue>),
    RecordType(u32, Shared<RecordType>),
}

/// Pointer-identity ID table. Keeps every registered object alive so an
/// address can never be reused for a different object during one save.
#[derive(Default)]
struct Registry {
    next_id: u32,
    ids: HashMap<*const (), u32>,
    pending: VecDeque<Pending>,
    retained: Vec<Pending>,
}

impl Registry {
    fn id_for<T>(&mut self, object: &Shared<T>, wrap: fn(u32, Shared<T>) -> Pending) -> u32 {
        let key = Rc::as_ptr(object) as *const ();
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.ids.insert(key, id);
        self.pending.push_back(wrap(id, Rc::clone(object)));
        id
    }
}

impl SaveContext for Registry {
    fn procedure_id(&mut self, procedure: &Shared<Bytecode>) -> u32 {
        self.id_for(procedure, Pending::Procedure)
    }

    fn array_id(&mut self, array: &Shared<ArrayObject>) -> u32 {
        self.id_for(array, Pending::Array)
    }

    fn hash_id(&mut self, hash: &Shared<HashObject>) -> u32 {
        self.id_for(hash, Pending::Hash)
    }

    fn record_id(&mut self, record: &Shared<RecordValue>) -> u32 {
        self.id_for(record, Pending::Record)
    }

    fn record_type_id(&mut self, ty: &Shared<RecordType>) -> u32 {
        self.id_for(ty, Pending::RecordType)
    }
}

pub struct ObjectSaver<W> {
    chunks: ChunkWriter<W>,
    charset: Box<dyn CharsetConverter>,
    registry: Registry,
    written: usize,
}

impl<W: Write + Seek> ObjectSaver<W> {
    /// Starts writing objects at the sink's current position.
    pub fn new(out: W) -> Self {
        Self {
            chunks: ChunkWriter::new(out),
            charset: Box::new(Latin1),
            registry: Registry::default(),
            written: 0,
        }
    }

    pub fn with_charset(mut self, charset: Box<dyn CharsetConverter>) -> Self {
        self.charset = charset;
        self
    }

    /// Bytes outside any object, e.g. a file header.
    pub fn write_raw(&mut self, bytes: &[u8]) -> PersistResult<()> {
        self.chunks.write_raw(bytes)
    }

    /// Assigns `procedure` an ID and queues it for writing.
    pub fn register_procedure(&mut self, procedure: &Shared<Bytecode>) -> u32 {
        self.registry.procedure_id(procedure)
    }

    /// Writes a process object, then everything it references.
    pub fn save_process(&mut self, process: &Process) -> PersistResult<()> {
        let Self {
            chunks,
            charset,
            registry,
            ..
        } = self;
        let values = ValueSaver::new(&**charset);
        write_process(chunks, &values, registry, process)?;
        self.written += 1;
        self.flush()?;
        Ok(())
    }

    /// Writes every queued object, including objects they queue in turn.
    /// Returns how many were written by this call.
    pub fn flush(&mut self) -> PersistResult<usize> {
        let mut flushed = 0;
        while let Some(item) = self.registry.pending.pop_front() {
            let Self {
                chunks,
                charset,
                registry,
                ..
            } = self;
            let values = ValueSaver::new(&**charset);
            match &item {
                Pending::Procedure(id, procedure) => {
                    write_procedure(chunks, &values, registry, *id, &procedure.borrow())?
                }
                Pending::Array(id, array) => {
                    write_array(chunks, &values, registry, *id, &array.borrow())?
                }
                Pending::Hash(id, hash) => write_hash(chunks, &values, registry, *id, &hash.borrow())?,
                Pending::Record(id, record) => {
                    write_record(chunks, &values, registry, *id, &record.borrow())?
                }
                Pending::RecordType(id, ty) => {
                    write_record_type(chunks, &values, *id, &ty.borrow())?
                }
            }
            self.registry.retained.push(item);
            flushed += 1;
        }
        self.written += flushed;
        Ok(flushed)
    }

    /// Objects written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes the queue and returns the sink.
    pub fn finish(mut self) -> PersistResult<W> {
        self.flush()?;
        self.chunks.into_inner()
    }
}

fn count(len: usize, what: &str) -> PersistResult<u32> {
    u32::try_from(len).map_err(|_| writer_error(format!("{what} has {len} entries")))
}

fn write_segment<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    values: &ValueSaver<'_>,
    registry: &mut Registry,
    items: &[Value],
) -> PersistResult<()> {
    let mut buf = Vec::new();
    values.save_segment(&mut buf, items, registry)?;
    chunks.write_property(count(items.len(), "value segment")?, &buf)
}

fn write_names<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    values: &ValueSaver<'_>,
    names: &[String],
) -> PersistResult<()> {
    let mut buf = Vec::new();
    values.save_names(&mut buf, names)?;
    chunks.write_property(count(names.len(), "name table")?, &buf)
}

fn write_text<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    values: &ValueSaver<'_>,
    text: Option<&str>,
) -> PersistResult<()> {
    let bytes = text.map(|text| values.encode_text(text)).unwrap_or_default();
    chunks.write_property(0, &bytes)
}

fn write_words<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    entries: usize,
    words: impl IntoIterator<Item = u32>,
) -> PersistResult<()> {
    let buf: Vec<u8> = words.into_iter().flat_map(u32::to_le_bytes).collect();
    chunks.write_property(count(entries, "word table")?, &buf)
}

fn write_procedure<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    values: &ValueSaver<'_>,
    registry: &mut Registry,
    id: u32,
    bc: &Bytecode,
) -> PersistResult<()> {
    chunks.start_object(ObjectKind::Procedure.as_u32(), id, PROCEDURE_PROPERTIES)?;
    let header = ProcedureHeader {
        flags: bc.flags.bits(),
        min_args: bc.min_args,
        max_args: bc.max_args,
        label_count: bc.label_count,
    };
    chunks.write_property(1, &header.to_bytes())?;
    write_segment(chunks, values, registry, &bc.literals)?;
    write_names(chunks, values, &bc.names)?;
    write_words(chunks, bc.code.len(), bc.code.iter().map(|ins| ins.to_word()))?;
    write_names(chunks, values, &bc.local_names)?;
    write_text(chunks, values, bc.name.as_deref())?;
    write_text(chunks, values, bc.debug_file.as_deref())?;
    write_words(
        chunks,
        bc.lines.len(),
        bc.lines.iter().flat_map(|entry| [entry.address, entry.line]),
    )?;
    chunks.end_object()?;
    debug!(id, name = ?bc.name, "procedure written");
    Ok(())
}

fn write_array<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    values: &ValueSaver<'_>,
    registry: &mut Registry,
    id: u32,
    array: &ArrayObject,
) -> PersistResult<()> {
    chunks.start_object(ObjectKind::Array.as_u32(), id, 2)?;
    write_words(chunks, array.dims().len(), array.dims().iter().copied())?;
    write_segment(chunks, values, registry, array.values())?;
    chunks.end_object()?;
    debug!(id, elements = array.len(), "array written");
    Ok(())
}

fn write_hash<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    values: &ValueSaver<'_>,
    registry: &mut Registry,
    id: u32,
    hash: &HashObject,
) -> PersistResult<()> {
    chunks.start_object(ObjectKind::Hash.as_u32(), id, 2)?;
    write_names(chunks, values, &hash.names)?;
    write_segment(chunks, values, registry, &hash.values)?;
    chunks.end_object()?;
    debug!(id, entries = hash.len(), "hash written");
    Ok(())
}

fn write_record_type<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    values: &ValueSaver<'_>,
    id: u32,
    ty: &RecordType,
) -> PersistResult<()> {
    chunks.start_object(ObjectKind::RecordType.as_u32(), id, 1)?;
    write_names(chunks, values, &ty.fields)?;
    chunks.end_object()?;
    debug!(id, fields = ty.fields.len(), "record type written");
    Ok(())
}

fn write_record<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    values: &ValueSaver<'_>,
    registry: &mut Registry,
    id: u32,
    record: &RecordValue,
) -> PersistResult<()> {
    chunks.start_object(ObjectKind::Record.as_u32(), id, 2)?;
    let type_id = registry.record_type_id(&record.ty);
    chunks.write_property(1, &type_id.to_le_bytes())?;
    write_segment(chunks, values, registry, &record.slots)?;
    chunks.end_object()?;
    debug!(id, type_id, "record written");
    Ok(())
}

fn write_process<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    values: &ValueSaver<'_>,
    registry: &mut Registry,
    process: &Process,
) -> PersistResult<()> {
    let context_depth = u16::try_from(process.context_depth()).map_err(|_| {
        writer_error(format!(
            "process {} context depth {} does not fit 16 bits",
            process.id,
            process.context_depth()
        ))
    })?;
    chunks.start_object(ObjectKind::Process.as_u32(), process.id, PROCESS_PROPERTIES)?;
    let header = ProcessHeader {
        priority: process.priority,
        kind: process.kind,
        context_depth,
    };
    chunks.write_property(1, &header.to_bytes())?;
    write_text(chunks, values, process.name.as_deref())?;

    // Frames are staged in memory: the nested writer needs its own seekable sink.
    let mut frames = ChunkWriter::new(Cursor::new(Vec::new()));
    for (index, frame) in process.frames.iter().enumerate() {
        write_frame(&mut frames, values, registry, count(index + 1, "frame stack")?, frame)?;
    }
    let staged = frames.into_inner()?.into_inner();
    chunks.write_property(count(process.frames.len(), "frame stack")?, &staged)?;

    write_segment(chunks, values, registry, &process.contexts)?;
    write_words(
        chunks,
        process.handlers.len(),
        process.handlers.iter().flat_map(|handler| {
            [
                handler.catch_pc,
                handler.finally_pc,
                handler.exit_pc,
                handler.context_depth,
            ]
        }),
    )?;
    write_segment(chunks, values, registry, &process.stack)?;
    chunks.end_object()?;
    debug!(
        id = process.id,
        frames = process.frames.len(),
        stack = process.stack.len(),
        "process written"
    );
    Ok(())
}

fn write_frame<W: Write + Seek>(
    chunks: &mut ChunkWriter<W>,
    values: &ValueSaver<'_>,
    registry: &mut Registry,
    id: u32,
    frame: &CallFrame,
) -> PersistResult<()> {
    chunks.start_object(ObjectKind::CallFrame.as_u32(), id, FRAME_PROPERTIES)?;
    let header = FrameHeader {
        procedure_id: frame
            .procedure
            .as_ref()
            .map_or(0, |procedure| registry.procedure_id(procedure)),
        pc: frame.pc,
        context_sp: frame.context_sp,
        exception_sp: frame.exception_sp,
        flags: if frame.want_result {
            FrameHeader::WANT_RESULT
        } else {
            0
        },
    };
    chunks.write_property(1, &header.to_bytes())?;
    write_segment(chunks, values, registry, &frame.locals)?;
    write_names(chunks, values, &frame.local_names)?;
    chunks.end_object()
}

#[cfg(test)]
#[path = "tests/saver_tests.rs"]
mod tests;
