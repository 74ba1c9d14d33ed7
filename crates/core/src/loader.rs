//! Object graph loader.
//!
//! Drives a [`ChunkReader`] over a whole stream and rebuilds each object into
//! the loader's [`ObjectGraph`]. Unknown properties inside a known object are
//! skipped; an unknown object type stops the load.

use std::io::{Cursor, Read, Seek};

use tracing::{debug, trace, warn};

use crate::bytecode::{Bytecode, Instruction, LineEntry, ProcFlags};
use crate::charset::{CharsetConverter, Latin1};
use crate::chunk::{ChunkReader, Property};
use crate::codec::ValueLoader;
use crate::context::{DefaultHost, EmbeddingHost, LoadContext};
use crate::error::{format_error, limit_error, PersistError, PersistResult};
use crate::graph::{builtin_context, ObjectGraph};
use crate::process::{CallFrame, ExceptionHandler, Process};
use crate::resource::LoadLimits;
use crate::value::{ArrayObject, HashObject, RecordType, RecordValue, Shared, Value};
use crate::wire::{
    read_array, read_i32, read_u32, FrameHeader, ObjectKind, ProcedureHeader, ProcessHeader,
    TagNode,
};

/// Kind and ID of an object that was read successfully.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadedObject {
    pub kind: ObjectKind,
    pub id: u32,
}

/// Reads objects from a chunked stream into an identity-mapped graph.
///
/// Processes go into a separate list. A process whose properties fail to
/// load is still kept there, marked broken, before the error is returned.
pub struct ObjectLoader<R> {
    chunks: ChunkReader<R>,
    graph: ObjectGraph,
    processes: Vec<Process>,
    charset: Box<dyn CharsetConverter>,
    host: Box<dyn EmbeddingHost>,
    limits: LoadLimits,
}

impl<R: Read + Seek> ObjectLoader<R> {
    /// Starts at the stream's current position, which must be the first
    /// object (any file header already consumed).
    pub fn new(input: R, limits: LoadLimits) -> PersistResult<Self> {
        Ok(Self {
            chunks: ChunkReader::new(input, limits)?,
            graph: ObjectGraph::new(),
            processes: Vec::new(),
            charset: Box::new(Latin1),
            host: Box::new(DefaultHost),
            limits,
        })
    }

    pub fn with_charset(mut self, charset: Box<dyn CharsetConverter>) -> Self {
        self.charset = charset;
        self
    }

    pub fn with_host(mut self, host: Box<dyn EmbeddingHost>) -> Self {
        self.host = host;
        self
    }

    /// Loads into an existing graph, so IDs resolve against objects that
    /// were read earlier.
    pub fn with_graph(mut self, graph: ObjectGraph) -> Self {
        self.graph = graph;
        self
    }

    /// Reads and rebuilds the next object. Returns `None` at end of stream.
    pub fn read_next(&mut self) -> PersistResult<Option<LoadedObject>> {
        let Self {
            chunks,
            graph,
            processes,
            charset,
            host,
            limits,
        } = self;
        let Some(header) = chunks.read_object()? else {
            return Ok(None);
        };
        let id = header.id;
        let unexpected = PersistError::UnexpectedObject {
            kind: header.kind,
            id,
        };
        let Some(kind) = header.object_kind() else {
            return Err(unexpected);
        };
        debug!(
            kind = kind.name(),
            id,
            properties = chunks.num_properties(),
            "loading object"
        );

        let mut session = Session {
            values: ValueLoader::new(&**charset, *limits),
            charset: &**charset,
            limits: *limits,
            resolver: Resolver {
                graph,
                host: &mut **host,
            },
        };
        match kind {
            ObjectKind::Procedure => session.procedure(chunks, id)?,
            ObjectKind::Process => session.process(chunks, id, processes)?,
            ObjectKind::Array => session.array(chunks, id)?,
            ObjectKind::Hash => session.hash(chunks, id)?,
            ObjectKind::Record => session.record(chunks, id)?,
            ObjectKind::RecordType => session.record_type(chunks, id)?,
            // Frames only appear nested inside a process.
            ObjectKind::CallFrame => return Err(unexpected),
        }
        Ok(Some(LoadedObject { kind, id }))
    }

    /// Reads every remaining object. Returns how many were read.
    pub fn load_all(&mut self) -> PersistResult<usize> {
        let mut loaded = 0;
        while self.read_next()?.is_some() {
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ObjectGraph {
        &mut self.graph
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn limits(&self) -> &LoadLimits {
        &self.limits
    }

    pub fn into_graph(self) -> ObjectGraph {
        self.graph
    }

    pub fn into_parts(self) -> (ObjectGraph, Vec<Process>) {
        (self.graph, self.processes)
    }
}

/// Resolution callback for one load: composites come from the identity
/// maps, generic kinds from the built-ins and then the host.
struct Resolver<'a> {
    graph: &'a mut ObjectGraph,
    host: &'a mut dyn EmbeddingHost,
}

impl LoadContext for Resolver<'_> {
    fn load_procedure(&mut self, id: u32) -> Option<Shared<Bytecode>> {
        Some(self.graph.procedure(id))
    }

    fn load_array(&mut self, id: u32) -> Option<Shared<ArrayObject>> {
        Some(self.graph.array(id))
    }

    fn load_hash(&mut self, id: u32) -> Option<Shared<HashObject>> {
        Some(self.graph.hash(id))
    }

    fn load_record(&mut self, id: u32) -> Option<Shared<RecordValue>> {
        Some(self.graph.record(id))
    }

    fn load_record_type(&mut self, id: u32) -> Option<Shared<RecordType>> {
        Some(self.graph.record_type(id))
    }

    fn load_context(&mut self, node: TagNode, aux: &mut dyn Read) -> PersistResult<Option<Value>> {
        match builtin_context(node) {
            Some(value) => Ok(Some(value)),
            None => self.host.decode_context(node, aux),
        }
    }
}

/// Per-object decoding state, borrowed out of the loader.
struct Session<'a> {
    values: ValueLoader<'a>,
    charset: &'a dyn CharsetConverter,
    limits: LoadLimits,
    resolver: Resolver<'a>,
}

impl Session<'_> {
    // =========================================================================
    // Procedures
    // =========================================================================

    fn procedure<S: Read + Seek>(&mut self, chunks: &mut ChunkReader<S>, id: u32) -> PersistResult<()> {
        let procedure = self.resolver.graph.procedure(id);
        while let Some(property) = chunks.read_property()? {
            let mut input = property.reader();
            match property.id {
                1 => {
                    let mut bc = procedure.borrow_mut();
                    let mut header = ProcedureHeader {
                        flags: bc.flags.bits(),
                        min_args: bc.min_args,
                        max_args: bc.max_args,
                        label_count: bc.label_count,
                    };
                    header.apply_partial(property.bytes());
                    bc.flags = ProcFlags::from_bits(header.flags);
                    bc.min_args = header.min_args;
                    bc.max_args = header.max_args;
                    bc.label_count = header.label_count;
                }
                2 => {
                    let literals =
                        self.values.load_vec(&mut input, property.count, &mut self.resolver)?;
                    procedure.borrow_mut().literals = literals;
                }
                3 => procedure.borrow_mut().names = self.names(&property)?,
                4 => {
                    let words = self.words(&property, property.count, "instruction")?;
                    procedure.borrow_mut().code =
                        words.into_iter().map(Instruction::from_word).collect();
                }
                5 => procedure.borrow_mut().local_names = self.names(&property)?,
                6 => procedure.borrow_mut().name = self.text(&property)?,
                7 => procedure.borrow_mut().debug_file = self.text(&property)?,
                8 => {
                    // Each entry is an (address, line) word pair.
                    let word_count = property
                        .count
                        .checked_mul(2)
                        .ok_or_else(|| format_error("line table count overflows"))?;
                    let words = self.words(&property, word_count, "line table")?;
                    procedure.borrow_mut().lines = words
                        .chunks_exact(2)
                        .map(|pair| LineEntry {
                            address: pair[0],
                            line: pair[1],
                        })
                        .collect();
                }
                other => skip_property(ObjectKind::Procedure, id, other),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Composites
    // =========================================================================

    fn array<S: Read + Seek>(&mut self, chunks: &mut ChunkReader<S>, id: u32) -> PersistResult<()> {
        let array = self.resolver.graph.array(id);
        while let Some(property) = chunks.read_property()? {
            let mut input = property.reader();
            match property.id {
                1 => {
                    self.limits.check_segment(property.count)?;
                    let mut shaped = ArrayObject::new();
                    for _ in 0..property.count {
                        let extent = read_i32(&mut input, "array dimension")?;
                        shaped.add_dimension(extent, self.limits.max_array_elements)?;
                    }
                    *array.borrow_mut() = shaped;
                }
                2 => {
                    let values =
                        self.values.load_vec(&mut input, property.count, &mut self.resolver)?;
                    let mut array = array.borrow_mut();
                    let slots = array.len();
                    let target = array.values_mut().get_mut(..values.len()).ok_or_else(|| {
                        format_error(format!(
                            "array {id} holds {slots} elements, segment has {}",
                            values.len()
                        ))
                    })?;
                    for (slot, value) in target.iter_mut().zip(values) {
                        *slot = value;
                    }
                }
                other => skip_property(ObjectKind::Array, id, other),
            }
        }
        Ok(())
    }

    fn hash<S: Read + Seek>(&mut self, chunks: &mut ChunkReader<S>, id: u32) -> PersistResult<()> {
        let hash = self.resolver.graph.hash(id);
        while let Some(property) = chunks.read_property()? {
            let mut input = property.reader();
            match property.id {
                1 => {
                    let names = self.names(&property)?;
                    let mut hash = hash.borrow_mut();
                    hash.values.resize(names.len(), Value::Empty);
                    hash.names = names;
                }
                2 => {
                    let mut values =
                        self.values.load_vec(&mut input, property.count, &mut self.resolver)?;
                    let mut hash = hash.borrow_mut();
                    if values.len() > hash.names.len() {
                        return Err(format_error(format!(
                            "hash {id} has {} names but {} values",
                            hash.names.len(),
                            values.len()
                        )));
                    }
                    values.resize(hash.names.len(), Value::Empty);
                    hash.values = values;
                }
                other => skip_property(ObjectKind::Hash, id, other),
            }
        }
        Ok(())
    }

    fn record_type<S: Read + Seek>(
        &mut self,
        chunks: &mut ChunkReader<S>,
        id: u32,
    ) -> PersistResult<()> {
        let ty = self.resolver.graph.record_type(id);
        while let Some(property) = chunks.read_property()? {
            match property.id {
                1 => ty.borrow_mut().fields = self.names(&property)?,
                other => skip_property(ObjectKind::RecordType, id, other),
            }
        }
        Ok(())
    }

    fn record<S: Read + Seek>(&mut self, chunks: &mut ChunkReader<S>, id: u32) -> PersistResult<()> {
        let record = self.resolver.graph.record(id);
        while let Some(property) = chunks.read_property()? {
            let mut input = property.reader();
            match property.id {
                1 => {
                    let type_id = read_u32(&mut input, "record type id")?;
                    record.borrow_mut().ty = self.resolver.graph.record_type(type_id);
                }
                2 => {
                    let slots =
                        self.values.load_vec(&mut input, property.count, &mut self.resolver)?;
                    record.borrow_mut().slots = slots;
                }
                other => skip_property(ObjectKind::Record, id, other),
            }
        }
        let mut record = record.borrow_mut();
        align_record_slots(id, &mut record)
    }

    // =========================================================================
    // Processes
    // =========================================================================

    fn process<S: Read + Seek>(
        &mut self,
        chunks: &mut ChunkReader<S>,
        id: u32,
        processes: &mut Vec<Process>,
    ) -> PersistResult<()> {
        let mut process = self.resolver.host.create_process(id);
        let mut saved_depth = None;
        match self.process_properties(chunks, &mut process, &mut saved_depth) {
            Ok(()) => {
                match saved_depth {
                    Some(depth) => {
                        process.restore_context_depth(depth);
                    }
                    None => process.set_context_depth(process.contexts.len()),
                }
                process.set_runnable();
                debug!(
                    id,
                    frames = process.frames.len(),
                    stack = process.stack.len(),
                    "process loaded"
                );
                processes.push(process);
                Ok(())
            }
            Err(err) => {
                warn!(id, error = %err, "process load failed, marking it non-runnable");
                process.mark_broken();
                processes.push(process);
                Err(err)
            }
        }
    }

    fn process_properties<S: Read + Seek>(
        &mut self,
        chunks: &mut ChunkReader<S>,
        process: &mut Process,
        saved_depth: &mut Option<u16>,
    ) -> PersistResult<()> {
        while let Some(property) = chunks.read_property()? {
            let mut input = property.reader();
            match property.id {
                1 => {
                    let header = ProcessHeader::from_bytes(read_array(&mut input, "process header")?);
                    process.priority = header.priority;
                    process.kind = header.kind;
                    *saved_depth = Some(header.context_depth);
                }
                2 => process.name = self.text(&property)?,
                3 => self.frames(property, process)?,
                4 => {
                    let contexts =
                        self.values.load_vec(&mut input, property.count, &mut self.resolver)?;
                    if let Some(bad) = contexts.iter().find(|value| !value.is_context()) {
                        return Err(format_error(format!(
                            "process {} context stack holds a {}",
                            process.id,
                            bad.kind_name()
                        )));
                    }
                    process.contexts = contexts;
                }
                5 => {
                    self.limits.check_segment(property.count)?;
                    let mut handlers = Vec::new();
                    for _ in 0..property.count {
                        handlers.push(ExceptionHandler {
                            catch_pc: read_u32(&mut input, "exception handler")?,
                            finally_pc: read_u32(&mut input, "exception handler")?,
                            exit_pc: read_u32(&mut input, "exception handler")?,
                            context_depth: read_u32(&mut input, "exception handler")?,
                        });
                    }
                    process.handlers = handlers;
                }
                6 => {
                    process.stack =
                        self.values.load_vec(&mut input, property.count, &mut self.resolver)?;
                }
                other => skip_property(ObjectKind::Process, process.id, other),
            }
        }
        Ok(())
    }

    /// Frames are a nested chunk stream of call-frame objects. Frames that
    /// load before a failure stay on the process.
    fn frames(&mut self, property: Property, process: &mut Process) -> PersistResult<()> {
        let mut frames = ChunkReader::new(Cursor::new(property.into_bytes()), self.limits)?;
        process.frames.clear();
        while let Some(header) = frames.read_object()? {
            if header.object_kind() != Some(ObjectKind::CallFrame) {
                return Err(PersistError::UnexpectedObject {
                    kind: header.kind,
                    id: header.id,
                });
            }
            if process.frames.len() >= self.limits.max_frames as usize {
                return Err(limit_error(format!(
                    "process {} has more than {} frames",
                    process.id, self.limits.max_frames
                )));
            }
            let frame = self.frame(&mut frames, header.id)?;
            process.frames.push(frame);
        }
        trace!(process = process.id, frames = process.frames.len(), "frames loaded");
        Ok(())
    }

    fn frame<S: Read + Seek>(&mut self, chunks: &mut ChunkReader<S>, id: u32) -> PersistResult<CallFrame> {
        let mut frame = CallFrame::default();
        while let Some(property) = chunks.read_property()? {
            let mut input = property.reader();
            match property.id {
                1 => {
                    let header = FrameHeader::from_bytes(read_array(&mut input, "frame header")?);
                    frame.procedure = match header.procedure_id {
                        0 => None,
                        procedure_id => Some(self.resolver.graph.procedure(procedure_id)),
                    };
                    frame.pc = header.pc;
                    frame.context_sp = header.context_sp;
                    frame.exception_sp = header.exception_sp;
                    frame.want_result = header.flags & FrameHeader::WANT_RESULT != 0;
                }
                2 => {
                    frame.locals =
                        self.values.load_vec(&mut input, property.count, &mut self.resolver)?;
                }
                3 => frame.local_names = self.names(&property)?,
                other => skip_property(ObjectKind::CallFrame, id, other),
            }
        }
        Ok(frame)
    }

    // =========================================================================
    // Property helpers
    // =========================================================================

    fn names(&self, property: &Property) -> PersistResult<Vec<String>> {
        let mut names = Vec::new();
        self.values
            .load_names(&mut property.reader(), property.count, &mut names)?;
        Ok(names)
    }

    /// The whole payload is the text; an empty payload means absent.
    fn text(&self, property: &Property) -> PersistResult<Option<String>> {
        if property.is_empty() {
            return Ok(None);
        }
        let len = u32::try_from(property.len()).unwrap_or(u32::MAX);
        self.limits.check_string(len)?;
        Ok(Some(self.charset.decode(property.bytes())))
    }

    fn words(&self, property: &Property, count: u32, what: &'static str) -> PersistResult<Vec<u32>> {
        self.limits.check_segment(count)?;
        let mut input = property.reader();
        let mut words = Vec::with_capacity((count as usize).min(property.len() / 4));
        for _ in 0..count {
            words.push(read_u32(&mut input, what)?);
        }
        Ok(words)
    }
}

fn skip_property(kind: ObjectKind, id: u32, property: u32) {
    warn!(kind = kind.name(), id, property, "skipping unknown property");
}

/// Pads a record's slots to its type's field count. A type not defined yet
/// has no fields, so its records keep the slots they were saved with.
fn align_record_slots(id: u32, record: &mut RecordValue) -> PersistResult<()> {
    let fields = record.ty.borrow().fields.len();
    if fields == 0 {
        return Ok(());
    }
    if record.slots.len() > fields {
        return Err(format_error(format!(
            "record {id} has {} slots but its type has {fields} fields",
            record.slots.len()
        )));
    }
    record.slots.resize(fields, Value::Empty);
    Ok(())
}

#[cfg(test)]
#[path = "tests/loader_tests.rs"]
mod tests;
