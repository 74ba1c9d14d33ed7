use std::cell::RefCell;
use std::io::{Cursor, Read};
use std::rc::Rc;

use super::*;
use crate::chunk::ChunkWriter;
use crate::process::ProcessStatus;
use crate::saver::ObjectSaver;
use crate::value::HostContext;
use crate::wire::tag;

type Writer = ChunkWriter<Cursor<Vec<u8>>>;

fn build(write: impl FnOnce(&mut Writer)) -> Vec<u8> {
    let mut writer = ChunkWriter::new(Cursor::new(Vec::new()));
    write(&mut writer);
    writer.into_inner().expect("writer should be closed").into_inner()
}

fn object(writer: &mut Writer, kind: u32, id: u32, properties: &[(u32, Vec<u8>)]) {
    writer
        .start_object(kind, id, properties.len() as u32)
        .expect("object should start");
    for (count, payload) in properties {
        writer
            .write_property(*count, payload)
            .expect("property should write");
    }
    writer.end_object().expect("object should end");
}

fn tags(nodes: &[TagNode]) -> Vec<u8> {
    nodes.iter().flat_map(|node| node.to_bytes()).collect()
}

fn words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

fn names(list: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for name in list {
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
    }
    out
}

fn int(value: u32) -> TagNode {
    TagNode::new(tag::INTEGER, value)
}

fn write_procedure(writer: &mut Writer, id: u32, literals: &[TagNode], name: &str) {
    let header = ProcedureHeader {
        flags: ProcFlags::FUNCTION.bits(),
        min_args: 1,
        max_args: 2,
        label_count: 0,
    };
    object(
        writer,
        1,
        id,
        &[
            (1, header.to_bytes().to_vec()),
            (literals.len() as u32, tags(literals)),
            (1, names(&["print"])),
            (1, words(&[0x0000_0922])),
            (0, Vec::new()),
            (0, name.as_bytes().to_vec()),
            (0, b"main.src".to_vec()),
            (2, words(&[0, 10, 4, 11])),
        ],
    );
}

fn loader_over(bytes: Vec<u8>) -> ObjectLoader<Cursor<Vec<u8>>> {
    ObjectLoader::new(Cursor::new(bytes), LoadLimits::default()).expect("loader should start")
}

// =============================================================================
// Procedures and composites
// =============================================================================

#[test]
fn procedure_with_eight_properties_loads() {
    let bytes = build(|w| write_procedure(w, 2, &[], "hello"));

    let mut chunks =
        ChunkReader::new(Cursor::new(bytes.clone()), LoadLimits::default()).expect("reader");
    let header = chunks.read_object().expect("read").expect("object");
    assert_eq!((header.kind, header.id), (1, 2));
    assert_eq!(chunks.num_properties(), 8);

    let mut loader = loader_over(bytes);
    let loaded = loader.read_next().expect("load").expect("object");
    assert_eq!(
        loaded,
        LoadedObject {
            kind: ObjectKind::Procedure,
            id: 2
        }
    );
    assert!(loader.read_next().expect("read").is_none());

    let procedure = loader.graph().find_procedure(2).expect("procedure 2");
    let procedure = procedure.borrow();
    assert_eq!(procedure.code, vec![Instruction::new(0x00, 0x00, 0x0922)]);
    assert_eq!(procedure.name.as_deref(), Some("hello"));
    assert_eq!(procedure.debug_file.as_deref(), Some("main.src"));
    assert_eq!(procedure.names, vec!["print"]);
    assert!(procedure.is_function());
    assert_eq!((procedure.min_args, procedure.max_args), (1, 2));
    assert_eq!(
        procedure.lines,
        vec![
            LineEntry { address: 0, line: 10 },
            LineEntry { address: 4, line: 11 },
        ]
    );
    assert_eq!(procedure.line_for_address(5), Some(11));
}

#[test]
fn forward_references_resolve_to_the_later_definition() {
    let bytes = build(|w| {
        write_procedure(
            w,
            1,
            &[TagNode::new(tag::PROCEDURE, 5), TagNode::new(tag::ARRAY, 3)],
            "caller",
        );
        write_procedure(w, 5, &[], "callee");
        object(
            w,
            4,
            3,
            &[(1, words(&[2])), (2, tags(&[int(7), int(8)]))],
        );
    });
    let mut loader = loader_over(bytes);
    assert_eq!(loader.load_all().expect("stream should load"), 3);

    let graph = loader.graph();
    let caller = graph.find_procedure(1).expect("caller");
    let caller = caller.borrow();
    match &caller.literals[0] {
        Value::Procedure(callee) => {
            let defined = graph.find_procedure(5).expect("callee");
            assert!(Rc::ptr_eq(callee, &defined));
            assert_eq!(callee.borrow().name.as_deref(), Some("callee"));
        }
        other => panic!("expected a procedure literal, got {other:?}"),
    }
    match &caller.literals[1] {
        Value::Array(array) => {
            assert_eq!(array.borrow().values(), &[Value::Int(7), Value::Int(8)]);
        }
        other => panic!("expected an array literal, got {other:?}"),
    }
}

#[test]
fn reference_without_definition_is_an_empty_object() {
    let bytes = build(|w| write_procedure(w, 1, &[TagNode::new(tag::PROCEDURE, 9)], "lonely"));
    let mut loader = loader_over(bytes);
    loader.load_all().expect("stream should load");
    let missing = loader.graph().find_procedure(9).expect("created on reference");
    assert_eq!(*missing.borrow(), Bytecode::default());
}

#[test]
fn short_procedure_header_applies_present_fields_only() {
    let bytes = build(|w| {
        object(w, 1, 1, &[(1, vec![3, 0, 2, 0])]);
        object(w, 1, 2, &[(1, vec![1, 0, 9])]);
    });
    let mut loader = loader_over(bytes);
    loader.load_all().expect("stream should load");

    let first = loader.graph().find_procedure(1).expect("procedure 1");
    let first = first.borrow();
    assert!(first.is_function() && first.is_variadic());
    assert_eq!((first.min_args, first.max_args), (2, 0));

    let second = loader.graph().find_procedure(2).expect("procedure 2");
    assert_eq!(second.borrow().min_args, 0);
    assert!(second.borrow().is_function());
}

#[test]
fn unknown_properties_do_not_change_known_ones() {
    let plain = build(|w| write_procedure(w, 1, &[int(4)], "same"));
    let extended = build(|w| {
        let header = ProcedureHeader {
            flags: ProcFlags::FUNCTION.bits(),
            min_args: 1,
            max_args: 2,
            label_count: 0,
        };
        object(
            w,
            1,
            1,
            &[
                (1, header.to_bytes().to_vec()),
                (1, tags(&[int(4)])),
                (1, names(&["print"])),
                (1, words(&[0x0000_0922])),
                (0, Vec::new()),
                (0, b"same".to_vec()),
                (0, b"main.src".to_vec()),
                (2, words(&[0, 10, 4, 11])),
                (77, vec![0xEE; 13]),
            ],
        );
    });

    let load = |bytes| {
        let mut loader = loader_over(bytes);
        loader.load_all().expect("stream should load");
        let procedure = loader.graph().find_procedure(1).expect("procedure");
        let procedure = procedure.borrow().clone();
        procedure
    };
    assert_eq!(load(plain), load(extended));
}

#[test]
fn unknown_and_nested_only_kinds_are_rejected_at_top_level() {
    let bytes = build(|w| object(w, 99, 1, &[]));
    let err = loader_over(bytes).read_next().expect_err("kind 99");
    assert!(matches!(err, PersistError::UnexpectedObject { kind: 99, id: 1 }));

    let bytes = build(|w| object(w, 3, 4, &[]));
    let err = loader_over(bytes).read_next().expect_err("top-level frame");
    assert!(matches!(err, PersistError::UnexpectedObject { kind: 3, id: 4 }));
}

#[test]
fn array_dimensions_are_validated() {
    let bytes = build(|w| object(w, 4, 1, &[(1, words(&[(-1i32) as u32]))]));
    let err = loader_over(bytes).load_all().expect_err("negative extent");
    assert!(matches!(err, PersistError::Format(_)));

    let bytes = build(|w| object(w, 4, 1, &[(1, words(&[1])), (2, tags(&[int(1), int(2)]))]));
    let err = loader_over(bytes).load_all().expect_err("segment larger than array");
    assert!(matches!(err, PersistError::Format(_)));

    let bytes = build(|w| object(w, 4, 1, &[(2, words(&[1 << 16, 1 << 16]))]));
    let err = loader_over(bytes).load_all().expect_err("product over the element limit");
    assert!(matches!(err, PersistError::ResourceLimit(_)));
}

#[test]
fn hash_values_align_with_names() {
    let bytes = build(|w| object(w, 5, 1, &[(2, names(&["a", "b"])), (1, tags(&[int(1)]))]));
    let mut loader = loader_over(bytes);
    loader.load_all().expect("stream should load");
    let hash = loader.graph().find_hash(1).expect("hash");
    let hash = hash.borrow();
    assert_eq!(hash.get("a"), Some(&Value::Int(1)));
    assert_eq!(hash.get("b"), Some(&Value::Empty));

    let bytes = build(|w| object(w, 5, 1, &[(1, names(&["a"])), (2, tags(&[int(1), int(2)]))]));
    let err = loader_over(bytes).load_all().expect_err("more values than names");
    assert!(matches!(err, PersistError::Format(_)));
}

#[test]
fn record_resolves_its_type_by_id() {
    let bytes = build(|w| {
        object(w, 6, 1, &[(1, words(&[2])), (2, tags(&[int(1), int(2)]))]);
        object(w, 7, 2, &[(2, names(&["x", "y"]))]);
    });
    let mut loader = loader_over(bytes);
    loader.load_all().expect("stream should load");
    let graph = loader.graph();
    let record = graph.find_record(1).expect("record");
    let record = record.borrow();
    let ty = graph.find_record_type(2).expect("record type");
    assert!(Rc::ptr_eq(&record.ty, &ty));
    assert_eq!(record.field("y"), Some(&Value::Int(2)));
}

#[test]
fn record_slots_pad_to_the_field_count() {
    let bytes = build(|w| {
        object(w, 7, 2, &[(3, names(&["x", "y", "z"]))]);
        object(w, 6, 1, &[(1, words(&[2])), (1, tags(&[int(7)]))]);
    });
    let mut loader = loader_over(bytes);
    loader.load_all().expect("stream should load");
    let record = loader.graph().find_record(1).expect("record");
    let record = record.borrow();
    assert_eq!(record.slots.len(), 3);
    assert_eq!(record.field("x"), Some(&Value::Int(7)));
    assert_eq!(record.field("z"), Some(&Value::Empty));
}

#[test]
fn record_with_more_slots_than_fields_is_rejected() {
    let bytes = build(|w| {
        object(w, 7, 2, &[(1, names(&["x"]))]);
        object(w, 6, 1, &[(1, words(&[2])), (2, tags(&[int(1), int(2)]))]);
    });
    let err = loader_over(bytes).load_all().expect_err("more slots than fields");
    assert!(matches!(err, PersistError::Format(_)));
}

// =============================================================================
// Processes
// =============================================================================

fn frame(procedure_id: u32, pc: u32) -> Vec<(u32, Vec<u8>)> {
    let header = FrameHeader {
        procedure_id,
        pc,
        context_sp: 1,
        exception_sp: 0,
        flags: FrameHeader::WANT_RESULT,
    };
    vec![
        (1, header.to_bytes().to_vec()),
        (1, tags(&[int(5)])),
        (1, names(&["n"])),
    ]
}

fn process_properties(depth: u16, frames: Vec<u8>, contexts: &[TagNode]) -> Vec<(u32, Vec<u8>)> {
    let header = ProcessHeader {
        priority: 3,
        kind: 1,
        context_depth: depth,
    };
    vec![
        (1, header.to_bytes().to_vec()),
        (0, b"worker".to_vec()),
        (1, frames),
        (contexts.len() as u32, tags(contexts)),
        (1, words(&[10, 20, 30, 1])),
        (2, tags(&[int(1), TagNode::new(tag::BOOLEAN, 1)])),
    ]
}

fn two_contexts() -> Vec<TagNode> {
    vec![TagNode::new(tag::CONTEXT, 7), TagNode::new(tag::CONTEXT, 8)]
}

#[test]
fn process_loads_frames_handlers_and_stack() {
    let frames = build(|w| {
        object(w, 3, 1, &frame(4, 12));
        object(w, 3, 2, &frame(0, 3));
    });
    let bytes = build(|w| object(w, 2, 9, &process_properties(1, frames, &two_contexts())));
    let mut loader = loader_over(bytes);
    let loaded = loader.read_next().expect("load").expect("object");
    assert_eq!(loaded.kind, ObjectKind::Process);

    let process = &loader.processes()[0];
    assert_eq!(process.id, 9);
    assert!(process.is_runnable());
    assert_eq!((process.priority, process.kind), (3, 1));
    assert_eq!(process.name.as_deref(), Some("worker"));
    assert_eq!(process.context_depth(), 1);
    assert_eq!(process.contexts, vec![Value::Context(7), Value::Context(8)]);
    assert_eq!(
        process.handlers,
        vec![ExceptionHandler {
            catch_pc: 10,
            finally_pc: 20,
            exit_pc: 30,
            context_depth: 1,
        }]
    );
    assert_eq!(process.stack, vec![Value::Int(1), Value::Bool(true)]);

    assert_eq!(process.frames.len(), 2);
    let top = &process.frames[0];
    let bound = top.procedure.as_ref().expect("bound procedure");
    assert!(Rc::ptr_eq(bound, &loader.graph().find_procedure(4).expect("procedure 4")));
    assert_eq!(top.pc, 12);
    assert!(top.want_result);
    assert_eq!(top.locals, vec![Value::Int(5)]);
    assert_eq!(top.local_names, vec!["n"]);
    assert!(process.frames[1].procedure.is_none());
}

#[test]
fn out_of_range_context_depth_keeps_natural_depth() {
    let bytes = build(|w| object(w, 2, 1, &process_properties(5, Vec::new(), &two_contexts())));
    let mut loader = loader_over(bytes);
    loader.load_all().expect("stream should load");
    let process = &loader.processes()[0];
    assert!(process.is_runnable());
    assert_eq!(process.context_depth(), 2);
}

#[test]
fn non_context_entry_breaks_the_process() {
    let contexts = [TagNode::new(tag::CONTEXT, 7), int(1)];
    let bytes = build(|w| object(w, 2, 1, &process_properties(0, Vec::new(), &contexts)));
    let mut loader = loader_over(bytes);
    let err = loader.load_all().expect_err("integer on the context stack");
    assert!(matches!(err, PersistError::Format(_)));
    let process = &loader.processes()[0];
    assert_eq!(process.status(), ProcessStatus::Broken);
    assert_eq!(process.name.as_deref(), Some("worker"));
}

#[test]
fn failing_frames_leave_a_broken_process_with_earlier_properties() {
    let frames = build(|w| {
        object(w, 3, 1, &frame(4, 12));
        object(w, 4, 2, &[]);
    });
    let bytes = build(|w| object(w, 2, 6, &process_properties(0, frames, &two_contexts())));
    let mut loader = loader_over(bytes);
    let err = loader.read_next().expect_err("array inside the frame stream");
    assert!(matches!(err, PersistError::UnexpectedObject { kind: 4, id: 2 }));

    assert_eq!(loader.processes().len(), 1);
    let process = &loader.processes()[0];
    assert_eq!(process.id, 6);
    assert_eq!(process.status(), ProcessStatus::Broken);
    assert!(!process.is_runnable());
    assert_eq!(process.name.as_deref(), Some("worker"));
    assert_eq!(process.priority, 3);
    assert_eq!(process.frames.len(), 1);
}

#[test]
fn truncated_frame_header_breaks_the_process() {
    let frames = build(|w| object(w, 3, 1, &[(1, vec![0; 8])]));
    let bytes = build(|w| object(w, 2, 1, &process_properties(0, frames, &[])));
    let mut loader = loader_over(bytes);
    let err = loader.load_all().expect_err("short frame header");
    assert!(err.is_truncation());
    assert_eq!(loader.processes()[0].status(), ProcessStatus::Broken);
}

#[test]
fn frame_count_is_limited() {
    let frames = build(|w| {
        object(w, 3, 1, &frame(0, 1));
        object(w, 3, 2, &frame(0, 2));
    });
    let bytes = build(|w| object(w, 2, 1, &process_properties(0, frames, &[])));
    let limits = LoadLimits {
        max_frames: 1,
        ..LoadLimits::default()
    };
    let mut loader = ObjectLoader::new(Cursor::new(bytes), limits).expect("loader");
    let err = loader.load_all().expect_err("too many frames");
    assert!(matches!(err, PersistError::ResourceLimit(_)));
}

// =============================================================================
// Embedding host
// =============================================================================

/// Decodes tag 0x2000 as a blob whose length is the payload, and records
/// every process shell it creates.
#[derive(Default)]
struct BlobHost {
    created: Rc<RefCell<Vec<u32>>>,
}

impl EmbeddingHost for BlobHost {
    fn create_process(&mut self, id: u32) -> Process {
        self.created.borrow_mut().push(id);
        Process::new(id)
    }

    fn decode_context(&mut self, node: TagNode, aux: &mut dyn Read) -> PersistResult<Option<Value>> {
        if node.code != 0x2000 {
            return Ok(None);
        }
        let mut bytes = vec![0; node.payload as usize];
        aux.read_exact(&mut bytes)?;
        Ok(Some(Value::Blob(bytes)))
    }
}

fn host_stack_stream() -> Vec<u8> {
    let mut properties = process_properties(0, Vec::new(), &[]);
    let mut stack = tags(&[TagNode::new(0x2000, 2), int(4)]);
    stack.extend_from_slice(&[0xAB, 0xCD]);
    properties[5] = (2, stack);
    build(|w| object(w, 2, 8, &properties))
}

#[test]
fn host_decodes_extra_generic_kinds() {
    let host = BlobHost::default();
    let created = Rc::clone(&host.created);
    let mut loader = loader_over(host_stack_stream()).with_host(Box::new(host));
    loader.load_all().expect("stream should load");
    assert_eq!(*created.borrow(), vec![8]);
    let process = &loader.processes()[0];
    assert_eq!(process.stack, vec![Value::Blob(vec![0xAB, 0xCD]), Value::Int(4)]);
}

#[test]
fn default_host_rejects_extra_generic_kinds() {
    let mut loader = loader_over(host_stack_stream());
    let err = loader.load_all().expect_err("unknown generic tag");
    assert!(matches!(err, PersistError::Format(_)));
    assert_eq!(loader.processes()[0].status(), ProcessStatus::Broken);
}

/// Keeps tag 0x1000 as a host context whose payload is its data length.
struct TicketHost;

impl EmbeddingHost for TicketHost {
    fn decode_context(&mut self, node: TagNode, aux: &mut dyn Read) -> PersistResult<Option<Value>> {
        if node.code != 0x1000 {
            return Ok(None);
        }
        let mut data = vec![0; node.payload as usize];
        aux.read_exact(&mut data)?;
        Ok(Some(Value::HostContext(
            HostContext::new(node.code, node.payload).with_data(data),
        )))
    }
}

fn save_process(process: &Process) -> Vec<u8> {
    let mut saver = ObjectSaver::new(Cursor::new(Vec::new()));
    saver.save_process(process).expect("process should save");
    saver.finish().expect("saver should finish").into_inner()
}

#[test]
fn host_contexts_survive_a_save_and_reload() {
    let ticket = Value::HostContext(HostContext::new(0x1000, 2).with_data(vec![0x5A, 0xA5]));
    let mut process = Process::new(5);
    process.contexts = vec![Value::Context(1), ticket.clone()];
    assert!(process.restore_context_depth(2));
    process.stack = vec![ticket.clone(), Value::Int(3)];
    let bytes = save_process(&process);

    let mut loader = loader_over(bytes.clone()).with_host(Box::new(TicketHost));
    loader.load_all().expect("stream should load");
    let loaded = &loader.processes()[0];
    assert!(loaded.is_runnable());
    assert_eq!(loaded.contexts, vec![Value::Context(1), ticket.clone()]);
    assert_eq!(loaded.context_depth(), 2);
    assert_eq!(loaded.stack, vec![ticket, Value::Int(3)]);

    assert_eq!(save_process(loaded), bytes);
}
