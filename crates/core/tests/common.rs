#![allow(dead_code)]

use std::io::Cursor;

use script_persist::{
    shared, ArrayObject, Bytecode, CallFrame, ChunkWriter, ExceptionHandler, HashObject,
    Instruction, LineEntry, ProcFlags, Process, RecordType, RecordValue, Shared, Value,
};

/// A program exercising every composite kind, with sharing between literals.
pub fn sample_program() -> Shared<Bytecode> {
    let point = shared(RecordType::new(vec!["x".into(), "y".into()]));
    let mut origin = RecordValue::new(point.clone());
    origin.slots = vec![Value::Int(0), Value::Float(-2.5)];
    let origin = shared(origin);

    let mut grid = ArrayObject::new();
    grid.add_dimension(2, 1_000).expect("dimension");
    grid.add_dimension(3, 1_000).expect("dimension");
    for (index, slot) in grid.values_mut().iter_mut().enumerate() {
        *slot = Value::Int(index as i32);
    }
    grid.values_mut()[5] = Value::Record(origin.clone());
    let grid = shared(grid);

    let mut settings = HashObject::new();
    settings.insert("title", Value::Str("demo".into()));
    settings.insert("ratio", Value::Float(0.75));
    settings.insert("blob", Value::Blob(vec![1, 2, 3, 4]));
    settings.insert("grid", Value::Array(grid.clone()));
    let settings = shared(settings);

    let helper = shared(Bytecode {
        flags: ProcFlags::FUNCTION,
        min_args: 1,
        max_args: 1,
        literals: vec![Value::Record(origin)],
        code: vec![Instruction::new(3, 0, 1)],
        name: Some("helper".into()),
        ..Bytecode::default()
    });

    shared(Bytecode {
        flags: ProcFlags::NONE,
        label_count: 1,
        literals: vec![
            Value::Hash(settings),
            Value::Array(grid),
            Value::Procedure(helper),
            Value::RecordType(point),
            Value::Bool(false),
            Value::FileHandle(3),
            Value::Empty,
        ],
        names: vec!["print".into(), "len".into()],
        code: vec![Instruction::new(1, 0, 0), Instruction::new(9, 2, 0x0102)],
        local_names: vec!["i".into()],
        name: Some("main".into()),
        debug_file: Some("main.src".into()),
        lines: vec![LineEntry { address: 0, line: 1 }],
        ..Bytecode::default()
    })
}

/// A suspended process two frames deep, with one bound context.
pub fn sample_process(id: u32, body: &Shared<Bytecode>) -> Process {
    let mut process = Process::new(id);
    process.name = Some(format!("worker-{id}"));
    process.priority = 2;
    process.kind = 1;
    for depth in 0..2u32 {
        process.frames.push(CallFrame {
            procedure: Some(body.clone()),
            pc: 10 + depth,
            context_sp: depth,
            want_result: depth == 1,
            locals: vec![Value::Int(depth as i32), Value::Str("local".into())],
            local_names: vec!["a".into(), "b".into()],
            ..CallFrame::default()
        });
    }
    process.contexts = vec![Value::Context(4)];
    process.set_context_depth(1);
    process.handlers.push(ExceptionHandler {
        catch_pc: 20,
        finally_pc: 0,
        exit_pc: 30,
        context_depth: 1,
    });
    process.stack = vec![Value::Int(99), Value::Mutex(2)];
    process
}

/// Hand-built object stream, for layouts the saver never produces.
pub struct StreamBuilder {
    writer: ChunkWriter<Cursor<Vec<u8>>>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self {
            writer: ChunkWriter::new(Cursor::new(Vec::new())),
        }
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.writer.write_raw(bytes).expect("raw bytes should write");
        self
    }

    pub fn object(mut self, kind: u32, id: u32, properties: &[(u32, Vec<u8>)]) -> Self {
        self.writer
            .start_object(kind, id, properties.len() as u32)
            .expect("object should start");
        for (count, payload) in properties {
            self.writer
                .write_property(*count, payload)
                .expect("property should write");
        }
        self.writer.end_object().expect("object should end");
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.writer.into_inner().expect("writer should close").into_inner()
    }
}

pub fn tag(code: u16, payload: u32) -> Vec<u8> {
    let mut bytes = code.to_le_bytes().to_vec();
    bytes.extend_from_slice(&payload.to_le_bytes());
    bytes
}

pub fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Deterministic xorshift64* byte stream.
pub fn fill_deterministic(buf: &mut [u8], seed: u64) {
    let mut state = seed;
    for byte in buf.iter_mut() {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        state = state.wrapping_mul(0x2545_F491_4F6C_DD1D);
        *byte = (state & 0xFF) as u8;
    }
}
