//! Runtime values and the heap composites they can point at.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::bytecode::Bytecode;
use crate::error::{format_error, limit_error, PersistResult};

/// Shared, mutable handle to a heap object. Identity is pointer identity.
pub type Shared<T> = Rc<RefCell<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// One runtime value of the script machine.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Empty,
    Int(i32),
    Bool(bool),
    Str(String),
    Float(f64),
    Blob(Vec<u8>),
    FileHandle(u32),
    Procedure(Shared<Bytecode>),
    Array(Shared<ArrayObject>),
    Hash(Shared<HashObject>),
    Record(Shared<RecordValue>),
    RecordType(Shared<RecordType>),
    /// Bound lexical context, by context number.
    Context(u32),
    Mutex(u32),
    /// Generic kind decoded by the embedding host.
    HostContext(HostContext),
}

/// A host-defined generic value. It saves back under its own tag code, with
/// `data` written to the segment's auxiliary bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostContext {
    pub code: u16,
    pub payload: u32,
    pub data: Vec<u8>,
}

impl HostContext {
    pub fn new(code: u16, payload: u32) -> Self {
        Self {
            code,
            payload,
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Float(_) => "float",
            Value::Blob(_) => "blob",
            Value::FileHandle(_) => "file-handle",
            Value::Procedure(_) => "procedure",
            Value::Array(_) => "array",
            Value::Hash(_) => "hash",
            Value::Record(_) => "record",
            Value::RecordType(_) => "record-type",
            Value::Context(_) => "context",
            Value::Mutex(_) => "mutex",
            Value::HostContext(_) => "host-context",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// True for values a process may hold on its context stack.
    pub fn is_context(&self) -> bool {
        matches!(self, Value::Context(_) | Value::HostContext(_))
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    /// True when both values are the same heap object.
    pub fn same_object(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Procedure(a), Value::Procedure(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
            (Value::Record(a), Value::Record(b)) => Rc::ptr_eq(a, b),
            (Value::RecordType(a), Value::RecordType(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// Composites print their address only; object graphs may be cyclic.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "Empty"),
            Value::Int(value) => write!(f, "Int({value})"),
            Value::Bool(value) => write!(f, "Bool({value})"),
            Value::Str(text) => write!(f, "Str({text:?})"),
            Value::Float(value) => write!(f, "Float({value:?})"),
            Value::Blob(bytes) => write!(f, "Blob({} bytes)", bytes.len()),
            Value::FileHandle(handle) => write!(f, "FileHandle({handle})"),
            Value::Procedure(p) => write!(f, "Procedure({:p})", Rc::as_ptr(p)),
            Value::Array(a) => write!(f, "Array({:p})", Rc::as_ptr(a)),
            Value::Hash(h) => write!(f, "Hash({:p})", Rc::as_ptr(h)),
            Value::Record(r) => write!(f, "Record({:p})", Rc::as_ptr(r)),
            Value::RecordType(t) => write!(f, "RecordType({:p})", Rc::as_ptr(t)),
            Value::Context(id) => write!(f, "Context({id})"),
            Value::Mutex(id) => write!(f, "Mutex({id})"),
            Value::HostContext(host) => {
                write!(f, "HostContext({:#06x}, {})", host.code, host.payload)
            }
        }
    }
}

/// Scalar equality; composites compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits() || a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::FileHandle(a), Value::FileHandle(b)) => a == b,
            (Value::Context(a), Value::Context(b)) => a == b,
            (Value::Mutex(a), Value::Mutex(b)) => a == b,
            (Value::HostContext(a), Value::HostContext(b)) => a == b,
            _ => self.same_object(other),
        }
    }
}

/// Multi-dimensional array stored row-major in one flat vector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArrayObject {
    dims: Vec<u32>,
    values: Vec<Value>,
}

impl ArrayObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a one-dimensional array holding `values`.
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            dims: vec![values.len() as u32],
            values,
        }
    }

    /// Adds a dimension and grows storage to the new element count.
    ///
    /// Rejects negative extents and products above `max_elements`, so a
    /// corrupt dimension list can never describe less storage than the values
    /// later written into it.
    pub fn add_dimension(&mut self, extent: i32, max_elements: u64) -> PersistResult<()> {
        let extent = u32::try_from(extent)
            .map_err(|_| format_error(format!("negative array extent {extent}")))?;
        let current = if self.dims.is_empty() {
            1
        } else {
            self.values.len() as u64
        };
        let total = current
            .checked_mul(u64::from(extent))
            .filter(|total| *total <= max_elements)
            .ok_or_else(|| {
                limit_error(format!(
                    "array of {current} x {extent} elements exceeds {max_elements}"
                ))
            })?;
        self.dims.push(extent);
        self.values.resize(total as usize, Value::Empty);
        Ok(())
    }

    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Name-keyed table whose names and values stay positionally aligned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HashObject {
    pub names: Vec<String>,
    pub values: Vec<Value>,
}

impl HashObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.names.iter().position(|existing| *existing == name) {
            Some(index) => {
                if index >= self.values.len() {
                    self.values.resize(index + 1, Value::Empty);
                }
                self.values[index] = value;
            }
            None => {
                self.values.resize(self.names.len(), Value::Empty);
                self.names.push(name);
                self.values.push(value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let index = self.names.iter().position(|existing| existing == name)?;
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Descriptor of a user-defined record: its ordered field names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordType {
    pub fields: Vec<String>,
}

impl RecordType {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field == name)
    }
}

/// Instance of a record type; slots follow the type's field order.
#[derive(Clone, Debug)]
pub struct RecordValue {
    pub ty: Shared<RecordType>,
    pub slots: Vec<Value>,
}

impl Default for RecordValue {
    fn default() -> Self {
        Self {
            ty: shared(RecordType::default()),
            slots: Vec::new(),
        }
    }
}

impl RecordValue {
    pub fn new(ty: Shared<RecordType>) -> Self {
        let slots = vec![Value::Empty; ty.borrow().fields.len()];
        Self { ty, slots }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        let index = self.ty.borrow().field_index(name)?;
        self.slots.get(index)
    }
}
