//! Compiled procedures.

use crate::value::Value;

/// Procedure flag bits as stored in the procedure header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcFlags(u16);

impl ProcFlags {
    pub const NONE: ProcFlags = ProcFlags(0);
    /// Returns a value (function) rather than nothing (procedure).
    pub const FUNCTION: ProcFlags = ProcFlags(1 << 0);
    pub const VARIADIC: ProcFlags = ProcFlags(1 << 1);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn from_bits(bits: u16) -> ProcFlags {
        ProcFlags(bits)
    }

    pub const fn contains(self, other: ProcFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn insert(&mut self, other: ProcFlags) {
        self.0 |= other.0;
    }
}

/// One instruction word split into its fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub arg8: u8,
    pub arg16: u16,
}

impl Instruction {
    pub fn new(opcode: u8, arg8: u8, arg16: u16) -> Self {
        Self {
            opcode,
            arg8,
            arg16,
        }
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            opcode: (word >> 24) as u8,
            arg8: (word >> 16) as u8,
            arg16: word as u16,
        }
    }

    pub fn to_word(self) -> u32 {
        (u32::from(self.opcode) << 24) | (u32::from(self.arg8) << 16) | u32::from(self.arg16)
    }
}

/// Maps an instruction address to a source line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineEntry {
    pub address: u32,
    pub line: u32,
}

/// A compiled procedure: code plus everything the code refers to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bytecode {
    pub flags: ProcFlags,
    pub min_args: u16,
    pub max_args: u16,
    pub label_count: u16,
    pub literals: Vec<Value>,
    pub names: Vec<String>,
    pub code: Vec<Instruction>,
    pub local_names: Vec<String>,
    pub name: Option<String>,
    pub debug_file: Option<String>,
    pub lines: Vec<LineEntry>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_function(&self) -> bool {
        self.flags.contains(ProcFlags::FUNCTION)
    }

    pub fn is_variadic(&self) -> bool {
        self.flags.contains(ProcFlags::VARIADIC)
    }

    /// Source line of the last line entry at or before `address`.
    ///
    /// Entries are expected in ascending address order.
    pub fn line_for_address(&self, address: u32) -> Option<u32> {
        let index = self.lines.partition_point(|entry| entry.address <= address);
        index.checked_sub(1).map(|index| self.lines[index].line)
    }
}
