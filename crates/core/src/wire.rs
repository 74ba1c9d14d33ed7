//! Fixed-layout binary records shared by the reader and the writer.
//!
//! Every multi-byte field is little-endian. Each record knows its own encoded
//! size and converts to and from a byte array of exactly that size, so the
//! layout lives in one place.

use std::io::{self, Read, Write};
use std::mem::size_of;

use crate::error::{PersistError, PersistResult};
use crate::version::{FORMAT_VERSION, MIN_FILE_HEADER_SIZE};

pub const FILE_HEADER_SIZE: usize = 14;
pub const OBJECT_HEADER_SIZE: usize = 16;
pub const PROPERTY_ENTRY_SIZE: usize = 8;
pub const TAG_NODE_SIZE: usize = 6;
pub const PROCEDURE_HEADER_SIZE: usize = 8;
pub const FRAME_HEADER_SIZE: usize = 20;
pub const PROCESS_HEADER_SIZE: usize = 4;
pub const HANDLER_ENTRY_SIZE: usize = 16;

const _: () = assert!(FILE_HEADER_SIZE == 6 + 1 + 1 + size_of::<u16>() + size_of::<u32>());
const _: () = assert!(FILE_HEADER_SIZE == MIN_FILE_HEADER_SIZE as usize);
const _: () = assert!(OBJECT_HEADER_SIZE == 4 * size_of::<u32>());
const _: () = assert!(PROPERTY_ENTRY_SIZE == 2 * size_of::<u32>());
const _: () = assert!(TAG_NODE_SIZE == size_of::<u16>() + size_of::<u32>());
const _: () = assert!(PROCEDURE_HEADER_SIZE == 4 * size_of::<u16>());
const _: () = assert!(FRAME_HEADER_SIZE == 5 * size_of::<u32>());
const _: () = assert!(PROCESS_HEADER_SIZE == 2 + size_of::<u16>());
const _: () = assert!(HANDLER_ENTRY_SIZE == 4 * size_of::<u32>());

/// Type tag carried by every chunked object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ObjectKind {
    Procedure = 1,
    Process = 2,
    CallFrame = 3,
    Array = 4,
    Hash = 5,
    Record = 6,
    RecordType = 7,
}

impl ObjectKind {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Procedure),
            2 => Some(Self::Process),
            3 => Some(Self::CallFrame),
            4 => Some(Self::Array),
            5 => Some(Self::Hash),
            6 => Some(Self::Record),
            7 => Some(Self::RecordType),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Procedure => "procedure",
            Self::Process => "process",
            Self::CallFrame => "call-frame",
            Self::Array => "array",
            Self::Hash => "hash",
            Self::Record => "record",
            Self::RecordType => "record-type",
        }
    }
}

/// 16-bit tag codes. Named codes all have a zero low byte; a non-zero low byte
/// marks a 48-bit float whose exponent is that byte.
pub mod tag {
    pub const EMPTY: u16 = 0x0000;
    pub const INTEGER: u16 = 0x0100;
    pub const BOOLEAN: u16 = 0x0200;
    pub const SHORT_STRING: u16 = 0x0300;
    pub const LONG_STRING: u16 = 0x0400;
    pub const FLOAT32: u16 = 0x0500;
    pub const ZERO_FLOAT: u16 = 0x0600;
    pub const BLOB: u16 = 0x0700;
    pub const FILE_HANDLE: u16 = 0x0800;
    pub const PROCEDURE: u16 = 0x0900;
    pub const ARRAY: u16 = 0x0A00;
    pub const HASH: u16 = 0x0B00;
    pub const RECORD: u16 = 0x0C00;
    pub const RECORD_TYPE: u16 = 0x0D00;
    pub const CONTEXT: u16 = 0x0E00;
    pub const MUTEX: u16 = 0x0F00;
}

/// 48-bit inline descriptor preceding every encoded value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagNode {
    pub code: u16,
    pub payload: u32,
}

impl TagNode {
    pub const SIZE: usize = TAG_NODE_SIZE;

    pub fn new(code: u16, payload: u32) -> Self {
        Self { code, payload }
    }

    pub fn is_float48(&self) -> bool {
        self.code & 0x00FF != 0
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.code.to_le_bytes());
        buf[2..6].copy_from_slice(&self.payload.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            code: u16::from_le_bytes([bytes[0], bytes[1]]),
            payload: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        }
    }
}

/// Header at the very start of an object file or VM state file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: [u8; 6],
    pub version: u8,
    pub header_size: u16,
    /// Entry-point procedure ID for object files, current process ID for VM
    /// state files.
    pub entry_id: u32,
}

impl FileHeader {
    pub const SIZE: usize = FILE_HEADER_SIZE;

    pub fn new(magic: [u8; 6], entry_id: u32) -> Self {
        Self {
            magic,
            version: FORMAT_VERSION,
            header_size: MIN_FILE_HEADER_SIZE,
            entry_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..6].copy_from_slice(&self.magic);
        buf[6] = self.version;
        buf[7] = 0;
        buf[8..10].copy_from_slice(&self.header_size.to_le_bytes());
        buf[10..14].copy_from_slice(&self.entry_id.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let mut magic = [0u8; 6];
        magic.copy_from_slice(&bytes[0..6]);
        Self {
            magic,
            version: bytes[6],
            header_size: u16::from_le_bytes([bytes[8], bytes[9]]),
            entry_id: u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]),
        }
    }

    /// Reads and validates a header, then skips any excess header bytes so the
    /// stream is left at the first object.
    pub fn read<R: Read + ?Sized>(input: &mut R, expected_magic: [u8; 6]) -> PersistResult<Self> {
        let header = Self::read_fixed(input, expected_magic)?;
        let excess = u64::from(header.header_size - MIN_FILE_HEADER_SIZE);
        if excess > 0 {
            let skipped = io::copy(&mut input.take(excess), &mut io::sink())?;
            if skipped != excess {
                return Err(PersistError::Truncated {
                    what: "file header extension",
                });
            }
        }
        Ok(header)
    }

    /// Like [`FileHeader::read`], but returns the excess header bytes instead
    /// of skipping them.
    pub fn read_extended<R: Read + ?Sized>(
        input: &mut R,
        expected_magic: [u8; 6],
    ) -> PersistResult<(Self, Vec<u8>)> {
        let header = Self::read_fixed(input, expected_magic)?;
        let excess = usize::from(header.header_size - MIN_FILE_HEADER_SIZE);
        let extension = read_bounded(input, excess, "file header extension")?;
        Ok((header, extension))
    }

    fn read_fixed<R: Read + ?Sized>(input: &mut R, expected_magic: [u8; 6]) -> PersistResult<Self> {
        let header = Self::from_bytes(read_array(input, "file header")?);
        if header.magic != expected_magic {
            return Err(PersistError::InvalidMagic);
        }
        if header.version != FORMAT_VERSION {
            return Err(PersistError::UnsupportedVersion {
                found: header.version,
                expected: FORMAT_VERSION,
            });
        }
        if header.header_size < MIN_FILE_HEADER_SIZE {
            return Err(crate::error::format_error(format!(
                "file header size {} below minimum {MIN_FILE_HEADER_SIZE}",
                header.header_size
            )));
        }
        Ok(header)
    }

    pub fn write<W: Write + ?Sized>(&self, out: &mut W) -> PersistResult<()> {
        out.write_all(&self.to_bytes())?;
        Ok(())
    }
}

/// Fixed header in front of every chunked object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectHeader {
    pub kind: u32,
    pub id: u32,
    /// Bytes following this header: property table plus all payloads.
    pub size: u32,
    /// Property table entries, including the reserved slot 0.
    pub property_count: u32,
}

impl ObjectHeader {
    pub const SIZE: usize = OBJECT_HEADER_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.kind.to_le_bytes());
        buf[4..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.property_count.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            kind: le_u32(&bytes, 0),
            id: le_u32(&bytes, 4),
            size: le_u32(&bytes, 8),
            property_count: le_u32(&bytes, 12),
        }
    }

    pub fn object_kind(&self) -> Option<ObjectKind> {
        ObjectKind::from_u32(self.kind)
    }
}

/// One row of an object's property table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropertyEntry {
    /// Element count; its meaning depends on the property.
    pub count: u32,
    pub size: u32,
}

impl PropertyEntry {
    pub const SIZE: usize = PROPERTY_ENTRY_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.count.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            count: le_u32(&bytes, 0),
            size: le_u32(&bytes, 4),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcedureHeader {
    pub flags: u16,
    pub min_args: u16,
    pub max_args: u16,
    pub label_count: u16,
}

impl ProcedureHeader {
    pub const SIZE: usize = PROCEDURE_HEADER_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.flags.to_le_bytes());
        buf[2..4].copy_from_slice(&self.min_args.to_le_bytes());
        buf[4..6].copy_from_slice(&self.max_args.to_le_bytes());
        buf[6..8].copy_from_slice(&self.label_count.to_le_bytes());
        buf
    }

    /// Applies only the fields fully present in `bytes`, leaving the rest at
    /// their current values. Older writers emitted shorter headers.
    pub fn apply_partial(&mut self, bytes: &[u8]) {
        let fields = [
            &mut self.flags,
            &mut self.min_args,
            &mut self.max_args,
            &mut self.label_count,
        ];
        for (field, chunk) in fields.into_iter().zip(bytes.chunks_exact(2)) {
            *field = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub procedure_id: u32,
    pub pc: u32,
    pub context_sp: u32,
    pub exception_sp: u32,
    pub flags: u32,
}

impl FrameHeader {
    pub const SIZE: usize = FRAME_HEADER_SIZE;
    pub const WANT_RESULT: u32 = 0x0000_0001;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.procedure_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.pc.to_le_bytes());
        buf[8..12].copy_from_slice(&self.context_sp.to_le_bytes());
        buf[12..16].copy_from_slice(&self.exception_sp.to_le_bytes());
        buf[16..20].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            procedure_id: le_u32(&bytes, 0),
            pc: le_u32(&bytes, 4),
            context_sp: le_u32(&bytes, 8),
            exception_sp: le_u32(&bytes, 12),
            flags: le_u32(&bytes, 16),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessHeader {
    pub priority: u8,
    pub kind: u8,
    pub context_depth: u16,
}

impl ProcessHeader {
    pub const SIZE: usize = PROCESS_HEADER_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let depth = self.context_depth.to_le_bytes();
        [self.priority, self.kind, depth[0], depth[1]]
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            priority: bytes[0],
            kind: bytes[1],
            context_depth: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Reads exactly `N` bytes, reporting a short read as truncation of `what`.
pub(crate) fn read_array<const N: usize, R: Read + ?Sized>(
    input: &mut R,
    what: &'static str,
) -> PersistResult<[u8; N]> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf).map_err(|err| truncation(err, what))?;
    Ok(buf)
}

/// Reads as many bytes as are available up to `buf.len()`.
pub(crate) fn read_up_to<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Reads exactly `len` bytes without trusting `len` for the allocation: the
/// buffer only grows as data actually arrives.
pub(crate) fn read_bounded<R: Read + ?Sized>(
    input: &mut R,
    len: usize,
    what: &'static str,
) -> PersistResult<Vec<u8>> {
    const INITIAL_CAPACITY: usize = 64 * 1024;
    let mut buf = Vec::with_capacity(len.min(INITIAL_CAPACITY));
    input.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(PersistError::Truncated { what });
    }
    Ok(buf)
}

pub(crate) fn read_u32<R: Read + ?Sized>(input: &mut R, what: &'static str) -> PersistResult<u32> {
    Ok(u32::from_le_bytes(read_array(input, what)?))
}

pub(crate) fn read_i32<R: Read + ?Sized>(input: &mut R, what: &'static str) -> PersistResult<i32> {
    Ok(i32::from_le_bytes(read_array(input, what)?))
}

fn truncation(err: io::Error, what: &'static str) -> PersistError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        PersistError::Truncated { what }
    } else {
        PersistError::Io(err)
    }
}
