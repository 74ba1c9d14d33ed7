//! Format versioning constants for object files and VM state files.
//!
//! Both file kinds share one header layout and one format version; the magic
//! bytes tell them apart.

/// Current binary format version. Readers reject any other value.
pub const FORMAT_VERSION: u8 = 1;

/// Magic bytes for object files (compiled procedures only).
pub const OBJECT_FILE_MAGIC: [u8; 6] = *b"SVMOBJ";

/// Magic bytes for VM state files (procedures plus suspended processes).
pub const VM_STATE_MAGIC: [u8; 6] = *b"SVMSTA";

/// Smallest header size a reader accepts. Larger headers are skipped over.
pub const MIN_FILE_HEADER_SIZE: u16 = 14;
