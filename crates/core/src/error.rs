use miette::Diagnostic;
use thiserror::Error;

pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Debug, Error, Diagnostic)]
pub enum PersistError {
    #[error("truncated input: {what}")]
    #[diagnostic(code("persist.truncated"))]
    Truncated { what: &'static str },
    #[error("size budget exceeded: {what} needs {needed} bytes, {available} available")]
    #[diagnostic(code("persist.size_budget"))]
    SizeBudget {
        what: &'static str,
        needed: u64,
        available: u64,
    },
    #[error("format error: {0}")]
    #[diagnostic(code("persist.format"))]
    Format(String),
    #[error("unexpected object type {kind} (id {id})")]
    #[diagnostic(code("persist.unexpected_object"))]
    UnexpectedObject { kind: u32, id: u32 },
    #[error("unresolved {kind} reference {id}")]
    #[diagnostic(
        code("persist.unresolved"),
        help("the active resolution callback does not support this value kind")
    )]
    Unresolved { kind: &'static str, id: u32 },
    #[error("invalid file magic bytes")]
    #[diagnostic(code("persist.invalid_magic"))]
    InvalidMagic,
    #[error("unsupported format version: found {found}, expected {expected}")]
    #[diagnostic(code("persist.version"))]
    UnsupportedVersion { found: u8, expected: u8 },
    #[error("resource limit exceeded: {0}")]
    #[diagnostic(code("persist.resource_limit"))]
    ResourceLimit(String),
    #[error("chunk writer misuse: {0}")]
    #[diagnostic(code("persist.writer"))]
    Writer(String),
    #[error("i/o error: {0}")]
    #[diagnostic(code("persist.io"))]
    Io(#[from] std::io::Error),
}

impl PersistError {
    /// True for errors caused by running out of input.
    pub fn is_truncation(&self) -> bool {
        match self {
            Self::Truncated { .. } => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

#[cold]
#[inline(never)]
pub(crate) fn format_error(message: impl Into<String>) -> PersistError {
    PersistError::Format(message.into())
}

#[cold]
#[inline(never)]
pub(crate) fn limit_error(message: impl Into<String>) -> PersistError {
    PersistError::ResourceLimit(message.into())
}

#[cold]
#[inline(never)]
pub(crate) fn writer_error(message: impl Into<String>) -> PersistError {
    PersistError::Writer(message.into())
}
