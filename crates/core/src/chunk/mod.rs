//! Self-describing chunked container.
//!
//! A stream is a sequence of objects. Each object is a 16-byte header, a table
//! of `(count, size)` pairs, and the property payloads in table order. Slot 0
//! of the table is reserved; readers skip it and callers see properties from
//! ID 1. The layer knows nothing about what the payloads mean.

mod reader;
mod writer;

use std::io::{Read, Seek, Write};

pub use reader::{ChunkReader, Property};
pub use writer::ChunkWriter;

use crate::error::PersistResult;

/// Re-emits every object and property exactly as read.
///
/// Returns the number of objects copied. For streams produced by
/// [`ChunkWriter`] the output is byte-identical to the input.
pub fn copy_objects<R, W>(reader: &mut ChunkReader<R>, writer: &mut ChunkWriter<W>) -> PersistResult<usize>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut copied = 0;
    while let Some(header) = reader.read_object()? {
        let num_properties = reader.num_properties() as u32;
        writer.start_object(header.kind, header.id, num_properties)?;
        while let Some(property) = reader.read_property()? {
            writer.write_property(property.count, property.bytes())?;
        }
        writer.end_object()?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
#[path = "../tests/chunk_tests.rs"]
mod tests;
