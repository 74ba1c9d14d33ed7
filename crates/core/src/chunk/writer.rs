use std::io::{self, Seek, SeekFrom, Write};

use tracing::trace;

use crate::error::{writer_error, PersistResult};
use crate::wire::{ObjectHeader, PropertyEntry};

#[derive(Debug)]
struct OpenObject {
    start: u64,
    header: ObjectHeader,
    table: Vec<PropertyEntry>,
    next_index: usize,
    property: Option<(u64, u32)>,
}

/// Writes chunked objects, backpatching sizes once payloads are known.
///
/// The header and a zeroed property table go out first; `end_object` seeks
/// back and rewrites them. Payload bytes are written through the `Write`
/// impl while a property is open.
#[derive(Debug)]
pub struct ChunkWriter<W> {
    out: W,
    open: Option<OpenObject>,
}

impl<W: Write + Seek> ChunkWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, open: None }
    }

    pub fn into_inner(self) -> PersistResult<W> {
        if let Some(open) = &self.open {
            return Err(writer_error(format!(
                "object {} still open",
                open.header.id
            )));
        }
        Ok(self.out)
    }

    /// Writes bytes outside any object, e.g. a file header.
    pub fn write_raw(&mut self, bytes: &[u8]) -> PersistResult<()> {
        if self.open.is_some() {
            return Err(writer_error("raw write inside an object"));
        }
        self.out.write_all(bytes)?;
        Ok(())
    }

    /// Begins an object with room for `num_properties` caller-visible
    /// properties (plus the reserved slot 0).
    pub fn start_object(&mut self, kind: u32, id: u32, num_properties: u32) -> PersistResult<()> {
        if let Some(open) = &self.open {
            return Err(writer_error(format!(
                "object {} still open when starting {id}",
                open.header.id
            )));
        }
        let property_count = num_properties
            .checked_add(1)
            .ok_or_else(|| writer_error(format!("object {id} declares too many properties")))?;
        let start = self.out.stream_position()?;
        let table = vec![PropertyEntry::default(); property_count as usize];
        let header = ObjectHeader {
            kind,
            id,
            size: 0,
            property_count,
        };
        self.out.write_all(&header.to_bytes())?;
        for entry in &table {
            self.out.write_all(&entry.to_bytes())?;
        }
        self.open = Some(OpenObject {
            start,
            header,
            table,
            next_index: 1,
            property: None,
        });
        Ok(())
    }

    pub fn start_property(&mut self, count: u32) -> PersistResult<()> {
        let position = self.out.stream_position()?;
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| writer_error("property started outside an object"))?;
        if open.property.is_some() {
            return Err(writer_error("property started while another is open"));
        }
        if open.next_index >= open.table.len() {
            return Err(writer_error(format!(
                "object {} declared {} properties",
                open.header.id,
                open.table.len() - 1
            )));
        }
        open.property = Some((position, count));
        Ok(())
    }

    pub fn end_property(&mut self) -> PersistResult<()> {
        let position = self.out.stream_position()?;
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| writer_error("property ended outside an object"))?;
        let (start, count) = open
            .property
            .take()
            .ok_or_else(|| writer_error("property ended without start"))?;
        let size = u32::try_from(position - start)
            .map_err(|_| writer_error("property larger than 4 GiB"))?;
        open.table[open.next_index] = PropertyEntry { count, size };
        open.next_index += 1;
        Ok(())
    }

    /// Writes a whole property in one call.
    pub fn write_property(&mut self, count: u32, payload: &[u8]) -> PersistResult<()> {
        self.start_property(count)?;
        self.out.write_all(payload)?;
        self.end_property()
    }

    /// Finishes the current object and backpatches its header and table.
    pub fn end_object(&mut self) -> PersistResult<()> {
        let open = self
            .open
            .take()
            .ok_or_else(|| writer_error("object ended without start"))?;
        if open.property.is_some() {
            return Err(writer_error(format!(
                "object {} ended with a property open",
                open.header.id
            )));
        }
        let end = self.out.stream_position()?;
        let body = end - open.start - ObjectHeader::SIZE as u64;
        let mut header = open.header;
        header.size =
            u32::try_from(body).map_err(|_| writer_error("object larger than 4 GiB"))?;

        self.out.seek(SeekFrom::Start(open.start))?;
        self.out.write_all(&header.to_bytes())?;
        for entry in &open.table {
            self.out.write_all(&entry.to_bytes())?;
        }
        self.out.seek(SeekFrom::Start(end))?;
        trace!(kind = header.kind, id = header.id, size = header.size, "object written");
        Ok(())
    }
}

impl<W: Write + Seek> Write for ChunkWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.open {
            Some(open) if open.property.is_some() => self.out.write(buf),
            _ => Err(io::Error::other("payload written outside a property")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
