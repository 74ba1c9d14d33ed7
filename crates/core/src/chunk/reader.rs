use std::io::{Cursor, Read, Seek, SeekFrom};

use tracing::trace;

use crate::error::{format_error, limit_error, PersistError, PersistResult};
use crate::resource::LoadLimits;
use crate::wire::{read_bounded, read_up_to, ObjectHeader, PropertyEntry};

/// Payload of one property, already bounded to its declared size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    /// Caller-visible ID, starting at 1.
    pub id: u32,
    /// Element count from the property table.
    pub count: u32,
    data: Vec<u8>,
}

impl Property {
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sub-stream over exactly this property's bytes.
    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.data)
    }
}

#[derive(Debug)]
struct OpenObject {
    header: ObjectHeader,
    table: Vec<PropertyEntry>,
    next_index: usize,
    next_offset: u64,
    remaining: u64,
}

/// Reads a stream of self-describing chunked objects.
///
/// Each call to [`ChunkReader::read_object`] seeks to where the previous
/// object ended, so properties a caller never asks for are skipped for free.
#[derive(Debug)]
pub struct ChunkReader<R> {
    input: R,
    limits: LoadLimits,
    next_object: u64,
    current: Option<OpenObject>,
}

impl<R: Read + Seek> ChunkReader<R> {
    /// Starts reading objects at the stream's current position.
    pub fn new(mut input: R, limits: LoadLimits) -> PersistResult<Self> {
        let next_object = input.stream_position()?;
        Ok(Self {
            input,
            limits,
            next_object,
            current: None,
        })
    }

    pub fn into_inner(self) -> R {
        self.input
    }

    pub fn limits(&self) -> &LoadLimits {
        &self.limits
    }

    /// Advances to the next object. Returns `None` at a clean end of stream.
    pub fn read_object(&mut self) -> PersistResult<Option<ObjectHeader>> {
        self.current = None;
        let start = self.next_object;
        self.input.seek(SeekFrom::Start(start))?;

        let mut raw = [0u8; ObjectHeader::SIZE];
        let got = read_up_to(&mut self.input, &mut raw)?;
        if got == 0 {
            return Ok(None);
        }
        if got < raw.len() {
            return Err(PersistError::Truncated {
                what: "object header",
            });
        }
        let header = ObjectHeader::from_bytes(raw);

        if header.size > self.limits.max_object_bytes {
            return Err(limit_error(format!(
                "object {} declares {} bytes, limit {}",
                header.id, header.size, self.limits.max_object_bytes
            )));
        }
        if header.property_count > self.limits.max_properties.saturating_add(1) {
            return Err(limit_error(format!(
                "object {} declares {} properties, limit {}",
                header.id, header.property_count, self.limits.max_properties
            )));
        }

        let table_bytes = u64::from(header.property_count) * PropertyEntry::SIZE as u64;
        let declared = u64::from(header.size);
        if table_bytes > declared {
            return Err(PersistError::SizeBudget {
                what: "property table",
                needed: table_bytes,
                available: declared,
            });
        }

        let raw_table = read_bounded(&mut self.input, table_bytes as usize, "property table")?;
        let table: Vec<PropertyEntry> = raw_table
            .chunks_exact(PropertyEntry::SIZE)
            .map(|chunk| {
                let mut entry = [0u8; PropertyEntry::SIZE];
                entry.copy_from_slice(chunk);
                PropertyEntry::from_bytes(entry)
            })
            .collect();

        let payload_total: u64 = table.iter().map(|entry| u64::from(entry.size)).sum();
        let available = declared - table_bytes;
        if payload_total > available {
            return Err(PersistError::SizeBudget {
                what: "property payloads",
                needed: payload_total,
                available,
            });
        }

        let body_start = start + ObjectHeader::SIZE as u64;
        self.next_object = body_start
            .checked_add(declared)
            .ok_or_else(|| format_error("object end offset overflows"))?;

        let mut open = OpenObject {
            header,
            table,
            next_index: 0,
            next_offset: body_start + table_bytes,
            remaining: available,
        };
        // Slot 0 is reserved; callers see properties from ID 1 on.
        if let Some(reserved) = open.table.first().copied() {
            open.next_offset += u64::from(reserved.size);
            open.remaining -= u64::from(reserved.size);
            open.next_index = 1;
        }
        trace!(
            kind = header.kind,
            id = header.id,
            size = header.size,
            properties = open.table.len().saturating_sub(1),
            "object header"
        );
        self.current = Some(open);
        Ok(Some(header))
    }

    /// Reads the next property of the current object, if any remain.
    pub fn read_property(&mut self) -> PersistResult<Option<Property>> {
        let Some(open) = self.current.as_mut() else {
            return Ok(None);
        };
        let Some(entry) = open.table.get(open.next_index).copied() else {
            return Ok(None);
        };
        let size = u64::from(entry.size);
        if size > open.remaining {
            return Err(PersistError::SizeBudget {
                what: "property",
                needed: size,
                available: open.remaining,
            });
        }

        self.input.seek(SeekFrom::Start(open.next_offset))?;
        let data = read_bounded(&mut self.input, entry.size as usize, "property payload")?;

        let id = open.next_index as u32;
        open.next_index += 1;
        open.next_offset += size;
        open.remaining -= size;
        Ok(Some(Property {
            id,
            count: entry.count,
            data,
        }))
    }

    /// Header of the object most recently returned by `read_object`.
    pub fn object(&self) -> Option<&ObjectHeader> {
        self.current.as_ref().map(|open| &open.header)
    }

    /// Caller-visible property count of the current object.
    pub fn num_properties(&self) -> usize {
        self.current
            .as_ref()
            .map_or(0, |open| open.table.len().saturating_sub(1))
    }

    /// Declared element count of property `id`, independent of read order.
    pub fn property_count(&self, id: u32) -> Option<u32> {
        self.entry(id).map(|entry| entry.count)
    }

    /// Declared byte size of property `id`, independent of read order.
    pub fn property_size(&self, id: u32) -> Option<u32> {
        self.entry(id).map(|entry| entry.size)
    }

    fn entry(&self, id: u32) -> Option<PropertyEntry> {
        if id == 0 {
            return None;
        }
        let open = self.current.as_ref()?;
        open.table.get(id as usize).copied()
    }
}
