//! Structural summaries of a stream for tooling. Nothing is decoded beyond
//! headers and property tables.

use std::io::{Read, Seek};

use serde::Serialize;

use crate::chunk::ChunkReader;
use crate::error::{PersistError, PersistResult};
use crate::resource::LoadLimits;
use crate::version::{OBJECT_FILE_MAGIC, VM_STATE_MAGIC};
use crate::wire::{read_array, FileHeader, ObjectKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    ObjectFile,
    VmState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PropertySummary {
    pub id: u32,
    pub count: u32,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    pub kind: u32,
    /// `None` for type tags this version does not know.
    pub kind_name: Option<&'static str>,
    pub id: u32,
    pub size: u32,
    pub properties: Vec<PropertySummary>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub file_kind: FileKind,
    pub version: u8,
    pub header_size: u16,
    /// Entry procedure for object files, current process for VM state files.
    pub entry_id: u32,
    pub objects: Vec<ObjectSummary>,
}

impl FileSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Summarizes every object from the stream's current position to its end.
pub fn summarize_objects<R: Read + Seek>(
    input: R,
    limits: LoadLimits,
) -> PersistResult<Vec<ObjectSummary>> {
    let mut reader = ChunkReader::new(input, limits)?;
    let mut objects = Vec::new();
    while let Some(header) = reader.read_object()? {
        let properties = (1..=reader.num_properties() as u32)
            .map(|id| PropertySummary {
                id,
                count: reader.property_count(id).unwrap_or_default(),
                size: reader.property_size(id).unwrap_or_default(),
            })
            .collect();
        objects.push(ObjectSummary {
            kind: header.kind,
            kind_name: header.object_kind().map(ObjectKind::name),
            id: header.id,
            size: header.size,
            properties,
        });
    }
    Ok(objects)
}

/// Detects the file kind from its magic, then summarizes the objects.
pub fn summarize_file<R: Read + Seek>(mut input: R, limits: LoadLimits) -> PersistResult<FileSummary> {
    let start = input.stream_position()?;
    let magic: [u8; 6] = read_array(&mut input, "file magic")?;
    let file_kind = match magic {
        OBJECT_FILE_MAGIC => FileKind::ObjectFile,
        VM_STATE_MAGIC => FileKind::VmState,
        _ => return Err(PersistError::InvalidMagic),
    };
    input.seek(std::io::SeekFrom::Start(start))?;
    let header = FileHeader::read(&mut input, magic)?;
    Ok(FileSummary {
        file_kind,
        version: header.version,
        header_size: header.header_size,
        entry_id: header.entry_id,
        objects: summarize_objects(input, limits)?,
    })
}
