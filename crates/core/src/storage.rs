//! File-level entry points: object files and VM state files.
//!
//! Both formats are a [`FileHeader`] followed by a chunked object stream. An
//! object file holds procedures and the composites they reference, and its
//! header names the entry-point procedure. A VM state file also holds
//! processes, and its header names the process that was current when saved.

use std::fs;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use tracing::{debug, instrument};

use crate::bytecode::Bytecode;
use crate::chunk::{copy_objects, ChunkReader, ChunkWriter};
use crate::config::PersistConfig;
use crate::error::{PersistError, PersistResult};
use crate::graph::ObjectGraph;
use crate::loader::ObjectLoader;
use crate::process::Process;
use crate::resource::LoadLimits;
use crate::saver::ObjectSaver;
use crate::value::Shared;
use crate::version::{OBJECT_FILE_MAGIC, VM_STATE_MAGIC};
use crate::wire::{FileHeader, ObjectKind};

/// Contents of an object file.
#[derive(Debug)]
pub struct ObjectFile {
    pub entry_id: u32,
    pub graph: ObjectGraph,
}

impl ObjectFile {
    /// The entry-point procedure, if the file defines or references it.
    pub fn entry(&self) -> Option<Shared<Bytecode>> {
        self.graph.find_procedure(self.entry_id)
    }
}

/// Contents of a VM state file.
#[derive(Debug)]
pub struct VmState {
    pub current: u32,
    pub graph: ObjectGraph,
    pub processes: Vec<Process>,
}

impl VmState {
    pub fn current_process(&self) -> Option<&Process> {
        self.processes.iter().find(|process| process.id == self.current)
    }
}

// =============================================================================
// Streams
// =============================================================================

/// Reads an object file. Process objects are rejected.
#[instrument(skip_all)]
pub fn read_object_file<R: Read + Seek>(mut input: R, config: &PersistConfig) -> PersistResult<ObjectFile> {
    let header = FileHeader::read(&mut input, OBJECT_FILE_MAGIC)?;
    let mut loader = ObjectLoader::new(input, config.limits)?.with_charset(config.charset.converter());
    let mut objects = 0usize;
    while let Some(object) = loader.read_next()? {
        if object.kind == ObjectKind::Process {
            return Err(PersistError::UnexpectedObject {
                kind: object.kind.as_u32(),
                id: object.id,
            });
        }
        objects += 1;
    }
    debug!(entry = header.entry_id, objects, "object file read");
    Ok(ObjectFile {
        entry_id: header.entry_id,
        graph: loader.into_graph(),
    })
}

/// Writes `entry` and `procedures` plus everything they reference.
///
/// The entry procedure is registered first and so always gets ID 1.
#[instrument(skip_all)]
pub fn write_object_file<W: Write + Seek>(
    out: W,
    entry: &Shared<Bytecode>,
    procedures: &[Shared<Bytecode>],
    config: &PersistConfig,
) -> PersistResult<W> {
    let mut saver = ObjectSaver::new(out).with_charset(config.charset.converter());
    let entry_id = saver.register_procedure(entry);
    for procedure in procedures {
        saver.register_procedure(procedure);
    }
    saver.write_raw(&FileHeader::new(OBJECT_FILE_MAGIC, entry_id).to_bytes())?;
    saver.flush()?;
    debug!(entry = entry_id, objects = saver.written(), "object file written");
    saver.finish()
}

#[instrument(skip_all)]
pub fn read_vm_state<R: Read + Seek>(mut input: R, config: &PersistConfig) -> PersistResult<VmState> {
    let header = FileHeader::read(&mut input, VM_STATE_MAGIC)?;
    let mut loader = ObjectLoader::new(input, config.limits)?.with_charset(config.charset.converter());
    let objects = loader.load_all()?;
    let (graph, processes) = loader.into_parts();
    debug!(
        current = header.entry_id,
        objects,
        processes = processes.len(),
        "vm state read"
    );
    Ok(VmState {
        current: header.entry_id,
        graph,
        processes,
    })
}

#[instrument(skip_all)]
pub fn write_vm_state<W: Write + Seek>(
    out: W,
    processes: &[Process],
    current: u32,
    config: &PersistConfig,
) -> PersistResult<W> {
    let mut saver = ObjectSaver::new(out).with_charset(config.charset.converter());
    saver.write_raw(&FileHeader::new(VM_STATE_MAGIC, current).to_bytes())?;
    for process in processes {
        saver.save_process(process)?;
    }
    debug!(current, objects = saver.written(), "vm state written");
    saver.finish()
}

/// Re-emits an object file object by object and property by property.
/// The output is byte-identical to any input the writer produced.
#[instrument(skip_all)]
pub fn copy_object_file<R, W>(input: R, out: W, limits: LoadLimits) -> PersistResult<usize>
where
    R: Read + Seek,
    W: Write + Seek,
{
    copy_with_magic(input, out, limits, OBJECT_FILE_MAGIC)
}

#[instrument(skip_all)]
pub fn copy_vm_state<R, W>(input: R, out: W, limits: LoadLimits) -> PersistResult<usize>
where
    R: Read + Seek,
    W: Write + Seek,
{
    copy_with_magic(input, out, limits, VM_STATE_MAGIC)
}

fn copy_with_magic<R, W>(mut input: R, out: W, limits: LoadLimits, magic: [u8; 6]) -> PersistResult<usize>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let (header, extension) = FileHeader::read_extended(&mut input, magic)?;
    let mut writer = ChunkWriter::new(out);
    writer.write_raw(&header.to_bytes())?;
    writer.write_raw(&extension)?;
    let mut reader = ChunkReader::new(input, limits)?;
    let copied = copy_objects(&mut reader, &mut writer)?;
    writer.into_inner()?.flush()?;
    debug!(copied, "objects copied");
    Ok(copied)
}

// =============================================================================
// Paths
// =============================================================================

#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_object_file(path: &Path, config: &PersistConfig) -> PersistResult<ObjectFile> {
    read_object_file(Cursor::new(fs::read(path)?), config)
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn save_object_file(
    path: &Path,
    entry: &Shared<Bytecode>,
    procedures: &[Shared<Bytecode>],
    config: &PersistConfig,
) -> PersistResult<()> {
    let bytes = write_object_file(Cursor::new(Vec::new()), entry, procedures, config)?.into_inner();
    atomic_write(path, &bytes)
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_vm_state(path: &Path, config: &PersistConfig) -> PersistResult<VmState> {
    read_vm_state(Cursor::new(fs::read(path)?), config)
}

#[instrument(skip_all, fields(path = %path.display()))]
pub fn save_vm_state(
    path: &Path,
    processes: &[Process],
    current: u32,
    config: &PersistConfig,
) -> PersistResult<()> {
    let bytes = write_vm_state(Cursor::new(Vec::new()), processes, current, config)?.into_inner();
    atomic_write(path, &bytes)
}

/// Writes to a sibling temp file, then renames it over `path`.
fn atomic_write(path: &Path, bytes: &[u8]) -> PersistResult<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/storage_tests.rs"]
mod tests;
