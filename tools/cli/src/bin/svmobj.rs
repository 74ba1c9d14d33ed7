use std::fs::{self, File};
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use script_persist::{
    copy_object_file, copy_vm_state, load_object_file, load_vm_state, summarize_file, FileKind,
    FileSummary, GraphStats, ObjectGraph, PersistConfig, Process,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Inspect and copy script machine object files")]
struct Cli {
    /// TOML file with charset and load limits.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the objects and property tables of an object file or VM state file.
    Inspect {
        file: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Re-emit a file object by object.
    Copy {
        input: PathBuf,
        output: PathBuf,
        /// Fail unless the copy is byte-identical to the input.
        #[arg(long, default_value_t = false)]
        verify: bool,
    },
    /// Load a file fully and print what it contains.
    Dump { file: PathBuf },
}

#[derive(Debug, Serialize)]
struct DumpReport {
    file_kind: FileKind,
    entry_id: u32,
    stats: GraphStats,
    procedures: Vec<ProcedureReport>,
    processes: Vec<ProcessReport>,
}

#[derive(Debug, Serialize)]
struct ProcedureReport {
    id: u32,
    name: Option<String>,
    literals: usize,
    instructions: usize,
    args: (u16, u16),
}

impl ProcedureReport {
    fn list(graph: &ObjectGraph) -> Vec<Self> {
        graph
            .procedures()
            .map(|(id, procedure)| {
                let procedure = procedure.borrow();
                Self {
                    id,
                    name: procedure.name.clone(),
                    literals: procedure.literals.len(),
                    instructions: procedure.code.len(),
                    args: (procedure.min_args, procedure.max_args),
                }
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct ProcessReport {
    id: u32,
    name: Option<String>,
    status: String,
    frames: usize,
    context_depth: usize,
    stack: usize,
}

impl From<&Process> for ProcessReport {
    fn from(process: &Process) -> Self {
        Self {
            id: process.id,
            name: process.name.clone(),
            status: format!("{:?}", process.status()),
            frames: process.frames.len(),
            context_depth: process.context_depth(),
            stack: process.stack.len(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = match &cli.config {
        Some(path) => PersistConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => PersistConfig::default(),
    };
    match cli.command {
        Command::Inspect { file, json } => inspect(&file, json, &config),
        Command::Copy {
            input,
            output,
            verify,
        } => copy(&input, &output, verify, &config),
        Command::Dump { file } => dump(&file, &config),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn summarize(path: &Path, config: &PersistConfig) -> Result<FileSummary> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    summarize_file(BufReader::new(file), config.limits)
        .with_context(|| format!("read {}", path.display()))
}

fn inspect(path: &Path, json: bool, config: &PersistConfig) -> Result<()> {
    let summary = summarize(path, config)?;
    if json {
        println!("{}", summary.to_json()?);
        return Ok(());
    }
    println!(
        "{:?} v{} header {} bytes, entry {}",
        summary.file_kind, summary.version, summary.header_size, summary.entry_id
    );
    for object in &summary.objects {
        println!(
            "  {:<12} id {:<6} {:>8} bytes",
            object.kind_name.unwrap_or("unknown"),
            object.id,
            object.size
        );
        for property in &object.properties {
            println!(
                "    #{:<3} count {:<8} {:>8} bytes",
                property.id, property.count, property.size
            );
        }
    }
    Ok(())
}

fn copy(input: &Path, output: &Path, verify: bool, config: &PersistConfig) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("read {}", input.display()))?;
    let kind = summarize_file(Cursor::new(bytes.as_slice()), config.limits)
        .with_context(|| format!("read {}", input.display()))?
        .file_kind;
    let mut out = Cursor::new(Vec::with_capacity(bytes.len()));
    let copied = match kind {
        FileKind::ObjectFile => copy_object_file(Cursor::new(bytes.as_slice()), &mut out, config.limits)?,
        FileKind::VmState => copy_vm_state(Cursor::new(bytes.as_slice()), &mut out, config.limits)?,
    };
    let copy = out.into_inner();
    if verify && copy != bytes {
        bail!(
            "copy of {} differs from the input ({} vs {} bytes)",
            input.display(),
            copy.len(),
            bytes.len()
        );
    }
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, copy).with_context(|| format!("write {}", output.display()))?;
    info!(copied, output = %output.display(), "copy written");
    Ok(())
}

fn dump(path: &Path, config: &PersistConfig) -> Result<()> {
    let report = dump_report(path, config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn dump_report(path: &Path, config: &PersistConfig) -> Result<DumpReport> {
    let kind = summarize(path, config)?.file_kind;
    let report = match kind {
        FileKind::ObjectFile => {
            let file = load_object_file(path, config)?;
            if file.entry().is_none() {
                bail!("{} does not define entry procedure {}", path.display(), file.entry_id);
            }
            DumpReport {
                file_kind: kind,
                entry_id: file.entry_id,
                stats: file.graph.stats(),
                procedures: ProcedureReport::list(&file.graph),
                processes: Vec::new(),
            }
        }
        FileKind::VmState => {
            let state = load_vm_state(path, config)?;
            DumpReport {
                file_kind: kind,
                entry_id: state.current,
                stats: state.graph.stats(),
                procedures: ProcedureReport::list(&state.graph),
                processes: state.processes.iter().map(ProcessReport::from).collect(),
            }
        }
    };
    Ok(report)
}
