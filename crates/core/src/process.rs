//! Suspended processes and their call frames.

use tracing::warn;

use crate::bytecode::Bytecode;
use crate::value::{Shared, Value};

/// Scheduling state of a process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Being reconstructed from a stream; not schedulable yet.
    #[default]
    Loading,
    Runnable,
    /// Loading failed partway. Permanent: a broken process is never scheduled.
    Broken,
}

/// One activation record on a process's call stack.
#[derive(Clone, Debug, Default)]
pub struct CallFrame {
    pub procedure: Option<Shared<Bytecode>>,
    pub pc: u32,
    pub context_sp: u32,
    pub exception_sp: u32,
    pub want_result: bool,
    pub locals: Vec<Value>,
    pub local_names: Vec<String>,
}

/// Entry of the exception-handler stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub catch_pc: u32,
    pub finally_pc: u32,
    pub exit_pc: u32,
    /// Context-stack depth to unwind to when the handler fires.
    pub context_depth: u32,
}

#[derive(Clone, Debug, Default)]
pub struct Process {
    pub id: u32,
    pub name: Option<String>,
    pub priority: u8,
    pub kind: u8,
    pub frames: Vec<CallFrame>,
    /// Bound lexical contexts; every entry satisfies `Value::is_context`.
    pub contexts: Vec<Value>,
    pub handlers: Vec<ExceptionHandler>,
    pub stack: Vec<Value>,
    context_depth: usize,
    status: ProcessStatus,
}

impl Process {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn is_runnable(&self) -> bool {
        self.status == ProcessStatus::Runnable
    }

    /// Makes the process schedulable unless it is broken.
    pub fn set_runnable(&mut self) {
        if self.status != ProcessStatus::Broken {
            self.status = ProcessStatus::Runnable;
        }
    }

    pub fn mark_broken(&mut self) {
        self.status = ProcessStatus::Broken;
    }

    pub fn context_depth(&self) -> usize {
        self.context_depth
    }

    /// Applies a saved context-stack depth.
    ///
    /// A depth beyond the loaded contexts is ignored and the process keeps
    /// the natural depth of its context stack. Returns whether it applied.
    pub fn restore_context_depth(&mut self, saved: u16) -> bool {
        let saved = usize::from(saved);
        if saved <= self.contexts.len() {
            self.context_depth = saved;
            true
        } else {
            warn!(
                process = self.id,
                saved,
                available = self.contexts.len(),
                "saved context depth out of range, keeping natural depth"
            );
            self.context_depth = self.contexts.len();
            false
        }
    }

    pub fn set_context_depth(&mut self, depth: usize) {
        self.context_depth = depth.min(self.contexts.len());
    }
}
