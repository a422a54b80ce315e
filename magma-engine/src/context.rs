//! Per-worker execution state of the virtual machine.

use magma_core::{Ob, SetView};

/// Register file for one program execution. Owned by the worker and reused
/// across tasks; cleared before every execution.
pub struct Context<'a> {
    /// Ob register bindings.
    pub obs: [Ob; 256],
    /// Set register bindings: borrowed views over table rows.
    pub sets: [Option<SetView<'a>>; 256],
    /// Current shard for block-sharded programs.
    pub block: usize,
    /// Diagnostic nesting depth.
    pub trace: usize,
}

impl<'a> Context<'a> {
    pub fn new() -> Self {
        Self {
            obs: [0; 256],
            sets: [None; 256],
            block: 0,
            trace: 0,
        }
    }

    pub fn clear(&mut self) {
        self.obs = [0; 256];
        self.sets = [None; 256];
        self.block = 0;
        self.trace = 0;
    }
}

impl Default for Context<'_> {
    fn default() -> Self {
        Self::new()
    }
}
