//! The resumable execution context.
//!
//! A `State` bundles everything save/load persists: the program counter
//! trio, 32 argument registers, the local-variable overlay and its saved
//! slots, the workarea frame stack and the pending return target. The VM
//! owns exactly one active state; nested execution swaps a fresh one in
//! and restores the previous one on return.

use scriv_core::{Signature, Var};

/// One evaluated argument: the resolved var plus write-back metadata when
/// the argument was a variable reference.
#[derive(Clone, Debug)]
pub struct Register {
    pub var: Var,
    /// Parent holding the var, for `set`/`unset` write-back.
    pub parent: Option<Var>,
    /// Key hash of the var within its parent.
    pub hash: u32,
    /// True when the value was computed rather than referenced.
    pub is_temp: bool,
}

impl Register {
    pub fn temp(var: Var) -> Self {
        Self {
            var,
            parent: None,
            hash: 0,
            is_temp: true,
        }
    }
}

/// Typed per-frame scratch state, one variant per stateful construct.
#[derive(Clone, Debug, Default)]
pub enum Workarea {
    /// Pushed but not yet filled by its tag.
    #[default]
    Empty,
    /// `if`/`elseif`: whether a prior branch already matched.
    Flag(bool),
    Return(ReturnFrame),
    MacroLocals(MacroFrame),
    Foreach(ForeachFrame),
    Stream(StreamFrame),
    /// Host-defined payload managed through native storage handlers.
    Bytes(Vec<u8>),
}

#[derive(Clone, Debug)]
pub struct ReturnFrame {
    /// File to reload before returning, for cross-file gosub.
    pub file: Option<String>,
    /// Call-site command index; execution resumes just after it.
    pub cmd: usize,
}

#[derive(Clone, Debug)]
pub struct MacroFrame {
    /// Caller overlay entries backed up at the invocation.
    pub saved_count: usize,
    /// Start of the backup region in the saved-slot buffer.
    pub saved_base: usize,
    /// Caller's pending return target, restored on exit.
    pub saved_return: Option<Var>,
}

#[derive(Clone, Debug)]
pub struct ForeachFrame {
    /// The foreach command, for rebinding after a state load.
    pub cmd: usize,
    /// Next entry position in the target array's insertion order.
    pub pos: usize,
    pub from: Var,
    pub item: Var,
    pub key: Option<Var>,
}

#[derive(Clone, Debug)]
pub struct StreamFrame {
    pub cmd: usize,
    pub to_array: bool,
    /// Redirected output accumulates here.
    pub var: Var,
}

/// One workarea stack entry.
#[derive(Clone, Debug)]
pub struct Frame {
    pub sig: Signature,
    pub data: Workarea,
}

/// Saved local-variable slot: key hash plus the owned cell.
#[derive(Clone, Debug)]
pub struct SavedVar {
    pub key: u32,
    pub var: Var,
}

/// The resumable execution context.
#[derive(Debug)]
pub struct State {
    /// Command being executed.
    pub cur: Option<usize>,
    /// Pair chain of the previously executed command; a differing chain
    /// marks the first visit to a block.
    pub prev_pair: Option<u32>,
    /// Command to execute next.
    pub next: usize,
    /// Whether the current command is the first visit to its pair chain.
    pub is_first: bool,
    /// Hash of the label most recently passed, for save-state resync.
    pub last_label: u32,
    pub argc: usize,
    pub args: Vec<Register>,
    /// Local-variable overlay shadowing globals during macro calls.
    pub root: Var,
    /// Saved local-variable slots across nested macro calls.
    pub saved: Vec<SavedVar>,
    pub frames: Vec<Frame>,
    /// Var armed by `set` to receive the next return value.
    pub return_target: Option<Var>,
    /// Pair chain override set by `break`/`continue` so the jump target
    /// is not treated as a first visit.
    pub pair_alias: Option<u32>,
}

impl State {
    pub fn new() -> Self {
        Self {
            cur: None,
            prev_pair: None,
            next: 0,
            is_first: true,
            last_label: 0,
            argc: 0,
            args: Vec::new(),
            root: Var::new(),
            saved: Vec::new(),
            frames: Vec::new(),
            return_target: None,
            pair_alias: None,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
