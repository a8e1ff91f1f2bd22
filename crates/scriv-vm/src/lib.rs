//! Resumable virtual machine for the scriv scripting engine.
//!
//! A [`Vm`] owns the tag registry, the loaded program and one active
//! [`State`]. Hosts register native tags, load or compile scripts, then
//! drive execution with [`Vm::run`] (to completion or until a tag stops)
//! or [`Vm::step`] (one command at a time). A state can be frozen with
//! [`Vm::save_state`] and resumed in a later session.

mod builtins;
mod engine;
mod error;
mod handlers;
mod program;
mod save;
mod state;
mod vm;

#[cfg(test)]
mod engine_tests;
#[cfg(test)]
mod vm_tests;

pub use error::RuntimeError;
pub use handlers::{Builtin, ExecKind, NativeFn, NativeStorage, StorageKind, TagHandlers};
pub use program::LoadedProgram;
pub use state::{
    ForeachFrame, Frame, MacroFrame, Register, ReturnFrame, SavedVar, State, StreamFrame,
    Workarea,
};
pub use vm::{Flow, Outcome, TagResult, Vm};

pub use scriv_compiler::{CompileError, Warning};
pub use scriv_core::{Signature, TagCompile, Var, Variant};
