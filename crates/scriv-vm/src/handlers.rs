//! Runtime behavior attached to tag signatures.
//!
//! The registry holds the compile-facing declaration of a tag; this table
//! holds what it does at runtime: the execute handler (a closed enum for
//! builtins, a shared closure for host tags), the storage kind driving
//! save/load/delete of its workarea frame, and whether executing it
//! pushes a frame at all.

use std::rc::Rc;

use crate::RuntimeError;
use crate::state::Workarea;
use crate::vm::{TagResult, Vm};

/// Host-registered execute handler.
pub type NativeFn = Rc<dyn Fn(&mut Vm) -> TagResult>;

/// Host-registered storage handlers for a tag's workarea frame.
///
/// `save` appends the frame payload, `load` parses it back into a frame
/// (returning the bytes consumed), `delete` runs when the frame is
/// released and still on top of the stack.
#[derive(Clone)]
pub struct NativeStorage {
    pub save: Rc<dyn Fn(&Workarea, &mut Vec<u8>) -> Result<(), RuntimeError>>,
    pub load: Rc<dyn Fn(&[u8]) -> Result<(Workarea, usize), RuntimeError>>,
    pub delete: Rc<dyn Fn(&mut Vm) -> Result<(), RuntimeError>>,
}

/// Execute dispatch for one signature.
#[derive(Clone)]
pub enum ExecKind {
    /// No behavior: advance to the next command.
    Default,
    Builtin(Builtin),
    Native(NativeFn),
}

/// Every tag implemented by the engine itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    Ch,
    Newline,
    Label,
    Goto,
    GotoFile,
    Gosub,
    GosubFile,
    Exit,
    Return,
    Set,
    Unset,
    IsNull,
    IsInt,
    IsReal,
    IsArray,
    IsString,
    Let,
    Const,
    If,
    ElseIf,
    Else,
    EndIf,
    MacroDecl,
    EndMacro,
    CallMacro,
    Break,
    Continue,
    While,
    EndWhile,
    Do,
    DoWhile,
    Foreach,
    EndForeach,
    Stream,
    EndStream,
    StreamCh,
    StreamNewline,
    Count,
    File,
    Substr,
    Strlen,
    Strtok,
    Ini,
    WriteVar,
    ReadVar,
}

/// How a tag's workarea frame is persisted.
#[derive(Clone)]
pub enum StorageKind {
    /// Frame exists but carries no payload (`while`, `do`, `macro`).
    Empty,
    /// A single flag (`if`).
    Flag,
    /// Return frame: call-site command plus optional origin file.
    Return,
    /// Macro invocation local-variable frame.
    MacroLocals,
    /// Foreach cursor.
    Foreach,
    /// Stream redirection.
    Stream,
    /// Host-defined payload.
    Native(NativeStorage),
}

/// Runtime handler entry for one signature.
#[derive(Clone)]
pub struct TagHandlers {
    pub exec: ExecKind,
    pub storage: Option<StorageKind>,
    pub needs_workarea: bool,
}

impl TagHandlers {
    pub fn exec_only(exec: ExecKind) -> Self {
        Self {
            exec,
            storage: None,
            needs_workarea: false,
        }
    }
}
