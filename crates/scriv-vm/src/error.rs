//! Runtime errors.
//!
//! Fatal errors unwind the run loop; the VM itself stays usable. Missing
//! files and similar soft failures are reported through the host report
//! hook instead and degrade to a no-op command.

use scriv_bytecode::calcio::FormatError;
use scriv_bytecode::program::ProgramError;
use scriv_compiler::CompileError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("assignment of read-only variable")]
    ConstAssignment,

    #[error("no program loaded")]
    NoProgram,

    #[error("jump target {0} is out of range")]
    BadJump(i64),

    #[error("label {0:#010x} is not defined")]
    UnknownLabel(u32),

    #[error("macro '{0}' has no body")]
    MacroUnbound(String),

    #[error("malformed bytecode: {0}")]
    Format(#[from] FormatError),

    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("cannot open '{0}'")]
    FileOpen(String),

    #[error("save state is malformed at byte {0}")]
    BadSaveState(usize),

    #[error("{0}")]
    Host(String),
}
