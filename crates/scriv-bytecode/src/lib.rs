//! Bytecode format and program container for the scriv scripting engine.
//!
//! - `opcode` - calc opcodes, variable-chain ops and value tags
//! - `calcio` - reader/writer for self-describing calc blobs
//! - `program` - the relocatable Program binary (header + tables + data)
//! - `vario` - the recursive serialized-Var format used by save states
//! - `dump` - serializable program summaries for tooling

pub mod calcio;
pub mod dump;
pub mod opcode;
pub mod program;
pub mod vario;

#[cfg(test)]
mod calcio_tests;
#[cfg(test)]
mod program_tests;
#[cfg(test)]
mod vario_tests;

pub use calcio::{CalcCursor, FormatError, RawValue};
pub use opcode::{CalcOp, ValueTag, VarOp};
pub use program::{
    Arg, Cmd, HEADER_SIZE, LABEL_UNRESOLVED, Label, Program, ProgramError, host_endian,
};
pub use vario::{read_var, write_var};
