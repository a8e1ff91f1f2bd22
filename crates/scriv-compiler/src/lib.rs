//! Expression and tag compilers for the scriv scripting engine.
//!
//! `compile_source` turns template text into a relocatable [`Program`]:
//! literal runs and newlines become `ch`/`r` commands, bracketed tags are
//! resolved against the registry, every argument is compiled to calc
//! bytecode (with constant folding), pair/child nesting is validated and
//! labels are resolved.

mod calc;
mod compile;
mod error;
mod fold;

#[cfg(test)]
mod calc_tests;

pub use compile::{Compiled, CompileEnv, Warning, compile_source};
pub use error::CompileError;

pub use scriv_bytecode::Program;
