//! Core data structures for the scriv scripting engine.
//!
//! Shared by the compiler and the VM:
//! - `value` - the dynamic value model (Variant, Var, Array)
//! - `arith` - binary/unary operator semantics over variants
//! - `hash` - name hashing and tag signatures
//! - `params` - tag parameter-spec parsing
//! - `registry` - the tag declaration registry
//! - `scan` - low-level source text helpers

pub mod arith;
pub mod delim;
pub mod hash;
pub mod params;
pub mod registry;
pub mod scan;
pub mod tags;
pub mod value;

#[cfg(test)]
mod hash_tests;
#[cfg(test)]
mod registry_tests;
#[cfg(test)]
mod value_tests;

pub use arith::{BinOp, UnOp};
pub use delim::{Delimiters, MAX_DELIMITER_LEN};
pub use hash::{Signature, name_hash, signature_of};
pub use params::{ParamDecl, SpecError, parse_param_spec};
pub use registry::{CompileFn, CompileHook, Registry, TagCompile, TagDecl, TagKind};
pub use value::{Array, Var, Variant};

/// Maximum number of argument registers per command.
pub const ARG_LIMIT: usize = 32;
