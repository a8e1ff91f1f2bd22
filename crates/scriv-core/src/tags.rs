//! Signatures of the built-in tags the compiler emits directly.
//!
//! The text scanner synthesizes `ch`/`r`/`label`/`return` commands, and
//! the VM pins frames to `return`. Both sides compute the signatures from
//! the same declarations here so they agree with registration.

use crate::hash::{Signature, signature_of};
use crate::params::parse_param_spec;

fn sig(name: &str, spec: Option<&str>) -> Signature {
    let params = parse_param_spec(spec).expect("builtin spec is well-formed");
    signature_of(name, &params)
}

/// `[ch value]` - emit text.
pub fn ch() -> Signature {
    sig("ch", Some("value"))
}

/// `[r]` - emit a newline.
pub fn newline() -> Signature {
    sig("r", None)
}

/// `[label value]` - record the last passed label.
pub fn label() -> Signature {
    sig("label", Some("value"))
}

/// `[return value = null]` - unwind to the pending return frame.
pub fn ret() -> Signature {
    sig("return", Some("value"))
}

/// `[goto label]`.
pub fn goto_label() -> Signature {
    sig("goto", Some("label"))
}

/// `[goto file]`.
pub fn goto_file() -> Signature {
    sig("goto", Some("file"))
}

/// `[goto file, label]`.
pub fn goto_file_label() -> Signature {
    sig("goto", Some("file, label"))
}

/// `[exit]`.
pub fn exit() -> Signature {
    sig("exit", None)
}
