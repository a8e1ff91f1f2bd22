//! Name hashing and tag signatures.
//!
//! A Signature is the identity of a tag: the crc32 of its name plus its
//! parameter names sorted by their own hashes. Two registrations with the
//! same name but different parameter-name sets get distinct signatures;
//! permuting the parameter declarations does not change the signature.

use std::fmt;

use crate::params::ParamDecl;

/// 32-bit hash of a name (variable names, parameter names, label names).
pub fn name_hash(name: &str) -> u32 {
    crc32fast::hash(name.as_bytes())
}

/// Identity of a registered tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Signature(pub u32);

impl Signature {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Compute the signature for a tag name and its declared parameters.
///
/// The canonical string is `name`, a space when any parameter exists, then
/// each parameter name followed by `:`, with parameters ordered by their
/// name hash so declaration order is irrelevant.
pub fn signature_of(name: &str, params: &[ParamDecl]) -> Signature {
    let mut text = String::with_capacity(name.len() + params.len() * 8);
    text.push_str(name);
    if !params.is_empty() {
        text.push(' ');
    }

    let mut sorted: Vec<&ParamDecl> = params.iter().collect();
    sorted.sort_by_key(|p| p.hash);
    for param in sorted {
        text.push_str(&param.name);
        text.push(':');
    }

    Signature(name_hash(&text))
}
