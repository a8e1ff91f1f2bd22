//! The tag declaration registry.
//!
//! Holds the compile-facing identity of every registered tag: name,
//! parameter table, pair/child relationships and compile-time behavior.
//! Runtime behavior (execute/storage handlers) lives with the VM, keyed by
//! the same signatures. Iteration order is registration order, which the
//! best-effort resolver depends on: when several tags could satisfy a
//! partial named-argument set, the first registered wins.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::hash::{Signature, signature_of};
use crate::params::{ParamDecl, SpecError, parse_param_spec};

/// Compiler operations available to a compile-time hook: read the
/// assembled command's literal arguments, rewrite the command, or splice
/// more template text into the compilation.
pub trait TagCompile {
    /// Current source line.
    fn line(&self) -> u32;
    /// Literal string value of an argument compiled for the current
    /// command; errors when the argument did not fold to a literal.
    fn arg_string(&self, index: usize) -> Result<String, String>;
    /// Remove the command being assembled together with its arguments.
    fn erase_cmd(&mut self);
    /// Start a fresh command with the given signature.
    fn start_cmd(&mut self, sig: Signature);
    /// Append a literal string argument to the current command.
    fn push_string_arg(&mut self, value: &str);
    /// Append a length-prefixed raw-bytes argument.
    fn push_bytes_arg(&mut self, bytes: &[u8]);
    /// Compile template text in place of the current tag.
    fn splice(&mut self, src: &str) -> Result<(), String>;
}

/// Host-registered compile-time handler.
pub type CompileFn = Rc<dyn Fn(&mut dyn TagCompile) -> Result<(), String>>;

/// Compile-time behavior invoked when a tag's command is fully assembled.
#[derive(Clone)]
pub enum CompileHook {
    /// `[macro ...]`: rewrite the declaration, register the callable tag.
    Macro,
    /// `[include ...]`: splice another file into the compilation.
    Include,
    /// `[literal]`: raw text passthrough until `[endliteral]`.
    Literal,
    /// Host handler working through the [`TagCompile`] surface.
    Native(CompileFn),
}

impl fmt::Debug for CompileHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileHook::Macro => f.write_str("Macro"),
            CompileHook::Include => f.write_str("Include"),
            CompileHook::Literal => f.write_str("Literal"),
            CompileHook::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// How a tag came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagKind {
    Normal,
    /// Synthesized by a `[macro]` declaration; dropped on program reload.
    Macro,
}

/// Declaration of a registered tag.
#[derive(Clone, Debug)]
pub struct TagDecl {
    pub name: Rc<str>,
    pub signature: Signature,
    pub params: Vec<ParamDecl>,
    /// Tags that may close a block this tag opens.
    pub pairs: Vec<Signature>,
    /// Tags only legal nested directly inside this tag.
    pub children: Vec<Signature>,
    /// Times this tag appears in some opener's pair set; nonzero means it
    /// must be preceded by a matching opener.
    pub closer_refs: u32,
    /// Must appear inside a tag that declares it as a child.
    pub requires_parent: bool,
    pub compile_hook: Option<CompileHook>,
    pub kind: TagKind,
}

impl TagDecl {
    fn new(name: &str, params: Vec<ParamDecl>) -> Self {
        let signature = signature_of(name, &params);
        Self {
            name: Rc::from(name),
            signature,
            params,
            pairs: Vec::new(),
            children: Vec::new(),
            closer_refs: 0,
            requires_parent: false,
            compile_hook: None,
            kind: TagKind::Normal,
        }
    }

    /// Placeholder for a signature referenced by a loaded program but not
    /// registered by the host. Executes as a no-op.
    fn placeholder(signature: Signature) -> Self {
        Self {
            name: Rc::from(""),
            signature,
            params: Vec::new(),
            pairs: Vec::new(),
            children: Vec::new(),
            closer_refs: 0,
            requires_parent: false,
            compile_hook: None,
            kind: TagKind::Normal,
        }
    }

    pub fn param_index(&self, hash: u32) -> Option<usize> {
        self.params.iter().position(|p| p.hash == hash)
    }

    /// True when the block this tag opens needs a closing pair tag.
    pub fn opens_pair(&self) -> bool {
        !self.pairs.is_empty()
    }
}

/// Registry of tag declarations in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    tags: IndexMap<u32, TagDecl>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag, parsing its parameter spec. Re-registering an
    /// existing signature keeps the original declaration.
    pub fn declare(&mut self, name: &str, spec: Option<&str>) -> Result<Signature, SpecError> {
        let params = parse_param_spec(spec)?;
        Ok(self.declare_params(name, params))
    }

    pub fn declare_params(&mut self, name: &str, params: Vec<ParamDecl>) -> Signature {
        let decl = TagDecl::new(name, params);
        let signature = decl.signature;
        self.tags.entry(signature.as_u32()).or_insert(decl);
        signature
    }

    /// Ensure a signature exists, creating an inert placeholder if needed.
    pub fn ensure(&mut self, signature: Signature) -> &mut TagDecl {
        self.tags
            .entry(signature.as_u32())
            .or_insert_with(|| TagDecl::placeholder(signature))
    }

    pub fn get(&self, signature: Signature) -> Option<&TagDecl> {
        self.tags.get(&signature.as_u32())
    }

    pub fn get_mut(&mut self, signature: Signature) -> Option<&mut TagDecl> {
        self.tags.get_mut(&signature.as_u32())
    }

    /// Exact lookup by name and parameter spec.
    pub fn lookup(&self, name: &str, spec: Option<&str>) -> Option<&TagDecl> {
        let params = parse_param_spec(spec).ok()?;
        self.get(signature_of(name, &params))
    }

    /// Declare `closer` as a valid closing tag for `opener`'s block and
    /// bump the closer's must-follow-an-opener reference count.
    pub fn set_pair(&mut self, opener: Signature, closer: Signature) {
        if let Some(decl) = self.get_mut(closer) {
            decl.closer_refs += 1;
        }
        if let Some(decl) = self.get_mut(opener) {
            decl.pairs.push(closer);
        }
    }

    /// Declare `child` as legal only directly inside `parent`.
    pub fn set_child(&mut self, parent: Signature, child: Signature) {
        if let Some(decl) = self.get_mut(child) {
            decl.requires_parent = true;
        }
        if let Some(decl) = self.get_mut(parent) {
            decl.children.push(child);
        }
    }

    /// Best-effort resolution used at compile time.
    ///
    /// Accepts a tag when its name matches, the supplied arguments fit its
    /// parameter count, every supplied named argument names a declared
    /// parameter outside the leading positional slots, and every remaining
    /// declared parameter has a default. First registered match wins.
    pub fn resolve(&self, name: &str, named: &[u32], unnamed: usize) -> Option<&TagDecl> {
        self.tags.values().find(|tag| {
            if &*tag.name != name {
                return false;
            }
            let param_count = tag.params.len();
            if named.len() + unnamed > param_count {
                return false;
            }
            let mut hits = 0;
            for param in &tag.params[unnamed..] {
                if named.contains(&param.hash) {
                    hits += 1;
                } else if param.default.is_none() {
                    return false;
                }
            }
            hits == named.len()
        })
    }

    /// Drop every macro-synthesized tag; returns the removed signatures.
    pub fn remove_macros(&mut self) -> Vec<Signature> {
        let removed: Vec<Signature> = self
            .tags
            .values()
            .filter(|t| t.kind == TagKind::Macro)
            .map(|t| t.signature)
            .collect();
        self.tags.retain(|_, t| t.kind != TagKind::Macro);
        removed
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagDecl> {
        self.tags.values()
    }
}
