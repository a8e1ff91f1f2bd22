//! The tag compiler: template text to a relocatable Program.
//!
//! Scans left to right. Literal runs extend a `ch` command in place,
//! newline sequences emit `r` commands (so a newline always has stable
//! command addressing for label targeting), `*name` defines a label, `;`
//! and `/* */` are comments. A bracketed tag is parsed into named and
//! positional arguments, compiled through the calc compiler, resolved
//! against the registry by best effort, padded into the tag's canonical
//! parameter order, and validated for pair/child nesting. Compilation
//! appends an implicit terminal `return null` command.

use std::path::{Path, PathBuf};

use scriv_bytecode::calcio::{self, CalcCursor, is_single_var, set_value_size, set_value_tag, write_op, write_value};
use scriv_bytecode::program::{Arg, Cmd, LABEL_UNRESOLVED, Label, Program};
use scriv_bytecode::{CalcOp, ValueTag};
use scriv_core::{
    ARG_LIMIT, CompileHook, Delimiters, Registry, Signature, TagCompile, TagKind, name_hash,
    parse_param_spec, scan, signature_of, tags,
};

use crate::calc;
use crate::error::CompileError;

/// Everything the compiler needs from its host VM.
pub struct CompileEnv<'a> {
    pub registry: &'a mut Registry,
    pub delims: Delimiters,
    /// Search directory for `include` and other relative file references.
    pub base_dir: Option<PathBuf>,
}

/// A non-fatal diagnostic.
#[derive(Clone, Debug)]
pub struct Warning {
    pub line: u32,
    pub message: String,
}

/// Result of a successful compilation.
#[derive(Debug)]
pub struct Compiled {
    pub program: Program,
    pub warnings: Vec<Warning>,
}

/// Compile template text into a Program.
pub fn compile_source(env: &mut CompileEnv, src: &str) -> Result<Compiled, CompileError> {
    let mut compiler = Compiler::new(env);
    compiler.scan_text(src)?;
    compiler.finish()
}

#[derive(Clone, Copy)]
struct PairFrame {
    cmd: usize,
    line: u32,
}

#[derive(Clone, Copy)]
struct TextRun {
    cmd: usize,
    header: usize,
}

pub(crate) struct Compiler<'e, 'a> {
    env: &'e mut CompileEnv<'a>,
    pub(crate) line: u32,
    pub(crate) delims: Delimiters,
    pub(crate) labels: Vec<Label>,
    pub(crate) cmds: Vec<Cmd>,
    pub(crate) args: Vec<Arg>,
    pub(crate) data: Vec<u8>,
    pair_stack: Vec<PairFrame>,
    text_run: Option<TextRun>,
    warnings: Vec<Warning>,
    ch_sig: Signature,
    r_sig: Signature,
    label_sig: Signature,
    ret_sig: Signature,
}

impl<'e, 'a> Compiler<'e, 'a> {
    fn new(env: &'e mut CompileEnv<'a>) -> Self {
        let delims = env.delims.clone();
        Self {
            env,
            line: 1,
            delims,
            labels: Vec::new(),
            cmds: Vec::new(),
            args: Vec::new(),
            data: Vec::new(),
            pair_stack: Vec::new(),
            text_run: None,
            warnings: Vec::new(),
            ch_sig: tags::ch(),
            r_sig: tags::newline(),
            label_sig: tags::label(),
            ret_sig: tags::ret(),
        }
    }

    fn finish(mut self) -> Result<Compiled, CompileError> {
        if let Some(frame) = self.pair_stack.last() {
            return Err(CompileError::UnterminatedPair { line: frame.line });
        }

        // Implicit terminal command: return null.
        self.new_cmd(self.ret_sig);
        self.add_arg();
        write_value(&mut self.data, ValueTag::Null, &[]);
        write_op(&mut self.data, CalcOp::End);

        Ok(Compiled {
            program: Program {
                labels: self.labels,
                cmds: self.cmds,
                args: self.args,
                data: self.data,
            },
            warnings: self.warnings,
        })
    }

    /// Main scan loop over template text (also used to splice includes).
    fn scan_text(&mut self, src: &str) -> Result<(), CompileError> {
        let mut rest = src;
        let mut escaped = false;

        while !rest.is_empty() {
            if !escaped && self.delims.is_left(rest) {
                let skip = self.delims.left().len();
                rest = self.compile_tag(&rest[skip..])?;
                continue;
            }
            if !escaped && self.delims.is_right(rest) {
                return Err(CompileError::Unexpected {
                    line: self.line,
                    what: self.delims.right().to_owned(),
                });
            }

            let ch = rest.chars().next().unwrap();
            match ch {
                '\\' if !escaped => {
                    escaped = true;
                    rest = &rest[1..];
                    continue;
                }
                ' ' if !escaped && !self.after_text() => {
                    rest = &rest[1..];
                    continue;
                }
                '\n' => {
                    escaped = false;
                    self.line += 1;
                    self.add_cmd(self.r_sig)?;
                    rest = &rest[1..];
                    continue;
                }
                '\r' => {
                    escaped = false;
                    if !rest[1..].starts_with('\n') {
                        self.line += 1;
                        self.add_cmd(self.r_sig)?;
                    }
                    rest = &rest[1..];
                    continue;
                }
                '*' if !escaped => {
                    rest = self.define_label(&rest[1..])?;
                    continue;
                }
                ';' if !escaped => {
                    if !scan::line_end(rest).is_empty() {
                        self.line += 1;
                    }
                    rest = scan::next_line(rest);
                    continue;
                }
                '/' if !escaped && rest[1..].starts_with('*') => {
                    rest = self.block_comment(&rest[2..]);
                    continue;
                }
                _ => {
                    escaped = false;
                    let len = ch.len_utf8();
                    self.append_text(&rest[..len])?;
                    rest = &rest[len..];
                }
            }
        }
        Ok(())
    }

    /// True when the most recent command emits text, so spaces belong to
    /// the run instead of being skipped.
    fn after_text(&self) -> bool {
        self.cmds
            .last()
            .is_some_and(|c| c.signature == self.ch_sig.as_u32())
    }

    fn define_label<'s>(&mut self, rest: &'s str) -> Result<&'s str, CompileError> {
        let (name, after) = scan::word_trimmed(rest);
        if name.is_empty() {
            return Err(CompileError::Unexpected {
                line: self.line,
                what: "*".to_owned(),
            });
        }
        let id = self.label_id(name);
        if self.labels[id].cmd_index != LABEL_UNRESOLVED {
            return Err(CompileError::DuplicateLabel {
                line: self.line,
                name: name.to_owned(),
            });
        }
        self.labels[id].cmd_index = self.cmds.len() as i32;
        let hash = self.labels[id].name_hash;
        self.add_cmd(self.label_sig)?;
        self.add_bytes_arg(&hash.to_ne_bytes());
        Ok(after)
    }

    fn block_comment<'s>(&mut self, rest: &'s str) -> &'s str {
        let mut rest = rest;
        loop {
            if rest.is_empty() {
                self.warnings.push(Warning {
                    line: self.line,
                    message: "unterminated comment".to_owned(),
                });
                return rest;
            }
            if let Some(r) = rest.strip_prefix("*/") {
                return r;
            }
            if rest.starts_with('\n') {
                self.line += 1;
            }
            let len = rest.chars().next().unwrap().len_utf8();
            rest = &rest[len..];
        }
    }

    /// Append one character to the open text run, or start a new `ch`
    /// command.
    fn append_text(&mut self, ch: &str) -> Result<(), CompileError> {
        let extend = self
            .text_run
            .is_some_and(|run| run.cmd + 1 == self.cmds.len());
        if extend {
            let run = self.text_run.unwrap();
            // Drop the trailing NUL and End op, extend, close again.
            self.data.truncate(self.data.len() - 5);
            self.data.extend_from_slice(ch.as_bytes());
            self.data.push(0);
            write_op(&mut self.data, CalcOp::End);
            let size = calcio::value_size(&self.data, run.header) + ch.len() as u32;
            set_value_size(&mut self.data, run.header, size);
        } else {
            let idx = self.add_cmd(self.ch_sig)?;
            self.add_arg();
            let mut payload = ch.as_bytes().to_vec();
            payload.push(0);
            let header = write_value(&mut self.data, ValueTag::LitStr, &payload);
            write_op(&mut self.data, CalcOp::End);
            self.text_run = Some(TextRun { cmd: idx, header });
        }
        Ok(())
    }

    /// Append a command record; pair/child validation is separate.
    fn new_cmd(&mut self, sig: Signature) -> usize {
        let idx = self.cmds.len();
        self.cmds.push(Cmd {
            signature: sig.as_u32(),
            pair_index: idx as i32,
            parent_index: idx as i32,
            arg_offset: self.args.len() as u32,
        });
        self.text_run = None;
        idx
    }

    /// Append a command and validate its pair/child position.
    fn add_cmd(&mut self, sig: Signature) -> Result<usize, CompileError> {
        let idx = self.new_cmd(sig);
        let name = self
            .env
            .registry
            .get(sig)
            .map(|t| t.name.to_string())
            .unwrap_or_default();
        self.check_pair(idx, &name)?;
        self.check_child(idx, &name)?;
        Ok(idx)
    }

    fn add_arg(&mut self) {
        self.args.push(Arg {
            data_offset: self.data.len() as u32,
        });
    }

    fn add_string_arg(&mut self, value: &str) {
        self.add_arg();
        let mut payload = value.as_bytes().to_vec();
        payload.push(0);
        write_value(&mut self.data, ValueTag::LitStr, &payload);
        write_op(&mut self.data, CalcOp::End);
    }

    /// Length-prefixed raw bytes argument.
    fn add_bytes_arg(&mut self, bytes: &[u8]) {
        self.add_arg();
        let mut payload = Vec::with_capacity(4 + bytes.len());
        payload.extend_from_slice(&(bytes.len() as u32).to_ne_bytes());
        payload.extend_from_slice(bytes);
        write_value(&mut self.data, ValueTag::LitBytes, &payload);
        write_op(&mut self.data, CalcOp::End);
    }

    /// Remove the last command together with its argument data.
    fn erase_last_cmd(&mut self) {
        let Some(cmd) = self.cmds.pop() else {
            return;
        };
        let base = cmd.arg_offset as usize;
        if let Some(min) = self.args[base..].iter().map(|a| a.data_offset).min() {
            self.data.truncate(min as usize);
        }
        self.args.truncate(base);
        self.text_run = None;
    }

    /// Compile one bracketed tag; `rest` starts right after the left
    /// delimiter. Returns the text following the tag (and any literal
    /// passthrough it consumed).
    fn compile_tag<'s>(&mut self, rest: &'s str) -> Result<&'s str, CompileError> {
        let (name, after) = scan::word_trimmed(rest);
        let tag_name = name.to_owned();
        let mut rest = after;

        let cmd_idx = self.new_cmd(Signature(0));
        let arg_base = self.args.len();
        let mut slot_hashes: Vec<u32> = Vec::new();
        let mut named: Vec<u32> = Vec::new();
        let mut unnamed = 0usize;

        loop {
            rest = scan::trim_space(rest);
            if let Some(r) = rest.strip_prefix(',') {
                rest = scan::trim_space(r);
            }
            if self.delims.is_right(rest) {
                rest = &rest[self.delims.right().len()..];
                break;
            }
            if rest.is_empty() || rest.starts_with(['\n', '\r']) {
                return Err(CompileError::Unexpected {
                    line: self.line,
                    what: tag_name.clone(),
                });
            }
            if slot_hashes.len() >= ARG_LIMIT {
                return Err(CompileError::TooManyArguments {
                    line: self.line,
                    tag: tag_name.clone(),
                });
            }

            // Optional `name:` prefix.
            let mut slot_hash = 0u32;
            let (w, word_rest) = scan::word(rest);
            if !w.is_empty() {
                let t = scan::trim_space(word_rest);
                if let Some(r) = t.strip_prefix(':') {
                    let hash = name_hash(w);
                    if slot_hashes.contains(&hash) {
                        return Err(CompileError::DuplicateArgument {
                            line: self.line,
                            arg: w.to_owned(),
                            tag: tag_name.clone(),
                        });
                    }
                    slot_hash = hash;
                    named.push(hash);
                    rest = scan::trim_space(r);
                }
            }

            self.add_arg();
            let t = scan::trim_space(rest);
            if slot_hash != 0 && (t.starts_with(',') || self.delims.is_right(t)) {
                // Bare `name:` is a presence flag.
                calc::compile_presence(self);
                rest = t;
            } else {
                if slot_hash == 0 {
                    unnamed += 1;
                }
                rest = calc::compile_expr(self, rest)?;
            }
            slot_hashes.push(slot_hash);
        }

        // Best-effort tag resolution; first registered match wins.
        let Some(tag) = self.env.registry.resolve(&tag_name, &named, unnamed) else {
            return Err(CompileError::UndefinedTag {
                line: self.line,
                name: tag_name,
            });
        };
        let tag = tag.clone();
        self.cmds[cmd_idx].signature = tag.signature.as_u32();

        // Reorder supplied arguments into canonical parameter order and
        // compile defaults for omitted parameters.
        let supplied: Vec<Arg> = self.args[arg_base..].to_vec();
        let positions: Vec<usize> = slot_hashes
            .iter()
            .enumerate()
            .filter(|(_, h)| **h == 0)
            .map(|(i, _)| i)
            .collect();
        self.args.truncate(arg_base);

        let mut final_args = Vec::with_capacity(tag.params.len());
        for (i, param) in tag.params.iter().enumerate() {
            if i < unnamed {
                final_args.push(supplied[positions[i]]);
            } else if let Some(j) = slot_hashes.iter().position(|h| *h == param.hash) {
                final_args.push(supplied[j]);
            } else {
                let default = param
                    .default
                    .clone()
                    .expect("resolution checked missing parameters for defaults");
                let arg = Arg {
                    data_offset: self.data.len() as u32,
                };
                calc::compile_expr(self, &default)?;
                final_args.push(arg);
            }
        }
        self.args.extend(final_args);

        // Reference-required parameters must be bare variable references.
        for (i, param) in tag.params.iter().enumerate() {
            if !param.by_ref {
                continue;
            }
            let off = self.args[arg_base + i].data_offset as usize;
            let single = is_single_var(&self.data[off..]).map_err(|source| {
                CompileError::Format {
                    line: self.line,
                    source,
                }
            })?;
            if !single {
                return Err(CompileError::RefArgNotVariable {
                    line: self.line,
                    param: param.name.to_string(),
                    tag: tag_name,
                });
            }
            set_value_tag(&mut self.data, off + 4, ValueTag::RefVar);
        }

        self.check_pair(cmd_idx, &tag_name)?;
        self.check_child(cmd_idx, &tag_name)?;

        match tag.compile_hook {
            None => {}
            Some(CompileHook::Macro) => self.hook_macro(cmd_idx, tag.signature, &tag_name)?,
            Some(CompileHook::Include) => self.hook_include()?,
            Some(CompileHook::Literal) => rest = self.hook_literal(rest)?,
            Some(CompileHook::Native(hook)) => {
                hook(self).map_err(|message| CompileError::Hook {
                    line: self.line,
                    message,
                })?;
            }
        }

        Ok(rest)
    }

    /// Pair validation: closers link into the opener's chain, openers
    /// push onto the pair stack.
    fn check_pair(&mut self, cmd_idx: usize, name: &str) -> Result<(), CompileError> {
        let sig = Signature(self.cmds[cmd_idx].signature);
        let (opens, closer_refs) = self
            .env
            .registry
            .get(sig)
            .map_or((false, 0), |tag| (tag.opens_pair(), tag.closer_refs));

        let mut closed = false;
        if let Some(top) = self.pair_stack.last().copied() {
            let opener_sig = Signature(self.cmds[top.cmd].signature);
            let is_closer = self
                .env
                .registry
                .get(opener_sig)
                .is_some_and(|opener| opener.pairs.contains(&sig));
            if is_closer {
                self.cmds[cmd_idx].pair_index = self.cmds[top.cmd].pair_index;
                self.cmds[top.cmd].pair_index = cmd_idx as i32;
                self.pair_stack.pop();
                closed = true;
            }
        }
        if !closed && closer_refs > 0 {
            return Err(CompileError::PairOpenerRequired {
                line: self.line,
                name: name.to_owned(),
            });
        }

        if opens {
            self.pair_stack.push(PairFrame {
                cmd: cmd_idx,
                line: self.line,
            });
        }
        Ok(())
    }

    /// Child validation: tags requiring a parent scan the pair stack
    /// outward for an enclosing tag that declares them.
    fn check_child(&mut self, cmd_idx: usize, name: &str) -> Result<(), CompileError> {
        let sig = Signature(self.cmds[cmd_idx].signature);
        let requires = self
            .env
            .registry
            .get(sig)
            .is_some_and(|tag| tag.requires_parent);
        if !requires {
            return Ok(());
        }
        for frame in self.pair_stack.iter().rev() {
            let parent_sig = Signature(self.cmds[frame.cmd].signature);
            let declares = self
                .env
                .registry
                .get(parent_sig)
                .is_some_and(|parent| parent.children.contains(&sig));
            if declares {
                self.cmds[cmd_idx].parent_index = frame.cmd as i32;
                return Ok(());
            }
        }
        Err(CompileError::NotAvailableHere {
            line: self.line,
            name: name.to_owned(),
        })
    }

    /// `[macro name, params, vars]`: register the callable tag and
    /// rewrite the declaration command into its runtime form
    /// (name, params spec, local-variable hash list).
    fn hook_macro(
        &mut self,
        cmd_idx: usize,
        decl_sig: Signature,
        tag_name: &str,
    ) -> Result<(), CompileError> {
        let name = self.literal_string_arg(cmd_idx, 0, tag_name)?;
        let params_spec = self.literal_string_arg(cmd_idx, 1, tag_name)?;
        let vars_spec = self.literal_string_arg(cmd_idx, 2, tag_name)?;

        let spec_err = |line, source| CompileError::Spec { line, source };
        let params =
            parse_param_spec(Some(&params_spec)).map_err(|e| spec_err(self.line, e))?;
        let call_sig = signature_of(&name, &params);
        if self.env.registry.get(call_sig).is_none() {
            let sig = self.env.registry.declare_params(&name, params.clone());
            self.env.registry.get_mut(sig).unwrap().kind = TagKind::Macro;
        }

        self.erase_last_cmd();
        self.new_cmd(decl_sig);
        self.add_string_arg(&name);
        self.add_string_arg(&params_spec);

        // Local variables of an invocation: declared parameters plus the
        // extra `vars` list, stored as a hash blob.
        let mut locals = params;
        locals.extend(parse_param_spec(Some(&vars_spec)).map_err(|e| spec_err(self.line, e))?);
        self.add_arg();
        let mut payload = Vec::with_capacity(8 + locals.len() * 4);
        payload.extend_from_slice(&((4 + locals.len() * 4) as u32).to_ne_bytes());
        payload.extend_from_slice(&(locals.len() as i32).to_ne_bytes());
        for param in &locals {
            payload.extend_from_slice(&param.hash.to_ne_bytes());
        }
        write_value(&mut self.data, ValueTag::LitBytes, &payload);
        write_op(&mut self.data, CalcOp::End);
        Ok(())
    }

    /// `[include file]`: splice the file's source into this compilation.
    fn hook_include(&mut self) -> Result<(), CompileError> {
        let cmd_idx = self.cmds.len() - 1;
        let file = self.literal_string_arg(cmd_idx, 0, "include")?;
        let path = self.resolve_path(&file);
        let text = std::fs::read_to_string(&path).map_err(|_| CompileError::FileOpen {
            line: self.line,
            path: path.display().to_string(),
        })?;
        self.erase_last_cmd();
        self.scan_text(&text)
    }

    /// `[literal] ... [endliteral]`: raw passthrough, no tag or comment
    /// processing; newlines still become `r` commands.
    fn hook_literal<'s>(&mut self, rest: &'s str) -> Result<&'s str, CompileError> {
        let mut rest = rest;
        if let Some(r) = rest.strip_prefix('\r') {
            rest = r;
        }
        if let Some(r) = rest.strip_prefix('\n') {
            rest = r;
        }

        let end_marker = format!("{}endliteral", self.delims.left());
        while !rest.is_empty() && !rest.starts_with(&end_marker) {
            let ch = rest.chars().next().unwrap();
            match ch {
                '\n' => {
                    self.line += 1;
                    self.add_cmd(self.r_sig)?;
                    rest = &rest[1..];
                }
                '\r' => {
                    if !rest[1..].starts_with('\n') {
                        self.line += 1;
                        self.add_cmd(self.r_sig)?;
                    }
                    rest = &rest[1..];
                }
                _ => {
                    let len = ch.len_utf8();
                    self.append_text(&rest[..len])?;
                    rest = &rest[len..];
                }
            }
        }

        // A newline directly before [endliteral] is dropped.
        if self
            .cmds
            .last()
            .is_some_and(|c| c.signature == self.r_sig.as_u32())
        {
            self.erase_last_cmd();
        }
        Ok(rest)
    }

    /// Read an argument that must have folded to a literal.
    fn literal_string_arg(
        &self,
        cmd_idx: usize,
        index: usize,
        tag_name: &str,
    ) -> Result<String, CompileError> {
        let not_constant = || CompileError::ArgNotConstant {
            line: self.line,
            tag: tag_name.to_owned(),
        };
        let fmt = |source| CompileError::Format {
            line: self.line,
            source,
        };

        let base = self.cmds[cmd_idx].arg_offset as usize;
        let off = self.args[base + index].data_offset as usize;
        let mut cursor = CalcCursor::new(&self.data[off..]);
        if cursor.next_op().map_err(fmt)? != CalcOp::Push {
            return Err(not_constant());
        }
        let value = cursor.read_value().map_err(fmt)?;
        if cursor.next_op().map_err(fmt)? != CalcOp::End {
            return Err(not_constant());
        }
        match value.tag {
            ValueTag::LitStr => Ok(value.text().map_err(fmt)?.to_owned()),
            ValueTag::Int => Ok(i32::from_ne_bytes(
                value.payload.try_into().map_err(|_| not_constant())?,
            )
            .to_string()),
            ValueTag::Null => Ok(String::new()),
            _ => Err(not_constant()),
        }
    }

    fn resolve_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            return path.to_owned();
        }
        match &self.env.base_dir {
            Some(dir) => dir.join(path),
            None => path.to_owned(),
        }
    }
}

impl TagCompile for Compiler<'_, '_> {
    fn line(&self) -> u32 {
        self.line
    }

    fn arg_string(&self, index: usize) -> Result<String, String> {
        let Some(cmd_idx) = self.cmds.len().checked_sub(1) else {
            return Err("no command is being compiled".to_owned());
        };
        let base = self.cmds[cmd_idx].arg_offset as usize;
        if base + index >= self.args.len() {
            return Err(format!("argument {index} is not compiled"));
        }
        let sig = Signature(self.cmds[cmd_idx].signature);
        let name = self
            .env
            .registry
            .get(sig)
            .map(|t| t.name.to_string())
            .unwrap_or_default();
        self.literal_string_arg(cmd_idx, index, &name)
            .map_err(|e| e.to_string())
    }

    fn erase_cmd(&mut self) {
        self.erase_last_cmd();
    }

    fn start_cmd(&mut self, sig: Signature) {
        self.new_cmd(sig);
    }

    fn push_string_arg(&mut self, value: &str) {
        self.add_string_arg(value);
    }

    fn push_bytes_arg(&mut self, bytes: &[u8]) {
        self.add_bytes_arg(bytes);
    }

    fn splice(&mut self, src: &str) -> Result<(), String> {
        self.scan_text(src).map_err(|e| e.to_string())
    }
}
