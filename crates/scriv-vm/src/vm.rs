//! The VM context: tag registry, runtime handlers, loaded program and the
//! active execution state.
//!
//! Driving a single step: fetch the command at the instruction pointer,
//! detect the first visit to its pair chain, evaluate its arguments into
//! the state's registers, push a workarea frame for stateful tags, invoke
//! the execute handler and interpret its control-flow result. `run` loops
//! until a tag stops or exits; fatal errors unwind immediately but leave
//! the VM usable.

use std::collections::HashMap;
use std::io::Write;
use std::mem;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use scriv_bytecode::program::Program;
use scriv_compiler::{CompileEnv, Compiled, Warning, compile_source};
use scriv_core::params::SpecError;
use scriv_core::registry::TagKind;
use scriv_core::{CompileHook, Delimiters, Registry, Signature, TagCompile, Var, name_hash, tags};

use crate::builtins;
use crate::engine;
use crate::error::RuntimeError;
use crate::handlers::{ExecKind, StorageKind, TagHandlers};
use crate::program::LoadedProgram;
use crate::state::{Frame, MacroFrame, Register, SavedVar, State, Workarea};

/// Control-flow result of a tag's execute handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// The handler set the next command itself.
    Stay,
    /// Pause; the host may resume by driving the loop again.
    Stop,
    /// Halt execution.
    Exit,
    /// Advance to the next command in program order.
    Next,
    /// Jump to this command's paired successor in the chain.
    NextPair,
    /// Jump past the end of the whole pair chain.
    BreakPair,
    /// Jump back to the chain's opening command.
    FirstPair,
    /// Jump to the chain's last command.
    LastPair,
}

pub type TagResult = Result<Flow, RuntimeError>;

/// Why the run loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Stopped,
    Exited,
}

/// Signatures the VM itself needs at hand.
pub(crate) struct WellKnown {
    pub ch: Signature,
    pub newline: Signature,
    pub ret: Signature,
}

pub(crate) struct StreamSaved {
    pub ch: Option<TagHandlers>,
    pub newline: Option<TagHandlers>,
}

pub struct Vm {
    pub(crate) registry: Registry,
    pub(crate) handlers: HashMap<u32, TagHandlers>,
    /// Declaration command of each macro signature, set when the
    /// declaration executes.
    pub(crate) macro_bodies: HashMap<u32, usize>,
    pub(crate) prog: Option<Rc<LoadedProgram>>,
    pub(crate) state: State,
    pub(crate) globals: Var,
    pub(crate) delims: Delimiters,
    pub(crate) base_dir: Option<PathBuf>,
    pub(crate) load_file: String,
    pub(crate) output: Box<dyn Write>,
    pub(crate) report: Option<Rc<dyn Fn(&str)>>,
    /// Handler entries shadowed by active stream redirections, LIFO.
    pub(crate) stream_saved: Vec<StreamSaved>,
    pub(crate) sigs: WellKnown,
}

impl Vm {
    pub fn new() -> Self {
        let sigs = WellKnown {
            ch: tags::ch(),
            newline: tags::newline(),
            ret: tags::ret(),
        };
        let mut vm = Self {
            registry: Registry::new(),
            handlers: HashMap::new(),
            macro_bodies: HashMap::new(),
            prog: None,
            state: State::new(),
            globals: Var::new(),
            delims: Delimiters::default(),
            base_dir: None,
            load_file: String::new(),
            output: Box::new(std::io::stdout()),
            report: None,
            stream_saved: Vec::new(),
            sigs,
        };
        builtins::register_builtins(&mut vm);
        vm
    }

    // --- configuration -------------------------------------------------

    pub fn set_delimiters(&mut self, left: &str, right: &str) -> Result<(), SpecError> {
        self.delims = Delimiters::new(left, right)?;
        Ok(())
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delims
    }

    /// Search directory for script and data files.
    pub fn set_base_dir(&mut self, dir: impl Into<PathBuf>) {
        self.base_dir = Some(dir.into());
    }

    /// Sink for `ch`/`r` output.
    pub fn set_output(&mut self, out: impl Write + 'static) {
        self.output = Box::new(out);
    }

    /// Hook receiving non-fatal runtime reports and compile warnings.
    pub fn set_report(&mut self, hook: impl Fn(&str) + 'static) {
        self.report = Some(Rc::new(hook));
    }

    pub(crate) fn report_msg(&self, msg: &str) {
        if let Some(hook) = &self.report {
            hook(msg);
        }
    }

    // --- registration --------------------------------------------------

    /// Register a native tag. Re-registering an existing signature
    /// replaces its execute handler but keeps the declared parameters.
    pub fn register(
        &mut self,
        name: &str,
        spec: Option<&str>,
        handler: impl Fn(&mut Vm) -> TagResult + 'static,
    ) -> Result<Signature, SpecError> {
        let sig = self.registry.declare(name, spec)?;
        let entry = self
            .handlers
            .entry(sig.as_u32())
            .or_insert_with(|| TagHandlers::exec_only(ExecKind::Default));
        entry.exec = ExecKind::Native(Rc::new(handler));
        Ok(sig)
    }

    pub fn set_pair(&mut self, opener: Signature, closer: Signature) {
        self.registry.set_pair(opener, closer);
    }

    pub fn set_child(&mut self, parent: Signature, child: Signature) {
        self.registry.set_child(parent, child);
    }

    /// Attach a compile-time handler, invoked once each of the tag's
    /// commands is fully assembled.
    pub fn set_compile_handler(
        &mut self,
        sig: Signature,
        hook: impl Fn(&mut dyn TagCompile) -> Result<(), String> + 'static,
    ) {
        if let Some(decl) = self.registry.get_mut(sig) {
            decl.compile_hook = Some(CompileHook::Native(Rc::new(hook)));
        }
    }

    pub fn set_needs_workarea(&mut self, sig: Signature, value: bool) {
        self.handlers
            .entry(sig.as_u32())
            .or_insert_with(|| TagHandlers::exec_only(ExecKind::Default))
            .needs_workarea = value;
    }

    /// Attach storage handlers; tags with storage get a workarea frame.
    pub fn set_storage(&mut self, sig: Signature, storage: StorageKind) {
        let entry = self
            .handlers
            .entry(sig.as_u32())
            .or_insert_with(|| TagHandlers::exec_only(ExecKind::Default));
        entry.storage = Some(storage);
        entry.needs_workarea = true;
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn lookup(&self, name: &str, spec: Option<&str>) -> Option<Signature> {
        self.registry.lookup(name, spec).map(|t| t.signature)
    }

    // --- program loading -----------------------------------------------

    /// Compile without loading (for tooling and ahead-of-time builds).
    pub fn compile_only(&mut self, src: &str) -> Result<Compiled, RuntimeError> {
        let mut env = CompileEnv {
            registry: &mut self.registry,
            delims: self.delims.clone(),
            base_dir: self.base_dir.clone(),
        };
        Ok(compile_source(&mut env, src)?)
    }

    /// Compile and load template text.
    pub fn load_source(&mut self, src: &str) -> Result<Vec<Warning>, RuntimeError> {
        let compiled = self.compile_only(src)?;
        self.install_program(&compiled.program)?;
        Ok(compiled.warnings)
    }

    /// Compile and load a script file, like `[goto file: ...]`.
    pub fn load_source_file(&mut self, file: &str) -> Result<(), RuntimeError> {
        self.goto_file(file, None)
    }

    /// Load an already compiled program blob. Endianness mismatch is a
    /// load-time fatal error.
    pub fn load_program_blob(&mut self, blob: &[u8]) -> Result<(), RuntimeError> {
        let program = Program::decode(blob)?;
        self.install_program(&program)
    }

    pub fn load_program(&mut self, program: &Program) -> Result<(), RuntimeError> {
        self.install_program(program)
    }

    /// Replace the loaded program, dropping macro tags from the previous
    /// one and creating placeholder declarations for unknown signatures.
    pub(crate) fn install_program(&mut self, program: &Program) -> Result<(), RuntimeError> {
        for sig in self.registry.remove_macros() {
            self.handlers.remove(&sig.as_u32());
            self.macro_bodies.remove(&sig.as_u32());
        }
        let linked = LoadedProgram::link(program)?;
        for cmd in &linked.cmds {
            self.registry.ensure(cmd.sig);
        }
        self.prog = Some(Rc::new(linked));
        self.load_file.clear();
        self.state.cur = None;
        self.state.prev_pair = None;
        self.state.next = 0;
        Ok(())
    }

    /// Compile and switch to another file, optionally jumping to an entry
    /// label resolved in the new program.
    pub(crate) fn goto_file(
        &mut self,
        file: &str,
        entry: Option<u32>,
    ) -> Result<(), RuntimeError> {
        let path = self.resolve_path(file);
        let src = std::fs::read_to_string(&path)
            .map_err(|_| RuntimeError::FileOpen(path.display().to_string()))?;
        let compiled = self.compile_only(&src)?;
        for warning in &compiled.warnings {
            self.report_msg(&format!(
                "warning: line {}: {}",
                warning.line, warning.message
            ));
        }
        self.install_program(&compiled.program)?;
        self.load_file = file.to_owned();
        if let Some(hash) = entry {
            let target = self
                .prog
                .as_ref()
                .unwrap()
                .label_target(hash)
                .ok_or(RuntimeError::UnknownLabel(hash))?;
            self.state.next = target;
        }
        Ok(())
    }

    pub(crate) fn resolve_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            return path.to_owned();
        }
        match &self.base_dir {
            Some(dir) => dir.join(path),
            None => path.to_owned(),
        }
    }

    pub fn loaded_file(&self) -> &str {
        &self.load_file
    }

    pub(crate) fn program(&self) -> Option<&Rc<LoadedProgram>> {
        self.prog.as_ref()
    }

    pub(crate) fn globals(&self) -> &Var {
        &self.globals
    }

    /// The global variable space (an array once anything is defined).
    pub fn globals_var(&self) -> Var {
        self.globals.clone()
    }

    // --- execution -----------------------------------------------------

    /// Drive until a tag stops or exits. A fatal error releases every
    /// outstanding workarea frame before it surfaces; the VM stays
    /// usable.
    pub fn run(&mut self) -> Result<Outcome, RuntimeError> {
        loop {
            match self.step() {
                Ok(Flow::Stop) => return Ok(Outcome::Stopped),
                Ok(Flow::Exit) => return Ok(Outcome::Exited),
                Ok(other) => self.apply_flow(other)?,
                Err(err) => {
                    let _ = self.release_all();
                    return Err(err);
                }
            }
        }
    }

    /// Execute the command at the instruction pointer. The caller (or
    /// [`Vm::run`]) applies the returned flow.
    pub fn step(&mut self) -> TagResult {
        let prog = self.prog.clone().ok_or(RuntimeError::NoProgram)?;
        let idx = self.state.next;
        let Some(cmd) = prog.cmds.get(idx).copied() else {
            return Err(RuntimeError::BadJump(idx as i64));
        };
        self.state.cur = Some(idx);
        let is_first = self.state.prev_pair != Some(cmd.pair);
        self.state.is_first = is_first;

        self.set_arguments_for(&prog, idx)?;

        let entry = self.handlers.get(&cmd.sig.as_u32()).cloned();
        if is_first && entry.as_ref().is_some_and(|e| e.needs_workarea) {
            self.state.frames.push(Frame {
                sig: cmd.sig,
                data: Workarea::Empty,
            });
        }

        let result = self.dispatch_entry(entry, cmd.sig);

        // Leaving a pair chain releases the opener's workarea frame.
        if matches!(result, Ok(Flow::BreakPair)) {
            let opener_sig = prog.cmds[prog.pairs[cmd.pair as usize].first].sig;
            if self.needs_workarea(opener_sig) {
                self.release_to(opener_sig)?;
            }
        }

        self.state.prev_pair = Some(self.state.pair_alias.take().unwrap_or(cmd.pair));
        result
    }

    fn apply_flow(&mut self, flow: Flow) -> Result<(), RuntimeError> {
        let prog = self.prog.clone().ok_or(RuntimeError::NoProgram)?;
        let cur = self.state.cur.ok_or(RuntimeError::NoProgram)?;
        let pair = prog.cmds.get(cur).map(|c| c.pair as usize);
        match flow {
            Flow::Stay => {}
            Flow::Next => self.state.next += 1,
            Flow::NextPair => {
                self.state.next = prog.cmds[cur].next_pair;
            }
            Flow::BreakPair => {
                self.state.next = prog.pairs[pair.unwrap()].last + 1;
            }
            Flow::FirstPair => {
                self.state.next = prog.pairs[pair.unwrap()].first;
            }
            Flow::LastPair => {
                self.state.next = prog.pairs[pair.unwrap()].last;
            }
            Flow::Stop | Flow::Exit => unreachable!("terminal flows handled by run"),
        }
        Ok(())
    }

    fn dispatch_entry(&mut self, entry: Option<TagHandlers>, sig: Signature) -> TagResult {
        match entry.map(|e| e.exec) {
            Some(ExecKind::Builtin(builtin)) => builtins::exec_builtin(self, builtin),
            Some(ExecKind::Native(handler)) => handler(self),
            Some(ExecKind::Default) => Ok(Flow::Next),
            None => {
                // Compile-time registered macros have no handler entry
                // until their declaration executes.
                if self.registry.get(sig).is_some_and(|t| t.kind == TagKind::Macro) {
                    builtins::exec_call_macro(self, sig)
                } else {
                    Ok(Flow::Next)
                }
            }
        }
    }

    pub(crate) fn dispatch_sig(&mut self, sig: Signature) -> TagResult {
        let entry = self.handlers.get(&sig.as_u32()).cloned();
        self.dispatch_entry(entry, sig)
    }

    /// Invoke a single tag out-of-band on a fresh nested state; the
    /// current state (and its instruction pointer) is restored after.
    pub fn call_tag_with(
        &mut self,
        sig: Signature,
        setup: impl FnOnce(&mut Vm),
    ) -> TagResult {
        let saved = mem::replace(&mut self.state, State::new());
        setup(self);
        let result = self.dispatch_sig(sig);
        let cleanup = self.release_all();
        self.state = saved;
        cleanup?;
        result
    }

    pub fn call_tag(&mut self, sig: Signature) -> TagResult {
        self.call_tag_with(sig, |_| {})
    }

    /// Send one value through the `ch` path (including any active stream
    /// redirection), preserving the current argument registers.
    pub fn emit(&mut self, var: &Var) -> Result<(), RuntimeError> {
        let saved_args = mem::take(&mut self.state.args);
        let saved_argc = mem::replace(&mut self.state.argc, 0);
        self.arg_var(0).copy_from(var);
        let result = self.dispatch_sig(self.sigs.ch);
        self.state.args = saved_args;
        self.state.argc = saved_argc;
        result.map(|_| ())
    }

    /// Release every frame and start from a fresh state.
    pub fn reset_state(&mut self) {
        let _ = self.release_all();
        self.state = State::new();
    }

    /// Swap the active state, e.g. for isolated host-driven execution.
    pub fn replace_state(&mut self, state: State) -> State {
        mem::replace(&mut self.state, state)
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_first(&self) -> bool {
        self.state.is_first
    }

    // --- jumps ---------------------------------------------------------

    pub(crate) fn jump_to(&mut self, target: i64) -> Result<(), RuntimeError> {
        let len = self.prog.as_ref().ok_or(RuntimeError::NoProgram)?.cmds.len() as i64;
        if target < 0 || target >= len {
            return Err(RuntimeError::BadJump(target));
        }
        self.state.next = target as usize;
        Ok(())
    }

    pub fn goto_label(&mut self, name: &str) -> Result<(), RuntimeError> {
        self.goto_label_hash(name_hash(name))
    }

    pub fn goto_label_hash(&mut self, hash: u32) -> Result<(), RuntimeError> {
        let target = self
            .prog
            .as_ref()
            .ok_or(RuntimeError::NoProgram)?
            .label_target(hash)
            .ok_or(RuntimeError::UnknownLabel(hash))?;
        self.state.next = target;
        Ok(())
    }

    // --- arguments and returns -----------------------------------------

    pub(crate) fn set_arguments_for(
        &mut self,
        prog: &Rc<LoadedProgram>,
        idx: usize,
    ) -> Result<(), RuntimeError> {
        let sig = prog.cmds[idx].sig;
        let argc = self.registry.get(sig).map_or(0, |t| t.params.len());
        self.state.args.clear();
        self.state.argc = 0;
        for i in 0..argc {
            let blob = prog
                .arg_data(idx, i)
                .ok_or(RuntimeError::BadJump(idx as i64))?;
            let reg = engine::calc_execute(self, blob)?;
            self.state.args.push(reg);
        }
        self.state.argc = argc;
        Ok(())
    }

    /// Argument var by index, auto-extending with fresh temporaries so
    /// handlers can write registers past the evaluated arguments.
    pub fn arg_var(&mut self, index: usize) -> Var {
        while self.state.args.len() <= index {
            self.state.args.push(Register::temp(Var::new()));
        }
        if self.state.argc <= index {
            self.state.argc = index + 1;
        }
        self.state.args[index].var.clone()
    }

    pub fn arg_register(&self, index: usize) -> Option<&Register> {
        self.state.args.get(index)
    }

    pub fn get_integer(&mut self, index: usize) -> i32 {
        self.arg_var(index).as_int()
    }

    pub fn get_float(&mut self, index: usize) -> f32 {
        self.arg_var(index).as_real()
    }

    pub fn get_string(&mut self, index: usize) -> Rc<str> {
        self.arg_var(index).as_string()
    }

    pub fn get_bool(&mut self, index: usize) -> bool {
        self.get_integer(index) != 0
    }

    pub fn get_bytes(&mut self, index: usize) -> Option<Rc<[u8]>> {
        self.arg_var(index).as_bytes()
    }

    pub fn has_argument(&self, index: usize) -> bool {
        self.state.argc > index
    }

    pub fn clear_arguments(&mut self) {
        self.state.args.clear();
        self.state.argc = 0;
    }

    /// Arm a var to receive the next delivered return value (`set`).
    pub fn arm_return(&mut self, var: Var) {
        self.state.return_target = Some(var);
    }

    pub fn deliver_return(&mut self, value: &Var) {
        if let Some(target) = self.state.return_target.take() {
            target.copy_from(value);
        }
    }

    pub fn deliver_return_int(&mut self, value: i32) {
        if let Some(target) = self.state.return_target.take() {
            target.set_int(value);
        }
    }

    pub fn deliver_return_real(&mut self, value: f32) {
        if let Some(target) = self.state.return_target.take() {
            target.set_real(value);
        }
    }

    pub fn deliver_return_string(&mut self, value: &str) {
        if let Some(target) = self.state.return_target.take() {
            target.set_str(value);
        }
    }

    // --- workarea frames -----------------------------------------------

    pub(crate) fn needs_workarea(&self, sig: Signature) -> bool {
        self.handlers
            .get(&sig.as_u32())
            .is_some_and(|e| e.needs_workarea)
    }

    /// Whether a command with this signature owns a workarea frame.
    /// Macro signatures own one even before their declaration has
    /// executed in this session (relevant when resuming a saved state
    /// in a fresh VM).
    pub(crate) fn owns_frame(&self, sig: Signature) -> bool {
        self.needs_workarea(sig)
            || self
                .registry
                .get(sig)
                .is_some_and(|t| t.kind == TagKind::Macro)
    }

    /// Run the top frame's delete behavior and pop it.
    pub(crate) fn delete_top(&mut self) -> Result<(), RuntimeError> {
        let Some(top_sig) = self.state.frames.last().map(|f| f.sig) else {
            return Ok(());
        };
        // Native delete handlers run while the frame is still current.
        let native = match self.handlers.get(&top_sig.as_u32()).map(|e| &e.storage) {
            Some(Some(StorageKind::Native(ns))) => Some(ns.clone()),
            _ => None,
        };
        if let Some(ns) = native {
            (ns.delete)(self)?;
        }
        let frame = self.state.frames.pop().unwrap();
        match frame.data {
            Workarea::MacroLocals(m) => self.pop_local_frame(m),
            Workarea::Stream(_) => {
                self.restore_stream_overrides();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Pop frames, running delete behavior, until the frame with this
    /// signature has been released.
    pub(crate) fn release_to(&mut self, sig: Signature) -> Result<(), RuntimeError> {
        while let Some(top_sig) = self.state.frames.last().map(|f| f.sig) {
            self.delete_top()?;
            if top_sig == sig {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn release_all(&mut self) -> Result<(), RuntimeError> {
        while !self.state.frames.is_empty() {
            self.delete_top()?;
        }
        Ok(())
    }

    /// Restore the caller's local-variable overlay after a macro call:
    /// the entries backed up at the invocation replace the callee's
    /// locals, and the backup region is released.
    fn pop_local_frame(&mut self, frame: MacroFrame) -> Result<(), RuntimeError> {
        self.state.return_target = frame.saved_return;
        let base = frame.saved_base.min(self.state.saved.len());
        let end = (frame.saved_base + frame.saved_count).min(self.state.saved.len());
        let restore: Vec<SavedVar> = self.state.saved[base..end].to_vec();
        let arr = self.state.root.array_for_write();
        arr.clear();
        for slot in restore {
            arr.insert(slot.key, "", slot.var.clone());
        }
        self.state.saved.truncate(base);
        Ok(())
    }

    pub(crate) fn restore_stream_overrides(&mut self) {
        let Some(saved) = self.stream_saved.pop() else {
            return;
        };
        match saved.ch {
            Some(entry) => {
                self.handlers.insert(self.sigs.ch.as_u32(), entry);
            }
            None => {
                self.handlers.remove(&self.sigs.ch.as_u32());
            }
        }
        match saved.newline {
            Some(entry) => {
                self.handlers.insert(self.sigs.newline.as_u32(), entry);
            }
            None => {
                self.handlers.remove(&self.sigs.newline.as_u32());
            }
        }
    }

    /// Host access to a native tag's frame payload.
    pub fn workarea_bytes(&self) -> Option<&[u8]> {
        match &self.state.frames.last()?.data {
            Workarea::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn set_workarea_bytes(&mut self, bytes: Vec<u8>) {
        if let Some(frame) = self.state.frames.last_mut() {
            frame.data = Workarea::Bytes(bytes);
        }
    }

    pub(crate) fn set_top_workarea(&mut self, data: Workarea) {
        if let Some(frame) = self.state.frames.last_mut() {
            frame.data = data;
        }
    }

    // --- file helpers for builtin tags ---------------------------------

    pub(crate) fn read_text_file(&self, file: &str) -> Option<String> {
        let path = self.resolve_path(file);
        std::fs::read_to_string(path).ok()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
