//! The save-state protocol: freeze a State to bytes, thaw it later.
//!
//! Layout: load-file name (512 bytes, NUL padded), 128-bit content
//! fingerprint, current/next command index, last-label hash, workarea
//! frame count followed by `{signature, tag-specific payload}` records
//! (payload length implied by each tag's storage kind), then the
//! local-variable slots as `{hash, serialized Var}` - the saved stack
//! followed by the live overlay in one flat list.
//!
//! Loading first reloads the named file (recompiling it), restores the
//! frame stack and locals, then compares fingerprints: a mismatch resets
//! execution to the saved last label (or command 0) instead of trusting
//! the saved command index, so states survive recompilations that
//! preserve labels.

use scriv_bytecode::vario::{read_var, write_var};

use crate::builtins;
use crate::error::RuntimeError;
use crate::handlers::StorageKind;
use crate::state::{
    ForeachFrame, Frame, MacroFrame, ReturnFrame, SavedVar, State, StreamFrame, Workarea,
};
use crate::vm::Vm;

const NAME_LEN: usize = 512;

impl Vm {
    /// Storage kind for a frame's signature. Macro signatures fall back
    /// to macro-locals storage even before their declaration has
    /// executed in this session, so states saved inside a macro load
    /// into a freshly constructed VM.
    fn frame_storage(&self, sig: scriv_core::Signature) -> Option<StorageKind> {
        if let Some(storage) = self
            .handlers
            .get(&sig.as_u32())
            .and_then(|e| e.storage.clone())
        {
            return Some(storage);
        }
        if self
            .registry
            .get(sig)
            .is_some_and(|t| t.kind == scriv_core::registry::TagKind::Macro)
        {
            return Some(StorageKind::MacroLocals);
        }
        None
    }

    /// Serialize the active state.
    pub fn save_state(&self) -> Result<Vec<u8>, RuntimeError> {
        let prog = self.prog.as_ref().ok_or(RuntimeError::NoProgram)?;
        let mut out = Vec::with_capacity(NAME_LEN + 64);

        let mut name = [0u8; NAME_LEN];
        let bytes = self.load_file.as_bytes();
        let len = bytes.len().min(NAME_LEN - 1);
        name[..len].copy_from_slice(&bytes[..len]);
        out.extend_from_slice(&name);

        out.extend_from_slice(&prog.fingerprint);
        let cur = self.state.cur.map_or(-1, |c| c as i32);
        out.extend_from_slice(&cur.to_ne_bytes());
        out.extend_from_slice(&(self.state.next as i32).to_ne_bytes());
        out.extend_from_slice(&self.state.last_label.to_ne_bytes());

        out.extend_from_slice(&(self.state.frames.len() as i32).to_ne_bytes());
        for frame in &self.state.frames {
            out.extend_from_slice(&frame.sig.as_u32().to_ne_bytes());
            self.save_frame(frame, &mut out)?;
        }

        // One flat slot list: the saved stack, then the live overlay. The
        // innermost macro frame's {base, count} marks the boundary.
        let overlay = self
            .state
            .root
            .as_array()
            .map(|a| a.snapshot())
            .unwrap_or_default();
        let total = self.state.saved.len() + overlay.len();
        out.extend_from_slice(&(total as i32).to_ne_bytes());
        for slot in &self.state.saved {
            out.extend_from_slice(&slot.key.to_ne_bytes());
            write_var(&mut out, &slot.var);
        }
        for (key, _, var) in &overlay {
            out.extend_from_slice(&key.to_ne_bytes());
            write_var(&mut out, var);
        }

        Ok(out)
    }

    fn save_frame(&self, frame: &Frame, out: &mut Vec<u8>) -> Result<(), RuntimeError> {
        match self.frame_storage(frame.sig) {
            None | Some(StorageKind::Empty) => {}
            Some(StorageKind::Flag) => {
                let flag = matches!(frame.data, Workarea::Flag(true)) as i32;
                out.extend_from_slice(&flag.to_ne_bytes());
            }
            Some(StorageKind::Return) => {
                let (file, cmd) = match &frame.data {
                    Workarea::Return(r) => (r.file.clone(), r.cmd),
                    _ => (None, 0),
                };
                out.push(file.is_some() as u8);
                out.extend_from_slice(&(cmd as i32).to_ne_bytes());
                if let Some(file) = file {
                    out.extend_from_slice(&(file.len() as u32).to_ne_bytes());
                    out.extend_from_slice(file.as_bytes());
                }
            }
            Some(StorageKind::MacroLocals) => {
                let (count, base) = match &frame.data {
                    Workarea::MacroLocals(m) => (m.saved_count, m.saved_base),
                    _ => (0, 0),
                };
                out.extend_from_slice(&(count as i32).to_ne_bytes());
                out.extend_from_slice(&(base as i32).to_ne_bytes());
            }
            Some(StorageKind::Foreach) => {
                let (cmd, pos) = match &frame.data {
                    Workarea::Foreach(f) => (f.cmd, f.pos),
                    _ => (0, 0),
                };
                out.extend_from_slice(&(cmd as i32).to_ne_bytes());
                out.extend_from_slice(&(pos as u32).to_ne_bytes());
            }
            Some(StorageKind::Stream) => {
                let (cmd, to_array, var) = match &frame.data {
                    Workarea::Stream(s) => (s.cmd, s.to_array, s.var.clone()),
                    _ => (0, false, scriv_core::Var::new()),
                };
                out.extend_from_slice(&(cmd as i32).to_ne_bytes());
                out.push(to_array as u8);
                write_var(out, &var);
            }
            Some(StorageKind::Native(ns)) => {
                (ns.save)(&frame.data, out)?;
            }
        }
        Ok(())
    }

    /// Restore a state saved by [`Vm::save_state`], reloading the program
    /// file it names.
    pub fn load_state(&mut self, src: &[u8]) -> Result<(), RuntimeError> {
        self.reset_state();

        let mut at = 0usize;
        let name_bytes = take(src, &mut at, NAME_LEN)?;
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let file = std::str::from_utf8(&name_bytes[..end])
            .map_err(|_| RuntimeError::BadSaveState(0))?
            .to_owned();
        if !file.is_empty() {
            self.goto_file(&file, None)?;
        }

        let mut fingerprint = [0u8; 16];
        fingerprint.copy_from_slice(take(src, &mut at, 16)?);

        let cur = take_i32(src, &mut at)?;
        let next = take_i32(src, &mut at)?;
        let last_label = take_u32(src, &mut at)?;

        let mut state = State::new();
        state.cur = (cur >= 0).then_some(cur as usize);
        state.next = next.max(0) as usize;
        state.last_label = last_label;
        self.state = state;

        let frame_count = take_i32(src, &mut at)?.max(0) as usize;
        for _ in 0..frame_count {
            let sig = scriv_core::Signature(take_u32(src, &mut at)?);
            let frame = self.load_frame(sig, src, &mut at)?;
            self.state.frames.push(frame);
        }

        let var_count = take_i32(src, &mut at)?.max(0) as usize;
        let mut slots = Vec::with_capacity(var_count);
        for _ in 0..var_count {
            let key = take_u32(src, &mut at)?;
            let rest = src.get(at..).ok_or(RuntimeError::BadSaveState(at))?;
            let (var, used) = read_var(rest)?;
            at += used;
            slots.push(SavedVar { key, var });
        }

        // Split the slot list back into the saved stack and the live
        // overlay at the innermost macro frame's boundary.
        let boundary = self.state.frames.iter().rev().find_map(|f| match &f.data {
            Workarea::MacroLocals(m) => Some(m.saved_base + m.saved_count),
            _ => None,
        });
        if let Some(boundary) = boundary {
            let overlay = slots.split_off(boundary.min(slots.len()));
            self.state.saved = slots;
            let arr = self.state.root.array_for_write();
            for slot in overlay {
                arr.insert(slot.key, "", slot.var.clone());
            }
        } else {
            self.state.saved = slots;
        }

        let prog = self.prog.clone().ok_or(RuntimeError::NoProgram)?;
        let same_program = fingerprint == prog.fingerprint;
        if !same_program {
            // Re-synchronize on the last passed label instead of trusting
            // stale command indices.
            if last_label == 0 || self.goto_label_hash(last_label).is_err() {
                self.state.next = 0;
            }
        }

        // Foreach frames rebind their target vars by re-evaluating the
        // loop command's arguments, which is only meaningful in the same
        // program.
        if same_program {
            let rebinds: Vec<(usize, usize)> = self
                .state
                .frames
                .iter()
                .enumerate()
                .filter_map(|(i, f)| match &f.data {
                    Workarea::Foreach(fe) => Some((i, fe.cmd)),
                    _ => None,
                })
                .collect();
            for (frame_idx, cmd) in rebinds {
                if cmd >= prog.cmds.len() {
                    continue;
                }
                self.set_arguments_for(&prog, cmd)?;
                let from = self.arg_var(0);
                let item = self.arg_var(1);
                let key = if self.has_argument(2) {
                    Some(self.arg_var(2))
                } else {
                    None
                };
                if let Some(frame) = self.state.frames.get_mut(frame_idx)
                    && let Workarea::Foreach(fe) = &mut frame.data
                {
                    fe.from = from;
                    fe.item = item;
                    fe.key = key;
                }
            }
            self.clear_arguments();
        }

        Ok(())
    }

    fn load_frame(
        &mut self,
        sig: scriv_core::Signature,
        src: &[u8],
        at: &mut usize,
    ) -> Result<Frame, RuntimeError> {
        let data = match self.frame_storage(sig) {
            None | Some(StorageKind::Empty) => Workarea::Empty,
            Some(StorageKind::Flag) => Workarea::Flag(take_i32(src, at)? != 0),
            Some(StorageKind::Return) => {
                let has_file = take(src, at, 1)?[0] != 0;
                let cmd = take_i32(src, at)?.max(0) as usize;
                let file = if has_file {
                    let len = take_u32(src, at)? as usize;
                    let bytes = take(src, at, len)?;
                    Some(
                        std::str::from_utf8(bytes)
                            .map_err(|_| RuntimeError::BadSaveState(*at))?
                            .to_owned(),
                    )
                } else {
                    None
                };
                Workarea::Return(ReturnFrame { file, cmd })
            }
            Some(StorageKind::MacroLocals) => {
                let count = take_i32(src, at)?.max(0) as usize;
                let base = take_i32(src, at)?.max(0) as usize;
                Workarea::MacroLocals(MacroFrame {
                    saved_count: count,
                    saved_base: base,
                    saved_return: None,
                })
            }
            Some(StorageKind::Foreach) => {
                let cmd = take_i32(src, at)?.max(0) as usize;
                let pos = take_u32(src, at)? as usize;
                Workarea::Foreach(ForeachFrame {
                    cmd,
                    pos,
                    from: scriv_core::Var::new(),
                    item: scriv_core::Var::new(),
                    key: None,
                })
            }
            Some(StorageKind::Stream) => {
                let cmd = take_i32(src, at)?.max(0) as usize;
                let to_array = take(src, at, 1)?[0] != 0;
                let rest = src.get(*at..).ok_or(RuntimeError::BadSaveState(*at))?;
                let (var, used) = read_var(rest)?;
                *at += used;
                builtins::install_stream_overrides(self);
                Workarea::Stream(StreamFrame { cmd, to_array, var })
            }
            Some(StorageKind::Native(ns)) => {
                let rest = src.get(*at..).ok_or(RuntimeError::BadSaveState(*at))?;
                let (data, used) = (ns.load)(rest)?;
                *at += used;
                data
            }
        };
        Ok(Frame { sig, data })
    }
}

fn take<'a>(src: &'a [u8], at: &mut usize, len: usize) -> Result<&'a [u8], RuntimeError> {
    let bytes = src
        .get(*at..*at + len)
        .ok_or(RuntimeError::BadSaveState(*at))?;
    *at += len;
    Ok(bytes)
}

fn take_i32(src: &[u8], at: &mut usize) -> Result<i32, RuntimeError> {
    Ok(i32::from_ne_bytes(take(src, at, 4)?.try_into().unwrap()))
}

fn take_u32(src: &[u8], at: &mut usize) -> Result<u32, RuntimeError> {
    Ok(u32::from_ne_bytes(take(src, at, 4)?.try_into().unwrap()))
}
