//! The builtin tag set.
//!
//! Registration order matters: best-effort resolution at compile time
//! takes the first registered match, so this mirrors the engine's
//! canonical order. Control-flow tags are implemented purely through the
//! result protocol; loops and conditionals keep their state in typed
//! workarea frames.

use std::io::Write;

use scriv_bytecode::vario::{read_var, write_var};
use scriv_core::params::parse_param_spec;
use scriv_core::registry::TagKind;
use scriv_core::{CompileHook, Signature, Var, Variant, name_hash};

use crate::engine;
use crate::error::RuntimeError;
use crate::handlers::{Builtin, ExecKind, StorageKind, TagHandlers};
use crate::state::{Frame, ForeachFrame, MacroFrame, ReturnFrame, SavedVar, StreamFrame, Workarea};
use crate::vm::{Flow, StreamSaved, TagResult, Vm};

pub(crate) fn register_builtins(vm: &mut Vm) {
    let b = |vm: &mut Vm, name: &str, spec: Option<&str>, exec: Builtin| -> Signature {
        let sig = vm
            .registry
            .declare(name, spec)
            .expect("builtin spec is well-formed");
        vm.handlers
            .insert(sig.as_u32(), TagHandlers::exec_only(ExecKind::Builtin(exec)));
        sig
    };

    b(vm, "ch", Some("value"), Builtin::Ch);
    b(vm, "r", None, Builtin::Newline);
    b(vm, "goto", Some("label"), Builtin::Goto);
    b(vm, "goto", Some("file"), Builtin::GotoFile);
    b(vm, "gosub", Some("label"), Builtin::Gosub);
    b(vm, "gosub", Some("file"), Builtin::GosubFile);
    b(vm, "exit", None, Builtin::Exit);
    b(vm, "label", Some("value"), Builtin::Label);
    let ret = b(vm, "return", Some("value = null"), Builtin::Return);
    // Return frames are pushed by callers, not on execution.
    vm.set_storage(ret, StorageKind::Return);
    vm.set_needs_workarea(ret, false);

    b(vm, "goto", Some("file, label"), Builtin::GotoFile);
    b(vm, "gosub", Some("file, label"), Builtin::GosubFile);
    b(vm, "set", Some("&var"), Builtin::Set);
    b(vm, "unset", Some("&var"), Builtin::Unset);
    b(vm, "isnull", Some("&var"), Builtin::IsNull);
    b(vm, "isint", Some("&var"), Builtin::IsInt);
    b(vm, "isinteger", Some("&var"), Builtin::IsInt);
    b(vm, "isreal", Some("&var"), Builtin::IsReal);
    b(vm, "isarray", Some("&var"), Builtin::IsArray);
    b(vm, "isstring", Some("&var"), Builtin::IsString);
    b(vm, "let", Some("value"), Builtin::Let);
    b(vm, "const", Some("value"), Builtin::Const);

    let if_ = b(vm, "if", Some("value"), Builtin::If);
    let elseif = b(vm, "elseif", Some("value"), Builtin::ElseIf);
    let else_ = b(vm, "else", None, Builtin::Else);
    let endif = b(vm, "endif", None, Builtin::EndIf);
    vm.set_pair(if_, elseif);
    vm.set_pair(if_, else_);
    vm.set_pair(if_, endif);
    vm.set_pair(elseif, elseif);
    vm.set_pair(elseif, else_);
    vm.set_pair(elseif, endif);
    vm.set_pair(else_, endif);
    vm.set_storage(if_, StorageKind::Flag);

    let endmacro = b(vm, "endmacro", None, Builtin::EndMacro);
    let macro_ = b(
        vm,
        "macro",
        Some("name, params = \"\", vars = \"\""),
        Builtin::MacroDecl,
    );
    if let Some(decl) = vm.registry.get_mut(macro_) {
        decl.compile_hook = Some(CompileHook::Macro);
    }
    vm.set_storage(macro_, StorageKind::Empty);
    vm.set_pair(macro_, endmacro);

    let break_ = b(vm, "break", None, Builtin::Break);
    let continue_ = b(vm, "continue", None, Builtin::Continue);

    let while_ = b(vm, "while", Some("value"), Builtin::While);
    let endwhile = b(vm, "endwhile", None, Builtin::EndWhile);
    vm.set_pair(while_, endwhile);
    vm.set_child(while_, break_);
    vm.set_child(while_, continue_);
    vm.set_storage(while_, StorageKind::Empty);

    let do_ = b(vm, "do", None, Builtin::Do);
    let dowhile = b(vm, "dowhile", Some("value"), Builtin::DoWhile);
    vm.set_pair(do_, dowhile);
    vm.set_child(do_, break_);
    vm.set_child(do_, continue_);
    vm.set_storage(do_, StorageKind::Empty);

    let foreach3 = b(vm, "foreach", Some("&from, &item, &key"), Builtin::Foreach);
    let endforeach = b(vm, "endforeach", None, Builtin::EndForeach);
    vm.set_pair(foreach3, endforeach);
    vm.set_child(foreach3, break_);
    vm.set_child(foreach3, continue_);
    vm.set_storage(foreach3, StorageKind::Foreach);
    let foreach2 = b(vm, "foreach", Some("&from, &item"), Builtin::Foreach);
    vm.set_pair(foreach2, endforeach);
    vm.set_child(foreach2, break_);
    vm.set_child(foreach2, continue_);
    vm.set_storage(foreach2, StorageKind::Foreach);

    let include = vm
        .registry
        .declare("include", Some("file"))
        .expect("builtin spec is well-formed");
    if let Some(decl) = vm.registry.get_mut(include) {
        decl.compile_hook = Some(CompileHook::Include);
    }

    let stream = b(vm, "stream", Some("toarray = FALSE"), Builtin::Stream);
    let endstream = b(vm, "endstream", None, Builtin::EndStream);
    vm.set_pair(stream, endstream);
    vm.set_storage(stream, StorageKind::Stream);

    let literal = vm
        .registry
        .declare("literal", None)
        .expect("builtin spec is well-formed");
    if let Some(decl) = vm.registry.get_mut(literal) {
        decl.compile_hook = Some(CompileHook::Literal);
    }
    let endliteral = vm
        .registry
        .declare("endliteral", None)
        .expect("builtin spec is well-formed");
    vm.set_pair(literal, endliteral);

    b(vm, "count", Some("var"), Builtin::Count);
    b(vm, "file", Some("file, toarray = FALSE"), Builtin::File);
    b(vm, "substr", Some("src, offset = 0, length = 0"), Builtin::Substr);
    b(vm, "strlen", Some("src"), Builtin::Strlen);
    b(vm, "strtok", Some("src, delimiter"), Builtin::Strtok);
    b(vm, "ini", Some("file, tolower = 1"), Builtin::Ini);
    b(vm, "writevar", Some("file, var"), Builtin::WriteVar);
    b(vm, "readvar", Some("file"), Builtin::ReadVar);
}

pub(crate) fn exec_builtin(vm: &mut Vm, builtin: Builtin) -> TagResult {
    match builtin {
        Builtin::Ch => {
            let text = vm.get_string(0);
            if vm.output.write_all(text.as_bytes()).is_err() {
                vm.report_msg("output write failed");
            }
            Ok(Flow::Next)
        }
        Builtin::Newline => {
            let newline = Var::from_variant(Variant::Str("\n".into()));
            vm.emit(&newline)?;
            Ok(Flow::Next)
        }
        Builtin::Label => {
            if let Some(bytes) = vm.get_bytes(0)
                && bytes.len() >= 4
            {
                vm.state.last_label = u32::from_ne_bytes(bytes[..4].try_into().unwrap());
            }
            Ok(Flow::Next)
        }
        Builtin::Goto => {
            if vm.has_argument(0) {
                let target = vm.get_integer(0);
                vm.jump_to(target as i64)?;
                Ok(Flow::Stay)
            } else {
                Ok(Flow::Next)
            }
        }
        Builtin::GotoFile => {
            let file = vm.get_string(0).to_string();
            let entry = vm.has_argument(1).then(|| vm.arg_var(1).get());
            match entry {
                None => vm.goto_file(&file, None)?,
                Some(Variant::Label { hash, .. }) => vm.goto_file(&file, Some(hash))?,
                Some(other) => {
                    vm.goto_file(&file, None)?;
                    vm.jump_to(other.as_int() as i64)?;
                }
            }
            Ok(Flow::Stay)
        }
        Builtin::Gosub => {
            let cur = vm.state.cur.ok_or(RuntimeError::NoProgram)?;
            vm.state.frames.push(Frame {
                sig: vm.sigs.ret,
                data: Workarea::Return(ReturnFrame {
                    file: None,
                    cmd: cur,
                }),
            });
            exec_builtin(vm, Builtin::Goto)
        }
        Builtin::GosubFile => {
            let cur = vm.state.cur.ok_or(RuntimeError::NoProgram)?;
            vm.state.frames.push(Frame {
                sig: vm.sigs.ret,
                data: Workarea::Return(ReturnFrame {
                    file: Some(vm.load_file.clone()),
                    cmd: cur,
                }),
            });
            exec_builtin(vm, Builtin::GotoFile)
        }
        Builtin::Exit => Ok(Flow::Exit),
        Builtin::Return | Builtin::EndMacro => exec_return(vm),
        Builtin::Set => {
            let var = vm.arg_var(0);
            vm.arm_return(var);
            Ok(Flow::Next)
        }
        Builtin::Unset => {
            if let Some(reg) = vm.arg_register(0).cloned()
                && let Some(parent) = reg.parent
            {
                parent.array_for_write().remove(reg.hash);
            }
            Ok(Flow::Next)
        }
        Builtin::IsNull => predicate(vm, |v| v.is_null()),
        Builtin::IsInt => predicate(vm, |v| v.is_int()),
        Builtin::IsReal => predicate(vm, |v| v.is_real()),
        Builtin::IsArray => predicate(vm, |v| v.is_array()),
        Builtin::IsString => predicate(vm, |v| v.is_string()),
        Builtin::Let => Ok(Flow::Next),
        Builtin::Const => {
            vm.arg_var(0).lock_const();
            Ok(Flow::Next)
        }
        Builtin::If => {
            let taken = vm.get_bool(0);
            vm.set_top_workarea(Workarea::Flag(taken));
            Ok(if taken { Flow::Next } else { Flow::NextPair })
        }
        Builtin::ElseIf => {
            if !branch_taken(vm) && vm.get_bool(0) {
                vm.set_top_workarea(Workarea::Flag(true));
                Ok(Flow::Next)
            } else {
                Ok(Flow::NextPair)
            }
        }
        Builtin::Else => Ok(if branch_taken(vm) {
            Flow::BreakPair
        } else {
            Flow::Next
        }),
        Builtin::EndIf => Ok(Flow::BreakPair),
        Builtin::MacroDecl => {
            let name = vm.get_string(0).to_string();
            let spec = vm.get_string(1).to_string();
            let params = parse_param_spec(Some(&spec))
                .map_err(|e| RuntimeError::Host(e.to_string()))?;
            let sig = vm.registry.declare_params(&name, params);
            if let Some(decl) = vm.registry.get_mut(sig) {
                decl.kind = TagKind::Macro;
            }
            vm.handlers.insert(
                sig.as_u32(),
                TagHandlers {
                    exec: ExecKind::Builtin(Builtin::CallMacro),
                    storage: Some(StorageKind::MacroLocals),
                    needs_workarea: true,
                },
            );
            let cur = vm.state.cur.ok_or(RuntimeError::NoProgram)?;
            vm.macro_bodies.insert(sig.as_u32(), cur);
            Ok(Flow::BreakPair)
        }
        Builtin::CallMacro => {
            let cur = vm.state.cur.ok_or(RuntimeError::NoProgram)?;
            let sig = vm
                .prog
                .as_ref()
                .and_then(|p| p.cmds.get(cur))
                .map(|c| c.sig)
                .ok_or(RuntimeError::NoProgram)?;
            exec_call_macro(vm, sig)
        }
        Builtin::Break => exec_leave_loop(vm, true),
        Builtin::Continue => exec_leave_loop(vm, false),
        Builtin::While => Ok(if vm.get_bool(0) {
            Flow::Next
        } else {
            Flow::BreakPair
        }),
        Builtin::EndWhile => Ok(Flow::FirstPair),
        Builtin::Do => Ok(Flow::Next),
        Builtin::DoWhile => Ok(if vm.get_bool(0) {
            Flow::FirstPair
        } else {
            Flow::BreakPair
        }),
        Builtin::Foreach => exec_foreach(vm),
        Builtin::EndForeach => Ok(Flow::FirstPair),
        Builtin::Stream => {
            let to_array = vm.get_bool(0);
            let cur = vm.state.cur.ok_or(RuntimeError::NoProgram)?;
            install_stream_overrides(vm);
            vm.set_top_workarea(Workarea::Stream(StreamFrame {
                cmd: cur,
                to_array,
                var: Var::new(),
            }));
            Ok(Flow::Next)
        }
        Builtin::EndStream => {
            if let Some(frame) = stream_frame(vm) {
                let value = frame.var.clone();
                vm.deliver_return(&value);
            }
            Ok(Flow::BreakPair)
        }
        Builtin::StreamCh => {
            let Some(frame) = stream_frame(vm) else {
                return exec_builtin(vm, Builtin::Ch);
            };
            let target = if frame.to_array {
                let slot = Var::new();
                frame.var.array_for_write().insert_auto(slot.clone());
                slot
            } else {
                frame.var.clone()
            };
            if target.is_string() {
                let mut text = target.as_string().to_string();
                text.push_str(&vm.get_string(0));
                target.set_str(&text);
            } else {
                target.copy_from(&vm.arg_var(0));
            }
            Ok(Flow::Next)
        }
        Builtin::StreamNewline => {
            let Some(frame) = stream_frame(vm) else {
                return exec_builtin(vm, Builtin::Newline);
            };
            if !frame.to_array {
                if frame.var.is_string() {
                    let mut text = frame.var.as_string().to_string();
                    text.push('\n');
                    frame.var.set_str(&text);
                } else {
                    frame.var.set_str("\n");
                }
            }
            Ok(Flow::Next)
        }
        Builtin::Count => {
            let count = vm.arg_var(0).count();
            vm.deliver_return_int(count as i32);
            Ok(Flow::Next)
        }
        Builtin::File => {
            let file = vm.get_string(0).to_string();
            let to_array = vm.get_bool(1);
            let Some(text) = vm.read_text_file(&file) else {
                vm.report_msg(&format!("cannot open '{file}'"));
                return Ok(Flow::Next);
            };
            let var = Var::new();
            if to_array {
                let arr = var.array_for_write();
                for line in text.lines() {
                    let slot = Var::new();
                    slot.set_str(line);
                    arr.insert_auto(slot);
                }
            } else {
                var.set_str(&text);
            }
            vm.deliver_return(&var);
            Ok(Flow::Next)
        }
        Builtin::Substr => {
            let text = vm.get_string(0);
            let chars: Vec<char> = text.chars().collect();
            let len = chars.len() as i32;
            let mut offset = vm.get_integer(1);
            let mut length = vm.get_integer(2);
            if offset < 0 {
                offset += len;
            }
            if length <= 0 {
                length += len;
            }
            let start = offset.clamp(0, len) as usize;
            let out: String = chars[start..].iter().take(length.max(0) as usize).collect();
            vm.deliver_return_string(&out);
            Ok(Flow::Next)
        }
        Builtin::Strlen => {
            let count = vm.get_string(0).chars().count();
            vm.deliver_return_int(count as i32);
            Ok(Flow::Next)
        }
        Builtin::Strtok => {
            let text = vm.get_string(0).to_string();
            let delims: Vec<char> = vm.get_string(1).chars().collect();
            let var = Var::new();
            {
                let arr = var.array_for_write();
                for token in text
                    .split(|c: char| delims.contains(&c))
                    .filter(|t| !t.is_empty())
                {
                    let slot = Var::new();
                    slot.set_str(token);
                    arr.insert_auto(slot);
                }
            }
            vm.deliver_return(&var);
            Ok(Flow::Next)
        }
        Builtin::Ini => exec_ini(vm),
        Builtin::WriteVar => {
            let file = vm.get_string(0).to_string();
            let var = vm.arg_var(1);
            let mut blob = Vec::new();
            write_var(&mut blob, &var);
            let path = vm.resolve_path(&file);
            if std::fs::write(path, blob).is_err() {
                vm.report_msg(&format!("cannot write '{file}'"));
            }
            Ok(Flow::Next)
        }
        Builtin::ReadVar => {
            let file = vm.get_string(0).to_string();
            let path = vm.resolve_path(&file);
            match std::fs::read(path) {
                Ok(bytes) => match read_var(&bytes) {
                    Ok((var, _)) => vm.deliver_return(&var),
                    Err(_) => vm.report_msg(&format!("'{file}' is not a saved variable")),
                },
                Err(_) => vm.report_msg(&format!("cannot open '{file}'")),
            }
            Ok(Flow::Next)
        }
    }
}

fn predicate(vm: &mut Vm, check: impl Fn(&Var) -> bool) -> TagResult {
    let var = vm.arg_var(0);
    vm.deliver_return_int(check(&var) as i32);
    Ok(Flow::Next)
}

/// Whether a prior branch of the enclosing if chain already matched.
fn branch_taken(vm: &Vm) -> bool {
    matches!(
        vm.state.frames.last().map(|f| &f.data),
        Some(Workarea::Flag(true))
    )
}

/// Innermost active stream redirection.
fn stream_frame(vm: &Vm) -> Option<StreamFrame> {
    vm.state.frames.iter().rev().find_map(|f| match &f.data {
        Workarea::Stream(s) => Some(s.clone()),
        _ => None,
    })
}

pub(crate) fn install_stream_overrides(vm: &mut Vm) {
    vm.stream_saved.push(StreamSaved {
        ch: vm.handlers.get(&vm.sigs.ch.as_u32()).cloned(),
        newline: vm.handlers.get(&vm.sigs.newline.as_u32()).cloned(),
    });
    vm.handlers.insert(
        vm.sigs.ch.as_u32(),
        TagHandlers::exec_only(ExecKind::Builtin(Builtin::StreamCh)),
    );
    vm.handlers.insert(
        vm.sigs.newline.as_u32(),
        TagHandlers::exec_only(ExecKind::Builtin(Builtin::StreamNewline)),
    );
}

/// Macro invocation: bind declared locals from the arguments, isolate the
/// caller's overlay, jump into the body behind a return frame.
pub(crate) fn exec_call_macro(vm: &mut Vm, sig: Signature) -> TagResult {
    let Some(&body) = vm.macro_bodies.get(&sig.as_u32()) else {
        // Declared at compile time but the declaration never executed.
        if vm.state.is_first
            && vm
                .state
                .frames
                .last()
                .is_some_and(|f| f.sig == sig && matches!(f.data, Workarea::Empty))
        {
            vm.state.frames.pop();
        }
        let name = vm
            .registry
            .get(sig)
            .map(|t| t.name.to_string())
            .unwrap_or_default();
        vm.report_msg(&format!("macro '{name}' has no body"));
        return Ok(Flow::Next);
    };

    let prog = vm.prog.clone().ok_or(RuntimeError::NoProgram)?;
    let blob = prog
        .arg_data(body, 2)
        .ok_or(RuntimeError::BadJump(body as i64))?;
    let locals = engine::calc_execute(vm, blob)?;
    let bytes = locals
        .var
        .as_bytes()
        .ok_or_else(|| RuntimeError::Host("macro local list is malformed".into()))?;
    if bytes.len() < 4 {
        return Err(RuntimeError::Host("macro local list is malformed".into()));
    }
    let count = i32::from_ne_bytes(bytes[..4].try_into().unwrap()).max(0) as usize;
    let mut hashes = Vec::with_capacity(count);
    for i in 0..count {
        let at = 4 + i * 4;
        let Some(word) = bytes.get(at..at + 4) else {
            break;
        };
        hashes.push(u32::from_ne_bytes(word.try_into().unwrap()));
    }

    // Back up the caller's overlay entries, then seed the callee's
    // declared locals into the emptied overlay.
    let saved_base = vm.state.saved.len();
    let caller = vm
        .state
        .root
        .as_array()
        .map(|a| a.snapshot())
        .unwrap_or_default();
    for (key, _, var) in &caller {
        vm.state.saved.push(SavedVar {
            key: *key,
            var: var.clone(),
        });
    }
    let saved_return = vm.state.return_target.take();
    vm.set_top_workarea(Workarea::MacroLocals(MacroFrame {
        saved_count: caller.len(),
        saved_base,
        saved_return,
    }));

    let root = vm.state.root.array_for_write();
    root.clear();
    for (i, hash) in hashes.iter().enumerate() {
        let var = Var::new();
        root.insert(*hash, "", var.clone());
        if vm.has_argument(i) {
            var.copy_from(&vm.arg_var(i));
        }
    }

    // Redirect into the body; Next advances past the declaration command.
    let cur = vm.state.cur.ok_or(RuntimeError::NoProgram)?;
    vm.state.next = body;
    vm.state.frames.push(Frame {
        sig: vm.sigs.ret,
        data: Workarea::Return(ReturnFrame {
            file: None,
            cmd: cur,
        }),
    });
    Ok(Flow::Next)
}

/// `return`/`endmacro`: unwind to the nearest return frame, restore the
/// call site and optionally deliver a return value.
fn exec_return(vm: &mut Vm) -> TagResult {
    let value = Var::new();
    value.copy_from(&vm.arg_var(0));

    while let Some(top) = vm.state.frames.last() {
        if top.sig == vm.sigs.ret {
            break;
        }
        vm.delete_top()?;
    }
    let Some(frame) = vm.state.frames.pop() else {
        return Ok(Flow::Exit);
    };
    let Workarea::Return(ret) = frame.data else {
        return Ok(Flow::Exit);
    };

    match ret.file {
        None => {
            let call = ret.cmd;
            // A macro call owns the frame beneath the return frame; its
            // release restores the caller's locals.
            let call_sig = vm
                .prog
                .as_ref()
                .and_then(|p| p.cmds.get(call))
                .map(|c| c.sig);
            if let Some(sig) = call_sig
                && vm.owns_frame(sig)
                && vm.state.frames.last().is_some_and(|f| f.sig == sig)
            {
                vm.delete_top()?;
            }
            vm.state.next = call;
        }
        Some(file) => {
            let call = ret.cmd;
            vm.clear_arguments();
            vm.goto_file(&file, None)?;
            vm.state.next = call;
        }
    }

    if !value.is_null() {
        vm.deliver_return(&value);
    }
    Ok(Flow::Next)
}

/// `break`/`continue`: release frames out to the nearest enclosing loop,
/// then restart it or jump past its end.
fn exec_leave_loop(vm: &mut Vm, leave: bool) -> TagResult {
    let prog = vm.prog.clone().ok_or(RuntimeError::NoProgram)?;
    let cur = vm.state.cur.ok_or(RuntimeError::NoProgram)?;
    let parent = prog.cmds[cur].parent;
    let parent_sig = prog.cmds[parent].sig;

    while let Some(top) = vm.state.frames.last() {
        if top.sig == parent_sig {
            break;
        }
        vm.delete_top()?;
    }

    let pair = prog.cmds[parent].pair;
    if leave {
        if vm.state.frames.last().is_some_and(|f| f.sig == parent_sig) {
            vm.delete_top()?;
        }
        vm.state.next = prog.pairs[pair as usize].last + 1;
    } else {
        vm.state.next = prog.pairs[pair as usize].first;
    }
    vm.state.pair_alias = Some(pair);
    Ok(Flow::Stay)
}

fn exec_foreach(vm: &mut Vm) -> TagResult {
    if vm.state.is_first {
        let from = vm.arg_var(0);
        if from.as_array().is_none() {
            return Ok(Flow::BreakPair);
        }
        let item = vm.arg_var(1);
        let key = if vm.has_argument(2) {
            Some(vm.arg_var(2))
        } else {
            None
        };
        let cur = vm.state.cur.ok_or(RuntimeError::NoProgram)?;
        vm.set_top_workarea(Workarea::Foreach(ForeachFrame {
            cmd: cur,
            pos: 0,
            from,
            item,
            key,
        }));
    }

    let Some(Workarea::Foreach(frame)) = vm.state.frames.last().map(|f| &f.data) else {
        return Ok(Flow::BreakPair);
    };
    let (from, item, key, pos) = (
        frame.from.clone(),
        frame.item.clone(),
        frame.key.clone(),
        frame.pos,
    );

    let Some(arr) = from.as_array() else {
        return Ok(Flow::BreakPair);
    };
    let Some((name, var)) = arr.entry_at(pos) else {
        return Ok(Flow::BreakPair);
    };
    item.copy_from(&var);
    if let Some(k) = &key {
        k.set_str(&name);
    }
    if let Some(Workarea::Foreach(frame)) = vm.state.frames.last_mut().map(|f| &mut f.data) {
        frame.pos = pos + 1;
    }
    Ok(Flow::Next)
}

fn exec_ini(vm: &mut Vm) -> TagResult {
    let file = vm.get_string(0).to_string();
    let lower = vm.get_bool(1);
    let Some(text) = vm.read_text_file(&file) else {
        vm.report_msg(&format!("cannot open '{file}'"));
        return Ok(Flow::Next);
    };

    let parent = Var::new();
    let mut section = parent.clone();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some(rest) = line.strip_prefix('[') {
            let Some(end) = rest.find(']') else {
                continue;
            };
            let mut name = rest[..end].trim().to_owned();
            if lower {
                name = name.to_lowercase();
            }
            let var = Var::new();
            parent
                .array_for_write()
                .insert(name_hash(&name), &name, var.clone());
            section = var;
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let mut key = key.trim().to_owned();
        if lower {
            key = key.to_lowercase();
        }
        let var = Var::new();
        var.set_str(value.trim());
        section.array_for_write().insert(name_hash(&key), &key, var);
    }

    vm.deliver_return(&parent);
    Ok(Flow::Next)
}
