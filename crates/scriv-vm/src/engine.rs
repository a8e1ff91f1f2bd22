//! The runtime calc engine.
//!
//! Interprets the postfix bytecode of one argument or sub-expression
//! against the VM's variable space, returning the final register.
//! Variable resolution order: local overlay first (for the leading chain
//! segment), globals second, auto-vivify on miss. Assignment through the
//! MOVE op rejects const-locked vars fatally.

use scriv_bytecode::calcio::CalcCursor;
use scriv_bytecode::program::LABEL_UNRESOLVED;
use scriv_bytecode::{CalcOp, ValueTag, VarOp};
use scriv_core::{Var, Variant, arith, name_hash};

use crate::error::RuntimeError;
use crate::state::Register;
use crate::vm::Vm;

/// Execute one calc blob, returning the result register.
pub(crate) fn calc_execute(vm: &mut Vm, blob: &[u8]) -> Result<Register, RuntimeError> {
    let mut stack: Vec<Register> = Vec::new();
    let mut cursor = CalcCursor::new(blob);

    loop {
        let op = cursor.next_op()?;
        match op {
            CalcOp::End => break,
            CalcOp::Push => {
                let value = cursor.read_value()?;
                let reg = push_value(vm, value.tag, value.payload)?;
                stack.push(reg);
            }
            CalcOp::Move => {
                let rv = pop(&mut stack, &cursor)?;
                let lv = stack.last().ok_or_else(|| underflow(&cursor))?;
                if lv.var.is_const() {
                    return Err(RuntimeError::ConstAssignment);
                }
                lv.var.copy_from(&rv.var);
            }
            CalcOp::IncFront | CalcOp::DecFront => {
                // The target operand push follows the op.
                if cursor.next_op()? != CalcOp::Push {
                    return Err(underflow(&cursor));
                }
                let value = cursor.read_value()?;
                let reg = push_value(vm, value.tag, value.payload)?;
                step_var(&reg.var, if op == CalcOp::IncFront { 1 } else { -1 });
                stack.push(reg);
            }
            CalcOp::IncBack | CalcOp::DecBack => {
                let reg = pop(&mut stack, &cursor)?;
                step_var(&reg.var, if op == CalcOp::IncBack { 1 } else { -1 });
            }
            CalcOp::Not | CalcOp::BitNot => {
                let lv = stack.last_mut().ok_or_else(|| underflow(&cursor))?;
                let result = arith::unary(op.un_op().unwrap(), &lv.var.get());
                *lv = Register::temp(Var::from_variant(result));
            }
            other => {
                let bin = other.bin_op().ok_or_else(|| underflow(&cursor))?;
                let rv = pop(&mut stack, &cursor)?;
                let lv = stack.last_mut().ok_or_else(|| underflow(&cursor))?;
                let result = arith::binary(bin, &lv.var.get(), &rv.var.get());
                *lv = Register::temp(Var::from_variant(result));
            }
        }
    }

    stack.pop().ok_or_else(|| underflow(&cursor))
}

/// Execute a blob and coerce the result to a string.
pub(crate) fn calc_to_string(vm: &mut Vm, blob: &[u8]) -> Result<String, RuntimeError> {
    Ok(calc_execute(vm, blob)?.var.as_string().to_string())
}

fn underflow(cursor: &CalcCursor<'_>) -> RuntimeError {
    RuntimeError::Format(scriv_bytecode::FormatError::Truncated(cursor.pos()))
}

fn pop(stack: &mut Vec<Register>, cursor: &CalcCursor<'_>) -> Result<Register, RuntimeError> {
    stack.pop().ok_or_else(|| underflow(cursor))
}

fn step_var(var: &Var, delta: i32) {
    match var.get() {
        Variant::Int(v) => var.set_int(v.wrapping_add(delta)),
        Variant::Real(v) => var.set_real(v + delta as f32),
        _ => var.set_int(1),
    }
}

fn push_value(vm: &mut Vm, tag: ValueTag, payload: &[u8]) -> Result<Register, RuntimeError> {
    let fail = || RuntimeError::Format(scriv_bytecode::FormatError::Truncated(0));
    match tag {
        ValueTag::Null => Ok(Register::temp(Var::new())),
        ValueTag::Int => {
            let v = i32::from_ne_bytes(payload.try_into().map_err(|_| fail())?);
            Ok(Register::temp(Var::from_variant(Variant::Int(v))))
        }
        ValueTag::Real => {
            let v = f32::from_ne_bytes(payload.try_into().map_err(|_| fail())?);
            Ok(Register::temp(Var::from_variant(Variant::Real(v))))
        }
        ValueTag::LitStr => {
            let text = match payload.split_last() {
                Some((0, rest)) => rest,
                _ => payload,
            };
            let text = std::str::from_utf8(text)
                .map_err(|_| RuntimeError::Format(scriv_bytecode::FormatError::BadText))?;
            Ok(Register::temp(Var::from_variant(Variant::Str(text.into()))))
        }
        ValueTag::LitBytes => {
            // Size-prefixed raw payload; the prefix is dropped here.
            let bytes = payload.get(4..).ok_or_else(fail)?;
            Ok(Register::temp(Var::from_variant(Variant::Bytes(
                bytes.into(),
            ))))
        }
        ValueTag::Var | ValueTag::RefVar => resolve_var(vm, payload),
        ValueTag::Label => {
            let hash = u32::from_ne_bytes(payload.get(..4).ok_or_else(fail)?.try_into().unwrap());
            let id = i32::from_ne_bytes(payload.get(4..8).ok_or_else(fail)?.try_into().unwrap());
            let cmd = resolve_label(vm, hash, id);
            Ok(Register::temp(Var::from_variant(Variant::Label {
                hash,
                cmd,
            })))
        }
    }
}

/// Labels resolve by table index when the hash still matches (same
/// program), by hash otherwise, and to -1 when undefined.
fn resolve_label(vm: &Vm, hash: u32, id: i32) -> i32 {
    let Some(prog) = vm.program() else {
        return -1;
    };
    if id >= 0 {
        if let Some(label) = prog.labels.get(id as usize)
            && label.name_hash == hash
            && label.cmd_index != LABEL_UNRESOLVED
        {
            return label.cmd_index;
        }
    }
    match prog.label_by_hash(hash) {
        Some(label) if label.cmd_index != LABEL_UNRESOLVED => label.cmd_index,
        _ => -1,
    }
}

/// Walk a variable-reference chain to a register with write-back
/// metadata.
fn resolve_var(vm: &mut Vm, chain: &[u8]) -> Result<Register, RuntimeError> {
    let mut cursor = CalcCursor::new(chain);
    let mut var = vm.globals().clone();
    let mut parent: Option<Var> = None;
    let mut hash = 0u32;
    let mut first = true;

    loop {
        match cursor.next_var_op()? {
            VarOp::End => break,
            VarOp::Hash => {
                let (h, name) = cursor.read_hash_ref()?;
                parent = Some(var.clone());
                hash = h;
                let mut found = None;
                if first {
                    // Local overlay shadows globals for the leading
                    // segment only.
                    if let Some(root) = vm.state.root.as_array()
                        && let Some(v) = root.get(h)
                    {
                        parent = Some(vm.state.root.clone());
                        found = Some(v);
                    }
                }
                var = match found {
                    Some(v) => v,
                    None => get_or_create(parent.as_ref().unwrap(), name, h),
                };
                first = false;
            }
            VarOp::Calc => {
                let sub = cursor.read_sub_blob()?;
                let name = calc_to_string(vm, sub)?;
                let h = name_hash(&name);
                parent = Some(var.clone());
                hash = h;
                var = get_or_create(parent.as_ref().unwrap(), &name, h);
                first = false;
            }
            VarOp::Add => {
                parent = Some(var.clone());
                let fresh = Var::new();
                let arr = parent.as_ref().unwrap().array_for_write();
                let (h, _) = arr.insert_auto(fresh.clone());
                hash = h;
                var = fresh;
                first = false;
            }
        }
    }

    Ok(Register {
        var,
        parent,
        hash,
        is_temp: false,
    })
}

/// Fetch an array slot, vivifying the parent and the slot on miss.
/// Descending into a shared array copies it first, so writes through the
/// resolved var never leak into other aliases.
fn get_or_create(parent: &Var, name: &str, hash: u32) -> Var {
    let arr = parent.array_for_write();
    if let Some(var) = arr.get(hash) {
        return var;
    }
    let var = Var::new();
    arr.insert(hash, name, var.clone());
    var
}
