//! Constant folding over freshly compiled calc bytecode.
//!
//! Executes the postfix stream eagerly as long as every operand seen so
//! far is a pushed literal, then rewrites the folded prefix as literal
//! pushes of the evaluated stack. Folding stops at the first non-literal
//! push (variables, labels, bytes), at increment/decrement ops, and at
//! assignment. `2 + 3 * 4` collapses to a single integer push of 14.

use scriv_bytecode::calcio::{CalcCursor, FormatError, write_value};
use scriv_bytecode::{CalcOp, ValueTag};
use scriv_core::{Variant, arith};

/// Fold the expression occupying `data[start..]` in place.
pub(crate) fn fold(data: &mut Vec<u8>, start: usize) -> Result<(), FormatError> {
    let blob = data[start..].to_vec();
    let mut cursor = CalcCursor::new(&blob);
    let mut stack: Vec<Variant> = Vec::new();
    let mut folded_end = 0;

    loop {
        let before = cursor.pos();
        let op = cursor.next_op()?;
        match op {
            CalcOp::End => {
                folded_end = before;
                break;
            }
            CalcOp::IncFront | CalcOp::IncBack | CalcOp::DecFront | CalcOp::DecBack
            | CalcOp::Move => {
                folded_end = before;
                break;
            }
            CalcOp::Push => {
                let value = cursor.read_value()?;
                if !value.tag.is_foldable_literal() {
                    folded_end = before;
                    break;
                }
                stack.push(literal_variant(value.tag, value.payload)?);
                folded_end = cursor.pos();
            }
            op => {
                if let Some(un) = op.un_op() {
                    let Some(a) = stack.pop() else {
                        folded_end = before;
                        break;
                    };
                    stack.push(arith::unary(un, &a));
                } else if let Some(bin) = op.bin_op() {
                    if stack.len() < 2 {
                        folded_end = before;
                        break;
                    }
                    let b = stack.pop().unwrap();
                    let a = stack.pop().unwrap();
                    stack.push(arith::binary(bin, &a, &b));
                } else {
                    folded_end = before;
                    break;
                }
                folded_end = cursor.pos();
            }
        }
    }

    // Rewrite: literal pushes of the evaluated stack, bottom first, then
    // the unexecuted tail verbatim.
    data.truncate(start);
    for value in &stack {
        match value {
            Variant::Int(v) => {
                write_value(data, ValueTag::Int, &v.to_ne_bytes());
            }
            Variant::Real(v) => {
                write_value(data, ValueTag::Real, &v.to_ne_bytes());
            }
            Variant::Str(s) => {
                let mut payload = s.as_bytes().to_vec();
                payload.push(0);
                write_value(data, ValueTag::LitStr, &payload);
            }
            Variant::Null => {
                write_value(data, ValueTag::Null, &[]);
            }
            _ => unreachable!("only literals are folded"),
        }
    }
    data.extend_from_slice(&blob[folded_end..]);
    Ok(())
}

fn literal_variant(tag: ValueTag, payload: &[u8]) -> Result<Variant, FormatError> {
    Ok(match tag {
        ValueTag::Int => Variant::Int(i32::from_ne_bytes(
            payload.try_into().map_err(|_| FormatError::Truncated(0))?,
        )),
        ValueTag::Real => Variant::Real(f32::from_ne_bytes(
            payload.try_into().map_err(|_| FormatError::Truncated(0))?,
        )),
        ValueTag::LitStr => Variant::Str(nul_text(payload)?.into()),
        _ => unreachable!("checked by is_foldable_literal"),
    })
}

fn nul_text(payload: &[u8]) -> Result<&str, FormatError> {
    let bytes = match payload.split_last() {
        Some((0, rest)) => rest,
        _ => payload,
    };
    std::str::from_utf8(bytes).map_err(|_| FormatError::BadText)
}
