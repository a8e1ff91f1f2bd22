//! The expression ("calc") compiler.
//!
//! Operator-precedence compilation to postfix bytecode: operands are
//! emitted as they appear, pending operators wait on a side stack, and
//! parenthesis depth adds a large constant to every priority inside it so
//! the priority table stays static. Compound assignment (`+=` and
//! friends) is desugared into `lhs = lhs <op> rhs` by re-emitting the lhs
//! value. Postfix `++`/`--` are deferred to the end of the expression.
//!
//! An expression ends at the right delimiter, at `,`, at `]`, at a bare
//! word following a complete operand, or at end of input.

use scriv_bytecode::calcio::{
    self, CalcCursor, count_values, is_single_var, set_value_size, write_op, write_value,
    write_var_op,
};
use scriv_bytecode::program::{LABEL_UNRESOLVED, Label};
use scriv_bytecode::{CalcOp, ValueTag, VarOp};
use scriv_core::{name_hash, scan};

use crate::compile::Compiler;
use crate::error::CompileError;
use crate::fold;

/// Priority boost per parenthesis level (and per compound assignment).
const PRIO_STEP: i32 = 50;

/// Operator table; base priority is the entry index + 1, longest match
/// wins and ties go to the earlier entry.
const OPERATORS: &[(&str, CalcOp)] = &[
    ("=", CalcOp::Move),
    ("||", CalcOp::Or),
    ("or", CalcOp::Or),
    ("&&", CalcOp::And),
    ("and", CalcOp::And),
    ("|", CalcOp::BitOr),
    ("^", CalcOp::Xor),
    ("&", CalcOp::BitAnd),
    ("==", CalcOp::Eq),
    ("!=", CalcOp::Ne),
    (">=", CalcOp::Ge),
    ("<=", CalcOp::Le),
    (">", CalcOp::Gt),
    ("<", CalcOp::Lt),
    (">>", CalcOp::Shr),
    ("<<", CalcOp::Shl),
    (".", CalcOp::Concat),
    ("-", CalcOp::Sub),
    ("+", CalcOp::Add),
    ("*", CalcOp::Mul),
    ("/", CalcOp::Div),
    ("%", CalcOp::Mod),
    ("!", CalcOp::Not),
    ("~", CalcOp::BitNot),
    ("++", CalcOp::IncFront),
    ("--", CalcOp::DecFront),
];

#[derive(Clone, Copy)]
struct Pending {
    prio: i32,
    op: CalcOp,
}

struct ExprState {
    op_stack: Vec<Pending>,
    /// Deferred postfix increment/decrement ops, appended after the
    /// expression body.
    post_ops: Vec<u8>,
    expect_operand: bool,
    has_minus: bool,
    is_ref: bool,
    paren_depth: u32,
    prio_boost: i32,
    /// Offset of the most recently written value header.
    last_value: Option<usize>,
    /// Start of this expression in the data segment.
    start: usize,
}

/// Compile one expression from `src` into the compiler's data segment,
/// ending with `CalcOp::End`. Returns the unconsumed remainder.
pub(crate) fn compile_expr<'s>(c: &mut Compiler, src: &'s str) -> Result<&'s str, CompileError> {
    let mut st = ExprState {
        op_stack: Vec::new(),
        post_ops: Vec::new(),
        expect_operand: true,
        has_minus: false,
        is_ref: false,
        paren_depth: 0,
        prio_boost: 0,
        last_value: None,
        start: c.data.len(),
    };
    let mut rest = src;

    loop {
        rest = scan::trim_space(rest);
        if rest.is_empty() || rest.starts_with(['\n', '\r']) {
            break;
        }

        if !st.expect_operand {
            if c.delims.is_right(rest) || rest.starts_with([',', ']']) {
                break;
            }
            // A bare word after a complete operand ends the expression,
            // unless it is a word operator handled below.
            let (w, _) = scan::word(rest);
            if !w.is_empty() && w != "or" && w != "and" {
                break;
            }
        } else if let Some(r) = operand(c, &mut st, rest)? {
            rest = r;
            st.expect_operand = false;
            st.has_minus = false;
            st.is_ref = false;
            continue;
        }

        if let Some((op, base, len)) = match_operator(rest) {
            rest = &rest[len..];
            let mut base = base;
            if rest.starts_with('=') {
                // Compound assignment: desugar to `lhs = lhs <op> rhs`.
                if st.expect_operand {
                    return Err(CompileError::Unexpected {
                        line: c.line,
                        what: "=".to_owned(),
                    });
                }
                let Some(header) = st.last_value else {
                    return Err(CompileError::Unexpected {
                        line: c.line,
                        what: "=".to_owned(),
                    });
                };
                rest = &rest[1..];
                let tag_raw =
                    u32::from_ne_bytes(c.data[header..header + 4].try_into().unwrap());
                let size = calcio::value_size(&c.data, header) as usize;
                let payload = c.data[header + 8..header + 8 + size].to_vec();
                let tag = ValueTag::from_u32(tag_raw).expect("value tag written by compiler");

                st.prio_boost += PRIO_STEP;
                push_operator(c, &mut st, CalcOp::Move, 1)?;
                st.expect_operand = false;

                let h = write_value(&mut c.data, tag, &payload);
                st.last_value = Some(h);
                base -= PRIO_STEP;
                st.prio_boost += PRIO_STEP;
            }
            push_operator(c, &mut st, op, base)?;
            if rest.is_empty() {
                break;
            }
            continue;
        }

        if let Some(r) = rest.strip_prefix('(') {
            st.paren_depth += 1;
            st.expect_operand = true;
            st.prio_boost += PRIO_STEP;
            rest = r;
            continue;
        }
        if let Some(r) = rest.strip_prefix(')') {
            if st.paren_depth == 0 {
                return Err(CompileError::UnmatchedParen { line: c.line });
            }
            st.paren_depth -= 1;
            st.prio_boost -= PRIO_STEP;
            rest = r;
            continue;
        }

        if !st.expect_operand {
            return Err(CompileError::MissingOperator { line: c.line });
        }
        st.expect_operand = false;

        if rest.starts_with('"') {
            rest = string_literal(c, &mut st, rest)?;
            st.has_minus = false;
            continue;
        }
        if rest.as_bytes()[0].is_ascii_digit() {
            rest = number_literal(c, &mut st, rest)?;
            st.has_minus = false;
            continue;
        }

        return Err(CompileError::Unexpected {
            line: c.line,
            what: rest.chars().next().unwrap().to_string(),
        });
    }

    if st.expect_operand {
        return Err(CompileError::MissingOperand { line: c.line });
    }
    if st.paren_depth > 0 {
        return Err(CompileError::UnclosedParen { line: c.line });
    }

    while let Some(pending) = st.op_stack.pop() {
        write_op(&mut c.data, pending.op);
    }
    c.data.extend_from_slice(&st.post_ops);
    write_op(&mut c.data, CalcOp::End);

    if st.is_ref {
        let blob = &c.data[st.start..];
        if !is_single_var(blob).map_err(|source| CompileError::Format {
            line: c.line,
            source,
        })? {
            return Err(CompileError::RefNotPlainVar { line: c.line });
        }
    }

    fold::fold(&mut c.data, st.start).map_err(|source| CompileError::Format {
        line: c.line,
        source,
    })?;

    Ok(rest)
}

/// Compile an empty argument (a presence flag) as a push of integer 1.
pub(crate) fn compile_presence(c: &mut Compiler) {
    write_value(&mut c.data, ValueTag::Int, &1i32.to_ne_bytes());
    write_op(&mut c.data, CalcOp::End);
}

/// Longest operator match at the head of `rest`.
fn match_operator(rest: &str) -> Option<(CalcOp, i32, usize)> {
    let mut best: Option<(CalcOp, i32, usize)> = None;
    for (index, (text, op)) in OPERATORS.iter().enumerate() {
        if !rest.starts_with(text) {
            continue;
        }
        if text.bytes().all(|b| b.is_ascii_alphabetic()) {
            // Word operators need a word boundary.
            let next = rest[text.len()..].chars().next();
            if next.is_some_and(|ch| ch.is_alphanumeric() || ch == '_') {
                continue;
            }
        }
        let better = best.is_none_or(|(_, _, len)| text.len() > len);
        if better {
            best = Some((*op, index as i32 + 1, text.len()));
        }
    }
    best
}

fn push_operator(c: &mut Compiler, st: &mut ExprState, op: CalcOp, base: i32) -> Result<(), CompileError> {
    let prio = base + st.prio_boost;

    if st.expect_operand {
        match op {
            CalcOp::Sub => {
                st.has_minus = true;
                return Ok(());
            }
            CalcOp::BitAnd => {
                st.is_ref = true;
                return Ok(());
            }
            CalcOp::Not | CalcOp::BitNot => {}
            CalcOp::IncFront | CalcOp::DecFront => {
                // Prefix form: the op precedes the operand push it targets.
                write_op(&mut c.data, op);
                return Ok(());
            }
            _ => {
                return Err(CompileError::Unexpected {
                    line: c.line,
                    what: format!("{op:?}"),
                });
            }
        }
    } else {
        match op {
            CalcOp::Not | CalcOp::BitNot => {
                return Err(CompileError::Unexpected {
                    line: c.line,
                    what: format!("{op:?}"),
                });
            }
            CalcOp::IncFront | CalcOp::DecFront => {
                // Postfix form: re-push the operand and modify afterwards.
                let Some(header) = st.last_value else {
                    return Err(CompileError::Unexpected {
                        line: c.line,
                        what: format!("{op:?}"),
                    });
                };
                let size = calcio::value_size(&c.data, header) as usize;
                let value = c.data[header..header + 8 + size].to_vec();
                write_op(&mut st.post_ops, CalcOp::Push);
                st.post_ops.extend_from_slice(&value);
                let back = if op == CalcOp::IncFront {
                    CalcOp::IncBack
                } else {
                    CalcOp::DecBack
                };
                write_op(&mut st.post_ops, back);
                return Ok(());
            }
            _ => {}
        }
    }
    st.expect_operand = true;

    while let Some(top) = st.op_stack.last().copied() {
        if prio <= top.prio {
            write_op(&mut c.data, top.op);
            st.op_stack.pop();
        } else {
            break;
        }
    }
    st.op_stack.push(Pending { prio, op });
    Ok(())
}

/// Operand forms dispatched before generic operator/paren handling:
/// `null`, `*label`, `$var`, and bare words as string constants.
fn operand<'s>(
    c: &mut Compiler,
    st: &mut ExprState,
    rest: &'s str,
) -> Result<Option<&'s str>, CompileError> {
    if let Some(r) = rest.strip_prefix('$') {
        let (name, after) = scan::word(r);
        if name.is_empty() {
            return Err(CompileError::Unexpected {
                line: c.line,
                what: "$".to_owned(),
            });
        }
        let tag = if st.is_ref {
            ValueTag::RefVar
        } else {
            ValueTag::Var
        };
        let header = write_value(&mut c.data, tag, &[]);
        st.last_value = Some(header);
        let after = compile_var(c, rest)?;
        let chain = (c.data.len() - (header + 8)) as u32;
        set_value_size(&mut c.data, header, chain);
        if st.has_minus {
            write_value(&mut c.data, ValueTag::Int, &(-1i32).to_ne_bytes());
            write_op(&mut c.data, CalcOp::Mul);
        }
        return Ok(Some(after));
    }

    if let Some(r) = rest.strip_prefix('*') {
        let (name, after) = scan::word(r);
        if name.is_empty() {
            // Plain `*` is the multiply operator; let the caller handle it.
            return Ok(None);
        }
        let id = c.label_id(name);
        let hash = c.labels[id].name_hash;
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&hash.to_ne_bytes());
        payload.extend_from_slice(&(id as i32).to_ne_bytes());
        st.last_value = Some(write_value(&mut c.data, ValueTag::Label, &payload));
        return Ok(Some(after));
    }

    let (w, after) = scan::word(rest);
    if w.is_empty() || w == "or" || w == "and" {
        return Ok(None);
    }
    if w.eq_ignore_ascii_case("null") {
        st.last_value = Some(write_value(&mut c.data, ValueTag::Null, &[]));
        return Ok(Some(after));
    }

    // Bare identifiers are implicit string constants.
    let mut payload = w.as_bytes().to_vec();
    payload.push(0);
    st.last_value = Some(write_value(&mut c.data, ValueTag::LitStr, &payload));
    Ok(Some(after))
}

/// Compile a `$name[...]...` reference chain. `rest` starts at the `$`.
fn compile_var<'s>(c: &mut Compiler, rest: &'s str) -> Result<&'s str, CompileError> {
    let mut rest = &rest[1..];
    let mut append_slot = false;

    let (name, after) = scan::word(rest);
    debug_assert!(!name.is_empty());
    write_hash_ref(c, name);
    rest = after;

    loop {
        rest = scan::trim_space(rest);
        let Some(r) = rest.strip_prefix('[') else {
            break;
        };
        let r = scan::trim_space(r);
        if let Some(r) = r.strip_prefix(']') {
            write_var_op(&mut c.data, VarOp::Add);
            rest = r;
            append_slot = true;
            continue;
        }

        // Dynamic index: a nested calc blob, size-prefixed.
        write_var_op(&mut c.data, VarOp::Calc);
        let size_at = c.data.len();
        c.data.extend_from_slice(&0u32.to_ne_bytes());
        let sub_start = c.data.len();
        let r = compile_expr(c, r)?;
        let Some(r) = scan::trim_space(r).strip_prefix(']') else {
            return Err(CompileError::Unexpected {
                line: c.line,
                what: "[".to_owned(),
            });
        };
        rest = r;
        let sub_size = (c.data.len() - sub_start) as u32;
        c.data[size_at..size_at + 4].copy_from_slice(&sub_size.to_ne_bytes());

        // A constant index folds to a static key.
        if let Some(key) = constant_key(&c.data[sub_start..]) {
            c.data.truncate(size_at - 4);
            write_hash_ref(c, &key);
        }
    }
    write_var_op(&mut c.data, VarOp::End);

    if append_slot {
        // `$a[]` creates a slot, which only makes sense as an assignment
        // target.
        let t = scan::trim_space(rest).as_bytes();
        let assigns = t.first() == Some(&b'=') || t.get(1) == Some(&b'=');
        if !assigns {
            return Err(CompileError::AppendNotAssigned { line: c.line });
        }
    }

    Ok(rest)
}

fn write_hash_ref(c: &mut Compiler, name: &str) {
    write_var_op(&mut c.data, VarOp::Hash);
    c.data.extend_from_slice(&name_hash(name).to_ne_bytes());
    c.data.extend_from_slice(name.as_bytes());
    c.data.push(0);
}

/// When a folded sub-blob is a single non-variable literal, its string
/// form becomes a static key.
fn constant_key(blob: &[u8]) -> Option<String> {
    if count_values(blob).ok()? != 1 {
        return None;
    }
    let mut cursor = CalcCursor::new(blob);
    if cursor.next_op().ok()? != CalcOp::Push {
        return None;
    }
    let value = cursor.read_value().ok()?;
    if cursor.next_op().ok()? != CalcOp::End {
        return None;
    }
    match value.tag {
        ValueTag::Int => {
            let v = i32::from_ne_bytes(value.payload.try_into().ok()?);
            Some(v.to_string())
        }
        ValueTag::Real => {
            let v = f32::from_ne_bytes(value.payload.try_into().ok()?);
            Some(scriv_core::value::fmt_real(v))
        }
        ValueTag::LitStr => value.text().ok().map(str::to_owned),
        _ => None,
    }
}

fn string_literal<'s>(
    c: &mut Compiler,
    st: &mut ExprState,
    rest: &'s str,
) -> Result<&'s str, CompileError> {
    let mut text = Vec::new();
    let mut chars = rest[1..].char_indices();
    loop {
        let Some((at, ch)) = chars.next() else {
            return Err(CompileError::UnterminatedString { line: c.line });
        };
        match ch {
            '"' => {
                text.push(0);
                st.last_value = Some(write_value(&mut c.data, ValueTag::LitStr, &text));
                return Ok(&rest[1 + at + 1..]);
            }
            '\\' => {
                // Only `\"` and `\\` collapse; other escapes stay as-is.
                match chars.clone().next() {
                    Some((_, next @ ('"' | '\\'))) => {
                        text.extend_from_slice(next.to_string().as_bytes());
                        chars.next();
                    }
                    _ => text.push(b'\\'),
                }
            }
            '\n' => return Err(CompileError::UnterminatedString { line: c.line }),
            _ => text.extend_from_slice(ch.to_string().as_bytes()),
        }
    }
}

fn number_literal<'s>(
    c: &mut Compiler,
    st: &mut ExprState,
    rest: &'s str,
) -> Result<&'s str, CompileError> {
    let bytes = rest.as_bytes();

    // Hexadecimal.
    if bytes[0] == b'0' && bytes.get(1) == Some(&b'x') {
        let mut end = 2;
        let mut value: i64 = 0;
        while end < bytes.len() && bytes[end].is_ascii_hexdigit() {
            value = (value << 4) + i64::from((bytes[end] as char).to_digit(16).unwrap());
            end += 1;
        }
        let mut value = value as i32;
        if st.has_minus {
            value = -value;
        }
        st.last_value = Some(write_value(&mut c.data, ValueTag::Int, &value.to_ne_bytes()));
        return Ok(&rest[end..]);
    }

    let mut end = 0;
    let mut is_real = false;
    while end < bytes.len() {
        let b = bytes[end];
        if b.is_ascii_digit() {
            end += 1;
        } else if b == b'.' && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) {
            if is_real {
                return Err(CompileError::Unexpected {
                    line: c.line,
                    what: ".".to_owned(),
                });
            }
            is_real = true;
            end += 1;
        } else {
            break;
        }
    }

    let text = &rest[..end];
    if is_real {
        let mut value: f32 = text.parse().unwrap_or(0.0);
        if st.has_minus {
            value = -value;
        }
        st.last_value = Some(write_value(&mut c.data, ValueTag::Real, &value.to_ne_bytes()));
    } else {
        let mut value = scriv_core::value::int_prefix(text);
        if st.has_minus {
            value = -value;
        }
        st.last_value = Some(write_value(&mut c.data, ValueTag::Int, &value.to_ne_bytes()));
    }
    Ok(&rest[end..])
}

/// Register or look up a label by name, returning its table index.
impl Compiler<'_, '_> {
    pub(crate) fn label_id(&mut self, name: &str) -> usize {
        let hash = name_hash(name);
        if let Some(pos) = self.labels.iter().rposition(|l| l.name_hash == hash) {
            return pos;
        }
        self.labels.push(Label {
            name_hash: hash,
            cmd_index: LABEL_UNRESOLVED,
        });
        self.labels.len() - 1
    }
}
