//! Tests for the expression compiler and constant folder.

use scriv_bytecode::calcio::{CalcCursor, count_values};
use scriv_bytecode::{CalcOp, ValueTag};
use scriv_core::{Delimiters, Registry};

use crate::compile::{Compiled, CompileEnv, compile_source};

fn registry() -> Registry {
    let mut reg = Registry::new();
    reg.declare("ch", Some("value")).unwrap();
    reg.declare("r", None).unwrap();
    reg.declare("label", Some("value")).unwrap();
    reg.declare("return", Some("value = null")).unwrap();
    reg.declare("let", Some("value")).unwrap();
    reg.declare("goto", Some("label")).unwrap();
    reg.declare("set", Some("&var")).unwrap();
    reg
}

fn compile(src: &str) -> Result<Compiled, crate::CompileError> {
    let mut reg = registry();
    let mut env = CompileEnv {
        registry: &mut reg,
        delims: Delimiters::default(),
        base_dir: None,
    };
    compile_source(&mut env, src)
}

/// Argument 0 blob of command `cmd`.
fn arg_blob(compiled: &Compiled, cmd: usize) -> &[u8] {
    let p = &compiled.program;
    let slot = p.cmds[cmd].arg_offset as usize;
    let off = p.args[slot].data_offset as usize;
    &p.data[off..]
}

fn ops_of(blob: &[u8]) -> Vec<CalcOp> {
    let mut cursor = CalcCursor::new(blob);
    let mut ops = Vec::new();
    loop {
        let op = cursor.next_op().unwrap();
        ops.push(op);
        match op {
            CalcOp::End => return ops,
            CalcOp::Push => {
                cursor.read_value().unwrap();
            }
            _ => {}
        }
    }
}

fn single_int(blob: &[u8]) -> i32 {
    let mut cursor = CalcCursor::new(blob);
    assert_eq!(cursor.next_op().unwrap(), CalcOp::Push);
    let value = cursor.read_value().unwrap();
    assert_eq!(value.tag, ValueTag::Int);
    assert_eq!(cursor.next_op().unwrap(), CalcOp::End);
    i32::from_ne_bytes(value.payload.try_into().unwrap())
}

#[test]
fn constant_expression_folds_to_one_push() {
    let compiled = compile("[let 2 + 3 * 4]").unwrap();
    let blob = arg_blob(&compiled, 0);
    assert_eq!(count_values(blob).unwrap(), 1, "exactly one push op");
    assert_eq!(single_int(blob), 14);
}

#[test]
fn fold_handles_strings_and_comparisons() {
    let compiled = compile("[let \"ab\" == \"ab\"]").unwrap();
    assert_eq!(single_int(arg_blob(&compiled, 0)), 1);

    let compiled = compile("[let \"a\" . \"b\" . \"c\"]").unwrap();
    let blob = arg_blob(&compiled, 0);
    let mut cursor = CalcCursor::new(blob);
    cursor.next_op().unwrap();
    let value = cursor.read_value().unwrap();
    assert_eq!(value.tag, ValueTag::LitStr);
    assert_eq!(value.text().unwrap(), "abc");
}

#[test]
fn folding_stops_at_variables() {
    let compiled = compile("[let 1 + 2 * $x]").unwrap();
    let blob = arg_blob(&compiled, 0);
    // `2 * $x` cannot fold, but the leading literals stay pushed.
    assert_eq!(count_values(blob).unwrap(), 3);
    let ops = ops_of(blob);
    assert_eq!(
        ops,
        vec![
            CalcOp::Push,
            CalcOp::Push,
            CalcOp::Push,
            CalcOp::Mul,
            CalcOp::Add,
            CalcOp::End
        ]
    );
}

#[test]
fn unary_minus_and_hex_literals() {
    let compiled = compile("[let -5]").unwrap();
    assert_eq!(single_int(arg_blob(&compiled, 0)), -5);

    let compiled = compile("[let 0x1f]").unwrap();
    assert_eq!(single_int(arg_blob(&compiled, 0)), 31);

    // The minus flag binds to the first literal inside the group.
    let compiled = compile("[let -(2 + 3)]").unwrap();
    assert_eq!(single_int(arg_blob(&compiled, 0)), 1);
}

#[test]
fn compound_assignment_desugars() {
    let compiled = compile("[let $x += 2]").unwrap();
    let ops = ops_of(arg_blob(&compiled, 0));
    assert_eq!(
        ops,
        vec![
            CalcOp::Push, // $x (assignment target)
            CalcOp::Push, // $x (re-emitted lhs)
            CalcOp::Push, // 2
            CalcOp::Add,
            CalcOp::Move,
            CalcOp::End
        ]
    );
}

#[test]
fn postfix_increment_is_deferred() {
    let compiled = compile("[let $x++ + 1]").unwrap();
    let ops = ops_of(arg_blob(&compiled, 0));
    assert_eq!(
        ops,
        vec![
            CalcOp::Push, // $x
            CalcOp::Push, // 1
            CalcOp::Add,
            CalcOp::Push, // $x again
            CalcOp::IncBack,
            CalcOp::End
        ]
    );
}

#[test]
fn prefix_increment_precedes_operand() {
    let compiled = compile("[let ++$x]").unwrap();
    let ops = ops_of(arg_blob(&compiled, 0));
    assert_eq!(ops, vec![CalcOp::IncFront, CalcOp::Push, CalcOp::End]);
}

#[test]
fn bare_words_are_string_constants() {
    let compiled = compile("[let hello]").unwrap();
    let blob = arg_blob(&compiled, 0);
    let mut cursor = CalcCursor::new(blob);
    cursor.next_op().unwrap();
    let value = cursor.read_value().unwrap();
    assert_eq!(value.tag, ValueTag::LitStr);
    assert_eq!(value.text().unwrap(), "hello");
}

#[test]
fn null_is_a_null_literal() {
    let compiled = compile("[let null]").unwrap();
    let mut cursor = CalcCursor::new(arg_blob(&compiled, 0));
    cursor.next_op().unwrap();
    assert_eq!(cursor.read_value().unwrap().tag, ValueTag::Null);
}

#[test]
fn string_escapes() {
    let compiled = compile(r#"[let "a\"b\\c"]"#).unwrap();
    let mut cursor = CalcCursor::new(arg_blob(&compiled, 0));
    cursor.next_op().unwrap();
    assert_eq!(cursor.read_value().unwrap().text().unwrap(), "a\"b\\c");
}

#[test]
fn variable_chain_with_constant_index_uses_static_key() {
    let compiled = compile("[let $a[3] = 1]").unwrap();
    let blob = arg_blob(&compiled, 0);
    let mut cursor = CalcCursor::new(blob);
    assert_eq!(cursor.next_op().unwrap(), CalcOp::Push);
    let value = cursor.read_value().unwrap();
    assert_eq!(value.tag, ValueTag::Var);
    // Chain: Hash("a"), Hash("3"), End - the constant index folded to a
    // static key, no nested Calc op.
    let mut chain = CalcCursor::new(value.payload);
    assert_eq!(chain.next_var_op().unwrap(), scriv_bytecode::VarOp::Hash);
    let (hash, name) = chain.read_hash_ref().unwrap();
    assert_eq!(name, "a");
    assert_eq!(hash, scriv_core::name_hash("a"));
    assert_eq!(chain.next_var_op().unwrap(), scriv_bytecode::VarOp::Hash);
    let (_, key) = chain.read_hash_ref().unwrap();
    assert_eq!(key, "3");
    assert_eq!(chain.next_var_op().unwrap(), scriv_bytecode::VarOp::End);
}

#[test]
fn append_slot_requires_assignment() {
    assert!(matches!(
        compile("[let $a[]]"),
        Err(crate::CompileError::AppendNotAssigned { .. })
    ));
    assert!(compile("[let $a[] = 1]").is_ok());
}

#[test]
fn unmatched_parens_are_errors() {
    assert!(matches!(
        compile("[let (1 + 2]"),
        Err(crate::CompileError::UnclosedParen { .. })
    ));
    assert!(matches!(
        compile("[let 1 + 2)]"),
        Err(crate::CompileError::UnmatchedParen { .. })
    ));
}

#[test]
fn reference_marker_rejects_expressions() {
    assert!(matches!(
        compile("[let &(1 + 2)]"),
        Err(crate::CompileError::RefNotPlainVar { .. })
    ));
}

#[test]
fn ref_argument_is_retagged() {
    let compiled = compile("[set $x]").unwrap();
    let mut cursor = CalcCursor::new(arg_blob(&compiled, 0));
    cursor.next_op().unwrap();
    assert_eq!(cursor.read_value().unwrap().tag, ValueTag::RefVar);
}

#[test]
fn parenthesized_grouping_folds() {
    let compiled = compile("[let (2 + 3) * 4]").unwrap();
    assert_eq!(single_int(arg_blob(&compiled, 0)), 20);
}
