//! Tests for calc blob reading and writing.

use crate::calcio::{
    CalcCursor, count_values, is_single_var, set_value_size, set_value_tag, value_size,
    write_op, write_value, write_var_op,
};
use crate::opcode::{CalcOp, ValueTag, VarOp};

fn int_payload(v: i32) -> [u8; 4] {
    v.to_ne_bytes()
}

#[test]
fn roundtrip_push_and_ops() {
    let mut blob = Vec::new();
    write_value(&mut blob, ValueTag::Int, &int_payload(2));
    write_value(&mut blob, ValueTag::Int, &int_payload(3));
    write_op(&mut blob, CalcOp::Add);
    write_op(&mut blob, CalcOp::End);

    let mut cursor = CalcCursor::new(&blob);
    assert_eq!(cursor.next_op().unwrap(), CalcOp::Push);
    let v = cursor.read_value().unwrap();
    assert_eq!(v.tag, ValueTag::Int);
    assert_eq!(v.payload, &int_payload(2));
    assert_eq!(cursor.next_op().unwrap(), CalcOp::Push);
    cursor.read_value().unwrap();
    assert_eq!(cursor.next_op().unwrap(), CalcOp::Add);
    assert_eq!(cursor.next_op().unwrap(), CalcOp::End);

    assert_eq!(count_values(&blob).unwrap(), 2);
}

#[test]
fn string_value_text_strips_nul() {
    let mut blob = Vec::new();
    write_value(&mut blob, ValueTag::LitStr, b"abc\0");
    write_op(&mut blob, CalcOp::End);

    let mut cursor = CalcCursor::new(&blob);
    cursor.next_op().unwrap();
    let v = cursor.read_value().unwrap();
    assert_eq!(v.text().unwrap(), "abc");
}

#[test]
fn value_header_patching() {
    let mut blob = Vec::new();
    let header = write_value(&mut blob, ValueTag::Var, &[]);
    write_var_op(&mut blob, VarOp::End);
    let chain_len = blob.len() - (header + 8);
    set_value_size(&mut blob, header, chain_len as u32);
    set_value_tag(&mut blob, header, ValueTag::RefVar);

    assert_eq!(value_size(&blob, header), 4);
    let mut cursor = CalcCursor::new(&blob);
    cursor.next_op().unwrap();
    let v = cursor.read_value().unwrap();
    assert_eq!(v.tag, ValueTag::RefVar);
}

#[test]
fn single_var_detection() {
    let mut var_blob = Vec::new();
    let header = write_value(&mut var_blob, ValueTag::Var, &[]);
    write_var_op(&mut var_blob, VarOp::End);
    let size = (var_blob.len() - (header + 8)) as u32;
    set_value_size(&mut var_blob, header, size);
    write_op(&mut var_blob, CalcOp::End);
    assert!(is_single_var(&var_blob).unwrap());

    let mut int_blob = Vec::new();
    write_value(&mut int_blob, ValueTag::Int, &int_payload(1));
    write_op(&mut int_blob, CalcOp::End);
    assert!(!is_single_var(&int_blob).unwrap());
}

#[test]
fn truncated_blob_is_an_error() {
    let blob = (CalcOp::Push as u32).to_ne_bytes().to_vec();
    let mut cursor = CalcCursor::new(&blob);
    cursor.next_op().unwrap();
    assert!(cursor.read_value().is_err());
}
