//! Tests for the serialized-Var format.

use scriv_core::{Var, Variant, name_hash};

use crate::vario::{read_var, write_var};

fn roundtrip(var: &Var) -> Var {
    let mut blob = Vec::new();
    write_var(&mut blob, var);
    let (back, used) = read_var(&blob).unwrap();
    assert_eq!(used, blob.len(), "every byte consumed");
    back
}

#[test]
fn primitives_roundtrip() {
    assert!(roundtrip(&Var::new()).is_null());

    let v = Var::from_variant(Variant::Int(-42));
    assert_eq!(roundtrip(&v).as_int(), -42);

    let v = Var::from_variant(Variant::Real(2.5));
    assert_eq!(roundtrip(&v).as_real(), 2.5);

    let v = Var::from_variant(Variant::Str("hello".into()));
    assert_eq!(&*roundtrip(&v).as_string(), "hello");
}

#[test]
fn arrays_preserve_order_and_nesting() {
    let root = Var::new();
    let arr = root.array_for_write();
    arr.insert(name_hash("b"), "b", Var::from_variant(Variant::Int(1)));
    arr.insert(name_hash("a"), "a", Var::from_variant(Variant::Int(2)));

    let nested = Var::new();
    nested
        .array_for_write()
        .insert(name_hash("x"), "x", Var::from_variant(Variant::Str("y".into())));
    arr.insert(name_hash("n"), "n", nested);
    drop(arr);

    let back = roundtrip(&root);
    let arr = back.as_array().unwrap();
    assert_eq!(arr.len(), 3);

    // Insertion order preserved: b, a, n.
    let (name0, var0) = arr.entry_at(0).unwrap();
    assert_eq!(&*name0, "b");
    assert_eq!(var0.as_int(), 1);
    let (name2, var2) = arr.entry_at(2).unwrap();
    assert_eq!(&*name2, "n");
    let inner = var2.as_array().unwrap().get(name_hash("x")).unwrap();
    assert_eq!(&*inner.as_string(), "y");
}

#[test]
fn empty_string_roundtrips() {
    let v = Var::from_variant(Variant::Str("".into()));
    assert_eq!(&*roundtrip(&v).as_string(), "");
}
