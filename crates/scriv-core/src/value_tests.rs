//! Tests for the value model: coercions, aliasing, copy-on-write.

use crate::hash::name_hash;
use crate::value::{Var, Variant, fmt_real, int_prefix, real_prefix};

#[test]
fn prefix_parses_like_atoi() {
    assert_eq!(int_prefix("42"), 42);
    assert_eq!(int_prefix("  -7xyz"), -7);
    assert_eq!(int_prefix("abc"), 0);
    assert_eq!(int_prefix(""), 0);
    assert_eq!(int_prefix("12.9"), 12);
}

#[test]
fn prefix_parses_like_atof() {
    assert_eq!(real_prefix("1.5"), 1.5);
    assert_eq!(real_prefix("-2.25rest"), -2.25);
    assert_eq!(real_prefix("x1"), 0.0);
    assert_eq!(real_prefix("3e2"), 300.0);
}

#[test]
fn variant_coercions() {
    assert_eq!(Variant::Null.as_int(), 0);
    assert_eq!(&*Variant::Null.as_string(), "");
    assert_eq!(Variant::Real(2.9).as_int(), 2);
    assert_eq!(&*Variant::Int(12).as_string(), "12");
    assert_eq!(&*Variant::Real(1.5).as_string(), fmt_real(1.5));
    assert_eq!(Variant::Str("31x".into()).as_int(), 31);
}

#[test]
fn var_cells_alias() {
    let a = Var::new();
    let b = a.clone();
    a.set_int(9);
    assert_eq!(b.as_int(), 9);
    assert!(a.ptr_eq(&b));
}

#[test]
fn const_lock_cleared_by_store() {
    let v = Var::new();
    v.lock_const();
    assert!(v.is_const());
    v.set_int(1);
    assert!(!v.is_const());
}

#[test]
fn array_assignment_aliases_until_write() {
    let a = Var::new();
    let arr = a.array_for_write();
    let x = Var::from_variant(Variant::Int(1));
    arr.insert(name_hash("x"), "x", x);
    drop(arr);

    let b = Var::new();
    b.copy_from(&a);
    // Same underlying array object until a structural write.
    let before = b.array_for_write();
    before.insert(name_hash("y"), "y", Var::from_variant(Variant::Int(2)));
    drop(before);

    // b got its own copy; a is untouched and still reachable.
    assert_eq!(a.count(), 1);
    assert_eq!(b.count(), 2);
    let ax = a.as_array().unwrap().get(name_hash("x")).unwrap();
    assert_eq!(ax.as_int(), 1);
}

#[test]
fn copy_on_write_keeps_shared_element_values() {
    let a = Var::new();
    a.array_for_write()
        .insert(name_hash("x"), "x", Var::from_variant(Variant::Int(5)));

    let b = Var::new();
    b.copy_from(&a);
    let bx = b.array_for_write().get(name_hash("x")).unwrap();
    bx.set_int(99);

    let ax = a.as_array().unwrap().get(name_hash("x")).unwrap();
    assert_eq!(ax.as_int(), 5, "mutating b's copy must not touch a");
    assert_eq!(bx.as_int(), 99);
}

#[test]
fn auto_index_advances_past_numeric_names() {
    let v = Var::new();
    let arr = v.array_for_write();
    let (_, first) = arr.insert_auto(Var::new());
    assert_eq!(&*first, "0");
    arr.insert(name_hash("5"), "5", Var::new());
    let (_, next) = arr.insert_auto(Var::new());
    assert_eq!(&*next, "6");
}

#[test]
fn nested_arrays_stay_aliased_one_level_down() {
    let a = Var::new();
    let inner = Var::new();
    inner
        .array_for_write()
        .insert(name_hash("k"), "k", Var::from_variant(Variant::Int(3)));
    a.array_for_write().insert(name_hash("in"), "in", inner);

    let b = Var::new();
    b.copy_from(&a);
    // Structural write to b copies the top level only.
    b.array_for_write().insert(name_hash("z"), "z", Var::new());

    let a_in = a.as_array().unwrap().get(name_hash("in")).unwrap();
    let b_in = b.as_array().unwrap().get(name_hash("in")).unwrap();
    assert_eq!(a_in.count(), 1);
    assert_eq!(b_in.count(), 1);
}
