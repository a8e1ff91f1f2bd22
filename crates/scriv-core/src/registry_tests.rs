//! Tests for tag registration and best-effort resolution.

use crate::hash::name_hash;
use crate::registry::{Registry, TagKind};

#[test]
fn resolve_matches_named_arguments() {
    let mut reg = Registry::new();
    let goto_label = reg.declare("goto", Some("label")).unwrap();
    let goto_file = reg.declare("goto", Some("file")).unwrap();

    let tag = reg.resolve("goto", &[name_hash("file")], 0).unwrap();
    assert_eq!(tag.signature, goto_file);

    let tag = reg.resolve("goto", &[name_hash("label")], 0).unwrap();
    assert_eq!(tag.signature, goto_label);

    assert!(reg.resolve("goto", &[name_hash("nope")], 0).is_none());
}

#[test]
fn resolve_prefers_first_registered() {
    let mut reg = Registry::new();
    let three = reg.declare("foreach", Some("&from, &item, &key")).unwrap();
    let two = reg.declare("foreach", Some("&from, &item")).unwrap();
    assert_ne!(three, two);

    // Two positional arguments fit both declarations (key has no default,
    // so only the two-parameter form matches fully)... but with named
    // arguments covering both forms, registration order breaks the tie.
    let named = [name_hash("from"), name_hash("item")];
    let tag = reg.resolve("foreach", &named, 0);
    assert!(tag.is_none(), "key has no default, three-param form rejected");

    let tag = reg.resolve("foreach", &named[..0], 2).unwrap();
    assert_eq!(tag.signature, two, "positional call binds two-param form");
}

#[test]
fn ambiguous_overloads_resolve_to_first_registered() {
    let mut reg = Registry::new();
    let one = reg.declare("t", Some("a = 1")).unwrap();
    let two = reg.declare("t", Some("a = 1, b = 2")).unwrap();
    assert_ne!(one, two);

    // Both overloads satisfy `a:` alone (b has a default); the earlier
    // registration wins the tie.
    let tag = reg.resolve("t", &[name_hash("a")], 0).unwrap();
    assert_eq!(tag.signature, one);
}

#[test]
fn resolve_requires_defaults_for_omitted() {
    let mut reg = Registry::new();
    reg.declare("substr", Some("src, offset = 0, length = 0"))
        .unwrap();

    assert!(reg.resolve("substr", &[], 1).is_some());
    assert!(reg.resolve("substr", &[name_hash("length")], 1).is_some());
    assert!(reg.resolve("substr", &[], 4).is_none());
}

#[test]
fn pair_and_child_relations() {
    let mut reg = Registry::new();
    let w = reg.declare("while", Some("value")).unwrap();
    let ew = reg.declare("endwhile", None).unwrap();
    let br = reg.declare("break", None).unwrap();

    reg.set_pair(w, ew);
    reg.set_child(w, br);

    assert!(reg.get(w).unwrap().opens_pair());
    assert_eq!(reg.get(ew).unwrap().closer_refs, 1);
    assert!(reg.get(br).unwrap().requires_parent);
    assert_eq!(reg.get(w).unwrap().children, vec![br]);
}

#[test]
fn remove_macros_drops_only_macros() {
    let mut reg = Registry::new();
    let stay = reg.declare("ch", Some("value")).unwrap();
    let gone = reg.declare("greet", Some("who")).unwrap();
    reg.get_mut(gone).unwrap().kind = TagKind::Macro;

    let removed = reg.remove_macros();
    assert_eq!(removed, vec![gone]);
    assert!(reg.get(stay).is_some());
    assert!(reg.get(gone).is_none());
}
