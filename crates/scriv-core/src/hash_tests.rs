//! Tests for signature computation.

use crate::hash::signature_of;
use crate::params::parse_param_spec;

#[test]
fn signature_ignores_declaration_order() {
    let a = parse_param_spec(Some("from, item, key")).unwrap();
    let b = parse_param_spec(Some("key, from, item")).unwrap();
    let c = parse_param_spec(Some("item, key, from")).unwrap();

    let sig = signature_of("foreach", &a);
    assert_eq!(sig, signature_of("foreach", &b));
    assert_eq!(sig, signature_of("foreach", &c));
}

#[test]
fn signature_depends_on_name_and_params() {
    let none = parse_param_spec(None).unwrap();
    let file = parse_param_spec(Some("file")).unwrap();
    let label = parse_param_spec(Some("label")).unwrap();

    let goto_file = signature_of("goto", &file);
    let goto_label = signature_of("goto", &label);
    let gosub_file = signature_of("gosub", &file);

    assert_ne!(goto_file, goto_label);
    assert_ne!(goto_file, gosub_file);
    assert_ne!(signature_of("exit", &none), signature_of("next", &none));
}

#[test]
fn defaults_and_refs_do_not_change_identity() {
    let plain = parse_param_spec(Some("value")).unwrap();
    let defaulted = parse_param_spec(Some("value = null")).unwrap();
    let by_ref = parse_param_spec(Some("&value")).unwrap();

    let sig = signature_of("return", &plain);
    assert_eq!(sig, signature_of("return", &defaulted));
    assert_eq!(sig, signature_of("return", &by_ref));
}
