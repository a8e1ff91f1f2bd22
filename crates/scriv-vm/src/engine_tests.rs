//! Calc-engine behavior observed through scripts: variable chains,
//! increment forms, coercions and scope resolution.

use crate::vm::{Outcome, Vm};
use crate::vm_tests::vm_with_output;

fn run_script(src: &str) -> String {
    let (mut vm, out) = vm_with_output();
    vm.load_source(src).expect("compiles");
    assert_eq!(vm.run().expect("runs"), Outcome::Exited);
    out.text()
}

#[test]
fn postfix_increment_yields_old_value() {
    let src = "[let $x = 5][let $y = $x++ + 10][ch $x][ch $y]";
    assert_eq!(run_script(src), "615");
}

#[test]
fn prefix_increment_yields_new_value() {
    let src = "[let $x = 1][let $y = ++$x][ch $x][ch $y]";
    assert_eq!(run_script(src), "22");
}

#[test]
fn compound_assignment_updates_in_place() {
    let src = "[let $x = 3][let $x += 4][ch $x]";
    assert_eq!(run_script(src), "7");
}

#[test]
fn dynamic_array_index_resolves_at_runtime() {
    let src = "[let $k = \"a\"][let $m[$k] = 7][ch $m[a]]";
    assert_eq!(run_script(src), "7");
}

#[test]
fn append_slots_take_numeric_keys() {
    let src = "[let $a[] = 10][let $a[] = 20][ch $a[0]][ch $a[1]]";
    assert_eq!(run_script(src), "1020");
}

#[test]
fn string_concat_and_coercion() {
    assert_eq!(run_script("[let $s = \"a\" . 1 + 2][ch $s]"), "a3");
    assert_eq!(run_script("[ch \"n=\" . 5]"), "n=5");
    // A string operand turns + into concatenation; other arithmetic and
    // bitwise ops coerce through the numeric prefix.
    assert_eq!(run_script("[let $v = \"12abc\"][ch $v + 1]"), "12abc1");
    assert_eq!(run_script("[let $v = \"12abc\"][ch $v * 2]"), "24");
    assert_eq!(run_script("[let $v = \"12abc\"][ch $v & 15]"), "12");
}

#[test]
fn logical_operators_bind_below_comparisons() {
    assert_eq!(run_script("[if 2 > 1 && 3 > 2][ch Y][endif]"), "Y");
    assert_eq!(run_script("[if 1 > 2 || 3 > 2][ch Y][endif]"), "Y");
    assert_eq!(run_script("[if !0][ch Y][endif]"), "Y");
}

#[test]
fn division_by_zero_is_zero() {
    assert_eq!(run_script("[ch 7 / 0]"), "0");
    assert_eq!(run_script("[ch 7 % 0]"), "0");
}

#[test]
fn null_coerces_quietly() {
    assert_eq!(run_script("[ch $undefined]"), "");
    assert_eq!(run_script("[ch $undefined + 3]"), "3");
}

#[test]
fn macro_locals_shadow_globals_for_reads_and_writes() {
    let src = "[let $x = \"global\"]\
               [macro name: \"m\", params: \"x\"][ch $x][let $x = \"local\"][ch $x][endmacro]\
               [m x: \"arg\"][ch $x]";
    assert_eq!(run_script(src), "arglocalglobal");
}

#[test]
fn new_names_inside_macros_are_global() {
    let src = "[macro name: \"m\"][let $fresh = 9][endmacro][m][ch $fresh]";
    assert_eq!(run_script(src), "9");
}

#[test]
fn unset_local_stays_unset_across_nested_calls() {
    // The caller's overlay snapshot is restored verbatim: a local removed
    // before a nested call does not reappear after it.
    let src = "[macro name: \"noop\"][endmacro]\
               [macro name: \"m\", vars: \"a, b\"][let $a = 7][let $b = 2]\
               [unset $b][noop]\
               [set $p][isnull $b][set $q][isnull $a][ch $a][ch $p][ch $q][endmacro][m]";
    assert_eq!(run_script(src), "710");
}

#[test]
fn whole_array_assignment_aliases_until_write() {
    // Reading through the alias sees the same entries; writing isolates.
    let src = "[let $a[k] = 1][let $b = $a][ch $b[k]][let $b[k] = 2][ch $a[k]][ch $b[k]]";
    assert_eq!(run_script(src), "112");
}
