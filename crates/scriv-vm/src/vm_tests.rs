//! Script-level tests driving the full compile + execute pipeline.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use scriv_core::name_hash;

use crate::vm::{Flow, Outcome, Vm};

#[derive(Clone, Default)]
pub(crate) struct SharedOut(Rc<RefCell<Vec<u8>>>);

impl SharedOut {
    pub(crate) fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("output is UTF-8")
    }
}

impl Write for SharedOut {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub(crate) fn vm_with_output() -> (Vm, SharedOut) {
    let out = SharedOut::default();
    let mut vm = Vm::new();
    vm.set_output(out.clone());
    (vm, out)
}

fn run_script(src: &str) -> String {
    let (mut vm, out) = vm_with_output();
    vm.load_source(src).expect("compiles");
    let outcome = vm.run().expect("runs");
    assert_eq!(outcome, Outcome::Exited);
    out.text()
}

#[test]
fn if_else_branches() {
    assert_eq!(run_script("[if 1][ch A][else][ch B][endif]"), "A");
    assert_eq!(run_script("[if 0][ch A][else][ch B][endif]"), "B");
}

#[test]
fn elseif_chain_takes_first_match() {
    let src = "[if 0][ch A][elseif 1][ch B][elseif 1][ch C][else][ch D][endif]";
    assert_eq!(run_script(src), "B");
}

#[test]
fn while_loop_counts() {
    let src = "[let $i = 0][while $i < 3][ch $i][let $i = $i + 1][endwhile]";
    assert_eq!(run_script(src), "012");
}

#[test]
fn dowhile_runs_body_first() {
    let src = "[let $i = 0][do][let $i = $i + 1][dowhile $i < 3][ch $i]";
    assert_eq!(run_script(src), "3");
}

#[test]
fn break_leaves_the_loop() {
    let src = "[let $i = 0][while 1][let $i = $i + 1][if $i > 2][break][endif][endwhile][ch $i]";
    assert_eq!(run_script(src), "3");
}

#[test]
fn continue_skips_to_the_next_iteration() {
    let src = "[let $i = 0][let $s = \"\"][while $i < 5][let $i = $i + 1]\
               [if $i % 2][continue][endif][let $s = $s . $i][endwhile][ch $s]";
    assert_eq!(run_script(src), "24");
}

#[test]
fn foreach_iterates_in_insertion_order() {
    let src = "[let $a[] = \"x\"][let $a[] = \"y\"][let $a[] = \"z\"]\
               [foreach from: $a, item: $v][ch $v][endforeach]";
    assert_eq!(run_script(src), "xyz");
}

#[test]
fn foreach_with_key_binds_names() {
    let src = "[let $a[one] = 1][let $a[two] = 2]\
               [foreach from: $a, item: $v, key: $k][ch $k][ch $v][endforeach]";
    assert_eq!(run_script(src), "one1two2");
}

#[test]
fn macro_binds_locals_and_does_not_leak() {
    let src = "[macro name: \"greet\", params: \"x\"][ch $x][endmacro][greet x: 5][ch $x]";
    assert_eq!(run_script(src), "5");
}

#[test]
fn macro_positional_argument() {
    let src = "[macro name: \"twice\", params: \"n\"][ch $n][ch $n][endmacro][twice 7]";
    assert_eq!(run_script(src), "77");
}

#[test]
fn macro_return_value_through_set() {
    let src = "[macro name: \"three\"][return 3][endmacro][set $r][three][ch $r]";
    assert_eq!(run_script(src), "3");
}

#[test]
fn nested_macro_calls_restore_caller_locals() {
    let src = "[macro name: \"inner\", params: \"x\"][ch $x][endmacro]\
               [macro name: \"outer\", params: \"x\"][inner x: 2][ch $x][endmacro]\
               [outer x: 1]";
    assert_eq!(run_script(src), "21");
}

#[test]
fn gosub_and_return() {
    let src = "[gosub *sub][ch B][exit]*sub[ch A][return]";
    assert_eq!(run_script(src), "AB");
}

#[test]
fn goto_label_loops() {
    let src = "[let $n = 0]*top[let $n = $n + 1][ch $n][if $n < 3][goto *top][endif][ch E]";
    assert_eq!(run_script(src), "123E");
}

#[test]
fn goto_undefined_label_is_fatal() {
    let (mut vm, _out) = vm_with_output();
    vm.load_source("[goto *missing]").unwrap();
    assert!(matches!(vm.run(), Err(crate::RuntimeError::BadJump(-1))));
}

#[test]
fn const_assignment_is_fatal_after_lock() {
    let (mut vm, _out) = vm_with_output();
    vm.load_source("[let $x = 1][const $x][let $x = 2]").unwrap();
    assert!(matches!(
        vm.run(),
        Err(crate::RuntimeError::ConstAssignment)
    ));
    // The first assignment stuck; the faulting one did not.
    let x = vm
        .globals_var()
        .as_array()
        .unwrap()
        .get(name_hash("x"))
        .unwrap();
    assert_eq!(x.as_int(), 1);
}

#[test]
fn copy_on_write_isolates_aliased_arrays() {
    let src = "[let $a[x] = 1][let $b = $a][let $b[y] = 2]\
               [set $n][count var: $b][ch $n][set $m][count var: $a][ch $m]";
    assert_eq!(run_script(src), "21");
}

#[test]
fn unset_removes_an_entry() {
    let src = "[let $a[x] = 1][unset $a[x]][set $c][count var: $a][ch $c]";
    assert_eq!(run_script(src), "0");
}

#[test]
fn type_predicates_deliver_through_set() {
    assert_eq!(run_script("[set $p][isnull $q][ch $p]"), "1");
    assert_eq!(run_script("[let $q = 1][set $p][isnull $q][ch $p]"), "0");
    assert_eq!(run_script("[let $q = 1][set $p][isint $q][ch $p]"), "1");
    assert_eq!(run_script("[let $q = \"s\"][set $p][isstring $q][ch $p]"), "1");
}

#[test]
fn stream_captures_output_into_a_var() {
    let src = "[set $s][stream][ch abc][r][ch d][endstream][ch $s]";
    assert_eq!(run_script(src), "abc\nd");
}

#[test]
fn stream_to_array_collects_slots() {
    let src = "[set $s][stream toarray: 1][ch a][ch b][endstream]\
               [set $n][count var: $s][ch $n]";
    assert_eq!(run_script(src), "2");
}

#[test]
fn substr_and_strlen() {
    let src = "[set $x][substr \"hello\", 1, 3][ch $x][set $y][strlen src: \"abc\"][ch $y]";
    assert_eq!(run_script(src), "ell3");
}

#[test]
fn strtok_splits_into_an_array() {
    let src = "[set $t][strtok src: \"a,b,,c\", delimiter: \",\"]\
               [foreach from: $t, item: $v][ch $v][endforeach]";
    assert_eq!(run_script(src), "abc");
}

#[test]
fn literal_block_emits_raw_text() {
    let src = "[literal]\nhi [$x]\n[endliteral]";
    assert_eq!(run_script(src), "hi [$x]");
}

#[test]
fn newlines_in_templates_print() {
    assert_eq!(run_script("A\nB"), "A\nB");
}

#[test]
fn compiled_blob_roundtrips_through_the_vm() {
    let (mut vm, out) = vm_with_output();
    let compiled = vm.compile_only("[ch A][ch B]").unwrap();
    let blob = compiled.program.encode();
    vm.load_program_blob(&blob).unwrap();
    vm.run().unwrap();
    assert_eq!(out.text(), "AB");
}

#[test]
fn native_tags_receive_arguments_and_stop() {
    let (mut vm, out) = vm_with_output();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    vm.register("note", Some("value"), move |vm| {
        log.borrow_mut().push(vm.get_integer(0));
        Ok(Flow::Next)
    })
    .unwrap();
    vm.register("pause", None, |vm| {
        vm.state.next += 1;
        Ok(Flow::Stop)
    })
    .unwrap();

    vm.load_source("[note 1 + 2][pause][note 10][ch done]").unwrap();
    assert_eq!(vm.run().unwrap(), Outcome::Stopped);
    assert_eq!(*seen.borrow(), vec![3]);
    assert_eq!(vm.run().unwrap(), Outcome::Exited);
    assert_eq!(*seen.borrow(), vec![3, 10]);
    assert_eq!(out.text(), "done");
}

#[test]
fn host_compile_handlers_rewrite_commands() {
    let (mut vm, out) = vm_with_output();
    let sig = vm
        .register("banner", Some("value"), |vm| {
            let value = vm.arg_var(0);
            vm.emit(&value)?;
            Ok(Flow::Next)
        })
        .unwrap();
    // The handler rebuilds the command with a decorated argument.
    vm.set_compile_handler(sig, move |c| {
        let text = c.arg_string(0)?;
        c.erase_cmd();
        c.start_cmd(sig);
        c.push_string_arg(&format!("<{text}>"));
        Ok(())
    });

    vm.load_source("[banner hello]").unwrap();
    vm.run().unwrap();
    assert_eq!(out.text(), "<hello>");
}

#[test]
fn host_report_hook_sees_soft_errors() {
    let (mut vm, _out) = vm_with_output();
    let reports = Rc::new(RefCell::new(Vec::new()));
    let sink = reports.clone();
    vm.set_report(move |msg| sink.borrow_mut().push(msg.to_owned()));
    // Missing data file degrades to a no-op with a report.
    vm.load_source("[set $x][file file: \"no-such-file\"][ch ok]")
        .unwrap();
    vm.run().unwrap();
    assert_eq!(reports.borrow().len(), 1);
}

#[test]
fn include_splices_at_compile_time() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("inc.scr"), "B").unwrap();
    let (mut vm, out) = vm_with_output();
    vm.set_base_dir(dir.path());
    vm.load_source("A[include \"inc.scr\"]C").unwrap();
    vm.run().unwrap();
    assert_eq!(out.text(), "ABC");
}

#[test]
fn gosub_file_returns_across_programs() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.scr"), "[gosub file: \"sub.scr\"][ch B]").unwrap();
    std::fs::write(dir.path().join("sub.scr"), "[ch A][return]").unwrap();
    let (mut vm, out) = vm_with_output();
    vm.set_base_dir(dir.path());
    vm.load_source_file("main.scr").unwrap();
    vm.run().unwrap();
    assert_eq!(out.text(), "AB");
}

#[test]
fn goto_file_resolves_entry_label_in_target() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.scr"), "[goto file: \"sub.scr\", label: *entry]")
        .unwrap();
    std::fs::write(dir.path().join("sub.scr"), "[ch N]*entry[ch Y]").unwrap();
    let (mut vm, out) = vm_with_output();
    vm.set_base_dir(dir.path());
    vm.load_source_file("main.scr").unwrap();
    vm.run().unwrap();
    assert_eq!(out.text(), "Y");
}

#[test]
fn writevar_readvar_roundtrip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (mut vm, out) = vm_with_output();
    vm.set_base_dir(dir.path());
    let src = "[let $a[k] = \"v\"][writevar file: \"vars.bin\", var: $a]\
               [set $b][readvar file: \"vars.bin\"][ch $b[k]]";
    vm.load_source(src).unwrap();
    vm.run().unwrap();
    assert_eq!(out.text(), "v");
}

#[test]
fn emit_goes_through_active_stream_redirection() {
    let src = "[set $s][stream][marker][endstream][ch $s]";
    let (mut vm, out) = vm_with_output();
    vm.register("marker", None, |vm| {
        let v = crate::Var::from_variant(crate::Variant::Str("M".into()));
        vm.emit(&v)?;
        Ok(Flow::Next)
    })
    .unwrap();
    vm.load_source(src).unwrap();
    vm.run().unwrap();
    assert_eq!(out.text(), "M");
}
