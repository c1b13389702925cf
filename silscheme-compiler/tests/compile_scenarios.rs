// SPDX-License-Identifier: GPL-3.0-or-later
// This file is part of silscheme.

use silscheme_compiler::compile_str;

fn il(src: &str) -> Vec<String> {
    compile_str(src).unwrap().code
}

// Ordered subsequence check; other instructions may sit in between.
fn emits_in_order(code: &[String], expected: &[&str]) {
    let mut it = code.iter();
    for want in expected {
        assert!(
            it.any(|l| l == want),
            "missing '{want}' (in order) in:\n{}",
            code.join("\n")
        );
    }
}

#[test]
fn define_with_arithmetic() {
    let code = il("(define x (+ 1 2))");
    emits_in_order(&code, &["push 2", "push 1", "add", "store x"]);
}

#[test]
fn if_lowers_to_branch_and_labels() {
    let code = il("(if #t 1 2)");

    assert_eq!(
        code,
        vec![
            ";; silscheme compiler output",
            "call @&Lambda.main.1",
            "halt",
            "@&Lambda.main.1",
            "push #t",
            "iftrue @IF_TRUE_main.UniqueStrID0",
            "push 2",
            "goto @IF_END_main.UniqueStrID0",
            "@IF_TRUE_main.UniqueStrID0",
            "push 1",
            "@IF_END_main.UniqueStrID0",
            "return",
        ]
    );
}

#[test]
fn immediate_lambda_call() {
    let code = il("((lambda (x) (* x x)) 5)");

    assert_eq!(
        code,
        vec![
            ";; silscheme compiler output",
            "call @&Lambda.main.1",
            "halt",
            "@&Lambda.main.1",
            "pushend main.UniqueStrID0",
            "push 5",
            "pushend main.UniqueStrID0",
            "call @&Lambda.main.3",
            "return",
            "@&Lambda.main.3",
            "store x",
            "pushend main.UniqueStrID1",
            "load x",
            "load x",
            "pushend main.UniqueStrID1",
            "mul",
            "return",
        ]
    );
}

#[test]
fn call_cc_captures_and_invokes_the_thunk() {
    let code = il("(call/cc (lambda (k) (k 42)))");

    assert_eq!(
        code,
        vec![
            ";; silscheme compiler output",
            "call @&Lambda.main.1",
            "halt",
            "@&Lambda.main.1",
            "capturecc CC_&Lambda.main.3_main.UniqueStrID0",
            "load CC_&Lambda.main.3_main.UniqueStrID0",
            "call @&Lambda.main.3",
            "return",
            "@&Lambda.main.3",
            "store k",
            "pushend main.UniqueStrID1",
            "push 42",
            "pushend main.UniqueStrID1",
            "tailcall k",
            "return",
        ]
    );
}

#[test]
fn and_short_circuits_through_the_false_label() {
    let code = il("(and #f (error))");

    assert_eq!(
        code,
        vec![
            ";; silscheme compiler output",
            "call @&Lambda.main.1",
            "halt",
            "@&Lambda.main.1",
            "push #f",
            "iffalse @AND_FALSE_main.UniqueStrID0",
            "pushend main.UniqueStrID1",
            "pushend main.UniqueStrID1",
            "call error",
            "iffalse @AND_FALSE_main.UniqueStrID0",
            "push #t",
            "goto @AND_END_main.UniqueStrID0",
            "@AND_FALSE_main.UniqueStrID0",
            "push #f",
            "@AND_END_main.UniqueStrID0",
            "return",
        ]
    );
}

#[test]
fn or_pushes_the_default_false_result() {
    let code = il("(or #f #t)");
    emits_in_order(
        &code,
        &[
            "push #f",
            "iftrue @OR_TRUE_main.UniqueStrID0",
            "push #t",
            "iftrue @OR_TRUE_main.UniqueStrID0",
            "push #f",
            "goto @OR_END_main.UniqueStrID0",
            "@OR_TRUE_main.UniqueStrID0",
            "push #t",
            "@OR_END_main.UniqueStrID0",
        ],
    );
}

#[test]
fn computed_operator_is_eta_converted() {
    let code = il("((f 1) 2)");

    emits_in_order(
        &code,
        &[
            "goto @COMPLEX_APP_main.UniqueStrID0",
            "@TMP_LAMBDA_main.UniqueStrID0",
            "store TEMP_LAMBDA_PARAM0_main.UniqueStrID0",
            "store TEMP_LAMBDA_PARAM1_main.UniqueStrID0",
            "load TEMP_LAMBDA_PARAM1_main.UniqueStrID0",
            "tailcall TEMP_LAMBDA_PARAM0_main.UniqueStrID0",
            "return",
            "@COMPLEX_APP_main.UniqueStrID0",
            "push 2",
            "pushend main.UniqueStrID1",
            "push 1",
            "pushend main.UniqueStrID1",
            "call f",
            "call @TMP_LAMBDA_main.UniqueStrID0",
        ],
    );
}

#[test]
fn apply_expands_the_list_between_markers() {
    let code = il("(apply f '(1 2))");

    emits_in_order(
        &code,
        &[
            "pushend main.UniqueStrID0",
            "push &Quote.main.3",
            "pushend main.UniqueStrID0",
            "pushlist",
            "call f",
        ],
    );
}

#[test]
fn apply_with_a_primitive_operator() {
    let code = il("(apply + '(1 2))");
    emits_in_order(&code, &["pushlist", "add"]);
}

#[test]
fn cond_chains_branch_labels() {
    let code = il("(cond ((= x 1) 10) (else 20))");

    emits_in_order(
        &code,
        &[
            "@COND_BRANCH_main.UniqueStrID0_1",
            "eq",
            "iffalse @COND_BRANCH_main.UniqueStrID0_2",
            "push 10",
            "goto @COND_END_main.UniqueStrID0",
            "@COND_BRANCH_main.UniqueStrID0_2",
            "push 20",
            "@COND_END_main.UniqueStrID0",
        ],
    );

    // else ends the chain with a single END definition.
    let end_defs = code
        .iter()
        .filter(|l| *l == "@COND_END_main.UniqueStrID0")
        .count();
    assert_eq!(end_defs, 1);
}

#[test]
fn define_of_a_lambda_pushes_its_label() {
    let code = il("(define sq (lambda (x) (* x x)))");
    emits_in_order(&code, &["push @&Lambda.main.3", "store sq"]);
}

#[test]
fn set_rebinds_an_existing_name() {
    let code = il("(define x 1) (set! x 2)");
    emits_in_order(&code, &["push 1", "store x", "push 2", "set x"]);
}

#[test]
fn variadic_parameters_store_the_dot_marker() {
    let code = il("(define f (lambda (a . rest) (display rest)))");
    emits_in_order(&code, &["store a", "store .", "store rest"]);
}

#[test]
fn quote_is_pushed_as_a_handle() {
    let code = il("(define q '(a b))");
    assert!(
        code.iter().any(|l| l.starts_with("push &Quote.main.")),
        "{code:?}"
    );
}

#[test]
fn native_names_are_pushed_not_loaded() {
    let code = il("(native fetch) (define f fetch)");
    emits_in_order(&code, &["push fetch", "store f"]);
    assert!(!code.contains(&"load fetch".to_string()));
}

#[test]
fn import_emits_nothing() {
    let code = il("(import net \"lib/net.scm\") (display 1)");
    assert!(!code.iter().any(|l| l.contains("import")));
    assert!(!code.iter().any(|l| l.contains("net.scm")));
}
