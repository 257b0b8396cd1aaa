//! End-to-end code generation tests.
//!
//! Programs are built as foreign trees, transformed, typed with the
//! standard host table and compiled with both backends. Bytecode output
//! is executed with the reference interpreter.

use kiln_ast::foreign::build::*;
use kiln_ast::{transform, Ast, ForeignNode};
use kiln_codegen::bytecode::insn::{Instruction, Opcode};
use kiln_codegen::bytecode::interp::{Interpreter, Value};
use kiln_codegen::bytecode::{ClassFile, ListingAssembler};
use kiln_codegen::{compile, BytecodeBackend, CompileError, CompileErrorKind, TextBackend};
use kiln_common::RuntimeCategory;
use kiln_typeck::{infer_all, HostTypes, InferOptions};

// ── Helpers ────────────────────────────────────────────────────────────

const SCRIPT: &str = "test";

fn typed(stmts: Vec<ForeignNode>, strict: bool) -> Ast {
    let mut ast = transform(&root(stmts), "test.rb").expect("transform failed");
    let host = HostTypes::standard();
    infer_all(&mut ast, &host, &InferOptions { strict }).expect("inference failed");
    ast
}

fn bytecode(stmts: Vec<ForeignNode>) -> Vec<ClassFile> {
    let ast = typed(stmts, true);
    let asm: ListingAssembler = compile(&ast, BytecodeBackend::new()).expect("compile failed");
    asm.into_classes()
}

fn text(stmts: Vec<ForeignNode>) -> String {
    let ast = typed(stmts, true);
    compile(&ast, TextBackend::new()).expect("compile failed")
}

fn compile_err(stmts: Vec<ForeignNode>, strict: bool) -> CompileError {
    let ast = typed(stmts, strict);
    match compile(&ast, BytecodeBackend::new()) {
        Err(err) => err,
        Ok(asm) => panic!("expected a compile error:\n{}", asm.listing()),
    }
}

/// Run the script's `main` and return what it printed.
fn run(stmts: Vec<ForeignNode>) -> String {
    let classes = bytecode(stmts);
    let mut interp = Interpreter::new(&classes);
    interp
        .invoke_static(SCRIPT, "main", vec![Value::Null])
        .expect("main failed");
    interp.output().to_string()
}

fn max_method() -> ForeignNode {
    defn(
        "max",
        &["a", "b"],
        vec![
            signature(&[("a", "int"), ("b", "int"), ("return", "int")]),
            if_else(
                op(local("a"), ">", local("b")),
                vec![ret(Some(local("a")))],
                Some(vec![ret(Some(local("b")))]),
            ),
        ],
    )
}

fn counting_loop(start: i64, check_first: bool) -> Vec<ForeignNode> {
    vec![
        assign("i", int(start)),
        while_loop(
            op(local("i"), "<", int(3)),
            vec![puts(local("i")), assign("i", op(local("i"), "+", int(1)))],
            check_first,
        ),
    ]
}

// ── Methods and returns ────────────────────────────────────────────────

#[test]
fn max_returns_the_larger_argument() {
    let classes = bytecode(vec![max_method()]);
    let mut interp = Interpreter::new(&classes);
    for (a, b) in [(3, 7), (7, 3)] {
        let result = interp
            .invoke_static(SCRIPT, "max", vec![Value::Int(a), Value::Int(b)])
            .unwrap();
        assert_eq!(result, Some(Value::Int(7)));
    }
}

#[test]
fn top_level_methods_are_static_members_of_the_script_class() {
    let classes = bytecode(vec![max_method()]);
    let script = classes.iter().find(|c| c.name == SCRIPT).unwrap();
    let max = script.method("max").unwrap();
    assert!(max.is_static);
    assert_eq!(max.max_locals, 2);
    assert!(script.method("main").unwrap().is_static);
}

#[test]
fn max_compiles_to_a_branch_on_the_negated_comparison() {
    let classes = bytecode(vec![max_method()]);
    let max = classes[0].method("max").unwrap();
    assert!(max
        .instructions()
        .any(|insn| insn.to_string().starts_with("if_icmple")));
    assert!(max
        .instructions()
        .any(|insn| matches!(insn, Instruction::Op(Opcode::IReturn))));
}

// ── Locals ─────────────────────────────────────────────────────────────

#[test]
fn a_local_keeps_one_slot() {
    let classes = bytecode(vec![
        assign("x", int(1)),
        puts(local("x")),
        puts(local("x")),
    ]);
    let main = classes[0].method("main").unwrap();
    let store = Instruction::Store {
        category: RuntimeCategory::NarrowInt,
        slot: 1,
    };
    let load = Instruction::Load {
        category: RuntimeCategory::NarrowInt,
        slot: 1,
    };
    assert_eq!(main.instructions().filter(|i| **i == store).count(), 1);
    assert_eq!(main.instructions().filter(|i| **i == load).count(), 2);
    assert_eq!(main.max_locals, 2);
}

#[test]
fn printing_a_local_twice() {
    let output = run(vec![
        assign("x", int(4)),
        puts(local("x")),
        puts(op(local("x"), "*", local("x"))),
    ]);
    assert_eq!(output, "4\n16\n");
}

#[test]
fn long_shift_takes_an_int_count() {
    let stmts = || vec![puts(op(int(5_000_000_000), ">>", int(1)))];
    assert_eq!(run(stmts()), "2500000000\n");

    let classes = bytecode(stmts());
    let main = classes[0].method("main").unwrap();
    assert!(main
        .instructions()
        .any(|insn| matches!(insn, Instruction::Op(Opcode::LShr))));
    assert!(!main
        .instructions()
        .any(|insn| matches!(insn, Instruction::Op(Opcode::I2L))));
}

// ── Conditionals ───────────────────────────────────────────────────────

fn choose() -> Vec<ForeignNode> {
    vec![
        assign(
            "x",
            if_else(
                op(int(1), "<", int(2)),
                vec![int(10)],
                Some(vec![int(20)]),
            ),
        ),
        puts(local("x")),
    ]
}

#[test]
fn if_as_a_value_runs_the_taken_branch() {
    assert_eq!(run(choose()), "10\n");
}

#[test]
fn if_as_a_value_in_text_assigns_a_temporary() {
    let out = text(choose());
    assert!(out.contains("if (1 < 2) {"), "{}", out);
    assert!(out.contains("t1 = 10;"), "{}", out);
    assert!(out.contains("} else {"), "{}", out);
    assert!(out.contains("t1 = 20;"), "{}", out);
    assert!(out.contains("x = t1;"), "{}", out);
    assert!(out.contains("int t1;"), "{}", out);
    assert!(out.contains("puts(x);"), "{}", out);
}

#[test]
fn text_returns_from_both_branches() {
    let out = text(vec![max_method()]);
    assert!(out.contains("static int max(int a, int b) {"), "{}", out);
    assert!(out.contains("if (a > b) {"), "{}", out);
    assert!(out.contains("return a;"), "{}", out);
    assert!(out.contains("return b;"), "{}", out);
    assert!(!out.contains("t1"), "{}", out);
}

// ── Loops ──────────────────────────────────────────────────────────────

#[test]
fn while_loop_counts() {
    assert_eq!(run(counting_loop(0, true)), "0\n1\n2\n");
}

#[test]
fn while_loop_may_run_zero_times() {
    assert_eq!(run(counting_loop(5, true)), "");
}

#[test]
fn do_while_runs_at_least_once() {
    assert_eq!(run(counting_loop(5, false)), "5\n");
}

#[test]
fn until_loop_negates_its_condition() {
    let output = run(vec![
        assign("i", int(0)),
        until_loop(
            op(local("i"), "==", int(2)),
            vec![puts(local("i")), assign("i", op(local("i"), "+", int(1)))],
            true,
        ),
    ]);
    assert_eq!(output, "0\n1\n");
}

#[test]
fn text_loop_uses_do_while() {
    let out = text(counting_loop(0, true));
    assert!(out.contains("goto L1;"), "{}", out);
    assert!(out.contains("do {"), "{}", out);
    assert!(out.contains("L1: ;"), "{}", out);
    assert!(out.contains("} while (i < 3);"), "{}", out);
    assert!(out.contains("i = i + 1;"), "{}", out);
}

#[test]
fn text_do_while_has_no_entry_jump() {
    let out = text(counting_loop(0, false));
    assert!(!out.contains("goto"), "{}", out);
    assert!(out.contains("} while (i < 3);"), "{}", out);
}

// ── NaN comparisons ────────────────────────────────────────────────────

fn nan() -> ForeignNode {
    assign("x", op(float(0.0), "/", float(0.0)))
}

#[test]
fn while_loop_on_nan_never_enters() {
    let output = run(vec![
        nan(),
        while_loop(
            op(local("x"), "<", float(1.0)),
            vec![puts(string("ran")), assign("x", float(2.0))],
            true,
        ),
    ]);
    assert_eq!(output, "");
}

#[test]
fn until_loop_on_nan_runs_until_the_comparison_holds() {
    let output = run(vec![
        nan(),
        until_loop(
            op(local("x"), "<", float(1.0)),
            vec![puts(string("ran")), assign("x", float(0.5))],
            true,
        ),
    ]);
    assert_eq!(output, "ran\n");
}

#[test]
fn negated_nan_comparison_holds() {
    let output = run(vec![
        nan(),
        if_else(
            not(op(local("x"), "<", float(1.0))),
            vec![puts(string("yes"))],
            Some(vec![puts(string("no"))]),
        ),
        if_else(
            not(op(local("x"), ">=", float(1.0))),
            vec![puts(string("yes"))],
            Some(vec![puts(string("no"))]),
        ),
    ]);
    assert_eq!(output, "yes\nyes\n");
}

#[test]
fn text_negates_float_comparisons_without_flipping_them() {
    let out = text(vec![
        nan(),
        until_loop(
            op(local("x"), "<", float(1.0)),
            vec![assign("x", float(0.5))],
            true,
        ),
    ]);
    assert!(out.contains("} while (!(x < 1.0f));"), "{}", out);
    assert!(!out.contains(">="), "{}", out);
}

#[test]
fn text_flips_integer_comparisons() {
    let out = text(vec![
        assign("i", int(0)),
        until_loop(
            op(local("i"), "==", int(2)),
            vec![assign("i", op(local("i"), "+", int(1)))],
            true,
        ),
    ]);
    assert!(out.contains("} while (i != 2);"), "{}", out);
}

// ── Errors ─────────────────────────────────────────────────────────────

#[test]
fn operator_with_too_many_operands() {
    let err = compile_err(vec![call(int(1), "+", vec![int(2), int(3)])], true);
    assert_eq!(
        err.kind,
        CompileErrorKind::PrimitiveArity {
            op: "+".to_string(),
            expected: 2,
            found: 3,
        }
    );
}

#[test]
fn self_in_a_static_context() {
    let err = compile_err(vec![self_ref()], true);
    assert_eq!(err.kind, CompileErrorKind::StaticContext("self".to_string()));
    assert_eq!(err.to_string(), "self is not available in a static method");
}

#[test]
fn untyped_nodes_fail_in_non_strict_mode() {
    let err = compile_err(vec![fcall("missing", vec![])], false);
    assert!(
        matches!(err.kind, CompileErrorKind::UnresolvedType(_)),
        "{:?}",
        err.kind
    );
}

// ── Snapshots ──────────────────────────────────────────────────────────

#[test]
fn hello_listing() {
    let ast = typed(vec![puts(int(1))], true);
    let asm = compile(&ast, BytecodeBackend::new()).unwrap();
    insta::assert_snapshot!(asm.listing(), @r"
    class test extends object
      static method main(string[]): void [locals=1]
        getstatic java.lang.System.out: java.io.PrintStream
        iconst_1
        invokevirtual java.io.PrintStream.println(int): void
        return
    ");
}

#[test]
fn hello_text() {
    insta::assert_snapshot!(text(vec![puts(int(1))]), @r"
    class test {
        static void main(string[] args) {
            puts(1);
            return;
        }
    }
    ");
}
