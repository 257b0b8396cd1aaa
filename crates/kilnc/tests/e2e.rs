//! End-to-end tests for the kilnc driver.
//!
//! Each test writes a JSON foreign tree (and optionally its source text)
//! into a temp directory, invokes the `kilnc` binary and checks its
//! stdout, stderr and exit status.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use kiln_ast::foreign::build::*;
use kiln_ast::ForeignNode;

// ── Helpers ────────────────────────────────────────────────────────────

fn kilnc() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kilnc"))
}

/// Write `stmts` as `prog.json` under `dir`.
fn write_tree(dir: &Path, stmts: Vec<ForeignNode>) -> PathBuf {
    let path = dir.join("prog.json");
    let json = serde_json::to_string_pretty(&root(stmts)).expect("serialize tree");
    std::fs::write(&path, json).expect("failed to write tree");
    path
}

fn invoke(args: &[&str]) -> Output {
    Command::new(kilnc())
        .args(args)
        .output()
        .expect("failed to invoke kilnc")
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "kilnc failed:\nstdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_of_failure(output: &Output) -> String {
    assert!(
        !output.status.success(),
        "expected kilnc to fail:\nstdout: {}",
        String::from_utf8_lossy(&output.stdout)
    );
    String::from_utf8_lossy(&output.stderr).to_string()
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

// ── build ──────────────────────────────────────────────────────────────

#[test]
fn build_text_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write_tree(dir.path(), vec![assign("x", int(2)), puts(local("x"))]);
    let out = stdout(&invoke(&["build", tree.to_str().unwrap(), "--backend", "text"]));
    assert!(out.starts_with("class prog {"), "{}", out);
    assert!(out.contains("static void main(string[] args) {"), "{}", out);
    assert!(out.contains("puts(x);"), "{}", out);
}

#[test]
fn build_bytecode_listing_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write_tree(dir.path(), vec![puts(string("hi"))]);
    let listing = dir.path().join("prog.listing");
    stdout(&invoke(&[
        "build",
        tree.to_str().unwrap(),
        "--output",
        listing.to_str().unwrap(),
        "--class-name",
        "Hello",
    ]));
    let text = std::fs::read_to_string(&listing).unwrap();
    assert!(text.starts_with("class Hello extends"), "{}", text);
    assert!(text.contains("ldc \"hi\""), "{}", text);
}

// ── run ────────────────────────────────────────────────────────────────

#[test]
fn run_main_prints_program_output() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write_tree(
        dir.path(),
        vec![
            assign("i", int(0)),
            while_loop(
                op(local("i"), "<", int(3)),
                vec![puts(local("i")), assign("i", op(local("i"), "+", int(1)))],
                true,
            ),
        ],
    );
    let out = stdout(&invoke(&["run", tree.to_str().unwrap()]));
    assert_eq!(out, "0\n1\n2\n");
}

#[test]
fn run_static_method_with_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write_tree(dir.path(), vec![max_method()]);
    let path = tree.to_str().unwrap();
    for args in [["3", "7"], ["7", "3"]] {
        let out = stdout(&invoke(&[
            "run", path, "--method", "max", "--arg", args[0], "--arg", args[1],
        ]));
        assert_eq!(out, "7\n");
    }
}

// ── Errors ─────────────────────────────────────────────────────────────

#[test]
fn compile_error_reports_file_and_line() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write_tree(dir.path(), vec![line(1, puts(int(1))), line(2, self_ref())]);
    let err = stderr_of_failure(&invoke(&["build", tree.to_str().unwrap()]));
    assert!(
        err.contains("prog.json:2: self is not available in a static method"),
        "{}",
        err
    );
}

#[test]
fn source_enables_rendered_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write_tree(dir.path(), vec![line(1, puts(int(1))), line(2, self_ref())]);
    let source = dir.path().join("prog.rb");
    std::fs::write(&source, "puts 1\nself\n").unwrap();
    let err = stderr_of_failure(&invoke(&[
        "build",
        tree.to_str().unwrap(),
        "--source",
        source.to_str().unwrap(),
    ]));
    assert!(err.contains("E0201"), "{}", err);
    assert!(err.contains("self is not available in a static method"), "{}", err);
}

#[test]
fn unresolved_call_fails_inference() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write_tree(dir.path(), vec![line(1, fcall("missing", vec![]))]);
    let err = stderr_of_failure(&invoke(&["build", tree.to_str().unwrap()]));
    assert!(err.contains("prog.json:"), "{}", err);
}

#[test]
fn malformed_tree_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "{ \"kind\": \"Root\", ").unwrap();
    let err = stderr_of_failure(&invoke(&["build", path.to_str().unwrap()]));
    assert!(err.contains("malformed parse tree"), "{}", err);
}
