//! Integration tests for fixed-point inference.
//!
//! Each test builds a foreign tree, transforms it, runs `infer_all` with the
//! standard host table (or a test double) and checks the recorded types.

use std::cell::Cell;

use kiln_ast::foreign::build::*;
use kiln_ast::{transform, Ast, ForeignNode, NodeId};
use kiln_common::{DispatchKind, MethodSignature, TypeRef};
use kiln_typeck::diagnostics::render_diagnostic;
use kiln_typeck::resolve::Supertypes;
use kiln_typeck::{
    infer_all, HostReflection, HostTypes, InferOptions, InferStats, InferenceError,
};

// ── Helpers ────────────────────────────────────────────────────────────

fn build(stmts: Vec<ForeignNode>) -> Ast {
    transform(&root(stmts), "test.rb").expect("transform failed")
}

fn check_with(
    stmts: Vec<ForeignNode>,
    host: &dyn HostReflection,
    options: &InferOptions,
) -> (Ast, Result<InferStats, InferenceError>) {
    let mut ast = build(stmts);
    let result = infer_all(&mut ast, host, options);
    (ast, result)
}

/// Infer in strict mode with the standard host; inference must succeed.
fn check_ok(stmts: Vec<ForeignNode>) -> Ast {
    let host = HostTypes::standard();
    let (ast, result) = check_with(stmts, &host, &InferOptions::default());
    if let Err(err) = result {
        panic!("inference failed: {}\n{}", err, ast.dump());
    }
    ast
}

fn check_err(stmts: Vec<ForeignNode>) -> InferenceError {
    let host = HostTypes::standard();
    let (ast, result) = check_with(stmts, &host, &InferOptions::default());
    match result {
        Err(err) => err,
        Ok(_) => panic!("expected an inference error:\n{}", ast.dump()),
    }
}

fn find_all(ast: &Ast, description: &str) -> Vec<NodeId> {
    ast.ids()
        .filter(|&id| ast.describe(id) == description)
        .collect()
}

fn find(ast: &Ast, description: &str) -> NodeId {
    *find_all(ast, description)
        .first()
        .unwrap_or_else(|| panic!("no node `{}` in\n{}", description, ast.dump()))
}

fn type_of(ast: &Ast, description: &str) -> String {
    let id = find(ast, description);
    ast.inferred_type(id)
        .map(|t| t.to_string())
        .unwrap_or_else(|| "<none>".to_string())
}

/// Forwards to the standard host table, counting overload lookups.
struct CountingHost {
    inner: HostTypes,
    lookups: Cell<usize>,
}

impl Supertypes for CountingHost {
    fn supertypes(&self, ty: &TypeRef) -> Vec<TypeRef> {
        self.inner.supertypes(ty)
    }
}

impl HostReflection for CountingHost {
    fn lookup_type(&self, name: &str) -> Option<TypeRef> {
        self.inner.lookup_type(name)
    }

    fn find_method(
        &self,
        target: &TypeRef,
        name: &str,
        args: &[TypeRef],
        want_static: bool,
    ) -> Option<MethodSignature> {
        self.lookups.set(self.lookups.get() + 1);
        self.inner.find_method(target, name, args, want_static)
    }
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

// ── Literals and locals ────────────────────────────────────────────────

#[test]
fn literals_have_builtin_types() {
    let ast = check_ok(vec![
        int(1),
        int(5_000_000_000),
        float(2.5),
        string("s"),
        boolean(true),
    ]);
    assert_eq!(type_of(&ast, "Integer 1"), "int");
    assert_eq!(type_of(&ast, "Integer 5000000000"), "long");
    assert_eq!(type_of(&ast, "Float 2.5"), "float");
    assert_eq!(type_of(&ast, "String \"s\""), "string");
    assert_eq!(type_of(&ast, "Boolean true"), "boolean");
}

#[test]
fn local_assigned_once_read_twice() {
    let ast = check_ok(vec![
        assign("x", int(1)),
        op(local("x"), "+", local("x")),
    ]);
    let reads = find_all(&ast, "Local x");
    assert_eq!(reads.len(), 2);
    for read in reads {
        assert_eq!(ast.inferred_type(read), Some(&TypeRef::int()));
    }
    assert_eq!(type_of(&ast, "Call +"), "int");
}

#[test]
fn incompatible_reassignment_is_an_error() {
    let err = check_err(vec![
        assign("x", int(1)),
        line(2, assign("x", string("one"))),
    ]);
    match err {
        InferenceError::IncompatibleAssignment {
            name,
            bound,
            found,
            position,
        } => {
            assert_eq!(name, "x");
            assert_eq!(bound, TypeRef::int());
            assert_eq!(found, TypeRef::string());
            assert_eq!(position.line, 2);
        }
        other => panic!("expected IncompatibleAssignment, got {:?}", other),
    }
}

#[test]
fn widening_reassignment_keeps_the_first_binding() {
    let ast = check_ok(vec![
        assign("x", int(5_000_000_000)),
        assign("x", int(1)),
    ]);
    for id in find_all(&ast, "LocalAssignment x") {
        assert_eq!(ast.inferred_type(id), Some(&TypeRef::long()));
    }
}

#[test]
fn declaration_binds_without_a_value() {
    let ast = check_ok(vec![
        assign("total", constant("long")),
        assign("total", int(3)),
        local("total"),
    ]);
    assert_eq!(type_of(&ast, "LocalDeclaration total"), "long");
    assert_eq!(type_of(&ast, "Local total"), "long");
}

#[test]
fn first_assignment_in_source_order_binds_the_local() {
    // `wide` is learned after the first assignment is first visited.
    let ast = check_ok(vec![
        line(1, assign("x", fcall("wide", vec![]))),
        line(2, assign("x", int(1))),
        line(
            3,
            defn(
                "wide",
                &[],
                vec![signature(&[("return", "long")]), int(5_000_000_000)],
            ),
        ),
    ]);
    let assignments = find_all(&ast, "LocalAssignment x");
    assert_eq!(assignments.len(), 2);
    for id in assignments {
        assert_eq!(ast.inferred_type(id), Some(&TypeRef::long()));
    }
}

#[test]
fn later_assignment_is_checked_against_a_deferred_first_one() {
    let err = check_err(vec![
        line(1, assign("x", fcall("wide", vec![]))),
        line(2, assign("x", string("one"))),
        line(
            3,
            defn(
                "wide",
                &[],
                vec![signature(&[("return", "long")]), int(5_000_000_000)],
            ),
        ),
    ]);
    match err {
        InferenceError::IncompatibleAssignment {
            bound,
            found,
            position,
            ..
        } => {
            assert_eq!(bound, TypeRef::long());
            assert_eq!(found, TypeRef::string());
            assert_eq!(position.line, 2);
        }
        other => panic!("expected IncompatibleAssignment, got {:?}", other),
    }
}

#[test]
fn unresolved_first_assignment_holds_back_later_ones() {
    let host = HostTypes::standard();
    let (ast, result) = check_with(
        vec![
            line(1, assign("x", fcall("missing", vec![]))),
            line(2, assign("x", int(1))),
        ],
        &host,
        &InferOptions { strict: false },
    );
    assert!(result.unwrap().remaining > 0);
    for id in find_all(&ast, "LocalAssignment x") {
        assert_eq!(ast.inferred_type(id), None);
    }
}

// ── Fixed point ────────────────────────────────────────────────────────

#[test]
fn forward_reference_resolves_on_a_later_sweep() {
    let host = HostTypes::standard();
    let (ast, result) = check_with(
        vec![if_else(
            boolean(true),
            vec![puts(local("b"))],
            Some(vec![assign("b", int(1))]),
        )],
        &host,
        &InferOptions::default(),
    );
    let stats = result.unwrap();
    assert!(stats.initial_deferred > 0);
    assert!(stats.sweeps >= 1 && stats.sweeps <= stats.initial_deferred + 1);
    assert_eq!(stats.remaining, 0);
    assert_eq!(type_of(&ast, "Local b"), "int");
    assert_eq!(type_of(&ast, "If"), "void");
}

#[test]
fn mutual_cycle_is_reported_in_strict_mode() {
    let err = check_err(vec![
        line(1, assign("a", local("b"))),
        line(2, assign("b", local("a"))),
    ]);
    let unresolved = err.unresolved();
    let local_a = unresolved
        .iter()
        .find(|n| n.description == "Local a")
        .expect("Local a listed");
    let local_b = unresolved
        .iter()
        .find(|n| n.description == "Local b")
        .expect("Local b listed");
    assert_eq!(local_a.parent.as_deref(), Some("LocalAssignment b"));
    assert_eq!(local_b.parent.as_deref(), Some("LocalAssignment a"));
    assert_eq!(local_a.reason.as_deref(), Some("local `a` has no known type"));
}

#[test]
fn mutual_cycle_terminates_within_the_bound_in_lenient_mode() {
    let host = HostTypes::standard();
    let (ast, result) = check_with(
        vec![assign("a", local("b")), assign("b", local("a"))],
        &host,
        &InferOptions { strict: false },
    );
    let stats = result.unwrap();
    assert!(stats.sweeps <= stats.initial_deferred + 1);
    assert_eq!(stats.sweeps, 1, "a sweep without progress stops the driver");
    assert!(stats.remaining >= 2);
    assert_eq!(ast.inferred_type(find(&ast, "Local a")), None);
}

#[test]
fn inference_is_deterministic() {
    let tree = || {
        vec![
            max_method(),
            assign("m", fcall("max", vec![int(3), int(7)])),
            if_else(
                op(local("m"), "<", int(10)),
                vec![puts(local("m"))],
                None,
            ),
            assign("s", call(constant("Math"), "sqrt", vec![float(2.0)])),
        ]
    };
    let first = check_ok(tree());
    let second = check_ok(tree());
    assert_eq!(first.dump(), second.dump());
    for id in first.ids() {
        assert_eq!(first.inferred_type(id), second.inferred_type(id));
    }
}

// ── Calls and overloads ────────────────────────────────────────────────

#[test]
fn overload_cache_skips_repeated_host_lookups() {
    let host = CountingHost {
        inner: HostTypes::standard(),
        lookups: Cell::new(0),
    };
    let (ast, result) = check_with(
        vec![
            assign("x", call(constant("Math"), "max", vec![int(1), int(2)])),
            assign("y", call(constant("Math"), "max", vec![int(3), int(4)])),
        ],
        &host,
        &InferOptions::default(),
    );
    result.unwrap();
    assert_eq!(host.lookups.get(), 1);

    let calls = find_all(&ast, "Call max");
    assert_eq!(calls.len(), 2);
    let targets: Vec<_> = calls.iter().map(|&c| ast[c].call_target().cloned()).collect();
    assert_eq!(targets[0], targets[1]);
    assert_eq!(ast.inferred_type(calls[0]), Some(&TypeRef::int()));
    assert_eq!(ast.inferred_type(calls[1]), Some(&TypeRef::int()));
}

#[test]
fn widening_picks_the_narrowest_overload() {
    let ast = check_ok(vec![call(
        constant("Math"),
        "max",
        vec![int(1), int(5_000_000_000)],
    )]);
    let call = find(&ast, "Call max");
    let target = ast[call].call_target().unwrap();
    assert_eq!(target.params, vec![TypeRef::long(), TypeRef::long()]);
    assert_eq!(ast.inferred_type(call), Some(&TypeRef::long()));
}

#[test]
fn comparisons_are_boolean() {
    let ast = check_ok(vec![assign("c", op(float(1.0), "<=", float(2.0)))]);
    assert_eq!(type_of(&ast, "LocalAssignment c"), "boolean");
}

#[test]
fn method_with_declared_signature() {
    let ast = check_ok(vec![max_method(), fcall("max", vec![int(3), int(7)])]);
    assert_eq!(type_of(&ast, "MethodDefinition max"), "int");
    assert_eq!(type_of(&ast, "FunctionalCall max"), "int");
    assert_eq!(type_of(&ast, "Call >"), "boolean");
    let call = find(&ast, "FunctionalCall max");
    let target = ast[call].call_target().unwrap();
    assert_eq!(target.to_string(), "test.max(int, int): int");
    assert_eq!(target.dispatch, DispatchKind::Static);
}

#[test]
fn recursion_needs_a_declared_return_type() {
    let fib = |with_return: bool| {
        let mut entries = vec![("n", "int")];
        if with_return {
            entries.push(("return", "int"));
        }
        defn(
            "fib",
            &["n"],
            vec![
                signature(&entries),
                if_else(
                    op(local("n"), "<", int(2)),
                    vec![local("n")],
                    Some(vec![op(
                        fcall("fib", vec![op(local("n"), "-", int(1))]),
                        "+",
                        fcall("fib", vec![op(local("n"), "-", int(2))]),
                    )]),
                ),
            ],
        )
    };

    let ast = check_ok(vec![fib(true)]);
    assert_eq!(type_of(&ast, "MethodDefinition fib"), "int");

    let err = check_err(vec![fib(false)]);
    assert!(err
        .unresolved()
        .iter()
        .any(|n| n.description == "FunctionalCall fib"));
}

#[test]
fn imports_alias_host_classes() {
    let ast = check_ok(vec![
        import("java.util.ArrayList"),
        assign("list", call(constant("ArrayList"), "new", vec![])),
        call(local("list"), "add", vec![string("a")]),
        assign("n", call(local("list"), "size", vec![])),
    ]);
    assert_eq!(type_of(&ast, "LocalAssignment list"), "java.util.ArrayList");
    assert_eq!(type_of(&ast, "Call add"), "boolean");
    assert_eq!(type_of(&ast, "LocalAssignment n"), "int");

    let size = find(&ast, "Call size");
    assert_eq!(
        ast[size].call_target().unwrap().dispatch,
        DispatchKind::Interface
    );
    let new = find(&ast, "Call new");
    assert_eq!(
        ast[new].call_target().unwrap().dispatch,
        DispatchKind::Constructor
    );
}

#[test]
fn script_classes_fields_and_instance_methods() {
    let ast = check_ok(vec![
        class(
            "Counter",
            None,
            vec![
                defn(
                    "bump",
                    &[],
                    vec![
                        signature(&[("return", "int")]),
                        iassign("@count", op(ivar("@count"), "+", int(1))),
                    ],
                ),
                defn("reset", &[], vec![iassign("@count", int(0))]),
            ],
        ),
        assign("c", call(constant("Counter"), "new", vec![])),
        call(local("c"), "reset", vec![]),
        call(local("c"), "bump", vec![]),
    ]);
    assert_eq!(type_of(&ast, "Field @count"), "int");
    assert_eq!(type_of(&ast, "LocalAssignment c"), "Counter");
    assert_eq!(type_of(&ast, "Call bump"), "int");
    let bump = find(&ast, "Call bump");
    assert_eq!(ast[bump].call_target().unwrap().dispatch, DispatchKind::Virtual);
}

#[test]
fn arrays_support_length_and_indexing() {
    let ast = check_ok(vec![defn(
        "first",
        &["xs"],
        vec![
            signature(&[("xs", "int[]"), ("return", "int")]),
            if_else(
                op(call(local("xs"), "length", vec![]), ">", int(0)),
                vec![call(local("xs"), "[]", vec![int(0)])],
                Some(vec![int(-1)]),
            ),
        ],
    )]);
    assert_eq!(type_of(&ast, "Local xs"), "int[]");
    assert_eq!(type_of(&ast, "Call length"), "int");
    assert_eq!(type_of(&ast, "Call []"), "int");
}

// ── Errors ─────────────────────────────────────────────────────────────

#[test]
fn declared_return_must_accept_the_body() {
    let err = check_err(vec![defn(
        "name",
        &[],
        vec![signature(&[("return", "int")]), string("kiln")],
    )]);
    match err {
        InferenceError::ReturnTypeMismatch {
            method,
            declared,
            found,
            ..
        } => {
            assert_eq!(method, "name");
            assert_eq!(declared, TypeRef::int());
            assert_eq!(found, TypeRef::string());
        }
        other => panic!("expected ReturnTypeMismatch, got {:?}", other),
    }
}

#[test]
fn branches_must_agree() {
    let err = check_err(vec![if_else(
        boolean(true),
        vec![int(1)],
        Some(vec![string("one")]),
    )]);
    assert!(matches!(err, InferenceError::BranchTypeMismatch { .. }));

    let ast = check_ok(vec![if_else(
        boolean(true),
        vec![int(1)],
        Some(vec![puts(int(2))]),
    )]);
    assert_eq!(type_of(&ast, "If"), "void");
}

#[test]
fn lenient_mode_leaves_unknown_nodes_untyped() {
    let host = HostTypes::standard();
    let (ast, result) = check_with(
        vec![puts(local("missing"))],
        &host,
        &InferOptions { strict: false },
    );
    let stats = result.unwrap();
    assert!(stats.remaining > 0);
    assert_eq!(type_of(&ast, "Local missing"), "<none>");
}

/// Ariadne pads arrow rows with spaces; snapshots keep only the text.
fn trim_lines(rendered: &str) -> String {
    rendered.lines().map(|l| format!("{}\n", l.trim_end())).collect()
}

#[test]
fn incompatible_assignment_diagnostic() {
    let src = "x = 1\nx = \"one\"\n";
    let err = check_err(vec![
        line(1, assign("x", int(1))),
        line(2, assign("x", string("one"))),
    ]);
    insta::assert_snapshot!(trim_lines(&render_diagnostic(&err, src, "test.rb")), @r#"
    [E0102] Error: cannot assign string to `x`, which is already int
       ╭─[ <unknown>:2:1 ]
       │
     2 │ x = "one"
       │ ────┬────
       │     ╰────── `x` is int, found string
       │
       │ Help: assign a value of type int or use a new variable
    ───╯
    "#);
}

#[test]
fn unresolved_diagnostic_names_the_reason() {
    let src = "puts missing\n";
    let err = check_err(vec![line(1, puts(local("missing")))]);
    let rendered = render_diagnostic(&err, src, "test.rb");
    assert!(rendered.contains("E0101"), "{}", rendered);
    assert!(rendered.contains("local `missing` has no known type"), "{}", rendered);
}
