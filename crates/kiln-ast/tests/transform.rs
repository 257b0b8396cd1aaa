//! Integration tests for the foreign-tree transform.
//!
//! Trees are built either with the `foreign::build` helpers or from JSON,
//! the form external front ends hand over.

use kiln_ast::foreign::build::*;
use kiln_ast::{transform, Ast, ForeignNode, NodeId, NodeKind, TransformError};
use kiln_common::TypeRef;
use serde_json::json;

// ── Helpers ────────────────────────────────────────────────────────────

fn from_json(value: serde_json::Value) -> ForeignNode {
    serde_json::from_value(value).expect("valid foreign tree")
}

/// Transform a tree whose single top-level statement is `stmt` and return
/// the AST plus that statement's id.
fn single(stmt: ForeignNode) -> (Ast, NodeId) {
    let ast = transform(&root(vec![stmt]), "test.rb").expect("transform failed");
    let id = top_level(&ast)[0];
    (ast, id)
}

fn top_level(ast: &Ast) -> Vec<NodeId> {
    let NodeKind::Script { body, .. } = ast.kind(ast.root()) else {
        panic!("root is not a Script");
    };
    match ast.kind(*body) {
        NodeKind::Body { statements } => statements.clone(),
        other => panic!("script body is {:?}", other),
    }
}

fn unsupported(tree: ForeignNode) -> String {
    match transform(&tree, "test.rb") {
        Err(TransformError::UnsupportedSyntax { description, .. }) => description,
        Ok(ast) => panic!("expected UnsupportedSyntax, got:\n{}", ast.dump()),
    }
}

// ── Totality on the supported subset ───────────────────────────────────

#[test]
fn each_supported_kind_maps_to_one_node() {
    let cases: Vec<(ForeignNode, &str, usize)> = vec![
        (int(1), "Integer 1", 0),
        (float(1.5), "Float 1.5", 0),
        (string("hi"), "String \"hi\"", 0),
        (boolean(true), "Boolean true", 0),
        (boolean(false), "Boolean false", 0),
        (local("x"), "Local x", 0),
        (assign("x", int(1)), "LocalAssignment x", 1),
        (assign("x", constant("int")), "LocalDeclaration x", 1),
        (ivar("@count"), "Field @count", 0),
        (iassign("@count", int(0)), "FieldAssignment @count", 1),
        (iassign("@count", constant("long")), "FieldDeclaration @count", 1),
        (self_ref(), "Self", 0),
        (constant("Math"), "TypeReference Math", 0),
        (op(int(1), "+", int(2)), "Call +", 2),
        (call(constant("Math"), "max", vec![int(1), int(2)]), "Call max", 3),
        (fcall("foo", vec![int(1)]), "FunctionalCall foo", 1),
        (vcall("foo"), "FunctionalCall foo", 0),
        (import("java.util.ArrayList"), "Import java.util.ArrayList", 0),
        (not(boolean(true)), "Not", 1),
        (if_else(boolean(true), vec![int(1)], None), "If", 2),
        (if_else(boolean(true), vec![int(1)], Some(vec![int(2)])), "If", 3),
        (while_loop(boolean(true), vec![int(1)], true), "Loop while", 2),
        (until_loop(boolean(true), vec![int(1)], false), "Loop do-until", 2),
        (ret(Some(int(1))), "Return", 1),
        (ret(None), "Return", 0),
        (defn("f", &["a"], vec![local("a")]), "MethodDefinition f", 2),
        (defs("g", &[], vec![]), "StaticMethodDefinition g", 2),
        (class("Point", Some("Base"), vec![]), "ClassDefinition Point < Base", 1),
    ];

    for (tree, expected, children) in cases {
        let (ast, id) = single(tree);
        assert_eq!(ast.describe(id), expected);
        assert_eq!(
            ast.children(id).len(),
            children,
            "child count of `{}`",
            expected
        );
        for child in ast.children(id) {
            assert_eq!(ast.parent(child), Some(id));
        }
    }
}

#[test]
fn json_tree_transforms() {
    let tree = from_json(json!({
        "kind": "Root",
        "body": {
            "kind": "Block",
            "children": [
                { "kind": "Newline", "position": { "line": 1 },
                  "next": { "kind": "LocalAsgn", "name": "a",
                            "value": { "kind": "Fixnum", "value": 4 } } },
                { "kind": "Newline", "position": { "line": 2 },
                  "next": { "kind": "FCall", "name": "puts",
                            "args": [ { "kind": "LocalVar", "name": "a" } ] } }
            ]
        }
    }));
    let ast = transform(&tree, "hello.rb").unwrap();
    insta::assert_snapshot!(ast.dump(), @r#"
    Script hello
      Body
        LocalAssignment a
          Integer 4
        FunctionalCall puts
          Local a
    "#);
    let stmts = top_level(&ast);
    assert_eq!(ast.position(stmts[1]).line, 2);
    assert!(ast.node(stmts[1]).newline);
}

#[test]
fn method_signature_hash_is_lifted() {
    let tree = root(vec![defn(
        "max",
        &["a", "b"],
        vec![
            signature(&[("a", "int"), ("b", "int"), ("return", "int")]),
            if_else(
                op(local("a"), ">", local("b")),
                vec![local("a")],
                Some(vec![local("b")]),
            ),
        ],
    )]);
    let ast = transform(&tree, "max_test.rb").unwrap();
    insta::assert_snapshot!(ast.dump(), @r"
    Script max_test
      Body
        MethodDefinition max
          Arguments
            RequiredArgument a
            RequiredArgument b
          Body
            Noop
            If
              Condition
                Call >
                  Local a
                  Local b
              Body
                Local a
              Body
                Local b
    ");

    let method = top_level(&ast)[0];
    let def = ast.kind(method).method_def().unwrap();
    assert_eq!(def.signature.get("a"), Some(&TypeRef::int()));
    assert_eq!(def.signature.returns, Some(TypeRef::int()));
}

#[test]
fn script_methods_are_static_and_class_methods_are_not() {
    let tree = root(vec![
        defn("top", &[], vec![]),
        class(
            "Point",
            None,
            vec![defn("x", &[], vec![]), defs("origin", &[], vec![])],
        ),
    ]);
    let ast = transform(&tree, "t.rb").unwrap();
    let by_name = |name: &str| {
        ast.ids()
            .find(|&id| ast.kind(id).method_def().is_some_and(|d| d.name == name))
            .unwrap()
    };
    assert!(ast.is_static_method(by_name("top")));
    assert!(!ast.is_static_method(by_name("x")));
    assert!(ast.is_static_method(by_name("origin")));
}

#[test]
fn array_type_constants_keep_array_flag() {
    let (ast, id) = single(assign("xs", constant("int[]")));
    let child = ast.children(id)[0];
    assert_eq!(
        ast.kind(child),
        &NodeKind::TypeReference(TypeRef::array_of("int"))
    );
}

// ── Unsupported syntax ─────────────────────────────────────────────────

#[test]
fn kinds_outside_the_subset_are_rejected() {
    for (kind, json) in [
        ("Nil", json!({ "kind": "Nil" })),
        ("Array", json!({ "kind": "Array", "elements": [] })),
        ("Yield", json!({ "kind": "Yield" })),
        ("Iter", json!({ "kind": "Iter", "body": null })),
        ("Module", json!({ "kind": "Module", "name": "M", "body": null })),
        ("Splat", json!({ "kind": "Splat", "value": { "kind": "LocalVar", "name": "a" } })),
        (
            "OpAsgn",
            json!({ "kind": "OpAsgn", "name": "a", "operator": "+",
                    "value": { "kind": "Fixnum", "value": 1 } }),
        ),
    ] {
        let tree = root(vec![from_json(json)]);
        assert_eq!(unsupported(tree), kind);
    }
}

#[test]
fn hash_outside_signature_position_is_rejected() {
    let tree = root(vec![signature(&[("a", "int")])]);
    assert_eq!(unsupported(tree), "literal hash syntax not yet supported");

    let late = root(vec![defn(
        "f",
        &[],
        vec![int(1), signature(&[("return", "int")])],
    )]);
    assert_eq!(unsupported(late), "literal hash syntax not yet supported");
}

#[test]
fn non_positional_arguments_are_rejected() {
    let tree = from_json(json!({
        "kind": "Root",
        "body": {
            "kind": "Defn", "name": "f",
            "args": { "kind": "Args", "required": [], "rest": "rest" },
            "body": null
        }
    }));
    assert_eq!(unsupported(tree), "rest argument *rest");
}

#[test]
fn unsupported_error_carries_position() {
    let tree = root(vec![line(7, from_json(json!({ "kind": "Nil", "position": { "line": 7 } })))]);
    let err = transform(&tree, "t.rb").unwrap_err();
    assert_eq!(err.position().line, 7);
}

#[test]
fn singleton_method_needs_self_receiver() {
    let tree = from_json(json!({
        "kind": "Root",
        "body": {
            "kind": "Defs", "name": "f",
            "receiver": { "kind": "LocalVar", "name": "o" },
            "args": { "kind": "Args" },
            "body": null
        }
    }));
    assert!(unsupported(tree).contains("LocalVar"));
}
