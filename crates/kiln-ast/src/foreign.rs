//! The foreign parse tree.
//!
//! This is the input boundary of the compiler. An external front end parses
//! source text and hands over a tree of these nodes, typically as JSON:
//!
//! ```json
//! { "kind": "Call", "position": { "line": 3 },
//!   "receiver": { "kind": "LocalVar", "name": "a" },
//!   "name": "+",
//!   "args": [ { "kind": "Fixnum", "value": 1 } ] }
//! ```
//!
//! The vocabulary is the front end's, not ours: it includes kinds that the
//! transform rejects (`Nil`, `Array`, `Yield`, ...).

use serde::{Deserialize, Serialize};

use kiln_common::Position;

/// A node of the foreign parse tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignNode {
    #[serde(default)]
    pub position: Position,
    #[serde(flatten)]
    pub kind: ForeignKind,
}

/// One `key => value` entry of a hash literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignPair {
    pub key: ForeignNode,
    pub value: ForeignNode,
}

fn default_true() -> bool {
    true
}

/// Foreign node kinds, tagged by `kind` in serialised form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ForeignKind {
    Root {
        body: Option<Box<ForeignNode>>,
    },
    Block {
        #[serde(default)]
        children: Vec<ForeignNode>,
    },
    /// Marks the start of a source line; wraps the statement on that line.
    Newline {
        next: Box<ForeignNode>,
    },
    Begin {
        body: Box<ForeignNode>,
    },
    Class {
        name: String,
        superclass: Option<Box<ForeignNode>>,
        body: Option<Box<ForeignNode>>,
    },
    Defn {
        name: String,
        args: Box<ForeignNode>,
        body: Option<Box<ForeignNode>>,
    },
    /// A singleton method definition: `def self.name`.
    Defs {
        receiver: Box<ForeignNode>,
        name: String,
        args: Box<ForeignNode>,
        body: Option<Box<ForeignNode>>,
    },
    Args {
        #[serde(default)]
        required: Vec<ForeignNode>,
        #[serde(default)]
        optional: Vec<ForeignNode>,
        rest: Option<String>,
        block: Option<String>,
    },
    Argument {
        name: String,
    },
    LocalAsgn {
        name: String,
        value: Box<ForeignNode>,
    },
    LocalVar {
        name: String,
    },
    InstAsgn {
        name: String,
        value: Box<ForeignNode>,
    },
    InstVar {
        name: String,
    },
    Fixnum {
        value: i64,
    },
    Float {
        value: f64,
    },
    Str {
        value: String,
    },
    True,
    False,
    #[serde(rename = "Self")]
    SelfRef,
    Call {
        receiver: Box<ForeignNode>,
        name: String,
        #[serde(default)]
        args: Vec<ForeignNode>,
    },
    FCall {
        name: String,
        #[serde(default)]
        args: Vec<ForeignNode>,
    },
    VCall {
        name: String,
    },
    Const {
        name: String,
    },
    If {
        condition: Box<ForeignNode>,
        then_body: Option<Box<ForeignNode>>,
        else_body: Option<Box<ForeignNode>>,
    },
    While {
        condition: Box<ForeignNode>,
        body: Option<Box<ForeignNode>>,
        #[serde(default = "default_true")]
        check_first: bool,
    },
    Until {
        condition: Box<ForeignNode>,
        body: Option<Box<ForeignNode>>,
        #[serde(default = "default_true")]
        check_first: bool,
    },
    Return {
        value: Option<Box<ForeignNode>>,
    },
    Not {
        value: Box<ForeignNode>,
    },
    Hash {
        #[serde(default)]
        pairs: Vec<ForeignPair>,
    },
    Symbol {
        name: String,
    },
    // ── Outside the supported subset ─────────────────────────────────
    Nil,
    Array {
        #[serde(default)]
        elements: Vec<ForeignNode>,
    },
    Yield {
        #[serde(default)]
        args: Vec<ForeignNode>,
    },
    Iter {
        body: Option<Box<ForeignNode>>,
    },
    Dot {
        begin: Box<ForeignNode>,
        end: Box<ForeignNode>,
        #[serde(default)]
        exclusive: bool,
    },
    OpAsgn {
        name: String,
        operator: String,
        value: Box<ForeignNode>,
    },
    Module {
        name: String,
        body: Option<Box<ForeignNode>>,
    },
    Splat {
        value: Box<ForeignNode>,
    },
}

impl ForeignKind {
    /// The kind name as it appears in serialised trees.
    pub fn name(&self) -> &'static str {
        match self {
            ForeignKind::Root { .. } => "Root",
            ForeignKind::Block { .. } => "Block",
            ForeignKind::Newline { .. } => "Newline",
            ForeignKind::Begin { .. } => "Begin",
            ForeignKind::Class { .. } => "Class",
            ForeignKind::Defn { .. } => "Defn",
            ForeignKind::Defs { .. } => "Defs",
            ForeignKind::Args { .. } => "Args",
            ForeignKind::Argument { .. } => "Argument",
            ForeignKind::LocalAsgn { .. } => "LocalAsgn",
            ForeignKind::LocalVar { .. } => "LocalVar",
            ForeignKind::InstAsgn { .. } => "InstAsgn",
            ForeignKind::InstVar { .. } => "InstVar",
            ForeignKind::Fixnum { .. } => "Fixnum",
            ForeignKind::Float { .. } => "Float",
            ForeignKind::Str { .. } => "Str",
            ForeignKind::True => "True",
            ForeignKind::False => "False",
            ForeignKind::SelfRef => "Self",
            ForeignKind::Call { .. } => "Call",
            ForeignKind::FCall { .. } => "FCall",
            ForeignKind::VCall { .. } => "VCall",
            ForeignKind::Const { .. } => "Const",
            ForeignKind::If { .. } => "If",
            ForeignKind::While { .. } => "While",
            ForeignKind::Until { .. } => "Until",
            ForeignKind::Return { .. } => "Return",
            ForeignKind::Not { .. } => "Not",
            ForeignKind::Hash { .. } => "Hash",
            ForeignKind::Symbol { .. } => "Symbol",
            ForeignKind::Nil => "Nil",
            ForeignKind::Array { .. } => "Array",
            ForeignKind::Yield { .. } => "Yield",
            ForeignKind::Iter { .. } => "Iter",
            ForeignKind::Dot { .. } => "Dot",
            ForeignKind::OpAsgn { .. } => "OpAsgn",
            ForeignKind::Module { .. } => "Module",
            ForeignKind::Splat { .. } => "Splat",
        }
    }
}

impl ForeignNode {
    pub fn new(kind: ForeignKind) -> Self {
        ForeignNode {
            position: Position::default(),
            kind,
        }
    }

    /// Attach a source line to this node.
    pub fn at(mut self, line: u32) -> Self {
        self.position.line = line;
        self
    }

    /// Strip `Newline` and `Begin` wrappers.
    pub fn unwrapped(&self) -> &ForeignNode {
        match &self.kind {
            ForeignKind::Newline { next } => next.unwrapped(),
            ForeignKind::Begin { body } => body.unwrapped(),
            _ => self,
        }
    }
}

/// Terse constructors for foreign trees, for tests and embedders that
/// build trees programmatically instead of deserialising them.
pub mod build {
    use super::{ForeignKind, ForeignNode, ForeignPair};

    fn node(kind: ForeignKind) -> ForeignNode {
        ForeignNode::new(kind)
    }

    fn boxed(kind: ForeignKind) -> Box<ForeignNode> {
        Box::new(node(kind))
    }

    fn body_of(stmts: Vec<ForeignNode>) -> Option<Box<ForeignNode>> {
        if stmts.is_empty() {
            None
        } else {
            Some(boxed(ForeignKind::Block { children: stmts }))
        }
    }

    pub fn root(stmts: Vec<ForeignNode>) -> ForeignNode {
        node(ForeignKind::Root {
            body: body_of(stmts),
        })
    }

    pub fn block(stmts: Vec<ForeignNode>) -> ForeignNode {
        node(ForeignKind::Block { children: stmts })
    }

    /// Wrap a statement in a line marker.
    pub fn line(line: u32, stmt: ForeignNode) -> ForeignNode {
        node(ForeignKind::Newline {
            next: Box::new(stmt),
        })
        .at(line)
    }

    pub fn int(value: i64) -> ForeignNode {
        node(ForeignKind::Fixnum { value })
    }

    pub fn float(value: f64) -> ForeignNode {
        node(ForeignKind::Float { value })
    }

    pub fn string(value: &str) -> ForeignNode {
        node(ForeignKind::Str {
            value: value.to_string(),
        })
    }

    pub fn boolean(value: bool) -> ForeignNode {
        if value {
            node(ForeignKind::True)
        } else {
            node(ForeignKind::False)
        }
    }

    pub fn self_ref() -> ForeignNode {
        node(ForeignKind::SelfRef)
    }

    pub fn local(name: &str) -> ForeignNode {
        node(ForeignKind::LocalVar {
            name: name.to_string(),
        })
    }

    pub fn assign(name: &str, value: ForeignNode) -> ForeignNode {
        node(ForeignKind::LocalAsgn {
            name: name.to_string(),
            value: Box::new(value),
        })
    }

    pub fn ivar(name: &str) -> ForeignNode {
        node(ForeignKind::InstVar {
            name: name.to_string(),
        })
    }

    pub fn iassign(name: &str, value: ForeignNode) -> ForeignNode {
        node(ForeignKind::InstAsgn {
            name: name.to_string(),
            value: Box::new(value),
        })
    }

    pub fn constant(name: &str) -> ForeignNode {
        node(ForeignKind::Const {
            name: name.to_string(),
        })
    }

    pub fn call(receiver: ForeignNode, name: &str, args: Vec<ForeignNode>) -> ForeignNode {
        node(ForeignKind::Call {
            receiver: Box::new(receiver),
            name: name.to_string(),
            args,
        })
    }

    /// Binary operator call: `lhs op rhs`.
    pub fn op(lhs: ForeignNode, op: &str, rhs: ForeignNode) -> ForeignNode {
        call(lhs, op, vec![rhs])
    }

    pub fn fcall(name: &str, args: Vec<ForeignNode>) -> ForeignNode {
        node(ForeignKind::FCall {
            name: name.to_string(),
            args,
        })
    }

    pub fn vcall(name: &str) -> ForeignNode {
        node(ForeignKind::VCall {
            name: name.to_string(),
        })
    }

    pub fn puts(value: ForeignNode) -> ForeignNode {
        fcall("puts", vec![value])
    }

    pub fn import(path: &str) -> ForeignNode {
        fcall("import", vec![string(path)])
    }

    pub fn not(value: ForeignNode) -> ForeignNode {
        node(ForeignKind::Not {
            value: Box::new(value),
        })
    }

    pub fn if_else(
        condition: ForeignNode,
        then_body: Vec<ForeignNode>,
        else_body: Option<Vec<ForeignNode>>,
    ) -> ForeignNode {
        node(ForeignKind::If {
            condition: Box::new(condition),
            then_body: body_of(then_body),
            else_body: else_body.map(|stmts| Box::new(block(stmts))),
        })
    }

    pub fn while_loop(condition: ForeignNode, body: Vec<ForeignNode>, check_first: bool) -> ForeignNode {
        node(ForeignKind::While {
            condition: Box::new(condition),
            body: body_of(body),
            check_first,
        })
    }

    pub fn until_loop(condition: ForeignNode, body: Vec<ForeignNode>, check_first: bool) -> ForeignNode {
        node(ForeignKind::Until {
            condition: Box::new(condition),
            body: body_of(body),
            check_first,
        })
    }

    pub fn ret(value: Option<ForeignNode>) -> ForeignNode {
        node(ForeignKind::Return {
            value: value.map(Box::new),
        })
    }

    pub fn args(names: &[&str]) -> ForeignNode {
        node(ForeignKind::Args {
            required: names
                .iter()
                .map(|n| {
                    node(ForeignKind::Argument {
                        name: n.to_string(),
                    })
                })
                .collect(),
            optional: Vec::new(),
            rest: None,
            block: None,
        })
    }

    /// A `{:name => :type, ...}` declaration hash.
    pub fn signature(entries: &[(&str, &str)]) -> ForeignNode {
        node(ForeignKind::Hash {
            pairs: entries
                .iter()
                .map(|(k, v)| ForeignPair {
                    key: node(ForeignKind::Symbol {
                        name: k.to_string(),
                    }),
                    value: node(ForeignKind::Symbol {
                        name: v.to_string(),
                    }),
                })
                .collect(),
        })
    }

    pub fn defn(name: &str, arg_names: &[&str], body: Vec<ForeignNode>) -> ForeignNode {
        node(ForeignKind::Defn {
            name: name.to_string(),
            args: Box::new(args(arg_names)),
            body: body_of(body),
        })
    }

    pub fn defs(name: &str, arg_names: &[&str], body: Vec<ForeignNode>) -> ForeignNode {
        node(ForeignKind::Defs {
            receiver: Box::new(self_ref()),
            name: name.to_string(),
            args: Box::new(args(arg_names)),
            body: body_of(body),
        })
    }

    pub fn class(name: &str, superclass: Option<&str>, body: Vec<ForeignNode>) -> ForeignNode {
        node(ForeignKind::Class {
            name: name.to_string(),
            superclass: superclass.map(|s| Box::new(constant(s))),
            body: body_of(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_call_from_json() {
        let json = r#"{
            "kind": "Call",
            "position": { "line": 3, "start": 10, "end": 15 },
            "receiver": { "kind": "LocalVar", "name": "a" },
            "name": "+",
            "args": [ { "kind": "Fixnum", "value": 1 } ]
        }"#;
        let node: ForeignNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.position.line, 3);
        match node.kind {
            ForeignKind::Call { receiver, name, args } => {
                assert_eq!(name, "+");
                assert_eq!(receiver.kind, ForeignKind::LocalVar { name: "a".into() });
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn unit_kinds_and_defaults() {
        let node: ForeignNode = serde_json::from_str(r#"{ "kind": "Self" }"#).unwrap();
        assert_eq!(node.kind, ForeignKind::SelfRef);
        assert_eq!(node.position, Position::default());

        let node: ForeignNode =
            serde_json::from_str(r#"{ "kind": "While", "condition": { "kind": "True" } }"#).unwrap();
        match node.kind {
            ForeignKind::While { check_first, body, .. } => {
                assert!(check_first);
                assert!(body.is_none());
            }
            other => panic!("expected While, got {:?}", other),
        }
    }

    #[test]
    fn unwrapped_strips_line_markers() {
        let wrapped = build::line(2, build::int(5));
        assert_eq!(wrapped.unwrapped().kind, ForeignKind::Fixnum { value: 5 });
        assert_eq!(wrapped.kind.name(), "Newline");
    }
}
