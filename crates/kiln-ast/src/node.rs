//! The internal AST.
//!
//! Nodes live in a flat arena ([`Ast`]) and refer to each other by
//! [`NodeId`]. Every node records its parent, so scope and diagnostic
//! lookups can walk upwards without the tree owning back-references.
//!
//! The tree shape is fixed once [`crate::transform`] returns: afterwards
//! only the per-node annotations (`inferred_type`, `call_target`) are
//! written, each at most once, by the type checker.

use std::fmt::Write as _;
use std::ops::Index;

use kiln_common::{MethodSignature, Position, TypeRef};

/// Index of a node in its [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An immutable literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

impl Literal {
    /// The built-in type of this literal.
    ///
    /// Integers that do not fit 32 bits are `long`.
    pub fn ty(&self) -> TypeRef {
        match self {
            Literal::Integer(v) if i32::try_from(*v).is_ok() => TypeRef::int(),
            Literal::Integer(_) => TypeRef::long(),
            Literal::Float(_) => TypeRef::float(),
            Literal::String(_) => TypeRef::string(),
            Literal::Boolean(_) => TypeRef::boolean(),
        }
    }
}

/// A method's declared signature map.
///
/// Entries keep declaration order; `returns` holds the `return` entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    pub declared: Vec<(String, TypeRef)>,
    pub returns: Option<TypeRef>,
}

impl Signature {
    /// The declared type of an argument or local, if any.
    pub fn get(&self, name: &str) -> Option<&TypeRef> {
        self.declared
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| ty)
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty() && self.returns.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    pub signature: Signature,
    /// An `Arguments` node.
    pub arguments: NodeId,
    /// A `Body` node.
    pub body: NodeId,
}

/// The node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // ── Structural ──────────────────────────────────────────────────
    Script {
        class_name: String,
        body: NodeId,
    },
    Body {
        statements: Vec<NodeId>,
    },
    ClassDefinition {
        name: String,
        superclass: Option<TypeRef>,
        body: NodeId,
    },

    // ── Declarations and bindings ───────────────────────────────────
    Arguments {
        required: Vec<NodeId>,
    },
    RequiredArgument {
        name: String,
    },
    MethodDefinition(MethodDef),
    StaticMethodDefinition(MethodDef),
    /// `x = int`: binds `x` to the type named by `type_node`.
    LocalDeclaration {
        name: String,
        type_node: NodeId,
    },
    LocalAssignment {
        name: String,
        value: NodeId,
    },
    Local {
        name: String,
    },
    FieldDeclaration {
        name: String,
        type_node: NodeId,
    },
    FieldAssignment {
        name: String,
        value: NodeId,
    },
    Field {
        name: String,
    },

    // ── Expressions ─────────────────────────────────────────────────
    Literal(Literal),
    Call {
        receiver: NodeId,
        name: String,
        args: Vec<NodeId>,
    },
    /// A call with an implicit `self` receiver.
    FunctionalCall {
        name: String,
        args: Vec<NodeId>,
    },
    SelfReference,
    /// A nominal type name as written in source. Aliases are resolved by
    /// the type checker.
    TypeReference(TypeRef),
    Not {
        value: NodeId,
    },

    // ── Control flow ────────────────────────────────────────────────
    /// Wrapper around the predicate of an `If` or `Loop`.
    Condition {
        predicate: NodeId,
    },
    If {
        condition: NodeId,
        then_body: NodeId,
        else_body: Option<NodeId>,
    },
    Loop {
        condition: NodeId,
        body: NodeId,
        check_first: bool,
        negative: bool,
    },
    Return {
        value: Option<NodeId>,
    },
    Import {
        path: String,
    },
    Noop,
}

impl NodeKind {
    /// The child nodes in evaluation order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Script { body, .. } | NodeKind::ClassDefinition { body, .. } => vec![*body],
            NodeKind::Body { statements } => statements.clone(),
            NodeKind::Arguments { required } => required.clone(),
            NodeKind::MethodDefinition(def) | NodeKind::StaticMethodDefinition(def) => {
                vec![def.arguments, def.body]
            }
            NodeKind::LocalDeclaration { type_node, .. }
            | NodeKind::FieldDeclaration { type_node, .. } => vec![*type_node],
            NodeKind::LocalAssignment { value, .. }
            | NodeKind::FieldAssignment { value, .. }
            | NodeKind::Not { value } => vec![*value],
            NodeKind::Call { receiver, args, .. } => {
                let mut out = Vec::with_capacity(args.len() + 1);
                out.push(*receiver);
                out.extend(args.iter().copied());
                out
            }
            NodeKind::FunctionalCall { args, .. } => args.clone(),
            NodeKind::Condition { predicate } => vec![*predicate],
            NodeKind::If {
                condition,
                then_body,
                else_body,
            } => {
                let mut out = vec![*condition, *then_body];
                out.extend(else_body.iter().copied());
                out
            }
            NodeKind::Loop {
                condition, body, ..
            } => vec![*condition, *body],
            NodeKind::Return { value } => value.iter().copied().collect(),
            NodeKind::RequiredArgument { .. }
            | NodeKind::Local { .. }
            | NodeKind::Field { .. }
            | NodeKind::Literal(_)
            | NodeKind::SelfReference
            | NodeKind::TypeReference(_)
            | NodeKind::Import { .. }
            | NodeKind::Noop => Vec::new(),
        }
    }

    /// Whether this node owns a local-variable namespace.
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            NodeKind::Script { .. }
                | NodeKind::MethodDefinition(_)
                | NodeKind::StaticMethodDefinition(_)
        )
    }

    /// Whether this node can contain methods and fields.
    pub fn is_class(&self) -> bool {
        matches!(
            self,
            NodeKind::Script { .. } | NodeKind::ClassDefinition { .. }
        )
    }

    /// Method and class definitions. As statements they produce no value.
    pub fn is_definition(&self) -> bool {
        matches!(
            self,
            NodeKind::MethodDefinition(_)
                | NodeKind::StaticMethodDefinition(_)
                | NodeKind::ClassDefinition { .. }
        )
    }

    pub fn method_def(&self) -> Option<&MethodDef> {
        match self {
            NodeKind::MethodDefinition(def) | NodeKind::StaticMethodDefinition(def) => Some(def),
            _ => None,
        }
    }

    /// A short, human-readable description used in dumps and diagnostics.
    pub fn describe(&self) -> String {
        match self {
            NodeKind::Script { class_name, .. } => format!("Script {}", class_name),
            NodeKind::Body { .. } => "Body".to_string(),
            NodeKind::ClassDefinition {
                name, superclass, ..
            } => match superclass {
                Some(sup) => format!("ClassDefinition {} < {}", name, sup),
                None => format!("ClassDefinition {}", name),
            },
            NodeKind::Arguments { .. } => "Arguments".to_string(),
            NodeKind::RequiredArgument { name } => format!("RequiredArgument {}", name),
            NodeKind::MethodDefinition(def) => format!("MethodDefinition {}", def.name),
            NodeKind::StaticMethodDefinition(def) => {
                format!("StaticMethodDefinition {}", def.name)
            }
            NodeKind::LocalDeclaration { name, .. } => format!("LocalDeclaration {}", name),
            NodeKind::LocalAssignment { name, .. } => format!("LocalAssignment {}", name),
            NodeKind::Local { name } => format!("Local {}", name),
            NodeKind::FieldDeclaration { name, .. } => format!("FieldDeclaration @{}", name),
            NodeKind::FieldAssignment { name, .. } => format!("FieldAssignment @{}", name),
            NodeKind::Field { name } => format!("Field @{}", name),
            NodeKind::Literal(Literal::Integer(v)) => format!("Integer {}", v),
            NodeKind::Literal(Literal::Float(v)) => format!("Float {}", v),
            NodeKind::Literal(Literal::String(v)) => format!("String {:?}", v),
            NodeKind::Literal(Literal::Boolean(v)) => format!("Boolean {}", v),
            NodeKind::Call { name, .. } => format!("Call {}", name),
            NodeKind::FunctionalCall { name, .. } => format!("FunctionalCall {}", name),
            NodeKind::SelfReference => "Self".to_string(),
            NodeKind::TypeReference(ty) => format!("TypeReference {}", ty),
            NodeKind::Not { .. } => "Not".to_string(),
            NodeKind::Condition { .. } => "Condition".to_string(),
            NodeKind::If { .. } => "If".to_string(),
            NodeKind::Loop {
                check_first,
                negative,
                ..
            } => {
                let test = if *negative { "until" } else { "while" };
                if *check_first {
                    format!("Loop {}", test)
                } else {
                    format!("Loop do-{}", test)
                }
            }
            NodeKind::Return { .. } => "Return".to_string(),
            NodeKind::Import { path } => format!("Import {}", path),
            NodeKind::Noop => "Noop".to_string(),
        }
    }
}

/// A node plus its annotations.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub position: Position,
    /// Set on the first node of each source line.
    pub newline: bool,
    inferred_type: Option<TypeRef>,
    call_target: Option<MethodSignature>,
}

impl Node {
    pub fn inferred_type(&self) -> Option<&TypeRef> {
        self.inferred_type.as_ref()
    }

    pub fn call_target(&self) -> Option<&MethodSignature> {
        self.call_target.as_ref()
    }

    /// Write the inferred type. The slot is write-once: returns `false`
    /// and leaves the existing type in place if one is already recorded.
    pub fn record_type(&mut self, ty: TypeRef) -> bool {
        if self.inferred_type.is_some() {
            return false;
        }
        self.inferred_type = Some(ty);
        true
    }

    /// Write the resolved call target. Write-once, like `record_type`.
    pub fn record_call_target(&mut self, target: MethodSignature) -> bool {
        if self.call_target.is_some() {
            return false;
        }
        self.call_target = Some(target);
        true
    }
}

/// An arena of nodes rooted at a `Script`.
#[derive(Debug, Clone)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,
    file: String,
}

impl Ast {
    /// An empty arena. The root is set with [`Ast::set_root`] once the
    /// script node has been allocated.
    pub fn new(file: impl Into<String>) -> Self {
        Ast {
            nodes: Vec::new(),
            root: NodeId(0),
            file: file.into(),
        }
    }

    /// Allocate a node and link its children back to it.
    ///
    /// Children must already be allocated and not yet parented.
    pub fn alloc(&mut self, kind: NodeKind, position: Position) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for child in kind.children() {
            let slot = &mut self.nodes[child.index()];
            debug_assert!(slot.parent.is_none(), "node {:?} reparented", child);
            slot.parent = Some(id);
        }
        self.nodes.push(Node {
            kind,
            parent: None,
            position,
            newline: false,
            inferred_type: None,
            call_target: None,
        });
        id
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The source file name this tree was built from.
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.kind(id).children()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn position(&self, id: NodeId) -> Position {
        self.nodes[id.index()].position
    }

    pub fn inferred_type(&self, id: NodeId) -> Option<&TypeRef> {
        self.nodes[id.index()].inferred_type()
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    /// The nearest enclosing scope (script or method). The root is its own
    /// scope.
    pub fn enclosing_scope(&self, id: NodeId) -> NodeId {
        self.ancestors(id)
            .find(|&n| self.kind(n).is_scope())
            .unwrap_or(self.root)
    }

    /// The nearest enclosing class body (a class definition or the script).
    pub fn enclosing_class(&self, id: NodeId) -> NodeId {
        self.ancestors(id)
            .find(|&n| self.kind(n).is_class())
            .unwrap_or(self.root)
    }

    pub fn enclosing_method(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id)
            .find(|&n| self.kind(n).method_def().is_some())
    }

    /// The class name a class-like node declares.
    pub fn class_name(&self, class: NodeId) -> Option<&str> {
        match self.kind(class) {
            NodeKind::Script { class_name, .. } => Some(class_name),
            NodeKind::ClassDefinition { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether `method` is compiled as a static method.
    ///
    /// `def self.x` is static; so is any method defined directly in the
    /// script rather than inside a class.
    pub fn is_static_method(&self, method: NodeId) -> bool {
        match self.kind(method) {
            NodeKind::StaticMethodDefinition(_) => true,
            NodeKind::MethodDefinition(_) => matches!(
                self.kind(self.enclosing_class(method)),
                NodeKind::Script { .. }
            ),
            _ => false,
        }
    }

    /// Whether code at `id` runs without a `self` instance.
    pub fn in_static_context(&self, id: NodeId) -> bool {
        match self.enclosing_method(id) {
            Some(method) => self.is_static_method(method),
            None => true,
        }
    }

    pub fn describe(&self, id: NodeId) -> String {
        self.kind(id).describe()
    }

    /// An indented rendering of the tree with inferred types, one node per
    /// line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        let _ = write!(out, "{:indent$}{}", "", node.kind.describe(), indent = depth * 2);
        if let Some(ty) = node.inferred_type() {
            let _ = write!(out, " : {}", ty);
        }
        out.push('\n');
        for child in node.kind.children() {
            self.dump_node(child, depth + 1, out);
        }
    }
}

impl Index<NodeId> for Ast {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        self.node(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_tree() -> (Ast, NodeId, NodeId) {
        let mut ast = Ast::new("t.rb");
        let lit = ast.alloc(NodeKind::Literal(Literal::Integer(1)), Position::line(1));
        let assign = ast.alloc(
            NodeKind::LocalAssignment {
                name: "x".into(),
                value: lit,
            },
            Position::line(1),
        );
        let body = ast.alloc(
            NodeKind::Body {
                statements: vec![assign],
            },
            Position::default(),
        );
        let script = ast.alloc(
            NodeKind::Script {
                class_name: "T".into(),
                body,
            },
            Position::default(),
        );
        ast.set_root(script);
        (ast, lit, assign)
    }

    #[test]
    fn alloc_links_parents() {
        let (ast, lit, assign) = small_tree();
        assert_eq!(ast.parent(lit), Some(assign));
        assert_eq!(ast.parent(ast.root()), None);
        assert_eq!(ast.enclosing_scope(lit), ast.root());
        assert!(ast.in_static_context(lit));
    }

    #[test]
    fn inferred_type_is_write_once() {
        let (mut ast, lit, _) = small_tree();
        assert!(ast.node_mut(lit).record_type(TypeRef::int()));
        assert!(!ast.node_mut(lit).record_type(TypeRef::long()));
        assert_eq!(ast.inferred_type(lit), Some(&TypeRef::int()));
    }

    #[test]
    fn wide_integer_literals_are_long() {
        assert_eq!(Literal::Integer(7).ty(), TypeRef::int());
        assert_eq!(Literal::Integer(1 << 40).ty(), TypeRef::long());
        assert_eq!(Literal::Integer(i32::MIN as i64).ty(), TypeRef::int());
    }

    #[test]
    fn dump_shows_types() {
        let (mut ast, lit, _) = small_tree();
        ast.node_mut(lit).record_type(TypeRef::int());
        insta::assert_snapshot!(ast.dump(), @r"
        Script T
          Body
            LocalAssignment x
              Integer 1 : int
        ");
    }
}
