//! Foreign parse tree -> internal AST.
//!
//! Each foreign node kind maps onto exactly one internal node kind.
//! Children are transformed before their parent is allocated, so every
//! constructor sees fully built children. Anything outside the supported
//! subset fails with [`TransformError::UnsupportedSyntax`]; nothing is
//! skipped silently.
//!
//! A few source idioms are recognised here rather than later:
//!
//! - a hash literal opening a method body is the method's signature
//!   (`{:a => :int, :return => :int}`) and leaves a `Noop` behind
//! - `x = SomeType` declares `x` instead of assigning a value
//! - `import "a.b.C"` becomes an `Import` node

use std::path::Path;

use tracing::debug;

use kiln_common::{LineIndex, Position, TypeRef};

use crate::error::TransformError;
use crate::foreign::{ForeignKind, ForeignNode, ForeignPair};
use crate::node::{Ast, Literal, MethodDef, NodeId, NodeKind, Signature};

/// Signature-map key naming the return type.
const RETURN_KEY: &str = "return";

/// Transform a foreign tree rooted at a `Root` node.
///
/// The script class is named after the stem of `file`.
pub fn transform(root: &ForeignNode, file: &str) -> Result<Ast, TransformError> {
    Transformer::new(file).run(root)
}

/// The class name used for top-level code of `file`.
///
/// The file stem with every character that cannot appear in an identifier
/// replaced by `_`; `Script` when the stem is empty.
pub fn script_class_name(file: &str) -> String {
    let stem = Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        return "Script".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Builds an [`Ast`] from one foreign tree.
pub struct Transformer<'a> {
    ast: Ast,
    class_name: String,
    line_index: Option<&'a LineIndex>,
}

impl<'a> Transformer<'a> {
    pub fn new(file: &str) -> Self {
        Transformer {
            ast: Ast::new(file),
            class_name: script_class_name(file),
            line_index: None,
        }
    }

    /// Override the script class name.
    pub fn class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = name.into();
        self
    }

    /// Use the source text's line index to fill in missing line numbers.
    pub fn line_index(mut self, index: &'a LineIndex) -> Self {
        self.line_index = Some(index);
        self
    }

    pub fn run(mut self, root: &ForeignNode) -> Result<Ast, TransformError> {
        let ForeignKind::Root { body } = &root.kind else {
            return Err(TransformError::unsupported(
                self.position(root),
                format!("expected a Root node at the top of the tree, found {}", root.kind.name()),
            ));
        };
        let position = self.position(root);
        let body = self.body(body.as_deref(), position)?;
        let script = self.ast.alloc(
            NodeKind::Script {
                class_name: self.class_name.clone(),
                body,
            },
            position,
        );
        self.ast.set_root(script);
        debug!(
            file = self.ast.file(),
            nodes = self.ast.len(),
            "transformed foreign tree"
        );
        Ok(self.ast)
    }

    fn position(&self, foreign: &ForeignNode) -> Position {
        match self.line_index {
            Some(index) => foreign.position.with_line_from(index),
            None => foreign.position,
        }
    }

    fn alloc(&mut self, kind: NodeKind, foreign: &ForeignNode) -> NodeId {
        let position = self.position(foreign);
        self.ast.alloc(kind, position)
    }

    fn unsupported(&self, foreign: &ForeignNode, description: impl Into<String>) -> TransformError {
        TransformError::unsupported(self.position(foreign), description)
    }

    /// Transform a single node.
    fn node(&mut self, foreign: &ForeignNode) -> Result<NodeId, TransformError> {
        let kind = match &foreign.kind {
            ForeignKind::Root { .. } => {
                return Err(self.unsupported(foreign, "nested Root node"));
            }
            ForeignKind::Newline { next } => {
                let id = self.node(next)?;
                let line = self.position(foreign).line;
                let node = self.ast.node_mut(id);
                node.newline = true;
                if node.position.line == 0 {
                    node.position.line = line;
                }
                return Ok(id);
            }
            ForeignKind::Begin { body } => return self.node(body),
            ForeignKind::Block { .. } => {
                let position = self.position(foreign);
                return self.body(Some(foreign), position);
            }
            ForeignKind::Class {
                name,
                superclass,
                body,
            } => {
                let superclass = match superclass.as_deref().map(ForeignNode::unwrapped) {
                    None => None,
                    Some(ForeignNode {
                        kind: ForeignKind::Const { name },
                        ..
                    }) => Some(TypeRef::new(name.as_str())),
                    Some(other) => {
                        return Err(self.unsupported(
                            other,
                            format!("superclass must be a constant, found {}", other.kind.name()),
                        ))
                    }
                };
                let body = self.body(body.as_deref(), self.position(foreign))?;
                NodeKind::ClassDefinition {
                    name: name.clone(),
                    superclass,
                    body,
                }
            }
            ForeignKind::Defn { name, args, body } => {
                NodeKind::MethodDefinition(self.method(foreign, name, args, body.as_deref())?)
            }
            ForeignKind::Defs {
                receiver,
                name,
                args,
                body,
            } => {
                if receiver.unwrapped().kind != ForeignKind::SelfRef {
                    return Err(self.unsupported(
                        receiver,
                        format!(
                            "singleton method on a {} receiver",
                            receiver.unwrapped().kind.name()
                        ),
                    ));
                }
                NodeKind::StaticMethodDefinition(self.method(foreign, name, args, body.as_deref())?)
            }
            ForeignKind::Args { .. } => return self.arguments(foreign),
            ForeignKind::Argument { name } => NodeKind::RequiredArgument { name: name.clone() },
            ForeignKind::LocalAsgn { name, value } => {
                if is_type_name(value) {
                    NodeKind::LocalDeclaration {
                        name: name.clone(),
                        type_node: self.node(value)?,
                    }
                } else {
                    NodeKind::LocalAssignment {
                        name: name.clone(),
                        value: self.node(value)?,
                    }
                }
            }
            ForeignKind::LocalVar { name } => NodeKind::Local { name: name.clone() },
            ForeignKind::InstAsgn { name, value } => {
                let name = field_name(name);
                if is_type_name(value) {
                    NodeKind::FieldDeclaration {
                        name,
                        type_node: self.node(value)?,
                    }
                } else {
                    NodeKind::FieldAssignment {
                        name,
                        value: self.node(value)?,
                    }
                }
            }
            ForeignKind::InstVar { name } => NodeKind::Field {
                name: field_name(name),
            },
            ForeignKind::Fixnum { value } => NodeKind::Literal(Literal::Integer(*value)),
            ForeignKind::Float { value } => NodeKind::Literal(Literal::Float(*value)),
            ForeignKind::Str { value } => NodeKind::Literal(Literal::String(value.clone())),
            ForeignKind::True => NodeKind::Literal(Literal::Boolean(true)),
            ForeignKind::False => NodeKind::Literal(Literal::Boolean(false)),
            ForeignKind::SelfRef => NodeKind::SelfReference,
            ForeignKind::Call {
                receiver,
                name,
                args,
            } => {
                let receiver = self.node(receiver)?;
                let args = self.nodes(args)?;
                NodeKind::Call {
                    receiver,
                    name: name.clone(),
                    args,
                }
            }
            ForeignKind::FCall { name, args } if name == "import" => match args.as_slice() {
                [arg] => match &arg.unwrapped().kind {
                    ForeignKind::Str { value } => NodeKind::Import {
                        path: value.clone(),
                    },
                    _ => return Err(self.unsupported(arg, "import expects a string literal")),
                },
                _ => return Err(self.unsupported(foreign, "import expects exactly one argument")),
            },
            ForeignKind::FCall { name, args } => NodeKind::FunctionalCall {
                name: name.clone(),
                args: self.nodes(args)?,
            },
            ForeignKind::VCall { name } => NodeKind::FunctionalCall {
                name: name.clone(),
                args: Vec::new(),
            },
            ForeignKind::Const { name } => NodeKind::TypeReference(TypeRef::new(name.as_str())),
            ForeignKind::If {
                condition,
                then_body,
                else_body,
            } => {
                let condition = self.condition(condition)?;
                let position = self.position(foreign);
                let then_body = self.body(then_body.as_deref(), position)?;
                let else_body = match else_body {
                    Some(body) => Some(self.body(Some(body), position)?),
                    None => None,
                };
                NodeKind::If {
                    condition,
                    then_body,
                    else_body,
                }
            }
            ForeignKind::While {
                condition,
                body,
                check_first,
            } => self.loop_kind(foreign, condition, body.as_deref(), *check_first, false)?,
            ForeignKind::Until {
                condition,
                body,
                check_first,
            } => self.loop_kind(foreign, condition, body.as_deref(), *check_first, true)?,
            ForeignKind::Return { value } => NodeKind::Return {
                value: match value {
                    Some(value) => Some(self.node(value)?),
                    None => None,
                },
            },
            ForeignKind::Not { value } => NodeKind::Not {
                value: self.node(value)?,
            },
            ForeignKind::Hash { .. } => {
                return Err(self.unsupported(foreign, "literal hash syntax not yet supported"));
            }
            ForeignKind::Symbol { name } => {
                return Err(self.unsupported(foreign, format!("symbol literal :{}", name)));
            }
            ForeignKind::Nil
            | ForeignKind::Array { .. }
            | ForeignKind::Yield { .. }
            | ForeignKind::Iter { .. }
            | ForeignKind::Dot { .. }
            | ForeignKind::OpAsgn { .. }
            | ForeignKind::Module { .. }
            | ForeignKind::Splat { .. } => {
                return Err(self.unsupported(foreign, foreign.kind.name()));
            }
        };
        Ok(self.alloc(kind, foreign))
    }

    fn nodes(&mut self, foreign: &[ForeignNode]) -> Result<Vec<NodeId>, TransformError> {
        foreign.iter().map(|f| self.node(f)).collect()
    }

    /// Transform an optional statement or block into a `Body`.
    fn body(
        &mut self,
        foreign: Option<&ForeignNode>,
        position: Position,
    ) -> Result<NodeId, TransformError> {
        let statements = self.statements_of(foreign)?;
        Ok(self.ast.alloc(NodeKind::Body { statements }, position))
    }

    fn statements_of(&mut self, foreign: Option<&ForeignNode>) -> Result<Vec<NodeId>, TransformError> {
        match foreign {
            None => Ok(Vec::new()),
            Some(f) => match &f.unwrapped().kind {
                ForeignKind::Block { children } => self.nodes(children),
                _ => Ok(vec![self.node(f)?]),
            },
        }
    }

    fn method(
        &mut self,
        foreign: &ForeignNode,
        name: &str,
        args: &ForeignNode,
        body: Option<&ForeignNode>,
    ) -> Result<MethodDef, TransformError> {
        let arguments = self.arguments(args)?;
        let position = self.position(foreign);

        let statements: Vec<&ForeignNode> = match body {
            None => Vec::new(),
            Some(f) => match &f.unwrapped().kind {
                ForeignKind::Block { children } => children.iter().collect(),
                _ => vec![f],
            },
        };

        let mut signature = Signature::default();
        let mut ids = Vec::with_capacity(statements.len());
        for (i, stmt) in statements.into_iter().enumerate() {
            match &stmt.unwrapped().kind {
                ForeignKind::Hash { pairs } if i == 0 => {
                    signature = self.signature(pairs)?;
                    let noop = self.alloc(NodeKind::Noop, stmt);
                    self.ast.node_mut(noop).newline = matches!(stmt.kind, ForeignKind::Newline { .. });
                    ids.push(noop);
                }
                _ => ids.push(self.node(stmt)?),
            }
        }
        let body = self.ast.alloc(NodeKind::Body { statements: ids }, position);

        Ok(MethodDef {
            name: name.to_string(),
            signature,
            arguments,
            body,
        })
    }

    fn arguments(&mut self, foreign: &ForeignNode) -> Result<NodeId, TransformError> {
        let ForeignKind::Args {
            required,
            optional,
            rest,
            block,
        } = &foreign.unwrapped().kind
        else {
            return Err(self.unsupported(
                foreign,
                format!("expected an argument list, found {}", foreign.kind.name()),
            ));
        };
        if !optional.is_empty() {
            return Err(self.unsupported(foreign, "optional arguments"));
        }
        if let Some(rest) = rest {
            return Err(self.unsupported(foreign, format!("rest argument *{}", rest)));
        }
        if let Some(block) = block {
            return Err(self.unsupported(foreign, format!("block argument &{}", block)));
        }
        let required = self.nodes(required)?;
        Ok(self.alloc(NodeKind::Arguments { required }, foreign))
    }

    fn signature(&self, pairs: &[ForeignPair]) -> Result<Signature, TransformError> {
        let mut signature = Signature::default();
        for pair in pairs {
            let key = self.signature_name(&pair.key)?;
            let ty = TypeRef::new(self.signature_name(&pair.value)?);
            if key == RETURN_KEY {
                signature.returns = Some(ty);
            } else {
                signature.declared.push((key, ty));
            }
        }
        Ok(signature)
    }

    fn signature_name(&self, foreign: &ForeignNode) -> Result<String, TransformError> {
        match &foreign.unwrapped().kind {
            ForeignKind::Symbol { name } | ForeignKind::Const { name } => Ok(name.clone()),
            ForeignKind::Str { value } => Ok(value.clone()),
            other => Err(self.unsupported(
                foreign,
                format!("signature entries must be symbols, found {}", other.name()),
            )),
        }
    }

    fn condition(&mut self, foreign: &ForeignNode) -> Result<NodeId, TransformError> {
        let predicate = self.node(foreign)?;
        Ok(self.alloc(NodeKind::Condition { predicate }, foreign))
    }

    fn loop_kind(
        &mut self,
        foreign: &ForeignNode,
        condition: &ForeignNode,
        body: Option<&ForeignNode>,
        check_first: bool,
        negative: bool,
    ) -> Result<NodeKind, TransformError> {
        let condition = self.condition(condition)?;
        let body = self.body(body, self.position(foreign))?;
        Ok(NodeKind::Loop {
            condition,
            body,
            check_first,
            negative,
        })
    }
}

/// Whether an assignment's value names a type rather than computing one.
fn is_type_name(value: &ForeignNode) -> bool {
    matches!(value.unwrapped().kind, ForeignKind::Const { .. })
}

fn field_name(name: &str) -> String {
    name.trim_start_matches('@').to_string()
}
