//! The target-independent dispatcher.
//!
//! Every expression leaves exactly one value of its inferred type on the
//! backend's operand stack, or nothing when that type is `void`.
//! Statements in a body are compiled for effect and their values popped,
//! except the last, whose value is the body's.
//!
//! The script class gets a synthetic `static void main(string[] args)`
//! holding the top-level statements. Methods and classes defined inside
//! another body are compiled where they appear, nested inside whatever
//! the backend is currently emitting.

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use kiln_ast::{Ast, NodeId, NodeKind};
use kiln_common::{is_print, DispatchKind, MethodSignature, Position, TypeRef};

use crate::backend::{ArrayOp, Backend, CompareOp, Condition};
use crate::error::{CompileError, CompileErrorKind};

/// Name of the method holding top-level statements.
pub const MAIN_METHOD: &str = "main";

type CompileResult<T = ()> = Result<T, CompileError>;

/// Compile a fully typed tree with `backend` and return its output.
pub fn compile<B: Backend>(ast: &Ast, backend: B) -> Result<B::Output, CompileError> {
    let mut compiler = Compiler {
        ast,
        backend,
        returns: Vec::new(),
    };
    compiler.compile_script()?;
    Ok(compiler.backend.finish())
}

struct Compiler<'a, B> {
    ast: &'a Ast,
    backend: B,
    /// Name and return type of each method being compiled, innermost last.
    returns: Vec<(String, TypeRef)>,
}

impl<'a, B: Backend> Compiler<'a, B> {
    // ── Errors ─────────────────────────────────────────────────────────

    /// The node's position, or the nearest ancestor's that has a line.
    fn position(&self, id: NodeId) -> Position {
        std::iter::once(id)
            .chain(self.ast.ancestors(id))
            .map(|n| self.ast.position(n))
            .find(|p| p.line != 0)
            .unwrap_or_else(|| self.ast.position(id))
    }

    fn error(&self, id: NodeId, kind: CompileErrorKind) -> CompileError {
        CompileError::new(kind, self.position(id))
    }

    fn type_of(&self, id: NodeId) -> CompileResult<TypeRef> {
        self.ast
            .inferred_type(id)
            .cloned()
            .ok_or_else(|| self.error(id, CompileErrorKind::UnresolvedType(self.ast.describe(id))))
    }

    fn call_target(&self, id: NodeId) -> CompileResult<&'a MethodSignature> {
        let ast = self.ast;
        ast.node(id)
            .call_target()
            .ok_or_else(|| self.error(id, CompileErrorKind::UnresolvedType(ast.describe(id))))
    }

    fn unsupported(&self, id: NodeId, what: impl Into<String>) -> CompileError {
        self.error(id, CompileErrorKind::UnsupportedNode(what.into()))
    }

    // ── Classes and methods ────────────────────────────────────────────

    fn compile_script(&mut self) -> CompileResult {
        let ast = self.ast;
        let root = ast.root();
        let NodeKind::Script { class_name, body } = ast.kind(root) else {
            return Err(self.unsupported(root, ast.describe(root)));
        };
        debug!(class = %class_name, "compiling script");

        self.backend.begin_class(class_name, &TypeRef::object());
        self.declare_fields(root, true)?;

        let args = TypeRef::array_of("string");
        self.backend
            .begin_method(MAIN_METHOD, &TypeRef::void(), std::slice::from_ref(&args), true);
        self.backend.declare_argument("args", &args);
        for (name, ty) in self.collect_locals(root, &["args"])? {
            self.backend.declare_local(&name, &ty);
        }
        self.returns.push((MAIN_METHOD.to_string(), TypeRef::void()));
        for stmt in self.statements(*body) {
            self.compile_statement(stmt)?;
        }
        self.returns.pop();
        self.backend
            .emit_return(&TypeRef::void())
            .map_err(|kind| self.error(root, kind))?;
        self.backend
            .end_method()
            .map_err(|kind| self.error(root, kind))?;

        self.backend.end_class();
        Ok(())
    }

    fn compile_class(&mut self, id: NodeId) -> CompileResult {
        let ast = self.ast;
        let NodeKind::ClassDefinition {
            name,
            superclass,
            body,
        } = ast.kind(id)
        else {
            return Err(self.unsupported(id, ast.describe(id)));
        };
        debug!(class = %name, "compiling class");

        let superclass = superclass.clone().unwrap_or_else(TypeRef::object);
        self.backend.begin_class(name, &superclass);
        self.declare_fields(id, false)?;
        for stmt in self.statements(*body) {
            match ast.kind(stmt) {
                NodeKind::MethodDefinition(_) | NodeKind::StaticMethodDefinition(_) => {
                    self.compile_method(stmt)?
                }
                NodeKind::ClassDefinition { .. } => self.compile_class(stmt)?,
                NodeKind::FieldDeclaration { .. } | NodeKind::Import { .. } | NodeKind::Noop => {}
                other => {
                    return Err(self.unsupported(stmt, format!("{} in a class body", other.describe())))
                }
            }
        }
        self.backend.end_class();
        Ok(())
    }

    fn compile_method(&mut self, id: NodeId) -> CompileResult {
        let ast = self.ast;
        let Some(def) = ast.kind(id).method_def() else {
            return Err(self.unsupported(id, ast.describe(id)));
        };
        let is_static = ast.is_static_method(id);
        let return_type = self.type_of(id)?;

        let mut params = Vec::new();
        for arg in ast.children(def.arguments) {
            if let NodeKind::RequiredArgument { name } = ast.kind(arg) {
                params.push((name.as_str(), self.type_of(arg)?));
            }
        }
        let param_types: Vec<TypeRef> = params.iter().map(|(_, ty)| ty.clone()).collect();
        let param_names: Vec<&str> = params.iter().map(|(name, _)| *name).collect();
        debug!(method = %def.name, is_static, returns = %return_type, "compiling method");

        self.backend
            .begin_method(&def.name, &return_type, &param_types, is_static);
        for (name, ty) in &params {
            self.backend.declare_argument(name, ty);
        }
        for (name, ty) in self.collect_locals(id, &param_names)? {
            self.backend.declare_local(&name, &ty);
        }

        self.returns.push((def.name.clone(), return_type.clone()));
        self.compile_converted(def.body, &return_type)?;
        self.returns.pop();
        self.backend.emit_return(&return_type).map_err(|kind| self.error(id, kind))?;
        self.backend.end_method().map_err(|kind| self.error(id, kind))
    }

    /// Fields used anywhere in the class, typed by their first occurrence.
    fn declare_fields(&mut self, class: NodeId, is_static: bool) -> CompileResult {
        let ast = self.ast;
        let mut seen = FxHashSet::default();
        for id in self.descendants(class, true) {
            let name = match ast.kind(id) {
                NodeKind::FieldDeclaration { name, .. }
                | NodeKind::FieldAssignment { name, .. }
                | NodeKind::Field { name } => name,
                _ => continue,
            };
            if seen.insert(name.as_str()) {
                let ty = self.type_of(id)?;
                self.backend.declare_field(name, &ty, is_static);
            }
        }
        Ok(())
    }

    /// Locals assigned or declared in `scope`, in order of first
    /// appearance, excluding `params`.
    fn collect_locals(&self, scope: NodeId, params: &[&str]) -> CompileResult<Vec<(String, TypeRef)>> {
        let ast = self.ast;
        let mut seen: FxHashSet<&str> = params.iter().copied().collect();
        let mut locals = Vec::new();
        for id in self.descendants(scope, false) {
            let name = match ast.kind(id) {
                NodeKind::LocalAssignment { name, .. } | NodeKind::LocalDeclaration { name, .. } => {
                    name
                }
                _ => continue,
            };
            if seen.insert(name.as_str()) {
                locals.push((name.clone(), self.type_of(id)?));
            }
        }
        Ok(locals)
    }

    /// Pre-order descendants of `owner`. Nested classes are never
    /// entered; nested methods only with `enter_methods`.
    fn descendants(&self, owner: NodeId, enter_methods: bool) -> Vec<NodeId> {
        let ast = self.ast;
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = ast.children(owner).into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            let kind = ast.kind(id);
            let skip = match kind {
                NodeKind::ClassDefinition { .. } => true,
                NodeKind::MethodDefinition(_) | NodeKind::StaticMethodDefinition(_) => !enter_methods,
                _ => false,
            };
            if skip {
                continue;
            }
            out.push(id);
            stack.extend(kind.children().into_iter().rev());
        }
        out
    }

    fn statements(&self, body: NodeId) -> Vec<NodeId> {
        match self.ast.kind(body) {
            NodeKind::Body { statements } => statements.clone(),
            _ => vec![body],
        }
    }

    // ── Statements ─────────────────────────────────────────────────────

    fn mark_line(&mut self, id: NodeId) {
        let node = self.ast.node(id);
        if node.newline && node.position.line != 0 {
            self.backend.mark_line(node.position.line);
        }
    }

    /// Compile `id` for its effect only.
    fn compile_statement(&mut self, id: NodeId) -> CompileResult {
        self.mark_line(id);
        match self.ast.kind(id) {
            NodeKind::MethodDefinition(_) | NodeKind::StaticMethodDefinition(_) => {
                self.compile_method(id)
            }
            NodeKind::ClassDefinition { .. } => self.compile_class(id),
            NodeKind::Import { .. } | NodeKind::Noop => Ok(()),
            NodeKind::LocalAssignment { .. }
            | NodeKind::LocalDeclaration { .. }
            | NodeKind::FieldAssignment { .. }
            | NodeKind::FieldDeclaration { .. } => self.compile_assignment(id, false),
            _ => {
                self.compile_value(id)?;
                let ty = self.type_of(id)?;
                self.backend.emit_pop(&ty);
                Ok(())
            }
        }
    }

    /// Compile a body, leaving the value of its last statement.
    fn compile_body(&mut self, id: NodeId) -> CompileResult {
        let statements = self.statements(id);
        let Some((&last, init)) = statements.split_last() else {
            return Ok(());
        };
        for &stmt in init {
            self.compile_statement(stmt)?;
        }
        if self.ast.kind(last).is_definition() {
            self.compile_statement(last)
        } else {
            self.compile_value(last)
        }
    }

    // ── Expressions ────────────────────────────────────────────────────

    /// Compile `id` and bring its value to `target`: widened when the
    /// types differ, dropped when `target` is `void`.
    fn compile_converted(&mut self, id: NodeId, target: &TypeRef) -> CompileResult {
        self.compile_value(id)?;
        let ty = self.type_of(id)?;
        if ty == *target {
            return Ok(());
        }
        if target.is_void() {
            self.backend.emit_pop(&ty);
        } else {
            self.backend.emit_convert(&ty, target);
        }
        Ok(())
    }

    fn compile_value(&mut self, id: NodeId) -> CompileResult {
        let ast = self.ast;
        let ty = self.type_of(id)?;
        self.mark_line(id);
        trace!(node = %ast.describe(id), ty = %ty, "compile");

        match ast.kind(id) {
            NodeKind::Body { .. } => self.compile_body(id),
            NodeKind::Literal(literal) => {
                self.backend.emit_literal(literal, &ty);
                Ok(())
            }
            NodeKind::Local { name } => self
                .backend
                .emit_local_load(name, &ty)
                .map_err(|kind| self.error(id, kind)),
            NodeKind::Field { name } => self.load_field(id, name, &ty),
            NodeKind::LocalAssignment { .. }
            | NodeKind::LocalDeclaration { .. }
            | NodeKind::FieldAssignment { .. }
            | NodeKind::FieldDeclaration { .. } => self.compile_assignment(id, true),
            NodeKind::SelfReference => self.load_self(id),
            NodeKind::Not { value } => {
                self.compile_value(*value)?;
                self.backend.emit_not().map_err(|kind| self.error(id, kind))
            }
            NodeKind::Condition { predicate } => self.compile_value(*predicate),
            NodeKind::Call {
                receiver,
                name,
                args,
            } => self.compile_call(id, *receiver, name, args),
            NodeKind::FunctionalCall { name, args } => self.compile_functional_call(id, name, args),
            NodeKind::If {
                condition,
                then_body,
                else_body,
            } => self.compile_if(id, &ty, *condition, *then_body, *else_body),
            NodeKind::Loop {
                condition,
                body,
                check_first,
                negative,
            } => self.compile_loop(id, *condition, *body, *check_first, *negative),
            NodeKind::Return { value } => self.compile_return(id, &ty, *value),
            NodeKind::Import { .. } | NodeKind::Noop => Ok(()),
            NodeKind::TypeReference(named) => {
                Err(self.unsupported(id, format!("type `{}` used as a value", named)))
            }
            NodeKind::Script { .. }
            | NodeKind::ClassDefinition { .. }
            | NodeKind::MethodDefinition(_)
            | NodeKind::StaticMethodDefinition(_)
            | NodeKind::Arguments { .. }
            | NodeKind::RequiredArgument { .. } => {
                Err(self.unsupported(id, format!("{} used as a value", ast.describe(id))))
            }
        }
    }

    fn load_self(&mut self, id: NodeId) -> CompileResult {
        if self.ast.in_static_context(id) {
            return Err(self.error(id, CompileErrorKind::StaticContext("self".to_string())));
        }
        let class = self.class_type(id);
        self.backend.emit_self_load(&class);
        Ok(())
    }

    fn class_type(&self, id: NodeId) -> TypeRef {
        let class = self.ast.enclosing_class(id);
        TypeRef::new(self.ast.class_name(class).unwrap_or_default())
    }

    /// The class owning field `name` and whether the field is static.
    /// Fields of the script class are static; other classes' fields
    /// belong to instances.
    fn field_owner(&self, id: NodeId, name: &str) -> CompileResult<(TypeRef, bool)> {
        let class = self.ast.enclosing_class(id);
        let is_static = matches!(self.ast.kind(class), NodeKind::Script { .. });
        if !is_static && self.ast.in_static_context(id) {
            return Err(self.error(
                id,
                CompileErrorKind::StaticContext(format!("instance field `@{}`", name)),
            ));
        }
        Ok((self.class_type(id), is_static))
    }

    fn load_field(&mut self, id: NodeId, name: &str, ty: &TypeRef) -> CompileResult {
        let (owner, is_static) = self.field_owner(id, name)?;
        if !is_static {
            self.backend.emit_self_load(&owner);
        }
        self.backend.emit_field_load(&owner, name, ty, is_static);
        Ok(())
    }

    /// Store into a local or field; with `keep`, reload the stored value.
    fn compile_assignment(&mut self, id: NodeId, keep: bool) -> CompileResult {
        let ast = self.ast;
        let bound = self.type_of(id)?;
        match ast.kind(id) {
            NodeKind::LocalAssignment { name, value } => {
                self.compile_converted(*value, &bound)?;
                self.store_local(id, name, &bound, keep)
            }
            NodeKind::LocalDeclaration { name, .. } => {
                self.backend.emit_default(&bound);
                self.store_local(id, name, &bound, keep)
            }
            NodeKind::FieldAssignment { name, value } => {
                let (owner, is_static) = self.field_owner(id, name)?;
                if !is_static {
                    self.backend.emit_self_load(&owner);
                }
                self.compile_converted(*value, &bound)?;
                self.store_field(id, &owner, name, &bound, is_static, keep)
            }
            NodeKind::FieldDeclaration { name, .. } => {
                let (owner, is_static) = self.field_owner(id, name)?;
                if !is_static {
                    self.backend.emit_self_load(&owner);
                }
                self.backend.emit_default(&bound);
                self.store_field(id, &owner, name, &bound, is_static, keep)
            }
            other => Err(self.unsupported(id, other.describe())),
        }
    }

    fn store_local(&mut self, id: NodeId, name: &str, ty: &TypeRef, keep: bool) -> CompileResult {
        self.backend.emit_local_store(name, ty).map_err(|kind| self.error(id, kind))?;
        if keep {
            self.backend.emit_local_load(name, ty).map_err(|kind| self.error(id, kind))?;
        }
        Ok(())
    }

    fn store_field(
        &mut self,
        id: NodeId,
        owner: &TypeRef,
        name: &str,
        ty: &TypeRef,
        is_static: bool,
        keep: bool,
    ) -> CompileResult {
        self.backend.emit_field_store(owner, name, ty, is_static);
        if keep {
            self.load_field(id, name, ty)?;
        }
        Ok(())
    }

    // ── Calls ──────────────────────────────────────────────────────────

    fn compile_args(&mut self, args: &[NodeId], params: &[TypeRef]) -> CompileResult {
        for (&arg, param) in args.iter().zip(params) {
            self.compile_converted(arg, param)?;
        }
        Ok(())
    }

    fn compile_call(&mut self, id: NodeId, receiver: NodeId, name: &str, args: &[NodeId]) -> CompileResult {
        let target = self.call_target(id)?;

        if let NodeKind::TypeReference(_) = self.ast.kind(receiver) {
            if target.dispatch == DispatchKind::Constructor {
                self.backend.begin_new(&target.owner);
            }
            self.compile_args(args, &target.params)?;
            self.invoke(target);
            return Ok(());
        }

        let receiver_type = self.type_of(receiver)?;
        if receiver_type.is_primitive() {
            return self.compile_operator(id, receiver, name, args, target);
        }
        if receiver_type.is_array() {
            return self.compile_array_op(id, receiver, &receiver_type, name, args);
        }
        self.compile_value(receiver)?;
        self.compile_args(args, &target.params)?;
        self.invoke(target);
        Ok(())
    }

    fn invoke(&mut self, target: &MethodSignature) {
        self.backend.emit_call(
            &target.owner,
            &target.name,
            &target.params,
            &target.return_type,
            target.dispatch,
        );
    }

    /// Operators on primitive receivers. Comparisons convert both operands
    /// to the parameter type; other operators compute in their result
    /// type, so sub-int receivers widen to `int` and shift counts stay
    /// `int` under a `long` receiver.
    fn compile_operator(
        &mut self,
        id: NodeId,
        receiver: NodeId,
        name: &str,
        args: &[NodeId],
        target: &MethodSignature,
    ) -> CompileResult {
        if args.len() != target.arity() {
            return Err(self.error(
                id,
                CompileErrorKind::PrimitiveArity {
                    op: name.to_string(),
                    expected: target.arity() + 1,
                    found: args.len() + 1,
                },
            ));
        }
        let Some(&rhs) = args.first() else {
            self.compile_converted(receiver, &target.return_type)?;
            return self
                .backend
                .emit_unary_primitive(name, &target.return_type)
                .map_err(|kind| self.error(id, kind));
        };
        let operand = &target.params[0];
        match CompareOp::from_name(name) {
            Some(op) => {
                self.compile_converted(receiver, operand)?;
                self.compile_converted(rhs, operand)?;
                self.backend
                    .emit_comparison(op, operand.category())
                    .map_err(|kind| self.error(id, kind))
            }
            None => {
                let result = &target.return_type;
                self.compile_converted(receiver, result)?;
                self.compile_converted(rhs, operand)?;
                self.backend
                    .emit_binary_primitive(name, result)
                    .map_err(|kind| self.error(id, kind))
            }
        }
    }

    fn compile_array_op(
        &mut self,
        id: NodeId,
        receiver: NodeId,
        array: &TypeRef,
        name: &str,
        args: &[NodeId],
    ) -> CompileResult {
        let Some(op) = ArrayOp::from_name(name) else {
            return Err(self.unsupported(id, format!("array method `{}`", name)));
        };
        if args.len() != op.arity() {
            return Err(self.error(
                id,
                CompileErrorKind::ArrayArity {
                    op: name.to_string(),
                    expected: op.arity(),
                    found: args.len(),
                },
            ));
        }
        let component = array.component().unwrap_or_else(TypeRef::object);
        self.compile_value(receiver)?;
        let params: Vec<TypeRef> = match op {
            ArrayOp::Length => vec![],
            ArrayOp::Load => vec![TypeRef::int()],
            ArrayOp::Store => vec![TypeRef::int(), component.clone()],
        };
        self.compile_args(args, &params)?;
        self.backend.emit_array_op(op, &component);
        Ok(())
    }

    fn compile_functional_call(&mut self, id: NodeId, name: &str, args: &[NodeId]) -> CompileResult {
        let ast = self.ast;
        let target = ast.node(id).call_target();
        if target.is_none() && is_print(name) && args.len() == 1 {
            self.backend.begin_print();
            self.compile_value(args[0])?;
            let ty = self.type_of(args[0])?;
            self.backend.emit_print(&ty, name == "puts");
            return Ok(());
        }
        let target = self.call_target(id)?;
        if !target.is_static() {
            if ast.in_static_context(id) {
                return Err(self.error(
                    id,
                    CompileErrorKind::StaticContext(format!("instance method `{}`", name)),
                ));
            }
            let class = self.class_type(id);
            self.backend.emit_self_load(&class);
        }
        self.compile_args(args, &target.params)?;
        self.invoke(target);
        Ok(())
    }

    // ── Control flow ───────────────────────────────────────────────────

    /// Compile the predicate of an `If` or `Loop`, leaving the operands
    /// the returned condition tests.
    fn compile_condition(&mut self, id: NodeId) -> CompileResult<Condition> {
        let ast = self.ast;
        match ast.kind(id) {
            NodeKind::Condition { predicate } => self.compile_condition(*predicate),
            NodeKind::Not { value } => Ok(self.compile_condition(*value)?.negate()),
            NodeKind::Call {
                receiver,
                name,
                args,
            } if args.len() == 1 && self.is_primitive_comparison(id, *receiver) => {
                let (Some(op), Some(target)) = (CompareOp::from_name(name), ast.node(id).call_target())
                else {
                    return Err(self.unsupported(id, ast.describe(id)));
                };
                let operand = &target.params[0];
                self.compile_converted(*receiver, operand)?;
                self.compile_converted(args[0], operand)?;
                Ok(Condition::Compare {
                    op,
                    category: operand.category(),
                    negated: false,
                })
            }
            _ => {
                let ty = self.type_of(id)?;
                if ty != TypeRef::boolean() {
                    return Err(self.error(id, CompileErrorKind::UnsupportedCondition(ty)));
                }
                self.compile_value(id)?;
                Ok(Condition::IsTrue)
            }
        }
    }

    fn is_primitive_comparison(&self, call: NodeId, receiver: NodeId) -> bool {
        let ast = self.ast;
        let NodeKind::Call { name, .. } = ast.kind(call) else {
            return false;
        };
        CompareOp::from_name(name).is_some()
            && !matches!(ast.kind(receiver), NodeKind::TypeReference(_))
            && ast.inferred_type(receiver).is_some_and(TypeRef::is_primitive)
            && ast.node(call).call_target().is_some_and(|t| t.arity() == 1)
    }

    fn compile_if(
        &mut self,
        id: NodeId,
        ty: &TypeRef,
        condition: NodeId,
        then_body: NodeId,
        else_body: Option<NodeId>,
    ) -> CompileResult {
        let condition = self.compile_condition(condition)?;
        let frame = self
            .backend
            .begin_if(condition, ty)
            .map_err(|kind| self.error(id, kind))?;
        self.compile_converted(then_body, ty)?;
        self.backend.begin_else(&frame);
        match else_body {
            Some(else_body) => self.compile_converted(else_body, ty)?,
            None => self.backend.emit_default(ty),
        }
        self.backend.end_if(frame);
        Ok(())
    }

    fn compile_loop(
        &mut self,
        id: NodeId,
        condition: NodeId,
        body: NodeId,
        check_first: bool,
        negative: bool,
    ) -> CompileResult {
        let body_type = self.type_of(body)?;
        let frame = self.backend.begin_loop(check_first, &body_type);
        self.compile_value(body)?;
        self.backend.begin_loop_condition(&frame);
        let mut condition = self.compile_condition(condition)?;
        if negative {
            condition = condition.negate();
        }
        self.backend.end_loop(frame, condition).map_err(|kind| self.error(id, kind))
    }

    /// Returns leave a placeholder of their own type behind so the
    /// enclosing expression still sees one value.
    fn compile_return(&mut self, id: NodeId, ty: &TypeRef, value: Option<NodeId>) -> CompileResult {
        let Some((method, declared)) = self.returns.last().cloned() else {
            return Err(self.unsupported(id, "return outside a method"));
        };
        match value {
            Some(value) => self.compile_converted(value, &declared)?,
            None if !declared.is_void() => {
                return Err(self.error(
                    id,
                    CompileErrorKind::UnknownReturnCategory {
                        method,
                        declared,
                        found: TypeRef::void(),
                    },
                ))
            }
            None => {}
        }
        self.backend.emit_return(&declared).map_err(|kind| self.error(id, kind))?;
        self.backend.emit_default(ty);
        Ok(())
    }
}
