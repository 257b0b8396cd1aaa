//! Per-node inference rules.
//!
//! [`Typer::infer`] returns `Ok(None)` when a node cannot be typed yet; the
//! node is then deferred and retried by the driver. Hard errors
//! (incompatible assignments, return and branch mismatches) abort
//! immediately.
//!
//! Containers always visit every child before giving up, so the initial
//! sweep reaches every node of the tree.

use tracing::{debug, trace};

use kiln_ast::{Ast, MethodDef, NodeId, NodeKind};
use kiln_common::{is_print, DispatchKind, MethodSignature, Position, TypeRef};

use crate::error::InferenceError;
use crate::host::CONSTRUCTOR;
use crate::resolve::{is_assignable, select_overload};
use crate::typer::Typer;

type InferResult = Result<Option<TypeRef>, InferenceError>;

impl Typer<'_> {
    /// Infer the type of `id`, recording it on success and deferring the
    /// node otherwise. Already-typed nodes return their recorded type.
    pub fn infer(&mut self, ast: &mut Ast, id: NodeId) -> InferResult {
        if let Some(ty) = ast.inferred_type(id) {
            return Ok(Some(ty.clone()));
        }
        let inferred = self.infer_node(ast, id)?;
        match &inferred {
            Some(ty) => {
                trace!(node = %ast.describe(id), ty = %ty, "resolved");
                ast.node_mut(id).record_type(ty.clone());
                self.resolved(id);
            }
            None => {
                self.deferred.insert(id);
            }
        }
        Ok(inferred)
    }

    /// Infer every node in `ids`; `None` unless all of them resolved.
    fn infer_each(&mut self, ast: &mut Ast, ids: &[NodeId]) -> Result<Option<Vec<TypeRef>>, InferenceError> {
        let mut types = Vec::with_capacity(ids.len());
        let mut complete = true;
        for &id in ids {
            match self.infer(ast, id)? {
                Some(ty) => types.push(ty),
                None => complete = false,
            }
        }
        Ok(complete.then_some(types))
    }

    fn infer_node(&mut self, ast: &mut Ast, id: NodeId) -> InferResult {
        let position = ast.position(id);
        match ast.kind(id).clone() {
            NodeKind::Script { class_name, body } => {
                Ok(self.infer(ast, body)?.map(|_| TypeRef::new(class_name)))
            }
            NodeKind::Body { statements } => {
                let Some(types) = self.infer_each(ast, &statements)? else {
                    return Ok(None);
                };
                let produces_value = statements
                    .last()
                    .is_some_and(|&last| !ast.kind(last).is_definition());
                Ok(Some(match types.last() {
                    Some(ty) if produces_value => ty.clone(),
                    _ => TypeRef::void(),
                }))
            }
            NodeKind::ClassDefinition { name, body, .. } => {
                Ok(self.infer(ast, body)?.map(|_| TypeRef::new(name)))
            }
            NodeKind::Arguments { required } => {
                Ok(self.infer_each(ast, &required)?.map(|_| TypeRef::void()))
            }
            NodeKind::RequiredArgument { name } => {
                let scope = self.scope_of(ast, id);
                match self.local_type(scope, &name) {
                    Some(ty) => Ok(Some(ty.clone())),
                    None => {
                        self.defer(id, format!("argument `{}` has no declared type", name));
                        Ok(None)
                    }
                }
            }
            NodeKind::MethodDefinition(def) | NodeKind::StaticMethodDefinition(def) => {
                self.infer_method(ast, id, &def, position)
            }
            NodeKind::LocalDeclaration { name, type_node } => {
                let Some(ty) = self.infer(ast, type_node)? else {
                    return Ok(None);
                };
                let scope = self.scope_of(ast, id);
                if let Some(first) = self.pending_local_binding(scope, &name, id) {
                    self.wait_for_binding(ast, id, first, &name);
                    return Ok(None);
                }
                self.learn_local_type(scope, &name, ty.clone(), position)?;
                Ok(Some(ty))
            }
            NodeKind::LocalAssignment { name, value } => {
                let Some(ty) = self.assigned_value(ast, id, &name, value)? else {
                    return Ok(None);
                };
                let scope = self.scope_of(ast, id);
                if let Some(first) = self.pending_local_binding(scope, &name, id) {
                    self.wait_for_binding(ast, id, first, &name);
                    return Ok(None);
                }
                Ok(Some(self.learn_local_type(scope, &name, ty, position)?))
            }
            NodeKind::Local { name } => {
                let scope = self.scope_of(ast, id);
                match self.local_type(scope, &name) {
                    Some(ty) => Ok(Some(ty.clone())),
                    None => {
                        self.defer(id, format!("local `{}` has no known type", name));
                        Ok(None)
                    }
                }
            }
            NodeKind::FieldDeclaration { name, type_node } => {
                let Some(ty) = self.infer(ast, type_node)? else {
                    return Ok(None);
                };
                let class = self.class_type(ast, id);
                if let Some(first) = self.pending_field_binding(&class, &name, id) {
                    self.wait_for_binding(ast, id, first, &format!("@{}", name));
                    return Ok(None);
                }
                self.learn_field_type(&class, &name, ty.clone(), position)?;
                Ok(Some(ty))
            }
            NodeKind::FieldAssignment { name, value } => {
                let Some(ty) = self.assigned_value(ast, id, &name, value)? else {
                    return Ok(None);
                };
                let class = self.class_type(ast, id);
                if let Some(first) = self.pending_field_binding(&class, &name, id) {
                    self.wait_for_binding(ast, id, first, &format!("@{}", name));
                    return Ok(None);
                }
                Ok(Some(self.learn_field_type(&class, &name, ty, position)?))
            }
            NodeKind::Field { name } => {
                let class = self.class_type(ast, id);
                match self.field_type(&class, &name) {
                    Some(ty) => Ok(Some(ty.clone())),
                    None => {
                        self.defer(id, format!("field `@{}` has no known type", name));
                        Ok(None)
                    }
                }
            }
            NodeKind::Literal(literal) => Ok(Some(literal.ty())),
            NodeKind::Call {
                receiver,
                name,
                args,
            } => self.infer_call(ast, id, receiver, &name, &args),
            NodeKind::FunctionalCall { name, args } => {
                self.infer_functional_call(ast, id, &name, &args)
            }
            NodeKind::SelfReference => Ok(Some(self.class_type(ast, id))),
            NodeKind::TypeReference(ty) => match self.resolve_type(&ty) {
                Some(resolved) => Ok(Some(resolved)),
                None => {
                    self.defer(id, format!("unknown type `{}`", ty));
                    Ok(None)
                }
            },
            NodeKind::Not { value } => Ok(self.infer(ast, value)?.map(|_| TypeRef::boolean())),
            NodeKind::Condition { predicate } => self.infer(ast, predicate),
            NodeKind::If {
                condition,
                then_body,
                else_body,
            } => {
                let condition = self.infer(ast, condition)?;
                let then_type = self.infer(ast, then_body)?;
                let else_type = match else_body {
                    Some(body) => Some(self.infer(ast, body)?),
                    None => None,
                };
                let (Some(_), Some(then_type)) = (condition, then_type) else {
                    return Ok(None);
                };
                match else_type {
                    None => Ok(Some(then_type)),
                    Some(None) => Ok(None),
                    Some(Some(else_type)) if else_type == then_type => Ok(Some(then_type)),
                    Some(Some(else_type)) if then_type.is_void() || else_type.is_void() => {
                        Ok(Some(TypeRef::void()))
                    }
                    Some(Some(else_type)) => Err(InferenceError::BranchTypeMismatch {
                        then_type,
                        else_type,
                        position,
                    }),
                }
            }
            NodeKind::Loop {
                condition, body, ..
            } => {
                let condition = self.infer(ast, condition)?;
                let body = self.infer(ast, body)?;
                Ok((condition.is_some() && body.is_some()).then(TypeRef::void))
            }
            NodeKind::Return { value } => {
                let ty = match value {
                    Some(value) => match self.infer(ast, value)? {
                        Some(ty) => ty,
                        None => return Ok(None),
                    },
                    None => TypeRef::void(),
                };
                if let Some(method) = ast.enclosing_method(id) {
                    self.check_return(ast, method, &ty, position)?;
                }
                Ok(Some(ty))
            }
            NodeKind::Import { path } => {
                let short = path.rsplit('.').next().unwrap_or(&path).to_string();
                self.learn_type_alias(&short, TypeRef::new(path));
                Ok(Some(TypeRef::void()))
            }
            NodeKind::Noop => Ok(Some(TypeRef::void())),
        }
    }

    fn wait_for_binding(&mut self, ast: &Ast, id: NodeId, first: NodeId, name: &str) {
        let position = ast.position(first);
        self.defer(id, format!("`{}` is bound by its assignment on line {}", name, position));
    }

    /// The type of an assignment's value, deferring void values.
    fn assigned_value(
        &mut self,
        ast: &mut Ast,
        id: NodeId,
        name: &str,
        value: NodeId,
    ) -> InferResult {
        let Some(ty) = self.infer(ast, value)? else {
            return Ok(None);
        };
        if ty.is_void() {
            self.defer(id, format!("cannot assign a void value to `{}`", name));
            return Ok(None);
        }
        Ok(Some(ty))
    }

    fn declared_return(&self, ast: &Ast, method: NodeId) -> Option<TypeRef> {
        let def = ast.kind(method).method_def()?;
        def.signature
            .returns
            .as_ref()
            .and_then(|ty| self.resolve_type(ty))
    }

    fn check_return(
        &self,
        ast: &Ast,
        method: NodeId,
        found: &TypeRef,
        position: Position,
    ) -> Result<(), InferenceError> {
        let Some(declared) = self.declared_return(ast, method) else {
            return Ok(());
        };
        if declared.is_void() || is_assignable(found, &declared, self) {
            return Ok(());
        }
        let method = ast
            .kind(method)
            .method_def()
            .map(|def| def.name.clone())
            .unwrap_or_default();
        Err(InferenceError::ReturnTypeMismatch {
            method,
            declared,
            found: found.clone(),
            position,
        })
    }

    fn infer_method(
        &mut self,
        ast: &mut Ast,
        id: NodeId,
        def: &MethodDef,
        position: Position,
    ) -> InferResult {
        // Signature entries bind argument and local types in the method scope.
        for (name, declared) in &def.signature.declared {
            if self.local_type(id, name).is_some() {
                continue;
            }
            match self.resolve_type(declared) {
                Some(ty) => {
                    self.learn_local_type(id, name, ty, position)?;
                }
                None => self.defer(id, format!("unknown type `{}` in signature", declared)),
            }
        }

        let params = match self.infer(ast, def.arguments)? {
            Some(_) => ast
                .children(def.arguments)
                .into_iter()
                .map(|arg| ast.inferred_type(arg).cloned())
                .collect::<Option<Vec<_>>>(),
            None => None,
        };
        let owner = self.class_type(ast, id);
        let dispatch = if ast.is_static_method(id) {
            DispatchKind::Static
        } else {
            DispatchKind::Virtual
        };
        let declared = self.declared_return(ast, id);
        if let Some(returns) = &def.signature.returns {
            if declared.is_none() {
                self.defer(id, format!("unknown return type `{}`", returns));
            }
        }

        // A declared return type makes the method callable before its body
        // is typed, which is what recursion needs.
        if let (Some(params), Some(returns)) = (&params, &declared) {
            if !self.is_learned(id) {
                let sig = MethodSignature::new(
                    owner.clone(),
                    def.name.as_str(),
                    params.clone(),
                    returns.clone(),
                    dispatch,
                );
                self.learn_method(id, sig);
            }
        }

        let body = self.infer(ast, def.body)?;
        let (Some(params), Some(body)) = (params, body) else {
            return Ok(None);
        };
        if def.signature.returns.is_some() && declared.is_none() {
            return Ok(None);
        }

        let returns = match declared {
            Some(declared) => {
                if !declared.is_void() && !is_assignable(&body, &declared, &*self) {
                    return Err(InferenceError::ReturnTypeMismatch {
                        method: def.name.clone(),
                        declared,
                        found: body,
                        position,
                    });
                }
                declared
            }
            None => body,
        };
        let sig = MethodSignature::new(owner, def.name.as_str(), params, returns.clone(), dispatch);
        self.learn_method(id, sig);
        Ok(Some(returns))
    }

    fn infer_call(
        &mut self,
        ast: &mut Ast,
        id: NodeId,
        receiver: NodeId,
        name: &str,
        args: &[NodeId],
    ) -> InferResult {
        let receiver_type = self.infer(ast, receiver)?;
        let arg_types = self.infer_each(ast, args)?;
        let (Some(receiver_type), Some(arg_types)) = (receiver_type, arg_types) else {
            return Ok(None);
        };

        let is_static = matches!(ast.kind(receiver), NodeKind::TypeReference(_));
        let target = if is_static && name == CONSTRUCTOR {
            self.find_constructor(&receiver_type, &arg_types)
        } else if is_static {
            self.find_method(&receiver_type, name, &arg_types, true)
        } else if receiver_type.is_primitive() {
            self.primitive_operation(&receiver_type, name, &arg_types)
        } else if receiver_type.is_array() {
            self.array_operation(&receiver_type, name, &arg_types)
        } else {
            self.find_method(&receiver_type, name, &arg_types, false)
        };

        match target {
            Some(sig) => {
                debug!(call = %sig, "resolved call");
                let returns = sig.return_type.clone();
                ast.node_mut(id).record_call_target(sig);
                Ok(Some(returns))
            }
            None => {
                self.defer(
                    id,
                    format!(
                        "no method `{}` on {} for ({})",
                        name,
                        receiver_type,
                        join(&arg_types)
                    ),
                );
                Ok(None)
            }
        }
    }

    fn infer_functional_call(
        &mut self,
        ast: &mut Ast,
        id: NodeId,
        name: &str,
        args: &[NodeId],
    ) -> InferResult {
        let Some(arg_types) = self.infer_each(ast, args)? else {
            return Ok(None);
        };
        if is_print(name) && arg_types.len() == 1 {
            return Ok(Some(TypeRef::void()));
        }

        let self_type = self.class_type(ast, id);
        let target = if ast.in_static_context(id) {
            self.find_method(&self_type, name, &arg_types, true)
        } else {
            self.find_method(&self_type, name, &arg_types, false)
                .or_else(|| self.find_method(&self_type, name, &arg_types, true))
        };
        match target {
            Some(sig) => {
                let returns = sig.return_type.clone();
                ast.node_mut(id).record_call_target(sig);
                Ok(Some(returns))
            }
            None => {
                self.defer(
                    id,
                    format!("no method `{}({})` on {}", name, join(&arg_types), self_type),
                );
                Ok(None)
            }
        }
    }

    /// Operators on primitive receivers. An operator applied with the
    /// wrong number of operands still gets its nominal type; code
    /// generation reports the arity error with the node's position.
    fn primitive_operation(
        &self,
        receiver: &TypeRef,
        name: &str,
        args: &[TypeRef],
    ) -> Option<MethodSignature> {
        let candidates = self.primitives.candidates(receiver, name);
        if let Some(sig) = select_overload(candidates, args, self) {
            return Some(sig.clone());
        }
        if candidates.iter().all(|sig| sig.arity() != args.len()) {
            return candidates.first().cloned();
        }
        None
    }

    /// `length`, `[]` and `[]=` on arrays; arity is checked the same way
    /// as for primitive operators.
    fn array_operation(
        &self,
        array: &TypeRef,
        name: &str,
        args: &[TypeRef],
    ) -> Option<MethodSignature> {
        let component = array.component()?;
        let (params, returns) = match name {
            "length" => (vec![], TypeRef::int()),
            "[]" => (vec![TypeRef::int()], component),
            "[]=" => (vec![TypeRef::int(), component.clone()], component),
            _ => return None,
        };
        if params.len() == args.len()
            && !params
                .iter()
                .zip(args)
                .all(|(param, arg)| is_assignable(arg, param, self))
        {
            return None;
        }
        Some(MethodSignature::new(
            array.clone(),
            name,
            params,
            returns,
            DispatchKind::Virtual,
        ))
    }
}

fn join(types: &[TypeRef]) -> String {
    types
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
