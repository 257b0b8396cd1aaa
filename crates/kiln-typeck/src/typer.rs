//! The type registry and the fixed-point inference driver.
//!
//! A [`Typer`] is created per compilation unit. It owns every table the
//! inference rules consult and extend:
//!
//! - `known_types`: built-in types, script classes, import aliases
//! - `local_types`: per-scope local variable bindings, append-only
//! - `field_types`: per-class field bindings, append-only
//! - `first_bindings`: the node that binds each local and field, the first
//!   assignment or declaration in evaluation order
//! - `method_types`: resolved host overloads keyed by target, name, arity
//!   and argument tuple
//! - `deferred`: nodes whose last inference attempt returned no type
//!
//! [`Typer::infer_all`] runs one sweep over the whole tree, then re-sweeps
//! the deferred set until it is empty, a sweep resolves nothing, or
//! `initial_deferred + 1` sweeps have run.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info_span, trace};

use kiln_ast::{Ast, NodeId, NodeKind};
use kiln_common::{DispatchKind, MethodSignature, Position, TypeRef};

use crate::builtins::{builtin_types, PrimitiveOps};
use crate::error::{InferenceError, UnresolvedNode};
use crate::host::{HostReflection, CONSTRUCTOR};
use crate::resolve::{is_assignable, select_overload, Supertypes};

/// Options for [`Typer::infer_all`].
#[derive(Clone, Debug)]
pub struct InferOptions {
    /// Raise [`InferenceError::Unresolved`] when nodes remain deferred.
    pub strict: bool,
}

impl Default for InferOptions {
    fn default() -> Self {
        InferOptions { strict: true }
    }
}

/// What the fixed-point driver did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InferStats {
    /// Nodes deferred by the initial sweep.
    pub initial_deferred: usize,
    /// Re-sweeps run after the initial sweep.
    pub sweeps: usize,
    /// Nodes still deferred at the end.
    pub remaining: usize,
}

/// A local in its scope, or a field of its class.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Binding {
    Local(NodeId, String),
    Field(TypeRef, String),
}

type ArgTable = FxHashMap<Vec<TypeRef>, MethodSignature>;
type MethodCache = FxHashMap<TypeRef, FxHashMap<String, FxHashMap<usize, ArgTable>>>;

pub struct Typer<'h> {
    host: &'h dyn HostReflection,
    known_types: FxHashMap<String, TypeRef>,
    local_types: FxHashMap<NodeId, FxHashMap<String, TypeRef>>,
    field_types: FxHashMap<TypeRef, FxHashMap<String, TypeRef>>,
    first_bindings: FxHashMap<Binding, NodeId>,
    /// Script-defined classes and their declared superclass, unresolved.
    script_classes: FxHashMap<TypeRef, Option<TypeRef>>,
    /// Methods learned from script method definitions, in learning order.
    defined_methods: FxHashMap<TypeRef, Vec<MethodSignature>>,
    /// Method definitions already learned.
    registered: FxHashSet<NodeId>,
    method_types: MethodCache,
    pub(crate) deferred: BTreeSet<NodeId>,
    scope_cache: FxHashMap<NodeId, NodeId>,
    reasons: FxHashMap<NodeId, String>,
    pub(crate) primitives: PrimitiveOps,
}

impl<'h> Typer<'h> {
    pub fn new(host: &'h dyn HostReflection) -> Self {
        let known_types = builtin_types()
            .into_iter()
            .map(|ty| (ty.canonical(), ty))
            .collect();
        Typer {
            host,
            known_types,
            local_types: FxHashMap::default(),
            field_types: FxHashMap::default(),
            first_bindings: FxHashMap::default(),
            script_classes: FxHashMap::default(),
            defined_methods: FxHashMap::default(),
            registered: FxHashSet::default(),
            method_types: FxHashMap::default(),
            deferred: BTreeSet::new(),
            scope_cache: FxHashMap::default(),
            reasons: FxHashMap::default(),
            primitives: PrimitiveOps::new(),
        }
    }

    // ── Driver ──────────────────────────────────────────────────────────

    /// Infer types for the whole tree.
    pub fn infer_all(
        &mut self,
        ast: &mut Ast,
        options: &InferOptions,
    ) -> Result<InferStats, InferenceError> {
        let span = info_span!("infer_all", file = ast.file());
        let _guard = span.enter();

        self.register_classes(ast);
        let root = ast.root();
        self.register_bindings(ast, root);
        self.infer(ast, root)?;

        let initial_deferred = self.deferred.len();
        let max_sweeps = initial_deferred + 1;
        debug!(deferred = initial_deferred, "initial sweep done");

        let mut sweeps = 0;
        while !self.deferred.is_empty() && sweeps < max_sweeps {
            sweeps += 1;
            let before = self.deferred.len();
            let pending: Vec<NodeId> = self.deferred.iter().copied().collect();
            for id in pending {
                if ast.inferred_type(id).is_none() {
                    self.infer(ast, id)?;
                }
            }
            let after = self.deferred.len();
            debug!(
                sweep = sweeps,
                resolved = before.saturating_sub(after),
                remaining = after,
                "inference sweep"
            );
            if after >= before {
                break;
            }
        }

        let stats = InferStats {
            initial_deferred,
            sweeps,
            remaining: self.deferred.len(),
        };
        if stats.remaining > 0 && options.strict {
            return Err(InferenceError::Unresolved(self.unresolved_nodes(ast)));
        }
        Ok(stats)
    }

    /// Nodes currently deferred.
    pub fn deferred(&self) -> &BTreeSet<NodeId> {
        &self.deferred
    }

    pub fn unresolved_nodes(&self, ast: &Ast) -> Vec<UnresolvedNode> {
        self.deferred
            .iter()
            .map(|&id| UnresolvedNode {
                node: id,
                description: ast.describe(id),
                position: ast.position(id),
                parent: ast.parent(id).map(|p| ast.describe(p)),
                reason: self.reasons.get(&id).cloned(),
            })
            .collect()
    }

    /// Mark `id` deferred and remember why.
    pub(crate) fn defer(&mut self, id: NodeId, reason: String) {
        trace!(node = id.0, %reason, "deferred");
        self.deferred.insert(id);
        self.reasons.insert(id, reason);
    }

    pub(crate) fn resolved(&mut self, id: NodeId) {
        self.deferred.remove(&id);
        self.reasons.remove(&id);
    }

    // ── Types ───────────────────────────────────────────────────────────

    fn register_classes(&mut self, ast: &Ast) {
        for id in ast.ids() {
            match ast.kind(id) {
                NodeKind::Script { class_name, .. } => self.declare_class(class_name, None),
                NodeKind::ClassDefinition {
                    name, superclass, ..
                } => self.declare_class(name, superclass.clone()),
                _ => {}
            }
        }
    }

    fn declare_class(&mut self, name: &str, superclass: Option<TypeRef>) {
        let ty = TypeRef::new(name);
        self.known_types.insert(name.to_string(), ty.clone());
        self.script_classes.insert(ty, superclass);
    }

    pub fn is_script_class(&self, ty: &TypeRef) -> bool {
        self.script_classes.contains_key(ty)
    }

    /// Resolve a type name as written in source.
    pub fn resolve_type(&self, ty: &TypeRef) -> Option<TypeRef> {
        let base = match self.known_types.get(ty.name()) {
            Some(known) => known.clone(),
            None => self.host.lookup_type(ty.name())?,
        };
        Some(if ty.is_array() {
            TypeRef::array_of(base.name())
        } else {
            base
        })
    }

    /// Make `ty` known under `alias`.
    pub fn learn_type_alias(&mut self, alias: &str, ty: TypeRef) {
        debug!(alias, target = %ty, "type alias");
        self.known_types.insert(alias.to_string(), ty);
    }

    /// The class type that code at `id` belongs to.
    pub(crate) fn class_type(&self, ast: &Ast, id: NodeId) -> TypeRef {
        let class = ast.enclosing_class(id);
        TypeRef::new(ast.class_name(class).unwrap_or_default())
    }

    // ── Locals and fields ───────────────────────────────────────────────

    /// The enclosing scope of `id`, memoised.
    pub fn scope_of(&mut self, ast: &Ast, id: NodeId) -> NodeId {
        *self
            .scope_cache
            .entry(id)
            .or_insert_with(|| ast.enclosing_scope(id))
    }

    /// Record which node binds each local and field. Children come before
    /// their parent, matching the order the code runs in.
    fn register_bindings(&mut self, ast: &Ast, id: NodeId) {
        for child in ast.children(id) {
            self.register_bindings(ast, child);
        }
        let binding = match ast.kind(id) {
            NodeKind::LocalDeclaration { name, .. } | NodeKind::LocalAssignment { name, .. } => {
                Binding::Local(self.scope_of(ast, id), name.clone())
            }
            NodeKind::FieldDeclaration { name, .. } | NodeKind::FieldAssignment { name, .. } => {
                Binding::Field(self.class_type(ast, id), name.clone())
            }
            _ => return,
        };
        self.first_bindings.entry(binding).or_insert(id);
    }

    /// The binding node of the local `name` when `id` is not it and the
    /// local has no type yet. `id` must wait for that node.
    pub(crate) fn pending_local_binding(&self, scope: NodeId, name: &str, id: NodeId) -> Option<NodeId> {
        if self.local_type(scope, name).is_some() {
            return None;
        }
        let first = *self.first_bindings.get(&Binding::Local(scope, name.to_string()))?;
        (first != id).then_some(first)
    }

    /// Like [`Typer::pending_local_binding`], for fields.
    pub(crate) fn pending_field_binding(&self, class: &TypeRef, name: &str, id: NodeId) -> Option<NodeId> {
        if self.field_type(class, name).is_some() {
            return None;
        }
        let first = *self
            .first_bindings
            .get(&Binding::Field(class.clone(), name.to_string()))?;
        (first != id).then_some(first)
    }

    pub fn local_type(&self, scope: NodeId, name: &str) -> Option<&TypeRef> {
        self.local_types.get(&scope)?.get(name)
    }

    /// Bind a local's type on first sight; later bindings must widen to
    /// it. Returns the bound type.
    pub fn learn_local_type(
        &mut self,
        scope: NodeId,
        name: &str,
        ty: TypeRef,
        position: Position,
    ) -> Result<TypeRef, InferenceError> {
        if let Some(bound) = self.local_type(scope, name).cloned() {
            if !is_assignable(&ty, &bound, &*self) {
                return Err(InferenceError::IncompatibleAssignment {
                    name: name.to_string(),
                    bound,
                    found: ty,
                    position,
                });
            }
            return Ok(bound);
        }
        trace!(scope = scope.0, name, ty = %ty, "learned local");
        self.local_types
            .entry(scope)
            .or_default()
            .insert(name.to_string(), ty.clone());
        Ok(ty)
    }

    pub fn field_type(&self, class: &TypeRef, name: &str) -> Option<&TypeRef> {
        self.field_types.get(class)?.get(name)
    }

    pub fn learn_field_type(
        &mut self,
        class: &TypeRef,
        name: &str,
        ty: TypeRef,
        position: Position,
    ) -> Result<TypeRef, InferenceError> {
        if let Some(bound) = self.field_type(class, name).cloned() {
            if !is_assignable(&ty, &bound, &*self) {
                return Err(InferenceError::IncompatibleAssignment {
                    name: format!("@{}", name),
                    bound,
                    found: ty,
                    position,
                });
            }
            return Ok(bound);
        }
        trace!(class = %class, name, ty = %ty, "learned field");
        self.field_types
            .entry(class.clone())
            .or_default()
            .insert(name.to_string(), ty.clone());
        Ok(ty)
    }

    // ── Methods ─────────────────────────────────────────────────────────

    /// Record a script method. Each definition is learned once.
    pub(crate) fn learn_method(&mut self, definition: NodeId, signature: MethodSignature) {
        if !self.registered.insert(definition) {
            return;
        }
        debug!(method = %signature, "learned method");
        self.defined_methods
            .entry(signature.owner.clone())
            .or_default()
            .push(signature);
    }

    pub(crate) fn is_learned(&self, definition: NodeId) -> bool {
        self.registered.contains(&definition)
    }

    /// Resolve `name` on `target`: script classes first (walking script
    /// superclasses), then the host through the method cache.
    pub fn find_method(
        &mut self,
        target: &TypeRef,
        name: &str,
        args: &[TypeRef],
        want_static: bool,
    ) -> Option<MethodSignature> {
        let mut current = target.clone();
        for _ in 0..=self.script_classes.len() {
            if let Some(defined) = self.defined_methods.get(&current) {
                let candidates: Vec<MethodSignature> = defined
                    .iter()
                    .filter(|m| m.name == name && m.is_static() == want_static)
                    .cloned()
                    .collect();
                if let Some(found) = select_overload(&candidates, args, &*self) {
                    return Some(found.clone());
                }
            }
            match self.script_classes.get(&current) {
                Some(superclass) => {
                    current = superclass
                        .as_ref()
                        .and_then(|s| self.resolve_type(s))
                        .unwrap_or_else(TypeRef::object);
                }
                None => return self.host_method(&current, name, args, want_static),
            }
        }
        None
    }

    /// Resolve a constructor call `target.new(args)`.
    ///
    /// Script classes only have the implicit no-argument constructor.
    pub fn find_constructor(&mut self, target: &TypeRef, args: &[TypeRef]) -> Option<MethodSignature> {
        if self.is_script_class(target) {
            return args.is_empty().then(|| {
                MethodSignature::new(
                    target.clone(),
                    CONSTRUCTOR,
                    Vec::new(),
                    target.clone(),
                    DispatchKind::Constructor,
                )
            });
        }
        self.host_method(target, CONSTRUCTOR, args, true)
    }

    /// Look up a host method, consulting `method_types` first. Only
    /// successful lookups are cached.
    fn host_method(
        &mut self,
        target: &TypeRef,
        name: &str,
        args: &[TypeRef],
        want_static: bool,
    ) -> Option<MethodSignature> {
        let cached = self
            .method_types
            .get(target)
            .and_then(|by_name| by_name.get(name))
            .and_then(|by_arity| by_arity.get(&args.len()))
            .and_then(|by_args| by_args.get(args));
        if let Some(sig) = cached {
            if sig.is_static() == want_static || sig.dispatch == DispatchKind::Constructor {
                debug!(target = %target, name, "method cache hit");
                return Some(sig.clone());
            }
        }

        debug!(target = %target, name, "method cache miss");
        let sig = self.host.find_method(target, name, args, want_static)?;
        self.method_types
            .entry(target.clone())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .entry(args.len())
            .or_default()
            .insert(args.to_vec(), sig.clone());
        Some(sig)
    }
}

impl Supertypes for Typer<'_> {
    fn supertypes(&self, ty: &TypeRef) -> Vec<TypeRef> {
        match self.script_classes.get(ty) {
            Some(superclass) => vec![superclass
                .as_ref()
                .and_then(|s| self.resolve_type(s))
                .unwrap_or_else(TypeRef::object)],
            None => self.host.supertypes(ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostTypes;

    #[test]
    fn locals_bind_once_and_accept_widening() {
        let host = HostTypes::standard();
        let mut typer = Typer::new(&host);
        let scope = NodeId(0);
        let pos = Position::line(1);

        let bound = typer.learn_local_type(scope, "x", TypeRef::long(), pos).unwrap();
        assert_eq!(bound, TypeRef::long());
        let again = typer.learn_local_type(scope, "x", TypeRef::int(), pos).unwrap();
        assert_eq!(again, TypeRef::long());

        let err = typer
            .learn_local_type(scope, "x", TypeRef::string(), pos)
            .unwrap_err();
        assert!(matches!(err, InferenceError::IncompatibleAssignment { .. }));
        assert_eq!(typer.local_type(scope, "x"), Some(&TypeRef::long()));
    }

    #[test]
    fn aliases_and_host_names_resolve() {
        let host = HostTypes::standard();
        let mut typer = Typer::new(&host);
        assert_eq!(typer.resolve_type(&TypeRef::new("int[]")), Some(TypeRef::array_of("int")));
        assert_eq!(
            typer.resolve_type(&TypeRef::new("Math")),
            Some(TypeRef::new("java.lang.Math"))
        );
        assert_eq!(typer.resolve_type(&TypeRef::new("ArrayList")), None);
        typer.learn_type_alias("ArrayList", TypeRef::new("java.util.ArrayList"));
        assert_eq!(
            typer.resolve_type(&TypeRef::new("ArrayList")),
            Some(TypeRef::new("java.util.ArrayList"))
        );
    }
}
