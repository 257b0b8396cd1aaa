//! Host-platform reflection.
//!
//! The type checker never hard-codes library classes. It asks a
//! [`HostReflection`] implementation which types exist, how they relate, and
//! which overload of a method best fits a tuple of argument types. Answers
//! must be deterministic for identical inputs: the type checker caches them.
//!
//! [`HostTypes`] is a table-driven implementation. [`HostTypes::standard`]
//! describes the small slice of the platform library the compiler and its
//! reference interpreter understand.

use rustc_hash::FxHashMap;

use kiln_common::{DispatchKind, MethodSignature, TypeRef};

use crate::resolve::{select_overload, Supertypes};

/// Name of the constructor pseudo-method.
pub const CONSTRUCTOR: &str = "new";

/// Packages whose classes are visible by their short name without an import.
const AUTO_IMPORTED: &[&str] = &["java.lang."];

/// What the compiler needs to know about host classes.
pub trait HostReflection: Supertypes {
    /// Resolve a type name (qualified, or short for auto-imported
    /// packages) to a host type.
    fn lookup_type(&self, name: &str) -> Option<TypeRef>;

    /// The best-matching overload of `name` on `target` for `args`.
    ///
    /// `want_static` selects between static and instance methods. For the
    /// constructor pseudo-method [`CONSTRUCTOR`] only constructors declared
    /// directly on `target` are considered.
    fn find_method(
        &self,
        target: &TypeRef,
        name: &str,
        args: &[TypeRef],
        want_static: bool,
    ) -> Option<MethodSignature>;
}

/// One class or interface in a [`HostTypes`] table.
#[derive(Clone, Debug)]
pub struct HostClass {
    ty: TypeRef,
    superclass: Option<TypeRef>,
    interfaces: Vec<TypeRef>,
    interface: bool,
    methods: Vec<MethodSignature>,
}

impl HostClass {
    pub fn class(name: &str) -> Self {
        HostClass {
            ty: TypeRef::new(name),
            superclass: None,
            interfaces: Vec::new(),
            interface: false,
            methods: Vec::new(),
        }
    }

    pub fn interface(name: &str) -> Self {
        HostClass {
            interface: true,
            ..HostClass::class(name)
        }
    }

    pub fn extends(mut self, superclass: &str) -> Self {
        self.superclass = Some(TypeRef::new(superclass));
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(TypeRef::new(interface));
        self
    }

    /// An instance method; interface methods dispatch through the interface.
    pub fn method(mut self, name: &str, params: &[TypeRef], returns: TypeRef) -> Self {
        let dispatch = if self.interface {
            DispatchKind::Interface
        } else {
            DispatchKind::Virtual
        };
        self.methods.push(MethodSignature::new(
            self.ty.clone(),
            name,
            params.to_vec(),
            returns,
            dispatch,
        ));
        self
    }

    pub fn static_method(mut self, name: &str, params: &[TypeRef], returns: TypeRef) -> Self {
        self.methods.push(MethodSignature::new(
            self.ty.clone(),
            name,
            params.to_vec(),
            returns,
            DispatchKind::Static,
        ));
        self
    }

    pub fn constructor(mut self, params: &[TypeRef]) -> Self {
        self.methods.push(MethodSignature::new(
            self.ty.clone(),
            CONSTRUCTOR,
            params.to_vec(),
            self.ty.clone(),
            DispatchKind::Constructor,
        ));
        self
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn is_interface(&self) -> bool {
        self.interface
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }
}

/// A table of host classes keyed by qualified name.
#[derive(Clone, Debug, Default)]
pub struct HostTypes {
    classes: FxHashMap<String, HostClass>,
}

impl HostTypes {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, class: HostClass) -> Self {
        self.insert(class);
        self
    }

    pub fn insert(&mut self, class: HostClass) {
        self.classes.insert(class.ty.canonical(), class);
    }

    pub fn class(&self, ty: &TypeRef) -> Option<&HostClass> {
        if ty.is_array() {
            return None;
        }
        self.classes.get(ty.name())
    }

    /// The standard library slice: `object`, `string`, `Math`, `System`,
    /// `Integer`, `StringBuilder`, `List` and `ArrayList`.
    pub fn standard() -> Self {
        let int = TypeRef::int;
        let long = TypeRef::long;
        let float = TypeRef::float;
        let double = TypeRef::double;
        let boolean = TypeRef::boolean;
        let string = TypeRef::string;
        let object = TypeRef::object;
        let builder = || TypeRef::new("java.lang.StringBuilder");

        let mut math = HostClass::class("java.lang.Math");
        for ty in [int(), long(), float(), double()] {
            math = math
                .static_method("max", &[ty.clone(), ty.clone()], ty.clone())
                .static_method("min", &[ty.clone(), ty.clone()], ty.clone())
                .static_method("abs", &[ty.clone()], ty);
        }
        math = math
            .static_method("sqrt", &[double()], double())
            .static_method("pow", &[double(), double()], double());

        let mut string_class = HostClass::class("string")
            .extends("object")
            .method("length", &[], int())
            .method("charAt", &[int()], TypeRef::char())
            .method("concat", &[string()], string())
            .method("substring", &[int()], string())
            .method("substring", &[int(), int()], string())
            .method("indexOf", &[string()], int())
            .method("isEmpty", &[], boolean())
            .method("toUpperCase", &[], string())
            .method("toLowerCase", &[], string());
        for ty in [int(), long(), double(), boolean(), object()] {
            string_class = string_class.static_method("valueOf", &[ty], string());
        }

        let mut string_builder = HostClass::class("java.lang.StringBuilder")
            .extends("object")
            .constructor(&[])
            .constructor(&[string()]);
        for ty in [string(), int(), long(), double(), TypeRef::char(), boolean(), object()] {
            string_builder = string_builder.method("append", &[ty], builder());
        }
        string_builder = string_builder.method("length", &[], int());

        HostTypes::new()
            .with(
                HostClass::class("object")
                    .constructor(&[])
                    .method("toString", &[], string())
                    .method("equals", &[object()], boolean())
                    .method("hashCode", &[], int()),
            )
            .with(string_class)
            .with(math)
            .with(
                HostClass::class("java.lang.System")
                    .extends("object")
                    .static_method("currentTimeMillis", &[], long())
                    .static_method("nanoTime", &[], long()),
            )
            .with(
                HostClass::class("java.lang.Integer")
                    .extends("object")
                    .static_method("parseInt", &[string()], int())
                    .static_method("toString", &[int()], string()),
            )
            .with(string_builder)
            .with(
                HostClass::interface("java.util.List")
                    .method("size", &[], int())
                    .method("get", &[int()], object())
                    .method("add", &[object()], boolean())
                    .method("isEmpty", &[], boolean()),
            )
            .with(
                HostClass::class("java.util.ArrayList")
                    .extends("object")
                    .implements("java.util.List")
                    .constructor(&[])
                    .constructor(&[int()]),
            )
    }
}

impl Supertypes for HostTypes {
    fn supertypes(&self, ty: &TypeRef) -> Vec<TypeRef> {
        if ty.is_array() || ty.is_primitive() || *ty == TypeRef::object() {
            return Vec::new();
        }
        let Some(class) = self.class(ty) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(class.interfaces.len() + 1);
        match &class.superclass {
            Some(sup) => out.push(sup.clone()),
            None => out.push(TypeRef::object()),
        }
        out.extend(class.interfaces.iter().cloned());
        out
    }
}

impl HostReflection for HostTypes {
    fn lookup_type(&self, name: &str) -> Option<TypeRef> {
        let wanted = TypeRef::new(name);
        let found = if self.classes.contains_key(wanted.name()) {
            wanted.name().to_string()
        } else {
            AUTO_IMPORTED
                .iter()
                .map(|package| format!("{}{}", package, wanted.name()))
                .find(|qualified| self.classes.contains_key(qualified))?
        };
        Some(if wanted.is_array() {
            TypeRef::array_of(found)
        } else {
            TypeRef::new(found)
        })
    }

    fn find_method(
        &self,
        target: &TypeRef,
        name: &str,
        args: &[TypeRef],
        want_static: bool,
    ) -> Option<MethodSignature> {
        if name == CONSTRUCTOR {
            let class = self.class(target)?;
            if class.interface {
                return None;
            }
            let candidates: Vec<MethodSignature> = class
                .methods
                .iter()
                .filter(|m| m.dispatch == DispatchKind::Constructor)
                .cloned()
                .collect();
            return select_overload(&candidates, args, self).cloned();
        }

        // Declaring class first, then supertypes breadth-first.
        let mut order = vec![if target.is_array() {
            TypeRef::object()
        } else {
            target.clone()
        }];
        let mut i = 0;
        while i < order.len() {
            for sup in self.supertypes(&order[i]) {
                if !order.contains(&sup) {
                    order.push(sup);
                }
            }
            i += 1;
        }

        let candidates: Vec<MethodSignature> = order
            .iter()
            .filter_map(|ty| self.class(ty))
            .flat_map(|class| class.methods.iter())
            .filter(|m| {
                m.name == name
                    && m.dispatch != DispatchKind::Constructor
                    && m.is_static() == want_static
            })
            .cloned()
            .collect();
        select_overload(&candidates, args, self).cloned()
    }
}
