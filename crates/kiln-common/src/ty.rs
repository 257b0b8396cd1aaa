//! Nominal type references.
//!
//! A [`TypeRef`] is a value type: a canonical name plus an array flag. Two
//! references are interchangeable exactly when their canonical strings
//! (`name` or `name[]`) match. There is deliberately no subtyping here;
//! assignability questions are answered by the type checker.

use std::fmt;

/// Suffix marking an array type in canonical form.
const ARRAY_SUFFIX: &str = "[]";

/// A reference to a nominal type, optionally an array of it.
///
/// Construction normalises a trailing `[]` in the name into the array flag,
/// so the derived equality and hashing agree with the canonical string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef {
    name: String,
    array: bool,
}

impl TypeRef {
    /// Create a type reference from a name, which may carry a `[]` suffix.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.strip_suffix(ARRAY_SUFFIX) {
            Some(component) => TypeRef {
                name: component.to_string(),
                array: true,
            },
            None => TypeRef { name, array: false },
        }
    }

    /// Create an array type whose component is `name`.
    pub fn array_of(name: impl Into<String>) -> Self {
        TypeRef {
            name: name.into(),
            array: true,
        }
    }

    pub fn int() -> Self {
        TypeRef::new("int")
    }

    pub fn long() -> Self {
        TypeRef::new("long")
    }

    pub fn float() -> Self {
        TypeRef::new("float")
    }

    pub fn double() -> Self {
        TypeRef::new("double")
    }

    pub fn boolean() -> Self {
        TypeRef::new("boolean")
    }

    pub fn byte() -> Self {
        TypeRef::new("byte")
    }

    pub fn short() -> Self {
        TypeRef::new("short")
    }

    pub fn char() -> Self {
        TypeRef::new("char")
    }

    pub fn void() -> Self {
        TypeRef::new("void")
    }

    pub fn string() -> Self {
        TypeRef::new("string")
    }

    pub fn object() -> Self {
        TypeRef::new("object")
    }

    /// The element name, without any array suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_array(&self) -> bool {
        self.array
    }

    /// The component type of an array type.
    pub fn component(&self) -> Option<TypeRef> {
        self.array.then(|| TypeRef {
            name: self.name.clone(),
            array: false,
        })
    }

    /// The canonical string form: `name` or `name[]`.
    pub fn canonical(&self) -> String {
        if self.array {
            format!("{}{}", self.name, ARRAY_SUFFIX)
        } else {
            self.name.clone()
        }
    }

    pub fn is_void(&self) -> bool {
        self.category() == RuntimeCategory::Void
    }

    pub fn is_primitive(&self) -> bool {
        self.category().is_primitive()
    }

    /// The runtime category values of this type are stored and operated on as.
    pub fn category(&self) -> RuntimeCategory {
        RuntimeCategory::of(self)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.array {
            write!(f, "{}", ARRAY_SUFFIX)?;
        }
        Ok(())
    }
}

/// How a value is represented at runtime.
///
/// Backends select opcodes by category rather than by type name, so an
/// unhandled category shows up as a non-exhaustive match.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeCategory {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    /// 32-bit integer.
    NarrowInt,
    /// 64-bit integer.
    WideInt,
    Float32,
    Float64,
    /// Objects, strings and arrays.
    Reference,
}

impl RuntimeCategory {
    pub fn of(ty: &TypeRef) -> RuntimeCategory {
        if ty.is_array() {
            return RuntimeCategory::Reference;
        }
        match ty.name() {
            "void" => RuntimeCategory::Void,
            "boolean" => RuntimeCategory::Boolean,
            "byte" => RuntimeCategory::Byte,
            "char" => RuntimeCategory::Char,
            "short" => RuntimeCategory::Short,
            "int" => RuntimeCategory::NarrowInt,
            "long" => RuntimeCategory::WideInt,
            "float" => RuntimeCategory::Float32,
            "double" => RuntimeCategory::Float64,
            _ => RuntimeCategory::Reference,
        }
    }

    pub fn is_primitive(self) -> bool {
        !matches!(self, RuntimeCategory::Reference | RuntimeCategory::Void)
    }

    /// Number of local-variable slots a value of this category occupies.
    pub fn slot_width(self) -> u16 {
        match self {
            RuntimeCategory::WideInt | RuntimeCategory::Float64 => 2,
            RuntimeCategory::Void => 0,
            _ => 1,
        }
    }

    /// Categories that are stored and compared as a 32-bit integer.
    pub fn is_int_like(self) -> bool {
        matches!(
            self,
            RuntimeCategory::Boolean
                | RuntimeCategory::Byte
                | RuntimeCategory::Char
                | RuntimeCategory::Short
                | RuntimeCategory::NarrowInt
        )
    }
}

impl fmt::Display for RuntimeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeCategory::Void => "void",
            RuntimeCategory::Boolean => "boolean",
            RuntimeCategory::Byte => "byte",
            RuntimeCategory::Char => "char",
            RuntimeCategory::Short => "short",
            RuntimeCategory::NarrowInt => "int",
            RuntimeCategory::WideInt => "long",
            RuntimeCategory::Float32 => "float",
            RuntimeCategory::Float64 => "double",
            RuntimeCategory::Reference => "reference",
        };
        write!(f, "{}", name)
    }
}

/// How a resolved method is invoked.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    Static,
    Virtual,
    Interface,
    Constructor,
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchKind::Static => "static",
            DispatchKind::Virtual => "virtual",
            DispatchKind::Interface => "interface",
            DispatchKind::Constructor => "constructor",
        };
        write!(f, "{}", name)
    }
}

/// A resolved method: where it lives, what it takes and what it returns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub owner: TypeRef,
    pub name: String,
    pub params: Vec<TypeRef>,
    pub return_type: TypeRef,
    pub dispatch: DispatchKind,
}

impl MethodSignature {
    pub fn new(
        owner: TypeRef,
        name: impl Into<String>,
        params: Vec<TypeRef>,
        return_type: TypeRef,
        dispatch: DispatchKind,
    ) -> Self {
        MethodSignature {
            owner,
            name: name.into(),
            params,
            return_type,
            dispatch,
        }
    }

    pub fn is_static(&self) -> bool {
        self.dispatch == DispatchKind::Static
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.owner, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, "): {}", self.return_type)
    }
}

// ── Console primitive ──────────────────────────────────────────────────

/// Functions that print their single argument. `puts` ends the line.
pub const PRINT_FUNCTIONS: &[&str] = &["puts", "print"];

pub fn is_print(name: &str) -> bool {
    PRINT_FUNCTIONS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_suffix_is_normalised() {
        let a = TypeRef::new("int[]");
        let b = TypeRef::array_of("int");
        assert_eq!(a, b);
        assert!(a.is_array());
        assert_eq!(a.canonical(), "int[]");
        assert_eq!(a.to_string(), "int[]");
        assert_eq!(a.component(), Some(TypeRef::int()));
        assert_eq!(TypeRef::int().component(), None);
    }

    #[test]
    fn equality_follows_canonical_form() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(TypeRef::new("string"));
        set.insert(TypeRef::string());
        set.insert(TypeRef::new("string[]"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn categories() {
        assert_eq!(TypeRef::int().category(), RuntimeCategory::NarrowInt);
        assert_eq!(TypeRef::long().category(), RuntimeCategory::WideInt);
        assert_eq!(TypeRef::float().category(), RuntimeCategory::Float32);
        assert_eq!(TypeRef::double().category(), RuntimeCategory::Float64);
        assert_eq!(TypeRef::string().category(), RuntimeCategory::Reference);
        assert_eq!(TypeRef::new("long[]").category(), RuntimeCategory::Reference);
        assert_eq!(TypeRef::void().category(), RuntimeCategory::Void);
        assert!(TypeRef::boolean().is_primitive());
        assert!(!TypeRef::void().is_primitive());
        assert_eq!(RuntimeCategory::Float64.slot_width(), 2);
        assert_eq!(RuntimeCategory::NarrowInt.slot_width(), 1);
    }

    #[test]
    fn signature_display() {
        let sig = MethodSignature::new(
            TypeRef::new("Math"),
            "max",
            vec![TypeRef::int(), TypeRef::int()],
            TypeRef::int(),
            DispatchKind::Static,
        );
        assert_eq!(sig.to_string(), "Math.max(int, int): int");
        assert!(sig.is_static());
        assert_eq!(sig.arity(), 2);
    }

    #[test]
    fn print_functions() {
        assert!(is_print("puts"));
        assert!(is_print("print"));
        assert!(!is_print("println"));
    }
}
