//! Built-in types and primitive operators.
//!
//! Operators on primitive receivers (`a + b`, `-x`, `a < b`) are not host
//! methods: they are looked up in a fixed table of signatures owned by the
//! primitive type. Codegen lowers them to per-category instructions.

use rustc_hash::FxHashMap;

use kiln_common::{DispatchKind, MethodSignature, TypeRef};

pub const ARITHMETIC_OPS: &[&str] = &["+", "-", "*", "/", "%"];
pub const BITWISE_OPS: &[&str] = &["&", "|", "^"];
/// Shift counts are always `int`, whatever the receiver.
pub const SHIFT_OPS: &[&str] = &["<<", ">>"];
pub const COMPARISON_OPS: &[&str] = &["<", ">", "<=", ">=", "==", "!="];
pub const UNARY_OPS: &[&str] = &["-@", "+@"];

pub fn is_comparison(name: &str) -> bool {
    COMPARISON_OPS.contains(&name)
}

/// Type names every compilation unit knows without imports.
pub fn builtin_types() -> Vec<TypeRef> {
    vec![
        TypeRef::void(),
        TypeRef::boolean(),
        TypeRef::byte(),
        TypeRef::short(),
        TypeRef::char(),
        TypeRef::int(),
        TypeRef::long(),
        TypeRef::float(),
        TypeRef::double(),
        TypeRef::string(),
        TypeRef::object(),
    ]
}

/// Operator signatures keyed by receiver type, then operator name.
#[derive(Debug, Default)]
pub struct PrimitiveOps {
    table: FxHashMap<TypeRef, FxHashMap<String, Vec<MethodSignature>>>,
}

impl PrimitiveOps {
    pub fn new() -> Self {
        let mut ops = PrimitiveOps::default();

        let numeric = [TypeRef::int(), TypeRef::long(), TypeRef::float(), TypeRef::double()];
        for ty in &numeric {
            for op in ARITHMETIC_OPS {
                ops.add(ty, op, &[ty.clone()], ty.clone());
            }
            for op in COMPARISON_OPS {
                ops.add(ty, op, &[ty.clone()], TypeRef::boolean());
            }
            for op in UNARY_OPS {
                ops.add(ty, op, &[], ty.clone());
            }
        }
        for ty in [TypeRef::int(), TypeRef::long()] {
            for op in BITWISE_OPS {
                ops.add(&ty, op, &[ty.clone()], ty.clone());
            }
            for op in SHIFT_OPS {
                ops.add(&ty, op, &[TypeRef::int()], ty.clone());
            }
        }

        // Sub-int types compute in int.
        for ty in [TypeRef::byte(), TypeRef::short(), TypeRef::char()] {
            for op in ARITHMETIC_OPS.iter().chain(BITWISE_OPS).chain(SHIFT_OPS) {
                ops.add(&ty, op, &[TypeRef::int()], TypeRef::int());
            }
            for op in COMPARISON_OPS {
                ops.add(&ty, op, &[TypeRef::int()], TypeRef::boolean());
            }
            for op in UNARY_OPS {
                ops.add(&ty, op, &[], TypeRef::int());
            }
        }

        let boolean = TypeRef::boolean();
        for op in ["==", "!=", "&", "|", "^"] {
            ops.add(&boolean, op, &[boolean.clone()], boolean.clone());
        }
        ops
    }

    fn add(&mut self, receiver: &TypeRef, name: &str, params: &[TypeRef], returns: TypeRef) {
        self.table
            .entry(receiver.clone())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .push(MethodSignature::new(
                receiver.clone(),
                name,
                params.to_vec(),
                returns,
                DispatchKind::Virtual,
            ));
    }

    /// The candidate signatures of `name` on a primitive receiver.
    pub fn candidates(&self, receiver: &TypeRef, name: &str) -> &[MethodSignature] {
        self.table
            .get(receiver)
            .and_then(|ops| ops.get(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_return_boolean() {
        let ops = PrimitiveOps::new();
        for ty in [TypeRef::int(), TypeRef::double()] {
            let sig = &ops.candidates(&ty, "<")[0];
            assert_eq!(sig.return_type, TypeRef::boolean());
            assert_eq!(sig.params, vec![ty]);
        }
    }

    #[test]
    fn no_bitwise_on_floating_point() {
        let ops = PrimitiveOps::new();
        assert!(ops.candidates(&TypeRef::float(), "&").is_empty());
        assert_eq!(ops.candidates(&TypeRef::long(), "<<").len(), 1);
        assert!(ops.candidates(&TypeRef::double(), ">>").is_empty());
        assert_eq!(ops.candidates(&TypeRef::int(), "-@")[0].arity(), 0);
    }

    #[test]
    fn sub_int_operands_compute_in_int() {
        let ops = PrimitiveOps::new();
        let sig = &ops.candidates(&TypeRef::byte(), "+")[0];
        assert_eq!(sig.return_type, TypeRef::int());
        assert!(ops.candidates(&TypeRef::boolean(), "+").is_empty());
    }

    #[test]
    fn shift_counts_are_int() {
        let ops = PrimitiveOps::new();
        for ty in [TypeRef::int(), TypeRef::long()] {
            for op in SHIFT_OPS {
                let sig = &ops.candidates(&ty, op)[0];
                assert_eq!(sig.params, vec![TypeRef::int()]);
                assert_eq!(sig.return_type, ty);
            }
        }
    }
}
