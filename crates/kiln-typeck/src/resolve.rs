//! Assignability and overload selection.
//!
//! Assignability is identity plus widening: primitive widening along
//! `byte -> short -> int -> long -> float -> double` (with `char -> int`),
//! and reference widening up the supertype graph. Every reference type
//! widens to `object`. There is no boxing.
//!
//! Overload selection ranks applicable candidates by total widening cost.
//! An exact match costs zero and always wins; remaining ties go to the
//! candidate declared first.

use kiln_common::{MethodSignature, RuntimeCategory, TypeRef};

/// Direct supertypes of a reference type.
pub trait Supertypes {
    /// The superclass and implemented interfaces of `ty`, if known.
    fn supertypes(&self, ty: &TypeRef) -> Vec<TypeRef>;
}

/// Cost charged when a reference reaches `object` without a known path.
const OBJECT_FALLBACK_COST: u32 = 16;

/// Position on the primitive widening ladder.
fn ladder_rank(category: RuntimeCategory) -> Option<u32> {
    match category {
        RuntimeCategory::Byte => Some(0),
        RuntimeCategory::Short => Some(1),
        RuntimeCategory::NarrowInt => Some(2),
        RuntimeCategory::WideInt => Some(3),
        RuntimeCategory::Float32 => Some(4),
        RuntimeCategory::Float64 => Some(5),
        RuntimeCategory::Char
        | RuntimeCategory::Boolean
        | RuntimeCategory::Void
        | RuntimeCategory::Reference => None,
    }
}

/// Steps needed to widen one primitive category to another.
pub fn primitive_widening(from: RuntimeCategory, to: RuntimeCategory) -> Option<u32> {
    if from == to {
        return Some(0);
    }
    if from == RuntimeCategory::Char {
        let int_rank = ladder_rank(RuntimeCategory::NarrowInt)?;
        let to_rank = ladder_rank(to)?;
        return (to_rank >= int_rank).then(|| to_rank - int_rank + 1);
    }
    let from_rank = ladder_rank(from)?;
    let to_rank = ladder_rank(to)?;
    (to_rank > from_rank).then(|| to_rank - from_rank)
}

/// The cost of passing a `from` value where a `to` is expected, or `None`
/// when it is not assignable.
pub fn widening_cost<H: Supertypes + ?Sized>(from: &TypeRef, to: &TypeRef, hierarchy: &H) -> Option<u32> {
    if from == to {
        return Some(0);
    }
    let (from_cat, to_cat) = (from.category(), to.category());
    if from_cat == RuntimeCategory::Void || to_cat == RuntimeCategory::Void {
        return None;
    }
    if from_cat.is_primitive() || to_cat.is_primitive() {
        if from_cat.is_primitive() && to_cat.is_primitive() {
            return primitive_widening(from_cat, to_cat);
        }
        return None;
    }
    if from.is_array() {
        return (*to == TypeRef::object()).then_some(1);
    }
    if let Some(depth) = supertype_distance(from, to, hierarchy) {
        return Some(depth);
    }
    (*to == TypeRef::object()).then_some(OBJECT_FALLBACK_COST)
}

/// Breadth-first distance from `from` up to `to` in the supertype graph.
fn supertype_distance<H: Supertypes + ?Sized>(from: &TypeRef, to: &TypeRef, hierarchy: &H) -> Option<u32> {
    let mut frontier = vec![from.clone()];
    let mut seen = vec![from.clone()];
    let mut depth = 0;
    while !frontier.is_empty() {
        depth += 1;
        let mut next = Vec::new();
        for ty in &frontier {
            for sup in hierarchy.supertypes(ty) {
                if sup == *to {
                    return Some(depth);
                }
                if !seen.contains(&sup) {
                    seen.push(sup.clone());
                    next.push(sup);
                }
            }
        }
        frontier = next;
    }
    None
}

pub fn is_assignable<H: Supertypes + ?Sized>(from: &TypeRef, to: &TypeRef, hierarchy: &H) -> bool {
    widening_cost(from, to, hierarchy).is_some()
}

/// Total cost of calling `candidate` with `args`, or `None` if it does not
/// apply.
pub fn call_cost<H: Supertypes + ?Sized>(candidate: &MethodSignature, args: &[TypeRef], hierarchy: &H) -> Option<u32> {
    if candidate.params.len() != args.len() {
        return None;
    }
    candidate
        .params
        .iter()
        .zip(args)
        .map(|(param, arg)| widening_cost(arg, param, hierarchy))
        .sum()
}

/// Pick the best applicable overload for `args`.
pub fn select_overload<'a, H: Supertypes + ?Sized>(
    candidates: &'a [MethodSignature],
    args: &[TypeRef],
    hierarchy: &H,
) -> Option<&'a MethodSignature> {
    let mut best: Option<(u32, &MethodSignature)> = None;
    for candidate in candidates {
        let Some(cost) = call_cost(candidate, args, hierarchy) else {
            continue;
        };
        match best {
            Some((best_cost, _)) if best_cost <= cost => {}
            _ => best = Some((cost, candidate)),
        }
    }
    best.map(|(_, sig)| sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::DispatchKind;

    struct Flat;

    impl Supertypes for Flat {
        fn supertypes(&self, ty: &TypeRef) -> Vec<TypeRef> {
            match ty.name() {
                "ArrayList" => vec![TypeRef::new("AbstractList"), TypeRef::new("List")],
                "AbstractList" => vec![TypeRef::object()],
                _ => Vec::new(),
            }
        }
    }

    fn sig(params: &[TypeRef], ret: TypeRef) -> MethodSignature {
        MethodSignature::new(
            TypeRef::new("Math"),
            "max",
            params.to_vec(),
            ret,
            DispatchKind::Static,
        )
    }

    #[test]
    fn primitive_ladder() {
        use RuntimeCategory::*;
        assert_eq!(primitive_widening(NarrowInt, WideInt), Some(1));
        assert_eq!(primitive_widening(NarrowInt, Float64), Some(3));
        assert_eq!(primitive_widening(Char, NarrowInt), Some(1));
        assert_eq!(primitive_widening(Char, Short), None);
        assert_eq!(primitive_widening(WideInt, NarrowInt), None);
        assert_eq!(primitive_widening(Boolean, NarrowInt), None);
        assert_eq!(primitive_widening(Boolean, Boolean), Some(0));
    }

    #[test]
    fn references_widen_up_the_graph() {
        let list = TypeRef::new("ArrayList");
        assert_eq!(widening_cost(&list, &TypeRef::new("List"), &Flat), Some(1));
        assert_eq!(widening_cost(&list, &TypeRef::object(), &Flat), Some(2));
        assert_eq!(
            widening_cost(&TypeRef::string(), &TypeRef::object(), &Flat),
            Some(OBJECT_FALLBACK_COST)
        );
        assert_eq!(widening_cost(&TypeRef::int(), &TypeRef::object(), &Flat), None);
        assert_eq!(widening_cost(&TypeRef::object(), &list, &Flat), None);
    }

    #[test]
    fn exact_match_beats_widening() {
        let candidates = vec![
            sig(&[TypeRef::long(), TypeRef::long()], TypeRef::long()),
            sig(&[TypeRef::int(), TypeRef::int()], TypeRef::int()),
        ];
        let chosen = select_overload(&candidates, &[TypeRef::int(), TypeRef::int()], &Flat).unwrap();
        assert_eq!(chosen.return_type, TypeRef::int());
    }

    #[test]
    fn narrowest_widening_wins_and_ties_go_to_first() {
        let candidates = vec![
            sig(&[TypeRef::double()], TypeRef::double()),
            sig(&[TypeRef::long()], TypeRef::long()),
            sig(&[TypeRef::float()], TypeRef::float()),
        ];
        let chosen = select_overload(&candidates, &[TypeRef::int()], &Flat).unwrap();
        assert_eq!(chosen.return_type, TypeRef::long());

        let tied = vec![
            sig(&[TypeRef::long(), TypeRef::int()], TypeRef::string()),
            sig(&[TypeRef::int(), TypeRef::long()], TypeRef::object()),
        ];
        let chosen = select_overload(&tied, &[TypeRef::int(), TypeRef::int()], &Flat).unwrap();
        assert_eq!(chosen.return_type, TypeRef::string());
    }

    #[test]
    fn inapplicable_candidates_are_skipped() {
        let candidates = vec![sig(&[TypeRef::int()], TypeRef::int())];
        assert!(select_overload(&candidates, &[TypeRef::string()], &Flat).is_none());
        assert!(select_overload(&candidates, &[], &Flat).is_none());
    }
}
