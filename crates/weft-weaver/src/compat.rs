//! Structural compatibility
//!
//! Stateless comparisons of type and member references. Generic parameters
//! are compared by owner kind and position; their declared names never
//! matter.

use weft_metadata::{MethodRef, TypeSig};

use crate::generics::supertypes;
use crate::view::WovenView;

/// Structural type equality
pub fn same_type(a: &TypeSig, b: &TypeSig) -> bool {
    match (a, b) {
        (TypeSig::Named(a), TypeSig::Named(b)) => a == b,
        (
            TypeSig::Generic {
                base: base_a,
                args: args_a,
            },
            TypeSig::Generic {
                base: base_b,
                args: args_b,
            },
        ) => base_a == base_b && same_types(args_a, args_b),
        (TypeSig::ByRef(a), TypeSig::ByRef(b)) | (TypeSig::Array(a), TypeSig::Array(b)) => {
            same_type(a, b)
        }
        (TypeSig::GenericParam(a), TypeSig::GenericParam(b)) => {
            a.owner == b.owner && a.position == b.position
        }
        _ => false,
    }
}

/// Pairwise structural equality of two type lists
pub fn same_types(a: &[TypeSig], b: &[TypeSig]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same_type(a, b))
}

/// Same name, generic arity, return type and parameter types
pub fn same_method_signature(a: &MethodRef, b: &MethodRef) -> bool {
    a.name == b.name
        && a.generic_arity == b.generic_arity
        && same_type(&a.return_type, &b.return_type)
        && same_types(&a.params, &b.params)
}

/// Whether a value of type `from` can be used where `to` is expected
///
/// Holds for identical types, for any supertype in `from`'s resolved
/// base/interface closure with matching generic arguments, and for boxing
/// to `System.Object`.
pub fn is_assignable(view: &WovenView<'_>, from: &TypeSig, to: &TypeSig) -> bool {
    if same_type(from, to) {
        return true;
    }
    match (from, to) {
        (TypeSig::ByRef(_), _) | (_, TypeSig::ByRef(_)) => false,
        (_, to) if to.is_object() => true,
        (TypeSig::Array(_), _) => false,
        (TypeSig::GenericParam(_), _) => false,
        _ => supertypes(view, from)
            .iter()
            .any(|scope| same_type(&scope.sig(), to)),
    }
}

/// Whether `sig` names a reference type that can hold null
pub fn accepts_null(view: &WovenView<'_>, sig: &TypeSig) -> bool {
    match sig {
        TypeSig::ByRef(_) | TypeSig::GenericParam(_) => false,
        TypeSig::Array(_) => true,
        TypeSig::Named(name) | TypeSig::Generic { base: name, .. } => !view.is_value_type(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Overlay;
    use weft_metadata::{type_flags, InterfaceImpl, Module, ModuleSet, TypeDef, TypeName};

    fn sample_set() -> ModuleSet {
        let mut module = Module::new("App");
        let mut order = TypeDef::new("App", "Order", 0);
        order
            .interfaces
            .push(InterfaceImpl::new(TypeSig::Named(TypeName::new("App", "App", "IOrder"))));
        module.types.push(order);
        module
            .types
            .push(TypeDef::new("App", "IOrder", type_flags::INTERFACE));
        module
            .types
            .push(TypeDef::new("App", "Money", type_flags::VALUE_TYPE));
        let mut set = ModuleSet::new();
        set.insert(module);
        set
    }

    #[test]
    fn test_generic_param_names_do_not_matter() {
        assert!(same_type(
            &TypeSig::method_param(0, "T"),
            &TypeSig::method_param(0, "U")
        ));
        assert!(!same_type(
            &TypeSig::method_param(0, "T"),
            &TypeSig::type_param(0, "T")
        ));
        assert!(!same_type(
            &TypeSig::method_param(0, "T"),
            &TypeSig::method_param(1, "T")
        ));
    }

    #[test]
    fn test_wrappers_recurse() {
        let a = TypeSig::ByRef(Box::new(TypeSig::Array(Box::new(TypeSig::int32()))));
        let b = TypeSig::ByRef(Box::new(TypeSig::Array(Box::new(TypeSig::int32()))));
        assert!(same_type(&a, &b));
        assert!(!same_type(&a, &TypeSig::Array(Box::new(TypeSig::int32()))));
    }

    #[test]
    fn test_assignable_through_interfaces_and_boxing() {
        let set = sample_set();
        let overlay = Overlay::new();
        let view = WovenView::new(&set, &overlay);
        let order = TypeSig::Named(TypeName::new("App", "App", "Order"));
        let iorder = TypeSig::Named(TypeName::new("App", "App", "IOrder"));
        let money = TypeSig::Named(TypeName::new("App", "App", "Money"));
        assert!(is_assignable(&view, &order, &iorder));
        assert!(!is_assignable(&view, &iorder, &order));
        assert!(is_assignable(&view, &money, &TypeSig::object()));
        assert!(!accepts_null(&view, &money));
        assert!(accepts_null(&view, &order));
    }
}
