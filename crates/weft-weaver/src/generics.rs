//! Generic resolution primitives
//!
//! Member and generic parameter resolution is always relative to a position
//! in a type's base/interface chain. A [`TypedScope`] is one such position:
//! a type together with the generic arguments it is instantiated with,
//! expressed in terms of the chain's root.

use std::rc::Rc;
use weft_metadata::{GenericOwner, MethodRef, TypeName, TypeSig};

use crate::item::ItemId;
use crate::view::{Edge, WovenView};

/// Substitute generic parameters positionally
///
/// Parameters without a corresponding argument are left in place.
pub fn substitute(sig: &TypeSig, type_args: &[TypeSig], method_args: &[TypeSig]) -> TypeSig {
    match sig {
        TypeSig::Named(_) => sig.clone(),
        TypeSig::Generic { base, args } => TypeSig::Generic {
            base: base.clone(),
            args: args
                .iter()
                .map(|arg| substitute(arg, type_args, method_args))
                .collect(),
        },
        TypeSig::ByRef(inner) => TypeSig::ByRef(Box::new(substitute(inner, type_args, method_args))),
        TypeSig::Array(inner) => TypeSig::Array(Box::new(substitute(inner, type_args, method_args))),
        TypeSig::GenericParam(param) => {
            let args = match param.owner {
                GenericOwner::Type => type_args,
                GenericOwner::Method => method_args,
            };
            args.get(param.position as usize)
                .cloned()
                .unwrap_or_else(|| sig.clone())
        }
    }
}

/// One level of a type's base/interface chain
#[derive(Debug, Clone)]
pub struct TypedScope {
    /// Type at this level
    pub ty: TypeName,
    /// Generic arguments of `ty`, already substituted
    pub args: Vec<TypeSig>,
    /// Item that contributed the edge leading here
    pub via: Option<ItemId>,
    /// Previous level
    pub parent: Option<Rc<TypedScope>>,
}

impl TypedScope {
    /// Root scope for a signature (`None` for parameters and wrappers)
    pub fn root(sig: &TypeSig) -> Option<Self> {
        let ty = sig.type_name()?.clone();
        Some(Self {
            ty,
            args: sig.generic_args().to_vec(),
            via: None,
            parent: None,
        })
    }

    /// Signature of this level
    pub fn sig(&self) -> TypeSig {
        if self.args.is_empty() {
            TypeSig::Named(self.ty.clone())
        } else {
            TypeSig::Generic {
                base: self.ty.clone(),
                args: self.args.clone(),
            }
        }
    }

    /// Substitute this level's type parameters in `sig`
    pub fn resolve(&self, sig: &TypeSig) -> TypeSig {
        substitute(sig, &self.args, &[])
    }

    /// Level reached by following `edge` from this one
    pub fn child(parent: &Rc<TypedScope>, edge: &Edge) -> Option<TypedScope> {
        let resolved = parent.resolve(&edge.sig);
        let mut scope = TypedScope::root(&resolved)?;
        scope.via = edge.origin;
        scope.parent = Some(Rc::clone(parent));
        Some(scope)
    }

    /// Number of levels above this one
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_deref();
        while let Some(scope) = current {
            depth += 1;
            current = scope.parent.as_deref();
        }
        depth
    }

    /// Whether `ty` appears on this level or any parent level
    pub fn on_path(&self, ty: &TypeName) -> bool {
        let mut current = Some(self);
        while let Some(scope) = current {
            if &scope.ty == ty {
                return true;
            }
            current = scope.parent.as_deref();
        }
        false
    }

    /// Types from the root down to this level
    pub fn path(&self) -> Vec<TypeName> {
        let mut path = Vec::new();
        let mut current = Some(self);
        while let Some(scope) = current {
            path.push(scope.ty.clone());
            current = scope.parent.as_deref();
        }
        path.reverse();
        path
    }

    /// Items that contributed edges on the path to this level
    pub fn contributing_items(&self) -> Vec<ItemId> {
        let mut items = Vec::new();
        let mut current = Some(self);
        while let Some(scope) = current {
            items.extend(scope.via);
            current = scope.parent.as_deref();
        }
        items
    }
}

/// Base type chain of `sig`, starting with `sig` itself
///
/// Stops at the first level whose base is unknown or already on the chain.
pub fn base_chain(view: &WovenView<'_>, sig: &TypeSig) -> Vec<Rc<TypedScope>> {
    let mut chain = Vec::new();
    let Some(root) = TypedScope::root(sig) else {
        return chain;
    };
    let mut current = Rc::new(root);
    loop {
        chain.push(Rc::clone(&current));
        let Some(edge) = view.base_of(&current.ty) else {
            break;
        };
        let Some(next) = TypedScope::child(&current, &edge) else {
            break;
        };
        if current.on_path(&next.ty) {
            break;
        }
        current = Rc::new(next);
    }
    chain
}

/// Every supertype of `sig` (itself, bases and all interfaces), each once
pub fn supertypes(view: &WovenView<'_>, sig: &TypeSig) -> Vec<Rc<TypedScope>> {
    let mut result: Vec<Rc<TypedScope>> = Vec::new();
    let Some(root) = TypedScope::root(sig) else {
        return result;
    };
    let mut pending = vec![Rc::new(root)];
    while let Some(scope) = pending.pop() {
        if result.iter().any(|seen| seen.ty == scope.ty && seen.args == scope.args) {
            continue;
        }
        let mut edges = view.interfaces_of(&scope.ty);
        edges.extend(view.base_of(&scope.ty));
        for edge in edges.iter().rev() {
            if let Some(next) = TypedScope::child(&scope, edge) {
                if !scope.on_path(&next.ty) {
                    pending.push(Rc::new(next));
                }
            }
        }
        result.push(scope);
    }
    result
}

/// Pairs a source method with its target so that method-owned generic
/// parameters can be resolved
#[derive(Debug, Clone, PartialEq)]
pub struct GenericResolutionContext {
    /// Method whose body or signature is being resolved
    pub source: MethodRef,
    /// Method it is resolved into
    pub target: MethodRef,
}

impl GenericResolutionContext {
    /// Pair two methods
    pub fn new(source: MethodRef, target: MethodRef) -> Self {
        Self { source, target }
    }

    /// Target-side signature for the source method's parameter `position`
    pub fn resolve(&self, position: u16, name: &str) -> Option<TypeSig> {
        if position >= self.source.generic_arity || position >= self.target.generic_arity {
            return None;
        }
        match self.target.generic_args.get(position as usize) {
            Some(arg) => Some(arg.clone()),
            None => Some(TypeSig::method_param(position, name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Overlay;
    use weft_metadata::{InterfaceImpl, Module, ModuleSet, TypeDef};

    fn generic_set() -> ModuleSet {
        // class Base<T> : IList<T>; class Derived : Base<int>
        let mut module = Module::new("App");
        let mut base = TypeDef::new("App", "Base", 0);
        base.generic_params.push(weft_metadata::GenericParamDef::new(
            "T",
            0,
            GenericOwner::Type,
        ));
        base.interfaces.push(InterfaceImpl::new(TypeSig::Generic {
            base: TypeName::new("App", "App", "IList"),
            args: vec![TypeSig::type_param(0, "T")],
        }));
        let mut derived = TypeDef::new("App", "Derived", 0);
        derived.base = Some(TypeSig::Generic {
            base: TypeName::new("App", "App", "Base"),
            args: vec![TypeSig::int32()],
        });
        module.types.push(base);
        module.types.push(derived);
        module.types.push(TypeDef::new(
            "App",
            "IList",
            weft_metadata::type_flags::INTERFACE,
        ));
        let mut set = ModuleSet::new();
        set.insert(module);
        set
    }

    #[test]
    fn test_substitute_positionally() {
        let sig = TypeSig::Array(Box::new(TypeSig::type_param(1, "U")));
        let result = substitute(&sig, &[TypeSig::int32(), TypeSig::string()], &[]);
        assert_eq!(result, TypeSig::Array(Box::new(TypeSig::string())));
        let untouched = substitute(&TypeSig::method_param(0, "M"), &[TypeSig::int32()], &[]);
        assert_eq!(untouched, TypeSig::method_param(0, "M"));
    }

    #[test]
    fn test_base_chain_substitutes_arguments() {
        let set = generic_set();
        let overlay = Overlay::new();
        let view = WovenView::new(&set, &overlay);
        let chain = base_chain(&view, &TypeSig::Named(TypeName::new("App", "App", "Derived")));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].args, vec![TypeSig::int32()]);
        assert_eq!(chain[1].depth(), 1);
    }

    #[test]
    fn test_supertypes_reach_interfaces_with_arguments() {
        let set = generic_set();
        let overlay = Overlay::new();
        let view = WovenView::new(&set, &overlay);
        let all = supertypes(&view, &TypeSig::Named(TypeName::new("App", "App", "Derived")));
        let list = all.iter().find(|scope| scope.ty.name() == "IList").unwrap();
        assert_eq!(list.args, vec![TypeSig::int32()]);
        assert_eq!(list.path().len(), 3);
    }

    #[test]
    fn test_method_context_requires_pairing() {
        let method = |arity| MethodRef {
            declaring: TypeSig::object(),
            name: "Map".to_string(),
            has_this: true,
            return_type: TypeSig::void(),
            params: Vec::new(),
            generic_arity: arity,
            generic_args: Vec::new(),
        };
        let context = GenericResolutionContext::new(method(1), method(1));
        assert_eq!(context.resolve(0, "T"), Some(TypeSig::method_param(0, "T")));
        assert_eq!(context.resolve(1, "U"), None);
        let unpaired = GenericResolutionContext::new(method(1), method(0));
        assert_eq!(unpaired.resolve(0, "T"), None);
    }
}
