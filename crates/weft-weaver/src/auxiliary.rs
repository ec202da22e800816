//! Shared auxiliary types
//!
//! Compiler-generated types reachable from advice (closure classes, lambda
//! caches) are copied into a target module once per (generated type, target
//! module) pair, no matter how many items use them.

use std::collections::{BTreeMap, BTreeSet};

use weft_metadata::{ModuleSet, ReferenceCollector, TypeDef, TypeName};

use crate::item::ItemId;

/// One compiler-generated type materialized in one target module
#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliaryType {
    /// Generated type in the advice module
    pub source: TypeName,
    /// Target module
    pub module: String,
    /// Name of the copy
    pub target: TypeName,
    /// Items whose advice references it
    pub users: BTreeSet<ItemId>,
    /// The copy, once cloned
    pub clone: Option<TypeDef>,
}

/// Top-level name of the copy of `source` in `module`
///
/// Nested generated types are flattened to one top-level type so that the
/// copy does not depend on its original declaring type being woven too.
pub fn auxiliary_name(source: &TypeName, module: &str) -> TypeName {
    TypeName::new(module, source.namespace.clone(), source.path.join("_"))
}

/// Outermost compiler-generated type `name` is within, if any
pub fn compiler_generated_root(set: &ModuleSet, name: &TypeName) -> Option<TypeName> {
    name.ancestors().into_iter().rev().find(|ancestor| {
        set.type_def(ancestor)
            .map(TypeDef::is_compiler_generated)
            .unwrap_or(false)
    })
}

/// Compiler-generated roots referenced by `references`, transitively
/// through the generated types themselves
pub fn discover(set: &ModuleSet, references: &ReferenceCollector) -> BTreeSet<TypeName> {
    let mut found = BTreeSet::new();
    let mut pending: Vec<TypeName> = references
        .types
        .iter()
        .filter_map(|name| compiler_generated_root(set, name))
        .collect();
    while let Some(root) = pending.pop() {
        if !found.insert(root.clone()) {
            continue;
        }
        let Some(def) = set.type_def(&root) else {
            continue;
        };
        let mut inner = ReferenceCollector::new();
        inner.visit_type(def);
        pending.extend(
            inner
                .types
                .iter()
                .filter_map(|name| compiler_generated_root(set, name))
                .filter(|other| !found.contains(other)),
        );
    }
    found
}

/// Global map of auxiliary types
#[derive(Debug, Clone, Default)]
pub struct Auxiliaries {
    map: BTreeMap<(TypeName, String), AuxiliaryType>,
}

impl Auxiliaries {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of `source` in `module`, if materialized
    pub fn get(&self, source: &TypeName, module: &str) -> Option<&AuxiliaryType> {
        self.map.get(&(source.clone(), module.to_string()))
    }

    /// Record that `user` needs `source` in `module`, creating the entry on
    /// first use
    pub fn register(&mut self, source: &TypeName, module: &str, user: ItemId) -> &AuxiliaryType {
        let entry = self
            .map
            .entry((source.clone(), module.to_string()))
            .or_insert_with(|| AuxiliaryType {
                source: source.clone(),
                module: module.to_string(),
                target: auxiliary_name(source, module),
                users: BTreeSet::new(),
                clone: None,
            });
        entry.users.insert(user);
        entry
    }

    /// Drop users that are no longer live, and entries left without users
    pub fn retain_users(&mut self, is_live: impl Fn(ItemId) -> bool) {
        for auxiliary in self.map.values_mut() {
            auxiliary.users.retain(|user| is_live(*user));
        }
        self.map.retain(|_, auxiliary| !auxiliary.users.is_empty());
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = &AuxiliaryType> {
        self.map.values()
    }

    /// Mutable entries in key order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AuxiliaryType> {
        self.map.values_mut()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether nothing was materialized
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_metadata::{
        member_flags, type_flags, FieldDef, MethodBody, MethodDef, Module, TypeSig,
    };

    fn advice_set() -> ModuleSet {
        let mut module = Module::new("Aspects");
        let mut audit = TypeDef::new("Aspects", "Audit", 0);
        let mut closure = TypeDef::new("", "<>c", type_flags::COMPILER_GENERATED);
        let cache = TypeName::new("Aspects", "Aspects", "Audit").nested("<>c__Cache");
        closure
            .fields
            .push(FieldDef::new("cache", member_flags::STATIC, TypeSig::Named(cache)));
        audit.nested.push(closure);
        audit.nested.push(TypeDef::new("", "<>c__Cache", type_flags::COMPILER_GENERATED));
        audit.methods.push(
            MethodDef::new("Run", 0, TypeSig::void(), Vec::new())
                .with_body(MethodBody::new(Vec::new())),
        );
        module.types.push(audit);
        let mut set = ModuleSet::new();
        set.insert(module);
        set
    }

    #[test]
    fn test_root_and_name() {
        let set = advice_set();
        let audit = TypeName::new("Aspects", "Aspects", "Audit");
        let inner = audit.nested("<>c").nested("Deeper");
        assert_eq!(compiler_generated_root(&set, &inner), Some(audit.nested("<>c")));
        assert_eq!(compiler_generated_root(&set, &audit), None);
        let name = auxiliary_name(&audit.nested("<>c"), "App");
        assert_eq!(name.to_string(), "[App]Aspects.Audit_<>c");
    }

    #[test]
    fn test_discovery_is_transitive() {
        let set = advice_set();
        let audit = TypeName::new("Aspects", "Aspects", "Audit");
        let mut refs = ReferenceCollector::new();
        refs.visit_sig(&TypeSig::Named(audit.nested("<>c")));
        let found = discover(&set, &refs);
        assert_eq!(found.len(), 2);
        assert!(found.contains(&audit.nested("<>c__Cache")));
    }

    #[test]
    fn test_one_entry_per_module() {
        let source = TypeName::new("Aspects", "Aspects", "Audit").nested("<>c");
        let mut auxiliaries = Auxiliaries::new();
        auxiliaries.register(&source, "App", ItemId(0));
        auxiliaries.register(&source, "App", ItemId(1));
        auxiliaries.register(&source, "Lib", ItemId(2));
        assert_eq!(auxiliaries.len(), 2);
        assert_eq!(auxiliaries.get(&source, "App").map(|aux| aux.users.len()), Some(2));
        auxiliaries.retain_users(|id| id != ItemId(2));
        assert_eq!(auxiliaries.len(), 1);
    }
}
