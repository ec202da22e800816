//! The module universe
//!
//! A [`ModuleSet`] holds every loaded module (system, advice, targets and
//! their dependencies) and resolves type names across them.

use crate::definition::TypeDef;
use crate::module::Module;
use crate::name::TypeName;
use crate::signature::TypeSig;
use rustc_hash::FxHashMap;

/// Index of a module in a [`ModuleSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

/// Collection of loaded modules addressable by name
#[derive(Debug, Clone, Default)]
pub struct ModuleSet {
    modules: Vec<Module>,
    by_name: FxHashMap<String, ModuleId>,
}

impl ModuleSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a module, replacing any module with the same name
    pub fn insert(&mut self, module: Module) -> ModuleId {
        if let Some(&id) = self.by_name.get(&module.name) {
            self.modules[id.0 as usize] = module;
            return id;
        }
        let id = ModuleId(self.modules.len() as u32);
        self.by_name.insert(module.name.clone(), id);
        self.modules.push(module);
        id
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Id of the module with the given name
    pub fn id_of(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    /// Module by name
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.id_of(name).map(|id| self.module(id))
    }

    /// Mutable module by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Module> {
        let id = self.id_of(name)?;
        Some(self.module_mut(id))
    }

    /// Module by id
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    /// Mutable module by id
    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0 as usize]
    }

    /// All modules in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(index, module)| (ModuleId(index as u32), module))
    }

    /// Type definition by name
    pub fn type_def(&self, name: &TypeName) -> Option<&TypeDef> {
        self.get(&name.scope)?.type_def(name)
    }

    /// Mutable type definition by name
    pub fn type_def_mut(&mut self, name: &TypeName) -> Option<&mut TypeDef> {
        self.get_mut(&name.scope)?.type_def_mut(name)
    }

    /// Definition a signature refers to (generic instances resolve to their
    /// definition)
    pub fn resolve<'s>(&'s self, sig: &'s TypeSig) -> Option<(&'s TypeName, &'s TypeDef)> {
        let name = sig.type_name()?;
        self.type_def(name).map(|def| (name, def))
    }

    /// Types with the given namespace and nesting path in the listed modules
    pub fn find_types(&self, modules: &[String], namespace: &str, path: &[String]) -> Vec<TypeName> {
        modules
            .iter()
            .filter_map(|module| {
                let name = TypeName {
                    scope: module.clone(),
                    namespace: namespace.to_string(),
                    path: path.to_vec(),
                };
                self.type_def(&name).map(|_| name)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_with_type(module: &str, ns: &str, name: &str) -> Module {
        let mut m = Module::new(module);
        m.types.push(TypeDef::new(ns, name, 0));
        m
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut set = ModuleSet::new();
        let a = set.insert(module_with_type("A", "Ns", "T"));
        let b = set.insert(module_with_type("B", "Ns", "T"));
        assert_ne!(a, b);
        assert_eq!(set.id_of("B"), Some(b));
        assert!(set.type_def(&TypeName::new("A", "Ns", "T")).is_some());
        assert!(set.type_def(&TypeName::new("C", "Ns", "T")).is_none());
    }

    #[test]
    fn test_insert_replaces_same_name() {
        let mut set = ModuleSet::new();
        let first = set.insert(module_with_type("A", "Ns", "T"));
        let second = set.insert(module_with_type("A", "Ns", "U"));
        assert_eq!(first, second);
        assert_eq!(set.len(), 1);
        assert!(set.type_def(&TypeName::new("A", "Ns", "U")).is_some());
    }

    #[test]
    fn test_find_types_across_modules() {
        let mut set = ModuleSet::new();
        set.insert(module_with_type("A", "Ns", "T"));
        set.insert(module_with_type("B", "Ns", "T"));
        set.insert(module_with_type("C", "Other", "T"));
        let modules = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let found = set.find_types(&modules, "Ns", &["T".to_string()]);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_resolve_generic_instance() {
        let mut set = ModuleSet::new();
        set.insert(module_with_type("A", "Ns", "Box"));
        let sig = TypeSig::Generic {
            base: TypeName::new("A", "Ns", "Box"),
            args: vec![TypeSig::int32()],
        };
        let (name, def) = set.resolve(&sig).unwrap();
        assert_eq!(name.name(), "Box");
        assert_eq!(def.name, "Box");
    }
}
