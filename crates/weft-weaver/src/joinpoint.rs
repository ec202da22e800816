//! Join points
//!
//! A join point identifies exactly where a contribution attaches: a module,
//! a type, a member, or one instruction of a method body.

use serde::{Deserialize, Serialize};
use weft_metadata::{
    member_flags, CustomAttribute, Instruction, MethodDef, Module, ModuleSet, TypeDef, TypeName,
};

/// A member of a type, by kind and index in the declaring type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemberId {
    /// Index into `TypeDef::fields`
    Field(usize),
    /// Index into `TypeDef::methods`
    Method(usize),
    /// Index into `TypeDef::properties`
    Property(usize),
    /// Index into `TypeDef::events`
    Event(usize),
}

/// A location in a target module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Joinpoint {
    /// A module as a whole
    Assembly {
        /// Module name
        module: String,
    },
    /// A type
    Type {
        /// Type name
        ty: TypeName,
    },
    /// A member of a type
    Member {
        /// Declaring type
        ty: TypeName,
        /// Member
        member: MemberId,
    },
    /// An instruction inside a method body
    Instruction {
        /// Declaring type of the calling method
        ty: TypeName,
        /// Calling method index
        method: usize,
        /// Instruction index in the body
        offset: usize,
    },
}

impl Joinpoint {
    /// Module the join point lives in
    pub fn module(&self) -> &str {
        match self {
            Joinpoint::Assembly { module } => module,
            Joinpoint::Type { ty }
            | Joinpoint::Member { ty, .. }
            | Joinpoint::Instruction { ty, .. } => &ty.scope,
        }
    }

    /// Declaring type (the type itself for type join points)
    pub fn declaring_type(&self) -> Option<&TypeName> {
        match self {
            Joinpoint::Assembly { .. } => None,
            Joinpoint::Type { ty }
            | Joinpoint::Member { ty, .. }
            | Joinpoint::Instruction { ty, .. } => Some(ty),
        }
    }

    /// Method the join point is in or on
    pub fn method(&self) -> Option<usize> {
        match self {
            Joinpoint::Member {
                member: MemberId::Method(index),
                ..
            } => Some(*index),
            Joinpoint::Instruction { method, .. } => Some(*method),
            _ => None,
        }
    }

    /// Instruction offset, for instruction join points
    pub fn offset(&self) -> Option<usize> {
        match self {
            Joinpoint::Instruction { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// Whether this join point is module-scoped
    pub fn is_assembly(&self) -> bool {
        matches!(self, Joinpoint::Assembly { .. })
    }

    /// Attributes of the element the join point designates; instruction
    /// join points designate their method
    pub fn attributes<'s>(&self, set: &'s ModuleSet) -> Option<&'s [CustomAttribute]> {
        match self {
            Joinpoint::Assembly { module } => set.get(module).map(|m| m.attributes.as_slice()),
            Joinpoint::Type { ty } => set.type_def(ty).map(|def| def.attributes.as_slice()),
            Joinpoint::Member { ty, member } => member_attributes(set.type_def(ty)?, *member),
            Joinpoint::Instruction { ty, method, .. } => set
                .type_def(ty)?
                .methods
                .get(*method)
                .map(|m| m.attributes.as_slice()),
        }
    }

    /// Mutable attributes of the designated element within its module
    pub fn attributes_mut<'m>(&self, module: &'m mut Module) -> Option<&'m mut Vec<CustomAttribute>> {
        match self {
            Joinpoint::Assembly { .. } => Some(&mut module.attributes),
            Joinpoint::Type { ty } => module.type_def_mut(ty).map(|def| &mut def.attributes),
            Joinpoint::Member { ty, member } => member_attributes_mut(module.type_def_mut(ty)?, *member),
            Joinpoint::Instruction { ty, method, .. } => module
                .type_def_mut(ty)?
                .methods
                .get_mut(*method)
                .map(|m| &mut m.attributes),
        }
    }

    /// Human readable description
    pub fn describe(&self, set: &ModuleSet) -> String {
        match self {
            Joinpoint::Assembly { module } => format!("[{}]", module),
            Joinpoint::Type { ty } => ty.to_string(),
            Joinpoint::Member { ty, member } => {
                let def = set.type_def(ty);
                let name = def.and_then(|def| member_name(def, *member)).unwrap_or("?");
                format!("{}::{}", ty, name)
            }
            Joinpoint::Instruction { ty, method, offset } => {
                let name = set
                    .type_def(ty)
                    .and_then(|def| def.methods.get(*method))
                    .map(|m| m.name.as_str())
                    .unwrap_or("?");
                format!("{}::{}@{}", ty, name, offset)
            }
        }
    }
}

/// Name of a member by id
pub fn member_name(ty: &TypeDef, member: MemberId) -> Option<&str> {
    match member {
        MemberId::Field(index) => ty.fields.get(index).map(|f| f.name.as_str()),
        MemberId::Method(index) => ty.methods.get(index).map(|m| m.name.as_str()),
        MemberId::Property(index) => ty.properties.get(index).map(|p| p.name.as_str()),
        MemberId::Event(index) => ty.events.get(index).map(|e| e.name.as_str()),
    }
}

/// Attributes of a member by id
pub fn member_attributes(ty: &TypeDef, member: MemberId) -> Option<&[CustomAttribute]> {
    match member {
        MemberId::Field(index) => ty.fields.get(index).map(|f| f.attributes.as_slice()),
        MemberId::Method(index) => ty.methods.get(index).map(|m| m.attributes.as_slice()),
        MemberId::Property(index) => ty.properties.get(index).map(|p| p.attributes.as_slice()),
        MemberId::Event(index) => ty.events.get(index).map(|e| e.attributes.as_slice()),
    }
}

/// Mutable attributes of a member by id
pub fn member_attributes_mut(ty: &mut TypeDef, member: MemberId) -> Option<&mut Vec<CustomAttribute>> {
    match member {
        MemberId::Field(index) => ty.fields.get_mut(index).map(|f| &mut f.attributes),
        MemberId::Method(index) => ty.methods.get_mut(index).map(|m| &mut m.attributes),
        MemberId::Property(index) => ty.properties.get_mut(index).map(|p| &mut p.attributes),
        MemberId::Event(index) => ty.events.get_mut(index).map(|e| &mut e.attributes),
    }
}

/// Enumerates the join points of the target modules
pub struct JoinpointContainer<'a> {
    set: &'a ModuleSet,
    modules: Vec<String>,
}

impl<'a> JoinpointContainer<'a> {
    /// Container over the listed modules of `set`
    pub fn new(set: &'a ModuleSet, modules: Vec<String>) -> Self {
        Self { set, modules }
    }

    /// Module universe
    pub fn set(&self) -> &'a ModuleSet {
        self.set
    }

    /// Target module names present in the set
    pub fn modules(&self) -> impl Iterator<Item = &str> + '_ {
        self.modules
            .iter()
            .filter(|name| self.set.get(name).is_some())
            .map(String::as_str)
    }

    /// Every weavable type of the target modules, nested types included
    pub fn types(&self) -> Vec<(TypeName, &'a TypeDef)> {
        let mut result = Vec::new();
        for module in self.modules() {
            let Some(module) = self.set.get(module) else {
                continue;
            };
            for (name, def) in module.all_types() {
                let generated = name
                    .ancestors()
                    .iter()
                    .filter_map(|ancestor| module.type_def(ancestor))
                    .any(TypeDef::is_compiler_generated);
                if !generated {
                    result.push((name, def));
                }
            }
        }
        result
    }

    /// Weavable members of a type
    pub fn members(&self, ty: &TypeDef) -> Vec<MemberId> {
        let weavable = |flags: u32| flags & member_flags::COMPILER_GENERATED == 0;
        let mut members = Vec::new();
        members.extend(
            ty.fields
                .iter()
                .enumerate()
                .filter(|(_, field)| weavable(field.flags))
                .map(|(index, _)| MemberId::Field(index)),
        );
        members.extend(
            ty.methods
                .iter()
                .enumerate()
                .filter(|(_, method)| weavable(method.flags) && !is_accessor(method))
                .map(|(index, _)| MemberId::Method(index)),
        );
        members.extend(
            ty.properties
                .iter()
                .enumerate()
                .filter(|(_, property)| weavable(property.flags))
                .map(|(index, _)| MemberId::Property(index)),
        );
        members.extend(
            ty.events
                .iter()
                .enumerate()
                .filter(|(_, event)| weavable(event.flags))
                .map(|(index, _)| MemberId::Event(index)),
        );
        members
    }

    /// Instructions of a method body with their offsets
    pub fn instructions(&self, method: &'a MethodDef) -> Vec<(usize, &'a Instruction)> {
        method
            .body
            .iter()
            .flat_map(|body| body.instructions.iter().enumerate())
            .collect()
    }
}

fn is_accessor(method: &MethodDef) -> bool {
    method.flags & member_flags::SPECIAL_NAME != 0 && method.flags & member_flags::RT_SPECIAL_NAME == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_metadata::{type_flags, FieldDef, Module, TypeSig};

    fn sample_set() -> ModuleSet {
        let mut module = Module::new("App");
        let mut order = TypeDef::new("App", "Order", 0);
        order.fields.push(FieldDef::new("total", 0, TypeSig::int32()));
        order.fields.push(FieldDef::new(
            "<x>k__Backing",
            member_flags::COMPILER_GENERATED,
            TypeSig::int32(),
        ));
        order.methods.push(MethodDef::new(
            "get_Total",
            member_flags::SPECIAL_NAME,
            TypeSig::int32(),
            Vec::new(),
        ));
        order.methods.push(MethodDef::new("Add", 0, TypeSig::void(), Vec::new()));
        order
            .nested
            .push(TypeDef::new("", "<>c", type_flags::COMPILER_GENERATED));
        module.types.push(order);
        let mut set = ModuleSet::new();
        set.insert(module);
        set
    }

    #[test]
    fn test_accessors() {
        let ty = TypeName::new("App", "App", "Order");
        let jp = Joinpoint::Instruction {
            ty: ty.clone(),
            method: 1,
            offset: 3,
        };
        assert_eq!(jp.module(), "App");
        assert_eq!(jp.declaring_type(), Some(&ty));
        assert_eq!(jp.method(), Some(1));
        assert_eq!(jp.offset(), Some(3));
        assert!(Joinpoint::Assembly {
            module: "App".to_string()
        }
        .declaring_type()
        .is_none());
    }

    #[test]
    fn test_container_skips_compiler_generated() {
        let set = sample_set();
        let container = JoinpointContainer::new(&set, vec!["App".to_string(), "Missing".to_string()]);
        assert_eq!(container.modules().count(), 1);
        let types = container.types();
        assert_eq!(types.len(), 1);
        let members = container.members(types[0].1);
        assert_eq!(members, vec![MemberId::Field(0), MemberId::Method(1)]);
    }

    #[test]
    fn test_describe_member() {
        let set = sample_set();
        let jp = Joinpoint::Member {
            ty: TypeName::new("App", "App", "Order"),
            member: MemberId::Method(1),
        };
        assert_eq!(jp.describe(&set), "[App]App.Order::Add");
    }
}
