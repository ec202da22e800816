//! Placeholder mappings
//!
//! Advice is authored against placeholder (prototype) types and members
//! standing in for elements of the target modules. A
//! [`PrototypeTypeMapping`] binds a placeholder type to its target type; a
//! [`PrototypeItemMapping`] binds one placeholder member reference to the
//! member found by its [`LookupPolicy`].

use std::collections::{BTreeMap, BTreeSet};

use weft_metadata::{
    member_flags, EventDef, FieldDef, FieldRef, MethodDef, MethodRef, PropertyDef, TypeName, TypeSig,
};

use crate::compat::{same_type, same_types};
use crate::error::WeaveError;
use crate::item::ItemId;

/// How a placeholder member finds its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupPolicy {
    /// Declared on the target type (contributions included)
    This,
    /// Declared on a base type of the target type
    Base,
    /// The target type, then its bases, then its interfaces
    Anywhere,
    /// Generic parameter of the target type with the same name
    GenericByName,
    /// Generic parameter of the target type at the same position
    GenericByIndex,
    /// Member of a shared compiler-generated auxiliary type
    CompilerGenerated,
}

/// Advice-side description of a placeholder member
#[derive(Debug, Clone, PartialEq)]
pub enum ProtoMember {
    /// Field
    Field {
        /// Name
        name: String,
        /// Field type
        field_type: TypeSig,
        /// Static field
        is_static: bool,
    },
    /// Method
    Method {
        /// Name
        name: String,
        /// Return type
        return_type: TypeSig,
        /// Parameter types
        params: Vec<TypeSig>,
        /// Generic arity
        arity: u16,
        /// Static method
        is_static: bool,
    },
    /// Property
    Property {
        /// Name
        name: String,
        /// Property type
        property_type: TypeSig,
        /// Indexer parameters
        params: Vec<TypeSig>,
        /// Getter method name
        getter: Option<String>,
        /// Setter method name
        setter: Option<String>,
        /// Static property
        is_static: bool,
    },
    /// Event
    Event {
        /// Name
        name: String,
        /// Handler type
        event_type: TypeSig,
        /// Adder method name
        adder: Option<String>,
        /// Remover method name
        remover: Option<String>,
        /// Static event
        is_static: bool,
    },
    /// Generic parameter of the advice type
    GenericParam {
        /// Position
        position: u16,
        /// Declared name
        name: String,
    },
}

impl ProtoMember {
    /// Describe a field
    pub fn field(def: &FieldDef) -> Self {
        ProtoMember::Field {
            name: def.name.clone(),
            field_type: def.field_type.clone(),
            is_static: def.is_static(),
        }
    }

    /// Describe a method
    pub fn method(def: &MethodDef) -> Self {
        ProtoMember::Method {
            name: def.name.clone(),
            return_type: def.return_type.clone(),
            params: def.param_types().cloned().collect(),
            arity: def.generic_params.len() as u16,
            is_static: def.is_static(),
        }
    }

    /// Describe a property
    pub fn property(def: &PropertyDef) -> Self {
        ProtoMember::Property {
            name: def.name.clone(),
            property_type: def.property_type.clone(),
            params: def.params.clone(),
            getter: def.getter.clone(),
            setter: def.setter.clone(),
            is_static: def.flags & member_flags::STATIC != 0,
        }
    }

    /// Describe an event
    pub fn event(def: &EventDef) -> Self {
        ProtoMember::Event {
            name: def.name.clone(),
            event_type: def.event_type.clone(),
            adder: def.adder.clone(),
            remover: def.remover.clone(),
            is_static: def.flags & member_flags::STATIC != 0,
        }
    }

    /// Member name
    pub fn name(&self) -> &str {
        match self {
            ProtoMember::Field { name, .. }
            | ProtoMember::Method { name, .. }
            | ProtoMember::Property { name, .. }
            | ProtoMember::Event { name, .. }
            | ProtoMember::GenericParam { name, .. } => name,
        }
    }

    /// Static member
    pub fn is_static(&self) -> bool {
        match self {
            ProtoMember::Field { is_static, .. }
            | ProtoMember::Method { is_static, .. }
            | ProtoMember::Property { is_static, .. }
            | ProtoMember::Event { is_static, .. } => *is_static,
            ProtoMember::GenericParam { .. } => false,
        }
    }
}

/// Target a placeholder member resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedMember {
    /// A field
    Field(FieldRef),
    /// A method
    Method(MethodRef),
    /// A property and its accessors
    Property {
        /// Property name
        name: String,
        /// Getter
        getter: Option<MethodRef>,
        /// Setter
        setter: Option<MethodRef>,
    },
    /// An event and its accessors
    Event {
        /// Event name
        name: String,
        /// Adder
        adder: Option<MethodRef>,
        /// Remover
        remover: Option<MethodRef>,
    },
    /// A delegate-typed field standing in for a method
    DelegateField {
        /// The field
        field: FieldRef,
        /// `Invoke` of the field's delegate type
        invoke: MethodRef,
    },
    /// A generic parameter
    GenericParam(TypeSig),
}

/// One placeholder member referenced by an item's advice
#[derive(Debug, Clone, PartialEq)]
pub struct PrototypeItemMapping {
    /// Advice type declaring the placeholder
    pub declaring: TypeName,
    /// The placeholder
    pub member: ProtoMember,
    /// Lookup policy
    pub policy: LookupPolicy,
    /// Resolved target, once found
    pub target: Option<ResolvedMember>,
}

impl PrototypeItemMapping {
    /// Unresolved mapping
    pub fn new(declaring: TypeName, member: ProtoMember, policy: LookupPolicy) -> Self {
        Self {
            declaring,
            member,
            policy,
            target: None,
        }
    }

    /// Whether `method` references this placeholder (by definition)
    pub fn matches_method(&self, declaring: &TypeName, method: &MethodRef) -> bool {
        if &self.declaring != declaring {
            return false;
        }
        match &self.member {
            ProtoMember::Method {
                name,
                return_type,
                params,
                arity,
                ..
            } => {
                name == &method.name
                    && *arity == method.generic_arity
                    && same_type(return_type, &method.return_type)
                    && same_types(params, &method.params)
            }
            ProtoMember::Property { getter, setter, .. } => {
                getter.as_deref() == Some(method.name.as_str())
                    || setter.as_deref() == Some(method.name.as_str())
            }
            ProtoMember::Event { adder, remover, .. } => {
                adder.as_deref() == Some(method.name.as_str())
                    || remover.as_deref() == Some(method.name.as_str())
            }
            _ => false,
        }
    }

    /// Whether `field` references this placeholder (by definition)
    pub fn matches_field(&self, declaring: &TypeName, field: &FieldRef) -> bool {
        &self.declaring == declaring
            && matches!(&self.member, ProtoMember::Field { name, .. } if name == &field.name)
    }

    /// Target method for a reference this mapping matches
    ///
    /// Accessor references of property and event placeholders map to the
    /// corresponding target accessor.
    pub fn target_method(&self, method: &MethodRef) -> Option<MethodRef> {
        match (&self.member, self.target.as_ref()?) {
            (ProtoMember::Method { .. }, ResolvedMember::Method(target)) => Some(target.clone()),
            (ProtoMember::Property { getter, .. }, ResolvedMember::Property { getter: g, setter: s, .. }) => {
                if getter.as_deref() == Some(method.name.as_str()) {
                    g.clone()
                } else {
                    s.clone()
                }
            }
            (ProtoMember::Event { adder, .. }, ResolvedMember::Event { adder: a, remover: r, .. }) => {
                if adder.as_deref() == Some(method.name.as_str()) {
                    a.clone()
                } else {
                    r.clone()
                }
            }
            _ => None,
        }
    }

    /// `Ns.Type::member`
    pub fn describe(&self) -> String {
        format!("{}::{}", self.declaring.full_name(), self.member.name())
    }
}

/// Binding of one placeholder type
#[derive(Debug, Clone, PartialEq)]
pub struct PrototypeTypeMapping {
    /// Placeholder type in the advice module
    pub prototype: TypeName,
    /// Target type; `None` exactly when `error` is set
    pub target: Option<TypeName>,
    /// Why the mapping failed
    pub error: Option<WeaveError>,
    /// Other placeholder types this one references
    pub references: BTreeSet<TypeName>,
    /// Items using the mapping
    pub users: BTreeSet<ItemId>,
    /// Whether `error` was already reported
    pub reported: bool,
}

impl PrototypeTypeMapping {
    /// Successful binding
    pub fn resolved(prototype: TypeName, target: TypeName, references: BTreeSet<TypeName>) -> Self {
        Self {
            prototype,
            target: Some(target),
            error: None,
            references,
            users: BTreeSet::new(),
            reported: false,
        }
    }

    /// Failed binding
    pub fn failed(prototype: TypeName, error: WeaveError, references: BTreeSet<TypeName>) -> Self {
        Self {
            prototype,
            target: None,
            error: Some(error),
            references,
            users: BTreeSet::new(),
            reported: false,
        }
    }

    /// Whether the mapping is in error
    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }

    /// Put the mapping in error (first error wins)
    pub fn fail(&mut self, error: WeaveError) {
        self.target = None;
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Error to report, once
    pub fn take_report(&mut self) -> Option<WeaveError> {
        if self.reported {
            return None;
        }
        self.reported = true;
        self.error.clone()
    }
}

/// Name-bound placeholder type mappings shared by all items
#[derive(Debug, Clone, Default)]
pub struct PrototypeTypeMappings {
    mappings: BTreeMap<TypeName, PrototypeTypeMapping>,
}

impl PrototypeTypeMappings {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a mapping
    pub fn insert(&mut self, mapping: PrototypeTypeMapping) {
        self.mappings.insert(mapping.prototype.clone(), mapping);
    }

    /// Mapping of a placeholder type
    pub fn get(&self, prototype: &TypeName) -> Option<&PrototypeTypeMapping> {
        self.mappings.get(prototype)
    }

    /// Mutable mapping of a placeholder type
    pub fn get_mut(&mut self, prototype: &TypeName) -> Option<&mut PrototypeTypeMapping> {
        self.mappings.get_mut(prototype)
    }

    /// Innermost mapped placeholder type `name` is within
    pub fn enclosing(&self, name: &TypeName) -> Option<&PrototypeTypeMapping> {
        name.ancestors()
            .into_iter()
            .find_map(|ancestor| self.mappings.get(&ancestor))
    }

    /// All mappings in name order
    pub fn iter(&self) -> impl Iterator<Item = &PrototypeTypeMapping> {
        self.mappings.values()
    }

    /// Number of mappings
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Fail every mapping that references a failed mapping, to a fixpoint
    ///
    /// Returns the newly failed placeholder types.
    pub fn cascade(&mut self) -> Vec<TypeName> {
        let mut newly = Vec::new();
        loop {
            let failed: Vec<(TypeName, TypeName)> = self
                .mappings
                .values()
                .filter(|mapping| !mapping.is_errored())
                .filter_map(|mapping| {
                    mapping
                        .references
                        .iter()
                        .find(|reference| {
                            self.mappings
                                .get(*reference)
                                .map(PrototypeTypeMapping::is_errored)
                                .unwrap_or(false)
                        })
                        .map(|cause| (mapping.prototype.clone(), cause.clone()))
                })
                .collect();
            if failed.is_empty() {
                return newly;
            }
            for (prototype, cause) in failed {
                if let Some(mapping) = self.mappings.get_mut(&prototype) {
                    mapping.fail(WeaveError::MissingTarget {
                        reference: prototype.full_name(),
                        scope: format!("failed placeholder '{}'", cause.full_name()),
                    });
                }
                newly.push(prototype);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proto(name: &str) -> TypeName {
        TypeName::new("Aspects", "Aspects", name)
    }

    fn missing(name: &str) -> WeaveError {
        WeaveError::MissingTarget {
            reference: name.to_string(),
            scope: "App".to_string(),
        }
    }

    #[test]
    fn test_cascade_is_transitive() {
        let mut table = PrototypeTypeMappings::new();
        table.insert(PrototypeTypeMapping::failed(proto("A"), missing("A"), BTreeSet::new()));
        table.insert(PrototypeTypeMapping::resolved(
            proto("B"),
            TypeName::new("App", "App", "B"),
            [proto("A")].into_iter().collect(),
        ));
        table.insert(PrototypeTypeMapping::resolved(
            proto("C"),
            TypeName::new("App", "App", "C"),
            [proto("B")].into_iter().collect(),
        ));
        table.insert(PrototypeTypeMapping::resolved(
            proto("D"),
            TypeName::new("App", "App", "D"),
            BTreeSet::new(),
        ));
        let newly = table.cascade();
        assert_eq!(newly, vec![proto("B"), proto("C")]);
        assert!(table.get(&proto("C")).unwrap().target.is_none());
        assert!(table.get(&proto("D")).unwrap().target.is_some());
    }

    #[test]
    fn test_enclosing_finds_innermost() {
        let mut table = PrototypeTypeMappings::new();
        table.insert(PrototypeTypeMapping::resolved(
            proto("Outer"),
            TypeName::new("App", "App", "Outer"),
            BTreeSet::new(),
        ));
        let nested = proto("Outer").nested("Inner");
        assert_eq!(table.enclosing(&nested).unwrap().prototype, proto("Outer"));
        assert!(table.enclosing(&proto("Other")).is_none());
    }

    #[test]
    fn test_report_once() {
        let mut mapping = PrototypeTypeMapping::failed(proto("A"), missing("A"), BTreeSet::new());
        assert!(mapping.take_report().is_some());
        assert!(mapping.take_report().is_none());
    }

    #[test]
    fn test_property_accessor_maps_to_target_accessor() {
        let getter = MethodRef {
            declaring: TypeSig::Named(proto("Order")),
            name: "get_Total".to_string(),
            has_this: true,
            return_type: TypeSig::int32(),
            params: Vec::new(),
            generic_arity: 0,
            generic_args: Vec::new(),
        };
        let mut target_getter = getter.clone();
        target_getter.declaring = TypeSig::Named(TypeName::new("App", "App", "Order"));
        let mut mapping = PrototypeItemMapping::new(
            proto("Order"),
            ProtoMember::Property {
                name: "Total".to_string(),
                property_type: TypeSig::int32(),
                params: Vec::new(),
                getter: Some("get_Total".to_string()),
                setter: None,
                is_static: false,
            },
            LookupPolicy::Anywhere,
        );
        assert!(mapping.matches_method(&proto("Order"), &getter));
        mapping.target = Some(ResolvedMember::Property {
            name: "Total".to_string(),
            getter: Some(target_getter.clone()),
            setter: None,
        });
        assert_eq!(mapping.target_method(&getter), Some(target_getter));
    }
}
