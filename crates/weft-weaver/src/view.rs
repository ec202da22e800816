//! Woven type view
//!
//! A [`WovenView`] answers structural questions about types as they will
//! look after weaving: the loaded definitions plus the new types, base
//! types, interfaces and members contributed by live weave items.

use rustc_hash::FxHashMap;
use weft_metadata::{
    member_flags, MethodRef, ModuleSet, TypeDef, TypeName, TypeSig,
};

use crate::item::ItemId;
use crate::joinpoint::MemberId;

/// Kind of a member as seen by lookups and flattening
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberKind {
    /// Field
    Field,
    /// Method (constructors and accessors included)
    Method,
    /// Property
    Property,
    /// Event
    Event,
}

/// Where a member comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberOrigin {
    /// Declared by a loaded or newly introduced type
    Existing(MemberId),
    /// Contributed by a weave item
    Contributed {
        /// Contributing item
        item: ItemId,
        /// Contribution index within the item
        contribution: usize,
    },
}

impl MemberOrigin {
    /// Contributing item, if contributed
    pub fn item(&self) -> Option<ItemId> {
        match self {
            MemberOrigin::Contributed { item, .. } => Some(*item),
            MemberOrigin::Existing(_) => None,
        }
    }
}

/// A member declared directly on a type, unsubstituted
#[derive(Debug, Clone, PartialEq)]
pub struct ViewMember {
    /// Member kind
    pub kind: MemberKind,
    /// Member name
    pub name: String,
    /// Member flags
    pub flags: u32,
    /// Field, property or event type; method return type
    pub member_type: TypeSig,
    /// Method or indexer parameter types
    pub params: Vec<TypeSig>,
    /// Method generic arity
    pub arity: u16,
    /// Explicitly implemented methods
    pub overrides: Vec<MethodRef>,
    /// Property getter or event adder
    pub reader: Option<String>,
    /// Property setter or event remover
    pub writer: Option<String>,
    /// Origin
    pub origin: MemberOrigin,
}

impl ViewMember {
    /// Static member
    pub fn is_static(&self) -> bool {
        self.flags & member_flags::STATIC != 0
    }

    /// Virtual method
    pub fn is_virtual(&self) -> bool {
        self.flags & member_flags::VIRTUAL != 0
    }

    /// Hides inherited members
    pub fn hides(&self) -> bool {
        self.flags & member_flags::NEW != 0
    }

    /// Whether a property getter or event adder exists
    pub fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    /// Whether a property setter or event remover exists
    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }

    /// Reference to this member as a method on `declaring`
    pub fn method_ref(&self, declaring: TypeSig) -> MethodRef {
        MethodRef {
            declaring,
            name: self.name.clone(),
            has_this: !self.is_static(),
            return_type: self.member_type.clone(),
            params: self.params.clone(),
            generic_arity: self.arity,
            generic_args: Vec::new(),
        }
    }
}

/// Inheritance edge
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Base type or interface, in terms of the deriving type's generic
    /// parameters
    pub sig: TypeSig,
    /// Contributing item when the edge is woven
    pub origin: Option<ItemId>,
}

/// Contributions of live items, indexed by target type
#[derive(Debug, Clone, Default)]
pub struct Overlay {
    /// Newly introduced types (nested types reachable through them)
    pub new_types: FxHashMap<TypeName, TypeDef>,
    /// New base types
    pub bases: FxHashMap<TypeName, Edge>,
    /// New interfaces
    pub interfaces: FxHashMap<TypeName, Vec<Edge>>,
    /// New members
    pub members: FxHashMap<TypeName, Vec<ViewMember>>,
}

impl Overlay {
    /// Empty overlay
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new member on `ty`
    pub fn add_member(&mut self, ty: &TypeName, member: ViewMember) {
        self.members.entry(ty.clone()).or_default().push(member);
    }
}

/// Loaded modules seen through an overlay
#[derive(Clone, Copy)]
pub struct WovenView<'a> {
    set: &'a ModuleSet,
    overlay: &'a Overlay,
}

impl<'a> WovenView<'a> {
    /// View over `set` with `overlay` applied
    pub fn new(set: &'a ModuleSet, overlay: &'a Overlay) -> Self {
        Self { set, overlay }
    }

    /// Underlying module set
    pub fn set(&self) -> &'a ModuleSet {
        self.set
    }

    /// Underlying overlay
    pub fn overlay(&self) -> &'a Overlay {
        self.overlay
    }

    /// Definition of a loaded or newly introduced type
    pub fn type_def(&self, name: &TypeName) -> Option<&'a TypeDef> {
        if let Some(def) = self.set.type_def(name) {
            return Some(def);
        }
        for root in name.ancestors().into_iter().rev() {
            if let Some(def) = self.overlay.new_types.get(&root) {
                let mut current = def;
                for segment in &name.path[root.path.len()..] {
                    current = current.nested_type(segment)?;
                }
                return Some(current);
            }
        }
        None
    }

    /// Whether the type exists in the view
    pub fn contains(&self, name: &TypeName) -> bool {
        self.type_def(name).is_some()
    }

    /// Effective base type (woven base replaces `System.Object`)
    pub fn base_of(&self, name: &TypeName) -> Option<Edge> {
        if let Some(edge) = self.overlay.bases.get(name) {
            return Some(edge.clone());
        }
        let def = self.type_def(name)?;
        def.base.as_ref().map(|sig| Edge {
            sig: sig.clone(),
            origin: None,
        })
    }

    /// Declared plus woven interfaces
    pub fn interfaces_of(&self, name: &TypeName) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .type_def(name)
            .map(|def| {
                def.interfaces
                    .iter()
                    .map(|interface| Edge {
                        sig: interface.interface.clone(),
                        origin: None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if let Some(woven) = self.overlay.interfaces.get(name) {
            edges.extend(woven.iter().cloned());
        }
        edges
    }

    /// Members declared on a type plus members woven into it
    pub fn members_of(&self, name: &TypeName) -> Vec<ViewMember> {
        let mut members = self.type_def(name).map(declared_members).unwrap_or_default();
        if let Some(woven) = self.overlay.members.get(name) {
            members.extend(woven.iter().cloned());
        }
        members
    }

    /// Whether the type is an interface
    pub fn is_interface(&self, name: &TypeName) -> bool {
        self.type_def(name).map(TypeDef::is_interface).unwrap_or(false)
    }

    /// Whether the type is a value type
    pub fn is_value_type(&self, name: &TypeName) -> bool {
        self.type_def(name).map(TypeDef::is_value_type).unwrap_or(false)
    }
}

/// Members declared by a definition
pub fn declared_members(def: &TypeDef) -> Vec<ViewMember> {
    let mut members = Vec::new();
    for (index, field) in def.fields.iter().enumerate() {
        members.push(ViewMember {
            kind: MemberKind::Field,
            name: field.name.clone(),
            flags: field.flags,
            member_type: field.field_type.clone(),
            params: Vec::new(),
            arity: 0,
            overrides: Vec::new(),
            reader: None,
            writer: None,
            origin: MemberOrigin::Existing(MemberId::Field(index)),
        });
    }
    for (index, method) in def.methods.iter().enumerate() {
        members.push(ViewMember {
            kind: MemberKind::Method,
            name: method.name.clone(),
            flags: method.flags,
            member_type: method.return_type.clone(),
            params: method.param_types().cloned().collect(),
            arity: method.generic_params.len() as u16,
            overrides: method.overrides.clone(),
            reader: None,
            writer: None,
            origin: MemberOrigin::Existing(MemberId::Method(index)),
        });
    }
    for (index, property) in def.properties.iter().enumerate() {
        members.push(ViewMember {
            kind: MemberKind::Property,
            name: property.name.clone(),
            flags: property.flags,
            member_type: property.property_type.clone(),
            params: property.params.clone(),
            arity: 0,
            overrides: Vec::new(),
            reader: property.getter.clone(),
            writer: property.setter.clone(),
            origin: MemberOrigin::Existing(MemberId::Property(index)),
        });
    }
    for (index, event) in def.events.iter().enumerate() {
        members.push(ViewMember {
            kind: MemberKind::Event,
            name: event.name.clone(),
            flags: event.flags,
            member_type: event.event_type.clone(),
            params: Vec::new(),
            arity: 0,
            overrides: Vec::new(),
            reader: event.adder.clone(),
            writer: event.remover.clone(),
            origin: MemberOrigin::Existing(MemberId::Event(index)),
        });
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_metadata::{FieldDef, InterfaceImpl, Module};

    fn sample_set() -> ModuleSet {
        let mut module = Module::new("App");
        let mut order = TypeDef::new("App", "Order", 0);
        order.base = Some(TypeSig::object());
        order
            .interfaces
            .push(InterfaceImpl::new(TypeSig::Named(TypeName::new("App", "App", "IOrder"))));
        order.fields.push(FieldDef::new("id", 0, TypeSig::int32()));
        module.types.push(order);
        let mut set = ModuleSet::new();
        set.insert(module);
        set
    }

    #[test]
    fn test_overlay_members_and_edges() {
        let set = sample_set();
        let order = TypeName::new("App", "App", "Order");
        let mut overlay = Overlay::new();
        overlay.bases.insert(
            order.clone(),
            Edge {
                sig: TypeSig::Named(TypeName::new("Lib", "Lib", "Entity")),
                origin: Some(ItemId(0)),
            },
        );
        overlay.add_member(
            &order,
            ViewMember {
                kind: MemberKind::Field,
                name: "audit".to_string(),
                flags: 0,
                member_type: TypeSig::string(),
                params: Vec::new(),
                arity: 0,
                overrides: Vec::new(),
                reader: None,
                writer: None,
                origin: MemberOrigin::Contributed {
                    item: ItemId(0),
                    contribution: 0,
                },
            },
        );
        let view = WovenView::new(&set, &overlay);
        assert_eq!(view.base_of(&order).unwrap().origin, Some(ItemId(0)));
        assert_eq!(view.interfaces_of(&order).len(), 1);
        let members = view.members_of(&order);
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].origin.item(), Some(ItemId(0)));
    }

    #[test]
    fn test_new_types_and_nested_lookup() {
        let set = sample_set();
        let mut overlay = Overlay::new();
        let added = TypeName::new("App", "App", "Order").nested("Cache");
        let mut def = TypeDef::new("", "Cache", 0);
        def.nested.push(TypeDef::new("", "Entry", 0));
        overlay.new_types.insert(added.clone(), def);
        let view = WovenView::new(&set, &overlay);
        assert!(view.contains(&added));
        assert!(view.contains(&added.nested("Entry")));
        assert!(!view.contains(&added.nested("Missing")));
    }
}
