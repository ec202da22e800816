//! Member flattening
//!
//! Computes every member visible on a type: its own declared and woven
//! members plus those of every base type and interface, with generic
//! arguments substituted along the way. Flattening walks the hierarchy with
//! a stack of [`TypedScope`]s; a type already on the stack is a hierarchy
//! loop. Members are collected into ordered maps and conflicts are decided
//! on the complete set, so the traversal order of bases and interfaces
//! never changes the outcome.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use weft_metadata::{TypeName, TypeSig, CONSTRUCTOR_NAME, TYPE_INITIALIZER_NAME};

use crate::compat::same_type;
use crate::error::WeaveError;
use crate::generics::TypedScope;
use crate::item::ItemId;
use crate::view::{MemberKind, MemberOrigin, ViewMember, WovenView};

/// Identity of a member for collision purposes
///
/// Methods are told apart by generic arity and resolved parameter types;
/// fields, properties and events by name alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlatKey {
    /// Methods are keyed with their parameters, other members are not
    pub is_method: bool,
    /// Member name
    pub name: String,
    /// Generic arity
    pub arity: u16,
    /// Resolved parameter types
    pub params: Vec<TypeSig>,
}

/// A member as seen from the flattened type
#[derive(Debug, Clone)]
pub struct FlatMember {
    /// Collision key
    pub key: FlatKey,
    /// Declaring level
    pub declaring: TypeSig,
    /// Declaring level is an interface
    pub in_interface: bool,
    /// Distance from the flattened type
    pub depth: usize,
    /// Member, unsubstituted
    pub member: ViewMember,
    /// Resolved member type
    pub member_type: TypeSig,
    /// Resolved parameter types
    pub params: Vec<TypeSig>,
}

impl FlatMember {
    /// Contributing item, for woven members
    pub fn item(&self) -> Option<ItemId> {
        self.member.origin.item()
    }

    /// Kind of the member
    pub fn kind(&self) -> MemberKind {
        self.member.kind
    }

    fn describe(&self) -> String {
        format!("{}::{}", self.declaring, self.member.name)
    }
}

/// A conflict and the items to fail for it
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// Diagnostic
    pub error: WeaveError,
    /// Woven items involved
    pub items: Vec<ItemId>,
}

/// Flattening result
#[derive(Debug, Clone)]
pub struct Flattened {
    /// Flattened type
    pub root: TypeName,
    /// Members by key
    pub members: BTreeMap<FlatKey, Vec<FlatMember>>,
    /// Supertypes visited, root excluded
    pub supertypes: Vec<Rc<TypedScope>>,
    /// Detected conflicts
    pub conflicts: Vec<Conflict>,
}

impl Flattened {
    /// Every flattened member in key order
    pub fn iter(&self) -> impl Iterator<Item = &FlatMember> {
        self.members.values().flatten()
    }

    /// Members declared by interfaces
    pub fn interface_members(&self) -> impl Iterator<Item = &FlatMember> {
        self.iter().filter(|member| member.in_interface)
    }

    /// Members declared by the type or its base classes
    pub fn class_members(&self) -> impl Iterator<Item = &FlatMember> {
        self.iter().filter(|member| !member.in_interface)
    }

    /// Keys of every flattened member
    pub fn keys(&self) -> BTreeSet<FlatKey> {
        self.members.keys().cloned().collect()
    }
}

struct Flattener<'a> {
    view: WovenView<'a>,
    root: TypeName,
    members: BTreeMap<FlatKey, Vec<FlatMember>>,
    seen: BTreeSet<(TypeName, Vec<TypeSig>)>,
    supertypes: Vec<Rc<TypedScope>>,
    conflicts: Vec<Conflict>,
}

impl Flattener<'_> {
    fn visit(&mut self, scope: Rc<TypedScope>) {
        if !self.seen.insert((scope.ty.clone(), scope.args.clone())) {
            return;
        }
        let depth = scope.depth();
        if depth > 0 {
            self.supertypes.push(Rc::clone(&scope));
        }
        let in_interface = self.view.is_interface(&scope.ty);
        let declaring = scope.sig();
        for member in self.view.members_of(&scope.ty) {
            let inherited_ctor = depth > 0
                && member.kind == MemberKind::Method
                && (member.name == CONSTRUCTOR_NAME || member.name == TYPE_INITIALIZER_NAME);
            if inherited_ctor {
                continue;
            }
            let params: Vec<TypeSig> = member.params.iter().map(|param| scope.resolve(param)).collect();
            let key = FlatKey {
                is_method: member.kind == MemberKind::Method,
                name: member.name.clone(),
                arity: member.arity,
                params: if member.kind == MemberKind::Method {
                    params.clone()
                } else {
                    Vec::new()
                },
            };
            let flat = FlatMember {
                key: key.clone(),
                declaring: declaring.clone(),
                in_interface,
                depth,
                member_type: scope.resolve(&member.member_type),
                params,
                member,
            };
            self.members.entry(key).or_default().push(flat);
        }

        let mut edges = self.view.base_of(&scope.ty).into_iter().collect::<Vec<_>>();
        edges.extend(self.view.interfaces_of(&scope.ty));
        for edge in edges {
            let Some(child) = TypedScope::child(&scope, &edge) else {
                continue;
            };
            if scope.on_path(&child.ty) {
                let mut items = scope.contributing_items();
                items.extend(edge.origin);
                if items.is_empty() {
                    continue;
                }
                let mut path: Vec<String> = scope.path().iter().map(TypeName::full_name).collect();
                path.push(child.ty.full_name());
                self.conflicts.push(Conflict {
                    error: WeaveError::HierarchyLoop {
                        ty: self.root.full_name(),
                        path,
                    },
                    items,
                });
                continue;
            }
            self.visit(Rc::new(child));
        }
    }

    fn type_conflict(&self, ours: &FlatMember, other: &FlatMember) -> WeaveError {
        if self.view.is_interface(&self.root) {
            WeaveError::InterfaceMemberConflict {
                ty: self.root.full_name(),
                interface: other.declaring.to_string(),
                member: ours.member.name.clone(),
            }
        } else {
            WeaveError::TypeMemberConflict {
                ty: self.root.full_name(),
                member: ours.describe(),
                other: other.describe(),
            }
        }
    }

    fn check(&mut self) {
        let mut found = Vec::new();
        for members in self.members.values() {
            for (index, a) in members.iter().enumerate() {
                for b in &members[index + 1..] {
                    if a.item().is_none() && b.item().is_none() {
                        continue;
                    }
                    if a.member.origin == b.member.origin && same_type(&a.declaring, &b.declaring) {
                        continue;
                    }
                    if let Some(error) = self.pair_conflict(a, b) {
                        let items: Vec<ItemId> = a.item().into_iter().chain(b.item()).collect();
                        found.push(Conflict { error, items });
                    }
                }
            }
        }
        self.conflicts.extend(found);
    }

    fn pair_conflict(&self, a: &FlatMember, b: &FlatMember) -> Option<WeaveError> {
        if same_type(&a.declaring, &b.declaring) {
            let ours = if a.item().is_some() { a } else { b };
            let other = if std::ptr::eq(ours, a) { b } else { a };
            return Some(self.type_conflict(ours, other));
        }
        if a.in_interface || b.in_interface {
            return None;
        }
        let (shallow, deep) = if a.depth <= b.depth { (a, b) } else { (b, a) };
        let overrides = shallow.member.is_virtual() && deep.member.is_virtual();
        if shallow.member.hides() || overrides || shallow.member.is_static() != deep.member.is_static() {
            return None;
        }
        let ours = if shallow.item().is_some() { shallow } else { deep };
        let other = if std::ptr::eq(ours, shallow) { deep } else { shallow };
        Some(self.type_conflict(ours, other))
    }
}

/// Flatten the members of `sig` as woven
pub fn flatten(view: WovenView<'_>, sig: &TypeSig) -> Option<Flattened> {
    let root = TypedScope::root(sig)?;
    let mut flattener = Flattener {
        view,
        root: root.ty.clone(),
        members: BTreeMap::new(),
        seen: BTreeSet::new(),
        supertypes: Vec::new(),
        conflicts: Vec::new(),
    };
    flattener.visit(Rc::new(root));
    flattener.check();
    Some(Flattened {
        root: flattener.root,
        members: flattener.members,
        supertypes: flattener.supertypes,
        conflicts: flattener.conflicts,
    })
}

/// Whether a member originates from a contribution of `item`
pub fn contributed_by(member: &ViewMember, item: ItemId) -> bool {
    matches!(member.origin, MemberOrigin::Contributed { item: owner, .. } if owner == item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{Edge, Overlay};
    use weft_metadata::{
        member_flags, type_flags, GenericOwner, GenericParamDef, InterfaceImpl, MethodDef, Module,
        ModuleSet, ParamDef, TypeDef,
    };

    fn name(simple: &str) -> TypeName {
        TypeName::new("App", "App", simple)
    }

    fn contributed(method: &str, flags: u32, item: u32) -> ViewMember {
        ViewMember {
            kind: MemberKind::Method,
            name: method.to_string(),
            flags,
            member_type: TypeSig::void(),
            params: Vec::new(),
            arity: 0,
            overrides: Vec::new(),
            reader: None,
            writer: None,
            origin: MemberOrigin::Contributed {
                item: ItemId(item),
                contribution: 0,
            },
        }
    }

    fn hierarchy(interfaces: &[&str]) -> ModuleSet {
        let mut module = Module::new("App");
        // interface IRepo<T> { T Get(int) }  interface INamed { string Name() }
        let mut repo = TypeDef::new("App", "IRepo", type_flags::INTERFACE);
        repo.generic_params
            .push(GenericParamDef::new("T", 0, GenericOwner::Type));
        repo.methods.push(MethodDef::new(
            "Get",
            member_flags::ABSTRACT | member_flags::VIRTUAL,
            TypeSig::type_param(0, "T"),
            vec![ParamDef::new("id", TypeSig::int32())],
        ));
        module.types.push(repo);
        let mut named = TypeDef::new("App", "INamed", type_flags::INTERFACE);
        named.methods.push(MethodDef::new(
            "Name",
            member_flags::ABSTRACT | member_flags::VIRTUAL,
            TypeSig::string(),
            Vec::new(),
        ));
        module.types.push(named);
        let mut base = TypeDef::new("App", "Base", 0);
        base.methods.push(MethodDef::new("Save", 0, TypeSig::void(), Vec::new()));
        base.methods.push(MethodDef::new(".ctor", 0, TypeSig::void(), Vec::new()));
        module.types.push(base);
        let mut order = TypeDef::new("App", "Order", 0);
        order.base = Some(TypeSig::Named(name("Base")));
        for interface in interfaces {
            let sig = match *interface {
                "IRepo" => TypeSig::Generic {
                    base: name("IRepo"),
                    args: vec![TypeSig::Named(name("Order"))],
                },
                other => TypeSig::Named(name(other)),
            };
            order.interfaces.push(InterfaceImpl::new(sig));
        }
        module.types.push(order);
        let mut set = ModuleSet::new();
        set.insert(module);
        set
    }

    #[test]
    fn test_generic_arguments_are_substituted() {
        let set = hierarchy(&["IRepo"]);
        let overlay = Overlay::new();
        let flat = flatten(WovenView::new(&set, &overlay), &TypeSig::Named(name("Order"))).unwrap();
        let get = flat.iter().find(|member| member.member.name == "Get").unwrap();
        assert_eq!(get.member_type, TypeSig::Named(name("Order")));
        assert!(get.in_interface);
        // inherited constructors are not members of the derived type
        assert!(flat.iter().all(|member| member.member.name != ".ctor"));
        assert!(flat.conflicts.is_empty());
    }

    #[test]
    fn test_order_independent() {
        let a = hierarchy(&["IRepo", "INamed"]);
        let b = hierarchy(&["INamed", "IRepo"]);
        let overlay = Overlay::new();
        let flat_a = flatten(WovenView::new(&a, &overlay), &TypeSig::Named(name("Order"))).unwrap();
        let flat_b = flatten(WovenView::new(&b, &overlay), &TypeSig::Named(name("Order"))).unwrap();
        assert_eq!(flat_a.keys(), flat_b.keys());
        assert_eq!(flat_a.supertypes.len(), flat_b.supertypes.len());
    }

    #[test]
    fn test_contributed_member_shadowing_base_needs_new() {
        let set = hierarchy(&[]);
        let mut overlay = Overlay::new();
        overlay.add_member(&name("Order"), contributed("Save", 0, 1));
        let flat = flatten(WovenView::new(&set, &overlay), &TypeSig::Named(name("Order"))).unwrap();
        assert_eq!(flat.conflicts.len(), 1);
        assert_eq!(flat.conflicts[0].items, vec![ItemId(1)]);
        assert!(matches!(flat.conflicts[0].error, WeaveError::TypeMemberConflict { .. }));

        let mut overlay = Overlay::new();
        overlay.add_member(&name("Order"), contributed("Save", member_flags::NEW, 1));
        let flat = flatten(WovenView::new(&set, &overlay), &TypeSig::Named(name("Order"))).unwrap();
        assert!(flat.conflicts.is_empty());
    }

    #[test]
    fn test_two_contributions_on_same_level_conflict() {
        let set = hierarchy(&[]);
        let mut overlay = Overlay::new();
        overlay.add_member(&name("Order"), contributed("Ship", 0, 1));
        overlay.add_member(&name("Order"), contributed("Ship", member_flags::NEW, 2));
        let flat = flatten(WovenView::new(&set, &overlay), &TypeSig::Named(name("Order"))).unwrap();
        assert_eq!(flat.conflicts.len(), 1);
        assert_eq!(flat.conflicts[0].items, vec![ItemId(1), ItemId(2)]);
    }

    #[test]
    fn test_woven_loop_is_reported() {
        let set = hierarchy(&[]);
        let mut overlay = Overlay::new();
        overlay.bases.insert(
            name("Base"),
            Edge {
                sig: TypeSig::Named(name("Order")),
                origin: Some(ItemId(4)),
            },
        );
        let flat = flatten(WovenView::new(&set, &overlay), &TypeSig::Named(name("Order"))).unwrap();
        let conflict = flat
            .conflicts
            .iter()
            .find(|conflict| matches!(conflict.error, WeaveError::HierarchyLoop { .. }))
            .unwrap();
        assert_eq!(conflict.items, vec![ItemId(4)]);
    }
}
