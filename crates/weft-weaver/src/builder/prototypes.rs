//! Placeholder binding
//!
//! Placeholder types bound by name are resolved once for the whole run;
//! join point and relative bindings, generic parameters and placeholder
//! members are bound per item. Every accepted type binding is checked
//! member by member against its target before bodies are cloned.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::debug;
use weft_metadata::{
    member_flags, FieldRef, MethodRef, ModuleSet, ReferenceCollector, TypeDef, TypeName, TypeSig,
    CONSTRUCTOR_NAME, TYPE_INITIALIZER_NAME,
};

use super::WeaveItemBuilder;
use crate::compat::{same_type, same_types};
use crate::error::{Fault, WeaveError};
use crate::flatten::{flatten, FlatKey};
use crate::generics::{base_chain, substitute, supertypes, TypedScope};
use crate::item::ItemId;
use crate::mapping::{
    LookupPolicy, PrototypeItemMapping, PrototypeTypeMapping, PrototypeTypeMappings, ProtoMember,
    ResolvedMember,
};
use crate::resolve::{ItemResolver, ResolveError};
use crate::view::{declared_members, MemberKind, MemberOrigin, ViewMember};
use crate::wellknown::{prototype_type_info, PrototypeBinding, PrototypeTypeInfo};

/// Innermost type enclosing `name` (itself included) that is a placeholder
pub(super) fn prototype_root(set: &ModuleSet, name: &TypeName) -> Option<(TypeName, PrototypeTypeInfo)> {
    name.ancestors().into_iter().find_map(|ancestor| {
        let info = set.type_def(&ancestor).and_then(prototype_type_info)?;
        Some((ancestor, info))
    })
}

/// Placeholder types bound by name that `def` refers to, other than itself
fn referenced_prototypes(set: &ModuleSet, name: &TypeName, def: &TypeDef) -> BTreeSet<TypeName> {
    let mut refs = ReferenceCollector::new();
    refs.visit_type(def);
    refs.types
        .iter()
        .filter_map(|ty| prototype_root(set, ty))
        .filter(|(root, info)| root != name && info.binding == PrototypeBinding::Name)
        .map(|(root, _)| root)
        .collect()
}

/// Translate a placeholder-side signature into target terms; generic
/// parameters are kept positional
pub(super) fn target_sig(resolver: &mut ItemResolver<'_>, sig: &TypeSig) -> Result<TypeSig, ResolveError> {
    Ok(match sig {
        TypeSig::Named(name) => TypeSig::Named(resolver.resolve_name(name)?),
        TypeSig::Generic { base, args } => TypeSig::Generic {
            base: resolver.resolve_name(base)?,
            args: target_sigs(resolver, args)?,
        },
        TypeSig::ByRef(inner) => TypeSig::ByRef(Box::new(target_sig(resolver, inner)?)),
        TypeSig::Array(inner) => TypeSig::Array(Box::new(target_sig(resolver, inner)?)),
        TypeSig::GenericParam(_) => sig.clone(),
    })
}

pub(super) fn target_sigs(resolver: &mut ItemResolver<'_>, sigs: &[TypeSig]) -> Result<Vec<TypeSig>, ResolveError> {
    sigs.iter().map(|sig| target_sig(resolver, sig)).collect()
}

fn accessor(
    declaring: &TypeSig,
    name: &Option<String>,
    is_static: bool,
    return_type: TypeSig,
    params: Vec<TypeSig>,
) -> Option<MethodRef> {
    name.as_ref().map(|name| MethodRef {
        declaring: declaring.clone(),
        name: name.clone(),
        has_this: !is_static,
        return_type,
        params,
        generic_arity: 0,
        generic_args: Vec::new(),
    })
}

/// Match one placeholder member against the members declared at `scope`,
/// returning the target and where the matched member comes from
fn match_member(
    resolver: &ItemResolver<'_>,
    scope: &TypedScope,
    member: &ProtoMember,
    member_type: &TypeSig,
    params: &[TypeSig],
) -> Option<(ResolvedMember, MemberOrigin)> {
    let view = resolver.view();
    let declaring = scope.sig();
    let candidates = view.members_of(&scope.ty);
    let same_shape = |candidate: &ViewMember, kind: MemberKind| {
        candidate.kind == kind
            && candidate.name == member.name()
            && candidate.is_static() == member.is_static()
            && same_type(&scope.resolve(&candidate.member_type), member_type)
    };
    let resolved_params =
        |candidate: &ViewMember| -> Vec<TypeSig> { candidate.params.iter().map(|p| scope.resolve(p)).collect() };

    match member {
        ProtoMember::Field { name, .. } => candidates
            .iter()
            .find(|&candidate| same_shape(candidate, MemberKind::Field))
            .map(|found| {
                let field = ResolvedMember::Field(FieldRef {
                    declaring: declaring.clone(),
                    name: name.clone(),
                    field_type: found.member_type.clone(),
                });
                (field, found.origin)
            }),
        ProtoMember::Method { arity, .. } => {
            let direct = candidates.iter().find(|&candidate| {
                same_shape(candidate, MemberKind::Method)
                    && candidate.arity == *arity
                    && same_types(&resolved_params(candidate), params)
            });
            if let Some(found) = direct {
                return Some((ResolvedMember::Method(found.method_ref(declaring.clone())), found.origin));
            }
            // a delegate-typed field whose Invoke has the placeholder's shape
            candidates
                .iter()
                .filter(|candidate| candidate.kind == MemberKind::Field && candidate.name == member.name())
                .find_map(|field| {
                    let field_sig = scope.resolve(&field.member_type);
                    let delegate = view.type_def(field_sig.type_name()?)?;
                    let invoke = delegate.method("Invoke")?;
                    let args = field_sig.generic_args();
                    let invoke_params: Vec<TypeSig> =
                        invoke.param_types().map(|param| substitute(param, args, &[])).collect();
                    let fits = same_type(&substitute(&invoke.return_type, args, &[]), member_type)
                        && same_types(&invoke_params, params);
                    fits.then(|| {
                        let delegate_field = ResolvedMember::DelegateField {
                            field: FieldRef {
                                declaring: declaring.clone(),
                                name: field.name.clone(),
                                field_type: field.member_type.clone(),
                            },
                            invoke: invoke.to_ref(field_sig.clone()),
                        };
                        (delegate_field, field.origin)
                    })
                })
        }
        ProtoMember::Property {
            name,
            getter,
            setter,
            is_static,
            ..
        } => candidates
            .iter()
            .find(|&candidate| {
                same_shape(candidate, MemberKind::Property)
                    && same_types(&resolved_params(candidate), params)
                    && (getter.is_none() || candidate.has_reader())
                    && (setter.is_none() || candidate.has_writer())
            })
            .map(|found| {
                let mut setter_params = found.params.clone();
                setter_params.push(found.member_type.clone());
                let property = ResolvedMember::Property {
                    name: name.clone(),
                    getter: accessor(
                        &declaring,
                        &found.reader,
                        *is_static,
                        found.member_type.clone(),
                        found.params.clone(),
                    ),
                    setter: accessor(&declaring, &found.writer, *is_static, TypeSig::void(), setter_params),
                };
                (property, found.origin)
            }),
        ProtoMember::Event {
            name,
            adder,
            remover,
            is_static,
            ..
        } => candidates
            .iter()
            .find(|&candidate| {
                same_shape(candidate, MemberKind::Event)
                    && (adder.is_none() || candidate.has_reader())
                    && (remover.is_none() || candidate.has_writer())
            })
            .map(|found| {
                let handler = vec![found.member_type.clone()];
                let event = ResolvedMember::Event {
                    name: name.clone(),
                    adder: accessor(&declaring, &found.reader, *is_static, TypeSig::void(), handler.clone()),
                    remover: accessor(&declaring, &found.writer, *is_static, TypeSig::void(), handler),
                };
                (event, found.origin)
            }),
        ProtoMember::GenericParam { .. } => None,
    }
}

/// Find the target of a placeholder member by its lookup policy
///
/// A target contributed by another item, or reached through another item's
/// base, interface or introduced type, makes this item depend on it.
fn find_member(resolver: &mut ItemResolver<'_>, mapping: &PrototypeItemMapping) -> Result<ResolvedMember, ResolveError> {
    let target = resolver.resolve_name(&mapping.declaring)?;
    let view = resolver.view();
    let missing = || WeaveError::MissingTarget {
        reference: mapping.describe(),
        scope: target.to_string(),
    };
    let Some(def) = view.type_def(&target) else {
        return Err(missing().into());
    };
    let self_sig = def.self_sig(&target);
    let scopes: Vec<Rc<TypedScope>> = match mapping.policy {
        LookupPolicy::This | LookupPolicy::CompilerGenerated => {
            TypedScope::root(&self_sig).map(Rc::new).into_iter().collect()
        }
        LookupPolicy::Base => base_chain(&view, &self_sig).into_iter().skip(1).collect(),
        LookupPolicy::Anywhere | LookupPolicy::GenericByName | LookupPolicy::GenericByIndex => {
            let mut scopes = base_chain(&view, &self_sig);
            scopes.extend(
                supertypes(&view, &self_sig)
                    .into_iter()
                    .filter(|scope| view.is_interface(&scope.ty)),
            );
            scopes
        }
    };

    let (member_type, params) = match &mapping.member {
        ProtoMember::Field { field_type, .. } => (field_type.clone(), Vec::new()),
        ProtoMember::Method {
            return_type, params, ..
        } => (return_type.clone(), params.clone()),
        ProtoMember::Property {
            property_type,
            params,
            ..
        } => (property_type.clone(), params.clone()),
        ProtoMember::Event { event_type, .. } => (event_type.clone(), Vec::new()),
        ProtoMember::GenericParam { .. } => return Err(missing().into()),
    };
    let member_type = target_sig(resolver, &member_type)?;
    let params = target_sigs(resolver, &params)?;

    let Some((scope, found, origin)) = scopes.iter().find_map(|scope| {
        match_member(resolver, scope, &mapping.member, &member_type, &params)
            .map(|(found, origin)| (scope, found, origin))
    }) else {
        return Err(missing().into());
    };
    if let Some(provider) = origin.item() {
        resolver.depend_on(provider);
    }
    resolver.depend_on_scope(scope);
    Ok(found)
}

/// First member of `prototype` with no structural counterpart on `target`
fn structural_mismatch(
    resolver: &mut ItemResolver<'_>,
    prototype: &TypeName,
    target: &TypeName,
) -> Result<Option<String>, ResolveError> {
    let view = resolver.view();
    let Some(proto_def) = view.set().type_def(prototype) else {
        return Ok(None);
    };
    let Some(target_def) = view.type_def(target) else {
        return Ok(Some(target.full_name()));
    };
    let Some(flat) = flatten(view, &target_def.self_sig(target)) else {
        return Ok(Some(target.full_name()));
    };
    for member in declared_members(proto_def) {
        let skipped = member.name == CONSTRUCTOR_NAME
            || member.name == TYPE_INITIALIZER_NAME
            || member.flags & member_flags::COMPILER_GENERATED != 0;
        if skipped {
            continue;
        }
        let member_type = target_sig(resolver, &member.member_type)?;
        let params = target_sigs(resolver, &member.params)?;
        let is_method = member.kind == MemberKind::Method;
        let key = FlatKey {
            is_method,
            name: member.name.clone(),
            arity: member.arity,
            params: if is_method { params.clone() } else { Vec::new() },
        };
        let present = flat
            .members
            .get(&key)
            .map(|found| {
                found.iter().any(|candidate| {
                    candidate.kind() == member.kind
                        && candidate.member.is_static() == member.is_static()
                        && same_type(&candidate.member_type, &member_type)
                        && same_types(&candidate.params, &params)
                })
            })
            .unwrap_or(false);
        if !present {
            return Ok(Some(member.name));
        }
    }
    Ok(None)
}

/// Per-item bindings computed before they are stored
struct ItemBindings {
    type_mappings: BTreeMap<TypeName, TypeName>,
    type_params: Vec<TypeSig>,
    generic_targets: Vec<(usize, TypeSig)>,
}

impl<'a> WeaveItemBuilder<'a> {
    // ========================================================================
    // Phase: placeholder types by name
    // ========================================================================

    pub(super) fn resolve_prototype_types(&mut self) -> Result<(), Fault> {
        let set = self.set;
        let Some(advice) = set.get(&self.advice_module) else {
            return Ok(());
        };
        let mut table = PrototypeTypeMappings::new();
        for (name, def) in advice.all_types() {
            let Some(info) = prototype_type_info(def) else {
                continue;
            };
            if info.binding != PrototypeBinding::Name {
                continue;
            }
            let references = referenced_prototypes(set, &name, def);
            let wanted = match &info.target {
                Some(target) => TypeName::parse("", target),
                None => name.clone(),
            };
            let candidates = set.find_types(&self.target_modules, &wanted.namespace, &wanted.path);
            let mapping = match candidates.as_slice() {
                [target] => {
                    debug!(prototype = %name, target = %target, "placeholder type bound");
                    PrototypeTypeMapping::resolved(name.clone(), target.clone(), references)
                }
                [] => PrototypeTypeMapping::failed(
                    name.clone(),
                    WeaveError::MissingTarget {
                        reference: wanted.full_name(),
                        scope: self.target_modules.join(", "),
                    },
                    references,
                ),
                _ => PrototypeTypeMapping::failed(
                    name.clone(),
                    WeaveError::AmbiguousTarget {
                        reference: wanted.full_name(),
                        candidates: candidates.iter().map(ToString::to_string).collect(),
                    },
                    references,
                ),
            };
            table.insert(mapping);
        }
        for prototype in table.cascade() {
            debug!(prototype = %prototype, "placeholder type failed through a referenced placeholder");
        }
        self.shared.prototypes = table;
        Ok(())
    }

    // ========================================================================
    // Phase: per-item placeholder bindings
    // ========================================================================

    pub(super) fn bind_prototypes(&mut self) -> Result<(), Fault> {
        for id in self.items.live_ids() {
            let roots: BTreeMap<TypeName, PrototypeTypeInfo> = self.references[id.index()]
                .types
                .iter()
                .filter(|ty| ty.scope == self.advice_module)
                .filter_map(|ty| prototype_root(self.set, ty))
                .collect();

            let mut errored = false;
            let mut report = None;
            for (root, info) in &roots {
                if info.binding != PrototypeBinding::Name {
                    continue;
                }
                let Some(mapping) = self.shared.prototypes.get_mut(root) else {
                    continue;
                };
                mapping.users.insert(id);
                if mapping.is_errored() {
                    errored = true;
                    report = report.or_else(|| mapping.take_report());
                }
            }
            if errored {
                match report {
                    Some(error) => self.fail(id, error),
                    None => {
                        debug!(item = %id, "weave item uses a failed placeholder type");
                        self.items.fail(id);
                    }
                }
                continue;
            }

            match self.item_bindings(id, &roots) {
                Ok(bindings) => {
                    let item = self.items.get_mut(id);
                    item.type_mappings = bindings.type_mappings;
                    item.type_params = bindings.type_params;
                    for (index, sig) in bindings.generic_targets {
                        item.item_mappings[index].target = Some(ResolvedMember::GenericParam(sig));
                    }
                }
                Err(error) => self.fail(id, error),
            }
        }
        Ok(())
    }

    fn item_bindings(
        &self,
        id: ItemId,
        roots: &BTreeMap<TypeName, PrototypeTypeInfo>,
    ) -> Result<ItemBindings, WeaveError> {
        let set = self.set;
        let item = self.items.get(id);
        let joinpoint_type = item.joinpoint_type();
        let unbound = |reference: String| WeaveError::MissingTarget {
            reference,
            scope: item.joinpoint.describe(set),
        };

        let mut type_mappings = BTreeMap::new();
        for (root, info) in roots {
            match info.binding {
                PrototypeBinding::Name => {}
                PrototypeBinding::Joinpoint => {
                    let target = joinpoint_type.ok_or_else(|| unbound(root.full_name()))?;
                    type_mappings.insert(root.clone(), target.clone());
                }
                PrototypeBinding::Relative => {
                    let anchor = joinpoint_type.ok_or_else(|| unbound(root.full_name()))?;
                    let relative = info.target.clone().unwrap_or_else(|| root.path.join("/"));
                    let full_name = if anchor.namespace.is_empty() {
                        relative
                    } else {
                        format!("{}.{}", anchor.namespace, relative)
                    };
                    let target = TypeName::parse(anchor.scope.clone(), &full_name);
                    if set.type_def(&target).is_none() {
                        return Err(WeaveError::MissingTarget {
                            reference: full_name,
                            scope: anchor.scope.clone(),
                        });
                    }
                    type_mappings.insert(root.clone(), target);
                }
            }
        }

        let mut type_params = Vec::new();
        let mut generic_targets = Vec::new();
        for (index, mapping) in item.item_mappings.iter().enumerate() {
            let ProtoMember::GenericParam { position, name } = &mapping.member else {
                continue;
            };
            let target_params = joinpoint_type
                .and_then(|ty| set.type_def(ty))
                .map(|def| def.generic_params.as_slice())
                .unwrap_or_default();
            let found = target_params.iter().find(|param| match mapping.policy {
                LookupPolicy::GenericByIndex => param.position == *position,
                _ => &param.name == name,
            });
            let Some(found) = found else {
                return Err(unbound(format!("{}<{}>", mapping.declaring.full_name(), name)));
            };
            let sig = TypeSig::type_param(found.position, found.name.clone());
            let slot = *position as usize;
            if type_params.len() <= slot {
                type_params.resize(slot + 1, TypeSig::object());
            }
            type_params[slot] = sig.clone();
            generic_targets.push((index, sig));
        }

        Ok(ItemBindings {
            type_mappings,
            type_params,
            generic_targets,
        })
    }

    // ========================================================================
    // Phase: placeholder members
    // ========================================================================

    pub(super) fn resolve_member_mappings(&mut self) -> Result<(), Fault> {
        for id in self.items.live_ids() {
            let pending: Vec<usize> = self
                .items
                .get(id)
                .item_mappings
                .iter()
                .enumerate()
                .filter(|(_, mapping)| {
                    mapping.target.is_none() && !matches!(mapping.member, ProtoMember::GenericParam { .. })
                })
                .map(|(index, _)| index)
                .collect();
            if pending.is_empty() {
                continue;
            }
            let found = self.with_resolver(id, move |resolver, item| {
                pending
                    .iter()
                    .map(|&index| find_member(resolver, &item.item_mappings[index]).map(|member| (index, member)))
                    .collect::<Result<Vec<_>, _>>()
            })?;
            if let Some(found) = found {
                let item = self.items.get_mut(id);
                for (index, member) in found {
                    debug!(item = %id, member = %item.item_mappings[index].describe(), "placeholder member bound");
                    item.item_mappings[index].target = Some(member);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Phase: structural check of placeholder types
    // ========================================================================

    pub(super) fn validate_prototype_structure(&mut self) -> Result<(), Fault> {
        // member signatures resolve per item, so every live user is checked
        let checks: Vec<(TypeName, TypeName, Vec<ItemId>)> = self
            .shared
            .prototypes
            .iter()
            .filter_map(|mapping| {
                let target = mapping.target.clone()?;
                let users = mapping
                    .users
                    .iter()
                    .copied()
                    .filter(|user| self.items.is_live(*user))
                    .collect();
                Some((mapping.prototype.clone(), target, users))
            })
            .collect();

        for (prototype, target, users) in checks {
            for user in users {
                if self.items.get(user).errored {
                    continue;
                }
                let (proto, tgt) = (prototype.clone(), target.clone());
                let mismatch =
                    self.with_resolver(user, move |resolver, _| structural_mismatch(resolver, &proto, &tgt))?;
                let Some(Some(member)) = mismatch else {
                    continue;
                };
                debug!(item = %user, prototype = %prototype, member = %member, "placeholder type mismatch");
                if let Some(mapping) = self.shared.prototypes.get_mut(&prototype) {
                    mapping.fail(WeaveError::StructuralMismatch {
                        prototype: prototype.full_name(),
                        target: target.full_name(),
                        member,
                    });
                }
                break;
            }
        }
        for prototype in self.shared.prototypes.cascade() {
            debug!(prototype = %prototype, "placeholder type failed through a referenced placeholder");
        }

        let failed: Vec<TypeName> = self
            .shared
            .prototypes
            .iter()
            .filter(|mapping| mapping.is_errored())
            .map(|mapping| mapping.prototype.clone())
            .collect();
        for prototype in failed {
            let Some(mapping) = self.shared.prototypes.get_mut(&prototype) else {
                continue;
            };
            let users: Vec<ItemId> = mapping
                .users
                .iter()
                .copied()
                .filter(|user| self.items.is_live(*user) && !self.items.get(*user).errored)
                .collect();
            if users.is_empty() {
                continue;
            }
            if let Some(error) = mapping.take_report() {
                self.diagnostics.push(error);
            }
            for user in users {
                debug!(item = %user, prototype = %prototype, "weave item uses a failed placeholder type");
                self.items.fail(user);
            }
        }

        for id in self.items.live_ids() {
            let local: Vec<(TypeName, TypeName)> = self
                .items
                .get(id)
                .type_mappings
                .iter()
                .map(|(prototype, target)| (prototype.clone(), target.clone()))
                .collect();
            for (prototype, target) in local {
                let (proto, tgt) = (prototype.clone(), target.clone());
                let mismatch =
                    self.with_resolver(id, move |resolver, _| structural_mismatch(resolver, &proto, &tgt))?;
                if let Some(Some(member)) = mismatch {
                    self.fail(
                        id,
                        WeaveError::StructuralMismatch {
                            prototype: prototype.full_name(),
                            target: target.full_name(),
                            member,
                        },
                    );
                    break;
                }
            }
        }
        Ok(())
    }
}
