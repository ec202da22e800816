//! Clone emission
//!
//! The phases that produce target-side elements: detached skeletons of
//! every contribution, method bodies and inlined blocks, base constructor
//! chaining, dispatch flags and the merged bodies of existing methods.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;
use weft_metadata::{
    member_flags, FieldRef, Instruction, InterfaceImpl, JumpPolicy, MethodBody, MethodDef, ModuleSet,
    Opcode, Operand, TypeDef, TypeName, TypeSig,
};

use super::construct::produced_value;
use super::validate::{chains_to_self, responsible_items};
use super::{FlagEdit, WeaveItemBuilder};
use crate::aspect::{ArgValue, ControlFlowPoint, ExecutionTime};
use crate::cloning::{
    clone_attribute, clone_body, clone_event, clone_field, clone_method_signature, clone_property,
    clone_type_skeleton, self_context, ReferenceResolver,
};
use crate::compat::same_type;
use crate::contribution::{BodyEdit, Cloned, ContributionKind, CtorPlan, MethodKey, OrderKey};
use crate::error::{Fault, WeaveError};
use crate::flatten::flatten;
use crate::generics::substitute;
use crate::inline::{compose, prepare_block, FrameBinding, InlineBlock};
use crate::item::{ItemId, WeaveItem};
use crate::joinpoint::MemberId;
use crate::resolve::{ItemResolver, ResolveError};
use crate::view::{MemberKind, MemberOrigin, WovenView};

/// Flags that make a method an interface implementation slot
const DISPATCH_FLAGS: u32 = member_flags::VIRTUAL | member_flags::NEW_SLOT | member_flags::FINAL;

fn missing_advice(element: String) -> ResolveError {
    Fault::MissingAdvice { element }.into()
}

fn advice_def<'s>(set: &'s ModuleSet, source: &TypeName) -> Result<&'s TypeDef, ResolveError> {
    set.type_def(source).ok_or_else(|| missing_advice(source.full_name()))
}

fn advice_member<'s, T>(members: &'s [T], source: &TypeName, index: usize) -> Result<&'s T, ResolveError> {
    members
        .get(index)
        .ok_or_else(|| missing_advice(format!("{}::#{}", source.full_name(), index)))
}

fn static_field(view: WovenView<'_>, field: &FieldRef) -> bool {
    let Some(name) = field.declaring.type_name() else {
        return false;
    };
    view.members_of(name)
        .iter()
        .any(|member| member.kind == MemberKind::Field && member.name == field.name && member.is_static())
}

fn is_value(view: WovenView<'_>, sig: &TypeSig) -> bool {
    let primitive = [TypeSig::int32(), TypeSig::int64(), TypeSig::double(), TypeSig::boolean()]
        .iter()
        .any(|primitive| same_type(sig, primitive));
    primitive || sig.type_name().map(|name| view.is_value_type(name)).unwrap_or(false)
}

fn order(item: &WeaveItem, slot: u8, point: ControlFlowPoint, time: ExecutionTime) -> OrderKey {
    OrderKey {
        slot,
        point: match point {
            ControlFlowPoint::Body => 0,
            ControlFlowPoint::Call => 1,
        },
        time: match time {
            ExecutionTime::Before => 0,
            ExecutionTime::After => 1,
        },
        aspect: item.aspect,
        item: item.id,
    }
}

fn last_param(method: &MethodDef) -> u16 {
    method.params.len().saturating_sub(1) as u16
}

// ============================================================================
// Skeletons
// ============================================================================

fn clone_skeleton(resolver: &mut ItemResolver<'_>, kind: &ContributionKind) -> Result<Option<Cloned>, ResolveError> {
    let set = resolver.view().set();
    let cloned = match kind {
        ContributionKind::NewAssemblyType { source, target }
        | ContributionKind::NewNestedType { source, target } => {
            let def = advice_def(set, source)?;
            let namespace = if target.is_nested() { "" } else { target.namespace.as_str() };
            Cloned::Type(clone_type_skeleton(
                resolver,
                def,
                def.self_sig(source),
                namespace,
                target.name(),
                &|_| true,
            )?)
        }
        ContributionKind::NewField { source, index, .. }
        | ContributionKind::NewEnumLiteral { source, index, .. } => {
            let def = advice_def(set, source)?;
            Cloned::Field(clone_field(resolver, advice_member(&def.fields, source, *index)?)?)
        }
        ContributionKind::NewProperty { source, index, .. } => {
            let def = advice_def(set, source)?;
            Cloned::Property(clone_property(resolver, advice_member(&def.properties, source, *index)?)?)
        }
        ContributionKind::NewEvent { source, index, .. } => {
            let def = advice_def(set, source)?;
            Cloned::Event(clone_event(resolver, advice_member(&def.events, source, *index)?)?)
        }
        ContributionKind::NewMethod { source, index, .. }
        | ContributionKind::NewConstructor { source, index, .. }
        | ContributionKind::NewOperator { source, index, .. } => {
            let def = advice_def(set, source)?;
            let method = advice_member(&def.methods, source, *index)?;
            Cloned::Method(clone_method_signature(
                resolver,
                method,
                self_context(method, def.self_sig(source)),
            )?)
        }
        ContributionKind::NewBaseType { source, .. } => Cloned::Base(resolver.resolve_type(source)?),
        ContributionKind::NewInterface { source, .. } => {
            Cloned::Interface(InterfaceImpl::new(resolver.resolve_type(source)?))
        }
        ContributionKind::NewAttribute { source, .. } => Cloned::Attribute(clone_attribute(resolver, source)?),
        _ => return Ok(None),
    };
    Ok(Some(cloned))
}

// ============================================================================
// Bodies
// ============================================================================

#[derive(Default)]
struct ItemBodies {
    clones: Vec<(usize, Cloned)>,
    edits: Vec<BodyEdit>,
}

fn fill_type_bodies(
    resolver: &mut ItemResolver<'_>,
    source: &TypeName,
    def: &TypeDef,
    clone: &mut TypeDef,
) -> Result<(), ResolveError> {
    let view = resolver.view();
    let self_sig = def.self_sig(source);
    for (method, cloned) in def.methods.iter().zip(clone.methods.iter_mut()) {
        if let Some(body) = &method.body {
            let context = self_context(method, self_sig.clone());
            cloned.body = Some(clone_body(resolver, body, context, &|field| static_field(view, field))?);
        }
    }
    for (nested, cloned) in def.nested.iter().zip(clone.nested.iter_mut()) {
        fill_type_bodies(resolver, &source.nested(nested.name.clone()), nested, cloned)?;
    }
    Ok(())
}

/// Resolved body of an advice method
fn advice_body<'r>(
    resolver: &mut ItemResolver<'r>,
    source: &TypeName,
    index: usize,
) -> Result<(&'r MethodDef, MethodBody), ResolveError> {
    let view = resolver.view();
    let def = advice_def(view.set(), source)?;
    let method = advice_member(&def.methods, source, index)?;
    let body = method
        .body
        .as_ref()
        .ok_or_else(|| missing_advice(format!("{}::{}", source.full_name(), method.name)))?;
    let context = self_context(method, def.self_sig(source));
    let resolved = clone_body(resolver, body, context, &|field| static_field(view, field))?;
    Ok((method, resolved))
}

fn woven_body<'r>(
    view: WovenView<'r>,
    target: &TypeName,
    index: usize,
) -> Result<(&'r MethodDef, &'r MethodBody), ResolveError> {
    view.set()
        .type_def(target)
        .and_then(|def| def.methods.get(index))
        .and_then(|method| method.body.as_ref().map(|body| (method, body)))
        .ok_or_else(|| {
            WeaveError::MissingTarget {
                reference: format!("{}::#{}", target.full_name(), index),
                scope: target.scope.clone(),
            }
            .into()
        })
}

/// Inlined block and insertions of a code contribution
fn code_edits(
    resolver: &mut ItemResolver<'_>,
    item: &WeaveItem,
    kind: &ContributionKind,
) -> Result<Option<(InlineBlock, Vec<BodyEdit>)>, ResolveError> {
    let view = resolver.view();
    let insert = |method: &MethodKey, at: usize, policy: JumpPolicy, block: &InlineBlock, key: OrderKey| {
        BodyEdit::Insert {
            method: method.clone(),
            at,
            policy,
            block: block.clone(),
            key,
        }
    };
    match kind {
        ContributionKind::NewCode {
            source,
            index,
            target,
            method,
            time,
            point,
            offset,
        } => {
            let (advice, resolved) = advice_body(resolver, source, *index)?;
            let (woven, body) = woven_body(view, target, *method)?;
            let key = MethodKey {
                ty: target.clone(),
                method: *method,
            };
            let mut binding = FrameBinding::new(!advice.is_static(), !woven.is_static());
            let anchors: Vec<(usize, JumpPolicy, u8)> = match (point, time, offset) {
                (ControlFlowPoint::Body, ExecutionTime::Before, _) => {
                    let at = if woven.is_constructor() {
                        body.find_base_constructor_call().map_or(0, |call| call + 1)
                    } else {
                        0
                    };
                    vec![(at, JumpPolicy::Shift, 1)]
                }
                (ControlFlowPoint::Body, ExecutionTime::After, _) => {
                    if !advice.return_type.is_void() {
                        binding = binding.with_value(last_param(advice), woven.return_type.clone());
                    }
                    body.returns()
                        .into_iter()
                        .map(|ret| (ret, JumpPolicy::Capture, 1))
                        .collect()
                }
                (ControlFlowPoint::Call, ExecutionTime::Before, Some(offset)) => {
                    vec![(*offset, JumpPolicy::Capture, 1)]
                }
                (ControlFlowPoint::Call, ExecutionTime::After, Some(offset)) => {
                    vec![(offset + 1, JumpPolicy::Shift, 0)]
                }
                (ControlFlowPoint::Call, _, None) => Vec::new(),
            };
            let block = prepare_block(&resolved, &binding);
            let edits = anchors
                .into_iter()
                .map(|(at, policy, slot)| insert(&key, at, policy, &block, order(item, slot, *point, *time)))
                .collect();
            Ok(Some((block, edits)))
        }
        ContributionKind::NewChangeValue {
            source,
            index,
            target,
            method,
            offset,
        } => {
            let (advice, resolved) = advice_body(resolver, source, *index)?;
            let (woven, body) = woven_body(view, target, *method)?;
            let value = body
                .instructions
                .get(*offset)
                .and_then(produced_value)
                .unwrap_or_else(TypeSig::object);
            let binding = FrameBinding::new(!advice.is_static(), !woven.is_static())
                .with_value(last_param(advice), value);
            let block = prepare_block(&resolved, &binding);
            let key = MethodKey {
                ty: target.clone(),
                method: *method,
            };
            let edit = insert(
                &key,
                offset + 1,
                JumpPolicy::Shift,
                &block,
                order(item, 0, ControlFlowPoint::Call, ExecutionTime::After),
            );
            Ok(Some((block, vec![edit])))
        }
        ContributionKind::NewFieldInitializer {
            source,
            ctor,
            length,
            target,
        } => {
            let def = advice_def(view.set(), source)?;
            let advice = advice_member(&def.methods, source, *ctor)?;
            let body = advice
                .body
                .as_ref()
                .ok_or_else(|| missing_advice(format!("{}::{}", source.full_name(), advice.name)))?;
            let prefix = MethodBody {
                instructions: body.instructions[..(*length).min(body.instructions.len())].to_vec(),
                handlers: Vec::new(),
                ..body.clone()
            };
            let context = self_context(advice, def.self_sig(source));
            let resolved = clone_body(resolver, &prefix, context, &|field| static_field(view, field))?;
            let block = prepare_block(&resolved, &FrameBinding::new(true, true));
            let Some(receiving) = view.set().type_def(target) else {
                return Err(WeaveError::MissingTarget {
                    reference: target.full_name(),
                    scope: target.scope.clone(),
                }
                .into());
            };
            let edits = receiving
                .constructors()
                .filter(|(_, ctor)| !ctor.is_static() && ctor.body.is_some() && !chains_to_self(ctor, target))
                .map(|(index, _)| {
                    let key = MethodKey {
                        ty: target.clone(),
                        method: index,
                    };
                    insert(
                        &key,
                        0,
                        JumpPolicy::Shift,
                        &block,
                        order(item, 1, ControlFlowPoint::Body, ExecutionTime::Before),
                    )
                })
                .collect();
            Ok(Some((block, edits)))
        }
        _ => Ok(None),
    }
}

fn item_bodies<'r>(resolver: &mut ItemResolver<'r>, item: &'r WeaveItem) -> Result<ItemBodies, ResolveError> {
    let view = resolver.view();
    let set = view.set();
    let mut output = ItemBodies::default();
    for (position, contribution) in item.contributions.iter().enumerate() {
        match (&contribution.kind, &contribution.clone) {
            (
                ContributionKind::NewAssemblyType { source, .. } | ContributionKind::NewNestedType { source, .. },
                Some(Cloned::Type(clone)),
            ) => {
                let def = advice_def(set, source)?;
                let mut clone = clone.clone();
                fill_type_bodies(resolver, source, def, &mut clone)?;
                output.clones.push((position, Cloned::Type(clone)));
            }
            (
                ContributionKind::NewMethod { source, index, .. }
                | ContributionKind::NewConstructor { source, index, .. }
                | ContributionKind::NewOperator { source, index, .. },
                Some(Cloned::Method(clone)),
            ) => {
                let def = advice_def(set, source)?;
                let advice = advice_member(&def.methods, source, *index)?;
                let Some(body) = &advice.body else {
                    continue;
                };
                let context = self_context(advice, def.self_sig(source));
                let mut clone = clone.clone();
                clone.body = Some(clone_body(resolver, body, context, &|field| static_field(view, field))?);
                output.clones.push((position, Cloned::Method(clone)));
            }
            (kind, _) => {
                if let Some((block, edits)) = code_edits(resolver, item, kind)? {
                    output.clones.push((position, Cloned::Block(block)));
                    output.edits.extend(edits);
                }
            }
        }
    }
    Ok(output)
}

// ============================================================================
// Base constructor chaining
// ============================================================================

fn argument_instructions(view: WovenView<'_>, ctor: &MethodDef, arg: &ArgValue, param: &TypeSig) -> Vec<Instruction> {
    let (load, value_type) = match arg {
        ArgValue::Param(index) => {
            let from = ctor
                .param_types()
                .nth(*index as usize)
                .cloned()
                .unwrap_or_else(TypeSig::object);
            (Instruction::ldarg(index + 1), Some(from))
        }
        ArgValue::Int(value) => match i32::try_from(*value) {
            Ok(small) if !same_type(param, &TypeSig::int64()) => (Instruction::ldc_i4(small), Some(TypeSig::int32())),
            _ => (
                Instruction::new(Opcode::LdcI8, Operand::Int(*value)),
                Some(TypeSig::int64()),
            ),
        },
        ArgValue::Float(value) => (
            Instruction::new(Opcode::LdcR8, Operand::Float(*value)),
            Some(TypeSig::double()),
        ),
        ArgValue::String(value) => (Instruction::ldstr(value.clone()), None),
        ArgValue::Bool(value) => (Instruction::ldc_i4(i32::from(*value)), Some(TypeSig::boolean())),
        ArgValue::Null => (Instruction::simple(Opcode::Ldnull), None),
    };
    let mut out = vec![load];
    if let Some(value_type) = value_type.filter(|value_type| is_value(view, value_type) && !is_value(view, param)) {
        out.push(Instruction::new(Opcode::Box, Operand::Type(value_type)));
    }
    out
}

/// Edits making constructor `plan.ctor` of `target` chain to the new base
fn chain_edits(view: WovenView<'_>, item: &WeaveItem, target: &TypeName, ctor: &MethodDef, plan: &CtorPlan) -> Vec<BodyEdit> {
    let Some(body) = &ctor.body else {
        return Vec::new();
    };
    let method = MethodKey {
        ty: target.clone(),
        method: plan.ctor,
    };
    let base_args = plan.base_ctor.declaring.generic_args();
    let mut args: Vec<Instruction> = plan
        .args
        .iter()
        .zip(&plan.base_ctor.params)
        .flat_map(|(arg, param)| argument_instructions(view, ctor, arg, &substitute(param, base_args, &[])))
        .collect();
    let call = Instruction::call(plan.base_ctor.clone());
    match body.find_base_constructor_call() {
        Some(at) => vec![
            BodyEdit::Insert {
                method: method.clone(),
                at,
                policy: JumpPolicy::Shift,
                block: InlineBlock::new(args),
                key: order(item, 0, ControlFlowPoint::Body, ExecutionTime::Before),
            },
            BodyEdit::Replace {
                method,
                at,
                instruction: call,
            },
        ],
        None => {
            args.insert(0, Instruction::ldarg(0));
            args.push(call);
            vec![BodyEdit::Insert {
                method,
                at: 0,
                policy: JumpPolicy::Shift,
                block: InlineBlock::new(args),
                key: order(item, 1, ControlFlowPoint::Call, ExecutionTime::Before),
            }]
        }
    }
}

impl<'a> WeaveItemBuilder<'a> {
    // ========================================================================
    // Phase: skeletons
    // ========================================================================

    pub(super) fn clone_skeletons(&mut self) -> Result<(), Fault> {
        self.rebuild_overlay();
        for id in self.items.live_ids() {
            let clones = self.with_resolver(id, |resolver, item| {
                item.contributions
                    .iter()
                    .map(|contribution| clone_skeleton(resolver, &contribution.kind))
                    .collect::<Result<Vec<_>, ResolveError>>()
            })?;
            let Some(clones) = clones else {
                continue;
            };
            let item = self.items.get_mut(id);
            for (contribution, clone) in item.contributions.iter_mut().zip(clones) {
                if clone.is_some() {
                    contribution.clone = clone;
                }
            }
        }
        let items = &self.items;
        self.shared
            .auxiliaries
            .retain_users(|user| !items.get(user).errored);
        self.clone_auxiliary_skeletons()?;
        self.overlay_ready = true;
        Ok(())
    }

    /// Auxiliary types are cloned once, with the resolver of their first
    /// user; when that fails every other user fails with it
    fn clone_auxiliary_skeletons(&mut self) -> Result<(), Fault> {
        let pending: Vec<(TypeName, String, TypeName, Vec<ItemId>)> = self
            .shared
            .auxiliaries
            .iter()
            .filter(|auxiliary| auxiliary.clone.is_none())
            .map(|auxiliary| {
                (
                    auxiliary.source.clone(),
                    auxiliary.module.clone(),
                    auxiliary.target.clone(),
                    auxiliary.users.iter().copied().collect(),
                )
            })
            .collect();
        for (source, module, target, users) in pending {
            let Some((&first, others)) = users.split_first() else {
                continue;
            };
            let cloned = self.with_resolver(first, |resolver, _| {
                let def = advice_def(resolver.view().set(), &source)?;
                clone_type_skeleton(
                    resolver,
                    def,
                    def.self_sig(&source),
                    &target.namespace,
                    target.name(),
                    &|_| true,
                )
            })?;
            match cloned {
                Some(def) => {
                    debug!(auxiliary = %target, users = users.len(), "auxiliary type cloned");
                    if let Some(entry) = self
                        .shared
                        .auxiliaries
                        .iter_mut()
                        .find(|auxiliary| auxiliary.source == source && auxiliary.module == module)
                    {
                        entry.clone = Some(def);
                    }
                }
                None => {
                    for other in others {
                        self.items.fail(*other);
                    }
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Phase: bodies
    // ========================================================================

    pub(super) fn clone_bodies(&mut self) -> Result<(), Fault> {
        for id in self.items.live_ids() {
            let Some(output) = self.with_resolver(id, item_bodies)? else {
                continue;
            };
            let item = self.items.get_mut(id);
            for (position, clone) in output.clones {
                item.contributions[position].clone = Some(clone);
            }
            item.edits.extend(output.edits);
        }
        self.clone_auxiliary_bodies()
    }

    fn clone_auxiliary_bodies(&mut self) -> Result<(), Fault> {
        let items = &self.items;
        self.shared.auxiliaries.retain_users(|user| items.is_live(user));
        let pending: Vec<(TypeName, String, ItemId, TypeDef)> = self
            .shared
            .auxiliaries
            .iter()
            .filter_map(|auxiliary| {
                let user = auxiliary.users.iter().next().copied()?;
                let clone = auxiliary.clone.clone()?;
                Some((auxiliary.source.clone(), auxiliary.module.clone(), user, clone))
            })
            .collect();
        for (source, module, user, mut clone) in pending {
            let filled = self.with_resolver(user, |resolver, _| {
                let def = advice_def(resolver.view().set(), &source)?;
                fill_type_bodies(resolver, &source, def, &mut clone)?;
                Ok(clone)
            })?;
            let entry = self
                .shared
                .auxiliaries
                .iter_mut()
                .find(|auxiliary| auxiliary.source == source && auxiliary.module == module);
            match (filled, entry) {
                (Some(def), Some(entry)) => entry.clone = Some(def),
                (None, Some(entry)) => {
                    let others: Vec<ItemId> = entry.users.iter().copied().filter(|other| *other != user).collect();
                    for other in others {
                        self.items.fail(other);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ========================================================================
    // Phase: base constructors
    // ========================================================================

    pub(super) fn emit_base_constructor_calls(&mut self) -> Result<(), Fault> {
        let set = self.set;
        let view = self.view();
        let mut pending = Vec::new();
        for item in self.items.live() {
            let Some(target) = item.contributions.iter().find_map(|contribution| match &contribution.kind {
                ContributionKind::NewBaseType { target, .. } => Some(target),
                _ => None,
            }) else {
                continue;
            };
            for plan in &item.ctor_plans {
                let Some(ctor) = set.type_def(target).and_then(|def| def.methods.get(plan.ctor)) else {
                    continue;
                };
                pending.push((item.id, chain_edits(view, item, target, ctor, plan)));
            }
        }
        for (id, edits) in pending {
            self.items.get_mut(id).edits.extend(edits);
        }
        Ok(())
    }

    // ========================================================================
    // Phase: dispatch flags
    // ========================================================================

    pub(super) fn mark_dispatch_flags(&mut self) -> Result<(), Fault> {
        let set = self.set;
        let mut touched = BTreeSet::new();
        for item in self.items.live() {
            for contribution in &item.contributions {
                match &contribution.kind {
                    ContributionKind::NewInterface { target, .. } | ContributionKind::NewBaseType { target, .. } => {
                        touched.insert(target.clone());
                    }
                    ContributionKind::NewEnumLiteral { .. } => {}
                    kind if kind.is_member() => touched.extend(kind.target_type().cloned()),
                    _ => {}
                }
            }
        }

        let view = self.view();
        let mut existing: BTreeMap<MethodKey, (u32, u32)> = BTreeMap::new();
        let mut contributed: Vec<(ItemId, usize, u32, u32)> = Vec::new();
        for ty in &touched {
            let Some(def) = view.type_def(ty).filter(|def| !def.is_interface()) else {
                continue;
            };
            let Some(flat) = flatten(view, &def.self_sig(ty)) else {
                continue;
            };
            for required in flat.interface_members().filter(|member| member.kind() == MemberKind::Method) {
                if responsible_items(&flat, &required.declaring, required.item()).is_empty() {
                    continue;
                }
                let explicit = format!(
                    "{}.{}",
                    required.declaring.type_name().map(TypeName::full_name).unwrap_or_default(),
                    required.member.name
                );
                let implementor = flat.class_members().find(|candidate| {
                    candidate.depth == 0
                        && candidate.kind() == MemberKind::Method
                        && !candidate.member.is_static()
                        && (candidate.key == required.key || candidate.member.name == explicit)
                        && same_type(&candidate.member_type, &required.member_type)
                });
                let Some(implementor) = implementor.filter(|candidate| !candidate.member.is_virtual()) else {
                    continue;
                };
                match implementor.member.origin {
                    MemberOrigin::Existing(MemberId::Method(index)) if set.type_def(ty).is_some() => {
                        let key = MethodKey {
                            ty: ty.clone(),
                            method: index,
                        };
                        existing.entry(key).or_default().0 |= DISPATCH_FLAGS;
                    }
                    MemberOrigin::Contributed { item, contribution } => {
                        contributed.push((item, contribution, DISPATCH_FLAGS, 0));
                    }
                    _ => {}
                }
            }
            for member in flat.class_members() {
                let MemberOrigin::Contributed { item, contribution } = member.member.origin else {
                    continue;
                };
                let fresh_slot = member.depth == 0
                    && member.kind() == MemberKind::Method
                    && member.member.is_virtual()
                    && member.member.flags & member_flags::NEW_SLOT != 0;
                if !fresh_slot {
                    continue;
                }
                let overrides = flat.members.get(&member.key).map_or(false, |all| {
                    all.iter().any(|other| {
                        !other.in_interface
                            && other.depth > 0
                            && other.member.is_virtual()
                            && same_type(&other.member_type, &member.member_type)
                    })
                });
                if overrides {
                    contributed.push((item, contribution, 0, member_flags::NEW_SLOT));
                }
            }
        }

        for (item, contribution, set_flags, clear) in contributed {
            if let Some(method) = self.items.get_mut(item).contributions[contribution].cloned_method_mut() {
                method.flags = (method.flags | set_flags) & !clear;
                debug!(item = %item, method = %method.name, flags = method.flags, "dispatch flags updated");
            }
        }
        self.flag_edits.extend(
            existing
                .into_iter()
                .map(|(method, (set, clear))| FlagEdit { method, set, clear }),
        );
        Ok(())
    }

    // ========================================================================
    // Phase: merge
    // ========================================================================

    pub(super) fn merge_bodies(&mut self) -> Result<(), Fault> {
        let set = self.set;
        let mut grouped: BTreeMap<&MethodKey, Vec<&BodyEdit>> = BTreeMap::new();
        for item in self.items.live() {
            for edit in &item.edits {
                grouped.entry(edit.method()).or_default().push(edit);
            }
        }
        for (key, edits) in grouped {
            let Some(original) = set
                .type_def(&key.ty)
                .and_then(|def| def.methods.get(key.method))
                .and_then(|method| method.body.as_ref())
            else {
                continue;
            };
            let body = compose(original, &edits);
            debug!(
                ty = %key.ty,
                method = key.method,
                edits = edits.len(),
                instructions = body.instructions.len(),
                "method body merged"
            );
            self.bodies.push((key.clone(), body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::{Advice, AdviceMethod, AspectDefinition};
    use crate::pointcut::{PatternEvaluator, Pointcut};
    use weft_metadata::{type_flags, FieldDef, MethodRef, Module, ParamDef, CONSTRUCTOR_NAME};

    fn ctor_body(base: &TypeName) -> MethodBody {
        let base_ctor = MethodDef::new(CONSTRUCTOR_NAME, 0, TypeSig::void(), Vec::new())
            .to_ref(TypeSig::Named(base.clone()));
        MethodBody::new(vec![Instruction::ldarg(0), Instruction::call(base_ctor), Instruction::ret()])
    }

    fn universe() -> ModuleSet {
        let object = TypeName::system("Object");
        let mut advice = Module::new("Aspects");
        let mut audit = TypeDef::new("Aspects", "Audit", 0);
        audit.fields.push(FieldDef::new(
            "owner",
            0,
            TypeSig::Named(TypeName::new("Aspects", "Aspects", "Audit")),
        ));
        audit.methods.push(
            MethodDef::new("Trace", member_flags::STATIC, TypeSig::void(), Vec::new()).with_body(
                MethodBody::new(vec![
                    Instruction::ldc_i4(7),
                    Instruction::simple(Opcode::Pop),
                    Instruction::ret(),
                ]),
            ),
        );
        advice.types.push(audit);
        let mut entity = TypeDef::new("Aspects", "Entity", 0);
        entity.base = Some(TypeSig::Named(TypeName::new("App", "App", "EntityBase")));
        advice.types.push(entity);

        let mut app = Module::new("App");
        let mut base = TypeDef::new("App", "EntityBase", 0);
        base.base = Some(TypeSig::object());
        base.methods
            .push(MethodDef::new(CONSTRUCTOR_NAME, member_flags::RT_SPECIAL_NAME, TypeSig::void(), Vec::new()).with_body(ctor_body(&object)));
        app.types.push(base);
        let mut order = TypeDef::new("App", "Order", 0);
        order.base = Some(TypeSig::object());
        order.methods.push(
            MethodDef::new("Submit", 0, TypeSig::void(), vec![ParamDef::new("rush", TypeSig::boolean())])
                .with_body(MethodBody::new(vec![Instruction::ret()])),
        );
        order
            .methods
            .push(MethodDef::new(CONSTRUCTOR_NAME, member_flags::RT_SPECIAL_NAME, TypeSig::void(), Vec::new()).with_body(ctor_body(&object)));
        app.types.push(order);
        app.types.push(TypeDef::new("App", "Status", type_flags::VALUE_TYPE | type_flags::ENUM));

        let mut set = ModuleSet::new();
        set.insert(advice);
        set.insert(app);
        set
    }

    fn build(set: &ModuleSet, aspect: AspectDefinition) -> super::super::WeavePlan {
        WeaveItemBuilder::new(set, "Aspects", vec!["App".to_string()])
            .build(&[aspect], &PatternEvaluator::new())
            .unwrap()
    }

    #[test]
    fn test_field_type_is_retargeted() {
        let set = universe();
        let plan = build(
            &set,
            AspectDefinition::new(
                "Owner",
                Pointcut::Types {
                    types: "App.Order".to_string(),
                },
                Advice::TypeMembers {
                    source: "Aspects.Audit".to_string(),
                    members: vec!["owner".to_string()],
                },
            ),
        );
        assert!(plan.diagnostics.is_empty(), "{:?}", plan.diagnostics);
        let item = plan.items.get(ItemId(0));
        let Some(Cloned::Field(field)) = &item.contributions[0].clone else {
            panic!("field not cloned");
        };
        assert_eq!(field.field_type, TypeSig::Named(TypeName::new("App", "App", "Order")));
    }

    #[test]
    fn test_before_advice_inlined_at_entry() {
        let set = universe();
        let plan = build(
            &set,
            AspectDefinition::new(
                "Trace",
                Pointcut::Members {
                    types: "App.Order".to_string(),
                    members: "Submit".to_string(),
                },
                Advice::Code {
                    method: AdviceMethod {
                        ty: "Aspects.Audit".to_string(),
                        method: "Trace".to_string(),
                    },
                    time: ExecutionTime::Before,
                    point: ControlFlowPoint::Body,
                },
            ),
        );
        assert!(plan.diagnostics.is_empty(), "{:?}", plan.diagnostics);
        assert_eq!(plan.bodies.len(), 1);
        let (key, body) = &plan.bodies[0];
        assert_eq!(key.method, 0);
        assert_eq!(
            body.instructions,
            vec![
                Instruction::ldc_i4(7),
                Instruction::simple(Opcode::Pop),
                Instruction::branch(Opcode::Br, 3),
                Instruction::ret(),
            ]
        );
    }

    #[test]
    fn test_new_base_type_rechains_constructor() {
        let set = universe();
        let plan = build(
            &set,
            AspectDefinition::new(
                "Persistent",
                Pointcut::Types {
                    types: "App.Order".to_string(),
                },
                Advice::InheritedTypes {
                    source: "Aspects.Entity".to_string(),
                    constructor_overrides: Vec::new(),
                },
            ),
        );
        assert!(plan.diagnostics.is_empty(), "{:?}", plan.diagnostics);
        let (key, body) = plan
            .bodies
            .iter()
            .find(|(key, _)| key.method == 1)
            .expect("constructor rewritten");
        assert_eq!(key.ty, TypeName::new("App", "App", "Order"));
        let call: &MethodRef = body.instructions[1].operand.as_method().unwrap();
        assert_eq!(call.declaring, TypeSig::Named(TypeName::new("App", "App", "EntityBase")));
        assert_eq!(call.name, CONSTRUCTOR_NAME);
    }

    #[test]
    fn test_base_type_on_value_type_rejected() {
        let set = universe();
        let plan = build(
            &set,
            AspectDefinition::new(
                "Persistent",
                Pointcut::Types {
                    types: "App.Status".to_string(),
                },
                Advice::InheritedTypes {
                    source: "Aspects.Entity".to_string(),
                    constructor_overrides: Vec::new(),
                },
            ),
        );
        assert_eq!(plan.diagnostics.len(), 1);
        assert_eq!(plan.items.live_count(), 0);
    }
}
