//! Item construction
//!
//! One weave item per (aspect, matched join point). Construction checks
//! that the join point suits the aspect kind, lists the contributions the
//! advice implies, collects the advice references and records which of
//! them are placeholder members.

use std::collections::BTreeSet;

use tracing::debug;
use weft_metadata::{
    member_flags, CustomAttribute, HasAttributes, Instruction, MethodDef, Opcode, Operand,
    ReferenceCollector, TypeDef, TypeName, TypeSig, CONSTRUCTOR_NAME,
};

use super::prototypes::prototype_root;
use super::WeaveItemBuilder;
use crate::aspect::{
    Advice, AdviceMethod, AspectDefinition, AspectKind, BaseCtorOverride, ControlFlowPoint,
    ExecutionTime,
};
use crate::auxiliary::discover;
use crate::compat::same_types;
use crate::contribution::{AttributeTarget, Contribution, ContributionKind};
use crate::error::{Fault, WeaveError};
use crate::generics::substitute;
use crate::item::WeaveItem;
use crate::joinpoint::{Joinpoint, JoinpointContainer, MemberId};
use crate::mapping::{LookupPolicy, PrototypeItemMapping, ProtoMember};
use crate::pointcut::PointcutEvaluator;
use crate::wellknown::{
    generic_mode, is_authoring_marker, is_provenance_marker, is_woven_by, prototype_item_policy,
    GenericMode,
};

/// Type of the value an instruction leaves on the stack
pub(super) fn produced_value(instruction: &Instruction) -> Option<TypeSig> {
    match instruction.opcode {
        Opcode::Ldfld | Opcode::Ldsfld => instruction
            .operand
            .as_field()
            .map(|field| substitute(&field.field_type, field.declaring.generic_args(), &[])),
        Opcode::Call | Opcode::Callvirt => instruction
            .operand
            .as_method()
            .filter(|method| !method.return_type.is_void())
            .map(|method| {
                substitute(
                    &method.return_type,
                    method.declaring.generic_args(),
                    &method.generic_args,
                )
            }),
        Opcode::Newobj => instruction.operand.as_method().map(|method| method.declaring.clone()),
        _ => None,
    }
}

/// Length of the field initialization prefix of a default constructor:
/// everything before the `ldarg.0` loading `this` for the base call
fn initializer_length(ctor: &MethodDef) -> Option<usize> {
    let body = ctor.body.as_ref()?;
    let call = body.find_base_constructor_call()?;
    let load = call.checked_sub(1)?;
    let this = body.instructions.get(load)?;
    let loads_this = this.opcode == Opcode::Ldarg && matches!(this.operand, Operand::Arg(0));
    (loads_this && load > 0).then_some(load)
}

fn is_operator(method: &MethodDef) -> bool {
    method.is_static()
        && method.flags & member_flags::SPECIAL_NAME != 0
        && method.name.starts_with("op_")
}

fn is_placeholder(attrs: &[CustomAttribute]) -> bool {
    prototype_item_policy(attrs).is_some()
}

fn push_unique(mappings: &mut Vec<PrototypeItemMapping>, mapping: PrototypeItemMapping) {
    if !mappings.contains(&mapping) {
        mappings.push(mapping);
    }
}

impl<'a> WeaveItemBuilder<'a> {
    // ========================================================================
    // Construction
    // ========================================================================

    pub(super) fn construct_items(
        &mut self,
        aspects: &[AspectDefinition],
        evaluator: &dyn PointcutEvaluator,
    ) -> Result<(), Fault> {
        let container = JoinpointContainer::new(self.set, self.target_modules.clone());
        for (index, aspect) in aspects.iter().enumerate() {
            let joinpoints = evaluator.evaluate(&aspect.pointcut, &container);
            debug!(aspect = %aspect.name, matches = joinpoints.len(), "pointcut evaluated");
            for joinpoint in joinpoints {
                let woven = joinpoint
                    .attributes(self.set)
                    .map(|attrs| is_woven_by(attrs, &aspect.name))
                    .unwrap_or(false);
                if woven {
                    debug!(
                        aspect = %aspect.name,
                        joinpoint = %joinpoint.describe(self.set),
                        "join point already woven by this aspect, skipped"
                    );
                    continue;
                }
                self.construct_item(index, aspect, joinpoint);
            }
        }
        Ok(())
    }

    fn construct_item(&mut self, index: usize, aspect: &AspectDefinition, joinpoint: Joinpoint) {
        let id = self.items.next_id();
        let mut item = WeaveItem::new(id, index, aspect.name.clone(), aspect.kind(), joinpoint);
        let mut references = ReferenceCollector::new();
        match self.contributions(&aspect.advice, &mut item, &mut references) {
            Ok(()) => item.item_mappings = self.placeholder_members(&item, &references),
            Err(error) => {
                debug!(aspect = %aspect.name, code = error.code(), "weave item rejected");
                item.errored = true;
                self.diagnostics.push(error);
            }
        }
        self.items.push(item);
        self.references.push(references);
    }

    fn contributions(
        &self,
        advice: &Advice,
        item: &mut WeaveItem,
        refs: &mut ReferenceCollector,
    ) -> Result<(), WeaveError> {
        match advice {
            Advice::Code {
                method,
                time,
                point,
            } => self.code(item, method, *time, *point, refs),
            Advice::ChangeValue { method } => self.change_value(item, method, refs),
            Advice::TypeMembers { source, members } => {
                let (ty, target) = self.joinpoint_type(item)?;
                if target.is_interface() {
                    return Err(self.incompatible(item, "interfaces take members through interface advice"));
                }
                self.members(item, source, members, ty, false, refs)
            }
            Advice::InterfaceMembers { source, members } => {
                let (ty, target) = self.joinpoint_type(item)?;
                if !target.is_interface() {
                    return Err(self.incompatible(item, "interface advice applies to interfaces only"));
                }
                self.members(item, source, members, ty, true, refs)
            }
            Advice::Types { types } => self.types(item, types, refs),
            Advice::EnumMembers { source } => self.enum_members(item, source),
            Advice::Attributes { owner, member } => {
                self.attributes(item, owner, member.as_deref(), refs)
            }
            Advice::InheritedTypes {
                source,
                constructor_overrides,
            } => self.inherited_types(item, source, constructor_overrides, refs),
        }
    }

    fn incompatible(&self, item: &WeaveItem, reason: impl Into<String>) -> WeaveError {
        WeaveError::ModifierIncompatible {
            element: item.joinpoint.describe(self.set),
            reason: reason.into(),
        }
    }

    fn joinpoint_type(&self, item: &WeaveItem) -> Result<(TypeName, &'a TypeDef), WeaveError> {
        let set = self.set;
        match &item.joinpoint {
            Joinpoint::Type { ty } => set
                .type_def(ty)
                .map(|def| (ty.clone(), def))
                .ok_or_else(|| WeaveError::MissingTarget {
                    reference: ty.full_name(),
                    scope: ty.scope.clone(),
                }),
            _ => Err(self.incompatible(item, format!("{:?} advice applies to types only", item.kind))),
        }
    }

    fn advice_method(&self, method: &AdviceMethod) -> Result<(TypeName, usize, &'a MethodDef), WeaveError> {
        let (source, def) = self.advice_type(&method.ty)?;
        let reference = format!("{}::{}", source.full_name(), method.method);
        let found: Vec<(usize, &'a MethodDef)> = def
            .methods
            .iter()
            .enumerate()
            .filter(|(_, candidate)| candidate.name == method.method)
            .collect();
        match found.as_slice() {
            [] => Err(WeaveError::MissingTarget {
                reference,
                scope: source.to_string(),
            }),
            [(index, advice)] => {
                if advice.body.is_none() {
                    return Err(WeaveError::ModifierIncompatible {
                        element: reference,
                        reason: "advice method has no body".to_string(),
                    });
                }
                Ok((source, *index, *advice))
            }
            _ => Err(WeaveError::AmbiguousTarget {
                reference,
                candidates: found
                    .iter()
                    .map(|(_, advice)| advice.to_ref(TypeSig::Named(source.clone())).to_string())
                    .collect(),
            }),
        }
    }

    /// Method a code join point weaves into; it must have a body
    fn woven_method(&self, item: &WeaveItem, ty: &TypeName, index: usize) -> Result<&'a MethodDef, WeaveError> {
        let set = self.set;
        let method = set
            .type_def(ty)
            .and_then(|def| def.methods.get(index))
            .ok_or_else(|| WeaveError::MissingTarget {
                reference: item.joinpoint.describe(set),
                scope: ty.scope.clone(),
            })?;
        if method.body.is_none() {
            return Err(self.incompatible(item, "method has no body to weave into"));
        }
        Ok(method)
    }

    // ------------------------------------------------------------------------
    // Per kind
    // ------------------------------------------------------------------------

    fn code(
        &self,
        item: &mut WeaveItem,
        method: &AdviceMethod,
        time: ExecutionTime,
        point: ControlFlowPoint,
        refs: &mut ReferenceCollector,
    ) -> Result<(), WeaveError> {
        let (ty, target, offset) = match (&item.joinpoint, point) {
            (
                Joinpoint::Member {
                    ty,
                    member: MemberId::Method(index),
                },
                ControlFlowPoint::Body,
            ) => (ty.clone(), *index, None),
            (Joinpoint::Instruction { ty, method, offset }, ControlFlowPoint::Call) => {
                (ty.clone(), *method, Some(*offset))
            }
            (_, ControlFlowPoint::Body) => {
                return Err(self.incompatible(item, "body advice applies to methods only"))
            }
            (_, ControlFlowPoint::Call) => {
                return Err(self.incompatible(item, "call-site advice applies to call instructions only"))
            }
        };
        let woven = self.woven_method(item, &ty, target)?;
        if let Some(offset) = offset {
            let is_call = woven
                .body
                .as_ref()
                .and_then(|body| body.instructions.get(offset))
                .map(|instr| instr.opcode.is_call())
                .unwrap_or(false);
            if !is_call {
                return Err(self.incompatible(item, format!("instruction {} is not a call", offset)));
            }
        }
        let (source, index, advice) = self.advice_method(method)?;
        refs.visit_method(advice);
        item.advice_type = Some(source.clone());
        item.contributions.push(Contribution::new(ContributionKind::NewCode {
            source,
            index,
            target: ty,
            method: target,
            time,
            point,
            offset,
        }));
        Ok(())
    }

    fn change_value(
        &self,
        item: &mut WeaveItem,
        method: &AdviceMethod,
        refs: &mut ReferenceCollector,
    ) -> Result<(), WeaveError> {
        let Joinpoint::Instruction {
            ty,
            method: target,
            offset,
        } = &item.joinpoint
        else {
            return Err(self.incompatible(item, "value advice applies to instructions only"));
        };
        let (ty, target, offset) = (ty.clone(), *target, *offset);
        let woven = self.woven_method(item, &ty, target)?;
        let produces = woven
            .body
            .as_ref()
            .and_then(|body| body.instructions.get(offset))
            .and_then(produced_value)
            .is_some();
        if !produces {
            return Err(self.incompatible(item, format!("instruction {} produces no value", offset)));
        }
        let (source, index, advice) = self.advice_method(method)?;
        refs.visit_method(advice);
        item.advice_type = Some(source.clone());
        item.contributions.push(Contribution::new(ContributionKind::NewChangeValue {
            source,
            index,
            target: ty,
            method: target,
            offset,
        }));
        Ok(())
    }

    /// Member contributions of a type or interface advice
    fn members(
        &self,
        item: &mut WeaveItem,
        source: &str,
        members: &[String],
        ty: TypeName,
        interface: bool,
        refs: &mut ReferenceCollector,
    ) -> Result<(), WeaveError> {
        let (source, def) = self.advice_type(source)?;
        if interface && !def.is_interface() {
            return Err(WeaveError::ModifierIncompatible {
                element: source.full_name(),
                reason: "advice for interface members must be an interface".to_string(),
            });
        }
        item.advice_type = Some(source.clone());
        let selected = |name: &str, flags: u32| {
            members.is_empty()
                || flags & member_flags::COMPILER_GENERATED != 0
                || members.iter().any(|member| member == name)
        };
        let mut push = |kind: ContributionKind| item.contributions.push(Contribution::new(kind));
        let mut accessors = BTreeSet::new();

        for (index, property) in def.properties.iter().enumerate() {
            if is_placeholder(property.attributes()) || !selected(&property.name, property.flags) {
                continue;
            }
            accessors.extend(property.getter.iter().chain(&property.setter).cloned());
            refs.visit_property(property);
            push(ContributionKind::NewProperty {
                source: source.clone(),
                index,
                target: ty.clone(),
            });
        }
        for (index, event) in def.events.iter().enumerate() {
            if is_placeholder(event.attributes()) || !selected(&event.name, event.flags) {
                continue;
            }
            accessors.extend(event.adder.iter().chain(&event.remover).cloned());
            refs.visit_event(event);
            push(ContributionKind::NewEvent {
                source: source.clone(),
                index,
                target: ty.clone(),
            });
        }
        if !interface {
            for (index, field) in def.fields.iter().enumerate() {
                if is_placeholder(&field.attributes) || !selected(&field.name, field.flags) {
                    continue;
                }
                refs.visit_field(field);
                push(ContributionKind::NewField {
                    source: source.clone(),
                    index,
                    target: ty.clone(),
                });
            }
        }
        for (index, method) in def.methods.iter().enumerate() {
            if is_placeholder(&method.attributes) || method.is_type_initializer() {
                continue;
            }
            if method.is_constructor() {
                if interface {
                    continue;
                }
                if method.params.is_empty() {
                    if let Some(length) = initializer_length(method).filter(|_| members.is_empty()) {
                        refs.visit_method(method);
                        push(ContributionKind::NewFieldInitializer {
                            source: source.clone(),
                            ctor: index,
                            length,
                            target: ty.clone(),
                        });
                    }
                } else if members.is_empty() || members.iter().any(|name| name == CONSTRUCTOR_NAME) {
                    refs.visit_method(method);
                    push(ContributionKind::NewConstructor {
                        source: source.clone(),
                        index,
                        target: ty.clone(),
                    });
                }
                continue;
            }
            if !accessors.contains(&method.name) && !selected(&method.name, method.flags) {
                continue;
            }
            refs.visit_method(method);
            let (source, target) = (source.clone(), ty.clone());
            push(if is_operator(method) {
                ContributionKind::NewOperator {
                    source,
                    index,
                    target,
                }
            } else {
                ContributionKind::NewMethod {
                    source,
                    index,
                    target,
                }
            });
        }
        Ok(())
    }

    fn types(
        &self,
        item: &mut WeaveItem,
        types: &[String],
        refs: &mut ReferenceCollector,
    ) -> Result<(), WeaveError> {
        for full_name in types {
            let (source, def) = self.advice_type(full_name)?;
            let kind = match &item.joinpoint {
                Joinpoint::Assembly { module } => ContributionKind::NewAssemblyType {
                    target: TypeName::new(module.clone(), source.namespace.clone(), source.name()),
                    source,
                },
                Joinpoint::Type { ty } => ContributionKind::NewNestedType {
                    target: ty.nested(source.name()),
                    source,
                },
                _ => {
                    return Err(self.incompatible(item, "types are introduced into modules or types only"))
                }
            };
            refs.visit_type(def);
            item.contributions.push(Contribution::new(kind));
        }
        Ok(())
    }

    fn enum_members(&self, item: &mut WeaveItem, source: &str) -> Result<(), WeaveError> {
        let (ty, target) = self.joinpoint_type(item)?;
        if !target.is_enum() {
            return Err(self.incompatible(item, "literals apply to enumerations only"));
        }
        let (source, def) = self.advice_type(source)?;
        if !def.is_enum() {
            return Err(WeaveError::ModifierIncompatible {
                element: source.full_name(),
                reason: "advice for literals must be an enumeration".to_string(),
            });
        }
        item.advice_type = Some(source.clone());
        for (index, field) in def.fields.iter().enumerate() {
            if field.is_static() && field.flags & member_flags::LITERAL != 0 {
                item.contributions.push(Contribution::new(ContributionKind::NewEnumLiteral {
                    source: source.clone(),
                    index,
                    target: ty.clone(),
                }));
            }
        }
        Ok(())
    }

    fn attributes(
        &self,
        item: &mut WeaveItem,
        owner: &str,
        member: Option<&str>,
        refs: &mut ReferenceCollector,
    ) -> Result<(), WeaveError> {
        let (source, def) = self.advice_type(owner)?;
        let attrs: &[CustomAttribute] = match member {
            None => &def.attributes,
            Some(name) => def
                .field(name)
                .map(|field| field.attributes.as_slice())
                .or_else(|| def.method(name).map(|method| method.attributes.as_slice()))
                .or_else(|| def.property(name).map(|property| property.attributes.as_slice()))
                .or_else(|| def.event(name).map(|event| event.attributes.as_slice()))
                .ok_or_else(|| WeaveError::MissingTarget {
                    reference: format!("{}::{}", source.full_name(), name),
                    scope: source.to_string(),
                })?,
        };
        let target = match &item.joinpoint {
            Joinpoint::Assembly { module } => AttributeTarget::Module(module.clone()),
            Joinpoint::Type { ty } => AttributeTarget::Type(ty.clone()),
            Joinpoint::Member { ty, member } => AttributeTarget::Member {
                ty: ty.clone(),
                member: *member,
            },
            Joinpoint::Instruction { .. } => {
                return Err(self.incompatible(item, "attributes cannot be attached to an instruction"))
            }
        };
        item.advice_type = Some(source);
        for attr in attrs
            .iter()
            .filter(|attr| !is_authoring_marker(attr) && !is_provenance_marker(attr))
        {
            refs.visit_attribute(attr);
            item.contributions.push(Contribution::new(ContributionKind::NewAttribute {
                source: attr.clone(),
                target: target.clone(),
            }));
        }
        Ok(())
    }

    fn inherited_types(
        &self,
        item: &mut WeaveItem,
        source: &str,
        overrides: &[BaseCtorOverride],
        refs: &mut ReferenceCollector,
    ) -> Result<(), WeaveError> {
        let (ty, target) = self.joinpoint_type(item)?;
        if target.is_interface() {
            return Err(self.incompatible(item, "interfaces cannot take a base type"));
        }
        let (source, def) = self.advice_type(source)?;
        item.advice_type = Some(source);
        if let Some(base) = def.base.as_ref().filter(|base| !base.is_object()) {
            refs.visit_sig(base);
            item.contributions.push(Contribution::new(ContributionKind::NewBaseType {
                source: base.clone(),
                target: ty.clone(),
                overrides: overrides.to_vec(),
            }));
        }
        for entry in &def.interfaces {
            refs.visit_sig(&entry.interface);
            item.contributions.push(Contribution::new(ContributionKind::NewInterface {
                source: entry.interface.clone(),
                target: ty.clone(),
            }));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Placeholder members
    // ------------------------------------------------------------------------

    /// Advice type declaring a referenced member, when its members may be
    /// placeholders: a placeholder type, or the item's own advice type
    fn placeholder_declaring(&self, item: &WeaveItem, declaring: &TypeSig) -> Option<(TypeName, &'a TypeDef, bool)> {
        let name = declaring.type_name()?;
        if name.scope != self.advice_module {
            return None;
        }
        let prototype = prototype_root(self.set, name).is_some();
        if !prototype && item.advice_type.as_ref() != Some(name) {
            return None;
        }
        let set = self.set;
        set.type_def(name).map(|def| (name.clone(), def, prototype))
    }

    fn placeholder_members(&self, item: &WeaveItem, refs: &ReferenceCollector) -> Vec<PrototypeItemMapping> {
        let mut mappings = Vec::new();
        let policy_of = |prototype: bool, flags: u32, attrs: &[CustomAttribute]| {
            let marked = prototype_item_policy(attrs);
            if !prototype {
                return marked;
            }
            if flags & member_flags::COMPILER_GENERATED != 0 {
                return Some(LookupPolicy::CompilerGenerated);
            }
            Some(marked.unwrap_or(LookupPolicy::Anywhere))
        };

        for field in &refs.fields {
            let Some((declaring, def, prototype)) = self.placeholder_declaring(item, &field.declaring) else {
                continue;
            };
            let Some(found) = def.field(&field.name) else {
                continue;
            };
            if let Some(policy) = policy_of(prototype, found.flags, &found.attributes) {
                push_unique(
                    &mut mappings,
                    PrototypeItemMapping::new(declaring, ProtoMember::field(found), policy),
                );
            }
        }

        for method in &refs.methods {
            if method.is_constructor() {
                continue;
            }
            let Some((declaring, def, prototype)) = self.placeholder_declaring(item, &method.declaring) else {
                continue;
            };
            let name = Some(method.name.as_str());
            let described = if let Some(property) = def
                .properties
                .iter()
                .find(|property| property.getter.as_deref() == name || property.setter.as_deref() == name)
            {
                Some((ProtoMember::property(property), property.flags, property.attributes.as_slice()))
            } else if let Some(event) = def
                .events
                .iter()
                .find(|event| event.adder.as_deref() == name || event.remover.as_deref() == name)
            {
                Some((ProtoMember::event(event), event.flags, event.attributes.as_slice()))
            } else {
                def.methods
                    .iter()
                    .find(|candidate| {
                        candidate.name == method.name
                            && candidate.generic_params.len() as u16 == method.generic_arity
                            && same_types(
                                &candidate.param_types().cloned().collect::<Vec<_>>(),
                                &method.params,
                            )
                    })
                    .map(|found| (ProtoMember::method(found), found.flags, found.attributes.as_slice()))
            };
            let Some((member, flags, attrs)) = described else {
                continue;
            };
            if let Some(policy) = policy_of(prototype, flags, attrs) {
                push_unique(&mut mappings, PrototypeItemMapping::new(declaring, member, policy));
            }
        }

        if item.kind != AspectKind::Types {
            if let Some(advice) = &item.advice_type {
                let params = self
                    .set
                    .type_def(advice)
                    .map(|def| def.generic_params.as_slice())
                    .unwrap_or_default();
                for param in params {
                    let policy = match generic_mode(param) {
                        GenericMode::Name => LookupPolicy::GenericByName,
                        GenericMode::Index => LookupPolicy::GenericByIndex,
                    };
                    push_unique(
                        &mut mappings,
                        PrototypeItemMapping::new(
                            advice.clone(),
                            ProtoMember::GenericParam {
                                position: param.position,
                                name: param.name.clone(),
                            },
                            policy,
                        ),
                    );
                }
            }
        }
        mappings
    }

    // ========================================================================
    // Auxiliary registration
    // ========================================================================

    /// Register the compiler-generated types each live item's advice reaches
    pub(super) fn register_auxiliaries(&mut self) -> Result<(), Fault> {
        for id in self.items.live_ids() {
            let item = self.items.get(id);
            let introduced: Vec<&TypeName> = item
                .contributions
                .iter()
                .filter_map(|contribution| match &contribution.kind {
                    ContributionKind::NewAssemblyType { source, .. }
                    | ContributionKind::NewNestedType { source, .. } => Some(source),
                    _ => None,
                })
                .collect();
            for root in discover(self.set, &self.references[id.index()]) {
                if root.scope != self.advice_module
                    || introduced.iter().any(|source| root.is_within(source))
                {
                    continue;
                }
                let auxiliary = self.shared.auxiliaries.register(&root, &item.target_module, id);
                debug!(item = %id, auxiliary = %auxiliary.target, "auxiliary type registered");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnosticId;
    use crate::pointcut::{PatternEvaluator, Pointcut};
    use crate::wellknown::{woven_by, PROTOTYPE_TYPE};
    use weft_metadata::{
        type_flags, FieldDef, FieldRef, MethodBody, Module, ModuleSet, ParamDef,
    };

    fn order_module() -> Module {
        let mut app = Module::new("App");
        let mut order = TypeDef::new("App", "Order", 0);
        order.base = Some(TypeSig::object());
        order.fields.push(FieldDef::new("total", 0, TypeSig::int32()));
        order.methods.push(
            MethodDef::new("Submit", 0, TypeSig::void(), Vec::new())
                .with_body(MethodBody::new(vec![Instruction::ret()])),
        );
        app.types.push(order);
        app
    }

    fn advice_module() -> Module {
        let mut advice = Module::new("Aspects");
        let mut audit = TypeDef::new("Aspects", "Audit", 0);
        audit.fields.push(FieldDef::new("count", 0, TypeSig::int32()));
        let count = FieldRef {
            declaring: TypeSig::Named(TypeName::new("Aspects", "Aspects", "Audit")),
            name: "count".to_string(),
            field_type: TypeSig::int32(),
        };
        let object_ctor = MethodDef::new(CONSTRUCTOR_NAME, 0, TypeSig::void(), Vec::new())
            .to_ref(TypeSig::object());
        audit.methods.push(
            MethodDef::new(CONSTRUCTOR_NAME, member_flags::RT_SPECIAL_NAME, TypeSig::void(), Vec::new())
                .with_body(MethodBody::new(vec![
                    Instruction::ldarg(0),
                    Instruction::ldc_i4(5),
                    Instruction::stfld(count),
                    Instruction::ldarg(0),
                    Instruction::call(object_ctor),
                    Instruction::ret(),
                ])),
        );
        let mut proto = TypeDef::new("Aspects", "Order", 0);
        proto
            .attributes
            .push(CustomAttribute::with_strings(TypeName::parse("Weft", PROTOTYPE_TYPE), &[]));
        proto.fields.push(FieldDef::new("total", 0, TypeSig::int32()));
        advice.types.push(proto);
        let total = FieldRef {
            declaring: TypeSig::Named(TypeName::new("Aspects", "Aspects", "Order")),
            name: "total".to_string(),
            field_type: TypeSig::int32(),
        };
        audit.methods.push(
            MethodDef::new(
                "Log",
                member_flags::STATIC,
                TypeSig::void(),
                vec![ParamDef::new(
                    "order",
                    TypeSig::Named(TypeName::new("Aspects", "Aspects", "Order")),
                )],
            )
            .with_body(MethodBody::new(vec![
                Instruction::ldarg(0),
                Instruction::ldfld(total),
                Instruction::simple(Opcode::Pop),
                Instruction::ret(),
            ])),
        );
        advice.types.push(audit);
        let mut level = TypeDef::new("Aspects", "Level", type_flags::ENUM | type_flags::VALUE_TYPE);
        level.fields.push(FieldDef::new(
            "Verbose",
            member_flags::STATIC | member_flags::LITERAL,
            TypeSig::Named(TypeName::new("Aspects", "Aspects", "Level")),
        ));
        advice.types.push(level);
        advice
    }

    fn universe(app: Module) -> ModuleSet {
        let mut set = ModuleSet::new();
        set.insert(advice_module());
        set.insert(app);
        set
    }

    fn construct<'a>(set: &'a ModuleSet, aspects: &[AspectDefinition]) -> WeaveItemBuilder<'a> {
        let mut builder = WeaveItemBuilder::new(set, "Aspects", vec!["App".to_string()]);
        builder.construct_items(aspects, &PatternEvaluator::new()).unwrap();
        builder
    }

    fn members_aspect() -> AspectDefinition {
        AspectDefinition::new(
            "Counting",
            Pointcut::Types {
                types: "App.Order".to_string(),
            },
            Advice::TypeMembers {
                source: "Aspects.Audit".to_string(),
                members: Vec::new(),
            },
        )
    }

    #[test]
    fn test_type_members_contributions() {
        let set = universe(order_module());
        let builder = construct(&set, &[members_aspect()]);
        let item = builder.items.get(crate::item::ItemId(0));
        assert!(!item.errored);
        let kinds: Vec<&ContributionKind> = item.contributions.iter().map(|c| &c.kind).collect();
        assert!(matches!(kinds[0], ContributionKind::NewField { index: 0, .. }));
        assert!(kinds
            .iter()
            .any(|kind| matches!(kind, ContributionKind::NewFieldInitializer { length: 3, .. })));
        assert!(kinds
            .iter()
            .any(|kind| matches!(kind, ContributionKind::NewMethod { index: 1, .. })));
        // the placeholder field read by Log becomes a member mapping
        assert_eq!(item.item_mappings.len(), 1);
        assert_eq!(item.item_mappings[0].policy, LookupPolicy::Anywhere);
    }

    #[test]
    fn test_already_woven_joinpoint_skipped() {
        let mut app = order_module();
        app.types[0]
            .attributes
            .push(woven_by("Counting", "repo", "2024-01-01T00:00:00Z"));
        let set = universe(app);
        let builder = construct(&set, &[members_aspect()]);
        assert!(builder.items.is_empty());
        assert!(builder.diagnostics.is_empty());
    }

    #[test]
    fn test_wrong_joinpoint_kind() {
        let set = universe(order_module());
        let aspect = AspectDefinition::new(
            "Entry",
            Pointcut::Types {
                types: "App.Order".to_string(),
            },
            Advice::Code {
                method: AdviceMethod {
                    ty: "Aspects.Audit".to_string(),
                    method: "Log".to_string(),
                },
                time: ExecutionTime::Before,
                point: ControlFlowPoint::Body,
            },
        );
        let builder = construct(&set, &[aspect]);
        assert!(builder.items.get(crate::item::ItemId(0)).errored);
        assert_eq!(builder.diagnostics.count(DiagnosticId::ModifierIncompatible), 1);
    }

    #[test]
    fn test_missing_advice_method() {
        let set = universe(order_module());
        let aspect = AspectDefinition::new(
            "Entry",
            Pointcut::Members {
                types: "App.Order".to_string(),
                members: "Submit".to_string(),
            },
            Advice::Code {
                method: AdviceMethod {
                    ty: "Aspects.Audit".to_string(),
                    method: "Nope".to_string(),
                },
                time: ExecutionTime::Before,
                point: ControlFlowPoint::Body,
            },
        );
        let builder = construct(&set, &[aspect]);
        assert_eq!(builder.diagnostics.count(DiagnosticId::MissingTarget), 1);
    }

    #[test]
    fn test_enum_members_need_enum_target() {
        let set = universe(order_module());
        let aspect = AspectDefinition::new(
            "Levels",
            Pointcut::Types {
                types: "App.Order".to_string(),
            },
            Advice::EnumMembers {
                source: "Aspects.Level".to_string(),
            },
        );
        let builder = construct(&set, &[aspect]);
        assert_eq!(builder.diagnostics.count(DiagnosticId::ModifierIncompatible), 1);
    }

    #[test]
    fn test_produced_value() {
        let field = FieldRef {
            declaring: TypeSig::Named(TypeName::new("App", "App", "Order")),
            name: "total".to_string(),
            field_type: TypeSig::int32(),
        };
        assert_eq!(produced_value(&Instruction::ldfld(field)), Some(TypeSig::int32()));
        assert_eq!(produced_value(&Instruction::ret()), None);
    }
}
