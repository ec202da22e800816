//! Contribution validation
//!
//! Checks that run over the complete set of live items: duplicate
//! contributions, new base types and their constructor chaining, the
//! flattened structure of every touched type, interface coverage, enum
//! literal and attribute collisions and injected code signatures.

use std::collections::{BTreeMap, BTreeSet};

use weft_metadata::{
    member_flags, MethodDef, MethodRef, TypeDef, TypeName, TypeSig, CONSTRUCTOR_NAME,
};

use super::construct::produced_value;
use super::WeaveItemBuilder;
use crate::aspect::{ArgValue, AspectKind, BaseCtorOverride, ControlFlowPoint, ExecutionTime};
use crate::cloning::{clone_method_signature, self_context, ReferenceResolver};
use crate::compat::{accepts_null, is_assignable, same_type, same_types};
use crate::contribution::{AttributeTarget, ContributionKind, CtorPlan};
use crate::error::{Fault, WeaveError};
use crate::flatten::{flatten, Conflict, Flattened};
use crate::generics::{substitute, supertypes};
use crate::item::{ItemId, WeaveItem};
use crate::resolve::{ItemResolver, ResolveError};
use crate::view::WovenView;

/// What two contributions must share to be redundant
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RedundancyKey {
    Type(TypeName),
    Member {
        ty: TypeName,
        kind: u8,
        name: String,
        signature: String,
    },
    Base(TypeName),
    Interface {
        ty: TypeName,
        interface: String,
    },
}

fn method_signature(method: &MethodDef) -> String {
    let params: Vec<String> = method.param_types().map(ToString::to_string).collect();
    format!("`{}({})", method.generic_params.len(), params.join(","))
}

fn describe_params(params: &[TypeSig]) -> String {
    let params: Vec<String> = params.iter().map(ToString::to_string).collect();
    format!("{}({})", CONSTRUCTOR_NAME, params.join(", "))
}

/// Whether a literal argument can be passed for `param`
fn arg_fits(view: &WovenView<'_>, arg: &ArgValue, ctor_params: &[TypeSig], param: &TypeSig) -> bool {
    let is = |expected: TypeSig| same_type(param, &expected) || param.is_object();
    match arg {
        ArgValue::Param(index) => ctor_params
            .get(*index as usize)
            .map(|from| is_assignable(view, from, param))
            .unwrap_or(false),
        ArgValue::Int(value) => {
            (same_type(param, &TypeSig::int32()) && i32::try_from(*value).is_ok()) || is(TypeSig::int64())
        }
        ArgValue::Float(_) => is(TypeSig::double()),
        ArgValue::String(_) => is(TypeSig::string()),
        ArgValue::Bool(_) => is(TypeSig::boolean()),
        ArgValue::Null => accepts_null(view, param),
    }
}

/// Whether a constructor chains to another constructor of its own type
pub(super) fn chains_to_self(ctor: &MethodDef, ty: &TypeName) -> bool {
    ctor.body
        .as_ref()
        .and_then(|body| {
            let call = body.find_base_constructor_call()?;
            body.instructions[call].operand.as_method()
        })
        .map(|target| target.declaring.type_name() == Some(ty))
        .unwrap_or(false)
}

fn resolve_all(resolver: &mut ItemResolver<'_>, sigs: &[TypeSig]) -> Result<Vec<TypeSig>, ResolveError> {
    sigs.iter().map(|sig| resolver.resolve_type(sig)).collect()
}

/// Pick a base constructor for every constructor of `target`
fn plan_base_constructors(
    resolver: &mut ItemResolver<'_>,
    source: &TypeSig,
    target: &TypeName,
    overrides: &[BaseCtorOverride],
) -> Result<Vec<CtorPlan>, ResolveError> {
    let view = resolver.view();
    let incompatible = |reason: String| WeaveError::ModifierIncompatible {
        element: target.full_name(),
        reason,
    };
    let Some(def) = view.set().type_def(target) else {
        return Err(WeaveError::MissingTarget {
            reference: target.full_name(),
            scope: target.scope.clone(),
        }
        .into());
    };
    if def.is_value_type() || def.is_interface() {
        return Err(incompatible("value types and interfaces cannot take a base type".to_string()).into());
    }
    if let Some(existing) = def.base.as_ref().filter(|base| !base.is_object()) {
        return Err(incompatible(format!("already derives from {}", existing)).into());
    }
    let base = resolver.resolve_type(source)?;
    let Some(base_def) = base.type_name().and_then(|name| view.type_def(name)) else {
        return Err(WeaveError::MissingTarget {
            reference: base.to_string(),
            scope: target.scope.clone(),
        }
        .into());
    };
    if base_def.is_interface() || base_def.is_value_type() {
        return Err(incompatible(format!("{} cannot be used as a base type", base)).into());
    }

    let mut resolved_overrides = Vec::new();
    for entry in overrides {
        let selector = match &entry.target_ctor_params {
            Some(params) => Some(resolve_all(resolver, params)?),
            None => None,
        };
        let base_params = resolve_all(resolver, &entry.base_ctor_params)?;
        resolved_overrides.push((selector, base_params, &entry.args));
    }

    let base_args = base.generic_args();
    let base_ctors: Vec<(MethodRef, Vec<TypeSig>)> = base_def
        .constructors()
        .filter(|(_, ctor)| !ctor.is_static())
        .map(|(_, ctor)| {
            let params = ctor.param_types().map(|param| substitute(param, base_args, &[])).collect();
            (ctor.to_ref(base.clone()), params)
        })
        .collect();

    let mut plans = Vec::new();
    for (index, ctor) in def.constructors() {
        if ctor.is_static() || chains_to_self(ctor, target) {
            continue;
        }
        let params: Vec<TypeSig> = ctor.param_types().cloned().collect();
        let chosen = resolved_overrides
            .iter()
            .find(|(selector, _, _)| matches!(selector, Some(selected) if same_types(selected, &params)))
            .or_else(|| resolved_overrides.iter().find(|(selector, _, _)| selector.is_none()));
        let found = match chosen {
            Some((_, wanted, args)) => base_ctors
                .iter()
                .find(|(_, candidate)| {
                    same_types(candidate, wanted)
                        && candidate.len() == args.len()
                        && args
                            .iter()
                            .zip(candidate)
                            .all(|(arg, param)| arg_fits(&view, arg, &params, param))
                })
                .map(|(method, _)| (method.clone(), args.to_vec())),
            None => base_ctors
                .iter()
                .find(|(_, candidate)| same_types(candidate, &params))
                .map(|(method, _)| {
                    let forwarded = (0..params.len()).map(|i| ArgValue::Param(i as u16)).collect();
                    (method.clone(), forwarded)
                }),
        };
        let Some((base_ctor, args)) = found else {
            return Err(WeaveError::OverloadedConstructorMismatch {
                ty: target.full_name(),
                base: base.to_string(),
                constructor: describe_params(&params),
            }
            .into());
        };
        plans.push(CtorPlan {
            ctor: index,
            base_ctor,
            args,
        });
    }
    Ok(plans)
}

fn check_prefix(advice: &str, target: &str, params: &[TypeSig], target_params: &[TypeSig]) -> Result<(), WeaveError> {
    for (index, param) in params.iter().enumerate() {
        match target_params.get(index) {
            Some(expected) if same_type(param, expected) => {}
            expected => {
                return Err(WeaveError::ParameterMismatch {
                    advice: advice.to_string(),
                    target: target.to_string(),
                    index,
                    expected: expected.map(ToString::to_string).unwrap_or_else(|| "(none)".to_string()),
                    found: param.to_string(),
                })
            }
        }
    }
    Ok(())
}

fn check_returns(advice: &str, found: &TypeSig, expected: &TypeSig) -> Result<(), WeaveError> {
    if same_type(found, expected) {
        return Ok(());
    }
    Err(WeaveError::ReturnTypeMismatch {
        advice: advice.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    })
}

/// `(prefix…, value) -> value` with the prefix taken from the target
fn check_value_advice(
    advice: &str,
    target: &str,
    cloned: &MethodDef,
    target_params: &[TypeSig],
    value: &TypeSig,
) -> Result<(), WeaveError> {
    check_returns(advice, &cloned.return_type, value)?;
    let params: Vec<TypeSig> = cloned.param_types().cloned().collect();
    let Some((last, prefix)) = params.split_last() else {
        return Err(WeaveError::ParameterMismatch {
            advice: advice.to_string(),
            target: target.to_string(),
            index: 0,
            expected: value.to_string(),
            found: "(none)".to_string(),
        });
    };
    if !same_type(last, value) {
        return Err(WeaveError::ParameterMismatch {
            advice: advice.to_string(),
            target: target.to_string(),
            index: prefix.len(),
            expected: value.to_string(),
            found: last.to_string(),
        });
    }
    check_prefix(advice, target, prefix, target_params)
}

/// Signature rules of inlined advice
fn check_code(resolver: &mut ItemResolver<'_>, kind: &ContributionKind) -> Result<(), ResolveError> {
    let (source, index, target, method, time, point, offset) = match kind {
        ContributionKind::NewCode {
            source,
            index,
            target,
            method,
            time,
            point,
            offset,
        } => (source, *index, target, *method, Some(*time), *point, *offset),
        ContributionKind::NewChangeValue {
            source,
            index,
            target,
            method,
            offset,
        } => (source, *index, target, *method, None, ControlFlowPoint::Call, Some(*offset)),
        _ => return Ok(()),
    };
    let set = resolver.view().set();
    let advice_type = set.type_def(source);
    let Some(advice) = advice_type.and_then(|def| def.methods.get(index)) else {
        return Err(Fault::MissingAdvice {
            element: format!("{}::#{}", source.full_name(), index),
        }
        .into());
    };
    let Some(woven) = set.type_def(target).and_then(|def| def.methods.get(method)) else {
        return Err(WeaveError::MissingTarget {
            reference: format!("{}::#{}", target.full_name(), method),
            scope: target.scope.clone(),
        }
        .into());
    };
    let advice_name = format!("{}::{}", source.full_name(), advice.name);
    let target_name = format!("{}::{}", target.full_name(), woven.name);
    if !advice.is_static() && woven.is_static() {
        return Err(WeaveError::ModifierIncompatible {
            element: advice_name,
            reason: format!("instance advice cannot be inlined into static '{}'", target_name),
        }
        .into());
    }

    let self_sig = advice_type
        .map(|def| def.self_sig(source))
        .unwrap_or_else(|| TypeSig::Named(source.clone()));
    let cloned = clone_method_signature(resolver, advice, self_context(advice, self_sig))?;
    let target_params: Vec<TypeSig> = woven.param_types().cloned().collect();
    let params: Vec<TypeSig> = cloned.param_types().cloned().collect();

    match (time, point) {
        (None, _) => {
            let value = offset
                .and_then(|offset| woven.body.as_ref()?.instructions.get(offset))
                .and_then(produced_value)
                .unwrap_or_else(TypeSig::void);
            check_value_advice(&advice_name, &target_name, &cloned, &target_params, &value)?;
        }
        (Some(ExecutionTime::After), ControlFlowPoint::Body) if !cloned.return_type.is_void() => {
            check_value_advice(&advice_name, &target_name, &cloned, &target_params, &woven.return_type)?;
        }
        _ => {
            check_returns(&advice_name, &cloned.return_type, &TypeSig::void())?;
            check_prefix(&advice_name, &target_name, &params, &target_params)?;
        }
    }
    Ok(())
}

/// Items responsible for an interface member reaching a type
pub(super) fn responsible_items(flat: &Flattened, declaring: &TypeSig, item: Option<ItemId>) -> Vec<ItemId> {
    let mut items: Vec<ItemId> = item.into_iter().collect();
    if let Some(scope) = flat
        .supertypes
        .iter()
        .find(|scope| same_type(&scope.sig(), declaring))
    {
        items.extend(scope.contributing_items());
    }
    items.sort();
    items.dedup();
    items
}

/// Unsatisfied interface members of `ty` reached through contributions
fn uncovered_interface_members(view: WovenView<'_>, ty: &TypeName, def: &TypeDef) -> Vec<Conflict> {
    let Some(flat) = flatten(view, &def.self_sig(ty)) else {
        return Vec::new();
    };
    let mut conflicts = Vec::new();
    for required in flat.interface_members() {
        let items = responsible_items(&flat, &required.declaring, required.item());
        if items.is_empty() {
            continue;
        }
        let interface_name = required
            .declaring
            .type_name()
            .map(TypeName::full_name)
            .unwrap_or_default();
        let explicit = format!("{}.{}", interface_name, required.member.name);
        let satisfied = flat.class_members().any(|candidate| {
            if candidate.kind() != required.kind() || candidate.member.is_static() {
                return false;
            }
            let same_shape = candidate.key.arity == required.key.arity
                && same_types(&candidate.params, &required.params)
                && same_type(&candidate.member_type, &required.member_type);
            let named = candidate.key.name == required.key.name || candidate.member.name == explicit;
            let overrides = candidate.member.overrides.iter().any(|overridden| {
                overridden.name == required.member.name && same_type(&overridden.declaring, &required.declaring)
            });
            (named && same_shape) || overrides
        });
        if !satisfied {
            conflicts.push(Conflict {
                error: WeaveError::InterfaceMemberConflict {
                    ty: ty.full_name(),
                    interface: required.declaring.to_string(),
                    member: required.member.name.clone(),
                },
                items,
            });
        }
    }
    conflicts
}

impl<'a> WeaveItemBuilder<'a> {
    /// Report each distinct conflict once and fail the live items involved
    fn report_conflicts(&mut self, conflicts: Vec<Conflict>) {
        let mut reported: Vec<WeaveError> = Vec::new();
        for conflict in conflicts {
            let live: Vec<ItemId> = conflict
                .items
                .iter()
                .copied()
                .filter(|id| self.items.is_live(*id) && !self.items.get(*id).errored)
                .collect();
            if live.is_empty() && !conflict.items.is_empty() {
                continue;
            }
            if !reported.contains(&conflict.error) {
                reported.push(conflict.error.clone());
                self.diagnostics.push(conflict.error);
            }
            for id in live {
                self.items.fail(id);
            }
        }
    }

    // ========================================================================
    // Phase: redundancy
    // ========================================================================

    fn redundancy_key(&self, kind: &ContributionKind) -> Option<(RedundancyKey, String, String)> {
        let set = self.set;
        let member = |source: &TypeName, target: &TypeName, kind: u8, name: &str, flags: u32, signature: String| {
            if flags & member_flags::NEW != 0 {
                return None;
            }
            Some((
                RedundancyKey::Member {
                    ty: target.clone(),
                    kind,
                    name: name.to_string(),
                    signature,
                },
                format!("{}::{}", source.full_name(), name),
                target.full_name(),
            ))
        };
        match kind {
            ContributionKind::NewAssemblyType { source, target }
            | ContributionKind::NewNestedType { source, target } => Some((
                RedundancyKey::Type(target.clone()),
                source.full_name(),
                target.full_name(),
            )),
            ContributionKind::NewField { source, index, target }
            | ContributionKind::NewEnumLiteral { source, index, target } => {
                let field = set.type_def(source)?.fields.get(*index)?;
                member(source, target, 0, &field.name, field.flags, String::new())
            }
            ContributionKind::NewProperty { source, index, target } => {
                let property = set.type_def(source)?.properties.get(*index)?;
                member(source, target, 1, &property.name, property.flags, String::new())
            }
            ContributionKind::NewEvent { source, index, target } => {
                let event = set.type_def(source)?.events.get(*index)?;
                member(source, target, 2, &event.name, event.flags, String::new())
            }
            ContributionKind::NewMethod { source, index, target }
            | ContributionKind::NewConstructor { source, index, target }
            | ContributionKind::NewOperator { source, index, target } => {
                let method = set.type_def(source)?.methods.get(*index)?;
                member(source, target, 3, &method.name, method.flags, method_signature(method))
            }
            ContributionKind::NewBaseType { source, target, .. } => Some((
                RedundancyKey::Base(target.clone()),
                source.to_string(),
                target.full_name(),
            )),
            ContributionKind::NewInterface { source, target } => Some((
                RedundancyKey::Interface {
                    ty: target.clone(),
                    interface: source.to_string(),
                },
                source.to_string(),
                target.full_name(),
            )),
            _ => None,
        }
    }

    pub(super) fn check_redundancy(&mut self) -> Result<(), Fault> {
        let mut groups: BTreeMap<RedundancyKey, Vec<(ItemId, String, String)>> = BTreeMap::new();
        for item in self.items.live() {
            for contribution in &item.contributions {
                if let Some((key, advice, target)) = self.redundancy_key(&contribution.kind) {
                    groups.entry(key).or_default().push((item.id, advice, target));
                }
            }
        }
        for entries in groups.into_values().filter(|entries| entries.len() > 1) {
            for (id, advice, target) in entries {
                self.fail(id, WeaveError::AlreadyApplied { advice, target });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Phase: new base types
    // ========================================================================

    pub(super) fn validate_base_types(&mut self) -> Result<(), Fault> {
        for id in self.items.live_ids() {
            let bases: Vec<(TypeSig, TypeName, Vec<BaseCtorOverride>)> = self
                .items
                .get(id)
                .contributions
                .iter()
                .filter_map(|contribution| match &contribution.kind {
                    ContributionKind::NewBaseType {
                        source,
                        target,
                        overrides,
                    } => Some((source.clone(), target.clone(), overrides.clone())),
                    _ => None,
                })
                .collect();
            for (source, target, overrides) in bases {
                let plans = self.with_resolver(id, move |resolver, _| {
                    plan_base_constructors(resolver, &source, &target, &overrides)
                })?;
                match plans {
                    Some(plans) => self.items.get_mut(id).ctor_plans.extend(plans),
                    None => break,
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Phase: structural integrity
    // ========================================================================

    pub(super) fn validate_structure(&mut self) -> Result<(), Fault> {
        let set = self.set;
        let mut touched = BTreeSet::new();
        let mut existing = Vec::new();
        for item in self.items.live() {
            for contribution in &item.contributions {
                match &contribution.kind {
                    ContributionKind::NewAssemblyType { target, .. }
                    | ContributionKind::NewNestedType { target, .. } => {
                        if set.type_def(target).is_some() {
                            let ty = target
                                .declaring()
                                .map(|outer| outer.full_name())
                                .unwrap_or_else(|| target.scope.clone());
                            existing.push((
                                item.id,
                                WeaveError::TypeMemberConflict {
                                    ty,
                                    member: target.name().to_string(),
                                    other: target.to_string(),
                                },
                            ));
                        }
                        touched.insert(target.clone());
                    }
                    ContributionKind::NewEnumLiteral { .. } => {}
                    ContributionKind::NewBaseType { target, .. }
                    | ContributionKind::NewInterface { target, .. } => {
                        touched.insert(target.clone());
                    }
                    kind if kind.is_member() => {
                        touched.extend(kind.target_type().cloned());
                    }
                    _ => {}
                }
            }
        }
        for (id, error) in existing {
            self.fail(id, error);
        }

        let view = self.view();
        let mut conflicts = Vec::new();
        for ty in &touched {
            let Some(def) = view.type_def(ty) else {
                continue;
            };
            if let Some(flat) = flatten(view, &def.self_sig(ty)) {
                conflicts.extend(flat.conflicts);
            }
        }
        self.report_conflicts(conflicts);
        Ok(())
    }

    // ========================================================================
    // Phase: contribution checks
    // ========================================================================

    pub(super) fn validate_contributions(&mut self) -> Result<(), Fault> {
        self.validate_literals();
        self.validate_interface_coverage();
        self.validate_attributes();
        self.validate_code()
    }

    fn validate_literals(&mut self) {
        let set = self.set;
        let mut failures = Vec::new();
        for item in self.items.live() {
            for contribution in &item.contributions {
                let ContributionKind::NewEnumLiteral { source, index, target } = &contribution.kind else {
                    continue;
                };
                let Some(name) = set
                    .type_def(source)
                    .and_then(|def| def.fields.get(*index))
                    .map(|field| field.name.clone())
                else {
                    continue;
                };
                if set.type_def(target).and_then(|def| def.field(&name)).is_some() {
                    failures.push((
                        item.id,
                        WeaveError::TypeMemberConflict {
                            ty: target.full_name(),
                            member: format!("{}::{}", source.full_name(), name),
                            other: format!("{}::{}", target.full_name(), name),
                        },
                    ));
                }
            }
        }
        for (id, error) in failures {
            self.fail(id, error);
        }
    }

    /// Types whose interface coverage can change: new interface targets and
    /// implementers of interfaces that receive members
    fn coverage_candidates(&self) -> BTreeSet<TypeName> {
        let set = self.set;
        let view = self.view();
        let mut candidates = BTreeSet::new();
        let mut extended = BTreeSet::new();
        for item in self.items.live() {
            for contribution in &item.contributions {
                match &contribution.kind {
                    ContributionKind::NewInterface { target, .. } => {
                        candidates.insert(target.clone());
                    }
                    kind if kind.is_member() && item.kind == AspectKind::InterfaceMembers => {
                        extended.extend(kind.target_type().cloned());
                    }
                    _ => {}
                }
            }
        }
        if extended.is_empty() {
            return candidates;
        }
        for module in &self.target_modules {
            let Some(module) = set.get(module) else {
                continue;
            };
            for (name, def) in module.all_types() {
                if def.is_interface() {
                    continue;
                }
                let implements = supertypes(&view, &def.self_sig(&name))
                    .iter()
                    .any(|scope| extended.contains(&scope.ty));
                if implements {
                    candidates.insert(name);
                }
            }
        }
        candidates
    }

    fn validate_interface_coverage(&mut self) {
        let candidates = self.coverage_candidates();
        let view = self.view();
        let mut conflicts = Vec::new();
        for ty in &candidates {
            if let Some(def) = view.type_def(ty).filter(|def| !def.is_interface()) {
                conflicts.extend(uncovered_interface_members(view, ty, def));
            }
        }
        self.report_conflicts(conflicts);
    }

    fn validate_attributes(&mut self) {
        let set = self.set;
        let mut groups: BTreeMap<(AttributeTarget, String), Vec<ItemId>> = BTreeMap::new();
        for item in self.items.live() {
            for contribution in &item.contributions {
                let ContributionKind::NewAttribute { source, target } = &contribution.kind else {
                    continue;
                };
                let Some(attribute_type) = source.attribute_type() else {
                    continue;
                };
                groups
                    .entry((target.clone(), attribute_type.full_name()))
                    .or_default()
                    .push(item.id);
            }
        }
        let mut failures = Vec::new();
        for ((target, attribute_type), users) in groups {
            let existing = target
                .attributes(set)
                .map(|attrs| {
                    attrs
                        .iter()
                        .filter(|attr| attr.attribute_type().map(TypeName::full_name).as_deref() == Some(attribute_type.as_str()))
                        .count()
                })
                .unwrap_or(0);
            if existing + users.len() > 1 {
                for id in users {
                    failures.push((
                        id,
                        WeaveError::AlreadyApplied {
                            advice: attribute_type.clone(),
                            target: target.describe(),
                        },
                    ));
                }
            }
        }
        for (id, error) in failures {
            self.fail(id, error);
        }
    }

    fn validate_code(&mut self) -> Result<(), Fault> {
        for id in self.items.live_ids() {
            let code: Vec<usize> = code_contributions(self.items.get(id));
            for index in code {
                let checked = self.with_resolver(id, move |resolver, item| {
                    check_code(resolver, &item.contributions[index].kind)
                })?;
                if checked.is_none() {
                    break;
                }
            }
        }
        Ok(())
    }
}

fn code_contributions(item: &WeaveItem) -> Vec<usize> {
    item.contributions
        .iter()
        .enumerate()
        .filter(|(_, contribution)| {
            matches!(
                contribution.kind,
                ContributionKind::NewCode { .. } | ContributionKind::NewChangeValue { .. }
            )
        })
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::{Advice, AdviceMethod, AspectDefinition};
    use crate::error::DiagnosticId;
    use crate::pointcut::{PatternEvaluator, Pointcut};
    use weft_metadata::{FieldDef, Instruction, MethodBody, Module, ModuleSet, ParamDef};

    fn universe() -> ModuleSet {
        let mut advice = Module::new("Aspects");
        let mut audit = TypeDef::new("Aspects", "Audit", 0);
        audit.fields.push(FieldDef::new("count", 0, TypeSig::int32()));
        audit.methods.push(
            MethodDef::new("Wrong", member_flags::STATIC, TypeSig::int32(), Vec::new())
                .with_body(MethodBody::new(vec![Instruction::ldc_i4(0), Instruction::ret()])),
        );
        audit.methods.push(
            MethodDef::new(
                "Amount",
                member_flags::STATIC,
                TypeSig::int32(),
                vec![ParamDef::new("value", TypeSig::int32())],
            )
            .with_body(MethodBody::new(vec![Instruction::ldarg(0), Instruction::ret()])),
        );
        advice.types.push(audit);

        let mut app = Module::new("App");
        let mut order = TypeDef::new("App", "Order", 0);
        order.fields.push(FieldDef::new("count", 0, TypeSig::int32()));
        order.methods.push(
            MethodDef::new("Submit", 0, TypeSig::void(), Vec::new())
                .with_body(MethodBody::new(vec![Instruction::ret()])),
        );
        order.methods.push(
            MethodDef::new("Total", 0, TypeSig::int32(), Vec::new())
                .with_body(MethodBody::new(vec![Instruction::ldc_i4(1), Instruction::ret()])),
        );
        app.types.push(order);
        app.types.push(TypeDef::new("App", "Invoice", 0));
        let mut set = ModuleSet::new();
        set.insert(advice);
        set.insert(app);
        set
    }

    fn members(types: &str) -> AspectDefinition {
        AspectDefinition::new(
            "Counting",
            Pointcut::Types {
                types: types.to_string(),
            },
            Advice::TypeMembers {
                source: "Aspects.Audit".to_string(),
                members: vec!["count".to_string()],
            },
        )
    }

    fn code(method: &str, member: &str, time: ExecutionTime) -> AspectDefinition {
        AspectDefinition::new(
            "Check",
            Pointcut::Members {
                types: "App.Order".to_string(),
                members: member.to_string(),
            },
            Advice::Code {
                method: AdviceMethod {
                    ty: "Aspects.Audit".to_string(),
                    method: method.to_string(),
                },
                time,
                point: ControlFlowPoint::Body,
            },
        )
    }

    fn build(set: &ModuleSet, aspects: &[AspectDefinition]) -> super::super::WeavePlan {
        WeaveItemBuilder::new(set, "Aspects", vec!["App".to_string()])
            .build(aspects, &PatternEvaluator::new())
            .unwrap()
    }

    #[test]
    fn test_duplicate_contributions_both_flagged() {
        let set = universe();
        let plan = build(&set, &[members("App.Invoice"), members("App.Invoice")]);
        assert_eq!(plan.diagnostics.count(DiagnosticId::AlreadyApplied), 2);
        assert_eq!(plan.items.live_count(), 0);
    }

    #[test]
    fn test_member_clash_with_existing_field() {
        let set = universe();
        let plan = build(&set, &[members("App.Order")]);
        assert_eq!(plan.diagnostics.count(DiagnosticId::TypeMemberConflict), 1);
    }

    #[test]
    fn test_before_advice_must_return_void() {
        let set = universe();
        let plan = build(&set, &[code("Wrong", "Submit", ExecutionTime::Before)]);
        assert_eq!(plan.diagnostics.count(DiagnosticId::ReturnTypeMismatch), 1);
    }

    #[test]
    fn test_after_advice_replaces_return_value() {
        let set = universe();
        let plan = build(&set, &[code("Amount", "Total", ExecutionTime::After)]);
        assert!(plan.diagnostics.is_empty(), "{:?}", plan.diagnostics);
        assert_eq!(plan.bodies.len(), 1);
    }
}
