//! Weave item builder
//!
//! [`WeaveItemBuilder`] turns aspect definitions into a [`WeavePlan`]: the
//! live weave items with their cloned contributions, the shared auxiliary
//! types, the rewritten method bodies and the dispatch flag changes. Work is
//! organized as a fixed sequence of phases. Each phase runs over every live
//! item before the next one starts, and liveness is refreshed at every phase
//! boundary, so a phase only ever sees items that survived all previous
//! phases.
//!
//! Per-item user errors are collected as diagnostics and fail the item (and,
//! transitively, the items that consume its output). Internal faults abort
//! the build.

mod construct;
mod emit;
mod prototypes;
mod validate;

use std::time::Instant;

use tracing::{debug, info};
use weft_metadata::{MethodBody, MethodDef, ModuleSet, ReferenceCollector, TypeDef, TypeName};

use crate::aspect::AspectDefinition;
use crate::auxiliary::Auxiliaries;
use crate::contribution::{Cloned, ContributionKind, MethodKey};
use crate::error::{Diagnostics, Fault, WeaveError};
use crate::item::{ItemId, WeaveItem, WeaveItems};
use crate::mapping::PrototypeTypeMappings;
use crate::pointcut::PointcutEvaluator;
use crate::resolve::{Introductions, ItemResolver, ResolveContext, ResolveError};
use crate::view::{declared_members, Edge, MemberOrigin, Overlay, ViewMember, WovenView};

/// Flag change on an existing method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagEdit {
    /// The method
    pub method: MethodKey,
    /// Flags to set
    pub set: u32,
    /// Flags to clear
    pub clear: u32,
}

/// Outcome of a build
#[derive(Debug, Clone)]
pub struct WeavePlan {
    /// Every item; the live ones carry complete contributions
    pub items: WeaveItems,
    /// Shared compiler-generated types with their clones
    pub auxiliaries: Auxiliaries,
    /// Rewritten bodies of existing methods
    pub bodies: Vec<(MethodKey, MethodBody)>,
    /// Flag changes of existing methods
    pub flag_edits: Vec<FlagEdit>,
    /// Diagnostics in report order
    pub diagnostics: Diagnostics,
}

impl WeavePlan {
    /// Number of contributions of live items
    pub fn contribution_count(&self) -> usize {
        self.items.live().map(|item| item.contributions.len()).sum()
    }
}

/// State read by resolvers, kept apart from the items so resolvers can
/// borrow it while items are updated
#[derive(Debug, Default)]
struct Shared {
    prototypes: PrototypeTypeMappings,
    auxiliaries: Auxiliaries,
    overlay: Overlay,
    introductions: Introductions,
}

impl Shared {
    fn view<'s>(&'s self, set: &'s ModuleSet) -> WovenView<'s> {
        WovenView::new(set, &self.overlay)
    }

    fn context<'s>(&'s self, set: &'s ModuleSet, advice_module: &'s str) -> ResolveContext<'s> {
        ResolveContext {
            view: self.view(set),
            advice_module,
            prototypes: &self.prototypes,
            introductions: &self.introductions,
            auxiliaries: &self.auxiliaries,
        }
    }
}

/// Builds weave items for one advice module and its target modules
pub struct WeaveItemBuilder<'a> {
    set: &'a ModuleSet,
    advice_module: String,
    target_modules: Vec<String>,
    items: WeaveItems,
    /// Advice references per item, indexed by item id
    references: Vec<ReferenceCollector>,
    shared: Shared,
    overlay_ready: bool,
    diagnostics: Diagnostics,
    bodies: Vec<(MethodKey, MethodBody)>,
    flag_edits: Vec<FlagEdit>,
}

impl<'a> WeaveItemBuilder<'a> {
    /// Builder over a loaded module universe
    pub fn new(set: &'a ModuleSet, advice_module: impl Into<String>, target_modules: Vec<String>) -> Self {
        Self {
            set,
            advice_module: advice_module.into(),
            target_modules,
            items: WeaveItems::new(),
            references: Vec::new(),
            shared: Shared::default(),
            overlay_ready: false,
            diagnostics: Diagnostics::new(),
            bodies: Vec::new(),
            flag_edits: Vec::new(),
        }
    }

    /// Run every phase
    pub fn build(
        mut self,
        aspects: &[AspectDefinition],
        evaluator: &dyn PointcutEvaluator,
    ) -> Result<WeavePlan, Fault> {
        self.run_phase("prototype-types", Self::resolve_prototype_types)?;
        self.run_phase("construction", |builder| builder.construct_items(aspects, evaluator))?;
        self.run_phase("auxiliaries", Self::register_auxiliaries)?;
        self.run_phase("redundancy", Self::check_redundancy)?;
        self.run_phase("prototype-bindings", Self::bind_prototypes)?;
        self.run_phase("skeletons", Self::clone_skeletons)?;
        self.run_phase("base-types", Self::validate_base_types)?;
        self.run_phase("structure", Self::validate_structure)?;
        self.run_phase("validation", Self::validate_contributions)?;
        self.run_phase("member-mappings", Self::resolve_member_mappings)?;
        self.run_phase("prototype-structure", Self::validate_prototype_structure)?;
        self.run_phase("bodies", Self::clone_bodies)?;
        self.run_phase("base-constructors", Self::emit_base_constructor_calls)?;
        self.run_phase("dispatch", Self::mark_dispatch_flags)?;
        self.run_phase("merge", Self::merge_bodies)?;
        Ok(self.into_plan())
    }

    fn into_plan(mut self) -> WeavePlan {
        let items = &self.items;
        self.shared
            .auxiliaries
            .retain_users(|user| !items.get(user).errored);
        WeavePlan {
            items: self.items,
            auxiliaries: self.shared.auxiliaries,
            bodies: self.bodies,
            flag_edits: self.flag_edits,
            diagnostics: self.diagnostics,
        }
    }

    // ========================================================================
    // Phase plumbing
    // ========================================================================

    fn run_phase(
        &mut self,
        phase: &'static str,
        run: impl FnOnce(&mut Self) -> Result<(), Fault>,
    ) -> Result<(), Fault> {
        let started = Instant::now();
        run(self)?;
        self.items.propagate();
        self.items.refresh_liveness();
        if self.overlay_ready {
            self.rebuild_overlay();
        }
        info!(
            phase,
            live_items = self.items.live_count(),
            diagnostics = self.diagnostics.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "weave phase complete"
        );
        Ok(())
    }

    /// Report a diagnostic against an item and fail it
    fn fail(&mut self, id: ItemId, error: WeaveError) {
        debug!(item = %id, code = error.code(), "weave item failed");
        self.diagnostics.push(error);
        self.items.fail(id);
    }

    fn report(&mut self, id: ItemId, error: ResolveError) -> Result<(), Fault> {
        match error {
            ResolveError::Diagnostic(error) => {
                self.fail(id, error);
                Ok(())
            }
            ResolveError::Fault(fault) => Err(fault),
        }
    }

    /// Run `run` with a resolver for item `id`
    ///
    /// The resolution cache and the *needs* edges discovered are stored on
    /// the item afterwards. A diagnostic fails the item and yields `None`.
    fn with_resolver<T>(
        &mut self,
        id: ItemId,
        run: impl for<'r> FnOnce(&mut ItemResolver<'r>, &'r WeaveItem) -> Result<T, ResolveError>,
    ) -> Result<Option<T>, Fault> {
        let (result, cache, needs) = {
            let ctx = self.shared.context(self.set, &self.advice_module);
            let item = self.items.get(id);
            let mut resolver = ItemResolver::new(ctx, item, item.cache.clone());
            let result = run(&mut resolver, item);
            let (cache, needs) = resolver.finish();
            (result, cache, needs)
        };
        self.items.get_mut(id).cache = cache;
        for provider in needs {
            self.items.add_need(id, provider);
        }
        match result {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                self.report(id, error)?;
                Ok(None)
            }
        }
    }

    fn view(&self) -> WovenView<'_> {
        self.shared.view(self.set)
    }

    fn advice_name(&self, full_name: &str) -> TypeName {
        TypeName::parse(self.advice_module.clone(), full_name)
    }

    /// Advice type by full name
    fn advice_type(&self, full_name: &str) -> Result<(TypeName, &'a TypeDef), WeaveError> {
        let name = self.advice_name(full_name);
        let set = self.set;
        match set.type_def(&name) {
            Some(def) => Ok((name, def)),
            None => Err(WeaveError::MissingTarget {
                reference: full_name.to_string(),
                scope: format!("advice module {}", self.advice_module),
            }),
        }
    }

    /// Recompute the overlay and the introductions from the live items
    fn rebuild_overlay(&mut self) {
        let mut overlay = Overlay::new();
        let mut introductions = Introductions::new();
        for item in self.items.live() {
            for (index, contribution) in item.contributions.iter().enumerate() {
                let origin = MemberOrigin::Contributed {
                    item: item.id,
                    contribution: index,
                };
                match (&contribution.kind, &contribution.clone) {
                    (
                        ContributionKind::NewAssemblyType { source, target }
                        | ContributionKind::NewNestedType { source, target },
                        clone,
                    ) => {
                        introductions.add(source.clone(), item.id, target.clone());
                        if let Some(Cloned::Type(def)) = clone {
                            overlay.new_types.insert(target.clone(), def.clone());
                        }
                    }
                    (ContributionKind::NewBaseType { target, .. }, Some(Cloned::Base(sig))) => {
                        overlay.bases.insert(
                            target.clone(),
                            Edge {
                                sig: sig.clone(),
                                origin: Some(item.id),
                            },
                        );
                    }
                    (ContributionKind::NewInterface { target, .. }, Some(Cloned::Interface(entry))) => {
                        overlay.interfaces.entry(target.clone()).or_default().push(Edge {
                            sig: entry.interface.clone(),
                            origin: Some(item.id),
                        });
                    }
                    (kind, Some(clone)) if kind.is_member() => {
                        if let (Some(target), Some(member)) =
                            (kind.target_type(), contributed_member(clone, origin))
                        {
                            overlay.add_member(target, member);
                        }
                    }
                    _ => {}
                }
            }
        }
        for auxiliary in self.shared.auxiliaries.iter() {
            if let Some(def) = &auxiliary.clone {
                overlay.new_types.insert(auxiliary.target.clone(), def.clone());
            }
        }
        self.shared.overlay = overlay;
        self.shared.introductions = introductions;
    }
}

/// View of a cloned member
fn contributed_member(clone: &Cloned, origin: MemberOrigin) -> Option<ViewMember> {
    let mut holder = TypeDef::default();
    match clone {
        Cloned::Field(field) => holder.fields.push(field.clone()),
        Cloned::Method(method) => holder.methods.push(MethodDef {
            body: None,
            ..method.clone()
        }),
        Cloned::Property(property) => holder.properties.push(property.clone()),
        Cloned::Event(event) => holder.events.push(event.clone()),
        _ => return None,
    }
    declared_members(&holder)
        .into_iter()
        .next()
        .map(|member| ViewMember { origin, ..member })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::Advice;
    use crate::pointcut::{PatternEvaluator, Pointcut};
    use weft_metadata::{FieldDef, Module, TypeSig};

    fn universe() -> ModuleSet {
        let mut advice = Module::new("Aspects");
        let mut audit = TypeDef::new("Aspects", "Audit", 0);
        audit.fields.push(FieldDef::new("count", 0, TypeSig::int32()));
        advice.types.push(audit);
        let mut app = Module::new("App");
        app.types.push(TypeDef::new("App", "Order", 0));
        let mut set = ModuleSet::new();
        set.insert(advice);
        set.insert(app);
        set
    }

    #[test]
    fn test_empty_build() {
        let set = universe();
        let builder = WeaveItemBuilder::new(&set, "Aspects", vec!["App".to_string()]);
        let plan = builder.build(&[], &PatternEvaluator::new()).unwrap();
        assert!(plan.items.is_empty());
        assert!(plan.diagnostics.is_empty());
        assert_eq!(plan.contribution_count(), 0);
    }

    #[test]
    fn test_overlay_carries_live_members() {
        let set = universe();
        let aspects = vec![AspectDefinition::new(
            "Counting",
            Pointcut::Types {
                types: "App.Order".to_string(),
            },
            Advice::TypeMembers {
                source: "Aspects.Audit".to_string(),
                members: Vec::new(),
            },
        )];
        let plan = WeaveItemBuilder::new(&set, "Aspects", vec!["App".to_string()])
            .build(&aspects, &PatternEvaluator::new())
            .unwrap();
        assert!(plan.diagnostics.is_empty());
        let item = plan.items.get(ItemId(0));
        assert!(matches!(
            item.contributions[0].clone,
            Some(Cloned::Field(ref field)) if field.name == "count"
        ));
    }
}
