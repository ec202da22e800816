//! Weaving Tests
//!
//! Runs complete weaves over in-memory modules and checks contributions,
//! diagnostics and what gets written.
//!
//! Run with: cargo test -p weft-weaver --test weaving

mod common;

use common::*;
use weft_metadata::module::flags;
use weft_metadata::{
    CustomAttribute, Instruction, MethodBody, MethodDef, ModuleSet, Opcode, Operand, TypeName, TypeSig,
};
use weft_weaver::item::WeaveItem;
use weft_weaver::wellknown::{is_provenance_marker, is_woven_by, PROTOTYPE_ITEM};
use weft_weaver::{
    Advice, AspectDefinition, DiagnosticId, PatternEvaluator, Pointcut, WeaveItemBuilder, WeavePlan,
};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn inner_types(name: &str) -> AspectDefinition {
    on_order(
        name,
        Advice::Types {
            types: vec!["Aspects.Inner".to_string()],
        },
    )
}

fn inherited(name: &str, source: &str) -> AspectDefinition {
    on_order(
        name,
        Advice::InheritedTypes {
            source: source.to_string(),
            constructor_overrides: Vec::new(),
        },
    )
}

fn on_type(name: &str, types: &str, advice: Advice) -> AspectDefinition {
    AspectDefinition::new(
        name,
        Pointcut::Types {
            types: types.to_string(),
        },
        advice,
    )
}

fn nest_thing(name: &str, types: &str) -> AspectDefinition {
    on_type(
        name,
        types,
        Advice::Types {
            types: vec!["Aspects.Thing".to_string()],
        },
    )
}

/// Advice module extended with:
/// - `Thing {}`
/// - `Helpers { void Helper() { box Thing } }`
/// - `User { [this] void Helper(); void Use() { this.Helper() } }`
/// - `Ordered : App.Order`
fn mapping_universe() -> ModuleSet {
    let mut advice = advice_module();
    advice.types.push(class(ADVICE, "Thing"));

    let mut helpers = class(ADVICE, "Helpers");
    helpers.methods.push(
        MethodDef::new("Helper", 0, TypeSig::void(), Vec::new()).with_body(MethodBody::new(vec![
            Instruction::new(Opcode::Box, Operand::Type(TypeSig::Named(aspects("Thing")))),
            Instruction::simple(Opcode::Pop),
            Instruction::ret(),
        ])),
    );
    advice.types.push(helpers);

    let mut user = class(ADVICE, "User");
    let mut placeholder = void_method("Helper");
    placeholder
        .attributes
        .push(CustomAttribute::with_strings(TypeName::parse("Weft", PROTOTYPE_ITEM), &["this"]));
    let helper_ref = placeholder.to_ref(TypeSig::Named(aspects("User")));
    user.methods.push(placeholder);
    user.methods.push(
        MethodDef::new("Use", 0, TypeSig::void(), Vec::new()).with_body(MethodBody::new(vec![
            Instruction::ldarg(0),
            Instruction::call(helper_ref),
            Instruction::ret(),
        ])),
    );
    advice.types.push(user);

    let mut ordered = class(ADVICE, "Ordered");
    ordered.base = Some(TypeSig::Named(app("Order")));
    advice.types.push(ordered);

    let mut set = ModuleSet::new();
    set.insert(advice);
    set.insert(target_module(false));
    set
}

fn plan(set: &ModuleSet, aspects: &[AspectDefinition]) -> WeavePlan {
    WeaveItemBuilder::new(set, ADVICE, vec![TARGET.to_string()])
        .build(aspects, &PatternEvaluator::new())
        .unwrap()
}

fn item<'p>(plan: &'p WeavePlan, aspect: &str) -> &'p WeaveItem {
    plan.items.iter().find(|item| item.aspect_name == aspect).unwrap()
}

// =============================================================================
// COMMITTED WEAVES
// =============================================================================

mod committed_tests {
    use super::*;

    #[test]
    fn test_type_members_adds_method_once() {
        let (report, store) = run(false, &[on_order("Describing", members("Aspects.Audit"))]);
        assert!(report.is_success(), "{:?}", report.diagnostics);
        assert_eq!(report.contributions, 1);
        assert_eq!(report.written, vec![TARGET.to_string()]);

        let app = &store.written[TARGET];
        let order = app.types.iter().find(|def| def.name == "Order").unwrap();
        assert_eq!(order.methods_named("Describe").count(), 1);
        let markers: Vec<_> = order
            .attributes
            .iter()
            .filter(|attr| is_provenance_marker(attr))
            .collect();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].string_arg(0), Some("Describing"));
        assert_eq!(markers[0].string_arg(1), Some("audit"));
        assert_eq!(markers[0].string_arg(2), Some(TIMESTAMP));
    }

    #[test]
    fn test_woven_module_flagged_and_dependencies_copied() {
        let (report, store) = run(false, &[on_order("Describing", members("Aspects.Audit"))]);
        assert_eq!(report.copied, vec!["Lib".to_string()]);
        assert!(store.copied.contains("Lib"));
        assert_ne!(store.written[TARGET].flags & flags::WOVEN, 0);
        assert!(!store.written.contains_key(ADVICE));
    }

    #[test]
    fn test_nested_type_introduced() {
        let (report, store) = run(false, &[inner_types("Nesting")]);
        assert!(report.is_success(), "{:?}", report.diagnostics);
        let order = store.written[TARGET]
            .types
            .iter()
            .find(|def| def.name == "Order")
            .unwrap();
        assert!(order.nested_type("Inner").is_some());
        assert!(is_woven_by(&order.attributes, "Nesting"));
    }

    #[test]
    fn test_second_run_skips_woven_joinpoint() {
        let mut first = weaver(store(false));
        first
            .weave_aspects(&[on_order("Describing", members("Aspects.Audit"))])
            .unwrap();
        let woven = first.into_store().written.remove(TARGET).unwrap();

        let mut again = store(false);
        again.add(woven);
        let mut second = weaver(again);
        let report = second
            .weave_aspects(&[on_order("Describing", members("Aspects.Audit"))])
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.contributions, 0);
        assert!(report.written.is_empty());
    }
}

// =============================================================================
// NO MATCH
// =============================================================================

mod no_match_tests {
    use super::*;

    #[test]
    fn test_module_without_joinpoints_writes_nothing() {
        let aspect = AspectDefinition::new(
            "Describing",
            Pointcut::Types {
                types: "App.Missing*".to_string(),
            },
            members("Aspects.Audit"),
        );
        let (report, store) = run(false, &[aspect]);
        assert!(report.diagnostics.is_empty());
        assert_eq!(report.contributions, 0);
        assert!(report.written.is_empty());
        assert!(store.written.is_empty());
        assert_eq!(store.clears, 1);
    }
}

// =============================================================================
// REJECTED WEAVES
// =============================================================================

mod rejected_tests {
    use super::*;

    #[test]
    fn test_same_method_twice_flags_both() {
        let (report, store) = run(
            false,
            &[
                on_order("First", members("Aspects.Audit")),
                on_order("Second", members("Aspects.Audit")),
            ],
        );
        assert_eq!(report.diagnostics.count(DiagnosticId::AlreadyApplied), 2);
        assert!(report.written.is_empty());
        assert!(store.written.is_empty());
        assert_eq!(store.clears, 1);
    }

    #[test]
    fn test_same_nested_type_twice_never_written() {
        let (report, store) = run(false, &[inner_types("First"), inner_types("Second")]);
        assert_eq!(report.diagnostics.count(DiagnosticId::AlreadyApplied), 2);
        assert!(store.written.is_empty());
        assert!(store.copied.is_empty());
    }

    #[test]
    fn test_unsatisfied_interface_member() {
        let (report, store) = run(false, &[inherited("Contracting", "Aspects.Contract")]);
        assert_eq!(report.diagnostics.count(DiagnosticId::InterfaceMemberConflict), 1);
        let conflict = report.diagnostics.iter().next().unwrap();
        assert!(conflict.params().iter().any(|param| param == "Bar"));
        assert!(store.written.is_empty());
    }

    #[test]
    fn test_base_type_without_matching_constructor() {
        let (report, store) = run(true, &[inherited("Persistent", "Aspects.Entity")]);
        assert_eq!(
            report.diagnostics.count(DiagnosticId::OverloadedConstructorMismatch),
            1
        );
        assert!(store.written.is_empty());
    }

    #[test]
    fn test_failure_blocks_unrelated_items() {
        let (report, store) = run(
            true,
            &[
                on_order("Describing", members("Aspects.Audit")),
                inherited("Persistent", "Aspects.Entity"),
            ],
        );
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.contributions, 0);
        assert!(store.written.is_empty());
    }

    #[test]
    fn test_member_mapping_consumer_fails_with_provider() {
        let set = mapping_universe();
        let plan = plan(
            &set,
            &[
                on_order("Helping", members("Aspects.Helpers")),
                on_order("Using", members("Aspects.User")),
                nest_thing("NestInOrder", "App.Order"),
                nest_thing("NestInBase", "App.EntityBase"),
            ],
        );
        assert_eq!(plan.diagnostics.count(DiagnosticId::AmbiguousTarget), 1);

        let provider = item(&plan, "Helping");
        let consumer = item(&plan, "Using");
        assert!(provider.errored);
        assert!(consumer.needs.contains(&provider.id));
        assert!(provider.used_by.contains(&consumer.id));
        assert!(consumer.errored);
        assert!(plan.items.live().all(|live| live.id != consumer.id));
    }

    #[test]
    fn test_member_mapping_onto_contributed_member_commits() {
        let set = mapping_universe();
        let plan = plan(
            &set,
            &[
                on_order("Helping", members("Aspects.Helpers")),
                on_order("Using", members("Aspects.User")),
                nest_thing("NestInOrder", "App.Order"),
            ],
        );
        assert!(plan.diagnostics.is_empty(), "{:?}", plan.diagnostics);
        let provider = item(&plan, "Helping");
        let consumer = item(&plan, "Using");
        assert!(consumer.needs.contains(&provider.id));
        assert!(!consumer.errored);
    }

    #[test]
    fn test_woven_hierarchy_loop_writes_nothing() {
        let mut store = store(false);
        store.add(mapping_universe().get(ADVICE).unwrap().clone());
        let mut weaver = weaver(store);
        let report = weaver
            .weave_aspects(&[
                inherited("Persistent", "Aspects.Entity"),
                on_type(
                    "Ordering",
                    "App.EntityBase",
                    Advice::InheritedTypes {
                        source: "Aspects.Ordered".to_string(),
                        constructor_overrides: Vec::new(),
                    },
                ),
            ])
            .unwrap();
        assert!(report.diagnostics.count(DiagnosticId::HierarchyLoop) >= 1);
        assert_eq!(report.contributions, 0);
        assert!(report.written.is_empty());
        let store = weaver.into_store();
        assert!(store.written.is_empty());
        assert!(store.copied.is_empty());
    }
}
