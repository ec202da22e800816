//! Shared module builders for the weaver integration tests

#![allow(dead_code)]

use weft_metadata::{
    member_flags, type_flags, Instruction, MethodBody, MethodDef, Module, ModuleRef, ModuleSet,
    ParamDef, TypeDef, TypeName, TypeSig, CONSTRUCTOR_NAME,
};
use weft_weaver::{
    Advice, AspectDefinition, MemoryStore, Pointcut, WeaveReport, Weaver, WeaverConfig,
};

pub const ADVICE: &str = "Aspects";
pub const TARGET: &str = "App";
pub const TIMESTAMP: &str = "2024-01-01T00:00:00Z";

pub fn app(simple: &str) -> TypeName {
    TypeName::new(TARGET, TARGET, simple)
}

pub fn aspects(simple: &str) -> TypeName {
    TypeName::new(ADVICE, ADVICE, simple)
}

/// `this` then a call to the parameterless constructor of `base`
pub fn chained_body(base: TypeSig) -> MethodBody {
    let base_ctor = MethodDef::new(CONSTRUCTOR_NAME, 0, TypeSig::void(), Vec::new()).to_ref(base);
    MethodBody::new(vec![Instruction::ldarg(0), Instruction::call(base_ctor), Instruction::ret()])
}

pub fn constructor(params: Vec<ParamDef>, base: TypeSig) -> MethodDef {
    MethodDef::new(CONSTRUCTOR_NAME, member_flags::RT_SPECIAL_NAME, TypeSig::void(), params)
        .with_body(chained_body(base))
}

pub fn void_method(name: &str) -> MethodDef {
    MethodDef::new(name, member_flags::PUBLIC, TypeSig::void(), Vec::new())
        .with_body(MethodBody::new(vec![Instruction::ret()]))
}

pub fn abstract_method(name: &str) -> MethodDef {
    MethodDef::new(
        name,
        member_flags::PUBLIC | member_flags::ABSTRACT | member_flags::VIRTUAL,
        TypeSig::void(),
        Vec::new(),
    )
}

pub fn class(scope: &str, simple: &str) -> TypeDef {
    let mut def = TypeDef::new(scope, simple, type_flags::PUBLIC);
    def.base = Some(TypeSig::object());
    def
}

/// Advice module:
/// - `Audit { void Describe() }`
/// - `Inner {}`
/// - `Contract : App.IFoo`
/// - `Entity : App.EntityBase`
pub fn advice_module() -> Module {
    let mut module = Module::new(ADVICE);
    module.references.push(ModuleRef::new(TARGET));

    let mut audit = class(ADVICE, "Audit");
    audit.methods.push(void_method("Describe"));
    module.types.push(audit);

    module.types.push(class(ADVICE, "Inner"));

    let mut contract = class(ADVICE, "Contract");
    contract
        .interfaces
        .push(weft_metadata::InterfaceImpl::new(TypeSig::Named(app("IFoo"))));
    module.types.push(contract);

    let mut entity = class(ADVICE, "Entity");
    entity.base = Some(TypeSig::Named(app("EntityBase")));
    module.types.push(entity);
    module
}

/// Target module:
/// - `IFoo { void Bar() }`
/// - `EntityBase { .ctor() }`
/// - `Order { .ctor(); .ctor(int) }` when `int_ctor`, else `Order { .ctor() }`
pub fn target_module(int_ctor: bool) -> Module {
    let mut module = Module::new(TARGET);
    module.references.push(ModuleRef::new("Lib"));

    let mut foo = TypeDef::new(TARGET, "IFoo", type_flags::PUBLIC | type_flags::INTERFACE | type_flags::ABSTRACT);
    foo.methods.push(abstract_method("Bar"));
    module.types.push(foo);

    let mut entity_base = class(TARGET, "EntityBase");
    entity_base
        .methods
        .push(constructor(Vec::new(), TypeSig::object()));
    module.types.push(entity_base);

    let mut order = class(TARGET, "Order");
    let params = if int_ctor {
        vec![ParamDef::new("quantity", TypeSig::int32())]
    } else {
        Vec::new()
    };
    order.methods.push(constructor(params, TypeSig::object()));
    module.types.push(order);
    module
}

pub fn store(int_ctor: bool) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.add(advice_module());
    store.add(target_module(int_ctor));
    store.add(Module::new("Lib"));
    store
}

pub fn universe(int_ctor: bool) -> ModuleSet {
    let mut set = ModuleSet::new();
    set.insert(advice_module());
    set.insert(target_module(int_ctor));
    set
}

pub fn on_order(name: &str, advice: Advice) -> AspectDefinition {
    AspectDefinition::new(
        name,
        Pointcut::Types {
            types: "App.Order".to_string(),
        },
        advice,
    )
}

pub fn members(source: &str) -> Advice {
    Advice::TypeMembers {
        source: source.to_string(),
        members: Vec::new(),
    }
}

pub fn weaver(store: MemoryStore) -> Weaver<MemoryStore> {
    let config = WeaverConfig::new("audit", ADVICE, vec![TARGET.to_string()]);
    Weaver::new(config, store).with_timestamp(TIMESTAMP)
}

/// Weave `aspects` over the standard fixture
pub fn run(int_ctor: bool, aspects: &[AspectDefinition]) -> (WeaveReport, MemoryStore) {
    let mut weaver = weaver(store(int_ctor));
    let report = weaver.weave_aspects(aspects).unwrap();
    (report, weaver.into_store())
}
