//! Contributions
//!
//! A [`Contribution`] is one thing grafted into a target module. The
//! variant fixes where it attaches and which advice element it copies; the
//! cloned target element is filled in by the builder.

use weft_metadata::{
    CustomAttribute, EventDef, FieldDef, Instruction, InterfaceImpl, JumpPolicy, MethodDef,
    MethodRef, ModuleSet, PropertyDef, TypeDef, TypeName, TypeSig,
};

use crate::aspect::{ArgValue, BaseCtorOverride, ControlFlowPoint, ExecutionTime};
use crate::inline::InlineBlock;
use crate::item::ItemId;
use crate::joinpoint::{member_attributes, member_attributes_mut, MemberId};

/// Element receiving an attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeTarget {
    /// The module itself
    Module(String),
    /// A type
    Type(TypeName),
    /// A member of a type
    Member {
        /// Declaring type
        ty: TypeName,
        /// Member
        member: MemberId,
    },
}

impl AttributeTarget {
    /// Human readable description
    pub fn describe(&self) -> String {
        match self {
            AttributeTarget::Module(module) => format!("[{}]", module),
            AttributeTarget::Type(ty) => ty.to_string(),
            AttributeTarget::Member { ty, member } => format!("{}::{:?}", ty, member),
        }
    }

    /// Attributes currently on the element
    pub fn attributes<'s>(&self, set: &'s ModuleSet) -> Option<&'s [CustomAttribute]> {
        match self {
            AttributeTarget::Module(module) => set.get(module).map(|m| m.attributes.as_slice()),
            AttributeTarget::Type(ty) => set.type_def(ty).map(|def| def.attributes.as_slice()),
            AttributeTarget::Member { ty, member } => member_attributes(set.type_def(ty)?, *member),
        }
    }

    /// Mutable attributes of the element
    pub fn attributes_mut<'s>(&self, set: &'s mut ModuleSet) -> Option<&'s mut Vec<CustomAttribute>> {
        match self {
            AttributeTarget::Module(module) => set.get_mut(module).map(|m| &mut m.attributes),
            AttributeTarget::Type(ty) => set.type_def_mut(ty).map(|def| &mut def.attributes),
            AttributeTarget::Member { ty, member } => {
                member_attributes_mut(set.type_def_mut(ty)?, *member)
            }
        }
    }
}

/// What a contribution adds and where
#[derive(Debug, Clone, PartialEq)]
pub enum ContributionKind {
    /// Top-level type added to a module
    NewAssemblyType {
        /// Advice type
        source: TypeName,
        /// Name in the target module
        target: TypeName,
    },
    /// Type nested in a join point type
    NewNestedType {
        /// Advice type
        source: TypeName,
        /// Name in the target module
        target: TypeName,
    },
    /// Field added to a type
    NewField {
        /// Advice type
        source: TypeName,
        /// Field index in the advice type
        index: usize,
        /// Receiving type
        target: TypeName,
    },
    /// Property added to a type
    NewProperty {
        /// Advice type
        source: TypeName,
        /// Property index in the advice type
        index: usize,
        /// Receiving type
        target: TypeName,
    },
    /// Method added to a type
    NewMethod {
        /// Advice type
        source: TypeName,
        /// Method index in the advice type
        index: usize,
        /// Receiving type
        target: TypeName,
    },
    /// Constructor added to a type
    NewConstructor {
        /// Advice type
        source: TypeName,
        /// Method index in the advice type
        index: usize,
        /// Receiving type
        target: TypeName,
    },
    /// Operator added to a type
    NewOperator {
        /// Advice type
        source: TypeName,
        /// Method index in the advice type
        index: usize,
        /// Receiving type
        target: TypeName,
    },
    /// Event added to a type
    NewEvent {
        /// Advice type
        source: TypeName,
        /// Event index in the advice type
        index: usize,
        /// Receiving type
        target: TypeName,
    },
    /// Base type set on a type
    NewBaseType {
        /// Advice-side base type
        source: TypeSig,
        /// Receiving type
        target: TypeName,
        /// Explicit base constructor selections
        overrides: Vec<BaseCtorOverride>,
    },
    /// Interface added to a type
    NewInterface {
        /// Advice-side interface
        source: TypeSig,
        /// Receiving type
        target: TypeName,
    },
    /// Literal added to an enumeration
    NewEnumLiteral {
        /// Advice enumeration
        source: TypeName,
        /// Field index in the advice enumeration
        index: usize,
        /// Receiving enumeration
        target: TypeName,
    },
    /// Custom attribute attached to an element
    NewAttribute {
        /// Advice-side attribute
        source: CustomAttribute,
        /// Receiving element
        target: AttributeTarget,
    },
    /// Advice method inlined into a method body
    NewCode {
        /// Advice type
        source: TypeName,
        /// Advice method index
        index: usize,
        /// Type declaring the receiving method
        target: TypeName,
        /// Receiving method index
        method: usize,
        /// Before or after
        time: ExecutionTime,
        /// Body or call site
        point: ControlFlowPoint,
        /// Call instruction, for call sites
        offset: Option<usize>,
    },
    /// Advice method replacing a produced value
    NewChangeValue {
        /// Advice type
        source: TypeName,
        /// Advice method index
        index: usize,
        /// Type declaring the receiving method
        target: TypeName,
        /// Receiving method index
        method: usize,
        /// Value-producing instruction
        offset: usize,
    },
    /// Field initialization code run by every constructor of a type
    NewFieldInitializer {
        /// Advice type
        source: TypeName,
        /// Advice default constructor index
        ctor: usize,
        /// Number of leading instructions forming the initializers
        length: usize,
        /// Receiving type
        target: TypeName,
    },
}

impl ContributionKind {
    /// Type receiving the contribution (the new type itself for type
    /// introductions)
    pub fn target_type(&self) -> Option<&TypeName> {
        match self {
            ContributionKind::NewAssemblyType { target, .. }
            | ContributionKind::NewNestedType { target, .. }
            | ContributionKind::NewField { target, .. }
            | ContributionKind::NewProperty { target, .. }
            | ContributionKind::NewMethod { target, .. }
            | ContributionKind::NewConstructor { target, .. }
            | ContributionKind::NewOperator { target, .. }
            | ContributionKind::NewEvent { target, .. }
            | ContributionKind::NewBaseType { target, .. }
            | ContributionKind::NewInterface { target, .. }
            | ContributionKind::NewEnumLiteral { target, .. }
            | ContributionKind::NewCode { target, .. }
            | ContributionKind::NewChangeValue { target, .. }
            | ContributionKind::NewFieldInitializer { target, .. } => Some(target),
            ContributionKind::NewAttribute { target, .. } => match target {
                AttributeTarget::Module(_) => None,
                AttributeTarget::Type(ty) | AttributeTarget::Member { ty, .. } => Some(ty),
            },
        }
    }

    /// Whether this adds a member to an existing type
    pub fn is_member(&self) -> bool {
        matches!(
            self,
            ContributionKind::NewField { .. }
                | ContributionKind::NewProperty { .. }
                | ContributionKind::NewMethod { .. }
                | ContributionKind::NewConstructor { .. }
                | ContributionKind::NewOperator { .. }
                | ContributionKind::NewEvent { .. }
                | ContributionKind::NewEnumLiteral { .. }
        )
    }

    /// Whether this introduces a type
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            ContributionKind::NewAssemblyType { .. } | ContributionKind::NewNestedType { .. }
        )
    }

    /// Whether this edits existing method bodies
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            ContributionKind::NewCode { .. }
                | ContributionKind::NewChangeValue { .. }
                | ContributionKind::NewFieldInitializer { .. }
        )
    }
}

/// Target element cloned from the advice
#[derive(Debug, Clone, PartialEq)]
pub enum Cloned {
    /// Introduced type, nested types included
    Type(TypeDef),
    /// Field or enum literal
    Field(FieldDef),
    /// Method, constructor or operator
    Method(MethodDef),
    /// Property
    Property(PropertyDef),
    /// Event
    Event(EventDef),
    /// Base type
    Base(TypeSig),
    /// Interface implementation
    Interface(InterfaceImpl),
    /// Attribute
    Attribute(CustomAttribute),
    /// Inlinable code block
    Block(InlineBlock),
}

/// A contribution and its clone
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    /// What is contributed
    pub kind: ContributionKind,
    /// Cloned target element, once built
    pub clone: Option<Cloned>,
}

impl Contribution {
    /// Contribution not cloned yet
    pub fn new(kind: ContributionKind) -> Self {
        Self { kind, clone: None }
    }

    /// Cloned member definition, as a method
    pub fn cloned_method(&self) -> Option<&MethodDef> {
        match &self.clone {
            Some(Cloned::Method(method)) => Some(method),
            _ => None,
        }
    }

    /// Mutable cloned method
    pub fn cloned_method_mut(&mut self) -> Option<&mut MethodDef> {
        match &mut self.clone {
            Some(Cloned::Method(method)) => Some(method),
            _ => None,
        }
    }
}

/// Base constructor chosen for one constructor of a type receiving a new
/// base type
#[derive(Debug, Clone, PartialEq)]
pub struct CtorPlan {
    /// Constructor index in the receiving type
    pub ctor: usize,
    /// Base constructor to chain to
    pub base_ctor: MethodRef,
    /// Arguments; forwarded constructor parameters when no override applies
    pub args: Vec<ArgValue>,
}

/// An existing method of a target module
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    /// Declaring type
    pub ty: TypeName,
    /// Method index
    pub method: usize,
}

/// Position of an insertion among insertions at the same index
///
/// Blocks that trail the previous instruction order before blocks that
/// lead the next one; then control-flow point, execution time and aspect
/// declaration order apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderKey {
    /// 0 when trailing the previous instruction, 1 when leading the next
    pub slot: u8,
    /// Body before call site
    pub point: u8,
    /// Before before after
    pub time: u8,
    /// Aspect declaration order
    pub aspect: usize,
    /// Tie breaker
    pub item: ItemId,
}

/// Edit of an existing method body, by physical instruction index of the
/// original body
#[derive(Debug, Clone, PartialEq)]
pub enum BodyEdit {
    /// Splice a block before the instruction at `at`
    Insert {
        /// Edited method
        method: MethodKey,
        /// Original instruction index
        at: usize,
        /// How existing jumps to `at` react
        policy: JumpPolicy,
        /// Block to splice
        block: InlineBlock,
        /// Order among blocks at the same index
        key: OrderKey,
    },
    /// Replace the instruction at `at` in place
    Replace {
        /// Edited method
        method: MethodKey,
        /// Original instruction index
        at: usize,
        /// Replacement
        instruction: Instruction,
    },
}

impl BodyEdit {
    /// Edited method
    pub fn method(&self) -> &MethodKey {
        match self {
            BodyEdit::Insert { method, .. } | BodyEdit::Replace { method, .. } => method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_type_of_attributes() {
        let ty = TypeName::new("App", "App", "Order");
        let attr = CustomAttribute::with_strings(TypeName::new("Lib", "Lib", "Tag"), &[]);
        let on_module = ContributionKind::NewAttribute {
            source: attr.clone(),
            target: AttributeTarget::Module("App".to_string()),
        };
        let on_member = ContributionKind::NewAttribute {
            source: attr,
            target: AttributeTarget::Member {
                ty: ty.clone(),
                member: MemberId::Method(0),
            },
        };
        assert_eq!(on_module.target_type(), None);
        assert_eq!(on_member.target_type(), Some(&ty));
    }

    #[test]
    fn test_order_key_puts_trailing_blocks_first() {
        let trailing = OrderKey {
            slot: 0,
            point: 1,
            time: 1,
            aspect: 5,
            item: ItemId(9),
        };
        let leading = OrderKey {
            slot: 1,
            point: 0,
            time: 0,
            aspect: 0,
            item: ItemId(0),
        };
        assert!(trailing < leading);
    }

    #[test]
    fn test_categories() {
        let ty = TypeName::new("App", "App", "Order");
        let field = ContributionKind::NewField {
            source: ty.clone(),
            index: 0,
            target: ty.clone(),
        };
        let nested = ContributionKind::NewNestedType {
            source: ty.clone(),
            target: ty.nested("Inner"),
        };
        assert!(field.is_member() && !field.is_type());
        assert!(nested.is_type() && !nested.is_code());
    }
}
