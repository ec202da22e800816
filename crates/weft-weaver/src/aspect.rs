//! Aspect definitions
//!
//! An aspect pairs a pointcut with the advice it contributes at every join
//! point the pointcut matches. Definitions are plain data so they can be
//! produced by any front end; the CLI reads them from JSON.

use serde::{Deserialize, Serialize};
use weft_metadata::TypeSig;

use crate::pointcut::Pointcut;

/// Closed set of aspect kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AspectKind {
    /// Inject code into method bodies or around call sites
    Code,
    /// Replace a value produced by an instruction
    ChangeValue,
    /// Add members to a type
    TypeMembers,
    /// Add new types to a module or as nested types
    Types,
    /// Add literals to an enumeration
    EnumMembers,
    /// Add custom attributes
    Attributes,
    /// Add members to an interface
    InterfaceMembers,
    /// Add a base type and interfaces
    InheritedTypes,
}

/// When injected code runs relative to its anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExecutionTime {
    /// Before the body or call
    Before,
    /// After the body or call
    After,
}

/// Where injected code is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ControlFlowPoint {
    /// Method entry and exits
    Body,
    /// A call instruction
    Call,
}

/// An advice method: type full name (`Ns.Outer/Inner`) in the advice module
/// plus method name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdviceMethod {
    /// Declaring advice type
    #[serde(rename = "type")]
    pub ty: String,
    /// Method name
    pub method: String,
}

/// Value passed to a base constructor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    /// Parameter of the target constructor (0-based, `this` excluded)
    Param(u16),
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// String literal
    String(String),
    /// Boolean literal
    Bool(bool),
    /// Null
    Null,
}

/// Explicit base constructor selection for a new base type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseCtorOverride {
    /// Target constructor parameter types; `None` applies to every
    /// constructor without a more specific override
    #[serde(default)]
    pub target_ctor_params: Option<Vec<TypeSig>>,
    /// Parameter types of the base constructor to call
    pub base_ctor_params: Vec<TypeSig>,
    /// Argument values, one per base constructor parameter
    pub args: Vec<ArgValue>,
}

/// The advice an aspect contributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Advice {
    /// Inline an advice method
    Code {
        /// Advice method
        method: AdviceMethod,
        /// Before or after
        time: ExecutionTime,
        /// Body or call site
        point: ControlFlowPoint,
    },
    /// Replace a produced value with the result of an advice method
    ChangeValue {
        /// Advice method `(T) -> T`
        method: AdviceMethod,
    },
    /// Copy the members of an advice type onto the join point type
    TypeMembers {
        /// Advice type full name
        source: String,
        /// Member names to copy; empty copies every member
        #[serde(default)]
        members: Vec<String>,
    },
    /// Copy member declarations of an advice interface onto the join point
    /// interface
    InterfaceMembers {
        /// Advice interface full name
        source: String,
        /// Member names to copy; empty copies every member
        #[serde(default)]
        members: Vec<String>,
    },
    /// Introduce advice types
    Types {
        /// Advice type full names
        types: Vec<String>,
    },
    /// Copy the literals of an advice enumeration
    EnumMembers {
        /// Advice enumeration full name
        source: String,
    },
    /// Copy custom attributes
    Attributes {
        /// Advice type carrying the attributes
        owner: String,
        /// Member of `owner` carrying the attributes, if not the type itself
        #[serde(default)]
        member: Option<String>,
    },
    /// Add the base type and interfaces of an advice type
    InheritedTypes {
        /// Advice type full name
        source: String,
        /// Explicit base constructor selections
        #[serde(default)]
        constructor_overrides: Vec<BaseCtorOverride>,
    },
}

impl Advice {
    /// Aspect kind this advice belongs to
    pub fn kind(&self) -> AspectKind {
        match self {
            Advice::Code { .. } => AspectKind::Code,
            Advice::ChangeValue { .. } => AspectKind::ChangeValue,
            Advice::TypeMembers { .. } => AspectKind::TypeMembers,
            Advice::InterfaceMembers { .. } => AspectKind::InterfaceMembers,
            Advice::Types { .. } => AspectKind::Types,
            Advice::EnumMembers { .. } => AspectKind::EnumMembers,
            Advice::Attributes { .. } => AspectKind::Attributes,
            Advice::InheritedTypes { .. } => AspectKind::InheritedTypes,
        }
    }

    /// Full name of the advice type this advice is declared on
    pub fn source_type(&self) -> Option<&str> {
        match self {
            Advice::Code { method, .. } | Advice::ChangeValue { method } => Some(&method.ty),
            Advice::TypeMembers { source, .. }
            | Advice::InterfaceMembers { source, .. }
            | Advice::EnumMembers { source }
            | Advice::InheritedTypes { source, .. } => Some(source),
            Advice::Attributes { owner, .. } => Some(owner),
            Advice::Types { .. } => None,
        }
    }
}

/// A named aspect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectDefinition {
    /// Aspect name, recorded in provenance markers
    pub name: String,
    /// Where the advice applies
    pub pointcut: Pointcut,
    /// What is contributed
    pub advice: Advice,
}

impl AspectDefinition {
    /// Create a definition
    pub fn new(name: impl Into<String>, pointcut: Pointcut, advice: Advice) -> Self {
        Self {
            name: name.into(),
            pointcut,
            advice,
        }
    }

    /// Kind of the aspect
    pub fn kind(&self) -> AspectKind {
        self.advice.kind()
    }
}

/// Parse a JSON list of aspect definitions
pub fn parse_aspects(json: &str) -> Result<Vec<AspectDefinition>, serde_json::Error> {
    serde_json::from_str(json)
}
