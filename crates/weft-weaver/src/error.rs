//! Weaving errors
//!
//! User-facing problems are collected as [`WeaveError`] diagnostics and
//! returned once at the end of a run. States the item model claims are
//! unreachable surface as [`Fault`]s, which abort the run.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use weft_metadata::ModuleError;

use crate::config::ConfigError;

/// Diagnostic identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticId {
    /// More than one candidate target (W0001)
    AmbiguousTarget,
    /// No candidate target (W0002)
    MissingTarget,
    /// Contribution applied more than once (W0003)
    AlreadyApplied,
    /// Member conflicts with another member of a type (W0004)
    TypeMemberConflict,
    /// Interface member missing or conflicting (W0005)
    InterfaceMemberConflict,
    /// Cyclic inheritance (W0006)
    HierarchyLoop,
    /// Modifiers of advice and target do not fit (W0007)
    ModifierIncompatible,
    /// Advice return type does not fit (W0008)
    ReturnTypeMismatch,
    /// Advice parameter does not fit (W0009)
    ParameterMismatch,
    /// No base constructor fits a target constructor (W0010)
    OverloadedConstructorMismatch,
    /// Placeholder type incompatible with its target (W0011)
    StructuralMismatch,
}

impl DiagnosticId {
    /// Get the diagnostic code string (e.g., "W0001")
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticId::AmbiguousTarget => "W0001",
            DiagnosticId::MissingTarget => "W0002",
            DiagnosticId::AlreadyApplied => "W0003",
            DiagnosticId::TypeMemberConflict => "W0004",
            DiagnosticId::InterfaceMemberConflict => "W0005",
            DiagnosticId::HierarchyLoop => "W0006",
            DiagnosticId::ModifierIncompatible => "W0007",
            DiagnosticId::ReturnTypeMismatch => "W0008",
            DiagnosticId::ParameterMismatch => "W0009",
            DiagnosticId::OverloadedConstructorMismatch => "W0010",
            DiagnosticId::StructuralMismatch => "W0011",
        }
    }
}

impl fmt::Display for DiagnosticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User diagnostics produced while weaving
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WeaveError {
    /// A reference matches several targets
    #[error("Ambiguous target for '{reference}': {}", candidates.join(", "))]
    AmbiguousTarget {
        /// The reference being resolved
        reference: String,
        /// Matching candidates
        candidates: Vec<String>,
    },

    /// A reference matches no target
    #[error("No target for '{reference}' in {scope}")]
    MissingTarget {
        /// The reference being resolved
        reference: String,
        /// Where the target was searched
        scope: String,
    },

    /// The same contribution targets the same element more than once
    #[error("'{advice}' is applied more than once to '{target}'")]
    AlreadyApplied {
        /// Advice element
        advice: String,
        /// Target element
        target: String,
    },

    /// A member collides with another member of the flattened type
    #[error("Member '{member}' conflicts with '{other}' on type '{ty}'")]
    TypeMemberConflict {
        /// Type being flattened
        ty: String,
        /// Contributed member
        member: String,
        /// Conflicting member
        other: String,
    },

    /// An interface member is unsatisfied or collides
    #[error("Interface member '{member}' of '{interface}' is not satisfied on type '{ty}'")]
    InterfaceMemberConflict {
        /// Implementing type
        ty: String,
        /// Interface
        interface: String,
        /// Interface member
        member: String,
    },

    /// Inheritance cycle
    #[error("Inheritance cycle through '{ty}': {}", path.join(" -> "))]
    HierarchyLoop {
        /// Type where the cycle closes
        ty: String,
        /// Types on the cycle, in traversal order
        path: Vec<String>,
    },

    /// Advice and target modifiers do not fit
    #[error("'{element}' is incompatible: {reason}")]
    ModifierIncompatible {
        /// Offending element
        element: String,
        /// What does not fit
        reason: String,
    },

    /// Advice returns the wrong type
    #[error("Advice '{advice}' returns {found}, expected {expected}")]
    ReturnTypeMismatch {
        /// Advice method
        advice: String,
        /// Required return type
        expected: String,
        /// Declared return type
        found: String,
    },

    /// Advice parameter does not match the target
    #[error("Parameter {index} of advice '{advice}' is {found}, expected {expected} from '{target}'")]
    ParameterMismatch {
        /// Advice method
        advice: String,
        /// Target method
        target: String,
        /// Parameter position
        index: usize,
        /// Required type
        expected: String,
        /// Declared type
        found: String,
    },

    /// No base constructor fits a target constructor
    #[error("No constructor of '{base}' fits constructor '{constructor}' of '{ty}'")]
    OverloadedConstructorMismatch {
        /// Target type
        ty: String,
        /// New base type
        base: String,
        /// Target constructor signature
        constructor: String,
    },

    /// Placeholder type incompatible with its resolved target
    #[error("Placeholder '{prototype}' does not match '{target}': member '{member}'")]
    StructuralMismatch {
        /// Placeholder type
        prototype: String,
        /// Resolved target type
        target: String,
        /// First incompatible member
        member: String,
    },
}

impl WeaveError {
    /// Identifier of this diagnostic
    pub fn id(&self) -> DiagnosticId {
        match self {
            WeaveError::AmbiguousTarget { .. } => DiagnosticId::AmbiguousTarget,
            WeaveError::MissingTarget { .. } => DiagnosticId::MissingTarget,
            WeaveError::AlreadyApplied { .. } => DiagnosticId::AlreadyApplied,
            WeaveError::TypeMemberConflict { .. } => DiagnosticId::TypeMemberConflict,
            WeaveError::InterfaceMemberConflict { .. } => DiagnosticId::InterfaceMemberConflict,
            WeaveError::HierarchyLoop { .. } => DiagnosticId::HierarchyLoop,
            WeaveError::ModifierIncompatible { .. } => DiagnosticId::ModifierIncompatible,
            WeaveError::ReturnTypeMismatch { .. } => DiagnosticId::ReturnTypeMismatch,
            WeaveError::ParameterMismatch { .. } => DiagnosticId::ParameterMismatch,
            WeaveError::OverloadedConstructorMismatch { .. } => {
                DiagnosticId::OverloadedConstructorMismatch
            }
            WeaveError::StructuralMismatch { .. } => DiagnosticId::StructuralMismatch,
        }
    }

    /// Stable code (e.g., "W0004")
    pub fn code(&self) -> &'static str {
        self.id().as_str()
    }

    /// Ordered diagnostic parameters
    pub fn params(&self) -> Vec<String> {
        match self {
            WeaveError::AmbiguousTarget {
                reference,
                candidates,
            } => {
                let mut params = vec![reference.clone()];
                params.extend(candidates.iter().cloned());
                params
            }
            WeaveError::MissingTarget { reference, scope } => vec![reference.clone(), scope.clone()],
            WeaveError::AlreadyApplied { advice, target } => vec![advice.clone(), target.clone()],
            WeaveError::TypeMemberConflict { ty, member, other } => {
                vec![ty.clone(), member.clone(), other.clone()]
            }
            WeaveError::InterfaceMemberConflict {
                ty,
                interface,
                member,
            } => vec![ty.clone(), interface.clone(), member.clone()],
            WeaveError::HierarchyLoop { ty, path } => {
                let mut params = vec![ty.clone()];
                params.extend(path.iter().cloned());
                params
            }
            WeaveError::ModifierIncompatible { element, reason } => {
                vec![element.clone(), reason.clone()]
            }
            WeaveError::ReturnTypeMismatch {
                advice,
                expected,
                found,
            } => vec![advice.clone(), expected.clone(), found.clone()],
            WeaveError::ParameterMismatch {
                advice,
                target,
                index,
                expected,
                found,
            } => vec![
                advice.clone(),
                target.clone(),
                index.to_string(),
                expected.clone(),
                found.clone(),
            ],
            WeaveError::OverloadedConstructorMismatch {
                ty,
                base,
                constructor,
            } => vec![ty.clone(), base.clone(), constructor.clone()],
            WeaveError::StructuralMismatch {
                prototype,
                target,
                member,
            } => vec![prototype.clone(), target.clone(), member.clone()],
        }
    }
}

/// Ordered, append-only collection of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    errors: Vec<WeaveError>,
}

impl Diagnostics {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic
    pub fn push(&mut self, error: WeaveError) {
        self.errors.push(error);
    }

    /// Number of diagnostics
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether no diagnostic was reported
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Diagnostics in report order
    pub fn iter(&self) -> impl Iterator<Item = &WeaveError> {
        self.errors.iter()
    }

    /// Number of diagnostics with the given id
    pub fn count(&self, id: DiagnosticId) -> usize {
        self.errors.iter().filter(|error| error.id() == id).count()
    }

    /// Consume into the underlying list
    pub fn into_vec(self) -> Vec<WeaveError> {
        self.errors
    }
}

/// Internal faults: states the weave item model treats as unreachable
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Fault {
    /// Re-deriving a nested type name found several candidates
    #[error("Ambiguous nested type re-derivation for '{reference}': {}", candidates.join(", "))]
    AmbiguousNestedType {
        /// The nested reference
        reference: String,
        /// Candidates found on the target
        candidates: Vec<String>,
    },

    /// Method-owned generic parameter resolved outside a method pairing
    #[error("Method generic parameter !!{position} in '{context}' has no source/target method pairing")]
    UnpairedMethodGeneric {
        /// Parameter position
        position: u16,
        /// Element being resolved
        context: String,
    },

    /// A live item has a placeholder member mapping without target
    #[error("Placeholder member '{member}' has no target on live item {item}")]
    UnresolvedMapping {
        /// Item index
        item: u32,
        /// Placeholder member
        member: String,
    },

    /// An advice element a contribution points to no longer exists
    #[error("Advice element '{element}' disappeared during weaving")]
    MissingAdvice {
        /// Advice element
        element: String,
    },
}

/// Errors returned by the weaver facade
#[derive(Debug, Error)]
pub enum WeaverError {
    /// I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Module not found in any input directory
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// Module decode error
    #[error("Invalid module {path}: {source}")]
    Module {
        /// Module file
        path: PathBuf,
        /// Decode error
        #[source]
        source: ModuleError,
    },

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Aspect definition file error
    #[error("Invalid aspect definitions: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal fault
    #[error("Internal fault: {0}")]
    Fault(#[from] Fault),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let ids = [
            DiagnosticId::AmbiguousTarget,
            DiagnosticId::MissingTarget,
            DiagnosticId::AlreadyApplied,
            DiagnosticId::TypeMemberConflict,
            DiagnosticId::InterfaceMemberConflict,
            DiagnosticId::HierarchyLoop,
            DiagnosticId::ModifierIncompatible,
            DiagnosticId::ReturnTypeMismatch,
            DiagnosticId::ParameterMismatch,
            DiagnosticId::OverloadedConstructorMismatch,
            DiagnosticId::StructuralMismatch,
        ];
        let codes: std::collections::BTreeSet<_> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(codes.len(), ids.len());
    }

    #[test]
    fn test_params_are_ordered() {
        let error = WeaveError::ParameterMismatch {
            advice: "A::Log".to_string(),
            target: "T::Run".to_string(),
            index: 1,
            expected: "System.Int32".to_string(),
            found: "System.String".to_string(),
        };
        assert_eq!(error.code(), "W0009");
        assert_eq!(error.params()[2], "1");
        assert_eq!(error.params().len(), 5);
    }

    #[test]
    fn test_display_joins_candidates() {
        let error = WeaveError::AmbiguousTarget {
            reference: "P".to_string(),
            candidates: vec!["[A]N.P".to_string(), "[B]N.P".to_string()],
        };
        assert_eq!(error.to_string(), "Ambiguous target for 'P': [A]N.P, [B]N.P");
    }

    #[test]
    fn test_diagnostics_keep_order() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(WeaveError::MissingTarget {
            reference: "a".to_string(),
            scope: "s".to_string(),
        });
        diagnostics.push(WeaveError::AlreadyApplied {
            advice: "b".to_string(),
            target: "t".to_string(),
        });
        let ids: Vec<_> = diagnostics.iter().map(WeaveError::id).collect();
        assert_eq!(ids, vec![DiagnosticId::MissingTarget, DiagnosticId::AlreadyApplied]);
        assert_eq!(diagnostics.count(DiagnosticId::AlreadyApplied), 1);
    }
}
