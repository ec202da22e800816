//! Weft aspect weaver
//!
//! This crate weaves aspects defined in an advice module into target
//! modules:
//! - **Aspects**: aspect definitions and pointcuts (`aspect`, `pointcut`)
//! - **Planning**: weave items, placeholder binding, reference resolution
//!   and validation (`builder`, `item`, `mapping`, `resolve`)
//! - **Cloning**: advice elements rewritten for their target (`cloning`,
//!   `inline`, `generics`)
//! - **Driver**: module loading, application and persistence (`weaver`,
//!   `store`, `config`)
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_weaver::{Weaver, WeaverConfig};
//!
//! let config = WeaverConfig::from_file(Path::new("weft.toml"))?;
//! let report = Weaver::open(config).weave()?;
//! for diagnostic in report.diagnostics.iter() {
//!     eprintln!("{}: {}", diagnostic.code(), diagnostic);
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Aspects
// ============================================================================

/// Aspect definitions
pub mod aspect;

/// Join points and their enumeration
pub mod joinpoint;

/// Pointcuts and their evaluation
pub mod pointcut;

/// Well-known marker attributes
pub mod wellknown;

// ============================================================================
// Planning
// ============================================================================

/// Weave plan construction
pub mod builder;

/// Contributions and body edits
pub mod contribution;

/// Weave items and their dependency graph
pub mod item;

/// Placeholder types and members
pub mod mapping;

/// Reference resolution
pub mod resolve;

/// Shared compiler-generated types
pub mod auxiliary;

/// Target types as they will look after weaving
pub mod view;

/// Member flattening over type hierarchies
pub mod flatten;

/// Type compatibility
pub mod compat;

// ============================================================================
// Cloning
// ============================================================================

/// Element cloning
pub mod cloning;

/// Generic substitution
pub mod generics;

/// Code block inlining
pub mod inline;

// ============================================================================
// Driver
// ============================================================================

/// Weaver configuration
pub mod config;

/// Diagnostics and errors
pub mod error;

/// Provenance markers
pub mod provenance;

/// Module persistence
pub mod store;

/// Weaving runs
pub mod weaver;

pub use aspect::{
    parse_aspects, Advice, AdviceMethod, ArgValue, AspectDefinition, AspectKind, BaseCtorOverride,
    ControlFlowPoint, ExecutionTime,
};
pub use builder::{WeaveItemBuilder, WeavePlan};
pub use config::{ConfigError, ReferenceEntry, WeaverConfig};
pub use error::{DiagnosticId, Diagnostics, Fault, WeaveError, WeaverError};
pub use joinpoint::{Joinpoint, JoinpointContainer, MemberId};
pub use pointcut::{PatternEvaluator, Pointcut, PointcutEvaluator};
pub use provenance::Provenance;
pub use store::{DirectoryStore, MemoryStore, ModuleStore};
pub use weaver::{weave_config, WeaveReport, Weaver};
