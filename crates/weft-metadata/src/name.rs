//! Type names
//!
//! A [`TypeName`] identifies a type definition across the module universe:
//! the defining module (`scope`), the namespace, and the nesting path from the
//! outermost declaring type down to the type itself.

use crate::encoder::{Decode, DecodeError, Encode, MetadataReader, MetadataWriter};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope of the system module. References into it are never persisted as
/// module dependencies.
pub const SYSTEM_SCOPE: &str = "core";

/// Namespace of the system types
pub const SYSTEM_NAMESPACE: &str = "System";

/// Fully qualified name of a type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeName {
    /// Name of the module defining the type
    pub scope: String,
    /// Namespace (empty for the global namespace)
    pub namespace: String,
    /// Nesting path, outermost type first
    pub path: Vec<String>,
}

impl TypeName {
    /// Create a top-level type name
    pub fn new(
        scope: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            namespace: namespace.into(),
            path: vec![name.into()],
        }
    }

    /// Name of a type in the system module
    pub fn system(name: &str) -> Self {
        Self::new(SYSTEM_SCOPE, SYSTEM_NAMESPACE, name)
    }

    /// Parse `Ns.Outer/Inner` inside the given scope
    pub fn parse(scope: impl Into<String>, full_name: &str) -> Self {
        let mut segments = full_name.split('/');
        let head = segments.next().unwrap_or_default();
        let (namespace, outer) = match head.rfind('.') {
            Some(dot) => (&head[..dot], &head[dot + 1..]),
            None => ("", head),
        };
        let mut path = vec![outer.to_string()];
        path.extend(segments.map(str::to_string));
        Self {
            scope: scope.into(),
            namespace: namespace.to_string(),
            path,
        }
    }

    /// Name of a type nested in this one
    pub fn nested(&self, name: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(name.into());
        Self {
            scope: self.scope.clone(),
            namespace: self.namespace.clone(),
            path,
        }
    }

    /// Simple name (last path segment)
    pub fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Whether the type is nested in another type
    pub fn is_nested(&self) -> bool {
        self.path.len() > 1
    }

    /// Whether the type lives in the system module
    pub fn is_system(&self) -> bool {
        self.scope == SYSTEM_SCOPE
    }

    /// The directly enclosing type, if nested
    pub fn declaring(&self) -> Option<TypeName> {
        if !self.is_nested() {
            return None;
        }
        Some(Self {
            scope: self.scope.clone(),
            namespace: self.namespace.clone(),
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// The outermost enclosing type (itself when top-level)
    pub fn outermost(&self) -> TypeName {
        Self {
            scope: self.scope.clone(),
            namespace: self.namespace.clone(),
            path: self.path[..1.min(self.path.len())].to_vec(),
        }
    }

    /// This type and all of its declaring types, innermost first
    pub fn ancestors(&self) -> Vec<TypeName> {
        (1..=self.path.len())
            .rev()
            .map(|len| Self {
                scope: self.scope.clone(),
                namespace: self.namespace.clone(),
                path: self.path[..len].to_vec(),
            })
            .collect()
    }

    /// Whether `self` is `other` or nested (at any depth) inside it
    pub fn is_within(&self, other: &TypeName) -> bool {
        self.scope == other.scope
            && self.namespace == other.namespace
            && self.path.len() >= other.path.len()
            && self.path[..other.path.len()] == other.path[..]
    }

    /// Re-derive this name after its ancestor `from` was replaced by `onto`.
    ///
    /// Returns `None` when `self` is not within `from`.
    pub fn rebase(&self, from: &TypeName, onto: &TypeName) -> Option<TypeName> {
        if !self.is_within(from) {
            return None;
        }
        let mut path = onto.path.clone();
        path.extend(self.path[from.path.len()..].iter().cloned());
        Some(Self {
            scope: onto.scope.clone(),
            namespace: onto.namespace.clone(),
            path,
        })
    }

    /// Copy of this name in another scope
    pub fn with_scope(&self, scope: &str) -> TypeName {
        Self {
            scope: scope.to_string(),
            namespace: self.namespace.clone(),
            path: self.path.clone(),
        }
    }

    /// `Ns.Outer/Inner`
    pub fn full_name(&self) -> String {
        let nested = self.path.join("/");
        if self.namespace.is_empty() {
            nested
        } else {
            format!("{}.{}", self.namespace, nested)
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.scope, self.full_name())
    }
}

impl Encode for TypeName {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(&self.scope);
        writer.emit_str(&self.namespace);
        self.path.encode(writer);
    }
}

impl Decode for TypeName {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            scope: reader.read_string()?,
            namespace: reader.read_string()?,
            path: Vec::<String>::decode(reader)?,
        })
    }
}
