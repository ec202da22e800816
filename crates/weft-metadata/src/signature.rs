//! Type signatures and member references
//!
//! These are the reference shapes embedded in member signatures, attribute
//! blobs and instruction operands.

use crate::encoder::{Decode, DecodeError, Encode, MetadataReader, MetadataWriter};
use crate::name::TypeName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of element owning a generic parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GenericOwner {
    /// Declared on a type (`!n`)
    Type,
    /// Declared on a method (`!!n`)
    Method,
}

/// Reference to a generic parameter by position
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenericParamRef {
    /// Owner kind
    pub owner: GenericOwner,
    /// Position in the owner's parameter list
    pub position: u16,
    /// Declared name (informational, not part of identity)
    pub name: String,
}

/// A type signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeSig {
    /// Simple reference to a type definition
    Named(TypeName),
    /// Instance of a generic type definition
    Generic {
        /// Generic type definition
        base: TypeName,
        /// Type arguments, positionally
        args: Vec<TypeSig>,
    },
    /// Managed pointer (`T&`)
    ByRef(Box<TypeSig>),
    /// Single-dimensional array (`T[]`)
    Array(Box<TypeSig>),
    /// Generic parameter
    GenericParam(GenericParamRef),
}

impl TypeSig {
    /// Simple reference to `name`
    pub fn named(name: TypeName) -> Self {
        TypeSig::Named(name)
    }

    /// Reference to a system type
    pub fn system(name: &str) -> Self {
        TypeSig::Named(TypeName::system(name))
    }

    /// `System.Void`
    pub fn void() -> Self {
        Self::system("Void")
    }

    /// `System.Object`
    pub fn object() -> Self {
        Self::system("Object")
    }

    /// `System.Int32`
    pub fn int32() -> Self {
        Self::system("Int32")
    }

    /// `System.Int64`
    pub fn int64() -> Self {
        Self::system("Int64")
    }

    /// `System.Double`
    pub fn double() -> Self {
        Self::system("Double")
    }

    /// `System.Boolean`
    pub fn boolean() -> Self {
        Self::system("Boolean")
    }

    /// `System.String`
    pub fn string() -> Self {
        Self::system("String")
    }

    /// Type-owned generic parameter reference
    pub fn type_param(position: u16, name: impl Into<String>) -> Self {
        TypeSig::GenericParam(GenericParamRef {
            owner: GenericOwner::Type,
            position,
            name: name.into(),
        })
    }

    /// Method-owned generic parameter reference
    pub fn method_param(position: u16, name: impl Into<String>) -> Self {
        TypeSig::GenericParam(GenericParamRef {
            owner: GenericOwner::Method,
            position,
            name: name.into(),
        })
    }

    /// Whether this is `System.Void`
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Named(name) if name.is_system() && name.name() == "Void")
    }

    /// Whether this is `System.Object`
    pub fn is_object(&self) -> bool {
        matches!(self, TypeSig::Named(name) if name.is_system() && name.name() == "Object")
    }

    /// The referenced definition's name (generic instances yield their base)
    pub fn type_name(&self) -> Option<&TypeName> {
        match self {
            TypeSig::Named(name) => Some(name),
            TypeSig::Generic { base, .. } => Some(base),
            _ => None,
        }
    }

    /// Generic arguments of an instance, empty otherwise
    pub fn generic_args(&self) -> &[TypeSig] {
        match self {
            TypeSig::Generic { args, .. } => args,
            _ => &[],
        }
    }

    /// Whether any generic parameter occurs in this signature
    pub fn has_generic_params(&self) -> bool {
        match self {
            TypeSig::Named(_) => false,
            TypeSig::Generic { args, .. } => args.iter().any(TypeSig::has_generic_params),
            TypeSig::ByRef(inner) | TypeSig::Array(inner) => inner.has_generic_params(),
            TypeSig::GenericParam(_) => true,
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Named(name) => write!(f, "{}", name.full_name()),
            TypeSig::Generic { base, args } => {
                write!(f, "{}<", base.full_name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
            TypeSig::ByRef(inner) => write!(f, "{}&", inner),
            TypeSig::Array(inner) => write!(f, "{}[]", inner),
            TypeSig::GenericParam(param) => match param.owner {
                GenericOwner::Type => write!(f, "!{}", param.position),
                GenericOwner::Method => write!(f, "!!{}", param.position),
            },
        }
    }
}

/// Reference to a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    /// Declaring type
    pub declaring: TypeSig,
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: TypeSig,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.field_type, self.declaring, self.name)
    }
}

/// Reference to a method
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    /// Declaring type
    pub declaring: TypeSig,
    /// Method name
    pub name: String,
    /// Instance method
    pub has_this: bool,
    /// Return type
    pub return_type: TypeSig,
    /// Parameter types
    pub params: Vec<TypeSig>,
    /// Number of generic parameters declared by the method
    pub generic_arity: u16,
    /// Generic arguments when this references a generic method instance
    pub generic_args: Vec<TypeSig>,
}

impl MethodRef {
    /// Whether the referenced method is an instance constructor
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }

    /// Same name, arity and signature (structural equality of the types)
    pub fn same_signature(&self, other: &MethodRef) -> bool {
        self.name == other.name
            && self.generic_arity == other.generic_arity
            && self.return_type == other.return_type
            && self.params == other.params
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.return_type, self.declaring, self.name)?;
        if self.generic_arity > 0 {
            write!(f, "`{}", self.generic_arity)?;
        }
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")
    }
}

// ============================================================================
// Encoding
// ============================================================================

impl Encode for GenericParamRef {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_u8(match self.owner {
            GenericOwner::Type => 0,
            GenericOwner::Method => 1,
        });
        writer.emit_u16(self.position);
        writer.emit_str(&self.name);
    }
}

impl Decode for GenericParamRef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let owner = match reader.read_u8()? {
            0 => GenericOwner::Type,
            1 => GenericOwner::Method,
            tag => {
                return Err(DecodeError::InvalidTag {
                    kind: "generic owner",
                    tag,
                    offset,
                })
            }
        };
        Ok(Self {
            owner,
            position: reader.read_u16()?,
            name: reader.read_string()?,
        })
    }
}

impl Encode for TypeSig {
    fn encode(&self, writer: &mut MetadataWriter) {
        match self {
            TypeSig::Named(name) => {
                writer.emit_u8(0);
                name.encode(writer);
            }
            TypeSig::Generic { base, args } => {
                writer.emit_u8(1);
                base.encode(writer);
                args.encode(writer);
            }
            TypeSig::ByRef(inner) => {
                writer.emit_u8(2);
                inner.encode(writer);
            }
            TypeSig::Array(inner) => {
                writer.emit_u8(3);
                inner.encode(writer);
            }
            TypeSig::GenericParam(param) => {
                writer.emit_u8(4);
                param.encode(writer);
            }
        }
    }
}

impl Decode for TypeSig {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        match reader.read_u8()? {
            0 => Ok(TypeSig::Named(TypeName::decode(reader)?)),
            1 => Ok(TypeSig::Generic {
                base: TypeName::decode(reader)?,
                args: Vec::<TypeSig>::decode(reader)?,
            }),
            2 => Ok(TypeSig::ByRef(Box::<TypeSig>::decode(reader)?)),
            3 => Ok(TypeSig::Array(Box::<TypeSig>::decode(reader)?)),
            4 => Ok(TypeSig::GenericParam(GenericParamRef::decode(reader)?)),
            tag => Err(DecodeError::InvalidTag {
                kind: "type signature",
                tag,
                offset,
            }),
        }
    }
}

impl Encode for FieldRef {
    fn encode(&self, writer: &mut MetadataWriter) {
        self.declaring.encode(writer);
        writer.emit_str(&self.name);
        self.field_type.encode(writer);
    }
}

impl Decode for FieldRef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            declaring: TypeSig::decode(reader)?,
            name: reader.read_string()?,
            field_type: TypeSig::decode(reader)?,
        })
    }
}

impl Encode for MethodRef {
    fn encode(&self, writer: &mut MetadataWriter) {
        self.declaring.encode(writer);
        writer.emit_str(&self.name);
        writer.emit_bool(self.has_this);
        self.return_type.encode(writer);
        self.params.encode(writer);
        writer.emit_u16(self.generic_arity);
        self.generic_args.encode(writer);
    }
}

impl Decode for MethodRef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            declaring: TypeSig::decode(reader)?,
            name: reader.read_string()?,
            has_this: reader.read_bool()?,
            return_type: TypeSig::decode(reader)?,
            params: Vec::<TypeSig>::decode(reader)?,
            generic_arity: reader.read_u16()?,
            generic_args: Vec::<TypeSig>::decode(reader)?,
        })
    }
}
