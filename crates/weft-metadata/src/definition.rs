//! Type and member definitions
//!
//! Definitions form an owned tree: a [`Module`](crate::Module) owns its
//! top-level types, a [`TypeDef`] owns its members and nested types, and a
//! [`MethodDef`] owns its body.

use crate::body::MethodBody;
use crate::encoder::{Decode, DecodeError, Encode, MetadataReader, MetadataWriter};
use crate::name::TypeName;
use crate::signature::{GenericOwner, MethodRef, TypeSig};

/// Type attribute flags
pub mod type_flags {
    /// Publicly visible
    pub const PUBLIC: u32 = 1 << 0;
    /// Interface type
    pub const INTERFACE: u32 = 1 << 1;
    /// Cannot be instantiated
    pub const ABSTRACT: u32 = 1 << 2;
    /// Cannot be derived from
    pub const SEALED: u32 = 1 << 3;
    /// Value type (struct)
    pub const VALUE_TYPE: u32 = 1 << 4;
    /// Enumeration
    pub const ENUM: u32 = 1 << 5;
    /// Emitted by a compiler (closures, state machines)
    pub const COMPILER_GENERATED: u32 = 1 << 6;
}

/// Member attribute flags
pub mod member_flags {
    /// Publicly visible
    pub const PUBLIC: u32 = 1 << 0;
    /// Visible only inside the declaring type
    pub const PRIVATE: u32 = 1 << 1;
    /// Static member
    pub const STATIC: u32 = 1 << 2;
    /// Hides an inherited member with the same signature
    pub const NEW: u32 = 1 << 3;
    /// Emitted by a compiler (backing fields, lambdas)
    pub const COMPILER_GENERATED: u32 = 1 << 4;
    /// Late-bound dispatch
    pub const VIRTUAL: u32 = 1 << 5;
    /// No implementation
    pub const ABSTRACT: u32 = 1 << 6;
    /// Occupies a new dispatch slot
    pub const NEW_SLOT: u32 = 1 << 7;
    /// Cannot be overridden further
    pub const FINAL: u32 = 1 << 8;
    /// Accessor, operator or other specially named method
    pub const SPECIAL_NAME: u32 = 1 << 9;
    /// Runtime-recognized special name (constructors)
    pub const RT_SPECIAL_NAME: u32 = 1 << 10;
    /// Compile-time constant field
    pub const LITERAL: u32 = 1 << 11;
    /// Field assignable only in constructors
    pub const INIT_ONLY: u32 = 1 << 12;
}

/// Name of instance constructors
pub const CONSTRUCTOR_NAME: &str = ".ctor";

/// Name of type initializers
pub const TYPE_INITIALIZER_NAME: &str = ".cctor";

/// Access to the custom attributes of a metadata element
pub trait HasAttributes {
    /// Attributes attached to the element
    fn attributes(&self) -> &[CustomAttribute];

    /// Mutable attribute list
    fn attributes_mut(&mut self) -> &mut Vec<CustomAttribute>;

    /// First attribute whose type is `attribute_type`
    fn find_attribute(&self, attribute_type: &TypeName) -> Option<&CustomAttribute> {
        self.attributes()
            .iter()
            .find(|attr| attr.attribute_type() == Some(attribute_type))
    }

    /// Whether an attribute of type `attribute_type` is attached
    fn has_attribute(&self, attribute_type: &TypeName) -> bool {
        self.find_attribute(attribute_type).is_some()
    }
}

macro_rules! impl_has_attributes {
    ($($ty:ty),*) => {
        $(impl HasAttributes for $ty {
            fn attributes(&self) -> &[CustomAttribute] {
                &self.attributes
            }

            fn attributes_mut(&mut self) -> &mut Vec<CustomAttribute> {
                &mut self.attributes
            }
        })*
    };
}

impl_has_attributes!(TypeDef, FieldDef, MethodDef, PropertyDef, EventDef, GenericParamDef);

// ============================================================================
// Types
// ============================================================================

/// A type definition
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeDef {
    /// Namespace (empty for nested types, which use their parent's)
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Type flags (see [`type_flags`])
    pub flags: u32,
    /// Generic parameters
    pub generic_params: Vec<GenericParamDef>,
    /// Base type
    pub base: Option<TypeSig>,
    /// Implemented interfaces
    pub interfaces: Vec<InterfaceImpl>,
    /// Fields
    pub fields: Vec<FieldDef>,
    /// Methods, including constructors and accessors
    pub methods: Vec<MethodDef>,
    /// Properties
    pub properties: Vec<PropertyDef>,
    /// Events
    pub events: Vec<EventDef>,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
    /// Declarative security
    pub security: Vec<SecurityDecl>,
    /// Nested types
    pub nested: Vec<TypeDef>,
}

impl TypeDef {
    /// Create an empty type definition
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, flags: u32) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            flags,
            ..Default::default()
        }
    }

    /// Interface type
    pub fn is_interface(&self) -> bool {
        self.flags & type_flags::INTERFACE != 0
    }

    /// Value type
    pub fn is_value_type(&self) -> bool {
        self.flags & (type_flags::VALUE_TYPE | type_flags::ENUM) != 0
    }

    /// Enumeration
    pub fn is_enum(&self) -> bool {
        self.flags & type_flags::ENUM != 0
    }

    /// Emitted by a compiler
    pub fn is_compiler_generated(&self) -> bool {
        self.flags & type_flags::COMPILER_GENERATED != 0
    }

    /// Signature referring to this type as seen from inside its own body:
    /// generic definitions are instantiated over their own parameters.
    pub fn self_sig(&self, name: &TypeName) -> TypeSig {
        if self.generic_params.is_empty() {
            TypeSig::Named(name.clone())
        } else {
            TypeSig::Generic {
                base: name.clone(),
                args: self
                    .generic_params
                    .iter()
                    .map(|param| TypeSig::type_param(param.position, param.name.clone()))
                    .collect(),
            }
        }
    }

    /// Field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Methods with the given name
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (usize, &'a MethodDef)> + 'a {
        self.methods
            .iter()
            .enumerate()
            .filter(move |(_, method)| method.name == name)
    }

    /// First method with the given name
    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// Index of the method with the given name and parameter types
    pub fn find_method(&self, name: &str, params: &[TypeSig]) -> Option<usize> {
        self.methods
            .iter()
            .position(|method| method.name == name && method.param_types().eq(params.iter()))
    }

    /// Instance constructors
    pub fn constructors(&self) -> impl Iterator<Item = (usize, &MethodDef)> {
        self.methods
            .iter()
            .enumerate()
            .filter(|(_, method)| method.is_constructor())
    }

    /// Property by name
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|property| property.name == name)
    }

    /// Event by name
    pub fn event(&self, name: &str) -> Option<&EventDef> {
        self.events.iter().find(|event| event.name == name)
    }

    /// Directly nested type by simple name
    pub fn nested_type(&self, name: &str) -> Option<&TypeDef> {
        self.nested.iter().find(|nested| nested.name == name)
    }

    /// Mutable directly nested type by simple name
    pub fn nested_type_mut(&mut self, name: &str) -> Option<&mut TypeDef> {
        self.nested.iter_mut().find(|nested| nested.name == name)
    }

    /// Visit this type and every nested type, depth-first, with its name
    pub fn walk<'a>(&'a self, name: &TypeName, visit: &mut dyn FnMut(&TypeName, &'a TypeDef)) {
        visit(name, self);
        for nested in &self.nested {
            nested.walk(&name.nested(nested.name.clone()), visit);
        }
    }
}

/// A generic parameter declaration
#[derive(Debug, Clone, PartialEq)]
pub struct GenericParamDef {
    /// Declared name
    pub name: String,
    /// Position in the owner's parameter list
    pub position: u16,
    /// Owner kind
    pub owner: GenericOwner,
    /// Constraint types
    pub constraints: Vec<TypeSig>,
    /// Variance and special constraint flags
    pub flags: u16,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

impl GenericParamDef {
    /// Unconstrained parameter
    pub fn new(name: impl Into<String>, position: u16, owner: GenericOwner) -> Self {
        Self {
            name: name.into(),
            position,
            owner,
            constraints: Vec::new(),
            flags: 0,
            attributes: Vec::new(),
        }
    }
}

/// An interface implementation entry
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceImpl {
    /// Implemented interface
    pub interface: TypeSig,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

impl InterfaceImpl {
    /// Entry without attributes
    pub fn new(interface: TypeSig) -> Self {
        Self {
            interface,
            attributes: Vec::new(),
        }
    }
}

// ============================================================================
// Members
// ============================================================================

/// Compile-time constant value of a literal field
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Boolean
    Bool(bool),
    /// Integer (all integral widths)
    Int(i64),
    /// Floating point
    Float(f64),
    /// String
    String(String),
    /// Null reference
    Null,
}

/// A field definition
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Member flags (see [`member_flags`])
    pub flags: u32,
    /// Field type
    pub field_type: TypeSig,
    /// Literal value
    pub constant: Option<Constant>,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

impl FieldDef {
    /// Field without constant or attributes
    pub fn new(name: impl Into<String>, flags: u32, field_type: TypeSig) -> Self {
        Self {
            name: name.into(),
            flags,
            field_type,
            constant: None,
            attributes: Vec::new(),
        }
    }

    /// Static field
    pub fn is_static(&self) -> bool {
        self.flags & member_flags::STATIC != 0
    }

    /// Reference to this field on `declaring`
    pub fn to_ref(&self, declaring: TypeSig) -> crate::signature::FieldRef {
        crate::signature::FieldRef {
            declaring,
            name: self.name.clone(),
            field_type: self.field_type.clone(),
        }
    }
}

/// A method parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    /// Parameter name
    pub name: String,
    /// Parameter type
    pub param_type: TypeSig,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

impl ParamDef {
    /// Parameter without attributes
    pub fn new(name: impl Into<String>, param_type: TypeSig) -> Self {
        Self {
            name: name.into(),
            param_type,
            attributes: Vec::new(),
        }
    }
}

/// A method definition
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Member flags (see [`member_flags`])
    pub flags: u32,
    /// Return type
    pub return_type: TypeSig,
    /// Parameters
    pub params: Vec<ParamDef>,
    /// Generic parameters
    pub generic_params: Vec<GenericParamDef>,
    /// Explicitly implemented or overridden methods
    pub overrides: Vec<MethodRef>,
    /// Body (absent for abstract and interface methods)
    pub body: Option<MethodBody>,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
    /// Declarative security
    pub security: Vec<SecurityDecl>,
}

impl MethodDef {
    /// Method without generics, overrides or attributes
    pub fn new(
        name: impl Into<String>,
        flags: u32,
        return_type: TypeSig,
        params: Vec<ParamDef>,
    ) -> Self {
        Self {
            name: name.into(),
            flags,
            return_type,
            params,
            generic_params: Vec::new(),
            overrides: Vec::new(),
            body: None,
            attributes: Vec::new(),
            security: Vec::new(),
        }
    }

    /// Attach a body
    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Static method
    pub fn is_static(&self) -> bool {
        self.flags & member_flags::STATIC != 0
    }

    /// Late-bound method
    pub fn is_virtual(&self) -> bool {
        self.flags & member_flags::VIRTUAL != 0
    }

    /// Abstract method
    pub fn is_abstract(&self) -> bool {
        self.flags & member_flags::ABSTRACT != 0
    }

    /// Instance constructor
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    /// Type initializer
    pub fn is_type_initializer(&self) -> bool {
        self.name == TYPE_INITIALIZER_NAME
    }

    /// Parameter types in order
    pub fn param_types(&self) -> impl Iterator<Item = &TypeSig> {
        self.params.iter().map(|param| &param.param_type)
    }

    /// Reference to this method on `declaring`
    pub fn to_ref(&self, declaring: TypeSig) -> MethodRef {
        MethodRef {
            declaring,
            name: self.name.clone(),
            has_this: !self.is_static(),
            return_type: self.return_type.clone(),
            params: self.param_types().cloned().collect(),
            generic_arity: self.generic_params.len() as u16,
            generic_args: Vec::new(),
        }
    }
}

/// A property definition
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    /// Property name
    pub name: String,
    /// Member flags
    pub flags: u32,
    /// Property type
    pub property_type: TypeSig,
    /// Index parameter types
    pub params: Vec<TypeSig>,
    /// Name of the getter method on the declaring type
    pub getter: Option<String>,
    /// Name of the setter method on the declaring type
    pub setter: Option<String>,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

/// An event definition
#[derive(Debug, Clone, PartialEq)]
pub struct EventDef {
    /// Event name
    pub name: String,
    /// Member flags
    pub flags: u32,
    /// Delegate type of the event
    pub event_type: TypeSig,
    /// Name of the add accessor on the declaring type
    pub adder: Option<String>,
    /// Name of the remove accessor on the declaring type
    pub remover: Option<String>,
    /// Custom attributes
    pub attributes: Vec<CustomAttribute>,
}

// ============================================================================
// Attributes and security
// ============================================================================

/// A custom attribute argument
#[derive(Debug, Clone, PartialEq)]
pub enum AttrArg {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// String
    String(String),
    /// Type reference
    Type(TypeSig),
    /// Null
    Null,
}

impl AttrArg {
    /// String payload, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrArg::String(value) => Some(value),
            _ => None,
        }
    }

    /// Type payload, if any
    pub fn as_type(&self) -> Option<&TypeSig> {
        match self {
            AttrArg::Type(sig) => Some(sig),
            _ => None,
        }
    }
}

/// A named attribute argument (field or property assignment)
#[derive(Debug, Clone, PartialEq)]
pub struct NamedArg {
    /// Field or property name
    pub name: String,
    /// Assigned value
    pub value: AttrArg,
}

/// A custom attribute instance
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttribute {
    /// Attribute constructor
    pub ctor: MethodRef,
    /// Positional constructor arguments
    pub args: Vec<AttrArg>,
    /// Named arguments
    pub named: Vec<NamedArg>,
}

impl CustomAttribute {
    /// Attribute with positional string arguments, built against a
    /// constructor taking that many strings
    pub fn with_strings(attribute_type: TypeName, values: &[&str]) -> Self {
        Self {
            ctor: MethodRef {
                declaring: TypeSig::Named(attribute_type),
                name: CONSTRUCTOR_NAME.to_string(),
                has_this: true,
                return_type: TypeSig::void(),
                params: values.iter().map(|_| TypeSig::string()).collect(),
                generic_arity: 0,
                generic_args: Vec::new(),
            },
            args: values
                .iter()
                .map(|value| AttrArg::String(value.to_string()))
                .collect(),
            named: Vec::new(),
        }
    }

    /// The attribute's type
    pub fn attribute_type(&self) -> Option<&TypeName> {
        self.ctor.declaring.type_name()
    }

    /// Positional string argument
    pub fn string_arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(AttrArg::as_str)
    }

    /// Named argument value
    pub fn named_arg(&self, name: &str) -> Option<&AttrArg> {
        self.named.iter().find(|arg| arg.name == name).map(|arg| &arg.value)
    }
}

/// A declarative security entry
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityDecl {
    /// Security action code
    pub action: u16,
    /// Serialized permission set
    pub permission_set: String,
}

// ============================================================================
// Encoding
// ============================================================================

fn invalid_tag(kind: &'static str, tag: u8, offset: usize) -> DecodeError {
    DecodeError::InvalidTag { kind, tag, offset }
}

impl Encode for TypeDef {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(&self.namespace);
        writer.emit_str(&self.name);
        writer.emit_u32(self.flags);
        self.generic_params.encode(writer);
        self.base.encode(writer);
        self.interfaces.encode(writer);
        self.fields.encode(writer);
        self.methods.encode(writer);
        self.properties.encode(writer);
        self.events.encode(writer);
        self.attributes.encode(writer);
        self.security.encode(writer);
        self.nested.encode(writer);
    }
}

impl Decode for TypeDef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            namespace: reader.read_string()?,
            name: reader.read_string()?,
            flags: reader.read_u32()?,
            generic_params: Decode::decode(reader)?,
            base: Decode::decode(reader)?,
            interfaces: Decode::decode(reader)?,
            fields: Decode::decode(reader)?,
            methods: Decode::decode(reader)?,
            properties: Decode::decode(reader)?,
            events: Decode::decode(reader)?,
            attributes: Decode::decode(reader)?,
            security: Decode::decode(reader)?,
            nested: Decode::decode(reader)?,
        })
    }
}

impl Encode for GenericParamDef {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(&self.name);
        writer.emit_u16(self.position);
        writer.emit_u8(match self.owner {
            GenericOwner::Type => 0,
            GenericOwner::Method => 1,
        });
        self.constraints.encode(writer);
        writer.emit_u16(self.flags);
        self.attributes.encode(writer);
    }
}

impl Decode for GenericParamDef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let position = reader.read_u16()?;
        let offset = reader.position();
        let owner = match reader.read_u8()? {
            0 => GenericOwner::Type,
            1 => GenericOwner::Method,
            tag => return Err(invalid_tag("generic owner", tag, offset)),
        };
        Ok(Self {
            name,
            position,
            owner,
            constraints: Decode::decode(reader)?,
            flags: reader.read_u16()?,
            attributes: Decode::decode(reader)?,
        })
    }
}

impl Encode for InterfaceImpl {
    fn encode(&self, writer: &mut MetadataWriter) {
        self.interface.encode(writer);
        self.attributes.encode(writer);
    }
}

impl Decode for InterfaceImpl {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            interface: Decode::decode(reader)?,
            attributes: Decode::decode(reader)?,
        })
    }
}

impl Encode for Constant {
    fn encode(&self, writer: &mut MetadataWriter) {
        match self {
            Constant::Bool(value) => {
                writer.emit_u8(0);
                writer.emit_bool(*value);
            }
            Constant::Int(value) => {
                writer.emit_u8(1);
                writer.emit_i64(*value);
            }
            Constant::Float(value) => {
                writer.emit_u8(2);
                writer.emit_f64(*value);
            }
            Constant::String(value) => {
                writer.emit_u8(3);
                writer.emit_str(value);
            }
            Constant::Null => writer.emit_u8(4),
        }
    }
}

impl Decode for Constant {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        match reader.read_u8()? {
            0 => Ok(Constant::Bool(reader.read_bool()?)),
            1 => Ok(Constant::Int(reader.read_i64()?)),
            2 => Ok(Constant::Float(reader.read_f64()?)),
            3 => Ok(Constant::String(reader.read_string()?)),
            4 => Ok(Constant::Null),
            tag => Err(invalid_tag("constant", tag, offset)),
        }
    }
}

impl Encode for FieldDef {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(&self.name);
        writer.emit_u32(self.flags);
        self.field_type.encode(writer);
        self.constant.encode(writer);
        self.attributes.encode(writer);
    }
}

impl Decode for FieldDef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            flags: reader.read_u32()?,
            field_type: Decode::decode(reader)?,
            constant: Decode::decode(reader)?,
            attributes: Decode::decode(reader)?,
        })
    }
}

impl Encode for ParamDef {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(&self.name);
        self.param_type.encode(writer);
        self.attributes.encode(writer);
    }
}

impl Decode for ParamDef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            param_type: Decode::decode(reader)?,
            attributes: Decode::decode(reader)?,
        })
    }
}

impl Encode for MethodDef {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(&self.name);
        writer.emit_u32(self.flags);
        self.return_type.encode(writer);
        self.params.encode(writer);
        self.generic_params.encode(writer);
        self.overrides.encode(writer);
        self.body.encode(writer);
        self.attributes.encode(writer);
        self.security.encode(writer);
    }
}

impl Decode for MethodDef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            flags: reader.read_u32()?,
            return_type: Decode::decode(reader)?,
            params: Decode::decode(reader)?,
            generic_params: Decode::decode(reader)?,
            overrides: Decode::decode(reader)?,
            body: Decode::decode(reader)?,
            attributes: Decode::decode(reader)?,
            security: Decode::decode(reader)?,
        })
    }
}

impl Encode for PropertyDef {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(&self.name);
        writer.emit_u32(self.flags);
        self.property_type.encode(writer);
        self.params.encode(writer);
        self.getter.encode(writer);
        self.setter.encode(writer);
        self.attributes.encode(writer);
    }
}

impl Decode for PropertyDef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            flags: reader.read_u32()?,
            property_type: Decode::decode(reader)?,
            params: Decode::decode(reader)?,
            getter: Decode::decode(reader)?,
            setter: Decode::decode(reader)?,
            attributes: Decode::decode(reader)?,
        })
    }
}

impl Encode for EventDef {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(&self.name);
        writer.emit_u32(self.flags);
        self.event_type.encode(writer);
        self.adder.encode(writer);
        self.remover.encode(writer);
        self.attributes.encode(writer);
    }
}

impl Decode for EventDef {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            flags: reader.read_u32()?,
            event_type: Decode::decode(reader)?,
            adder: Decode::decode(reader)?,
            remover: Decode::decode(reader)?,
            attributes: Decode::decode(reader)?,
        })
    }
}

impl Encode for AttrArg {
    fn encode(&self, writer: &mut MetadataWriter) {
        match self {
            AttrArg::Bool(value) => {
                writer.emit_u8(0);
                writer.emit_bool(*value);
            }
            AttrArg::Int(value) => {
                writer.emit_u8(1);
                writer.emit_i64(*value);
            }
            AttrArg::Float(value) => {
                writer.emit_u8(2);
                writer.emit_f64(*value);
            }
            AttrArg::String(value) => {
                writer.emit_u8(3);
                writer.emit_str(value);
            }
            AttrArg::Type(sig) => {
                writer.emit_u8(4);
                sig.encode(writer);
            }
            AttrArg::Null => writer.emit_u8(5),
        }
    }
}

impl Decode for AttrArg {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        match reader.read_u8()? {
            0 => Ok(AttrArg::Bool(reader.read_bool()?)),
            1 => Ok(AttrArg::Int(reader.read_i64()?)),
            2 => Ok(AttrArg::Float(reader.read_f64()?)),
            3 => Ok(AttrArg::String(reader.read_string()?)),
            4 => Ok(AttrArg::Type(Decode::decode(reader)?)),
            5 => Ok(AttrArg::Null),
            tag => Err(invalid_tag("attribute argument", tag, offset)),
        }
    }
}

impl Encode for NamedArg {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_str(&self.name);
        self.value.encode(writer);
    }
}

impl Decode for NamedArg {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            value: Decode::decode(reader)?,
        })
    }
}

impl Encode for CustomAttribute {
    fn encode(&self, writer: &mut MetadataWriter) {
        self.ctor.encode(writer);
        self.args.encode(writer);
        self.named.encode(writer);
    }
}

impl Decode for CustomAttribute {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            ctor: Decode::decode(reader)?,
            args: Decode::decode(reader)?,
            named: Decode::decode(reader)?,
        })
    }
}

impl Encode for SecurityDecl {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_u16(self.action);
        writer.emit_str(&self.permission_set);
    }
}

impl Decode for SecurityDecl {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            action: reader.read_u16()?,
            permission_set: reader.read_string()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_type() -> TypeDef {
        let mut ty = TypeDef::new("App", "Order", type_flags::PUBLIC);
        ty.fields.push(FieldDef::new("total", member_flags::PRIVATE, TypeSig::int32()));
        ty.methods.push(MethodDef::new(
            CONSTRUCTOR_NAME,
            member_flags::PUBLIC | member_flags::RT_SPECIAL_NAME,
            TypeSig::void(),
            vec![ParamDef::new("total", TypeSig::int32())],
        ));
        ty.methods.push(MethodDef::new(
            "Add",
            member_flags::PUBLIC,
            TypeSig::void(),
            vec![ParamDef::new("amount", TypeSig::int32())],
        ));
        ty.nested.push(TypeDef::new("", "Line", 0));
        ty
    }

    #[test]
    fn test_member_lookup() {
        let ty = sample_type();
        assert!(ty.field("total").is_some());
        assert_eq!(ty.find_method("Add", &[TypeSig::int32()]), Some(1));
        assert_eq!(ty.find_method("Add", &[]), None);
        assert_eq!(ty.constructors().count(), 1);
        assert!(ty.nested_type("Line").is_some());
    }

    #[test]
    fn test_self_sig_of_generic_type() {
        let mut ty = TypeDef::new("App", "Box", 0);
        ty.generic_params
            .push(GenericParamDef::new("T", 0, GenericOwner::Type));
        let name = TypeName::new("App", "App", "Box");
        assert_eq!(ty.self_sig(&name).to_string(), "App.Box<!0>");
    }

    #[test]
    fn test_walk_visits_nested_types() {
        let ty = sample_type();
        let mut seen = Vec::new();
        ty.walk(&TypeName::new("App", "App", "Order"), &mut |name, _| {
            seen.push(name.full_name())
        });
        assert_eq!(seen, vec!["App.Order", "App.Order/Line"]);
    }

    #[test]
    fn test_find_attribute() {
        let marker = TypeName::new("Weft", "Weft", "Marker");
        let mut method = MethodDef::new("Run", 0, TypeSig::void(), Vec::new());
        method
            .attributes
            .push(CustomAttribute::with_strings(marker.clone(), &["a", "b"]));
        let attr = method.find_attribute(&marker).unwrap();
        assert_eq!(attr.string_arg(1), Some("b"));
        assert_eq!(attr.ctor.params.len(), 2);
    }

    #[test]
    fn test_method_ref_from_definition() {
        let ty = sample_type();
        let declaring = TypeSig::Named(TypeName::new("App", "App", "Order"));
        let method_ref = ty.methods[1].to_ref(declaring);
        assert!(method_ref.has_this);
        assert_eq!(method_ref.params, vec![TypeSig::int32()]);
    }

    #[test]
    fn test_type_def_codec() {
        let ty = sample_type();
        let mut writer = MetadataWriter::new();
        ty.encode(&mut writer);
        let bytes = writer.into_bytes();
        let decoded = TypeDef::decode(&mut MetadataReader::new(&bytes)).unwrap();
        assert_eq!(decoded, ty);
    }
}
