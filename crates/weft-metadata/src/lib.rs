//! Weft module metadata
//!
//! This crate provides the metadata model of managed binary modules (type
//! names, signatures, definitions, method bodies), the binary module codec,
//! and the module universe used to resolve references across modules.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod body;
pub mod definition;
pub mod encoder;
pub mod module;
pub mod name;
pub mod opcode;
pub mod set;
pub mod signature;
pub mod visit;

pub use body::{ExceptionHandler, HandlerKind, Instruction, JumpPolicy, MethodBody, Operand};
pub use definition::{
    member_flags, type_flags, AttrArg, Constant, CustomAttribute, EventDef, FieldDef,
    GenericParamDef, HasAttributes, InterfaceImpl, MethodDef, NamedArg, ParamDef, PropertyDef,
    SecurityDecl, TypeDef, CONSTRUCTOR_NAME, TYPE_INITIALIZER_NAME,
};
pub use encoder::{Decode, DecodeError, Encode, MetadataReader, MetadataWriter};
pub use module::{Module, ModuleError, ModuleRef, MODULE_EXTENSION};
pub use name::{TypeName, SYSTEM_NAMESPACE, SYSTEM_SCOPE};
pub use opcode::{Opcode, OperandKind};
pub use set::{ModuleId, ModuleSet};
pub use signature::{FieldRef, GenericOwner, GenericParamRef, MethodRef, TypeSig};
pub use visit::ReferenceCollector;
