//! Reference collection
//!
//! Walks definitions and bodies and records every type, field and method
//! they reference. Sets are ordered so callers iterate deterministically.

use crate::body::{HandlerKind, MethodBody, Operand};
use crate::definition::{
    AttrArg, CustomAttribute, EventDef, FieldDef, GenericParamDef, MethodDef, PropertyDef, TypeDef,
};
use crate::name::TypeName;
use crate::signature::{FieldRef, MethodRef, TypeSig};
use std::collections::BTreeSet;

/// Accumulates the references made by metadata elements
#[derive(Debug, Clone, Default)]
pub struct ReferenceCollector {
    /// Referenced type definitions
    pub types: BTreeSet<TypeName>,
    /// Referenced methods
    pub methods: BTreeSet<MethodRef>,
    /// Referenced fields
    pub fields: BTreeSet<FieldRef>,
}

impl ReferenceCollector {
    /// Empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Module scopes of every referenced type
    pub fn scopes(&self) -> BTreeSet<String> {
        self.types.iter().map(|name| name.scope.clone()).collect()
    }

    /// Record a type signature
    pub fn visit_sig(&mut self, sig: &TypeSig) {
        match sig {
            TypeSig::Named(name) => {
                self.types.insert(name.clone());
            }
            TypeSig::Generic { base, args } => {
                self.types.insert(base.clone());
                for arg in args {
                    self.visit_sig(arg);
                }
            }
            TypeSig::ByRef(inner) | TypeSig::Array(inner) => self.visit_sig(inner),
            TypeSig::GenericParam(_) => {}
        }
    }

    /// Record a method reference and its signature
    pub fn visit_method_ref(&mut self, method: &MethodRef) {
        self.visit_sig(&method.declaring);
        self.visit_sig(&method.return_type);
        for param in &method.params {
            self.visit_sig(param);
        }
        for arg in &method.generic_args {
            self.visit_sig(arg);
        }
        self.methods.insert(method.clone());
    }

    /// Record a field reference and its signature
    pub fn visit_field_ref(&mut self, field: &FieldRef) {
        self.visit_sig(&field.declaring);
        self.visit_sig(&field.field_type);
        self.fields.insert(field.clone());
    }

    /// Record a custom attribute
    pub fn visit_attribute(&mut self, attr: &CustomAttribute) {
        self.visit_method_ref(&attr.ctor);
        let args = attr.args.iter().chain(attr.named.iter().map(|named| &named.value));
        for arg in args {
            if let AttrArg::Type(sig) = arg {
                self.visit_sig(sig);
            }
        }
    }

    fn visit_attributes(&mut self, attrs: &[CustomAttribute]) {
        for attr in attrs {
            self.visit_attribute(attr);
        }
    }

    /// Record a generic parameter's constraints
    pub fn visit_generic_param(&mut self, param: &GenericParamDef) {
        for constraint in &param.constraints {
            self.visit_sig(constraint);
        }
        self.visit_attributes(&param.attributes);
    }

    /// Record a method body
    pub fn visit_body(&mut self, body: &MethodBody) {
        for local in &body.locals {
            self.visit_sig(local);
        }
        for instr in &body.instructions {
            match &instr.operand {
                Operand::Type(sig) => self.visit_sig(sig),
                Operand::Field(field) => self.visit_field_ref(field),
                Operand::Method(method) => self.visit_method_ref(method),
                _ => {}
            }
        }
        for handler in &body.handlers {
            if let HandlerKind::Catch(sig) = &handler.kind {
                self.visit_sig(sig);
            }
        }
    }

    /// Record a field definition
    pub fn visit_field(&mut self, field: &FieldDef) {
        self.visit_sig(&field.field_type);
        self.visit_attributes(&field.attributes);
    }

    /// Record a method definition, body included
    pub fn visit_method(&mut self, method: &MethodDef) {
        self.visit_sig(&method.return_type);
        for param in &method.params {
            self.visit_sig(&param.param_type);
            self.visit_attributes(&param.attributes);
        }
        for generic in &method.generic_params {
            self.visit_generic_param(generic);
        }
        for overridden in &method.overrides {
            self.visit_method_ref(overridden);
        }
        if let Some(body) = &method.body {
            self.visit_body(body);
        }
        self.visit_attributes(&method.attributes);
    }

    /// Record a property definition
    pub fn visit_property(&mut self, property: &PropertyDef) {
        self.visit_sig(&property.property_type);
        for param in &property.params {
            self.visit_sig(param);
        }
        self.visit_attributes(&property.attributes);
    }

    /// Record an event definition
    pub fn visit_event(&mut self, event: &EventDef) {
        self.visit_sig(&event.event_type);
        self.visit_attributes(&event.attributes);
    }

    /// Record a type definition, members and nested types included
    pub fn visit_type(&mut self, ty: &TypeDef) {
        for generic in &ty.generic_params {
            self.visit_generic_param(generic);
        }
        if let Some(base) = &ty.base {
            self.visit_sig(base);
        }
        for interface in &ty.interfaces {
            self.visit_sig(&interface.interface);
            self.visit_attributes(&interface.attributes);
        }
        for field in &ty.fields {
            self.visit_field(field);
        }
        for method in &ty.methods {
            self.visit_method(method);
        }
        for property in &ty.properties {
            self.visit_property(property);
        }
        for event in &ty.events {
            self.visit_event(event);
        }
        self.visit_attributes(&ty.attributes);
        for nested in &ty.nested {
            self.visit_type(nested);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Instruction;
    use crate::definition::ParamDef;

    #[test]
    fn test_collects_body_references() {
        let helper = TypeName::new("Lib", "Lib", "Helper");
        let call = MethodRef {
            declaring: TypeSig::Named(helper.clone()),
            name: "Run".to_string(),
            has_this: false,
            return_type: TypeSig::void(),
            params: vec![TypeSig::string()],
            generic_arity: 0,
            generic_args: Vec::new(),
        };
        let body = MethodBody::new(vec![
            Instruction::ldstr("x"),
            Instruction::call(call.clone()),
            Instruction::ret(),
        ]);
        let method = MethodDef::new(
            "Go",
            0,
            TypeSig::void(),
            vec![ParamDef::new("n", TypeSig::int32())],
        )
        .with_body(body);

        let mut collector = ReferenceCollector::new();
        collector.visit_method(&method);
        assert!(collector.types.contains(&helper));
        assert!(collector.types.contains(&TypeName::system("Int32")));
        assert!(collector.methods.contains(&call));
        assert!(collector.scopes().contains("Lib"));
    }

    #[test]
    fn test_generic_params_are_not_types() {
        let mut collector = ReferenceCollector::new();
        collector.visit_sig(&TypeSig::Array(Box::new(TypeSig::type_param(0, "T"))));
        assert!(collector.types.is_empty());
    }
}
