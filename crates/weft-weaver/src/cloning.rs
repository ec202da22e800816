//! Metadata cloning
//!
//! Deep copies of advice elements for a target module. Every embedded
//! reference goes through a [`ReferenceResolver`]; a clone is assembled
//! completely (nested types and members included) before the caller attaches
//! it to a parent, so no container ever holds a half-built element.

use weft_metadata::{
    AttrArg, CustomAttribute, EventDef, ExceptionHandler, FieldDef, FieldRef, GenericParamDef,
    HandlerKind, Instruction, InterfaceImpl, MethodBody, MethodDef, MethodRef, NamedArg, Opcode,
    Operand, ParamDef, PropertyDef, SecurityDecl, TypeDef, TypeSig,
};

use crate::error::WeaveError;
use crate::generics::GenericResolutionContext;
use crate::resolve::{ResolveError, ResolvedCall};
use crate::wellknown::is_authoring_marker;

/// Maps advice-side references to target-side references
pub trait ReferenceResolver {
    /// Resolve a type signature
    fn resolve_type(&mut self, sig: &TypeSig) -> Result<TypeSig, ResolveError>;

    /// Resolve a field reference
    fn resolve_field(&mut self, field: &FieldRef) -> Result<FieldRef, ResolveError>;

    /// Resolve a method reference used at a call site
    fn resolve_call(&mut self, method: &MethodRef) -> Result<ResolvedCall, ResolveError>;

    /// Resolve a method reference outside a call site
    fn resolve_method(&mut self, method: &MethodRef) -> Result<MethodRef, ResolveError> {
        match self.resolve_call(method)? {
            ResolvedCall::Method(target) => Ok(target),
            ResolvedCall::Delegate { field, .. } => Err(WeaveError::ModifierIncompatible {
                element: method.to_string(),
                reason: format!("resolves to delegate field '{}' and cannot be referenced here", field),
            }
            .into()),
        }
    }

    /// Install the pairing used for method-owned generic parameters,
    /// returning the previous one
    fn set_method_context(
        &mut self,
        context: Option<GenericResolutionContext>,
    ) -> Option<GenericResolutionContext>;
}

fn types<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    sigs: &[TypeSig],
) -> Result<Vec<TypeSig>, ResolveError> {
    sigs.iter().map(|sig| resolver.resolve_type(sig)).collect()
}

// ============================================================================
// Attributes and small elements
// ============================================================================

fn clone_attr_arg<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    arg: &AttrArg,
) -> Result<AttrArg, ResolveError> {
    Ok(match arg {
        AttrArg::Type(sig) => AttrArg::Type(resolver.resolve_type(sig)?),
        other => other.clone(),
    })
}

/// Clone a custom attribute
pub fn clone_attribute<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    attr: &CustomAttribute,
) -> Result<CustomAttribute, ResolveError> {
    Ok(CustomAttribute {
        ctor: resolver.resolve_method(&attr.ctor)?,
        args: attr
            .args
            .iter()
            .map(|arg| clone_attr_arg(resolver, arg))
            .collect::<Result<_, _>>()?,
        named: attr
            .named
            .iter()
            .map(|named| {
                Ok(NamedArg {
                    name: named.name.clone(),
                    value: clone_attr_arg(resolver, &named.value)?,
                })
            })
            .collect::<Result<_, ResolveError>>()?,
    })
}

/// Clone attributes, dropping authoring-time markers
pub fn clone_attributes<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    attrs: &[CustomAttribute],
) -> Result<Vec<CustomAttribute>, ResolveError> {
    attrs
        .iter()
        .filter(|attr| !is_authoring_marker(attr))
        .map(|attr| clone_attribute(resolver, attr))
        .collect()
}

/// Security declarations carry no references
pub fn clone_security(security: &[SecurityDecl]) -> Vec<SecurityDecl> {
    security.to_vec()
}

/// Clone a generic parameter declaration
pub fn clone_generic_param<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    param: &GenericParamDef,
) -> Result<GenericParamDef, ResolveError> {
    Ok(GenericParamDef {
        name: param.name.clone(),
        position: param.position,
        owner: param.owner,
        constraints: types(resolver, &param.constraints)?,
        flags: param.flags,
        attributes: clone_attributes(resolver, &param.attributes)?,
    })
}

/// Clone an interface implementation entry
pub fn clone_interface<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    entry: &InterfaceImpl,
) -> Result<InterfaceImpl, ResolveError> {
    Ok(InterfaceImpl {
        interface: resolver.resolve_type(&entry.interface)?,
        attributes: clone_attributes(resolver, &entry.attributes)?,
    })
}

// ============================================================================
// Members
// ============================================================================

/// Clone a field definition
pub fn clone_field<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    field: &FieldDef,
) -> Result<FieldDef, ResolveError> {
    Ok(FieldDef {
        name: field.name.clone(),
        flags: field.flags,
        field_type: resolver.resolve_type(&field.field_type)?,
        constant: field.constant.clone(),
        attributes: clone_attributes(resolver, &field.attributes)?,
    })
}

/// Clone a property definition; accessors are referenced by name
pub fn clone_property<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    property: &PropertyDef,
) -> Result<PropertyDef, ResolveError> {
    Ok(PropertyDef {
        name: property.name.clone(),
        flags: property.flags,
        property_type: resolver.resolve_type(&property.property_type)?,
        params: types(resolver, &property.params)?,
        getter: property.getter.clone(),
        setter: property.setter.clone(),
        attributes: clone_attributes(resolver, &property.attributes)?,
    })
}

/// Clone an event definition; accessors are referenced by name
pub fn clone_event<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    event: &EventDef,
) -> Result<EventDef, ResolveError> {
    Ok(EventDef {
        name: event.name.clone(),
        flags: event.flags,
        event_type: resolver.resolve_type(&event.event_type)?,
        adder: event.adder.clone(),
        remover: event.remover.clone(),
        attributes: clone_attributes(resolver, &event.attributes)?,
    })
}

/// Pairing of a method with its own copy, for signature and body cloning
pub fn self_context(method: &MethodDef, declaring: TypeSig) -> GenericResolutionContext {
    let source = method.to_ref(declaring);
    GenericResolutionContext::new(source.clone(), source)
}

fn with_context<R: ReferenceResolver + ?Sized, T>(
    resolver: &mut R,
    context: GenericResolutionContext,
    run: impl FnOnce(&mut R) -> Result<T, ResolveError>,
) -> Result<T, ResolveError> {
    let previous = resolver.set_method_context(Some(context));
    let result = run(resolver);
    resolver.set_method_context(previous);
    result
}

/// Clone a method's signature, generic parameters and attributes; the body
/// is left out
pub fn clone_method_signature<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    method: &MethodDef,
    context: GenericResolutionContext,
) -> Result<MethodDef, ResolveError> {
    with_context(resolver, context, |resolver| {
        Ok(MethodDef {
            name: method.name.clone(),
            flags: method.flags,
            return_type: resolver.resolve_type(&method.return_type)?,
            params: method
                .params
                .iter()
                .map(|param| {
                    Ok(ParamDef {
                        name: param.name.clone(),
                        param_type: resolver.resolve_type(&param.param_type)?,
                        attributes: clone_attributes(resolver, &param.attributes)?,
                    })
                })
                .collect::<Result<_, ResolveError>>()?,
            generic_params: method
                .generic_params
                .iter()
                .map(|param| clone_generic_param(resolver, param))
                .collect::<Result<_, _>>()?,
            overrides: method
                .overrides
                .iter()
                .map(|overridden| resolver.resolve_method(overridden))
                .collect::<Result<_, _>>()?,
            body: None,
            attributes: clone_attributes(resolver, &method.attributes)?,
            security: clone_security(&method.security),
        })
    })
}

// ============================================================================
// Bodies
// ============================================================================

fn expand_delegate_call(
    out: &mut Vec<Instruction>,
    locals: &mut Vec<TypeSig>,
    method: &MethodRef,
    params: Vec<TypeSig>,
    field: FieldRef,
    invoke: MethodRef,
    field_is_static: bool,
) {
    let spilled: Vec<u16> = params
        .into_iter()
        .map(|param| {
            locals.push(param);
            (locals.len() - 1) as u16
        })
        .collect();
    for local in spilled.iter().rev() {
        out.push(Instruction::stloc(*local));
    }
    match (field_is_static, method.has_this) {
        (true, true) => {
            out.push(Instruction::simple(Opcode::Pop));
            out.push(Instruction::new(Opcode::Ldsfld, Operand::Field(field)));
        }
        (true, false) => out.push(Instruction::new(Opcode::Ldsfld, Operand::Field(field))),
        (false, true) => out.push(Instruction::ldfld(field)),
        (false, false) => {
            out.push(Instruction::ldarg(0));
            out.push(Instruction::ldfld(field));
        }
    }
    for local in &spilled {
        out.push(Instruction::ldloc(*local));
    }
    out.push(Instruction::callvirt(invoke));
}

/// Clone a method body
///
/// Branch operands and handler bounds are relocated through an old to new
/// index map, since delegate-field calls expand to several instructions.
/// `static_fields` tells whether a resolved delegate field is static.
pub fn clone_body<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    body: &MethodBody,
    context: GenericResolutionContext,
    static_fields: &dyn Fn(&FieldRef) -> bool,
) -> Result<MethodBody, ResolveError> {
    with_context(resolver, context, |resolver| {
        let mut locals = types(resolver, &body.locals)?;
        let mut out = Vec::with_capacity(body.instructions.len());
        let mut index_map = Vec::with_capacity(body.instructions.len() + 1);

        for instr in &body.instructions {
            index_map.push(out.len() as u32);
            let operand = match &instr.operand {
                Operand::Type(sig) => Operand::Type(resolver.resolve_type(sig)?),
                Operand::Field(field) => Operand::Field(resolver.resolve_field(field)?),
                Operand::Method(method) => match resolver.resolve_call(method)? {
                    ResolvedCall::Method(target) => Operand::Method(target),
                    ResolvedCall::Delegate { field, invoke } => {
                        if !matches!(instr.opcode, Opcode::Call | Opcode::Callvirt) {
                            return Err(WeaveError::ModifierIncompatible {
                                element: method.to_string(),
                                reason: format!(
                                    "resolves to delegate field '{}' and cannot be used with {:?}",
                                    field, instr.opcode
                                ),
                            }
                            .into());
                        }
                        let params = types(resolver, &invoke.params)?;
                        let is_static = static_fields(&field);
                        expand_delegate_call(&mut out, &mut locals, method, params, field, invoke, is_static);
                        continue;
                    }
                },
                other => other.clone(),
            };
            out.push(Instruction::new(instr.opcode, operand));
        }
        index_map.push(out.len() as u32);

        let end = out.len() as u32;
        let relocate = |target: u32| index_map.get(target as usize).copied().unwrap_or(end);
        for instr in &mut out {
            match &mut instr.operand {
                Operand::Branch(target) => *target = relocate(*target),
                Operand::Switch(targets) => {
                    for target in targets.iter_mut() {
                        *target = relocate(*target);
                    }
                }
                _ => {}
            }
        }

        let handlers = body
            .handlers
            .iter()
            .map(|handler| {
                Ok(ExceptionHandler {
                    kind: match &handler.kind {
                        HandlerKind::Catch(sig) => HandlerKind::Catch(resolver.resolve_type(sig)?),
                        HandlerKind::Finally => HandlerKind::Finally,
                    },
                    try_start: relocate(handler.try_start),
                    try_end: relocate(handler.try_end),
                    handler_start: relocate(handler.handler_start),
                    handler_end: relocate(handler.handler_end),
                })
            })
            .collect::<Result<_, ResolveError>>()?;

        Ok(MethodBody {
            max_stack: body.max_stack,
            init_locals: body.init_locals,
            locals,
            instructions: out,
            handlers,
        })
    })
}

// ============================================================================
// Types
// ============================================================================

/// Clone a type and its nested types without method bodies
///
/// `keep_nested` filters nested types; the clone is assembled bottom-up and
/// returned detached.
pub fn clone_type_skeleton<R: ReferenceResolver + ?Sized>(
    resolver: &mut R,
    ty: &TypeDef,
    self_sig: TypeSig,
    namespace: &str,
    name: &str,
    keep_nested: &dyn Fn(&TypeDef) -> bool,
) -> Result<TypeDef, ResolveError> {
    let generic_params = ty
        .generic_params
        .iter()
        .map(|param| clone_generic_param(resolver, param))
        .collect::<Result<_, _>>()?;
    let base = ty.base.as_ref().map(|base| resolver.resolve_type(base)).transpose()?;
    let interfaces = ty
        .interfaces
        .iter()
        .map(|entry| clone_interface(resolver, entry))
        .collect::<Result<_, _>>()?;
    let fields = ty
        .fields
        .iter()
        .map(|field| clone_field(resolver, field))
        .collect::<Result<_, _>>()?;
    let methods = ty
        .methods
        .iter()
        .map(|method| {
            let context = self_context(method, self_sig.clone());
            clone_method_signature(resolver, method, context)
        })
        .collect::<Result<_, _>>()?;
    let properties = ty
        .properties
        .iter()
        .map(|property| clone_property(resolver, property))
        .collect::<Result<_, _>>()?;
    let events = ty
        .events
        .iter()
        .map(|event| clone_event(resolver, event))
        .collect::<Result<_, _>>()?;
    let attributes = clone_attributes(resolver, &ty.attributes)?;

    let mut nested = Vec::new();
    for inner in ty.nested.iter().filter(|inner| keep_nested(inner)) {
        let inner_sig = match self_sig.type_name() {
            Some(outer) => inner.self_sig(&outer.nested(inner.name.clone())),
            None => continue,
        };
        nested.push(clone_type_skeleton(resolver, inner, inner_sig, "", &inner.name, keep_nested)?);
    }

    Ok(TypeDef {
        namespace: namespace.to_string(),
        name: name.to_string(),
        flags: ty.flags,
        generic_params,
        base,
        interfaces,
        fields,
        methods,
        properties,
        events,
        attributes,
        security: clone_security(&ty.security),
        nested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_metadata::{member_flags, TypeName};

    /// Renames scope `Aspects` to `App` and resolves `Aspects.Notify` to a
    /// delegate field
    struct Renamer {
        context: Option<GenericResolutionContext>,
    }

    impl Renamer {
        fn new() -> Self {
            Self { context: None }
        }

        fn rename(sig: &TypeSig) -> TypeSig {
            match sig {
                TypeSig::Named(name) if name.scope == "Aspects" => TypeSig::Named(name.with_scope("App")),
                TypeSig::Array(inner) => TypeSig::Array(Box::new(Self::rename(inner))),
                other => other.clone(),
            }
        }
    }

    impl ReferenceResolver for Renamer {
        fn resolve_type(&mut self, sig: &TypeSig) -> Result<TypeSig, ResolveError> {
            if let TypeSig::GenericParam(param) = sig {
                if param.owner == weft_metadata::GenericOwner::Method && self.context.is_none() {
                    return Err(crate::error::Fault::UnpairedMethodGeneric {
                        position: param.position,
                        context: "test".to_string(),
                    }
                    .into());
                }
            }
            Ok(Self::rename(sig))
        }

        fn resolve_field(&mut self, field: &FieldRef) -> Result<FieldRef, ResolveError> {
            Ok(FieldRef {
                declaring: Self::rename(&field.declaring),
                name: field.name.clone(),
                field_type: Self::rename(&field.field_type),
            })
        }

        fn resolve_call(&mut self, method: &MethodRef) -> Result<ResolvedCall, ResolveError> {
            if method.name == "Notify" {
                return Ok(ResolvedCall::Delegate {
                    field: FieldRef {
                        declaring: TypeSig::Named(TypeName::new("App", "App", "Order")),
                        name: "notify".to_string(),
                        field_type: TypeSig::Named(TypeName::new("App", "App", "Handler")),
                    },
                    invoke: MethodRef {
                        declaring: TypeSig::Named(TypeName::new("App", "App", "Handler")),
                        name: "Invoke".to_string(),
                        has_this: true,
                        return_type: TypeSig::void(),
                        params: vec![TypeSig::int32(), TypeSig::string()],
                        generic_arity: 0,
                        generic_args: Vec::new(),
                    },
                });
            }
            Ok(ResolvedCall::Method(MethodRef {
                declaring: Self::rename(&method.declaring),
                ..method.clone()
            }))
        }

        fn set_method_context(
            &mut self,
            context: Option<GenericResolutionContext>,
        ) -> Option<GenericResolutionContext> {
            std::mem::replace(&mut self.context, context)
        }
    }

    fn notify_ref() -> MethodRef {
        MethodRef {
            declaring: TypeSig::Named(TypeName::new("Aspects", "Aspects", "Order")),
            name: "Notify".to_string(),
            has_this: true,
            return_type: TypeSig::void(),
            params: vec![TypeSig::int32(), TypeSig::string()],
            generic_arity: 0,
            generic_args: Vec::new(),
        }
    }

    fn advice_sig() -> TypeSig {
        TypeSig::Named(TypeName::new("Aspects", "Aspects", "Audit"))
    }

    #[test]
    fn test_delegate_call_expansion_relocates_branches() {
        // 0: ldarg.0; 1: ldc 1; 2: ldstr; 3: call Notify; 4: br 5; 5: ret
        let body = MethodBody::new(vec![
            Instruction::ldarg(0),
            Instruction::ldc_i4(1),
            Instruction::ldstr("x"),
            Instruction::call(notify_ref()),
            Instruction::branch(Opcode::Br, 5),
            Instruction::ret(),
        ]);
        let method = MethodDef::new("Run", 0, TypeSig::void(), Vec::new());
        let mut resolver = Renamer::new();
        let cloned = clone_body(&mut resolver, &body, self_context(&method, advice_sig()), &|_| false)
            .unwrap();
        // stloc 1, stloc 0, ldfld, ldloc 0, ldloc 1, callvirt
        assert_eq!(cloned.instructions.len(), 5 + 6);
        assert_eq!(cloned.locals, vec![TypeSig::int32(), TypeSig::string()]);
        assert_eq!(cloned.instructions[3], Instruction::stloc(1));
        assert_eq!(cloned.instructions[4], Instruction::stloc(0));
        assert_eq!(cloned.instructions[5].opcode, Opcode::Ldfld);
        assert_eq!(cloned.instructions[8].opcode, Opcode::Callvirt);
        assert_eq!(cloned.instructions[9].operand, Operand::Branch(10));
        assert!(resolver.context.is_none());
    }

    #[test]
    fn test_delegate_field_cannot_be_loaded_as_function() {
        let body = MethodBody::new(vec![
            Instruction::new(Opcode::Ldftn, Operand::Method(notify_ref())),
            Instruction::ret(),
        ]);
        let method = MethodDef::new("Run", 0, TypeSig::void(), Vec::new());
        let result = clone_body(&mut Renamer::new(), &body, self_context(&method, advice_sig()), &|_| false);
        assert!(matches!(
            result,
            Err(ResolveError::Diagnostic(WeaveError::ModifierIncompatible { .. }))
        ));
    }

    #[test]
    fn test_skeleton_drops_bodies_and_markers() {
        let mut ty = TypeDef::new("Aspects", "Audit", 0);
        ty.fields.push(FieldDef::new(
            "log",
            member_flags::PRIVATE,
            TypeSig::Named(TypeName::new("Aspects", "Aspects", "Log")),
        ));
        ty.methods.push(
            MethodDef::new("Run", 0, TypeSig::void(), Vec::new())
                .with_body(MethodBody::new(vec![Instruction::ret()])),
        );
        ty.attributes.push(CustomAttribute::with_strings(
            TypeName::parse("Weft", "Weft.PrototypeTypeAttribute"),
            &[],
        ));
        ty.nested.push(TypeDef::new("", "Inner", 0));
        let sig = TypeSig::Named(TypeName::new("App", "App", "Audit"));
        let clone = clone_type_skeleton(&mut Renamer::new(), &ty, sig, "App", "Audit", &|_| true).unwrap();
        assert_eq!(clone.namespace, "App");
        assert!(clone.methods[0].body.is_none());
        assert!(clone.attributes.is_empty());
        assert_eq!(clone.fields[0].field_type.type_name().map(|name| name.scope.as_str()), Some("App"));
        assert_eq!(clone.nested.len(), 1);
        assert_eq!(clone.nested[0].namespace, "");
    }

    #[test]
    fn test_method_generics_resolve_inside_context_only() {
        let mut method = MethodDef::new("Echo", 0, TypeSig::method_param(0, "T"), Vec::new());
        method.generic_params.push(GenericParamDef::new(
            "T",
            0,
            weft_metadata::GenericOwner::Method,
        ));
        let mut resolver = Renamer::new();
        let context = self_context(&method, advice_sig());
        let clone = clone_method_signature(&mut resolver, &method, context).unwrap();
        assert_eq!(clone.return_type, TypeSig::method_param(0, "T"));
        assert!(resolver.resolve_type(&TypeSig::method_param(0, "T")).is_err());
    }
}
