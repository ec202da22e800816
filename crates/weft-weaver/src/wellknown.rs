//! Well-known attributes
//!
//! Authoring-time markers placed on advice elements, and the provenance
//! marker the weaver places on woven elements. Markers are matched by full
//! name; the module defining them does not matter.

use weft_metadata::{
    AttrArg, CustomAttribute, GenericParamDef, HasAttributes, TypeDef, TypeName, SYSTEM_SCOPE,
};

use crate::mapping::LookupPolicy;

/// Namespace of the authoring-time markers
pub const MARKER_NAMESPACE: &str = "Weft";

/// Placeholder type marker
pub const PROTOTYPE_TYPE: &str = "Weft.PrototypeTypeAttribute";

/// Placeholder member marker
pub const PROTOTYPE_ITEM: &str = "Weft.PrototypeItemAttribute";

/// Placeholder generic parameter marker
pub const PROTOTYPE_GENERIC: &str = "Weft.PrototypeGenericAttribute";

/// Provenance marker
pub const WOVEN_BY: &str = "Weft.Runtime.WovenByAttribute";

/// How a placeholder type finds its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrototypeBinding {
    /// By full name across the target modules
    Name,
    /// The join point's declaring type
    Joinpoint,
    /// By name inside the join point's namespace
    Relative,
}

/// Parsed placeholder type marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrototypeTypeInfo {
    /// Target full name; the placeholder's own name when absent
    pub target: Option<String>,
    /// Binding mode
    pub binding: PrototypeBinding,
}

/// How a placeholder generic parameter finds its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericMode {
    /// Target parameter with the same name
    Name,
    /// Target parameter at the same position
    Index,
}

fn is_named(attr: &CustomAttribute, full_name: &str) -> bool {
    attr.attribute_type()
        .map(|name| name.full_name() == full_name)
        .unwrap_or(false)
}

fn find<'a>(attrs: &'a [CustomAttribute], full_name: &str) -> Option<&'a CustomAttribute> {
    attrs.iter().find(|attr| is_named(attr, full_name))
}

fn string_value<'a>(attr: &'a CustomAttribute, index: usize, name: &str) -> Option<&'a str> {
    attr.string_arg(index)
        .or_else(|| attr.named_arg(name).and_then(AttrArg::as_str))
}

/// Placeholder marker of a type, if any
pub fn prototype_type_info(ty: &TypeDef) -> Option<PrototypeTypeInfo> {
    let attr = find(ty.attributes(), PROTOTYPE_TYPE)?;
    let target = string_value(attr, 0, "Target")
        .filter(|target| !target.is_empty())
        .map(str::to_string);
    let binding = match string_value(attr, 1, "Binding") {
        Some("joinpoint") => PrototypeBinding::Joinpoint,
        Some("relative") => PrototypeBinding::Relative,
        _ => PrototypeBinding::Name,
    };
    Some(PrototypeTypeInfo { target, binding })
}

/// Lookup policy of a placeholder member marker, if any
pub fn prototype_item_policy(attrs: &[CustomAttribute]) -> Option<LookupPolicy> {
    let attr = find(attrs, PROTOTYPE_ITEM)?;
    Some(match string_value(attr, 0, "Policy") {
        Some("this") => LookupPolicy::This,
        Some("base") => LookupPolicy::Base,
        _ => LookupPolicy::Anywhere,
    })
}

/// Lookup mode of a generic parameter (name unless marked `index`)
pub fn generic_mode(param: &GenericParamDef) -> GenericMode {
    match find(param.attributes(), PROTOTYPE_GENERIC).and_then(|attr| string_value(attr, 0, "Mode")) {
        Some("index") => GenericMode::Index,
        _ => GenericMode::Name,
    }
}

/// Whether a generic parameter carries a placeholder marker
pub fn is_prototype_generic(param: &GenericParamDef) -> bool {
    find(param.attributes(), PROTOTYPE_GENERIC).is_some()
}

/// Whether an attribute is an authoring-time marker that must not be woven
pub fn is_authoring_marker(attr: &CustomAttribute) -> bool {
    [PROTOTYPE_TYPE, PROTOTYPE_ITEM, PROTOTYPE_GENERIC]
        .iter()
        .any(|name| is_named(attr, name))
}

/// Whether an attribute is a provenance marker
pub fn is_provenance_marker(attr: &CustomAttribute) -> bool {
    is_named(attr, WOVEN_BY)
}

/// Type of the provenance marker
pub fn woven_by_type() -> TypeName {
    TypeName::new(SYSTEM_SCOPE, "Weft.Runtime", "WovenByAttribute")
}

/// Build a provenance marker
pub fn woven_by(advice: &str, repository: &str, timestamp: &str) -> CustomAttribute {
    CustomAttribute::with_strings(woven_by_type(), &[advice, repository, timestamp])
}

/// Whether the attributes carry a provenance marker for `advice`
pub fn is_woven_by(attrs: &[CustomAttribute], advice: &str) -> bool {
    attrs
        .iter()
        .any(|attr| is_named(attr, WOVEN_BY) && attr.string_arg(0) == Some(advice))
}
