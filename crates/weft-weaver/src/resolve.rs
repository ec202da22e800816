//! Reference resolution
//!
//! Advice is written against advice-module elements: the advice type
//! itself, placeholder types and members, compiler-generated helpers and
//! types introduced by other aspects. [`ItemResolver`] turns every such
//! reference into the target-module element it stands for, trying the
//! rules listed by [`rules`] for the item's aspect kind and the reference
//! kind, in order.

use std::collections::{BTreeMap, BTreeSet};

use weft_metadata::{FieldRef, GenericOwner, MethodRef, TypeName, TypeSig};

use crate::aspect::AspectKind;
use crate::auxiliary::{compiler_generated_root, Auxiliaries};
use crate::cloning::ReferenceResolver;
use crate::error::{Fault, WeaveError};
use crate::generics::{GenericResolutionContext, TypedScope};
use crate::item::{ItemId, ResolutionCache, WeaveItem};
use crate::mapping::{PrototypeTypeMappings, ResolvedMember};
use crate::view::WovenView;

/// Why a reference could not be resolved
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// User error; the item fails
    Diagnostic(WeaveError),
    /// Internal fault; weaving aborts
    Fault(Fault),
}

impl From<WeaveError> for ResolveError {
    fn from(error: WeaveError) -> Self {
        ResolveError::Diagnostic(error)
    }
}

impl From<Fault> for ResolveError {
    fn from(fault: Fault) -> Self {
        ResolveError::Fault(fault)
    }
}

/// Target of a method reference
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedCall {
    /// A method
    Method(MethodRef),
    /// A delegate field invoked in place of a placeholder method
    Delegate {
        /// The field
        field: FieldRef,
        /// `Invoke` of its delegate type
        invoke: MethodRef,
    },
}

// ============================================================================
// Rule table
// ============================================================================

/// Kind of reference being resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Type reference
    Type,
    /// Field reference
    Field,
    /// Method reference
    Method,
}

/// One resolution rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    /// Placeholder member mapping for this exact member
    ExplicitMapping,
    /// The advice type stands for the join point type (or, for type
    /// introductions, for the introduced type)
    AdviceIdentity,
    /// Type introduced by another item into the same module
    NewTypeIntroduction,
    /// Shared compiler-generated auxiliary type
    CompilerGenerated,
    /// Placeholder member mapping reached through a generic instance of
    /// the declaring placeholder type
    MappingByDeclaring,
    /// Placeholder type mapping, nested types re-derived
    PrototypeType,
    /// Structural copy of the reference
    Import,
}

const TYPE_RULES: &[Rule] = &[
    Rule::AdviceIdentity,
    Rule::NewTypeIntroduction,
    Rule::CompilerGenerated,
    Rule::PrototypeType,
    Rule::Import,
];

const TYPE_RULES_NO_IDENTITY: &[Rule] = &[
    Rule::NewTypeIntroduction,
    Rule::CompilerGenerated,
    Rule::PrototypeType,
    Rule::Import,
];

const INLINED_MEMBER_RULES: &[Rule] = &[
    Rule::ExplicitMapping,
    Rule::MappingByDeclaring,
    Rule::AdviceIdentity,
    Rule::Import,
];

const MEMBER_RULES: &[Rule] = &[Rule::ExplicitMapping, Rule::MappingByDeclaring, Rule::Import];

/// Rules tried, in order, for a reference kind under an aspect kind
///
/// Member rules resolve the declaring type and signature through the type
/// rules when they reach [`Rule::Import`].
pub fn rules(kind: AspectKind, reference: RefKind) -> &'static [Rule] {
    match (kind, reference) {
        (AspectKind::Attributes, RefKind::Type) => TYPE_RULES_NO_IDENTITY,
        (_, RefKind::Type) => TYPE_RULES,
        (AspectKind::Code | AspectKind::ChangeValue, _) => INLINED_MEMBER_RULES,
        _ => MEMBER_RULES,
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// Types introduced by live items, by advice type
#[derive(Debug, Clone, Default)]
pub struct Introductions {
    by_source: BTreeMap<TypeName, Vec<(ItemId, TypeName)>>,
    targets: BTreeMap<TypeName, ItemId>,
}

impl Introductions {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `item` introduces `source` as `target`
    pub fn add(&mut self, source: TypeName, item: ItemId, target: TypeName) {
        self.targets.entry(target.clone()).or_insert(item);
        self.by_source.entry(source).or_default().push((item, target));
    }

    /// Introductions of `source` into `module`, other than by `except`
    pub fn candidates(&self, source: &TypeName, module: &str, except: ItemId) -> Vec<(ItemId, TypeName)> {
        self.by_source
            .get(source)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(item, target)| *item != except && target.scope == module)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether some live item introduces a type with this name
    pub fn introduces(&self, target: &TypeName) -> bool {
        self.targets.contains_key(target)
    }

    /// Item introducing `target` or one of its enclosing types
    pub fn introducer(&self, target: &TypeName) -> Option<ItemId> {
        target
            .ancestors()
            .iter()
            .find_map(|ancestor| self.targets.get(ancestor).copied())
    }

    /// Whether nothing is introduced
    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

/// Everything resolution reads besides the item itself
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    /// Loaded modules plus live contributions
    pub view: WovenView<'a>,
    /// Name of the advice module
    pub advice_module: &'a str,
    /// Name-bound placeholder types
    pub prototypes: &'a PrototypeTypeMappings,
    /// Types introduced by live items
    pub introductions: &'a Introductions,
    /// Shared compiler-generated types
    pub auxiliaries: &'a Auxiliaries,
}

/// How generic parameters are treated while resolving a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamMode {
    /// Parameters of the element being cloned: type parameters through the
    /// item's advice-type mapping, method parameters through the method
    /// pairing
    Context,
    /// Parameters inside a member reference signature, which belong to the
    /// referenced member's declaring type and method
    Signature {
        /// The declaring type is the advice type
        advice_declared: bool,
    },
}

// ============================================================================
// Item resolver
// ============================================================================

/// Resolves references on behalf of one weave item
pub struct ItemResolver<'a> {
    ctx: ResolveContext<'a>,
    item: &'a WeaveItem,
    cache: ResolutionCache,
    generics: Option<GenericResolutionContext>,
    needs: BTreeSet<ItemId>,
}

impl<'a> ItemResolver<'a> {
    /// Resolver for `item`, seeded with its memoized resolutions
    pub fn new(ctx: ResolveContext<'a>, item: &'a WeaveItem, cache: ResolutionCache) -> Self {
        Self {
            ctx,
            item,
            cache,
            generics: None,
            needs: BTreeSet::new(),
        }
    }

    /// Memoized resolutions and the items whose introductions were used
    pub fn finish(self) -> (ResolutionCache, BTreeSet<ItemId>) {
        (self.cache, self.needs)
    }

    /// Items whose introductions were used so far
    pub fn needs(&self) -> &BTreeSet<ItemId> {
        &self.needs
    }

    /// Record that this item consumes output of `provider`
    pub fn depend_on(&mut self, provider: ItemId) {
        if provider != self.item.id {
            self.needs.insert(provider);
        }
    }

    /// Record the items a scope chain was built from: contributed base and
    /// interface edges and introduced types
    pub fn depend_on_scope(&mut self, scope: &TypedScope) {
        let mut current = Some(scope);
        while let Some(level) = current {
            if let Some(provider) = level.via {
                self.depend_on(provider);
            }
            if let Some(provider) = self.ctx.introductions.introducer(&level.ty) {
                self.depend_on(provider);
            }
            current = level.parent.as_deref();
        }
    }

    /// Types as seen by this resolver
    pub fn view(&self) -> WovenView<'a> {
        self.ctx.view
    }

    fn describe_item(&self) -> String {
        format!(
            "{} at {}",
            self.item.aspect_name,
            self.item.joinpoint.describe(self.ctx.view.set())
        )
    }

    // ------------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------------

    /// Resolve a type definition name
    pub fn resolve_name(&mut self, name: &TypeName) -> Result<TypeName, ResolveError> {
        if name.scope != self.ctx.advice_module {
            return Ok(name.clone());
        }
        for rule in rules(self.item.kind, RefKind::Type) {
            let resolved = match rule {
                Rule::AdviceIdentity => self.advice_identity(name),
                Rule::NewTypeIntroduction => self.introduced(name)?,
                Rule::CompilerGenerated => self.auxiliary(name),
                Rule::PrototypeType => self.prototype(name)?,
                Rule::Import => Some(name.clone()),
                Rule::ExplicitMapping | Rule::MappingByDeclaring => None,
            };
            if let Some(resolved) = resolved {
                return Ok(resolved);
            }
        }
        Ok(name.clone())
    }

    fn advice_identity(&self, name: &TypeName) -> Option<TypeName> {
        if self.item.kind == AspectKind::Types {
            return self.item.contributions.iter().find_map(|contribution| {
                match &contribution.kind {
                    crate::contribution::ContributionKind::NewAssemblyType { source, target }
                    | crate::contribution::ContributionKind::NewNestedType { source, target } => {
                        name.rebase(source, target)
                    }
                    _ => None,
                }
            });
        }
        let advice = self.item.advice_type.as_ref()?;
        let joinpoint = self.item.joinpoint_type()?;
        if name == advice {
            return Some(joinpoint.clone());
        }
        if !name.is_within(advice) {
            return None;
        }
        let generated = name
            .ancestors()
            .iter()
            .take(name.path.len() - advice.path.len())
            .filter_map(|ancestor| self.ctx.view.set().type_def(ancestor))
            .any(|def| def.is_compiler_generated());
        if generated {
            return None;
        }
        name.rebase(advice, joinpoint)
            .filter(|rebased| self.ctx.view.contains(rebased))
    }

    fn introduced(&mut self, name: &TypeName) -> Result<Option<TypeName>, ResolveError> {
        for ancestor in name.ancestors() {
            let candidates =
                self.ctx
                    .introductions
                    .candidates(&ancestor, &self.item.target_module, self.item.id);
            match candidates.len() {
                0 => continue,
                1 => {
                    let (provider, target) = &candidates[0];
                    self.needs.insert(*provider);
                    return Ok(name.rebase(&ancestor, target));
                }
                _ => {
                    return Err(WeaveError::AmbiguousTarget {
                        reference: name.full_name(),
                        candidates: candidates
                            .iter()
                            .map(|(_, target)| target.to_string())
                            .collect(),
                    }
                    .into())
                }
            }
        }
        Ok(None)
    }

    fn auxiliary(&self, name: &TypeName) -> Option<TypeName> {
        let root = compiler_generated_root(self.ctx.view.set(), name)?;
        let auxiliary = self.ctx.auxiliaries.get(&root, &self.item.target_module)?;
        name.rebase(&root, &auxiliary.target)
    }

    fn prototype(&self, name: &TypeName) -> Result<Option<TypeName>, ResolveError> {
        let local = name.ancestors().into_iter().find_map(|ancestor| {
            self.item
                .type_mappings
                .get(&ancestor)
                .map(|target| (ancestor, Some(target.clone())))
        });
        let found = local.or_else(|| {
            self.ctx
                .prototypes
                .enclosing(name)
                .map(|mapping| (mapping.prototype.clone(), mapping.target.clone()))
        });
        let Some((prototype, target)) = found else {
            return Ok(None);
        };
        let Some(target) = target else {
            return Err(WeaveError::MissingTarget {
                reference: name.full_name(),
                scope: format!("placeholder '{}'", prototype.full_name()),
            }
            .into());
        };
        if name == &prototype {
            return Ok(Some(target));
        }
        let Some(derived) = name.rebase(&prototype, &target) else {
            return Ok(None);
        };
        let existing = self.ctx.view.set().type_def(&derived).is_some();
        let contributed = self.ctx.introductions.introduces(&derived)
            || self.ctx.view.overlay().new_types.contains_key(&derived);
        match (existing, contributed) {
            (true, true) => Err(Fault::AmbiguousNestedType {
                reference: name.to_string(),
                candidates: vec![
                    format!("{} (declared)", derived),
                    format!("{} (introduced)", derived),
                ],
            }
            .into()),
            (false, false) => Err(WeaveError::MissingTarget {
                reference: name.full_name(),
                scope: target.to_string(),
            }
            .into()),
            _ => Ok(Some(derived)),
        }
    }

    fn resolve_sig(&mut self, sig: &TypeSig, mode: ParamMode) -> Result<TypeSig, ResolveError> {
        match sig {
            TypeSig::Named(name) => Ok(TypeSig::Named(self.resolve_name(name)?)),
            TypeSig::Generic { base, args } => {
                let base = self.resolve_name(base)?;
                let args = args
                    .iter()
                    .map(|arg| self.resolve_sig(arg, mode))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(TypeSig::Generic { base, args })
            }
            TypeSig::ByRef(inner) => Ok(TypeSig::ByRef(Box::new(self.resolve_sig(inner, mode)?))),
            TypeSig::Array(inner) => Ok(TypeSig::Array(Box::new(self.resolve_sig(inner, mode)?))),
            TypeSig::GenericParam(param) => match (param.owner, mode) {
                (GenericOwner::Type, ParamMode::Context)
                | (
                    GenericOwner::Type,
                    ParamMode::Signature {
                        advice_declared: true,
                    },
                ) => Ok(self
                    .item
                    .type_params
                    .get(param.position as usize)
                    .cloned()
                    .unwrap_or_else(|| sig.clone())),
                (GenericOwner::Method, ParamMode::Context) => self
                    .generics
                    .as_ref()
                    .and_then(|context| context.resolve(param.position, &param.name))
                    .ok_or_else(|| {
                        Fault::UnpairedMethodGeneric {
                            position: param.position,
                            context: self.describe_item(),
                        }
                        .into()
                    }),
                _ => Ok(sig.clone()),
            },
        }
    }

    fn advice_declared(&self, declaring: &TypeSig) -> bool {
        match (declaring.type_name(), &self.item.advice_type) {
            (Some(name), Some(advice)) => name == advice,
            _ => false,
        }
    }

    // ------------------------------------------------------------------------
    // Members
    // ------------------------------------------------------------------------

    fn mapped_declaring(&mut self, declaring: &TypeSig, target: &TypeSig) -> Result<TypeSig, ResolveError> {
        match declaring {
            TypeSig::Generic { args, .. } => {
                let Some(base) = target.type_name().cloned() else {
                    return Ok(target.clone());
                };
                let args = args
                    .iter()
                    .map(|arg| self.resolve_sig(arg, ParamMode::Context))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(TypeSig::Generic { base, args })
            }
            _ => Ok(target.clone()),
        }
    }

    fn import_field(&mut self, field: &FieldRef) -> Result<FieldRef, ResolveError> {
        let advice_declared = self.advice_declared(&field.declaring);
        Ok(FieldRef {
            declaring: self.resolve_sig(&field.declaring, ParamMode::Context)?,
            name: field.name.clone(),
            field_type: self.resolve_sig(&field.field_type, ParamMode::Signature { advice_declared })?,
        })
    }

    fn import_method(&mut self, method: &MethodRef) -> Result<MethodRef, ResolveError> {
        let mode = ParamMode::Signature {
            advice_declared: self.advice_declared(&method.declaring),
        };
        Ok(MethodRef {
            declaring: self.resolve_sig(&method.declaring, ParamMode::Context)?,
            name: method.name.clone(),
            has_this: method.has_this,
            return_type: self.resolve_sig(&method.return_type, mode)?,
            params: method
                .params
                .iter()
                .map(|param| self.resolve_sig(param, mode))
                .collect::<Result<Vec<_>, _>>()?,
            generic_arity: method.generic_arity,
            generic_args: method
                .generic_args
                .iter()
                .map(|arg| self.resolve_sig(arg, ParamMode::Context))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn inlined_advice_member(&self, declaring: &TypeSig, is_static: bool, describe: String) -> Option<Result<(), ResolveError>> {
        let advice = self.item.advice_type.as_ref()?;
        if declaring.type_name() != Some(advice) {
            return None;
        }
        if is_static {
            Some(Ok(()))
        } else {
            Some(Err(WeaveError::MissingTarget {
                reference: describe,
                scope: self.item.joinpoint.describe(self.ctx.view.set()),
            }
            .into()))
        }
    }

    fn field_uncached(&mut self, field: &FieldRef) -> Result<FieldRef, ResolveError> {
        let declaring = field.declaring.type_name().cloned();
        for rule in rules(self.item.kind, RefKind::Field) {
            match rule {
                Rule::ExplicitMapping | Rule::MappingByDeclaring => {
                    let Some(declaring) = &declaring else {
                        continue;
                    };
                    let generic = matches!(field.declaring, TypeSig::Generic { .. });
                    if generic != (*rule == Rule::MappingByDeclaring) {
                        continue;
                    }
                    let Some(mapping) = self
                        .item
                        .item_mappings
                        .iter()
                        .find(|mapping| mapping.matches_field(declaring, field))
                    else {
                        continue;
                    };
                    let Some(ResolvedMember::Field(target)) = mapping.target.clone() else {
                        return Err(Fault::UnresolvedMapping {
                            item: self.item.id.0,
                            member: mapping.describe(),
                        }
                        .into());
                    };
                    let declaring = self.mapped_declaring(&field.declaring, &target.declaring)?;
                    return Ok(FieldRef { declaring, ..target });
                }
                Rule::AdviceIdentity => {
                    let is_static = self
                        .ctx
                        .view
                        .set()
                        .resolve(&field.declaring)
                        .and_then(|(_, def)| def.field(&field.name))
                        .map(|def| def.is_static())
                        .unwrap_or(false);
                    if let Some(result) =
                        self.inlined_advice_member(&field.declaring, is_static, field.to_string())
                    {
                        result?;
                        return Ok(field.clone());
                    }
                }
                _ => return self.import_field(field),
            }
        }
        self.import_field(field)
    }

    fn call_uncached(&mut self, method: &MethodRef) -> Result<ResolvedCall, ResolveError> {
        let declaring = method.declaring.type_name().cloned();
        for rule in rules(self.item.kind, RefKind::Method) {
            match rule {
                Rule::ExplicitMapping | Rule::MappingByDeclaring => {
                    let Some(declaring) = &declaring else {
                        continue;
                    };
                    let generic = matches!(method.declaring, TypeSig::Generic { .. });
                    if generic != (*rule == Rule::MappingByDeclaring) {
                        continue;
                    }
                    let Some(mapping) = self
                        .item
                        .item_mappings
                        .iter()
                        .find(|mapping| mapping.matches_method(declaring, method))
                    else {
                        continue;
                    };
                    if let Some(ResolvedMember::DelegateField { field, invoke }) = &mapping.target {
                        return Ok(ResolvedCall::Delegate {
                            field: field.clone(),
                            invoke: invoke.clone(),
                        });
                    }
                    let Some(target) = mapping.target_method(method) else {
                        return Err(Fault::UnresolvedMapping {
                            item: self.item.id.0,
                            member: mapping.describe(),
                        }
                        .into());
                    };
                    let resolved_declaring = self.mapped_declaring(&method.declaring, &target.declaring)?;
                    let generic_args = method
                        .generic_args
                        .iter()
                        .map(|arg| self.resolve_sig(arg, ParamMode::Context))
                        .collect::<Result<Vec<_>, _>>()?;
                    return Ok(ResolvedCall::Method(MethodRef {
                        declaring: resolved_declaring,
                        generic_args,
                        ..target
                    }));
                }
                Rule::AdviceIdentity => {
                    if let Some(result) =
                        self.inlined_advice_member(&method.declaring, !method.has_this, method.to_string())
                    {
                        result?;
                        return Ok(ResolvedCall::Method(method.clone()));
                    }
                }
                _ => return self.import_method(method).map(ResolvedCall::Method),
            }
        }
        self.import_method(method).map(ResolvedCall::Method)
    }
}

fn cacheable_method(method: &MethodRef) -> bool {
    !method.declaring.has_generic_params()
        && !method.return_type.has_generic_params()
        && !method.params.iter().any(TypeSig::has_generic_params)
        && !method.generic_args.iter().any(TypeSig::has_generic_params)
}

impl ReferenceResolver for ItemResolver<'_> {
    fn resolve_type(&mut self, sig: &TypeSig) -> Result<TypeSig, ResolveError> {
        let cacheable = !sig.has_generic_params();
        if cacheable {
            if let Some(hit) = self.cache.types.get(sig) {
                return Ok(hit.clone());
            }
        }
        let resolved = self.resolve_sig(sig, ParamMode::Context)?;
        if cacheable {
            self.cache.types.insert(sig.clone(), resolved.clone());
        }
        Ok(resolved)
    }

    fn resolve_field(&mut self, field: &FieldRef) -> Result<FieldRef, ResolveError> {
        let cacheable = !field.declaring.has_generic_params() && !field.field_type.has_generic_params();
        if cacheable {
            if let Some(hit) = self.cache.fields.get(field) {
                return Ok(hit.clone());
            }
        }
        let resolved = self.field_uncached(field)?;
        if cacheable {
            self.cache.fields.insert(field.clone(), resolved.clone());
        }
        Ok(resolved)
    }

    fn resolve_call(&mut self, method: &MethodRef) -> Result<ResolvedCall, ResolveError> {
        let cacheable = cacheable_method(method);
        if cacheable {
            if let Some(hit) = self.cache.methods.get(method) {
                return Ok(ResolvedCall::Method(hit.clone()));
            }
        }
        let resolved = self.call_uncached(method)?;
        if let (true, ResolvedCall::Method(target)) = (cacheable, &resolved) {
            self.cache.methods.insert(method.clone(), target.clone());
        }
        Ok(resolved)
    }

    fn set_method_context(
        &mut self,
        context: Option<GenericResolutionContext>,
    ) -> Option<GenericResolutionContext> {
        std::mem::replace(&mut self.generics, context)
    }
}
