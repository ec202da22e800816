//! Weaver facade
//!
//! [`Weaver`] drives one weaving run: it loads the advice and target modules
//! with their dependencies, builds the weave plan and, when the plan carries
//! no diagnostics, applies every contribution to the loaded modules, tags
//! the woven join points with provenance markers and persists the modified
//! modules plus their non-system dependencies to a freshly cleared output
//! location. A run with diagnostics writes nothing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use weft_metadata::module::flags as module_flags;
use weft_metadata::{Module, ModuleRef, ModuleSet, ReferenceCollector, TypeDef, TypeName, SYSTEM_SCOPE};

use crate::aspect::{parse_aspects, AspectDefinition};
use crate::builder::{WeaveItemBuilder, WeavePlan};
use crate::config::WeaverConfig;
use crate::contribution::{Cloned, ContributionKind};
use crate::error::{Diagnostics, WeaverError};
use crate::pointcut::{PatternEvaluator, PointcutEvaluator};
use crate::provenance::Provenance;
use crate::store::{DirectoryStore, ModuleStore};

/// Outcome of a weaving run
#[derive(Debug, Clone, Default)]
pub struct WeaveReport {
    /// Diagnostics in report order; non-empty means nothing was written
    pub diagnostics: Diagnostics,
    /// Modules written, in name order
    pub written: Vec<String>,
    /// Dependencies copied next to them
    pub copied: Vec<String>,
    /// Number of contributions applied
    pub contributions: usize,
}

impl WeaveReport {
    /// Whether the run was committed
    pub fn is_success(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Weaves the aspects of one advice module into its target modules
pub struct Weaver<S: ModuleStore> {
    config: WeaverConfig,
    store: S,
    evaluator: Box<dyn PointcutEvaluator>,
    references: Vec<(PathBuf, String)>,
    timestamp: Option<String>,
}

impl Weaver<DirectoryStore> {
    /// Weaver reading and writing the directories named by `config`
    pub fn open(config: WeaverConfig) -> Self {
        let store = DirectoryStore::new(config.input_dirs.clone(), config.output_dir.clone());
        Self::new(config, store)
    }
}

impl<S: ModuleStore> Weaver<S> {
    /// Weaver over an explicit store
    pub fn new(config: WeaverConfig, store: S) -> Self {
        let references = config
            .references
            .iter()
            .map(|entry| (entry.path.clone(), entry.target.clone()))
            .collect();
        Self {
            config,
            store,
            evaluator: Box::new(PatternEvaluator::new()),
            references,
            timestamp: None,
        }
    }

    /// Replace the pointcut evaluator
    pub fn with_evaluator(mut self, evaluator: Box<dyn PointcutEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Stamp provenance markers with a fixed time instead of the clock
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Register an extra module dependency of `target`, injected before
    /// weaving
    pub fn add_reference(&mut self, path: impl Into<PathBuf>, target: impl Into<String>) {
        self.references.push((path.into(), target.into()));
    }

    /// The module store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Consume the weaver, returning its store
    pub fn into_store(self) -> S {
        self.store
    }

    /// Run with the aspects file named by the configuration
    pub fn weave(&mut self) -> Result<WeaveReport, WeaverError> {
        let path = self.config.aspects.clone();
        let json = std::fs::read_to_string(&path).map_err(|source| WeaverError::Io { path, source })?;
        let aspects = parse_aspects(&json)?;
        self.weave_aspects(&aspects)
    }

    /// Run with explicit aspect definitions
    pub fn weave_aspects(&mut self, aspects: &[AspectDefinition]) -> Result<WeaveReport, WeaverError> {
        let mut set = ModuleSet::new();
        let mut dirty = BTreeSet::new();
        self.load_modules(&mut set, &mut dirty)?;
        self.store.clear_output()?;

        let plan = WeaveItemBuilder::new(&set, self.config.advice_module.clone(), self.config.target_modules.clone())
            .build(aspects, self.evaluator.as_ref())?;
        if !plan.diagnostics.is_empty() {
            info!(
                diagnostics = plan.diagnostics.len(),
                items = plan.items.len(),
                "weaving rejected, nothing written"
            );
            return Ok(WeaveReport {
                diagnostics: plan.diagnostics,
                ..WeaveReport::default()
            });
        }

        let provenance = match &self.timestamp {
            Some(timestamp) => Provenance::at(self.config.repository.clone(), timestamp.clone()),
            None => Provenance::now(self.config.repository.clone()),
        };
        let contributions = plan.contribution_count();
        let WeavePlan {
            items,
            auxiliaries,
            bodies,
            flag_edits,
            ..
        } = plan;

        for (key, body) in bodies {
            if let Some(method) = set.type_def_mut(&key.ty).and_then(|def| def.methods.get_mut(key.method)) {
                method.body = Some(body);
                dirty.insert(key.ty.scope.clone());
            }
        }
        for edit in flag_edits {
            if let Some(method) = set
                .type_def_mut(&edit.method.ty)
                .and_then(|def| def.methods.get_mut(edit.method.method))
            {
                method.flags = (method.flags | edit.set) & !edit.clear;
                dirty.insert(edit.method.ty.scope.clone());
            }
        }

        let mut types: Vec<(&TypeName, &TypeDef, &str)> = Vec::new();
        for item in items.live() {
            for contribution in &item.contributions {
                if let (kind, Some(Cloned::Type(def))) = (&contribution.kind, &contribution.clone) {
                    if let Some(target) = kind.target_type().filter(|_| kind.is_type()) {
                        types.push((target, def, &item.target_module));
                    }
                }
            }
        }
        types.sort_by_key(|(target, _, _)| target.path.len());
        for (target, def, module) in types {
            let attached = match target.declaring() {
                Some(parent) => set.type_def_mut(&parent).map(|parent| parent.nested.push(def.clone())),
                None => set.get_mut(module).map(|module| module.types.push(def.clone())),
            };
            if attached.is_some() {
                dirty.insert(module.to_string());
            }
        }

        for item in items.live() {
            for contribution in &item.contributions {
                let Some(clone) = &contribution.clone else {
                    continue;
                };
                if attach(&mut set, &contribution.kind, clone) {
                    dirty.insert(item.target_module.clone());
                }
            }
            if item.contributions.is_empty() {
                continue;
            }
            let Some(module) = set.get_mut(item.joinpoint.module()) else {
                continue;
            };
            if let Some(attributes) = item.joinpoint.attributes_mut(module) {
                if provenance.tag(attributes, &item.aspect_name) {
                    dirty.insert(item.joinpoint.module().to_string());
                }
            }
        }

        for auxiliary in auxiliaries.iter() {
            let Some(def) = &auxiliary.clone else {
                continue;
            };
            if let Some(module) = set.get_mut(&auxiliary.module) {
                module.types.push(def.clone());
                dirty.insert(auxiliary.module.clone());
            }
        }

        let (written, copied) = self.persist(&mut set, &dirty)?;
        info!(
            contributions,
            written = written.len(),
            copied = copied.len(),
            "weaving committed"
        );
        Ok(WeaveReport {
            diagnostics: Diagnostics::new(),
            written,
            copied,
            contributions,
        })
    }

    // ========================================================================
    // Loading
    // ========================================================================

    fn load_modules(&mut self, set: &mut ModuleSet, dirty: &mut BTreeSet<String>) -> Result<(), WeaverError> {
        let mut required = vec![self.config.advice_module.clone()];
        required.extend(self.config.target_modules.iter().cloned());
        for name in &required {
            if set.get(name).is_none() {
                set.insert(self.store.load(name)?);
            }
        }

        for (path, target) in &self.references {
            let module = self.store.load_path(path)?;
            let name = module.name.clone();
            if set.get(&name).is_none() {
                set.insert(module);
            }
            let Some(receiver) = set.get_mut(target) else {
                return Err(WeaverError::ModuleNotFound(target.clone()));
            };
            let reference = ModuleRef {
                name: name.clone(),
                path: Some(path.display().to_string()),
            };
            if receiver.add_reference(reference) {
                debug!(module = %target, reference = %name, "reference added");
                dirty.insert(target.clone());
            }
        }

        let mut pending: Vec<String> = set
            .iter()
            .flat_map(|(_, module)| module.references.iter().map(|reference| reference.name.clone()))
            .collect();
        while let Some(name) = pending.pop() {
            if set.get(&name).is_some() {
                continue;
            }
            match self.store.load(&name) {
                Ok(module) => {
                    pending.extend(module.references.iter().map(|reference| reference.name.clone()));
                    set.insert(module);
                }
                Err(WeaverError::ModuleNotFound(_)) => {
                    warn!(module = %name, "dependency not found, references into it stay unresolved");
                }
                Err(error) => return Err(error),
            }
        }
        info!(modules = set.len(), "modules loaded");
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn persist(
        &mut self,
        set: &mut ModuleSet,
        dirty: &BTreeSet<String>,
    ) -> Result<(Vec<String>, Vec<String>), WeaverError> {
        let known: BTreeSet<String> = set.iter().map(|(_, module)| module.name.clone()).collect();
        let mut written = Vec::new();
        let mut dependencies = BTreeSet::new();
        for name in dirty {
            let Some(module) = set.get_mut(name) else {
                continue;
            };
            for scope in referenced_scopes(module) {
                if !known.contains(&scope) {
                    warn!(module = %module.name, reference = %scope, "woven module references an unknown module");
                }
                module.add_reference(ModuleRef::new(scope));
            }
            module.flags |= module_flags::WOVEN;
            self.store.write(module)?;
            written.push(name.clone());
            dependencies.extend(module.references.iter().map(|reference| reference.name.clone()));
        }

        let mut copied = Vec::new();
        for name in dependencies {
            let system = name == SYSTEM_SCOPE
                || set
                    .get(&name)
                    .map_or(false, |module| module.flags & module_flags::SYSTEM != 0);
            if dirty.contains(&name) || system {
                continue;
            }
            match self.store.copy_dependency(&name) {
                Ok(()) => copied.push(name),
                Err(WeaverError::ModuleNotFound(_)) => {
                    warn!(module = %name, "dependency not found, not copied");
                }
                Err(error) => return Err(error),
            }
        }
        Ok((written, copied))
    }
}

/// Attach a member-level clone to its receiving element
fn attach(set: &mut ModuleSet, kind: &ContributionKind, clone: &Cloned) -> bool {
    if let (ContributionKind::NewAttribute { target, .. }, Cloned::Attribute(attribute)) = (kind, clone) {
        return match target.attributes_mut(set) {
            Some(attributes) => {
                attributes.push(attribute.clone());
                true
            }
            None => false,
        };
    }
    if kind.is_type() {
        return false;
    }
    let Some(def) = kind.target_type().and_then(|target| set.type_def_mut(target)) else {
        return false;
    };
    match (kind, clone) {
        (ContributionKind::NewBaseType { .. }, Cloned::Base(base)) => def.base = Some(base.clone()),
        (ContributionKind::NewInterface { .. }, Cloned::Interface(entry)) => def.interfaces.push(entry.clone()),
        (_, Cloned::Field(field)) => def.fields.push(field.clone()),
        (_, Cloned::Method(method)) => def.methods.push(method.clone()),
        (_, Cloned::Property(property)) => def.properties.push(property.clone()),
        (_, Cloned::Event(event)) => def.events.push(event.clone()),
        _ => return false,
    }
    true
}

/// Module scopes referenced from `module`, other than itself and the system
fn referenced_scopes(module: &Module) -> BTreeSet<String> {
    let mut collector = ReferenceCollector::new();
    for ty in &module.types {
        collector.visit_type(ty);
    }
    for attribute in &module.attributes {
        collector.visit_attribute(attribute);
    }
    collector
        .scopes()
        .into_iter()
        .filter(|scope| scope != &module.name && scope != SYSTEM_SCOPE)
        .collect()
}

/// Load a configuration file and run it against the configured directories
pub fn weave_config(path: &Path) -> Result<WeaveReport, WeaverError> {
    let config = WeaverConfig::from_file(path)?;
    Weaver::open(config).weave()
}
