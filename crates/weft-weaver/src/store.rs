//! Module persistence
//!
//! The weaver reads and writes modules through a [`ModuleStore`].
//! [`DirectoryStore`] works on `<name>.wmod` files; [`MemoryStore`] keeps
//! everything in memory and records what would have been written.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use tracing::debug;
use weft_metadata::{Module, MODULE_EXTENSION};

use crate::error::WeaverError;

/// Source and sink of modules
pub trait ModuleStore {
    /// Load a module by name
    fn load(&mut self, name: &str) -> Result<Module, WeaverError>;

    /// Load a module from an explicit file
    fn load_path(&mut self, path: &Path) -> Result<Module, WeaverError>;

    /// Empty the output location
    fn clear_output(&mut self) -> Result<(), WeaverError>;

    /// Persist a woven module
    fn write(&mut self, module: &Module) -> Result<(), WeaverError>;

    /// Copy an unmodified dependency next to the woven modules
    fn copy_dependency(&mut self, name: &str) -> Result<(), WeaverError>;
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> WeaverError + '_ {
    move |source| WeaverError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Module file name for a module name
pub fn module_file_name(name: &str) -> String {
    format!("{}.{}", name, MODULE_EXTENSION)
}

/// Modules stored as files in directories
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    input_dirs: Vec<PathBuf>,
    output_dir: PathBuf,
    locations: FxHashMap<String, PathBuf>,
    written: BTreeSet<String>,
}

impl DirectoryStore {
    /// Store reading from `input_dirs` in order and writing to `output_dir`
    pub fn new(input_dirs: Vec<PathBuf>, output_dir: PathBuf) -> Self {
        Self {
            input_dirs,
            output_dir,
            locations: FxHashMap::default(),
            written: BTreeSet::new(),
        }
    }

    /// Output directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        if let Some(path) = self.locations.get(name) {
            return Some(path.clone());
        }
        let file = module_file_name(name);
        self.input_dirs
            .iter()
            .map(|dir| dir.join(&file))
            .find(|path| path.is_file())
    }

    fn read(&mut self, path: &Path) -> Result<Module, WeaverError> {
        let bytes = fs::read(path).map_err(io_error(path))?;
        let module = Module::decode(&bytes).map_err(|source| WeaverError::Module {
            path: path.to_path_buf(),
            source,
        })?;
        self.locations.insert(module.name.clone(), path.to_path_buf());
        Ok(module)
    }
}

impl ModuleStore for DirectoryStore {
    fn load(&mut self, name: &str) -> Result<Module, WeaverError> {
        let path = self
            .locate(name)
            .ok_or_else(|| WeaverError::ModuleNotFound(name.to_string()))?;
        self.read(&path)
    }

    fn load_path(&mut self, path: &Path) -> Result<Module, WeaverError> {
        self.read(path)
    }

    fn clear_output(&mut self) -> Result<(), WeaverError> {
        if self.output_dir.exists() {
            fs::remove_dir_all(&self.output_dir).map_err(io_error(&self.output_dir))?;
        }
        fs::create_dir_all(&self.output_dir).map_err(io_error(&self.output_dir))?;
        self.written.clear();
        Ok(())
    }

    fn write(&mut self, module: &Module) -> Result<(), WeaverError> {
        let path = self.output_dir.join(module_file_name(&module.name));
        fs::write(&path, module.encode()).map_err(io_error(&path))?;
        debug!(module = %module.name, path = %path.display(), "wrote woven module");
        self.written.insert(module.name.clone());
        Ok(())
    }

    fn copy_dependency(&mut self, name: &str) -> Result<(), WeaverError> {
        if self.written.contains(name) {
            return Ok(());
        }
        let source = self
            .locate(name)
            .ok_or_else(|| WeaverError::ModuleNotFound(name.to_string()))?;
        let destination = self.output_dir.join(module_file_name(name));
        fs::copy(&source, &destination).map_err(io_error(&source))?;
        self.written.insert(name.to_string());
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    modules: BTreeMap<String, Module>,
    files: BTreeMap<PathBuf, Module>,
    /// Modules written since the last clear
    pub written: BTreeMap<String, Module>,
    /// Dependencies copied since the last clear
    pub copied: BTreeSet<String>,
    /// Number of times the output was cleared
    pub clears: usize,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a module loadable by name
    pub fn add(&mut self, module: Module) {
        self.modules.insert(module.name.clone(), module);
    }

    /// Make a module loadable from a path
    pub fn add_file(&mut self, path: impl Into<PathBuf>, module: Module) {
        self.files.insert(path.into(), module);
    }
}

impl ModuleStore for MemoryStore {
    fn load(&mut self, name: &str) -> Result<Module, WeaverError> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| WeaverError::ModuleNotFound(name.to_string()))
    }

    fn load_path(&mut self, path: &Path) -> Result<Module, WeaverError> {
        let module = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| WeaverError::ModuleNotFound(path.display().to_string()))?;
        self.modules.insert(module.name.clone(), module.clone());
        Ok(module)
    }

    fn clear_output(&mut self) -> Result<(), WeaverError> {
        self.written.clear();
        self.copied.clear();
        self.clears += 1;
        Ok(())
    }

    fn write(&mut self, module: &Module) -> Result<(), WeaverError> {
        self.written.insert(module.name.clone(), module.clone());
        Ok(())
    }

    fn copy_dependency(&mut self, name: &str) -> Result<(), WeaverError> {
        if !self.modules.contains_key(name) {
            return Err(WeaverError::ModuleNotFound(name.to_string()));
        }
        self.copied.insert(name.to_string());
        Ok(())
    }
}
