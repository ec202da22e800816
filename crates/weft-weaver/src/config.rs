//! Weaver configuration (weft.toml)
//!
//! Provides the structures and parsing for weaver run configurations.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Weaver run configuration (weft.toml)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeaverConfig {
    /// Aspect repository name recorded in provenance markers
    pub repository: String,

    /// Module declaring the advice
    pub advice_module: String,

    /// Modules join points are searched in
    #[serde(default)]
    pub target_modules: Vec<String>,

    /// Directories modules are loaded from, in lookup order
    #[serde(default = "default_input_dirs")]
    pub input_dirs: Vec<PathBuf>,

    /// Directory woven modules are written to (cleared on every run)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Aspect definitions file (JSON)
    #[serde(default = "default_aspects")]
    pub aspects: PathBuf,

    /// Extra module references injected before weaving
    #[serde(default)]
    pub references: Vec<ReferenceEntry>,
}

/// One `[[references]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceEntry {
    /// Path of the referenced module file
    pub path: PathBuf,

    /// Target module receiving the reference
    pub target: String,
}

fn default_input_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("woven")
}

fn default_aspects() -> PathBuf {
    PathBuf::from("aspects.json")
}

impl WeaverConfig {
    /// Minimal configuration for one advice module and its targets
    pub fn new(
        repository: impl Into<String>,
        advice_module: impl Into<String>,
        target_modules: Vec<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            advice_module: advice_module.into(),
            target_modules,
            input_dirs: default_input_dirs(),
            output_dir: default_output_dir(),
            aspects: default_aspects(),
            references: Vec::new(),
        }
    }

    /// Parse a configuration from a file
    ///
    /// Relative paths are taken relative to the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_str(&content)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    /// Parse a configuration from a string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: WeaverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.is_empty() {
            return Err(ConfigError::MissingField("repository".to_string()));
        }
        if self.advice_module.is_empty() {
            return Err(ConfigError::MissingField("advice_module".to_string()));
        }
        if self.target_modules.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one target module is required".to_string(),
            ));
        }
        if self.target_modules.contains(&self.advice_module) {
            return Err(ConfigError::ValidationError(format!(
                "advice module {} cannot also be a target module",
                self.advice_module
            )));
        }
        if self.input_dirs.iter().any(|dir| dir == &self.output_dir) {
            return Err(ConfigError::ValidationError(format!(
                "output directory {} is also an input directory",
                self.output_dir.display()
            )));
        }
        for reference in &self.references {
            if reference.target.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "reference {} has no target module",
                    reference.path.display()
                )));
            }
        }
        Ok(())
    }

    fn rebase(&mut self, base: &Path) {
        let join = |path: &PathBuf| {
            if path.is_absolute() {
                path.clone()
            } else {
                base.join(path)
            }
        };
        self.input_dirs = self.input_dirs.iter().map(join).collect();
        self.output_dir = join(&self.output_dir);
        self.aspects = join(&self.aspects);
        for reference in &mut self.references {
            reference.path = join(&reference.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
repository = "audit-aspects"
advice_module = "Aspects"
target_modules = ["App"]
input_dirs = ["bin"]
output_dir = "out"

[[references]]
path = "lib/Runtime.wmod"
target = "App"
"#;

    #[test]
    fn test_parse_config() {
        let config = WeaverConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.repository, "audit-aspects");
        assert_eq!(config.target_modules, vec!["App".to_string()]);
        assert_eq!(config.aspects, PathBuf::from("aspects.json"));
        assert_eq!(config.references.len(), 1);
    }

    #[test]
    fn test_missing_targets_rejected() {
        let result = WeaverConfig::from_str(
            r#"
repository = "r"
advice_module = "Aspects"
"#,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_output_must_differ_from_inputs() {
        let mut config = WeaverConfig::new("r", "Aspects", vec!["App".to_string()]);
        config.output_dir = PathBuf::from(".");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_rebases_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = WeaverConfig::from_file(&path).unwrap();
        assert_eq!(config.output_dir, dir.path().join("out"));
        assert_eq!(config.references[0].path, dir.path().join("lib/Runtime.wmod"));
    }
}
