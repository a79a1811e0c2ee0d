// SPDX-License-Identifier: MIT

//! Module loader - JSON and YAML documents from files and directories

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use super::graph::Module;
use super::registry::ModuleRegistry;
use crate::sim::{GmfError, ValidationError, ValidationReport};

/// Loads module documents and builds modules from them
pub struct ModuleLoader;

impl ModuleLoader {
    pub fn new() -> Self {
        Self
    }

    /// Read a document, choosing the format by file extension
    pub fn load_document<P: AsRef<Path>>(&self, path: P) -> Result<Value, GmfError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match extension(path).as_deref() {
            Some("json") => Self::parse_json(&content),
            Some("yaml") | Some("yml") => Self::parse_yaml(&content),
            _ => Self::parse_text(&content),
        }
    }

    pub fn parse_json(content: &str) -> Result<Value, GmfError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn parse_yaml(content: &str) -> Result<Value, GmfError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Parse text of unknown format: JSON first, then YAML
    pub fn parse_text(content: &str) -> Result<Value, GmfError> {
        match serde_json::from_str(content) {
            Ok(value) => Ok(value),
            Err(_) => Self::parse_yaml(content),
        }
    }

    /// Load and validate one module file
    pub fn load_module<P: AsRef<Path>>(&self, path: P) -> Result<Module, GmfError> {
        let path = path.as_ref();
        log::debug!("Loading module from {}", path.display());
        let document = self.load_document(path)?;
        Module::from_document(&document)
    }

    /// Load every module under `dir`, keyed by its path relative to `dir`
    /// without extension (`medications/insulin`). Errors of all files are
    /// reported together, as are unknown submodule references.
    pub fn load_dir<P: AsRef<Path>>(&self, dir: P) -> Result<ModuleRegistry, GmfError> {
        let dir = dir.as_ref();
        let mut files = Vec::new();
        collect_files(dir, &mut files)?;
        files.sort();

        let mut registry = ModuleRegistry::new();
        let mut errors = Vec::new();
        for file in &files {
            let key = module_key(dir, file);
            match self.load_module(file) {
                Ok(module) => {
                    registry.register_as(key, module);
                }
                Err(GmfError::Invalid(report)) => {
                    errors.extend(report.0.into_iter().map(|e| {
                        ValidationError::new(format!("{}: {}", file.display(), e.message))
                    }));
                }
                Err(err) => {
                    errors.push(ValidationError::new(format!("{}: {}", file.display(), err)));
                }
            }
        }

        if errors.is_empty() {
            errors = registry.validate_references();
        }
        if !errors.is_empty() {
            return Err(ValidationReport(errors).into());
        }
        log::info!(
            "Loaded {} modules from {}",
            registry.len(),
            dir.display()
        );
        Ok(registry)
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn is_module_file(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("json" | "yaml" | "yml"))
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), GmfError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if is_module_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn module_key(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_module() {
        let yaml = r#"
name: Allergies
states:
  Initial:
    type: Initial
    direct_transition: Terminal
  Terminal:
    type: Terminal
"#;
        let doc = ModuleLoader::parse_yaml(yaml).unwrap();
        let module = Module::from_document(&doc).unwrap();
        assert_eq!(module.name, "Allergies");
        assert_eq!(module.len(), 2);
    }

    #[test]
    fn test_parse_text_prefers_json() {
        let doc = ModuleLoader::parse_text(r#"{"name": "x", "states": {}}"#).unwrap();
        assert_eq!(doc["name"], "x");

        let doc = ModuleLoader::parse_text("name: y\nstates: {}\n").unwrap();
        assert_eq!(doc["name"], "y");
    }

    #[test]
    fn test_bad_json_is_an_error() {
        assert!(matches!(
            ModuleLoader::parse_json("{\"name\": "),
            Err(GmfError::Json(_))
        ));
    }

    #[test]
    fn test_module_key() {
        let root = Path::new("/modules");
        assert_eq!(module_key(root, Path::new("/modules/asthma.json")), "asthma");
        assert_eq!(
            module_key(root, Path::new("/modules/medications/insulin.yaml")),
            "medications/insulin"
        );
    }
}
