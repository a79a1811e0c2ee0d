// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::Arc;

use super::graph::{validate_submodules, Module};
use crate::sim::ValidationError;

/// Loaded modules by key. Cloning is cheap and every clone shares the
/// same modules, so a registry can be handed to each individual.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Arc<HashMap<String, Arc<Module>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the module's own name
    pub fn register(&mut self, module: Module) -> Arc<Module> {
        let key = module.name.clone();
        self.register_as(key, module)
    }

    /// Register under a key such as a path relative to the modules directory
    pub fn register_as(&mut self, key: impl Into<String>, module: Module) -> Arc<Module> {
        let key = key.into();
        let module = Arc::new(module);
        if Arc::make_mut(&mut self.modules)
            .insert(key.clone(), Arc::clone(&module))
            .is_some()
        {
            log::warn!("Module '{}' registered twice, keeping the last one", key);
        }
        module
    }

    pub fn get(&self, key: &str) -> Option<Arc<Module>> {
        self.modules.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.modules.contains_key(key)
    }

    /// Keys in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Keys of top-level modules. Modules under a subdirectory (`a/b`) are
    /// only run as submodules.
    pub fn roots(&self) -> Vec<&str> {
        self.names()
            .into_iter()
            .filter(|name| !name.contains('/'))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Every `CallSubmodule` of every module must name a registered key
    pub fn validate_references(&self) -> Vec<ValidationError> {
        self.names()
            .into_iter()
            .filter_map(|name| self.modules.get(name))
            .flat_map(|module| validate_submodules(module, self))
            .collect()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn module(name: &str, submodule: Option<&str>) -> Module {
        let states = match submodule {
            Some(sub) => json!({
                "Initial": {"type": "Initial", "direct_transition": "Call"},
                "Call": {"type": "CallSubmodule", "submodule": sub, "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }),
            None => json!({
                "Initial": {"type": "Initial", "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }),
        };
        Module::from_document(&json!({"name": name, "states": states})).unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.is_empty());
        registry.register(module("asthma", None));
        registry.register_as("medications/inhaler", module("Inhaler", None));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("asthma"));
        assert_eq!(registry.get("medications/inhaler").unwrap().name, "Inhaler");
        assert!(registry.get("Inhaler").is_none());
        assert_eq!(registry.names(), vec!["asthma", "medications/inhaler"]);
        assert_eq!(registry.roots(), vec!["asthma"]);
    }

    #[test]
    fn test_clones_share_modules() {
        let mut registry = ModuleRegistry::new();
        let first = registry.register(module("a", None));
        let copy = registry.clone();
        assert!(Arc::ptr_eq(&first, &copy.get("a").unwrap()));
    }

    #[test]
    fn test_validate_references() {
        let mut registry = ModuleRegistry::new();
        registry.register(module("main", Some("meds/missing")));
        registry.register(module("other", Some("main")));
        let errors = registry.validate_references();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].message,
            "State 'Call' of module 'main' calls unknown submodule 'meds/missing'"
        );
    }
}
