//! Plugin registry: descriptor storage, interpreter paths, launcher roots.
//!
//! The registry is the read-only collaborator the lifecycle controller
//! consults to resolve a plugin run: the descriptor by name, the external
//! interpreter path registered for each engine identifier, the optional
//! bundled interpreter, and the fixed directories holding installed plugins
//! and launcher scripts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::descriptor::PluginDescriptor;
use crate::error::PluginError;

/// Registry of installed plugins and engine paths.
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    descriptors: HashMap<String, PluginDescriptor>,
    engine_paths: HashMap<String, PathBuf>,
    plugins_dir: PathBuf,
    launcher_dir: PathBuf,
    bundled_interpreter: Option<PathBuf>,
}

impl PluginRegistry {
    /// Creates a registry rooted at the given plugin and launcher
    /// directories.
    #[must_use]
    pub fn new(plugins_dir: impl Into<PathBuf>, launcher_dir: impl Into<PathBuf>) -> Self {
        Self {
            descriptors: HashMap::new(),
            engine_paths: HashMap::new(),
            plugins_dir: plugins_dir.into(),
            launcher_dir: launcher_dir.into(),
            bundled_interpreter: None,
        }
    }

    /// Registers a descriptor after validation.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Registry`] when validation fails or a plugin
    /// with the same name is already registered.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<(), PluginError> {
        descriptor.validate()?;
        let name = descriptor.name().to_owned();
        if self.descriptors.contains_key(&name) {
            return Err(PluginError::Registry {
                message: format!("plugin '{name}' is already registered"),
            });
        }
        self.descriptors.insert(name, descriptor);
        Ok(())
    }

    /// Loads and registers a JSON array of descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Registry`] when the file cannot be read or
    /// parsed, or when any contained descriptor fails registration.
    pub fn load_descriptors(&mut self, path: &Path) -> Result<(), PluginError> {
        let text = fs::read_to_string(path).map_err(|err| PluginError::Registry {
            message: format!("cannot read '{}': {err}", path.display()),
        })?;
        let descriptors: Vec<PluginDescriptor> =
            serde_json::from_str(&text).map_err(|err| PluginError::Registry {
                message: format!("cannot parse '{}': {err}", path.display()),
            })?;
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        Ok(())
    }

    /// Looks up a plugin by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.descriptors.get(name)
    }

    /// Returns the number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` when no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Registers the external interpreter path for an engine identifier.
    pub fn set_engine_path(&mut self, engine: impl Into<String>, path: impl Into<PathBuf>) {
        self.engine_paths.insert(engine.into(), path.into());
    }

    /// Returns the external interpreter path registered for an engine.
    #[must_use]
    pub fn engine_path(&self, engine: &str) -> Option<&Path> {
        self.engine_paths.get(engine).map(PathBuf::as_path)
    }

    /// Records the optionally-bundled interpreter path.
    pub fn set_bundled_interpreter(&mut self, path: Option<PathBuf>) {
        self.bundled_interpreter = path;
    }

    /// Returns the bundled interpreter path, when one is shipped.
    #[must_use]
    pub fn bundled_interpreter(&self) -> Option<&Path> {
        self.bundled_interpreter.as_deref()
    }

    /// Returns the directory holding installed plugins.
    #[must_use]
    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    /// Returns the directory holding launcher scripts.
    #[must_use]
    pub fn launcher_dir(&self) -> &Path {
        &self.launcher_dir
    }

    /// Returns the entry-script path for a named plugin.
    #[must_use]
    pub fn entry_script(&self, name: &str) -> PathBuf {
        self.plugins_dir.join(name).join("plugin.py")
    }
}
